//! Stream registry
//!
//! Maps instruments to their live `MarketStream` and routes feed callbacks
//! to them. The map is sharded so that lookups for different instruments
//! do not contend; feed calls are never made while a shard is locked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};
use types::errors::AggregatorError;
use types::ids::{InstrumentId, SubscriptionId};

use crate::config::AggregatorConfig;
use crate::events::{OrderBookDelta, SummaryDelta};
use crate::feed::{BookDeltaCallback, ExchangeFeed, SummaryDeltaCallback};
use crate::metrics::{Alert, AlertThresholds};
use crate::order_book::TotalsDrift;
use crate::stream::{MarketStream, StreamSnapshot, StreamSubscriptions};

/// Owns every monitored stream and its feed subscriptions.
pub struct StreamRegistry {
    feed: Arc<dyn ExchangeFeed>,
    config: AggregatorConfig,
    streams: DashMap<InstrumentId, Arc<MarketStream>>,
    connected: AtomicBool,
    /// Handed to feed callbacks so they never keep the registry alive.
    self_ref: Weak<StreamRegistry>,
}

impl StreamRegistry {
    pub fn new(
        feed: Arc<dyn ExchangeFeed>,
        config: AggregatorConfig,
    ) -> Result<Arc<Self>, AggregatorError> {
        config.validate()?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            feed,
            config,
            streams: DashMap::new(),
            connected: AtomicBool::new(true),
            self_ref: self_ref.clone(),
        }))
    }

    /// Start aggregating an instrument.
    ///
    /// The stream is registered first, in seeding mode, so every book
    /// delta delivered after subscribing reaches it. Once the absolute
    /// snapshot is loaded the buffered deltas newer than it are replayed.
    /// If the instrument is already monitored, or is being started by
    /// another caller, the existing stream is returned.
    pub fn start_monitoring(
        &self,
        instrument: &InstrumentId,
    ) -> Result<Arc<MarketStream>, AggregatorError> {
        let stream = match self.streams.entry(instrument.clone()) {
            Entry::Occupied(entry) => {
                debug!(instrument = %instrument, "Already monitoring");
                return Ok(entry.get().clone());
            }
            Entry::Vacant(entry) => {
                let stream = Arc::new(MarketStream::seeding(
                    instrument.clone(),
                    self.config.clone(),
                )?);
                entry.insert(stream.clone());
                stream
            }
        };

        match self.seed_stream(instrument, &stream) {
            Ok(()) => {
                info!(instrument = %instrument, "Monitoring started");
                Ok(stream)
            }
            Err(err) => {
                warn!(instrument = %instrument, %err, "Unable to start monitoring");
                self.streams
                    .remove_if(instrument, |_, registered| Arc::ptr_eq(registered, &stream));
                self.close_stream(&stream);
                Err(err)
            }
        }
    }

    /// Subscribe a registered stream to the feed and load its book.
    fn seed_stream(
        &self,
        instrument: &InstrumentId,
        stream: &MarketStream,
    ) -> Result<(), AggregatorError> {
        let book = self
            .feed
            .subscribe_book_deltas(instrument, self.book_callback())?;
        let summary = match self
            .feed
            .subscribe_summary_deltas(instrument, self.summary_callback())
        {
            Ok(id) => id,
            Err(err) => {
                self.release(&[book]);
                return Err(err.into());
            }
        };

        if !stream.attach_subscriptions(StreamSubscriptions { book, summary }) {
            self.release(&[book, summary]);
            return Err(AggregatorError::StreamClosed {
                instrument: instrument.clone(),
            });
        }

        let snapshot = self.feed.fetch_snapshot(instrument)?;
        stream.seed(&snapshot)
    }

    /// Stop aggregating an instrument. Returns false if it was not monitored.
    pub fn stop_monitoring(&self, instrument: &InstrumentId) -> bool {
        let Some((_, stream)) = self.streams.remove(instrument) else {
            return false;
        };

        self.close_stream(&stream);
        info!(instrument = %instrument, "Monitoring stopped");
        true
    }

    /// Close a stream, then release whatever subscriptions it still holds.
    fn close_stream(&self, stream: &MarketStream) {
        stream.close();
        if let Some(subs) = stream.take_subscriptions() {
            self.release(&[subs.book, subs.summary]);
        }
    }

    /// Stop every stream.
    pub fn teardown(&self) {
        let instruments = self.instruments();
        for instrument in &instruments {
            self.stop_monitoring(instrument);
        }
        info!(streams = instruments.len(), "Registry torn down");
    }

    /// Route a book delta to its stream. Returns false unless it was applied:
    /// no stream is registered, or the stream buffered it while seeding.
    pub fn on_book_delta(&self, delta: &OrderBookDelta) -> bool {
        match self.stream(&delta.instrument) {
            Some(stream) => stream.update_order_book(delta).is_some(),
            None => {
                trace!(instrument = %delta.instrument, "Book delta for unmonitored instrument");
                false
            }
        }
    }

    /// Route a summary tick to its stream. Returns false if none is registered.
    pub fn on_summary_delta(&self, delta: &SummaryDelta) -> bool {
        match self.stream(&delta.instrument) {
            Some(stream) => stream.update_summary(delta),
            None => {
                trace!(instrument = %delta.instrument, "Summary for unmonitored instrument");
                false
            }
        }
    }

    pub fn on_connection_lost(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!(streams = self.len(), "Exchange connection lost");
        }
    }

    pub fn on_connection_restored(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!(streams = self.len(), "Exchange connection restored");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Live stream of an instrument.
    pub fn stream(&self, instrument: &InstrumentId) -> Option<Arc<MarketStream>> {
        self.streams.get(instrument).map(|entry| entry.value().clone())
    }

    pub fn get_snapshot(&self, instrument: &InstrumentId) -> Option<StreamSnapshot> {
        self.stream(instrument).map(|stream| stream.snapshot())
    }

    /// Monitored instruments, sorted.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut instruments: Vec<InstrumentId> =
            self.streams.iter().map(|entry| entry.key().clone()).collect();
        instruments.sort();
        instruments
    }

    pub fn is_monitoring(&self, instrument: &InstrumentId) -> bool {
        self.streams.contains_key(instrument)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Run the totals diagnostic on every stream.
    pub fn reconcile_all(&self) -> Vec<(InstrumentId, TotalsDrift)> {
        self.all_streams()
            .into_iter()
            .filter_map(|stream| stream.reconcile().map(|drift| (stream.instrument().clone(), drift)))
            .collect()
    }

    /// Check every stream's counters against the thresholds.
    pub fn check_alerts(&self, thresholds: &AlertThresholds) -> Vec<(InstrumentId, Alert)> {
        let mut alerts = Vec::new();
        for stream in self.all_streams() {
            for alert in stream.metrics().check_thresholds(thresholds) {
                warn!(instrument = %stream.instrument(), metric = %alert.metric, "{}", alert.message);
                alerts.push((stream.instrument().clone(), alert));
            }
        }
        alerts
    }

    fn all_streams(&self) -> Vec<Arc<MarketStream>> {
        self.streams.iter().map(|entry| entry.value().clone()).collect()
    }

    fn book_callback(&self) -> BookDeltaCallback {
        let registry = self.self_ref.clone();
        Arc::new(move |delta: OrderBookDelta| {
            if let Some(registry) = registry.upgrade() {
                registry.on_book_delta(&delta);
            }
        })
    }

    fn summary_callback(&self) -> SummaryDeltaCallback {
        let registry = self.self_ref.clone();
        Arc::new(move |delta: SummaryDelta| {
            if let Some(registry) = registry.upgrade() {
                registry.on_summary_delta(&delta);
            }
        })
    }

    fn release(&self, subscriptions: &[SubscriptionId]) {
        for subscription in subscriptions {
            if let Err(err) = self.feed.unsubscribe(*subscription) {
                warn!(%subscription, %err, "Failed to unsubscribe");
            }
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        if !self.streams.is_empty() {
            self.teardown();
        }
    }
}
