//! Per-instrument market stream
//!
//! A `MarketStream` owns the order book and the four candle series of one
//! instrument and is the only place they are mutated. Each of the five
//! structures sits behind its own shared-reader / exclusive-writer lock,
//! so a tick updating the 1m series never waits on the 30m one, and
//! snapshot readers only ever block for the duration of a copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use types::errors::AggregatorError;
use types::ids::{InstrumentId, SubscriptionId};

use crate::candles::{Candle, CandleSeries, MergeOutcome, SeriesSnapshot, Timeframe};
use crate::config::AggregatorConfig;
use crate::events::{OrderBookDelta, OrderBookSnapshot, SummaryDelta};
use crate::metrics::StreamMetrics;
use crate::order_book::{ApplyOutcome, BookTotals, OrderBook, TotalsDrift};
use crate::snapshot::{BookSnapshot, SnapshotBuilder};

/// Feed subscriptions held by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSubscriptions {
    pub book: SubscriptionId,
    pub summary: SubscriptionId,
}

/// Immutable copy of a stream: book plus one series per timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub instrument: InstrumentId,
    pub book: BookSnapshot,
    /// Indexed by [`Timeframe::index`].
    pub candles: [SeriesSnapshot; 4],
}

impl StreamSnapshot {
    pub fn series(&self, timeframe: Timeframe) -> &SeriesSnapshot {
        &self.candles[timeframe.index()]
    }
}

/// Live state of one instrument.
pub struct MarketStream {
    instrument: InstrumentId,
    book: RwLock<OrderBook>,
    /// Book deltas received before the seeding snapshot was loaded.
    /// `Some` while seeding. Only locked while holding the book lock.
    backlog: Mutex<Option<Vec<OrderBookDelta>>>,
    /// Indexed by [`Timeframe::index`].
    series: [RwLock<CandleSeries>; 4],
    snapshots: SnapshotBuilder,
    metrics: StreamMetrics,
    subscriptions: Mutex<Option<StreamSubscriptions>>,
    config: AggregatorConfig,
    closed: AtomicBool,
}

impl MarketStream {
    /// Create a stream with an empty book.
    pub fn new(instrument: InstrumentId, config: AggregatorConfig) -> Result<Self, AggregatorError> {
        Self::build(instrument, config, None)
    }

    /// Create a stream that buffers book deltas until [`MarketStream::seed`]
    /// loads the absolute book.
    pub fn seeding(instrument: InstrumentId, config: AggregatorConfig) -> Result<Self, AggregatorError> {
        Self::build(instrument, config, Some(Vec::new()))
    }

    /// Create a stream and seed its book from an absolute snapshot.
    pub fn with_snapshot(
        instrument: InstrumentId,
        snapshot: &OrderBookSnapshot,
        config: AggregatorConfig,
    ) -> Result<Self, AggregatorError> {
        let stream = Self::new(instrument, config)?;
        stream.seed(snapshot)?;
        Ok(stream)
    }

    fn build(
        instrument: InstrumentId,
        config: AggregatorConfig,
        backlog: Option<Vec<OrderBookDelta>>,
    ) -> Result<Self, AggregatorError> {
        config.validate()?;

        let [m1, m5, m15, m30] = *Timeframe::all();
        let series = [
            RwLock::new(CandleSeries::for_timeframe(m1, config.retention_minutes)?),
            RwLock::new(CandleSeries::for_timeframe(m5, config.retention_minutes)?),
            RwLock::new(CandleSeries::for_timeframe(m15, config.retention_minutes)?),
            RwLock::new(CandleSeries::for_timeframe(m30, config.retention_minutes)?),
        ];

        info!(
            instrument = %instrument,
            retention_minutes = config.retention_minutes,
            seeding = backlog.is_some(),
            "MarketStream created"
        );

        Ok(Self {
            book: RwLock::new(OrderBook::new(instrument.clone())),
            instrument,
            backlog: Mutex::new(backlog),
            series,
            snapshots: SnapshotBuilder::new(),
            metrics: StreamMetrics::new(),
            subscriptions: Mutex::new(None),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Reset the book to an absolute snapshot, then replay the deltas
    /// buffered while seeding. Deltas at or below the snapshot nonce are
    /// already part of it and are skipped.
    pub fn seed(&self, snapshot: &OrderBookSnapshot) -> Result<(), AggregatorError> {
        if snapshot.instrument != self.instrument {
            return Err(AggregatorError::InstrumentMismatch {
                expected: self.instrument.clone(),
                actual: snapshot.instrument.clone(),
            });
        }
        if !snapshot.is_absolute() {
            warn!(instrument = %self.instrument, "Seeding snapshot contains differential frames");
        }

        let mut book = self.book.write();
        if self.is_closed() {
            return Err(AggregatorError::StreamClosed {
                instrument: self.instrument.clone(),
            });
        }

        let backlog = self.backlog.lock().take().unwrap_or_default();
        let seeded = book.load_snapshot(&snapshot.bids, &snapshot.asks);
        if let Some(nonce) = snapshot.nonce {
            book.set_last_nonce(nonce);
        }

        let mut replayed = 0;
        for delta in backlog
            .iter()
            .filter(|delta| follows_snapshot(delta.nonce, snapshot.nonce))
        {
            let started = Instant::now();
            let outcome = book.apply_frames(&delta.bids, &delta.asks);
            if let Some(nonce) = delta.nonce {
                book.set_last_nonce(nonce);
            }
            self.metrics
                .record_book_update(&outcome, started.elapsed().as_nanos() as u64);
            replayed += 1;
        }

        debug!(
            instrument = %self.instrument,
            entries = seeded.applied,
            buffered = backlog.len(),
            replayed,
            bid_levels = book.bid_depth(),
            ask_levels = book.ask_depth(),
            "Order book seeded from snapshot"
        );
        Ok(())
    }

    /// Whether book deltas are still being buffered for seeding.
    pub fn is_seeding(&self) -> bool {
        let _book = self.book.read();
        self.backlog.lock().is_some()
    }

    /// Record the feed subscriptions that deliver into this stream.
    ///
    /// Returns false, leaving them with the caller, if the stream is closed.
    pub fn attach_subscriptions(&self, subscriptions: StreamSubscriptions) -> bool {
        let mut slot = self.subscriptions.lock();
        if self.is_closed() {
            return false;
        }
        *slot = Some(subscriptions);
        true
    }

    /// Hand the feed subscriptions back for unsubscription.
    pub fn take_subscriptions(&self) -> Option<StreamSubscriptions> {
        self.subscriptions.lock().take()
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    pub fn subscriptions(&self) -> Option<StreamSubscriptions> {
        *self.subscriptions.lock()
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    /// Apply a batch of book frames.
    ///
    /// Returns `None` without touching the book if the delta is addressed
    /// to another instrument, the stream is closed, or the delta was
    /// buffered because the stream is still seeding.
    pub fn update_order_book(&self, delta: &OrderBookDelta) -> Option<ApplyOutcome> {
        if delta.instrument != self.instrument {
            self.metrics.record_instrument_mismatch();
            debug!(
                instrument = %self.instrument,
                received = %delta.instrument,
                "Ignoring book delta for another instrument"
            );
            return None;
        }

        let started = Instant::now();
        let (outcome, totals) = {
            let mut book = self.book.write();
            if self.is_closed() {
                return None;
            }
            if let Some(backlog) = self.backlog.lock().as_mut() {
                backlog.push(delta.clone());
                trace!(
                    instrument = %self.instrument,
                    buffered = backlog.len(),
                    "Book delta buffered while seeding"
                );
                return None;
            }
            let outcome = book.apply_frames(&delta.bids, &delta.asks);
            if let Some(nonce) = delta.nonce {
                book.set_last_nonce(nonce);
            }
            (outcome, book.totals())
        };
        self.metrics
            .record_book_update(&outcome, started.elapsed().as_nanos() as u64);

        if self.config.emit_book_events {
            debug!(
                instrument = %self.instrument,
                bids_base = %totals.bids.base,
                asks_base = %totals.asks.base,
                bids_quote = %totals.bids.quote,
                asks_quote = %totals.asks.quote,
                frames = delta.frame_count(),
                stale = outcome.stale_references,
                "Market depth"
            );
        }

        Some(outcome)
    }

    /// Merge a summary tick into every candle series, narrowest first.
    ///
    /// Returns true if the tick reached the series.
    pub fn update_summary(&self, delta: &SummaryDelta) -> bool {
        if delta.instrument != self.instrument {
            self.metrics.record_instrument_mismatch();
            debug!(
                instrument = %self.instrument,
                received = %delta.instrument,
                "Ignoring summary for another instrument"
            );
            return false;
        }

        let Some(price) = delta.last else {
            self.metrics.record_tick_ignored();
            debug!(instrument = %self.instrument, "Summary without last price");
            return false;
        };

        for (timeframe, series) in Timeframe::all().iter().zip(&self.series) {
            let mut series = series.write();
            match series.merge_tick(delta.timestamp, price) {
                Ok(MergeOutcome::Closed) => return false,
                Ok(MergeOutcome::Stale) => {
                    self.metrics.record_stale_tick();
                    debug!(
                        instrument = %self.instrument,
                        timeframe = timeframe.label(),
                        timestamp = %delta.timestamp,
                        "Tick older than the candle series"
                    );
                }
                Ok(outcome) => {
                    trace!(
                        instrument = %self.instrument,
                        timeframe = timeframe.label(),
                        ?outcome,
                        candle = ?series.last(),
                        "Candle"
                    );
                }
                Err(err) => {
                    self.metrics.record_tick_ignored();
                    warn!(instrument = %self.instrument, %err, "Unable to bucket tick");
                    return false;
                }
            }
        }

        self.metrics.record_tick_merged();
        true
    }

    /// Copy of the whole stream.
    pub fn snapshot(&self) -> StreamSnapshot {
        let taken_at = Utc::now();
        let book = {
            let book = self.book.read();
            self.snapshots.build_full(&book, taken_at)
        };
        let candles = std::array::from_fn(|i| self.series[i].read().snapshot());

        StreamSnapshot {
            instrument: self.instrument.clone(),
            book,
            candles,
        }
    }

    /// Snapshot of the best levels of the book; `None` uses the configured
    /// default depth.
    pub fn book_snapshot(&self, max_levels: Option<usize>) -> BookSnapshot {
        let depth = max_levels.unwrap_or(self.config.default_depth);
        let book = self.book.read();
        self.snapshots.build_depth(&book, depth, Utc::now())
    }

    /// Copy of one candle series.
    pub fn series(&self, timeframe: Timeframe) -> SeriesSnapshot {
        self.series[timeframe.index()].read().snapshot()
    }

    /// Newest candle of one series.
    pub fn last_candle(&self, timeframe: Timeframe) -> Option<Candle> {
        self.series[timeframe.index()].read().last()
    }

    /// Oldest retained candle of one series.
    pub fn first_candle(&self, timeframe: Timeframe) -> Option<Candle> {
        self.series[timeframe.index()].read().first()
    }

    /// Incrementally tracked book totals.
    pub fn totals(&self) -> BookTotals {
        self.book.read().totals()
    }

    /// Recompute the book totals from the live entries and report drift.
    pub fn reconcile(&self) -> Option<TotalsDrift> {
        let drift = self.book.read().drift();
        if let Some(drift) = &drift {
            warn!(
                instrument = %self.instrument,
                tracked = ?drift.tracked,
                recomputed = ?drift.recomputed,
                "Book totals drifted from live entries"
            );
        }
        drift
    }

    /// Stop accepting updates and release the book and candles.
    ///
    /// Idempotent. An update already holding a lock finishes first.
    pub fn close(&self) {
        {
            let _subscriptions = self.subscriptions.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }

        {
            let mut book = self.book.write();
            book.clear();
            *self.backlog.lock() = None;
        }
        for series in &self.series {
            series.write().close();
        }

        info!(instrument = %self.instrument, "MarketStream closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Time of the newest 1m candle, if any tick was merged.
    pub fn last_sample(&self) -> Option<DateTime<Utc>> {
        self.last_candle(Timeframe::M1).map(|c| c.sample_start)
    }
}

/// Whether a buffered delta is newer than the snapshot it is replayed onto.
fn follows_snapshot(delta_nonce: Option<u64>, snapshot_nonce: Option<u64>) -> bool {
    match (delta_nonce, snapshot_nonce) {
        (Some(delta), Some(snapshot)) => delta > snapshot,
        _ => true,
    }
}
