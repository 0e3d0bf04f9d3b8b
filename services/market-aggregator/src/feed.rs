//! External exchange feed collaborator
//!
//! The aggregator does not own a connection. It consumes a feed that can
//! fetch an absolute book snapshot and push book deltas and summary ticks
//! to registered callbacks, on whatever thread the feed delivers on.

use std::sync::Arc;

use types::errors::FeedError;
use types::ids::{InstrumentId, SubscriptionId};

use crate::events::{OrderBookDelta, OrderBookSnapshot, SummaryDelta};

/// Callback receiving order-book deltas.
pub type BookDeltaCallback = Arc<dyn Fn(OrderBookDelta) + Send + Sync>;

/// Callback receiving summary ticks.
pub type SummaryDeltaCallback = Arc<dyn Fn(SummaryDelta) + Send + Sync>;

/// Capabilities the aggregator needs from an exchange feed.
pub trait ExchangeFeed: Send + Sync {
    /// Query the current absolute book of an instrument.
    fn fetch_snapshot(&self, instrument: &InstrumentId) -> Result<OrderBookSnapshot, FeedError>;

    /// Subscribe to differential book frames.
    fn subscribe_book_deltas(
        &self,
        instrument: &InstrumentId,
        callback: BookDeltaCallback,
    ) -> Result<SubscriptionId, FeedError>;

    /// Subscribe to summary ticks.
    fn subscribe_summary_deltas(
        &self,
        instrument: &InstrumentId,
        callback: SummaryDeltaCallback,
    ) -> Result<SubscriptionId, FeedError>;

    /// Cancel a subscription.
    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), FeedError>;
}
