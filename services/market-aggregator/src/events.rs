//! Feed payload definitions
//!
//! The exchange feed delivers three kinds of payloads per instrument:
//! an absolute order-book snapshot (fetched once when monitoring starts),
//! differential order-book deltas, and summary ticks carrying the last
//! traded price.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::InstrumentId;
use types::order::OrderEntry;

/// Absolute order-book state used to seed a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub instrument: InstrumentId,
    /// Feed nonce the snapshot was taken at, if provided
    pub nonce: Option<u64>,
    pub bids: Vec<OrderEntry>,
    pub asks: Vec<OrderEntry>,
}

impl OrderBookSnapshot {
    /// Whether every entry is an absolute frame.
    pub fn is_absolute(&self) -> bool {
        self.bids
            .iter()
            .chain(self.asks.iter())
            .all(|e| !e.frame.is_differential())
    }
}

/// One batch of differential book frames, partitioned by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub instrument: InstrumentId,
    /// Feed nonce of this batch, if provided
    pub nonce: Option<u64>,
    pub bids: Vec<OrderEntry>,
    pub asks: Vec<OrderEntry>,
}

impl OrderBookDelta {
    /// Number of frames in the batch.
    pub fn frame_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

/// Market summary tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDelta {
    pub instrument: InstrumentId,
    /// Exchange timestamp of the summary
    pub timestamp: DateTime<Utc>,
    /// Last traded price; the exchange omits it for markets without trades
    pub last: Option<Decimal>,
}
