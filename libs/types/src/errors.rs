//! Error types for the market-data aggregator
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

use crate::ids::{InstrumentId, SubscriptionId};

/// Top-level aggregator error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregatorError {
    #[error("Series error: {0}")]
    Series(#[from] SeriesError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Instrument mismatch: expected {expected}, got {actual}")]
    InstrumentMismatch {
        expected: InstrumentId,
        actual: InstrumentId,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Monitoring of {instrument} stopped while the stream was starting")]
    StreamClosed { instrument: InstrumentId },
}

/// Candle series construction and bucketing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeriesError {
    #[error("Minutes span {minutes} is not supported, as it doesn't fit into an hour N times")]
    InvalidGranularity { minutes: u32 },

    #[error("Retention of {retention_minutes} minutes doesn't cover span of {granularity_minutes} minutes N times")]
    InvalidRetention {
        retention_minutes: u32,
        granularity_minutes: u32,
    },

    #[error("Timestamp out of representable range")]
    TimestampOutOfRange,
}

/// Errors raised by the external feed collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Snapshot unavailable for {instrument}: {reason}")]
    SnapshotUnavailable {
        instrument: InstrumentId,
        reason: String,
    },

    #[error("Subscription rejected for {instrument}: {reason}")]
    SubscriptionRejected {
        instrument: InstrumentId,
        reason: String,
    },

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("Feed disconnected")]
    Disconnected,
}

/// Decimal parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
}
