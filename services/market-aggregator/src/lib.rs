//! Market Aggregator
//!
//! Consumes an exchange feed per instrument and maintains:
//! - A live order book rebuilt from create / update / remove frames, with
//!   quote and base totals per side tracked incrementally
//! - OHLC candle series at 1, 5, 15 and 30 minutes, bounded by a
//!   retention window, with empty candles for silent intervals
//! - Versioned, checksummed snapshots readable while updates continue
//!
//! # Architecture
//!
//! ```text
//!        ExchangeFeed
//!   (snapshot, book deltas, summaries)
//!             │
//!     ┌───────▼────────┐
//!     │ StreamRegistry │  ← routes by instrument
//!     └───────┬────────┘
//!             │
//!     ┌───────▼────────┐
//!     │  MarketStream  │  ← one per instrument
//!     └──┬──────────┬──┘
//!        │          │
//!   ┌────▼────┐ ┌───▼──────────────┐
//!   │OrderBook│ │CandleSeries ×4   │
//!   └─────────┘ │ 1m 5m 15m 30m    │
//!               └──────────────────┘
//! ```

pub mod candles;
pub mod config;
pub mod events;
pub mod feed;
pub mod metrics;
pub mod order_book;
pub mod registry;
pub mod snapshot;
pub mod stream;
pub mod time_bucket;

pub use candles::{Candle, CandleSeries, MergeOutcome, SeriesSnapshot, Timeframe};
pub use config::AggregatorConfig;
pub use events::{OrderBookDelta, OrderBookSnapshot, SummaryDelta};
pub use feed::ExchangeFeed;
pub use order_book::{BookTotals, OrderBook};
pub use registry::StreamRegistry;
pub use stream::{MarketStream, StreamSnapshot};
