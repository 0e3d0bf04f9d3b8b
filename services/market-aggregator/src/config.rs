//! Aggregator configuration

use types::errors::AggregatorError;

use crate::candles::Timeframe;

/// 28 days of candles.
pub const DEFAULT_RETENTION_MINUTES: u32 = 28 * 24 * 60;

/// Configuration shared by every market stream of a registry.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Time span of candles kept per series before the oldest are evicted.
    pub retention_minutes: u32,
    /// Emit a debug event with the book totals after every book update.
    pub emit_book_events: bool,
    /// Levels per side returned by `MarketStream::book_snapshot`.
    pub default_depth: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            retention_minutes: DEFAULT_RETENTION_MINUTES,
            emit_book_events: true,
            default_depth: 25,
        }
    }
}

impl AggregatorConfig {
    /// Check that the retention window covers every timeframe N times.
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.retention_minutes == 0 {
            return Err(AggregatorError::InvalidConfig(
                "retention_minutes must be positive".to_string(),
            ));
        }
        for tf in Timeframe::all() {
            if self.retention_minutes % tf.minutes() != 0 {
                return Err(AggregatorError::InvalidConfig(format!(
                    "retention of {} minutes is not a multiple of the {} timeframe",
                    self.retention_minutes,
                    tf.label()
                )));
            }
        }
        if self.default_depth == 0 {
            return Err(AggregatorError::InvalidConfig(
                "default_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
