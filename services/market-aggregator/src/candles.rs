//! OHLC candle series
//!
//! Builds bounded, gap-filled OHLC candle series from last-trade ticks.
//! Uses `Decimal` for all prices.
//!
//! Candle boundaries are aligned to epoch (e.g., 5m candles open on
//! 5-minute boundaries). Buckets skipped between two ticks are kept in the
//! series as candles without prices, so the series stays contiguous; only
//! the bucket that received the tick carries OHLC values.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;
use types::errors::SeriesError;

use crate::time_bucket::{bucket_start, validate_span};

/// Candle timeframes maintained per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    M1,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
}

impl Timeframe {
    /// Width of this timeframe in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
        }
    }

    /// All timeframes, narrowest first.
    pub fn all() -> &'static [Timeframe; 4] {
        &[Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::M30]
    }

    /// Position of this timeframe in [`Timeframe::all`].
    pub fn index(&self) -> usize {
        match self {
            Timeframe::M1 => 0,
            Timeframe::M5 => 1,
            Timeframe::M15 => 2,
            Timeframe::M30 => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
        }
    }
}

/// Open/high/low/close prices of a bucket that saw at least one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Ohlc {
    fn flat(price: Decimal) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

/// A single candle.
///
/// `prices` is `None` for buckets in which no trade was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub sample_start: DateTime<Utc>,
    pub prices: Option<Ohlc>,
    /// Number of ticks merged into this bucket.
    pub tick_count: u64,
}

impl Candle {
    /// Create a candle from the first tick in its bucket.
    fn opened(sample_start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            sample_start,
            prices: Some(Ohlc::flat(price)),
            tick_count: 1,
        }
    }

    /// Create a gap candle for a bucket without trades.
    fn empty(sample_start: DateTime<Utc>) -> Self {
        Self {
            sample_start,
            prices: None,
            tick_count: 0,
        }
    }

    /// Merge a tick into the candle. Open is only set by the first tick.
    fn merge(&mut self, price: Decimal) {
        match &mut self.prices {
            Some(ohlc) => {
                if price > ohlc.high {
                    ohlc.high = price;
                }
                if price < ohlc.low {
                    ohlc.low = price;
                }
                ohlc.close = price;
            }
            None => self.prices = Some(Ohlc::flat(price)),
        }
        self.tick_count += 1;
    }

    /// Whether no trade has been observed in this bucket.
    pub fn is_empty(&self) -> bool {
        self.prices.is_none()
    }

    pub fn open(&self) -> Option<Decimal> {
        self.prices.map(|p| p.open)
    }

    pub fn high(&self) -> Option<Decimal> {
        self.prices.map(|p| p.high)
    }

    pub fn low(&self) -> Option<Decimal> {
        self.prices.map(|p| p.low)
    }

    pub fn close(&self) -> Option<Decimal> {
        self.prices.map(|p| p.close)
    }

    /// Validate candle integrity (OHLC invariants). Gap candles are valid.
    pub fn is_valid(&self) -> bool {
        match self.prices {
            Some(p) => {
                p.high >= p.open
                    && p.high >= p.close
                    && p.high >= p.low
                    && p.low <= p.open
                    && p.low <= p.close
                    && self.tick_count > 0
            }
            None => self.tick_count == 0,
        }
    }
}

/// What a merged tick did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The tick landed in an existing bucket.
    Updated,
    /// A new bucket was appended, after `gap_buckets` empty ones.
    Opened { gap_buckets: usize },
    /// The tick's bucket is older than the newest candle and no longer
    /// (or never was) part of the series.
    Stale,
    /// The series has been closed.
    Closed,
}

/// Immutable copy of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub granularity_minutes: u32,
    pub candles: Vec<Candle>,
}

impl SeriesSnapshot {
    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

/// Bounded, ascending, bucket-contiguous series of candles for one
/// granularity.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    granularity_minutes: u32,
    retention_minutes: u32,
    candles: VecDeque<Candle>,
    closed: bool,
}

impl CandleSeries {
    /// Create a series.
    ///
    /// The granularity must fit into an hour N times and the retention
    /// window must cover the granularity N times.
    pub fn new(granularity_minutes: u32, retention_minutes: u32) -> Result<Self, SeriesError> {
        validate_span(granularity_minutes)?;
        if retention_minutes == 0 || retention_minutes % granularity_minutes != 0 {
            return Err(SeriesError::InvalidRetention {
                retention_minutes,
                granularity_minutes,
            });
        }

        Ok(Self {
            granularity_minutes,
            retention_minutes,
            candles: VecDeque::new(),
            closed: false,
        })
    }

    /// Create a series for one of the standard timeframes.
    pub fn for_timeframe(timeframe: Timeframe, retention_minutes: u32) -> Result<Self, SeriesError> {
        Self::new(timeframe.minutes(), retention_minutes)
    }

    /// Merge a tick into the series.
    pub fn merge_tick(
        &mut self,
        timestamp: DateTime<Utc>,
        price: Decimal,
    ) -> Result<MergeOutcome, SeriesError> {
        if self.closed {
            return Ok(MergeOutcome::Closed);
        }

        let bucket = bucket_start(timestamp, self.granularity_minutes)?;

        // Newest first; candles are sorted so stop once we are past the bucket
        if let Some(candle) = self
            .candles
            .iter_mut()
            .rev()
            .take_while(|c| c.sample_start >= bucket)
            .find(|c| c.sample_start == bucket)
        {
            candle.merge(price);
            return Ok(MergeOutcome::Updated);
        }

        let outcome = match self.candles.back().map(|c| c.sample_start) {
            None => {
                self.candles.push_back(Candle::opened(bucket, price));
                MergeOutcome::Opened { gap_buckets: 0 }
            }
            Some(last_start) if bucket < last_start => {
                trace!(
                    granularity = self.granularity_minutes,
                    bucket = %bucket,
                    newest = %last_start,
                    "Dropping tick older than the series"
                );
                return Ok(MergeOutcome::Stale);
            }
            Some(last_start) => {
                let gap_buckets = self.fill_gap(last_start, bucket)?;
                self.candles.push_back(Candle::opened(bucket, price));
                MergeOutcome::Opened { gap_buckets }
            }
        };

        self.trim_history();
        Ok(outcome)
    }

    /// Append empty buckets strictly between `last_start` and `bucket`.
    ///
    /// Buckets that would be evicted right away are never materialised.
    fn fill_gap(
        &mut self,
        last_start: DateTime<Utc>,
        bucket: DateTime<Utc>,
    ) -> Result<usize, SeriesError> {
        let span = i64::from(self.granularity_minutes);
        let step = TimeDelta::minutes(span);
        let missing = ((bucket - last_start).num_minutes() / span - 1).max(0) as usize;
        let keep = self.limit() - 1;

        let mut next = if missing > keep {
            self.candles.clear();
            bucket
                .checked_sub_signed(TimeDelta::minutes(span * keep as i64))
                .ok_or(SeriesError::TimestampOutOfRange)?
        } else {
            last_start
                .checked_add_signed(step)
                .ok_or(SeriesError::TimestampOutOfRange)?
        };

        while next < bucket {
            self.candles.push_back(Candle::empty(next));
            next = next
                .checked_add_signed(step)
                .ok_or(SeriesError::TimestampOutOfRange)?;
        }

        Ok(missing)
    }

    /// Evict the oldest candles beyond the retention window.
    fn trim_history(&mut self) {
        let limit = self.limit();
        while self.candles.len() > limit {
            self.candles.pop_front();
        }
    }

    /// Oldest retained candle.
    pub fn first(&self) -> Option<Candle> {
        self.candles.front().cloned()
    }

    /// Newest candle.
    pub fn last(&self) -> Option<Candle> {
        self.candles.back().cloned()
    }

    /// Copy of all retained candles in ascending order.
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            granularity_minutes: self.granularity_minutes,
            candles: self.candles(),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Maximum number of retained candles.
    pub fn limit(&self) -> usize {
        (self.retention_minutes / self.granularity_minutes) as usize
    }

    pub fn granularity_minutes(&self) -> u32 {
        self.granularity_minutes
    }

    pub fn retention_minutes(&self) -> u32 {
        self.retention_minutes
    }

    /// Release all candles and ignore further ticks. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.candles = VecDeque::new();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn test_timeframe_minutes() {
        let minutes: Vec<u32> = Timeframe::all().iter().map(|tf| tf.minutes()).collect();
        assert_eq!(minutes, vec![1, 5, 15, 30]);
        for (i, tf) in Timeframe::all().iter().enumerate() {
            assert_eq!(tf.index(), i);
        }
    }

    #[test]
    fn test_series_rejects_invalid_granularity() {
        assert_eq!(
            CandleSeries::new(7, 70).unwrap_err(),
            SeriesError::InvalidGranularity { minutes: 7 }
        );
        assert!(CandleSeries::new(0, 60).is_err());
    }

    #[test]
    fn test_series_rejects_invalid_retention() {
        assert_eq!(
            CandleSeries::new(15, 50).unwrap_err(),
            SeriesError::InvalidRetention {
                retention_minutes: 50,
                granularity_minutes: 15
            }
        );
        assert!(CandleSeries::new(5, 0).is_err());
    }

    #[test]
    fn test_series_limit() {
        assert_eq!(CandleSeries::new(1, 60).unwrap().limit(), 60);
        assert_eq!(CandleSeries::new(30, 40_320).unwrap().limit(), 1344);
    }

    #[test]
    fn test_first_tick_opens_candle() {
        let mut series = CandleSeries::new(5, 60).unwrap();
        assert!(series.first().is_none());
        assert!(series.last().is_none());

        let outcome = series.merge_tick(at(10, 7, 12), dec(100)).unwrap();
        assert_eq!(outcome, MergeOutcome::Opened { gap_buckets: 0 });

        let candle = series.last().unwrap();
        assert_eq!(candle.sample_start, at(10, 5, 0));
        assert_eq!(candle.prices, Some(Ohlc::flat(dec(100))));
        assert_eq!(candle.tick_count, 1);
        assert_eq!(series.first(), series.last());
    }

    #[test]
    fn test_ticks_in_same_bucket_update_candle() {
        let mut series = CandleSeries::new(1, 60).unwrap();
        series.merge_tick(at(10, 0, 1), dec(100)).unwrap();
        assert_eq!(series.merge_tick(at(10, 0, 20), dec(120)).unwrap(), MergeOutcome::Updated);
        series.merge_tick(at(10, 0, 40), dec(80)).unwrap();
        series.merge_tick(at(10, 0, 59), dec(95)).unwrap();

        assert_eq!(series.len(), 1);
        let candle = series.last().unwrap();
        assert_eq!(candle.open(), Some(dec(100)));
        assert_eq!(candle.high(), Some(dec(120)));
        assert_eq!(candle.low(), Some(dec(80)));
        assert_eq!(candle.close(), Some(dec(95)));
        assert_eq!(candle.tick_count, 4);
        assert!(candle.is_valid());
    }

    #[test]
    fn test_gap_buckets_have_no_prices() {
        let mut series = CandleSeries::new(1, 60).unwrap();
        series.merge_tick(at(0, 0, 30), dec(100)).unwrap();
        series.merge_tick(at(0, 0, 45), dec(110)).unwrap();
        let outcome = series.merge_tick(at(0, 2, 10), dec(90)).unwrap();
        assert_eq!(outcome, MergeOutcome::Opened { gap_buckets: 1 });

        let candles = series.candles();
        assert_eq!(candles.len(), 3);

        assert_eq!(candles[0].sample_start, at(0, 0, 0));
        assert_eq!(
            candles[0].prices,
            Some(Ohlc {
                open: dec(100),
                high: dec(110),
                low: dec(100),
                close: dec(110)
            })
        );

        assert_eq!(candles[1].sample_start, at(0, 1, 0));
        assert!(candles[1].is_empty());
        assert!(candles[1].is_valid());

        assert_eq!(candles[2].sample_start, at(0, 2, 0));
        assert_eq!(candles[2].prices, Some(Ohlc::flat(dec(90))));
    }

    #[test]
    fn test_late_tick_fills_gap_candle() {
        let mut series = CandleSeries::new(1, 60).unwrap();
        series.merge_tick(at(0, 0, 0), dec(100)).unwrap();
        series.merge_tick(at(0, 3, 0), dec(130)).unwrap();

        let outcome = series.merge_tick(at(0, 1, 30), dec(105)).unwrap();
        assert_eq!(outcome, MergeOutcome::Updated);

        let candles = series.candles();
        assert_eq!(candles[1].prices, Some(Ohlc::flat(dec(105))));
        assert!(candles[2].is_empty());
    }

    #[test]
    fn test_tick_older_than_series_is_stale() {
        let mut series = CandleSeries::new(5, 60).unwrap();
        series.merge_tick(at(10, 0, 0), dec(100)).unwrap();

        let outcome = series.merge_tick(at(9, 55, 0), dec(1)).unwrap();
        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().low(), Some(dec(100)));
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let mut series = CandleSeries::new(1, 3).unwrap();
        for minute in 0..5 {
            series.merge_tick(at(10, minute, 5), dec(100 + minute as i64)).unwrap();
        }

        let candles = series.candles();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].sample_start, at(10, 2, 0));
        assert_eq!(candles[2].sample_start, at(10, 4, 0));
    }

    #[test]
    fn test_gap_wider_than_retention() {
        let mut series = CandleSeries::new(5, 30).unwrap();
        series.merge_tick(at(0, 0, 0), dec(100)).unwrap();

        let outcome = series.merge_tick(at(12, 0, 0), dec(200)).unwrap();
        assert_eq!(outcome, MergeOutcome::Opened { gap_buckets: 143 });

        let candles = series.candles();
        assert_eq!(candles.len(), 6);
        assert_eq!(candles[0].sample_start, at(11, 35, 0));
        assert!(candles[..5].iter().all(|c| c.is_empty()));
        assert_eq!(candles[5].sample_start, at(12, 0, 0));
        assert_eq!(candles[5].close(), Some(dec(200)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut series = CandleSeries::new(1, 60).unwrap();
        series.merge_tick(at(10, 0, 0), dec(100)).unwrap();

        series.close();
        series.close();
        assert!(series.is_closed());
        assert!(series.is_empty());
        assert_eq!(series.merge_tick(at(10, 1, 0), dec(100)).unwrap(), MergeOutcome::Closed);
        assert!(series.is_empty());
    }

    #[test]
    fn test_candle_integrity_validation() {
        let mut valid = Candle::opened(at(0, 0, 0), dec(50));
        valid.merge(dec(55));
        assert!(valid.is_valid());

        let invalid = Candle {
            sample_start: at(0, 0, 0),
            prices: Some(Ohlc {
                open: dec(50),
                high: dec(49),
                low: dec(48),
                close: dec(49),
            }),
            tick_count: 1,
        };
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_candle_serialization() {
        let candle = Candle::opened(at(0, 0, 0), dec(50_000));
        let json = serde_json::to_string(&candle).unwrap();
        let deserialized: Candle = serde_json::from_str(&json).unwrap();
        assert_eq!(candle, deserialized);

        let gap = Candle::empty(at(0, 1, 0));
        let json = serde_json::to_string(&gap).unwrap();
        assert!(json.contains("\"prices\":null"));
    }
}
