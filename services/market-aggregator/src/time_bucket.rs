//! Time bucket calculation
//!
//! Maps a timestamp to the start of the N-minute bucket that contains it.
//! Buckets are aligned to the Unix epoch; because every supported span
//! divides an hour evenly, bucket boundaries also line up with the hour.

use chrono::{DateTime, Utc};
use types::errors::SeriesError;

const MINUTES_PER_HOUR: u32 = 60;
const SECONDS_PER_MINUTE: i64 = 60;

/// Check that `span_minutes` fits into an hour a whole number of times.
pub fn validate_span(span_minutes: u32) -> Result<(), SeriesError> {
    if span_minutes == 0 || MINUTES_PER_HOUR % span_minutes != 0 {
        return Err(SeriesError::InvalidGranularity {
            minutes: span_minutes,
        });
    }
    Ok(())
}

/// Truncate `time` down to the start of its `span_minutes` bucket.
///
/// Returns the latest instant `<= time` that is an exact multiple of
/// `span_minutes` minutes from the epoch. Sub-second precision is dropped
/// along with the rest of the sub-bucket remainder. Instants before the
/// epoch floor toward negative infinity.
pub fn bucket_start(time: DateTime<Utc>, span_minutes: u32) -> Result<DateTime<Utc>, SeriesError> {
    validate_span(span_minutes)?;

    let span_secs = i64::from(span_minutes) * SECONDS_PER_MINUTE;
    // timestamp() floors, the sub-second part is always non-negative
    let start = time.timestamp().div_euclid(span_secs) * span_secs;

    DateTime::from_timestamp(start, 0).ok_or(SeriesError::TimestampOutOfRange)
}
