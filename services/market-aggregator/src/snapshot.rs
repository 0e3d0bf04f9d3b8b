//! Order book snapshots
//!
//! Immutable, versioned copies of a book taken under its read lock, with a
//! SHA-256 checksum so consumers can verify what they received. Deep books
//! can be read page by page.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::InstrumentId;
use types::numeric::Price;
use types::order::OrderEntry;

use crate::order_book::{BookTotals, OrderBook};

/// A versioned, checksummed copy of an order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Monotonic snapshot version.
    pub version: u64,
    pub instrument: InstrumentId,
    /// Bid entries in descending price order (best first).
    pub bids: Vec<OrderEntry>,
    /// Ask entries in ascending price order (best first).
    pub asks: Vec<OrderEntry>,
    /// Running totals over the whole book, not only the levels included.
    pub totals: BookTotals,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_nonce: Option<u64>,
    pub taken_at: DateTime<Utc>,
    /// SHA-256 checksum of the snapshot content for integrity.
    pub checksum: String,
}

impl BookSnapshot {
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }
}

/// A paginated view of the book for deep books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedSnapshot {
    pub instrument: InstrumentId,
    pub bids: Vec<OrderEntry>,
    pub asks: Vec<OrderEntry>,
    pub page: usize,
    pub page_size: usize,
    pub total_bid_levels: usize,
    pub total_ask_levels: usize,
    pub has_more: bool,
}

/// Builds versioned snapshots of one book.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    version_counter: AtomicU64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            version_counter: AtomicU64::new(0),
        }
    }

    /// Snapshot the whole book.
    pub fn build_full(&self, book: &OrderBook, taken_at: DateTime<Utc>) -> BookSnapshot {
        self.build(book, book.bid_entries(), book.ask_entries(), taken_at)
    }

    /// Snapshot the best `max_levels` entries of each side.
    pub fn build_depth(
        &self,
        book: &OrderBook,
        max_levels: usize,
        taken_at: DateTime<Utc>,
    ) -> BookSnapshot {
        let (bids, asks) = book.top_levels(max_levels);
        self.build(book, bids, asks, taken_at)
    }

    fn build(
        &self,
        book: &OrderBook,
        bids: Vec<OrderEntry>,
        asks: Vec<OrderEntry>,
        taken_at: DateTime<Utc>,
    ) -> BookSnapshot {
        let version = self.version_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let totals = book.totals();
        let last_nonce = book.last_nonce();
        let checksum = compute_checksum(&bids, &asks, &totals, last_nonce);

        BookSnapshot {
            version,
            instrument: book.instrument.clone(),
            bids,
            asks,
            totals,
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            last_nonce,
            taken_at,
            checksum,
        }
    }

    /// Build a paginated snapshot for deep books.
    pub fn build_paginated(&self, book: &OrderBook, page: usize, page_size: usize) -> PaginatedSnapshot {
        let offset = page.saturating_mul(page_size);

        let bids: Vec<OrderEntry> = book
            .bid_entries()
            .into_iter()
            .skip(offset)
            .take(page_size)
            .collect();

        let asks: Vec<OrderEntry> = book
            .ask_entries()
            .into_iter()
            .skip(offset)
            .take(page_size)
            .collect();

        let total_bid_levels = book.bid_depth();
        let total_ask_levels = book.ask_depth();
        let max_total = std::cmp::max(total_bid_levels, total_ask_levels);
        let has_more = offset.saturating_add(page_size) < max_total;

        PaginatedSnapshot {
            instrument: book.instrument.clone(),
            bids,
            asks,
            page,
            page_size,
            total_bid_levels,
            total_ask_levels,
            has_more,
        }
    }

    /// Current snapshot version.
    pub fn current_version(&self) -> u64 {
        self.version_counter.load(Ordering::Relaxed)
    }
}

/// Compute a SHA-256 checksum over the book entries, totals and nonce.
fn compute_checksum(
    bids: &[OrderEntry],
    asks: &[OrderEntry],
    totals: &BookTotals,
    nonce: Option<u64>,
) -> String {
    let mut hasher = Sha256::new();

    for entries in [bids, asks] {
        for entry in entries {
            hasher.update(entry.rate.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(entry.quantity.to_string().as_bytes());
            hasher.update(b"|");
        }
        hasher.update(b"---");
    }

    for total in [
        totals.bids.quote,
        totals.bids.base,
        totals.asks.quote,
        totals.asks.base,
    ] {
        // normalize() so 50 and 50.0 hash alike
        hasher.update(total.normalize().to_string().as_bytes());
        hasher.update(b"|");
    }

    if let Some(nonce) = nonce {
        hasher.update(nonce.to_le_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &BookSnapshot) -> bool {
    let expected = compute_checksum(
        &snapshot.bids,
        &snapshot.asks,
        &snapshot.totals,
        snapshot.last_nonce,
    );
    snapshot.checksum == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use types::numeric::Quantity;
    use types::order::Side;

    fn populated_book() -> OrderBook {
        let mut book = OrderBook::new(InstrumentId::new("BTC-ETH"));
        let bids: Vec<OrderEntry> = (1..=5)
            .map(|i| OrderEntry::create(Side::Bid, Quantity::from_u64(1), Price::from_u64(500 - i * 10)))
            .collect();
        let asks: Vec<OrderEntry> = (1..=5)
            .map(|i| OrderEntry::create(Side::Ask, Quantity::from_u64(1), Price::from_u64(510 + i * 10)))
            .collect();
        book.apply_frames(&bids, &asks);
        book.set_last_nonce(10);
        book
    }

    fn taken_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_build_full_snapshot() {
        let book = populated_book();
        let builder = SnapshotBuilder::new();
        let snap = builder.build_full(&book, taken_at());

        assert_eq!(snap.version, 1);
        assert_eq!(snap.bid_depth(), 5);
        assert_eq!(snap.ask_depth(), 5);
        assert_eq!(snap.last_nonce, Some(10));
        assert_eq!(snap.best_bid, Some(Price::from_u64(490)));
        assert_eq!(snap.best_ask, Some(Price::from_u64(520)));
        assert_eq!(snap.totals, book.totals());
        assert!(!snap.checksum.is_empty());
    }

    #[test]
    fn test_snapshot_versioning() {
        let book = populated_book();
        let builder = SnapshotBuilder::new();

        let s1 = builder.build_full(&book, taken_at());
        let s2 = builder.build_depth(&book, 2, taken_at());

        assert_eq!(s1.version, 1);
        assert_eq!(s2.version, 2);
        assert_eq!(builder.current_version(), 2);
    }

    #[test]
    fn test_depth_snapshot() {
        let book = populated_book();
        let snap = SnapshotBuilder::new().build_depth(&book, 3, taken_at());

        assert_eq!(snap.bids.len(), 3);
        assert_eq!(snap.asks.len(), 3);
        assert!(snap.bids[0].rate > snap.bids[1].rate);
        assert!(snap.asks[0].rate < snap.asks[1].rate);
        // Totals still describe the whole book
        assert_eq!(snap.totals.bids_base_total(), rust_decimal::Decimal::from(5));
    }

    #[test]
    fn test_snapshot_integrity() {
        let book = populated_book();
        let snap = SnapshotBuilder::new().build_full(&book, taken_at());

        assert!(verify_snapshot_integrity(&snap));

        let mut tampered = snap.clone();
        tampered.checksum = "corrupted".to_string();
        assert!(!verify_snapshot_integrity(&tampered));

        let mut tampered = snap.clone();
        tampered.bids.pop();
        assert!(!verify_snapshot_integrity(&tampered));
    }

    #[test]
    fn test_deterministic_checksum() {
        let book = populated_book();
        let s1 = SnapshotBuilder::new().build_full(&book, taken_at());
        let s2 = SnapshotBuilder::new().build_full(&book.clone(), taken_at());
        assert_eq!(s1.checksum, s2.checksum);
    }

    #[test]
    fn test_paginated_snapshot() {
        let book = populated_book();
        let builder = SnapshotBuilder::new();

        let page0 = builder.build_paginated(&book, 0, 2);
        assert_eq!(page0.bids.len(), 2);
        assert_eq!(page0.asks.len(), 2);
        assert!(page0.has_more);
        assert_eq!(page0.total_bid_levels, 5);

        let page2 = builder.build_paginated(&book, 2, 2);
        assert_eq!(page2.bids.len(), 1);
        assert!(!page2.has_more);
    }

    #[test]
    fn test_paginated_snapshot_far_page() {
        let book = populated_book();
        let page = SnapshotBuilder::new().build_paginated(&book, usize::MAX, 2);

        assert!(page.bids.is_empty());
        assert!(page.asks.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total_ask_levels, 5);
    }

    #[test]
    fn test_snapshot_serialization() {
        let book = populated_book();
        let snap = SnapshotBuilder::new().build_full(&book, taken_at());

        let json = serde_json::to_string(&snap).unwrap();
        let deserialized: BookSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, deserialized);
        assert!(verify_snapshot_integrity(&deserialized));
    }
}
