//! In-memory order book reconstruction
//!
//! Rebuilds the live book of one instrument from an absolute snapshot
//! followed by batches of differential frames.
//! Uses `BTreeMap` keyed by rate, so each side holds at most one entry per
//! price level and iterates in price order.
//!
//! Each side keeps two running totals, maintained by signed deltas rather
//! than recomputed:
//! - quote total: `Σ(rate * quantity)` (notional in the quote currency)
//! - base total: `Σ(quantity)`
//!
//! The totals are only correct if every frame is observed exactly once and
//! in order. `recompute_totals` sums the live entries from scratch so drift
//! can be detected.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use types::ids::InstrumentId;
use types::numeric::{Price, Quantity};
use types::order::{FrameKind, OrderEntry, Side};

/// Running totals of one book side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTotals {
    /// Σ(rate * quantity)
    pub quote: Decimal,
    /// Σ(quantity)
    pub base: Decimal,
}

impl SideTotals {
    fn adjust(&mut self, rate: Price, quantity_delta: Decimal) {
        self.quote += quantity_delta * rate.as_decimal();
        self.base += quantity_delta;
    }
}

/// Running totals of both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTotals {
    pub bids: SideTotals,
    pub asks: SideTotals,
}

impl BookTotals {
    pub fn bids_quote_total(&self) -> Decimal {
        self.bids.quote
    }

    pub fn bids_base_total(&self) -> Decimal {
        self.bids.base
    }

    pub fn asks_quote_total(&self) -> Decimal {
        self.asks.quote
    }

    pub fn asks_base_total(&self) -> Decimal {
        self.asks.base
    }
}

/// Difference between the tracked totals and a full recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsDrift {
    pub tracked: BookTotals,
    pub recomputed: BookTotals,
}

/// Result of applying a batch of frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Entries that changed the book.
    pub applied: usize,
    /// Update/Remove frames referencing a rate absent from the book.
    pub stale_references: usize,
    /// Create frames at a rate that already had an entry.
    pub rate_collisions: usize,
}

impl ApplyOutcome {
    pub fn total(&self) -> usize {
        self.applied + self.stale_references
    }
}

impl AddAssign for ApplyOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.applied += rhs.applied;
        self.stale_references += rhs.stale_references;
        self.rate_collisions += rhs.rate_collisions;
    }
}

/// Effect of a single entry on its side.
enum EntryEffect {
    Applied,
    Collision,
    Stale,
}

/// One side of the book: entries unique by rate plus running totals.
#[derive(Debug, Clone, Default)]
struct BookSide {
    entries: BTreeMap<Price, OrderEntry>,
    totals: SideTotals,
}

impl BookSide {
    fn apply(&mut self, entry: &OrderEntry) -> EntryEffect {
        let rate = entry.rate;
        let incoming = entry.quantity.as_decimal();
        let live = OrderEntry {
            frame: FrameKind::Absolute,
            ..*entry
        };

        match entry.frame {
            FrameKind::Absolute | FrameKind::Create => {
                match self.entries.insert(rate, live) {
                    Some(previous) => {
                        self.totals
                            .adjust(rate, incoming - previous.quantity.as_decimal());
                        if entry.frame == FrameKind::Create {
                            EntryEffect::Collision
                        } else {
                            EntryEffect::Applied
                        }
                    }
                    None => {
                        self.totals.adjust(rate, incoming);
                        EntryEffect::Applied
                    }
                }
            }
            FrameKind::Update => match self.entries.get_mut(&rate) {
                Some(existing) => {
                    let delta = incoming - existing.quantity.as_decimal();
                    self.totals.adjust(rate, delta);
                    *existing = live;
                    EntryEffect::Applied
                }
                None => EntryEffect::Stale,
            },
            // The incoming quantity is the new size (zero on a genuine
            // remove), so the Update delta formula is reused as is.
            FrameKind::Remove => match self.entries.remove(&rate) {
                Some(previous) => {
                    let delta = incoming - previous.quantity.as_decimal();
                    self.totals.adjust(rate, delta);
                    EntryEffect::Applied
                }
                None => EntryEffect::Stale,
            },
        }
    }

    fn apply_batch(&mut self, side: Side, entries: &[OrderEntry]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for entry in entries {
            match self.apply(entry) {
                EntryEffect::Applied => outcome.applied += 1,
                EntryEffect::Collision => {
                    outcome.applied += 1;
                    outcome.rate_collisions += 1;
                    warn!(?side, rate = %entry.rate, "Create frame at an occupied rate");
                }
                EntryEffect::Stale => {
                    outcome.stale_references += 1;
                    warn!(
                        ?side,
                        frame = ?entry.frame,
                        rate = %entry.rate,
                        "Frame references a rate absent from the book"
                    );
                }
            }
        }
        outcome
    }

    fn recompute(&self) -> SideTotals {
        self.entries.values().fold(SideTotals::default(), |mut acc, e| {
            acc.adjust(e.rate, e.quantity.as_decimal());
            acc
        })
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.totals = SideTotals::default();
    }
}

/// Live order book for a single instrument.
///
/// Bids iterate in descending price order (best bid first).
/// Asks iterate in ascending price order (best ask first).
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Instrument this book belongs to.
    pub instrument: InstrumentId,
    bids: BookSide,
    asks: BookSide,
    /// Nonce of the last applied delta, if the feed supplies one.
    last_nonce: Option<u64>,
}

impl OrderBook {
    /// Create an empty order book for the given instrument.
    pub fn new(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            bids: BookSide::default(),
            asks: BookSide::default(),
            last_nonce: None,
        }
    }

    /// Apply one batch of frames. The batch is applied in full; bids first,
    /// then asks, each in the order given.
    pub fn apply_frames(&mut self, bids: &[OrderEntry], asks: &[OrderEntry]) -> ApplyOutcome {
        let mut outcome = self.bids.apply_batch(Side::Bid, bids);
        outcome += self.asks.apply_batch(Side::Ask, asks);
        outcome
    }

    /// Record the nonce of the batch just applied.
    pub fn set_last_nonce(&mut self, nonce: u64) {
        self.last_nonce = Some(nonce);
    }

    /// Reset the book and seed it from absolute entries.
    pub fn load_snapshot(&mut self, bids: &[OrderEntry], asks: &[OrderEntry]) -> ApplyOutcome {
        self.clear();
        self.apply_frames(bids, asks)
    }

    /// Drop all entries and zero the totals.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_nonce = None;
    }

    /// Incrementally tracked totals.
    pub fn totals(&self) -> BookTotals {
        BookTotals {
            bids: self.bids.totals,
            asks: self.asks.totals,
        }
    }

    /// Totals summed from the live entries.
    pub fn recompute_totals(&self) -> BookTotals {
        BookTotals {
            bids: self.bids.recompute(),
            asks: self.asks.recompute(),
        }
    }

    /// Compare tracked totals against a recomputation.
    pub fn drift(&self) -> Option<TotalsDrift> {
        let tracked = self.totals();
        let recomputed = self.recompute_totals();
        if tracked == recomputed {
            None
        } else {
            Some(TotalsDrift {
                tracked,
                recomputed,
            })
        }
    }

    /// Get the current best bid price.
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.entries.keys().next_back().copied()
    }

    /// Get the current best ask price.
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.entries.keys().next().copied()
    }

    /// Get the mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some((bid.as_decimal() + ask.as_decimal()) / Decimal::from(2))
            }
            _ => None,
        }
    }

    /// Get the spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.as_decimal() - bid.as_decimal()),
            _ => None,
        }
    }

    /// Quantity resting at `rate` on `side`.
    pub fn quantity_at(&self, side: Side, rate: Price) -> Option<Quantity> {
        let book_side = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        book_side.entries.get(&rate).map(|e| e.quantity)
    }

    /// Number of bid price levels.
    pub fn bid_depth(&self) -> usize {
        self.bids.entries.len()
    }

    /// Number of ask price levels.
    pub fn ask_depth(&self) -> usize {
        self.asks.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bid_depth() == 0 && self.ask_depth() == 0
    }

    /// Nonce of the last applied delta.
    pub fn last_nonce(&self) -> Option<u64> {
        self.last_nonce
    }

    /// Get all bid entries (descending price order).
    pub fn bid_entries(&self) -> Vec<OrderEntry> {
        self.bids.entries.values().rev().copied().collect()
    }

    /// Get all ask entries (ascending price order).
    pub fn ask_entries(&self) -> Vec<OrderEntry> {
        self.asks.entries.values().copied().collect()
    }

    /// Best `max_levels` entries of each side, best first.
    pub fn top_levels(&self, max_levels: usize) -> (Vec<OrderEntry>, Vec<OrderEntry>) {
        let bids = self
            .bids
            .entries
            .values()
            .rev()
            .take(max_levels)
            .copied()
            .collect();
        let asks = self
            .asks
            .entries
            .values()
            .take(max_levels)
            .copied()
            .collect();
        (bids, asks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn make_book() -> OrderBook {
        OrderBook::new(InstrumentId::new("BTC-ETH"))
    }

    fn qty(v: u64) -> Quantity {
        Quantity::from_u64(v)
    }

    fn px(v: u64) -> Price {
        Price::from_u64(v)
    }

    #[test]
    fn test_empty_book() {
        let book = make_book();
        assert!(book.is_empty());
        assert!(book.best_bid().is_none());
        assert!(book.best_ask().is_none());
        assert!(book.mid_price().is_none());
        assert!(book.spread().is_none());
        assert_eq!(book.totals(), BookTotals::default());
    }

    #[test]
    fn test_create_adds_to_totals() {
        let mut book = make_book();
        let outcome = book.apply_frames(
            &[OrderEntry::create(Side::Bid, qty(2), px(10))],
            &[OrderEntry::create(Side::Ask, qty(3), px(12))],
        );

        assert_eq!(outcome.applied, 2);
        assert_eq!(book.totals().bids_base_total(), Decimal::from(2));
        assert_eq!(book.totals().bids_quote_total(), Decimal::from(20));
        assert_eq!(book.totals().asks_base_total(), Decimal::from(3));
        assert_eq!(book.totals().asks_quote_total(), Decimal::from(36));
    }

    #[test]
    fn test_create_then_update() {
        let mut book = make_book();
        book.apply_frames(&[OrderEntry::create(Side::Bid, qty(2), px(10))], &[]);
        book.apply_frames(&[OrderEntry::update(Side::Bid, qty(5), px(10))], &[]);

        assert_eq!(book.totals().bids_base_total(), Decimal::from(5));
        assert_eq!(book.totals().bids_quote_total(), Decimal::from(50));
        assert_eq!(book.quantity_at(Side::Bid, px(10)), Some(qty(5)));
        assert_eq!(book.bid_depth(), 1);
    }

    #[test]
    fn test_update_missing_rate_is_dropped() {
        let mut book = make_book();
        let outcome = book.apply_frames(&[OrderEntry::update(Side::Bid, qty(5), px(10))], &[]);

        assert_eq!(outcome.stale_references, 1);
        assert_eq!(outcome.applied, 0);
        assert!(book.is_empty());
        assert_eq!(book.totals(), BookTotals::default());
    }

    #[test]
    fn test_remove_missing_rate_is_ignored() {
        let mut book = make_book();
        let outcome = book.apply_frames(&[], &[OrderEntry::remove(Side::Ask, qty(3), px(20))]);

        assert_eq!(outcome.stale_references, 1);
        assert_eq!(book.ask_depth(), 0);
        assert_eq!(book.totals(), BookTotals::default());
    }

    #[test]
    fn test_remove_with_zero_quantity_clears_contribution() {
        let mut book = make_book();
        book.apply_frames(
            &[],
            &[
                OrderEntry::create(Side::Ask, qty(3), px(20)),
                OrderEntry::create(Side::Ask, qty(1), px(21)),
            ],
        );
        book.apply_frames(&[], &[OrderEntry::remove(Side::Ask, Quantity::ZERO, px(20))]);

        assert_eq!(book.ask_depth(), 1);
        assert_eq!(book.totals().asks_base_total(), Decimal::from(1));
        assert_eq!(book.totals().asks_quote_total(), Decimal::from(21));
        assert!(book.drift().is_none());
    }

    #[test]
    fn test_remove_uses_incoming_quantity() {
        let mut book = make_book();
        book.apply_frames(&[OrderEntry::create(Side::Bid, qty(4), px(10))], &[]);
        book.apply_frames(&[OrderEntry::remove(Side::Bid, qty(1), px(10))], &[]);

        // delta = incoming - stored = 1 - 4
        assert_eq!(book.bid_depth(), 0);
        assert_eq!(book.totals().bids_base_total(), Decimal::from(1));
        assert_eq!(book.totals().bids_quote_total(), Decimal::from(10));

        let drift = book.drift().unwrap();
        assert_eq!(drift.recomputed, BookTotals::default());
        assert_eq!(drift.tracked.bids_base_total(), Decimal::from(1));
    }

    #[test]
    fn test_create_collision_replaces_entry() {
        let mut book = make_book();
        book.apply_frames(&[OrderEntry::create(Side::Bid, qty(2), px(10))], &[]);
        let outcome = book.apply_frames(&[OrderEntry::create(Side::Bid, qty(7), px(10))], &[]);

        assert_eq!(outcome.rate_collisions, 1);
        assert_eq!(book.bid_depth(), 1);
        assert_eq!(book.totals().bids_base_total(), Decimal::from(7));
        assert!(book.drift().is_none());
    }

    #[test]
    fn test_best_bid_ask_updates() {
        let mut book = make_book();
        book.apply_frames(
            &[
                OrderEntry::create(Side::Bid, qty(1), px(49_000)),
                OrderEntry::create(Side::Bid, qty(1), px(50_000)),
            ],
            &[
                OrderEntry::create(Side::Ask, qty(1), px(51_000)),
                OrderEntry::create(Side::Ask, qty(1), px(52_000)),
            ],
        );

        assert_eq!(book.best_bid(), Some(px(50_000)));
        assert_eq!(book.best_ask(), Some(px(51_000)));
        assert_eq!(book.spread().unwrap(), Decimal::from(1000));
        assert_eq!(book.mid_price().unwrap(), Decimal::from(50_500));
    }

    #[test]
    fn test_load_snapshot_resets_book() {
        let mut book = make_book();
        book.apply_frames(&[OrderEntry::create(Side::Bid, qty(9), px(5))], &[]);
        book.set_last_nonce(7);

        let outcome = book.load_snapshot(
            &[
                OrderEntry::absolute(Side::Bid, qty(2), px(10)),
                OrderEntry::absolute(Side::Bid, Quantity::from_str("0.5").unwrap(), px(9)),
            ],
            &[OrderEntry::absolute(Side::Ask, qty(1), px(11))],
        );

        assert_eq!(outcome.applied, 3);
        assert_eq!(book.last_nonce(), None);
        assert_eq!(book.quantity_at(Side::Bid, px(5)), None);
        assert_eq!(book.totals().bids_base_total(), Decimal::from_str("2.5").unwrap());
        assert_eq!(book.totals().bids_quote_total(), Decimal::from_str("24.5").unwrap());
        assert_eq!(book.totals().asks_quote_total(), Decimal::from(11));
    }

    #[test]
    fn test_entries_ordering() {
        let mut book = make_book();
        book.apply_frames(
            &[
                OrderEntry::create(Side::Bid, qty(1), px(8)),
                OrderEntry::create(Side::Bid, qty(1), px(9)),
                OrderEntry::create(Side::Bid, qty(1), px(7)),
            ],
            &[
                OrderEntry::create(Side::Ask, qty(1), px(12)),
                OrderEntry::create(Side::Ask, qty(1), px(11)),
            ],
        );

        let bids: Vec<Price> = book.bid_entries().iter().map(|e| e.rate).collect();
        assert_eq!(bids, vec![px(9), px(8), px(7)]);
        let asks: Vec<Price> = book.ask_entries().iter().map(|e| e.rate).collect();
        assert_eq!(asks, vec![px(11), px(12)]);
        assert!(book.bid_entries().iter().all(|e| e.frame == FrameKind::Absolute));

        let (top_bids, top_asks) = book.top_levels(2);
        assert_eq!(top_bids.len(), 2);
        assert_eq!(top_bids[0].rate, px(9));
        assert_eq!(top_asks.len(), 2);
    }

    #[test]
    fn test_mixed_batch() {
        let mut book = make_book();
        book.apply_frames(
            &[
                OrderEntry::create(Side::Bid, qty(2), px(10)),
                OrderEntry::create(Side::Bid, qty(3), px(9)),
            ],
            &[],
        );

        let outcome = book.apply_frames(
            &[
                OrderEntry::remove(Side::Bid, Quantity::ZERO, px(10)),
                OrderEntry::update(Side::Bid, qty(1), px(9)),
                OrderEntry::create(Side::Bid, qty(4), px(8)),
                OrderEntry::update(Side::Bid, qty(4), px(6)),
            ],
            &[],
        );

        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.stale_references, 1);
        assert_eq!(outcome.total(), 4);
        assert_eq!(book.totals().bids_base_total(), Decimal::from(5));
        assert_eq!(book.totals().bids_quote_total(), Decimal::from(41));
        assert!(book.drift().is_none());
    }
}
