//! Order-book entry types
//!
//! The feed describes the book as a list of entries, each tagged with the
//! side it belongs to and the kind of frame it represents.

use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order accumulator
    Bid,
    /// Sell order accumulator
    Ask,
}

/// Kind of book frame an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    /// Entry is absolute and serves as a reference frame (initial snapshot)
    Absolute,
    /// Entry is created in the current differential frame
    Create,
    /// Entry is updated in the current differential frame
    Update,
    /// Entry is removed in the current differential frame
    Remove,
}

impl FrameKind {
    /// Whether this frame is a differential operation against an existing book
    pub fn is_differential(&self) -> bool {
        !matches!(self, FrameKind::Absolute)
    }
}

/// A single order-book entry at one price level
///
/// `quantity` is the absolute size at `rate` for Absolute and Update
/// frames, and the size being added for Create frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderEntry {
    pub side: Side,
    pub frame: FrameKind,
    pub quantity: Quantity,
    pub rate: Price,
}

impl OrderEntry {
    pub fn new(side: Side, frame: FrameKind, quantity: Quantity, rate: Price) -> Self {
        Self {
            side,
            frame,
            quantity,
            rate,
        }
    }

    pub fn absolute(side: Side, quantity: Quantity, rate: Price) -> Self {
        Self::new(side, FrameKind::Absolute, quantity, rate)
    }

    pub fn create(side: Side, quantity: Quantity, rate: Price) -> Self {
        Self::new(side, FrameKind::Create, quantity, rate)
    }

    pub fn update(side: Side, quantity: Quantity, rate: Price) -> Self {
        Self::new(side, FrameKind::Update, quantity, rate)
    }

    pub fn remove(side: Side, quantity: Quantity, rate: Price) -> Self {
        Self::new(side, FrameKind::Remove, quantity, rate)
    }
}
