//! Identifier types for aggregator entities
//!
//! Instruments are keyed by their exchange symbol. Feed subscriptions are
//! identified by UUID v7 handles so they sort by creation time in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Instrument identifier (tradable market, e.g. "BTC-ETH" or "BTC/USDT")
///
/// Symbols are normalised to ASCII upper case on construction, so lookups
/// are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create a new InstrumentId from a symbol
    ///
    /// # Panics
    /// Panics if the symbol is empty or only whitespace
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::try_new(symbol).expect("InstrumentId must not be empty")
    }

    /// Try to create an InstrumentId, returning None if the symbol is empty
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_ascii_uppercase()))
        }
    }

    /// Get the normalised symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl TryFrom<String> for InstrumentId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_new(s).ok_or_else(|| "instrument symbol must not be empty".to_string())
    }
}

impl From<InstrumentId> for String {
    fn from(id: InstrumentId) -> Self {
        id.0
    }
}

/// Handle of a feed subscription
///
/// Returned by the feed when a delta stream is subscribed and handed back
/// to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new SubscriptionId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
