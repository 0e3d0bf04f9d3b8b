//! Types library for the market-data aggregator
//!
//! This library provides the core type definitions shared by the aggregator
//! service and its feed adapters: identifiers, decimal newtypes, order-book
//! entry types and the error taxonomy.
//!
//! # Modules
//! - `ids`: Identifiers (InstrumentId, SubscriptionId)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `order`: Order-book entry types (Side, FrameKind, OrderEntry)
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod order;
pub mod errors;
