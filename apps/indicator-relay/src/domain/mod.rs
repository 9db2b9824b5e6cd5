//! Domain Layer - Relay types and pure business rules.
//!
//! Nothing in this layer performs I/O. Shared state here is guarded with
//! `parking_lot` locks and never held across an await point.

/// Indicator catalog and parameter resolution.
pub mod catalog;

/// Symbols, timeframes, indicators and subscription keys.
pub mod market;

/// Pivot clustering algorithm.
pub mod pivot;

/// Outbound proxy addresses.
pub mod proxy;

/// Persisted settings records.
pub mod settings;

/// Latest processed values.
pub mod structured;

/// Subscription lifecycle tracking.
pub mod subscription;

/// Raw payload normalization.
pub mod transform;

/// Invalid-result suppression rules.
pub mod validity;
