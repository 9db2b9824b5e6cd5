//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (upstream, store, sink, probes).
pub mod ports;

/// Application services for connections, subscriptions and emission.
pub mod services;
