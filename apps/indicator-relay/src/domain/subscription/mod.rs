//! Subscription State
//!
//! Domain types tracking the lifecycle of every `(symbol, timeframe,
//! indicator)` subscription.
//!
//! # Design
//!
//! Each subscription moves through an explicit state machine:
//!
//! ```text
//! Connecting --ready--> Ready --update--> Ready
//!     |                   |
//!     +------fault--------+--> Faulted --retry--> Connecting
//!     |                   |        |
//!     +---------------teardown-----+--> TornDown
//! ```
//!
//! `TornDown` is terminal. A rebuilt subscription is a new record starting
//! at `Connecting`. The registry holds at most one record per key, which is
//! what keeps a key from having two live subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use super::market::{SubscriptionKey, Symbol};

// =============================================================================
// State Machine
// =============================================================================

/// Lifecycle state of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Chart and study requested, waiting for the chart to become ready.
    Connecting,
    /// Receiving study updates.
    Ready,
    /// Chart or study failed; a flat-delay retry is pending.
    Faulted,
    /// Released. Terminal.
    TornDown,
}

impl SubscriptionState {
    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Ready | Self::Faulted | Self::TornDown)
                | (Self::Ready, Self::Ready | Self::Faulted | Self::TornDown)
                | (Self::Faulted, Self::Connecting | Self::TornDown)
        )
    }

    /// Whether the subscription currently holds upstream resources.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Ready)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Faulted => "faulted",
            Self::TornDown => "torn_down",
        };
        f.write_str(s)
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// No record exists for the key.
    #[error("no subscription registered for {0}")]
    Unknown(SubscriptionKey),
    /// The state machine does not allow this edge.
    #[error("illegal transition {from} -> {to} for {key}")]
    Illegal {
        /// Subscription key.
        key: SubscriptionKey,
        /// Current state.
        from: SubscriptionState,
        /// Requested state.
        to: SubscriptionState,
    },
}

// =============================================================================
// Registry
// =============================================================================

/// Current state of every registered subscription.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    states: RwLock<HashMap<SubscriptionKey, SubscriptionState>>,
    created: AtomicU64,
    torn_down: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription in `Connecting`.
    ///
    /// Returns `false` if the key already has a record; the caller must tear
    /// it down first.
    pub fn register(&self, key: SubscriptionKey) -> bool {
        let mut states = self.states.write();
        if states.contains_key(&key) {
            return false;
        }
        states.insert(key, SubscriptionState::Connecting);
        self.created.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Move a subscription to `next`.
    ///
    /// Moving to `TornDown` removes the record.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` when the key is unknown or the edge is not
    /// part of the state machine.
    pub fn transition(
        &self,
        key: &SubscriptionKey,
        next: SubscriptionState,
    ) -> Result<SubscriptionState, TransitionError> {
        let mut states = self.states.write();
        let current = *states
            .get(key)
            .ok_or_else(|| TransitionError::Unknown(key.clone()))?;

        if !current.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                key: key.clone(),
                from: current,
                to: next,
            });
        }

        if next == SubscriptionState::TornDown {
            states.remove(key);
            self.torn_down.fetch_add(1, Ordering::Relaxed);
        } else {
            states.insert(key.clone(), next);
        }
        Ok(current)
    }

    /// Tear down a subscription. Idempotent: returns `false` if absent.
    pub fn tear_down(&self, key: &SubscriptionKey) -> bool {
        self.transition(key, SubscriptionState::TornDown).is_ok()
    }

    /// Current state of a key.
    #[must_use]
    pub fn state(&self, key: &SubscriptionKey) -> Option<SubscriptionState> {
        self.states.read().get(key).copied()
    }

    /// Registered keys of one symbol.
    #[must_use]
    pub fn keys_for(&self, symbol: &Symbol) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .states
            .read()
            .keys()
            .filter(|k| &k.symbol == symbol)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let states = self.states.read();
        let mut stats = SubscriptionStats {
            created_total: self.created.load(Ordering::Relaxed),
            torn_down_total: self.torn_down.load(Ordering::Relaxed),
            ..SubscriptionStats::default()
        };
        for state in states.values() {
            match state {
                SubscriptionState::Connecting => stats.connecting += 1,
                SubscriptionState::Ready => stats.ready += 1,
                SubscriptionState::Faulted => stats.faulted += 1,
                SubscriptionState::TornDown => {}
            }
        }
        stats
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    /// Waiting for chart readiness.
    pub connecting: usize,
    /// Receiving updates.
    pub ready: usize,
    /// Waiting for a retry.
    pub faulted: usize,
    /// Records ever registered.
    pub created_total: u64,
    /// Records ever torn down.
    pub torn_down_total: u64,
}

impl SubscriptionStats {
    /// Subscriptions holding upstream resources.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.connecting + self.ready
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Indicator, Timeframe};

    fn key(ind: Indicator) -> SubscriptionKey {
        SubscriptionKey::new(Symbol::new("X"), Timeframe::H1, ind)
    }

    #[test]
    fn happy_path() {
        let registry = SubscriptionRegistry::new();
        let k = key(Indicator::Ema50);

        assert!(registry.register(k.clone()));
        assert_eq!(registry.state(&k), Some(SubscriptionState::Connecting));

        registry.transition(&k, SubscriptionState::Ready).unwrap();
        registry.transition(&k, SubscriptionState::Ready).unwrap();
        assert_eq!(registry.stats().ready, 1);

        assert!(registry.tear_down(&k));
        assert_eq!(registry.state(&k), None);
    }

    #[test]
    fn second_register_is_rejected() {
        let registry = SubscriptionRegistry::new();
        let k = key(Indicator::Rsi);
        assert!(registry.register(k.clone()));
        assert!(!registry.register(k));
        assert_eq!(registry.stats().created_total, 1);
    }

    #[test]
    fn fault_then_retry() {
        let registry = SubscriptionRegistry::new();
        let k = key(Indicator::Macd);
        registry.register(k.clone());
        registry.transition(&k, SubscriptionState::Faulted).unwrap();
        assert_eq!(registry.stats().live(), 0);

        let err = registry.transition(&k, SubscriptionState::Ready).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));

        registry.transition(&k, SubscriptionState::Connecting).unwrap();
        assert_eq!(registry.stats().live(), 1);
    }

    #[test]
    fn tear_down_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let k = key(Indicator::BollingerBands);
        registry.register(k.clone());
        assert!(registry.tear_down(&k));
        assert!(!registry.tear_down(&k));
        assert_eq!(registry.stats().torn_down_total, 1);
    }

    #[test]
    fn unknown_key_transition_fails() {
        let registry = SubscriptionRegistry::new();
        let err = registry
            .transition(&key(Indicator::Rsi), SubscriptionState::Ready)
            .unwrap_err();
        assert!(matches!(err, TransitionError::Unknown(_)));
    }

    #[test]
    fn keys_for_filters_by_symbol() {
        let registry = SubscriptionRegistry::new();
        registry.register(key(Indicator::Rsi));
        registry.register(key(Indicator::Ema20));
        registry.register(SubscriptionKey::new(
            Symbol::new("Y"),
            Timeframe::H1,
            Indicator::Rsi,
        ));
        let keys = registry.keys_for(&Symbol::new("X"));
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.symbol.as_str() == "X"));
    }

    #[test]
    fn torn_down_is_terminal() {
        for next in [
            SubscriptionState::Connecting,
            SubscriptionState::Ready,
            SubscriptionState::Faulted,
            SubscriptionState::TornDown,
        ] {
            assert!(!SubscriptionState::TornDown.can_transition_to(next));
        }
    }
}
