//! Relay Pipeline Integration Tests
//!
//! Boots the full relay over an in-process upstream and checks settings
//! seeding, emission filtering, targeted rebuilds and reconnect recovery.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;

use indicator_relay::application::ports::{ChartEvent, EventKind, UpstreamError};
use indicator_relay::{
    Broadcast, EmissionSettings, InMemorySettingsStore, Indicator, IndicatorSettings,
    SubscriptionKey, Symbol, Timeframe, Universe,
};

use common::{harness, settle};

fn universe(symbols: &[&str], timeframes: &[Timeframe], indicators: &[Indicator]) -> Universe {
    Universe::new(
        symbols.iter().map(|s| Symbol::new(*s)).collect(),
        timeframes.to_vec(),
        indicators.to_vec(),
    )
}

/// Payloads of every queued `live-data-all` broadcast.
fn drain_all(rx: &mut broadcast::Receiver<Arc<Broadcast>>) -> Vec<Value> {
    let mut payloads = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if message.event == EventKind::LiveDataAll {
            payloads.push(message.payload.clone());
        }
    }
    payloads
}

// =============================================================================
// Boot
// =============================================================================

#[tokio::test(start_paused = true)]
async fn boot_seeds_defaults_exactly_once() {
    let store = Arc::new(InMemorySettingsStore::new());
    let u = universe(
        &["X", "Y"],
        &[Timeframe::H1, Timeframe::D1],
        &[Indicator::Rsi, Indicator::Ema50],
    );

    let first = harness(u.clone(), Arc::clone(&store));
    let report = first.relay.start().await.unwrap();
    assert_eq!(report.indicator_defaults, 8);
    assert_eq!(report.emission_defaults, 2);
    assert_eq!(store.indicator_upserts(), 8);
    assert_eq!(store.emission_upserts(), 2);
    first.relay.shutdown().await;

    let second = harness(u, Arc::clone(&store));
    let report = second.relay.start().await.unwrap();
    assert_eq!(report.indicator_defaults, 0);
    assert_eq!(report.emission_defaults, 0);
    assert_eq!(store.indicator_upserts(), 8);
    assert_eq!(store.indicator_count(), 8);
    second.relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn boot_opens_one_session_and_one_chart_per_key() {
    let h = harness(
        universe(&["X", "Y"], &[Timeframe::H1], &[Indicator::Rsi, Indicator::Macd]),
        Arc::new(InMemorySettingsStore::new()),
    );
    h.relay.start().await.unwrap();
    settle().await;

    assert_eq!(h.connector.connects_for("X"), 1);
    assert_eq!(h.connector.connects_for("Y"), 1);
    assert_eq!(h.relay.connected_count(), 2);
    assert_eq!(h.connector.latest("X").open_count(), 2);
    assert_eq!(h.connector.latest("Y").open_count(), 2);

    let stats = h.relay.subscription_stats();
    assert_eq!(stats.created_total, 4);
    assert_eq!(stats.torn_down_total, 0);
    h.relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn boot_retries_until_store_accepts_writes() {
    let h = harness(
        universe(&["X"], &[Timeframe::H1], &[Indicator::Rsi]),
        Arc::new(InMemorySettingsStore::new()),
    );
    h.store.fail_writes(true);

    let relay = Arc::clone(&h.relay);
    let boot = tokio::spawn(async move { relay.start().await });

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(!boot.is_finished());
    assert_eq!(h.connector.connects(), 0);
    assert_eq!(h.store.indicator_upserts(), 0);

    h.store.fail_writes(false);
    let report = tokio::time::timeout(Duration::from_secs(10), boot)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.indicator_defaults, 1);
    assert_eq!(h.connector.connects(), 1);
    h.relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refused_connect_at_boot_backs_off_without_rebooting() {
    let h = harness(
        universe(&["X"], &[Timeframe::H1], &[Indicator::Rsi]),
        Arc::new(InMemorySettingsStore::new()),
    );
    h.connector.refuse_next(1);

    h.relay.start().await.unwrap();
    settle().await;
    assert_eq!(h.connector.connects(), 0);
    assert_eq!(h.relay.connected_count(), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;

    assert_eq!(h.connector.connects(), 1);
    assert_eq!(h.relay.connected_count(), 1);
    assert_eq!(h.store.indicator_upserts(), 1);
    assert_eq!(h.store.emission_upserts(), 1);
    h.relay.shutdown().await;
}

// =============================================================================
// Emission
// =============================================================================

#[tokio::test(start_paused = true)]
async fn disabling_an_indicator_removes_it_from_full_emissions() {
    let h = harness(
        universe(&["X"], &[Timeframe::H1], &[Indicator::Rsi, Indicator::Macd]),
        Arc::new(InMemorySettingsStore::new()),
    );
    let mut rx = h.hub.subscribe();
    h.relay.start().await.unwrap();
    settle().await;

    let session = h.connector.latest("X");
    session
        .sender("STD;RSI")
        .send(ChartEvent::StudyUpdate(json!({"plot_0": [30, 40]})))
        .await
        .unwrap();
    session
        .sender("STD;MACD")
        .send(ChartEvent::StudyUpdate(json!({"plot_0": [1, 2]})))
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.relay.data().leaf_count(), 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    let before = drain_all(&mut rx);
    let last = before.last().expect("periodic full emission");
    assert_eq!(last["symbol"], "X");
    assert_eq!(last["timeframe"], "60");
    assert_eq!(last["RSI"], json!({"plot_0": [40, 30]}));
    assert!(last.get("MACD").is_some());

    h.relay
        .save_emission_settings(EmissionSettings {
            symbol: Symbol::new("X"),
            indicators: BTreeSet::from([Indicator::Macd]),
            timeframes: BTreeSet::from([Timeframe::H1]),
        })
        .await
        .unwrap();

    let after = drain_all(&mut rx);
    let last = after.last().expect("emission after settings change");
    assert!(last.get("RSI").is_none());
    assert_eq!(last["MACD"], json!({"plot_0": [2, 1]}));

    // The filter only gates publication; the RSI subscription keeps running.
    assert_eq!(h.connector.latest("X").open_count(), 2);
    h.relay.shutdown().await;
}

// =============================================================================
// Rebuilds
// =============================================================================

#[tokio::test(start_paused = true)]
async fn settings_update_rebuilds_only_that_subscription() {
    let h = harness(
        universe(
            &["X"],
            &[Timeframe::H1, Timeframe::D1],
            &[Indicator::Ema20, Indicator::Ema50, Indicator::Rsi],
        ),
        Arc::new(InMemorySettingsStore::new()),
    );
    h.relay.start().await.unwrap();
    settle().await;

    let before = h.relay.subscription_stats();
    assert_eq!(before.created_total, 6);

    let key = SubscriptionKey::new(Symbol::new("X"), Timeframe::H1, Indicator::Ema50);
    let mut record = IndicatorSettings::defaults(&key);
    record.params.insert("length".to_string(), json!(55));
    h.relay.save_indicator_settings(record).await.unwrap();
    settle().await;

    let after = h.relay.subscription_stats();
    assert_eq!(after.created_total, before.created_total + 1);
    assert_eq!(after.torn_down_total, before.torn_down_total + 1);

    let session = h.connector.latest("X");
    assert_eq!(session.closed_count(), 1);
    assert_eq!(session.open_count(), 6);
    assert!(session.study_inputs("STD;EMA").contains(&json!(55)));

    let stored = h
        .relay
        .indicator_settings(&Symbol::new("X"), Timeframe::H1)
        .into_iter()
        .find(|s| s.indicator == Indicator::Ema50)
        .unwrap();
    assert_eq!(stored.params["length"], json!(55));
    h.relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_rebuilds_the_symbols_subscriptions() {
    let h = harness(
        universe(&["X", "Y"], &[Timeframe::H1], &[Indicator::Rsi]),
        Arc::new(InMemorySettingsStore::new()),
    );
    h.relay.start().await.unwrap();
    settle().await;

    let old_x = h.connector.latest("X");
    let y = h.connector.latest("Y");
    old_x.fail(UpstreamError::Transport("connection reset".into()));
    settle().await;
    assert_eq!(h.relay.connected_count(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;

    assert_eq!(h.connector.connects_for("X"), 2);
    assert_eq!(h.connector.connects_for("Y"), 1);
    assert_eq!(h.relay.connected_count(), 2);

    let new_x = h.connector.latest("X");
    assert_eq!(new_x.open_count(), 1);
    assert_eq!(y.open_count(), 1);
    assert_eq!(y.closed_count(), 0);

    let stats = h.relay.subscription_stats();
    assert_eq!(stats.created_total, 3);
    assert_eq!(stats.torn_down_total, 1);

    let health = h.relay.health();
    let x = health
        .connections
        .iter()
        .find(|c| c.symbol.as_str() == "X")
        .unwrap();
    assert!(x.connected);
    h.relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_every_chart_and_session() {
    let h = harness(
        universe(&["X", "Y"], &[Timeframe::H1, Timeframe::D1], &[Indicator::Rsi]),
        Arc::new(InMemorySettingsStore::new()),
    );
    h.relay.start().await.unwrap();
    settle().await;

    h.relay.shutdown().await;

    for symbol in ["X", "Y"] {
        let session = h.connector.latest(symbol);
        assert_eq!(session.open_count(), 0);
        assert_eq!(session.closed_count(), 2);
    }
    assert_eq!(h.relay.subscription_stats().live(), 0);
    assert_eq!(h.relay.connected_count(), 0);
}
