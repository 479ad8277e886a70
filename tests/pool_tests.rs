//! Integration tests for the session pool.
//!
//! These drive the pool through scripted token and connector seams:
//! growth batches with mixed outcomes, remote drops with handshake
//! compensation, and channel changes flowing to live transports.

mod support;

use std::sync::Arc;

use viewpool::session::Frame;
use viewpool::testkit::session::ScriptedConnector;
use viewpool::testkit::tokens::ScriptedTokens;

use support::{drain_events, pool_with};

#[tokio::test]
async fn growth_counts_successes_and_failures_per_attempt() {
    let connector = Arc::new(ScriptedConnector::new());
    let tokens = ScriptedTokens::new().with_ok(3).with_err(2);
    let (mut pool, mut events) = pool_with(tokens, Arc::clone(&connector), 100);

    let handle = pool.grow(5).unwrap();
    handle.await.unwrap();
    drain_events(&mut pool, &mut events);

    assert_eq!(pool.pool_size(), 3);
    assert_eq!(pool.ok_count(), 3);
    assert_eq!(pool.err_count(), 2);
    assert_eq!(connector.open_count(), 3);
}

#[tokio::test]
async fn failed_transport_opens_count_as_drops() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.fail_next_opens(2);
    let (mut pool, mut events) = pool_with(ScriptedTokens::new(), Arc::clone(&connector), 100);

    let handle = pool.grow(4).unwrap();
    handle.await.unwrap();
    drain_events(&mut pool, &mut events);

    // All four acquisitions succeeded; two transports never opened.
    assert_eq!(pool.ok_count(), 4);
    assert_eq!(pool.pool_size(), 2);
    assert_eq!(pool.drop_count(), 2);
}

#[tokio::test]
async fn remote_drop_compensates_and_backfills() {
    let connector = Arc::new(ScriptedConnector::new());
    let (mut pool, mut events) = pool_with(ScriptedTokens::new(), Arc::clone(&connector), 5);

    pool.grow(5).unwrap().await.unwrap();
    drain_events(&mut pool, &mut events);
    pool.rebalance_handshake(3);
    assert_eq!(pool.connected_count(), 3);

    // Remote closes a presenting session.
    connector.close(1, "remote close");
    drain_events(&mut pool, &mut events);

    assert_eq!(pool.pool_size(), 4);
    assert_eq!(pool.drop_count(), 1);
    // One idle sibling was promoted, keeping the presentation count.
    assert_eq!(pool.connected_count(), 3);

    // The next backfill cycle restores the pool to its limit.
    pool.grow(5).unwrap().await.unwrap();
    drain_events(&mut pool, &mut events);
    assert_eq!(pool.pool_size(), 5);
}

#[tokio::test]
async fn channel_change_reaches_every_live_transport() {
    let connector = Arc::new(ScriptedConnector::new());
    let (mut pool, mut events) = pool_with(ScriptedTokens::new(), Arc::clone(&connector), 3);

    pool.grow(3).unwrap().await.unwrap();
    drain_events(&mut pool, &mut events);
    pool.rebalance_handshake(3);

    pool.set_channel("200".into());

    for id in 1..=3 {
        let frames = connector.frames(id).unwrap().all();
        // Baseline handshake, then disconnect and handshake under the
        // new channel id.
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1], Frame::disconnect("200"));
        assert_eq!(frames[2], Frame::handshake("200"));
    }
}

#[tokio::test]
async fn growth_stops_at_the_pool_limit() {
    let connector = Arc::new(ScriptedConnector::new());
    let tokens = ScriptedTokens::new();
    let (mut pool, mut events) = pool_with(tokens, Arc::clone(&connector), 2);

    pool.grow(2).unwrap().await.unwrap();
    drain_events(&mut pool, &mut events);

    assert_eq!(pool.pool_size(), 2);
    assert!(pool.grow(2).is_none());
}
