//! Loopback tests for the worker link and the coordinator listener.
//!
//! A real TCP listener and a real dialing link on 127.0.0.1 exercise the
//! control channel end to end: attach, settings delivery, stat reports,
//! and detach on disconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use viewpool::coordinator::{self, CoordinatorEvent};
use viewpool::pool::PoolManager;
use viewpool::protocol::{ControlMessage, SettingMessage, Stat, StatMessage};
use viewpool::testkit::session::ScriptedConnector;
use viewpool::testkit::tokens::ScriptedTokens;
use viewpool::worker::{CoordinatorLink, LinkEvent, Worker, WorkerConfig};

const WAIT: Duration = Duration::from_secs(5);

async fn loopback() -> (mpsc::UnboundedReceiver<CoordinatorEvent>, CoordinatorLink) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(coordinator::serve(listener, events_tx));
    (events_rx, CoordinatorLink::new(format!("ws://{addr}")))
}

#[tokio::test]
async fn attach_settings_and_stat_round_trip() {
    let (mut events, mut link) = loopback().await;

    let opened = timeout(WAIT, link.next()).await.unwrap();
    assert!(matches!(opened, LinkEvent::Opened));

    let tx = match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Attached { tx, .. } => tx,
        other => panic!("expected attach, got {other:?}"),
    };

    let setting = ControlMessage::Setting(SettingMessage {
        channel_id: Some("15108912".into()),
        pool_limit: 10,
        handshake_size: Some(2),
    });
    tx.send(setting.clone()).unwrap();
    match timeout(WAIT, link.next()).await.unwrap() {
        LinkEvent::Message(msg) => assert_eq!(msg, setting),
        other => panic!("expected setting, got {other:?}"),
    }

    let stat = ControlMessage::Stat(StatMessage {
        stat: Stat {
            pool_size: 7,
            ..Stat::default()
        },
    });
    link.send(&stat).await.unwrap();
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Inbound { message, .. } => assert_eq!(message, stat),
        other => panic!("expected inbound stat, got {other:?}"),
    }
}

#[tokio::test]
async fn dropping_the_link_detaches_the_worker() {
    let (mut events, mut link) = loopback().await;

    assert!(matches!(
        timeout(WAIT, link.next()).await.unwrap(),
        LinkEvent::Opened
    ));
    let worker_id = match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Attached { worker_id, .. } => worker_id,
        other => panic!("expected attach, got {other:?}"),
    };

    drop(link);

    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Detached { worker_id: id } => assert_eq!(id, worker_id),
        other => panic!("expected detach, got {other:?}"),
    }
}

#[tokio::test]
async fn pool_limit_change_triggers_an_immediate_backfill() {
    let (mut events, link) = loopback().await;

    let (pool, pool_events) = PoolManager::new(
        "100".into(),
        0,
        Arc::new(ScriptedTokens::new()),
        Arc::new(ScriptedConnector::new()),
    );
    // Hour-long timers: only the backfill issued on the limit change
    // itself can grow the pool within this test's lifetime.
    let config = WorkerConfig {
        batch_size: 5,
        backfill_interval: Duration::from_secs(3600),
        reassert_interval: Duration::from_secs(3600),
        ping_interval: Duration::from_secs(3600),
    };
    tokio::spawn(Worker::new(config, pool).run(link, pool_events));

    let tx = match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Attached { tx, .. } => tx,
        other => panic!("expected attach, got {other:?}"),
    };
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Inbound {
            message: ControlMessage::Stat(msg),
            ..
        } => assert_eq!(msg.stat.pool_size, 0),
        other => panic!("expected stat, got {other:?}"),
    }

    tx.send(ControlMessage::Setting(SettingMessage {
        channel_id: Some("100".into()),
        pool_limit: 5,
        handshake_size: None,
    }))
    .unwrap();

    // Poll via pings until the growth batch lands, well inside the
    // hour the periodic backfill would otherwise take.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        tx.send(ControlMessage::Ping).unwrap();
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            CoordinatorEvent::Inbound {
                message: ControlMessage::Stat(msg),
                ..
            } => {
                if msg.stat.pool_size == 5 {
                    break;
                }
            }
            other => panic!("expected stat, got {other:?}"),
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "backfill never fired after the pool limit change"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn worker_reports_a_stat_on_attach_and_on_demand() {
    let (mut events, link) = loopback().await;

    let (pool, pool_events) = PoolManager::new(
        "100".into(),
        0,
        Arc::new(ScriptedTokens::new()),
        Arc::new(ScriptedConnector::new()),
    );
    let worker = Worker::new(
        WorkerConfig::from(&viewpool::config::PoolConfig::default()),
        pool,
    );
    tokio::spawn(worker.run(link, pool_events));

    let tx = match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Attached { tx, .. } => tx,
        other => panic!("expected attach, got {other:?}"),
    };

    // The worker reports once on link-open.
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Inbound {
            message: ControlMessage::Stat(msg),
            ..
        } => assert_eq!(msg.stat.channel_id.as_deref(), Some("100")),
        other => panic!("expected stat, got {other:?}"),
    }

    // And again on demand.
    tx.send(ControlMessage::Ping).unwrap();
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        CoordinatorEvent::Inbound {
            message: ControlMessage::Stat(_),
            ..
        } => {}
        other => panic!("expected stat, got {other:?}"),
    }
}
