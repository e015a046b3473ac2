//! Value storage integration tests
//!
//! Exercises the store through its public API only:
//! - change suppression and the snapshot barrier
//! - replay, liveness and cancellation of subscriptions
//! - ordering seen by concurrent subscribers
//! - both overflow policies

use std::sync::Arc;
use std::time::Duration;

use fieldflow_core::prelude::*;
use fieldflow_testing::fixtures::{mode, numeric, register};
use fieldflow_testing::test_utils::{assert_silent, collect_n, recv_timeout, RECV_TIMEOUT};

fn reg_a() -> Arc<Register> {
    register("Test", "register-a")
}

fn reg_b() -> Arc<Register> {
    register("Test", "register-b")
}

#[tokio::test]
async fn test_duplicate_fill_yields_one_change() {
    let store = ValueStorage::with_name("state");
    let token = CancellationToken::new();
    let mut sub = store.subscribe(&token, ValueFilter::all()).await.unwrap();

    let v1 = numeric("device-0", &reg_a(), 5.0);
    let v2 = numeric("device-0", &reg_a(), 5.0);
    store.fill(v1.clone()).await.unwrap();
    store.fill(v2).await.unwrap();
    store.wait().await.unwrap();

    assert_eq!(recv_timeout(&mut sub, RECV_TIMEOUT).await, Some(v1));
    assert_silent(&mut sub, Duration::from_millis(50)).await;

    let stats = store.stats().await.unwrap();
    assert_eq!((stats.applied, stats.suppressed), (1, 1));
}

#[tokio::test]
async fn test_concrete_scenario_keeps_latest_per_key() {
    let store = ValueStorage::with_name("state");

    store.fill(numeric("device-0", &reg_a(), 0.0)).await.unwrap();
    store.fill(numeric("device-0", &reg_a(), 1.0)).await.unwrap();
    for _ in 0..10 {
        store.fill(numeric("device-0", &reg_b(), 10.0)).await.unwrap();
        store.fill(numeric("device-1", &reg_a(), 100.0)).await.unwrap();
    }
    store.wait().await.unwrap();

    let state = store.get_state().await.unwrap();
    assert_eq!(
        state,
        vec![
            numeric("device-0", &reg_a(), 1.0),
            numeric("device-0", &reg_b(), 10.0),
            numeric("device-1", &reg_a(), 100.0),
        ]
    );
    assert_eq!(store.stats().await.unwrap().suppressed, 18);
}

#[tokio::test]
async fn test_concurrent_fills_then_wait() {
    let store = ValueStorage::with_name("state");
    let reg = reg_a();

    // Each task owns one device key and counts up; the last value per key wins
    let mut tasks = Vec::new();
    for task in 0..8 {
        let store = store.clone();
        let reg = reg.clone();
        tasks.push(tokio::spawn(async move {
            let device = format!("device-{}", task);
            for i in 0..50 {
                store.fill(numeric(&device, &reg, i as f64)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    store.wait().await.unwrap();

    let state = store.get_state().await.unwrap();
    assert_eq!(state.len(), 8);
    assert!(state.iter().all(|v| v.as_numeric() == Some(49.0)));
}

#[tokio::test]
async fn test_send_initial_replay_then_live_then_cancel() {
    let store = ValueStorage::with_name("state");
    store.fill(numeric("device0", &reg_a(), 1.0)).await.unwrap();
    store.fill(numeric("device0", &reg_b(), 10.0)).await.unwrap();

    let token = CancellationToken::new();
    let mut sub = store
        .subscribe_send_initial(&token, ValueFilter::device_name("device0"))
        .await
        .unwrap();

    let mut initial = collect_n(&mut sub, 2, RECV_TIMEOUT).await;
    initial.sort_by_key(|v| v.key());
    assert_eq!(
        initial,
        vec![
            numeric("device0", &reg_a(), 1.0),
            numeric("device0", &reg_b(), 10.0)
        ]
    );

    store.fill(numeric("device1", &reg_a(), 3.0)).await.unwrap();
    store.fill(numeric("device0", &reg_a(), 2.0)).await.unwrap();
    assert_eq!(
        recv_timeout(&mut sub, RECV_TIMEOUT).await,
        Some(numeric("device0", &reg_a(), 2.0))
    );

    token.cancel();
    store.fill(numeric("device0", &reg_a(), 3.0)).await.unwrap();
    let ended = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await;
    assert_eq!(ended.unwrap(), None);
}

#[tokio::test]
async fn test_subscribers_see_same_order() {
    let store = ValueStorage::with_name("state");
    let token = CancellationToken::new();
    let mut first = store.subscribe(&token, ValueFilter::all()).await.unwrap();
    let mut second = store.subscribe(&token, ValueFilter::all()).await.unwrap();

    let reg = reg_a();
    let writers: Vec<_> = (0..2)
        .map(|w| {
            let store = store.clone();
            let reg = reg.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    let v = (w * 1000 + i) as f64;
                    store.fill(numeric("device-0", &reg, v)).await.unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }
    store.wait().await.unwrap();

    let applied = store.stats().await.unwrap().applied as usize;
    let a: Vec<f64> = collect_n(&mut first, applied, RECV_TIMEOUT)
        .await
        .iter()
        .filter_map(Value::as_numeric)
        .collect();
    let b: Vec<f64> = collect_n(&mut second, applied, RECV_TIMEOUT)
        .await
        .iter()
        .filter_map(Value::as_numeric)
        .collect();

    assert_eq!(a.len(), applied);
    assert_eq!(a, b);
    // Per-producer order survives the interleaving
    let from_first: Vec<f64> = a.iter().copied().filter(|v| *v < 1000.0).collect();
    assert!(from_first.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_filtered_snapshot_and_subscription_agree() {
    let store = ValueStorage::with_name("state");
    let conf = RegisterFilterConf::include_all().skip_category("Diagnostics");
    let uptime = register("Diagnostics", "Uptime");

    store.fill(numeric("d0", &reg_a(), 1.0)).await.unwrap();
    store.fill(numeric("d0", &uptime, 99.0)).await.unwrap();
    store.fill(Value::null("d0", mode())).await.unwrap();

    let filter = ValueFilter::device_registers("d0", conf).and(ValueFilter::non_null());
    let snapshot = store.get_state_filtered(&filter).await.unwrap();
    assert_eq!(snapshot, vec![numeric("d0", &reg_a(), 1.0)]);

    let token = CancellationToken::new();
    let mut sub = store
        .subscribe_send_initial(&token, filter)
        .await
        .unwrap();
    assert_eq!(collect_n(&mut sub, 5, Duration::from_millis(100)).await, snapshot);
}

#[tokio::test]
async fn test_block_policy_applies_back_pressure() {
    let store = ValueStorage::new(StorageConfig::named("state").with_subscriber_capacity(2)).unwrap();
    let token = CancellationToken::new();
    let mut slow = store.subscribe(&token, ValueFilter::all()).await.unwrap();

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                store.fill(numeric("d0", &reg_a(), i as f64)).await.unwrap();
            }
        })
    };

    // The writer cannot finish while the subscriber holds back the owner
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());

    // Draining lets everything through, nothing is lost
    let received = collect_n(&mut slow, 20, RECV_TIMEOUT).await;
    writer.await.unwrap();
    assert_eq!(received.len(), 20);
    assert_eq!(received.last().and_then(Value::as_numeric), Some(19.0));
}

#[tokio::test]
async fn test_drop_policy_isolates_slow_subscriber() {
    let config = StorageConfig::named("state")
        .with_subscriber_capacity(2)
        .with_overflow(OverflowPolicy::DropNewest);
    let store = ValueStorage::new(config).unwrap();
    let token = CancellationToken::new();
    let mut slow = store.subscribe(&token, ValueFilter::all()).await.unwrap();

    for i in 0..20 {
        store.fill(numeric("d0", &reg_a(), i as f64)).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(1), store.wait())
        .await
        .unwrap()
        .unwrap();

    let received = collect_n(&mut slow, 20, Duration::from_millis(100)).await;
    assert_eq!(received.len(), 2);
    assert_eq!(store.stats().await.unwrap().dropped_deliveries, 18);
    assert_eq!(
        store.get_state().await.unwrap(),
        vec![numeric("d0", &reg_a(), 19.0)]
    );
}

#[tokio::test]
async fn test_store_closes_subscriptions_when_dropped() {
    let store = ValueStorage::with_name("state");
    let token = CancellationToken::new();
    let mut sub = store.subscribe(&token, ValueFilter::all()).await.unwrap();

    drop(store);
    let ended = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await;
    assert_eq!(ended.unwrap(), None);
}

#[tokio::test]
async fn test_kind_mismatch_is_stored_as_is() {
    let store = ValueStorage::with_name("state");
    let text_reg = Arc::new(Register::text("Info", "Serial"));
    let odd = Value::numeric("d0", text_reg, 1.0);

    assert!(odd.check_kind().is_err());
    store.fill(odd.clone()).await.unwrap();
    assert_eq!(store.get_state().await.unwrap(), vec![odd]);
}
