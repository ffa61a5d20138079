//! Query handles: staleness, reconnect refetch, mutation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adaptive_request::clock::ManualClock;
use adaptive_request::transport::ScriptedTransport;
use adaptive_request::{Client, QueryHandle, QueryOptions, RequestDescriptor, Response};
use serde_json::json;

struct Harness {
    client: Client,
    clock: Arc<ManualClock>,
    transport: Arc<ScriptedTransport>,
}

fn harness(delay: Duration) -> Harness {
    let counter = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(ScriptedTransport::new().with_delay(delay).respond_with(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Response::ok(json!({"version": n})))
    }));
    let clock = Arc::new(ManualClock::new(10_000_000));
    let client = Client::builder()
        .transport(transport.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    Harness {
        client,
        clock,
        transport,
    }
}

fn profile_query(client: &Client, options: QueryOptions) -> QueryHandle {
    client
        .query(RequestDescriptor::get("https://api.test/profile"), options)
        .unwrap()
}

async fn settle(query: &QueryHandle) {
    for _ in 0..100 {
        if !query.is_refetching() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("background refetch did not settle");
}

#[tokio::test(start_paused = true)]
async fn test_fresh_data_is_not_refetched_on_reconnect() {
    let h = harness(Duration::ZERO);
    let query = profile_query(&h.client, QueryOptions::new().stale_time(Duration::from_secs(60)));

    let first = query.mount().await.unwrap().unwrap();
    assert_eq!(first.body, json!({"version": 1}));
    assert!(!query.is_stale());

    h.client.monitor().set_online(false);
    h.client.monitor().set_online(true);
    settle(&query).await;
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_refetches_exactly_once_on_reconnect() {
    let h = harness(Duration::from_secs(1));
    let query = profile_query(&h.client, QueryOptions::new().stale_time(Duration::from_secs(60)));
    query.mount().await.unwrap().unwrap();

    h.clock.advance(Duration::from_secs(61));
    assert!(query.is_stale());

    // flapping while the refetch is in flight must not start a second one
    h.client.monitor().set_online(false);
    h.client.monitor().set_online(true);
    assert!(query.is_refetching());
    h.client.monitor().set_online(false);
    h.client.monitor().set_online(true);
    settle(&query).await;

    assert_eq!(h.transport.call_count(), 2);
    let state = query.state();
    assert_eq!(state.data, Some(json!({"version": 2})));
    assert!(!state.stale);
    assert!(!state.from_cache);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_refetch_can_be_disabled() {
    let h = harness(Duration::ZERO);
    let query = profile_query(
        &h.client,
        QueryOptions::new()
            .stale_time(Duration::from_secs(1))
            .refetch_on_reconnect(false),
    );
    query.mount().await.unwrap().unwrap();
    h.clock.advance(Duration::from_secs(5));

    h.client.monitor().set_online(false);
    h.client.monitor().set_online(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_cache_hit_on_mount_refreshes_in_background() {
    let h = harness(Duration::ZERO);
    let opts = QueryOptions::new().stale_time(Duration::from_secs(30));

    let warm = profile_query(&h.client, opts.clone());
    warm.mount().await.unwrap().unwrap();
    h.clock.advance(Duration::from_secs(31));

    let query = profile_query(&h.client, opts);
    let resp = query.mount().await.unwrap().unwrap();
    assert!(resp.from_cache);
    assert_eq!(resp.body, json!({"version": 1}));
    settle(&query).await;

    assert_eq!(h.transport.call_count(), 2);
    assert_eq!(query.state().data, Some(json!({"version": 2})));
}

#[tokio::test]
async fn test_disabled_query_does_not_load() {
    let h = harness(Duration::ZERO);
    let query = profile_query(&h.client, QueryOptions::new().enabled(false));
    assert!(query.mount().await.is_none());
    assert_eq!(h.transport.call_count(), 0);
    assert!(query.is_stale());
}

#[tokio::test]
async fn test_window_focus_refetch_is_opt_in() {
    let h = harness(Duration::ZERO);
    let off = profile_query(&h.client, QueryOptions::new().stale_time(Duration::ZERO));
    off.mount().await.unwrap().unwrap();
    h.clock.advance(Duration::from_millis(1));
    assert!(!off.on_window_focus());

    let on = profile_query(
        &h.client,
        QueryOptions::new()
            .stale_time(Duration::ZERO)
            .refetch_on_window_focus(true),
    );
    on.mount().await.unwrap().unwrap();
    h.clock.advance(Duration::from_millis(1));
    assert!(on.on_window_focus());
    settle(&on).await;
}

#[tokio::test]
async fn test_mutate_updates_state_and_cache() {
    let h = harness(Duration::ZERO);
    let query = profile_query(&h.client, QueryOptions::new());
    query.mount().await.unwrap().unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let seen = notified.clone();
    let _sub = query.subscribe(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    query.mutate_with(|current| {
        let mut next = current.cloned().unwrap_or_default();
        next["nickname"] = json!("ada");
        next
    });
    assert_eq!(query.state().data, Some(json!({"version": 1, "nickname": "ada"})));
    assert!(notified.load(Ordering::SeqCst) >= 1);

    let again = query.request().await.unwrap();
    assert!(again.from_cache);
    assert_eq!(again.body["nickname"], json!("ada"));
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_refetch_bypasses_cache() {
    let h = harness(Duration::ZERO);
    let query = profile_query(&h.client, QueryOptions::new());
    query.mount().await.unwrap().unwrap();
    let fresh = query.refetch().await.unwrap();
    assert!(!fresh.from_cache);
    assert_eq!(fresh.body, json!({"version": 2}));
    assert_eq!(h.client.cache().len(), 1);
}
