//! End-to-end request flows through the orchestrator

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adaptive_request::cache::CacheKeyGenerator;
use adaptive_request::network::{NetworkMonitor, NetworkMonitorConfig, QualityTier};
use adaptive_request::optimizer::{BatchConfig, OptimizerConfig};
use adaptive_request::orchestrator::{
    AuthRefresher, HeaderInterceptor, RequestOrchestrator, RequestState, RequestStatus,
};
use adaptive_request::transport::ScriptedTransport;
use adaptive_request::{Error, RequestDescriptor, Response, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use crate::fixtures::{fast_retry_config, good_signals, orchestrator, orchestrator_on};

#[tokio::test(start_paused = true)]
async fn test_good_network_scales_timeout_and_retry_budget() {
    let monitor = Arc::new(NetworkMonitor::new(NetworkMonitorConfig::default()));
    monitor.update(good_signals());
    assert_eq!(monitor.quality(), QualityTier::Good);

    let transport = Arc::new(ScriptedTransport::new().respond_with(|_| Err(Error::http(503, "down"))));
    let orch = orchestrator_on(transport.clone(), monitor);

    let err = orch
        .request(RequestDescriptor::get("https://api.test/flaky"))
        .await
        .unwrap_err();

    // good tier: base 10s x 1.5, three retries
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.retries(), 3);
    assert_eq!(transport.call_count(), 4);
    for call in transport.calls() {
        assert_eq!(call.timeout, Duration::from_secs(15));
    }
    assert_eq!(orch.metrics().retry_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_ask_on_good_network_calls_once_then_serves_cache() {
    let monitor = Arc::new(NetworkMonitor::new(NetworkMonitorConfig::default()));
    monitor.update(good_signals());
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_ok(json!({"answer": "hello"}));
    let orch = orchestrator_on(transport.clone(), monitor);

    let ask = || RequestDescriptor::post("https://api.test/api/ask", json!({"question": "hi"}));
    let key = CacheKeyGenerator::new().generate(&ask());
    assert!(!orch.cache().has(&key));

    let first = orch.request(ask()).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.body, json!({"answer": "hello"}));
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.calls()[0].timeout, Duration::from_secs(15));
    assert_eq!(orch.cache().get_value(&key), Some(json!({"answer": "hello"})));

    let second = orch.request(ask()).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.body, first.body);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_response_is_cached_and_replayed() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_ok(json!({"id": 7, "name": "Ada"}));
    let orch = orchestrator(transport.clone());

    let first = orch
        .request(RequestDescriptor::get("https://api.test/users/7"))
        .await
        .unwrap();
    assert!(!first.from_cache);

    let second = orch
        .request(RequestDescriptor::get("https://api.test/users/7"))
        .await
        .unwrap();
    assert!(second.from_cache);
    assert!(!second.stale);
    assert_eq!(second.body, first.body);
    assert_eq!(transport.call_count(), 1);

    let health = orch.health();
    assert_eq!(health.cache_metrics.hits, 1);
    assert_eq!(health.metrics.cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_identical_concurrent_requests_share_one_call() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_delay(Duration::from_millis(200))
            .respond_with(|req| Ok(Response::ok(json!({"url": req.url})))),
    );
    let orch = orchestrator(transport.clone());

    let (a, b, c) = tokio::join!(
        orch.request(RequestDescriptor::get("https://api.test/feed")),
        orch.request(RequestDescriptor::get("https://api.test/feed")),
        orch.request(RequestDescriptor::get("https://api.test/feed")),
    );

    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(transport.call_count(), 1);
    assert_eq!(a.body, json!({"url": "https://api.test/feed"}));
    assert_eq!(a.body, b.body);
    assert_eq!(b.body, c.body);
    assert!(orch.optimizer().inflight().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_strictly_increase() {
    let seen: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let transport = Arc::new(ScriptedTransport::new().respond_with(move |_| {
        recorder.lock().push(Instant::now());
        Err(Error::network("connection reset"))
    }));
    let orch = orchestrator(transport.clone());

    let err = orch
        .request(RequestDescriptor::get("https://api.test/unstable").max_retries(4))
        .await
        .unwrap_err();
    assert_eq!(err.retries(), 4);
    assert!(matches!(err, Error::Network { .. }));

    let times = seen.lock().clone();
    assert_eq!(times.len(), 5);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps.windows(2).all(|g| g[1] > g[0]), "gaps not increasing: {gaps:?}");
    assert_eq!(gaps[0], Duration::from_millis(100));
    assert_eq!(gaps[3], Duration::from_millis(800));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_hint_replaces_backoff() {
    let seen: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let transport = Arc::new(ScriptedTransport::new().respond_with(move |_| {
        recorder.lock().push(Instant::now());
        Ok(Response::ok(json!("ok")))
    }));
    transport.push_err(Error::Http {
        status: 429,
        message: "slow down".into(),
        retry_after: Some(Duration::from_secs(3)),
        context: Default::default(),
    });
    let orch = orchestrator(transport.clone());

    let start = Instant::now();
    let resp = orch
        .request(RequestDescriptor::get("https://api.test/limited").max_retries(1))
        .await
        .unwrap();
    assert_eq!(resp.body, json!("ok"));
    assert_eq!(seen.lock()[0] - start, Duration::from_secs(3));
}

#[tokio::test]
async fn test_per_request_retry_condition_wins() {
    let transport = Arc::new(ScriptedTransport::new().respond_with(|_| Err(Error::http(404, "missing"))));
    transport.push_err(Error::http(404, "missing"));
    let orch = orchestrator(transport.clone());

    let err = orch
        .request(
            RequestDescriptor::get("https://api.test/eventually")
                .max_retries(2)
                .retry_condition(|e, _| e.status() == Some(404)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.retries(), 2);
    assert_eq!(transport.call_count(), 3);
}

fn batching_orchestrator(transport: Arc<ScriptedTransport>, max_batch: usize) -> Arc<RequestOrchestrator> {
    RequestOrchestrator::builder()
        .transport(transport)
        .config(fast_retry_config())
        .optimizer_config(
            OptimizerConfig::new().with_batch(
                BatchConfig::new()
                    .enabled()
                    .with_max_batch_size(max_batch)
                    .with_max_wait(Duration::from_millis(50)),
            ),
        )
        .build()
        .unwrap()
}

fn batch_responder(req: &adaptive_request::transport::OutgoingRequest) -> Result<Response> {
    if req.url.ends_with("/batch") {
        let items = req
            .body
            .as_ref()
            .and_then(|b| b.get("requests"))
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        let replies: Vec<serde_json::Value> = items
            .iter()
            .map(|item| json!({"status": 200, "body": {"url": item["url"], "batched": true}}))
            .collect();
        Ok(Response::ok(json!(replies)))
    } else {
        Ok(Response::ok(json!({"url": req.url, "batched": false})))
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_goes_out_as_one_call() {
    let transport = Arc::new(ScriptedTransport::new().respond_with(batch_responder));
    let orch = batching_orchestrator(transport.clone(), 3);

    let req = |n: u32| RequestDescriptor::get(format!("https://api.test/users/{n}")).batch_key("users");
    let (a, b, c) = tokio::join!(orch.request(req(1)), orch.request(req(2)), orch.request(req(3)));

    assert_eq!(transport.call_count(), 1);
    let call = &transport.calls()[0];
    assert_eq!(call.url, "https://api.test/batch");
    assert_eq!(call.headers.get("x-batch-key").map(String::as_str), Some("users"));
    assert_eq!(a.unwrap().body["url"], json!("https://api.test/users/1"));
    assert_eq!(b.unwrap().body["url"], json!("https://api.test/users/2"));
    assert_eq!(c.unwrap().body["batched"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_overflowing_batch_adds_one_call() {
    let transport = Arc::new(ScriptedTransport::new().respond_with(batch_responder));
    let orch = batching_orchestrator(transport.clone(), 3);

    let req = |n: u32| RequestDescriptor::get(format!("https://api.test/items/{n}")).batch_key("items");
    let (a, b, c, d) = tokio::join!(
        orch.request(req(1)),
        orch.request(req(2)),
        orch.request(req(3)),
        orch.request(req(4)),
    );
    for r in [a, b, c] {
        assert_eq!(r.unwrap().body["batched"], json!(true));
    }
    // the leftover flushes alone on its timer and runs as a plain request
    let d = d.unwrap();
    assert_eq!(d.body, json!({"url": "https://api.test/items/4", "batched": false}));
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_request() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_delay(Duration::from_secs(5))
            .respond_with(|_| Ok(Response::ok(json!("late")))),
    );
    let orch = orchestrator(transport.clone());

    let errors = Arc::new(AtomicUsize::new(0));
    let seen = errors.clone();
    let desc = RequestDescriptor::get("https://api.test/slow")
        .id("req-cancel")
        .on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

    let task = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.request(desc).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(orch.status("req-cancel"), Some(RequestStatus::Running));

    assert!(orch.cancel("req-cancel"));
    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(orch.status("req-cancel"), Some(RequestStatus::Cancelled));
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(!orch.cancel("req-cancel"));
    assert_eq!(orch.metrics().cancelled_count, 1);
}

#[tokio::test]
async fn test_cancel_unknown_id_is_false() {
    let orch = orchestrator(Arc::new(ScriptedTransport::new()));
    assert!(!orch.cancel("nope"));
}

struct CountingRefresher {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl AuthRefresher for CountingRefresher {
    async fn refresh(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(Error::auth(401, "refresh token revoked"))
        } else {
            Ok(())
        }
    }
}

fn with_refresher(transport: Arc<ScriptedTransport>, refresher: Arc<CountingRefresher>) -> Arc<RequestOrchestrator> {
    RequestOrchestrator::builder()
        .transport(transport)
        .config(fast_retry_config())
        .auth_refresher(refresher)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_auth_refresh_replays_request_once() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_err(Error::auth(401, "expired"));
    transport.push_ok(json!({"me": "ada"}));
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let orch = with_refresher(transport.clone(), refresher.clone());

    let resp = orch
        .request(RequestDescriptor::get("https://api.test/me").max_retries(0))
        .await
        .unwrap();
    assert_eq!(resp.body, json!({"me": "ada"}));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_auth_refresh_happens_at_most_once() {
    let transport = Arc::new(ScriptedTransport::new().respond_with(|_| Err(Error::auth(401, "expired"))));
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let orch = with_refresher(transport.clone(), refresher.clone());

    let err = orch
        .request(RequestDescriptor::get("https://api.test/me"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_failed_refresh_surfaces_original_401() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_err(Error::auth(401, "expired"));
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let orch = with_refresher(transport.clone(), refresher.clone());

    let err = orch
        .request(RequestDescriptor::get("https://api.test/me"))
        .await
        .unwrap_err();
    assert!(err.is_auth());
    assert!(err.to_string().contains("expired"));
    assert_eq!(transport.call_count(), 1);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_beyond_cap_stay_queued_until_a_slot_frees() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_delay(Duration::from_secs(1))
            .respond_with(|req| Ok(Response::ok(json!({"url": req.url})))),
    );
    let orch = RequestOrchestrator::builder()
        .transport(transport.clone())
        .config(fast_retry_config().with_max_concurrent(1))
        .build()
        .unwrap();

    let spawn = |id: &'static str, path: &'static str| {
        let orch = orch.clone();
        tokio::spawn(async move {
            orch.request(RequestDescriptor::get(format!("https://api.test/{path}")).id(id))
                .await
        })
    };
    let first = spawn("first", "a");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = spawn("second", "b");
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(orch.status("first"), Some(RequestStatus::Running));
    assert_eq!(orch.status("second"), Some(RequestStatus::Pending));
    assert_eq!(
        orch.queue_item("second").map(|q| q.state),
        Some(RequestState::Queued { attempt: 0 })
    );
    assert_eq!(orch.scheduler().waiting(), 1);
    assert_eq!(transport.call_count(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orch.status("first"), Some(RequestStatus::Completed));
    assert_eq!(orch.status("second"), Some(RequestStatus::Running));
    assert_eq!(transport.call_count(), 2);

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(orch.scheduler().running(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_shared_call_leader_keeps_follower() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_delay(Duration::from_secs(5))
            .respond_with(|_| Ok(Response::ok(json!({"items": [1, 2, 3]})))),
    );
    let orch = orchestrator(transport.clone());

    let follower_errors = Arc::new(AtomicUsize::new(0));
    let seen = follower_errors.clone();
    let leader = {
        let orch = orch.clone();
        tokio::spawn(async move {
            orch.request(RequestDescriptor::get("https://api.test/feed").id("leader"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let follower = {
        let orch = orch.clone();
        let desc = RequestDescriptor::get("https://api.test/feed")
            .id("follower")
            .on_error(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        tokio::spawn(async move { orch.request(desc).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(orch.cancel("leader"));
    assert!(leader.await.unwrap().unwrap_err().is_aborted());

    let resp = follower.await.unwrap().unwrap();
    assert_eq!(resp.body, json!({"items": [1, 2, 3]}));
    assert_eq!(transport.call_count(), 1);
    assert_eq!(orch.status("leader"), Some(RequestStatus::Cancelled));
    assert_eq!(orch.status("follower"), Some(RequestStatus::Completed));
    assert_eq!(follower_errors.load(Ordering::SeqCst), 0);

    let metrics = orch.metrics();
    assert_eq!(metrics.error_count, 0);
    assert_eq!(metrics.cancelled_count, 1);
    assert_eq!(metrics.success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batched_call_carries_auth_header_and_transformed_bodies() {
    let transport = Arc::new(ScriptedTransport::new().respond_with(batch_responder));
    let orch = RequestOrchestrator::builder()
        .transport(transport.clone())
        .config(fast_retry_config())
        .interceptor(Arc::new(HeaderInterceptor::new().header("authorization", "Bearer s3cret")))
        .optimizer_config(
            OptimizerConfig::new().with_batch(
                BatchConfig::new()
                    .enabled()
                    .with_max_batch_size(2)
                    .with_max_wait(Duration::from_millis(50)),
            ),
        )
        .build()
        .unwrap();

    let event = |n: u32| {
        RequestDescriptor::post(format!("https://api.test/events/{n}"), json!({"n": n}))
            .batch_key("events")
            .transform_request(|mut body| {
                body["source"] = json!("web");
                body
            })
    };
    let (a, b) = tokio::join!(orch.request(event(1)), orch.request(event(2)));
    a.unwrap();
    b.unwrap();

    assert_eq!(transport.call_count(), 1);
    let call = &transport.calls()[0];
    assert_eq!(call.url, "https://api.test/batch");
    assert_eq!(call.headers.get("authorization").map(String::as_str), Some("Bearer s3cret"));
    let requests = call.body.as_ref().unwrap()["requests"].as_array().unwrap().clone();
    assert_eq!(requests[0]["body"], json!({"n": 1, "source": "web"}));
    assert_eq!(requests[1]["body"], json!({"n": 2, "source": "web"}));
}
