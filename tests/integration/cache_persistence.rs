//! Cache persistence through FileStorage and file-based configuration

use std::sync::Arc;
use std::time::Duration;

use adaptive_request::cache::{CacheConfig, CacheManager, EvictionStrategy, FileStorage};
use adaptive_request::clock::ManualClock;
use adaptive_request::ClientConfig;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn persistent(path: &std::path::Path, clock: Arc<ManualClock>) -> CacheManager {
    CacheManager::with_clock(
        CacheConfig::new()
            .with_default_ttl(Duration::from_secs(60))
            .with_persistence(path),
        clock,
    )
}

#[test]
fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let clock = Arc::new(ManualClock::new(1_000_000));

    let cache = persistent(&path, clock.clone());
    cache.set("GET:/profile", json!({"name": "Ada"}), None, None);
    cache.set("GET:/feed", json!([1, 2, 3]), Some(Duration::from_secs(600)), None);
    assert_ok!(cache.flush());
    assert!(path.exists());
    drop(cache);

    let restored = persistent(&path, clock.clone());
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.get_value("GET:/profile"), Some(json!({"name": "Ada"})));
    assert_eq!(restored.get_value("GET:/feed"), Some(json!([1, 2, 3])));
}

#[test]
fn test_expired_entries_are_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let clock = Arc::new(ManualClock::new(1_000_000));

    let cache = persistent(&path, clock.clone());
    cache.set("short", json!(1), Some(Duration::from_secs(5)), None);
    cache.set("long", json!(2), Some(Duration::from_secs(500)), None);
    assert_ok!(cache.flush());

    clock.advance(Duration::from_secs(10));
    let restored = persistent(&path, clock);
    assert!(!restored.has("short"));
    assert!(restored.has("long"));
}

#[test]
fn test_sweep_rewrites_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.json");
    let clock = Arc::new(ManualClock::new(1_000_000));

    let cache = persistent(&path, clock.clone());
    cache.set("a", json!("a"), Some(Duration::from_secs(1)), None);
    cache.set("b", json!("b"), None, None);
    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.sweep(), 1);

    let blob: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let keys: Vec<&String> = blob.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["b"]);
    assert_eq!(cache.metrics().cleanup_count, 1);
}

#[test]
fn test_corrupt_blob_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    std::fs::write(&path, "{not json").unwrap();

    let storage = Arc::new(FileStorage::new(&path));
    let cache = CacheManager::new(CacheConfig::new()).with_storage(storage);
    assert!(cache.is_empty());
    assert!(!path.exists());

    // still usable afterwards
    cache.set("k", json!(true), None, None);
    assert_eq!(cache.get_value("k"), Some(json!(true)));
}

#[test]
fn test_capacity_is_enforced_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let clock = Arc::new(ManualClock::new(1_000_000));

    let cache = persistent(&path, clock.clone());
    for i in 0..10 {
        cache.set(format!("k{i}"), json!(i), None, None);
        clock.advance(Duration::from_millis(10));
    }
    assert_ok!(cache.flush());

    let smaller = CacheManager::with_clock(
        CacheConfig::new()
            .with_max_items(5)
            .with_strategy(EvictionStrategy::Fifo)
            .with_persistence(&path),
        clock,
    );
    assert!(smaller.len() <= 5);
    assert!(smaller.has("k9"));
    assert!(!smaller.has("k0"));
}

#[test]
fn test_client_config_from_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.yaml");
    std::fs::write(
        &path,
        r#"
base_url: https://api.example.com
orchestrator:
  base_timeout_ms: 4000
  max_concurrent: 2
cache:
  max_items: 50
  strategy: lfu
rate_limit:
  max_requests: 10
  window_ms: 1000
"#,
    )
    .unwrap();

    let config = assert_ok!(ClientConfig::from_path(&path));
    assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
    assert_eq!(config.orchestrator.base_timeout, Duration::from_secs(4));
    assert_eq!(config.orchestrator.max_concurrent, 2);
    assert_eq!(config.cache.max_items, 50);
    assert_eq!(config.cache.strategy, EvictionStrategy::Lfu);
    let limit = config.rate_limit.unwrap();
    assert_eq!(limit.max_requests, 10);
}

#[test]
fn test_client_config_rejects_unknown_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.json");
    std::fs::write(&path, r#"{"cache": {"max_item": 5}}"#).unwrap();
    assert_err!(ClientConfig::from_path(&path));
}
