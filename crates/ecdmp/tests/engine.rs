//! Engine behavior tests against in-process store and uploader fakes.

use async_trait::async_trait;
use ecdmp::{Error, Event, KeyValueStore, MemoryStore, Tracker, Uploader, KEY_EVENTS};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Uploader that records every batch and can be switched to fail.
#[derive(Clone, Default)]
struct RecordingUploader {
    batches: Arc<Mutex<Vec<Vec<Event>>>>,
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl RecordingUploader {
    fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn post_events(&self, events: &[Event]) -> Result<u16, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(200)
    }
}

/// Store whose every call fails.
struct BrokenStore;

#[async_trait]
impl KeyValueStore for BrokenStore {
    async fn save(&self, _key: &str, _value: &str) -> Result<(), Error> {
        Err(Error::Storage("disk full".into()))
    }

    async fn load(&self, _key: &str) -> Result<String, Error> {
        Err(Error::Storage("disk unavailable".into()))
    }
}

fn tracker_with(store: &MemoryStore, uploader: &RecordingUploader, max_queue_len: usize) -> Tracker {
    Tracker::builder()
        .store(store.clone())
        .uploader(uploader.clone())
        .max_queue_len(max_queue_len)
        .flush_interval(Duration::from_secs(100)) // Don't auto-flush
        .build()
        .unwrap()
}

fn persisted_uris(store: &MemoryStore) -> Vec<String> {
    let blob = store.get(KEY_EVENTS).unwrap_or_default();
    if blob.is_empty() {
        return Vec::new();
    }
    let events: Vec<Event> = serde_json::from_str(&blob).unwrap();
    events.into_iter().map(|e| e.uri).collect()
}

#[tokio::test]
async fn test_event_before_init_is_dropped() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);

    tracker.event("pageView").uri("A").send().await;

    assert_eq!(tracker.pending_event_count().await, 0);
    assert!(store.get(KEY_EVENTS).is_none());
}

#[tokio::test]
async fn test_eviction_then_flush_scenario() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 2);
    tracker.init("bundle", "feed").await;

    for uri in ["A", "B", "C"] {
        tracker.event("pageView").uri(uri).send().await;
    }

    assert_eq!(tracker.pending_event_count().await, 2);
    assert_eq!(persisted_uris(&store), vec!["B", "C"]);

    tracker.flush().await.unwrap();

    let batches = uploader.batches();
    assert_eq!(batches.len(), 1);
    let sent: Vec<_> = batches[0].iter().map(|e| e.uri.as_str()).collect();
    assert_eq!(sent, vec!["B", "C"]);
    assert_eq!(tracker.pending_event_count().await, 0);
    assert_eq!(store.get(KEY_EVENTS).as_deref(), Some(""));
}

#[tokio::test]
async fn test_burst_keeps_most_recent_events() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;

    for i in 0..25 {
        tracker.event("pageView").uri(format!("e{}", i)).send().await;
    }

    let expected: Vec<String> = (15..25).map(|i| format!("e{}", i)).collect();
    assert_eq!(tracker.pending_event_count().await, 10);
    assert_eq!(persisted_uris(&store), expected);
}

#[tokio::test]
async fn test_failed_flush_leaves_queue_untouched() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;

    tracker.event("pageView").uri("A").send().await;
    tracker.event("pageView").uri("B").send().await;
    let before = store.get(KEY_EVENTS).unwrap();

    uploader.set_failing(true);
    assert!(tracker.flush().await.is_err());

    assert_eq!(store.get(KEY_EVENTS).unwrap(), before);
    assert_eq!(tracker.pending_event_count().await, 2);

    uploader.set_failing(false);
    tracker.flush().await.unwrap();

    let batches = uploader.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(serde_json::to_string(&batches[0]).unwrap(), before);
}

#[tokio::test]
async fn test_opt_out_drains_and_suppresses() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;

    tracker.event("pageView").uri("A").send().await;
    tracker.event("pageView").uri("B").send().await;

    let pref = tracker.opt_out(true).await;
    assert!(pref.opt_out);
    assert_eq!(tracker.pending_event_count().await, 0);
    assert_eq!(store.get(KEY_EVENTS).as_deref(), Some(""));

    tracker.event("pageView").uri("C").send().await;
    assert_eq!(tracker.pending_event_count().await, 0);

    tracker.flush().await.unwrap();
    assert_eq!(uploader.calls(), 0);

    let pref = tracker.opt_out(false).await;
    assert!(!pref.opt_out);
    tracker.event("pageView").uri("D").send().await;
    assert_eq!(tracker.pending_event_count().await, 1);
    assert_eq!(persisted_uris(&store), vec!["D"]);
}

#[tokio::test]
async fn test_opt_out_survives_restart() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();

    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;
    tracker.opt_out(true).await;
    drop(tracker);

    let tracker = tracker_with(&store, &uploader, 10);
    let pref = tracker.init("bundle", "feed").await;
    assert!(pref.opt_out);

    tracker.event("pageView").send().await;
    assert_eq!(tracker.pending_event_count().await, 0);
}

#[tokio::test]
async fn test_visitor_id_stable_across_init() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);

    let first = tracker.init("bundle", "feed").await;
    let second = tracker.init("bundle", "feed").await;
    assert!(!first.visitor_id.is_empty());
    assert_eq!(first.visitor_id, second.visitor_id);

    let restarted = tracker_with(&store, &uploader, 10);
    let third = restarted.init("bundle", "feed").await;
    assert_eq!(first.visitor_id, third.visitor_id);
}

#[tokio::test]
async fn test_events_carry_identity_and_session() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    let pref = tracker.init("com.example.app", "feed_1").await;

    tracker
        .event("viewContent")
        .data(json!({"sku": "A-1"}))
        .uri("app://item")
        .referer("app://list")
        .utm("utm_source=push")
        .send()
        .await;
    tracker.event("pageView").send().await;
    tracker.flush().await.unwrap();

    let batch = &uploader.batches()[0];
    assert_eq!(batch.len(), 2);
    let first = &batch[0];
    assert_eq!(first.bundle_id, "com.example.app");
    assert_eq!(first.feed_id, "feed_1");
    assert_eq!(first.visitor_id, pref.visitor_id);
    assert_eq!(first.session_id, pref.session_id);
    assert_eq!(first.event_type, "viewContent");
    assert_eq!(first.event_data["sku"], "A-1");
    assert_eq!(first.referer, "app://list");
    assert_eq!(first.utm, "utm_source=push");
    assert!(first.timestamp.ends_with('Z'));
    assert_eq!(batch[1].session_id, first.session_id);
}

#[tokio::test]
async fn test_identify_updates_preference_and_queues_event() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;

    let ok = tracker
        .identify(
            "cust_1",
            "user@example.com",
            "+886900000000",
            "device_1",
            Some(vec!["vip".into()]),
        )
        .await;
    assert!(ok);

    let pref = tracker.preference().await;
    assert_eq!(pref.customer_id, "cust_1");
    assert_eq!(pref.device_id, "device_1");

    tracker.flush().await.unwrap();
    let event = &uploader.batches()[0][0];
    assert_eq!(event.event_type, "identify");
    assert_eq!(event.customer_id, "cust_1");
    assert_eq!(event.device_id, "device_1");
    assert_eq!(event.event_data["em"], "user@example.com");
    assert_eq!(event.event_data["pn"], "+886900000000");
    assert_eq!(event.event_data["ext"], json!(["vip"]));
}

#[tokio::test]
async fn test_identify_before_init_returns_false() {
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&MemoryStore::new(), &uploader, 10);

    assert!(!tracker.identify("c", "e", "p", "d", None).await);
}

#[tokio::test]
async fn test_reset_preserves_identity_only() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    let initial = tracker.init("bundle", "feed").await;

    tracker.identify("cust_1", "e", "p", "device_1", None).await;
    tracker.event("pageView").send().await;

    tracker.reset().await;

    let pref = tracker.preference().await;
    assert_eq!(pref.visitor_id, initial.visitor_id);
    assert_eq!(pref.bundle_id, "bundle");
    assert_eq!(pref.feed_id, "feed");
    assert!(pref.customer_id.is_empty());
    assert!(pref.device_id.is_empty());
    assert!(pref.session_id.is_empty());
    assert_eq!(pref.last_event_timestamp, 0);
    assert_eq!(tracker.pending_event_count().await, 0);
    assert_eq!(store.get(KEY_EVENTS).as_deref(), Some(""));

    // Still accepting events after reset
    tracker.event("pageView").send().await;
    assert_eq!(tracker.pending_event_count().await, 1);
    assert!(!tracker.preference().await.session_id.is_empty());
}

#[tokio::test]
async fn test_force_flush_and_callback() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;

    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = summaries.clone();
    tracker.set_flush_callback(move |summary| sink.lock().unwrap().push(summary.to_string()));

    tracker.event("pageView").send().await;
    tracker.event("purchase").force_flush().send().await;

    assert_eq!(uploader.batches()[0].len(), 2);
    assert_eq!(tracker.pending_event_count().await, 0);
    assert_eq!(
        summaries.lock().unwrap().as_slice(),
        ["flushed 2 events (200)".to_string()]
    );
}

#[tokio::test]
async fn test_force_flush_failure_keeps_event() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    uploader.set_failing(true);
    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;

    tracker.event("purchase").force_flush().send().await;

    assert_eq!(uploader.calls(), 1);
    assert_eq!(tracker.pending_event_count().await, 1);
    assert_eq!(persisted_uris(&store).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_and_flushes() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = Arc::new(tracker_with(&store, &uploader, 1000));
    tracker.init("bundle", "feed").await;

    let mut handles = vec![];
    for producer in 0..8 {
        let t = tracker.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                t.event("pageView")
                    .uri(format!("p{}-{}", producer, i))
                    .send()
                    .await;
            }
        }));
    }

    let flusher = {
        let t = tracker.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                t.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for handle in handles {
        handle.await.unwrap();
    }
    flusher.await.unwrap();
    tracker.flush().await.unwrap();

    let sent: Vec<String> = uploader
        .batches()
        .into_iter()
        .flatten()
        .map(|e| e.uri)
        .collect();
    let unique: HashSet<_> = sent.iter().collect();
    assert_eq!(sent.len(), 400);
    assert_eq!(unique.len(), 400);

    // Per-producer order survives batching
    for producer in 0..8 {
        let prefix = format!("p{}-", producer);
        let order: Vec<usize> = sent
            .iter()
            .filter_map(|uri| uri.strip_prefix(&prefix))
            .map(|i| i.parse().unwrap())
            .collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_scheduled_flush_uploads_queue() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = Tracker::builder()
        .store(store.clone())
        .uploader(uploader.clone())
        .flush_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    tracker.init("bundle", "feed").await;

    tracker.event("pageView").send().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(uploader.batches().len(), 1);
    assert_eq!(tracker.pending_event_count().await, 0);
}

#[tokio::test]
async fn test_reinit_replaces_flush_timer() {
    let uploader = RecordingUploader::default();
    uploader.set_failing(true);
    let tracker = Tracker::builder()
        .uploader(uploader.clone())
        .flush_interval(Duration::from_millis(100))
        .build()
        .unwrap();

    tracker.init("bundle", "feed").await;
    tracker.init("bundle", "feed").await;
    tracker.init("bundle", "feed").await;
    tracker.event("pageView").send().await;

    tokio::time::sleep(Duration::from_millis(250)).await;

    // One timer retries the same batch every interval; three would triple it
    let calls = uploader.calls();
    assert!((1..=3).contains(&calls), "unexpected upload attempts: {}", calls);
    assert_eq!(tracker.pending_event_count().await, 1);
}

#[tokio::test]
async fn test_pending_events_restored_after_restart() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();

    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;
    tracker.event("pageView").uri("A").send().await;
    tracker.event("pageView").uri("B").send().await;
    drop(tracker);

    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;
    assert_eq!(tracker.pending_event_count().await, 2);

    tracker.event("pageView").uri("C").send().await;
    assert_eq!(persisted_uris(&store), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_shutdown_flushes_and_drops_later_events() {
    let store = MemoryStore::new();
    let uploader = RecordingUploader::default();
    let tracker = tracker_with(&store, &uploader, 10);
    tracker.init("bundle", "feed").await;

    tracker.event("pageView").send().await;
    assert_eq!(uploader.calls(), 0);

    tracker.shutdown().await.unwrap();
    assert_eq!(uploader.batches().len(), 1);

    tracker.event("pageView").send().await;
    assert_eq!(tracker.pending_event_count().await, 0);
    assert!(!tracker.identify("c", "e", "p", "d", None).await);

    // Second shutdown is a no-op
    tracker.shutdown().await.unwrap();
    assert_eq!(uploader.calls(), 1);
}

#[tokio::test]
async fn test_broken_store_never_fails_producers() {
    let uploader = RecordingUploader::default();
    let tracker = Tracker::builder()
        .store(BrokenStore)
        .uploader(uploader.clone())
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    let pref = tracker.init("bundle", "feed").await;
    assert!(!pref.visitor_id.is_empty());

    tracker.event("pageView").send().await;
    assert_eq!(tracker.pending_event_count().await, 1);

    tracker.flush().await.unwrap();
    assert_eq!(uploader.batches().len(), 1);
    assert_eq!(tracker.pending_event_count().await, 0);
}

#[tokio::test]
async fn test_reinit_keeps_memory_state_when_store_fails() {
    let uploader = RecordingUploader::default();
    let tracker = Tracker::builder()
        .store(BrokenStore)
        .uploader(uploader.clone())
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    let first = tracker.init("bundle", "feed").await;
    tracker.event("pageView").uri("A").send().await;
    tracker.event("pageView").uri("B").send().await;

    let second = tracker.init("bundle", "feed_2").await;
    assert_eq!(second.visitor_id, first.visitor_id);
    assert_eq!(second.feed_id, "feed_2");
    assert_eq!(tracker.pending_event_count().await, 2);

    tracker.flush().await.unwrap();
    let batches = uploader.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test]
async fn test_no_uploads_after_shutdown() {
    let uploader = RecordingUploader::default();
    uploader.set_failing(true);
    let tracker = Tracker::builder()
        .uploader(uploader.clone())
        .flush_interval(Duration::from_millis(30))
        .build()
        .unwrap();
    tracker.init("bundle", "feed").await;
    tracker.event("pageView").send().await;

    // Final flush fails, so the event is still queued afterwards
    assert!(tracker.shutdown().await.is_err());
    let calls = uploader.calls();
    assert_eq!(tracker.pending_event_count().await, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(uploader.calls(), calls);
}
