//! Tracker implementation.

use crate::builders::EventBuilder;
use crate::config::{Config, TrackerBuilder};
use crate::queue::EventQueue;
use crate::session;
use crate::storage::{self, KeyValueStore, MemoryStore};
use crate::transport::{HttpTransport, Uploader};
use crate::types::{Event, EventType, IdentifyData, Preference};
use crate::Error;
use chrono::{Local, Utc};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Observer invoked with a summary after every successful flush.
pub type FlushCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    Shutdown,
}

/// Everything guarded by the event queue gate.
struct State {
    lifecycle: Lifecycle,
    preference: Preference,
    queue: EventQueue,
}

struct Shared {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    uploader: Arc<dyn Uploader>,
    gate: Mutex<State>,
    flush_callback: RwLock<Option<FlushCallback>>,
}

/// Event tracker.
///
/// Events are queued in memory, mirrored to the configured store after
/// every change, and uploaded in one batch per flush interval. Queue and
/// preference changes, and uploads, are serialized through one FIFO-fair
/// gate, so at most one upload is in flight and a flush always sees a
/// consistent queue.
///
/// Producer calls never fail: storage and transport errors are logged and
/// the events stay queued for the next interval.
///
/// # Example
///
/// ```rust,no_run
/// use ecdmp::{EventType, Tracker};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), ecdmp::Error> {
///     let tracker = Tracker::builder().build()?;
///     tracker.init("com.example.app", "feed_123").await;
///
///     tracker
///         .event(EventType::PageView)
///         .data(json!({ "title": "Home" }))
///         .uri("app://home")
///         .send()
///         .await;
///
///     tracker.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Tracker {
    shared: Arc<Shared>,
    scheduler: std::sync::Mutex<Option<CancellationToken>>,
}

impl Tracker {
    /// Create a new builder.
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::new()
    }

    /// Get the tracker configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Snapshot of the current preference.
    pub async fn preference(&self) -> Preference {
        self.shared.gate.lock().await.preference.clone()
    }

    /// Get the number of pending events.
    pub async fn pending_event_count(&self) -> usize {
        self.shared.gate.lock().await.queue.len()
    }

    /// Register the observer called after each successful flush.
    pub fn set_flush_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        match self.shared.flush_callback.write() {
            Ok(mut guard) => *guard = Some(Arc::new(callback)),
            Err(_) => warn!("flush callback lock poisoned, callback not set"),
        }
    }

    // ============================================
    // LIFECYCLE
    // ============================================

    /// Load the stored preference and pending events and start the flush
    /// timer.
    ///
    /// Calling it again keeps the in-memory preference and queue, updates
    /// the bundle and feed IDs, and replaces the running timer.
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all)]
    pub async fn init(&self, bundle_id: impl Into<String>, feed_id: impl Into<String>) -> Preference {
        let shared = &self.shared;
        let mut state = shared.gate.lock().await;
        if state.lifecycle == Lifecycle::Shutdown {
            warn!("init called after shutdown, ignoring");
            return state.preference.clone();
        }

        // Only a cold start reads the store; memory is authoritative after.
        let mut preference = if state.lifecycle == Lifecycle::Ready {
            state.preference.clone()
        } else {
            let preference = shared.load_preference_or_default().await;
            let pending = shared.load_events_or_empty().await;
            state.queue.restore(pending);
            preference
        };
        preference.bundle_id = bundle_id.into();
        preference.feed_id = feed_id.into();
        session::refresh_session(&mut preference, Local::now(), shared.config.session_expire());
        session::ensure_visitor_id(&mut preference);
        shared.persist_preference(&preference).await;

        state.preference = preference;
        state.lifecycle = Lifecycle::Ready;

        info!(
            bundle_id = %state.preference.bundle_id,
            feed_id = %state.preference.feed_id,
            pending = state.queue.len(),
            "tracker initialized"
        );
        let snapshot = state.preference.clone();
        drop(state);

        self.start_flush_timer();
        snapshot
    }

    /// Flush all pending events immediately.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<(), Error> {
        let summary = {
            let mut state = self.shared.gate.lock().await;
            self.shared.flush_locked(&mut state).await?
        };
        self.shared.notify(summary);
        Ok(())
    }

    /// Stop the flush timer and make a final flush attempt.
    ///
    /// Later producer calls are dropped.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), Error> {
        let summary = {
            let mut state = self.shared.gate.lock().await;
            if state.lifecycle == Lifecycle::Shutdown {
                return Ok(());
            }
            state.lifecycle = Lifecycle::Shutdown;
            info!("shutting down tracker");

            self.stop_flush_timer();
            self.shared.flush_locked(&mut state).await?
        };
        self.shared.notify(summary);
        Ok(())
    }

    // ============================================
    // PRODUCERS
    // ============================================

    /// Track an event.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use ecdmp::Tracker;
    /// # async fn example(tracker: &Tracker) {
    /// tracker.event("addToCart")
    ///     .data(serde_json::json!({ "sku": "A-1" }))
    ///     .force_flush()
    ///     .send()
    ///     .await;
    /// # }
    /// ```
    pub fn event(&self, event_type: impl Into<EventType>) -> SendableEvent<'_> {
        SendableEvent {
            builder: EventBuilder::new(event_type),
            tracker: self,
        }
    }

    /// Attach a customer identity and emit an `identify` event.
    ///
    /// Returns `false` if the tracker is not initialized or already shut down.
    #[instrument(skip(self, email, phone, extra))]
    pub async fn identify(
        &self,
        customer_id: &str,
        email: &str,
        phone: &str,
        device_id: &str,
        extra: Option<Vec<String>>,
    ) -> bool {
        let shared = &self.shared;
        let summary = {
            let mut state = shared.gate.lock().await;
            if state.lifecycle != Lifecycle::Ready {
                warn!(lifecycle = ?state.lifecycle, "identify before init or after shutdown");
                return false;
            }

            state.preference.customer_id = customer_id.to_string();
            state.preference.device_id = device_id.to_string();
            shared.persist_preference(&state.preference).await;

            if state.preference.opt_out {
                debug!("opted out, identify event dropped");
                return true;
            }

            let data = IdentifyData {
                cid: customer_id.to_string(),
                em: email.to_string(),
                pn: phone.to_string(),
                did: device_id.to_string(),
                ext: extra,
            };
            let data = serde_json::to_value(data).unwrap_or_else(|e| {
                warn!(error = %e, "failed to serialize identify data");
                Value::Null
            });
            shared
                .append(&mut state, EventBuilder::new(EventType::Identify).data(data))
                .await
        };
        shared.notify(summary);
        true
    }

    /// Opt in or out of tracking.
    ///
    /// Opting out discards every pending event, in memory and in storage.
    #[instrument(skip(self))]
    pub async fn opt_out(&self, opt_out: bool) -> Preference {
        let shared = &self.shared;
        let mut state = shared.gate.lock().await;
        if state.lifecycle == Lifecycle::Uninitialized {
            state.preference = shared.load_preference_or_default().await;
        }

        state.preference.opt_out = opt_out;
        shared.persist_preference(&state.preference).await;
        if opt_out {
            shared.clear_locked(&mut state).await;
        }

        info!(opt_out, "tracking consent changed");
        state.preference.clone()
    }

    /// Wipe everything except bundle, feed and visitor IDs, and drop all
    /// pending events. The flush timer keeps running.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        let shared = &self.shared;
        let mut state = shared.gate.lock().await;
        if state.lifecycle == Lifecycle::Uninitialized {
            state.preference = shared.load_preference_or_default().await;
        }

        let preference = Preference {
            bundle_id: std::mem::take(&mut state.preference.bundle_id),
            feed_id: std::mem::take(&mut state.preference.feed_id),
            visitor_id: std::mem::take(&mut state.preference.visitor_id),
            ..Default::default()
        };
        state.preference = preference;
        shared.persist_preference(&state.preference).await;
        shared.clear_locked(&mut state).await;

        info!("tracker reset");
    }

    // ============================================
    // INTERNAL
    // ============================================

    async fn enqueue_and_maybe_flush(&self, builder: EventBuilder) {
        let shared = &self.shared;
        let summary = {
            let mut state = shared.gate.lock().await;
            match state.lifecycle {
                Lifecycle::Ready => {}
                Lifecycle::Uninitialized => {
                    warn!("tracker not initialized, event dropped");
                    return;
                }
                Lifecycle::Shutdown => {
                    warn!("tracker shut down, event dropped");
                    return;
                }
            }
            if state.preference.opt_out {
                debug!("opted out, event dropped");
                return;
            }
            shared.append(&mut state, builder).await
        };
        shared.notify(summary);
    }

    fn start_flush_timer(&self) {
        let token = CancellationToken::new();
        match self.scheduler.lock() {
            Ok(mut guard) => {
                if let Some(previous) = guard.replace(token.clone()) {
                    previous.cancel();
                }
            }
            Err(_) => {
                error!("scheduler lock poisoned, flush timer not started");
                return;
            }
        }

        let shared = Arc::clone(&self.shared);
        let period = shared.config.flush_interval();

        tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let mut state = shared.gate.lock().await;
                // Cancelled while waiting on the gate.
                if token.is_cancelled() {
                    break;
                }
                debug!(pending = state.queue.len(), "periodic flush");
                let summary = match shared.flush_locked(&mut state).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        error!(error = %e, "periodic flush failed, events kept for next interval");
                        None
                    }
                };
                drop(state);
                shared.notify(summary);
            }

            debug!("flush timer stopped");
        });
    }

    fn stop_flush_timer(&self) {
        if let Ok(mut guard) = self.scheduler.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop_flush_timer();
    }
}

impl Shared {
    /// Refresh the session, stamp and queue the event, and persist both
    /// blobs. Must be called with the gate held.
    async fn append(&self, state: &mut State, builder: EventBuilder) -> Option<String> {
        let now = Local::now();
        session::refresh_session(&mut state.preference, now, self.config.session_expire());
        self.persist_preference(&state.preference).await;

        let force_flush = builder.force_flush;
        let event = builder.build(&state.preference, now.with_timezone(&Utc));
        debug!(event_type = %event.event_type, "event queued");
        state.queue.push(event);
        if let Err(e) = storage::save_events(&*self.store, state.queue.events()).await {
            warn!(error = %e, "failed to persist events, kept in memory");
        }

        if !force_flush {
            return None;
        }
        match self.flush_locked(state).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "forced flush failed, events kept for next interval");
                None
            }
        }
    }

    /// Upload the whole queue as one batch and clear it on success.
    ///
    /// Returns the flush summary, or `None` if there was nothing to send.
    /// Must be called with the gate held.
    async fn flush_locked(&self, state: &mut State) -> Result<Option<String>, Error> {
        if state.preference.opt_out {
            debug!("opted out, no flush");
            return Ok(None);
        }
        if state.queue.is_empty() {
            debug!("no events to flush");
            return Ok(None);
        }

        let event_count = state.queue.len();
        info!(event_count, "flushing events");

        let status = self.uploader.post_events(state.queue.events()).await?;
        self.clear_locked(state).await;

        Ok(Some(format!("flushed {} events ({})", event_count, status)))
    }

    async fn clear_locked(&self, state: &mut State) {
        state.queue.clear();
        if let Err(e) = storage::clear_events(&*self.store).await {
            warn!(error = %e, "failed to clear persisted events");
        }
    }

    async fn persist_preference(&self, preference: &Preference) {
        if let Err(e) = storage::save_preference(&*self.store, preference).await {
            warn!(error = %e, "failed to persist preference");
        }
    }

    async fn load_preference_or_default(&self) -> Preference {
        storage::load_preference(&*self.store)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to load preference, using defaults");
                Preference::default()
            })
    }

    async fn load_events_or_empty(&self) -> Vec<Event> {
        storage::load_events(&*self.store).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to load pending events, starting empty");
            Vec::new()
        })
    }

    /// Called after the gate is released so the callback may use the tracker.
    fn notify(&self, summary: Option<String>) {
        let Some(summary) = summary else {
            return;
        };
        let callback = self
            .flush_callback
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(callback) = callback {
            callback(&summary);
        }
    }
}

impl TrackerBuilder {
    /// Build the tracker.
    ///
    /// The tracker drops events until [`Tracker::init`] is called.
    pub fn build(self) -> Result<Tracker, Error> {
        let config = self.build_config()?;
        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let uploader: Arc<dyn Uploader> = match self.uploader {
            Some(uploader) => uploader,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let max_queue_len = config.max_queue_len();

        Ok(Tracker {
            shared: Arc::new(Shared {
                config,
                store,
                uploader,
                gate: Mutex::new(State {
                    lifecycle: Lifecycle::Uninitialized,
                    preference: Preference::default(),
                    queue: EventQueue::new(max_queue_len),
                }),
                flush_callback: RwLock::new(None),
            }),
            scheduler: std::sync::Mutex::new(None),
        })
    }
}

// ============================================
// SENDABLE WRAPPERS
// ============================================

/// Sendable event builder.
pub struct SendableEvent<'a> {
    builder: EventBuilder,
    tracker: &'a Tracker,
}

impl<'a> SendableEvent<'a> {
    /// Set the event payload.
    pub fn data(mut self, data: impl Into<Value>) -> Self {
        self.builder = self.builder.data(data);
        self
    }

    /// Set the URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.builder = self.builder.uri(uri);
        self
    }

    /// Set the referer.
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.builder = self.builder.referer(referer);
        self
    }

    /// Set the UTM string.
    pub fn utm(mut self, utm: impl Into<String>) -> Self {
        self.builder = self.builder.utm(utm);
        self
    }

    /// Flush the queue right after this event is stored.
    pub fn force_flush(mut self) -> Self {
        self.builder = self.builder.force_flush();
        self
    }

    /// Queue the event.
    ///
    /// Completes once the event is queued and persisted (and, with
    /// [`force_flush`](Self::force_flush), once the flush attempt ends).
    pub async fn send(self) {
        self.tracker.enqueue_and_maybe_flush(self.builder).await
    }
}
