//! Typed publish/subscribe bus connecting the runtime modules.
//!
//! Two delivery modes exist:
//!
//! - **Synchronous handlers** (`subscribe`) run on the publishing thread in
//!   publication order. Fast sinks only: state machine, tracker, GUI.
//! - **Queued subscriptions** (`queue`) hand each event to an unbounded
//!   per-subscriber FIFO; the owning adapter drains it from its own worker
//!   task. Slow, I/O-bound consumers use this mode so they never block the
//!   publisher.
//!
//! Audio frames bypass the bus entirely: frame consumers register a bounded
//! channel via [`EventBus::add_frame_consumer`] and receive frames through
//! [`EventBus::publish_frame`] with `try_send` (a full consumer drops the
//! frame rather than stalling capture).

pub mod events;

pub use events::{
    AsrOutcome, AudioFrame, DispatchRequest, Event, EventKind, EventPayload, SessionAction,
    SessionNotice, SpeakRequest, SpeechBlob, StateTransition, WakewordHit,
};

use crate::error::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A synchronous event handler. Errors are logged by the bus and never
/// abort delivery to the remaining handlers.
pub type SyncHandler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Handle returned by `subscribe`/`queue`, usable with `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct SyncSubscriber {
    id: SubscriptionId,
    label: String,
    handler: SyncHandler,
}

struct QueuedSubscriber {
    id: SubscriptionId,
    label: String,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct Registry {
    sync: HashMap<EventKind, Vec<SyncSubscriber>>,
    queued: HashMap<EventKind, Vec<QueuedSubscriber>>,
    frame_consumers: Vec<mpsc::Sender<AudioFrame>>,
}

/// Bus delivery counters, exposed through `statistics()`.
#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dropped_after_shutdown: AtomicU64,
    handler_errors: AtomicU64,
    frames: AtomicU64,
    frames_dropped: AtomicU64,
}

/// The event bus. Cheap to clone via `Arc`.
pub struct EventBus {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    counters: Counters,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a synchronous handler for one event kind.
    ///
    /// The handler runs on the publishing thread, in publication order
    /// relative to other events of its kinds.
    pub fn subscribe(&self, kind: EventKind, label: &str, handler: SyncHandler) -> SubscriptionId {
        let id = self.allocate_id();
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.sync.entry(kind).or_default().push(SyncSubscriber {
            id,
            label: label.to_owned(),
            handler,
        });
        id
    }

    /// Register a queued subscription over several kinds; the returned
    /// receiver is the subscriber's FIFO, drained by its own worker task.
    pub fn queue(
        &self,
        kinds: &[EventKind],
        label: &str,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let id = self.allocate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        for kind in kinds {
            registry.queued.entry(*kind).or_default().push(QueuedSubscriber {
                id,
                label: label.to_owned(),
                tx: tx.clone(),
            });
        }
        (id, rx)
    }

    /// Remove a subscription created by `subscribe` or `queue`.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        for subs in registry.sync.values_mut() {
            subs.retain(|s| s.id != id);
        }
        for subs in registry.queued.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    /// Register a bounded frame consumer for the direct audio path.
    pub fn add_frame_consumer(&self, tx: mpsc::Sender<AudioFrame>) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.frame_consumers.push(tx);
    }

    /// Publish an event to all subscribers of its kind.
    ///
    /// After `shutdown()` the event is silently dropped.
    pub fn publish(&self, event: Event) {
        if self.shut_down.load(Ordering::Acquire) {
            self.counters
                .dropped_after_shutdown
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        // Collect targets under the lock, dispatch outside it so a slow
        // handler cannot hold up subscription changes.
        let (sync_targets, queued_targets) = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            let sync_targets: Vec<(String, SyncHandler)> = registry
                .sync
                .get(&event.kind)
                .map(|subs| {
                    subs.iter()
                        .map(|s| (s.label.clone(), Arc::clone(&s.handler)))
                        .collect()
                })
                .unwrap_or_default();
            let queued_targets: Vec<(String, mpsc::UnboundedSender<Event>)> = registry
                .queued
                .get(&event.kind)
                .map(|subs| {
                    subs.iter()
                        .map(|s| (s.label.clone(), s.tx.clone()))
                        .collect()
                })
                .unwrap_or_default();
            (sync_targets, queued_targets)
        };

        for (label, handler) in sync_targets {
            if let Err(e) = handler(&event) {
                self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subscriber = %label,
                    kind = event.kind.as_str(),
                    "event handler failed: {e}"
                );
            }
        }
        for (label, tx) in queued_targets {
            if tx.send(event.clone()).is_err() {
                debug!(
                    subscriber = %label,
                    kind = event.kind.as_str(),
                    "queued subscriber gone, dropping event"
                );
            }
        }
    }

    /// Deliver an audio frame to all frame consumers.
    ///
    /// Uses `try_send`: a consumer with a full queue misses the frame and
    /// the drop is counted, keeping the capture loop real-time.
    pub fn publish_frame(&self, frame: AudioFrame) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        let consumers = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.frame_consumers.clone()
        };
        for tx in consumers {
            if tx.try_send(frame.clone()).is_err() {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stop accepting publications. Subsequent `publish` calls drop silently.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    /// Delivery counters.
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "published": self.counters.published.load(Ordering::Relaxed),
            "dropped_after_shutdown": self.counters.dropped_after_shutdown.load(Ordering::Relaxed),
            "handler_errors": self.counters.handler_errors.load(Ordering::Relaxed),
            "frames": self.counters.frames.load(Ordering::Relaxed),
            "frames_dropped": self.counters.frames_dropped.load(Ordering::Relaxed),
        })
    }
}
