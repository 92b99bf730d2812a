//! Agent communication hub: in-process pub/sub scoped by investigation.
//!
//! The hub carries telemetry and progress information only — never
//! authoritative state — so delivery is at-most-once and best-effort.
//! Each subscriber owns a bounded FIFO queue drained by its own task;
//! on overflow the oldest undelivered event is dropped and counted.
//! The hub holds no durable state and is safely discarded on restart.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use ice_state::{AgentStatus, Domain, FailureKind, InvestigationId, InvestigationStatus};

use crate::config::HubConfig;
use crate::metrics::METRICS;

/// Classification of a hub event, used both on the wire and as a
/// subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKindTag {
    AgentStarted,
    AgentProgress,
    AgentCompleted,
    AgentFailed,
    StateTransition,
}

/// Typed body of a hub event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IceEventKind {
    AgentStarted {
        domain: Domain,
    },
    AgentProgress {
        domain: Domain,
        step: String,
    },
    AgentCompleted {
        domain: Domain,
        status: AgentStatus,
    },
    AgentFailed {
        domain: Domain,
        failure: FailureKind,
        attempt: u32,
    },
    StateTransition {
        from: InvestigationStatus,
        to: InvestigationStatus,
    },
}

impl IceEventKind {
    pub fn tag(&self) -> EventKindTag {
        match self {
            IceEventKind::AgentStarted { .. } => EventKindTag::AgentStarted,
            IceEventKind::AgentProgress { .. } => EventKindTag::AgentProgress,
            IceEventKind::AgentCompleted { .. } => EventKindTag::AgentCompleted,
            IceEventKind::AgentFailed { .. } => EventKindTag::AgentFailed,
            IceEventKind::StateTransition { .. } => EventKindTag::StateTransition,
        }
    }
}

/// One event-bus message.
///
/// Ephemeral; related to investigation state only by correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceEvent {
    pub event_id: Uuid,
    pub investigation_id: InvestigationId,
    /// Publishing domain, absent for lifecycle events.
    pub source: Option<Domain>,
    pub kind: IceEventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl IceEvent {
    pub fn new(
        investigation_id: InvestigationId,
        source: Option<Domain>,
        kind: IceEventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            investigation_id,
            source,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Receives hub events. Errors are isolated per delivery: logged, the
/// delivery skipped, and no other subscriber affected.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &IceEvent) -> anyhow::Result<()>;
}

/// Opaque handle returned by [`AgentHub::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    investigation_id: InvestigationId,
    subscriber_id: Uuid,
}

struct Subscriber {
    id: Uuid,
    filter: Option<BTreeSet<EventKindTag>>,
    handler: Arc<dyn EventHandler>,
    queue: Mutex<VecDeque<IceEvent>>,
    notify: Notify,
    closed: AtomicBool,
    overflow: AtomicU64,
}

impl Subscriber {
    fn wants(&self, tag: EventKindTag) -> bool {
        self.filter.as_ref().map(|f| f.contains(&tag)).unwrap_or(true)
    }
}

/// In-memory pub/sub hub, scoped by investigation id so events never leak
/// across investigations.
pub struct AgentHub {
    config: HubConfig,
    subscribers: Mutex<HashMap<String, Vec<Arc<Subscriber>>>>,
    dropped_total: AtomicU64,
}

impl AgentHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            subscribers: Mutex::new(HashMap::new()),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Register a handler for one investigation's events.
    ///
    /// `kinds = None` subscribes to every event type. A drainer task is
    /// spawned per subscription; it delivers events in publish order.
    pub fn subscribe(
        &self,
        investigation_id: &InvestigationId,
        kinds: Option<BTreeSet<EventKindTag>>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4(),
            filter: kinds,
            handler,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            overflow: AtomicU64::new(0),
        });

        let handle = SubscriptionHandle {
            investigation_id: investigation_id.clone(),
            subscriber_id: subscriber.id,
        };

        self.subscribers
            .lock()
            .unwrap()
            .entry(investigation_id.0.clone())
            .or_default()
            .push(Arc::clone(&subscriber));

        tokio::spawn(drain_loop(subscriber));
        handle
    }

    /// Remove a subscription. The drainer finishes delivering whatever is
    /// already queued, then exits.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut map = self.subscribers.lock().unwrap();
        if let Some(list) = map.get_mut(&handle.investigation_id.0) {
            if let Some(pos) = list.iter().position(|s| s.id == handle.subscriber_id) {
                let sub = list.remove(pos);
                sub.closed.store(true, Ordering::SeqCst);
                sub.notify.notify_one();
            }
            if list.is_empty() {
                map.remove(&handle.investigation_id.0);
            }
        }
    }

    /// Enqueue an event for every matching subscriber of its investigation.
    ///
    /// Never blocks the publisher: a full subscriber queue drops its oldest
    /// undelivered event and increments the overflow counters.
    pub fn publish(&self, event: &IceEvent) {
        let tag = event.kind.tag();
        let map = self.subscribers.lock().unwrap();
        if let Some(list) = map.get(&event.investigation_id.0) {
            for sub in list {
                if sub.closed.load(Ordering::SeqCst) || !sub.wants(tag) {
                    continue;
                }
                {
                    let mut queue = sub.queue.lock().unwrap();
                    if queue.len() >= self.config.queue_capacity {
                        queue.pop_front();
                        sub.overflow.fetch_add(1, Ordering::Relaxed);
                        self.dropped_total.fetch_add(1, Ordering::Relaxed);
                        METRICS.inc_events_dropped();
                    }
                    queue.push_back(event.clone());
                }
                sub.notify.notify_one();
            }
        }
        METRICS.inc_events_published();
    }

    /// How many events a subscriber lost to overflow, if it still exists.
    pub fn overflow_count(&self, handle: &SubscriptionHandle) -> Option<u64> {
        let map = self.subscribers.lock().unwrap();
        map.get(&handle.investigation_id.0)?
            .iter()
            .find(|s| s.id == handle.subscriber_id)
            .map(|s| s.overflow.load(Ordering::Relaxed))
    }

    /// Total events dropped across all subscribers since construction.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Number of live subscribers for an investigation.
    pub fn subscriber_count(&self, investigation_id: &InvestigationId) -> usize {
        let map = self.subscribers.lock().unwrap();
        map.get(&investigation_id.0).map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for AgentHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Per-subscriber delivery loop: FIFO in publish order, one event at a time.
async fn drain_loop(sub: Arc<Subscriber>) {
    loop {
        let next = sub.queue.lock().unwrap().pop_front();
        match next {
            Some(event) => {
                if let Err(err) = sub.handler.handle(&event).await {
                    warn!(
                        subscriber = %sub.id,
                        event_id = %event.event_id,
                        error = %err,
                        "event handler failed; delivery skipped"
                    );
                }
            }
            None => {
                if sub.closed.load(Ordering::SeqCst) {
                    break;
                }
                sub.notify.notified().await;
            }
        }
    }
}
