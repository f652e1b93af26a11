//! §6.2, §8 invariant 6 / C8: the closed event-variant set, filter
//! composition, and a thread-safe signal-slot dispatcher.
//!
//! Emission copies by value into each subscriber's callback; subscription
//! add/remove is serialized by an internal `parking_lot::Mutex`. Subscribers
//! run on the emitting thread and must not block it for long.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    PipelineStarted {
        timestamp: i64,
        total_nodes: usize,
        total_assets: usize,
        node_ids: Vec<String>,
    },
    PipelineCompleted {
        timestamp: i64,
        duration_ms: u64,
        nodes_succeeded: usize,
        nodes_failed: usize,
        nodes_skipped: usize,
    },
    PipelineFailed {
        timestamp: i64,
        elapsed_ms: u64,
        error_message: String,
    },
    PipelineCancelled {
        timestamp: i64,
        elapsed_ms: u64,
        nodes_completed: usize,
        nodes_total: usize,
    },
    NodeStarted {
        timestamp: i64,
        node_id: String,
        transform_name: String,
        node_index: usize,
        total_nodes: usize,
        asset_count: usize,
        is_cross_sectional: bool,
    },
    NodeCompleted {
        timestamp: i64,
        node_id: String,
        transform_name: String,
        duration_ms: u64,
        assets_processed: usize,
        assets_failed: usize,
    },
    NodeFailed {
        timestamp: i64,
        node_id: String,
        transform_name: String,
        error_message: String,
        asset_id: Option<String>,
    },
    NodeSkipped {
        timestamp: i64,
        node_id: String,
        transform_name: String,
        reason: String,
    },
    TransformProgress {
        timestamp: i64,
        node_id: String,
        transform_name: String,
        asset_id: Option<String>,
        current_step: Option<u64>,
        total_steps: Option<u64>,
        progress_percent: Option<f64>,
        message: String,
        loss: Option<f64>,
        accuracy: Option<f64>,
        learning_rate: Option<f64>,
        iteration: Option<u64>,
    },
    ProgressSummary {
        timestamp: i64,
        overall_progress_percent: f64,
        nodes_completed: usize,
        nodes_total: usize,
        currently_running: Vec<String>,
        estimated_remaining_ms: Option<u64>,
    },
}

/// A coarse category, used by the filter presets below.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    PipelineCancelled,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    TransformProgress,
    ProgressSummary,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PipelineStarted { .. } => EventKind::PipelineStarted,
            Event::PipelineCompleted { .. } => EventKind::PipelineCompleted,
            Event::PipelineFailed { .. } => EventKind::PipelineFailed,
            Event::PipelineCancelled { .. } => EventKind::PipelineCancelled,
            Event::NodeStarted { .. } => EventKind::NodeStarted,
            Event::NodeCompleted { .. } => EventKind::NodeCompleted,
            Event::NodeFailed { .. } => EventKind::NodeFailed,
            Event::NodeSkipped { .. } => EventKind::NodeSkipped,
            Event::TransformProgress { .. } => EventKind::TransformProgress,
            Event::ProgressSummary { .. } => EventKind::ProgressSummary,
        }
    }
}

const PIPELINE_KINDS: [EventKind; 4] = [
    EventKind::PipelineStarted,
    EventKind::PipelineCompleted,
    EventKind::PipelineFailed,
    EventKind::PipelineCancelled,
];
const NODE_KINDS: [EventKind; 4] = [
    EventKind::NodeStarted,
    EventKind::NodeCompleted,
    EventKind::NodeFailed,
    EventKind::NodeSkipped,
];
const PROGRESS_KINDS: [EventKind; 2] = [EventKind::TransformProgress, EventKind::ProgressSummary];

/// §6.2 filter preset set, composable with `|` (union: whitelist ∖
/// blacklist) and `&` (intersection).
#[derive(Clone, Debug, PartialEq)]
pub struct EventFilter {
    whitelist: Option<std::collections::HashSet<EventKind>>,
    blacklist: std::collections::HashSet<EventKind>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self {
            whitelist: None,
            blacklist: Default::default(),
        }
    }

    pub fn none() -> Self {
        Self {
            whitelist: Some(Default::default()),
            blacklist: Default::default(),
        }
    }

    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            whitelist: Some(kinds.into_iter().collect()),
            blacklist: Default::default(),
        }
    }

    pub fn except(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            whitelist: None,
            blacklist: kinds.into_iter().collect(),
        }
    }

    pub fn pipeline_only() -> Self {
        Self::only(PIPELINE_KINDS)
    }

    pub fn nodes_only() -> Self {
        Self::only(NODE_KINDS)
    }

    pub fn progress_only() -> Self {
        Self::only(PROGRESS_KINDS)
    }

    pub fn transform_progress_only() -> Self {
        Self::only([EventKind::TransformProgress])
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        let whitelisted = self.whitelist.as_ref().is_none_or(|w| w.contains(&kind));
        whitelisted && !self.blacklist.contains(&kind)
    }
}

impl std::ops::BitOr for EventFilter {
    type Output = EventFilter;

    /// Union: whitelist ∖ blacklist. `All | anything = All`. Two whitelists
    /// union their kind sets; a present blacklist only narrows when both
    /// sides carry one for the same kind (rebuilt as "not excluded by
    /// either and allowed by at least one").
    fn bitor(self, other: EventFilter) -> EventFilter {
        match (self.whitelist, other.whitelist) {
            (None, _) | (_, None) => EventFilter::all(),
            (Some(a), Some(b)) => EventFilter {
                whitelist: Some(a.union(&b).copied().collect()),
                blacklist: self.blacklist.intersection(&other.blacklist).copied().collect(),
            },
        }
    }
}

impl std::ops::BitAnd for EventFilter {
    type Output = EventFilter;

    fn bitand(self, other: EventFilter) -> EventFilter {
        let whitelist = match (self.whitelist, other.whitelist) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.intersection(&b).copied().collect()),
        };
        EventFilter {
            whitelist,
            blacklist: self.blacklist.union(&other.blacklist).copied().collect(),
        }
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: u64,
    filter: EventFilter,
    handler: Subscriber,
}

/// A connection handle returned by `on_event`; dropping it does not
/// unsubscribe (call `unsubscribe` explicitly, mirroring the source
/// system's boost::signals2 connection objects).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection(u64);

#[derive(Default)]
pub struct EventDispatcher {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_event(
        &self,
        filter: EventFilter,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Connection {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.subscriptions.lock().push(Subscription {
            id,
            filter,
            handler: Box::new(handler),
        });
        Connection(id)
    }

    pub fn unsubscribe(&self, connection: Connection) {
        self.subscriptions.lock().retain(|s| s.id != connection.0);
    }

    /// Subscribers run while the subscription lock is held, so handlers
    /// must not block or re-enter the dispatcher (e.g. by subscribing or
    /// emitting from within a callback).
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let guard = self.subscriptions.lock();
        for sub in guard.iter().filter(|s| s.filter.accepts(kind)) {
            (sub.handler)(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn started() -> Event {
        Event::PipelineStarted {
            timestamp: 0,
            total_nodes: 1,
            total_assets: 1,
            node_ids: vec!["a".into()],
        }
    }

    #[test]
    fn pipeline_only_union_nodes_only_accepts_exactly_the_union() {
        let filter = EventFilter::pipeline_only() | EventFilter::nodes_only();
        assert!(filter.accepts(EventKind::PipelineStarted));
        assert!(filter.accepts(EventKind::NodeStarted));
        assert!(!filter.accepts(EventKind::ProgressSummary));
    }

    #[test]
    fn all_and_only_s_accepts_exactly_s() {
        let filter = EventFilter::all() & EventFilter::only([EventKind::NodeFailed]);
        assert!(filter.accepts(EventKind::NodeFailed));
        assert!(!filter.accepts(EventKind::NodeCompleted));
    }

    #[test]
    fn only_s_union_none_is_only_s() {
        let only_s = EventFilter::only([EventKind::NodeFailed]);
        let filter = only_s.clone() | EventFilter::none();
        assert_eq!(filter, only_s);
    }

    #[test]
    fn only_s_intersect_none_is_none() {
        let filter = EventFilter::only([EventKind::NodeFailed]) & EventFilter::none();
        assert_eq!(filter, EventFilter::none());
    }

    #[test]
    fn emit_invokes_only_matching_subscribers() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        dispatcher.on_event(EventFilter::pipeline_only(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        dispatcher.on_event(EventFilter::nodes_only(), move |_| {
            c2.fetch_add(100, Ordering::SeqCst);
        });
        dispatcher.emit(started());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_further_emission() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let conn = dispatcher.on_event(EventFilter::all(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.emit(started());
        dispatcher.unsubscribe(conn);
        dispatcher.emit(started());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
