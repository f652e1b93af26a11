//! §4.5 / C7: builds a DAG from `TransformManager::build_transforms()`,
//! schedules nodes concurrently as their dependencies complete, merges
//! reports, and emits the structured event stream.

use crate::error::{EngineResult, ExecutionError};
use crate::events::cancellation::CancellationToken;
use crate::events::dispatcher::{Connection, Event, EventDispatcher, EventFilter};
use crate::events::progress::ProgressSummaryThread;
use crate::frame::Frame;
use crate::kernels::{self, KernelOutcome};
use crate::manager::TransformManager;
use crate::report::{assign_card_groups_and_sizes, Dashboard, EventMarker};
use crate::storage::IntermediateStorage;
use crate::transform::{Kernel, TransformBase};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

pub type BaseData = HashMap<String, HashMap<String, Frame>>;

/// One compiled graph node: its transform, selected kernel, and the
/// dependency edges the construction pass resolved from its `NodeRef` inputs.
struct GraphNode {
    transform: Arc<dyn TransformBase>,
    kernel: Kernel,
    dependencies: Vec<usize>,
    done: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

/// §4.5: owns the storage, event dispatcher, and cancellation token for one
/// compiled pipeline, and drives `execute_pipeline`.
pub struct Orchestrator {
    storage: Arc<IntermediateStorage>,
    dispatcher: Arc<EventDispatcher>,
    cancellation: CancellationToken,
    nodes: Vec<GraphNode>,
    summary_interval: Mutex<Duration>,
    summary_enabled: AtomicBool,
}

impl Orchestrator {
    /// §4.5 Construction: builds transforms in topological order, verifies
    /// ids are unique (the manager already has, but duplicates across a
    /// second `build` call are re-checked here), resolves each `NodeRef`
    /// input to its producing node, selects a kernel, and registers every
    /// transform with storage.
    pub fn new(manager: TransformManager) -> EngineResult<Self> {
        Self::with_collaborators(
            manager,
            Arc::new(IntermediateStorage::new()),
            EventDispatcher::new(),
            CancellationToken::new(),
        )
    }

    pub fn with_collaborators(
        manager: TransformManager,
        storage: Arc<IntermediateStorage>,
        dispatcher: Arc<EventDispatcher>,
        cancellation: CancellationToken,
    ) -> EngineResult<Self> {
        let transforms = manager.build_transforms()?;

        let index_of: HashMap<String, usize> = transforms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id().to_string(), i))
            .collect();
        if index_of.len() != transforms.len() {
            let ids: Vec<String> = transforms.iter().map(|t| t.id().to_string()).collect();
            return Err(crate::error::ConfigError::DuplicateId(ids.join(", ")).into());
        }

        let mut nodes = Vec::with_capacity(transforms.len());
        for t in &transforms {
            let mut dependencies = Vec::new();
            for dep in t.configuration().node_dependencies() {
                let Some(&idx) = index_of.get(&dep.node_id) else {
                    return Err(crate::error::ConfigError::MissingHandle {
                        transform_id: t.id().to_string(),
                        handle: dep.column_id(),
                    }
                    .into());
                };
                dependencies.push(idx);
            }
            let kernel = Kernel::select(&t.configuration().metadata.id, t.configuration().is_cross_sectional());
            nodes.push(GraphNode {
                transform: t.clone(),
                kernel,
                dependencies,
                done: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            });
        }

        for node in &nodes {
            storage.register_transform(node.transform.as_ref());
        }

        Ok(Self {
            storage,
            dispatcher,
            cancellation,
            nodes,
            summary_interval: Mutex::new(ProgressSummaryThread::DEFAULT_INTERVAL),
            summary_enabled: AtomicBool::new(false),
        })
    }

    pub fn on_event(
        &self,
        filter: EventFilter,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Connection {
        self.dispatcher.on_event(filter, handler)
    }

    pub fn event_dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn reset_cancellation(&self) {
        self.cancellation.reset();
    }

    pub fn set_progress_summary_interval(&self, interval: Duration) {
        *self.summary_interval.lock() = interval;
    }

    pub fn set_progress_summary_enabled(&self, enabled: bool) {
        self.summary_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn get_generated_reports(&self) -> HashMap<String, Dashboard> {
        let mut reports = self.storage.reports();
        for dashboard in reports.values_mut() {
            assign_card_groups_and_sizes(dashboard);
        }
        reports
    }

    pub fn get_generated_event_markers(&self) -> HashMap<String, Vec<EventMarker>> {
        self.storage.event_markers()
    }

    /// §4.5 Execution: `ExecutePipeline(base_data) -> frames`.
    #[tracing::instrument(skip_all)]
    pub async fn execute_pipeline(
        &self,
        base_data: BaseData,
    ) -> EngineResult<HashMap<String, HashMap<String, Frame>>> {
        let allowed_assets: HashSet<String> = base_data
            .values()
            .flat_map(|by_asset| by_asset.keys().cloned())
            .collect();
        self.storage.initialize_base_data(base_data, &allowed_assets)?;

        for node in &self.nodes {
            node.done.store(false, Ordering::SeqCst);
        }

        let start = Instant::now();
        let node_ids: Vec<String> = self.nodes.iter().map(|n| n.transform.id().to_string()).collect();
        self.dispatcher.emit(Event::PipelineStarted {
            timestamp: now_ns(),
            total_nodes: self.nodes.len(),
            total_assets: allowed_assets.len(),
            node_ids,
        });

        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let running: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let summary = if self.summary_enabled.load(Ordering::Relaxed) {
            Some(self.start_summary_thread(completed.clone(), failed.clone(), skipped.clone(), running.clone()))
        } else {
            None
        };

        let mut handles = Vec::with_capacity(self.nodes.len());
        for idx in 0..self.nodes.len() {
            let transform = self.nodes[idx].transform.clone();
            let kernel = self.nodes[idx].kernel;
            let dependencies: Vec<(Arc<AtomicBool>, Arc<Notify>)> = self.nodes[idx]
                .dependencies
                .iter()
                .map(|&d| (self.nodes[d].done.clone(), self.nodes[d].notify.clone()))
                .collect();
            let done = self.nodes[idx].done.clone();
            let notify = self.nodes[idx].notify.clone();
            let storage = self.storage.clone();
            let dispatcher = self.dispatcher.clone();
            let cancellation = self.cancellation.clone();
            let errors = errors.clone();
            let completed = completed.clone();
            let skipped = skipped.clone();
            let failed = failed.clone();
            let running = running.clone();
            let total_nodes = self.nodes.len();
            let asset_count = allowed_assets.len();
            let is_cross_sectional = transform.configuration().is_cross_sectional();

            handles.push(tokio::spawn(async move {
                for (dep_done, dep_notify) in &dependencies {
                    if !dep_done.load(Ordering::SeqCst) {
                        let notified = dep_notify.notified();
                        if !dep_done.load(Ordering::SeqCst) {
                            notified.await;
                        }
                    }
                }

                if cancellation.is_cancelled() {
                    done.store(true, Ordering::SeqCst);
                    notify.notify_waiters();
                    return;
                }

                let node_id = transform.id().to_string();
                let transform_name = transform.configuration().metadata.name.clone();
                running.lock().insert(node_id.clone());
                dispatcher.emit(Event::NodeStarted {
                    timestamp: now_ns(),
                    node_id: node_id.clone(),
                    transform_name: transform_name.clone(),
                    node_index: idx,
                    total_nodes,
                    asset_count,
                    is_cross_sectional,
                });

                let node_start = Instant::now();
                let run_storage = storage.clone();
                let run_dispatcher = dispatcher.clone();
                let run_errors = errors.clone();
                let run_transform = transform.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    kernels::run(kernel, run_transform.as_ref(), &run_storage, &run_dispatcher, &run_errors)
                })
                .await;

                match outcome {
                    Ok(KernelOutcome {
                        assets_processed,
                        assets_failed,
                        skip_reason: Some(reason),
                    }) => {
                        let _ = assets_processed;
                        let _ = assets_failed;
                        skipped.fetch_add(1, Ordering::SeqCst);
                        dispatcher.emit(Event::NodeSkipped {
                            timestamp: now_ns(),
                            node_id: node_id.clone(),
                            transform_name: transform_name.clone(),
                            reason,
                        });
                    }
                    Ok(KernelOutcome {
                        assets_processed,
                        assets_failed,
                        skip_reason: None,
                    }) => {
                        completed.fetch_add(1, Ordering::SeqCst);
                        dispatcher.emit(Event::NodeCompleted {
                            timestamp: now_ns(),
                            node_id: node_id.clone(),
                            transform_name: transform_name.clone(),
                            duration_ms: node_start.elapsed().as_millis() as u64,
                            assets_processed,
                            assets_failed,
                        });
                    }
                    Err(join_err) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        let message = format!("node '{node_id}' panicked: {join_err}");
                        errors.lock().push(message.clone());
                        dispatcher.emit(Event::NodeFailed {
                            timestamp: now_ns(),
                            node_id: node_id.clone(),
                            transform_name: transform_name.clone(),
                            error_message: message,
                            asset_id: None,
                        });
                    }
                }

                running.lock().remove(&node_id);
                done.store(true, Ordering::SeqCst);
                notify.notify_waiters();
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        if let Some(summary) = summary {
            summary.stop();
        }

        if self.cancellation.is_cancelled() {
            self.dispatcher.emit(Event::PipelineCancelled {
                timestamp: now_ns(),
                elapsed_ms: start.elapsed().as_millis() as u64,
                nodes_completed: completed.load(Ordering::SeqCst),
                nodes_total: self.nodes.len(),
            });
            return Err(ExecutionError::Cancelled.into());
        }

        let collected_errors = errors.lock().clone();
        if !collected_errors.is_empty() {
            self.dispatcher.emit(Event::PipelineFailed {
                timestamp: now_ns(),
                elapsed_ms: start.elapsed().as_millis() as u64,
                error_message: collected_errors.join("\n"),
            });
            return Err(ExecutionError::PipelineFailed {
                messages: collected_errors,
            }
            .into());
        }

        self.dispatcher.emit(Event::PipelineCompleted {
            timestamp: now_ns(),
            duration_ms: start.elapsed().as_millis() as u64,
            nodes_succeeded: completed.load(Ordering::SeqCst),
            nodes_failed: failed.load(Ordering::SeqCst),
            nodes_skipped: skipped.load(Ordering::SeqCst),
        });

        self.storage.build_final_output()
    }

    fn start_summary_thread(
        &self,
        completed: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
        skipped: Arc<AtomicUsize>,
        running: Arc<Mutex<HashSet<String>>>,
    ) -> ProgressSummaryThread {
        let interval = *self.summary_interval.lock();
        let dispatcher = self.dispatcher.clone();
        let nodes_total = self.nodes.len();
        ProgressSummaryThread::start(dispatcher, interval, move || {
            let done = completed.load(Ordering::Relaxed) + failed.load(Ordering::Relaxed) + skipped.load(Ordering::Relaxed);
            let percent = if nodes_total == 0 {
                100.0
            } else {
                100.0 * done as f64 / nodes_total as f64
            };
            Event::ProgressSummary {
                timestamp: now_ns(),
                overall_progress_percent: percent,
                nodes_completed: done,
                nodes_total,
                currently_running: running.lock().iter().cloned().collect(),
                estimated_remaining_ms: None,
            }
        })
    }
}

fn now_ns() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
