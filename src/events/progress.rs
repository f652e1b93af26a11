//! §5 Progress emission: a per-(node, optional asset) emitter, and the
//! optional periodic summary thread.

use crate::error::EngineResult;
use crate::events::cancellation::CancellationToken;
use crate::events::dispatcher::{Event, EventDispatcher};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// RAII guard setting the current asset context on an emitter for the
/// duration of a per-asset unit of work; restores the previous value on
/// drop so nested/resumed contexts behave correctly.
pub struct AssetContextGuard<'a> {
    emitter: &'a TransformProgressEmitter,
    previous: Option<String>,
}

impl Drop for AssetContextGuard<'_> {
    fn drop(&mut self) {
        *self.emitter.asset_id.lock() = self.previous.take();
    }
}

pub struct TransformProgressEmitter {
    dispatcher: Arc<EventDispatcher>,
    cancellation: CancellationToken,
    node_id: String,
    transform_name: String,
    asset_id: Mutex<Option<String>>,
}

impl TransformProgressEmitter {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        cancellation: CancellationToken,
        node_id: impl Into<String>,
        transform_name: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            cancellation,
            node_id: node_id.into(),
            transform_name: transform_name.into(),
            asset_id: Mutex::new(None),
        }
    }

    pub fn with_asset(&self, asset_id: impl Into<String>) -> AssetContextGuard<'_> {
        let previous = self.asset_id.lock().replace(asset_id.into());
        AssetContextGuard {
            emitter: self,
            previous,
        }
    }

    fn emit(&self, mut build: impl FnMut(i64, Option<String>) -> Event) {
        let timestamp = now_ns();
        let asset_id = self.asset_id.lock().clone();
        self.dispatcher.emit(build(timestamp, asset_id));
    }

    /// `pct = 100 * cur / total`, guarding against `total == 0`.
    pub fn emit_progress(&self, current: u64, total: u64, message: impl Into<String>) {
        let message = message.into();
        let percent = if total == 0 {
            0.0
        } else {
            100.0 * current as f64 / total as f64
        };
        self.emit(move |timestamp, asset_id| Event::TransformProgress {
            timestamp,
            node_id: self.node_id.clone(),
            transform_name: self.transform_name.clone(),
            asset_id,
            current_step: Some(current),
            total_steps: Some(total),
            progress_percent: Some(percent),
            message: message.clone(),
            loss: None,
            accuracy: None,
            learning_rate: None,
            iteration: None,
        });
    }

    pub fn emit_epoch(
        &self,
        epoch: u64,
        total_epochs: u64,
        loss: Option<f64>,
        accuracy: Option<f64>,
        learning_rate: Option<f64>,
    ) {
        let message = format!("epoch {epoch}/{total_epochs}");
        let percent = if total_epochs == 0 {
            0.0
        } else {
            100.0 * epoch as f64 / total_epochs as f64
        };
        self.emit(move |timestamp, asset_id| Event::TransformProgress {
            timestamp,
            node_id: self.node_id.clone(),
            transform_name: self.transform_name.clone(),
            asset_id,
            current_step: Some(epoch),
            total_steps: Some(total_epochs),
            progress_percent: Some(percent),
            message: message.clone(),
            loss,
            accuracy,
            learning_rate,
            iteration: None,
        });
    }

    pub fn emit_iteration(&self, iteration: u64, metric: Option<f64>, message: Option<String>) {
        let message = message.unwrap_or_else(|| format!("iteration {iteration}"));
        self.emit(move |timestamp, asset_id| Event::TransformProgress {
            timestamp,
            node_id: self.node_id.clone(),
            transform_name: self.transform_name.clone(),
            asset_id,
            current_step: None,
            total_steps: None,
            progress_percent: None,
            message: message.clone(),
            loss: None,
            accuracy: None,
            learning_rate: None,
            iteration: Some(iteration),
        });
    }

    pub fn emit_progress_or_cancel(
        &self,
        current: u64,
        total: u64,
        message: impl Into<String>,
    ) -> EngineResult<()> {
        self.cancellation.throw_if_cancelled("emit_progress_or_cancel")?;
        self.emit_progress(current, total, message);
        Ok(())
    }

    pub fn emit_epoch_or_cancel(
        &self,
        epoch: u64,
        total_epochs: u64,
        loss: Option<f64>,
        accuracy: Option<f64>,
        learning_rate: Option<f64>,
    ) -> EngineResult<()> {
        self.cancellation.throw_if_cancelled("emit_epoch_or_cancel")?;
        self.emit_epoch(epoch, total_epochs, loss, accuracy, learning_rate);
        Ok(())
    }

    pub fn emit_iteration_or_cancel(
        &self,
        iteration: u64,
        metric: Option<f64>,
        message: Option<String>,
    ) -> EngineResult<()> {
        self.cancellation.throw_if_cancelled("emit_iteration_or_cancel")?;
        self.emit_iteration(iteration, metric, message);
        Ok(())
    }
}

fn now_ns() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// §5 periodic summary thread. Runs at `interval` until `stop()` is
/// called; joinable on shutdown. Gated by `enabled`, which the orchestrator
/// toggles via `SetProgressSummaryEnabled`.
pub struct ProgressSummaryThread {
    stop_flag: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ProgressSummaryThread {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

    pub fn start(
        dispatcher: Arc<EventDispatcher>,
        interval: Duration,
        summary: impl Fn() -> Event + Send + 'static,
    ) -> Self {
        let stop_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let thread_stop = stop_flag.clone();
        let handle = std::thread::spawn(move || {
            while !thread_stop.load(std::sync::atomic::Ordering::Relaxed) {
                std::thread::sleep(interval);
                if thread_stop.load(std::sync::atomic::Ordering::Relaxed) {
                    break;
                }
                dispatcher.emit(summary());
            }
        });
        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop_flag.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::dispatcher::EventFilter;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn emit_progress_guards_zero_total() {
        let dispatcher = EventDispatcher::new();
        let percent = Arc::new(Mutex::new(None));
        let p = percent.clone();
        dispatcher.on_event(EventFilter::transform_progress_only(), move |e| {
            if let Event::TransformProgress { progress_percent, .. } = e {
                *p.lock() = *progress_percent;
            }
        });
        let emitter =
            TransformProgressEmitter::new(dispatcher, CancellationToken::new(), "n1", "sma");
        emitter.emit_progress(0, 0, "start");
        assert_eq!(*percent.lock(), Some(0.0));
    }

    #[test]
    fn progress_or_cancel_fails_once_tripped() {
        let dispatcher = EventDispatcher::new();
        let token = CancellationToken::new();
        token.cancel();
        let emitter = TransformProgressEmitter::new(dispatcher, token, "n1", "sma");
        assert!(emitter.emit_progress_or_cancel(1, 10, "x").is_err());
    }

    #[test]
    fn asset_context_guard_restores_previous_on_drop() {
        let dispatcher = EventDispatcher::new();
        let emitter =
            TransformProgressEmitter::new(dispatcher, CancellationToken::new(), "n1", "sma");
        {
            let _outer = emitter.with_asset("AAPL");
            assert_eq!(emitter.asset_id.lock().as_deref(), Some("AAPL"));
            {
                let _inner = emitter.with_asset("MSFT");
                assert_eq!(emitter.asset_id.lock().as_deref(), Some("MSFT"));
            }
            assert_eq!(emitter.asset_id.lock().as_deref(), Some("AAPL"));
        }
        assert_eq!(emitter.asset_id.lock().as_deref(), None);
    }

    #[test]
    fn summary_thread_emits_and_stops_cleanly() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        dispatcher.on_event(EventFilter::progress_only(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let thread = ProgressSummaryThread::start(dispatcher, Duration::from_millis(5), || {
            Event::ProgressSummary {
                timestamp: 0,
                overall_progress_percent: 50.0,
                nodes_completed: 1,
                nodes_total: 2,
                currently_running: vec![],
                estimated_remaining_ms: None,
            }
        });
        std::thread::sleep(Duration::from_millis(30));
        thread.stop();
        assert!(count.load(Ordering::SeqCst) > 0);
    }
}
