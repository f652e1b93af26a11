//! §4.4 / C6: per-transform execution strategies. Each kernel is a pure
//! function over `(transform, storage, dispatcher)`; the orchestrator wires
//! the right one into each graph node based on `Kernel::select`.

pub mod asset_ref;
pub mod cross_sectional;
pub mod default_kernel;

use crate::events::dispatcher::EventDispatcher;
use crate::storage::IntermediateStorage;
use crate::transform::TransformBase;
use std::sync::Arc;

/// Per-node execution accounting the orchestrator surfaces as
/// `NodeCompleted { assets_processed, assets_failed }`.
#[derive(Default, Debug, Clone)]
pub struct KernelOutcome {
    pub assets_processed: usize,
    pub assets_failed: usize,
    /// Set when the whole node was skipped (e.g. `intraday_only` on a daily
    /// timeframe) rather than executed, so the orchestrator emits
    /// `NodeSkipped` instead of `NodeCompleted`.
    pub skip_reason: Option<String>,
}

pub(crate) fn log_transform_error(
    dispatcher: &Arc<EventDispatcher>,
    transform_id: &str,
    asset: &str,
    error: &crate::error::EngineError,
) -> String {
    let message = format!("Asset: {asset}, Transform: {transform_id}, Error: {error}");
    tracing::warn!(transform_id, asset, %error, "transform execution failed");
    let _ = dispatcher;
    message
}

pub fn run(
    kernel: crate::transform::Kernel,
    t: &dyn TransformBase,
    storage: &IntermediateStorage,
    dispatcher: &Arc<EventDispatcher>,
    errors: &parking_lot::Mutex<Vec<String>>,
) -> KernelOutcome {
    match kernel {
        crate::transform::Kernel::Default => default_kernel::run(t, storage, dispatcher, errors),
        crate::transform::Kernel::CrossSectional => {
            cross_sectional::run(t, storage, dispatcher, errors)
        }
        crate::transform::Kernel::AssetRefPassthrough => {
            asset_ref::run_passthrough(t, storage, dispatcher, errors)
        }
        crate::transform::Kernel::IsAssetRef => {
            asset_ref::run_is_asset_ref(t, storage, dispatcher, errors)
        }
    }
}
