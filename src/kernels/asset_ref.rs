//! §4.4.3-4.4.4: asset-ref passthrough and its boolean "is-asset-ref" sibling.

use super::{log_transform_error, KernelOutcome};
use crate::events::dispatcher::EventDispatcher;
use crate::frame::Frame;
use crate::storage::IntermediateStorage;
use crate::transform::TransformBase;
use parking_lot::Mutex;
use std::sync::Arc;

fn ticker_filter(t: &dyn TransformBase) -> String {
    t.configuration()
        .option("ticker")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_uppercase()
}

/// §4.4.3: passes the input frame through unchanged for the matching asset
/// (empty filter = wildcard, matches every asset); produces no output for
/// every other asset.
pub fn run_passthrough(
    t: &dyn TransformBase,
    storage: &IntermediateStorage,
    dispatcher: &Arc<EventDispatcher>,
    errors: &Mutex<Vec<String>>,
) -> KernelOutcome {
    let ticker = ticker_filter(t);
    let assets = storage.assets();
    let mut processed = 0;
    let mut failed = 0;

    for asset in &assets {
        let matches = ticker.is_empty() || asset.to_uppercase() == ticker;
        if !matches {
            continue;
        }
        if !storage.validate_inputs_available(asset, t) {
            continue;
        }
        match storage.gather_inputs(asset, t) {
            Ok(frame) => match storage.store_transform_output(asset, t, &frame) {
                Ok(()) => processed += 1,
                Err(e) => {
                    failed += 1;
                    errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                }
            },
            Err(e) => {
                failed += 1;
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
            }
        }
    }

    KernelOutcome {
        assets_processed: processed,
        assets_failed: failed,
        skip_reason: None,
    }
}

/// §4.4.4: like passthrough, but emits a boolean series for every asset
/// (`true` for the matching ticker(s), `false` otherwise) used as a
/// downstream gating switch.
pub fn run_is_asset_ref(
    t: &dyn TransformBase,
    storage: &IntermediateStorage,
    dispatcher: &Arc<EventDispatcher>,
    errors: &Mutex<Vec<String>>,
) -> KernelOutcome {
    let ticker = ticker_filter(t);
    let assets = storage.assets();
    let out_id = t
        .output_metadata()
        .first()
        .map(|m| m.id.as_str())
        .unwrap_or("result");

    let mut processed = 0;
    let mut failed = 0;
    for asset in &assets {
        let matches = ticker.is_empty() || asset.to_uppercase() == ticker;
        let gathered = match storage.gather_inputs(asset, t) {
            Ok(f) => f,
            Err(e) => {
                failed += 1;
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                continue;
            }
        };
        let index = match gathered.index() {
            Ok(s) => s.clone(),
            Err(e) => {
                failed += 1;
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                continue;
            }
        };
        let frame = match Frame::broadcast_bool(out_id, matches, &index) {
            Ok(f) => f,
            Err(e) => {
                failed += 1;
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                continue;
            }
        };
        match storage.store_transform_output(asset, t, &frame) {
            Ok(()) => processed += 1,
            Err(e) => {
                failed += 1;
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
            }
        }
    }

    KernelOutcome {
        assets_processed: processed,
        assets_failed: failed,
        skip_reason: None,
    }
}
