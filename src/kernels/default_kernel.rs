//! §4.4.1: the default per-asset kernel. Fans out over every known asset
//! with `rayon`, the way the teacher's `bot::transformer` bridges blocking
//! per-item polars work into the async orchestrator.

use super::{log_transform_error, KernelOutcome};
use crate::events::dispatcher::EventDispatcher;
use crate::frame::Frame;
use crate::metadata::TransformCategory;
use crate::storage::IntermediateStorage;
use crate::timeframe::SessionRange;
use crate::transform::TransformBase;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;

pub fn run(
    t: &dyn TransformBase,
    storage: &IntermediateStorage,
    dispatcher: &Arc<EventDispatcher>,
    errors: &Mutex<Vec<String>>,
) -> KernelOutcome {
    if t.timeframe().canonical().is_empty() {
        tracing::warn!(transform_id = t.id(), "transform has no timeframe; skipping");
    }

    let metadata = &t.configuration().metadata;
    if metadata.intraday_only && !t.timeframe().is_intraday() {
        for asset in storage.assets() {
            let _ = store_empty(t, storage, &asset);
        }
        return KernelOutcome {
            skip_reason: Some(format!(
                "intraday_only on non-intraday timeframe '{}'",
                t.timeframe().canonical()
            )),
            ..Default::default()
        };
    }

    let assets = storage.assets();
    let outcomes: Vec<bool> = assets
        .par_iter()
        .map(|asset| run_one(t, storage, dispatcher, errors, asset, metadata))
        .collect();

    let assets_processed = outcomes.iter().filter(|ok| **ok).count();
    KernelOutcome {
        assets_processed,
        assets_failed: outcomes.len() - assets_processed,
        skip_reason: None,
    }
}

fn run_one(
    t: &dyn TransformBase,
    storage: &IntermediateStorage,
    dispatcher: &Arc<EventDispatcher>,
    errors: &Mutex<Vec<String>>,
    asset: &str,
    metadata: &crate::metadata::TransformsMetaData,
) -> bool {
    if !storage.validate_inputs_available(asset, t) {
        let _ = store_empty(t, storage, asset);
        return false;
    }

    let gathered = match storage.gather_inputs(asset, t) {
        Ok(f) => f,
        Err(e) => {
            errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
            return false;
        }
    };

    let frame = if metadata.allow_null_inputs {
        gathered
    } else {
        match gathered.drop_null() {
            Ok(f) => f,
            Err(e) => {
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                return false;
            }
        }
    };

    let frame = match t.configuration().session {
        Some(session) => match slice_by_session(&frame, session) {
            Ok(f) => f,
            Err(e) => {
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                return false;
            }
        },
        None => frame,
    };

    if frame.is_empty() {
        let _ = store_empty(t, storage, asset);
        return true;
    }

    let result = match t.transform_data(frame) {
        Ok(r) => r,
        Err(e) => {
            errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
            return false;
        }
    };

    if metadata.category == Some(TransformCategory::Reporter) {
        if let Some(dashboard) = t.get_dashboard(&result) {
            if !dashboard.is_empty() {
                storage.store_report(asset, dashboard);
            }
        }
    }
    if metadata.category == Some(TransformCategory::EventMarker) {
        if let Some(marker) = t.get_event_markers(&result) {
            storage.store_event_marker(asset, marker);
        }
    }

    if let Err(e) = storage.store_transform_output(asset, t, &result) {
        errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
        return false;
    }

    true
}

fn store_empty(t: &dyn TransformBase, storage: &IntermediateStorage, asset: &str) -> crate::error::EngineResult<()> {
    let outputs: Vec<(String, crate::metadata::IoDataType)> = t
        .output_metadata()
        .iter()
        .map(|io| (io.id.clone(), io.r#type))
        .collect();
    let empty = Frame::empty_with_schema(&outputs)?;
    storage.store_transform_output(asset, t, &empty)
}

fn slice_by_session(frame: &Frame, session: SessionRange) -> crate::error::EngineResult<Frame> {
    use chrono::TimeZone;

    let ns = frame.index_ns()?;
    let mask: Vec<bool> = ns
        .iter()
        .map(|&ts| {
            let dt = chrono::Utc.timestamp_nanos(ts).with_timezone(&session.tz);
            session.contains_time(dt.time())
        })
        .collect();
    frame.filter_mask(&mask)
}
