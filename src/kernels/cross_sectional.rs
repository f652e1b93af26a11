//! §4.4.2: the cross-sectional kernel. Builds one wide frame across assets,
//! calls `transform_data` once, then distributes (or broadcasts) the result.

use super::{log_transform_error, KernelOutcome};
use crate::events::dispatcher::EventDispatcher;
use crate::frame::Frame;
use crate::metadata::TransformCategory;
use crate::report::GROUP_KEY;
use crate::storage::IntermediateStorage;
use crate::transform::TransformBase;
use parking_lot::Mutex;
use std::sync::Arc;

pub fn run(
    t: &dyn TransformBase,
    storage: &IntermediateStorage,
    dispatcher: &Arc<EventDispatcher>,
    errors: &Mutex<Vec<String>>,
) -> KernelOutcome {
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
    let mut per_asset_columns = Vec::with_capacity(assets.len());
    for asset in &assets {
        if !storage.validate_inputs_available(asset, t) {
            continue;
        }
        let gathered = match storage.gather_inputs(asset, t) {
            Ok(f) => f,
            Err(e) => {
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                continue;
            }
        };
        let dropped = match gathered.drop_null() {
            Ok(f) => f,
            Err(e) => {
                errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e));
                continue;
            }
        };
        let Some(input_column) = t.input_ids().into_iter().next() else {
            continue;
        };
        match dropped.rename(&input_column, asset) {
            Ok(renamed) => per_asset_columns.push(renamed),
            Err(e) => errors.lock().push(log_transform_error(dispatcher, t.id(), asset, &e)),
        }
    }

    let wide = match Frame::outer_join_concat(&per_asset_columns) {
        Ok(f) => f,
        Err(e) => {
            errors.lock().push(log_transform_error(dispatcher, t.id(), "ALL", &e));
            return KernelOutcome::default();
        }
    };
    let wide = match wide.drop_null() {
        Ok(f) => f,
        Err(_) => wide,
    };

    if wide.is_empty() {
        for asset in &assets {
            let _ = store_empty(t, storage, asset);
        }
        return KernelOutcome::default();
    }

    let result = match t.transform_data(wide) {
        Ok(r) => r,
        Err(e) => {
            errors.lock().push(log_transform_error(dispatcher, t.id(), "ALL", &e));
            return KernelOutcome::default();
        }
    };

    if metadata.category == Some(TransformCategory::Reporter) {
        if let Some(dashboard) = t.get_dashboard(&result) {
            storage.store_report(GROUP_KEY, dashboard);
        }
        return KernelOutcome {
            assets_processed: assets.len(),
            assets_failed: 0,
            skip_reason: None,
        };
    }

    distribute(t, storage, &result, &assets);
    KernelOutcome {
        assets_processed: assets.len(),
        assets_failed: 0,
        skip_reason: None,
    }
}

/// §4.4.2 step 5: if `result` has exactly one column matching the declared
/// output, broadcast it to every asset unchanged; otherwise each asset's
/// column (matched by asset id) is extracted and renamed to the output id.
fn distribute(t: &dyn TransformBase, storage: &IntermediateStorage, result: &Frame, assets: &[String]) {
    let out_id = t
        .output_metadata()
        .first()
        .map(|m| m.id.as_str())
        .unwrap_or("result");
    let non_index_columns: Vec<String> = result
        .column_names()
        .into_iter()
        .filter(|c| c != crate::frame::INDEX_COL)
        .collect();

    let single_column_broadcast = non_index_columns.len() == 1 && non_index_columns[0] == out_id;

    for asset in assets {
        if single_column_broadcast {
            let _ = storage.store_transform_output(asset, t, result);
            continue;
        }
        if result.contains(asset) {
            match result.select(&[asset]).and_then(|f| f.rename(asset, out_id)) {
                Ok(per_asset) => {
                    let _ = storage.store_transform_output(asset, t, &per_asset);
                }
                Err(_) => {
                    let _ = store_empty(t, storage, asset);
                }
            }
        } else {
            let _ = store_empty(t, storage, asset);
        }
    }
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
