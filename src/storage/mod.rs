//! §3.10-3.11, §4.3 / C5: thread-safe storage of every value produced and
//! consumed during one pipeline execution, and deterministic final-frame
//! assembly.
//!
//! Five reader-writer locks (`parking_lot::RwLock`), each protecting one
//! map, so concurrent `GatherInputs` calls from independent nodes never
//! contend on a writer.

use crate::error::{EngineResult, SystemError};
use crate::frame::{Frame, INDEX_COL};
use crate::metadata::TransformCategory;
use crate::report::{Dashboard, EventMarker};
use crate::timeframe::Timeframe;
use crate::transform::TransformBase;
use parking_lot::RwLock;
use polars::prelude::Series;
use std::collections::{HashMap, HashSet};

type ColumnKey = (String, String, String); // (timeframe, asset, column_id)

/// Where a column id is produced: the owning transform's id, its timeframe,
/// and whether it was stored as a scalar (so `GatherInputs` knows to
/// broadcast rather than look up a per-asset series).
#[derive(Clone, Debug)]
struct ProducerInfo {
    transform_id: String,
    timeframe: Timeframe,
    is_scalar: bool,
}

pub struct IntermediateStorage {
    base_data: RwLock<HashMap<String, HashMap<String, Frame>>>,
    cache: RwLock<HashMap<ColumnKey, Series>>,
    io_to_transform: RwLock<HashMap<String, ProducerInfo>>,
    assets: RwLock<HashSet<String>>,
    scalar_cache: RwLock<HashMap<String, f64>>,
    asset_scalar_cache: RwLock<HashMap<String, HashMap<String, f64>>>,
    report_cache: RwLock<HashMap<String, Dashboard>>,
    event_marker_cache: RwLock<HashMap<String, Vec<EventMarker>>>,
}

impl Default for IntermediateStorage {
    fn default() -> Self {
        Self {
            base_data: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            io_to_transform: RwLock::new(HashMap::new()),
            assets: RwLock::new(HashSet::new()),
            scalar_cache: RwLock::new(HashMap::new()),
            asset_scalar_cache: RwLock::new(HashMap::new()),
            report_cache: RwLock::new(HashMap::new()),
            event_marker_cache: RwLock::new(HashMap::new()),
        }
    }
}

impl IntermediateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assets(&self) -> Vec<String> {
        self.assets.read().iter().cloned().collect()
    }

    /// §4.3: exclusive lock on every cache. Stores base frames, seeds the
    /// cache with one entry per base column, and intersects the declared
    /// asset set with `allowed_assets`.
    pub fn initialize_base_data(
        &self,
        data: HashMap<String, HashMap<String, Frame>>,
        allowed_assets: &HashSet<String>,
    ) -> EngineResult<()> {
        let mut base_data = self.base_data.write();
        let mut cache = self.cache.write();
        let mut assets = self.assets.write();

        for (timeframe, by_asset) in &data {
            for (asset, frame) in by_asset {
                if !allowed_assets.contains(asset) {
                    continue;
                }
                assets.insert(asset.clone());
                for column in frame.column_names() {
                    if column == INDEX_COL {
                        continue;
                    }
                    let series = frame
                        .as_df()
                        .column(&column)
                        .map_err(|e| {
                            SystemError::InvariantViolation(format!(
                                "base column '{column}' unreadable: {e}"
                            ))
                        })?
                        .as_materialized_series()
                        .clone();
                    cache.insert((timeframe.clone(), asset.clone(), column), series);
                }
            }
        }

        *base_data = data
            .into_iter()
            .map(|(tf, by_asset)| {
                let filtered = by_asset
                    .into_iter()
                    .filter(|(asset, _)| allowed_assets.contains(asset))
                    .collect();
                (tf, filtered)
            })
            .collect();

        Ok(())
    }

    fn base_frame(&self, timeframe: &str, asset: &str) -> EngineResult<Frame> {
        self.base_data
            .read()
            .get(timeframe)
            .and_then(|by_asset| by_asset.get(asset))
            .cloned()
            .ok_or_else(|| {
                SystemError::CacheMiss {
                    what: "base frame",
                    column: INDEX_COL.to_string(),
                    asset: asset.to_string(),
                    timeframe: timeframe.to_string(),
                }
                .into()
            })
    }

    /// Writes one entry into the io->transform map per declared output, and
    /// seeds `scalar_cache` with every `InputValue::Literal` wired into this
    /// transform's inputs, keyed by the constant's own `column_name()` — a
    /// literal has no producer transform, so `resolve_input_column` can only
    /// find it if it's registered here first.
    pub fn register_transform(&self, t: &dyn TransformBase) {
        let timeframe = t.timeframe().clone();
        let is_scalar = t.configuration().metadata.category == Some(TransformCategory::Scalar);
        let mut map = self.io_to_transform.write();
        for output in t.output_metadata() {
            map.insert(
                t.output_id(&output.id),
                ProducerInfo {
                    transform_id: t.id().to_string(),
                    timeframe: timeframe.clone(),
                    is_scalar,
                },
            );
        }
        drop(map);

        for input in t.configuration().inputs.values().flatten() {
            if let crate::configuration::InputValue::Literal(constant) = input {
                if let Some(value) = constant.as_f64() {
                    self.scalar_cache
                        .write()
                        .entry(constant.column_name())
                        .or_insert(value);
                } else {
                    tracing::warn!(
                        transform_id = %t.id(),
                        column = %constant.column_name(),
                        "literal constant has no numeric form, cannot be broadcast"
                    );
                }
            }
        }
    }

    /// §4.3 `GatherInputs`: the hot read path. Index is the base frame's
    /// index for `(t.timeframe, asset)`; columns are each wired input
    /// (broadcast if scalar, reindexed if produced at a different
    /// timeframe) followed by any still-missing `required_data_sources`
    /// pulled straight from base data (silently skipped if absent).
    pub fn gather_inputs(&self, asset: &str, t: &dyn TransformBase) -> EngineResult<Frame> {
        let timeframe = t.timeframe().canonical();
        let base = self.base_frame(&timeframe, asset)?;
        let target_index = base.index()?.clone();

        let mut columns = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for input_id in t.input_ids() {
            seen.insert(input_id.clone());
            if let Some(frame) =
                self.resolve_input_column(&input_id, asset, &timeframe, &target_index)?
            {
                columns.push(frame);
            }
        }

        for source in t.required_data_sources() {
            if seen.contains(&source) {
                continue;
            }
            if base.contains(&source) {
                columns.push(base.select(&[&source])?);
            }
        }

        if columns.is_empty() {
            return Frame::from_df(
                polars::prelude::DataFrame::new(vec![polars::prelude::Column::from(
                    target_index.clone(),
                )])
                .map_err(|e| SystemError::InvariantViolation(e.to_string()))?,
            );
        }

        Frame::outer_join_concat(&columns)
    }

    fn resolve_input_column(
        &self,
        input_id: &str,
        asset: &str,
        target_timeframe: &str,
        target_index: &Series,
    ) -> EngineResult<Option<Frame>> {
        let producer = self.io_to_transform.read().get(input_id).cloned();
        let Some(producer) = producer else {
            // Literal constants are columns without a registered producer
            // transform; they're broadcast as scalars if present in the
            // scalar cache, otherwise treated as missing (handled by the
            // caller via required_data_sources / ValidateInputsAvailable).
            if let Some(&value) = self.scalar_cache.read().get(input_id) {
                return Ok(Some(Frame::broadcast_scalar(input_id, value, target_index)?));
            }
            return Ok(None);
        };

        if producer.is_scalar {
            let value = *self
                .scalar_cache
                .read()
                .get(input_id)
                .ok_or_else(|| SystemError::UnpopulatedScalar(input_id.to_string()))?;
            return Ok(Some(Frame::broadcast_scalar(input_id, value, target_index)?));
        }

        let key = (producer.timeframe.canonical(), asset.to_string(), input_id.to_string());
        let Some(series) = self.cache.read().get(&key).cloned() else {
            return Ok(None);
        };

        let source_index_col = polars::prelude::Column::from(
            self.base_frame(&producer.timeframe.canonical(), asset)?
                .index()?
                .clone(),
        );
        let df = polars::prelude::DataFrame::new(vec![
            source_index_col,
            polars::prelude::Column::from(series),
        ])
        .map_err(|e| SystemError::InvariantViolation(e.to_string()))?;
        let frame = Frame::from_df(df)?;

        if producer.timeframe.canonical() == target_timeframe {
            Ok(Some(frame))
        } else {
            Ok(Some(frame.reindex(target_index)?))
        }
    }

    /// Pre-flight check mirroring `gather_inputs`' lookup logic as a boolean.
    pub fn validate_inputs_available(&self, asset: &str, t: &dyn TransformBase) -> bool {
        let timeframe = t.timeframe().canonical();
        if self.base_frame(&timeframe, asset).is_err() {
            return false;
        }
        for input_id in t.input_ids() {
            let producer = self.io_to_transform.read().get(&input_id).cloned();
            match producer {
                Some(p) if p.is_scalar => {
                    if !self.scalar_cache.read().contains_key(&input_id) {
                        return false;
                    }
                }
                Some(p) => {
                    let key = (p.timeframe.canonical(), asset.to_string(), input_id.clone());
                    if !self.cache.read().contains_key(&key) {
                        return false;
                    }
                }
                None => {
                    if !self.scalar_cache.read().contains_key(&input_id) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// §4.3 `StoreTransformOutput`. `Scalar`-category transforms store once
    /// in `ScalarCache` and skip the per-(tf, asset) cache entirely.
    pub fn store_transform_output(
        &self,
        asset: &str,
        t: &dyn TransformBase,
        frame: &Frame,
    ) -> EngineResult<()> {
        let timeframe = t.timeframe().canonical();
        let is_scalar = t.configuration().metadata.category == Some(TransformCategory::Scalar);

        if is_scalar {
            for output in t.output_metadata() {
                let id = t.output_id(&output.id);
                if self.scalar_cache.read().contains_key(&id) {
                    continue;
                }
                let value = frame.scalar_mean(&output.id).or_else(|_| frame.scalar_mean("result"))?;
                self.scalar_cache.write().insert(id, value);
            }
            return Ok(());
        }

        let base = self.base_frame(&timeframe, asset)?;
        let target_index = base.index()?.clone();
        let reindexed = if frame.is_empty() {
            frame.clone()
        } else {
            frame.reindex(&target_index)?
        };

        let mut cache = self.cache.write();
        for output in t.output_metadata() {
            let key = (timeframe.clone(), asset.to_string(), t.output_id(&output.id));
            if reindexed.contains(&output.id) {
                let series = reindexed
                    .as_df()
                    .column(&output.id)
                    .map_err(|e| SystemError::InvariantViolation(e.to_string()))?
                    .as_materialized_series()
                    .clone();
                cache.insert(key, series);
            } else {
                let empty = Frame::empty_with_schema(&[(output.id.clone(), output.r#type)])?
                    .reindex(&target_index)?;
                let series = empty
                    .as_df()
                    .column(&output.id)
                    .map_err(|e| SystemError::InvariantViolation(e.to_string()))?
                    .as_materialized_series()
                    .clone();
                cache.insert(key, series);
            }
        }
        Ok(())
    }

    pub fn store_asset_scalar(&self, asset: &str, output_id: &str, value: f64) {
        self.asset_scalar_cache
            .write()
            .entry(output_id.to_string())
            .or_default()
            .insert(asset.to_string(), value);
    }

    pub fn store_report(&self, key: &str, dashboard: Dashboard) {
        let mut reports = self.report_cache.write();
        match reports.get_mut(key) {
            Some(existing) => existing.merge_from(&dashboard),
            None => {
                reports.insert(key.to_string(), dashboard);
            }
        }
    }

    pub fn store_event_marker(&self, asset: &str, marker: EventMarker) {
        self.event_marker_cache
            .write()
            .entry(asset.to_string())
            .or_default()
            .push(marker);
    }

    pub fn reports(&self) -> HashMap<String, Dashboard> {
        self.report_cache.read().clone()
    }

    pub fn event_markers(&self) -> HashMap<String, Vec<EventMarker>> {
        self.event_marker_cache.read().clone()
    }

    /// §4.3 `BuildFinalOutput`: shared locks across everything; per
    /// `(timeframe, asset)`, outer-join concat of base + cached outputs,
    /// then every scalar broadcast as one column each. Column order is
    /// scalars || outputs || base-columns.
    pub fn build_final_output(&self) -> EngineResult<HashMap<String, HashMap<String, Frame>>> {
        let base_data = self.base_data.read();
        let cache = self.cache.read();
        let scalars = self.scalar_cache.read();

        let mut result: HashMap<String, HashMap<String, Frame>> = HashMap::new();

        for (timeframe, by_asset) in base_data.iter() {
            let mut assets_out = HashMap::new();
            for (asset, base_frame) in by_asset {
                let target_index = base_frame.index()?.clone();

                let mut output_frames: Vec<Frame> = cache
                    .iter()
                    .filter(|((tf, a, _), _)| tf == timeframe && a == asset)
                    .map(|((_, _, col), series)| {
                        let mut named = series.clone();
                        named.rename(col.as_str().into());
                        let df = polars::prelude::DataFrame::new(vec![
                            polars::prelude::Column::from(target_index.clone()),
                            polars::prelude::Column::from(named),
                        ])
                        .map_err(|e| SystemError::InvariantViolation(e.to_string()))?;
                        Frame::from_df(df)
                    })
                    .collect::<EngineResult<Vec<_>>>()?;

                let mut scalar_frames: Vec<Frame> = scalars
                    .iter()
                    .map(|(col, value)| Frame::broadcast_scalar(col, *value, &target_index))
                    .collect::<EngineResult<Vec<_>>>()?;

                let mut all = Vec::with_capacity(1 + output_frames.len() + scalar_frames.len());
                all.append(&mut scalar_frames);
                all.append(&mut output_frames);
                all.push(base_frame.clone());

                assets_out.insert(asset.clone(), Frame::outer_join_concat(&all)?);
            }
            result.insert(timeframe.clone(), assets_out);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_report_merges_repeated_fields_on_second_write() {
        let storage = IntermediateStorage::new();
        storage.store_report(
            "AAPL",
            Dashboard {
                title: Some("first".into()),
                ..Default::default()
            },
        );
        storage.store_report(
            "AAPL",
            Dashboard {
                title: Some("second".into()),
                ..Default::default()
            },
        );
        assert_eq!(storage.reports()["AAPL"].title, Some("second".into()));
    }

    #[test]
    fn store_asset_scalar_is_keyed_by_output_then_asset() {
        let storage = IntermediateStorage::new();
        storage.store_asset_scalar("AAPL", "ref#result", 1.0);
        storage.store_asset_scalar("MSFT", "ref#result", 0.0);
        let cache = storage.asset_scalar_cache.read();
        assert_eq!(cache["ref#result"]["AAPL"], 1.0);
        assert_eq!(cache["ref#result"]["MSFT"], 0.0);
    }
}
