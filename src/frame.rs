//! §4 / C5: a timestamp-indexed wrapper over `polars::frame::DataFrame`.
//!
//! Intermediate Storage and the execution kernels never touch raw
//! `DataFrame`s directly; they go through `Frame`, which knows the index
//! column's name and keeps reindex/outer-join/null-synthesis in one place.

use crate::error::{EngineResult, SystemError};
use crate::metadata::IoDataType;
use polars::prelude::{
    col, df, ChunkAgg, Column, DataFrame, DataType, IntoLazy, JoinArgs, JoinType, NamedFrom,
    PolarsError, Series, SortMultipleOptions, TimeUnit, UnionArgs,
};

pub const INDEX_COL: &str = "timestamp";

/// A `DataFrame` whose rows are ordered and keyed by a nanosecond UTC
/// timestamp column named [`INDEX_COL`].
#[derive(Clone, Debug)]
pub struct Frame {
    df: DataFrame,
}

impl Frame {
    pub fn from_df(df: DataFrame) -> EngineResult<Self> {
        if df.column(INDEX_COL).is_err() {
            return Err(SystemError::InvariantViolation(format!(
                "frame is missing required index column '{INDEX_COL}'"
            ))
            .into());
        }
        Ok(Self { df })
    }

    pub fn into_df(self) -> DataFrame {
        self.df
    }

    pub fn as_df(&self) -> &DataFrame {
        &self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.df.column(column).is_ok()
    }

    /// The index column, sorted ascending (callers are expected to have
    /// built the frame that way; this is not re-sorted here).
    pub fn index(&self) -> EngineResult<&Series> {
        self.df
            .column(INDEX_COL)
            .map(|c| c.as_materialized_series())
            .map_err(|e| cache_err("index", e))
    }

    /// Projects to a subset of columns, always keeping the index column.
    pub fn select(&self, columns: &[&str]) -> EngineResult<Frame> {
        let mut wanted = vec![INDEX_COL];
        wanted.extend(columns.iter().copied());
        let df = self
            .df
            .select(wanted)
            .map_err(|e| cache_err("select", e))?;
        Ok(Frame { df })
    }

    /// An empty frame with a typed-null column per declared output, built
    /// from a single empty index. Mirrors `GetArrowTypeFromIODataType`:
    /// Integer -> i64, Decimal|Number -> f64, Boolean -> bool,
    /// String -> Utf8, Timestamp -> ns-UTC, Any -> Utf8.
    pub fn empty_with_schema(outputs: &[(String, IoDataType)]) -> EngineResult<Frame> {
        let idx = Series::new(INDEX_COL.into(), Vec::<i64>::new())
            .cast(&DataType::Datetime(TimeUnit::Nanosecond, None))
            .map_err(|e| cache_err("empty_with_schema", e))?;
        let mut columns: Vec<Column> = vec![idx.into()];
        for (name, io_type) in outputs {
            columns.push(null_column(name, *io_type, 0));
        }
        let df = DataFrame::new(columns).map_err(|e| cache_err("empty_with_schema", e))?;
        Ok(Frame { df })
    }

    /// Reindexes this frame onto `target_index`, filling rows that don't
    /// exist in `self` with nulls (left join target <- self).
    pub fn reindex(&self, target_index: &Series) -> EngineResult<Frame> {
        let target_df = DataFrame::new(vec![Column::from(target_index.clone())])
            .map_err(|e| cache_err("reindex", e))?;
        let joined = target_df
            .lazy()
            .join(
                self.df.clone().lazy(),
                [col(INDEX_COL)],
                [col(INDEX_COL)],
                JoinArgs {
                    how: JoinType::Left,
                    ..Default::default()
                },
            )
            .sort([INDEX_COL], SortMultipleOptions::default())
            .collect()
            .map_err(|e| cache_err("reindex", e))?;
        Ok(Frame { df: joined })
    }

    /// Drops rows with any null in a non-index column.
    pub fn drop_null(&self) -> EngineResult<Frame> {
        let df = self
            .df
            .clone()
            .lazy()
            .drop_nulls(None)
            .collect()
            .map_err(|e| cache_err("drop_null", e))?;
        Ok(Frame { df })
    }

    /// Filters rows by a caller-built boolean mask, one entry per row, used
    /// by the default kernel's session-range slicing.
    pub fn filter_mask(&self, mask: &[bool]) -> EngineResult<Frame> {
        let mask_series = polars::prelude::BooleanChunked::from_slice("mask".into(), mask);
        let df = self
            .df
            .filter(&mask_series)
            .map_err(|e| cache_err("filter_mask", e))?;
        Ok(Frame { df })
    }

    /// The index column's values as nanoseconds since the UNIX epoch.
    pub fn index_ns(&self) -> EngineResult<Vec<i64>> {
        let series = self.index()?;
        let ca = series
            .cast(&DataType::Datetime(TimeUnit::Nanosecond, None))
            .map_err(|e| cache_err("index_ns", e))?;
        let physical = ca
            .datetime()
            .map_err(|e| cache_err("index_ns", e))?
            .physical();
        Ok(physical.into_no_null_iter().collect())
    }

    pub fn rename(&self, from: &str, to: &str) -> EngineResult<Frame> {
        let mut df = self.df.clone();
        df.rename(from, to.into())
            .map_err(|e| cache_err("rename", e))?;
        Ok(Frame { df })
    }

    /// Outer-join concatenation of `frames` on the index column, per
    /// `BuildFinalOutput`: every frame contributes its non-index columns,
    /// rows are unioned on distinct timestamps.
    pub fn outer_join_concat(frames: &[Frame]) -> EngineResult<Frame> {
        let mut iter = frames.iter();
        let Some(first) = iter.next() else {
            return Frame::from_df(
                df!(INDEX_COL => Vec::<i64>::new())
                    .map_err(|e| cache_err("outer_join_concat", e))?,
            );
        };
        let mut acc = first.df.clone().lazy();
        for next in iter {
            acc = acc.join(
                next.df.clone().lazy(),
                [col(INDEX_COL)],
                [col(INDEX_COL)],
                JoinArgs {
                    how: JoinType::Full,
                    coalesce: polars::prelude::JoinCoalesce::CoalesceColumns,
                    ..Default::default()
                },
            );
        }
        let df = acc
            .sort([INDEX_COL], SortMultipleOptions::default())
            .collect()
            .map_err(|e| cache_err("outer_join_concat", e))?;
        Ok(Frame { df })
    }

    /// Row-wise union of frames sharing an identical schema (used to stitch
    /// per-asset cross-sectional outputs back together).
    pub fn vstack_concat(frames: &[Frame]) -> EngineResult<Frame> {
        let lfs = frames.iter().map(|f| f.df.clone().lazy()).collect();
        let df = polars::prelude::concat(
            lfs,
            UnionArgs {
                parallel: true,
                rechunk: true,
                ..Default::default()
            },
        )
        .map_err(|e| cache_err("vstack_concat", e))?
        .sort([INDEX_COL], SortMultipleOptions::default())
        .collect()
        .map_err(|e| cache_err("vstack_concat", e))?;
        Ok(Frame { df })
    }

    /// Broadcasts a single scalar value down `len` rows against `target_index`,
    /// for the `ScalarCache` read path feeding a regular (per-row) transform.
    pub fn broadcast_scalar(name: &str, value: f64, target_index: &Series) -> EngineResult<Frame> {
        let len = target_index.len();
        let values = Series::new(name.into(), vec![value; len]);
        let df = DataFrame::new(vec![
            Column::from(target_index.clone()),
            Column::from(values),
        ])
        .map_err(|e| cache_err("broadcast_scalar", e))?;
        Ok(Frame { df })
    }

    /// Broadcasts a single boolean value down `target_index`, used by the
    /// is-asset-ref kernel to synthesize a gating series over an asset's
    /// real timestamps.
    pub fn broadcast_bool(name: &str, value: bool, target_index: &Series) -> EngineResult<Frame> {
        let len = target_index.len();
        let values = Series::new(name.into(), vec![value; len]);
        let df = DataFrame::new(vec![
            Column::from(target_index.clone()),
            Column::from(values),
        ])
        .map_err(|e| cache_err("broadcast_bool", e))?;
        Ok(Frame { df })
    }

    /// The mean of a single numeric column, used when a `Scalar`-category
    /// transform's output must be reduced to one value before caching.
    pub fn scalar_mean(&self, column: &str) -> EngineResult<f64> {
        let s = self
            .df
            .column(column)
            .map_err(|e| cache_err("scalar_mean", e))?
            .as_materialized_series()
            .cast(&DataType::Float64)
            .map_err(|e| cache_err("scalar_mean", e))?;
        let ca = s.f64().map_err(|e| cache_err("scalar_mean", e))?;
        ca.mean().ok_or_else(|| {
            SystemError::InvariantViolation(format!("column '{column}' has no non-null values")).into()
        })
    }
}

fn null_column(name: &str, io_type: IoDataType, len: usize) -> Column {
    let s = match io_type {
        IoDataType::Integer => Series::new(name.into(), vec![None::<i64>; len]),
        IoDataType::Decimal | IoDataType::Number => Series::new(name.into(), vec![None::<f64>; len]),
        IoDataType::Boolean => Series::new(name.into(), vec![None::<bool>; len]),
        IoDataType::String => Series::new(name.into(), vec![None::<&str>; len]),
        IoDataType::Any => {
            tracing::warn!(column = %name, "synthesizing null column for IoDataType::Any as utf8");
            Series::new(name.into(), vec![None::<&str>; len])
        }
        IoDataType::Timestamp => Series::new(name.into(), vec![None::<i64>; len])
            .cast(&DataType::Datetime(TimeUnit::Nanosecond, None))
            .unwrap_or_else(|_| Series::new(name.into(), vec![None::<i64>; len])),
    };
    Column::from(s)
}

fn cache_err(op: &'static str, e: PolarsError) -> crate::error::EngineError {
    SystemError::InvariantViolation(format!("polars operation '{op}' failed: {e}")).into()
}
