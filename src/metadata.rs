//! §3.8 / C2: declarative transform metadata, as registered for the process
//! lifetime. This is read-only data describing *kinds* of transforms; one
//! instance per `type_id`, shared across every pipeline execution.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Semantic bucket used for grouping in reports and for the `Scalar`
/// optimization in Intermediate Storage.
#[derive(
    Copy, Clone, Debug, Display, EnumString, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum TransformCategory {
    Aggregate,
    ControlFlow,
    Scalar,
    DataSource,
    Math,
    Trend,
    Momentum,
    Volatility,
    Volume,
    PriceAction,
    Statistical,
    Factor,
    Utility,
    Reporter,
    Executor,
    EventMarker,
    ML,
    Portfolio,
}

/// Chart rendering hint. Kept as a single catch-all variant plus the common
/// overlay kinds: the full original enumeration (dozens of indicator-specific
/// plot kinds) is UI-owned vocabulary this engine only threads through, not
/// behavior the engine branches on.
#[derive(
    Copy, Clone, Debug, Display, EnumString, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum TransformPlotKind {
    Line,
    Overlay,
    Panel,
    Histogram,
    None,
}

/// §4.3 Type Mapping: the declared I/O type of a column, and the arrow/polars
/// type it synthesizes to when a declared output is missing from a
/// transform's returned frame.
#[derive(
    Copy, Clone, Debug, Display, EnumString, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum IoDataType {
    Decimal,
    Integer,
    Number,
    Boolean,
    String,
    Timestamp,
    Any,
}

/// One declared input or output slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IoMetaData {
    pub r#type: IoDataType,
    pub id: String,
    pub name: String,
    pub allow_multiple_connections: bool,
    pub is_filter: bool,
}

impl IoMetaData {
    pub fn new(r#type: IoDataType, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            r#type,
            id: id.into(),
            name: name.into(),
            allow_multiple_connections: false,
            is_filter: false,
        }
    }

    pub fn allowing_multiple(mut self) -> Self {
        self.allow_multiple_connections = true;
        self
    }
}

/// Display configuration for a flag-style output (icon, templated label,
/// semantic color). Opaque to the engine beyond being round-tripped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagSchema {
    pub icon: String,
    pub text: String,
    pub text_is_template: bool,
    pub color: String,
    pub title: Option<String>,
    pub value_key: String,
}

/// A declared option slot: name, default, bounds, and select-membership.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionMetaData {
    pub name: String,
    pub r#type: crate::value::ValueType,
    pub default: Option<crate::option_value::OptionValue>,
    pub required: bool,
    /// Inclusive numeric bounds, checked against `as_decimal()` when present.
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// When non-empty, the option's string form must be one of these.
    pub select_options: Vec<String>,
}

impl OptionMetaData {
    pub fn new(name: impl Into<String>, r#type: crate::value::ValueType) -> Self {
        Self {
            name: name.into(),
            r#type,
            default: None,
            required: false,
            min: None,
            max: None,
            select_options: Vec::new(),
        }
    }
}

/// §3.8 Transform Metadata: everything the registry declares about one
/// transform *type*, shared by every configuration instantiated from it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformsMetaData {
    pub id: String,
    pub category: Option<TransformCategory>,
    pub plot_kind: Option<TransformPlotKind>,
    pub name: String,
    pub options: Vec<OptionMetaData>,
    pub is_cross_sectional: bool,
    pub desc: String,
    pub inputs: Vec<IoMetaData>,
    pub outputs: Vec<IoMetaData>,
    pub at_least_one_input_required: bool,
    pub tags: Vec<String>,
    pub requires_timeframe: bool,
    /// Extra base-data columns this transform needs beyond its wired inputs,
    /// e.g. `"BS:cash"`, `"ECON:{category}:value"` (colon-prefixed, may
    /// contain `{option_name}` placeholders expanded by the registry).
    pub required_data_sources: Vec<String>,
    pub intraday_only: bool,
    pub allow_null_inputs: bool,
    pub internal_use: bool,
    pub alias: String,
    pub flag_schema: Option<FlagSchema>,
    pub strategy_types: Vec<String>,
    pub related_transforms: Vec<String>,
    pub asset_requirements: Vec<String>,
    pub usage_context: String,
    pub limitations: String,
}

impl TransformsMetaData {
    pub fn new(id: impl Into<String>, category: TransformCategory) -> Self {
        Self {
            id: id.into(),
            category: Some(category),
            ..Default::default()
        }
    }
}

impl Default for TransformCategory {
    fn default() -> Self {
        TransformCategory::Utility
    }
}

/// Reusable I/O presets for OHLCV-style base columns, mirroring the
/// registry's shared `IOMetaDataConstants`.
pub mod constants {
    use super::{IoDataType, IoMetaData};

    pub fn close_price() -> IoMetaData {
        IoMetaData::new(IoDataType::Decimal, "c", "Close Price").allowing_multiple()
    }
    pub fn open_price() -> IoMetaData {
        IoMetaData::new(IoDataType::Decimal, "o", "Open Price").allowing_multiple()
    }
    pub fn high_price() -> IoMetaData {
        IoMetaData::new(IoDataType::Decimal, "h", "High Price").allowing_multiple()
    }
    pub fn low_price() -> IoMetaData {
        IoMetaData::new(IoDataType::Decimal, "l", "Low Price").allowing_multiple()
    }
    pub fn volume() -> IoMetaData {
        IoMetaData::new(IoDataType::Decimal, "v", "Volume").allowing_multiple()
    }
    pub fn decimal_result() -> IoMetaData {
        IoMetaData::new(IoDataType::Decimal, "result", "").allowing_multiple()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_display_and_parse() {
        let c = TransformCategory::Momentum;
        let s = c.to_string();
        assert_eq!(s.parse::<TransformCategory>().unwrap(), c);
    }

    #[test]
    fn io_metadata_builder_sets_multi_connection() {
        let io = constants::close_price();
        assert!(io.allow_multiple_connections);
        assert_eq!(io.id, "c");
    }
}
