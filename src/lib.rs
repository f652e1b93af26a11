// === Public Modules (The Canonical Paths) ===
pub mod chart_metadata;
pub mod configuration;
pub mod error;
pub mod events;
pub mod frame;
pub mod kernels;
pub mod manager;
pub mod metadata;
pub mod option_value;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod storage;
pub mod timeframe;
pub mod transform;
pub mod value;

// === Facades (Re-exporting internals) ===
pub use crate::configuration::{InputMapping, InputValue, NodeRef, TransformConfiguration};
pub use crate::error::{ConfigError, EngineError, EngineResult, ExecutionError, SystemError};
pub use crate::events::{
    AssetContextGuard, CancellationGuard, CancellationToken, Connection, Event, EventDispatcher,
    EventFilter, EventKind, ProgressSummaryThread, TransformProgressEmitter,
};
pub use crate::frame::Frame;
pub use crate::manager::TransformManager;
pub use crate::metadata::{
    FlagSchema, IoDataType, IoMetaData, OptionMetaData, TransformCategory, TransformPlotKind,
    TransformsMetaData,
};
pub use crate::option_value::OptionValue;
pub use crate::orchestrator::Orchestrator;
pub use crate::registry::Registry;
pub use crate::report::{CardData, CardDef, ChartDef, Dashboard, EventMarker, TableDef};
pub use crate::timeframe::{SessionRange, TimeUnit, Timeframe};
pub use crate::transform::{Kernel, TransformBase};
pub use crate::value::{Constant, Value, ValueType};
