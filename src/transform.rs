//! §6.1 / §9: the `TransformBase` contract kernels execute against, and the
//! flat `Kernel` enum the orchestrator dispatches on (per the Design Notes'
//! "avoid deep inheritance hierarchies" guidance: one data-only
//! configuration, dispatch is a `match`, not virtual calls).

use crate::configuration::TransformConfiguration;
use crate::error::EngineResult;
use crate::events::progress::TransformProgressEmitter;
use crate::frame::Frame;
use crate::metadata::IoMetaData;
use crate::report::{Dashboard, EventMarker};
use std::sync::Arc;

/// Which execution strategy the orchestrator selects for a transform,
/// derived once from its metadata at DAG-build time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kernel {
    Default,
    CrossSectional,
    AssetRefPassthrough,
    IsAssetRef,
}

impl Kernel {
    /// §4.5 Construction step 3: select a kernel from a transform's metadata
    /// flags. `asset_ref`/`is_asset_ref` are identified by transform type id
    /// (there is no dedicated metadata flag for them in the source system).
    pub fn select(type_id: &str, is_cross_sectional: bool) -> Kernel {
        match type_id {
            "asset_ref" => Kernel::AssetRefPassthrough,
            "is_asset_ref" => Kernel::IsAssetRef,
            _ if is_cross_sectional => Kernel::CrossSectional,
            _ => Kernel::Default,
        }
    }
}

/// §6.1: the interface every executable transform implements. Kernels call
/// into this; the algorithm body (`transform_data`) is the black-box part
/// this engine treats as out of scope.
pub trait TransformBase: Send + Sync {
    fn id(&self) -> &str;

    fn configuration(&self) -> &TransformConfiguration;

    fn timeframe(&self) -> &crate::timeframe::Timeframe {
        &self.configuration().timeframe
    }

    /// Resolved column ids of every wired input, in declaration order.
    fn input_ids(&self) -> Vec<String> {
        self.configuration().input_ids()
    }

    fn output_metadata(&self) -> &[IoMetaData] {
        &self.configuration().metadata.outputs
    }

    fn output_id(&self, handle: &str) -> String {
        self.configuration().output_id(handle)
    }

    fn required_data_sources(&self) -> Vec<String>;

    fn transform_data(&self, frame: Frame) -> EngineResult<Frame>;

    fn get_dashboard(&self, _frame: &Frame) -> Option<Dashboard> {
        None
    }

    fn get_event_markers(&self, _frame: &Frame) -> Option<EventMarker> {
        None
    }

    fn set_progress_emitter(&mut self, _emitter: Option<Arc<TransformProgressEmitter>>) {}
}
