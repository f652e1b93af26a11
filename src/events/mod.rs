//! C8: structured event variants, filter composition, cooperative
//! cancellation, and per-transform progress emission.

pub mod cancellation;
pub mod dispatcher;
pub mod progress;

pub use cancellation::{CancellationGuard, CancellationToken};
pub use dispatcher::{Connection, Event, EventDispatcher, EventFilter, EventKind};
pub use progress::{AssetContextGuard, ProgressSummaryThread, TransformProgressEmitter};
