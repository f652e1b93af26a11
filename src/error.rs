use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors raised while resolving a compiled program into configurations and
/// a runnable graph. All of these are fatal and surface before any kernel runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown transform type: '{0}'")]
    UnknownTransform(String),

    #[error("Bad option '{name}' on transform '{transform_id}': {reason}")]
    BadOption {
        transform_id: String,
        name: String,
        reason: String,
    },

    #[error("Missing required input slot '{slot}' on transform '{transform_id}'")]
    MissingInput { transform_id: String, slot: String },

    #[error("Duplicate transform id: '{0}'")]
    DuplicateId(String),

    #[error("Transform '{transform_id}' references unresolved handle '{handle}'")]
    MissingHandle { transform_id: String, handle: String },

    #[error("Circular dependency detected among transforms: {0:?}")]
    CircularDependency(Vec<String>),
}

/// Errors raised during `ExecutePipeline`. Per-node execution errors are
/// aggregated into a single `PipelineFailed` after the graph drains;
/// cancellation is not a failure.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Transform pipeline failed:\n{}", .messages.join("\n"))]
    PipelineFailed { messages: Vec<String> },

    #[error("Pipeline execution was cancelled")]
    Cancelled,
}

/// Invariant violations that indicate an engine bug rather than a caller mistake.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Missing internal field: {0}")]
    MissingField(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Scalar cache missing entry for '{0}': registered but never populated")]
    UnpopulatedScalar(String),

    #[error("Cache missing {what} for column '{column}' (asset '{asset}', timeframe '{timeframe}')")]
    CacheMiss {
        what: &'static str,
        column: String,
        asset: String,
        timeframe: String,
    },
}
