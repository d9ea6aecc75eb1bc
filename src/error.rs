//! Error types for audio-pipeline.
//!
//! Errors are split into two categories:
//! - **Build-time errors** ([`PipelineError`]): Returned synchronously from
//!   builder and pipeline methods; the pipeline never reaches `Running`.
//! - **Runtime failures** ([`StageError`]): Occur inside a stage's processing
//!   loop and are surfaced as [`EventKind::Error`](crate::EventKind::Error)
//!   events, never as panics and never across task boundaries.

use std::fmt;

/// Which side of a stage a queue attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    /// The stage's input queue (upstream side).
    Input,
    /// The stage's output queue (downstream side).
    Output,
}

impl fmt::Display for LinkSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkSide::Input => write!(f, "input"),
            LinkSide::Output => write!(f, "output"),
        }
    }
}

/// Fatal errors that prevent a pipeline from being built or started.
///
/// These are returned from [`PipelineBuilder::build()`], [`Pipeline`]
/// lifecycle methods, and [`Controller`] control calls. Runtime issues
/// (driver faults, codec failures, stuck neighbors) are delivered via the
/// event bus instead.
///
/// [`PipelineBuilder::build()`]: crate::PipelineBuilder::build
/// [`Pipeline`]: crate::Pipeline
/// [`Controller`]: crate::Controller
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage name was registered more than once.
    #[error("duplicate stage name: {name}")]
    DuplicateName {
        /// The name that was reused.
        name: String,
    },

    /// A link referenced a name that was never registered.
    #[error("unknown stage: {name}")]
    UnknownStage {
        /// The name that wasn't found.
        name: String,
    },

    /// A stage already has a queue assigned on the given side.
    #[error("stage '{name}' already has a queue on its {side} side")]
    AlreadyLinked {
        /// The stage that was already linked.
        name: String,
        /// Which side was already assigned.
        side: LinkSide,
    },

    /// No stages were registered before linking.
    #[error("no stages registered - add at least one stage before linking")]
    NoStages,

    /// `run()` was called before `link()` completed.
    #[error("pipeline is not linked - call link() before run()")]
    NotLinked,

    /// The pipeline (or controller) is already running.
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// A control call that requires a running pipeline was made while idle.
    #[error("pipeline is not running")]
    NotRunning,

    /// Teardown was requested while stage tasks are still active.
    #[error("stages are still active - stop() must complete before teardown")]
    StillActive,

    /// A configuration parameter was invalid at build time.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// `write_input` was called but the pipeline has no raw source.
    #[error("no raw input endpoint - the pipeline was not built with a raw source")]
    NoRawInput,

    /// `read_output` was called but the pipeline has no raw sink.
    #[error("no raw output endpoint - the pipeline was not built with a raw sink")]
    NoRawOutput,
}

impl PipelineError {
    /// Creates an invalid-configuration error with the given reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Failures inside a stage's processing loop.
///
/// Stage errors never unwind across a task boundary: the failing stage
/// records the error in its error slot, emits an
/// [`EventKind::Error`](crate::EventKind::Error) event, closes its queues so
/// neighbors unblock, and walks its state machine to `Stopped`. The rest of
/// the pipeline drains normally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    /// The external capture/output driver reported a fault.
    #[error("driver error: {reason}")]
    Driver {
        /// Description from the driver.
        reason: String,
    },

    /// The encoder/decoder rejected a block.
    #[error("codec error: {reason}")]
    Codec {
        /// Description from the codec.
        reason: String,
    },

    /// A bounded wait elapsed without progress.
    ///
    /// For a source stage this is retried up to the configured budget
    /// ("no data yet"). For a transform or sink stage a queue timeout is
    /// always fatal, since it indicates a stuck neighbor.
    #[error("timed out waiting for data")]
    Timeout,

    /// The adjacent queue was closed; normal end-of-stream, not a fault.
    #[error("queue closed")]
    Closed,
}

impl StageError {
    /// Creates a driver error with the given reason.
    pub fn driver(reason: impl Into<String>) -> Self {
        Self::Driver {
            reason: reason.into(),
        }
    }

    /// Creates a codec error with the given reason.
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Returns `true` for the end-of-stream signal, which is not a fault.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
