//! Real-time audio streaming pipelines built from small, queue-connected
//! stages.
//!
//! A pipeline is a chain: one source, any number of transforms, one sink.
//! Each running stage owns a tokio task and talks to its neighbors only
//! through bounded byte ring queues, so a slow consumer backpressures its
//! producer instead of growing memory. Status flows the other way, over a
//! bounded event bus: every lifecycle transition, failure, format report,
//! and end-of-stream becomes an event the application can wait on.
//!
//! # Architecture
//!
//! ```text
//! Driver -> [source] =queue=> [transform]* =queue=> [sink] -> Driver
//!               \                  |                  /
//!                +---------- event bus --------------+
//!                                  |
//!                             application
//! ```
//!
//! - [`PipelineBuilder`] assembles the chain and returns a [`Controller`].
//! - [`Driver`] is the hardware seam: sources read from one, sinks write
//!   to one. [`RawStream`] exposes an end of the chain as an in-process
//!   byte stream instead.
//! - [`Transform`] rewrites blocks in flight; [`Resampler`] and
//!   [`CodecStage`] are the built-in transforms.
//! - [`Pipeline`] is the lower-level registry for code that wants to
//!   register and link stages by hand.
//!
//! # Example
//!
//! Feed 44.1 kHz mono PCM in, read 16 kHz PCM out:
//!
//! ```no_run
//! use audio_pipeline::{PipelineBuilder, Resampler};
//!
//! # async fn run() -> Result<(), audio_pipeline::PipelineError> {
//! let mut controller = PipelineBuilder::new()
//!     .raw_source("mic")
//!     .transform("resample", Resampler::new(44100, 16000, 1)?)
//!     .raw_sink("speech")
//!     .build()?;
//!
//! controller.start()?;
//! controller.write_input(&[0u8; 1024], None).await?;
//!
//! let mut buf = [0u8; 1024];
//! let _converted = controller.read_output(&mut buf, None).await?;
//! let report = controller.stop().await?;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod builder;
mod config;
mod controller;
mod error;
mod event;
pub mod format;
mod pipeline;
mod queue;
pub mod stage;

pub use builder::PipelineBuilder;
pub use config::PipelineConfig;
pub use controller::{Controller, StopReport};
pub use error::{LinkSide, PipelineError, StageError};
pub use event::{EventBus, EventKind, OverflowPolicy, PipelineEvent};
pub use format::{Resampler, StreamFormat};
pub use pipeline::Pipeline;
pub use queue::RingQueue;
pub use stage::{
    Codec, CodecDirection, CodecStage, Driver, IdentityCodec, MemoryDriver, RawStream, StageRole,
    StageState, Transform,
};
