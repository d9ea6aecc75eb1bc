//! Fluent construction of pipelines.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::controller::Controller;
use crate::error::PipelineError;
use crate::format::StreamFormat;
use crate::pipeline::Pipeline;
use crate::queue::RingQueue;
use crate::stage::{
    Codec, CodecDirection, CodecStage, Driver, RawStream, StageKind, Transform,
};

enum Step {
    Source {
        name: String,
        driver: Box<dyn Driver>,
        format: Option<StreamFormat>,
    },
    RawSource {
        name: String,
    },
    Transform {
        name: String,
        transform: Box<dyn Transform>,
    },
    Sink {
        name: String,
        driver: Box<dyn Driver>,
        format: Option<StreamFormat>,
    },
    RawSink {
        name: String,
    },
}

impl Step {
    fn name(&self) -> &str {
        match self {
            Step::Source { name, .. }
            | Step::RawSource { name }
            | Step::Transform { name, .. }
            | Step::Sink { name, .. }
            | Step::RawSink { name } => name,
        }
    }
}

/// Builds a pipeline stage by stage, in data-flow order.
///
/// Add exactly one source first, any number of transforms, and exactly one
/// sink last; [`build`](PipelineBuilder::build) registers and links
/// everything and returns a ready [`Controller`]. Raw endpoints expose a
/// pipeline end as an in-process byte stream the application reads or
/// writes directly.
///
/// # Example
///
/// ```no_run
/// use audio_pipeline::{PipelineBuilder, Resampler};
///
/// # fn main() -> Result<(), audio_pipeline::PipelineError> {
/// let controller = PipelineBuilder::new()
///     .raw_source("mic")
///     .transform("resample", Resampler::new(44100, 16000, 1)?)
///     .raw_sink("out")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    steps: Vec<Step>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            steps: Vec::new(),
        }
    }

    /// Replaces the configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a driver-fed source stage.
    pub fn source(
        mut self,
        name: impl Into<String>,
        driver: impl Driver + 'static,
        format: Option<StreamFormat>,
    ) -> Self {
        self.steps.push(Step::Source {
            name: name.into(),
            driver: Box::new(driver),
            format,
        });
        self
    }

    /// Adds a source stage fed by the application through
    /// [`Controller::write_input`].
    pub fn raw_source(mut self, name: impl Into<String>) -> Self {
        self.steps.push(Step::RawSource { name: name.into() });
        self
    }

    /// Adds a transform stage.
    pub fn transform(mut self, name: impl Into<String>, transform: impl Transform + 'static) -> Self {
        self.steps.push(Step::Transform {
            name: name.into(),
            transform: Box::new(transform),
        });
        self
    }

    /// Adds the encode half of a codec as a transform stage.
    pub fn encoder(self, name: impl Into<String>, codec: impl Codec + 'static) -> Self {
        self.codec_stage(name, Box::new(codec), CodecDirection::Encode)
    }

    /// Adds the decode half of a codec as a transform stage.
    pub fn decoder(self, name: impl Into<String>, codec: impl Codec + 'static) -> Self {
        self.codec_stage(name, Box::new(codec), CodecDirection::Decode)
    }

    fn codec_stage(
        mut self,
        name: impl Into<String>,
        codec: Box<dyn Codec>,
        direction: CodecDirection,
    ) -> Self {
        self.steps.push(Step::Transform {
            name: name.into(),
            transform: Box::new(CodecStage::new(codec, direction)),
        });
        self
    }

    /// Adds a driver-drained sink stage.
    pub fn sink(
        mut self,
        name: impl Into<String>,
        driver: impl Driver + 'static,
        format: Option<StreamFormat>,
    ) -> Self {
        self.steps.push(Step::Sink {
            name: name.into(),
            driver: Box::new(driver),
            format,
        });
        self
    }

    /// Adds a sink stage drained by the application through
    /// [`Controller::read_output`].
    pub fn raw_sink(mut self, name: impl Into<String>) -> Self {
        self.steps.push(Step::RawSink { name: name.into() });
        self
    }

    /// Validates the chain, registers and links every stage, and returns a
    /// controller ready to [`start`](Controller::start).
    ///
    /// # Errors
    ///
    /// [`InvalidConfig`](PipelineError::InvalidConfig) for an invalid
    /// configuration or a chain that does not run source, transforms,
    /// sink; [`DuplicateName`](PipelineError::DuplicateName) for a reused
    /// stage name.
    pub fn build(self) -> Result<Controller, PipelineError> {
        self.config.validate()?;
        if self.steps.len() < 2 {
            return Err(PipelineError::invalid_config(
                "a chain needs at least a source and a sink",
            ));
        }
        let last = self.steps.len() - 1;
        for (pos, step) in self.steps.iter().enumerate() {
            let ok = match step {
                Step::Source { .. } | Step::RawSource { .. } => pos == 0,
                Step::Transform { .. } => pos != 0 && pos != last,
                Step::Sink { .. } | Step::RawSink { .. } => pos == last,
            };
            if !ok {
                return Err(PipelineError::invalid_config(format!(
                    "stage '{}' is out of place; a chain runs source, transforms, sink",
                    step.name()
                )));
            }
        }

        let names: Vec<String> = self.steps.iter().map(|s| s.name().to_string()).collect();
        let mut pipeline = Pipeline::new(self.config.clone())?;
        let mut input = None;
        let mut output = None;

        for step in self.steps {
            match step {
                Step::Source {
                    name,
                    driver,
                    format,
                } => pipeline.register_kind(&name, StageKind::Source(driver), format)?,
                Step::RawSource { name } => {
                    let queue = Arc::new(RingQueue::new(self.config.queue_capacity));
                    let stream = RawStream::new(name.clone(), Arc::clone(&queue));
                    input = Some(queue);
                    pipeline.register_kind(&name, StageKind::Source(Box::new(stream)), None)?;
                }
                Step::Transform { name, transform } => {
                    let format = transform.output_format();
                    pipeline.register_kind(&name, StageKind::Transform(transform), format)?
                }
                Step::Sink {
                    name,
                    driver,
                    format,
                } => pipeline.register_kind(&name, StageKind::Sink(driver), format)?,
                Step::RawSink { name } => {
                    let queue = Arc::new(RingQueue::new(self.config.queue_capacity));
                    let stream = RawStream::new(name.clone(), Arc::clone(&queue));
                    output = Some(queue);
                    pipeline.register_kind(&name, StageKind::Sink(Box::new(stream)), None)?;
                }
            }
        }

        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        pipeline.link(&name_refs)?;
        Ok(Controller::new(pipeline, input, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{IdentityCodec, MemoryDriver};

    #[tokio::test]
    async fn test_chain_requires_source_and_sink() {
        let err = PipelineBuilder::new().raw_source("in").build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_sink_must_come_last() {
        let err = PipelineBuilder::new()
            .raw_source("in")
            .raw_sink("out")
            .encoder("enc", IdentityCodec)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let err = PipelineBuilder::new()
            .raw_source("x")
            .raw_sink("x")
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn test_builds_with_endpoints() {
        let controller = PipelineBuilder::new()
            .raw_source("in")
            .encoder("enc", IdentityCodec)
            .raw_sink("out")
            .build()
            .unwrap();
        assert!(controller.has_raw_input());
        assert!(controller.has_raw_output());
    }

    #[tokio::test]
    async fn test_builds_with_drivers() {
        let controller = PipelineBuilder::new()
            .source("src", MemoryDriver::from_blocks(vec![]), None)
            .sink("out", MemoryDriver::sink(), None)
            .build()
            .unwrap();
        assert!(!controller.has_raw_input());
        assert!(!controller.has_raw_output());
    }
}
