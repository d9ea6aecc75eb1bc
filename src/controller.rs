//! Application-facing handle for a built pipeline.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, StageError};
use crate::event::PipelineEvent;
use crate::pipeline::Pipeline;
use crate::queue::RingQueue;
use crate::stage::StageState;

/// What a stopped run left behind.
#[derive(Debug)]
pub struct StopReport {
    /// The first stage failure in data-flow order, if any stage failed.
    pub error: Option<StageError>,
}

impl StopReport {
    /// `true` if every stage stopped without a fault.
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Owns a linked pipeline and its raw endpoints.
///
/// Returned by [`PipelineBuilder::build`](crate::PipelineBuilder::build).
/// A controller runs the chain once: [`start`](Controller::start), feed
/// and drain the raw endpoints (or let the drivers do the work), then
/// [`stop`](Controller::stop). Dropping the controller cancels anything
/// still running.
pub struct Controller {
    pipeline: Pipeline,
    input: Option<Arc<RingQueue>>,
    output: Option<Arc<RingQueue>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("has_input", &self.input.is_some())
            .field("has_output", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub(crate) fn new(
        pipeline: Pipeline,
        input: Option<Arc<RingQueue>>,
        output: Option<Arc<RingQueue>>,
    ) -> Self {
        Self {
            pipeline,
            input,
            output,
        }
    }

    /// Spawns the stage tasks.
    ///
    /// # Errors
    ///
    /// [`AlreadyRunning`](PipelineError::AlreadyRunning) if called twice,
    /// and [`InvalidConfig`](PipelineError::InvalidConfig) after a
    /// completed run; a controller runs its chain once.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.pipeline.run()
    }

    /// Stops the chain and reports how it went.
    ///
    /// Closes the raw input first so the source sees end-of-stream, then
    /// cancels and joins the stages upstream-first. Everything already
    /// accepted into a queue is drained downstream before the tasks exit.
    /// Finishes by terminating the stages.
    ///
    /// # Errors
    ///
    /// [`NotRunning`](PipelineError::NotRunning) if the chain was never
    /// started or already stopped.
    pub async fn stop(&mut self) -> Result<StopReport, PipelineError> {
        if !self.pipeline.is_running() {
            return Err(PipelineError::NotRunning);
        }
        if let Some(input) = &self.input {
            input.close();
            // Let the source drain what the application already wrote
            // before cancellation kicks in.
            self.pipeline.drain_first_stage(Duration::from_secs(1)).await;
        }
        self.pipeline.stop().await?;
        self.pipeline.terminate().await?;
        Ok(StopReport {
            error: self.pipeline.first_error(),
        })
    }

    /// Pauses every stage at its next block boundary.
    pub fn pause(&self) -> Result<(), PipelineError> {
        self.pipeline.pause()
    }

    /// Resumes every paused stage.
    pub fn resume(&self) -> Result<(), PipelineError> {
        self.pipeline.resume()
    }

    /// Waits for the next pipeline event, bounded by an optional timeout.
    ///
    /// `None` timeout waits forever; `None` return means the timeout
    /// elapsed with no event.
    pub async fn wait_event(&self, timeout: Option<Duration>) -> Option<PipelineEvent> {
        self.pipeline.listen(timeout).await
    }

    /// Feeds bytes into the raw source endpoint.
    ///
    /// Blocks while the pipeline's first queue is full; returns the number
    /// of bytes accepted, which is short only if the timeout elapsed or
    /// the pipeline shut down mid-write.
    ///
    /// # Errors
    ///
    /// [`NoRawInput`](PipelineError::NoRawInput) if the chain was not
    /// built with [`raw_source`](crate::PipelineBuilder::raw_source).
    pub async fn write_input(
        &self,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, PipelineError> {
        let input = self.input.as_ref().ok_or(PipelineError::NoRawInput)?;
        Ok(input.push_all(data, timeout).await)
    }

    /// Reads processed bytes from the raw sink endpoint.
    ///
    /// Returns 0 on timeout, or once the pipeline has shut down and the
    /// endpoint is fully drained.
    ///
    /// # Errors
    ///
    /// [`NoRawOutput`](PipelineError::NoRawOutput) if the chain was not
    /// built with [`raw_sink`](crate::PipelineBuilder::raw_sink).
    pub async fn read_output(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, PipelineError> {
        let output = self.output.as_ref().ok_or(PipelineError::NoRawOutput)?;
        Ok(output.pop(buf, timeout).await)
    }

    /// `true` once [`read_output`](Self::read_output) can never return
    /// more data.
    pub fn output_finished(&self) -> bool {
        match &self.output {
            Some(output) => output.is_closed() && output.is_empty(),
            None => true,
        }
    }

    /// Whether stage tasks are currently running.
    pub fn is_running(&self) -> bool {
        self.pipeline.is_running()
    }

    /// Current lifecycle state of the named stage.
    pub fn stage_state(&self, name: &str) -> Option<StageState> {
        self.pipeline.stage_state(name)
    }

    /// The first stage failure in data-flow order, if any.
    pub fn first_error(&self) -> Option<StageError> {
        self.pipeline.first_error()
    }

    /// Whether the chain has a raw input endpoint.
    pub fn has_raw_input(&self) -> bool {
        self.input.is_some()
    }

    /// Whether the chain has a raw output endpoint.
    pub fn has_raw_output(&self) -> bool {
        self.output.is_some()
    }
}
