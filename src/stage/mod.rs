//! Stage lifecycle, roles, and per-role processing loops.
//!
//! A stage is one link in the chain: a source pulls blocks from a
//! [`Driver`], a transform rewrites blocks in flight, and a sink pushes
//! blocks back out through a [`Driver`]. Each running stage owns one tokio
//! task; stages share nothing but their ring queues and the event bus.
//!
//! Every stage walks the same state machine and emits an event for every
//! transition:
//!
//! ```text
//! Init -> Running <-> Paused
//!            |
//!            v
//!        Stopping -> Stopped -> Terminated
//! ```

mod codec;
mod driver;

pub use codec::{Codec, CodecDirection, CodecStage, IdentityCodec};
pub use driver::{Driver, MemoryDriver, RawStream};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::event::{EventBus, EventKind, PipelineEvent};
use crate::format::StreamFormat;
use crate::queue::RingQueue;

/// What a stage does in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    /// Produces blocks from a driver; first in the chain.
    Source,
    /// Rewrites blocks in flight; anywhere in the middle.
    Transform,
    /// Consumes blocks through a driver; last in the chain.
    Sink,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRole::Source => write!(f, "source"),
            StageRole::Transform => write!(f, "transform"),
            StageRole::Sink => write!(f, "sink"),
        }
    }
}

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Registered, task not yet started.
    Init,
    /// Processing loop is active.
    Running,
    /// Loop is idle at a block boundary, waiting for resume.
    Paused,
    /// Loop has exited; the stage is winding down.
    Stopping,
    /// Task finished, queues closed.
    Stopped,
    /// Resources released; the stage will never run again.
    Terminated,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::Init => write!(f, "init"),
            StageState::Running => write!(f, "running"),
            StageState::Paused => write!(f, "paused"),
            StageState::Stopping => write!(f, "stopping"),
            StageState::Stopped => write!(f, "stopped"),
            StageState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A block rewriter placed between a source and a sink.
///
/// Transforms are byte-in/byte-out: a block goes in, zero or more bytes
/// come out. A transform that changes the stream format reports the new
/// format via [`output_format`](Transform::output_format); it is published
/// on the event bus when the stage starts.
#[async_trait]
pub trait Transform: Send {
    /// Short name used in logs and events.
    fn name(&self) -> &str;

    /// Processes one block. An empty return is valid (the transform is
    /// buffering); an error stops the stage.
    async fn process(&mut self, input: &[u8]) -> Result<Vec<u8>, StageError>;

    /// The format this transform produces, if it changes the stream.
    fn output_format(&self) -> Option<StreamFormat> {
        None
    }
}

/// The role-specific payload of a stage.
pub(crate) enum StageKind {
    Source(Box<dyn Driver>),
    Transform(Box<dyn Transform>),
    Sink(Box<dyn Driver>),
}

impl StageKind {
    pub(crate) fn role(&self) -> StageRole {
        match self {
            StageKind::Source(_) => StageRole::Source,
            StageKind::Transform(_) => StageRole::Transform,
            StageKind::Sink(_) => StageRole::Sink,
        }
    }
}

/// State shared between a stage's task and the pipeline that owns it.
pub(crate) struct StageShared {
    name: String,
    role: StageRole,
    state: parking_lot::Mutex<StageState>,
    cancelled: AtomicBool,
    paused: AtomicBool,
    resume: tokio::sync::Notify,
    error: parking_lot::Mutex<Option<StageError>>,
    bus: Arc<EventBus>,
}

impl StageShared {
    pub(crate) fn new(name: String, role: StageRole, bus: Arc<EventBus>) -> Self {
        Self {
            name,
            role,
            state: parking_lot::Mutex::new(StageState::Init),
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            resume: tokio::sync::Notify::new(),
            error: parking_lot::Mutex::new(None),
            bus,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn role(&self) -> StageRole {
        self.role
    }

    pub(crate) fn state(&self) -> StageState {
        *self.state.lock()
    }

    pub(crate) fn error(&self) -> Option<StageError> {
        self.error.lock().clone()
    }

    fn set_error(&self, err: StageError) {
        *self.error.lock() = Some(err);
    }

    /// Moves to `to` and publishes the transition. No-op if already there.
    pub(crate) async fn transition(&self, to: StageState) {
        let from = {
            let mut state = self.state.lock();
            let from = *state;
            if from == to {
                return;
            }
            *state = to;
            from
        };
        tracing::debug!(stage = %self.name, %from, %to, "state transition");
        self.publish(EventKind::StateChanged { from, to }).await;
    }

    async fn publish(&self, kind: EventKind) {
        self.bus
            .publish(PipelineEvent {
                stage: self.name.clone(),
                kind,
            })
            .await;
    }

    /// Asks the stage's loop to exit at the next block boundary.
    pub(crate) fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        if !paused {
            self.resume.notify_waiters();
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Everything a stage's task needs; consumed by [`StageRunner::run`].
pub(crate) struct StageRunner {
    pub(crate) shared: Arc<StageShared>,
    pub(crate) kind: StageKind,
    pub(crate) input: Option<Arc<RingQueue>>,
    pub(crate) output: Option<Arc<RingQueue>>,
    pub(crate) format: Option<StreamFormat>,
    pub(crate) config: PipelineConfig,
}

impl StageRunner {
    /// Drives the stage from `Running` to `Stopped`.
    ///
    /// Whatever happens inside the loop, on the way out the stage closes
    /// both its queues so neighbors unblock, records and publishes any
    /// failure, and lands in `Stopped`.
    pub(crate) async fn run(mut self) {
        self.shared.transition(StageState::Running).await;
        if let Some(format) = self.format {
            self.shared.publish(EventKind::FormatReport(format)).await;
        }

        let result = self.work().await;
        self.shared.transition(StageState::Stopping).await;

        if let Err(ref err) = result {
            if !err.is_end_of_stream() {
                tracing::error!(stage = %self.shared.name(), error = %err, "stage failed");
                self.shared.set_error(err.clone());
                self.shared.publish(EventKind::Error(err.clone())).await;
            }
        }

        if let Some(queue) = &self.input {
            queue.close();
        }
        if let Some(queue) = &self.output {
            queue.close();
        }

        if let StageKind::Source(driver) | StageKind::Sink(driver) = &mut self.kind {
            if let Err(err) = driver.on_stop().await {
                tracing::warn!(stage = %self.shared.name(), error = %err, "driver on_stop failed");
            }
        }

        self.shared.transition(StageState::Stopped).await;
    }

    async fn work(&mut self) -> Result<(), StageError> {
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let input = self.input.clone();
        let output = self.output.clone();
        let format = self.format;

        match &mut self.kind {
            StageKind::Source(driver) => {
                let output = output.ok_or_else(|| StageError::driver("source is not linked"))?;
                if let Some(format) = format {
                    driver.configure(format).await?;
                }
                driver.on_start().await?;
                source_loop(&shared, driver.as_mut(), &output, &config).await
            }
            StageKind::Transform(transform) => {
                let input = input.ok_or_else(|| StageError::driver("transform is not linked"))?;
                let output =
                    output.ok_or_else(|| StageError::driver("transform is not linked"))?;
                transform_loop(&shared, transform.as_mut(), &input, &output, &config).await
            }
            StageKind::Sink(driver) => {
                let input = input.ok_or_else(|| StageError::driver("sink is not linked"))?;
                if let Some(format) = format {
                    driver.configure(format).await?;
                }
                driver.on_start().await?;
                sink_loop(&shared, driver.as_mut(), &input, &config).await
            }
        }
    }
}

/// Parks the loop at a block boundary while the stage is paused.
async fn wait_if_paused(shared: &StageShared) {
    if !shared.is_paused() {
        return;
    }
    shared.transition(StageState::Paused).await;
    loop {
        let notified = shared.resume.notified();
        if !shared.is_paused() || shared.is_cancelled() {
            break;
        }
        notified.await;
    }
    if !shared.is_cancelled() {
        shared.transition(StageState::Running).await;
    }
}

async fn source_loop(
    shared: &StageShared,
    driver: &mut dyn Driver,
    output: &RingQueue,
    config: &PipelineConfig,
) -> Result<(), StageError> {
    let mut buf = vec![0u8; config.block_size];
    let mut consecutive_timeouts: u32 = 0;
    loop {
        if shared.is_cancelled() {
            return Ok(());
        }
        wait_if_paused(shared).await;
        if shared.is_cancelled() {
            return Ok(());
        }

        match driver.read(&mut buf, config.read_timeout).await {
            Ok(0) => {
                shared.publish(EventKind::StreamEnded).await;
                return Ok(());
            }
            Ok(n) => {
                consecutive_timeouts = 0;
                let pushed = output.push_all(&buf[..n], config.queue_timeout).await;
                if pushed < n {
                    if output.is_closed() || shared.is_cancelled() {
                        return Ok(());
                    }
                    return Err(StageError::Timeout);
                }
            }
            // A read timeout usually means "no data yet"; retry within
            // the configured budget.
            Err(StageError::Timeout) => {
                consecutive_timeouts += 1;
                if let Some(budget) = config.read_retry_budget {
                    if consecutive_timeouts >= budget {
                        return Err(StageError::Timeout);
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn transform_loop(
    shared: &StageShared,
    transform: &mut dyn Transform,
    input: &RingQueue,
    output: &RingQueue,
    config: &PipelineConfig,
) -> Result<(), StageError> {
    let mut buf = vec![0u8; config.block_size];
    loop {
        if shared.is_cancelled() {
            return Ok(());
        }
        wait_if_paused(shared).await;
        if shared.is_cancelled() {
            return Ok(());
        }

        let n = input.pop(&mut buf, config.queue_timeout).await;
        if n == 0 {
            if input.is_closed() {
                shared.publish(EventKind::StreamEnded).await;
                return Ok(());
            }
            if shared.is_cancelled() {
                return Ok(());
            }
            // A queue timeout here means a stuck neighbor, not "no data
            // yet"; it is always fatal.
            return Err(StageError::Timeout);
        }

        let out = transform.process(&buf[..n]).await?;
        if out.is_empty() {
            continue;
        }
        let pushed = output.push_all(&out, config.queue_timeout).await;
        if pushed < out.len() {
            if output.is_closed() || shared.is_cancelled() {
                return Ok(());
            }
            return Err(StageError::Timeout);
        }
    }
}

async fn sink_loop(
    shared: &StageShared,
    driver: &mut dyn Driver,
    input: &RingQueue,
    config: &PipelineConfig,
) -> Result<(), StageError> {
    let mut buf = vec![0u8; config.block_size];
    loop {
        if shared.is_cancelled() {
            return Ok(());
        }
        wait_if_paused(shared).await;
        if shared.is_cancelled() {
            return Ok(());
        }

        let n = input.pop(&mut buf, config.queue_timeout).await;
        if n == 0 {
            if input.is_closed() {
                shared.publish(EventKind::StreamEnded).await;
                return Ok(());
            }
            if shared.is_cancelled() {
                return Ok(());
            }
            return Err(StageError::Timeout);
        }

        let mut written = 0;
        while written < n {
            match driver.write(&buf[written..n], config.write_timeout).await {
                Ok(0) => return Err(StageError::Timeout),
                Ok(w) => written += w,
                Err(err) if err.is_end_of_stream() => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}
