//! The pipeline: a registry of stages wired into a running chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::error::{LinkSide, PipelineError, StageError};
use crate::event::{EventBus, PipelineEvent};
use crate::format::StreamFormat;
use crate::queue::RingQueue;
use crate::stage::{
    Driver, StageKind, StageRole, StageRunner, StageShared, StageState, Transform,
};

struct StageEntry {
    shared: Arc<StageShared>,
    runner: Option<StageRunner>,
}

/// An ordered chain of stages connected by bounded ring queues.
///
/// Lifecycle: register stages, [`link`](Pipeline::link) them into a chain,
/// [`run`](Pipeline::run) to spawn one task per stage, then
/// [`stop`](Pipeline::stop), [`terminate`](Pipeline::terminate), and
/// [`deinit`](Pipeline::deinit). Most applications drive this through
/// [`PipelineBuilder`](crate::PipelineBuilder) instead.
pub struct Pipeline {
    config: PipelineConfig,
    bus: Arc<EventBus>,
    stages: Vec<StageEntry>,
    order: Vec<usize>,
    linked: bool,
    running: bool,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration is
    /// invalid.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let bus = Arc::new(EventBus::new(config.event_capacity, config.event_policy));
        Ok(Self {
            config,
            bus,
            stages: Vec::new(),
            order: Vec::new(),
            linked: false,
            running: false,
            handles: Vec::new(),
        })
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|entry| entry.shared.name() == name)
    }

    pub(crate) fn register_kind(
        &mut self,
        name: &str,
        kind: StageKind,
        format: Option<StreamFormat>,
    ) -> Result<(), PipelineError> {
        if self.find(name).is_some() {
            return Err(PipelineError::DuplicateName {
                name: name.to_string(),
            });
        }
        let shared = Arc::new(StageShared::new(
            name.to_string(),
            kind.role(),
            Arc::clone(&self.bus),
        ));
        tracing::debug!(stage = name, role = %kind.role(), "registered stage");
        self.stages.push(StageEntry {
            shared: Arc::clone(&shared),
            runner: Some(StageRunner {
                shared,
                kind,
                input: None,
                output: None,
                format,
                config: self.config.clone(),
            }),
        });
        Ok(())
    }

    /// Registers a source stage fed by `driver`.
    ///
    /// `format` is handed to the driver's `configure` and published as a
    /// format report when the stage starts.
    pub fn register_source(
        &mut self,
        name: &str,
        driver: impl Driver + 'static,
        format: Option<StreamFormat>,
    ) -> Result<(), PipelineError> {
        self.register_kind(name, StageKind::Source(Box::new(driver)), format)
    }

    /// Registers a transform stage.
    pub fn register_transform(
        &mut self,
        name: &str,
        transform: impl Transform + 'static,
    ) -> Result<(), PipelineError> {
        let format = transform.output_format();
        self.register_kind(name, StageKind::Transform(Box::new(transform)), format)
    }

    /// Registers a sink stage drained by `driver`.
    pub fn register_sink(
        &mut self,
        name: &str,
        driver: impl Driver + 'static,
        format: Option<StreamFormat>,
    ) -> Result<(), PipelineError> {
        self.register_kind(name, StageKind::Sink(Box::new(driver)), format)
    }

    /// Wires the named stages into a chain, in data-flow order.
    ///
    /// The first name must be a source, the last a sink, and everything in
    /// between a transform. Each adjacent pair gets a fresh ring queue of
    /// [`queue_capacity`](PipelineConfig::queue_capacity) bytes.
    ///
    /// # Errors
    ///
    /// [`NoStages`](PipelineError::NoStages) if nothing is registered,
    /// [`UnknownStage`](PipelineError::UnknownStage) for an unregistered
    /// name, [`AlreadyLinked`](PipelineError::AlreadyLinked) if a stage
    /// already has a queue on the required side, and
    /// [`InvalidConfig`](PipelineError::InvalidConfig) for role violations.
    pub fn link(&mut self, names: &[&str]) -> Result<(), PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        if names.len() < 2 {
            return Err(PipelineError::invalid_config(
                "a chain needs at least a source and a sink",
            ));
        }

        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let idx = self.find(name).ok_or_else(|| PipelineError::UnknownStage {
                name: name.to_string(),
            })?;
            indices.push(idx);
        }

        let last = names.len() - 1;
        for (pos, &idx) in indices.iter().enumerate() {
            let role = self.stages[idx].shared.role();
            let expected = match pos {
                0 => StageRole::Source,
                p if p == last => StageRole::Sink,
                _ => StageRole::Transform,
            };
            if role != expected {
                return Err(PipelineError::invalid_config(format!(
                    "stage '{}' is a {role}, expected a {expected} at position {pos}",
                    names[pos]
                )));
            }
        }

        for pair in indices.windows(2) {
            let (up, down) = (pair[0], pair[1]);
            let up_runner = self.stages[up]
                .runner
                .as_ref()
                .ok_or_else(|| PipelineError::invalid_config("stage task already consumed"))?;
            if up_runner.output.is_some() {
                return Err(PipelineError::AlreadyLinked {
                    name: self.stages[up].shared.name().to_string(),
                    side: LinkSide::Output,
                });
            }
            let down_runner = self.stages[down]
                .runner
                .as_ref()
                .ok_or_else(|| PipelineError::invalid_config("stage task already consumed"))?;
            if down_runner.input.is_some() {
                return Err(PipelineError::AlreadyLinked {
                    name: self.stages[down].shared.name().to_string(),
                    side: LinkSide::Input,
                });
            }

            let queue = Arc::new(RingQueue::new(self.config.queue_capacity));
            if let Some(runner) = self.stages[up].runner.as_mut() {
                runner.output = Some(Arc::clone(&queue));
            }
            if let Some(runner) = self.stages[down].runner.as_mut() {
                runner.input = Some(queue);
            }
        }

        self.order = indices;
        self.linked = true;
        tracing::info!(chain = ?names, "pipeline linked");
        Ok(())
    }

    /// Spawns one tokio task per linked stage, in data-flow order.
    ///
    /// Returns as soon as the tasks are spawned; progress and failures are
    /// reported on the event bus.
    ///
    /// # Errors
    ///
    /// [`NotLinked`](PipelineError::NotLinked) before [`link`](Self::link),
    /// [`AlreadyRunning`](PipelineError::AlreadyRunning) while running, and
    /// [`InvalidConfig`](PipelineError::InvalidConfig) if the stage tasks
    /// were already consumed by a previous run.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        if !self.linked {
            return Err(PipelineError::NotLinked);
        }
        if self.running {
            return Err(PipelineError::AlreadyRunning);
        }
        if self
            .order
            .iter()
            .any(|&idx| self.stages[idx].runner.is_none())
        {
            return Err(PipelineError::invalid_config(
                "stage tasks already consumed; build a new pipeline to run again",
            ));
        }

        for &idx in &self.order {
            if let Some(runner) = self.stages[idx].runner.take() {
                self.handles.push(tokio::spawn(runner.run()));
            }
        }
        self.running = true;
        tracing::info!(stages = self.order.len(), "pipeline running");
        Ok(())
    }

    /// Stops the chain: cancels the most upstream stage, then waits for
    /// every stage in data-flow order.
    ///
    /// Downstream stages are not cancelled; they drain whatever is still
    /// in flight and exit when their input closes, so no accepted data is
    /// dropped.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        if !self.running {
            return Err(PipelineError::NotRunning);
        }
        if let Some(&first) = self.order.first() {
            self.stages[first].shared.request_cancel();
        }
        for result in futures::future::join_all(self.handles.drain(..)).await {
            if let Err(err) = result {
                tracing::error!(error = %err, "stage task panicked");
            }
        }
        self.running = false;
        tracing::info!("pipeline stopped");
        Ok(())
    }

    /// Waits (bounded) for the most upstream stage to finish on its own.
    ///
    /// Used when the stage's input was closed externally and a graceful
    /// end-of-stream is preferred over cancellation.
    pub(crate) async fn drain_first_stage(&self, timeout: Duration) {
        let Some(&first) = self.order.first() else {
            return;
        };
        let shared = &self.stages[first].shared;
        let deadline = tokio::time::Instant::now() + timeout;
        while shared.state() != StageState::Stopped {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    stage = shared.name(),
                    "source did not drain in time, cancelling"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Moves every stopped (or never started) stage to `Terminated`.
    ///
    /// # Errors
    ///
    /// [`StillActive`](PipelineError::StillActive) while stage tasks are
    /// running; call [`stop`](Self::stop) first.
    pub async fn terminate(&mut self) -> Result<(), PipelineError> {
        if self.running {
            return Err(PipelineError::StillActive);
        }
        for entry in &self.stages {
            match entry.shared.state() {
                StageState::Init | StageState::Stopped => {
                    entry.shared.transition(StageState::Terminated).await;
                }
                StageState::Terminated => {}
                state => {
                    tracing::warn!(
                        stage = entry.shared.name(),
                        %state,
                        "terminate on a stage in an unexpected state"
                    );
                    entry.shared.transition(StageState::Terminated).await;
                }
            }
        }
        Ok(())
    }

    /// Unregisters every stage and clears the chain, returning the
    /// pipeline to its empty state.
    ///
    /// # Errors
    ///
    /// [`StillActive`](PipelineError::StillActive) while running.
    pub fn deinit(&mut self) -> Result<(), PipelineError> {
        if self.running {
            return Err(PipelineError::StillActive);
        }
        self.stages.clear();
        self.order.clear();
        self.linked = false;
        self.bus.drain();
        Ok(())
    }

    /// Pauses every stage at its next block boundary.
    pub fn pause(&self) -> Result<(), PipelineError> {
        if !self.running {
            return Err(PipelineError::NotRunning);
        }
        for entry in &self.stages {
            entry.shared.set_paused(true);
        }
        Ok(())
    }

    /// Resumes every paused stage.
    pub fn resume(&self) -> Result<(), PipelineError> {
        if !self.running {
            return Err(PipelineError::NotRunning);
        }
        for entry in &self.stages {
            entry.shared.set_paused(false);
        }
        Ok(())
    }

    /// Waits for the next pipeline event, bounded by an optional timeout.
    pub async fn listen(&self, timeout: Option<Duration>) -> Option<PipelineEvent> {
        self.bus.listen(timeout).await
    }

    /// Shared handle to the event bus.
    pub(crate) fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The first stage failure in data-flow order, if any.
    pub fn first_error(&self) -> Option<StageError> {
        self.order
            .iter()
            .find_map(|&idx| self.stages[idx].shared.error())
    }

    /// Current lifecycle state of the named stage.
    pub fn stage_state(&self, name: &str) -> Option<StageState> {
        self.find(name).map(|idx| self.stages[idx].shared.state())
    }

    /// Whether stage tasks are currently running.
    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.running {
            for entry in &self.stages {
                entry.shared.request_cancel();
            }
            for handle in self.handles.drain(..) {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, OverflowPolicy};
    use crate::stage::MemoryDriver;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            block_size: 8,
            queue_capacity: 64,
            event_capacity: 256,
            event_policy: OverflowPolicy::Block,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let mut p = Pipeline::new(test_config()).unwrap();
        p.register_source("a", MemoryDriver::from_blocks(vec![]), None)
            .unwrap();
        let err = p
            .register_sink("a", MemoryDriver::sink(), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn test_link_unknown_stage() {
        let mut p = Pipeline::new(test_config()).unwrap();
        p.register_source("src", MemoryDriver::from_blocks(vec![]), None)
            .unwrap();
        let err = p.link(&["src", "out"]).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStage { .. }));
    }

    #[tokio::test]
    async fn test_link_requires_source_first() {
        let mut p = Pipeline::new(test_config()).unwrap();
        p.register_source("src", MemoryDriver::from_blocks(vec![]), None)
            .unwrap();
        p.register_sink("out", MemoryDriver::sink(), None).unwrap();
        let err = p.link(&["out", "src"]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_relink_reports_already_linked() {
        let mut p = Pipeline::new(test_config()).unwrap();
        p.register_source("src", MemoryDriver::from_blocks(vec![]), None)
            .unwrap();
        p.register_sink("out", MemoryDriver::sink(), None).unwrap();
        p.link(&["src", "out"]).unwrap();
        let err = p.link(&["src", "out"]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AlreadyLinked {
                side: LinkSide::Output,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_run_before_link() {
        let mut p = Pipeline::new(test_config()).unwrap();
        assert!(matches!(p.run(), Err(PipelineError::NotLinked)));
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let mut p = Pipeline::new(test_config()).unwrap();
        assert!(matches!(p.stop().await, Err(PipelineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_source_to_sink_moves_every_byte() {
        let mut p = Pipeline::new(test_config()).unwrap();
        let blocks: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i; 8]).collect();
        let expected: Vec<u8> = blocks.iter().flatten().copied().collect();

        p.register_source("src", MemoryDriver::from_blocks(blocks), None)
            .unwrap();
        let sink = MemoryDriver::sink();
        let tap = sink.tap();
        p.register_sink("out", sink, None).unwrap();
        p.link(&["src", "out"]).unwrap();
        p.run().unwrap();

        // The source ends on its own; wait for the sink's StreamEnded.
        loop {
            let event = p
                .listen(Some(Duration::from_secs(2)))
                .await
                .expect("pipeline made no progress");
            if event.stage == "out" && matches!(event.kind, EventKind::StreamEnded) {
                break;
            }
        }
        p.stop().await.unwrap();
        assert_eq!(*tap.lock(), expected);
        assert!(p.first_error().is_none());
    }

    #[tokio::test]
    async fn test_terminate_requires_stop() {
        let mut p = Pipeline::new(test_config()).unwrap();
        p.register_source(
            "src",
            MemoryDriver::from_blocks(vec![vec![0; 8]; 100_000])
                .delay(Duration::from_millis(1)),
            None,
        )
        .unwrap();
        p.register_sink("out", MemoryDriver::sink(), None).unwrap();
        p.link(&["src", "out"]).unwrap();
        p.run().unwrap();

        assert!(matches!(
            p.terminate().await,
            Err(PipelineError::StillActive)
        ));

        p.stop().await.unwrap();
        p.terminate().await.unwrap();
        assert_eq!(p.stage_state("src"), Some(StageState::Terminated));
        assert_eq!(p.stage_state("out"), Some(StageState::Terminated));
        p.deinit().unwrap();
        assert!(p.stage_state("src").is_none());
    }

    #[tokio::test]
    async fn test_run_twice_rejected() {
        let mut p = Pipeline::new(test_config()).unwrap();
        p.register_source("src", MemoryDriver::from_blocks(vec![]), None)
            .unwrap();
        p.register_sink("out", MemoryDriver::sink(), None).unwrap();
        p.link(&["src", "out"]).unwrap();
        p.run().unwrap();
        assert!(matches!(p.run(), Err(PipelineError::AlreadyRunning)));
        p.stop().await.unwrap();
        // Tasks are consumed; a second run needs a new pipeline.
        assert!(matches!(p.run(), Err(PipelineError::InvalidConfig { .. })));
    }
}
