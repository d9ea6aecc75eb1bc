//! Configuration types for pipelines.

use std::time::Duration;

use crate::error::PipelineError;
use crate::event::OverflowPolicy;

/// Configuration for pipeline behavior.
///
/// Use [`PipelineConfig::default()`] for sensible defaults, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use audio_pipeline::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig {
///     block_size: 2048,
///     read_timeout: Some(Duration::from_millis(50)),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Size in bytes of one processing block.
    ///
    /// Stages pull and push data in units of at most one block.
    /// Default: 1024 (512 mono 16-bit frames)
    pub block_size: usize,

    /// Capacity in bytes of each ring queue between adjacent stages.
    ///
    /// Must hold at least one full block; size it to absorb the jitter
    /// between the slowest and fastest adjacent stage. A producer that
    /// outruns its consumer blocks on push - this is the sole backpressure
    /// mechanism. Default: 8192
    pub queue_capacity: usize,

    /// Capacity of the event bus in events.
    ///
    /// Default: 64
    pub event_capacity: usize,

    /// What the event bus does when full.
    ///
    /// Default: [`OverflowPolicy::DropOldest`], so an event storm can never
    /// stall a stage's data path.
    pub event_policy: OverflowPolicy,

    /// Timeout for a source stage's driver read.
    ///
    /// `None` means wait forever; this is a deliberate configuration, not
    /// the default, and makes `stop()` latency unbounded for driver-fed
    /// sources. Default: 100ms
    pub read_timeout: Option<Duration>,

    /// Timeout for a sink stage's driver write.
    ///
    /// Default: 1s
    pub write_timeout: Option<Duration>,

    /// Timeout for transform-stage queue operations.
    ///
    /// A transform that hits this timeout fails fatally, since it indicates
    /// a stuck neighbor rather than a transient stall. `None` (the default)
    /// waits forever and lets backpressure do its job.
    pub queue_timeout: Option<Duration>,

    /// Consecutive source read timeouts tolerated before the stage fails.
    ///
    /// A source read timeout usually means "no data yet" (e.g. a raw source
    /// waiting on network input) and is retried. `None` (the default)
    /// retries indefinitely; `Some(n)` fails the stage after `n`
    /// consecutive timeouts.
    pub read_retry_budget: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            queue_capacity: 8 * 1024,
            event_capacity: 64,
            event_policy: OverflowPolicy::DropOldest,
            read_timeout: Some(Duration::from_millis(100)),
            write_timeout: Some(Duration::from_secs(1)),
            queue_timeout: None,
            read_retry_budget: None,
        }
    }
}

impl PipelineConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if any size is zero or the
    /// queue cannot hold one full block.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.block_size == 0 {
            return Err(PipelineError::invalid_config("block_size is zero"));
        }
        if self.queue_capacity < self.block_size {
            return Err(PipelineError::invalid_config(format!(
                "queue_capacity ({}) is smaller than block_size ({})",
                self.queue_capacity, self.block_size
            )));
        }
        if self.event_capacity == 0 {
            return Err(PipelineError::invalid_config("event_capacity is zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.queue_capacity, 8 * 1024);
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.event_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(100)));
        assert_eq!(config.queue_timeout, None);
        assert_eq!(config.read_retry_budget, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let config = PipelineConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_queue_smaller_than_block_rejected() {
        let config = PipelineConfig {
            block_size: 4096,
            queue_capacity: 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_zero_event_capacity_rejected() {
        let config = PipelineConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }
}
