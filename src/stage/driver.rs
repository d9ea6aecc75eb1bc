//! The hardware seam: drivers feed sources and drain sinks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StageError;
use crate::format::StreamFormat;
use crate::queue::RingQueue;

/// External I/O endpoint backing a source or sink stage.
///
/// A source stage calls [`read`](Driver::read) in a loop; a sink stage
/// calls [`write`](Driver::write). Implement whichever direction the
/// driver supports; the defaults reject the other. `read` returning
/// `Ok(0)` signals natural end-of-stream, while a timeout with no data is
/// `Err(StageError::Timeout)` and is retried by the source loop.
#[async_trait]
pub trait Driver: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Applies the stream format before the stage starts reading or
    /// writing. Drivers that don't care accept anything.
    async fn configure(&mut self, format: StreamFormat) -> Result<(), StageError> {
        let _ = format;
        Ok(())
    }

    /// Called once when the stage's task starts, before the first block.
    async fn on_start(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Called once while the stage winds down, after its queues close.
    async fn on_stop(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Fills `buf` with up to `buf.len()` bytes.
    ///
    /// `Ok(0)` means end-of-stream; `Err(Timeout)` means no data yet.
    async fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, StageError> {
        let _ = (buf, timeout);
        Err(StageError::driver("driver is write-only"))
    }

    /// Writes up to `data.len()` bytes, returning the count accepted.
    ///
    /// `Ok(0)` means the deadline elapsed with nothing accepted.
    async fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<usize, StageError> {
        let _ = (data, timeout);
        Err(StageError::driver("driver is read-only"))
    }
}

/// Queue-backed driver exposing a pipeline end as a raw byte stream.
///
/// As a source driver it pops bytes the application wrote via
/// `Controller::write_input`; as a sink driver it pushes bytes the
/// application pops via `Controller::read_output`. Closing the underlying
/// queue is the end-of-stream signal in both directions.
pub struct RawStream {
    name: String,
    queue: Arc<RingQueue>,
}

impl RawStream {
    /// Wraps `queue` as a driver with the given name.
    pub fn new(name: impl Into<String>, queue: Arc<RingQueue>) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }
}

#[async_trait]
impl Driver for RawStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, StageError> {
        let n = self.queue.pop(buf, timeout).await;
        if n > 0 {
            Ok(n)
        } else if self.queue.is_closed() {
            Ok(0)
        } else {
            Err(StageError::Timeout)
        }
    }

    async fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<usize, StageError> {
        let n = self.queue.push(data, timeout).await;
        if n > 0 {
            Ok(n)
        } else if self.queue.is_closed() {
            // The reader went away; not a fault.
            Err(StageError::Closed)
        } else {
            Ok(0)
        }
    }

    async fn on_stop(&mut self) -> Result<(), StageError> {
        self.queue.close();
        Ok(())
    }
}

/// In-memory driver for tests and offline processing.
///
/// As a source it replays a fixed list of blocks, then reports
/// end-of-stream. As a sink it appends everything written to a shared tap.
/// `fail_read_after(n)` injects a driver fault on read `n`, and `delay(d)`
/// paces reads to simulate real capture timing.
pub struct MemoryDriver {
    name: String,
    blocks: VecDeque<Vec<u8>>,
    tap: Arc<parking_lot::Mutex<Vec<u8>>>,
    fail_read_after: Option<usize>,
    reads: usize,
    delay: Option<Duration>,
}

impl MemoryDriver {
    /// A source driver that replays `blocks` in order.
    pub fn from_blocks(blocks: Vec<Vec<u8>>) -> Self {
        Self {
            name: "memory".to_string(),
            blocks: blocks.into(),
            tap: Arc::new(parking_lot::Mutex::new(Vec::new())),
            fail_read_after: None,
            reads: 0,
            delay: None,
        }
    }

    /// A source driver that replays 16-bit samples as one block per chunk
    /// of `frames_per_block` frames.
    pub fn from_samples(samples: &[i16], frames_per_block: usize) -> Self {
        let blocks = samples
            .chunks(frames_per_block)
            .map(crate::format::samples_to_bytes)
            .collect();
        Self::from_blocks(blocks)
    }

    /// A sink driver that accepts everything into its tap.
    pub fn sink() -> Self {
        Self::from_blocks(Vec::new())
    }

    /// Fails with a driver error on read number `n` (1-based).
    pub fn fail_read_after(mut self, n: usize) -> Self {
        self.fail_read_after = Some(n);
        self
    }

    /// Sleeps `d` before each read.
    pub fn delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Shared handle to everything written to this driver.
    pub fn tap(&self) -> Arc<parking_lot::Mutex<Vec<u8>>> {
        Arc::clone(&self.tap)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> Result<usize, StageError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.reads += 1;
        if let Some(n) = self.fail_read_after {
            if self.reads > n {
                return Err(StageError::driver("injected read fault"));
            }
        }
        match self.blocks.pop_front() {
            Some(block) => {
                let n = block.len().min(buf.len());
                buf[..n].copy_from_slice(&block[..n]);
                // A block larger than the read buffer keeps its tail.
                if n < block.len() {
                    self.blocks.push_front(block[n..].to_vec());
                }
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn write(&mut self, data: &[u8], _timeout: Option<Duration>) -> Result<usize, StageError> {
        self.tap.lock().extend_from_slice(data);
        Ok(data.len())
    }
}
