//! Bounded byte ring connecting adjacent pipeline stages.
//!
//! The ring queue is the sole backpressure mechanism in the pipeline: a
//! producer that outruns its consumer blocks inside [`RingQueue::push`]
//! until space frees up, bounding memory with no unbounded growth. Closing
//! the queue wakes every blocked caller; readers then drain whatever is
//! left before seeing the end-of-stream signal.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A fixed-capacity, closeable FIFO of raw sample bytes.
///
/// Both `push` and `pop` block (asynchronously) with an optional timeout;
/// `None` means wait forever. Returns of `0` signal timeout, or - for `pop`
/// once the queue is closed and drained - end-of-stream. Callers
/// disambiguate via [`is_closed`](RingQueue::is_closed).
pub struct RingQueue {
    inner: Mutex<Inner>,
    readable: Notify,
    writable: Notify,
    capacity: usize,
}

struct Inner {
    buf: Box<[u8]>,
    read: usize,
    len: usize,
    closed: bool,
}

impl Inner {
    /// Copies as much of `data` as fits, returning the count written.
    fn write(&mut self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let n = (cap - self.len).min(data.len());
        let start = (self.read + self.len) % cap;
        let first = n.min(cap - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.len += n;
        n
    }

    /// Copies up to `out.len()` unread bytes into `out`.
    fn read(&mut self, out: &mut [u8]) -> usize {
        let cap = self.buf.len();
        let n = self.len.min(out.len());
        let first = n.min(cap - self.read);
        out[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.read = (self.read + n) % cap;
        self.len -= n;
        n
    }
}

/// Awaits a notification, bounded by an optional deadline.
///
/// Returns `false` if the deadline elapsed first.
async fn wait(notified: impl Future<Output = ()>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(d) => tokio::time::timeout_at(d, notified).await.is_ok(),
        None => {
            notified.await;
            true
        }
    }
}

impl RingQueue {
    /// Creates a queue with the given capacity in bytes.
    ///
    /// Capacity is fixed for the queue's lifetime and should hold at least
    /// one full stage block.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0u8; capacity].into_boxed_slice(),
                read: 0,
                len: 0,
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            capacity,
        }
    }

    /// Returns the fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of unread bytes currently buffered.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns `true` if no unread bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Closes the queue, waking all blocked callers.
    ///
    /// Idempotent. Subsequent pushes return 0 immediately; pops drain any
    /// remaining bytes before reporting end-of-stream.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Writes up to `data.len()` bytes, blocking until at least one byte
    /// fits, the queue closes, or the timeout elapses.
    ///
    /// Returns the number of bytes written: 0 on timeout or closed queue.
    /// Never overwrites unread data.
    pub async fn push(&self, data: &[u8], timeout: Option<Duration>) -> usize {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.push_deadline(data, deadline).await
    }

    /// Writes all of `data`, blocking as needed, under a single deadline.
    ///
    /// Returns the total bytes written, which is less than `data.len()`
    /// only if the queue closed or the deadline elapsed mid-write.
    pub async fn push_all(&self, data: &[u8], timeout: Option<Duration>) -> usize {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut written = 0;
        while written < data.len() {
            let n = self.push_deadline(&data[written..], deadline).await;
            if n == 0 {
                break;
            }
            written += n;
        }
        written
    }

    async fn push_deadline(&self, data: &[u8], deadline: Option<Instant>) -> usize {
        if data.is_empty() {
            return 0;
        }
        loop {
            let notified = self.writable.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return 0;
                }
                if inner.len < self.capacity {
                    let n = inner.write(data);
                    drop(inner);
                    self.readable.notify_waiters();
                    return n;
                }
            }
            if !wait(notified, deadline).await {
                return 0;
            }
        }
    }

    /// Reads up to `buf.len()` bytes, blocking until data is available, the
    /// queue closes, or the timeout elapses.
    ///
    /// Returns the number of bytes read. 0 means timeout, or - if
    /// [`is_closed`](Self::is_closed) - that the queue is closed and fully
    /// drained (end-of-stream).
    pub async fn pop(&self, buf: &mut [u8], timeout: Option<Duration>) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.readable.notified();
            {
                let mut inner = self.inner.lock();
                if inner.len > 0 {
                    let n = inner.read(buf);
                    drop(inner);
                    self.writable.notify_waiters();
                    return n;
                }
                if inner.closed {
                    return 0;
                }
            }
            if !wait(notified, deadline).await {
                return 0;
            }
        }
    }
}
