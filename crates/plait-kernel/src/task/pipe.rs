//! Bounded duplex byte pipes backing the task fd slots.
//!
//! Each direction is a ring buffer with OS-pipe semantics: the writer
//! blocks when the buffer is full, the reader blocks when it is empty,
//! closing an end signals EOF to the peer's reader and broken-pipe to the
//! peer's writer. A duplex pair is two rings crossed, so either end can
//! both read and write.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use plait_types::{FileInfo, FsError, FsResult};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::ctx::OpCtx;
use crate::service::{File, FileService, ServiceCaps};

/// Per-direction buffer capacity (matches the usual kernel pipe default).
pub const PIPE_CAPACITY: usize = 64 * 1024;

struct HalfState {
    buf: VecDeque<u8>,
    capacity: usize,
    /// The writing side has closed: readers drain and then see EOF.
    write_closed: bool,
    /// The reading side has closed: writers get broken-pipe.
    read_closed: bool,
}

/// One direction of flow.
struct Half {
    state: Mutex<HalfState>,
    notify: Notify,
}

fn half(capacity: usize) -> Arc<Half> {
    Arc::new(Half {
        state: Mutex::new(HalfState {
            buf: VecDeque::new(),
            capacity,
            write_closed: false,
            read_closed: false,
        }),
        notify: Notify::new(),
    })
}

/// One end of a duplex pipe: reads from one ring, writes to the other.
pub struct PipeEnd {
    rx: Arc<Half>,
    tx: Arc<Half>,
}

/// Create a connected pair of pipe ends.
pub fn duplex(capacity: usize) -> (PipeEnd, PipeEnd) {
    let a = half(capacity);
    let b = half(capacity);
    (
        PipeEnd {
            rx: Arc::clone(&a),
            tx: Arc::clone(&b),
        },
        PipeEnd { rx: b, tx: a },
    )
}

impl PipeEnd {
    /// Read available bytes, waiting if the buffer is empty. `Ok(0)` means
    /// the peer closed its writing side.
    pub async fn read_bytes(&self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut state = self.rx.state.lock().await;
                if !state.buf.is_empty() {
                    let n = buf.len().min(state.buf.len());
                    for (i, byte) in state.buf.drain(..n).enumerate() {
                        buf[i] = byte;
                    }
                    drop(state);
                    // Space freed: wake a blocked writer.
                    self.rx.notify.notify_one();
                    return Ok(n);
                }
                if state.write_closed {
                    return Ok(0);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(FsError::cancelled("read", "pipe")),
                _ = self.rx.notify.notified() => {}
            }
        }
    }

    /// Write all of `data`, waiting for buffer space (backpressure).
    pub async fn write_bytes(&self, data: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        let mut written = 0;
        while written < data.len() {
            {
                let mut state = self.tx.state.lock().await;
                if state.read_closed {
                    return Err(FsError::io("write", "pipe", "pipe reader closed"));
                }
                if state.write_closed {
                    return Err(FsError::io("write", "pipe", "pipe closed"));
                }
                let available = state.capacity.saturating_sub(state.buf.len());
                if available > 0 {
                    let n = available.min(data.len() - written);
                    state.buf.extend(&data[written..written + n]);
                    written += n;
                    drop(state);
                    // Data arrived: wake a blocked reader.
                    self.tx.notify.notify_one();
                    continue;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(FsError::cancelled("write", "pipe")),
                _ = self.tx.notify.notified() => {}
            }
        }
        Ok(written)
    }

    /// Close both directions of this end. The peer's reader sees EOF after
    /// draining; the peer's writer gets broken-pipe.
    pub async fn close(&self) {
        {
            let mut state = self.tx.state.lock().await;
            state.write_closed = true;
        }
        self.tx.notify.notify_waiters();
        {
            let mut state = self.rx.state.lock().await;
            state.read_closed = true;
        }
        self.rx.notify.notify_waiters();
    }
}

/// A pipe end exposed as a file service; mounted at `fd/0..2` on a task.
pub struct FdFile {
    name: String,
    end: Arc<PipeEnd>,
}

impl FdFile {
    pub fn new(name: impl Into<String>, end: PipeEnd) -> Self {
        Self {
            name: name.into(),
            end: Arc::new(end),
        }
    }

    /// Shut the underlying pipe down. Handles stay open but read EOF /
    /// broken-pipe from here on.
    pub async fn close_pipe(&self) {
        self.end.close().await;
    }
}

#[async_trait]
impl FileService for FdFile {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            stat: true,
            ..Default::default()
        }
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name != "." {
            return Err(FsError::not_exist("open", name));
        }
        Ok(Box::new(FdHandle {
            name: self.name.clone(),
            end: Arc::clone(&self.end),
            cancel: ctx.cancel_token().clone(),
        }))
    }

    async fn stat(&self, name: &str, _ctx: &OpCtx) -> FsResult<FileInfo> {
        if name != "." {
            return Err(FsError::not_exist("stat", name));
        }
        Ok(FileInfo::file(&self.name, 0).with_perm(0o666))
    }
}

/// Handle over a pipe end. Closing the handle does not close the pipe —
/// the pipe belongs to the task and dies with it.
struct FdHandle {
    name: String,
    end: Arc<PipeEnd>,
    cancel: CancellationToken,
}

#[async_trait]
impl File for FdHandle {
    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.end.read_bytes(buf, &self.cancel).await
    }

    async fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        self.end.write_bytes(data, &self.cancel).await
    }

    async fn stat(&self) -> FsResult<FileInfo> {
        Ok(FileInfo::file(&self.name, 0).with_perm(0o666))
    }
}
