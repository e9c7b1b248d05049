//! Thread/task-safe outbound frame shuttle (spec.md §4.2).
//!
//! The server never needs to correlate inbound frames to outstanding
//! calls — only the client does that — so `Demux` only needs to
//! serialize outbound sends. The request handler reads frames directly
//! off the socket's read half; `Demux` wraps the write half so that
//! both the handler and any background get-when waiter can send a
//! reply tagged for a request that arrived earlier on a different task.

use crate::error::{KvError, Result};
use crate::proto::frame::write_frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

struct Inner {
    writer: AsyncMutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

/// Cheap-to-clone handle; every clone shares the same underlying writer
/// and closed flag.
#[derive(Clone)]
pub struct Demux {
    inner: Arc<Inner>,
}

impl Demux {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer: AsyncMutex::new(writer),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Sends one frame. Safe to call concurrently from multiple tasks;
    /// the internal mutex guarantees payload bytes are never interleaved.
    pub async fn send(&self, tag: i32, ty: i16, payload: &[u8]) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        let mut writer = self.inner.writer.lock().await;
        let result = write_frame_impl(&mut *writer, tag, ty, payload).await;
        if result.is_err() {
            self.inner.closed.store(true, Ordering::Release);
        }
        result
    }

    /// Idempotent; subsequent sends observe the flag and fail cleanly.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

async fn write_frame_impl<W>(writer: &mut W, tag: i32, ty: i16, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, tag, ty, payload).await
}
