//! A framed connection that multiplexes transaction-tagged exchanges.
//!
//! Frames are CBOR under a little-endian `u32` length prefix. The write
//! half and the read half take independent locks, so one task can stream
//! outbound events while another waits on a reply. A reader that pulls a
//! frame belonging to a different transaction stashes it for the waiter
//! rather than dropping it.

use gridstore_proto::{Frame, MessageError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// Upper bound on a single frame body, in bytes.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Errors raised by framed connection I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The underlying stream failed.
    #[error("connection i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Message(#[from] MessageError),
    /// A frame exceeded [`MAX_FRAME_BYTES`].
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    /// No reply arrived for the transaction within the configured wait.
    #[error("timed out waiting for a reply to tid {tid}")]
    ReplyTimeout {
        /// The transaction that went unanswered.
        tid: u64,
    },
    /// The peer closed the stream at a frame boundary.
    #[error("connection closed by peer")]
    Closed,
}

/// One duplex stream carrying many concurrent exchanges.
pub struct Connection<S> {
    writer: Mutex<WriteHalf<S>>,
    reader: Mutex<ReadHalf<S>>,
    pending: StdMutex<HashMap<u64, VecDeque<Frame>>>,
    next_tid: AtomicU64,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Wrap a duplex stream.
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            writer: Mutex::new(write_half),
            reader: Mutex::new(read_half),
            pending: StdMutex::new(HashMap::new()),
            next_tid: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh transaction identifier.
    pub fn next_tid(&self) -> u64 {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    /// Write one frame and flush.
    ///
    /// # Errors
    ///
    /// Returns error on encode failure, oversized frames, or stream I/O.
    pub async fn send(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.send_batch(std::slice::from_ref(frame)).await
    }

    /// Write a run of frames under one writer lock, flushing once.
    ///
    /// # Errors
    ///
    /// Returns error on encode failure, oversized frames, or stream I/O.
    pub async fn send_batch(&self, frames: &[Frame]) -> Result<(), ConnectionError> {
        if frames.is_empty() {
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(frames.len());
        for frame in frames {
            let bytes = frame.to_cbor()?;
            if bytes.len() > MAX_FRAME_BYTES {
                return Err(ConnectionError::FrameTooLarge(bytes.len()));
            }
            encoded.push(bytes);
        }
        let mut writer = self.writer.lock().await;
        for bytes in &encoded {
            let len = u32::try_from(bytes.len())
                .map_err(|_| ConnectionError::FrameTooLarge(bytes.len()))?;
            writer.write_all(&len.to_le_bytes()).await?;
            writer.write_all(bytes).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Wait for the next frame carrying `tid`, stashing any others.
    ///
    /// A `wait` of `None` blocks until the frame arrives or the stream
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns error on stream failure, decode failure, or timeout.
    pub async fn recv_reply(
        &self,
        tid: u64,
        wait: Option<Duration>,
    ) -> Result<Frame, ConnectionError> {
        match wait {
            None => self.recv_for(tid).await,
            Some(wait) => tokio::time::timeout(wait, self.recv_for(tid))
                .await
                .map_err(|_| ConnectionError::ReplyTimeout { tid })?,
        }
    }

    /// Take the next frame regardless of transaction, oldest stash first.
    ///
    /// # Errors
    ///
    /// Returns error on stream failure or decode failure.
    pub async fn recv_any(&self) -> Result<Frame, ConnectionError> {
        if let Some(frame) = self.pop_any() {
            return Ok(frame);
        }
        let mut reader = self.reader.lock().await;
        if let Some(frame) = self.pop_any() {
            return Ok(frame);
        }
        Self::read_frame(&mut reader).await
    }

    async fn recv_for(&self, tid: u64) -> Result<Frame, ConnectionError> {
        loop {
            if let Some(frame) = self.pop_pending(tid) {
                return Ok(frame);
            }
            let mut reader = self.reader.lock().await;
            // Another reader may have stashed our frame while we waited
            // for the lock.
            if let Some(frame) = self.pop_pending(tid) {
                return Ok(frame);
            }
            let frame = Self::read_frame(&mut reader).await?;
            if frame.tid == tid {
                return Ok(frame);
            }
            self.stash(frame);
        }
    }

    async fn read_frame(reader: &mut ReadHalf<S>) -> Result<Frame, ConnectionError> {
        let mut len_bytes = [0u8; 4];
        if let Err(err) = reader.read_exact(&mut len_bytes).await {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(ConnectionError::Closed);
            }
            return Err(err.into());
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(ConnectionError::FrameTooLarge(len));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(Frame::from_cbor(&body)?)
    }

    fn pop_pending(&self, tid: u64) -> Option<Frame> {
        let mut pending = lock(&self.pending);
        let queue = pending.get_mut(&tid)?;
        let frame = queue.pop_front();
        if queue.is_empty() {
            pending.remove(&tid);
        }
        frame
    }

    fn pop_any(&self) -> Option<Frame> {
        let mut pending = lock(&self.pending);
        let tid = *pending.keys().next()?;
        let queue = pending.get_mut(&tid)?;
        let frame = queue.pop_front();
        if queue.is_empty() {
            pending.remove(&tid);
        }
        frame
    }

    fn stash(&self, frame: Frame) {
        lock(&self.pending)
            .entry(frame.tid)
            .or_default()
            .push_back(frame);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
