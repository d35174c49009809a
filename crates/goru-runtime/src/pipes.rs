//! Host-owned duplex stdio for a guest instance.
//!
//! The teacher's WASM guests talk to the host over a hand-rolled
//! `host_call`/`alloc`/`execute` ABI (see `sandbox.rs`). This engine
//! instead gives the guest real WASI stdio and layers the protocol on
//! top, so the pipes below have to support something the wasmtime-wasi
//! test suite's own `Buffer` does not: a stdin the host keeps writing to
//! *while* the guest is still reading (for session mode, where commands
//! arrive one at a time over many iterations of the guest's read loop),
//! and stdout/stderr the host drains continuously rather than into one
//! static buffer. `GuestStdin` (bytes written by `feed`) and the
//! `wasmtime_wasi::p2::StdinStream`/`StdoutStream` impls below share
//! that shape, grounded on `crates/wasi/tests/all/piped.rs`'s
//! `Buffer`/`ReadStream`/`WriteStream` split between a host-visible cell
//! and the `Subscribe`-polled stream wasmtime drives.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use wasmtime_wasi::p2::{
    HostInputStream, HostOutputStream, StdinStream, StdoutStream, StreamResult, Subscribe,
};

struct InputInner {
    chunks: VecDeque<Bytes>,
    closed: bool,
}

/// Host side of the guest's stdin: `write` queues bytes for the guest to
/// read; `close` signals EOF once no more commands will arrive.
#[derive(Clone)]
pub struct GuestStdinPipe {
    inner: Arc<Mutex<InputInner>>,
    notify: Arc<Notify>,
}

impl GuestStdinPipe {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InputInner {
                chunks: VecDeque::new(),
                closed: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn write(&self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.inner.lock().unwrap().chunks.push_back(bytes);
        self.notify.notify_waiters();
    }

    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    fn read_ready(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.chunks.is_empty() || inner.closed
    }
}

impl Default for GuestStdinPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinStream for GuestStdinPipe {
    fn stream(&self) -> Box<dyn HostInputStream> {
        Box::new(self.clone())
    }

    fn isatty(&self) -> bool {
        false
    }
}

#[async_trait]
impl Subscribe for GuestStdinPipe {
    async fn ready(&mut self) {
        while !self.read_ready() {
            self.notify.notified().await;
        }
    }
}

impl HostInputStream for GuestStdinPipe {
    fn read(&mut self, size: usize) -> StreamResult<Bytes> {
        let mut inner = self.inner.lock().unwrap();
        let Some(front) = inner.chunks.front_mut() else {
            return if inner.closed {
                Err(wasmtime_wasi::p2::StreamError::Closed)
            } else {
                Ok(Bytes::new())
            };
        };
        if front.len() <= size {
            Ok(inner.chunks.pop_front().unwrap())
        } else {
            Ok(front.split_to(size))
        }
    }
}

/// Bridges the host→guest direction for [`goru_protocol::ProtocolCodec`]:
/// writing a host-call reply just queues it for the guest's stdin read.
#[async_trait]
impl goru_protocol::GuestStdin for GuestStdinPipe {
    async fn write_line(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut line = bytes.to_vec();
        line.push(b'\n');
        self.write(line);
        Ok(())
    }
}

/// Host side of the guest's stdout or stderr: every write the guest
/// performs is forwarded whole, in order, to an unbounded channel the
/// host drains on its own task. The host never backpressures the guest —
/// frames are small and the host reads continuously.
#[derive(Clone)]
pub struct CapturedOutputPipe {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl CapturedOutputPipe {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StdoutStream for CapturedOutputPipe {
    fn stream(&self) -> Box<dyn HostOutputStream> {
        Box::new(self.clone())
    }

    fn isatty(&self) -> bool {
        false
    }
}

#[async_trait]
impl Subscribe for CapturedOutputPipe {
    async fn ready(&mut self) {}
}

impl HostOutputStream for CapturedOutputPipe {
    fn write(&mut self, bytes: Bytes) -> StreamResult<()> {
        let _ = self.tx.send(bytes);
        Ok(())
    }

    fn flush(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn check_write(&mut self) -> StreamResult<usize> {
        Ok(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdin_read_returns_written_bytes() {
        let pipe = GuestStdinPipe::new();
        pipe.write(Bytes::from_static(b"hello"));
        let mut stream = pipe.clone();
        assert_eq!(stream.read(5).unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn stdin_read_partial_leaves_remainder() {
        let pipe = GuestStdinPipe::new();
        pipe.write(Bytes::from_static(b"hello"));
        let mut stream = pipe.clone();
        assert_eq!(stream.read(2).unwrap(), Bytes::from_static(b"he"));
        assert_eq!(stream.read(3).unwrap(), Bytes::from_static(b"llo"));
    }

    #[tokio::test]
    async fn stdin_read_empty_when_no_data_queued() {
        let pipe = GuestStdinPipe::new();
        let mut stream = pipe.clone();
        assert_eq!(stream.read(5).unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn stdout_writes_forward_to_receiver_in_order() {
        let (pipe, mut rx) = CapturedOutputPipe::new();
        let mut stream = pipe.clone();
        stream.write(Bytes::from_static(b"a")).unwrap();
        stream.write(Bytes::from_static(b"b")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }
}
