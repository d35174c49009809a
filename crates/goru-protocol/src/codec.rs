//! The protocol codec: a `Write`-like sink that separates a guest's real
//! stderr bytes from framed host calls and session signals.

use crate::frame::{self, Frame, Match};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use goru_registry::{HostContext, Registry};
use goru_types::error::EngineResult;
use goru_types::wire::{CallRequest, CallResponse};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Abstraction over "write bytes to the guest's stdin pipe", implemented
/// by the WASM runtime container's stdin pipe. Kept separate from the
/// parser lock: the codec must release its parser mutex before writing a
/// reply, since a guest that is itself mid-write to stderr must not be
/// able to deadlock against a host holding both locks.
#[async_trait]
pub trait GuestStdin: Send + Sync {
    /// Write `bytes` followed by a newline to the guest's stdin.
    async fn write_line(&self, bytes: &[u8]) -> std::io::Result<()>;
}

/// Session-control and parse-check signals observed on the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The guest's session read-loop is ready for the first command.
    Ready,
    /// The current call completed successfully.
    Done,
    /// The current call completed with an error.
    Error(String),
    /// `check_complete` found the code complete.
    Complete,
    /// `check_complete` found the code incomplete.
    Incomplete,
}

struct CodecState {
    /// Bytes carried forward because they might be the start of a frame
    /// that spans a `feed` boundary.
    carry: Vec<u8>,
    /// Async call requests queued by the guest, waiting for a Flush.
    pending_async: VecDeque<CallRequest>,
    /// Real (non-framed) stderr bytes accumulated for the current call.
    output: Vec<u8>,
}

/// Parses the in-band framing on a guest's stderr stream, servicing host
/// calls via `registry` and forwarding real diagnostic bytes to an
/// accumulator the caller can drain after each call.
pub struct ProtocolCodec {
    state: Mutex<CodecState>,
    stdin: Mutex<Arc<dyn GuestStdin>>,
    registry: Registry,
    adapter: String,
    signal_tx: mpsc::UnboundedSender<Signal>,
}

impl ProtocolCodec {
    /// Build a new codec bound to `stdin` and `registry`. Returns the
    /// codec and the receiving half of its signal channel.
    pub fn new(
        registry: Registry,
        adapter: impl Into<String>,
        stdin: Arc<dyn GuestStdin>,
    ) -> (Self, mpsc::UnboundedReceiver<Signal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let codec = Self {
            state: Mutex::new(CodecState {
                carry: Vec::new(),
                pending_async: VecDeque::new(),
                output: Vec::new(),
            }),
            stdin: Mutex::new(stdin),
            registry,
            adapter: adapter.into(),
            signal_tx,
        };
        (codec, signal_rx)
    }

    /// Reset per-call state ahead of issuing a new command to a session.
    /// Drops any abandoned async queue from a prior call and clears the
    /// output accumulator so `take_output` reflects only this call.
    pub async fn begin_call(&self) {
        let mut state = self.state.lock().await;
        state.pending_async.clear();
        state.output.clear();
    }

    /// Drain the real-stderr bytes accumulated since the last
    /// `begin_call` (or since construction, for a one-shot run).
    pub async fn take_output(&self) -> Vec<u8> {
        let mut state = self.state.lock().await;
        std::mem::take(&mut state.output)
    }

    /// Feed a chunk of bytes read from the guest's stderr pipe. Every
    /// input byte either ends up in the output accumulator or is consumed
    /// as part of a recognized frame; none are lost or double-counted,
    /// and a frame split across two `feed` calls behaves identically to
    /// one delivered whole.
    pub async fn feed(&self, chunk: &[u8]) -> EngineResult<()> {
        let mut buf = {
            let mut state = self.state.lock().await;
            let mut buf = std::mem::take(&mut state.carry);
            buf.extend_from_slice(chunk);
            buf
        };

        let mut cursor = 0usize;
        let mut literal_start = 0usize;

        loop {
            let Some(nul_pos) = buf[cursor..].iter().position(|&b| b == 0).map(|p| p + cursor)
            else {
                // No more candidate frame starts in the residual buffer.
                break;
            };

            match frame::match_at(&buf, nul_pos) {
                Match::Literal => {
                    cursor = nul_pos + 1;
                }
                Match::NeedMoreData => {
                    // Flush literal bytes before the ambiguous tail, then
                    // carry the rest forward for the next feed().
                    self.flush_literal(&buf[literal_start..nul_pos]).await;
                    let mut state = self.state.lock().await;
                    state.carry = buf[nul_pos..].to_vec();
                    return Ok(());
                }
                Match::Complete { frame, consumed } => {
                    self.flush_literal(&buf[literal_start..nul_pos]).await;
                    self.handle_frame(frame).await?;
                    cursor = nul_pos + consumed;
                    literal_start = cursor;
                }
            }
        }

        self.flush_literal(&buf[literal_start..]).await;
        Ok(())
    }

    async fn flush_literal(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        state.output.extend_from_slice(bytes);
    }

    async fn handle_frame(&self, frame: Frame) -> EngineResult<()> {
        match frame {
            Frame::Call(payload) => self.handle_call(&payload).await,
            Frame::Flush(payload) => self.handle_flush(&payload).await,
            Frame::Ready => self.emit(Signal::Ready),
            Frame::Done => self.emit(Signal::Done),
            Frame::Error(payload) => {
                let msg = String::from_utf8_lossy(&payload).into_owned();
                self.emit(Signal::Error(msg))
            }
            Frame::Complete => self.emit(Signal::Complete),
            Frame::Incomplete => self.emit(Signal::Incomplete),
        }
        Ok(())
    }

    fn emit(&self, signal: Signal) {
        // A closed receiver (session already torn down) just means the
        // signal has no one to observe it; not a protocol error.
        let _ = self.signal_tx.send(signal);
    }

    async fn handle_call(&self, payload: &[u8]) -> EngineResult<()> {
        let request: CallRequest = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed Call frame payload, dropping");
                return Ok(());
            }
        };
        if request.id.is_some() {
            let mut state = self.state.lock().await;
            state.pending_async.push_back(request);
            return Ok(());
        }
        let response = self.dispatch(request).await;
        self.write_response(&response).await;
        Ok(())
    }

    async fn handle_flush(&self, payload: &[u8]) -> EngineResult<()> {
        let count: usize = match std::str::from_utf8(payload).ok().and_then(|s| s.trim().parse().ok()) {
            Some(n) => n,
            None => {
                warn!("malformed Flush count, treating as 0");
                0
            }
        };

        let batch = {
            let mut state = self.state.lock().await;
            let n = count.min(state.pending_async.len());
            state.pending_async.drain(..n).collect::<Vec<_>>()
        };

        let mut in_flight = FuturesUnordered::new();
        for request in batch {
            let registry = self.registry.clone();
            let adapter = self.adapter.clone();
            in_flight.push(async move { dispatch_with(&registry, &adapter, request).await });
        }
        while let Some(response) = in_flight.next().await {
            self.write_response(&response).await;
        }
        Ok(())
    }

    async fn dispatch(&self, request: CallRequest) -> CallResponse {
        dispatch_with(&self.registry, &self.adapter, request).await
    }

    async fn write_response(&self, response: &CallResponse) {
        let bytes = match serde_json::to_vec(response) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize CallResponse");
                return;
            }
        };
        let stdin = self.stdin.lock().await;
        if let Err(e) = stdin.write_line(&bytes).await {
            debug!(error = %e, "failed writing host-call reply to guest stdin");
        }
    }
}

async fn dispatch_with(registry: &Registry, adapter: &str, request: CallRequest) -> CallResponse {
    let id = request.id.clone();
    match registry.get(&request.function) {
        Some(handler) => {
            let ctx = HostContext {
                call_id: id.clone(),
                adapter: adapter.to_string(),
            };
            match handler.call(&ctx, request.args).await {
                Ok(value) => CallResponse::ok(id, value),
                Err(e) => CallResponse::err(id, e.to_string()),
            }
        }
        None => CallResponse::err(id, format!("unknown function: {}", request.function)),
    }
}
