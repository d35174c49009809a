//! End-to-end invariants for `ProtocolCodec`, mirroring the universal
//! invariants and boundary behaviors this protocol is required to satisfy.

use async_trait::async_trait;
use goru_protocol::{GuestStdin, ProtocolCodec, Signal};
use goru_registry::{HostContext, HostFn, Registry};
use goru_types::error::EngineResult;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingStdin {
    lines: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl GuestStdin for RecordingStdin {
    async fn write_line(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.lines.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

struct DoubleIt;

#[async_trait]
impl HostFn for DoubleIt {
    async fn call(&self, _ctx: &HostContext, args: BTreeMap<String, Value>) -> EngineResult<Value> {
        let n = args.get("n").and_then(Value::as_i64).unwrap_or(0);
        Ok(json!(n * 2))
    }
}

fn test_registry() -> Registry {
    let reg = Registry::new();
    reg.register("double", Arc::new(DoubleIt));
    reg
}

fn build() -> (ProtocolCodec, Arc<RecordingStdin>, tokio::sync::mpsc::UnboundedReceiver<Signal>) {
    let stdin = Arc::new(RecordingStdin::default());
    let (codec, rx) = ProtocolCodec::new(test_registry(), "python", stdin.clone());
    (codec, stdin, rx)
}

#[tokio::test]
async fn real_stderr_bytes_are_never_lost_or_duplicated() {
    let (codec, _stdin, _rx) = build();
    let input = b"hello\nworld\n";
    codec.feed(input).await.unwrap();
    assert_eq!(codec.take_output().await, input.to_vec());
}

#[tokio::test]
async fn splitting_a_frame_across_writes_matches_one_write() {
    let (codec_whole, _s1, mut rx_whole) = build();
    let mut whole = b"before ".to_vec();
    whole.extend_from_slice(b"\x00GORU_READY\x00");
    whole.extend_from_slice(b" after");
    codec_whole.feed(&whole).await.unwrap();
    assert_eq!(rx_whole.try_recv().unwrap(), Signal::Ready);
    assert_eq!(codec_whole.take_output().await, b"before  after".to_vec());

    let (codec_split, _s2, mut rx_split) = build();
    let full = b"before \x00GORU_READY\x00 after";
    for &b in full {
        codec_split.feed(&[b]).await.unwrap();
    }
    assert_eq!(rx_split.try_recv().unwrap(), Signal::Ready);
    assert_eq!(codec_split.take_output().await, b"before  after".to_vec());
}

#[tokio::test]
async fn multiple_frames_in_one_write_are_all_processed() {
    let (codec, _stdin, mut rx) = build();
    let mut buf = Vec::new();
    buf.extend_from_slice(b"\x00GORU_READY\x00");
    buf.extend_from_slice(b"\x00GORU_DONE\x00");
    codec.feed(&buf).await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), Signal::Ready);
    assert_eq!(rx.try_recv().unwrap(), Signal::Done);
}

#[tokio::test]
async fn flush_prefix_wins_when_it_occurs_before_call_prefix() {
    // A Write containing both a Call and a Flush prefix: whichever occurs
    // at the lower byte index is processed first. Here Flush comes first.
    let (codec, stdin, _rx) = build();
    let mut buf = Vec::new();
    buf.extend_from_slice(b"\x00GORU_FLUSH:0\x00");
    buf.extend_from_slice(b"\x00GORU:{\"fn\":\"double\",\"args\":{\"n\":3}}\x00");
    codec.feed(&buf).await.unwrap();
    let lines = stdin.lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    let resp: Value = serde_json::from_slice(&lines[0]).unwrap();
    assert_eq!(resp["data"], 6);
}

#[tokio::test]
async fn sync_call_without_id_is_serviced_immediately() {
    let (codec, stdin, _rx) = build();
    let buf = frame_call(r#"{"fn":"double","args":{"n":21}}"#);
    codec.feed(&buf).await.unwrap();
    let lines = stdin.lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    let resp: Value = serde_json::from_slice(&lines[0]).unwrap();
    assert_eq!(resp["data"], 42);
    assert!(resp.get("id").is_none());
}

#[tokio::test]
async fn async_call_with_id_waits_for_flush() {
    let (codec, stdin, _rx) = build();
    codec
        .feed(&frame_call(r#"{"id":"a1","fn":"double","args":{"n":5}}"#))
        .await
        .unwrap();
    assert_eq!(stdin.lines.lock().unwrap().len(), 0, "no reply before flush");

    codec.feed(b"\x00GORU_FLUSH:1\x00").await.unwrap();
    let lines = stdin.lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    let resp: Value = serde_json::from_slice(&lines[0]).unwrap();
    assert_eq!(resp["id"], "a1");
    assert_eq!(resp["data"], 10);
}

#[tokio::test]
async fn flush_takes_min_of_count_and_pending_len() {
    let (codec, stdin, _rx) = build();
    for i in 0..3 {
        codec
            .feed(&frame_call(&format!(
                r#"{{"id":"c{i}","fn":"double","args":{{"n":{i}}}}}"#
            )))
            .await
            .unwrap();
    }
    codec.feed(b"\x00GORU_FLUSH:10\x00").await.unwrap();
    assert_eq!(stdin.lines.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_function_yields_named_error() {
    let (codec, stdin, _rx) = build();
    codec
        .feed(&frame_call(r#"{"fn":"not_registered","args":{}}"#))
        .await
        .unwrap();
    let lines = stdin.lines.lock().unwrap();
    let resp: Value = serde_json::from_slice(&lines[0]).unwrap();
    assert_eq!(resp["error"], "unknown function: not_registered");
}

#[tokio::test]
async fn error_signal_carries_message() {
    let (codec, _stdin, mut rx) = build();
    let mut buf = b"\x00GORU_ERROR:".to_vec();
    buf.extend_from_slice(b"boom");
    buf.push(0);
    codec.feed(&buf).await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), Signal::Error("boom".to_string()));
}

#[tokio::test]
async fn begin_call_clears_output_and_abandoned_pending_queue() {
    let (codec, stdin, _rx) = build();
    codec.feed(b"stray diagnostics").await.unwrap();
    codec
        .feed(&frame_call(r#"{"id":"orphan","fn":"double","args":{"n":1}}"#))
        .await
        .unwrap();
    codec.begin_call().await;
    assert_eq!(codec.take_output().await, Vec::<u8>::new());
    // The orphaned async request must not produce a reply on a later flush.
    codec.feed(b"\x00GORU_FLUSH:5\x00").await.unwrap();
    assert_eq!(stdin.lines.lock().unwrap().len(), 0);
}

fn frame_call(json: &str) -> Vec<u8> {
    let mut buf = b"\x00GORU:".to_vec();
    buf.extend_from_slice(json.as_bytes());
    buf.push(0);
    buf
}
