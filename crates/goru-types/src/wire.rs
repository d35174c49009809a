//! Wire envelope carried over the protocol codec's Call frames.
//!
//! Modeled on the request/response envelope shape used elsewhere in this
//! codebase for framed JSON messages, simplified to the two fields the
//! host-call bridge actually needs: an optional correlation `id` (its
//! presence is what makes a call asynchronous) and the method name/args.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A host-call request extracted from a Call frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Present for batched-async calls; absent for synchronous calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the registered host function.
    #[serde(rename = "fn")]
    pub function: String,
    /// Arguments, keyed by parameter name.
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

/// The reply written back to guest stdin for a [`CallRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    /// Echoes the request's `id`, if it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Present on failure; mutually exclusive with `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallResponse {
    /// Build a successful response.
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            id,
            data: Some(data),
            error: None,
        }
    }

    /// Build an error response.
    pub fn err(id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// A command frame written to guest stdin: `{type, code?, repl?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandFrame {
    /// Execute `code` in the session's persistent namespace.
    Exec {
        /// Source code to evaluate.
        code: String,
        /// Echo the trailing expression's value as `_` when set.
        #[serde(default)]
        repl: bool,
        /// Reserved for future wire-format revisions; not echoed by the
        /// scalar `DONE`/`ERROR` signals. A session only ever has one call
        /// in flight at a time, so nothing currently needs to correlate.
        #[serde(default)]
        seq: u64,
    },
    /// Ask whether `code` parses as a complete statement block.
    Check {
        /// Source code to parse-check.
        code: String,
        /// Reserved for future wire-format revisions; see [`CommandFrame::Exec::seq`].
        #[serde(default)]
        seq: u64,
    },
    /// Tell the guest's read-loop to terminate.
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_round_trips_without_id() {
        let json = r#"{"fn":"time_now","args":{}}"#;
        let req: CallRequest = serde_json::from_str(json).unwrap();
        assert!(req.id.is_none());
        assert_eq!(req.function, "time_now");
    }

    #[test]
    fn call_response_omits_absent_fields() {
        let resp = CallResponse::ok(None, serde_json::json!(42));
        let s = serde_json::to_string(&resp).unwrap();
        assert!(!s.contains("\"id\""));
        assert!(!s.contains("\"error\""));
    }

    #[test]
    fn command_frame_exec_tags_type() {
        let frame = CommandFrame::Exec {
            code: "1+1".into(),
            repl: true,
            seq: 7,
        };
        let s = serde_json::to_string(&frame).unwrap();
        assert!(s.contains("\"type\":\"exec\""));
        assert!(s.contains("\"repl\":true"));
    }
}
