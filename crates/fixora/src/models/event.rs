use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;
use crate::errors::ErrorKind;
use crate::providers::base::Usage;

/// One unit of the relay's output protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ToolCall {
        #[serde(rename = "callId")]
        call_id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        #[serde(rename = "callId")]
        call_id: String,
        result: Value,
    },
    Done {
        message: Message,
        usage: Usage,
        #[serde(rename = "latencyMs")]
        latency_ms: u64,
        rounds: usize,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl StreamEvent {
    pub fn text_delta<S: Into<String>>(text: S) -> Self {
        StreamEvent::TextDelta { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
