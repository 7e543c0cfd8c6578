//! Session wire protocol.
//!
//! Every frame is a JSON object with a `"type"` discriminator. Inbound, only
//! `run` is meaningful; everything else is ignored. Outbound messages are
//! `ready`, `update`, `rejected` and exactly one terminal `done` or `error`.
//!
//! Buffers travel as Node-style `{"type":"Buffer","data":[...]}` objects; a
//! bare byte array is accepted inbound as well.

use bytes::Bytes;
use ffstage_core::progress::ProgressUpdate;
use ffstage_core::template::InputBuffer;
use ffstage_core::transcode::TranscodeJob;
use serde::{Deserialize, Serialize};

/// Inbound message type that starts a job.
pub const MSG_TYPE_RUN: &str = "run";

/// Tag carried by Node-style buffer objects.
pub const NODE_BUFFER_TAG: &str = "Buffer";

/// Byte buffer in Node's JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBuffer {
    #[serde(rename = "type", default = "node_buffer_tag")]
    pub kind: String,
    pub data: Vec<u8>,
}

fn node_buffer_tag() -> String {
    NODE_BUFFER_TAG.to_string()
}

impl From<&[u8]> for NodeBuffer {
    fn from(data: &[u8]) -> Self {
        Self {
            kind: node_buffer_tag(),
            data: data.to_vec(),
        }
    }
}

/// Any inbound buffer encoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireBuffer {
    Node(NodeBuffer),
    Raw(Vec<u8>),
}

impl WireBuffer {
    pub fn into_bytes(self) -> Bytes {
        match self {
            WireBuffer::Node(buffer) => Bytes::from(buffer.data),
            WireBuffer::Raw(data) => Bytes::from(data),
        }
    }
}

/// Payload of a `run` message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Argument template (`$BUFn`, `$PRESET`, `$OUT` placeholders).
    pub args: String,
    /// `[buffer, original filename]` pairs.
    pub buffers: Vec<(WireBuffer, String)>,
    #[serde(default)]
    pub out_ext: Option<String>,
    #[serde(default)]
    pub enable_update_streaming: Option<bool>,
    #[serde(default)]
    pub expected_result_length_frames: Option<f64>,
}

impl RunRequest {
    pub fn into_job(self) -> TranscodeJob {
        TranscodeJob {
            template: self.args,
            inputs: self
                .buffers
                .into_iter()
                .map(|(buffer, filename)| InputBuffer::new(buffer.into_bytes(), filename))
                .collect(),
            out_ext: self.out_ext,
            stream_updates: self.enable_update_streaming.unwrap_or(false),
            expected_frames: self.expected_result_length_frames.unwrap_or(1.0),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug)]
pub enum ClientMessage {
    Run(Box<RunRequest>),
    /// Any other message type; carries the type for logging.
    Ignored(Option<String>),
}

/// Error for a `run` message whose payload does not decode.
#[derive(Debug, thiserror::Error)]
#[error("malformed run message: {0}")]
pub struct ProtocolError(#[from] serde_json::Error);

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Decode an inbound frame.
///
/// Non-JSON text and unknown types are [`ClientMessage::Ignored`]; only a
/// `run` message with a bad payload is an error.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let kind = match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => envelope.kind,
        Err(_) => return Ok(ClientMessage::Ignored(None)),
    };
    if kind.as_deref() != Some(MSG_TYPE_RUN) {
        return Ok(ClientMessage::Ignored(kind));
    }
    let request: RunRequest = serde_json::from_str(text)?;
    Ok(ClientMessage::Run(Box::new(request)))
}

/// Outbound frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent once, immediately after the connection opens.
    Ready,
    Update { update: ProgressUpdate },
    /// A second `run` arrived while a job was in flight. Not terminal.
    Rejected { detail: String },
    /// Terminal: the tool succeeded.
    Done { buffer: NodeBuffer },
    /// Terminal: the job failed.
    Error { detail: String },
}

impl ServerMessage {
    pub fn done(output: &[u8]) -> Self {
        ServerMessage::Done {
            buffer: NodeBuffer::from(output),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::Done { .. } | ServerMessage::Error { .. })
    }

    pub fn to_json(&self) -> String {
        // Serializing these shapes cannot fail: no maps with non-string
        // keys and no non-finite floats reach here unchecked.
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize session message");
            r#"{"type":"error","detail":"failed to serialize message"}"#.to_string()
        })
    }
}
