//! Message envelope flowing between pipeline steps.
//!
//! Every step consumes and produces `Message` values. The payload variant is
//! decided once at the boundary (transport, ASR client, ...) so handlers match
//! on a tagged enum instead of re-inspecting raw data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute key carrying the originating client/session identifier.
///
/// Steps that merely forward a message must propagate this unchanged; only the
/// transport step at the boundary may remap it.
pub const ATTR_SESSION_ID: &str = "session_id";

/// Attribute key tagging which fan-out branch a duplicated copy belongs to.
pub const ATTR_BRANCH_INDEX: &str = "branch_index";

/// Attribute key carrying the unix timestamp at which a copy was duplicated.
pub const ATTR_DUPLICATED_AT: &str = "duplicated_at";

/// Kind of a message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Regular payload-bearing message.
    Data,
    /// Error produced by a step; carries the step name and description.
    Error,
    /// In-band control signal (end of stream, reset, ...).
    Control,
}

/// Typed payload variants.
///
/// Audio bytes are shared behind an `Arc` so fan-out duplication never copies
/// sample data; the bytes are treated as immutable downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No payload (control signals).
    Empty,
    /// A text chunk (transcription fragment, LLM token, sentence).
    Text(String),
    /// A chunk of encoded audio.
    Audio(AudioChunk),
    /// Structured data that does not warrant its own variant.
    Json(Value),
}

/// A chunk of audio samples with its format description.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Encoded sample bytes, shared immutably between fan-out branches.
    pub bytes: Arc<[u8]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Sample encoding name (e.g. "pcm16").
    pub format: String,
}

impl AudioChunk {
    pub fn new(bytes: impl Into<Arc<[u8]>>, sample_rate: u32, format: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            sample_rate,
            format: format.into(),
        }
    }
}

/// Control signals understood by the shipped steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// The upstream producer finished its current stream.
    EndOfStream,
    /// Downstream state (accumulators, history) should be cleared.
    Reset,
}

/// The envelope exchanged between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Payload,
    /// String-keyed metadata; cloned per fan-out branch so mutation by one
    /// downstream consumer is never visible to another.
    pub attributes: BTreeMap<String, Value>,
}

impl Message {
    /// Creates a data message with a text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Data,
            payload: Payload::Text(text.into()),
            attributes: BTreeMap::new(),
        }
    }

    /// Creates a data message with an audio payload.
    pub fn audio(chunk: AudioChunk) -> Self {
        Self {
            kind: MessageKind::Data,
            payload: Payload::Audio(chunk),
            attributes: BTreeMap::new(),
        }
    }

    /// Creates a data message with a JSON payload.
    pub fn json(value: Value) -> Self {
        Self {
            kind: MessageKind::Data,
            payload: Payload::Json(value),
            attributes: BTreeMap::new(),
        }
    }

    /// Creates a control message.
    pub fn control(signal: ControlSignal) -> Self {
        let value = serde_json::to_value(signal).unwrap_or(Value::Null);
        Self {
            kind: MessageKind::Control,
            payload: Payload::Json(value),
            attributes: BTreeMap::new(),
        }
    }

    /// Creates an error message attributed to a step.
    pub fn error(step_name: &str, description: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            payload: Payload::Json(serde_json::json!({
                "step": step_name,
                "error": description.into(),
            })),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds or replaces an attribute, builder-style.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the session identifier attribute, builder-style.
    pub fn with_session(self, session_id: impl Into<String>) -> Self {
        self.with_attr(ATTR_SESSION_ID, session_id.into())
    }

    /// Returns the session identifier attribute, if present.
    pub fn session_id(&self) -> Option<&str> {
        self.attributes.get(ATTR_SESSION_ID).and_then(Value::as_str)
    }

    /// Returns the fan-out branch index, if this is a duplicated copy.
    pub fn branch_index(&self) -> Option<u64> {
        self.attributes.get(ATTR_BRANCH_INDEX).and_then(Value::as_u64)
    }

    /// Returns the control signal carried by a control message.
    pub fn control_signal(&self) -> Option<ControlSignal> {
        if self.kind != MessageKind::Control {
            return None;
        }
        match &self.payload {
            Payload::Json(value) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Produces an independent copy for one fan-out branch.
    ///
    /// The payload reference is shared (payloads are immutable downstream);
    /// the attribute map is a fresh copy carrying the branch tag, so branch
    /// metadata never leaks between destinations.
    pub fn duplicate_for_branch(&self, branch_index: usize) -> Self {
        let mut copy = self.clone();
        copy.attributes
            .insert(ATTR_BRANCH_INDEX.to_string(), Value::from(branch_index as u64));
        copy.attributes
            .insert(ATTR_DUPLICATED_AT.to_string(), Value::from(unix_now()));
        copy
    }
}

/// Seconds since the unix epoch as a float, matching the wire timestamps used
/// by the transport collaborators.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message() {
        let msg = Message::text("hello").with_session("s1");
        assert_eq!(msg.kind, MessageKind::Data);
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.session_id(), Some("s1"));
        assert_eq!(msg.branch_index(), None);
    }

    #[test]
    fn test_control_signal_round_trip() {
        let msg = Message::control(ControlSignal::EndOfStream);
        assert_eq!(msg.kind, MessageKind::Control);
        assert_eq!(msg.control_signal(), Some(ControlSignal::EndOfStream));

        // Data messages never report a control signal
        let data = Message::text("x");
        assert_eq!(data.control_signal(), None);
    }

    #[test]
    fn test_error_message_carries_step_name() {
        let msg = Message::error("asr", "connection lost");
        assert_eq!(msg.kind, MessageKind::Error);
        match &msg.payload {
            Payload::Json(v) => {
                assert_eq!(v["step"], "asr");
                assert_eq!(v["error"], "connection lost");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_for_branch_isolates_attributes() {
        let original = Message::text("x").with_session("s1");

        let mut branch0 = original.duplicate_for_branch(0);
        let branch1 = original.duplicate_for_branch(1);

        assert_eq!(branch0.branch_index(), Some(0));
        assert_eq!(branch1.branch_index(), Some(1));
        assert_eq!(branch0.session_id(), Some("s1"));
        assert_eq!(branch1.session_id(), Some("s1"));

        // Mutating one copy's attributes must not affect the other
        branch0
            .attributes
            .insert("consumed".to_string(), Value::from(true));
        assert!(!branch1.attributes.contains_key("consumed"));
        assert!(!original.attributes.contains_key("consumed"));
        assert!(original.branch_index().is_none());
    }

    #[test]
    fn test_audio_payload_shares_bytes() {
        let chunk = AudioChunk::new(vec![1u8, 2, 3], 24000, "pcm16");
        let msg = Message::audio(chunk);
        let copy = msg.duplicate_for_branch(0);

        match (&msg.payload, &copy.payload) {
            (Payload::Audio(a), Payload::Audio(b)) => {
                assert!(Arc::ptr_eq(&a.bytes, &b.bytes));
            }
            other => panic!("unexpected payloads: {other:?}"),
        }
    }
}
