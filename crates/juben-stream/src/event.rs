//! Canonical stream events.
//!
//! Every upstream encoding is mapped onto [`StreamEvent`] by
//! [`normalize`](crate::normalize::normalize) before anything else sees it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to events and messages.
pub type Metadata = Map<String, Value>;

/// Kind of output carried by a [`SessionMessage`](crate::session::SessionMessage).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Thought,
    Action,
    #[default]
    Result,
    Error,
    Complete,
}

impl ContentType {
    /// Parse an upstream label such as `"thought"` or `"answer"`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "thought" | "thinking" => Some(Self::Thought),
            "action" | "tool_use" | "tool_call" => Some(Self::Action),
            "result" | "answer" | "message" | "content" => Some(Self::Result),
            "error" => Some(Self::Error),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Result => "result",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incremental text fragment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDelta {
    /// Text to append to the open message.
    pub text: String,
    /// Upstream message id, when the backend names one.
    pub message_id: Option<String>,
    /// Producing agent/capability, when known.
    pub agent_id: Option<String>,
    /// Declared kind of output, when known.
    pub content_type: Option<ContentType>,
    /// Structured payload (tool usage, confidence, token counts, ...).
    pub metadata: Metadata,
    /// Upstream timestamp, verbatim.
    pub timestamp: Option<String>,
}

impl ContentDelta {
    /// A bare text fragment with no ids and empty metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Metadata to shallow-merge into the open message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub message_id: Option<String>,
    pub agent_id: Option<String>,
    pub fields: Metadata,
}

/// An upstream-declared error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFault {
    pub message: String,
    pub message_id: Option<String>,
    pub agent_id: Option<String>,
}

/// Completion signal.
///
/// Without a message or agent id it ends the whole stream (`[DONE]` and its
/// upstream equivalents); with one it only seals that message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneSignal {
    pub message_id: Option<String>,
    pub agent_id: Option<String>,
}

impl DoneSignal {
    /// The stream-wide terminal signal.
    pub fn stream() -> Self {
        Self::default()
    }

    /// Returns `true` if this signal ends the session.
    pub fn is_terminal(&self) -> bool {
        self.message_id.is_none() && self.agent_id.is_none()
    }
}

/// The canonical event shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Content(ContentDelta),
    Metadata(MetadataUpdate),
    Error(StreamFault),
    Done(DoneSignal),
}

impl StreamEvent {
    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content(_) => "content",
            Self::Metadata(_) => "metadata",
            Self::Error(_) => "error",
            Self::Done(_) => "done",
        }
    }

    /// Returns `true` if the event ends the session it belongs to.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Error(_) => true,
            Self::Done(done) => done.is_terminal(),
            Self::Content(_) | Self::Metadata(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn content_type_labels() {
        assert_eq!(ContentType::from_label("thought"), Some(ContentType::Thought));
        assert_eq!(ContentType::from_label("answer"), Some(ContentType::Result));
        assert_eq!(ContentType::from_label("tool_use"), Some(ContentType::Action));
        assert_eq!(ContentType::from_label("agent_status"), None);
        assert_eq!(ContentType::Complete.to_string(), "complete");
    }

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::Done(DoneSignal::stream()).is_terminal());
        assert!(
            !StreamEvent::Done(DoneSignal {
                message_id: Some("m1".to_string()),
                agent_id: None,
            })
            .is_terminal()
        );
        assert!(StreamEvent::Error(StreamFault::default()).is_terminal());
        assert!(!StreamEvent::Content(ContentDelta::text("x")).is_terminal());
    }

    #[test]
    fn serializes_as_tagged_union() {
        let event = StreamEvent::Content(ContentDelta::text("hi"));
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], json!("content"));
        assert_eq!(value["data"]["text"], json!("hi"));
    }
}
