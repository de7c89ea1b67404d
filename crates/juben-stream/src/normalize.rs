//! Mapping of heterogeneous upstream payloads onto [`StreamEvent`].
//!
//! Three payload shapes are recognized, first match wins:
//!
//! 1. typed: `{"event_type": "message", "data": "partial text", ...}`
//! 2. canonical: `{"type": "content", "data": {"content": "...", "metadata": {...}}}`
//! 3. bare: `{"content": "..."}` (or `message` / `thought` / `answer`), or a JSON string
//!
//! Payloads that are not JSON at all become a content event carrying the raw
//! text. Normalization never fails.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    decode::Frame,
    event::{
        ContentDelta, ContentType, DoneSignal, Metadata, MetadataUpdate, StreamEvent, StreamFault,
    },
};

const TEXT_KEYS: [&str; 4] = ["content", "message", "thought", "answer"];
const MESSAGE_ID_KEYS: [&str; 3] = ["message_id", "messageId", "id"];
const AGENT_ID_KEYS: [&str; 4] = ["agent_id", "agentId", "agent_type", "agentType"];
const CONTENT_TYPE_KEYS: [&str; 2] = ["content_type", "contentType"];
const CANONICAL_KINDS: [&str; 5] = ["content", "metadata", "error", "done", "complete"];

/// Normalize a decoded frame. `[DONE]` maps straight to the terminal signal.
pub fn normalize_frame(frame: &Frame) -> StreamEvent {
    match frame {
        Frame::Done => StreamEvent::Done(DoneSignal::stream()),
        Frame::Data(payload) => normalize(payload),
    }
}

/// Normalize one frame payload.
pub fn normalize(raw: &str) -> StreamEvent {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, len = raw.len(), "Malformed frame payload, forwarding as text");
            return StreamEvent::Content(ContentDelta::text(raw));
        }
    };

    match value {
        Value::Object(obj) => normalize_object(obj, raw),
        Value::String(text) => StreamEvent::Content(ContentDelta::text(text)),
        other => {
            debug!(kind = json_kind(&other), "Non-object payload, forwarding as text");
            StreamEvent::Content(ContentDelta::text(raw))
        }
    }
}

fn normalize_object(obj: Map<String, Value>, raw: &str) -> StreamEvent {
    if let Some(event_type) = obj.get("event_type").and_then(Value::as_str) {
        let event_type = event_type.to_string();
        let kind = if event_type == "message" {
            "content"
        } else {
            event_type.as_str()
        };
        return from_envelope(kind, obj);
    }

    if let Some(kind) = obj.get("type").and_then(Value::as_str)
        && (obj.contains_key("data") || CANONICAL_KINDS.contains(&kind))
    {
        let kind = kind.to_string();
        return from_envelope(&kind, obj);
    }

    from_bare(obj, raw)
}

/// Shapes 1 and 2: an envelope naming its kind, with the payload under `data`.
fn from_envelope(kind: &str, mut envelope: Map<String, Value>) -> StreamEvent {
    let data = envelope.remove("data").unwrap_or(Value::Null);
    let data_obj = data.as_object();

    let message_id = data_obj
        .and_then(|d| first_str(d, &MESSAGE_ID_KEYS))
        .or_else(|| first_str(&envelope, &MESSAGE_ID_KEYS));
    let agent_id = data_obj
        .and_then(|d| first_str(d, &AGENT_ID_KEYS))
        .or_else(|| first_str(&envelope, &AGENT_ID_KEYS));

    match kind {
        "content" => {
            let text = match &data {
                Value::String(text) => Some(text.clone()),
                Value::Object(d) => first_str(d, &TEXT_KEYS),
                _ => None,
            }
            .or_else(|| first_str(&envelope, &TEXT_KEYS))
            .unwrap_or_default();

            StreamEvent::Content(ContentDelta {
                text,
                message_id,
                agent_id,
                content_type: data_obj
                    .and_then(content_type_of)
                    .or_else(|| content_type_of(&envelope)),
                metadata: merged_metadata(&envelope, data_obj),
                timestamp: first_str(&envelope, &["timestamp"]),
            })
        }
        "metadata" => {
            let fields = match data {
                Value::Object(d) => d,
                _ => object_at(&envelope, "metadata"),
            };
            StreamEvent::Metadata(MetadataUpdate {
                message_id,
                agent_id,
                fields,
            })
        }
        "error" => {
            let message = match &data {
                Value::String(text) => Some(text.clone()),
                Value::Object(d) => first_str(d, &["message", "error", "detail"]),
                _ => None,
            }
            .or_else(|| first_str(&envelope, &["message", "error"]))
            .unwrap_or_else(|| "stream error".to_string());

            StreamEvent::Error(StreamFault {
                message,
                message_id,
                agent_id,
            })
        }
        "done" | "complete" => StreamEvent::Done(DoneSignal {
            message_id,
            agent_id,
        }),
        other => passthrough(other, data, envelope, message_id, agent_id),
    }
}

/// A named kind outside the canonical set (`thought`, `agent_status`, ...).
///
/// Kinds that carry text become content tagged with the original kind; the
/// rest are forwarded as metadata so nothing is dropped.
fn passthrough(
    kind: &str,
    data: Value,
    envelope: Map<String, Value>,
    message_id: Option<String>,
    agent_id: Option<String>,
) -> StreamEvent {
    let data_obj = data.as_object();
    let text = match &data {
        Value::String(text) => Some(text.clone()),
        Value::Object(d) => first_str(d, &TEXT_KEYS),
        _ => None,
    }
    .or_else(|| first_str(&envelope, &TEXT_KEYS));

    let mut metadata = merged_metadata(&envelope, data_obj);
    metadata.insert("event_type".to_string(), Value::String(kind.to_string()));

    match text {
        Some(text) => StreamEvent::Content(ContentDelta {
            text,
            message_id,
            agent_id,
            content_type: ContentType::from_label(kind)
                .or_else(|| data_obj.and_then(content_type_of)),
            metadata,
            timestamp: first_str(&envelope, &["timestamp"]),
        }),
        None => {
            if let Some(d) = data_obj {
                for (key, value) in d {
                    metadata.insert(key.clone(), value.clone());
                }
            }
            StreamEvent::Metadata(MetadataUpdate {
                message_id,
                agent_id,
                fields: metadata,
            })
        }
    }
}

/// Shape 3: directly usable text fields with no envelope.
fn from_bare(obj: Map<String, Value>, raw: &str) -> StreamEvent {
    let Some((key, text)) = TEXT_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str).map(|t| (*key, t)))
    else {
        debug!("Object payload without usable text, forwarding as text");
        return StreamEvent::Content(ContentDelta::text(raw));
    };

    let content_type = content_type_of(&obj).or(match key {
        "thought" => Some(ContentType::Thought),
        "answer" => Some(ContentType::Result),
        _ => None,
    });

    StreamEvent::Content(ContentDelta {
        text: text.to_string(),
        message_id: first_str(&obj, &MESSAGE_ID_KEYS),
        agent_id: first_str(&obj, &AGENT_ID_KEYS),
        content_type,
        metadata: object_at(&obj, "metadata"),
        timestamp: first_str(&obj, &["timestamp"]),
    })
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn object_at(obj: &Map<String, Value>, key: &str) -> Metadata {
    obj.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn content_type_of(obj: &Map<String, Value>) -> Option<ContentType> {
    CONTENT_TYPE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .and_then(ContentType::from_label)
}

/// Envelope metadata overlaid with `data.metadata`; later keys win.
fn merged_metadata(envelope: &Map<String, Value>, data: Option<&Map<String, Value>>) -> Metadata {
    let mut metadata = object_at(envelope, "metadata");
    if let Some(d) = data {
        metadata.extend(object_at(d, "metadata"));
    }
    metadata
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
