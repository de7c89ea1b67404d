//! Request and response bodies exchanged with the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    event::{ContentType, Metadata},
    request::StreamRequest,
    session::{SessionMessage, SessionStatus},
};

/// Endpoint path (below the API prefix) serving a capability's stream.
pub fn endpoint_for(capability: Option<&str>) -> String {
    let Some(capability) = capability.filter(|c| !c.is_empty()) else {
        return "/chat".to_string();
    };
    match capability {
        "story-analysis" => "/story-analysis/analyze".to_string(),
        "series-analysis" => "/series-analysis/analyze".to_string(),
        "plot-points" => "/plot-points-workflow/execute".to_string(),
        other => format!("/{other}/chat"),
    }
}

/// JSON body of a stream-opening request.
#[derive(Debug, Serialize)]
pub(crate) struct ChatBody<'a> {
    pub input: &'a str,
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub enable_web_search: bool,
    pub enable_knowledge_base: bool,
    pub model_provider: &'a str,
}

impl<'a> ChatBody<'a> {
    pub(crate) fn new(request: &'a StreamRequest, default_user_id: &'a str) -> Self {
        Self {
            input: request.payload(),
            user_id: request.user_id().unwrap_or(default_user_id),
            session_id: request.session_id().unwrap_or_default(),
            enable_web_search: request.flag("enable_web_search"),
            enable_knowledge_base: request.flag("enable_knowledge_base"),
            model_provider: request.context_str("model_provider").unwrap_or("openai"),
        }
    }
}

/// Response of the liveness endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub uptime: Option<String>,
    #[serde(default)]
    pub dependencies: Metadata,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Body of a start-session request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub project_id: String,
    pub agents: Vec<String>,
    pub title: String,
}

impl StartSessionRequest {
    /// Build a request; a missing title gets a timestamped default.
    pub fn new(project_id: impl Into<String>, agents: Vec<String>, title: Option<String>) -> Self {
        Self {
            project_id: project_id.into(),
            agents,
            title: title.unwrap_or_else(|| {
                format!(
                    "Agent collaboration session - {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S")
                )
            }),
        }
    }
}

/// Session descriptor returned by the backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionDescriptor {
    pub id: String,
    pub session_id: String,
    pub project_id: String,
    pub title: String,
    pub status: SessionStatus,
    pub agents: Vec<String>,
    pub messages: Vec<HistoryMessage>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub total_tokens: Option<u64>,
    pub total_cost: Option<f64>,
}

/// Body of a send-message request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageBody<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<&'a str>,
}

/// A stored message as returned by the history endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryMessage {
    pub id: String,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub agent_type: Option<String>,
    pub content: String,
    pub content_type: ContentType,
    pub timestamp: Option<String>,
    pub metadata: Metadata,
    pub is_streaming: bool,
}

impl From<HistoryMessage> for SessionMessage {
    fn from(message: HistoryMessage) -> Self {
        let created_at = message
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map_or_else(Utc::now, |ts| ts.with_timezone(&Utc));
        let id = if message.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            message.id.clone()
        };

        Self {
            id,
            key: (!message.id.is_empty()).then_some(message.id),
            agent_id: message.agent_id.or(message.agent_type),
            content_type: message.content_type,
            content: message.content,
            metadata: message.metadata,
            is_streaming: message.is_streaming,
            created_at,
            timestamp: message.timestamp,
        }
    }
}
