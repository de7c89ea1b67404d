//! Session/message aggregate and the reducer that folds events into it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::{
    ContentDelta, ContentType, DoneSignal, Metadata, MetadataUpdate, StreamEvent, StreamFault,
};

/// Overall status of a [`StreamSession`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl SessionStatus {
    /// `Completed` and `Error` are final; the session no longer changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// One logical unit of agent output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Locally generated id.
    pub id: String,
    /// Upstream message id (or agent id) the message was opened for.
    pub key: Option<String>,
    pub agent_id: Option<String>,
    pub content_type: ContentType,
    /// Accumulated text; only ever appended to while streaming.
    pub content: String,
    pub metadata: Metadata,
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
    /// Upstream timestamp of the first fragment, verbatim.
    pub timestamp: Option<String>,
}

impl SessionMessage {
    fn open(delta: &ContentDelta) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: message_key(delta.message_id.as_ref(), delta.agent_id.as_ref()),
            agent_id: delta.agent_id.clone(),
            content_type: delta.content_type.unwrap_or_default(),
            content: String::new(),
            metadata: Metadata::new(),
            is_streaming: true,
            created_at: Utc::now(),
            timestamp: delta.timestamp.clone(),
        }
    }

    fn failed(fault: &StreamFault) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: message_key(fault.message_id.as_ref(), fault.agent_id.as_ref()),
            agent_id: fault.agent_id.clone(),
            content_type: ContentType::Error,
            content: fault.message.clone(),
            metadata: Metadata::new(),
            is_streaming: false,
            created_at: Utc::now(),
            timestamp: None,
        }
    }
}

/// What a single event did to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// A new message was opened at `index`.
    Appended { index: usize },
    /// Text was appended to the open message at `index`.
    Extended { index: usize },
    /// Metadata was merged into the message at `index`, or into the session
    /// when no message was open.
    MetadataMerged { index: Option<usize> },
    /// A single message was sealed; the session keeps running.
    Sealed { index: Option<usize> },
    /// The session completed.
    Completed,
    /// The session failed with an upstream-declared error.
    Failed { message: String },
    /// The session was already terminal; the event had no effect.
    Ignored,
}

impl Transition {
    /// Returns `true` if a message's text changed.
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Appended { .. } | Self::Extended { .. })
    }

    /// Index of the message the transition touched, if any.
    pub fn message_index(&self) -> Option<usize> {
        match self {
            Self::Appended { index } | Self::Extended { index } => Some(*index),
            Self::MetadataMerged { index } | Self::Sealed { index } => *index,
            Self::Completed | Self::Failed { .. } | Self::Ignored => None,
        }
    }
}

/// Aggregate statistics over a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_messages: usize,
    pub completed_messages: usize,
    pub error_count: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Wall time from start to end (or to now, while running).
    pub duration: Option<Duration>,
}

/// The aggregate for one logical streaming interaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamSession {
    /// Locally generated id.
    pub id: String,
    /// Correlation id shared with the backend.
    pub session_id: String,
    /// Messages in arrival order.
    pub messages: Vec<SessionMessage>,
    pub status: SessionStatus,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Metadata that arrived while no message was open.
    pub metadata: Metadata,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StreamSession {
    /// An idle session correlated with the given backend session id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            messages: Vec::new(),
            status: SessionStatus::Idle,
            total_tokens: 0,
            total_cost: 0.0,
            metadata: Metadata::new(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Mark the session as running. No-op unless idle.
    pub fn begin(&mut self) {
        if self.status == SessionStatus::Idle {
            self.status = SessionStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Fold one event into the session.
    ///
    /// Every event has a defined effect. Once the session is terminal the
    /// event is logged and ignored.
    pub fn apply(&mut self, event: &StreamEvent) -> Transition {
        if self.status.is_terminal() {
            warn!(
                session_id = %self.session_id,
                status = ?self.status,
                kind = event.kind(),
                "Ignoring event after session ended"
            );
            return Transition::Ignored;
        }
        self.begin();

        match event {
            StreamEvent::Content(delta) => self.apply_content(delta),
            StreamEvent::Metadata(update) => self.apply_metadata(update),
            StreamEvent::Done(done) => self.apply_done(done),
            StreamEvent::Error(fault) => self.apply_error(fault),
        }
    }

    fn apply_content(&mut self, delta: &ContentDelta) -> Transition {
        self.add_totals(&delta.metadata);
        let key = message_key(delta.message_id.as_ref(), delta.agent_id.as_ref());

        let (index, transition) = match self.open_message(key.as_deref()) {
            Some(index) => (index, Transition::Extended { index }),
            None => {
                self.messages.push(SessionMessage::open(delta));
                let index = self.messages.len() - 1;
                (index, Transition::Appended { index })
            }
        };

        let message = &mut self.messages[index];
        message.content.push_str(&delta.text);
        merge(&mut message.metadata, &delta.metadata);
        transition
    }

    fn apply_metadata(&mut self, update: &MetadataUpdate) -> Transition {
        self.add_totals(&update.fields);
        let key = message_key(update.message_id.as_ref(), update.agent_id.as_ref());

        match self
            .open_message(key.as_deref())
            .or_else(|| self.open_message(None))
        {
            Some(index) => {
                merge(&mut self.messages[index].metadata, &update.fields);
                Transition::MetadataMerged { index: Some(index) }
            }
            None => {
                merge(&mut self.metadata, &update.fields);
                Transition::MetadataMerged { index: None }
            }
        }
    }

    fn apply_done(&mut self, done: &DoneSignal) -> Transition {
        if done.is_terminal() {
            for message in &mut self.messages {
                message.is_streaming = false;
            }
            self.finish(SessionStatus::Completed);
            return Transition::Completed;
        }

        let key = message_key(done.message_id.as_ref(), done.agent_id.as_ref());
        let index = self
            .open_message(key.as_deref())
            .or_else(|| self.open_message(None));
        match index {
            Some(index) => self.messages[index].is_streaming = false,
            None => debug!(
                session_id = %self.session_id,
                key = ?key,
                "Completion for a message that is not open"
            ),
        }
        Transition::Sealed { index }
    }

    fn apply_error(&mut self, fault: &StreamFault) -> Transition {
        let key = message_key(fault.message_id.as_ref(), fault.agent_id.as_ref());
        match self
            .open_message(key.as_deref())
            .or_else(|| self.open_message(None))
        {
            Some(index) => {
                let message = &mut self.messages[index];
                message.content_type = ContentType::Error;
                message
                    .metadata
                    .insert("error".to_string(), Value::String(fault.message.clone()));
            }
            None => self.messages.push(SessionMessage::failed(fault)),
        }
        for message in &mut self.messages {
            message.is_streaming = false;
        }

        self.finish(SessionStatus::Error);
        Transition::Failed {
            message: fault.message.clone(),
        }
    }

    /// Seal every open message without changing the session status.
    ///
    /// Returns how many messages were sealed.
    pub fn seal_open(&mut self) -> usize {
        let mut sealed = 0;
        for message in self.messages.iter_mut().filter(|m| m.is_streaming) {
            message.is_streaming = false;
            sealed += 1;
        }
        sealed
    }

    fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Most recent open message for `key`; any open message when `key` is None.
    fn open_message(&self, key: Option<&str>) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.is_streaming && (key.is_none() || m.key.as_deref() == key))
    }

    fn add_totals(&mut self, metadata: &Metadata) {
        if let Some(tokens) = metadata
            .get("tokens_used")
            .or_else(|| metadata.get("tokensUsed"))
            .and_then(Value::as_u64)
        {
            self.total_tokens = self.total_tokens.saturating_add(tokens);
        }
        if let Some(cost) = metadata.get("cost").and_then(Value::as_f64) {
            self.total_cost += cost;
        }
    }

    /// Concatenated text of every non-error message, in arrival order.
    pub fn accumulated_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.content_type != ContentType::Error)
            .map(|m| m.content.as_str())
            .collect()
    }

    /// Session metadata overlaid with the latest message's metadata.
    pub fn latest_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();
        if let Some(last) = self.messages.last() {
            merge(&mut metadata, &last.metadata);
        }
        metadata
    }

    /// The message currently receiving text, if any.
    pub fn current_message(&self) -> Option<&SessionMessage> {
        self.open_message(None).map(|index| &self.messages[index])
    }

    pub fn stats(&self) -> SessionStats {
        let duration = self.started_at.and_then(|start| {
            let end = self.ended_at.unwrap_or_else(Utc::now);
            (end - start).to_std().ok()
        });

        SessionStats {
            total_messages: self.messages.len(),
            completed_messages: self
                .messages
                .iter()
                .filter(|m| !m.is_streaming && m.content_type != ContentType::Error)
                .count(),
            error_count: self
                .messages
                .iter()
                .filter(|m| m.content_type == ContentType::Error)
                .count(),
            total_tokens: self.total_tokens,
            total_cost: self.total_cost,
            duration,
        }
    }
}

/// Pure form of [`StreamSession::apply`].
pub fn reduce(mut session: StreamSession, event: &StreamEvent) -> StreamSession {
    session.apply(event);
    session
}

fn message_key(message_id: Option<&String>, agent_id: Option<&String>) -> Option<String> {
    message_id.or(agent_id).cloned()
}

fn merge(target: &mut Metadata, fields: &Metadata) {
    for (key, value) in fields {
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::normalize;

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content(ContentDelta::text(text))
    }

    fn agent_content(agent: &str, text: &str) -> StreamEvent {
        StreamEvent::Content(ContentDelta {
            text: text.to_string(),
            agent_id: Some(agent.to_string()),
            ..Default::default()
        })
    }

    fn fields(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn hello_scenario_completes() {
        let mut session = StreamSession::new("s1");
        for payload in [
            r#"{"type":"content","data":{"content":"Hel"}}"#,
            r#"{"type":"content","data":{"content":"lo"}}"#,
        ] {
            session.apply(&normalize(payload));
        }
        assert_eq!(session.status, SessionStatus::Running);

        let transition = session.apply(&StreamEvent::Done(DoneSignal::stream()));
        assert_eq!(transition, Transition::Completed);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "Hello");
        assert!(!session.messages[0].is_streaming);
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn content_is_monotonic_concatenation() {
        let fragments = ["a", "", "bc", "日本", "d"];
        let mut session = StreamSession::new("s1");
        let mut last_len = 0;
        for fragment in fragments {
            session.apply(&content(fragment));
            let len = session.messages[0].content.len();
            assert!(len >= last_len);
            last_len = len;
        }
        assert_eq!(session.messages[0].content, fragments.concat());
    }

    #[test]
    fn without_sentinel_session_stays_running() {
        let mut session = StreamSession::new("s1");
        for text in ["x", "y", "z"] {
            session.apply(&content(text));
        }
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.messages[0].is_streaming);
    }

    #[test]
    fn groups_by_agent() {
        let mut session = StreamSession::new("s1");
        assert_eq!(
            session.apply(&agent_content("planner", "plan ")),
            Transition::Appended { index: 0 }
        );
        assert_eq!(
            session.apply(&agent_content("creator", "draft")),
            Transition::Appended { index: 1 }
        );
        assert_eq!(
            session.apply(&agent_content("planner", "more")),
            Transition::Extended { index: 0 }
        );
        assert_eq!(session.messages[0].content, "plan more");
        assert_eq!(session.messages[1].content, "draft");
        assert_eq!(session.accumulated_text(), "plan moredraft");
    }

    #[test]
    fn message_done_seals_only_that_message() {
        let mut session = StreamSession::new("s1");
        session.apply(&agent_content("planner", "p"));
        session.apply(&agent_content("creator", "c"));

        let transition = session.apply(&StreamEvent::Done(DoneSignal {
            message_id: None,
            agent_id: Some("planner".to_string()),
        }));
        assert_eq!(transition, Transition::Sealed { index: Some(0) });
        assert!(!session.messages[0].is_streaming);
        assert!(session.messages[1].is_streaming);
        assert_eq!(session.status, SessionStatus::Running);

        // A new fragment for the sealed agent opens a fresh message.
        assert_eq!(
            session.apply(&agent_content("planner", "again")),
            Transition::Appended { index: 2 }
        );
    }

    #[test]
    fn metadata_merges_into_open_message() {
        let mut session = StreamSession::new("s1");
        session.apply(&StreamEvent::Content(ContentDelta {
            text: "x".to_string(),
            metadata: fields(json!({"model": "a", "confidence": 0.5})),
            ..Default::default()
        }));
        session.apply(&StreamEvent::Metadata(MetadataUpdate {
            fields: fields(json!({"confidence": 0.9, "tool": "search"})),
            ..Default::default()
        }));

        let metadata = &session.messages[0].metadata;
        assert_eq!(metadata.get("model"), Some(&json!("a")));
        assert_eq!(metadata.get("confidence"), Some(&json!(0.9)));
        assert_eq!(metadata.get("tool"), Some(&json!("search")));
    }

    #[test]
    fn metadata_without_open_message_goes_to_session() {
        let mut session = StreamSession::new("s1");
        let transition = session.apply(&StreamEvent::Metadata(MetadataUpdate {
            fields: fields(json!({"model": "a"})),
            ..Default::default()
        }));
        assert_eq!(transition, Transition::MetadataMerged { index: None });
        assert_eq!(session.metadata.get("model"), Some(&json!("a")));
        assert_eq!(session.latest_metadata().get("model"), Some(&json!("a")));
    }

    #[test]
    fn error_seals_and_ignores_later_events() {
        let mut session = StreamSession::new("s1");
        session.apply(&content("partial"));
        let transition = session.apply(&StreamEvent::Error(StreamFault {
            message: "quota exceeded".to_string(),
            ..Default::default()
        }));
        assert_eq!(
            transition,
            Transition::Failed {
                message: "quota exceeded".to_string()
            }
        );
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.messages[0].content_type, ContentType::Error);
        assert!(!session.messages[0].is_streaming);

        let before = session.clone();
        assert_eq!(session.apply(&content("late")), Transition::Ignored);
        assert_eq!(
            session.apply(&StreamEvent::Done(DoneSignal::stream())),
            Transition::Ignored
        );
        assert_eq!(session, before);
    }

    #[test]
    fn error_without_open_message_appends_one() {
        let mut session = StreamSession::new("s1");
        session.apply(&StreamEvent::Error(StreamFault {
            message: "boom".to_string(),
            ..Default::default()
        }));
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "boom");
        assert_eq!(session.stats().error_count, 1);
    }

    #[test]
    fn second_sentinel_is_ignored() {
        let mut session = StreamSession::new("s1");
        session.apply(&content("x"));
        assert_eq!(
            session.apply(&StreamEvent::Done(DoneSignal::stream())),
            Transition::Completed
        );
        assert_eq!(
            session.apply(&StreamEvent::Done(DoneSignal::stream())),
            Transition::Ignored
        );
    }

    #[test]
    fn totals_and_stats() {
        let mut session = StreamSession::new("s1");
        session.apply(&StreamEvent::Content(ContentDelta {
            text: "a".to_string(),
            metadata: fields(json!({"tokens_used": 10, "cost": 0.25})),
            ..Default::default()
        }));
        session.apply(&StreamEvent::Metadata(MetadataUpdate {
            fields: fields(json!({"tokensUsed": 5, "cost": 0.5})),
            ..Default::default()
        }));
        session.apply(&StreamEvent::Done(DoneSignal::stream()));

        let stats = session.stats();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.completed_messages, 1);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.total_tokens, 15);
        assert!((stats.total_cost - 0.75).abs() < f64::EPSILON);
        assert!(stats.duration.is_some());
    }

    #[test]
    fn reduce_is_pure_over_input() {
        let original = StreamSession::new("s1");
        let next = reduce(original.clone(), &content("hi"));
        assert!(original.messages.is_empty());
        assert_eq!(original.status, SessionStatus::Idle);
        assert_eq!(next.messages[0].content, "hi");
        assert_eq!(next.status, SessionStatus::Running);
    }
}
