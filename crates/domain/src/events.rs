use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::util::{now_ms, uuid_v7_without_dashes};

pub const LOG_FIELD_EVENT: &str = "event";
pub const METADATA_TARGET_USER: &str = "target_user_id";
pub const METADATA_FEATURE: &str = "feature";
pub const METADATA_DEPARTMENT: &str = "department";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Login,
    Logout,
    PostCreated,
    CommentCreated,
    LikeGiven,
    LikeRemoved,
    AiInteraction,
    ProfileUpdated,
    Follow,
    AnswerProvided,
    ContentViewed,
    Share,
    Save,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Login => "login",
            EventType::Logout => "logout",
            EventType::PostCreated => "post_created",
            EventType::CommentCreated => "comment_created",
            EventType::LikeGiven => "like_given",
            EventType::LikeRemoved => "like_removed",
            EventType::AiInteraction => "ai_interaction",
            EventType::ProfileUpdated => "profile_updated",
            EventType::Follow => "follow",
            EventType::AnswerProvided => "answer_provided",
            EventType::ContentViewed => "content_viewed",
            EventType::Share => "share",
            EventType::Save => "save",
        }
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "login" => Ok(EventType::Login),
            "logout" => Ok(EventType::Logout),
            "post_created" => Ok(EventType::PostCreated),
            "comment_created" => Ok(EventType::CommentCreated),
            "like_given" => Ok(EventType::LikeGiven),
            "like_removed" => Ok(EventType::LikeRemoved),
            "ai_interaction" => Ok(EventType::AiInteraction),
            "profile_updated" => Ok(EventType::ProfileUpdated),
            "follow" => Ok(EventType::Follow),
            "answer_provided" => Ok(EventType::AnswerProvided),
            "content_viewed" => Ok(EventType::ContentViewed),
            "share" => Ok(EventType::Share),
            "save" => Ok(EventType::Save),
            _ => Err(()),
        }
    }
}

/// Immutable fact. Created by the gateway, folded by the aggregator,
/// never mutated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub scope_id: String,
    pub actor_user_id: Option<String>,
    pub content_id: Option<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub occurred_at_ms: i64,
}

impl DomainEvent {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn target_user_id(&self) -> Option<&str> {
        self.metadata_str(METADATA_TARGET_USER)
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventInput {
    pub event_type: String,
    pub scope_id: String,
    pub actor_user_id: Option<String>,
    pub content_id: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

pub fn validate_event_input(input: EventInput) -> DomainResult<DomainEvent> {
    let event_type = input
        .event_type
        .parse::<EventType>()
        .map_err(|_| DomainError::InvalidEvent(format!("unknown event type '{}'", input.event_type)))?;
    if input.scope_id.trim().is_empty() {
        return Err(DomainError::InvalidEvent("missing scope_id".to_string()));
    }
    let actor_user_id = input.actor_user_id.filter(|id| !id.trim().is_empty());
    Ok(DomainEvent {
        event_id: uuid_v7_without_dashes(),
        event_type,
        scope_id: input.scope_id,
        actor_user_id,
        content_id: input.content_id.filter(|id| !id.trim().is_empty()),
        content_type: input.content_type,
        metadata: input.metadata.unwrap_or_default(),
        occurred_at_ms: now_ms(),
    })
}

pub fn encode_log_fields(event: &DomainEvent) -> DomainResult<Vec<(String, String)>> {
    let payload = serde_json::to_string(event)
        .map_err(|err| DomainError::Validation(format!("failed to serialize event: {err}")))?;
    Ok(vec![
        (LOG_FIELD_EVENT.to_string(), payload),
        ("event_type".to_string(), event.event_type.as_str().to_string()),
        ("scope_id".to_string(), event.scope_id.clone()),
    ])
}

pub fn decode_log_fields(fields: &[(String, String)]) -> Option<DomainEvent> {
    fields
        .iter()
        .find(|(key, _)| key == LOG_FIELD_EVENT)
        .and_then(|(_, value)| serde_json::from_str(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(event_type: &str, scope_id: &str) -> EventInput {
        EventInput {
            event_type: event_type.to_string(),
            scope_id: scope_id.to_string(),
            ..EventInput::default()
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = validate_event_input(input("teleport", "college-a")).unwrap_err();
        assert!(matches!(err, DomainError::InvalidEvent(_)));
    }

    #[test]
    fn missing_scope_is_rejected() {
        let err = validate_event_input(input("login", "  ")).unwrap_err();
        assert!(matches!(err, DomainError::InvalidEvent(_)));
    }

    #[test]
    fn accepted_event_gets_id_and_timestamp() {
        let event = validate_event_input(input("login", "college-a")).unwrap();
        assert_eq!(event.event_type, EventType::Login);
        assert_eq!(event.event_id.len(), 32);
        assert!(event.occurred_at_ms > 0);
    }

    #[test]
    fn log_fields_round_trip() {
        let mut original = validate_event_input(input("like_given", "college-a")).unwrap();
        original.content_id = Some("post-1".to_string());
        let fields = encode_log_fields(&original).unwrap();
        let decoded = decode_log_fields(&fields).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn blank_actor_is_normalized_to_none() {
        let mut raw = input("login", "college-a");
        raw.actor_user_id = Some("  ".to_string());
        let event = validate_event_input(raw).unwrap();
        assert_eq!(event.actor_user_id, None);
    }
}
