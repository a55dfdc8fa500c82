//! Agent message types for the WebSocket surface.
//!
//! Wire frames are JSON objects discriminated by `type`. Deserialization is
//! strict (unknown top-level fields are rejected) and a separate validation
//! pass applies the size caps and produces the typed message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maximum length of the `content` field, in characters.
pub const MAX_CONTENT_CHARS: usize = 100_000;

/// Maximum length of the `body` field, in characters.
pub const MAX_BODY_CHARS: usize = 1_048_576;

/// Message discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    SessionsSend,
    SessionsSpawn,
    SessionsReply,
    ApiCall,
    SkillExecute,
    Ping,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::SessionsSend => write!(f, "sessions_send"),
            MessageKind::SessionsSpawn => write!(f, "sessions_spawn"),
            MessageKind::SessionsReply => write!(f, "sessions_reply"),
            MessageKind::ApiCall => write!(f, "api_call"),
            MessageKind::SkillExecute => write!(f, "skill_execute"),
            MessageKind::Ping => write!(f, "ping"),
        }
    }
}

impl MessageKind {
    /// Kinds that address another agent and require a communication rule.
    pub fn is_agent_to_agent(&self) -> bool {
        matches!(self, MessageKind::SessionsSend | MessageKind::SessionsSpawn)
    }
}

/// A structurally valid agent message.
#[derive(Debug, Clone, Serialize)]
pub struct AgentMessage {
    pub kind: MessageKind,
    pub content: Option<String>,
    pub target_agent_id: Option<String>,
    pub url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Raw wire envelope. Strict: any unknown top-level field fails the parse.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct MessageEnvelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    content: Option<String>,
    target_agent_id: Option<String>,
    url: Option<String>,
    headers: Option<HashMap<String, String>>,
    body: Option<String>,
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Why a frame failed structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Not JSON, wrong shape, unknown `type`, or unknown top-level field.
    Malformed(String),
    /// `content` exceeds the cap.
    ContentTooLarge(usize),
    /// `body` exceeds the cap.
    BodyTooLarge(usize),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::Malformed(detail) => write!(f, "malformed message: {}", detail),
            MessageError::ContentTooLarge(len) => {
                write!(f, "content length {} exceeds {}", len, MAX_CONTENT_CHARS)
            }
            MessageError::BodyTooLarge(len) => {
                write!(f, "body length {} exceeds {}", len, MAX_BODY_CHARS)
            }
        }
    }
}

impl AgentMessage {
    /// Parse and validate a raw text frame.
    pub fn parse(raw: &str) -> Result<AgentMessage, MessageError> {
        let envelope: MessageEnvelope =
            serde_json::from_str(raw).map_err(|e| MessageError::Malformed(e.to_string()))?;

        if let Some(content) = &envelope.content {
            let len = content.chars().count();
            if len > MAX_CONTENT_CHARS {
                return Err(MessageError::ContentTooLarge(len));
            }
        }
        if let Some(body) = &envelope.body {
            let len = body.chars().count();
            if len > MAX_BODY_CHARS {
                return Err(MessageError::BodyTooLarge(len));
            }
        }

        Ok(AgentMessage {
            kind: envelope.kind,
            content: envelope.content,
            target_agent_id: envelope.target_agent_id,
            url: envelope.url,
            headers: envelope.headers,
            body: envelope.body,
            metadata: envelope.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sessions_send() {
        let msg = AgentMessage::parse(
            r#"{"type":"sessions_send","content":"hello","targetAgentId":"peer-1"}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageKind::SessionsSend);
        assert_eq!(msg.content.as_deref(), Some("hello"));
        assert_eq!(msg.target_agent_id.as_deref(), Some("peer-1"));
        assert!(msg.kind.is_agent_to_agent());
    }

    #[test]
    fn test_parse_ping_without_payload() {
        let msg = AgentMessage::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Ping);
        assert!(msg.content.is_none());
        assert!(!msg.kind.is_agent_to_agent());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = AgentMessage::parse(r#"{"type":"sessions_explode"}"#).unwrap_err();
        assert!(matches!(err, MessageError::Malformed(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = AgentMessage::parse(r#"{"type":"ping","surprise":true}"#).unwrap_err();
        assert!(matches!(err, MessageError::Malformed(_)));
    }

    #[test]
    fn test_oversize_content_rejected() {
        let content = "x".repeat(MAX_CONTENT_CHARS + 1);
        let raw = serde_json::json!({"type": "sessions_send", "content": content}).to_string();
        let err = AgentMessage::parse(&raw).unwrap_err();
        assert!(matches!(err, MessageError::ContentTooLarge(_)));
    }

    #[test]
    fn test_api_call_fields() {
        let msg = AgentMessage::parse(
            r#"{"type":"api_call","url":"https://api.example.com/v1","body":"{}","headers":{"content-type":"application/json"}}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageKind::ApiCall);
        assert_eq!(msg.url.as_deref(), Some("https://api.example.com/v1"));
        assert!(msg.headers.unwrap().contains_key("content-type"));
    }
}
