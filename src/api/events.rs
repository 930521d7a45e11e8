use crate::api::models::{Message, Notification};
use serde::Deserialize;
use serde_json::Value;

/// One inbound frame from a push socket.
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    Message(Message),
    Notification(Notification),
    Unknown(Value),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    notification: Option<Value>,
}

impl PushFrame {
    /// Frames are best-effort hints. Anything that does not decode becomes `Unknown`.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let raw: Value = serde_json::from_str(text)?;
        let env: Envelope = match serde_json::from_value(raw.clone()) {
            Ok(env) => env,
            Err(_) => return Ok(PushFrame::Unknown(raw)),
        };
        if let Some(m) = env.message {
            if let Ok(msg) = serde_json::from_value::<Message>(m) {
                return Ok(PushFrame::Message(msg));
            }
        }
        if let Some(n) = env.notification {
            if let Ok(note) = serde_json::from_value::<Notification>(n) {
                return Ok(PushFrame::Notification(note));
            }
        }
        Ok(PushFrame::Unknown(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_frame() {
        let f = PushFrame::parse(
            r#"{"message": {"sender": "A", "recipient": "B", "content": "hi", "timestamp": "2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        match f {
            PushFrame::Message(m) => assert_eq!(m.content, "hi"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification_frame() {
        let f = PushFrame::parse(
            r#"{"notification": {"id": 5, "body": "Ad approved", "timestamp": "2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert!(matches!(f, PushFrame::Notification(n) if n.id.as_str() == "5"));
    }

    #[test]
    fn test_unrecognized_frame_is_unknown() {
        let f = PushFrame::parse(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(f, PushFrame::Unknown(_)));
        let f = PushFrame::parse(r#"[1, 2]"#).unwrap();
        assert!(matches!(f, PushFrame::Unknown(_)));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(PushFrame::parse("not json").is_err());
    }
}
