use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotice {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Credentials for a gated room, or a display name for an open one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub error: String,
}

/// Every frame on the wire, tagged by its `type` field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "message")]
    Message(ChatMessage),
    #[serde(rename = "system")]
    System(SystemNotice),
    #[serde(rename = "auth")]
    Auth(AuthRequest),
    #[serde(rename = "error")]
    Error(ErrorNotice),
}

impl Envelope {
    pub fn message(from: impl Into<String>, text: impl Into<String>) -> Self {
        Envelope::Message(ChatMessage {
            from: Some(from.into()),
            text: text.into(),
            timestamp: Some(now()),
        })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Envelope::System(SystemNotice {
            text: text.into(),
            timestamp: Some(now()),
        })
    }

    pub fn error(error: impl Into<String>) -> Self {
        Envelope::Error(ErrorNotice { error: error.into() })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Message(_) => "message",
            Envelope::System(_) => "system",
            Envelope::Auth(_) => "auth",
            Envelope::Error(_) => "error",
        }
    }

    /// Decode an inbound text frame.
    ///
    /// Anything that looks like a JSON object must decode as an envelope;
    /// everything else is plain chat text.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim_start().starts_with('{') {
            serde_json::from_str(text)
        } else {
            Ok(Envelope::Message(ChatMessage {
                from: None,
                text: text.to_string(),
                timestamp: None,
            }))
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_becomes_an_anonymous_message() {
        let env = Envelope::decode("hello there").unwrap();
        assert_eq!(
            env,
            Envelope::Message(ChatMessage { from: None, text: "hello there".into(), timestamp: None })
        );
    }

    #[test]
    fn json_envelopes_dispatch_on_type() {
        let env = Envelope::decode(r#"{"type":"auth","token":"abc"}"#).unwrap();
        assert_eq!(env.kind(), "auth");
        match env {
            Envelope::Auth(auth) => {
                assert_eq!(auth.token.as_deref(), Some("abc"));
                assert!(auth.name.is_none());
            }
            other => panic!("unexpected envelope {other:?}"),
        }

        let env = Envelope::decode(r#"  {"type":"message","text":"hi"}"#).unwrap();
        assert!(matches!(env, Envelope::Message(ChatMessage { ref text, .. }) if text == "hi"));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(Envelope::decode("{not json").is_err());
        assert!(Envelope::decode(r#"{"type":"shout","text":"hi"}"#).is_err());
        assert!(Envelope::decode(r#"{"type":"message"}"#).is_err());
        assert!(Envelope::decode(r#"{"text":"no type"}"#).is_err());
    }

    #[test]
    fn encoded_envelopes_carry_the_type_tag() {
        let json: serde_json::Value =
            serde_json::from_str(&Envelope::message("Client 1", "hi").encode().unwrap()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["from"], "Client 1");
        assert_eq!(json["text"], "hi");
        assert!(json["timestamp"].is_string());

        let json: serde_json::Value =
            serde_json::from_str(&Envelope::error("bad frame").encode().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "bad frame");
        assert!(json.get("timestamp").is_none());
    }
}
