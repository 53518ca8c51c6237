//! Request and response bodies for the relay's HTTP surface.
//!
//! Shared between the server router and the HTTP client so the two sides
//! cannot drift. Field names are camelCase on the wire; browser peers were
//! the first consumers of this interface.

use serde::{Deserialize, Serialize};

use super::SignalRole;

/// Body returned by room creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    /// The generated room code.
    #[serde(rename = "roomId")]
    pub room_id: String,
}

/// Body of a publish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Which side the description belongs to.
    #[serde(rename = "type")]
    pub role: SignalRole,
    /// The serialized session description.
    pub data: String,
}

/// Body returned by a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Always `true`; failures arrive as error statuses instead.
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_response_field_name() {
        let body = CreateRoomResponse {
            room_id: "7XK2QF".to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"roomId":"7XK2QF"}"#);
    }

    #[test]
    fn test_publish_request_roundtrip() {
        let json = r#"{"type":"offer","data":"v=0"}"#;
        let body: PublishRequest = serde_json::from_str(json).unwrap();
        assert_eq!(body.role, SignalRole::Offer);
        assert_eq!(body.data, "v=0");
        assert_eq!(serde_json::to_string(&body).unwrap(), json);
    }

    #[test]
    fn test_publish_request_rejects_unknown_role() {
        let json = r#"{"type":"renegotiate","data":"v=0"}"#;
        assert!(serde_json::from_str::<PublishRequest>(json).is_err());
    }

    #[test]
    fn test_publish_response_shape() {
        let json = serde_json::to_string(&PublishResponse { ok: true }).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
    }
}
