// Re-export needed modules for testing
pub mod chat;
pub mod config;
pub mod error;
pub mod models;

// Re-export main types for convenience
pub use chat::{MessageReconciler, ReconcilerEvent};
pub use error::{ChatError, ChatResult};
pub use models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: &str) -> ChatMessage {
        ChatMessage {
            message_id: id.to_string(),
            room_id: "room-1".to_string(),
            sender_user_id: "tenant-1".to_string(),
            content: "Is the room still available?".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            edited: false,
            deleted: false,
        }
    }

    #[test]
    fn test_message_wire_format_is_camel_case() {
        let json = serde_json::to_value(message("m1")).unwrap();
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["senderUserId"], "tenant-1");
        assert_eq!(json["roomId"], "room-1");
        assert_eq!(json["createdAt"], "2024-05-01T09:30:00Z");
        assert_eq!(json["edited"], false);
        assert_eq!(json["deleted"], false);
    }

    #[test]
    fn test_tombstone_hides_content() {
        let mut msg = message("m1");
        assert_eq!(msg.display_content(), "Is the room still available?");

        msg.deleted = true;
        assert_eq!(msg.display_content(), "Message deleted");
        // The record itself still carries whatever the server sent
        assert_eq!(msg.content, "Is the room still available?");
    }

    #[test]
    fn test_ownership() {
        let msg = message("m1");
        assert!(msg.is_from("tenant-1"));
        assert!(!msg.is_from("owner-1"));
    }

    #[test]
    fn test_envelope_decoding() {
        let body = r#"{
            "status": 201,
            "message": "Message sent",
            "data": {"messageId":"m9","roomId":"room-1","senderUserId":"tenant-1","content":"halo","createdAt":"2024-05-01T09:31:00Z","edited":false,"deleted":false},
            "timestamp": 1714555860000
        }"#;
        let envelope: ApiGeneralResponse<ChatMessage> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.status, 201);
        assert_eq!(envelope.data.message_id, "m9");
        assert_eq!(envelope.data.content, "halo");
    }

    #[test]
    fn test_user_roles() {
        for (raw, role) in [("TENANT", Role::Tenant), ("OWNER", Role::Owner), ("ADMIN", Role::Admin)] {
            let json = format!(r#"{{"userId":"u","email":"u@kos.id","role":"{}","status":"ACTIVE"}}"#, raw);
            let user: User = serde_json::from_str(&json).unwrap();
            assert_eq!(user.role, role);
        }
    }

    #[test]
    fn test_user_facing_errors() {
        assert!(ChatError::Network("down".to_string()).is_user_facing());
        assert!(ChatError::NotOpen.is_user_facing());
        assert!(!ChatError::MalformedEvent("x".to_string()).is_user_facing());
        assert!(!ChatError::StaleOperation("r".to_string()).is_user_facing());
    }
}
