use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{new_id, timestamp};

pub const BROADCAST_KEY: &str = "broadcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Private,
    Broadcast,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Private => "private",
            MessageType::Broadcast => "broadcast",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: String,
    /// `None` for broadcasts.
    pub receiver_id: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub message_type: MessageType,
    pub conversation_key: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub read_at: Option<DateTime<Utc>>,
    /// A customer writing to an admin; any admin may read and answer it.
    #[serde(default)]
    pub to_support: bool,
}

/// Order-independent key for the conversation between two users.
pub fn conversation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl Message {
    pub fn private(sender_id: &str, receiver_id: &str, content: &str) -> Self {
        Self {
            id: new_id(),
            sender_id: sender_id.to_string(),
            receiver_id: Some(receiver_id.to_string()),
            content: content.trim().to_string(),
            is_read: false,
            message_type: MessageType::Private,
            conversation_key: conversation_key(sender_id, receiver_id),
            created_at: Utc::now(),
            read_at: None,
            to_support: false,
        }
    }

    /// A customer's message to an admin, shared with the whole admin group.
    pub fn support(sender_id: &str, admin_id: &str, content: &str) -> Self {
        Self {
            to_support: true,
            ..Self::private(sender_id, admin_id, content)
        }
    }

    pub fn broadcast(sender_id: &str, content: &str) -> Self {
        Self {
            id: new_id(),
            sender_id: sender_id.to_string(),
            receiver_id: None,
            content: content.trim().to_string(),
            is_read: false,
            message_type: MessageType::Broadcast,
            conversation_key: BROADCAST_KEY.to_string(),
            created_at: Utc::now(),
            read_at: None,
            to_support: false,
        }
    }

    /// Whether `reader` may mark this message as read.
    pub fn readable_by(&self, reader_id: &str, reader_is_admin: bool) -> bool {
        self.receiver_id.as_deref() == Some(reader_id) || (reader_is_admin && self.to_support)
    }

    /// The other participant from `user_id`'s point of view.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        if self.sender_id == user_id {
            self.receiver_id.as_deref()
        } else {
            Some(self.sender_id.as_str())
        }
    }
}

/// A message as pushed to clients, with the sender's display name attached.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_direction() {
        assert_eq!(conversation_key("bob", "alice"), "alice:bob");
        assert_eq!(conversation_key("alice", "bob"), "alice:bob");
    }

    #[test]
    fn private_and_broadcast_shapes() {
        let m = Message::private("u2", "u1", "  hello ");
        assert_eq!(m.content, "hello");
        assert_eq!(m.conversation_key, "u1:u2");
        assert_eq!(m.counterpart("u2"), Some("u1"));
        assert_eq!(m.counterpart("u1"), Some("u2"));

        let b = Message::broadcast("admin", "sale today");
        assert!(b.receiver_id.is_none());
        assert_eq!(b.message_type, MessageType::Broadcast);
        assert_eq!(b.conversation_key, BROADCAST_KEY);
    }

    #[test]
    fn support_messages_are_shared_by_admins() {
        let m = Message::support("cust", "a1", "where is my order?");
        assert!(m.to_support);
        assert_eq!(m.conversation_key, "a1:cust");
        assert!(m.readable_by("a1", true));
        assert!(m.readable_by("a2", true));
        assert!(!m.readable_by("cust", false));

        let reply = Message::private("a1", "cust", "on its way");
        assert!(!reply.to_support);
        assert!(reply.readable_by("cust", false));
        assert!(!reply.readable_by("a2", true));
    }

    #[test]
    fn view_flattens_message() {
        let view = MessageView {
            message: Message::private("a", "b", "hi"),
            sender_name: Some("Ann".into()),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["content"], "hi");
        assert_eq!(json["message_type"], "private");
        assert_eq!(json["sender_name"], "Ann");
        assert!(json["receiver_id"].is_string());
    }
}
