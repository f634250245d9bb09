//! Canonical inbound update, decoupled from the transport's wire types.

use chrono::{DateTime, Utc};
use teloxide::types::{Message, UpdateKind as TgUpdateKind};

use crate::storage::NewUser;

/// One inbound event. Exactly one of message or callback query.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Monotonic per source; drives the long-poll offset.
    pub id: i64,
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Message(IncomingMessage),
    CallbackQuery(CallbackQuery),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl Sender {
    pub fn display_name(&self) -> String {
        match (&self.username, &self.last_name) {
            (Some(username), _) => format!("@{username}"),
            (None, Some(last)) => format!("{} {}", self.first_name, last),
            (None, None) => self.first_name.clone(),
        }
    }

    pub fn to_new_user(&self) -> NewUser {
        NewUser {
            id: self.id,
            username: self.username.clone(),
            first_name: Some(self.first_name.clone()),
            last_name: self.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub message_id: i32,
    pub chat_id: i64,
    pub from: Option<Sender>,
    pub text: Option<String>,
    /// File id of an attached voice note or audio file.
    pub voice_file_id: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    pub from: Sender,
    /// Chat of the message carrying the keyboard, when still accessible.
    pub chat_id: Option<i64>,
    pub data: Option<String>,
}

impl Update {
    /// Map a teloxide update, dropping kinds the bot does not handle.
    pub fn from_telegram(update: teloxide::types::Update) -> Option<Self> {
        let id = i64::from(update.id.0);
        let kind = match update.kind {
            TgUpdateKind::Message(msg) => UpdateKind::Message(IncomingMessage::from_telegram(&msg)),
            TgUpdateKind::CallbackQuery(q) => UpdateKind::CallbackQuery(CallbackQuery {
                from: sender(&q.from),
                chat_id: q.message.as_ref().map(|m| m.chat().id.0),
                data: q.data,
            }),
            _ => return None,
        };
        Some(Self { id, kind })
    }

    /// Decode a webhook body. Undecodable or unsupported payloads yield `None`.
    pub fn from_json(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<teloxide::types::Update>(body)
            .ok()
            .and_then(Self::from_telegram)
    }

    /// Chat the update originated from.
    pub fn chat_id(&self) -> Option<i64> {
        match &self.kind {
            UpdateKind::Message(msg) => Some(msg.chat_id),
            UpdateKind::CallbackQuery(q) => q.chat_id,
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match &self.kind {
            UpdateKind::Message(msg) => msg.from.as_ref(),
            UpdateKind::CallbackQuery(q) => Some(&q.from),
        }
    }
}

impl IncomingMessage {
    fn from_telegram(msg: &Message) -> Self {
        let voice_file_id = msg
            .voice()
            .map(|v| v.file.id.0.clone())
            .or_else(|| msg.audio().map(|a| a.file.id.0.clone()));
        Self {
            message_id: msg.id.0,
            chat_id: msg.chat.id.0,
            from: msg.from.as_ref().map(sender),
            text: msg.text().map(str::to_string),
            voice_file_id,
            date: msg.date,
        }
    }
}

fn sender(user: &teloxide::types::User) -> Sender {
    Sender {
        id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_body(text: &str) -> Vec<u8> {
        json!({
            "update_id": 957250703,
            "message": {
                "message_id": 417070387,
                "date": 1700000000,
                "chat": { "id": 1234, "type": "private", "first_name": "Alice" },
                "from": { "id": 1234, "is_bot": false, "first_name": "Alice", "username": "alice" },
                "text": text
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_decode_text_message() {
        let update = Update::from_json(&message_body("hello")).unwrap();
        assert_eq!(update.id, 957250703);
        assert_eq!(update.chat_id(), Some(1234));
        let UpdateKind::Message(msg) = update.kind else { panic!("expected message") };
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert_eq!(msg.from.unwrap().username.as_deref(), Some("alice"));
        assert!(msg.voice_file_id.is_none());
    }

    #[test]
    fn test_decode_callback_query() {
        let body = json!({
            "update_id": 10,
            "callback_query": {
                "id": "4382bfdwdsb323b2d9",
                "from": { "id": 1234, "is_bot": false, "first_name": "Alice" },
                "chat_instance": "-1",
                "data": "about_bot",
                "message": {
                    "message_id": 5,
                    "date": 1700000000,
                    "chat": { "id": 1234, "type": "private", "first_name": "Alice" },
                    "text": "menu"
                }
            }
        });
        let update = Update::from_json(body.to_string().as_bytes()).unwrap();
        let UpdateKind::CallbackQuery(q) = &update.kind else { panic!("expected callback") };
        assert_eq!(q.data.as_deref(), Some("about_bot"));
        assert_eq!(update.chat_id(), Some(1234));
        assert_eq!(update.sender().unwrap().display_name(), "Alice");
    }

    #[test]
    fn test_malformed_bodies_are_dropped() {
        assert!(Update::from_json(b"not json").is_none());
        assert!(Update::from_json(b"{}").is_none());
        assert!(Update::from_json(br#"{"update_id": 1}"#).is_none());
    }
}
