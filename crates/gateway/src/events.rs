//! Canonical outbound event payloads. Every server frame carries a
//! `type` field; the shapes here are the wire contract with clients.

use {
    chrono::Utc,
    serde_json::{Value, json},
};

use parley_store::{Message, Reaction};

pub fn connected(user_id: &str) -> Value {
    json!({
        "type": "connected",
        "user_id": user_id,
        "timestamp": Utc::now(),
    })
}

pub fn chat_joined(chat_id: &str) -> Value {
    json!({ "type": "chat_joined", "chat_id": chat_id })
}

pub fn chat_left(chat_id: &str) -> Value {
    json!({ "type": "chat_left", "chat_id": chat_id })
}

pub fn new_message(message: &Message) -> Value {
    json!({
        "type": "new_message",
        "chat_id": message.chat_id,
        "message_id": message.id,
        "sender_id": message.sender_id,
        "message_type": message.message_type,
        "content": message.content,
        "attachments": message.attachments,
        "reply_to_id": message.reply_to_id,
        "mentions": message.mentions,
        "created_at": message.created_at,
    })
}

pub fn message_updated(message: &Message) -> Value {
    json!({
        "type": "message_updated",
        "chat_id": message.chat_id,
        "message_id": message.id,
        "content": message.content,
        "edited_at": message.edited_at,
    })
}

pub fn message_deleted(chat_id: &str, message_id: &str) -> Value {
    json!({
        "type": "message_deleted",
        "chat_id": chat_id,
        "message_id": message_id,
    })
}

pub fn reaction_added(chat_id: &str, reaction: &Reaction) -> Value {
    json!({
        "type": "reaction_added",
        "chat_id": chat_id,
        "message_id": reaction.message_id,
        "user_id": reaction.user_id,
        "reaction_type": reaction.reaction_type,
    })
}

pub fn reaction_removed(
    chat_id: &str,
    message_id: &str,
    user_id: &str,
    reaction_type: &str,
) -> Value {
    json!({
        "type": "reaction_removed",
        "chat_id": chat_id,
        "message_id": message_id,
        "user_id": user_id,
        "reaction_type": reaction_type,
    })
}

pub fn typing(chat_id: &str, user_id: &str, is_typing: bool) -> Value {
    json!({
        "type": "typing",
        "chat_id": chat_id,
        "user_id": user_id,
        "is_typing": is_typing,
    })
}

pub fn read_receipt(chat_id: &str, user_id: &str, message_ids: &[String]) -> Value {
    json!({
        "type": "read_receipt",
        "chat_id": chat_id,
        "user_id": user_id,
        "message_ids": message_ids,
    })
}

pub fn user_online(user_id: &str) -> Value {
    json!({
        "type": "user_online",
        "user_id": user_id,
        "timestamp": Utc::now(),
    })
}

pub fn user_offline(user_id: &str) -> Value {
    json!({
        "type": "user_offline",
        "user_id": user_id,
        "timestamp": Utc::now(),
    })
}

/// Inbox ping for chat members whose sessions are not joined to the room.
pub fn notification(chat_id: &str, message_id: &str) -> Value {
    json!({
        "type": "notification",
        "chat_id": chat_id,
        "message_id": message_id,
    })
}

pub fn message_pinned(chat_id: &str, message_id: &str) -> Value {
    json!({
        "type": "message_pinned",
        "chat_id": chat_id,
        "message_id": message_id,
    })
}

pub fn message_unpinned(chat_id: &str, message_id: &str) -> Value {
    json!({
        "type": "message_unpinned",
        "chat_id": chat_id,
        "message_id": message_id,
    })
}

pub fn member_added(chat_id: &str, user_id: &str) -> Value {
    json!({ "type": "member_added", "chat_id": chat_id, "user_id": user_id })
}

pub fn member_removed(chat_id: &str, user_id: &str) -> Value {
    json!({ "type": "member_removed", "chat_id": chat_id, "user_id": user_id })
}

pub fn chat_deleted(chat_id: &str) -> Value {
    json!({ "type": "chat_deleted", "chat_id": chat_id })
}

pub fn ping() -> Value {
    json!({ "type": "ping" })
}

/// Pong echoes the client's timestamp.
pub fn pong(timestamp: Option<&Value>) -> Value {
    json!({
        "type": "pong",
        "timestamp": timestamp.cloned().unwrap_or(Value::Null),
    })
}
