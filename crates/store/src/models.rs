//! Domain records: users, chats, messages, reactions.
//!
//! Identifiers are opaque UUID strings. All timestamps are UTC instants
//! with sub-second resolution.

use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Mint a fresh opaque identifier.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Enums ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Away,
    #[default]
    Offline,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    OneToOne,
    Group,
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    /// Owners and admins may manage the chat.
    #[must_use]
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
    System,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: '{other}'", stringify!($ty))),
                }
            }
        }
    };
}

str_enum!(UserStatus { Online => "online", Away => "away", Offline => "offline", Busy => "busy" });
str_enum!(ChatType { OneToOne => "one_to_one", Group => "group", Channel => "channel" });
str_enum!(MemberRole { Owner => "owner", Admin => "admin", Member => "member" });
str_enum!(MessageType {
    Text => "text",
    Image => "image",
    Video => "video",
    Audio => "audio",
    File => "file",
    System => "system",
});

// ── User ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    /// Never serialized into API responses.
    #[serde(skip_serializing, default)]
    pub hashed_password: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(username: &str, email: &str, full_name: &str, hashed_password: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            username: username.into(),
            email: email.into(),
            full_name: full_name.into(),
            hashed_password: hashed_password.into(),
            status: UserStatus::Offline,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Public view of a user, safe to return to non-self callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPublic {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub status: UserStatus,
}

impl From<&User> for UserPublic {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            username: u.username.clone(),
            full_name: u.full_name.clone(),
            status: u.status,
        }
    }
}

/// Partial user update. `username` and `hashed_password` are immutable
/// through this path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub status: Option<UserStatus>,
}

// ── Chat ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMember {
    pub user_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_message_id: Option<String>,
}

impl ChatMember {
    #[must_use]
    pub fn new(user_id: &str, role: MemberRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            joined_at: Utc::now(),
            last_read_message_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub chat_type: ChatType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_encrypted: bool,
    pub created_by: String,
    pub members: Vec<ChatMember>,
    /// Resolved on read from pinned, undeleted messages of this chat.
    pub pinned_message_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    #[must_use]
    pub fn new(chat_type: ChatType, created_by: &str, members: Vec<ChatMember>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            chat_type,
            name: None,
            description: None,
            is_encrypted: false,
            created_by: created_by.into(),
            members,
            pinned_message_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn member(&self, user_id: &str) -> Option<&ChatMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    #[must_use]
    pub fn is_member(&self, user_id: &str) -> bool {
        self.member(user_id).is_some()
    }

    /// Reject member sets that violate the creation preconditions: a
    /// one-to-one chat has exactly two distinct members, and every chat
    /// needs at least one owner or admin.
    pub fn validate_shape(&self) -> parley_common::Result<()> {
        if self.chat_type == ChatType::OneToOne {
            let mut ids: Vec<&str> = self.members.iter().map(|m| m.user_id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            if self.members.len() != 2 || ids.len() != 2 {
                return Err(parley_common::Error::validation(
                    "a one-to-one chat requires exactly two distinct members",
                ));
            }
        }
        if !self.members.iter().any(|m| m.role.is_privileged()) {
            return Err(parley_common::Error::validation(
                "a chat requires at least one owner or admin",
            ));
        }
        Ok(())
    }

    /// The canonical key identifying a one-to-one chat by its unordered
    /// member pair. `None` for other chat types.
    #[must_use]
    pub fn pair_key(&self) -> Option<String> {
        if self.chat_type != ChatType::OneToOne {
            return None;
        }
        let mut ids: Vec<&str> = self.members.iter().map(|m| m.user_id.as_str()).collect();
        ids.sort_unstable();
        Some(ids.join(":"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Full replacement of the member set. Used to advance
    /// `last_read_message_id`; add/remove go through the dedicated
    /// operations.
    #[serde(skip)]
    pub members: Option<Vec<ChatMember>>,
}

// ── Message ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Opaque blob-store location.
    pub location: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub reaction_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    /// Ciphertext when the chat is encrypted.
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub reply_to_id: Option<String>,
    pub reactions: Vec<Reaction>,
    pub mentions: Vec<String>,
    pub is_deleted: bool,
    pub is_pinned: bool,
    /// user id → instant the user read the message.
    pub read_by: HashMap<String, DateTime<Utc>>,
    /// user id → instant the message was delivered to a live session.
    pub delivered_to: HashMap<String, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn new(chat_id: &str, sender_id: &str, message_type: MessageType, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            message_type,
            content: content.into(),
            attachments: Vec::new(),
            reply_to_id: None,
            reactions: Vec::new(),
            mentions: Vec::new(),
            is_deleted: false,
            is_pinned: false,
            read_by: HashMap::new(),
            delivered_to: HashMap::new(),
            created_at: now,
            edited_at: None,
            updated_at: now,
        }
    }

    /// Cursor ordering key: `created_at` with `id` as tiebreak.
    #[must_use]
    pub fn cursor(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_pinned: Option<bool>,
    /// Full replacement of the read map.
    pub read_by: Option<HashMap<String, DateTime<Utc>>>,
    /// Full replacement of the delivery map.
    pub delivered_to: Option<HashMap<String, DateTime<Utc>>>,
}

// ── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStats {
    pub message_count: u64,
    pub member_count: u64,
    pub reaction_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub message_count: u64,
    pub chat_count: u64,
    pub reaction_count: u64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips_through_str() {
        assert_eq!(ChatType::OneToOne.as_str(), "one_to_one");
        assert_eq!("one_to_one".parse::<ChatType>().unwrap(), ChatType::OneToOne);
        assert!("nope".parse::<ChatType>().is_err());
        assert_eq!(UserStatus::Busy.as_str(), "busy");
        assert_eq!(MessageType::System.as_str(), "system");
    }

    #[test]
    fn hashed_password_never_serializes() {
        let user = User::new("alice", "a@example.com", "Alice", "$argon2id$secret");
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("hashed_password").is_none());
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn pair_key_is_order_independent() {
        let a = Chat::new(
            ChatType::OneToOne,
            "u1",
            vec![ChatMember::new("u1", MemberRole::Owner), ChatMember::new("u2", MemberRole::Owner)],
        );
        let b = Chat::new(
            ChatType::OneToOne,
            "u2",
            vec![ChatMember::new("u2", MemberRole::Owner), ChatMember::new("u1", MemberRole::Owner)],
        );
        assert_eq!(a.pair_key(), b.pair_key());

        let group = Chat::new(ChatType::Group, "u1", vec![ChatMember::new("u1", MemberRole::Owner)]);
        assert_eq!(group.pair_key(), None);
    }

    #[test]
    fn public_view_hides_email() {
        let user = User::new("alice", "a@example.com", "Alice", "h");
        let public = UserPublic::from(&user);
        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("email").is_none());
    }
}
