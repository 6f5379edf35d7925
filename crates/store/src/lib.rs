//! Persistence capability surface and drivers.
//!
//! [`Store`] lists every durable operation the service needs; drivers
//! implement it without leaking storage technology upward. Each operation
//! is transactional: on failure it leaves no partial effect.

pub mod blob;
pub mod memory;
pub mod models;
pub mod sqlite;

use {async_trait::async_trait, chrono::{DateTime, Utc}};

use parley_common::Result;

pub use {
    blob::{BlobStore, LocalBlobStore, MemoryBlobStore},
    memory::MemoryStore,
    models::{
        Attachment, Chat, ChatMember, ChatPatch, ChatStats, ChatType, MemberRole, Message,
        MessagePatch, MessageType, Reaction, User, UserPatch, UserPublic, UserStats, UserStatus,
        new_id,
    },
    sqlite::SqliteStore,
};

/// Windowed pagination over a chat's messages. `before_id` selects messages
/// strictly older than the referenced message's cursor, `after_id` strictly
/// newer; both may combine. Results are sorted newest-first with the
/// message id as tiebreak for equal timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageWindow<'a> {
    pub before_id: Option<&'a str>,
    pub after_id: Option<&'a str>,
    pub skip: u32,
    pub limit: u32,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Prepare the backing store (connect, create schema).
    async fn init(&self) -> Result<()>;
    /// Release resources. Idempotent.
    async fn close(&self) -> Result<()>;

    // ── Users ────────────────────────────────────────────────────────────

    /// Persist a new user. Fails with `Conflict` when the username is
    /// taken. Assigns id and timestamps when absent.
    async fn create_user(&self, user: User) -> Result<User>;
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn update_user(&self, id: &str, patch: UserPatch) -> Result<Option<User>>;
    async fn delete_user(&self, id: &str) -> Result<bool>;

    // ── Chats ────────────────────────────────────────────────────────────

    /// Persist a new chat. For one-to-one chats, fails with `Conflict`
    /// when a chat for the same unordered member pair already exists.
    async fn create_chat(&self, chat: Chat) -> Result<Chat>;
    async fn get_chat(&self, id: &str) -> Result<Option<Chat>>;
    async fn update_chat(&self, id: &str, patch: ChatPatch) -> Result<Option<Chat>>;
    async fn delete_chat(&self, id: &str) -> Result<bool>;
    /// Chats containing `user_id`, ordered by most recent activity (last
    /// message timestamp, falling back to the chat's `updated_at`).
    async fn get_user_chats(&self, user_id: &str, skip: u32, limit: u32) -> Result<Vec<Chat>>;
    /// Idempotent; returns `false` when the chat is missing.
    async fn add_chat_member(&self, chat_id: &str, user_id: &str, role: MemberRole)
    -> Result<bool>;
    async fn remove_chat_member(&self, chat_id: &str, user_id: &str) -> Result<bool>;
    async fn get_chat_members(&self, chat_id: &str) -> Result<Vec<ChatMember>>;

    // ── Messages ─────────────────────────────────────────────────────────

    async fn create_message(&self, message: Message) -> Result<Message>;
    async fn get_message(&self, id: &str) -> Result<Option<Message>>;
    async fn update_message(&self, id: &str, patch: MessagePatch) -> Result<Option<Message>>;
    /// Soft by default: sets `is_deleted` and redacts content. `hard`
    /// removes the row and its reactions.
    async fn delete_message(&self, id: &str, hard: bool) -> Result<bool>;
    async fn get_chat_messages(&self, chat_id: &str, window: MessageWindow<'_>)
    -> Result<Vec<Message>>;
    async fn get_message_count(&self, chat_id: &str, since: Option<DateTime<Utc>>) -> Result<u64>;
    /// Pinned, undeleted messages of a chat, newest first.
    async fn get_pinned_messages(&self, chat_id: &str) -> Result<Vec<Message>>;

    // ── Reactions ────────────────────────────────────────────────────────

    /// Idempotent per `(message, user, type)`. The bool is `true` when the
    /// reaction was newly created, `false` when it already existed.
    async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<(Reaction, bool)>;
    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<bool>;

    // ── Search & stats ───────────────────────────────────────────────────

    /// Case-insensitive substring match over message content, restricted to
    /// chats in which `user_id` is a member.
    async fn search_messages(
        &self,
        query: &str,
        user_id: &str,
        chat_id: Option<&str>,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<Message>>;
    async fn get_chat_stats(&self, chat_id: &str) -> Result<ChatStats>;
    async fn get_user_stats(&self, user_id: &str) -> Result<UserStats>;
}
