//! SQLite driver (sqlx).
//!
//! Nested values (`attachments`, `mentions`, `read_by`, `delivered_to`)
//! are JSON text columns; reactions have their own table and are resolved
//! onto messages on read, as is the chat's pinned-message set.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
};

use parley_common::{Error, Result};

use crate::{
    MessageWindow, Store,
    models::{
        Chat, ChatMember, ChatPatch, ChatStats, ChatType, MemberRole, Message, MessagePatch,
        Reaction, User, UserPatch, UserStats, new_id,
    },
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` (`sqlite://path` or `sqlite::memory:`). In-memory
    /// databases are pinned to a single pooled connection so every query
    /// sees the same schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqlitePoolOptions::new();
        let options = if url.contains(":memory:") {
            options.max_connections(1)
        } else {
            options
        };
        let pool = options.connect(url).await?;
        Ok(Self { pool })
    }
}

// ── Timestamps ──────────────────────────────────────────────────────────────

// Persisted as epoch microseconds: integer-sortable with sub-second
// resolution.

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Persistence(format!("timestamp out of range: {micros}")))
}

// ── Row types ───────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    full_name: String,
    hashed_password: String,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(r: UserRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            username: r.username,
            email: r.email,
            full_name: r.full_name,
            hashed_password: r.hashed_password,
            status: r.status.parse().map_err(Error::Persistence)?,
            created_at: from_micros(r.created_at)?,
            updated_at: from_micros(r.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: String,
    chat_type: String,
    name: Option<String>,
    description: Option<String>,
    is_encrypted: bool,
    created_by: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    user_id: String,
    role: String,
    joined_at: i64,
    last_read_message_id: Option<String>,
}

impl TryFrom<MemberRow> for ChatMember {
    type Error = Error;

    fn try_from(r: MemberRow) -> Result<Self> {
        Ok(Self {
            user_id: r.user_id,
            role: r.role.parse().map_err(Error::Persistence)?,
            joined_at: from_micros(r.joined_at)?,
            last_read_message_id: r.last_read_message_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    sender_id: String,
    message_type: String,
    content: String,
    attachments: String,
    reply_to_id: Option<String>,
    mentions: String,
    is_deleted: bool,
    is_pinned: bool,
    read_by: String,
    delivered_to: String,
    created_at: i64,
    edited_at: Option<i64>,
    updated_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(r: MessageRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            chat_id: r.chat_id,
            sender_id: r.sender_id,
            message_type: r.message_type.parse().map_err(Error::Persistence)?,
            content: r.content,
            attachments: serde_json::from_str(&r.attachments)?,
            reply_to_id: r.reply_to_id,
            reactions: Vec::new(),
            mentions: serde_json::from_str(&r.mentions)?,
            is_deleted: r.is_deleted,
            is_pinned: r.is_pinned,
            read_by: serde_json::from_str(&r.read_by)?,
            delivered_to: serde_json::from_str(&r.delivered_to)?,
            created_at: from_micros(r.created_at)?,
            edited_at: r.edited_at.map(from_micros).transpose()?,
            updated_at: from_micros(r.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReactionRow {
    id: String,
    message_id: String,
    user_id: String,
    reaction_type: String,
    created_at: i64,
}

impl TryFrom<ReactionRow> for Reaction {
    type Error = Error;

    fn try_from(r: ReactionRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            message_id: r.message_id,
            user_id: r.user_id,
            reaction_type: r.reaction_type,
            created_at: from_micros(r.created_at)?,
        })
    }
}

fn conflict_on_unique(e: sqlx::Error, message: &str) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::conflict(message),
        _ => Error::from(e),
    }
}

// ── Internal loaders ────────────────────────────────────────────────────────

impl SqliteStore {
    async fn load_chat(&self, id: &str) -> Result<Option<Chat>> {
        let Some(row) = sqlx::query_as::<_, ChatRow>("SELECT * FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let members = sqlx::query_as::<_, MemberRow>(
            "SELECT user_id, role, joined_at, last_read_message_id
             FROM chat_members WHERE chat_id = ? ORDER BY joined_at, user_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<ChatMember>>>()?;

        // Pinned ids are never stored on the chat row; resolve them here.
        let pinned: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM messages
             WHERE chat_id = ? AND is_pinned = 1 AND is_deleted = 0
             ORDER BY created_at DESC, id DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Chat {
            id: row.id,
            chat_type: row.chat_type.parse().map_err(Error::Persistence)?,
            name: row.name,
            description: row.description,
            is_encrypted: row.is_encrypted,
            created_by: row.created_by,
            members,
            pinned_message_ids: pinned.into_iter().map(|(id,)| id).collect(),
            created_at: from_micros(row.created_at)?,
            updated_at: from_micros(row.updated_at)?,
        }))
    }

    async fn attach_reactions(&self, mut message: Message) -> Result<Message> {
        let reactions = sqlx::query_as::<_, ReactionRow>(
            "SELECT * FROM reactions WHERE message_id = ? ORDER BY created_at, id",
        )
        .bind(&message.id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<Reaction>>>()?;
        message.reactions = reactions;
        Ok(message)
    }

    async fn load_messages(&self, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(self.attach_reactions(row.try_into()?).await?);
        }
        Ok(messages)
    }

    /// Resolve a pagination cursor to `(created_at, id)`. Unknown reference
    /// ids disable the bound.
    async fn cursor_of(&self, id: Option<&str>) -> Result<Option<(i64, String)>> {
        let Some(id) = id else { return Ok(None) };
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT created_at, id FROM messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id              TEXT    PRIMARY KEY,
                username        TEXT    NOT NULL UNIQUE,
                email           TEXT    NOT NULL,
                full_name       TEXT    NOT NULL,
                hashed_password TEXT    NOT NULL,
                status          TEXT    NOT NULL,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                id           TEXT    PRIMARY KEY,
                chat_type    TEXT    NOT NULL,
                name         TEXT,
                description  TEXT,
                is_encrypted INTEGER NOT NULL DEFAULT 0,
                created_by   TEXT    NOT NULL,
                pair_key     TEXT    UNIQUE,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_members (
                chat_id              TEXT    NOT NULL,
                user_id              TEXT    NOT NULL,
                role                 TEXT    NOT NULL,
                joined_at            INTEGER NOT NULL,
                last_read_message_id TEXT,
                PRIMARY KEY (chat_id, user_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id           TEXT    PRIMARY KEY,
                chat_id      TEXT    NOT NULL,
                sender_id    TEXT    NOT NULL,
                message_type TEXT    NOT NULL,
                content      TEXT    NOT NULL,
                attachments  TEXT    NOT NULL DEFAULT '[]',
                reply_to_id  TEXT,
                mentions     TEXT    NOT NULL DEFAULT '[]',
                is_deleted   INTEGER NOT NULL DEFAULT 0,
                is_pinned    INTEGER NOT NULL DEFAULT 0,
                read_by      TEXT    NOT NULL DEFAULT '{}',
                delivered_to TEXT    NOT NULL DEFAULT '{}',
                created_at   INTEGER NOT NULL,
                edited_at    INTEGER,
                updated_at   INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_created
             ON messages (chat_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reactions (
                id            TEXT    PRIMARY KEY,
                message_id    TEXT    NOT NULL,
                user_id       TEXT    NOT NULL,
                reaction_type TEXT    NOT NULL,
                created_at    INTEGER NOT NULL,
                UNIQUE (message_id, user_id, reaction_type)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reactions_message
             ON reactions (message_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────────────────

    async fn create_user(&self, mut user: User) -> Result<User> {
        if user.id.is_empty() {
            user.id = new_id();
        }
        sqlx::query(
            "INSERT INTO users
             (id, username, email, full_name, hashed_password, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.hashed_password)
        .bind(user.status.as_str())
        .bind(to_micros(user.created_at))
        .bind(to_micros(user.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, &format!("username '{}' is already taken", user.username))
        })?;
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn update_user(&self, id: &str, patch: UserPatch) -> Result<Option<User>> {
        let result = sqlx::query(
            "UPDATE users SET
                email      = COALESCE(?, email),
                full_name  = COALESCE(?, full_name),
                status     = COALESCE(?, status),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(patch.email)
        .bind(patch.full_name)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(to_micros(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_user(id).await
    }

    async fn delete_user(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Chats ────────────────────────────────────────────────────────────

    async fn create_chat(&self, mut chat: Chat) -> Result<Chat> {
        chat.validate_shape()?;
        if chat.id.is_empty() {
            chat.id = new_id();
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO chats
             (id, chat_type, name, description, is_encrypted, created_by, pair_key,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chat.id)
        .bind(chat.chat_type.as_str())
        .bind(&chat.name)
        .bind(&chat.description)
        .bind(chat.is_encrypted)
        .bind(&chat.created_by)
        .bind(chat.pair_key())
        .bind(to_micros(chat.created_at))
        .bind(to_micros(chat.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "a one-to-one chat for this pair already exists"))?;

        for member in &chat.members {
            sqlx::query(
                "INSERT INTO chat_members (chat_id, user_id, role, joined_at, last_read_message_id)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chat.id)
            .bind(&member.user_id)
            .bind(member.role.as_str())
            .bind(to_micros(member.joined_at))
            .bind(&member.last_read_message_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(chat)
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        self.load_chat(id).await
    }

    async fn update_chat(&self, id: &str, patch: ChatPatch) -> Result<Option<Chat>> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE chats SET
                name        = COALESCE(?, name),
                description = COALESCE(?, description),
                updated_at  = ?
             WHERE id = ?",
        )
        .bind(patch.name)
        .bind(patch.description)
        .bind(to_micros(Utc::now()))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        if let Some(members) = patch.members {
            sqlx::query("DELETE FROM chat_members WHERE chat_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for member in &members {
                sqlx::query(
                    "INSERT INTO chat_members
                     (chat_id, user_id, role, joined_at, last_read_message_id)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(id)
                .bind(&member.user_id)
                .bind(member.role.as_str())
                .bind(to_micros(member.joined_at))
                .bind(&member.last_read_message_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        self.load_chat(id).await
    }

    async fn delete_chat(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM reactions
             WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chat_members WHERE chat_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_user_chats(&self, user_id: &str, skip: u32, limit: u32) -> Result<Vec<Chat>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT c.id FROM chats c
             JOIN chat_members m ON m.chat_id = c.id
             WHERE m.user_id = ?
             ORDER BY COALESCE(
                 (SELECT MAX(msg.created_at) FROM messages msg WHERE msg.chat_id = c.id),
                 c.updated_at
             ) DESC
             LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        let mut chats = Vec::with_capacity(ids.len());
        for (id,) in ids {
            if let Some(chat) = self.load_chat(&id).await? {
                chats.push(chat);
            }
        }
        Ok(chats)
    }

    async fn add_chat_member(
        &self,
        chat_id: &str,
        user_id: &str,
        role: MemberRole,
    ) -> Result<bool> {
        let chat_type: Option<(String,)> =
            sqlx::query_as("SELECT chat_type FROM chats WHERE id = ?")
                .bind(chat_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((chat_type,)) = chat_type else {
            return Ok(false);
        };
        if chat_type.parse::<ChatType>().map_err(Error::Persistence)? == ChatType::OneToOne {
            return Err(Error::validation(
                "members cannot be added to a one-to-one chat",
            ));
        }

        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id, role, joined_at, last_read_message_id)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT (chat_id, user_id) DO NOTHING",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(to_micros(Utc::now()))
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn remove_chat_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let member: Option<(String,)> = sqlx::query_as(
            "SELECT role FROM chat_members WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if member.is_none() {
            return Ok(false);
        }

        let (privileged_remain,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_members
             WHERE chat_id = ? AND user_id != ? AND role IN ('owner', 'admin')",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if privileged_remain == 0 {
            return Err(Error::validation(
                "cannot remove the last owner or admin of a chat",
            ));
        }

        sqlx::query("DELETE FROM chat_members WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(to_micros(Utc::now()))
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_chat_members(&self, chat_id: &str) -> Result<Vec<ChatMember>> {
        sqlx::query_as::<_, MemberRow>(
            "SELECT user_id, role, joined_at, last_read_message_id
             FROM chat_members WHERE chat_id = ? ORDER BY joined_at, user_id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    // ── Messages ─────────────────────────────────────────────────────────

    async fn create_message(&self, mut message: Message) -> Result<Message> {
        if message.id.is_empty() {
            message.id = new_id();
        }
        sqlx::query(
            "INSERT INTO messages
             (id, chat_id, sender_id, message_type, content, attachments, reply_to_id,
              mentions, is_deleted, is_pinned, read_by, delivered_to,
              created_at, edited_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.sender_id)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(serde_json::to_string(&message.attachments)?)
        .bind(&message.reply_to_id)
        .bind(serde_json::to_string(&message.mentions)?)
        .bind(message.is_deleted)
        .bind(message.is_pinned)
        .bind(serde_json::to_string(&message.read_by)?)
        .bind(serde_json::to_string(&message.delivered_to)?)
        .bind(to_micros(message.created_at))
        .bind(message.edited_at.map(to_micros))
        .bind(to_micros(message.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(message)
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.attach_reactions(row.try_into()?).await?)),
            None => Ok(None),
        }
    }

    async fn update_message(&self, id: &str, patch: MessagePatch) -> Result<Option<Message>> {
        let read_by = patch
            .read_by
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let delivered_to = patch
            .delivered_to
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE messages SET
                content      = COALESCE(?, content),
                edited_at    = COALESCE(?, edited_at),
                is_pinned    = COALESCE(?, is_pinned),
                read_by      = COALESCE(?, read_by),
                delivered_to = COALESCE(?, delivered_to),
                updated_at   = ?
             WHERE id = ?",
        )
        .bind(patch.content)
        .bind(patch.edited_at.map(to_micros))
        .bind(patch.is_pinned)
        .bind(read_by)
        .bind(delivered_to)
        .bind(to_micros(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_message(id).await
    }

    async fn delete_message(&self, id: &str, hard: bool) -> Result<bool> {
        if hard {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM reactions WHERE message_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM messages WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(result.rows_affected() > 0);
        }

        let result = sqlx::query(
            "UPDATE messages SET is_deleted = 1, content = '', is_pinned = 0, updated_at = ?
             WHERE id = ?",
        )
        .bind(to_micros(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_chat_messages(
        &self,
        chat_id: &str,
        window: MessageWindow<'_>,
    ) -> Result<Vec<Message>> {
        let before = self.cursor_of(window.before_id).await?;
        let after = self.cursor_of(window.after_id).await?;

        let mut sql = String::from("SELECT * FROM messages WHERE chat_id = ?");
        if before.is_some() {
            sql.push_str(" AND (created_at < ? OR (created_at = ? AND id < ?))");
        }
        if after.is_some() {
            sql.push_str(" AND (created_at > ? OR (created_at = ? AND id > ?))");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, MessageRow>(&sql).bind(chat_id);
        if let Some((ts, id)) = &before {
            query = query.bind(ts).bind(ts).bind(id);
        }
        if let Some((ts, id)) = &after {
            query = query.bind(ts).bind(ts).bind(id);
        }
        let rows = query
            .bind(window.limit)
            .bind(window.skip)
            .fetch_all(&self.pool)
            .await?;
        self.load_messages(rows).await
    }

    async fn get_message_count(&self, chat_id: &str, since: Option<DateTime<Utc>>) -> Result<u64> {
        let (count,): (i64,) = match since {
            Some(since) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM messages WHERE chat_id = ? AND created_at > ?",
                )
                .bind(chat_id)
                .bind(to_micros(since))
                .fetch_one(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
                    .bind(chat_id)
                    .fetch_one(&self.pool)
                    .await?
            },
        };
        Ok(count as u64)
    }

    async fn get_pinned_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages
             WHERE chat_id = ? AND is_pinned = 1 AND is_deleted = 0
             ORDER BY created_at DESC, id DESC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        self.load_messages(rows).await
    }

    // ── Reactions ────────────────────────────────────────────────────────

    async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<(Reaction, bool)> {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM messages WHERE id = ?")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            return Err(Error::not_found("message"));
        }

        let result = sqlx::query(
            "INSERT INTO reactions (id, message_id, user_id, reaction_type, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (message_id, user_id, reaction_type) DO NOTHING",
        )
        .bind(new_id())
        .bind(message_id)
        .bind(user_id)
        .bind(reaction_type)
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await?;
        let created = result.rows_affected() > 0;

        let row = sqlx::query_as::<_, ReactionRow>(
            "SELECT * FROM reactions
             WHERE message_id = ? AND user_id = ? AND reaction_type = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(reaction_type)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_into()?, created))
    }

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM reactions
             WHERE message_id = ? AND user_id = ? AND reaction_type = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(reaction_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Search & stats ───────────────────────────────────────────────────

    async fn search_messages(
        &self,
        query: &str,
        user_id: &str,
        chat_id: Option<&str>,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut sql = String::from(
            "SELECT m.* FROM messages m
             JOIN chat_members cm ON cm.chat_id = m.chat_id AND cm.user_id = ?
             WHERE m.is_deleted = 0 AND INSTR(LOWER(m.content), LOWER(?)) > 0",
        );
        if chat_id.is_some() {
            sql.push_str(" AND m.chat_id = ?");
        }
        sql.push_str(" ORDER BY m.created_at DESC, m.id DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, MessageRow>(&sql).bind(user_id).bind(query);
        if let Some(chat_id) = chat_id {
            q = q.bind(chat_id);
        }
        let rows = q.bind(limit).bind(skip).fetch_all(&self.pool).await?;
        self.load_messages(rows).await
    }

    async fn get_chat_stats(&self, chat_id: &str) -> Result<ChatStats> {
        let (message_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_one(&self.pool)
                .await?;
        let (member_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_members WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_one(&self.pool)
                .await?;
        let (reaction_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reactions
             WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?)",
        )
        .bind(chat_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ChatStats {
            message_count: message_count as u64,
            member_count: member_count as u64,
            reaction_count: reaction_count as u64,
        })
    }

    async fn get_user_stats(&self, user_id: &str) -> Result<UserStats> {
        let (message_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE sender_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        let (chat_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_members WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        let (reaction_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reactions WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(UserStats {
            message_count: message_count as u64,
            chat_count: chat_count as u64,
            reaction_count: reaction_count as u64,
        })
    }
}
