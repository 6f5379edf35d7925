//! Domain orchestrator.
//!
//! The only component that mutates the system. Every public method loads
//! the affected entities, authorizes the caller, validates the domain
//! invariants, persists, and then emits the corresponding fan-out event.
//! Fan-out failures never reach the caller.

use std::sync::Arc;

use {chrono::Utc, serde::Deserialize, tracing::debug};

use {
    parley_common::{Error, Result},
    parley_config::ParleyConfig,
    parley_security::SecurityService,
    parley_store::{
        Attachment, BlobStore, Chat, ChatMember, ChatPatch, ChatStats, ChatType, MemberRole,
        Message, MessagePatch, MessageType, MessageWindow, Reaction, Store, User, UserPatch,
        UserPublic, UserStats, UserStatus,
    },
};

use crate::{connections::ConnectionEngine, events};

/// Page size used when expanding `read_until_id` and similar sweeps.
const SWEEP_PAGE: u32 = 500;

// ── Request payloads ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCreate {
    pub chat_type: ChatType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub is_encrypted: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub chat_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageUpdate {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct FileMessageCreate {
    pub chat_id: String,
    pub location: String,
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub caption: Option<String>,
}

// ── Service ─────────────────────────────────────────────────────────────────

pub struct ChatService {
    store: Arc<dyn Store>,
    security: Arc<SecurityService>,
    engine: Arc<ConnectionEngine>,
    blobs: Arc<dyn BlobStore>,
    config: ParleyConfig,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        security: Arc<SecurityService>,
        engine: Arc<ConnectionEngine>,
        blobs: Arc<dyn BlobStore>,
        config: ParleyConfig,
    ) -> Self {
        Self {
            store,
            security,
            engine,
            blobs,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<ConnectionEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn security(&self) -> &Arc<SecurityService> {
        &self.security
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    // ── Users ────────────────────────────────────────────────────────────

    pub async fn register_user(&self, req: RegisterRequest) -> Result<User> {
        if req.username.trim().is_empty() {
            return Err(Error::validation("username must not be empty"));
        }
        if !req.email.contains('@') {
            return Err(Error::validation("email is not valid"));
        }
        if req.password.len() < 8 {
            return Err(Error::validation("password must be at least 8 characters"));
        }

        // Hashing is CPU-bound; keep it off the dispatch loop.
        let security = Arc::clone(&self.security);
        let password = req.password;
        let hashed = tokio::task::spawn_blocking(move || security.hash_password(&password))
            .await
            .map_err(|e| Error::Persistence(format!("hashing task failed: {e}")))??;

        let user = User::new(&req.username, &req.email, &req.full_name, &hashed);
        let user = self.store.create_user(user).await?;
        debug!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Verify credentials and mint a bearer token.
    pub async fn authenticate_user(&self, username: &str, password: &str) -> Result<String> {
        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| Error::auth("invalid username or password"))?;

        let security = Arc::clone(&self.security);
        let password = password.to_string();
        let hash = user.hashed_password.clone();
        let verified = tokio::task::spawn_blocking(move || security.verify_password(&password, &hash))
            .await
            .map_err(|e| Error::Persistence(format!("hashing task failed: {e}")))?;
        if !verified {
            return Err(Error::auth("invalid username or password"));
        }
        self.security.create_token(&user.id, None)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::not_found("user"))
    }

    pub async fn update_user(&self, user_id: &str, patch: UserPatch) -> Result<User> {
        if let Some(email) = &patch.email
            && !email.contains('@')
        {
            return Err(Error::validation("email is not valid"));
        }
        self.store
            .update_user(user_id, patch)
            .await?
            .ok_or_else(|| Error::not_found("user"))
    }

    /// Public view of another user, visible only through a shared chat.
    pub async fn get_user_public(&self, caller_id: &str, user_id: &str) -> Result<UserPublic> {
        let user = self.get_user(user_id).await?;
        if caller_id == user_id {
            return Ok(UserPublic::from(&user));
        }
        let mut skip = 0;
        loop {
            let page = self.store.get_user_chats(caller_id, skip, SWEEP_PAGE).await?;
            let len = page.len();
            if page.iter().any(|c| c.is_member(user_id)) {
                return Ok(UserPublic::from(&user));
            }
            if (len as u32) < SWEEP_PAGE {
                return Err(Error::authz("no shared chat with this user"));
            }
            skip += SWEEP_PAGE;
        }
    }

    pub async fn update_user_status(&self, user_id: &str, status: UserStatus) -> Result<User> {
        self.update_user(user_id, UserPatch {
            status: Some(status),
            ..Default::default()
        })
        .await
    }

    /// Ids of every chat the user belongs to. Used to scope presence
    /// announcements at connect/disconnect time.
    pub async fn member_chat_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.store.get_user_chats(user_id, skip, SWEEP_PAGE).await?;
            let len = page.len();
            ids.extend(page.into_iter().map(|c| c.id));
            if (len as u32) < SWEEP_PAGE {
                return Ok(ids);
            }
            skip += SWEEP_PAGE;
        }
    }

    // ── Chats ────────────────────────────────────────────────────────────

    pub async fn create_chat(&self, creator_id: &str, req: ChatCreate) -> Result<Chat> {
        if req.is_encrypted && !self.security.encryption_enabled() {
            return Err(Error::validation(
                "encrypted chats require encryption to be configured",
            ));
        }

        let mut member_ids = req.member_ids;
        if !member_ids.iter().any(|id| id == creator_id) {
            member_ids.push(creator_id.to_string());
        }
        member_ids.sort_unstable();
        member_ids.dedup();

        let mut members = Vec::with_capacity(member_ids.len());
        for user_id in &member_ids {
            if self.store.get_user(user_id).await?.is_none() {
                return Err(Error::not_found("user"));
            }
            let role = if user_id == creator_id {
                MemberRole::Owner
            } else {
                MemberRole::Member
            };
            members.push(ChatMember::new(user_id, role));
        }

        let mut chat = Chat::new(req.chat_type, creator_id, members);
        chat.name = req.name;
        chat.description = req.description;
        chat.is_encrypted = req.is_encrypted;
        chat.validate_shape()?;

        let chat = self.store.create_chat(chat).await?;
        debug!(chat_id = %chat.id, chat_type = chat.chat_type.as_str(), "chat created");
        Ok(chat)
    }

    /// Member-only read.
    pub async fn get_chat(&self, chat_id: &str, user_id: &str) -> Result<Chat> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;
        Ok(chat)
    }

    pub async fn update_chat(&self, chat_id: &str, user_id: &str, req: ChatUpdate) -> Result<Chat> {
        let chat = self.load_chat(chat_id).await?;
        require_privileged(&chat, user_id)?;
        self.store
            .update_chat(chat_id, ChatPatch {
                name: req.name,
                description: req.description,
                members: None,
            })
            .await?
            .ok_or_else(|| Error::not_found("chat"))
    }

    /// Owner-only.
    pub async fn delete_chat(&self, chat_id: &str, user_id: &str) -> Result<()> {
        let chat = self.load_chat(chat_id).await?;
        if require_member(&chat, user_id)?.role != MemberRole::Owner {
            return Err(Error::authz("only the chat owner may delete it"));
        }
        self.store.delete_chat(chat_id).await?;
        self.engine
            .broadcast_to_chat(chat_id, &events::chat_deleted(chat_id))
            .await;
        Ok(())
    }

    pub async fn get_user_chats(&self, user_id: &str, skip: u32, limit: u32) -> Result<Vec<Chat>> {
        self.store.get_user_chats(user_id, skip, limit).await
    }

    pub async fn add_chat_member(
        &self,
        chat_id: &str,
        actor_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let chat = self.load_chat(chat_id).await?;
        require_privileged(&chat, actor_id)?;
        if chat.chat_type == ChatType::OneToOne {
            return Err(Error::validation(
                "members cannot be added to a one-to-one chat",
            ));
        }
        if self.store.get_user(user_id).await?.is_none() {
            return Err(Error::not_found("user"));
        }
        self.store
            .add_chat_member(chat_id, user_id, MemberRole::Member)
            .await?;

        let event = events::member_added(chat_id, user_id);
        self.engine.broadcast_to_chat(chat_id, &event).await;
        self.engine.send_to_user(user_id, &event).await;
        Ok(())
    }

    /// Owners/admins may remove anyone; a member may remove themselves.
    pub async fn remove_chat_member(
        &self,
        chat_id: &str,
        actor_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let chat = self.load_chat(chat_id).await?;
        let actor = require_member(&chat, actor_id)?;
        if actor_id != user_id && !actor.role.is_privileged() {
            return Err(Error::authz("not allowed to remove this member"));
        }
        if chat.chat_type == ChatType::OneToOne {
            return Err(Error::validation(
                "members cannot be removed from a one-to-one chat",
            ));
        }
        if !self.store.remove_chat_member(chat_id, user_id).await? {
            return Err(Error::not_found("chat member"));
        }
        self.engine
            .broadcast_to_chat(chat_id, &events::member_removed(chat_id, user_id))
            .await;
        Ok(())
    }

    pub async fn get_chat_members(&self, chat_id: &str, user_id: &str) -> Result<Vec<ChatMember>> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;
        Ok(chat.members)
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// Persist a message, broadcast it to the chat room, inbox-ping every
    /// member without a session in the room, and record delivery marks for
    /// the recipients that accepted the frame.
    pub async fn send_message(&self, sender_id: &str, req: MessageCreate) -> Result<Message> {
        let chat = self.load_chat(&req.chat_id).await?;
        require_member(&chat, sender_id)?;

        if req.message_type == MessageType::Text && req.content.trim().is_empty() {
            return Err(Error::validation("message content must not be empty"));
        }
        if let Some(reply_to_id) = &req.reply_to_id {
            let target = self
                .store
                .get_message(reply_to_id)
                .await?
                .ok_or_else(|| Error::not_found("reply target"))?;
            if target.chat_id != chat.id {
                return Err(Error::validation("reply target is in another chat"));
            }
        }
        for mention in &req.mentions {
            if !chat.is_member(mention) {
                return Err(Error::validation(format!(
                    "mentioned user '{mention}' is not a chat member"
                )));
            }
        }

        let plaintext = req.content;
        let stored_content = if chat.is_encrypted {
            self.security.encrypt(&plaintext)?
        } else {
            plaintext.clone()
        };

        let mut message = Message::new(&chat.id, sender_id, req.message_type, &stored_content);
        message.attachments = req.attachments;
        message.reply_to_id = req.reply_to_id;
        message.mentions = req.mentions;

        let mut message = self.store.create_message(message).await?;
        message.content = plaintext;

        let delivered = self
            .engine
            .broadcast_to_chat(&chat.id, &events::new_message(&message))
            .await;

        // Members without a session in the room still get an inbox ping.
        let in_room = self.engine.users_in_room(&chat.id).await;
        let notification = events::notification(&chat.id, &message.id);
        for member in &chat.members {
            if member.user_id != sender_id && !in_room.contains(&member.user_id) {
                self.engine.send_to_user(&member.user_id, &notification).await;
            }
        }

        if !delivered.is_empty() {
            let now = Utc::now();
            let mut marks = message.delivered_to.clone();
            for user_id in delivered {
                marks.entry(user_id).or_insert(now);
            }
            message.delivered_to = marks.clone();
            self.store
                .update_message(&message.id, MessagePatch {
                    delivered_to: Some(marks),
                    ..Default::default()
                })
                .await?;
        }

        Ok(message)
    }

    pub async fn get_message(&self, message_id: &str, user_id: &str) -> Result<Message> {
        let message = self.load_message(message_id).await?;
        let chat = self.load_chat(&message.chat_id).await?;
        require_member(&chat, user_id)?;
        Ok(self.open_content(&chat, message))
    }

    pub async fn get_chat_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        window: MessageWindow<'_>,
    ) -> Result<Vec<Message>> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;
        let messages = self.store.get_chat_messages(chat_id, window).await?;
        Ok(messages
            .into_iter()
            .map(|m| self.open_content(&chat, m))
            .collect())
    }

    /// Sender-only edit, bounded by the configured edit window.
    pub async fn update_message(
        &self,
        message_id: &str,
        user_id: &str,
        req: MessageUpdate,
    ) -> Result<Message> {
        let message = self.load_message(message_id).await?;
        let chat = self.load_chat(&message.chat_id).await?;
        if message.sender_id != user_id {
            return Err(Error::authz("only the sender may edit a message"));
        }
        if message.is_deleted {
            return Err(Error::validation("cannot edit a deleted message"));
        }
        if let Some(window_minutes) = self.config.message_edit_window_minutes {
            let age = Utc::now() - message.created_at;
            if age > chrono::Duration::minutes(window_minutes as i64) {
                return Err(Error::authz("the edit window for this message has closed"));
            }
        }

        let stored_content = if chat.is_encrypted {
            self.security.encrypt(&req.content)?
        } else {
            req.content.clone()
        };
        let mut updated = self
            .store
            .update_message(message_id, MessagePatch {
                content: Some(stored_content),
                edited_at: Some(Utc::now()),
                ..Default::default()
            })
            .await?
            .ok_or_else(|| Error::not_found("message"))?;
        updated.content = req.content;

        self.engine
            .broadcast_to_chat(&chat.id, &events::message_updated(&updated))
            .await;
        Ok(updated)
    }

    /// Soft delete is sender-only; `delete_for_everyone` removes the row
    /// and is allowed for the sender or a chat owner/admin.
    pub async fn delete_message(
        &self,
        message_id: &str,
        user_id: &str,
        delete_for_everyone: bool,
    ) -> Result<()> {
        let message = self.load_message(message_id).await?;
        let chat = self.load_chat(&message.chat_id).await?;
        let actor = require_member(&chat, user_id)?;

        if delete_for_everyone {
            if message.sender_id != user_id && !actor.role.is_privileged() {
                return Err(Error::authz(
                    "deleting for everyone requires the sender or a chat owner or admin",
                ));
            }
        } else if message.sender_id != user_id {
            return Err(Error::authz("only the sender may delete their message"));
        }

        self.store.delete_message(message_id, delete_for_everyone).await?;
        self.engine
            .broadcast_to_chat(&chat.id, &events::message_deleted(&chat.id, message_id))
            .await;
        Ok(())
    }

    // ── Read receipts ────────────────────────────────────────────────────

    /// Mark messages read for `user_id`. Explicit `message_ids` are marked
    /// directly; `read_until_id` expands to every chat message at or before
    /// the target. A read mark is overwritten only by a newer instant, so
    /// marks never move backwards. Advances the member's
    /// `last_read_message_id` and emits a single `read_receipt` with the
    /// affected ids.
    pub async fn mark_messages_read(
        &self,
        chat_id: &str,
        user_id: &str,
        message_ids: Option<Vec<String>>,
        read_until_id: Option<String>,
    ) -> Result<Vec<String>> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;

        let mut targets: Vec<Message> = Vec::new();
        let explicit = message_ids.is_some();
        if let Some(ids) = message_ids {
            for id in ids {
                let message = self.load_message(&id).await?;
                if message.chat_id != chat.id {
                    return Err(Error::validation("message is in another chat"));
                }
                targets.push(message);
            }
        }

        // `read_until_id` bounds the sweep; without any explicit targets
        // the whole chat is swept.
        let until_cursor = match read_until_id {
            Some(until_id) => {
                let until = self.load_message(&until_id).await?;
                if until.chat_id != chat.id {
                    return Err(Error::validation("message is in another chat"));
                }
                Some((until.created_at, until.id))
            },
            None => None,
        };
        if until_cursor.is_some() || !explicit {
            let mut skip = 0;
            loop {
                let page = self
                    .store
                    .get_chat_messages(chat_id, MessageWindow {
                        skip,
                        limit: SWEEP_PAGE,
                        ..Default::default()
                    })
                    .await?;
                let len = page.len();
                for message in page {
                    let within = until_cursor
                        .as_ref()
                        .is_none_or(|u| (message.created_at, message.id.clone()) <= *u);
                    if within {
                        targets.push(message);
                    }
                }
                if (len as u32) < SWEEP_PAGE {
                    break;
                }
                skip += SWEEP_PAGE;
            }
        }

        let now = Utc::now();
        let mut affected = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut highest: Option<(chrono::DateTime<Utc>, String)> = None;
        for message in targets {
            if !seen.insert(message.id.clone()) {
                continue;
            }
            // Overwrite only if newer: a mark never moves backwards.
            if message.read_by.get(user_id).is_some_and(|at| *at >= now) {
                continue;
            }
            let mut read_by = message.read_by.clone();
            read_by.insert(user_id.to_string(), now);
            self.store
                .update_message(&message.id, MessagePatch {
                    read_by: Some(read_by),
                    ..Default::default()
                })
                .await?;
            let cursor = (message.created_at, message.id.clone());
            if highest.as_ref().is_none_or(|h| cursor > *h) {
                highest = Some(cursor);
            }
            affected.push(message.id);
        }

        if let Some((_, last_read_id)) = highest {
            let mut members = chat.members.clone();
            if let Some(member) = members.iter_mut().find(|m| m.user_id == user_id) {
                member.last_read_message_id = Some(last_read_id);
            }
            self.store
                .update_chat(chat_id, ChatPatch {
                    members: Some(members),
                    ..Default::default()
                })
                .await?;
        }

        if !affected.is_empty() {
            self.engine
                .broadcast_to_chat(chat_id, &events::read_receipt(chat_id, user_id, &affected))
                .await;
        }
        Ok(affected)
    }

    // ── Reactions ────────────────────────────────────────────────────────

    /// Idempotent. Emits `reaction_added` only on the absent→present
    /// transition.
    pub async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<Reaction> {
        if reaction_type.is_empty() || reaction_type.chars().count() > 16 {
            return Err(Error::validation(
                "reaction type must be between 1 and 16 code points",
            ));
        }
        let message = self.load_message(message_id).await?;
        let chat = self.load_chat(&message.chat_id).await?;
        require_member(&chat, user_id)?;

        let (reaction, created) = self
            .store
            .add_reaction(message_id, user_id, reaction_type)
            .await?;
        if created {
            self.engine
                .broadcast_to_chat(&chat.id, &events::reaction_added(&chat.id, &reaction))
                .await;
        }
        Ok(reaction)
    }

    pub async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<bool> {
        let message = self.load_message(message_id).await?;
        let chat = self.load_chat(&message.chat_id).await?;
        require_member(&chat, user_id)?;

        let removed = self
            .store
            .remove_reaction(message_id, user_id, reaction_type)
            .await?;
        if removed {
            self.engine
                .broadcast_to_chat(
                    &chat.id,
                    &events::reaction_removed(&chat.id, message_id, user_id, reaction_type),
                )
                .await;
        }
        Ok(removed)
    }

    // ── Pinning ──────────────────────────────────────────────────────────

    pub async fn pin_message(&self, message_id: &str, user_id: &str) -> Result<Message> {
        self.set_pinned(message_id, user_id, true).await
    }

    pub async fn unpin_message(&self, message_id: &str, user_id: &str) -> Result<Message> {
        self.set_pinned(message_id, user_id, false).await
    }

    pub async fn get_pinned_messages(&self, chat_id: &str, user_id: &str) -> Result<Vec<Message>> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;
        let pinned = self.store.get_pinned_messages(chat_id).await?;
        Ok(pinned
            .into_iter()
            .map(|m| self.open_content(&chat, m))
            .collect())
    }

    async fn set_pinned(&self, message_id: &str, user_id: &str, pinned: bool) -> Result<Message> {
        let message = self.load_message(message_id).await?;
        let chat = self.load_chat(&message.chat_id).await?;
        require_privileged(&chat, user_id)?;
        if pinned && message.is_deleted {
            return Err(Error::validation("cannot pin a deleted message"));
        }

        let updated = self
            .store
            .update_message(message_id, MessagePatch {
                is_pinned: Some(pinned),
                ..Default::default()
            })
            .await?
            .ok_or_else(|| Error::not_found("message"))?;

        let event = if pinned {
            events::message_pinned(&chat.id, message_id)
        } else {
            events::message_unpinned(&chat.id, message_id)
        };
        self.engine.broadcast_to_chat(&chat.id, &event).await;
        Ok(self.open_content(&chat, updated))
    }

    // ── Typing ───────────────────────────────────────────────────────────

    /// Pure fan-out; nothing is persisted. The originator's own sessions
    /// are excluded.
    pub async fn typing_indicator(
        &self,
        chat_id: &str,
        user_id: &str,
        is_typing: bool,
    ) -> Result<()> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;
        self.engine
            .broadcast_to_chat_except_user(
                chat_id,
                user_id,
                &events::typing(chat_id, user_id, is_typing),
            )
            .await;
        Ok(())
    }

    // ── Search & stats ───────────────────────────────────────────────────

    pub async fn search_messages(
        &self,
        user_id: &str,
        query: &str,
        chat_id: Option<&str>,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<Message>> {
        if query.trim().is_empty() {
            return Err(Error::validation("search query must not be empty"));
        }
        if let Some(chat_id) = chat_id {
            let chat = self.load_chat(chat_id).await?;
            require_member(&chat, user_id)?;
        }
        self.store
            .search_messages(query, user_id, chat_id, skip, limit)
            .await
    }

    pub async fn get_chat_stats(&self, chat_id: &str, user_id: &str) -> Result<ChatStats> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;
        self.store.get_chat_stats(chat_id).await
    }

    pub async fn get_user_stats(&self, user_id: &str) -> Result<UserStats> {
        self.store.get_user_stats(user_id).await
    }

    // ── Files ────────────────────────────────────────────────────────────

    /// Validate and store an upload, returning its opaque location.
    pub async fn upload_file(
        &self,
        user_id: &str,
        chat_id: &str,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<String> {
        let chat = self.load_chat(chat_id).await?;
        require_member(&chat, user_id)?;

        if bytes.len() as u64 > self.config.max_file_size_bytes() {
            return Err(Error::validation(format!(
                "file exceeds the {} MB limit",
                self.config.max_file_size_mb
            )));
        }
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
            .ok_or_else(|| Error::validation("file name has no extension"))?;
        if !self.config.extension_allowed(extension) {
            return Err(Error::validation(format!(
                "extension '{extension}' is not allowed"
            )));
        }

        self.blobs.save(bytes, file_name, content_type).await
    }

    /// Send a message referencing a previously uploaded blob. The message
    /// type is inferred from the content type.
    pub async fn send_file_message(
        &self,
        sender_id: &str,
        req: FileMessageCreate,
    ) -> Result<Message> {
        let message_type = match req.content_type.split('/').next() {
            Some("image") => MessageType::Image,
            Some("video") => MessageType::Video,
            Some("audio") => MessageType::Audio,
            _ => MessageType::File,
        };
        self.send_message(sender_id, MessageCreate {
            chat_id: req.chat_id,
            content: req.caption.unwrap_or_default(),
            message_type,
            attachments: vec![Attachment {
                location: req.location,
                file_name: req.file_name,
                content_type: req.content_type,
                size: req.size,
                width: None,
                height: None,
            }],
            reply_to_id: None,
            mentions: Vec::new(),
        })
        .await
    }

    pub async fn fetch_file(&self, user_id: &str, location: &str) -> Result<Vec<u8>> {
        // Any authenticated user may fetch by opaque location.
        let _ = user_id;
        self.blobs.fetch(location).await
    }

    // ── Internal ─────────────────────────────────────────────────────────

    async fn load_chat(&self, chat_id: &str) -> Result<Chat> {
        self.store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| Error::not_found("chat"))
    }

    async fn load_message(&self, message_id: &str) -> Result<Message> {
        self.store
            .get_message(message_id)
            .await?
            .ok_or_else(|| Error::not_found("message"))
    }

    /// Decrypt message content for reads and events. Redacted (deleted)
    /// messages pass through untouched.
    fn open_content(&self, chat: &Chat, mut message: Message) -> Message {
        if chat.is_encrypted && !message.is_deleted && !message.content.is_empty() {
            match self.security.decrypt(&message.content) {
                Ok(plaintext) => message.content = plaintext,
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "failed to open message content");
                },
            }
        }
        message
    }
}

/// Membership gate: `AuthzError` for non-members.
fn require_member<'c>(chat: &'c Chat, user_id: &str) -> Result<&'c ChatMember> {
    chat.member(user_id)
        .ok_or_else(|| Error::authz("not a member of this chat"))
}

/// Owner/admin gate.
fn require_privileged(chat: &Chat, user_id: &str) -> Result<()> {
    if require_member(chat, user_id)?.role.is_privileged() {
        Ok(())
    } else {
        Err(Error::authz("requires chat owner or admin"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::connections::SessionHandle,
        parley_store::{MemoryBlobStore, MemoryStore},
        serde_json::Value,
        tokio::sync::mpsc,
    };

    fn test_config() -> ParleyConfig {
        ParleyConfig {
            jwt_secret: "test-secret-key".into(),
            enable_encryption: true,
            encryption_key: Some("0123456789abcdef0123456789abcdef".into()),
            ..ParleyConfig::default()
        }
    }

    fn service() -> ChatService {
        let config = test_config();
        ChatService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SecurityService::new(&config).unwrap()),
            Arc::new(ConnectionEngine::new()),
            Arc::new(MemoryBlobStore::new()),
            config,
        )
    }

    async fn send(svc: &ChatService, chat_id: &str, sender: &str, content: &str) -> Message {
        svc.send_message(sender, MessageCreate {
            chat_id: chat_id.into(),
            content: content.into(),
            message_type: MessageType::Text,
            attachments: vec![],
            reply_to_id: None,
            mentions: vec![],
        })
        .await
        .unwrap()
    }

    async fn register(svc: &ChatService, username: &str) -> User {
        svc.register_user(RegisterRequest {
            username: username.into(),
            email: format!("{username}@example.com"),
            password: "Password123!".into(),
            full_name: username.into(),
        })
        .await
        .unwrap()
    }

    async fn group(svc: &ChatService, creator: &str, member_ids: Vec<String>) -> Chat {
        svc.create_chat(creator, ChatCreate {
            chat_type: ChatType::Group,
            name: Some("Test Chat".into()),
            description: None,
            member_ids,
            is_encrypted: false,
        })
        .await
        .unwrap()
    }

    /// Connect a session for `user_id` and join it to `chat_id`, returning
    /// the frame receiver with the handshake frames drained.
    async fn join_session(
        svc: &ChatService,
        user_id: &str,
        chat_id: &str,
    ) -> mpsc::Receiver<String> {
        let (handle, mut rx) = SessionHandle::create(32);
        let sid = handle.id.clone();
        svc.engine().connect(handle, user_id, &[]).await;
        svc.engine().join_chat(&sid, chat_id).await;
        let _ = rx.recv().await; // connected
        let _ = rx.recv().await; // chat_joined
        rx
    }

    fn parse(frame: Option<String>) -> Value {
        serde_json::from_str(&frame.unwrap()).unwrap()
    }

    // ── Registration & auth ──────────────────────────────────────────────

    #[tokio::test]
    async fn registration_and_login_flow() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        assert_ne!(alice.hashed_password, "Password123!");

        let token = svc.authenticate_user("alice", "Password123!").await.unwrap();
        let subject = svc.security().user_id_from_token(&token).unwrap();
        assert_eq!(subject, alice.id);

        let err = svc.authenticate_user("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        let err = svc
            .authenticate_user("nobody", "Password123!")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));

        let err = register_err(&svc, "alice").await;
        assert!(matches!(err, Error::Conflict(_)));
    }

    async fn register_err(svc: &ChatService, username: &str) -> Error {
        svc.register_user(RegisterRequest {
            username: username.into(),
            email: format!("{username}@example.com"),
            password: "Password123!".into(),
            full_name: username.into(),
        })
        .await
        .unwrap_err()
    }

    #[tokio::test]
    async fn registration_validates_input() {
        let svc = service();
        let err = svc
            .register_user(RegisterRequest {
                username: "bob".into(),
                email: "bob@example.com".into(),
                password: "short".into(),
                full_name: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = svc
            .register_user(RegisterRequest {
                username: "bob".into(),
                email: "not-an-email".into(),
                password: "Password123!".into(),
                full_name: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    // ── Chats & membership ───────────────────────────────────────────────

    #[tokio::test]
    async fn creator_becomes_owner() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;

        assert_eq!(chat.member(&alice.id).unwrap().role, MemberRole::Owner);
        assert_eq!(chat.member(&bob.id).unwrap().role, MemberRole::Member);
    }

    #[tokio::test]
    async fn non_member_access_is_denied_until_added() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let carol = register(&svc, "carol").await;
        let chat = group(&svc, &alice.id, vec![]).await;

        let err = svc.get_chat(&chat.id, &carol.id).await.unwrap_err();
        assert!(matches!(err, Error::Authz(_)));

        svc.add_chat_member(&chat.id, &alice.id, &carol.id)
            .await
            .unwrap();
        assert!(svc.get_chat(&chat.id, &carol.id).await.is_ok());

        svc.remove_chat_member(&chat.id, &carol.id, &carol.id)
            .await
            .unwrap();
        let err = svc.get_chat(&chat.id, &carol.id).await.unwrap_err();
        assert!(matches!(err, Error::Authz(_)));
    }

    #[tokio::test]
    async fn plain_member_cannot_manage_chat() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let carol = register(&svc, "carol").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;

        let err = svc
            .update_chat(&chat.id, &bob.id, ChatUpdate {
                name: Some("hijack".into()),
                description: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authz(_)));

        let err = svc
            .add_chat_member(&chat.id, &bob.id, &carol.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authz(_)));

        let err = svc.delete_chat(&chat.id, &bob.id).await.unwrap_err();
        assert!(matches!(err, Error::Authz(_)));
    }

    #[tokio::test]
    async fn encrypted_chat_requires_configured_cipher() {
        let config = ParleyConfig {
            jwt_secret: "test-secret-key".into(),
            ..ParleyConfig::default()
        };
        let svc = ChatService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SecurityService::new(&config).unwrap()),
            Arc::new(ConnectionEngine::new()),
            Arc::new(MemoryBlobStore::new()),
            config,
        );
        let alice = register(&svc, "alice").await;
        let err = svc
            .create_chat(&alice.id, ChatCreate {
                chat_type: ChatType::Group,
                name: None,
                description: None,
                member_ids: vec![],
                is_encrypted: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    // ── Messages ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_reaches_joined_sessions() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;

        let mut alice_rx = join_session(&svc, &alice.id, &chat.id).await;
        let mut bob_rx = join_session(&svc, &bob.id, &chat.id).await;

        let message = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "Hello".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();

        // Both members get the frame, sender included (echo).
        for rx in [&mut alice_rx, &mut bob_rx] {
            let frame = parse(rx.recv().await);
            assert_eq!(frame["type"], "new_message");
            assert_eq!(frame["content"], "Hello");
            assert_eq!(frame["sender_id"], Value::String(alice.id.clone()));
        }

        // Both recipients picked up delivery marks.
        let stored = svc.get_message(&message.id, &alice.id).await.unwrap();
        assert!(stored.delivered_to.contains_key(&alice.id));
        assert!(stored.delivered_to.contains_key(&bob.id));
    }

    #[tokio::test]
    async fn member_not_in_room_gets_inbox_ping() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;

        let mut alice_rx = join_session(&svc, &alice.id, &chat.id).await;
        // Bob is connected but has not joined the room.
        let (bob_handle, mut bob_rx) = SessionHandle::create(32);
        svc.engine().connect(bob_handle, &bob.id, &[]).await;
        let _ = bob_rx.recv().await; // connected

        let message = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "ping bob".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();

        let frame = parse(alice_rx.recv().await);
        assert_eq!(frame["type"], "new_message");

        let frame = parse(bob_rx.recv().await);
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["chat_id"], Value::String(chat.id.clone()));
        assert_eq!(frame["message_id"], Value::String(message.id.clone()));
    }

    #[tokio::test]
    async fn non_member_send_is_rejected_at_send_time() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let mallory = register(&svc, "mallory").await;
        let chat = group(&svc, &alice.id, vec![]).await;

        let err = svc
            .send_message(&mallory.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "let me in".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authz(_)));
    }

    #[tokio::test]
    async fn encrypted_chat_round_trip() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let chat = svc
            .create_chat(&alice.id, ChatCreate {
                chat_type: ChatType::Group,
                name: Some("sealed".into()),
                description: None,
                member_ids: vec![],
                is_encrypted: true,
            })
            .await
            .unwrap();

        let sent = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "secret".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();
        // The return value carries the plaintext back to the sender.
        assert_eq!(sent.content, "secret");

        // Fetched through the orchestrator: decrypted for members.
        let messages = svc
            .get_chat_messages(&chat.id, &alice.id, MessageWindow {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(messages[0].content, "secret");
    }

    #[tokio::test]
    async fn edit_is_sender_only_and_sets_edited_at() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;
        let message = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "original".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();

        let err = svc
            .update_message(&message.id, &bob.id, MessageUpdate {
                content: "hacked".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authz(_)));

        let updated = svc
            .update_message(&message.id, &alice.id, MessageUpdate {
                content: "edited".into(),
            })
            .await
            .unwrap();
        assert_eq!(updated.content, "edited");
        assert!(updated.edited_at.is_some());
    }

    #[tokio::test]
    async fn delete_rules_follow_the_matrix() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;

        // Soft delete is sender-only: rejected even for the owner.
        let m1 = send(&svc, &chat.id, &bob.id, "from bob").await;
        let err = svc
            .delete_message(&m1.id, &alice.id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authz(_)));

        // The sender may soft-delete their own message.
        svc.delete_message(&m1.id, &bob.id, false).await.unwrap();
        let m1 = svc.get_message(&m1.id, &bob.id).await.unwrap();
        assert!(m1.is_deleted);
        assert!(m1.content.is_empty());

        // A plain member may not delete someone else's message either way.
        let m2 = send(&svc, &chat.id, &alice.id, "from alice").await;
        let err = svc
            .delete_message(&m2.id, &bob.id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authz(_)));
        let err = svc.delete_message(&m2.id, &bob.id, true).await.unwrap_err();
        assert!(matches!(err, Error::Authz(_)));

        // Owners remove other members' messages with delete_for_everyone.
        let m3 = send(&svc, &chat.id, &bob.id, "from bob again").await;
        svc.delete_message(&m3.id, &alice.id, true).await.unwrap();
        let err = svc.get_message(&m3.id, &bob.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // The sender may use delete_for_everyone on their own message too.
        let m4 = send(&svc, &chat.id, &bob.id, "one more").await;
        svc.delete_message(&m4.id, &bob.id, true).await.unwrap();
        let err = svc.get_message(&m4.id, &bob.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    // ── Read receipts ────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_until_marks_everything_and_emits_one_receipt() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;
        let mut alice_rx = join_session(&svc, &alice.id, &chat.id).await;

        let mut ids = Vec::new();
        for i in 0..3 {
            let m = svc
                .send_message(&alice.id, MessageCreate {
                    chat_id: chat.id.clone(),
                    content: format!("m{i}"),
                    message_type: MessageType::Text,
                    attachments: vec![],
                    reply_to_id: None,
                    mentions: vec![],
                })
                .await
                .unwrap();
            let _ = alice_rx.recv().await; // own echo
            ids.push(m.id);
        }

        let affected = svc
            .mark_messages_read(&chat.id, &bob.id, None, Some(ids[2].clone()))
            .await
            .unwrap();
        assert_eq!(affected.len(), 3);

        for id in &ids {
            let m = svc.get_message(id, &bob.id).await.unwrap();
            assert!(m.read_by.contains_key(&bob.id));
        }

        // One receipt frame listing all three ids.
        let frame = parse(alice_rx.recv().await);
        assert_eq!(frame["type"], "read_receipt");
        assert_eq!(frame["user_id"], Value::String(bob.id.clone()));
        assert_eq!(frame["message_ids"].as_array().unwrap().len(), 3);
        assert!(alice_rx.try_recv().is_err());

        // The member's high-water mark advanced to the newest message.
        let chat = svc.get_chat(&chat.id, &bob.id).await.unwrap();
        assert_eq!(
            chat.member(&bob.id).unwrap().last_read_message_id,
            Some(ids[2].clone())
        );

        // Marking again refreshes the read instants with the newer time;
        // a mark never moves backwards.
        let first_read = svc.get_message(&ids[0], &bob.id).await.unwrap().read_by[&bob.id];
        let affected = svc
            .mark_messages_read(&chat.id, &bob.id, None, Some(ids[2].clone()))
            .await
            .unwrap();
        assert_eq!(affected.len(), 3);
        let second_read = svc.get_message(&ids[0], &bob.id).await.unwrap().read_by[&bob.id];
        assert!(second_read >= first_read);
    }

    // ── Reactions ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn reaction_emits_only_on_transition() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;
        let message = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "react to me".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();
        let mut alice_rx = join_session(&svc, &alice.id, &chat.id).await;

        let first = svc.add_reaction(&message.id, &bob.id, "👍").await.unwrap();
        let frame = parse(alice_rx.recv().await);
        assert_eq!(frame["type"], "reaction_added");
        assert_eq!(frame["reaction_type"], "👍");

        // Duplicate: same reaction back, no second frame.
        let second = svc.add_reaction(&message.id, &bob.id, "👍").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(alice_rx.try_recv().is_err());

        assert!(svc.remove_reaction(&message.id, &bob.id, "👍").await.unwrap());
        let frame = parse(alice_rx.recv().await);
        assert_eq!(frame["type"], "reaction_removed");
    }

    #[tokio::test]
    async fn oversized_reaction_type_is_rejected() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let chat = group(&svc, &alice.id, vec![]).await;
        let message = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "hi".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();

        let err = svc
            .add_reaction(&message.id, &alice.id, &"x".repeat(17))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    // ── Pinning ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pin_round_trip_keeps_chat_consistent() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;
        let message = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "pin me".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();

        // Plain members may not pin.
        let err = svc.pin_message(&message.id, &bob.id).await.unwrap_err();
        assert!(matches!(err, Error::Authz(_)));

        let pinned = svc.pin_message(&message.id, &alice.id).await.unwrap();
        assert!(pinned.is_pinned);
        let chat_view = svc.get_chat(&chat.id, &alice.id).await.unwrap();
        assert_eq!(chat_view.pinned_message_ids, vec![message.id.clone()]);
        assert_eq!(
            svc.get_pinned_messages(&chat.id, &alice.id)
                .await
                .unwrap()
                .len(),
            1
        );

        let unpinned = svc.unpin_message(&message.id, &alice.id).await.unwrap();
        assert!(!unpinned.is_pinned);
        assert!(
            svc.get_pinned_messages(&chat.id, &alice.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    // ── Typing ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn typing_skips_originator_sessions() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;
        let mut alice_rx = join_session(&svc, &alice.id, &chat.id).await;
        let mut bob_rx = join_session(&svc, &bob.id, &chat.id).await;

        svc.typing_indicator(&chat.id, &alice.id, true).await.unwrap();
        let frame = parse(bob_rx.recv().await);
        assert_eq!(frame["type"], "typing");
        assert_eq!(frame["is_typing"], Value::Bool(true));
        assert!(alice_rx.try_recv().is_err());
    }

    // ── Files ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upload_validates_size_and_extension() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let chat = group(&svc, &alice.id, vec![]).await;

        let err = svc
            .upload_file(&alice.id, &chat.id, b"data", "malware.exe", "application/_")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let big = vec![0u8; (svc.config().max_file_size_bytes() + 1) as usize];
        let err = svc
            .upload_file(&alice.id, &chat.id, &big, "big.pdf", "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let location = svc
            .upload_file(&alice.id, &chat.id, b"tiny", "note.txt", "text/plain")
            .await
            .unwrap();
        assert_eq!(svc.fetch_file(&alice.id, &location).await.unwrap(), b"tiny");
    }

    #[tokio::test]
    async fn file_message_infers_type_from_content_type() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let chat = group(&svc, &alice.id, vec![]).await;
        let location = svc
            .upload_file(&alice.id, &chat.id, b"jpegbytes", "cat.jpg", "image/jpeg")
            .await
            .unwrap();

        let message = svc
            .send_file_message(&alice.id, FileMessageCreate {
                chat_id: chat.id.clone(),
                location: location.clone(),
                file_name: "cat.jpg".into(),
                content_type: "image/jpeg".into(),
                size: 9,
                caption: Some("look".into()),
            })
            .await
            .unwrap();
        assert_eq!(message.message_type, MessageType::Image);
        assert_eq!(message.content, "look");
        assert_eq!(message.attachments[0].location, location);
    }

    // ── Search & stats ───────────────────────────────────────────────────

    #[tokio::test]
    async fn search_and_stats() {
        let svc = service();
        let alice = register(&svc, "alice").await;
        let bob = register(&svc, "bob").await;
        let chat = group(&svc, &alice.id, vec![bob.id.clone()]).await;
        let message = svc
            .send_message(&alice.id, MessageCreate {
                chat_id: chat.id.clone(),
                content: "findable needle".into(),
                message_type: MessageType::Text,
                attachments: vec![],
                reply_to_id: None,
                mentions: vec![],
            })
            .await
            .unwrap();
        svc.add_reaction(&message.id, &bob.id, "👍").await.unwrap();

        let hits = svc
            .search_messages(&alice.id, "NEEDLE", None, 0, 20)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let err = svc.search_messages(&alice.id, "  ", None, 0, 20).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let stats = svc.get_chat_stats(&chat.id, &bob.id).await.unwrap();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.member_count, 2);
        assert_eq!(stats.reaction_count, 1);

        let stats = svc.get_user_stats(&bob.id).await.unwrap();
        assert_eq!(stats.reaction_count, 1);
        assert_eq!(stats.chat_count, 1);
    }
}
