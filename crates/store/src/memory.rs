//! In-memory driver. The default backing store; also what the test suites
//! run against.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tokio::sync::RwLock,
};

use parley_common::{Error, Result};

use crate::{
    MessageWindow, Store,
    models::{
        Chat, ChatMember, ChatPatch, ChatStats, ChatType, MemberRole, Message, MessagePatch,
        Reaction, User, UserPatch, UserStats, new_id,
    },
};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    chats: HashMap<String, Chat>,
    messages: HashMap<String, Message>,
}

impl Inner {
    /// Resolve `pinned_message_ids` from the message table (id-references
    /// only; the sets are never stored on the chat row).
    fn resolved(&self, chat: &Chat) -> Chat {
        let mut resolved = chat.clone();
        let mut pinned: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| m.chat_id == chat.id && m.is_pinned && !m.is_deleted)
            .collect();
        pinned.sort_by(|a, b| b.cursor().cmp(&a.cursor()));
        resolved.pinned_message_ids = pinned.iter().map(|m| m.id.clone()).collect();
        resolved
    }

    /// Most recent activity for chat ordering: last message timestamp,
    /// falling back to the chat's own `updated_at`.
    fn last_activity(&self, chat: &Chat) -> DateTime<Utc> {
        self.messages
            .values()
            .filter(|m| m.chat_id == chat.id)
            .map(|m| m.created_at)
            .max()
            .unwrap_or(chat.updated_at)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────────────────

    async fn create_user(&self, mut user: User) -> Result<User> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.username == user.username) {
            return Err(Error::conflict(format!(
                "username '{}' is already taken",
                user.username
            )));
        }
        if user.id.is_empty() {
            user.id = new_id();
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn update_user(&self, id: &str, patch: UserPatch) -> Result<Option<User>> {
        let mut inner = self.inner.write().await;
        let Some(user) = inner.users.get_mut(id) else {
            return Ok(None);
        };
        if let Some(email) = patch.email {
            user.email = email;
        }
        if let Some(full_name) = patch.full_name {
            user.full_name = full_name;
        }
        if let Some(status) = patch.status {
            user.status = status;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().await.users.remove(id).is_some())
    }

    // ── Chats ────────────────────────────────────────────────────────────

    async fn create_chat(&self, mut chat: Chat) -> Result<Chat> {
        chat.validate_shape()?;
        let mut inner = self.inner.write().await;
        if let Some(key) = chat.pair_key()
            && inner.chats.values().any(|c| c.pair_key() == Some(key.clone()))
        {
            return Err(Error::conflict(
                "a one-to-one chat for this pair already exists",
            ));
        }
        if chat.id.is_empty() {
            chat.id = new_id();
        }
        inner.chats.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        let inner = self.inner.read().await;
        Ok(inner.chats.get(id).map(|c| inner.resolved(c)))
    }

    async fn update_chat(&self, id: &str, patch: ChatPatch) -> Result<Option<Chat>> {
        let mut inner = self.inner.write().await;
        let Some(chat) = inner.chats.get_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            chat.name = Some(name);
        }
        if let Some(description) = patch.description {
            chat.description = Some(description);
        }
        if let Some(members) = patch.members {
            chat.members = members;
        }
        chat.updated_at = Utc::now();
        let updated = chat.clone();
        Ok(Some(inner.resolved(&updated)))
    }

    async fn delete_chat(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.chats.remove(id).is_none() {
            return Ok(false);
        }
        inner.messages.retain(|_, m| m.chat_id != id);
        Ok(true)
    }

    async fn get_user_chats(&self, user_id: &str, skip: u32, limit: u32) -> Result<Vec<Chat>> {
        let inner = self.inner.read().await;
        let mut chats: Vec<&Chat> = inner
            .chats
            .values()
            .filter(|c| c.is_member(user_id))
            .collect();
        chats.sort_by_key(|c| std::cmp::Reverse(inner.last_activity(c)));
        Ok(chats
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .map(|c| inner.resolved(c))
            .collect())
    }

    async fn add_chat_member(
        &self,
        chat_id: &str,
        user_id: &str,
        role: MemberRole,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(chat) = inner.chats.get_mut(chat_id) else {
            return Ok(false);
        };
        if chat.chat_type == ChatType::OneToOne {
            return Err(Error::validation(
                "members cannot be added to a one-to-one chat",
            ));
        }
        if chat.is_member(user_id) {
            return Ok(true);
        }
        chat.members.push(ChatMember::new(user_id, role));
        chat.updated_at = Utc::now();
        Ok(true)
    }

    async fn remove_chat_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(chat) = inner.chats.get_mut(chat_id) else {
            return Ok(false);
        };
        if !chat.is_member(user_id) {
            return Ok(false);
        }
        let privileged_remain = chat
            .members
            .iter()
            .any(|m| m.user_id != user_id && m.role.is_privileged());
        if !privileged_remain {
            return Err(Error::validation(
                "cannot remove the last owner or admin of a chat",
            ));
        }
        chat.members.retain(|m| m.user_id != user_id);
        chat.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_chat_members(&self, chat_id: &str) -> Result<Vec<ChatMember>> {
        Ok(self
            .inner
            .read()
            .await
            .chats
            .get(chat_id)
            .map(|c| c.members.clone())
            .unwrap_or_default())
    }

    // ── Messages ─────────────────────────────────────────────────────────

    async fn create_message(&self, mut message: Message) -> Result<Message> {
        let mut inner = self.inner.write().await;
        if message.id.is_empty() {
            message.id = new_id();
        }
        inner.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.inner.read().await.messages.get(id).cloned())
    }

    async fn update_message(&self, id: &str, patch: MessagePatch) -> Result<Option<Message>> {
        let mut inner = self.inner.write().await;
        let Some(message) = inner.messages.get_mut(id) else {
            return Ok(None);
        };
        if let Some(content) = patch.content {
            message.content = content;
        }
        if let Some(edited_at) = patch.edited_at {
            message.edited_at = Some(edited_at);
        }
        if let Some(is_pinned) = patch.is_pinned {
            message.is_pinned = is_pinned;
        }
        if let Some(read_by) = patch.read_by {
            message.read_by = read_by;
        }
        if let Some(delivered_to) = patch.delivered_to {
            message.delivered_to = delivered_to;
        }
        message.updated_at = Utc::now();
        Ok(Some(message.clone()))
    }

    async fn delete_message(&self, id: &str, hard: bool) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if hard {
            return Ok(inner.messages.remove(id).is_some());
        }
        let Some(message) = inner.messages.get_mut(id) else {
            return Ok(false);
        };
        message.is_deleted = true;
        message.content.clear();
        message.is_pinned = false;
        message.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_chat_messages(
        &self,
        chat_id: &str,
        window: MessageWindow<'_>,
    ) -> Result<Vec<Message>> {
        let inner = self.inner.read().await;
        let before = window
            .before_id
            .and_then(|id| inner.messages.get(id))
            .map(|m| (m.created_at, m.id.clone()));
        let after = window
            .after_id
            .and_then(|id| inner.messages.get(id))
            .map(|m| (m.created_at, m.id.clone()));

        let mut messages: Vec<&Message> = inner
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .filter(|m| {
                before
                    .as_ref()
                    .is_none_or(|b| (m.created_at, m.id.clone()) < *b)
            })
            .filter(|m| {
                after
                    .as_ref()
                    .is_none_or(|a| (m.created_at, m.id.clone()) > *a)
            })
            .collect();
        messages.sort_by(|a, b| b.cursor().cmp(&a.cursor()));
        Ok(messages
            .into_iter()
            .skip(window.skip as usize)
            .take(window.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_message_count(&self, chat_id: &str, since: Option<DateTime<Utc>>) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .filter(|m| since.is_none_or(|s| m.created_at > s))
            .count() as u64)
    }

    async fn get_pinned_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let inner = self.inner.read().await;
        let mut pinned: Vec<&Message> = inner
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id && m.is_pinned && !m.is_deleted)
            .collect();
        pinned.sort_by(|a, b| b.cursor().cmp(&a.cursor()));
        Ok(pinned.into_iter().cloned().collect())
    }

    // ── Reactions ────────────────────────────────────────────────────────

    async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<(Reaction, bool)> {
        let mut inner = self.inner.write().await;
        let Some(message) = inner.messages.get_mut(message_id) else {
            return Err(Error::not_found("message"));
        };
        if let Some(existing) = message
            .reactions
            .iter()
            .find(|r| r.user_id == user_id && r.reaction_type == reaction_type)
        {
            return Ok((existing.clone(), false));
        }
        let reaction = Reaction {
            id: new_id(),
            message_id: message_id.into(),
            user_id: user_id.into(),
            reaction_type: reaction_type.into(),
            created_at: Utc::now(),
        };
        message.reactions.push(reaction.clone());
        Ok((reaction, true))
    }

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(message) = inner.messages.get_mut(message_id) else {
            return Ok(false);
        };
        let len_before = message.reactions.len();
        message
            .reactions
            .retain(|r| !(r.user_id == user_id && r.reaction_type == reaction_type));
        Ok(message.reactions.len() < len_before)
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
        let inner = self.inner.read().await;
        let needle = query.to_lowercase();
        let mut hits: Vec<&Message> = inner
            .messages
            .values()
            .filter(|m| !m.is_deleted)
            .filter(|m| chat_id.is_none_or(|c| m.chat_id == c))
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .filter(|m| {
                inner
                    .chats
                    .get(&m.chat_id)
                    .is_some_and(|c| c.is_member(user_id))
            })
            .collect();
        hits.sort_by(|a, b| b.cursor().cmp(&a.cursor()));
        Ok(hits
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_chat_stats(&self, chat_id: &str) -> Result<ChatStats> {
        let inner = self.inner.read().await;
        let chat_messages = inner.messages.values().filter(|m| m.chat_id == chat_id);
        Ok(ChatStats {
            message_count: chat_messages.clone().count() as u64,
            member_count: inner
                .chats
                .get(chat_id)
                .map(|c| c.members.len() as u64)
                .unwrap_or_default(),
            reaction_count: chat_messages.map(|m| m.reactions.len() as u64).sum(),
        })
    }

    async fn get_user_stats(&self, user_id: &str) -> Result<UserStats> {
        let inner = self.inner.read().await;
        Ok(UserStats {
            message_count: inner
                .messages
                .values()
                .filter(|m| m.sender_id == user_id)
                .count() as u64,
            chat_count: inner
                .chats
                .values()
                .filter(|c| c.is_member(user_id))
                .count() as u64,
            reaction_count: inner
                .messages
                .values()
                .flat_map(|m| m.reactions.iter())
                .filter(|r| r.user_id == user_id)
                .count() as u64,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::models::{ChatType, MessageType},
    };

    fn sample_user(name: &str) -> User {
        User::new(name, &format!("{name}@example.com"), name, "$argon2id$h")
    }

    fn group_chat(owner: &str, others: &[&str]) -> Chat {
        let mut members = vec![ChatMember::new(owner, MemberRole::Owner)];
        members.extend(others.iter().map(|u| ChatMember::new(u, MemberRole::Member)));
        Chat::new(ChatType::Group, owner, members)
    }

    fn pair_chat(a: &str, b: &str) -> Chat {
        let mut chat = Chat::new(
            ChatType::OneToOne,
            a,
            vec![
                ChatMember::new(a, MemberRole::Owner),
                ChatMember::new(b, MemberRole::Owner),
            ],
        );
        chat.name = None;
        chat
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.create_user(sample_user("alice")).await.unwrap();
        let err = store.create_user(sample_user("alice")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn one_to_one_pair_is_unique() {
        let store = MemoryStore::new();
        store.create_chat(pair_chat("u1", "u2")).await.unwrap();
        let err = store.create_chat(pair_chat("u2", "u1")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn one_to_one_requires_two_distinct_members() {
        let store = MemoryStore::new();
        let chat = Chat::new(
            ChatType::OneToOne,
            "u1",
            vec![
                ChatMember::new("u1", MemberRole::Owner),
                ChatMember::new("u1", MemberRole::Owner),
            ],
        );
        assert!(store.create_chat(chat).await.is_err());
    }

    #[tokio::test]
    async fn adding_member_to_pair_chat_is_rejected() {
        let store = MemoryStore::new();
        let chat = store.create_chat(pair_chat("u1", "u2")).await.unwrap();
        let err = store
            .add_chat_member(&chat.id, "u3", MemberRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn removing_last_owner_is_rejected() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &["u2"])).await.unwrap();
        let err = store.remove_chat_member(&chat.id, "u1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Removing a plain member is fine.
        assert!(store.remove_chat_member(&chat.id, "u2").await.unwrap());
    }

    #[tokio::test]
    async fn pagination_window_is_strict() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &[])).await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let mut m = Message::new(&chat.id, "u1", MessageType::Text, &format!("m{i}"));
            m.created_at = DateTime::from_timestamp(1_700_000_000 + i, 0).unwrap();
            m.updated_at = m.created_at;
            ids.push(store.create_message(m).await.unwrap().id);
        }

        let older = store
            .get_chat_messages(&chat.id, MessageWindow {
                before_id: Some(&ids[2]),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(older.len(), 2);
        assert!(older.iter().all(|m| m.content < "m2".to_string()));

        let newer = store
            .get_chat_messages(&chat.id, MessageWindow {
                after_id: Some(&ids[2]),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(newer.len(), 2);

        let between = store
            .get_chat_messages(&chat.id, MessageWindow {
                before_id: Some(&ids[4]),
                after_id: Some(&ids[0]),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(between.len(), 3);

        // Newest first.
        let all = store
            .get_chat_messages(&chat.id, MessageWindow {
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all[0].content, "m4");
    }

    #[tokio::test]
    async fn same_timestamp_orders_by_id() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &[])).await.unwrap();
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        for i in 0..3 {
            let mut m = Message::new(&chat.id, "u1", MessageType::Text, &format!("m{i}"));
            m.created_at = ts;
            store.create_message(m).await.unwrap();
        }
        let all = store
            .get_chat_messages(&chat.id, MessageWindow {
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        let returned: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(returned.len(), 3);
        let mut expected = returned.clone();
        expected.sort_unstable();
        expected.reverse();
        assert_eq!(returned, expected);
    }

    #[tokio::test]
    async fn reaction_is_idempotent() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &[])).await.unwrap();
        let m = store
            .create_message(Message::new(&chat.id, "u1", MessageType::Text, "hi"))
            .await
            .unwrap();

        let (first, created) = store.add_reaction(&m.id, "u1", "👍").await.unwrap();
        assert!(created);
        let (second, created) = store.add_reaction(&m.id, "u1", "👍").await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let fetched = store.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(fetched.reactions.len(), 1);

        // A different type is a new reaction.
        let (_, created) = store.add_reaction(&m.id, "u1", "❤️").await.unwrap();
        assert!(created);

        assert!(store.remove_reaction(&m.id, "u1", "👍").await.unwrap());
        assert!(!store.remove_reaction(&m.id, "u1", "👍").await.unwrap());
    }

    #[tokio::test]
    async fn pinned_ids_resolve_from_messages() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &[])).await.unwrap();
        let m = store
            .create_message(Message::new(&chat.id, "u1", MessageType::Text, "pin me"))
            .await
            .unwrap();

        store
            .update_message(&m.id, MessagePatch {
                is_pinned: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let chat = store.get_chat(&chat.id).await.unwrap().unwrap();
        assert_eq!(chat.pinned_message_ids, vec![m.id.clone()]);

        // Soft delete drops the message from the pinned set.
        store.delete_message(&m.id, false).await.unwrap();
        let chat = store.get_chat(&chat.id).await.unwrap().unwrap();
        assert!(chat.pinned_message_ids.is_empty());
    }

    #[tokio::test]
    async fn soft_delete_redacts_content() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &[])).await.unwrap();
        let m = store
            .create_message(Message::new(&chat.id, "u1", MessageType::Text, "oops"))
            .await
            .unwrap();

        store.delete_message(&m.id, false).await.unwrap();
        let m = store.get_message(&m.id).await.unwrap().unwrap();
        assert!(m.is_deleted);
        assert!(m.content.is_empty());

        store.delete_message(&m.id, true).await.unwrap();
        assert!(store.get_message(&m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_chats_order_by_activity() {
        let store = MemoryStore::new();
        let quiet = store.create_chat(group_chat("u1", &[])).await.unwrap();
        let busy = store.create_chat(group_chat("u1", &["u2"])).await.unwrap();
        store
            .create_message(Message::new(&busy.id, "u1", MessageType::Text, "recent"))
            .await
            .unwrap();

        let chats = store.get_user_chats("u1", 0, 50).await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, busy.id);
        assert_eq!(chats[1].id, quiet.id);
    }

    #[tokio::test]
    async fn search_respects_membership() {
        let store = MemoryStore::new();
        let mine = store.create_chat(group_chat("u1", &[])).await.unwrap();
        let theirs = store.create_chat(group_chat("u2", &[])).await.unwrap();
        store
            .create_message(Message::new(&mine.id, "u1", MessageType::Text, "Hello World"))
            .await
            .unwrap();
        store
            .create_message(Message::new(&theirs.id, "u2", MessageType::Text, "hello hidden"))
            .await
            .unwrap();

        let hits = store.search_messages("HELLO", "u1", None, 0, 20).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chat_id, mine.id);
    }

    #[tokio::test]
    async fn stats_aggregate() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &["u2"])).await.unwrap();
        let m = store
            .create_message(Message::new(&chat.id, "u1", MessageType::Text, "hi"))
            .await
            .unwrap();
        store
            .create_message(Message::new(&chat.id, "u2", MessageType::Text, "yo"))
            .await
            .unwrap();
        store.add_reaction(&m.id, "u2", "👍").await.unwrap();

        let cs = store.get_chat_stats(&chat.id).await.unwrap();
        assert_eq!(cs, ChatStats {
            message_count: 2,
            member_count: 2,
            reaction_count: 1,
        });

        let us = store.get_user_stats("u2").await.unwrap();
        assert_eq!(us, UserStats {
            message_count: 1,
            chat_count: 1,
            reaction_count: 1,
        });
    }

    #[tokio::test]
    async fn message_count_since() {
        let store = MemoryStore::new();
        let chat = store.create_chat(group_chat("u1", &[])).await.unwrap();
        let cutoff = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        for i in [-10i64, 10] {
            let mut m = Message::new(&chat.id, "u1", MessageType::Text, "x");
            m.created_at = cutoff + chrono::Duration::seconds(i);
            store.create_message(m).await.unwrap();
        }
        assert_eq!(store.get_message_count(&chat.id, None).await.unwrap(), 2);
        assert_eq!(
            store.get_message_count(&chat.id, Some(cutoff)).await.unwrap(),
            1
        );
    }
}
