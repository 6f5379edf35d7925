//! Connection fan-out engine.
//!
//! Tracks live sessions and the user↔session / chat↔session indices, and
//! delivers typed events to the right recipient sets. All indices sit
//! behind one coarse lock; broadcasts snapshot the recipient list and
//! release the lock before writing, so a slow transport cannot stall the
//! engine. Per-session outbound queues are bounded: a full queue drops
//! the session from every index, which closes it.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use {
    serde_json::Value,
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, warn},
};

use crate::events;

// ── Session handle ──────────────────────────────────────────────────────────

/// Write side of a single live connection. The transport owns the matching
/// receiver and forwards queued frames to the socket; when the engine drops
/// the handle, the receiver closes and the transport shuts the session
/// down.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    sender: mpsc::Sender<String>,
}

impl SessionHandle {
    #[must_use]
    pub fn new(id: impl Into<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            id: id.into(),
            sender,
        }
    }

    /// Create a handle with a fresh id and the paired receiver.
    #[must_use]
    pub fn create(queue_depth: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        (Self::new(uuid::Uuid::new_v4().to_string(), tx), rx)
    }

    /// Queue a typed event for this session. Returns `false` when the
    /// queue is full or the receiver is gone.
    #[must_use]
    pub fn send(&self, event: &Value) -> bool {
        self.sender.try_send(event.to_string()).is_ok()
    }
}

struct SessionEntry {
    handle: SessionHandle,
    user_id: String,
    connected_at: Instant,
    last_activity: Instant,
}

// ── Indices ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    /// session id → entry (handle, owning user, activity clock).
    sessions: HashMap<String, SessionEntry>,
    /// user id → session ids (multi-device).
    user_sessions: HashMap<String, HashSet<String>>,
    /// chat id → session ids currently joined to the room.
    chat_sessions: HashMap<String, HashSet<String>>,
    /// session id → chat ids, for cleanup.
    session_chats: HashMap<String, HashSet<String>>,
}

impl Registry {
    /// Remove a session from every index. Returns the entry if it existed.
    fn purge(&mut self, session_id: &str) -> Option<SessionEntry> {
        let entry = self.sessions.remove(session_id)?;
        if let Some(set) = self.user_sessions.get_mut(&entry.user_id) {
            set.remove(session_id);
            if set.is_empty() {
                self.user_sessions.remove(&entry.user_id);
            }
        }
        for chat_id in self.session_chats.remove(session_id).unwrap_or_default() {
            if let Some(set) = self.chat_sessions.get_mut(&chat_id) {
                set.remove(session_id);
                if set.is_empty() {
                    self.chat_sessions.remove(&chat_id);
                }
            }
        }
        Some(entry)
    }

    fn room_handles(&self, chat_id: &str) -> Vec<(SessionHandle, String)> {
        self.chat_sessions
            .get(chat_id)
            .into_iter()
            .flatten()
            .filter_map(|sid| self.sessions.get(sid))
            .map(|e| (e.handle.clone(), e.user_id.clone()))
            .collect()
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ConnectionEngine {
    inner: RwLock<Registry>,
}

impl ConnectionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `user_id`: index it, send the synthetic
    /// `connected` frame, and announce the user online to every chat room
    /// the user belongs to at connection time. Returns `true` when this is
    /// the user's first live session (the offline→online transition).
    pub async fn connect(
        &self,
        handle: SessionHandle,
        user_id: &str,
        member_chat_ids: &[String],
    ) -> bool {
        let session_id = handle.id.clone();
        let announce = {
            let mut inner = self.inner.write().await;
            let first_session = !inner.user_sessions.contains_key(user_id);
            let accepted = handle.send(&events::connected(user_id));
            let now = Instant::now();
            inner.sessions.insert(session_id.clone(), SessionEntry {
                handle,
                user_id: user_id.to_string(),
                connected_at: now,
                last_activity: now,
            });
            inner
                .user_sessions
                .entry(user_id.to_string())
                .or_default()
                .insert(session_id.clone());
            if !accepted {
                debug!(session_id = %session_id, "connected frame not accepted");
            }
            first_session
        };
        debug!(session_id = %session_id, user_id = %user_id, "session connected");

        if announce {
            let online = events::user_online(user_id);
            for chat_id in member_chat_ids {
                self.broadcast_to_chat(chat_id, &online).await;
            }
        }
        announce
    }

    /// Remove a session from every index. No frame is sent to the closing
    /// peer; the user is announced offline to their chats only when this
    /// was their last session. Returns `true` on the online→offline
    /// transition.
    pub async fn disconnect(&self, session_id: &str, member_chat_ids: &[String]) -> bool {
        let gone_offline = {
            let mut inner = self.inner.write().await;
            let Some(entry) = inner.purge(session_id) else {
                return false;
            };
            debug!(
                session_id = %session_id,
                user_id = %entry.user_id,
                duration_secs = entry.connected_at.elapsed().as_secs(),
                "session disconnected"
            );
            (!inner.user_sessions.contains_key(&entry.user_id)).then_some(entry.user_id)
        };

        match gone_offline {
            Some(user_id) => {
                let offline = events::user_offline(&user_id);
                for chat_id in member_chat_ids {
                    self.broadcast_to_chat(chat_id, &offline).await;
                }
                true
            },
            None => false,
        }
    }

    /// Subscribe a known session to a chat room and acknowledge it.
    /// Membership authorization happens before this call.
    pub async fn join_chat(&self, session_id: &str, chat_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.get(session_id) else {
            return false;
        };
        let accepted = entry.handle.send(&events::chat_joined(chat_id));
        inner
            .chat_sessions
            .entry(chat_id.to_string())
            .or_default()
            .insert(session_id.to_string());
        inner
            .session_chats
            .entry(session_id.to_string())
            .or_default()
            .insert(chat_id.to_string());
        accepted
    }

    /// Unsubscribe a session from a chat room and acknowledge it.
    pub async fn leave_chat(&self, session_id: &str, chat_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if let Some(set) = inner.chat_sessions.get_mut(chat_id) {
            set.remove(session_id);
            if set.is_empty() {
                inner.chat_sessions.remove(chat_id);
            }
        }
        if let Some(set) = inner.session_chats.get_mut(session_id) {
            set.remove(chat_id);
            if set.is_empty() {
                inner.session_chats.remove(session_id);
            }
        }
        match inner.sessions.get(session_id) {
            Some(entry) => entry.handle.send(&events::chat_left(chat_id)),
            None => false,
        }
    }

    /// Deliver `event` to every session joined to the chat room.
    /// Best-effort: failed sends silently drop the session from all
    /// indices. Returns the user ids that received the event.
    pub async fn broadcast_to_chat(&self, chat_id: &str, event: &Value) -> HashSet<String> {
        let targets = self.inner.read().await.room_handles(chat_id);
        self.deliver(targets, event).await
    }

    /// Like [`broadcast_to_chat`](Self::broadcast_to_chat), excluding every
    /// session of `excluded_user`. Used for typing indicators.
    pub async fn broadcast_to_chat_except_user(
        &self,
        chat_id: &str,
        excluded_user: &str,
        event: &Value,
    ) -> HashSet<String> {
        let targets: Vec<(SessionHandle, String)> = self
            .inner
            .read()
            .await
            .room_handles(chat_id)
            .into_iter()
            .filter(|(_, uid)| uid != excluded_user)
            .collect();
        self.deliver(targets, event).await
    }

    /// Deliver `event` to every session of `user_id`, regardless of rooms.
    pub async fn send_to_user(&self, user_id: &str, event: &Value) -> bool {
        let targets: Vec<(SessionHandle, String)> = {
            let inner = self.inner.read().await;
            inner
                .user_sessions
                .get(user_id)
                .into_iter()
                .flatten()
                .filter_map(|sid| inner.sessions.get(sid))
                .map(|e| (e.handle.clone(), e.user_id.clone()))
                .collect()
        };
        !self.deliver(targets, event).await.is_empty()
    }

    /// Deliver `event` to one specific session (pong replies). A rejected
    /// write purges the session like any other failed send.
    pub async fn send_to_session(&self, session_id: &str, event: &Value) -> bool {
        let handle = self
            .inner
            .read()
            .await
            .sessions
            .get(session_id)
            .map(|e| e.handle.clone());
        let Some(handle) = handle else { return false };
        if handle.send(event) {
            return true;
        }
        let mut inner = self.inner.write().await;
        if inner.purge(session_id).is_some() {
            warn!(session_id = %session_id, "session purged after failed send");
        }
        false
    }

    /// Users with at least one session currently joined to the room.
    pub async fn users_in_room(&self, chat_id: &str) -> HashSet<String> {
        self.inner
            .read()
            .await
            .room_handles(chat_id)
            .into_iter()
            .map(|(_, uid)| uid)
            .collect()
    }

    /// Record inbound activity for idle tracking.
    pub async fn touch(&self, session_id: &str) {
        if let Some(entry) = self.inner.write().await.sessions.get_mut(session_id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Keepalive sweep: send `ping` to every session, then purge sessions
    /// that failed the write or have been idle longer than `max_idle`.
    pub async fn keepalive_sweep(&self, max_idle: Duration) {
        let ping = events::ping();
        let targets: Vec<(SessionHandle, Instant)> = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .values()
                .map(|e| (e.handle.clone(), e.last_activity))
                .collect()
        };

        let mut stale = Vec::new();
        for (handle, last_activity) in targets {
            if !handle.send(&ping) || last_activity.elapsed() > max_idle {
                stale.push(handle.id);
            }
        }
        if stale.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        for session_id in stale {
            if inner.purge(&session_id).is_some() {
                warn!(session_id = %session_id, "session purged by keepalive");
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Whether the session appears in any index. Test hook.
    pub async fn knows_session(&self, session_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.sessions.contains_key(session_id)
            || inner.session_chats.contains_key(session_id)
            || inner
                .user_sessions
                .values()
                .any(|set| set.contains(session_id))
            || inner
                .chat_sessions
                .values()
                .any(|set| set.contains(session_id))
    }

    /// Send to the snapshot, then purge any session whose queue rejected
    /// the write. Returns the user ids that accepted delivery.
    async fn deliver(
        &self,
        targets: Vec<(SessionHandle, String)>,
        event: &Value,
    ) -> HashSet<String> {
        let mut delivered = HashSet::new();
        let mut failed = Vec::new();
        for (handle, user_id) in targets {
            if handle.send(event) {
                delivered.insert(user_id);
            } else {
                failed.push(handle.id);
            }
        }
        if !failed.is_empty() {
            let mut inner = self.inner.write().await;
            for session_id in failed {
                if inner.purge(&session_id).is_some() {
                    warn!(session_id = %session_id, "session purged after failed send");
                }
            }
        }
        delivered
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn recv_json(rx: &mut mpsc::Receiver<String>) -> Value {
        let raw = rx.recv().await.unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn connect_sends_welcome_frame() {
        let engine = ConnectionEngine::new();
        let (handle, mut rx) = SessionHandle::create(8);
        engine.connect(handle, "alice", &[]).await;

        let frame = recv_json(&mut rx).await;
        assert_eq!(frame["type"], "connected");
        assert_eq!(frame["user_id"], "alice");
        assert!(frame.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn join_and_leave_acknowledge() {
        let engine = ConnectionEngine::new();
        let (handle, mut rx) = SessionHandle::create(8);
        let sid = handle.id.clone();
        engine.connect(handle, "alice", &[]).await;
        let _ = recv_json(&mut rx).await; // connected

        assert!(engine.join_chat(&sid, "chat-1").await);
        let frame = recv_json(&mut rx).await;
        assert_eq!(frame["type"], "chat_joined");
        assert_eq!(frame["chat_id"], "chat-1");

        assert!(engine.leave_chat(&sid, "chat-1").await);
        let frame = recv_json(&mut rx).await;
        assert_eq!(frame["type"], "chat_left");

        // Left the room: no longer a broadcast target.
        let reached = engine
            .broadcast_to_chat("chat-1", &serde_json::json!({"type": "x"}))
            .await;
        assert!(reached.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_joined_sessions() {
        let engine = ConnectionEngine::new();
        let (alice, mut alice_rx) = SessionHandle::create(8);
        let (bob, mut bob_rx) = SessionHandle::create(8);
        let (alice_sid, bob_sid) = (alice.id.clone(), bob.id.clone());
        engine.connect(alice, "alice", &[]).await;
        engine.connect(bob, "bob", &[]).await;
        let _ = recv_json(&mut alice_rx).await;
        let _ = recv_json(&mut bob_rx).await;

        engine.join_chat(&alice_sid, "chat-1").await;
        engine.join_chat(&bob_sid, "chat-1").await;
        let _ = recv_json(&mut alice_rx).await;
        let _ = recv_json(&mut bob_rx).await;

        let reached = engine
            .broadcast_to_chat("chat-1", &serde_json::json!({"type": "hello"}))
            .await;
        assert_eq!(reached.len(), 2);
        assert_eq!(recv_json(&mut alice_rx).await["type"], "hello");
        assert_eq!(recv_json(&mut bob_rx).await["type"], "hello");
    }

    #[tokio::test]
    async fn multi_device_user_gets_event_on_every_session() {
        let engine = ConnectionEngine::new();
        let (phone, mut phone_rx) = SessionHandle::create(8);
        let (laptop, mut laptop_rx) = SessionHandle::create(8);
        engine.connect(phone, "alice", &[]).await;
        engine.connect(laptop, "alice", &[]).await;
        let _ = recv_json(&mut phone_rx).await;
        let _ = recv_json(&mut laptop_rx).await;

        assert!(
            engine
                .send_to_user("alice", &serde_json::json!({"type": "dm"}))
                .await
        );
        assert_eq!(recv_json(&mut phone_rx).await["type"], "dm");
        assert_eq!(recv_json(&mut laptop_rx).await["type"], "dm");
    }

    #[tokio::test]
    async fn disconnect_clears_every_index() {
        let engine = ConnectionEngine::new();
        let (handle, mut rx) = SessionHandle::create(8);
        let sid = handle.id.clone();
        engine.connect(handle, "alice", &[]).await;
        let _ = recv_json(&mut rx).await;
        engine.join_chat(&sid, "chat-1").await;
        engine.join_chat(&sid, "chat-2").await;

        engine.disconnect(&sid, &[]).await;
        assert!(!engine.knows_session(&sid).await);
        assert_eq!(engine.session_count().await, 0);
    }

    #[tokio::test]
    async fn offline_announced_only_when_last_session_closes() {
        let engine = ConnectionEngine::new();
        let (watcher, mut watcher_rx) = SessionHandle::create(8);
        let watcher_sid = watcher.id.clone();
        engine.connect(watcher, "bob", &[]).await;
        let _ = recv_json(&mut watcher_rx).await;
        engine.join_chat(&watcher_sid, "chat-1").await;
        let _ = recv_json(&mut watcher_rx).await;

        let (phone, _phone_rx) = SessionHandle::create(8);
        let (laptop, _laptop_rx) = SessionHandle::create(8);
        let (phone_sid, laptop_sid) = (phone.id.clone(), laptop.id.clone());
        let chats = vec!["chat-1".to_string()];
        engine.connect(phone, "alice", &chats).await;
        // Second device: no duplicate online announcement.
        engine.connect(laptop, "alice", &chats).await;

        let frame = recv_json(&mut watcher_rx).await;
        assert_eq!(frame["type"], "user_online");
        assert_eq!(frame["user_id"], "alice");

        engine.disconnect(&phone_sid, &chats).await;
        // Still one session left: nothing announced yet.
        engine.disconnect(&laptop_sid, &chats).await;
        let frame = recv_json(&mut watcher_rx).await;
        assert_eq!(frame["type"], "user_offline");
        assert_eq!(frame["user_id"], "alice");
    }

    #[tokio::test]
    async fn full_queue_purges_session() {
        let engine = ConnectionEngine::new();
        let (handle, _rx) = SessionHandle::create(1);
        let sid = handle.id.clone();
        engine.connect(handle, "alice", &[]).await;
        engine.join_chat(&sid, "chat-1").await;

        // The queue (depth 1) already holds the connected frame; the join
        // ack and this broadcast overflow it.
        let reached = engine
            .broadcast_to_chat("chat-1", &serde_json::json!({"type": "x"}))
            .await;
        assert!(reached.is_empty());
        assert!(!engine.knows_session(&sid).await);
    }

    #[tokio::test]
    async fn typing_excludes_all_sessions_of_the_originator() {
        let engine = ConnectionEngine::new();
        let (phone, mut phone_rx) = SessionHandle::create(8);
        let (laptop, mut laptop_rx) = SessionHandle::create(8);
        let (bob, mut bob_rx) = SessionHandle::create(8);
        let (phone_sid, laptop_sid, bob_sid) =
            (phone.id.clone(), laptop.id.clone(), bob.id.clone());
        engine.connect(phone, "alice", &[]).await;
        engine.connect(laptop, "alice", &[]).await;
        engine.connect(bob, "bob", &[]).await;
        for rx in [&mut phone_rx, &mut laptop_rx, &mut bob_rx] {
            let _ = recv_json(rx).await;
        }
        for sid in [&phone_sid, &laptop_sid, &bob_sid] {
            engine.join_chat(sid, "chat-1").await;
        }
        for rx in [&mut phone_rx, &mut laptop_rx, &mut bob_rx] {
            let _ = recv_json(rx).await;
        }

        let reached = engine
            .broadcast_to_chat_except_user("chat-1", "alice", &events::typing("chat-1", "alice", true))
            .await;
        assert_eq!(reached, HashSet::from(["bob".to_string()]));
        assert_eq!(recv_json(&mut bob_rx).await["type"], "typing");
        assert!(phone_rx.try_recv().is_err());
        assert!(laptop_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn keepalive_pings_and_purges_idle() {
        let engine = ConnectionEngine::new();
        let (handle, mut rx) = SessionHandle::create(8);
        let sid = handle.id.clone();
        engine.connect(handle, "alice", &[]).await;
        let _ = recv_json(&mut rx).await;

        engine.keepalive_sweep(Duration::from_secs(60)).await;
        assert_eq!(recv_json(&mut rx).await["type"], "ping");
        assert!(engine.knows_session(&sid).await);

        // Zero idle budget: everything is stale.
        engine.keepalive_sweep(Duration::ZERO).await;
        assert!(!engine.knows_session(&sid).await);
    }
}
