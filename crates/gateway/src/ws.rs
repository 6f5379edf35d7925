//! WebSocket endpoint: `GET /ws/{user_id}?token=...`.
//!
//! One reader task per connection plus a write loop fed by the session's
//! bounded outbound queue. When the engine drops the queue (overflow or
//! purge), the write loop closes the socket with 1013.

use std::sync::Arc;

use {
    axum::{
        extract::{
            Path, Query, State, WebSocketUpgrade,
            ws::{CloseFrame, Message, WebSocket},
        },
        response::Response,
    },
    futures::{SinkExt, stream::StreamExt},
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use parley_store::UserStatus;

use crate::{connections::SessionHandle, events, server::AppState};

/// Close code for failed authentication.
const POLICY_VIOLATION: u16 = 1008;
/// Close code for outbound queue overflow ("try again later").
const TRY_AGAIN_LATER: u16 = 1013;
/// Budget for a single outbound socket write.
const WRITE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Inbound client frames. Unknown `type` values are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    JoinChat {
        chat_id: String,
    },
    LeaveChat {
        chat_id: String,
    },
    Typing {
        chat_id: String,
        #[serde(default = "default_true")]
        is_typing: bool,
    },
    Read {
        chat_id: String,
        #[serde(default)]
        message_ids: Option<Vec<String>>,
        #[serde(default)]
        read_until_id: Option<String>,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

fn default_true() -> bool {
    true
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state, user_id, query.token))
}

/// Handle a single WebSocket connection through its full lifecycle:
/// auth → registration → frame loop → cleanup.
async fn handle_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: String,
    token: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The token must verify and its subject must match the path.
    let authorized = token
        .as_deref()
        .and_then(|t| state.chat.security().user_id_from_token(t).ok())
        .is_some_and(|subject| subject == user_id);
    if !authorized {
        warn!(user_id = %user_id, "ws: auth failed");
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: POLICY_VIOLATION,
                reason: "authentication failed".into(),
            })))
            .await;
        return;
    }

    let member_chats = state
        .chat
        .member_chat_ids(&user_id)
        .await
        .unwrap_or_default();

    let depth = state.chat.config().websocket_outbound_queue_depth;
    let (handle, mut outbound) = SessionHandle::create(depth);
    let session_id = handle.id.clone();
    info!(session_id = %session_id, user_id = %user_id, "ws: connected");

    // Write loop: drains the bounded queue into the socket. The queue
    // closing before the socket means the engine dropped this session.
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let write = ws_tx.send(Message::Text(frame.into()));
            match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {},
                Ok(Err(_)) => {
                    debug!("ws: write loop closed");
                    return;
                },
                Err(_) => {
                    debug!("ws: write timed out");
                    return;
                },
            }
        }
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: TRY_AGAIN_LATER,
                reason: "try again later".into(),
            })))
            .await;
    });

    let first_session = state
        .chat
        .engine()
        .connect(handle, &user_id, &member_chats)
        .await;
    if first_session
        && let Err(e) = state.chat.update_user_status(&user_id, UserStatus::Online).await
    {
        warn!(user_id = %user_id, error = %e, "ws: failed to persist online status");
    }

    // ── Frame loop ───────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "ws: read error");
                break;
            },
        };

        state.chat.engine().touch(&session_id).await;

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "ws: dropping invalid frame");
                continue;
            },
        };
        handle_frame(&state, &session_id, &user_id, frame).await;
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    let member_chats = state
        .chat
        .member_chat_ids(&user_id)
        .await
        .unwrap_or_default();
    let went_offline = state
        .chat
        .engine()
        .disconnect(&session_id, &member_chats)
        .await;
    if went_offline
        && let Err(e) = state.chat.update_user_status(&user_id, UserStatus::Offline).await
    {
        warn!(user_id = %user_id, error = %e, "ws: failed to persist offline status");
    }
    info!(session_id = %session_id, user_id = %user_id, "ws: closed");
    write_handle.abort();
}

/// Dispatch one inbound frame. Domain failures drop the frame; they are
/// never reported back over the socket.
async fn handle_frame(state: &Arc<AppState>, session_id: &str, user_id: &str, frame: ClientFrame) {
    match frame {
        ClientFrame::JoinChat { chat_id } => {
            // Membership check before the room subscription.
            match state.chat.get_chat(&chat_id, user_id).await {
                Ok(_) => {
                    state.chat.engine().join_chat(session_id, &chat_id).await;
                },
                Err(e) => {
                    debug!(chat_id = %chat_id, user_id = %user_id, error = %e, "ws: join refused");
                },
            }
        },
        ClientFrame::LeaveChat { chat_id } => {
            state.chat.engine().leave_chat(session_id, &chat_id).await;
        },
        ClientFrame::Typing { chat_id, is_typing } => {
            if let Err(e) = state.chat.typing_indicator(&chat_id, user_id, is_typing).await {
                debug!(chat_id = %chat_id, error = %e, "ws: typing dropped");
            }
        },
        ClientFrame::Read {
            chat_id,
            message_ids,
            read_until_id,
        } => {
            if let Err(e) = state
                .chat
                .mark_messages_read(&chat_id, user_id, message_ids, read_until_id)
                .await
            {
                debug!(chat_id = %chat_id, error = %e, "ws: read dropped");
            }
        },
        ClientFrame::Ping { timestamp } => {
            state
                .chat
                .engine()
                .send_to_session(session_id, &events::pong(timestamp.as_ref()))
                .await;
        },
        ClientFrame::Unknown => {},
    }
}
