//! REST surface. Thin handlers: extract, call the orchestrator, shape the
//! response. Status codes come from the error mapping in [`crate::error`].

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{FromRequestParts, Path, Query, State},
        http::{HeaderMap, header, request::Parts},
        response::IntoResponse,
        routing::{get, post, put},
    },
    serde::Deserialize,
    serde_json::json,
};

use {
    parley_common::Error,
    parley_store::{MessageWindow, UserPatch},
};

use crate::{
    chat::{ChatCreate, ChatUpdate, FileMessageCreate, MessageCreate, MessageUpdate, RegisterRequest},
    error::{ApiError, ApiResult},
    server::AppState,
};

/// Bearer-token extractor: resolves `Authorization: Bearer <token>` to the
/// authenticated user id. Token expiry is enforced on every call.
pub struct AuthUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError(Error::auth("missing bearer token")))?;
        let user_id = state.chat.security().user_id_from_token(token)?;
        Ok(Self(user_id))
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/token", post(login))
        .route("/users/me", get(get_me).put(update_me))
        .route("/users/me/status", put(update_status))
        .route("/users/{id}", get(get_user))
        .route("/chats", post(create_chat).get(list_chats))
        .route("/chats/{id}", get(get_chat).put(update_chat).delete(delete_chat))
        .route(
            "/chats/{id}/members/{uid}",
            post(add_member).delete(remove_member),
        )
        .route("/chats/{id}/messages", get(list_messages))
        .route("/chats/{id}/read", post(mark_chat_read))
        .route("/chats/{id}/typing", post(typing))
        .route("/chats/{id}/pinned", get(pinned_messages))
        .route("/messages", post(send_message))
        .route("/messages/file", post(send_file_message))
        .route(
            "/messages/{id}",
            put(update_message).delete(delete_message),
        )
        .route("/messages/{id}/read", post(mark_message_read))
        .route(
            "/messages/{id}/reactions/{type}",
            post(add_reaction).delete(remove_reaction),
        )
        .route("/messages/{id}/pin", post(pin_message))
        .route("/messages/{id}/unpin", post(unpin_message))
        .route("/search", get(search))
        .route("/stats/chat/{id}", get(chat_stats))
        .route("/stats/user", get(user_stats))
        .route("/uploads", post(upload))
        .route("/uploads/{location}", get(fetch_upload))
}

// ── Auth ────────────────────────────────────────────────────────────────────

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.chat.register_user(req).await?;
    Ok(Json(json!({ "id": user.id, "username": user.username })))
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    axum::Form(form): axum::Form<LoginForm>,
) -> ApiResult<impl IntoResponse> {
    let token = state
        .chat
        .authenticate_user(&form.username, &form.password)
        .await?;
    Ok(Json(json!({ "access_token": token, "token_type": "bearer" })))
}

// ── Users ───────────────────────────────────────────────────────────────────

async fn get_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.get_user(&user_id).await?))
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(patch): Json<UserPatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.update_user(&user_id, patch).await?))
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<StatusBody>,
) -> ApiResult<impl IntoResponse> {
    let status = body
        .status
        .parse()
        .map_err(|_| Error::validation(format!("unknown status '{}'", body.status)))?;
    let user = state.chat.update_user_status(&user_id, status).await?;
    Ok(Json(json!({ "status": user.status })))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    AuthUser(caller_id): AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.get_user_public(&caller_id, &user_id).await?))
}

// ── Chats ───────────────────────────────────────────────────────────────────

async fn create_chat(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<ChatCreate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.create_chat(&user_id, req).await?))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_chat_limit")]
    limit: u32,
}

fn default_chat_limit() -> u32 {
    100
}

async fn list_chats(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .chat
            .get_user_chats(&user_id, page.skip, page.limit)
            .await?,
    ))
}

async fn get_chat(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.get_chat(&chat_id, &user_id).await?))
}

async fn update_chat(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
    Json(req): Json<ChatUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.update_chat(&chat_id, &user_id, req).await?))
}

async fn delete_chat(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.chat.delete_chat(&chat_id, &user_id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    AuthUser(actor_id): AuthUser,
    Path((chat_id, user_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state.chat.add_chat_member(&chat_id, &actor_id, &user_id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn remove_member(
    State(state): State<Arc<AppState>>,
    AuthUser(actor_id): AuthUser,
    Path((chat_id, user_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state
        .chat
        .remove_chat_member(&chat_id, &actor_id, &user_id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

// ── Messages ────────────────────────────────────────────────────────────────

async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<MessageCreate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.send_message(&user_id, req).await?))
}

async fn send_file_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<FileMessageCreate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.send_file_message(&user_id, req).await?))
}

#[derive(Deserialize)]
struct MessagesQuery {
    before_id: Option<String>,
    after_id: Option<String>,
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_message_limit")]
    limit: u32,
}

fn default_message_limit() -> u32 {
    50
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<impl IntoResponse> {
    let messages = state
        .chat
        .get_chat_messages(&chat_id, &user_id, MessageWindow {
            before_id: query.before_id.as_deref(),
            after_id: query.after_id.as_deref(),
            skip: query.skip,
            limit: query.limit,
        })
        .await?;
    Ok(Json(messages))
}

async fn update_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<MessageUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state.chat.update_message(&message_id, &user_id, req).await?,
    ))
}

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    delete_for_everyone: bool,
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<impl IntoResponse> {
    state
        .chat
        .delete_message(&message_id, &user_id, query.delete_for_everyone)
        .await?;
    Ok(Json(json!({ "success": true })))
}

// ── Read receipts ───────────────────────────────────────────────────────────

async fn mark_message_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let message = state.chat.get_message(&message_id, &user_id).await?;
    state
        .chat
        .mark_messages_read(&message.chat_id, &user_id, Some(vec![message_id]), None)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct ReadQuery {
    read_until_id: Option<String>,
}

async fn mark_chat_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<impl IntoResponse> {
    state
        .chat
        .mark_messages_read(&chat_id, &user_id, None, query.read_until_id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

// ── Reactions ───────────────────────────────────────────────────────────────

async fn add_reaction(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((message_id, reaction_type)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state
        .chat
        .add_reaction(&message_id, &user_id, &reaction_type)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn remove_reaction(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((message_id, reaction_type)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .chat
        .remove_reaction(&message_id, &user_id, &reaction_type)
        .await?;
    Ok(Json(json!({ "success": removed })))
}

// ── Pinning ─────────────────────────────────────────────────────────────────

async fn pin_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.pin_message(&message_id, &user_id).await?))
}

async fn unpin_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.unpin_message(&message_id, &user_id).await?))
}

async fn pinned_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state.chat.get_pinned_messages(&chat_id, &user_id).await?,
    ))
}

// ── Typing ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TypingQuery {
    #[serde(default = "default_true")]
    is_typing: bool,
}

fn default_true() -> bool {
    true
}

async fn typing(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
    Query(query): Query<TypingQuery>,
) -> ApiResult<impl IntoResponse> {
    state
        .chat
        .typing_indicator(&chat_id, &user_id, query.is_typing)
        .await?;
    Ok(Json(json!({ "success": true })))
}

// ── Search & stats ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchQuery {
    query: String,
    chat_id: Option<String>,
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_search_limit")]
    limit: u32,
}

fn default_search_limit() -> u32 {
    20
}

async fn search(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let hits = state
        .chat
        .search_messages(
            &user_id,
            &query.query,
            query.chat_id.as_deref(),
            query.skip,
            query.limit,
        )
        .await?;
    Ok(Json(hits))
}

async fn chat_stats(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.get_chat_stats(&chat_id, &user_id).await?))
}

async fn user_stats(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chat.get_user_stats(&user_id).await?))
}

// ── Uploads ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct UploadQuery {
    chat_id: String,
}

async fn upload(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let file_name = headers
        .get("x-file-name")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::validation("missing x-file-name header"))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let location = state
        .chat
        .upload_file(&user_id, &query.chat_id, &body, file_name, content_type)
        .await?;
    Ok(Json(json!({ "location": location })))
}

async fn fetch_upload(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(location): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.chat.fetch_file(&user_id, &location).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}
