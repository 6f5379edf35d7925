//! Gateway: connection fan-out engine, domain orchestrator, and the
//! HTTP/WebSocket transport glue around them.

pub mod chat;
pub mod connections;
pub mod error;
pub mod events;
pub mod routes;
pub mod server;
pub mod ws;

pub use {
    chat::ChatService,
    connections::{ConnectionEngine, SessionHandle},
    server::{AppState, build_router, serve},
};
