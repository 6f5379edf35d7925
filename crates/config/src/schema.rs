//! Config schema: server binding, persistence, storage, auth, limits.

use serde::{Deserialize, Serialize};

/// Backing store selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Memory,
    Document,
    Sql,
}

/// Blob storage selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Local,
    S3,
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// Address to bind the HTTP/WebSocket listener to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,

    pub database_type: DatabaseType,
    /// Connection string for the `sql` database type, e.g.
    /// `sqlite://parley.db` or `sqlite::memory:`.
    pub database_url: Option<String>,

    pub storage_type: StorageType,
    /// Root directory for the `local` storage type.
    pub storage_path: String,

    /// Secret used to sign bearer tokens. Required; startup fails without it.
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub jwt_expiration_minutes: i64,

    /// When true, message content in chats marked encrypted is sealed with
    /// `encryption_key` before persistence.
    pub enable_encryption: bool,
    /// 64 hex chars or a raw 32-byte string.
    pub encryption_key: Option<String>,

    pub max_file_size_mb: u64,
    pub allowed_extensions: Vec<String>,

    /// Message edit window in minutes. Absent means unlimited.
    pub message_edit_window_minutes: Option<u64>,

    /// Keepalive ping period in seconds. Sessions idle for more than twice
    /// this interval are closed.
    pub websocket_ping_interval: u64,
    /// Per-session outbound queue depth; overflow closes the session.
    pub websocket_outbound_queue_depth: usize,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            database_type: DatabaseType::Memory,
            database_url: None,
            storage_type: StorageType::Local,
            storage_path: "./storage".into(),
            jwt_secret: String::new(),
            jwt_algorithm: "HS256".into(),
            jwt_expiration_minutes: 1440,
            enable_encryption: false,
            encryption_key: None,
            max_file_size_mb: 10,
            allowed_extensions: ["jpg", "png", "gif", "pdf", "txt", "mp4", "mp3"]
                .into_iter()
                .map(Into::into)
                .collect(),
            message_edit_window_minutes: None,
            websocket_ping_interval: 30,
            websocket_outbound_queue_depth: 64,
        }
    }
}

impl ParleyConfig {
    /// Max upload size in bytes.
    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Returns `true` if `extension` (without the dot) is allowed for upload.
    #[must_use]
    pub fn extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }
}
