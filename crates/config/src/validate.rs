//! Configuration validation.
//!
//! Checks a loaded [`ParleyConfig`] for fatal problems (missing secrets,
//! unusable keys, drivers with no implementation) and reports security
//! warnings. Startup is gated on `has_errors()`.

use crate::schema::{DatabaseType, ParleyConfig, StorageType};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted config path, e.g. `"encryption_key"`.
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a config. Errors are fatal: the process must exit before
/// accepting traffic.
#[must_use]
pub fn validate(cfg: &ParleyConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if cfg.jwt_secret.is_empty() {
        result.push(Severity::Error, "jwt_secret", "jwt_secret is required");
    } else if cfg.jwt_secret.len() < 16 {
        result.push(
            Severity::Warning,
            "jwt_secret",
            "jwt_secret is shorter than 16 bytes",
        );
    }

    if cfg.jwt_algorithm != "HS256" {
        result.push(
            Severity::Error,
            "jwt_algorithm",
            format!("unsupported jwt_algorithm '{}'", cfg.jwt_algorithm),
        );
    }

    if cfg.enable_encryption {
        match cfg.encryption_key.as_deref() {
            None => result.push(
                Severity::Error,
                "encryption_key",
                "enable_encryption is set but encryption_key is missing",
            ),
            Some(key) if !key_usable(key) => result.push(
                Severity::Error,
                "encryption_key",
                "encryption_key must be 64 hex chars or a 32-byte string",
            ),
            Some(_) => {},
        }
    }

    if cfg.database_type == DatabaseType::Sql && cfg.database_url.is_none() {
        result.push(
            Severity::Error,
            "database_url",
            "database_type 'sql' requires database_url",
        );
    }

    // Declared in the schema, but no driver ships for them.
    if cfg.database_type == DatabaseType::Document {
        result.push(
            Severity::Error,
            "database_type",
            "no document-store driver is available",
        );
    }
    if cfg.storage_type == StorageType::S3 {
        result.push(Severity::Error, "storage_type", "no s3 driver is available");
    }

    if cfg.websocket_ping_interval == 0 {
        result.push(
            Severity::Error,
            "websocket_ping_interval",
            "websocket_ping_interval must be positive",
        );
    }
    if cfg.websocket_outbound_queue_depth == 0 {
        result.push(
            Severity::Error,
            "websocket_outbound_queue_depth",
            "websocket_outbound_queue_depth must be positive",
        );
    }

    if cfg.host == "0.0.0.0" {
        result.push(
            Severity::Warning,
            "host",
            "binding to 0.0.0.0 exposes the service on all interfaces",
        );
    }

    result
}

/// A key is usable if it decodes to exactly 32 bytes: 64 hex chars or a raw
/// 32-byte string.
fn key_usable(key: &str) -> bool {
    if key.len() == 64 {
        return key.chars().all(|c| c.is_ascii_hexdigit());
    }
    key.len() == 32
}
