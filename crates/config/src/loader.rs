use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::ParleyConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ParleyConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut cfg = parse_config(&raw, path)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parley/parley.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ParleyConfig::default()` (with env overrides applied) if no
/// config file is found.
pub fn discover_and_load() -> ParleyConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut cfg = ParleyConfig::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/parley/
    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/parley/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parley").map(|d| d.config_dir().to_path_buf())
}

/// Apply `PARLEY_*` environment overrides onto a loaded config.
///
/// Every key from the schema is overridable; values that fail to parse are
/// ignored with a warning.
pub fn apply_env_overrides(cfg: &mut ParleyConfig) {
    if let Some(v) = env_var("PARLEY_HOST") {
        cfg.host = v;
    }
    if let Some(v) = env_var("PARLEY_PORT") {
        parse_into(&mut cfg.port, "PARLEY_PORT", &v);
    }
    if let Some(v) = env_var("PARLEY_DATABASE_TYPE") {
        parse_enum(&mut cfg.database_type, "PARLEY_DATABASE_TYPE", &v);
    }
    if let Some(v) = env_var("PARLEY_DATABASE_URL") {
        cfg.database_url = Some(v);
    }
    if let Some(v) = env_var("PARLEY_STORAGE_TYPE") {
        parse_enum(&mut cfg.storage_type, "PARLEY_STORAGE_TYPE", &v);
    }
    if let Some(v) = env_var("PARLEY_STORAGE_PATH") {
        cfg.storage_path = v;
    }
    if let Some(v) = env_var("PARLEY_JWT_SECRET") {
        cfg.jwt_secret = v;
    }
    if let Some(v) = env_var("PARLEY_JWT_ALGORITHM") {
        cfg.jwt_algorithm = v;
    }
    if let Some(v) = env_var("PARLEY_JWT_EXPIRATION_MINUTES") {
        parse_into(&mut cfg.jwt_expiration_minutes, "PARLEY_JWT_EXPIRATION_MINUTES", &v);
    }
    if let Some(v) = env_var("PARLEY_ENABLE_ENCRYPTION") {
        parse_into(&mut cfg.enable_encryption, "PARLEY_ENABLE_ENCRYPTION", &v);
    }
    if let Some(v) = env_var("PARLEY_ENCRYPTION_KEY") {
        cfg.encryption_key = Some(v);
    }
    if let Some(v) = env_var("PARLEY_MAX_FILE_SIZE_MB") {
        parse_into(&mut cfg.max_file_size_mb, "PARLEY_MAX_FILE_SIZE_MB", &v);
    }
    if let Some(v) = env_var("PARLEY_ALLOWED_EXTENSIONS") {
        cfg.allowed_extensions = v.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(v) = env_var("PARLEY_WEBSOCKET_PING_INTERVAL") {
        parse_into(&mut cfg.websocket_ping_interval, "PARLEY_WEBSOCKET_PING_INTERVAL", &v);
    }
    if let Some(v) = env_var("PARLEY_WEBSOCKET_OUTBOUND_QUEUE_DEPTH") {
        parse_into(
            &mut cfg.websocket_outbound_queue_depth,
            "PARLEY_WEBSOCKET_OUTBOUND_QUEUE_DEPTH",
            &v,
        );
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_into<T: std::str::FromStr>(slot: &mut T, name: &str, raw: &str) {
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => warn!(var = name, value = raw, "ignoring unparsable env override"),
    }
}

/// Parse a lowercase serde enum (`DatabaseType`, `StorageType`) from an env
/// value via its JSON representation.
fn parse_enum<T: serde::de::DeserializeOwned>(slot: &mut T, name: &str, raw: &str) {
    match serde_json::from_value(serde_json::Value::String(raw.to_lowercase())) {
        Ok(v) => *slot = v,
        Err(_) => warn!(var = name, value = raw, "ignoring unparsable env override"),
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ParleyConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
