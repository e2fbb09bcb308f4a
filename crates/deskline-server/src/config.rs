//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use deskline_shared::actor::AdminProfile;
use deskline_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `deskline.db` in the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Deskline"`
    pub instance_name: String,

    /// Bearer token required on /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin endpoints rely on the actor headers only).
    pub admin_token: Option<String>,

    /// Admin profiles published by the identity provider, as a JSON array.
    /// Env: `DESKLINE_ADMINS`
    /// Default: no admins.
    pub admins: Vec<AdminProfile>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("instance_name", &self.instance_name)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("admins", &self.admins.len())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: APP_NAME.to_string(),
            admin_token: None,
            admins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(json) = var("DESKLINE_ADMINS") {
            match parse_admins(&json) {
                Ok(admins) => config.admins = admins,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid DESKLINE_ADMINS, starting without admins");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_admins(json: &str) -> Result<Vec<AdminProfile>, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.database_path.is_none());
        assert!(config.admin_token.is_none());
        assert_eq!(config.instance_name, "Deskline");
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/desk.db"),
            ("ADMIN_TOKEN", "s3cret"),
            ("DESKLINE_ADMINS", r#"[{"id":"user_1","firstName":"Ada","lastName":"L"}]"#),
        ]));
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/desk.db")));
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.admins.len(), 1);
        assert_eq!(config.admins[0].display_name(), "Ada L");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "not an address"),
            ("ADMIN_TOKEN", ""),
            ("DESKLINE_ADMINS", "{broken"),
        ]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.admin_token.is_none());
        assert!(config.admins.is_empty());
    }

    #[test]
    fn test_debug_hides_admin_token() {
        let config = ServerConfig::from_lookup(lookup(&[("ADMIN_TOKEN", "s3cret")]));
        let shown = format!("{config:?}");
        assert!(!shown.contains("s3cret"));
        assert!(shown.contains("<redacted>"));
    }
}
