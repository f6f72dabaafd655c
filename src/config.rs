//! Application configuration loaded from environment variables.

use axum::http::HeaderValue;
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

/// Scheme that selects the in-memory store instead of PostgreSQL.
pub const MEMORY_SCHEME: &str = "memory";

/// Longest admin session a login may grant (one year).
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Database ===
    /// PostgreSQL connection URL, or `memory://` for the in-memory store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Upper bound on pooled connections.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    /// Seconds to wait for a pooled connection before giving up.
    #[serde(default = "default_acquire_timeout")]
    pub database_acquire_timeout_secs: u64,

    // === Server ===
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins (comma separated).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    // === Admin ===
    /// Shared admin dashboard password.
    #[serde(default = "default_admin_password")]
    pub admin_password: String,

    /// Require a session cookie on admin data routes.
    #[serde(default = "default_true")]
    pub admin_auth_required: bool,

    /// Lifetime of an admin session.
    #[serde(default = "default_session_ttl")]
    pub admin_session_ttl_secs: u64,

    /// Mark the session cookie `Secure`.
    #[serde(default)]
    pub cookie_secure: bool,

    // === Documents ===
    /// Root directory for uploaded documents.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Largest accepted upload.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    // === Extraction provider ===
    /// OpenAI API key; extraction falls back to a placeholder when empty.
    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Model used for structured extraction.
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Request timeout for the extraction provider.
    #[serde(default = "default_openai_timeout")]
    pub openai_timeout_secs: u64,

    // === Diagnostics ===
    /// Debug mode (logs SQL statements).
    #[serde(default)]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/blackkeyx".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout() -> u64 {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_admin_password() -> String {
    "changeme".to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_ttl() -> u64 {
    86_400
}

fn default_upload_dir() -> String {
    "./uploads".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_acquire_timeout_secs: default_acquire_timeout(),
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            admin_password: default_admin_password(),
            admin_auth_required: default_true(),
            admin_session_ttl_secs: default_session_ttl(),
            cookie_secure: false,
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            openai_api_key: None,
            openai_base_url: default_openai_base_url(),
            openai_model: default_openai_model(),
            openai_timeout_secs: default_openai_timeout(),
            debug: false,
            rust_log: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.database_url).map_err(|e| ConfigError::Invalid {
            field: "DATABASE_URL",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "postgres" | "postgresql" | MEMORY_SCHEME) {
            return Err(ConfigError::Invalid {
                field: "DATABASE_URL",
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        if self.admin_password.is_empty() {
            return Err(ConfigError::Invalid {
                field: "ADMIN_PASSWORD",
                reason: "must not be empty".to_string(),
            });
        }

        if self.database_max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "DATABASE_MAX_CONNECTIONS",
                reason: "must be at least 1".to_string(),
            });
        }

        if !(1..=MAX_SESSION_TTL_SECS).contains(&self.admin_session_ttl_secs) {
            return Err(ConfigError::Invalid {
                field: "ADMIN_SESSION_TTL_SECS",
                reason: format!("must be between 1 and {MAX_SESSION_TTL_SECS}"),
            });
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "MAX_UPLOAD_BYTES",
                reason: "must be at least 1".to_string(),
            });
        }

        for origin in &self.cors_origins {
            HeaderValue::from_str(origin).map_err(|_| ConfigError::Invalid {
                field: "CORS_ORIGINS",
                reason: format!("{origin:?} is not a valid header value"),
            })?;
        }

        Ok(())
    }

    /// Whether the in-memory store was requested.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url
            .split_once("://")
            .is_some_and(|(scheme, _)| scheme == MEMORY_SCHEME)
    }

    /// Whether the extraction provider has credentials.
    pub fn extraction_enabled(&self) -> bool {
        self.openai_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// Whether the admin password was left at its shipped default.
    pub fn uses_default_password(&self) -> bool {
        self.admin_password == default_admin_password()
    }

    /// Database URL with any password replaced, safe to log.
    pub fn redacted_database_url(&self) -> String {
        match Url::parse(&self.database_url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("****"));
                }
                url.to_string()
            }
            Err(_) => "<invalid>".to_string(),
        }
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
