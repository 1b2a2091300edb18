use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

/// Top-level hub configuration, loaded from tutorlink.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub media: MediaSection,
    pub calls: CallSection,
    pub chat: ChatSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Origin allowed by CORS. Localhost origins allow any.
    pub public_url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            public_url: "http://localhost:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    /// Upper bound for any single persistence call made while handling an event.
    pub query_timeout_ms: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:tutorlink.db?mode=rwc".into(),
            query_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: "tutorlink-dev-secret-change-me".into(),
        }
    }
}

/// Credentials shared with the third-party media relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    pub app_id: u32,
    pub server_secret: String,
    pub token_ttl_secs: i64,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            app_id: 0,
            server_secret: "tutorlink-media-secret-change-me".into(),
            token_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallSection {
    /// How long a call request stays acceptable before the hub forgets it.
    pub request_ttl_secs: u64,
}

impl Default for CallSection {
    fn default() -> Self {
        Self {
            request_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub max_message_length: usize,
    pub max_image_bytes: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            max_message_length: 4000,
            max_image_bytes: 5 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("DB_QUERY_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.database.query_timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("MEDIA_APP_ID")
            && let Ok(id) = v.parse()
        {
            self.media.app_id = id;
        }
        if let Ok(v) = std::env::var("MEDIA_SERVER_SECRET") {
            self.media.server_secret = v;
        }
        if let Ok(v) = std::env::var("MEDIA_TOKEN_TTL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.media.token_ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("CALL_REQUEST_TTL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.calls.request_ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("MAX_MESSAGE_LENGTH")
            && let Ok(len) = v.parse()
        {
            self.chat.max_message_length = len;
        }
        if let Ok(v) = std::env::var("MAX_IMAGE_BYTES")
            && let Ok(len) = v.parse()
        {
            self.chat.max_image_bytes = len;
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.database.query_timeout_ms)
    }

    pub fn call_request_ttl(&self) -> Duration {
        Duration::from_secs(self.calls.request_ttl_secs)
    }
}
