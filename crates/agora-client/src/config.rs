//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client can start against a local
//! server with zero configuration.

use url::Url;

use agora_shared::{ChatConfig, RoomId};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server; the WebSocket and upload endpoints hang off it.
    /// Env: `AGORA_SERVER_URL`
    /// Default: `http://127.0.0.1:3000`
    pub server_url: String,

    /// Bearer token sent with the WebSocket handshake and uploads.
    /// Env: `AGORA_TOKEN`
    /// Default: none.
    pub token: Option<String>,

    /// Room and limits handed to the session manager.
    /// Env: `AGORA_ROOM`, `AGORA_ENABLED`, `AGORA_MESSAGE_LIMIT`,
    /// `AGORA_MAX_MESSAGE_LENGTH`, `AGORA_MAX_IMAGE_BYTES`
    pub chat: ChatConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            token: None,
            chat: ChatConfig::default(),
        }
    }
}

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = var("AGORA_SERVER_URL") {
            match Url::parse(&raw) {
                Ok(_) => config.server_url = raw,
                Err(e) => tracing::warn!(
                    value = %raw,
                    error = %e,
                    "Invalid AGORA_SERVER_URL, using default"
                ),
            }
        }

        if let Some(token) = var("AGORA_TOKEN") {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }

        if let Some(room) = var("AGORA_ROOM") {
            config.chat.room = RoomId::new(&room);
        }

        if let Some(val) = var("AGORA_ENABLED") {
            config.chat.enabled = val != "false" && val != "0";
        }

        if let Some(val) = var("AGORA_MESSAGE_LIMIT") {
            match val.parse::<i64>() {
                Ok(n) => config.chat.message_limit = agora_shared::config::normalize_message_limit(n),
                Err(_) => tracing::warn!(value = %val, "Invalid AGORA_MESSAGE_LIMIT, using default"),
            }
        }

        if let Some(val) = var("AGORA_MAX_MESSAGE_LENGTH") {
            match val.parse::<i64>() {
                Ok(n) => {
                    config.chat.max_message_length =
                        agora_shared::config::normalize_max_message_length(n)
                }
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid AGORA_MAX_MESSAGE_LENGTH, using default")
                }
            }
        }

        if let Some(val) = var("AGORA_MAX_IMAGE_BYTES") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.chat.max_image_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid AGORA_MAX_IMAGE_BYTES, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.server_url)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use agora_shared::constants::{DEFAULT_MESSAGE_LIMIT, MAX_MESSAGE_LIMIT};

    fn load(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config.server_url, "http://127.0.0.1:3000");
        assert!(config.base_url().is_ok());
        assert_eq!(config.token, None);
        assert_eq!(config.chat, ChatConfig::default());
    }

    #[test]
    fn test_values_are_read_and_normalised() {
        let config = load(&[
            ("AGORA_SERVER_URL", "https://chat.example.com"),
            ("AGORA_TOKEN", "secret"),
            ("AGORA_ROOM", "  lobby  "),
            ("AGORA_ENABLED", "false"),
            ("AGORA_MESSAGE_LIMIT", "9000"),
            ("AGORA_MAX_MESSAGE_LENGTH", "0"),
        ]);
        assert_eq!(config.base_url().unwrap().host_str(), Some("chat.example.com"));
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.chat.room, RoomId::new("lobby"));
        assert!(!config.chat.enabled);
        assert_eq!(config.chat.message_limit, MAX_MESSAGE_LIMIT);
        assert_eq!(config.chat.max_message_length, 8000);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = load(&[
            ("AGORA_SERVER_URL", "not a url"),
            ("AGORA_TOKEN", ""),
            ("AGORA_MESSAGE_LIMIT", "lots"),
            ("AGORA_MAX_IMAGE_BYTES", "0"),
        ]);
        assert_eq!(config.server_url, "http://127.0.0.1:3000");
        assert_eq!(config.token, None);
        assert_eq!(config.chat.message_limit, DEFAULT_MESSAGE_LIMIT);
        assert_eq!(config.chat.max_image_bytes, ChatConfig::default().max_image_bytes);
    }
}
