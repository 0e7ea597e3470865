use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_QUIET_WINDOW_MS: u64 = 5_000;
pub const DEFAULT_PAUSE_TTL_MS: u64 = 2 * 60 * 60 * 1_000;
pub const DEFAULT_DEDUP_TTL_MS: u64 = 10 * 60 * 1_000;
pub const DEFAULT_DEDUP_CAPACITY: usize = 5_000;
pub const DEFAULT_PACING_DELAY_MS: u64 = 3_000;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_HISTORY_MAX_TURNS: usize = 100;
pub const DEFAULT_ORDER_BUCKET_MS: u64 = 60 * 60 * 1_000;
pub const DEFAULT_MEDIA_FETCH_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_WELCOME_TEXT: &str = "Bienvenido a Herbalis. Estoy para asesorarte 🙂";
pub const DEFAULT_FALLBACK_TEXT: &str =
    "Disculpá, tuve un problema para responderte. ¿Podés repetirme tu consulta?";

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `ConfigError` values.
pub enum ConfigError {
    #[error("{field} must be greater than 0")]
    ZeroValue { field: &'static str },
    #[error("{field} must not be empty")]
    EmptyText { field: &'static str },
    #[error("history_limit ({limit}) must not exceed history_max_turns ({max_turns})")]
    HistoryLimitExceedsRetention { limit: usize, max_turns: usize },
    #[error("welcome_media_url must be an http(s) URL: {0}")]
    InvalidWelcomeMediaUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Tunables for the debounce, pause, dedup, pacing, and persistence layers.
pub struct OrchestratorConfig {
    pub quiet_window_ms: u64,
    pub pause_ttl_ms: u64,
    pub dedup_ttl_ms: u64,
    pub dedup_capacity: usize,
    pub pacing_delay_ms: u64,
    pub welcome_media_url: Option<String>,
    pub welcome_text: String,
    pub fallback_text: String,
    pub history_limit: usize,
    pub history_max_turns: usize,
    pub order_bucket_ms: u64,
    pub presence_enabled: bool,
    pub command_ack_enabled: bool,
    pub media_fetch_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: DEFAULT_QUIET_WINDOW_MS,
            pause_ttl_ms: DEFAULT_PAUSE_TTL_MS,
            dedup_ttl_ms: DEFAULT_DEDUP_TTL_MS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            pacing_delay_ms: DEFAULT_PACING_DELAY_MS,
            welcome_media_url: None,
            welcome_text: DEFAULT_WELCOME_TEXT.to_string(),
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_max_turns: DEFAULT_HISTORY_MAX_TURNS,
            order_bucket_ms: DEFAULT_ORDER_BUCKET_MS,
            presence_enabled: true,
            command_ack_enabled: true,
            media_fetch_timeout_ms: DEFAULT_MEDIA_FETCH_TIMEOUT_MS,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("quiet_window_ms", self.quiet_window_ms),
            ("pause_ttl_ms", self.pause_ttl_ms),
            ("dedup_ttl_ms", self.dedup_ttl_ms),
            ("dedup_capacity", self.dedup_capacity as u64),
            ("history_max_turns", self.history_max_turns as u64),
            ("order_bucket_ms", self.order_bucket_ms),
            ("media_fetch_timeout_ms", self.media_fetch_timeout_ms),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroValue { field });
        }
        if self.welcome_text.trim().is_empty() {
            return Err(ConfigError::EmptyText {
                field: "welcome_text",
            });
        }
        if self.fallback_text.trim().is_empty() {
            return Err(ConfigError::EmptyText {
                field: "fallback_text",
            });
        }
        if self.history_limit > self.history_max_turns {
            return Err(ConfigError::HistoryLimitExceedsRetention {
                limit: self.history_limit,
                max_turns: self.history_max_turns,
            });
        }
        if let Some(url) = self.welcome_media_url.as_deref() {
            let url = url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidWelcomeMediaUrl(url.to_string()));
            }
        }
        Ok(())
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn media_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.media_fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, OrchestratorConfig};

    #[test]
    fn unit_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pause_ttl_ms, 7_200_000);
        assert_eq!(config.dedup_capacity, 5_000);
    }

    #[test]
    fn regression_zero_quiet_window_is_rejected() {
        let config = OrchestratorConfig {
            quiet_window_ms: 0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                field: "quiet_window_ms"
            })
        );
    }

    #[test]
    fn regression_history_limit_above_retention_is_rejected() {
        let config = OrchestratorConfig {
            history_limit: 20,
            history_max_turns: 5,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HistoryLimitExceedsRetention { .. })
        ));
    }

    #[test]
    fn regression_non_http_welcome_media_is_rejected() {
        let config = OrchestratorConfig {
            welcome_media_url: Some("ftp://cdn/welcome.jpg".to_string()),
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWelcomeMediaUrl(_))
        ));
    }
}
