use anyhow::{Context, Result};
use std::time::Duration;

use crate::audio::SessionSettings;

const ENV_PREFIX: &str = "SUR_";

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub prefix: String,

    // APIs (optional)
    pub youtube_api_key: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // Playback
    pub idle_timeout: Duration,
    pub stop_timeout: Duration,
    pub max_queue_size: usize,
    pub max_playlist_size: usize,

    // Tools
    pub ytdlp_path: String,
}

impl Config {
    /// Reads `.env` and then `SUR_*` environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key lookup. Keys are given without
    /// the `SUR_` prefix.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Ok(Self {
            // Discord
            discord_token: get("TOKEN").context("SUR_TOKEN is required")?,
            prefix: get("PREFIX").unwrap_or(defaults.prefix),

            // APIs
            youtube_api_key: get("YOUTUBE_API"),
            spotify_client_id: get("SPOTIFY_CLIENTID"),
            spotify_client_secret: get("SPOTIFY_CLIENTSECRET"),

            // Playback
            idle_timeout: match get("IDLE_TIMEOUT") {
                Some(v) => humantime::parse_duration(&v).with_context(|| format!("Invalid SUR_IDLE_TIMEOUT: {}", v))?,
                None => defaults.idle_timeout,
            },
            stop_timeout: match get("STOP_TIMEOUT") {
                Some(v) => humantime::parse_duration(&v).with_context(|| format!("Invalid SUR_STOP_TIMEOUT: {}", v))?,
                None => defaults.stop_timeout,
            },
            max_queue_size: match get("MAX_QUEUE_SIZE") {
                Some(v) => v.parse().with_context(|| format!("Invalid SUR_MAX_QUEUE_SIZE: {}", v))?,
                None => defaults.max_queue_size,
            },
            max_playlist_size: match get("MAX_PLAYLIST_SIZE") {
                Some(v) => v.parse().with_context(|| format!("Invalid SUR_MAX_PLAYLIST_SIZE: {}", v))?,
                None => defaults.max_playlist_size,
            },

            // Tools
            ytdlp_path: get("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
        })
    }

    /// Value of the `-p <prefix>` (or `-p=<prefix>`) command line flag.
    pub fn prefix_from_args(args: impl IntoIterator<Item = String>) -> Option<String> {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "-p" {
                return args.next();
            }
            if let Some(prefix) = arg.strip_prefix("-p=") {
                return Some(prefix.to_string());
            }
        }
        None
    }

    /// Overrides the command prefix (the `-p` flag).
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        if let Some(prefix) = prefix.filter(|p| !p.trim().is_empty()) {
            self.prefix = prefix;
        }
        self
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The token and prefix must not be empty or contain whitespace
    /// - Timeouts and size limits must be greater than zero
    /// - Spotify needs both the client id and the secret, or neither
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.prefix.is_empty() || self.prefix.chars().any(char::is_whitespace) {
            anyhow::bail!("Command prefix must be non-empty without spaces, got: {:?}", self.prefix);
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.stop_timeout.is_zero() {
            anyhow::bail!("Stop timeout must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("Set both SUR_SPOTIFY_CLIENTID and SUR_SPOTIFY_CLIENTSECRET, or neither");
        }

        Ok(())
    }

    pub fn spotify_credentials(&self) -> Option<(String, String)> {
        Some((self.spotify_client_id.clone()?, self.spotify_client_secret.clone()?))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: self.idle_timeout,
            stop_timeout: self.stop_timeout,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Returns a summary of the configuration for logging. Secrets are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix {:?}\n  \
            Playback: idle timeout {}, stop timeout {}\n  \
            Limits: {} queue, {} playlist\n  \
            Sources: yt-dlp at {}, YouTube API={}, Spotify={}",
            self.prefix,
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.stop_timeout),
            self.max_queue_size,
            self.max_playlist_size,
            self.ytdlp_path,
            self.youtube_api_key.is_some(),
            self.spotify_credentials().is_some(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (token must be provided)
            discord_token: String::new(),
            prefix: "!".to_string(),

            youtube_api_key: None,
            spotify_client_id: None,
            spotify_client_secret: None,

            idle_timeout: Duration::from_secs(5 * 60),
            stop_timeout: Duration::from_secs(10),
            max_queue_size: 1000,
            max_playlist_size: 100,

            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}
