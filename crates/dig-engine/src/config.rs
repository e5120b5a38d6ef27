use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::store::{LocalStore, RecentPrompts};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 15.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Gemini,
    Dryrun,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Gemini => "gemini",
            Self::Dryrun => "dryrun",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "gemini" => Ok(Self::Gemini),
            "dryrun" | "dry-run" | "offline" => Ok(Self::Dryrun),
            other => Err(format!(
                "unknown transport '{other}' (expected http, gemini or dryrun)"
            )),
        }
    }
}

/// Process configuration, read once at startup and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub generate_url: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub chat_model: String,
    pub request_timeout: Duration,
    pub home: PathBuf,
    pub user_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let timeout_s = get("DIG_REQUEST_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
            .clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S);

        Self {
            generate_url: get("DIG_GENERATE_URL"),
            api_key: get("GENAI_API_KEY")
                .or_else(|| get("GEMINI_API_KEY"))
                .or_else(|| get("GOOGLE_API_KEY")),
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            image_model: get("DIG_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            chat_model: get("DIG_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            request_timeout: Duration::from_secs_f64(timeout_s),
            home: get("DIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".dig")),
            user_id: get("DIG_USER").unwrap_or_else(|| "local".to_string()),
        }
    }

    /// An explicit choice wins; otherwise the most capable configured transport.
    pub fn resolve_transport(&self, explicit: Option<TransportKind>) -> TransportKind {
        if let Some(kind) = explicit {
            return kind;
        }
        if self.generate_url.is_some() {
            TransportKind::Http
        } else if self.api_key.is_some() {
            TransportKind::Gemini
        } else {
            TransportKind::Dryrun
        }
    }

    /// Chat has no HTTP transport: an explicit `http` choice is refused,
    /// and the default is Gemini when a key is set, else dry run.
    pub fn resolve_chat_transport(&self, explicit: Option<TransportKind>) -> DigResult<TransportKind> {
        match explicit {
            Some(TransportKind::Http) => Err(DigError::remote(
                "Chat talks to Gemini directly; use --transport gemini or dryrun",
                None,
            )),
            Some(kind) => Ok(kind),
            None if self.api_key.is_some() => Ok(TransportKind::Gemini),
            None => Ok(TransportKind::Dryrun),
        }
    }

    pub fn events_path(&self) -> PathBuf {
        self.home.join("events.jsonl")
    }

    pub fn store(&self) -> LocalStore {
        LocalStore::new(&self.home)
    }

    pub fn recents(&self) -> RecentPrompts {
        RecentPrompts::new(self.home.join("recent_prompts.json"))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
