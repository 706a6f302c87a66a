//! Agent configuration loaded from `.env`, environment, and an optional TOML file.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | DROPTRUCK_ENDPOINTING_MS | 900 | Silence after the last final fragment before a segment is emitted. |
//! | DROPTRUCK_MIN_FRAGMENT_CHARS | 3 | Fragments shorter than this are dropped as noise. |
//! | DROPTRUCK_VEHICLE_MATCH_THRESHOLD | 85 | Minimum similarity (0–100) for a vehicle match. |
//! | DROPTRUCK_CONTEXT_EXCHANGES | 10 | User/assistant pairs sent to reply generation. |
//! | DROPTRUCK_GENERATION_TIMEOUT_SECS | 30 | Budget for one reply-generation call. |
//! | DROPTRUCK_SHUTDOWN_TIMEOUT_SECS | 5 | Bound on transport stop and final playback. |
//! | DROPTRUCK_TERMINATION_MARKER | [CALL_COMPLETE] | Out-of-band end-of-call marker in replies. |
//! | DROPTRUCK_LOOSE_CLOSING_PHRASES | true | Also end on closing phrases in the reply's last sentence. |
//! | DROPTRUCK_UTC_OFFSET_MINUTES | 330 | Local offset used to resolve "today"/"tomorrow". |
//! | OPENAI_API_KEY / OPENAI_MODEL / DROPTRUCK_LLM_API_URL | – / gpt-4o-mini / api.openai.com | Reply generation. |
//! | DROPTRUCK_BACKEND_URL | http://127.0.0.1:8000 | Booking submission base URL. |
//! | DROPTRUCK_LOGS_DIR | storage/logs | Session log directory. |

use crate::error::VoiceResult;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_endpointing_ms() -> u64 {
    900
}

fn default_min_fragment_chars() -> usize {
    3
}

fn default_vehicle_match_threshold() -> f64 {
    85.0
}

fn default_context_exchanges() -> usize {
    10
}

fn default_generation_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_transport_channel_capacity() -> usize {
    64
}

fn default_termination_marker() -> String {
    "[CALL_COMPLETE]".to_string()
}

fn default_true() -> bool {
    true
}

fn default_utc_offset_minutes() -> i32 {
    330
}

fn default_llm_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_temperature() -> f32 {
    0.7
}

fn default_llm_max_tokens() -> u32 {
    256
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    10
}

fn default_logs_dir() -> String {
    "storage/logs".to_string()
}

/// Runtime configuration for one agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u64,
    #[serde(default = "default_min_fragment_chars")]
    pub min_fragment_chars: usize,
    #[serde(default = "default_vehicle_match_threshold")]
    pub vehicle_match_threshold: f64,
    #[serde(default = "default_context_exchanges")]
    pub context_exchanges: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_transport_channel_capacity")]
    pub transport_channel_capacity: usize,
    #[serde(default = "default_termination_marker")]
    pub termination_marker: String,
    #[serde(default = "default_true")]
    pub loose_closing_phrases: bool,
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_llm_api_url")]
    pub llm_api_url: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    #[serde(default)]
    pub default_contact_name: Option<String>,
    #[serde(default)]
    pub default_contact_number: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpointing_ms: default_endpointing_ms(),
            min_fragment_chars: default_min_fragment_chars(),
            vehicle_match_threshold: default_vehicle_match_threshold(),
            context_exchanges: default_context_exchanges(),
            generation_timeout_secs: default_generation_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            transport_channel_capacity: default_transport_channel_capacity(),
            termination_marker: default_termination_marker(),
            loose_closing_phrases: true,
            utc_offset_minutes: default_utc_offset_minutes(),
            llm_api_url: default_llm_api_url(),
            llm_api_key: None,
            llm_model: default_llm_model(),
            llm_temperature: default_llm_temperature(),
            llm_max_tokens: default_llm_max_tokens(),
            backend_url: default_backend_url(),
            backend_timeout_secs: default_backend_timeout_secs(),
            logs_dir: default_logs_dir(),
            default_contact_name: None,
            default_contact_number: None,
        }
    }
}

impl AgentConfig {
    /// Load from environment only. Unset or invalid values fall back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpointing_ms: env_parse("DROPTRUCK_ENDPOINTING_MS", d.endpointing_ms),
            min_fragment_chars: env_parse("DROPTRUCK_MIN_FRAGMENT_CHARS", d.min_fragment_chars),
            vehicle_match_threshold: env_parse(
                "DROPTRUCK_VEHICLE_MATCH_THRESHOLD",
                d.vehicle_match_threshold,
            )
            .clamp(0.0, 100.0),
            context_exchanges: env_parse("DROPTRUCK_CONTEXT_EXCHANGES", d.context_exchanges),
            generation_timeout_secs: env_parse(
                "DROPTRUCK_GENERATION_TIMEOUT_SECS",
                d.generation_timeout_secs,
            ),
            shutdown_timeout_secs: env_parse("DROPTRUCK_SHUTDOWN_TIMEOUT_SECS", d.shutdown_timeout_secs),
            transport_channel_capacity: env_parse(
                "DROPTRUCK_TRANSPORT_CHANNEL_CAPACITY",
                d.transport_channel_capacity,
            )
            .max(1),
            termination_marker: env_opt_string("DROPTRUCK_TERMINATION_MARKER")
                .unwrap_or(d.termination_marker),
            loose_closing_phrases: env_bool("DROPTRUCK_LOOSE_CLOSING_PHRASES", true),
            utc_offset_minutes: env_parse("DROPTRUCK_UTC_OFFSET_MINUTES", d.utc_offset_minutes),
            llm_api_url: env_opt_string("DROPTRUCK_LLM_API_URL").unwrap_or(d.llm_api_url),
            llm_api_key: env_opt_string("OPENAI_API_KEY")
                .or_else(|| env_opt_string("DROPTRUCK_LLM_API_KEY")),
            llm_model: env_opt_string("OPENAI_MODEL").unwrap_or(d.llm_model),
            llm_temperature: env_parse("DROPTRUCK_LLM_TEMPERATURE", d.llm_temperature),
            llm_max_tokens: env_parse("DROPTRUCK_LLM_MAX_TOKENS", d.llm_max_tokens),
            backend_url: env_opt_string("DROPTRUCK_BACKEND_URL").unwrap_or(d.backend_url),
            backend_timeout_secs: env_parse("DROPTRUCK_BACKEND_TIMEOUT_SECS", d.backend_timeout_secs),
            logs_dir: env_opt_string("DROPTRUCK_LOGS_DIR").unwrap_or(d.logs_dir),
            default_contact_name: env_opt_string("DROPTRUCK_CONTACT_NAME"),
            default_contact_number: env_opt_string("DROPTRUCK_CONTACT_NUMBER"),
        }
    }

    /// Layered load. Precedence: `DROPTRUCK__*` env > TOML at `DROPTRUCK_CONFIG`
    /// (default `config/agent.toml`, skipped when absent) > defaults.
    /// The LLM key is always taken from `OPENAI_API_KEY` when the layers leave it unset.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("DROPTRUCK_CONFIG").unwrap_or_else(|_| "config/agent.toml".to_string());
        let builder = config::Config::builder();
        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };
        let built = builder
            .add_source(config::Environment::with_prefix("DROPTRUCK").separator("__"))
            .build()?;
        let mut loaded: AgentConfig = built.try_deserialize()?;
        if loaded.llm_api_key.is_none() {
            loaded.llm_api_key = env_opt_string("OPENAI_API_KEY");
        }
        Ok(loaded)
    }

    pub fn endpointing(&self) -> Duration {
        Duration::from_millis(self.endpointing_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Offset for the local calendar. Out-of-range values fall back to IST.
    pub fn local_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .or_else(|| FixedOffset::east_opt(default_utc_offset_minutes() * 60))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1"
            }
        }
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AgentConfig::default();
        assert_eq!(c.endpointing(), Duration::from_millis(900));
        assert_eq!(c.min_fragment_chars, 3);
        assert!((c.vehicle_match_threshold - 85.0).abs() < f64::EPSILON);
        assert_eq!(c.context_exchanges, 10);
        assert_eq!(c.generation_timeout(), Duration::from_secs(30));
        assert_eq!(c.termination_marker, "[CALL_COMPLETE]");
        assert!(c.loose_closing_phrases);
        assert!(c.llm_api_key.is_none());
    }

    #[test]
    fn local_offset_is_ist_by_default() {
        let c = AgentConfig::default();
        assert_eq!(c.local_offset().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn invalid_offset_falls_back() {
        let c = AgentConfig {
            utc_offset_minutes: 100_000,
            ..Default::default()
        };
        assert_eq!(c.local_offset().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn deserializes_partial_config_with_defaults() {
        let parsed: AgentConfig = serde_json::from_str(r#"{"endpointing_ms": 1200}"#).unwrap();
        assert_eq!(parsed.endpointing_ms, 1200);
        assert_eq!(parsed.context_exchanges, 10);
        assert_eq!(parsed.backend_url, "http://127.0.0.1:8000");
    }
}
