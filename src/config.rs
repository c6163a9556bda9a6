//! Configuration types.
//!
//! Everything is read once from the environment at startup and handed to
//! components at construction time.

use std::path::PathBuf;

use chrono::Duration;

use crate::error::ConfigError;

/// Default sign-off appended to every draft.
pub const DEFAULT_SIGNATURE: &str = "Best regards";

/// Triage run configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// How far back the inbox fetch looks.
    pub lookback: Duration,
    /// How far back the sent folder is scanned for prior replies.
    pub sent_lookback: Duration,
    /// Directory holding the needs-response snapshot, history and report.
    pub state_dir: PathBuf,
    /// Sign-off line the draft prompt asks for.
    pub signature: String,
    /// Discard obvious automated mail before spending a classification call.
    pub skip_automated: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            sent_lookback: Duration::days(7),
            state_dir: PathBuf::from("./data"),
            signature: DEFAULT_SIGNATURE.to_string(),
            skip_automated: true,
        }
    }
}

impl TriageConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lookback = match std::env::var("TRIAGE_LOOKBACK_HOURS") {
            Ok(v) => Duration::hours(parse_positive("TRIAGE_LOOKBACK_HOURS", &v)?),
            Err(_) => defaults.lookback,
        };
        let sent_lookback = match std::env::var("TRIAGE_SENT_LOOKBACK_DAYS") {
            Ok(v) => Duration::days(parse_positive("TRIAGE_SENT_LOOKBACK_DAYS", &v)?),
            Err(_) => defaults.sent_lookback,
        };
        let skip_automated = match std::env::var("TRIAGE_SKIP_AUTOMATED") {
            Ok(v) => parse_bool("TRIAGE_SKIP_AUTOMATED", &v)?,
            Err(_) => defaults.skip_automated,
        };

        Ok(Self {
            lookback,
            sent_lookback,
            state_dir: std::env::var("TRIAGE_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            signature: std::env::var("TRIAGE_SIGNATURE").unwrap_or(defaults.signature),
            skip_automated,
        })
    }

    pub fn needs_response_path(&self) -> PathBuf {
        self.state_dir.join(paths::NEEDS_RESPONSE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join(paths::HISTORY)
    }

    pub fn report_path(&self) -> PathBuf {
        self.state_dir.join(paths::REPORT)
    }
}

/// File names under the state directory.
pub mod paths {
    pub const NEEDS_RESPONSE: &str = "needs_response.json";
    pub const HISTORY: &str = "response_history.jsonl";
    pub const REPORT: &str = "needs_response_report.txt";
}

fn parse_positive(key: &str, value: &str) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a positive integer, got '{value}'"),
        }),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{value}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_windows_are_a_day_and_a_week() {
        let config = TriageConfig::default();
        assert_eq!(config.lookback, Duration::hours(24));
        assert_eq!(config.sent_lookback, Duration::days(7));
        assert!(config.skip_automated);
    }

    #[test]
    fn state_paths_live_under_state_dir() {
        let config = TriageConfig {
            state_dir: PathBuf::from("/tmp/triage"),
            ..TriageConfig::default()
        };
        assert_eq!(
            config.history_path(),
            PathBuf::from("/tmp/triage/response_history.jsonl")
        );
        assert_eq!(
            config.needs_response_path(),
            PathBuf::from("/tmp/triage/needs_response.json")
        );
    }

    #[test]
    fn parse_positive_rejects_zero_and_garbage() {
        assert_eq!(parse_positive("K", "12").unwrap(), 12);
        assert!(parse_positive("K", "0").is_err());
        assert!(parse_positive("K", "soon").is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("K", "TRUE").unwrap());
        assert!(!parse_bool("K", "off").unwrap());
        assert!(parse_bool("K", "maybe").is_err());
    }
}
