use crate::scoring::ScoringConfig;
use crate::types::SessionConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Process-level settings, read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: SocketAddr,
    /// Snapshot directory; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub submission_cooldown: Duration,
    pub max_entry_chars: usize,
    /// Defaults for sessions created without explicit settings
    pub session_defaults: SessionConfig,
    pub scoring: ScoringConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 6573)),
            data_dir: None,
            submission_cooldown: Duration::from_secs(60),
            max_entry_chars: 280,
            session_defaults: SessionConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let addr = match std::env::var("PLANETLINE_ADDR") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .map_err(|e| format!("Invalid PLANETLINE_ADDR '{}': {}", raw, e))?,
            _ => defaults.addr,
        };

        let data_dir = std::env::var("PLANETLINE_DATA_DIR")
            .ok()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .map(PathBuf::from);

        let session_defaults = SessionConfig {
            play_duration_minutes: env_parse("PLAY_DURATION_MINUTES")
                .unwrap_or(defaults.session_defaults.play_duration_minutes),
            break_duration_minutes: env_parse("BREAK_DURATION_MINUTES")
                .unwrap_or(defaults.session_defaults.break_duration_minutes),
            max_rounds: env_parse("MAX_ROUNDS").unwrap_or(defaults.session_defaults.max_rounds),
            timeline_speed_ratio: env_parse("TIMELINE_SPEED_RATIO")
                .unwrap_or(defaults.session_defaults.timeline_speed_ratio),
        };
        session_defaults
            .validate()
            .map_err(|e| format!("Invalid session defaults: {}", e))?;

        let scoring = match std::env::var("SCORING_CONFIG") {
            Ok(path) if !path.trim().is_empty() => {
                ScoringConfig::from_file(std::path::Path::new(path.trim()))?
            }
            _ => defaults.scoring,
        };

        let config = Self {
            addr,
            data_dir,
            submission_cooldown: env_parse("SUBMISSION_COOLDOWN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.submission_cooldown),
            max_entry_chars: env_parse("MAX_ENTRY_CHARS").unwrap_or(defaults.max_entry_chars),
            session_defaults,
            scoring,
        };

        tracing::info!(
            addr = %config.addr,
            data_dir = ?config.data_dir,
            cooldown_secs = config.submission_cooldown.as_secs(),
            max_entry_chars = config.max_entry_chars,
            "Config loaded"
        );

        Ok(config)
    }
}
