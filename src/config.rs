use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Classification strategy selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Keyword tables only, no model.
    Rules,
    /// Neural model, rule fallback on failure.
    Ai,
    /// Neural model bounded by a timeout, rule fallback on failure.
    Hybrid,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Rules => write!(f, "rules"),
            Mode::Ai => write!(f, "ai"),
            Mode::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// API key clients must present in X-API-Key
    #[arg(long, env = "API_KEY")]
    pub api_key: String,

    /// Per-client request cap per minute
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value = "100")]
    pub rate_limit_per_minute: u32,

    /// Maximum accepted length of a content/subject field, in bytes
    #[arg(long, env = "MAX_CONTENT_LENGTH", default_value = "16384")]
    pub max_content_length: usize,

    /// Classification strategy
    #[arg(long, env = "MODE", value_enum, default_value = "hybrid")]
    pub mode: Mode,

    /// Upper bound on a single model inference before falling back to rules
    #[arg(long, env = "CLASSIFY_TIMEOUT_SECS", default_value = "30")]
    pub classify_timeout_secs: u64,

    /// Comma-separated CORS allow-list; "*" allows any origin
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Model ID from Hugging Face Hub
    #[arg(long, env = "MODEL_ID")]
    pub model_id: Option<String>,

    /// Local path to model directory
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Use PyTorch weights instead of safetensors
    #[arg(long, env = "USE_PTH")]
    pub use_pth: bool,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Maximum sequence length allowed
    #[arg(long, env = "MAX_SEQUENCE_LENGTH", default_value = "512")]
    pub max_sequence_length: usize,

    /// Batch size for model inference
    #[arg(long, env = "BATCH_SIZE", default_value = "8")]
    pub batch_size: usize,

    /// Tick duration in milliseconds for batch processing
    #[arg(long, env = "TICK_DURATION_MS", default_value = "100")]
    pub tick_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub tick_duration: Duration,
}

impl From<&Config> for BatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            tick_duration: Duration::from_millis(config.tick_duration_ms),
        }
    }
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        if self.cors_origins.trim() == "*" {
            return None;
        }
        Some(
            self.cors_origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(
            std::iter::once("automail-server").chain(args.iter().copied()),
        )
        .unwrap()
    }

    #[test]
    fn defaults_match_contract() {
        let config = parse(&["--api-key", "secret"]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.rate_limit_per_minute, 100);
        assert_eq!(config.max_content_length, 16384);
        assert_eq!(config.mode, Mode::Hybrid);
    }

    #[test]
    fn wildcard_cors_means_any_origin() {
        let config = parse(&["--api-key", "secret"]);
        assert!(config.cors_origin_list().is_none());
    }

    #[test]
    fn cors_list_splits_and_trims() {
        let config = parse(&[
            "--api-key",
            "secret",
            "--cors-origins",
            "https://a.example, https://b.example",
        ]);
        assert_eq!(
            config.cors_origin_list().unwrap(),
            vec!["https://a.example", "https://b.example"]
        );
    }
}
