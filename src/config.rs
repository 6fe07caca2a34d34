//! Configuration management for sheet-analyst.
//!
//! Configuration is read once at startup from environment variables. A `.env`
//! file in the working directory is loaded first; variables already present in
//! the process environment take precedence over it.
//!
//! - `OPENAI_API_KEY` - Required. API key for the chat-completions endpoint.
//! - `OPENAI_BASE_URL` - Optional. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. Defaults to `gpt-4o-mini`.
//! - `MAX_ITERATIONS` - Optional. Maximum oracle turns per query. Defaults to `15`.
//! - `TURN_TIMEOUT_SECS` - Optional. Deadline for one oracle call. Defaults to `120`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Deadline for one tool execution. Defaults to `300`.
//! - `QUERY_TIMEOUT_SECS` - Optional. Deadline for a whole query. Defaults to `600`.
//! - `SEARCH_TIMEOUT_SECS` - Optional. Web search request timeout. Defaults to `30`.
//! - `CHART_OUTPUT_DIR` - Optional. Where charts are written. Defaults to `~/Documents`.
//! - `CHART_FONT` - Optional. TrueType font for chart titles and labels. A few
//!   common system locations are tried when unset.
//! - `LOG_OUTPUT_DIR` - Optional. Base directory for relative log filenames.
//!   Defaults to the current directory.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat-completions API key
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Model identifier sent with every completion request
    pub default_model: String,

    /// Maximum oracle turns for one query
    pub max_iterations: usize,

    /// Deadline for a single oracle call
    pub turn_timeout: Duration,

    /// Deadline for a single tool execution
    pub tool_timeout: Duration,

    /// Deadline for a whole query
    pub query_timeout: Duration,

    /// Timeout for web search requests
    pub search_timeout: Duration,

    /// Directory charts are rendered into
    pub chart_output_dir: PathBuf,

    /// Font file for chart text
    pub chart_font: Option<PathBuf>,

    /// Base directory for relative log filenames
    pub log_output_dir: PathBuf,
}

impl Config {
    /// Load configuration from the `.env` file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine; the environment alone may be enough.
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let base_url = lookup("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let default_model = lookup("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_iterations: usize = parse_or(&lookup, "MAX_ITERATIONS", 15)?;
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let turn_timeout = Duration::from_secs(parse_or(&lookup, "TURN_TIMEOUT_SECS", 120)?);
        let tool_timeout = Duration::from_secs(parse_or(&lookup, "TOOL_TIMEOUT_SECS", 300)?);
        let query_timeout = Duration::from_secs(parse_or(&lookup, "QUERY_TIMEOUT_SECS", 600)?);
        let search_timeout = Duration::from_secs(parse_or(&lookup, "SEARCH_TIMEOUT_SECS", 30)?);

        let chart_output_dir = lookup("CHART_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_chart_dir);

        let chart_font = lookup("CHART_FONT").map(PathBuf::from);

        let log_output_dir = lookup("LOG_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Ok(Self {
            api_key,
            base_url,
            default_model,
            max_iterations,
            turn_timeout,
            tool_timeout,
            query_timeout,
            search_timeout,
            chart_output_dir,
            chart_font,
            log_output_dir,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, chart_output_dir: PathBuf, log_output_dir: PathBuf) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            max_iterations: 15,
            turn_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(300),
            query_timeout: Duration::from_secs(600),
            search_timeout: Duration::from_secs(30),
            chart_output_dir,
            chart_font: None,
            log_output_dir,
        }
    }
}

/// `~/Documents`, falling back to the current directory when there is no home.
fn default_chart_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Documents")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}
