//! Configuration loading.
//!
//! Configuration is TOML with `${VAR_NAME}` environment-variable expansion,
//! so API keys stay out of checked-in files.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimgateConfig {
    /// Identity-provider endpoints and API key.
    pub idp: IdpConfig,

    /// Backend directory API.
    pub directory: DirectoryConfig,

    /// Local session persistence.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Identity-provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdpConfig {
    /// Project API key sent as the `key` query parameter.
    pub api_key: String,

    /// Base URL of the account endpoints (sign-in).
    #[serde(default = "default_identity_url")]
    pub identity_url: Url,

    /// Base URL of the token endpoint (refresh).
    #[serde(default = "default_token_url")]
    pub token_url: Url,
}

fn default_identity_url() -> Url {
    Url::parse("https://identitytoolkit.googleapis.com").expect("static url")
}

fn default_token_url() -> Url {
    Url::parse("https://securetoken.googleapis.com").expect("static url")
}

/// Backend directory API settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Base URL of the directory API, e.g. `https://api.example.com/api`.
    pub base_url: Url,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Local session cache settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Where the token/principal pair is cached between runs. When unset,
    /// sessions live only in memory and every start begins signed out.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl ClaimgateConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: ClaimgateConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.idp.api_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "idp.api_key must not be empty".into(),
            ));
        }
        if self.directory.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "directory.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let whole = cap.get(0).expect("capture 0 always present");

            // Variables inside a comment are left untouched.
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
