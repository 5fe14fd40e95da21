//! Configuration file handling for eventsource-cli

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use eventsource::EventSourceOptions;
use serde::{Deserialize, Serialize};

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
    /// Initial reconnect delay in milliseconds
    pub retry_ms: Option<u64>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Send credentials on cross-origin requests
    pub with_credentials: Option<bool>,
    /// Bearer token
    pub token: Option<String>,
    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Values given on the command line; `None` means "not given"
#[derive(Debug, Default)]
pub struct CliOverrides<'a> {
    pub output: Option<&'a str>,
    pub no_color: bool,
    pub retry_ms: Option<u64>,
    pub with_credentials: bool,
    pub token: Option<&'a str>,
    pub headers: &'a [String],
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("eventsource-cli");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: &CliOverrides<'_>) -> Result<MergedConfig> {
        // Header names are case-insensitive; the command line wins
        let mut headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        for header in args.headers {
            let (name, value) = parse_header(header)?;
            headers.insert(name.to_ascii_lowercase(), value);
        }

        Ok(MergedConfig {
            output: args
                .output
                .map(String::from)
                .or_else(|| self.output.clone())
                .unwrap_or_else(|| "table".to_string()),
            no_color: args.no_color || self.no_color.unwrap_or(false),
            retry_ms: args.retry_ms.or(self.retry_ms),
            connect_timeout_ms: self.connect_timeout_ms,
            with_credentials: args.with_credentials || self.with_credentials.unwrap_or(false),
            token: args
                .token
                .map(String::from)
                .or_else(|| self.token.clone()),
            headers,
        })
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub output: String,
    pub no_color: bool,
    pub retry_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub with_credentials: bool,
    pub token: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl MergedConfig {
    /// Event source options for this configuration
    pub fn source_options(&self, last_event_id: Option<&str>) -> EventSourceOptions {
        let mut options = EventSourceOptions::new().with_credentials(self.with_credentials);

        if let Some(ms) = self.retry_ms {
            options = options.retry(Duration::from_millis(ms));
        }
        if let Some(ms) = self.connect_timeout_ms {
            options = options.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(token) = &self.token {
            options = options.bearer_token(token.clone());
        }
        if let Some(id) = last_event_id {
            options = options.last_event_id(id);
        }
        for (name, value) in &self.headers {
            options = options.header(name.clone(), value.clone());
        }

        options
    }
}

/// Parse a `Name: value` header argument
fn parse_header(header: &str) -> Result<(String, String)> {
    let Some((name, value)) = header.split_once(':') else {
        bail!("Invalid header (expected \"Name: value\"): {}", header);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header (empty name): {}", header);
    }
    Ok((name.to_string(), value.trim().to_string()))
}
