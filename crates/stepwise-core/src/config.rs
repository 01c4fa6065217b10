use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StepwiseError};
use crate::stream::StreamEventKind;

/// Top-level Stepwise configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Runner and event pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the bounded event channel of each streamed execution.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Capacity of the lifecycle broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
    /// Prefix tool names with the originating sub-agent's name.
    #[serde(default = "default_add_sub_agent_prefix")]
    pub add_sub_agent_prefix: bool,
    /// Event types forwarded to stream consumers.
    #[serde(default = "default_forwarded_types")]
    pub forwarded_types: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_buffer: default_stream_buffer(),
            event_bus_capacity: default_event_bus_capacity(),
            add_sub_agent_prefix: default_add_sub_agent_prefix(),
            forwarded_types: default_forwarded_types(),
        }
    }
}

fn default_stream_buffer() -> usize {
    64
}

fn default_event_bus_capacity() -> usize {
    256
}

fn default_add_sub_agent_prefix() -> bool {
    true
}

fn default_forwarded_types() -> Vec<String> {
    StreamEventKind::ALL
        .iter()
        .map(|k| k.as_str().to_string())
        .collect()
}

/// Execution history storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. In-memory when unset.
    #[serde(default)]
    pub path: Option<String>,
}

impl StoreConfig {
    /// Resolve the database path (expand ~).
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(expand_home)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4310".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StepwiseError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| StepwiseError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.stream_buffer == 0 {
            return Err(StepwiseError::Config(
                "engine.stream_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    tracing::warn!(var = %var_name, "Config references unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME").ok().map(PathBuf::from) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
