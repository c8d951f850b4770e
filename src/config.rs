use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    /// Extra caller-facing model ids, merged over the built-in table.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub fallback: FallbackTiers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Process-wide toggles, fixed at startup and passed by value into the
/// translators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Merge `reasoning_content` into `content` wrapped in `<think>` tags.
    #[serde(default)]
    pub show_reasoning: bool,
    /// Ask the upstream to think via `chat_template_kwargs`.
    #[serde(default)]
    pub thinking_mode: bool,
    /// Ignore the caller's `stream` flag and always respond buffered.
    #[serde(default)]
    pub force_non_streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackTiers {
    #[serde(default = "default_large_tier")]
    pub large: String,
    #[serde(default = "default_mid_tier")]
    pub mid: String,
    #[serde(default = "default_small_tier")]
    pub small: String,
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "https://integrate.api.nvidia.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "NIM_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_large_tier() -> String {
    "meta/llama-3.1-405b-instruct".to_string()
}

fn default_mid_tier() -> String {
    "meta/llama-3.1-70b-instruct".to_string()
}

fn default_small_tier() -> String {
    "meta/llama-3.1-8b-instruct".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for FallbackTiers {
    fn default() -> Self {
        Self {
            large: default_large_tier(),
            mid: default_mid_tier(),
            small: default_small_tier(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            features: FeatureFlags::default(),
            models: HashMap::new(),
            fallback: FallbackTiers::default(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to built-in
    /// defaults when none exists.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Chat completions endpoint on the upstream.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.upstream.base_url.trim_end_matches('/'))
    }

    /// Resolve the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.upstream.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ProxyError::misconfigured(format!(
                "Environment variable '{}' not set. Set it with your NIM API key.",
                self.upstream.api_key_env
            ))),
        }
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("nim-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("nim-proxy").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("nim-proxy").join("config.toml"));
        paths.push(home.join(".nim-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
