//! Mapping caller-facing model ids onto upstream models.
//!
//! Lookup is an exact match against the built-in table (extended by the
//! `[models]` config section). Unknown ids never fail: they land on one of
//! three fallback tiers picked by substring inspection of the requested name.

use crate::config::{FallbackTiers, ProxyConfig};
use std::collections::HashMap;

const DEFAULT_MODEL_TABLE: &[(&str, &str)] = &[
    ("gpt-3.5-turbo", "nvidia/llama-3.1-nemotron-ultra-253b-v1"),
    ("gpt-4", "qwen/qwen3-coder-480b-a35b-instruct"),
    ("gpt-4-turbo", "moonshotai/kimi-k2-instruct-0905"),
    ("gpt-4o", "deepseek-ai/deepseek-v3.1"),
    ("claude-3-opus", "openai/gpt-oss-120b"),
    ("claude-3-sonnet", "openai/gpt-oss-20b"),
    ("gemini-pro", "qwen/qwen3-next-80b-a3b-thinking"),
];

const LARGE_TIER_HINTS: &[&str] = &["405b", "gpt-4", "opus"];
const MID_TIER_HINTS: &[&str] = &["70b", "sonnet", "gemini"];

#[derive(Debug, Clone)]
pub struct ModelResolver {
    table: HashMap<String, String>,
    tiers: FallbackTiers,
}

impl ModelResolver {
    pub fn new(overrides: &HashMap<String, String>, tiers: FallbackTiers) -> Self {
        let mut table: HashMap<String, String> = DEFAULT_MODEL_TABLE
            .iter()
            .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
            .collect();
        table.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self { table, tiers }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(&config.models, config.fallback.clone())
    }

    /// Resolve a caller model id to an upstream id. Always succeeds.
    pub fn resolve(&self, requested: &str) -> &str {
        if let Some(mapped) = self.table.get(requested) {
            return mapped;
        }

        let lower = requested.to_lowercase();
        let hit = |hints: &[&str]| hints.iter().any(|h| lower.contains(h));

        if hit(LARGE_TIER_HINTS) {
            &self.tiers.large
        } else if hit(MID_TIER_HINTS) {
            &self.tiers.mid
        } else {
            &self.tiers.small
        }
    }

    /// Caller-facing ids of the exact-match table, sorted.
    #[must_use]
    pub fn known_models(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.table.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new(&HashMap::new(), FallbackTiers::default())
    }
}
