//! Runtime configuration.
//!
//! Service settings come from environment variables (a `.env` file is loaded
//! first when present). Parser tunables are a serde struct that can be loaded
//! from a JSON file named by `PARSER_CONFIG`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Tunables for the heuristic question parser and the schema normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Spans shorter than this (in chars) are treated as false matches.
    pub min_span_chars: usize,
    /// Vertical jump between consecutive fragments that starts a new line.
    pub line_break_threshold: f32,
    /// Max chars of document text forwarded to the LLM.
    pub llm_char_budget: usize,
    pub minutes_per_question: f32,
    pub min_time_limit: u32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_span_chars: 10,
            line_break_threshold: 5.0,
            llm_char_budget: 30_000,
            minutes_per_question: 1.2,
            min_time_limit: 10,
        }
    }
}

impl ParserConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parser config: {:?}", path))?;
        let config: ParserConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse parser config: {:?}", path))?;
        info!("Loaded parser config from {:?}", path);
        Ok(config)
    }

    /// Default time limit for a test of `question_count` questions.
    pub fn time_limit_for(&self, question_count: usize) -> u32 {
        // Round to hundredths first so 100 x 1.2 stays 120 rather than 121.
        let raw = question_count as f64 * f64::from(self.minutes_per_question);
        let minutes = ((raw * 100.0).round() / 100.0).ceil() as u32;
        minutes.max(self.min_time_limit)
    }
}

/// Which backend a store slot points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    Firebase,
    Supabase,
}

impl StoreKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "memory" => Some(Self::Local),
            "firebase" => Some(Self::Firebase),
            "supabase" => Some(Self::Supabase),
            _ => None,
        }
    }
}

/// Process-wide settings, read once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub primary: StoreKind,
    pub mirror: Option<StoreKind>,
    pub local_store_path: PathBuf,
    pub credential_path: PathBuf,
    pub admin_secret: Option<String>,
    pub parser: ParserConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let primary = match std::env::var("STORE_BACKEND") {
            Ok(v) => StoreKind::parse(&v)
                .with_context(|| format!("Unknown STORE_BACKEND: {}", v))?,
            Err(_) => StoreKind::Local,
        };

        let mirror = match std::env::var("MIRROR_BACKEND") {
            Ok(v) if v.trim().eq_ignore_ascii_case("none") || v.trim().is_empty() => None,
            Ok(v) => Some(
                StoreKind::parse(&v).with_context(|| format!("Unknown MIRROR_BACKEND: {}", v))?,
            ),
            Err(_) => None,
        };

        if mirror == Some(primary) {
            anyhow::bail!("MIRROR_BACKEND must differ from STORE_BACKEND");
        }

        let parser = match std::env::var("PARSER_CONFIG") {
            Ok(path) => ParserConfig::load(Path::new(&path))?,
            Err(_) => ParserConfig::default(),
        };

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            primary,
            mirror,
            local_store_path: PathBuf::from(env_or("LOCAL_STORE_PATH", "data/store.json")),
            credential_path: PathBuf::from(env_or("CREDENTIAL_PATH", "data/llm_credential")),
            admin_secret: std::env::var("ADMIN_SECRET").ok().filter(|s| !s.is_empty()),
            parser,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_limit_floor() {
        let config = ParserConfig::default();
        assert_eq!(config.time_limit_for(0), 10);
        assert_eq!(config.time_limit_for(5), 10);
        assert_eq!(config.time_limit_for(100), 120);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ParserConfig = serde_json::from_str(r#"{"min_span_chars": 4}"#).unwrap();
        assert_eq!(config.min_span_chars, 4);
        assert_eq!(config.llm_char_budget, ParserConfig::default().llm_char_budget);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parser.json");
        std::fs::write(&path, r#"{"minutes_per_question": 2.0, "min_time_limit": 30}"#).unwrap();
        let config = ParserConfig::load(&path).unwrap();
        assert_eq!(config.time_limit_for(20), 40);
        assert_eq!(config.time_limit_for(3), 30);
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!(StoreKind::parse("Firebase"), Some(StoreKind::Firebase));
        assert_eq!(StoreKind::parse("memory"), Some(StoreKind::Local));
        assert_eq!(StoreKind::parse("mongo"), None);
    }
}
