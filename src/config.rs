/// Configuration module for mdrag.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const LEDGER_FILENAME: &str = "index_tracking.json";
const DB_FILENAME: &str = "vectors.db";

// ── Default value functions ──────────────────────────────────────────

fn default_data_dir() -> String {
    "./rag_data".to_string()
}

fn default_collection_name() -> String {
    "markdown_vectors".to_string()
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_search_top_k() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_model_name() -> String {
    "bge-base-en-v1.5".to_string()
}

fn default_model_repo() -> String {
    "BAAI/bge-base-en-v1.5".to_string()
}

fn default_dimensions() -> usize {
    768
}

fn default_query_instruction() -> Option<String> {
    Some("Represent this sentence for searching relevant passages: ".to_string())
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory holding the vector database and the fingerprint ledger.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Token ceiling for a single chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Tokens shared between neighbouring windows of an oversized section.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    /// HuggingFace repository the model files are fetched from.
    #[serde(default = "default_model_repo")]
    pub repo: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Override for the model directory (defaults to `models/<name>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default = "default_true")]
    pub auto_download: bool,

    /// Prefix prepended to search queries before embedding.
    #[serde(default = "default_query_instruction")]
    pub query_instruction: Option<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            collection_name: default_collection_name(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            search_top_k: default_search_top_k(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            repo: default_model_repo(),
            dimensions: default_dimensions(),
            dir: None,
            auto_download: default_true(),
            query_instruction: default_query_instruction(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and, for the
    /// default path only, writes a template next to the binary's cwd.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap must be smaller than chunk_size"
        );
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            !self.collection_name.trim().is_empty(),
            "collection_name must not be empty"
        );
        Ok(())
    }

    /// Path of the SQLite vector database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(DB_FILENAME)
    }

    /// Path of the persisted fingerprint ledger.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(LEDGER_FILENAME)
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        match &self.model.dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new("models").join(&self.model.name),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.collection_name, "markdown_vectors");
        assert_eq!(config.model.dimensions, 768);
        assert_eq!(config.model.name, "bge-base-en-v1.5");
        assert!(config.model.auto_download);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"chunk_size": 256, "data_dir": "./test_data"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.data_dir, "./test_data");
        // Other fields should have defaults
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.model.dimensions, 768);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.chunk_size, 512);
        // Only the default path gets a generated template
        assert!(!path.exists());
    }

    #[test]
    fn test_load_invalid_json_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.collection_name, "markdown_vectors");
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_chunk_size() {
        let mut config = Config::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_overlap_not_smaller() {
        let mut config = Config::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = Config {
            data_dir: "/var/lib/mdrag".to_string(),
            ..Config::default()
        };
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/mdrag/vectors.db"));
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/var/lib/mdrag/index_tracking.json")
        );
        assert_eq!(config.model_dir(), Path::new("models").join("bge-base-en-v1.5"));
    }
}
