use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DossierConfig {
    pub storage: StorageConfig,
    pub dedup: DedupConfig,
    pub inference: InferenceConfig,
    pub projection: ProjectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Thresholds for the fact duplicate-detection pipeline.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DedupConfig {
    /// Cosine similarity above which an embedding match counts as a duplicate.
    pub semantic_threshold: f64,
    /// Normalized Levenshtein similarity above which a text match counts as a duplicate.
    pub fuzzy_threshold: f64,
    /// Lower bound (inclusive) of the supersession band for temporal fact types.
    pub supersede_band_low: f64,
    /// Upper bound (exclusive) of the supersession band for temporal fact types.
    pub supersede_band_high: f64,
    /// Restrict the semantic duplicate search to facts of the same type.
    pub scope_to_fact_type: bool,
    /// Number of nearest neighbors fetched per semantic duplicate check.
    pub knn_candidates: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    /// Fact type scanned for derivable relations.
    pub fact_type: String,
    /// Minimum normalized-name similarity for an organization match.
    pub min_name_similarity: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Graph projection is an optional feature; disabled deployments fail
    /// `get_graph` with `ServiceUnavailable`.
    pub enabled: bool,
}

impl Default for DossierConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            dedup: DedupConfig::default(),
            inference: InferenceConfig::default(),
            projection: ProjectionConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_dossier_dir()
            .join("graph.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.83,
            fuzzy_threshold: 0.8,
            supersede_band_low: 0.3,
            supersede_band_high: 0.95,
            scope_to_fact_type: true,
            knn_candidates: 20,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            fact_type: "company".into(),
            min_name_similarity: 0.75,
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Returns `~/.dossier/`
pub fn default_dossier_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".dossier")
}

/// Returns the default config file path: `~/.dossier/config.toml`
pub fn default_config_path() -> PathBuf {
    default_dossier_dir().join("config.toml")
}

impl DossierConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            DossierConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (DOSSIER_DB, DOSSIER_SEMANTIC_THRESHOLD).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DOSSIER_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("DOSSIER_SEMANTIC_THRESHOLD") {
            if let Ok(parsed) = val.parse::<f64>() {
                self.dedup.semantic_threshold = parsed;
            }
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
