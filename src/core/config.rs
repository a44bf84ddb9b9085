//! skein.yaml configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};
use crate::search::embedding::embedder_for;

pub const DEFAULT_CONFIG_FILE: &str = "skein.yaml";
pub const DEFAULT_DB_PATH: &str = "./skein.db";
pub const DEFAULT_EMBEDDING_MODEL: &str = "htp-384";

/// Template written by `skein init`
pub const DEFAULT_CONFIG_YAML: &str = r#"# skein configuration

# SQLite database holding nodes, edges, embeddings and sync state
db_path: ./skein.db

# Embedding model: "htp-384" (built-in, offline) or "none" (lexical-only)
embedding_model: htp-384

# Fusion weights for hybrid search (defaults split 0.4 text / 0.6 vector)
search:
  text_weight: 0.4
  vector_weight: 0.6

# Connector name -> source path
connectors: {}
#  wcp: /path/to/wcp/data

sync:
  # Re-read every record on each sync (override with --full / --incremental)
  full_by_default: false
"#;

/// Weights used to fuse normalized lexical and semantic scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub text_weight: f32,
    pub vector_weight: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            text_weight: 0.4,
            vector_weight: 0.6,
        }
    }
}

impl FusionWeights {
    pub fn new(text_weight: f32, vector_weight: f32) -> Self {
        Self {
            text_weight,
            vector_weight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("text_weight", self.text_weight),
            ("vector_weight", self.vector_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(SkeinError::config(format!(
                    "search.{} must be a non-negative number, got {}",
                    name, w
                )));
            }
        }
        if self.text_weight == 0.0 && self.vector_weight == 0.0 {
            return Err(SkeinError::config(
                "search.text_weight and search.vector_weight cannot both be 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncDefaults {
    pub full_by_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeinConfig {
    pub db_path: PathBuf,
    pub embedding_model: String,
    pub search: FusionWeights,
    pub connectors: BTreeMap<String, PathBuf>,
    pub sync: SyncDefaults,
}

impl Default for SkeinConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            search: FusionWeights::default(),
            connectors: BTreeMap::new(),
            sync: SyncDefaults::default(),
        }
    }
}

impl SkeinConfig {
    /// Load config from an explicit path, else `./skein.yaml`, else defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(SkeinError::config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_yaml(&std::fs::read_to_string(path)?)?
            }
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_yaml(&std::fs::read_to_string(local)?)?
                } else {
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        if self.embedding_model.trim().is_empty() {
            return Err(SkeinError::config("embedding_model cannot be empty"));
        }
        embedder_for(&self.embedding_model)?;
        Ok(())
    }
}
