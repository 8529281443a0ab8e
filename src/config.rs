//! Configuration for grammar loading, packaging conventions, and the
//! compliance pipeline. All values have working defaults; a JSON file can
//! override any subset of them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where the grammar lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    /// Path to the `.dtd` file fragments are validated against.
    pub dtd_path: PathBuf,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            dtd_path: PathBuf::from("book.dtd"),
        }
    }
}

/// Naming conventions of the package layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingConfig {
    /// Manifest file name at the package root.
    pub manifest_name: String,
    /// Directory holding media files, relative to the package root.
    pub media_dir: String,
    /// Prefix of generated fragment entity names.
    pub entity_prefix: String,
    /// Zero-padding width of the numeric part of entity names.
    pub entity_padding: usize,
    pub doctype_public_id: String,
    pub doctype_system_id: String,
    /// Whether the regenerated manifest carries a `<toc>` over the
    /// fragments.
    pub include_toc: bool,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            manifest_name: "Book.XML".to_string(),
            media_dir: "multimedia".to_string(),
            entity_prefix: "ch".to_string(),
            entity_padding: 4,
            doctype_public_id: "-//OASIS//DTD DocBook XML V4.5//EN".to_string(),
            doctype_system_id: "book.dtd".to_string(),
            include_toc: true,
        }
    }
}

impl PackagingConfig {
    /// Entity name for the 1-based fragment number, e.g. `ch0003`.
    pub fn entity_name(&self, number: usize) -> String {
        format!(
            "{}{:0width$}",
            self.entity_prefix,
            number,
            width = self.entity_padding
        )
    }

    /// File name for the 1-based fragment number, e.g. `ch0003.xml`.
    pub fn fragment_filename(&self, number: usize) -> String {
        format!("{}.xml", self.entity_name(number))
    }
}

/// Bounds on the validate-fix loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum validate-fix passes before the run terminates with
    /// partial success.
    pub max_iterations: usize,
    /// Worker threads for parallel validation; `0` uses the default pool.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            concurrency: 0,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grammar: GrammarConfig,
    pub packaging: PackagingConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Read configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Write configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.packaging.manifest_name, "Book.XML");
        assert_eq!(config.packaging.media_dir, "multimedia");
        assert_eq!(config.pipeline.max_iterations, 3);
    }

    #[test]
    fn test_entity_names() {
        let packaging = PackagingConfig::default();
        assert_eq!(packaging.entity_name(1), "ch0001");
        assert_eq!(packaging.entity_name(42), "ch0042");
        assert_eq!(packaging.fragment_filename(7), "ch0007.xml");
    }

    #[test]
    fn test_partial_json_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"pipeline": {"max_iterations": 5}}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.pipeline.max_iterations, 5);
        assert_eq!(config.packaging.entity_prefix, "ch");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.packaging.entity_prefix = "ap".to_string();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.packaging.entity_prefix, "ap");
    }
}
