use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use forage_core::config::EngineConfig;

pub const USDA_KEY_ENV: &str = "FORAGE_USDA_API_KEY";
const DEFAULT_USDA_KEY: &str = "DEMO_KEY";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub engine: EngineConfig,
    pub usda_api_key: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "forage").context("Could not determine home directory")?;
        Self::load_from(proj_dirs.data_dir())
    }

    /// Load from an explicit data directory. `config.json` there is optional.
    pub fn load_from(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let config_path = data_dir.join("config.json");
        let engine = if config_path.exists() {
            EngineConfig::from_json_file(&config_path)?
        } else {
            EngineConfig::default()
        };

        let usda_api_key = std::env::var(USDA_KEY_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| DEFAULT_USDA_KEY.to_string());

        Ok(Config {
            db_path: data_dir.join("forage.db"),
            data_dir: data_dir.to_path_buf(),
            engine,
            usda_api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.db_path, dir.path().join("forage.db"));
        assert_eq!(config.engine.search.result_limit, 10);
        assert!(!config.usda_api_key.is_empty());
    }

    #[test]
    fn test_load_with_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"search": {"result_limit": 5}, "scoring": {"brand_match": 4.0}}"#,
        )
        .unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.engine.search.result_limit, 5);
        assert_eq!(config.engine.search.per_variant_limit, 20);
        assert!((config.engine.scoring.brand_match - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_rejects_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{not json").unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }
}
