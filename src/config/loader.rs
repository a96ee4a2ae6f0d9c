use super::BatchConfig;
use crate::error::{BatchError, BatchResult, ErrorCode, ErrorExt};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Loads `BatchConfig` from an optional TOML file plus the environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Parse configuration text; missing tables fall back to defaults
    pub fn from_toml_str(content: &str) -> BatchResult<BatchConfig> {
        toml::from_str(content).map_err(|e| {
            BatchError::config_with_code(ErrorCode::CONFIG_PARSE_ERROR, "Invalid batch configuration")
                .with_source(e)
        })
    }

    /// Load from `path` if given, apply environment overrides, then validate
    pub async fn load(path: Option<&Path>) -> BatchResult<BatchConfig> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(BatchError::config_with_code(
                        ErrorCode::CONFIG_NOT_FOUND,
                        format!("Configuration file not found: {}", path.display()),
                    ));
                }
                let content = fs::read_to_string(path)
                    .await
                    .to_config_error(format!("Failed to read {}", path.display()))?;
                debug!("Loaded batch configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => BatchConfig::default(),
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = ConfigLoader::load(Some(&temp.path().join("nope.toml")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_load_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.toml");
        std::fs::write(&path, "[skip]\nmax_count = 7\n").unwrap();

        let config = ConfigLoader::load(Some(&path)).await.unwrap();
        assert_eq!(config.skip.max_count, 7);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.toml");
        std::fs::write(&path, "[thread_pool]\nmax_pool_size_multiplier = 0\n").unwrap();

        let err = ConfigLoader::load(Some(&path)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
    }

    #[test]
    fn test_from_toml_str_parse_error() {
        let err = ConfigLoader::from_toml_str("[retry\nmax_attempts = ").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_PARSE_ERROR);
    }
}
