//! Application configuration
//!
//! Settings that belong to the running process rather than to a batch job.

use anyhow::Result;
use std::path::PathBuf;

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Directory job folders are created under
    pub working_dir: PathBuf,
    /// Optional TOML file with batch settings
    pub config_file: Option<PathBuf>,
}

impl AppConfig {
    /// Create a new application configuration rooted at the current directory
    pub fn new(verbose: u8) -> Result<Self> {
        let working_dir = std::env::current_dir()
            .map_err(|e| anyhow::anyhow!("Failed to get current directory: {}", e))?;

        Ok(Self {
            verbose,
            working_dir,
            config_file: None,
        })
    }

    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Get the log filter based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            2 => "trace",
            _ => "trace,zip=debug",
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            working_dir: PathBuf::from("."),
            config_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_by_verbosity() {
        let levels: Vec<_> = (0..4)
            .map(|v| AppConfig { verbose: v, ..AppConfig::default() }.log_level())
            .collect();
        assert_eq!(levels, vec!["info", "debug", "trace", "trace,zip=debug"]);
    }
}
