// src/config.rs

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::query_builder::{DEFAULT_BULK_ROWS, DEFAULT_CONTROL_ROWS};

pub const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk/mi/impc/solr";

/// What to do when an experimental batch spans several cohorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortPolicy {
    /// Refuse to pick a cohort.
    Strict,
    /// Use the cohort of the first record and drop experimental rows from any other.
    FirstMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub bulk_rows: usize,
    pub control_rows: usize,
    pub cohort_policy: CohortPolicy,
    pub fail_on_truncation: bool,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: concat!("phenotype_retriever/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            max_retries: 2,
            retry_delay_ms: 1000,
            bulk_rows: DEFAULT_BULK_ROWS,
            control_rows: DEFAULT_CONTROL_ROWS,
            cohort_policy: CohortPolicy::Strict,
            fail_on_truncation: false,
            output_dir: PathBuf::from("./results"),
        }
    }
}

impl Config {
    /// Defaults, overlaid by the JSON file (if given), overlaid by environment.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => {
                info!("Reading configuration from {}", path.display());
                let text = fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    PipelineError::Config(format!("cannot parse {}: {}", path.display(), e))
                })?
            }
            None => Config::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }

    /// Applies `IMPC_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("IMPC_SOLR_URL") {
            self.base_url = url;
        }
        if let Some(secs) = lookup("IMPC_TIMEOUT_SECS") {
            self.timeout_secs = secs.trim().parse().map_err(|_| {
                PipelineError::Config(format!("IMPC_TIMEOUT_SECS must be a whole number, got {:?}", secs))
            })?;
        }
        if let Some(dir) = lookup("IMPC_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(PipelineError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(PipelineError::Config("timeout_secs must be positive".to_string()));
        }
        if self.bulk_rows == 0 || self.control_rows == 0 {
            return Err(PipelineError::Config("row caps must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Root that relative output paths are resolved against.
pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_service_limits() {
        let config = Config::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.bulk_rows, 500);
        assert_eq!(config.control_rows, 100);
        assert_eq!(config.cohort_policy, CohortPolicy::Strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"cohort_policy": "first_match", "control_rows": 250}"#).unwrap();
        assert_eq!(config.cohort_policy, CohortPolicy::FirstMatch);
        assert_eq!(config.control_rows, 250);
        assert_eq!(config.bulk_rows, 500);
    }

    #[test]
    fn environment_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("IMPC_SOLR_URL", "http://localhost:8983/solr"),
            ("IMPC_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.base_url, "http://localhost:8983/solr");
        assert_eq!(config.timeout_secs, 5);

        let err = config.apply_overrides(|k| (k == "IMPC_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert!(matches!(err, Err(PipelineError::Config(_))));
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = Config {
            base_url: "ftp://example.org".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"fail_on_truncation": true}"#).unwrap();
        let config = Config::load(Some(path.as_path())).unwrap();
        assert!(config.fail_on_truncation);
    }
}
