//! Settings for retrieval and extraction

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::github::client::DEFAULT_BASE_URL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// What to keep of a commit's per-file data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitHandling {
    #[default]
    Full,
    /// Drop `patch` from every file entry before storing
    Trim,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub github_token: Option<String>,
    pub user_agent: String,
    /// Requests pause once remaining quota drops below this
    pub req_limit: u32,
    pub mirror_urlbase: String,
    /// Page budget for commit history; `<= 0` walks everything
    pub mirror_history_pages_back: i64,
    pub commit_handling: CommitHandling,
    pub request_timeout_secs: u64,
    /// `memory`, `noop` or a `sqlite:` URL
    pub documents: String,
    pub sql_url: String,
    pub repos_dir: PathBuf,
    pub clone_base_url: String,
    /// Workflow runs processed concurrently
    pub threads: usize,
    pub months_back: i64,
    pub stripped_cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github_token: None,
            user_agent: "ci-harvest".to_string(),
            req_limit: 10,
            mirror_urlbase: DEFAULT_BASE_URL.to_string(),
            mirror_history_pages_back: 1000,
            commit_handling: CommitHandling::Full,
            request_timeout_secs: 20,
            documents: "sqlite://ci_harvest_docs.db".to_string(),
            sql_url: "sqlite://ci_harvest.db".to_string(),
            repos_dir: PathBuf::from("repos"),
            clone_base_url: "https://github.com".to_string(),
            threads: 2,
            months_back: 3,
            stripped_cache_capacity: crate::extractor::cache::DEFAULT_CAPACITY,
        }
    }
}

impl Settings {
    /// Read a TOML settings file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// `GITHUB_TOKEN` wins over a token from the file.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var("GITHUB_TOKEN")
            && !token.is_empty()
        {
            self.github_token = Some(token);
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sql_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "sql_url",
                message: "database URL is empty".to_string(),
            });
        }
        if !self.sql_url.starts_with("sqlite:") {
            return Err(ConfigError::Invalid {
                key: "sql_url",
                message: format!("unsupported database {}", self.sql_url),
            });
        }
        let docs = self.documents.as_str();
        if !(docs == "memory" || docs == "noop" || docs.starts_with("sqlite:")) {
            return Err(ConfigError::Invalid {
                key: "documents",
                message: format!("unsupported document store {docs}"),
            });
        }
        if self.threads == 0 {
            return Err(ConfigError::Invalid {
                key: "threads",
                message: "must be at least 1".to_string(),
            });
        }
        if reqwest::Url::parse(&self.mirror_urlbase).is_err() {
            return Err(ConfigError::Invalid {
                key: "mirror_urlbase",
                message: format!("not a URL: {}", self.mirror_urlbase),
            });
        }
        Ok(())
    }
}
