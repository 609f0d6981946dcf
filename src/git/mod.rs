//! Local git mirror
//!
//! Clone and pull go through the `git` CLI; every read (commit lookup,
//! ancestry walks, tree listings, blob contents) goes through gix on the
//! blocking pool.

mod repo;

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};
use thiserror::Error;

use crate::runtime::AsyncTask;

pub use repo::{CommitInfo, LocalRepo, TestDiff, TreeFile};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Cannot open repository at {path}: {message}")]
    Open { path: String, message: String },

    #[error("Commit {sha} not found in local clone")]
    MissingObject { sha: String },

    #[error("git clone of {url} failed: {message}")]
    Clone { url: String, message: String },

    #[error("Git traversal failed: {0}")]
    Walk(String),

    #[error("Git task failed: {0}")]
    Task(String),
}

pub type GitResult<T> = Result<T, GitError>;

/// Maintains one checkout per repository under `repos_dir/<owner>/<repo>`.
#[derive(Debug, Clone)]
pub struct GitHistoryWalker {
    repos_dir: PathBuf,
    clone_base_url: String,
}

impl GitHistoryWalker {
    pub fn new(repos_dir: impl Into<PathBuf>, clone_base_url: impl Into<String>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            clone_base_url: clone_base_url.into(),
        }
    }

    pub fn checkout_dir(&self, owner: &str, repo: &str) -> PathBuf {
        self.repos_dir.join(owner).join(repo)
    }

    pub fn clone_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/{owner}/{repo}.git", self.clone_base_url.trim_end_matches('/'))
    }

    /// Clone on first use, pull afterwards.
    ///
    /// A checkout that cannot be opened or has no readable HEAD after the
    /// pull is removed and cloned again.
    pub async fn clone_or_update(&self, owner: &str, repo: &str) -> GitResult<LocalRepo> {
        let checkout = self.checkout_dir(owner, repo);
        let url = self.clone_url(owner, repo);
        AsyncTask::spawn(move || checkout_blocking(&checkout, &url))
            .await
            .map_err(|e| GitError::Task(e.to_string()))?
    }
}

fn checkout_blocking(checkout: &Path, url: &str) -> GitResult<LocalRepo> {
    if checkout.exists() {
        pull(checkout);
        match LocalRepo::open(checkout).and_then(|r| r.head_sha_blocking().map(|_| r)) {
            Ok(repo) => return Ok(repo),
            Err(e) => {
                warn!("Checkout {} unusable ({e}), cloning again", checkout.display());
                if let Err(e) = std::fs::remove_dir_all(checkout) {
                    warn!("Cannot remove {}: {e}", checkout.display());
                }
            }
        }
    }
    clone(url, checkout)?;
    LocalRepo::open(checkout)
}

fn pull(checkout: &Path) {
    let output = Command::new("git")
        .arg("-C")
        .arg(checkout)
        .args(["pull", "--quiet"])
        .output();
    match output {
        Ok(out) if out.status.success() => info!("Updated {}", checkout.display()),
        Ok(out) => warn!(
            "git pull in {} failed: {}",
            checkout.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        ),
        Err(e) => warn!("git pull in {} failed: {e}", checkout.display()),
    }
}

fn clone(url: &str, checkout: &Path) -> GitResult<()> {
    if let Some(parent) = checkout.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GitError::Clone {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    }
    info!("Cloning {url} into {}", checkout.display());
    let output = Command::new("git")
        .args(["clone", "--quiet", url])
        .arg(checkout)
        .output()
        .map_err(|e| GitError::Clone {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(GitError::Clone {
            url: url.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    info!("Clone done.");
    Ok(())
}
