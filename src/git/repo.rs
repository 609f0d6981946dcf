use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gix::ObjectId;
use log::{debug, warn};

use super::{GitError, GitResult};
use crate::language::LanguageProfile;
use crate::runtime::AsyncTask;

const SECONDS_PER_DAY: i64 = 24 * 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub sha: String,
    pub author_email: String,
    pub committed_at: DateTime<Utc>,
    pub parents: Vec<String>,
}

/// A blob in a commit's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    pub path: String,
    pub oid: ObjectId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestDiff {
    pub tests_added: i64,
    pub tests_deleted: i64,
}

/// An opened clone, shareable across tasks.
#[derive(Clone)]
pub struct LocalRepo {
    shared: gix::ThreadSafeRepository,
    path: PathBuf,
}

impl std::fmt::Debug for LocalRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRepo").field("path", &self.path).finish()
    }
}

impl LocalRepo {
    pub fn open(path: &Path) -> GitResult<Self> {
        let repo = gix::open(path).map_err(|e| GitError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            shared: repo.into_sync(),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn head_sha_blocking(&self) -> GitResult<String> {
        let repo = self.shared.to_thread_local();
        let head = repo.head_commit().map_err(walk_err)?;
        Ok(head.id.to_string())
    }

    async fn with_repo<T, F>(&self, f: F) -> GitResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&gix::Repository) -> GitResult<T> + Send + 'static,
    {
        let shared = self.shared.clone();
        AsyncTask::spawn(move || f(&shared.to_thread_local()))
            .await
            .map_err(|e| GitError::Task(e.to_string()))?
    }

    pub async fn head_sha(&self) -> GitResult<String> {
        let this = self.clone();
        AsyncTask::spawn(move || this.head_sha_blocking())
            .await
            .map_err(|e| GitError::Task(e.to_string()))?
    }

    pub async fn commit_exists(&self, sha: &str) -> bool {
        let sha = sha.to_string();
        self.with_repo(move |repo| find_commit(repo, &sha).map(|_| ()))
            .await
            .is_ok()
    }

    pub async fn commit_info(&self, sha: &str) -> GitResult<CommitInfo> {
        let sha = sha.to_string();
        self.with_repo(move |repo| {
            let commit = find_commit(repo, &sha)?;
            let author_email = commit.author().map_err(walk_err)?.email.to_string();
            let committed_at =
                DateTime::from_timestamp(commit_seconds(&commit)?, 0).unwrap_or_default();
            Ok(CommitInfo {
                sha: commit.id.to_string(),
                author_email,
                committed_at,
                parents: commit.parent_ids().map(|p| p.detach().to_string()).collect(),
            })
        })
        .await
    }

    /// Days between the oldest ancestor of `sha` and `sha` itself.
    pub async fn repo_age_days(&self, sha: &str) -> GitResult<f64> {
        let sha = sha.to_string();
        self.with_repo(move |repo| {
            let commit = find_commit(repo, &sha)?;
            let latest = commit_seconds(&commit)?;
            let mut oldest = latest;
            for id in ancestors(repo, commit.id)? {
                let ancestor = repo.find_commit(id).map_err(walk_err)?;
                oldest = oldest.min(commit_seconds(&ancestor)?);
            }
            Ok((latest - oldest).abs() as f64 / SECONDS_PER_DAY as f64)
        })
        .await
    }

    /// Commits reachable from `sha`, itself included. Never less than 1.
    pub async fn commit_count(&self, sha: &str) -> GitResult<i64> {
        let sha = sha.to_string();
        self.with_repo(move |repo| {
            let commit = find_commit(repo, &sha)?;
            let count = ancestors(repo, commit.id)?.len();
            Ok(i64::try_from(count).unwrap_or(i64::MAX).max(1))
        })
        .await
    }

    /// Paths that differ between `sha` and its first parent.
    pub async fn files_changed(&self, sha: &str) -> GitResult<BTreeSet<String>> {
        let sha = sha.to_string();
        self.with_repo(move |repo| {
            let commit = find_commit(repo, &sha)?;
            Ok(changed_paths(&first_parent_files(repo, &commit)?, &tree_files(&commit)?))
        })
        .await
    }

    pub async fn files_at_commit(&self, sha: &str) -> GitResult<Vec<TreeFile>> {
        let sha = sha.to_string();
        self.with_repo(move |repo| {
            let commit = find_commit(repo, &sha)?;
            let files: Vec<TreeFile> = tree_files(&commit)?
                .into_iter()
                .map(|(path, oid)| TreeFile { path, oid })
                .collect();
            if files.is_empty() {
                debug!("No files for commit {sha}");
            }
            Ok(files)
        })
        .await
    }

    /// Test-case declarations added and removed in test files between
    /// `from` (empty tree when `None`) and `to`.
    pub async fn diff_test_counts(
        &self,
        from: Option<&str>,
        to: &str,
        profile: LanguageProfile,
    ) -> GitResult<TestDiff> {
        let from = from.map(str::to_string);
        let to = to.to_string();
        self.with_repo(move |repo| {
            let new = tree_files(&find_commit(repo, &to)?)?;
            let old = match &from {
                Some(sha) => tree_files(&find_commit(repo, sha)?)?,
                None => BTreeMap::new(),
            };

            let mut diff = TestDiff::default();
            for path in changed_paths(&old, &new) {
                if !profile.is_test_file(&path) {
                    continue;
                }
                let before = declarations(repo, old.get(&path), profile)?;
                let after = declarations(repo, new.get(&path), profile)?;
                for (line, n) in &after {
                    diff.tests_added += (n - before.get(line).copied().unwrap_or(0)).max(0);
                }
                for (line, n) in &before {
                    diff.tests_deleted += (n - after.get(line).copied().unwrap_or(0)).max(0);
                }
            }
            Ok(diff)
        })
        .await
    }

    /// Commits within `months_back` months before `sha` (30-day months)
    /// that touch any path `sha` itself changed.
    pub async fn commits_on_files_touched(&self, sha: &str, months_back: i64) -> GitResult<i64> {
        let sha = sha.to_string();
        self.with_repo(move |repo| {
            let commit = find_commit(repo, &sha)?;
            let files = changed_paths(&first_parent_files(repo, &commit)?, &tree_files(&commit)?);
            debug!("Files touched in {sha}: {}", files.iter().cloned().collect::<Vec<_>>().join(", "));
            let oldest = commit_seconds(&commit)? - SECONDS_PER_DAY * 30 * months_back;

            let mut touched = 0;
            for id in ancestors(repo, commit.id)? {
                let candidate = repo.find_commit(id).map_err(walk_err)?;
                if commit_seconds(&candidate)? <= oldest {
                    break;
                }
                let paths = changed_paths(
                    &first_parent_files(repo, &candidate)?,
                    &tree_files(&candidate)?,
                );
                if !paths.is_disjoint(&files) {
                    touched += 1;
                }
            }
            Ok(touched)
        })
        .await
    }

    /// Blob contents, lossily decoded. Unreadable blobs are logged and left out.
    pub async fn read_blobs(&self, oids: Vec<ObjectId>) -> GitResult<Vec<(ObjectId, String)>> {
        self.with_repo(move |repo| {
            Ok(oids
                .into_iter()
                .filter_map(|oid| match read_blob(repo, oid) {
                    Ok(text) => Some((oid, text)),
                    Err(e) => {
                        warn!("Cannot read blob {oid}: {e}");
                        None
                    }
                })
                .collect())
        })
        .await
    }
}

fn walk_err(e: impl std::fmt::Display) -> GitError {
    GitError::Walk(e.to_string())
}

fn find_commit<'r>(repo: &'r gix::Repository, sha: &str) -> GitResult<gix::Commit<'r>> {
    let missing = || GitError::MissingObject {
        sha: sha.to_string(),
    };
    let id = ObjectId::from_hex(sha.as_bytes()).map_err(|_| missing())?;
    repo.find_commit(id).map_err(|_| missing())
}

fn commit_seconds(commit: &gix::Commit<'_>) -> GitResult<i64> {
    Ok(commit.time().map_err(walk_err)?.seconds)
}

/// Every blob in the commit's tree, keyed by full path.
fn tree_files(commit: &gix::Commit<'_>) -> GitResult<BTreeMap<String, ObjectId>> {
    let tree = commit.tree().map_err(walk_err)?;
    let mut recorder = gix::traverse::tree::Recorder::default();
    tree.traverse().breadthfirst(&mut recorder).map_err(walk_err)?;
    Ok(recorder
        .records
        .into_iter()
        .filter(|entry| entry.mode.is_blob())
        .map(|entry| (entry.filepath.to_string(), entry.oid))
        .collect())
}

fn first_parent_files(
    repo: &gix::Repository,
    commit: &gix::Commit<'_>,
) -> GitResult<BTreeMap<String, ObjectId>> {
    match commit.parent_ids().next() {
        Some(parent) => tree_files(&repo.find_commit(parent.detach()).map_err(walk_err)?),
        None => Ok(BTreeMap::new()),
    }
}

fn changed_paths(
    old: &BTreeMap<String, ObjectId>,
    new: &BTreeMap<String, ObjectId>,
) -> BTreeSet<String> {
    old.keys()
        .chain(new.keys())
        .filter(|path| old.get(*path) != new.get(*path))
        .cloned()
        .collect()
}

/// Ancestry of `tip` (inclusive), newest commit first.
fn ancestors(repo: &gix::Repository, tip: ObjectId) -> GitResult<Vec<ObjectId>> {
    repo.rev_walk([tip])
        .sorting(gix::revision::walk::Sorting::ByCommitTime(Default::default()))
        .all()
        .map_err(walk_err)?
        .map(|info| info.map(|i| i.id).map_err(walk_err))
        .collect()
}

fn read_blob(repo: &gix::Repository, oid: ObjectId) -> GitResult<String> {
    let object = repo.find_object(oid).map_err(walk_err)?;
    Ok(String::from_utf8_lossy(&object.data).into_owned())
}

fn declarations(
    repo: &gix::Repository,
    oid: Option<&ObjectId>,
    profile: LanguageProfile,
) -> GitResult<HashMap<String, i64>> {
    let mut counts = HashMap::new();
    let Some(oid) = oid else {
        return Ok(counts);
    };
    for line in read_blob(repo, *oid)?.lines() {
        if profile.is_test_case_declaration(line) {
            *counts.entry(line.trim().to_string()).or_insert(0) += 1;
        }
    }
    Ok(counts)
}
