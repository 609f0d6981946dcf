use log::{debug, info, warn};
use serde_json::Value;

use super::{RepoRetriever, RetrieveResult, non_empty};
use crate::config::CommitHandling;
use crate::store::Selector;
use crate::store::collections::{COMMIT_COMMENTS, COMMITS};

/// Remove per-file patches, which dominate commit size.
fn trim_patches(commit: &mut Value) {
    if let Some(files) = commit.get_mut("files").and_then(Value::as_array_mut) {
        for file in files {
            if let Some(map) = file.as_object_mut() {
                map.remove("patch");
            }
        }
    }
}

impl RepoRetriever {
    /// A single commit, keyed by sha alone.
    pub async fn retrieve_commit(&self, owner: &str, repo: &str, sha: &str) -> RetrieveResult<Option<Value>> {
        if let Some(stored) = self.docs.find_one(COMMITS, &Selector::new().eq("sha", sha)).await? {
            debug!("Commit {owner}/{repo} -> {sha} exists");
            return Ok(Some(stored));
        }

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/commits/{sha}"));
        let Some(mut commit) = non_empty(self.client.api_request(&url, None).await?) else {
            return Ok(None);
        };
        if self.commit_handling == CommitHandling::Trim {
            trim_patches(&mut commit);
        }
        self.docs.store(COMMITS, &commit).await?;
        info!("Added commit {owner}/{repo} -> {sha}");
        Ok(Some(commit))
    }

    /// Commits reachable from `sha` (default branch when `None`), newest
    /// first, at most `pages` listing pages (`<= 0` for all).
    pub async fn retrieve_commits(
        &self,
        owner: &str,
        repo: &str,
        sha: Option<&str>,
        pages: i64,
    ) -> RetrieveResult<Vec<Value>> {
        let path = match sha {
            Some(sha) => format!("repos/{owner}/{repo}/commits?sha={sha}"),
            None => format!("repos/{owner}/{repo}/commits"),
        };
        let listed = self.client.paged_request(&self.client.ghurl(&path), pages).await?;

        let mut commits = Vec::with_capacity(listed.len());
        for entry in &listed {
            let Some(commit_sha) = entry.get("sha").and_then(Value::as_str) else {
                continue;
            };
            if let Some(commit) = self.retrieve_commit(owner, repo, commit_sha).await? {
                commits.push(commit);
            }
        }
        Ok(commits)
    }

    pub async fn retrieve_commit_comments(&self, owner: &str, repo: &str, sha: &str) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/commits/{sha}/comments"));
        for comment in self.client.paged_request(&url, -1).await? {
            let key = Selector::new()
                .eq("commit_id", comment.get("commit_id").cloned().unwrap_or(Value::Null))
                .eq("id", comment.get("id").cloned().unwrap_or(Value::Null));
            if !self.docs.exists(COMMIT_COMMENTS, &key).await? {
                self.docs.store(COMMIT_COMMENTS, &comment).await?;
            }
        }
        Ok(self
            .docs
            .find(COMMIT_COMMENTS, &Selector::new().eq("commit_id", sha))
            .await?)
    }

    pub async fn retrieve_commit_comment(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        id: i64,
    ) -> RetrieveResult<Option<Value>> {
        let key = Selector::new().eq("commit_id", sha).eq("id", id);
        if let Some(stored) = self.docs.find_one(COMMIT_COMMENTS, &key).await? {
            debug!("Commit comment {sha} -> {id} exists");
            return Ok(Some(stored));
        }

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/comments/{id}"));
        let Some(comment) = non_empty(self.client.api_request(&url, None).await?) else {
            warn!("Could not find commit_comment {id}. Deleted?");
            return Ok(None);
        };
        self.docs.store(COMMIT_COMMENTS, &comment).await?;
        info!("Added commit_comment {sha} -> {id}");
        Ok(self.docs.find_one(COMMIT_COMMENTS, &key).await?.or(Some(comment)))
    }
}
