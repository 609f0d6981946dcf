use log::{debug, info, warn};
use serde_json::Value;

use super::bound::{BoundQuery, repo_selector};
use super::{RepoRetriever, RetrieveResult, non_empty, tag};
use crate::store::Selector;
use crate::store::collections::{PULL_REQUEST_COMMENTS, PULL_REQUEST_COMMITS, PULL_REQUESTS};

/// Owner and repository following `repos` in an API URL.
fn owner_repo_from_url(url: &str) -> Option<(&str, &str)> {
    let mut segments = url.split('/').skip_while(|s| *s != "repos").skip(1);
    Some((segments.next()?, segments.next()?))
}

fn set_field(doc: &mut Value, key: &str, value: Value) {
    if let Some(map) = doc.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

impl RepoRetriever {
    fn pull_requests_query(owner: &str, repo: &str, refresh: bool) -> BoundQuery<'static> {
        BoundQuery::new(
            PULL_REQUESTS,
            vec![
                format!("repos/{owner}/{repo}/pulls"),
                format!("repos/{owner}/{repo}/pulls?state=closed"),
            ],
            repo_selector(owner, repo),
            "number",
        )
        .refresh(refresh)
    }

    /// Open and closed pull requests.
    pub async fn retrieve_pull_requests(&self, owner: &str, repo: &str, refresh: bool) -> RetrieveResult<Vec<Value>> {
        self.repo_bound_items(owner, repo, &Self::pull_requests_query(owner, repo, refresh), None)
            .await
    }

    pub async fn retrieve_pull_request(&self, owner: &str, repo: &str, number: i64) -> RetrieveResult<Option<Value>> {
        let mut query = Self::pull_requests_query(owner, repo, false);
        query.selector = query.selector.eq("number", number);
        self.repo_bound_item(owner, repo, &Value::from(number), &query).await
    }

    /// Commits of a pull request, fetched from the repository they live in
    /// (the head repository for pull requests from forks).
    pub async fn retrieve_pull_req_commits(&self, owner: &str, repo: &str, number: i64) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/pulls/{number}/commits"));
        let listed = self.client.paged_request(&url, -1).await?;

        let mut commits = Vec::with_capacity(listed.len());
        for entry in &listed {
            let Some(sha) = entry.get("sha").and_then(Value::as_str) else {
                continue;
            };
            let (head_owner, head_repo) = entry
                .get("url")
                .and_then(Value::as_str)
                .and_then(owner_repo_from_url)
                .unwrap_or((owner, repo));
            if let Some(commit) = self.retrieve_commit(head_owner, head_repo, sha).await? {
                commits.push(commit);
            }
        }
        Ok(commits)
    }

    /// Link a commit to a pull request by storing a copy of the commit
    /// carrying `pull_request_id`.
    pub async fn retrieve_pull_request_commit(
        &self,
        pr: &Value,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> RetrieveResult<Option<Value>> {
        let pr_id = pr.get("id").cloned().unwrap_or(Value::Null);
        let key = Selector::new().eq("sha", sha);
        if let Some(stored) = self.docs.find_one(PULL_REQUEST_COMMITS, &key).await? {
            debug!("Pull request commit {owner}/{repo} -> {sha} exists for pull id {pr_id}");
            return Ok(Some(stored));
        }

        let Some(mut commit) = self.retrieve_commit(owner, repo, sha).await? else {
            return Ok(None);
        };
        set_field(&mut commit, "pull_request_id", pr_id.clone());
        self.docs.store(PULL_REQUEST_COMMITS, &commit).await?;
        info!("Added commit {owner}/{repo} -> {sha} with pull_id {pr_id}");
        Ok(Some(commit))
    }

    /// Review comments on a pull request's diff.
    pub async fn retrieve_pull_req_comments(&self, owner: &str, repo: &str, number: i64) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/pulls/{number}/comments"));
        let context = repo_selector(owner, repo).eq("pullreq_id", number);

        for mut comment in self.client.paged_request(&url, -1).await? {
            tag(&mut comment, owner, repo);
            set_field(&mut comment, "pullreq_id", Value::from(number));
            let key = context
                .clone()
                .eq("id", comment.get("id").cloned().unwrap_or(Value::Null));
            if self.docs.exists(PULL_REQUEST_COMMENTS, &key).await? {
                continue;
            }
            self.docs.store(PULL_REQUEST_COMMENTS, &comment).await?;
        }
        Ok(self.docs.find(PULL_REQUEST_COMMENTS, &context).await?)
    }

    pub async fn retrieve_pull_req_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        comment_id: i64,
    ) -> RetrieveResult<Option<Value>> {
        let key = repo_selector(owner, repo)
            .eq("pullreq_id", number)
            .eq("id", comment_id);
        if let Some(stored) = self.docs.find_one(PULL_REQUEST_COMMENTS, &key).await? {
            debug!("Pull request comment {owner}/{repo} {number}->{comment_id} exists");
            return Ok(Some(stored));
        }

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/pulls/comments/{comment_id}"));
        let Some(mut comment) = non_empty(self.client.api_request(&url, None).await?) else {
            warn!("Could not find pullreq_comment {owner}/{repo} {number}->{comment_id}. Deleted?");
            return Ok(None);
        };
        tag(&mut comment, owner, repo);
        set_field(&mut comment, "pullreq_id", Value::from(number));
        self.docs.store(PULL_REQUEST_COMMENTS, &comment).await?;
        info!("Added pullreq_comment {owner}/{repo} {number}->{comment_id}");
        Ok(self.docs.find_one(PULL_REQUEST_COMMENTS, &key).await?.or(Some(comment)))
    }
}
