use log::{debug, info, warn};
use serde_json::Value;

use super::bound::{BoundQuery, PageOrder, repo_selector};
use super::{RepoRetriever, RetrieveResult, non_empty};
use crate::store::Selector;
use crate::store::collections::{EVENTS, FORKS, REPO_LABELS, REPOS, TOPICS, WATCHERS};

const TOPICS_MEDIA_TYPE: &str = "application/vnd.github.mercy-preview+json";

impl RepoRetriever {
    /// Repository metadata. `refresh` re-fetches and overwrites the stored copy.
    pub async fn retrieve_repo(&self, owner: &str, repo: &str, refresh: bool) -> RetrieveResult<Option<Value>> {
        let selector = Selector::new().eq("owner.login", owner).eq("name", repo);
        if !refresh && let Some(stored) = self.docs.find_one(REPOS, &selector).await? {
            debug!("Repo {owner} -> {repo} exists");
            return Ok(Some(stored));
        }

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}"));
        let Some(found) = non_empty(self.client.api_request(&url, None).await?) else {
            return Ok(None);
        };

        if refresh {
            let name = found.get("name").cloned().unwrap_or_else(|| Value::from(repo));
            let login = found
                .get("owner")
                .and_then(|o| o.get("login"))
                .cloned()
                .unwrap_or_else(|| Value::from(owner));
            let key = Selector::new().eq("name", name).eq("owner.login", login);
            self.docs.upsert(REPOS, &key, &found).await?;
            info!("Refreshed repo {owner} -> {repo}");
        } else {
            self.docs.store(REPOS, &found).await?;
            info!("Added repo {owner} -> {repo}");
        }
        Ok(Some(found))
    }

    /// Bytes of code per language, as reported by GitHub. Not stored.
    pub async fn retrieve_languages(&self, owner: &str, repo: &str) -> RetrieveResult<Option<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/languages"));
        Ok(non_empty(self.client.api_request(&url, None).await?))
    }

    pub async fn retrieve_topics(&self, owner: &str, repo: &str) -> RetrieveResult<Vec<String>> {
        let stored: Vec<Value> = self.docs.find(TOPICS, &repo_selector(owner, repo)).await?;

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/topics"));
        let names: Vec<String> = self
            .client
            .api_request(&url, Some(TOPICS_MEDIA_TYPE))
            .await?
            .and_then(|r| r.get("names").and_then(Value::as_array).cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|n| n.as_str().map(str::to_string))
            .collect();
        if names.is_empty() {
            warn!("No topics for {owner}/{repo}");
            return Ok(Vec::new());
        }

        for topic in &names {
            let known = stored
                .iter()
                .any(|t| t.get("topic").and_then(Value::as_str) == Some(topic.as_str()));
            if known {
                debug!("Topic {topic} -> {owner}/{repo} exists");
                continue;
            }
            let entry = serde_json::json!({"owner": owner, "repo": repo, "topic": topic});
            self.docs.store(TOPICS, &entry).await?;
            info!("Added topic {topic} -> {owner}/{repo}");
        }
        Ok(names)
    }

    /// Default branch name; `master` when the repository does not report one.
    ///
    /// A stored copy without `default_branch` predates the field and is
    /// refreshed once.
    pub async fn retrieve_default_branch(&self, owner: &str, repo: &str, refresh: bool) -> RetrieveResult<Option<String>> {
        let Some(mut found) = self.retrieve_repo(owner, repo, refresh).await? else {
            return Ok(None);
        };
        if found.get("default_branch").is_none_or(Value::is_null) {
            let Some(refreshed) = self.retrieve_repo(owner, repo, true).await? else {
                return Ok(None);
            };
            found = refreshed;
        }
        Ok(Some(
            found
                .get("default_branch")
                .and_then(Value::as_str)
                .unwrap_or("master")
                .to_string(),
        ))
    }

    fn watchers_query(owner: &str, repo: &str) -> BoundQuery<'static> {
        BoundQuery::new(
            WATCHERS,
            vec![format!("repos/{owner}/{repo}/stargazers")],
            repo_selector(owner, repo),
            "login",
        )
        .order(PageOrder::Desc)
    }

    pub async fn retrieve_watchers(&self, owner: &str, repo: &str) -> RetrieveResult<Vec<Value>> {
        self.repo_bound_items(owner, repo, &Self::watchers_query(owner, repo), None)
            .await
    }

    pub async fn retrieve_watcher(&self, owner: &str, repo: &str, watcher: &str) -> RetrieveResult<Option<Value>> {
        self.repo_bound_item(owner, repo, &Value::from(watcher), &Self::watchers_query(owner, repo))
            .await
    }

    fn forks_query(owner: &str, repo: &str) -> BoundQuery<'static> {
        BoundQuery::new(
            FORKS,
            vec![format!("repos/{owner}/{repo}/forks")],
            repo_selector(owner, repo),
            "id",
        )
    }

    pub async fn retrieve_forks(&self, owner: &str, repo: &str) -> RetrieveResult<Vec<Value>> {
        self.repo_bound_items(owner, repo, &Self::forks_query(owner, repo), None)
            .await
    }

    pub async fn retrieve_fork(&self, owner: &str, repo: &str, fork_id: i64) -> RetrieveResult<Option<Value>> {
        self.repo_bound_item(owner, repo, &Value::from(fork_id), &Self::forks_query(owner, repo))
            .await
    }

    fn labels_query(owner: &str, repo: &str, refresh: bool) -> BoundQuery<'static> {
        BoundQuery::new(
            REPO_LABELS,
            vec![format!("repos/{owner}/{repo}/labels")],
            repo_selector(owner, repo),
            "name",
        )
        .refresh(refresh)
    }

    pub async fn retrieve_repo_labels(&self, owner: &str, repo: &str, refresh: bool) -> RetrieveResult<Vec<Value>> {
        self.repo_bound_items(owner, repo, &Self::labels_query(owner, repo, refresh), None)
            .await
    }

    pub async fn retrieve_repo_label(&self, owner: &str, repo: &str, name: &str) -> RetrieveResult<Option<Value>> {
        self.repo_bound_item(owner, repo, &Value::from(name), &Self::labels_query(owner, repo, false))
            .await
    }

    /// Recent repository events (GitHub keeps about 90 days), deduplicated by event id.
    pub async fn get_repo_events(&self, owner: &str, repo: &str) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/events"));
        for event in self.client.paged_request(&url, -1).await? {
            let id = event.get("id").cloned().unwrap_or(Value::Null);
            let kind = event.get("type").and_then(Value::as_str).unwrap_or("Event");
            if self.get_event(&id).await?.is_empty() {
                self.docs.store(EVENTS, &event).await?;
                info!("Added event for repository {owner}/{repo} -> {kind}-{id}");
            } else {
                debug!("Repository event {owner}/{repo} -> {kind}-{id} already exists");
            }
        }
        Ok(self
            .docs
            .find(EVENTS, &Selector::new().eq("repo.name", format!("{owner}/{repo}")))
            .await?)
    }

    pub async fn get_event(&self, id: &Value) -> RetrieveResult<Vec<Value>> {
        Ok(self.docs.find(EVENTS, &Selector::new().eq("id", id.clone())).await?)
    }
}
