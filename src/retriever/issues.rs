use log::{debug, info, warn};
use serde_json::Value;

use super::bound::{BoundQuery, repo_selector};
use super::{RepoRetriever, RetrieveResult, non_empty, tag};
use crate::store::Selector;
use crate::store::collections::{ISSUE_COMMENTS, ISSUE_EVENTS, ISSUES};

fn with_issue(doc: &mut Value, owner: &str, repo: &str, issue_id: i64) {
    tag(doc, owner, repo);
    if let Some(map) = doc.as_object_mut() {
        map.insert("issue_id".to_string(), Value::from(issue_id));
    }
}

fn issue_selector(owner: &str, repo: &str, issue_id: i64) -> Selector {
    repo_selector(owner, repo).eq("issue_id", issue_id)
}

impl RepoRetriever {
    fn issues_query(owner: &str, repo: &str, refresh: bool) -> BoundQuery<'static> {
        BoundQuery::new(
            ISSUES,
            vec![
                format!("repos/{owner}/{repo}/issues"),
                format!("repos/{owner}/{repo}/issues?state=closed"),
            ],
            repo_selector(owner, repo),
            "number",
        )
        .refresh(refresh)
    }

    pub async fn retrieve_issues(&self, owner: &str, repo: &str, refresh: bool) -> RetrieveResult<Vec<Value>> {
        self.repo_bound_items(owner, repo, &Self::issues_query(owner, repo, refresh), None)
            .await
    }

    pub async fn retrieve_issue(&self, owner: &str, repo: &str, number: i64) -> RetrieveResult<Option<Value>> {
        self.repo_bound_item(owner, repo, &Value::from(number), &Self::issues_query(owner, repo, false))
            .await
    }

    /// Stores the listed events of one issue and returns what is stored,
    /// or the listing itself when the store keeps nothing.
    pub async fn retrieve_issue_events(&self, owner: &str, repo: &str, issue_id: i64) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/issues/{issue_id}/events"));
        let context = issue_selector(owner, repo, issue_id);

        let mut listed = self.client.paged_request(&url, -1).await?;
        for event in &mut listed {
            with_issue(event, owner, repo, issue_id);
            let id = event.get("id").cloned().unwrap_or(Value::Null);
            if !self.docs.exists(ISSUE_EVENTS, &context.clone().eq("id", id.clone())).await? {
                self.docs.store(ISSUE_EVENTS, event).await?;
                info!("Added issue_event {owner}/{repo} {issue_id}->{id}");
            }
        }

        let stored = self.docs.find(ISSUE_EVENTS, &context).await?;
        Ok(if stored.is_empty() { listed } else { stored })
    }

    pub async fn retrieve_issue_event(
        &self,
        owner: &str,
        repo: &str,
        issue_id: i64,
        event_id: i64,
    ) -> RetrieveResult<Option<Value>> {
        let key = issue_selector(owner, repo, issue_id).eq("id", event_id);
        if let Some(stored) = self.docs.find_one(ISSUE_EVENTS, &key).await? {
            debug!("Issue event {owner}/{repo} {issue_id}->{event_id} exists");
            return Ok(Some(stored));
        }

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/issues/events/{event_id}"));
        let Some(mut event) = non_empty(self.client.api_request(&url, None).await?) else {
            warn!("Could not find issue_event {owner}/{repo} {issue_id}->{event_id}. Deleted?");
            return Ok(None);
        };
        with_issue(&mut event, owner, repo, issue_id);
        self.docs.store(ISSUE_EVENTS, &event).await?;
        info!("Added issue_event {owner}/{repo} {issue_id}->{event_id}");
        Ok(self.docs.find_one(ISSUE_EVENTS, &key).await?.or(Some(event)))
    }

    pub async fn retrieve_issue_comments(&self, owner: &str, repo: &str, issue_id: i64) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/issues/{issue_id}/comments"));
        let context = issue_selector(owner, repo, issue_id);

        let mut listed = self.client.paged_request(&url, -1).await?;
        for comment in &mut listed {
            with_issue(comment, owner, repo, issue_id);
            let id = comment.get("id").cloned().unwrap_or(Value::Null);
            if self.docs.exists(ISSUE_COMMENTS, &context.clone().eq("id", id)).await? {
                continue;
            }
            self.docs.store(ISSUE_COMMENTS, comment).await?;
        }

        let stored = self.docs.find(ISSUE_COMMENTS, &context).await?;
        Ok(if stored.is_empty() { listed } else { stored })
    }

    pub async fn retrieve_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_id: i64,
        comment_id: i64,
    ) -> RetrieveResult<Option<Value>> {
        let key = issue_selector(owner, repo, issue_id).eq("id", comment_id);
        if let Some(stored) = self.docs.find_one(ISSUE_COMMENTS, &key).await? {
            debug!("Issue comment {owner}/{repo} {issue_id}->{comment_id} exists");
            return Ok(Some(stored));
        }

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/issues/comments/{comment_id}"));
        let Some(mut comment) = non_empty(self.client.api_request(&url, None).await?) else {
            warn!("Could not find issue_comment {owner}/{repo} {issue_id}->{comment_id}. Deleted?");
            return Ok(None);
        };
        with_issue(&mut comment, owner, repo, issue_id);
        self.docs.store(ISSUE_COMMENTS, &comment).await?;
        info!("Added issue_comment {owner}/{repo} {issue_id}->{comment_id}");
        Ok(self.docs.find_one(ISSUE_COMMENTS, &key).await?.or(Some(comment)))
    }

    /// Labels attached to an issue. Listed only; repository labels are
    /// stored by `retrieve_repo_labels`.
    pub async fn retrieve_issue_labels(&self, owner: &str, repo: &str, issue_id: i64) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/issues/{issue_id}/labels"));
        Ok(self.client.paged_request(&url, -1).await?)
    }
}
