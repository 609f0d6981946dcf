//! GitHub Actions workflows and their runs
//!
//! Both listings are wrapped objects (`{"total_count", "workflows": [...]}`)
//! and are paginated like any other listing. Items are stored once per
//! `github_id` and, when a project database is attached, mirrored into its
//! `workflows` / `workflow_runs` tables.

use std::collections::HashSet;

use log::{debug, info, warn};
use serde_json::{Value, json};

use super::{RepoRetriever, RetrieveResult, parse_time};
use crate::db::{WorkflowRow, WorkflowRunRow};
use crate::github::PageWalk;
use crate::store::Selector;
use crate::store::collections::{WORKFLOW_RUNS, WORKFLOWS};

fn field(doc: &Value, key: &str) -> Value {
    doc.get(key).cloned().unwrap_or(Value::Null)
}

fn opt_string(doc: &Value, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

/// `{login, avatar_url, html_url}` of an actor, nulls when absent.
fn actor_summary(actor: Option<&Value>) -> Value {
    let pick = |key: &str| actor.map_or(Value::Null, |a| field(a, key));
    json!({
        "login": pick("login"),
        "avatar_url": pick("avatar_url"),
        "html_url": pick("html_url"),
    })
}

fn workflow_document(workflow: &Value, id: i64, owner: &str, repo: &str) -> Value {
    json!({
        "github_id": id,
        "name": field(workflow, "name"),
        "path": field(workflow, "path"),
        "state": field(workflow, "state"),
        "created_at": field(workflow, "created_at"),
        "updated_at": field(workflow, "updated_at"),
        "owner": owner,
        "repo": repo,
        "html_url": field(workflow, "html_url"),
    })
}

fn run_document(run: &Value, id: i64, workflow_id: i64, owner: &str, repo: &str) -> Value {
    json!({
        "github_id": id,
        "workflow_id": workflow_id,
        "name": field(run, "name"),
        "head_branch": field(run, "head_branch"),
        "head_sha": field(run, "head_sha"),
        "run_number": field(run, "run_number"),
        "status": field(run, "status"),
        "conclusion": field(run, "conclusion"),
        "created_at": field(run, "created_at"),
        "run_started_at": field(run, "run_started_at"),
        "updated_at": field(run, "updated_at"),
        "event": field(run, "event"),
        "path": field(run, "path"),
        "run_attempt": field(run, "run_attempt"),
        "display_title": field(run, "display_title"),
        "owner": owner,
        "repo": repo,
        "html_url": field(run, "html_url"),
        "actor": actor_summary(run.get("actor")),
        "triggering_actor": actor_summary(run.get("triggering_actor")),
    })
}

fn workflow_row(workflow: &Value, github_id: i64, project_id: i64) -> Option<WorkflowRow> {
    Some(WorkflowRow {
        github_id,
        project_id,
        name: opt_string(workflow, "name").unwrap_or_default(),
        path: opt_string(workflow, "path").unwrap_or_default(),
        state: opt_string(workflow, "state").unwrap_or_default(),
        created_at: parse_time(workflow, "created_at")?,
        updated_at: parse_time(workflow, "updated_at")?,
    })
}

fn run_row(run: &Value, github_id: i64, workflow_id: i64, project_id: i64) -> Option<WorkflowRunRow> {
    let login = |key: &str| {
        run.get(key)
            .and_then(|a| a.get("login"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    Some(WorkflowRunRow {
        github_id,
        workflow_id,
        project_id,
        name: opt_string(run, "name"),
        head_branch: opt_string(run, "head_branch"),
        head_sha: opt_string(run, "head_sha")?,
        run_number: run.get("run_number").and_then(Value::as_i64).unwrap_or_default(),
        status: opt_string(run, "status"),
        conclusion: opt_string(run, "conclusion"),
        event: opt_string(run, "event"),
        created_at: parse_time(run, "created_at")?,
        run_started_at: parse_time(run, "run_started_at"),
        updated_at: parse_time(run, "updated_at")?,
        actor_login: login("actor"),
        triggering_actor_login: login("triggering_actor"),
    })
}

fn github_ids(docs: &[Value]) -> HashSet<i64> {
    docs.iter()
        .filter_map(|d| d.get("github_id").and_then(Value::as_i64))
        .collect()
}

impl RepoRetriever {
    /// Store the repository's workflows, returning the newly added ones.
    pub async fn retrieve_workflows(&self, owner: &str, repo: &str) -> RetrieveResult<Vec<Value>> {
        if self.retrieve_repo(owner, repo, false).await?.is_none() {
            warn!("Could not find repo {owner}/{repo} for retrieving workflows");
            return Ok(Vec::new());
        }

        info!("Retrieving workflows for {owner}/{repo}");
        let stored = self
            .docs
            .find(WORKFLOWS, &Selector::new().eq("owner", owner).eq("repo", repo))
            .await?;
        let mut existing_ids = github_ids(&stored);

        let url = self.client.ghurl(&format!("repos/{owner}/{repo}/actions/workflows"));
        let listed = self
            .client
            .walk_pages(PageWalk::new(&url, -1).items_key("workflows"))
            .await?
            .items;
        if listed.is_empty() {
            warn!("Invalid or empty workflows response for {owner}/{repo}");
        }

        let project_id = self.mirror_project_id(owner, repo).await?;
        let mut added = Vec::new();
        for workflow in listed {
            let Some(id) = workflow.get("id").and_then(Value::as_i64) else {
                continue;
            };

            if let (Some(db), Some(project_id)) = (&self.db, project_id) {
                match workflow_row(&workflow, id, project_id) {
                    Some(row) => {
                        if let Err(e) = db.upsert_workflow(&row).await {
                            warn!("Could not mirror workflow {id} of {owner}/{repo}: {e}");
                        }
                    }
                    None => debug!("Workflow {id} lacks timestamps, not mirrored"),
                }
            }

            if !existing_ids.insert(id) {
                debug!("Workflow {owner}/{repo} -> {id} exists");
                continue;
            }
            self.docs
                .store(WORKFLOWS, &workflow_document(&workflow, id, owner, repo))
                .await?;
            info!("Added workflow {owner}/{repo} -> {id}");
            added.push(workflow);
        }

        info!("API returned {} new workflows for {owner}/{repo}", added.len());
        Ok(added)
    }

    /// `github_id`s of the workflows stored for a repository.
    pub async fn stored_workflow_ids(&self, owner: &str, repo: &str) -> RetrieveResult<Vec<i64>> {
        let stored = self
            .docs
            .find(WORKFLOWS, &Selector::new().eq("owner", owner).eq("repo", repo))
            .await?;
        let mut ids: Vec<i64> = github_ids(&stored).into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Store the runs of one workflow, returning the newly added ones.
    ///
    /// The commit each new run was triggered by is retrieved as well.
    pub async fn retrieve_workflow_runs(&self, owner: &str, repo: &str, workflow_id: i64) -> RetrieveResult<Vec<Value>> {
        if self.retrieve_repo(owner, repo, false).await?.is_none() {
            warn!("Could not find repo {owner}/{repo} for retrieving workflow runs");
            return Ok(Vec::new());
        }

        info!("Retrieving workflow runs for workflow {workflow_id} in {owner}/{repo}");
        let selector = Selector::new()
            .eq("owner", owner)
            .eq("repo", repo)
            .eq("workflow_id", workflow_id);
        let mut existing_ids = github_ids(&self.docs.find(WORKFLOW_RUNS, &selector).await?);

        let url = self
            .client
            .ghurl(&format!("repos/{owner}/{repo}/actions/workflows/{workflow_id}/runs"));
        let listed = self
            .client
            .walk_pages(PageWalk::new(&url, -1).items_key("workflow_runs"))
            .await?
            .items;
        if listed.is_empty() {
            warn!("Invalid or empty workflow runs response for workflow {workflow_id}");
        }

        let project_id = self.mirror_project_id(owner, repo).await?;
        let local_workflow_id = match &self.db {
            Some(db) if project_id.is_some() => db.workflow_id_by_github_id(workflow_id).await?,
            _ => None,
        };

        let mut added = Vec::new();
        for run in listed {
            let Some(id) = run.get("id").and_then(Value::as_i64) else {
                continue;
            };

            if let (Some(db), Some(project_id), Some(local_id)) = (&self.db, project_id, local_workflow_id) {
                match run_row(&run, id, local_id, project_id) {
                    Some(row) => {
                        if let Err(e) = db.upsert_workflow_run(&row).await {
                            warn!("Could not mirror workflow run {id}: {e}");
                        }
                    }
                    None => debug!("Workflow run {id} lacks head_sha or timestamps, not mirrored"),
                }
            }

            if !existing_ids.insert(id) {
                continue;
            }
            self.docs
                .store(WORKFLOW_RUNS, &run_document(&run, id, workflow_id, owner, repo))
                .await?;
            info!("Added workflow run {id} for workflow {workflow_id} in {owner}/{repo}");

            if let Some(sha) = run.get("head_sha").and_then(Value::as_str) {
                match self.retrieve_commit(owner, repo, sha).await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!("Could not retrieve commit {sha} of run {id}: {e}"),
                }
            }
            added.push(run);
        }

        info!(
            "API returned {} new workflow runs for workflow {workflow_id} in {owner}/{repo}",
            added.len()
        );
        Ok(added)
    }

    /// Project id to mirror into, when a project database is attached and
    /// knows the repository.
    async fn mirror_project_id(&self, owner: &str, repo: &str) -> RetrieveResult<Option<i64>> {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        let project = db.find_project(owner, repo).await?;
        if project.is_none() {
            debug!("Project {owner}/{repo} not in the database, workflows not mirrored");
        }
        Ok(project.map(|p| p.id))
    }
}
