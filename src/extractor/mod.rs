//! Per-build metrics extraction
//!
//! For every latest workflow run of a project this joins three sources:
//! the relational project database (commits, team, pull requests,
//! comments), the local clone (source and test files, history) and the
//! document store (commit diffs). Each run yields one
//! [`BuildMetricsRecord`], upserted into `ci_builds`.
//!
//! Runs are processed concurrently on a small pool; a run whose commit
//! cannot be resolved is skipped, and missing git data degrades to zero
//! values instead of failing the batch.

pub mod cache;
pub mod churn;
pub mod record;

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Months, Utc};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::db::{DbError, Project, ProjectDatabase, WorkflowRunRow};
use crate::git::{GitError, GitHistoryWalker, GitResult, LocalRepo, TestDiff, TreeFile};
use crate::language::{LanguageProfile, count_lines};
use crate::retriever::RepoRetriever;
use crate::shutdown::ShutdownFlag;
use crate::store::collections::{CI_BUILDS, COMMITS};
use crate::store::{ResourceRepository, Selector, StoreError};

pub use cache::StrippedCache;
pub use churn::{BuildStats, FileKind, FileTypeCache, build_stats, classify};
pub use record::{BuildMetricsRecord, BuildOutcome, per_kloc};

/// Longest plausible build; anything outside `[0, MAX_BUILD_SECONDS]` is bad data.
pub const MAX_BUILD_SECONDS: i64 = 86_400;

const STARTED_AT_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Cannot find repository {owner}/{repo}")]
    ProjectNotFound { owner: String, repo: String },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Success,
    Error,
}

/// Outcome of one extraction command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    pub status: SummaryStatus,
    pub message: String,
    /// Records written to `ci_builds`
    pub saved: usize,
}

/// Seconds between start and last update, `None` when outside `[0, MAX_BUILD_SECONDS]`.
#[must_use]
pub fn build_duration(started: DateTime<Utc>, updated: DateTime<Utc>) -> Option<i64> {
    let secs = (updated - started).num_seconds();
    (0..=MAX_BUILD_SECONDS).contains(&secs).then_some(secs)
}

/// Everything the runs of one project share.
pub struct RunContext {
    pub owner: String,
    pub repo: String,
    pub project: Project,
    /// Lowercased declared language, `unknown` when the project has none
    pub lang: String,
    pub profile: LanguageProfile,
    pub git: LocalRepo,
    file_types: Mutex<FileTypeCache>,
}

impl RunContext {
    pub fn new(owner: &str, repo: &str, project: Project, git: LocalRepo) -> Self {
        let lang = project
            .language
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| "unknown".to_string());
        let profile = LanguageProfile::select(project.language.as_deref());
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            project,
            lang,
            profile,
            git,
            file_types: Mutex::new(FileTypeCache::default()),
        }
    }

    fn project_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Commit a run was triggered by, as far as it could be resolved.
struct ResolvedCommit {
    author_id: Option<i64>,
    /// Known directly only when the commit came from git rather than the database
    author_login: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SourceCounts {
    sloc: i64,
    test_lines: i64,
    test_cases: i64,
    assertions: i64,
}

pub struct BuildMetricsExtractor {
    db: Arc<dyn ProjectDatabase>,
    docs: ResourceRepository,
    walker: GitHistoryWalker,
    retriever: Option<RepoRetriever>,
    threads: usize,
    months_back: i64,
    cache: Arc<StrippedCache>,
    shutdown: ShutdownFlag,
}

impl BuildMetricsExtractor {
    pub fn new(db: Arc<dyn ProjectDatabase>, docs: ResourceRepository, walker: GitHistoryWalker) -> Self {
        Self {
            db,
            docs,
            walker,
            retriever: None,
            threads: 2,
            months_back: 3,
            cache: Arc::new(StrippedCache::default()),
            shutdown: ShutdownFlag::new(),
        }
    }

    /// Fetch commit diffs missing from the document store through the API.
    #[must_use]
    pub fn with_retriever(mut self, retriever: RepoRetriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn months_back(mut self, months: i64) -> Self {
        self.months_back = months;
        self
    }

    #[must_use]
    pub fn stripped_cache(mut self, cache: Arc<StrippedCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn shutdown(mut self, flag: ShutdownFlag) -> Self {
        self.shutdown = flag;
        self
    }

    /// (hits, misses) of the stripped-contents cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.cache_stats()
    }

    /// Look the project up and bring its clone up to date.
    pub async fn prepare(&self, owner: &str, repo: &str) -> ExtractResult<RunContext> {
        let Some(project) = self.db.find_project(owner, repo).await? else {
            error!("Cannot find repository {owner}/{repo} in projects table");
            return Err(ExtractError::ProjectNotFound {
                owner: owner.to_string(),
                repo: repo.to_string(),
            });
        };
        info!(
            "Found repository {owner}/{repo} with project_id={}, language={}",
            project.id,
            project.language.as_deref().unwrap_or("unknown")
        );
        let git = self.walker.clone_or_update(owner, repo).await?;
        let ctx = RunContext::new(owner, repo, project, git);
        if ctx.profile.name() != ctx.lang {
            debug!("Using {} rules for language {}", ctx.profile.name(), ctx.lang);
        }
        Ok(ctx)
    }

    /// Extract and store metrics for every latest workflow run of a project.
    pub async fn extract_builds(&self, owner: &str, repo: &str) -> ExtractResult<ExtractionSummary> {
        let ctx = self.prepare(owner, repo).await?;

        info!("Retrieving all workflow runs for {owner}/{repo}");
        let runs = self.db.latest_workflow_runs(ctx.project.id).await?;
        info!("{} latest workflow runs to process", runs.len());

        let ctx = &ctx;
        let records: Vec<BuildMetricsRecord> = futures::stream::iter(runs)
            .map(|run| async move {
                if self.shutdown.is_requested() {
                    debug!("Shutdown requested, not starting run {}", run.github_id);
                    return None;
                }
                match self.process_run(ctx, &run).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Workflow run {} failed: {e}", run.github_id);
                        None
                    }
                }
            })
            .buffer_unordered(self.threads)
            .filter_map(|record| async move { record })
            .collect()
            .await;

        if records.is_empty() {
            warn!("No data extracted!");
            return Ok(ExtractionSummary {
                status: SummaryStatus::Error,
                message: format!("No data extracted for {owner}/{repo}"),
                saved: 0,
            });
        }

        let mut saved = 0;
        for record in &records {
            match self.save(record).await {
                Ok(_) => saved += 1,
                Err(e) => error!(
                    "Failed to upsert record for {}, commit {}: {e}",
                    record.gh_project_name, record.git_all_built_commits
                ),
            }
        }
        info!("Upserted {saved} records to {CI_BUILDS}");
        let (hits, misses) = self.cache_stats();
        debug!("Stripped-file cache: {hits} hits, {misses} misses");

        Ok(ExtractionSummary {
            status: SummaryStatus::Success,
            message: format!("Extracted and saved {saved} of {} records for {owner}/{repo}", records.len()),
            saved,
        })
    }

    /// Upsert by `(gh_project_name, git_all_built_commits, git_branch)`.
    pub async fn save(&self, record: &BuildMetricsRecord) -> ExtractResult<i64> {
        let doc = serde_json::to_value(record).map_err(StoreError::from)?;
        Ok(self.docs.upsert(CI_BUILDS, &record.key(), &doc).await?)
    }

    /// Metrics for one workflow run; `None` when its commit cannot be resolved.
    pub async fn process_run(
        &self,
        ctx: &RunContext,
        run: &WorkflowRunRow,
    ) -> ExtractResult<Option<BuildMetricsRecord>> {
        let sha = run.head_sha.as_str();
        let Some(commit) = self.resolve_commit(ctx, run).await? else {
            return Ok(None);
        };

        let build_duration = match run.run_started_at.and_then(|s| build_duration(s, run.updated_at)) {
            Some(secs) => secs,
            None => {
                warn!(
                    "Invalid build_duration for run {} (started: {:?}, updated: {}), setting to 0",
                    run.github_id, run.run_started_at, run.updated_at
                );
                0
            }
        };
        let build_failed = BuildOutcome::from_conclusion(run.conclusion.as_deref());
        let gh_build_started_at = run
            .run_started_at
            .map(|t| t.format(STARTED_AT_FORMAT).to_string())
            .unwrap_or_default();
        let branch = run.head_branch.clone().unwrap_or_else(|| "unknown".to_string());

        let counts = self.source_counts(ctx, sha).await;
        debug!("Computed sloc for {sha}: {}", counts.sloc);
        let stats = self.churn(ctx, sha).await;

        let commit_time = match ctx.git.commit_info(sha).await {
            Ok(info) => info.committed_at,
            Err(e) => {
                debug!("Commit {sha} time unavailable in git ({e}), using stored time");
                commit.created_at
            }
        };
        let team = self.main_team(ctx, commit_time).await?;
        let author_login = match commit.author_id {
            Some(id) => self.db.login_by_id(id).await?,
            None => commit.author_login.clone(),
        };
        let by_core_team_member = author_login.as_ref().is_some_and(|l| team.contains(l));
        debug!("Core team member check for {author_login:?}: {by_core_team_member}");

        let pr = self.db.pr_info_for_commit(sha, ctx.project.id).await?;
        let (issue_comments, pr_comments) = match &pr {
            Some(pr) => (
                self.db.num_issue_comments(pr.pr_id, pr.created_at, commit.created_at).await?,
                self.db.num_pr_comments(pr.pr_id, pr.created_at, commit.created_at).await?,
            ),
            None => (0, 0),
        };
        let commit_comments = self.db.num_commit_comments(&ctx.owner, &ctx.repo, sha).await?;

        let tests = self.test_diff(ctx, sha).await;
        let touched = git_or_default(
            sha,
            "commits on files touched",
            ctx.git.commits_on_files_touched(sha, self.months_back).await,
        );
        let repo_age = git_or_default(sha, "repository age", ctx.git.repo_age_days(sha).await);
        let repo_num_commits = match ctx.git.commit_count(sha).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Exception on commit numbers processing commit {sha}: {e}");
                1
            }
        };

        let record = BuildMetricsRecord {
            git_branch: branch,
            git_all_built_commits: sha.to_string(),
            git_num_all_built_commits: 1,
            git_trigger_commit: sha.to_string(),
            git_diff_src_churn: stats.src_churn(),
            git_diff_test_churn: stats.test_churn(),

            gh_project_name: ctx.project_name(),
            gh_is_pr: pr.is_some(),
            gh_lang: ctx.lang.clone(),
            gh_team_size: team.len() as i64,
            gh_num_issue_comments: issue_comments,
            gh_num_pr_comments: pr_comments,
            gh_num_commit_comments: commit_comments,

            gh_diff_files_added: stats.files_added,
            gh_diff_files_deleted: stats.files_removed,
            gh_diff_files_modified: stats.files_modified,
            gh_diff_tests_added: tests.tests_added,
            gh_diff_tests_deleted: tests.tests_deleted,
            gh_diff_src_files: stats.src_files,
            gh_diff_doc_files: stats.doc_files,
            gh_diff_other_files: stats.other_files,

            gh_num_commits_on_files_touched: touched,
            gh_sloc: counts.sloc,
            gh_test_lines_per_kloc: per_kloc(counts.test_lines, counts.sloc),
            gh_test_cases_per_kloc: per_kloc(counts.test_cases, counts.sloc),
            gh_asserts_cases_per_kloc: per_kloc(counts.assertions, counts.sloc),
            gh_by_core_team_member: by_core_team_member,
            gh_repo_age: repo_age,
            gh_repo_num_commits: repo_num_commits,

            build_duration,
            build_failed,
            gh_build_started_at,
            github_run_id: run.github_id,
        };
        info!(
            "Processed workflow run {}: build_duration={}s, build_failed={:?}, sloc={}",
            run.github_id, record.build_duration, record.build_failed, record.gh_sloc
        );
        Ok(Some(record))
    }

    /// Database row first, then the clone; the commit must exist in the clone either way.
    async fn resolve_commit(&self, ctx: &RunContext, run: &WorkflowRunRow) -> ExtractResult<Option<ResolvedCommit>> {
        let sha = run.head_sha.as_str();
        if let Some(row) = self.db.find_commit(sha).await? {
            if !ctx.git.commit_exists(sha).await {
                warn!("Commit {sha} in commits table but not in Git, skipping run {}", run.github_id);
                return Ok(None);
            }
            return Ok(Some(ResolvedCommit {
                author_id: row.author_id,
                author_login: None,
                created_at: row.created_at,
            }));
        }

        match ctx.git.commit_info(sha).await {
            Ok(info) => {
                let author_login = self.db.login_by_email(&info.author_email).await?;
                Ok(Some(ResolvedCommit {
                    author_id: None,
                    author_login,
                    created_at: info.committed_at,
                }))
            }
            Err(e) => {
                warn!("Cannot find commit {sha} in repository, skipping run {}: {e}", run.github_id);
                Ok(None)
            }
        }
    }

    async fn source_counts(&self, ctx: &RunContext, sha: &str) -> SourceCounts {
        match self.try_source_counts(ctx, sha).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Cannot count source lines at {sha}: {e}");
                SourceCounts::default()
            }
        }
    }

    async fn try_source_counts(&self, ctx: &RunContext, sha: &str) -> GitResult<SourceCounts> {
        let profile = ctx.profile;
        let files = ctx.git.files_at_commit(sha).await?;
        let (src, tests): (Vec<TreeFile>, Vec<TreeFile>) = (
            files.iter().filter(|f| profile.is_source_file(&f.path)).cloned().collect(),
            files.iter().filter(|f| profile.is_test_file(&f.path)).cloned().collect(),
        );

        let src_text = self.cache.stripped(&ctx.git, &src, profile).await?;
        let test_text = self.cache.stripped(&ctx.git, &tests, profile).await?;
        let total = |texts: &[Arc<String>], filter: &dyn Fn(&str) -> bool| -> i64 {
            texts.iter().map(|t| count_lines(t, filter)).sum::<usize>() as i64
        };

        Ok(SourceCounts {
            sloc: total(&src_text, &|_: &str| true),
            test_lines: total(&test_text, &|_: &str| true),
            test_cases: total(&test_text, &|l: &str| profile.is_test_case_declaration(l)),
            assertions: total(&test_text, &|l: &str| profile.is_assertion(l)),
        })
    }

    /// Churn of the trigger commit, from its stored diff or the API.
    async fn churn(&self, ctx: &RunContext, sha: &str) -> BuildStats {
        let commit = match self.docs.find_one(COMMITS, &Selector::new().eq("sha", sha)).await {
            Ok(Some(doc)) => Some(doc),
            Ok(None) => self.fetch_commit(ctx, sha).await,
            Err(e) => {
                warn!("Cannot read commit {sha} from the document store: {e}");
                None
            }
        };
        let commits: Vec<Value> = commit.into_iter().collect();
        let mut file_types = ctx.file_types.lock().unwrap_or_else(PoisonError::into_inner);
        build_stats(&commits, ctx.profile, &mut file_types)
    }

    async fn fetch_commit(&self, ctx: &RunContext, sha: &str) -> Option<Value> {
        let retriever = self.retriever.as_ref()?;
        match retriever.retrieve_commit(&ctx.owner, &ctx.repo, sha).await {
            Ok(commit) => commit,
            Err(e) => {
                warn!("Cannot get commit {sha} from GitHub: {e}");
                None
            }
        }
    }

    /// Distinct authors active in the `months_back` months up to `at`.
    async fn main_team(&self, ctx: &RunContext, at: DateTime<Utc>) -> ExtractResult<Vec<String>> {
        let months = u32::try_from(self.months_back.max(0)).unwrap_or(u32::MAX);
        let from = at.checked_sub_months(Months::new(months)).unwrap_or(at);
        let team = self.db.main_team(&ctx.owner, &ctx.repo, from, at).await?;
        debug!(
            "Fetched main team for {} ({} months): {team:?}",
            ctx.project_name(),
            self.months_back
        );
        Ok(team)
    }

    /// Test cases added and removed relative to the first parent.
    async fn test_diff(&self, ctx: &RunContext, sha: &str) -> TestDiff {
        let parent = match ctx.git.commit_info(sha).await {
            Ok(info) => info.parents.into_iter().next(),
            Err(e) => {
                warn!("Cannot diff tests for {sha}: {e}");
                return TestDiff::default();
            }
        };
        git_or_default(
            sha,
            "test diff",
            ctx.git.diff_test_counts(parent.as_deref(), sha, ctx.profile).await,
        )
    }
}

fn git_or_default<T: Default>(sha: &str, what: &str, result: GitResult<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!("Cannot compute {what} for commit {sha}: {e}");
        T::default()
    })
}
