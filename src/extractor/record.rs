use serde::{Deserialize, Serialize};

use crate::store::Selector;

/// Build outcome as reported in `build_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutcome {
    Passed,
    Failed,
    Others,
}

impl BuildOutcome {
    /// `success` passes, `failure` fails, anything else (including no
    /// conclusion yet) is `others`.
    #[must_use]
    pub fn from_conclusion(conclusion: Option<&str>) -> Self {
        match conclusion {
            Some("success") => BuildOutcome::Passed,
            Some("failure") => BuildOutcome::Failed,
            _ => BuildOutcome::Others,
        }
    }
}

/// One row of `ci_builds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildMetricsRecord {
    pub git_branch: String,
    pub git_all_built_commits: String,
    pub git_num_all_built_commits: i64,
    pub git_trigger_commit: String,
    pub git_diff_src_churn: i64,
    pub git_diff_test_churn: i64,

    pub gh_project_name: String,
    pub gh_is_pr: bool,
    pub gh_lang: String,
    pub gh_team_size: i64,
    pub gh_num_issue_comments: i64,
    pub gh_num_pr_comments: i64,
    pub gh_num_commit_comments: i64,

    pub gh_diff_files_added: i64,
    pub gh_diff_files_deleted: i64,
    pub gh_diff_files_modified: i64,
    pub gh_diff_tests_added: i64,
    pub gh_diff_tests_deleted: i64,
    pub gh_diff_src_files: i64,
    pub gh_diff_doc_files: i64,
    pub gh_diff_other_files: i64,

    pub gh_num_commits_on_files_touched: i64,
    pub gh_sloc: i64,
    pub gh_test_lines_per_kloc: f64,
    pub gh_test_cases_per_kloc: f64,
    pub gh_asserts_cases_per_kloc: f64,
    pub gh_by_core_team_member: bool,
    pub gh_repo_age: f64,
    pub gh_repo_num_commits: i64,

    pub build_duration: i64,
    pub build_failed: BuildOutcome,
    /// `%m/%d/%Y %H:%M:%S`
    pub gh_build_started_at: String,
    pub github_run_id: i64,
}

impl BuildMetricsRecord {
    /// Upsert key: project, built commit, branch.
    pub fn key(&self) -> Selector {
        Selector::new()
            .eq("gh_project_name", self.gh_project_name.as_str())
            .eq("git_all_built_commits", self.git_all_built_commits.as_str())
            .eq("git_branch", self.git_branch.as_str())
    }
}

/// `count` per thousand source lines; 0 for an empty code base.
#[must_use]
pub fn per_kloc(count: i64, sloc: i64) -> f64 {
    if sloc <= 0 {
        return 0.0;
    }
    count as f64 * 1000.0 / sloc as f64
}
