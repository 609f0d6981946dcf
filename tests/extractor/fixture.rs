//! A small JavaScript repository, its project database rows and stored diff.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ci_harvest::db::{ProjectDatabase, WorkflowRow, WorkflowRunRow};
use ci_harvest::store::MemoryDocumentStore;
use ci_harvest::store::collections::COMMITS;
use ci_harvest::{BuildMetricsExtractor, GitHistoryWalker, ResourceRepository, SqliteProjectDb};
use serde_json::json;
use tempfile::TempDir;

pub const PROJECT_ID: i64 = 3;

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str], date: &str) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=Dev One", "-c", "user.email=dev@example.com"])
        .args(args)
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn write(dir: &Path, path: &str, text: &str) {
    let file = dir.join(path);
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(file, text).unwrap();
}

pub struct Fixture {
    pub dir: TempDir,
    pub head: String,
    pub parent: String,
    pub head_time: DateTime<Utc>,
    pub db: Arc<SqliteProjectDb>,
    pub docs: ResourceRepository,
}

impl Fixture {
    /// Origin repository `o/r` with two commits; the second adds a test case.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin").join("o").join("r.git");
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "--quiet"], "2023-12-01 00:00:00 +0000");

        write(&origin, "src/app.js", "// entry point\nfunction a() {\n  return 1;\n}\nmodule.exports = a;\n");
        write(
            &origin,
            "test/app.test.js",
            "const a = require('../src/app');\nit('returns one', () => {\n  expect(a()).toBe(1);\n});\n",
        );
        write(&origin, "README.md", "# r\n");
        git(&origin, &["add", "."], "2023-12-01 00:00:00 +0000");
        git(&origin, &["commit", "--quiet", "-m", "initial"], "2023-12-01 00:00:00 +0000");
        let parent = git(&origin, &["rev-parse", "HEAD"], "2023-12-01 00:00:00 +0000");

        write(
            &origin,
            "src/app.js",
            "// entry point\nfunction a() {\n  return 1;\n}\nfunction b() {\n  return 2;\n}\nmodule.exports = { a, b };\n",
        );
        write(
            &origin,
            "test/app.test.js",
            "const { a, b } = require('../src/app');\nit('returns one', () => {\n  expect(a()).toBe(1);\n});\nit('returns two', () => {\n  expect(b()).toBe(2);\n});\n",
        );
        git(&origin, &["add", "."], "2023-12-15 00:00:00 +0000");
        git(&origin, &["commit", "--quiet", "-m", "add b"], "2023-12-15 00:00:00 +0000");
        let head = git(&origin, &["rev-parse", "HEAD"], "2023-12-15 00:00:00 +0000");
        let head_time = DateTime::parse_from_rfc3339("2023-12-15T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let db = SqliteProjectDb::connect("sqlite::memory:").await.unwrap();
        for statement in [
            "INSERT INTO users (id, login) VALUES (9, 'o')".to_string(),
            "INSERT INTO users (id, login, email) VALUES (10, 'dev', 'dev@example.com')".to_string(),
            format!("INSERT INTO projects (id, owner_id, name, language) VALUES ({PROJECT_ID}, 9, 'r', 'JavaScript')"),
            format!(
                "INSERT INTO commits (id, sha, author_id, committer_id, project_id, created_at) VALUES (1, '{head}', 10, 10, {PROJECT_ID}, {})",
                head_time.timestamp()
            ),
            format!("INSERT INTO project_commits (project_id, commit_id) VALUES ({PROJECT_ID}, 1)"),
        ] {
            sqlx::query(&statement).execute(db.pool()).await.unwrap();
        }

        let docs = ResourceRepository::new(Arc::new(MemoryDocumentStore::new()));
        docs.store(
            COMMITS,
            &json!({
                "sha": head,
                "parents": [{"sha": parent}],
                "files": [
                    {"filename": "src/app.js", "status": "modified", "patch": "@@ -2,4 +2,7 @@\n+function b() {\n+  return 2;\n+}\n-module.exports = a;\n+module.exports = { a, b };"},
                    {"filename": "test/app.test.js", "status": "modified", "patch": "@@ -1,4 +1,7 @@\n+it('returns two', () => {\n+  expect(b()).toBe(2);\n+});"},
                ],
            }),
        )
        .await
        .unwrap();

        Self {
            dir,
            head,
            parent,
            head_time,
            db: Arc::new(db),
            docs,
        }
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.dir.path().join("repos")
    }

    /// Walker cloning from the fixture's `origin` directory.
    pub fn walker(&self) -> GitHistoryWalker {
        GitHistoryWalker::new(
            self.repos_dir(),
            self.dir.path().join("origin").to_string_lossy().into_owned(),
        )
    }

    pub fn extractor(&self) -> BuildMetricsExtractor {
        let db: Arc<dyn ProjectDatabase> = self.db.clone();
        BuildMetricsExtractor::new(db, self.docs.clone(), self.walker()).threads(2)
    }

    /// Workflow 11 with one run per `(github_id, branch, sha, seconds)`.
    pub async fn add_runs(&self, runs: &[(i64, &str, &str, i64, Option<&str>)]) {
        let started = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let workflow_id = self
            .db
            .upsert_workflow(&WorkflowRow {
                github_id: 11,
                project_id: PROJECT_ID,
                name: "CI".to_string(),
                path: ".github/workflows/ci.yml".to_string(),
                state: "active".to_string(),
                created_at: started,
                updated_at: started,
            })
            .await
            .unwrap();

        for (github_id, branch, sha, seconds, conclusion) in runs {
            self.db
                .upsert_workflow_run(&WorkflowRunRow {
                    github_id: *github_id,
                    workflow_id,
                    project_id: PROJECT_ID,
                    name: Some("CI".to_string()),
                    head_branch: Some((*branch).to_string()),
                    head_sha: (*sha).to_string(),
                    run_number: *github_id,
                    status: Some("completed".to_string()),
                    conclusion: conclusion.map(str::to_string),
                    event: Some("push".to_string()),
                    created_at: started,
                    run_started_at: Some(started + Duration::seconds(*github_id)),
                    updated_at: started + Duration::seconds(*github_id + seconds),
                    actor_login: Some("dev".to_string()),
                    triggering_actor_login: None,
                })
                .await
                .unwrap();
        }
    }
}
