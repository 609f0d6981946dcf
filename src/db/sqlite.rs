use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};

use super::{
    CommitRow, DbError, DbResult, Project, ProjectDatabase, PullRequestLink, WorkflowRow,
    WorkflowRunRow,
};

/// Tables the pipeline reads, GHTorrent column names, timestamps as unix seconds.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        name TEXT,
        email TEXT,
        company TEXT,
        type TEXT NOT NULL DEFAULT 'USR',
        fake INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT,
        owner_id INTEGER NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        description TEXT,
        language TEXT,
        forked_from INTEGER,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS commits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sha TEXT NOT NULL UNIQUE,
        author_id INTEGER REFERENCES users(id),
        committer_id INTEGER REFERENCES users(id),
        project_id INTEGER REFERENCES projects(id),
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS project_commits (
        project_id INTEGER NOT NULL REFERENCES projects(id),
        commit_id INTEGER NOT NULL REFERENCES commits(id),
        PRIMARY KEY (project_id, commit_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS pull_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        head_repo_id INTEGER,
        base_repo_id INTEGER NOT NULL REFERENCES projects(id),
        head_commit_id INTEGER,
        base_commit_id INTEGER,
        pullreq_id INTEGER NOT NULL,
        intra_branch INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS pull_request_commits (
        pull_request_id INTEGER NOT NULL REFERENCES pull_requests(id),
        commit_id INTEGER NOT NULL REFERENCES commits(id),
        PRIMARY KEY (pull_request_id, commit_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS pull_request_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pull_request_id INTEGER NOT NULL REFERENCES pull_requests(id),
        created_at INTEGER NOT NULL,
        action TEXT NOT NULL,
        actor_id INTEGER
    )"#,
    r#"CREATE TABLE IF NOT EXISTS pull_request_comments (
        pull_request_id INTEGER NOT NULL REFERENCES pull_requests(id),
        user_id INTEGER,
        comment_id INTEGER NOT NULL,
        position INTEGER,
        body TEXT,
        commit_id INTEGER,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS issues (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id INTEGER REFERENCES projects(id),
        reporter_id INTEGER,
        assignee_id INTEGER,
        pull_request INTEGER NOT NULL DEFAULT 0,
        pull_request_id INTEGER,
        created_at INTEGER NOT NULL,
        issue_id INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS issue_comments (
        issue_id INTEGER NOT NULL REFERENCES issues(id),
        user_id INTEGER,
        comment_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS commit_comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        commit_id INTEGER NOT NULL REFERENCES commits(id),
        user_id INTEGER,
        body TEXT,
        line INTEGER,
        position INTEGER,
        comment_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS workflows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        github_id INTEGER NOT NULL UNIQUE,
        name TEXT NOT NULL,
        path TEXT NOT NULL,
        state TEXT NOT NULL,
        project_id INTEGER NOT NULL REFERENCES projects(id),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS workflow_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        github_id INTEGER NOT NULL UNIQUE,
        workflow_id INTEGER NOT NULL REFERENCES workflows(id),
        project_id INTEGER NOT NULL REFERENCES projects(id),
        name TEXT,
        head_branch TEXT,
        head_sha TEXT NOT NULL,
        run_number INTEGER NOT NULL,
        status TEXT,
        conclusion TEXT,
        event TEXT,
        created_at INTEGER NOT NULL,
        run_started_at INTEGER,
        updated_at INTEGER NOT NULL,
        actor_login TEXT,
        triggering_actor_login TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_workflow_runs_project ON workflow_runs (project_id)",
    "CREATE INDEX IF NOT EXISTS idx_workflow_runs_head_sha ON workflow_runs (head_sha)",
];

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

pub struct SqliteProjectDb {
    pool: SqlitePool,
}

impl SqliteProjectDb {
    pub async fn connect(url: &str) -> DbResult<Self> {
        if !url.starts_with("sqlite:") {
            return Err(DbError::InvalidUrl(url.to_string()));
        }
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create missing tables.
    pub async fn migrate(&self) -> DbResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn run_from_row(row: &SqliteRow) -> DbResult<WorkflowRunRow> {
    Ok(WorkflowRunRow {
        github_id: row.try_get("github_id")?,
        workflow_id: row.try_get("workflow_id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        head_branch: row.try_get("head_branch")?,
        head_sha: row.try_get("head_sha")?,
        run_number: row.try_get("run_number")?,
        status: row.try_get("status")?,
        conclusion: row.try_get("conclusion")?,
        event: row.try_get("event")?,
        created_at: ts(row.try_get("created_at")?),
        run_started_at: row.try_get::<Option<i64>, _>("run_started_at")?.map(ts),
        updated_at: ts(row.try_get("updated_at")?),
        actor_login: row.try_get("actor_login")?,
        triggering_actor_login: row.try_get("triggering_actor_login")?,
    })
}

#[async_trait]
impl ProjectDatabase for SqliteProjectDb {
    async fn find_project(&self, owner: &str, repo: &str) -> DbResult<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.name, p.language, u.login
            FROM projects p
            JOIN users u ON u.id = p.owner_id
            WHERE u.login = ? AND p.name = ?
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(repo)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(Project {
                id: r.try_get("id")?,
                owner: r.try_get("login")?,
                name: r.try_get("name")?,
                language: r.try_get("language")?,
            })
        })
        .transpose()
    }

    async fn latest_workflow_runs(&self, project_id: i64) -> DbResult<Vec<WorkflowRunRow>> {
        let rows = sqlx::query(
            r#"
            SELECT wr.*
            FROM workflow_runs wr
            INNER JOIN (
                SELECT head_branch, head_sha, MAX(run_started_at) AS max_run_started_at
                FROM workflow_runs
                WHERE project_id = ?
                GROUP BY head_branch, head_sha
            ) latest ON wr.head_branch IS latest.head_branch
                    AND wr.head_sha = latest.head_sha
                    AND wr.run_started_at IS latest.max_run_started_at
            WHERE wr.project_id = ?
            ORDER BY wr.run_started_at, wr.github_id
            "#,
        )
        .bind(project_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn find_commit(&self, sha: &str) -> DbResult<Option<CommitRow>> {
        let row = sqlx::query(
            "SELECT id, sha, author_id, committer_id, created_at FROM commits WHERE sha = ? LIMIT 1",
        )
        .bind(sha)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(CommitRow {
                id: r.try_get("id")?,
                sha: r.try_get("sha")?,
                author_id: r.try_get("author_id")?,
                committer_id: r.try_get("committer_id")?,
                created_at: ts(r.try_get("created_at")?),
            })
        })
        .transpose()
    }

    async fn login_by_email(&self, email: &str) -> DbResult<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT login FROM users WHERE email = ? AND fake = 0 LIMIT 1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn login_by_id(&self, user_id: i64) -> DbResult<Option<String>> {
        let login: Option<String> =
            sqlx::query_scalar("SELECT login FROM users WHERE id = ? AND fake = 0")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        debug!(
            "Queried login for author_id {user_id}: {}",
            login.as_deref().unwrap_or("not found")
        );
        Ok(login)
    }

    async fn main_team(
        &self,
        owner: &str,
        repo: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<String>> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT DISTINCT u1.login
            FROM commits c
            JOIN project_commits pc ON pc.commit_id = c.id
            JOIN projects p ON p.id = pc.project_id
            JOIN users u ON u.id = p.owner_id
            JOIN users u1 ON u1.id = c.author_id
            WHERE u.login = ?
              AND p.name = ?
              AND c.created_at BETWEEN ? AND ?
              AND u1.fake = 0
            ORDER BY u1.login
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await?)
    }

    async fn pr_info_for_commit(&self, sha: &str, project_id: i64) -> DbResult<Option<PullRequestLink>> {
        let row = sqlx::query(
            r#"
            SELECT pr.id AS pr_id, prh.created_at
            FROM pull_request_commits prc
            JOIN commits c ON c.id = prc.commit_id
            JOIN pull_requests pr ON pr.id = prc.pull_request_id
            JOIN pull_request_history prh ON prh.pull_request_id = pr.id
            WHERE c.sha = ?
              AND pr.base_repo_id = ?
              AND prh.action = 'opened'
            LIMIT 1
            "#,
        )
        .bind(sha)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(PullRequestLink {
                pr_id: r.try_get("pr_id")?,
                created_at: ts(r.try_get("created_at")?),
            })
        })
        .transpose()
    }

    async fn num_pr_comments(&self, pr_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM pull_request_comments prc
            WHERE prc.pull_request_id = ?
              AND prc.created_at BETWEEN ? AND ?
            "#,
        )
        .bind(pr_id)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_one(&self.pool)
        .await?)
    }

    async fn num_issue_comments(&self, pr_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM pull_requests pr
            JOIN issues i ON i.issue_id = pr.pullreq_id AND i.repo_id = pr.base_repo_id
            JOIN issue_comments ic ON ic.issue_id = i.id
            WHERE pr.id = ?
              AND ic.created_at BETWEEN ? AND ?
            "#,
        )
        .bind(pr_id)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_one(&self.pool)
        .await?)
    }

    async fn num_commit_comments(&self, owner: &str, repo: &str, sha: &str) -> DbResult<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM project_commits pc
            JOIN projects p ON p.id = pc.project_id
            JOIN users u ON u.id = p.owner_id
            JOIN commit_comments cc ON cc.commit_id = pc.commit_id
            JOIN commits c ON c.id = pc.commit_id
            WHERE u.login = ?
              AND p.name = ?
              AND c.sha = ?
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(sha)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn upsert_workflow(&self, workflow: &WorkflowRow) -> DbResult<i64> {
        sqlx::query(
            r#"
            INSERT INTO workflows (github_id, name, path, state, project_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(github_id) DO UPDATE SET
                name = excluded.name,
                path = excluded.path,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(workflow.github_id)
        .bind(&workflow.name)
        .bind(&workflow.path)
        .bind(&workflow.state)
        .bind(workflow.project_id)
        .bind(workflow.created_at.timestamp())
        .bind(workflow.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(sqlx::query_scalar("SELECT id FROM workflows WHERE github_id = ?")
            .bind(workflow.github_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn workflow_id_by_github_id(&self, github_id: i64) -> DbResult<Option<i64>> {
        Ok(sqlx::query_scalar("SELECT id FROM workflows WHERE github_id = ?")
            .bind(github_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn upsert_workflow_run(&self, run: &WorkflowRunRow) -> DbResult<i64> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (
                github_id, workflow_id, project_id, name, head_branch, head_sha, run_number,
                status, conclusion, event, created_at, run_started_at, updated_at,
                actor_login, triggering_actor_login
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(github_id) DO UPDATE SET
                status = excluded.status,
                conclusion = excluded.conclusion,
                run_started_at = excluded.run_started_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(run.github_id)
        .bind(run.workflow_id)
        .bind(run.project_id)
        .bind(&run.name)
        .bind(&run.head_branch)
        .bind(&run.head_sha)
        .bind(run.run_number)
        .bind(&run.status)
        .bind(&run.conclusion)
        .bind(&run.event)
        .bind(run.created_at.timestamp())
        .bind(run.run_started_at.map(|t| t.timestamp()))
        .bind(run.updated_at.timestamp())
        .bind(&run.actor_login)
        .bind(&run.triggering_actor_login)
        .execute(&self.pool)
        .await?;

        Ok(sqlx::query_scalar("SELECT id FROM workflow_runs WHERE github_id = ?")
            .bind(run.github_id)
            .fetch_one(&self.pool)
            .await?)
    }
}
