//! SQLite-backed [`DocumentStore`].
//!
//! All collections share one `documents` table; selectors are evaluated
//! with `json_extract` so integer `5` and string `"5"` never compare equal.

use std::str::FromStr;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, query::Query};

use super::{Document, DocumentStore, Selector, StoreResult, merge_fields};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Connect and create the schema if missing.
    ///
    /// In-memory URLs get a single connection so every query sees the same database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn first_match(
        &self,
        conn: &mut sqlx::SqliteConnection,
        collection: &str,
        selector: &Selector,
    ) -> StoreResult<Option<Document>> {
        let sql = format!("{} LIMIT 1", select_sql(selector));
        let row = bind_selector(sqlx::query(&sql).bind(collection), selector)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| row_to_document(&r)).transpose()
    }
}

fn select_sql(selector: &Selector) -> String {
    let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?");
    for (_, value) in selector.fields() {
        sql.push_str(" AND ");
        sql.push_str(match value {
            Value::Null => "json_extract(body, ?) IS NULL",
            Value::Bool(_) => "json_type(body, ?) = ?",
            Value::Array(_) | Value::Object(_) => "json_extract(body, ?) = json(?)",
            _ => "json_extract(body, ?) = ?",
        });
    }
    sql.push_str(" ORDER BY id");
    sql
}

fn bind_selector<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    selector: &Selector,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for (path, value) in selector.fields() {
        query = query.bind(format!("$.{path}"));
        query = match value {
            Value::Null => query,
            Value::Bool(b) => query.bind(if *b { "true" } else { "false" }),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => query.bind(i),
                (None, Some(f)) => query.bind(f),
                (None, None) => query.bind(n.to_string()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Document> {
    let id: i64 = row.try_get("id")?;
    let body: String = row.try_get("body")?;
    Ok(Document {
        id,
        body: serde_json::from_str(&body)?,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find(&self, collection: &str, selector: &Selector) -> StoreResult<Vec<Document>> {
        let sql = select_sql(selector);
        let rows = bind_selector(sqlx::query(&sql).bind(collection), selector)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn store(&self, collection: &str, doc: &Value) -> StoreResult<i64> {
        let body = serde_json::to_string(doc)?;
        let result = sqlx::query("INSERT INTO documents (collection, body) VALUES (?, ?)")
            .bind(collection)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn upsert(&self, collection: &str, selector: &Selector, doc: &Value) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;
        let id = match self.first_match(&mut *tx, collection, selector).await? {
            Some(mut existing) => {
                merge_fields(&mut existing.body, doc);
                sqlx::query("UPDATE documents SET body = ? WHERE id = ?")
                    .bind(serde_json::to_string(&existing.body)?)
                    .bind(existing.id)
                    .execute(&mut *tx)
                    .await?;
                debug!("Updated {collection} document {}", existing.id);
                existing.id
            }
            None => sqlx::query("INSERT INTO documents (collection, body) VALUES (?, ?)")
                .bind(collection)
                .bind(serde_json::to_string(doc)?)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid(),
        };
        tx.commit().await?;
        Ok(id)
    }

    async fn count(&self, collection: &str, selector: &Selector) -> StoreResult<usize> {
        let sql = format!("SELECT COUNT(*) AS n FROM ({})", select_sql(selector));
        let row = bind_selector(sqlx::query(&sql).bind(collection), selector)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}
