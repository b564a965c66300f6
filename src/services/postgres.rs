//! # PostgreSQL Collaborators
//!
//! `sqlx` implementations of the repository, raw-SQL and content-processing
//! ports. Row payloads travel as JSONB and are expanded server-side with
//! `jsonb_populate_recordset`, so the table definitions stay the database's
//! concern.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::ports::{
    ContentProcessor, DocumentIndexRepository, DocumentListRepository, DownloadedDocument,
    SqlExecutor,
};

const DOCUMENT_LIST_TABLE: &str = "document_list";

/// Table names are interpolated, never bound; only plain identifiers pass
pub fn validate_identifier(name: &str) -> PipelineResult<&str> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && name.len() <= 63 {
        Ok(name)
    } else {
        Err(PipelineError::invalid_payload(format!(
            "invalid table identifier: {name:?}"
        )))
    }
}

/// Wrap a SELECT so the whole result set comes back as one JSON array
fn json_rows_query(select: &str) -> String {
    let select = select.trim().trim_end_matches(';').trim_end();
    format!("SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json) FROM ({select}) q")
}

/// Insert JSON rows into `table`. New rows skip conflicts; otherwise rows
/// sharing an `id` are replaced.
async fn upsert_json_rows(
    pool: &PgPool,
    table: &str,
    rows: Vec<Value>,
    is_new: bool,
) -> PipelineResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let table = validate_identifier(table)?;
    let payload = Value::Array(rows);
    let mut tx = pool.begin().await?;

    if !is_new {
        let delete = format!(
            "DELETE FROM \"{table}\" WHERE id IN \
             (SELECT id FROM jsonb_populate_recordset(NULL::\"{table}\", $1))"
        );
        sqlx::query(&delete)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;
    }

    let insert = format!(
        "INSERT INTO \"{table}\" \
         SELECT * FROM jsonb_populate_recordset(NULL::\"{table}\", $1) \
         ON CONFLICT DO NOTHING"
    );
    let inserted = sqlx::query(&insert)
        .bind(&payload)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(inserted)
}

#[derive(Debug, Clone)]
pub struct PgSqlExecutor {
    pool: PgPool,
}

impl PgSqlExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgSqlExecutor {
    async fn query(&self, sql: &str) -> PipelineResult<Vec<Value>> {
        let rows = sqlx::query_scalar::<_, Value>(&json_rows_query(sql))
            .fetch_one(&self.pool)
            .await?;

        match rows {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(PipelineError::persistence(
                "query",
                format!("expected a JSON array of rows, got {other}"),
            )),
        }
    }

    async fn execute(&self, sql: &str) -> PipelineResult<u64> {
        Ok(sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct PgDocumentIndexRepository {
    pool: PgPool,
}

impl PgDocumentIndexRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentIndexRepository for PgDocumentIndexRepository {
    async fn update_status(&self, id: i64, processed: bool) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE document_index SET status = $1 WHERE id = $2")
            .bind(processed)
            .bind(id)
            .execute(&self.pool)
            .await?;

        debug!(
            document_id = id,
            processed = processed,
            rows = result.rows_affected(),
            "Document index status updated"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgDocumentListRepository {
    pool: PgPool,
}

impl PgDocumentListRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentListRepository for PgDocumentListRepository {
    async fn execute_sql(&self, statements: &str) -> PipelineResult<()> {
        // A multi-statement simple query runs as one implicit transaction
        let result = sqlx::raw_sql(statements).execute(&self.pool).await?;
        debug!(rows = result.rows_affected(), "Statement batch executed");
        Ok(())
    }

    async fn insert_or_update(
        &self,
        rows: Vec<Value>,
        tag_path: &str,
        is_new: bool,
    ) -> PipelineResult<u64> {
        let row_count = rows.len();
        let written = upsert_json_rows(&self.pool, DOCUMENT_LIST_TABLE, rows, is_new).await?;

        info!(
            tag_path = %tag_path,
            rows = row_count,
            written = written,
            is_new = is_new,
            "🗂️ Document list synchronized"
        );
        Ok(written)
    }
}

/// Loads a downloaded JSON array of filings into its year partition table
#[derive(Debug, Clone)]
pub struct PgContentProcessor {
    pool: PgPool,
}

impl PgContentProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentProcessor for PgContentProcessor {
    async fn process(
        &self,
        document: &DownloadedDocument,
        partition_key: &str,
        is_new: bool,
    ) -> PipelineResult<u64> {
        let table = validate_identifier(partition_key)?;
        let content = tokio::fs::read_to_string(&document.path)
            .await
            .map_err(|e| {
                PipelineError::file_access(document.path.display().to_string(), e.to_string())
            })?;

        let rows = match serde_json::from_str::<Value>(&content)? {
            Value::Array(rows) => rows,
            _ => {
                return Err(PipelineError::invalid_payload(format!(
                    "{} is not a JSON array of filings",
                    document.source_url
                )))
            }
        };

        let written = upsert_json_rows(&self.pool, table, rows, is_new).await?;
        info!(
            partition_key = %table,
            source_url = %document.source_url,
            written = written,
            "Filings content loaded"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("Filings2021").is_ok());
        assert!(validate_identifier("document_list").is_ok());
        assert!(validate_identifier("2021Filings").is_err());
        assert!(validate_identifier("Filings\"; DROP TABLE x; --").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_json_rows_query_strips_terminator() {
        assert_eq!(
            json_rows_query("SELECT id FROM document_list;\n"),
            "SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json) FROM (SELECT id FROM document_list) q"
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_execute_sql_batch_is_all_or_nothing() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        let table = format!("batch_exec_{}", uuid::Uuid::new_v4().simple());
        sqlx::raw_sql(&format!("CREATE TABLE {table} (id INT)"))
            .execute(&pool)
            .await
            .unwrap();

        let repository = PgDocumentListRepository::new(pool.clone());
        repository
            .execute_sql(&format!(
                "INSERT INTO {table} VALUES (1); INSERT INTO {table} VALUES (2);"
            ))
            .await
            .unwrap();
        let failed = repository
            .execute_sql(&format!("INSERT INTO {table} VALUES (3); SELECT 1/0;"))
            .await;

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap();
        sqlx::raw_sql(&format!("DROP TABLE {table}"))
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(failed, Err(PipelineError::Persistence { .. })));
        assert_eq!(count, 2);
    }
}
