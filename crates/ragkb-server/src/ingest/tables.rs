//! Derived table storage
//!
//! A tabular document becomes one table `kb_<id>.doc_<id>` with a `TEXT`
//! column per header. Each load replaces the table contents inside a single
//! transaction, so a redelivered job leaves exactly one copy of the rows.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument, warn};

use super::error::IngestError;
use super::identifiers::{comment_literal, ColumnName, SafeIdent, ROW_ID_COLUMN};

/// Rows to load, pulled one at a time in file order. An `Err` item aborts the
/// load.
#[async_trait]
pub trait RowStream: Send {
    async fn next_row(&mut self) -> Option<Result<Vec<String>, IngestError>>;
}

pub type RowSource = Box<dyn RowStream>;

/// Rows already in memory.
pub struct IterRows<I>(I);

pub fn iter_rows<I>(rows: I) -> RowSource
where
    I: Iterator<Item = Result<Vec<String>, IngestError>> + Send + 'static,
{
    Box::new(IterRows(rows))
}

#[async_trait]
impl<I> RowStream for IterRows<I>
where
    I: Iterator<Item = Result<Vec<String>, IngestError>> + Send,
{
    async fn next_row(&mut self) -> Option<Result<Vec<String>, IngestError>> {
        self.0.next()
    }
}

/// Target of a table load.
#[derive(Debug, Clone)]
pub struct TableLoad {
    pub schema: SafeIdent,
    pub table: SafeIdent,
    pub columns: Vec<ColumnName>,
    /// Stored as the table comment when non-empty.
    pub comment: Option<String>,
}

impl TableLoad {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    fn create_sql(&self) -> String {
        let mut columns = vec![format!("\"{}\" BIGSERIAL PRIMARY KEY", ROW_ID_COLUMN)];
        columns.extend(self.columns.iter().map(|c| format!("{} TEXT", c.quoted())));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified_name(),
            columns.join(", ")
        )
    }

    fn insert_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| c.quoted()).collect();
        let params: Vec<String> = (1..=self.columns.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_name(),
            columns.join(", "),
            params.join(", ")
        )
    }
}

/// Row counts of a finished load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: u64,
    pub failed: u64,
}

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create the table if needed and replace its contents with `rows`.
    ///
    /// A row whose insert is rejected is skipped and counted in
    /// [`LoadReport::failed`]. Malformed input or a transient database error
    /// rolls the whole load back.
    async fn load_table(&self, load: &TableLoad, rows: RowSource) -> Result<LoadReport, IngestError>;
}

#[derive(Clone)]
pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn create_schema(&self, schema: &SafeIdent) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await?;
        advisory_lock(&mut tx, schema.as_str()).await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Serializes concurrent DDL on the same name until the transaction ends.
async fn advisory_lock(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(name)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl TableStore for PgTableStore {
    #[instrument(skip(self, load, rows), fields(table = %load.qualified_name(), columns = load.columns.len()))]
    async fn load_table(&self, load: &TableLoad, mut rows: RowSource) -> Result<LoadReport, IngestError> {
        self.create_schema(&load.schema).await?;

        let mut tx = self.pool.begin().await?;
        advisory_lock(&mut tx, &load.qualified_name()).await?;

        sqlx::query(&load.create_sql()).execute(&mut *tx).await?;

        if let Some(comment) = load.comment.as_deref().filter(|c| !c.is_empty()) {
            sqlx::query("SAVEPOINT table_comment").execute(&mut *tx).await?;
            let sql = format!(
                "COMMENT ON TABLE {} IS {}",
                load.qualified_name(),
                comment_literal(comment)
            );
            match sqlx::query(&sql).execute(&mut *tx).await {
                Ok(_) => {
                    sqlx::query("RELEASE SAVEPOINT table_comment").execute(&mut *tx).await?;
                },
                Err(e) if crate::db::is_transient(&e) => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "Failed to set table comment, continuing without it");
                    sqlx::query("ROLLBACK TO SAVEPOINT table_comment").execute(&mut *tx).await?;
                },
            }
        }

        sqlx::query(&format!("TRUNCATE {} RESTART IDENTITY", load.qualified_name()))
            .execute(&mut *tx)
            .await?;

        let insert = load.insert_sql();
        let mut report = LoadReport::default();

        let mut line = 1usize;
        while let Some(row) = rows.next_row().await {
            // dropping `tx` on the error path rolls the load back
            let row = row?;
            line += 1;

            sqlx::query("SAVEPOINT row_insert").execute(&mut *tx).await?;

            let mut query = sqlx::query(&insert);
            for value in &row {
                query = query.bind(value.as_str());
            }

            match query.execute(&mut *tx).await {
                Ok(_) => {
                    sqlx::query("RELEASE SAVEPOINT row_insert").execute(&mut *tx).await?;
                    report.inserted += 1;
                },
                Err(e) if crate::db::is_transient(&e) => return Err(e.into()),
                Err(e) => {
                    warn!(line, error = %e, "Skipping row that failed to insert");
                    sqlx::query("ROLLBACK TO SAVEPOINT row_insert").execute(&mut *tx).await?;
                    report.failed += 1;
                },
            }
        }

        tx.commit().await?;
        debug!(inserted = report.inserted, failed = report.failed, "Table load committed");
        Ok(report)
    }
}
