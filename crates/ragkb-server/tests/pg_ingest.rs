//! Derived-table loading and the ingestion pipeline against Postgres
//!
//! Knowledge bases are created fresh per test, so `kb_<id>` schemas never
//! collide between runs.

#[macro_use]
mod common;

use std::sync::Arc;
use std::time::Duration;

use ragkb_common::{EmbeddingStatus, FileType, IngestionJob, PROCESS_DOCUMENT_KIND};
use ragkb_server::documents::{DocumentRepository, NewDocument, PgDocumentRepository};
use ragkb_server::ingest::identifiers::column_names;
use ragkb_server::ingest::tables::{iter_rows, RowSource};
use ragkb_server::ingest::{
    IngestConfig, IngestError, IngestionPipeline, PgTableStore, SafeIdent, StrategyRegistry,
    TableLoad, TableStore,
};
use ragkb_server::queue::{JobContext, JobHandler};
use ragkb_server::storage::{document_key, LocalObjectStore, ObjectStore};
use sqlx::PgPool;

fn rows(rows: &[&[&str]]) -> RowSource {
    let owned: Vec<Vec<String>> = rows
        .iter()
        .map(|r| r.iter().map(|v| v.to_string()).collect())
        .collect();
    iter_rows(owned.into_iter().map(Ok))
}

fn load_for(knowledge_base_id: i64, document_id: i64, comment: Option<&str>) -> TableLoad {
    TableLoad {
        schema: SafeIdent::schema_for(knowledge_base_id).unwrap(),
        table: SafeIdent::table_for(document_id).unwrap(),
        columns: column_names(&["name", "Name", ""]),
        comment: comment.map(str::to_string),
    }
}

async fn count(pool: &PgPool, load: &TableLoad) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", load.qualified_name()))
        .fetch_one(pool)
        .await
        .unwrap();
    n
}

async fn new_document(
    documents: &PgDocumentRepository,
    knowledge_base_id: i64,
    file_type: FileType,
    object_key: &str,
    status: EmbeddingStatus,
) -> ragkb_server::documents::Document {
    documents
        .create(&NewDocument {
            knowledge_base_id,
            user_id: 1,
            name: "people.csv".to_string(),
            file_type,
            description: "people it's about".to_string(),
            bucket: "documents".to_string(),
            object_key: object_key.to_string(),
            status,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_load_replaces_rows_on_redelivery() {
    let pool = require_db!();
    let kb = common::create_knowledge_base(&pool, 1).await;
    let store = PgTableStore::new(pool.clone());
    let load = load_for(kb, 1, Some("it's a comment"));

    let report = store
        .load_table(&load, rows(&[&["ada", "a", "x"], &["grace", "g", "y"]]))
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(count(&pool, &load).await, 2);

    let report = store.load_table(&load, rows(&[&["alan", "t", "z"]])).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(count(&pool, &load).await, 1);

    // Row ids restart with each load.
    let (row_id,): (i64,) =
        sqlx::query_as(&format!("SELECT _row_id FROM {}", load.qualified_name()))
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(row_id, 1);

    let (comment,): (Option<String>,) =
        sqlx::query_as("SELECT obj_description(to_regclass($1), 'pg_class')")
            .bind(load.qualified_name())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(comment.as_deref(), Some("it's a comment"));
}

#[tokio::test]
async fn test_deduplicated_columns_exist() {
    let pool = require_db!();
    let kb = common::create_knowledge_base(&pool, 1).await;
    let load = load_for(kb, 2, None);
    PgTableStore::new(pool.clone())
        .load_table(&load, rows(&[&["a", "b", "c"]]))
        .await
        .unwrap();

    let columns: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT column_name::text FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
        "#,
    )
    .bind(load.schema.as_str())
    .bind(load.table.as_str())
    .fetch_all(&pool)
    .await
    .unwrap();

    let names: Vec<String> = columns.into_iter().map(|(c,)| c).collect();
    assert_eq!(names, vec!["_row_id", "name", "Name", "column_3"]);
}

#[tokio::test]
async fn test_rejected_row_is_skipped() {
    let pool = require_db!();
    let kb = common::create_knowledge_base(&pool, 1).await;
    let load = load_for(kb, 3, None);

    let report = PgTableStore::new(pool.clone())
        .load_table(&load, rows(&[&["ok", "1", "2"], &["bad\0value", "1", "2"], &["ok", "3", "4"]]))
        .await
        .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(count(&pool, &load).await, 2);
}

#[tokio::test]
async fn test_malformed_source_rolls_back() {
    let pool = require_db!();
    let kb = common::create_knowledge_base(&pool, 1).await;
    let load = load_for(kb, 4, None);
    let store = PgTableStore::new(pool.clone());

    store.load_table(&load, rows(&[&["keep", "1", "2"]])).await.unwrap();

    let broken = iter_rows(
        vec![
            Ok(vec!["new".to_string(), "1".to_string(), "2".to_string()]),
            Err(IngestError::MalformedCsv("record 2 has 1 field".to_string())),
        ]
        .into_iter(),
    );
    let err = store.load_table(&load, broken).await.unwrap_err();
    assert!(matches!(err, IngestError::MalformedCsv(_)));

    let (name,): (String,) =
        sqlx::query_as(&format!("SELECT name FROM {}", load.qualified_name()))
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "keep");
}

#[tokio::test]
async fn test_compare_and_set_and_stale_listing() {
    let pool = require_db!();
    let kb = common::create_knowledge_base(&pool, 9).await;
    let documents = PgDocumentRepository::new(pool.clone());

    assert_eq!(documents.knowledge_base_owner(kb).await.unwrap(), Some(9));

    let doc = new_document(&documents, kb, FileType::Csv, "kb/x.csv", EmbeddingStatus::Pending).await;

    assert!(!documents
        .compare_and_set_status(doc.id, EmbeddingStatus::Processing, EmbeddingStatus::Processed)
        .await
        .unwrap());
    assert!(documents
        .compare_and_set_status(doc.id, EmbeddingStatus::Pending, EmbeddingStatus::Processing)
        .await
        .unwrap());

    sqlx::query("UPDATE documents SET updated_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(doc.id)
        .execute(&pool)
        .await
        .unwrap();

    let stale = documents
        .list_stale(&[EmbeddingStatus::Processing], Duration::from_secs(600), 10_000)
        .await
        .unwrap();
    assert!(stale.iter().any(|d| d.id == doc.id));

    let fresh = documents
        .list_stale(&[EmbeddingStatus::Processing], Duration::from_secs(7200), 10_000)
        .await
        .unwrap();
    assert!(!fresh.iter().any(|d| d.id == doc.id));
}

#[tokio::test]
async fn test_pipeline_loads_csv_and_settles_document() {
    let pool = require_db!();
    let dir = tempfile::tempdir().unwrap();
    let kb = common::create_knowledge_base(&pool, 1).await;

    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()).await.unwrap());
    let documents = Arc::new(PgDocumentRepository::new(pool.clone()));
    let tables = Arc::new(PgTableStore::new(pool.clone()));

    let key = document_key(kb, "people.csv");
    store.ensure_bucket("documents").await.unwrap();
    store
        .put("documents", &key, b"name,age\nada,36\ngrace,45\n".to_vec(), Some("text/csv"))
        .await
        .unwrap();
    let doc = new_document(&documents, kb, FileType::Csv, &key, EmbeddingStatus::Processing).await;

    let strategies = StrategyRegistry::standard(store.clone(), tables, &IngestConfig::default());
    let pipeline = IngestionPipeline::new(store, documents.clone(), strategies);

    let job = IngestionJob {
        knowledge_base_id: kb,
        document_id: doc.id,
        description: doc.description.clone(),
        bucket: doc.bucket.clone(),
        object_name: key,
        file_type: "csv".to_string(),
    };
    let ctx = JobContext {
        job_id: uuid::Uuid::new_v4(),
        kind: PROCESS_DOCUMENT_KIND.to_string(),
        attempt: 1,
        max_attempts: 3,
    };

    pipeline.handle(&ctx, &job.to_payload().unwrap()).await.unwrap();
    // Redelivery is harmless.
    pipeline.handle(&ctx, &job.to_payload().unwrap()).await.unwrap();

    let settled = documents.get(doc.id).await.unwrap().unwrap();
    assert_eq!(settled.status().unwrap(), EmbeddingStatus::Processed);

    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM kb_{}.doc_{}", kb, doc.id))
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(n, 2);
}

async fn run_pipeline(pool: &PgPool, kb: i64, file_name: &str, body: Option<&[u8]>) -> (i64, EmbeddingStatus) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()).await.unwrap());
    let documents = Arc::new(PgDocumentRepository::new(pool.clone()));
    let tables = Arc::new(PgTableStore::new(pool.clone()));

    let key = document_key(kb, file_name);
    store.ensure_bucket("documents").await.unwrap();
    if let Some(body) = body {
        store.put("documents", &key, body.to_vec(), None).await.unwrap();
    }
    let doc = new_document(&documents, kb, FileType::Csv, &key, EmbeddingStatus::Processing).await;

    let pipeline = IngestionPipeline::new(
        store.clone(),
        documents.clone(),
        StrategyRegistry::standard(store, tables, &IngestConfig::default()),
    );
    let job = IngestionJob {
        knowledge_base_id: kb,
        document_id: doc.id,
        description: String::new(),
        bucket: "documents".to_string(),
        object_name: key,
        file_type: "csv".to_string(),
    };
    let ctx = JobContext {
        job_id: uuid::Uuid::new_v4(),
        kind: PROCESS_DOCUMENT_KIND.to_string(),
        attempt: 1,
        max_attempts: 3,
    };
    pipeline.handle(&ctx, &job.to_payload().unwrap()).await.unwrap();

    let status = documents.get(doc.id).await.unwrap().unwrap().status().unwrap();
    (doc.id, status)
}

#[tokio::test]
async fn test_quoted_header_and_embedded_comma_round_trip() {
    let pool = require_db!();
    let kb = common::create_knowledge_base(&pool, 1).await;

    let csv = b"name,\"a\"\"ge\"\nAlice,30\nBob,\"x,y\"\n";
    let (doc_id, status) = run_pipeline(&pool, kb, "people.csv", Some(csv)).await;
    assert_eq!(status, EmbeddingStatus::Processed);

    let rows: Vec<(String, String)> = sqlx::query_as(&format!(
        "SELECT name, \"a\"\"ge\" FROM kb_{}.doc_{} ORDER BY _row_id",
        kb, doc_id
    ))
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(
        rows,
        vec![
            ("Alice".to_string(), "30".to_string()),
            ("Bob".to_string(), "x,y".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_missing_object_creates_nothing() {
    let pool = require_db!();
    let kb = common::create_knowledge_base(&pool, 1).await;

    let (_, status) = run_pipeline(&pool, kb, "gone.csv", None).await;
    assert_eq!(status, EmbeddingStatus::Failed);

    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
    )
    .bind(format!("kb_{}", kb))
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!exists);
}
