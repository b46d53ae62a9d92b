//! In-memory collaborators for unit tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::Utc;
use ragkb_common::EmbeddingStatus;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::db::{DbError, DbResult};
use crate::documents::{Document, DocumentRepository, NewDocument};
use crate::ingest::tables::{LoadReport, RowSource, TableLoad, TableStore};
use crate::ingest::IngestError;
use crate::queue::{
    Delivery, JobContext, JobError, JobHandler, JobId, JobQueue, JobStatus, NewJob, QueueError,
    QueueResult, ReapOutcome,
};
use crate::storage::{ObjectInfo, ObjectReader, ObjectStore, StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub id: JobId,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub dedup_key: Option<String>,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: Instant,
    pub last_error: Option<String>,
    pub last_retry_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<MemoryJob>>,
    unavailable: AtomicBool,
}

impl MemoryJobQueue {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<MemoryJob> {
        self.jobs.lock().unwrap().clone()
    }

    fn find(&self, id: JobId) -> Option<MemoryJob> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.find(id).map(|j| j.status)
    }

    pub fn attempts(&self, id: JobId) -> Option<i32> {
        self.find(id).map(|j| j.attempts)
    }

    pub fn last_retry_delay(&self, id: JobId) -> Option<Duration> {
        self.find(id).and_then(|j| j.last_retry_delay)
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::BrokerUnavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_running<F>(&self, id: JobId, f: F) -> QueueResult<()>
    where
        F: FnOnce(&mut MemoryJob),
    {
        self.check_available()?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.id == id && j.status == JobStatus::Running) {
            Some(job) => {
                f(job);
                Ok(())
            },
            None => Err(QueueError::NotRunning(id)),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId> {
        self.check_available()?;
        let mut jobs = self.jobs.lock().unwrap();

        if let Some(key) = &job.dedup_key {
            if let Some(existing) = jobs.iter().find(|j| {
                j.dedup_key.as_ref() == Some(key)
                    && matches!(j.status, JobStatus::Pending | JobStatus::Running)
            }) {
                return Ok(existing.id);
            }
        }

        let id = Uuid::new_v4();
        jobs.push(MemoryJob {
            id,
            queue: job.queue,
            kind: job.kind,
            payload: job.payload,
            dedup_key: job.dedup_key,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            run_at: Instant::now(),
            last_error: None,
            last_retry_delay: None,
        });
        Ok(id)
    }

    async fn dequeue(&self, queues: &[String], _worker_id: &str) -> QueueResult<Option<Delivery>> {
        self.check_available()?;
        let now = Instant::now();
        let mut jobs = self.jobs.lock().unwrap();

        let Some(job) = jobs.iter_mut().find(|j| {
            j.status == JobStatus::Pending && j.run_at <= now && queues.contains(&j.queue)
        }) else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.attempts += 1;
        Ok(Some(Delivery {
            id: job.id,
            queue: job.queue.clone(),
            kind: job.kind.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
        }))
    }

    async fn ack(&self, id: JobId) -> QueueResult<()> {
        self.with_running(id, |job| job.status = JobStatus::Done)
    }

    async fn retry(&self, id: JobId, delay: Duration, error: &str) -> QueueResult<()> {
        self.with_running(id, |job| {
            job.status = JobStatus::Pending;
            job.run_at = Instant::now() + delay;
            job.last_error = Some(error.to_string());
            job.last_retry_delay = Some(delay);
        })
    }

    async fn release(&self, id: JobId) -> QueueResult<()> {
        self.with_running(id, |job| {
            job.status = JobStatus::Pending;
            job.attempts = (job.attempts - 1).max(0);
        })
    }

    async fn dead_letter(&self, id: JobId, error: &str) -> QueueResult<()> {
        self.with_running(id, |job| {
            job.status = JobStatus::Dead;
            job.last_error = Some(error.to_string());
        })
    }

    async fn heartbeat(&self, id: JobId) -> QueueResult<()> {
        self.with_running(id, |_| {})
    }

    async fn requeue_expired(&self, _lease: Duration) -> QueueResult<ReapOutcome> {
        self.check_available()?;
        Ok(ReapOutcome::default())
    }
}

/// Handler that replays a scripted list of results, then succeeds.
pub struct ScriptedHandler {
    kind: &'static str,
    script: Mutex<VecDeque<Result<(), JobError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    dead_letters: Mutex<Vec<JobId>>,
}

impl ScriptedHandler {
    pub fn new(kind: &'static str, script: Vec<Result<(), JobError>>) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into()),
            delay: None,
            calls: AtomicUsize::new(0),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dead_letters(&self) -> Vec<JobId> {
        self.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn handle(&self, _ctx: &JobContext, _payload: &serde_json::Value) -> Result<(), JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(()))
    }

    async fn on_dead_letter(&self, ctx: &JobContext, _payload: &serde_json::Value, _reason: &str) {
        self.dead_letters.lock().unwrap().push(ctx.job_id);
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DocumentState {
    next_id: i64,
    documents: HashMap<i64, Document>,
    owners: HashMap<i64, i64>,
}

#[derive(Default)]
pub struct MemoryDocuments {
    state: Mutex<DocumentState>,
    fail_updates: AtomicBool,
}

impl MemoryDocuments {
    pub fn add_knowledge_base(&self, id: i64, owner: i64) {
        self.state.lock().unwrap().owners.insert(id, owner);
    }

    /// Insert a document row directly; returns its id.
    pub fn insert(&self, knowledge_base_id: i64, status: EmbeddingStatus) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let user_id = state.owners.get(&knowledge_base_id).copied().unwrap_or(1);
        let now = Utc::now();
        state.documents.insert(
            id,
            Document {
                id,
                knowledge_base_id,
                user_id,
                name: format!("doc-{}.csv", id),
                file_type: "csv".to_string(),
                description: String::new(),
                bucket: "documents".to_string(),
                object_key: format!("kb_{}/{}/doc-{}.csv", knowledge_base_id, Uuid::new_v4(), id),
                embedding_status: status.as_str().to_string(),
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn document(&self, id: i64) -> Option<Document> {
        self.state.lock().unwrap().documents.get(&id).cloned()
    }

    pub fn status(&self, id: i64) -> Option<EmbeddingStatus> {
        self.document(id).and_then(|d| d.status().ok())
    }

    /// Move `updated_at` into the past.
    pub fn backdate(&self, id: i64, by: Duration) {
        let mut state = self.state.lock().unwrap();
        if let Some(doc) = state.documents.get_mut(&id) {
            doc.updated_at -= chrono::Duration::from_std(by).unwrap();
        }
    }

    /// Make status updates fail with a transient error.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn check_updates(&self) -> DbResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            Err(DbError::Sqlx(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocuments {
    async fn knowledge_base_owner(&self, knowledge_base_id: i64) -> DbResult<Option<i64>> {
        Ok(self.state.lock().unwrap().owners.get(&knowledge_base_id).copied())
    }

    async fn create(&self, document: &NewDocument) -> DbResult<Document> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let now = Utc::now();
        let created = Document {
            id,
            knowledge_base_id: document.knowledge_base_id,
            user_id: document.user_id,
            name: document.name.clone(),
            file_type: document.file_type.as_str().to_string(),
            description: document.description.clone(),
            bucket: document.bucket.clone(),
            object_key: document.object_key.clone(),
            embedding_status: document.status.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };
        state.documents.insert(id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: i64) -> DbResult<Option<Document>> {
        Ok(self.document(id))
    }

    async fn set_status(&self, id: i64, status: EmbeddingStatus) -> DbResult<bool> {
        self.check_updates()?;
        let mut state = self.state.lock().unwrap();
        Ok(match state.documents.get_mut(&id) {
            Some(doc) => {
                doc.embedding_status = status.as_str().to_string();
                doc.updated_at = Utc::now();
                true
            },
            None => false,
        })
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: EmbeddingStatus,
        status: EmbeddingStatus,
    ) -> DbResult<bool> {
        self.check_updates()?;
        let mut state = self.state.lock().unwrap();
        Ok(match state.documents.get_mut(&id) {
            Some(doc) if doc.embedding_status == expected.as_str() => {
                doc.embedding_status = status.as_str().to_string();
                doc.updated_at = Utc::now();
                true
            },
            _ => false,
        })
    }

    async fn list_stale(
        &self,
        statuses: &[EmbeddingStatus],
        older_than: Duration,
        limit: i64,
    ) -> DbResult<Vec<Document>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap();
        let state = self.state.lock().unwrap();
        let mut found: Vec<Document> = state
            .documents
            .values()
            .filter(|d| statuses.iter().any(|s| s.as_str() == d.embedding_status))
            .filter(|d| d.updated_at <= cutoff)
            .cloned()
            .collect();
        found.sort_by_key(|d| (d.updated_at, d.id));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Derived tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub comment: Option<String>,
}

/// Commits a load only if every row was read; values containing NUL are
/// rejected the way Postgres rejects them in `TEXT`.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<(String, String), MemoryTable>>,
}

impl MemoryTableStore {
    pub fn table(&self, schema: &str, table: &str) -> Option<MemoryTable> {
        self.tables
            .lock()
            .unwrap()
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn load_table(&self, load: &TableLoad, mut rows: RowSource) -> Result<LoadReport, IngestError> {
        let mut report = LoadReport::default();
        let mut loaded = Vec::new();

        while let Some(row) = rows.next_row().await {
            let row = row?;
            if row.iter().any(|v| v.contains('\0')) {
                report.failed += 1;
            } else {
                loaded.push(row);
                report.inserted += 1;
            }
        }

        let table = MemoryTable {
            columns: load.columns.iter().map(|c| c.as_str().to_string()).collect(),
            rows: loaded,
            comment: load.comment.clone().filter(|c| !c.is_empty()),
        };
        self.tables.lock().unwrap().insert(
            (load.schema.as_str().to_string(), load.table.as_str().to_string()),
            table,
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

type ErrorFactory = Box<dyn Fn() -> StorageError + Send + Sync>;

#[derive(Default)]
struct FailPlan {
    remaining: usize,
    make: Option<ErrorFactory>,
}

impl FailPlan {
    fn next(&mut self) -> Option<StorageError> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.make.as_ref().map(|make| make())
    }
}

/// Wraps a store and injects errors into the next N calls of an operation.
pub struct FlakyObjectStore {
    inner: Arc<dyn ObjectStore>,
    put: Mutex<FailPlan>,
    stat: Mutex<FailPlan>,
    get: Mutex<FailPlan>,
    get_calls: AtomicUsize,
}

impl FlakyObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            put: Mutex::default(),
            stat: Mutex::default(),
            get: Mutex::default(),
            get_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `get` calls, including injected failures.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn plan<F>(slot: &Mutex<FailPlan>, times: usize, make: F)
    where
        F: Fn() -> StorageError + Send + Sync + 'static,
    {
        *slot.lock().unwrap() = FailPlan {
            remaining: times,
            make: Some(Box::new(make)),
        };
    }

    /// Fail the next `times` calls to `stat`.
    pub fn fail_next<F>(&self, times: usize, make: F)
    where
        F: Fn() -> StorageError + Send + Sync + 'static,
    {
        Self::plan(&self.stat, times, make);
    }

    pub fn fail_get_next<F>(&self, times: usize, make: F)
    where
        F: Fn() -> StorageError + Send + Sync + 'static,
    {
        Self::plan(&self.get, times, make);
    }

    pub fn fail_put_next<F>(&self, times: usize, make: F)
    where
        F: Fn() -> StorageError + Send + Sync + 'static,
    {
        Self::plan(&self.put, times, make);
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.ensure_bucket(bucket).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let injected = self.put.lock().unwrap().next();
        if let Some(err) = injected {
            return Err(err);
        }
        self.inner.put(bucket, key, data, content_type).await
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let injected = self.stat.lock().unwrap().next();
        if let Some(err) = injected {
            return Err(err);
        }
        self.inner.stat(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self.get.lock().unwrap().next();
        if let Some(err) = injected {
            return Err(err);
        }
        self.inner.get(bucket, key).await
    }
}
