//! libSQL-backed completion ledger (local file, offline mode).
//!
//! The [`Ledger`] records which work items are done, per stage, so that an
//! interrupted run can be resumed without repeating work. It also keeps a run
//! history and a cache of AI metadata answers.
//!
//! **Access rules:**
//! - Pipeline stages: read-write via [`Ledger::open`]
//! - `status` reporting: read-only via [`Ledger::open_readonly`]

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use threadvault_shared::{Result, ThreadvaultError};

/// One of the two completion fact tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTable {
    /// Threads whose raw `data.json` has been written.
    Scraped,
    /// Raw folders already rendered into Hexo posts.
    Processed,
}

impl LedgerTable {
    fn table(&self) -> &'static str {
        match self {
            Self::Scraped => "scraped_articles",
            Self::Processed => "processed_articles",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Scraped => "folder_name",
            Self::Processed => "folder_path",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scraped => "scraped",
            Self::Processed => "processed",
        }
    }
}

/// A finished or in-flight stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: String,
    pub stage: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

/// Durable idempotency ledger wrapping a libSQL database.
pub struct Ledger {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// Serializes writers sharing this handle.
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Open or create a ledger at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ThreadvaultError::io(parent, e))?;
        }

        let ledger = Self::connect(path, false).await?;
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    /// Open an existing ledger at `path` without write access.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ThreadvaultError::Storage(format!(
                "ledger not found at {}",
                path.display()
            )));
        }
        Self::connect(path, true).await
    }

    async fn connect(path: &Path, readonly: bool) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ThreadvaultError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ThreadvaultError::Storage(
                "ledger is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completion facts
    // -----------------------------------------------------------------------

    /// Every identifier recorded in `table`. Read once at stage startup.
    pub async fn list_all(&self, table: LedgerTable) -> Result<HashSet<String>> {
        let sql = format!("SELECT {} FROM {}", table.column(), table.table());
        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        let mut ids = HashSet::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?
        {
            ids.insert(
                row.get::<String>(0)
                    .map_err(|e| ThreadvaultError::Storage(e.to_string()))?,
            );
        }
        debug!(table = table.as_str(), count = ids.len(), "ledger loaded");
        Ok(ids)
    }

    /// Whether `id` has been recorded in `table`.
    pub async fn contains(&self, table: LedgerTable, id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
            table.table(),
            table.column()
        );
        let mut rows = self
            .conn
            .query(&sql, params![id])
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(ThreadvaultError::Storage(e.to_string())),
        }
    }

    /// Mark `id` complete in `table`. Recording an existing id is a no-op.
    pub async fn record(&self, table: LedgerTable, id: &str) -> Result<()> {
        self.check_writable()?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES (?1)",
            table.table(),
            table.column()
        );

        let _guard = self.write_lock.lock().await;
        let inserted = self
            .conn
            .execute(&sql, params![id])
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        debug!(table = table.as_str(), id, inserted, "ledger record");
        Ok(())
    }

    /// Number of identifiers in `table`.
    pub async fn count(&self, table: LedgerTable) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.table());
        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| ThreadvaultError::Storage(e.to_string()))?
                .max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(ThreadvaultError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a stage run. Returns the run ID.
    pub async fn start_run(&self, stage: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO runs (id, stage, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), stage, now.as_str()],
            )
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Close a run with its final statistics.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, stage, started_at, finished_at, stats_json
                 FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?
        {
            runs.push(RunRecord {
                id: row
                    .get::<String>(0)
                    .map_err(|e| ThreadvaultError::Storage(e.to_string()))?,
                stage: row
                    .get::<String>(1)
                    .map_err(|e| ThreadvaultError::Storage(e.to_string()))?,
                started_at: row
                    .get::<String>(2)
                    .map_err(|e| ThreadvaultError::Storage(e.to_string()))?,
                finished_at: optional_text(&row, 3),
                stats_json: optional_text(&row, 4),
            });
        }
        Ok(runs)
    }

    // -----------------------------------------------------------------------
    // AI metadata cache
    // -----------------------------------------------------------------------

    /// Get a cached metadata answer.
    pub async fn get_enrichment_cache(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM enrichment_cache
                 WHERE task = ?1 AND prompt_hash = ?2 AND model_id = ?3",
                params![task, prompt_hash, model_id],
            )
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| ThreadvaultError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(ThreadvaultError::Storage(e.to_string())),
        }
    }

    /// Store a metadata answer in the cache (upserts).
    pub async fn set_enrichment_cache(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO enrichment_cache (task, prompt_hash, model_id, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task, prompt_hash, model_id)
                 DO UPDATE SET result_json = excluded.result_json, created_at = excluded.created_at",
                params![task, prompt_hash, model_id, result_json, now.as_str()],
            )
            .await
            .map_err(|e| ThreadvaultError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Read a nullable TEXT column.
fn optional_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(libsql::Value::Text(s)) => Some(s),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tv_test_{}.db", Uuid::now_v7()))
    }

    /// Create a temp file ledger for testing.
    async fn test_ledger() -> Ledger {
        Ledger::open(&temp_db_path()).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let ledger = test_ledger().await;
        assert_eq!(ledger.get_schema_version().await, 2);
        assert!(ledger.list_all(LedgerTable::Scraped).await.unwrap().is_empty());
        assert!(ledger.list_all(LedgerTable::Processed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db_path();
        let first = Ledger::open(&tmp).await.expect("first open");
        first.record(LedgerTable::Scraped, "kept").await.unwrap();
        drop(first);

        let second = Ledger::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 2);
        assert!(second.contains(LedgerTable::Scraped, "kept").await.unwrap());
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let ledger = test_ledger().await;
        ledger.record(LedgerTable::Scraped, "A").await.unwrap();
        ledger.record(LedgerTable::Scraped, "A").await.unwrap();
        ledger.record(LedgerTable::Scraped, "C").await.unwrap();

        let ids = ledger.list_all(LedgerTable::Scraped).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("A") && ids.contains("C"));
        assert_eq!(ledger.count(LedgerTable::Scraped).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn tables_are_independent() {
        let ledger = test_ledger().await;
        ledger.record(LedgerTable::Scraped, "same").await.unwrap();

        assert!(ledger.contains(LedgerTable::Scraped, "same").await.unwrap());
        assert!(!ledger.contains(LedgerTable::Processed, "same").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_records_do_not_double_count() {
        let ledger = Arc::new(test_ledger().await);
        let mut handles = Vec::new();
        for i in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                // Half the writers collide on the same ids
                let id = format!("item-{}", i % 16);
                ledger.record(LedgerTable::Scraped, &id).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.count(LedgerTable::Scraped).await.unwrap(), 16);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db_path();
        let rw = Ledger::open(&tmp).await.unwrap();
        rw.record(LedgerTable::Processed, "2024-05-01/A").await.unwrap();
        drop(rw);

        let ro = Ledger::open_readonly(&tmp).await.unwrap();
        assert!(ro.contains(LedgerTable::Processed, "2024-05-01/A").await.unwrap());
        let err = ro.record(LedgerTable::Processed, "2024-05-01/B").await.unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        assert!(Ledger::open_readonly(&temp_db_path()).await.is_err());
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let ledger = test_ledger().await;
        let run_id = ledger.start_run("crawl").await.unwrap();
        ledger
            .finish_run(&run_id, r#"{"success": 2, "error": 1}"#)
            .await
            .unwrap();

        let runs = ledger.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].stage, "crawl");
        assert!(runs[0].finished_at.is_some());
        assert_eq!(runs[0].stats_json.as_deref(), Some(r#"{"success": 2, "error": 1}"#));
    }

    #[tokio::test]
    async fn enrichment_cache() {
        let ledger = test_ledger().await;

        let miss = ledger
            .get_enrichment_cache("seo", "abc", "gemini")
            .await
            .unwrap();
        assert!(miss.is_none());

        ledger
            .set_enrichment_cache("seo", "abc", "gemini", r#"{"seo_title":"x"}"#)
            .await
            .unwrap();
        ledger
            .set_enrichment_cache("seo", "abc", "gemini", r#"{"seo_title":"y"}"#)
            .await
            .unwrap();

        let hit = ledger
            .get_enrichment_cache("seo", "abc", "gemini")
            .await
            .unwrap();
        assert_eq!(hit.as_deref(), Some(r#"{"seo_title":"y"}"#));

        let other_model = ledger
            .get_enrichment_cache("seo", "abc", "other")
            .await
            .unwrap();
        assert!(other_model.is_none());
    }
}
