//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the StorageAdapter trait.

use crate::state::{BadRequest, CrawlSnapshot, FailureKind, PageStat, QueuedUrl};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageAdapter, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use crate::url::LinkScope;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use std::path::Path;

/// Tables holding per-domain ledger rows
const LEDGER_TABLES: &[&str] = &[
    "visited",
    "queue",
    "page_stats",
    "bad_requests",
    "external_links",
    "crawls",
];

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    config_hash: String,
    run_id: Option<i64>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            config_hash: String::new(),
            run_id: None,
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            config_hash: String::new(),
            run_id: None,
        })
    }

    /// Sets the config hash recorded with every run this storage opens
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// Gets the most recent run for a domain
    pub fn latest_run(&self, domain: &str) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, domain, started_at, finished_at, config_hash, status
                 FROM runs WHERE domain = ?1 ORDER BY id DESC LIMIT 1",
                params![domain],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        domain: row.get(1)?,
                        started_at: row.get(2)?,
                        finished_at: row.get(3)?,
                        config_hash: row.get(4)?,
                        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                            .unwrap_or(RunStatus::Running),
                    })
                },
            )
            .optional()?;

        Ok(run)
    }

    /// Opens a run row for `domain` on first use
    fn ensure_run(&mut self, domain: &str) -> StorageResult<i64> {
        if let Some(id) = self.run_id {
            return Ok(id);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (domain, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![domain, now, self.config_hash, RunStatus::Running.to_db_string()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.run_id = Some(id);
        Ok(id)
    }
}

fn delete_ledger(tx: &Transaction<'_>, domain: &str) -> StorageResult<()> {
    for table in LEDGER_TABLES {
        tx.execute(
            &format!("DELETE FROM {} WHERE domain = ?1", table),
            params![domain],
        )?;
    }
    Ok(())
}

fn corrupt(domain: &str, reason: String) -> StorageError {
    StorageError::Corrupt {
        domain: domain.to_string(),
        reason,
    }
}

impl StorageAdapter for SqliteStorage {
    // ===== Snapshots =====

    fn load(&mut self, domain: &str) -> StorageResult<Option<CrawlSnapshot>> {
        let header = self
            .conn
            .query_row(
                "SELECT root_url, external_queued, pages_dispatched, external_dispatched
                 FROM crawls WHERE domain = ?1",
                params![domain],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((root_url, external_queued, pages_dispatched, external_dispatched)) = header
        else {
            return Ok(None);
        };

        let visited = {
            let mut stmt = self
                .conn
                .prepare("SELECT url FROM visited WHERE domain = ?1 ORDER BY url")?;
            let rows = stmt.query_map(params![domain], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let queue = {
            let mut stmt = self.conn.prepare(
                "SELECT url, scope, depth FROM queue WHERE domain = ?1 ORDER BY position",
            )?;
            let rows = stmt.query_map(params![domain], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut queue = Vec::new();
            for row in rows {
                let (url, scope, depth) = row?;
                let scope = LinkScope::from_db_string(&scope)
                    .ok_or_else(|| corrupt(domain, format!("unknown scope '{}'", scope)))?;
                queue.push(QueuedUrl {
                    url,
                    scope,
                    depth: depth as u32,
                });
            }
            queue
        };

        let stats: BTreeMap<String, PageStat> = {
            let mut stmt = self.conn.prepare(
                "SELECT url, response_time_ms, page_size, status_code
                 FROM page_stats WHERE domain = ?1",
            )?;
            let rows = stmt.query_map(params![domain], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    PageStat {
                        response_time_ms: row.get::<_, i64>(1)? as u64,
                        page_size: row.get::<_, i64>(2)? as usize,
                        status_code: row.get::<_, Option<i64>>(3)?.map(|code| code as u16),
                    },
                ))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let bad_requests = {
            let mut stmt = self.conn.prepare(
                "SELECT url, kind, attempts, last_error FROM bad_requests WHERE domain = ?1",
            )?;
            let rows = stmt.query_map(params![domain], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut bad_requests = BTreeMap::new();
            for row in rows {
                let (url, kind, attempts, last_error) = row?;
                let kind = FailureKind::from_db_string(&kind)
                    .ok_or_else(|| corrupt(domain, format!("unknown failure kind '{}'", kind)))?;
                bad_requests.insert(
                    url,
                    BadRequest {
                        kind,
                        attempts: attempts as u32,
                        last_error,
                    },
                );
            }
            bad_requests
        };

        let external_links = {
            let mut stmt = self
                .conn
                .prepare("SELECT url FROM external_links WHERE domain = ?1 ORDER BY url")?;
            let rows = stmt.query_map(params![domain], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(Some(CrawlSnapshot {
            domain: domain.to_string(),
            root_url,
            visited,
            queue,
            stats,
            bad_requests,
            external_links,
            external_queued: external_queued as u32,
            pages_dispatched: pages_dispatched as u32,
            external_dispatched: external_dispatched as u32,
        }))
    }

    fn save(&mut self, snapshot: &CrawlSnapshot) -> StorageResult<()> {
        let domain = snapshot.domain.as_str();
        self.ensure_run(domain)?;

        let tx = self.conn.transaction()?;
        delete_ledger(&tx, domain)?;

        tx.execute(
            "INSERT INTO crawls (domain, root_url, saved_at, external_queued, pages_dispatched, external_dispatched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                domain,
                snapshot.root_url,
                Utc::now().to_rfc3339(),
                snapshot.external_queued,
                snapshot.pages_dispatched,
                snapshot.external_dispatched,
            ],
        )?;

        {
            let mut stmt = tx.prepare("INSERT INTO visited (domain, url) VALUES (?1, ?2)")?;
            for url in &snapshot.visited {
                stmt.execute(params![domain, url])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO queue (domain, position, url, scope, depth) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, entry) in snapshot.queue.iter().enumerate() {
                stmt.execute(params![
                    domain,
                    position as i64,
                    entry.url,
                    entry.scope.as_str(),
                    entry.depth,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO page_stats (domain, url, response_time_ms, page_size, status_code)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (url, stat) in &snapshot.stats {
                stmt.execute(params![
                    domain,
                    url,
                    stat.response_time_ms as i64,
                    stat.page_size as i64,
                    stat.status_code,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO bad_requests (domain, url, kind, attempts, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (url, bad) in &snapshot.bad_requests {
                stmt.execute(params![
                    domain,
                    url,
                    bad.kind.to_db_string(),
                    bad.attempts,
                    bad.last_error,
                ])?;
            }

            let mut stmt =
                tx.prepare("INSERT INTO external_links (domain, url) VALUES (?1, ?2)")?;
            for url in &snapshot.external_links {
                stmt.execute(params![domain, url])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            "Saved snapshot of {}: {} visited, {} queued",
            domain,
            snapshot.visited.len(),
            snapshot.queue.len()
        );
        Ok(())
    }

    fn clear(&mut self, domain: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        delete_ledger(&tx, domain)?;
        tx.commit()?;
        Ok(())
    }

    // ===== Runs =====

    fn finish(&mut self, domain: &str, status: RunStatus) -> StorageResult<()> {
        let run_id = self.ensure_run(domain)?;
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), Utc::now().to_rfc3339(), run_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot() -> CrawlSnapshot {
        let mut stats = BTreeMap::new();
        stats.insert(
            "https://example.com/".to_string(),
            PageStat {
                response_time_ms: 25,
                page_size: 2048,
                status_code: Some(200),
            },
        );
        let mut bad_requests = BTreeMap::new();
        bad_requests.insert(
            "https://example.com/slow".to_string(),
            BadRequest {
                kind: FailureKind::Timeout,
                attempts: 3,
                last_error: "no response within 50ms".to_string(),
            },
        );

        CrawlSnapshot {
            domain: "example.com".to_string(),
            root_url: "https://example.com/".to_string(),
            visited: vec![
                "https://example.com/".to_string(),
                "https://example.com/slow".to_string(),
            ],
            queue: vec![
                QueuedUrl::internal("https://example.com/z", 1),
                QueuedUrl::internal("https://example.com/a", 1),
                QueuedUrl::external("https://other.org/", 1),
            ],
            stats,
            bad_requests,
            external_links: vec!["https://other.org/".to_string()],
            external_queued: 1,
            pages_dispatched: 2,
            external_dispatched: 0,
        }
    }

    #[test]
    fn test_load_missing_domain() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.load("example.com").unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_preserves_queue_order() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let saved = snapshot();
        storage.save(&saved).unwrap();

        let loaded = storage.load("example.com").unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.queue[0].url, "https://example.com/z");
        assert_eq!(loaded.queue[2].scope, LinkScope::External);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.save(&snapshot()).unwrap();

        let mut second = snapshot();
        second.queue.clear();
        second.bad_requests.clear();
        storage.save(&second).unwrap();

        let loaded = storage.load("example.com").unwrap().unwrap();
        assert!(loaded.queue.is_empty());
        assert!(loaded.bad_requests.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.save(&snapshot()).unwrap();
        storage.clear("example.com").unwrap();
        assert!(storage.load("example.com").unwrap().is_none());
    }

    #[test]
    fn test_runs_record_config_hash_and_status() {
        let mut storage = SqliteStorage::new_in_memory()
            .unwrap()
            .with_config_hash("abc123");
        storage.save(&snapshot()).unwrap();

        let run = storage.latest_run("example.com").unwrap().unwrap();
        assert_eq!(run.config_hash, "abc123");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        storage.finish("example.com", RunStatus::Completed).unwrap();
        let run = storage.latest_run("example.com").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crawl.db");

        {
            let mut storage = SqliteStorage::new(&path).unwrap();
            storage.save(&snapshot()).unwrap();
        }

        let mut storage = SqliteStorage::new(&path).unwrap();
        assert_eq!(storage.load("example.com").unwrap(), Some(snapshot()));
    }

    #[test]
    fn test_unknown_failure_kind_is_corrupt() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.save(&snapshot()).unwrap();
        storage
            .conn
            .execute("UPDATE bad_requests SET kind = 'gremlins'", [])
            .unwrap();

        assert!(matches!(
            storage.load("example.com"),
            Err(StorageError::Corrupt { .. })
        ));
    }
}
