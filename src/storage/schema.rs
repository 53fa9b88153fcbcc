//! Database schema definitions

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_domain ON runs(domain);

-- One saved ledger per domain
CREATE TABLE IF NOT EXISTS crawls (
    domain TEXT PRIMARY KEY,
    root_url TEXT NOT NULL,
    saved_at TEXT NOT NULL,
    external_queued INTEGER NOT NULL DEFAULT 0,
    pages_dispatched INTEGER NOT NULL DEFAULT 0,
    external_dispatched INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS visited (
    domain TEXT NOT NULL REFERENCES crawls(domain) ON DELETE CASCADE,
    url TEXT NOT NULL,
    PRIMARY KEY (domain, url)
);

-- Pending URLs in dispatch order
CREATE TABLE IF NOT EXISTS queue (
    domain TEXT NOT NULL REFERENCES crawls(domain) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    scope TEXT NOT NULL,
    depth INTEGER NOT NULL,
    PRIMARY KEY (domain, position)
);

CREATE TABLE IF NOT EXISTS page_stats (
    domain TEXT NOT NULL REFERENCES crawls(domain) ON DELETE CASCADE,
    url TEXT NOT NULL,
    response_time_ms INTEGER NOT NULL,
    page_size INTEGER NOT NULL,
    status_code INTEGER,
    PRIMARY KEY (domain, url)
);

CREATE TABLE IF NOT EXISTS bad_requests (
    domain TEXT NOT NULL REFERENCES crawls(domain) ON DELETE CASCADE,
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT NOT NULL,
    PRIMARY KEY (domain, url)
);

CREATE INDEX IF NOT EXISTS idx_bad_requests_kind ON bad_requests(kind);

CREATE TABLE IF NOT EXISTS external_links (
    domain TEXT NOT NULL REFERENCES crawls(domain) ON DELETE CASCADE,
    url TEXT NOT NULL,
    PRIMARY KEY (domain, url)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
