//! SQLite schema for collections, documents, chunks, and jobs.

/// Statements run at connect time. All idempotent.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL UNIQUE,
        description     TEXT,
        embedding_model TEXT NOT NULL,
        chunk_size      INTEGER NOT NULL,
        chunk_overlap   INTEGER NOT NULL,
        max_chunk_size  INTEGER NOT NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        source_path   TEXT NOT NULL,
        file_type     TEXT NOT NULL,
        content_hash  TEXT NOT NULL,
        size_bytes    INTEGER NOT NULL,
        chunk_count   INTEGER NOT NULL DEFAULT 0,
        status        TEXT NOT NULL,
        error         TEXT,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL,
        UNIQUE(collection_id, content_hash)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id             INTEGER PRIMARY KEY,
        document_id    INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_index    INTEGER NOT NULL,
        content        TEXT NOT NULL,
        embedding_hash TEXT NOT NULL,
        metadata       TEXT NOT NULL DEFAULT '{}',
        created_at     INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        priority      INTEGER NOT NULL,
        kind          TEXT NOT NULL,
        collection_id INTEGER NOT NULL,
        target        TEXT NOT NULL,
        status        TEXT NOT NULL,
        progress      REAL NOT NULL DEFAULT 0.0,
        error         TEXT,
        created_at    INTEGER NOT NULL,
        started_at    INTEGER,
        finished_at   INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(collection_id, source_path)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(status, priority, id)",
];
