//! SQLite schema for repositories, artifacts, references and tags.
//!
//! Timestamps are stored as RFC 3339 text, which keeps `pull_time`
//! comparisons lexicographic. JSON columns hold serialized maps.

/// Statements creating the tables owned by this crate, in dependency order.
pub const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS repository (
        repository_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        project_id INTEGER NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        pull_count INTEGER NOT NULL DEFAULT 0,
        creation_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS artifact (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type TEXT NOT NULL DEFAULT '',
        media_type TEXT NOT NULL,
        manifest_media_type TEXT NOT NULL,
        project_id INTEGER NOT NULL,
        repository_id INTEGER NOT NULL,
        repository_name TEXT NOT NULL,
        digest TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        push_time TEXT NOT NULL,
        pull_time TEXT,
        extra_attrs TEXT NOT NULL DEFAULT '{}',
        annotations TEXT NOT NULL DEFAULT '{}',
        UNIQUE (repository_id, digest)
    )",
    "CREATE INDEX IF NOT EXISTS idx_artifact_push_time ON artifact (push_time)",
    "CREATE INDEX IF NOT EXISTS idx_artifact_repository_name ON artifact (repository_name, digest)",
    "CREATE TABLE IF NOT EXISTS artifact_reference (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NOT NULL REFERENCES artifact (id),
        child_id INTEGER NOT NULL REFERENCES artifact (id),
        child_digest TEXT NOT NULL,
        platform TEXT,
        urls TEXT,
        annotations TEXT,
        UNIQUE (parent_id, child_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_reference_child_id ON artifact_reference (child_id)",
    "CREATE TABLE IF NOT EXISTS tag (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL,
        artifact_id INTEGER NOT NULL REFERENCES artifact (id),
        name TEXT NOT NULL,
        push_time TEXT NOT NULL,
        pull_time TEXT,
        UNIQUE (repository_id, name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_tag_artifact_id ON tag (artifact_id)",
];
