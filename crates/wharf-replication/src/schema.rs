//! SQLite schema for registry records.

/// Statements creating the `registry` table.
pub const MIGRATIONS: &[&str] = &["CREATE TABLE IF NOT EXISTS registry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        name TEXT NOT NULL UNIQUE,
        credential_type TEXT NOT NULL DEFAULT 'basic',
        access_key TEXT NOT NULL DEFAULT '',
        access_secret TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL,
        insecure INTEGER NOT NULL DEFAULT 0,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT '',
        creation_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    )"];
