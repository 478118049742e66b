//! SQLite schema for projects and their metadata.

/// Statements creating the project tables.
pub const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS project (
        project_id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        name TEXT NOT NULL UNIQUE,
        registry_id INTEGER NOT NULL DEFAULT 0,
        creation_time TEXT NOT NULL,
        update_time TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS project_metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES project (project_id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        creation_time TEXT NOT NULL,
        update_time TEXT NOT NULL,
        UNIQUE (project_id, name)
    )",
];
