//! Key/value metadata attached to projects.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use wharf_core::{conflict_error, with_transaction, Context, Database, Result};

use crate::model::ProjectMetadata;

/// Project metadata persistence contract shared by the plain and cached
/// managers.
#[async_trait]
pub trait MetadataManager: Send + Sync {
    /// Adds entries to a project.
    async fn add(&self, ctx: &Context, project_id: i64, metadata: &BTreeMap<String, String>) -> Result<()>;
    /// Returns the named entries of a project; all of them when `names` is empty.
    async fn get(&self, ctx: &Context, project_id: i64, names: &[&str]) -> Result<BTreeMap<String, String>>;
    /// Lists entries across projects, optionally filtered by key and value.
    async fn list(&self, ctx: &Context, name: Option<&str>, value: Option<&str>) -> Result<Vec<ProjectMetadata>>;
    /// Overwrites existing entries and inserts missing ones.
    async fn update(&self, ctx: &Context, project_id: i64, metadata: &BTreeMap<String, String>) -> Result<()>;
    /// Deletes the named entries; all of them when `names` is empty.
    async fn delete(&self, ctx: &Context, project_id: i64, names: &[&str]) -> Result<()>;
}

/// [`MetadataManager`] backed directly by the database.
#[derive(Debug, Clone)]
pub struct DefaultMetadataManager {
    db: Database,
}

impl DefaultMetadataManager {
    /// Creates a manager over `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    async fn insert(&self, ctx: &Context, project_id: i64, name: &str, value: &str) -> Result<()> {
        let now = Utc::now();
        let duplicate = format!("metadata {name} of project {project_id} already exists");
        let missing = format!("project {project_id} not found");
        let mut conn = self.db.conn(ctx).await?;
        sqlx::query(
            "INSERT INTO project_metadata (project_id, name, value, creation_time, update_time) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(name)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(conn.get()?)
        .await
        .map_err(|e| conflict_error(e, &duplicate, &missing))?;
        Ok(())
    }
}

fn push_names(builder: &mut QueryBuilder<'_, Sqlite>, names: &[&str]) {
    if names.is_empty() {
        return;
    }
    builder.push(" AND name IN (");
    let mut separated = builder.separated(", ");
    for name in names {
        separated.push_bind(name.to_string());
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl MetadataManager for DefaultMetadataManager {
    async fn add(&self, ctx: &Context, project_id: i64, metadata: &BTreeMap<String, String>) -> Result<()> {
        with_transaction(&self.db, ctx, |ctx| async move {
            for (name, value) in metadata {
                self.insert(&ctx, project_id, name, value).await?;
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, ctx: &Context, project_id: i64, names: &[&str]) -> Result<BTreeMap<String, String>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT name, value FROM project_metadata WHERE project_id = ");
        builder.push_bind(project_id);
        push_names(&mut builder, names);
        let mut conn = self.db.conn(ctx).await?;
        let rows = builder
            .build_query_as::<(String, String)>()
            .fetch_all(conn.get()?)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn list(&self, ctx: &Context, name: Option<&str>, value: Option<&str>) -> Result<Vec<ProjectMetadata>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, project_id, name, value, creation_time, update_time FROM project_metadata WHERE 1 = 1",
        );
        if let Some(name) = name {
            builder.push(" AND name = ").push_bind(name.to_string());
        }
        if let Some(value) = value {
            builder.push(" AND value = ").push_bind(value.to_string());
        }
        builder.push(" ORDER BY project_id, name");
        let mut conn = self.db.conn(ctx).await?;
        let rows = builder
            .build_query_as::<ProjectMetadata>()
            .fetch_all(conn.get()?)
            .await?;
        Ok(rows)
    }

    async fn update(&self, ctx: &Context, project_id: i64, metadata: &BTreeMap<String, String>) -> Result<()> {
        with_transaction(&self.db, ctx, |ctx| async move {
            for (name, value) in metadata {
                let affected = {
                    let mut conn = self.db.conn(&ctx).await?;
                    let result = sqlx::query(
                        "UPDATE project_metadata SET value = ?, update_time = ? \
                         WHERE project_id = ? AND name = ?",
                    )
                    .bind(value)
                    .bind(Utc::now())
                    .bind(project_id)
                    .bind(name)
                    .execute(conn.get()?)
                    .await?;
                    result.rows_affected()
                };
                if affected == 0 {
                    self.insert(&ctx, project_id, name, value).await?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, ctx: &Context, project_id: i64, names: &[&str]) -> Result<()> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM project_metadata WHERE project_id = ");
        builder.push_bind(project_id);
        push_names(&mut builder, names);
        let mut conn = self.db.conn(ctx).await?;
        builder.build().execute(conn.get()?).await?;
        Ok(())
    }
}
