//! Project manager.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use wharf_core::{conflict_error, with_transaction, Context, Database, Error, Result};

use crate::metadata::{DefaultMetadataManager, MetadataManager};
use crate::model::{Project, ProjectQuery, METADATA_PUBLIC};

const SELECT_PROJECT: &str =
    "SELECT project_id, owner_id, name, registry_id, creation_time, update_time FROM project";

/// Project persistence contract shared by the plain and cached managers.
#[async_trait]
pub trait ProjectManager: Send + Sync {
    /// Creates a project together with its initial metadata.
    async fn create(&self, ctx: &Context, project: &Project, metadata: &BTreeMap<String, String>) -> Result<i64>;
    /// Counts live projects matching `query`.
    async fn count(&self, ctx: &Context, query: &ProjectQuery) -> Result<i64>;
    /// Lists live projects matching `query`, by name.
    async fn list(&self, ctx: &Context, query: &ProjectQuery) -> Result<Vec<Project>>;
    /// Gets a live project by id.
    async fn get(&self, ctx: &Context, id: i64) -> Result<Project>;
    /// Gets a live project by name.
    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Project>;
    /// Marks a project deleted and frees its name.
    async fn delete(&self, ctx: &Context, id: i64) -> Result<()>;
}

/// [`ProjectManager`] backed directly by the database.
#[derive(Debug, Clone)]
pub struct DefaultProjectManager {
    db: Database,
    metadata: DefaultMetadataManager,
}

impl DefaultProjectManager {
    /// Creates a manager over `db`.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            metadata: DefaultMetadataManager::new(db.clone()),
            db,
        }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ProjectQuery) {
    builder.push(" WHERE deleted = 0");
    if let Some(ids) = &query.project_ids {
        if ids.is_empty() {
            builder.push(" AND 1 = 0");
        } else {
            builder.push(" AND project_id IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }
    }
    if let Some(name) = &query.name {
        builder.push(" AND name LIKE ").push_bind(format!("%{name}%"));
    }
    if let Some(owner) = query.owner_id {
        builder.push(" AND owner_id = ").push_bind(owner);
    }
    if let Some(public) = query.public {
        builder.push(if public { " AND EXISTS" } else { " AND NOT EXISTS" });
        builder
            .push(
                " (SELECT 1 FROM project_metadata m WHERE m.project_id = project.project_id \
                 AND m.name = ",
            )
            .push_bind(METADATA_PUBLIC)
            .push(" AND m.value = 'true')");
    }
}

#[async_trait]
impl ProjectManager for DefaultProjectManager {
    async fn create(&self, ctx: &Context, project: &Project, metadata: &BTreeMap<String, String>) -> Result<i64> {
        let id = with_transaction(&self.db, ctx, |ctx| async move {
            let duplicate = format!("project {} already exists", project.name);
            let id = {
                let mut conn = self.db.conn(&ctx).await?;
                let result = sqlx::query(
                    "INSERT INTO project (owner_id, name, registry_id, creation_time, update_time) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(project.owner_id)
                .bind(project.name.as_str())
                .bind(project.registry_id)
                .bind(project.creation_time)
                .bind(project.update_time)
                .execute(conn.get()?)
                .await
                .map_err(|e| conflict_error(e, &duplicate, &duplicate))?;
                result.last_insert_rowid()
            };
            if !metadata.is_empty() {
                self.metadata.add(&ctx, id, metadata).await?;
            }
            Ok(id)
        })
        .await?;
        tracing::info!(project = %project.name, id, "project created");
        Ok(id)
    }

    async fn count(&self, ctx: &Context, query: &ProjectQuery) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM project");
        push_filters(&mut builder, query);
        let mut conn = self.db.conn(ctx).await?;
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(conn.get()?)
            .await?;
        Ok(count)
    }

    async fn list(&self, ctx: &Context, query: &ProjectQuery) -> Result<Vec<Project>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_PROJECT);
        push_filters(&mut builder, query);
        builder.push(" ORDER BY name");
        if let Some((limit, offset)) = query.limit_offset() {
            builder.push(" LIMIT ").push_bind(limit);
            builder.push(" OFFSET ").push_bind(offset);
        }
        let mut conn = self.db.conn(ctx).await?;
        let projects = builder
            .build_query_as::<Project>()
            .fetch_all(conn.get()?)
            .await?;
        Ok(projects)
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<Project> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, Project>(&format!(
            "{SELECT_PROJECT} WHERE project_id = ? AND deleted = 0"
        ))
        .bind(id)
        .fetch_optional(conn.get()?)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("project {id} not found")))
    }

    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Project> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, Project>(&format!(
            "{SELECT_PROJECT} WHERE name = ? AND deleted = 0"
        ))
        .bind(name)
        .fetch_optional(conn.get()?)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("project {name} not found")))
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query(
            "UPDATE project SET deleted = 1, name = name || '#' || project_id, update_time = ? \
             WHERE project_id = ? AND deleted = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(conn.get()?)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("project {id} not found")));
        }
        tracing::info!(id, "project deleted");
        Ok(())
    }
}
