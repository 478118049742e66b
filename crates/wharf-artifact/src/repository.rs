//! Repository records and their manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use wharf_core::{conflict_error, Context, Database, Error, Result};

const SELECT_REPOSITORY: &str = "SELECT repository_id, name, project_id, description, pull_count, \
    creation_time, update_time FROM repository";

/// A named repository inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Repository {
    /// Assigned on insert.
    pub repository_id: i64,
    /// Full name, `<project>/<name>`.
    pub name: String,
    /// Owning project.
    pub project_id: i64,
    /// Free-form description.
    pub description: String,
    /// Number of pulls.
    pub pull_count: i64,
    /// Creation time.
    pub creation_time: DateTime<Utc>,
    /// Last update time.
    pub update_time: DateTime<Utc>,
}

impl Repository {
    /// Creates a repository record stamped now.
    #[must_use]
    pub fn new(project_id: i64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            repository_id: 0,
            name: name.into(),
            project_id,
            description: String::new(),
            pull_count: 0,
            creation_time: now,
            update_time: now,
        }
    }
}

/// Filters for repository listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryQuery {
    /// Restrict to one project.
    pub project_id: Option<i64>,
    /// Substring of the name.
    pub name: Option<String>,
}

/// Repository persistence contract shared by the plain and cached managers.
#[async_trait]
pub trait RepositoryManager: Send + Sync {
    /// Counts repositories matching `query`.
    async fn count(&self, ctx: &Context, query: &RepositoryQuery) -> Result<i64>;
    /// Lists repositories matching `query`, by name.
    async fn list(&self, ctx: &Context, query: &RepositoryQuery) -> Result<Vec<Repository>>;
    /// Gets a repository by id.
    async fn get(&self, ctx: &Context, id: i64) -> Result<Repository>;
    /// Gets a repository by full name.
    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Repository>;
    /// Creates a repository.
    async fn create(&self, ctx: &Context, repository: &Repository) -> Result<i64>;
    /// Deletes a repository.
    async fn delete(&self, ctx: &Context, id: i64) -> Result<()>;
    /// Updates the named properties (`description`, `pull_count`); all when empty.
    async fn update(&self, ctx: &Context, repository: &Repository, props: &[&str]) -> Result<()>;
    /// Increments the pull count.
    async fn add_pull_count(&self, ctx: &Context, id: i64) -> Result<()>;
}

/// [`RepositoryManager`] backed directly by the database.
#[derive(Debug, Clone)]
pub struct DefaultRepositoryManager {
    db: Database,
}

impl DefaultRepositoryManager {
    /// Creates a manager over `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &RepositoryQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(id) = query.project_id {
        builder.push(" AND project_id = ").push_bind(id);
    }
    if let Some(name) = &query.name {
        builder.push(" AND name LIKE ").push_bind(format!("%{name}%"));
    }
}

#[async_trait]
impl RepositoryManager for DefaultRepositoryManager {
    async fn count(&self, ctx: &Context, query: &RepositoryQuery) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM repository");
        push_filters(&mut builder, query);
        let mut conn = self.db.conn(ctx).await?;
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(conn.get()?)
            .await?;
        Ok(count)
    }

    async fn list(&self, ctx: &Context, query: &RepositoryQuery) -> Result<Vec<Repository>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_REPOSITORY);
        push_filters(&mut builder, query);
        builder.push(" ORDER BY name");
        let mut conn = self.db.conn(ctx).await?;
        let repositories = builder
            .build_query_as::<Repository>()
            .fetch_all(conn.get()?)
            .await?;
        Ok(repositories)
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<Repository> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, Repository>(&format!("{SELECT_REPOSITORY} WHERE repository_id = ?"))
            .bind(id)
            .fetch_optional(conn.get()?)
            .await?;
        row.ok_or_else(|| Error::not_found(format!("repository {id} not found")))
    }

    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Repository> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, Repository>(&format!("{SELECT_REPOSITORY} WHERE name = ?"))
            .bind(name)
            .fetch_optional(conn.get()?)
            .await?;
        row.ok_or_else(|| Error::not_found(format!("repository {name} not found")))
    }

    async fn create(&self, ctx: &Context, repository: &Repository) -> Result<i64> {
        let duplicate = format!("repository {} already exists", repository.name);
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query(
            "INSERT INTO repository (name, project_id, description, pull_count, creation_time, \
             update_time) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(repository.name.as_str())
        .bind(repository.project_id)
        .bind(repository.description.as_str())
        .bind(repository.pull_count)
        .bind(repository.creation_time)
        .bind(repository.update_time)
        .execute(conn.get()?)
        .await
        .map_err(|e| conflict_error(e, &duplicate, &duplicate))?;
        Ok(result.last_insert_rowid())
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query("DELETE FROM repository WHERE repository_id = ?")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("repository {id} not found")));
        }
        Ok(())
    }

    async fn update(&self, ctx: &Context, repository: &Repository, props: &[&str]) -> Result<()> {
        let props = if props.is_empty() { &["description", "pull_count"][..] } else { props };
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE repository SET update_time = ");
        builder.push_bind(Utc::now());
        for prop in props {
            match *prop {
                "description" => {
                    builder
                        .push(", description = ")
                        .push_bind(repository.description.clone());
                }
                "pull_count" => {
                    builder.push(", pull_count = ").push_bind(repository.pull_count);
                }
                other => {
                    return Err(Error::bad_request(format!(
                        "unsupported repository property {other}"
                    )))
                }
            }
        }
        builder
            .push(" WHERE repository_id = ")
            .push_bind(repository.repository_id);

        let mut conn = self.db.conn(ctx).await?;
        let result = builder.build().execute(conn.get()?).await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "repository {} not found",
                repository.repository_id
            )));
        }
        Ok(())
    }

    async fn add_pull_count(&self, ctx: &Context, id: i64) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query(
            "UPDATE repository SET pull_count = pull_count + 1, update_time = ? WHERE repository_id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(conn.get()?)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("repository {id} not found")));
        }
        Ok(())
    }
}
