//! Tags: mutable names pointing at artifacts inside a repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use wharf_core::{conflict_error, Context, Database, Error, Result};

const SELECT_TAG: &str =
    "SELECT id, repository_id, artifact_id, name, push_time, pull_time FROM tag";

/// A tag record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tag {
    /// Assigned on insert.
    pub id: i64,
    /// Repository the tag lives in.
    pub repository_id: i64,
    /// Tagged artifact.
    pub artifact_id: i64,
    /// Tag name.
    pub name: String,
    /// When the tag was last pointed at its artifact.
    pub push_time: DateTime<Utc>,
    /// When the tag was last pulled.
    pub pull_time: Option<DateTime<Utc>>,
}

impl Tag {
    /// Creates a tag pushed now.
    #[must_use]
    pub fn new(repository_id: i64, artifact_id: i64, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            repository_id,
            artifact_id,
            name: name.into(),
            push_time: Utc::now(),
            pull_time: None,
        }
    }
}

/// Filters for tag listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagQuery {
    /// Restrict to one repository.
    pub repository_id: Option<i64>,
    /// Restrict to one artifact.
    pub artifact_id: Option<i64>,
    /// Exact name.
    pub name: Option<String>,
}

impl TagQuery {
    /// Tags attached to `artifact_id`.
    #[must_use]
    pub fn artifact(artifact_id: i64) -> Self {
        Self {
            artifact_id: Some(artifact_id),
            ..Self::default()
        }
    }

    /// The tag `name` in `repository_id`.
    #[must_use]
    pub fn named(repository_id: i64, name: impl Into<String>) -> Self {
        Self {
            repository_id: Some(repository_id),
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Tag persistence.
#[derive(Debug, Clone)]
pub struct TagManager {
    db: Database,
}

impl TagManager {
    /// Creates a manager over `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Lists tags matching `query`, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self, ctx: &Context, query: &TagQuery) -> Result<Vec<Tag>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_TAG);
        builder.push(" WHERE 1 = 1");
        if let Some(id) = query.repository_id {
            builder.push(" AND repository_id = ").push_bind(id);
        }
        if let Some(id) = query.artifact_id {
            builder.push(" AND artifact_id = ").push_bind(id);
        }
        if let Some(name) = &query.name {
            builder.push(" AND name = ").push_bind(name.clone());
        }
        builder.push(" ORDER BY name");

        let mut conn = self.db.conn(ctx).await?;
        let tags = builder.build_query_as::<Tag>().fetch_all(conn.get()?).await?;
        Ok(tags)
    }

    /// Gets a tag by id.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if it does not exist.
    pub async fn get(&self, ctx: &Context, id: i64) -> Result<Tag> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, Tag>(&format!("{SELECT_TAG} WHERE id = ?"))
            .bind(id)
            .fetch_optional(conn.get()?)
            .await?;
        row.ok_or_else(|| Error::not_found(format!("tag {id} not found")))
    }

    /// Creates a tag.
    ///
    /// # Errors
    ///
    /// Returns `CONFLICT` if the name is taken in the repository or the
    /// artifact does not exist.
    pub async fn create(&self, ctx: &Context, tag: &Tag) -> Result<i64> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query(
            "INSERT INTO tag (repository_id, artifact_id, name, push_time, pull_time) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(tag.repository_id)
        .bind(tag.artifact_id)
        .bind(tag.name.as_str())
        .bind(tag.push_time)
        .bind(tag.pull_time)
        .execute(conn.get()?)
        .await
        .map_err(|e| {
            conflict_error(
                e,
                &format!("tag {} already exists under the repository {}", tag.name, tag.repository_id),
                &format!("tag {} references a non existing artifact {}", tag.name, tag.artifact_id),
            )
        })?;
        Ok(result.last_insert_rowid())
    }

    /// Points a tag at another artifact, refreshing its push time.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if the tag does not exist.
    pub async fn move_to(&self, ctx: &Context, id: i64, artifact_id: i64) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query("UPDATE tag SET artifact_id = ?, push_time = ? WHERE id = ?")
            .bind(artifact_id)
            .bind(Utc::now())
            .bind(id)
            .execute(conn.get()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("tag {id} not found")));
        }
        Ok(())
    }

    /// Moves `pull_time` forward.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_pull_time(&self, ctx: &Context, id: i64, time: DateTime<Utc>) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        sqlx::query("UPDATE tag SET pull_time = ? WHERE id = ? AND (pull_time IS NULL OR pull_time < ?)")
            .bind(time)
            .bind(id)
            .bind(time)
            .execute(conn.get()?)
            .await?;
        Ok(())
    }

    /// Deletes a tag.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if it does not exist.
    pub async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query("DELETE FROM tag WHERE id = ?")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("tag {id} not found")));
        }
        Ok(())
    }

    /// Deletes every tag of an artifact, returning how many went.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_of_artifact(&self, ctx: &Context, artifact_id: i64) -> Result<u64> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query("DELETE FROM tag WHERE artifact_id = ?")
            .bind(artifact_id)
            .execute(conn.get()?)
            .await?;
        Ok(result.rows_affected())
    }
}
