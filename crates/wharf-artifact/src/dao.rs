//! Artifact and reference persistence.
//!
//! Database conditions are translated to coded errors here: a missing row is
//! `NOT_FOUND`, unique and foreign-key violations are `CONFLICT` with a
//! message naming the offending record.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use wharf_core::{conflict_error, Context, Database, Error, ErrorCode, Result};

use crate::model::{Artifact, ListQuery, Reference, ReferenceQuery, TagFilter};

const SELECT_ARTIFACT: &str = "SELECT artifact.id, artifact.type, artifact.media_type, \
    artifact.manifest_media_type, artifact.project_id, artifact.repository_id, \
    artifact.repository_name, artifact.digest, artifact.size, artifact.push_time, \
    artifact.pull_time, artifact.extra_attrs, artifact.annotations FROM artifact";

const SELECT_REFERENCE: &str = "SELECT id, parent_id, child_id, child_digest, platform, urls, \
    annotations FROM artifact_reference";

/// Properties accepted by [`ArtifactDao::update`].
pub const UPDATABLE_PROPERTIES: &[&str] = &[
    "type",
    "media_type",
    "manifest_media_type",
    "size",
    "push_time",
    "pull_time",
    "extra_attrs",
    "annotations",
];

#[derive(FromRow)]
struct ArtifactRow {
    id: i64,
    #[sqlx(rename = "type")]
    artifact_type: String,
    media_type: String,
    manifest_media_type: String,
    project_id: i64,
    repository_id: i64,
    repository_name: String,
    digest: String,
    size: i64,
    push_time: DateTime<Utc>,
    pull_time: Option<DateTime<Utc>>,
    extra_attrs: String,
    annotations: String,
}

impl ArtifactRow {
    fn into_artifact(self) -> Result<Artifact> {
        Ok(Artifact {
            id: self.id,
            artifact_type: self.artifact_type,
            media_type: self.media_type,
            manifest_media_type: self.manifest_media_type,
            project_id: self.project_id,
            repository_id: self.repository_id,
            repository_name: self.repository_name,
            digest: self.digest,
            size: self.size,
            push_time: self.push_time,
            pull_time: self.pull_time,
            extra_attrs: decode(Some(&self.extra_attrs))?,
            annotations: decode(Some(&self.annotations))?,
            references: Vec::new(),
        })
    }
}

#[derive(FromRow)]
struct ReferenceRow {
    id: i64,
    parent_id: i64,
    child_id: i64,
    child_digest: String,
    platform: Option<String>,
    urls: Option<String>,
    annotations: Option<String>,
}

impl ReferenceRow {
    fn into_reference(self) -> Result<Reference> {
        Ok(Reference {
            id: self.id,
            parent_id: self.parent_id,
            child_id: self.child_id,
            child_digest: self.child_digest,
            platform: decode(self.platform.as_deref())?,
            urls: decode(self.urls.as_deref())?,
            annotations: decode(self.annotations.as_deref())?,
        })
    }
}

fn decode<T: DeserializeOwned + Default>(raw: Option<&str>) -> Result<T> {
    match raw {
        None | Some("") => Ok(T::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            Error::wrap(e)
                .with_code(ErrorCode::Unknown)
                .with_message("corrupt json column")
        }),
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ListQuery) {
    // Child-only artifacts are hidden unless tagged.
    builder.push(
        " WHERE (EXISTS (SELECT 1 FROM tag WHERE tag.artifact_id = artifact.id) \
         OR NOT EXISTS (SELECT 1 FROM artifact_reference r WHERE r.child_id = artifact.id))",
    );
    if let Some(id) = query.project_id {
        builder.push(" AND artifact.project_id = ").push_bind(id);
    }
    if let Some(id) = query.repository_id {
        builder.push(" AND artifact.repository_id = ").push_bind(id);
    }
    if let Some(name) = &query.repository_name {
        builder
            .push(" AND artifact.repository_name = ")
            .push_bind(name.clone());
    }
    if let Some(digest) = &query.digest {
        builder.push(" AND artifact.digest = ").push_bind(digest.clone());
    }
    if let Some(media_type) = &query.media_type {
        builder
            .push(" AND artifact.media_type = ")
            .push_bind(media_type.clone());
    }
    if let Some(artifact_type) = &query.artifact_type {
        builder
            .push(" AND artifact.type = ")
            .push_bind(artifact_type.clone());
    }
    match query.tags {
        TagFilter::Any => {}
        TagFilter::Tagged => {
            builder.push(" AND EXISTS (SELECT 1 FROM tag WHERE tag.artifact_id = artifact.id)");
        }
        TagFilter::Untagged => {
            builder.push(" AND NOT EXISTS (SELECT 1 FROM tag WHERE tag.artifact_id = artifact.id)");
        }
    }
}

fn encode_optional<T: serde::Serialize>(value: &T, empty: bool) -> Result<Option<String>> {
    if empty {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(value)?))
}

/// Data access for the `artifact` and `artifact_reference` tables.
#[derive(Debug, Clone)]
pub struct ArtifactDao {
    db: Database,
}

impl ArtifactDao {
    /// Creates a DAO over `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the database handle.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Counts artifacts matching `query`, ignoring paging.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self, ctx: &Context, query: &ListQuery) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM artifact");
        push_filters(&mut builder, query);
        let mut conn = self.db.conn(ctx).await?;
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(conn.get()?)
            .await?;
        Ok(count)
    }

    /// Lists artifacts matching `query`, newest push first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self, ctx: &Context, query: &ListQuery) -> Result<Vec<Artifact>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_ARTIFACT);
        push_filters(&mut builder, query);
        builder.push(" ORDER BY artifact.push_time DESC, artifact.id DESC");
        if let Some((limit, offset)) = query.limit_offset() {
            builder
                .push(" LIMIT ")
                .push_bind(limit)
                .push(" OFFSET ")
                .push_bind(offset);
        }
        let mut conn = self.db.conn(ctx).await?;
        let rows = builder
            .build_query_as::<ArtifactRow>()
            .fetch_all(conn.get()?)
            .await?;
        rows.into_iter().map(ArtifactRow::into_artifact).collect()
    }

    /// Gets an artifact by id.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if no artifact has that id.
    pub async fn get(&self, ctx: &Context, id: i64) -> Result<Artifact> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, ArtifactRow>(&format!("{SELECT_ARTIFACT} WHERE artifact.id = ?"))
            .bind(id)
            .fetch_optional(conn.get()?)
            .await?;
        row.ok_or_else(|| Error::not_found(format!("artifact {id} not found")))?
            .into_artifact()
    }

    /// Gets an artifact by repository name and digest.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if the repository holds no such digest.
    pub async fn get_by_digest(&self, ctx: &Context, repository: &str, digest: &str) -> Result<Artifact> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, ArtifactRow>(&format!(
            "{SELECT_ARTIFACT} WHERE artifact.repository_name = ? AND artifact.digest = ?"
        ))
        .bind(repository)
        .bind(digest)
        .fetch_optional(conn.get()?)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("artifact {repository}@{digest} not found")))?
            .into_artifact()
    }

    /// Inserts an artifact row (references are not touched).
    ///
    /// # Errors
    ///
    /// Returns `CONFLICT` if the digest already exists in the repository.
    pub async fn create(&self, ctx: &Context, artifact: &Artifact) -> Result<i64> {
        let extra_attrs = serde_json::to_string(&artifact.extra_attrs)?;
        let annotations = serde_json::to_string(&artifact.annotations)?;
        let duplicate = format!(
            "artifact {} already exists under the repository {}",
            artifact.digest, artifact.repository_name
        );

        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query(
            "INSERT INTO artifact (type, media_type, manifest_media_type, project_id, \
             repository_id, repository_name, digest, size, push_time, pull_time, extra_attrs, \
             annotations) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(artifact.artifact_type.as_str())
        .bind(artifact.media_type.as_str())
        .bind(artifact.manifest_media_type.as_str())
        .bind(artifact.project_id)
        .bind(artifact.repository_id)
        .bind(artifact.repository_name.as_str())
        .bind(artifact.digest.as_str())
        .bind(artifact.size)
        .bind(artifact.push_time)
        .bind(artifact.pull_time)
        .bind(extra_attrs)
        .bind(annotations)
        .execute(conn.get()?)
        .await
        .map_err(|e| conflict_error(e, &duplicate, &duplicate))?;
        Ok(result.last_insert_rowid())
    }

    /// Deletes an artifact row.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if it does not exist and `CONFLICT` while
    /// references or tags still point at it.
    pub async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let referenced = format!("the artifact {id} is referenced by other resources");
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query("DELETE FROM artifact WHERE id = ?")
            .bind(id)
            .execute(conn.get()?)
            .await
            .map_err(|e| conflict_error(e, &referenced, &referenced))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("artifact {id} not found")));
        }
        Ok(())
    }

    /// Updates the named properties, or all of [`UPDATABLE_PROPERTIES`] when
    /// `props` is empty.
    ///
    /// # Errors
    ///
    /// Returns `BAD_REQUEST` for an unknown property and `NOT_FOUND` if the
    /// artifact does not exist.
    pub async fn update(&self, ctx: &Context, artifact: &Artifact, props: &[&str]) -> Result<()> {
        let props = if props.is_empty() { UPDATABLE_PROPERTIES } else { props };
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE artifact SET ");
        {
            let mut set = builder.separated(", ");
            for prop in props {
                match *prop {
                    "type" => {
                        set.push("type = ")
                            .push_bind_unseparated(artifact.artifact_type.clone());
                    }
                    "media_type" => {
                        set.push("media_type = ")
                            .push_bind_unseparated(artifact.media_type.clone());
                    }
                    "manifest_media_type" => {
                        set.push("manifest_media_type = ")
                            .push_bind_unseparated(artifact.manifest_media_type.clone());
                    }
                    "size" => {
                        set.push("size = ").push_bind_unseparated(artifact.size);
                    }
                    "push_time" => {
                        set.push("push_time = ").push_bind_unseparated(artifact.push_time);
                    }
                    "pull_time" => {
                        set.push("pull_time = ").push_bind_unseparated(artifact.pull_time);
                    }
                    "extra_attrs" => {
                        set.push("extra_attrs = ")
                            .push_bind_unseparated(serde_json::to_string(&artifact.extra_attrs)?);
                    }
                    "annotations" => {
                        set.push("annotations = ")
                            .push_bind_unseparated(serde_json::to_string(&artifact.annotations)?);
                    }
                    other => {
                        return Err(Error::bad_request(format!(
                            "unsupported artifact property {other}"
                        )))
                    }
                }
            }
        }
        builder.push(" WHERE id = ").push_bind(artifact.id);

        let mut conn = self.db.conn(ctx).await?;
        let result = builder.build().execute(conn.get()?).await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("artifact {} not found", artifact.id)));
        }
        Ok(())
    }

    /// Moves `pull_time` forward; an older `time` leaves the row unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_pull_time(&self, ctx: &Context, id: i64, time: DateTime<Utc>) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        sqlx::query(
            "UPDATE artifact SET pull_time = ? WHERE id = ? AND (pull_time IS NULL OR pull_time < ?)",
        )
        .bind(time)
        .bind(id)
        .bind(time)
        .execute(conn.get()?)
        .await?;
        Ok(())
    }

    /// Inserts a reference.
    ///
    /// # Errors
    ///
    /// Returns `CONFLICT` for a duplicate edge or a missing endpoint.
    pub async fn create_reference(&self, ctx: &Context, reference: &Reference) -> Result<i64> {
        let platform = encode_optional(&reference.platform, reference.platform.is_none())?;
        let urls = encode_optional(&reference.urls, reference.urls.is_empty())?;
        let annotations = encode_optional(&reference.annotations, reference.annotations.is_empty())?;
        let ids = format!(
            "parent artifact ID: {}, child artifact ID: {}",
            reference.parent_id, reference.child_id
        );

        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query(
            "INSERT INTO artifact_reference (parent_id, child_id, child_digest, platform, urls, \
             annotations) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reference.parent_id)
        .bind(reference.child_id)
        .bind(reference.child_digest.as_str())
        .bind(platform)
        .bind(urls)
        .bind(annotations)
        .execute(conn.get()?)
        .await
        .map_err(|e| {
            conflict_error(
                e,
                &format!("reference already exists, {ids}"),
                &format!("the reference tries to reference a non existing artifact, {ids}"),
            )
        })?;
        Ok(result.last_insert_rowid())
    }

    /// Lists references by either end, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_references(&self, ctx: &Context, query: &ReferenceQuery) -> Result<Vec<Reference>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_REFERENCE);
        builder.push(" WHERE 1 = 1");
        if let Some(id) = query.parent_id {
            builder.push(" AND parent_id = ").push_bind(id);
        }
        if let Some(id) = query.child_id {
            builder.push(" AND child_id = ").push_bind(id);
        }
        builder.push(" ORDER BY id");

        let mut conn = self.db.conn(ctx).await?;
        let rows = builder
            .build_query_as::<ReferenceRow>()
            .fetch_all(conn.get()?)
            .await?;
        rows.into_iter().map(ReferenceRow::into_reference).collect()
    }

    /// Gets one reference by id.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if it does not exist.
    pub async fn get_reference(&self, ctx: &Context, id: i64) -> Result<Reference> {
        let mut conn = self.db.conn(ctx).await?;
        let row = sqlx::query_as::<_, ReferenceRow>(&format!("{SELECT_REFERENCE} WHERE id = ?"))
            .bind(id)
            .fetch_optional(conn.get()?)
            .await?;
        row.ok_or_else(|| Error::not_found(format!("reference {id} not found")))?
            .into_reference()
    }

    /// Deletes one reference.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if it does not exist.
    pub async fn delete_reference(&self, ctx: &Context, id: i64) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query("DELETE FROM artifact_reference WHERE id = ?")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("reference {id} not found")));
        }
        Ok(())
    }

    /// Deletes every reference leaving `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if the parent does not exist.
    pub async fn delete_references(&self, ctx: &Context, parent_id: i64) -> Result<()> {
        self.get(ctx, parent_id).await?;
        let mut conn = self.db.conn(ctx).await?;
        sqlx::query("DELETE FROM artifact_reference WHERE parent_id = ?")
            .bind(parent_id)
            .execute(conn.get()?)
            .await?;
        Ok(())
    }
}
