//! Reads through the cached managers never observe a committed write late.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use wharf_artifact::{
    Artifact, ArtifactDao, Reference, ArtifactManager, DefaultArtifactManager, DefaultRepositoryManager,
    Repository, RepositoryManager,
};
use wharf_cache::{Cache, CacheOptions, MemoryCache};
use wharf_cached::{
    CacheAdmin, CachedArtifactManager, CachedMetadataManager, CachedProjectManager,
    CachedRepositoryManager, ManifestCache,
};
use wharf_core::{with_transaction, Context, Database, ErrorCode};
use wharf_project::{DefaultMetadataManager, DefaultProjectManager, MetadataManager, Project, ProjectManager};

const REPOSITORY: &str = "library/hello";
const DIGEST: &str = "sha256:5a7c4f2e9b3d8a1c6e0f4b2d7a9c3e5f1b8d6a4c2e0f9b7d5a3c1e8f6b4d2a0c";

struct Fixture {
    ctx: Context,
    db: Database,
    cache: Arc<dyn Cache>,
    artifacts: Arc<dyn ArtifactManager>,
    repositories: Arc<dyn RepositoryManager>,
}

impl Fixture {
    async fn new() -> Self {
        let db = Database::in_memory().await.unwrap();
        db.migrate(wharf_artifact::MIGRATIONS).await.unwrap();
        db.migrate(wharf_project::MIGRATIONS).await.unwrap();
        Self {
            ctx: Context::new(),
            cache: Arc::new(MemoryCache::new(CacheOptions::default())),
            artifacts: Arc::new(DefaultArtifactManager::new(ArtifactDao::new(db.clone()))),
            repositories: Arc::new(DefaultRepositoryManager::new(db.clone())),
            db,
        }
    }

    async fn seed_artifact(&self) -> i64 {
        let mut artifact = Artifact::new(1, 1, REPOSITORY, DIGEST);
        artifact.media_type = "application/vnd.docker.container.image.v1+json".into();
        artifact.manifest_media_type = "application/vnd.docker.distribution.manifest.v2+json".into();
        artifact.size = 3011;
        self.artifacts.create(&self.ctx, &artifact).await.unwrap()
    }
}

#[tokio::test]
async fn get_delete_get_surfaces_not_found() {
    let f = Fixture::new().await;
    let cached = CachedArtifactManager::new(f.artifacts.clone(), f.cache.clone());
    let id = f.seed_artifact().await;

    let first = cached.get(&f.ctx, id).await.unwrap();
    assert_eq!(first.size, 3011);
    let by_digest = cached.get_by_digest(&f.ctx, REPOSITORY, DIGEST).await.unwrap();
    assert_eq!(by_digest.id, id);
    assert_eq!(cached.count_cache(&f.ctx).await.unwrap(), 2);

    cached.delete(&f.ctx, id).await.unwrap();

    let err = cached.get(&f.ctx, id).await.unwrap_err();
    assert!(err.is_code(ErrorCode::NotFound));
    let err = cached.get_by_digest(&f.ctx, REPOSITORY, DIGEST).await.unwrap_err();
    assert!(err.is_code(ErrorCode::NotFound));
    assert_eq!(cached.count_cache(&f.ctx).await.unwrap(), 0);
}

#[tokio::test]
async fn hit_is_served_without_the_delegate() {
    let f = Fixture::new().await;
    let cached = CachedArtifactManager::new(f.artifacts.clone(), f.cache.clone());
    let id = f.seed_artifact().await;

    cached.get(&f.ctx, id).await.unwrap();
    // bypass the wrapper: the cached copy stays until invalidated
    f.artifacts.delete(&f.ctx, id).await.unwrap();
    assert_eq!(cached.get(&f.ctx, id).await.unwrap().id, id);

    cached.delete_cache(&f.ctx, &format!("artifact:id:{id}")).await.unwrap();
    let err = cached.get(&f.ctx, id).await.unwrap_err();
    assert!(err.is_code(ErrorCode::NotFound));
}

#[tokio::test]
async fn writes_invalidate_artifact_entries() {
    let f = Fixture::new().await;
    let cached = CachedArtifactManager::new(f.artifacts.clone(), f.cache.clone());
    let id = f.seed_artifact().await;

    let mut artifact = cached.get(&f.ctx, id).await.unwrap();
    artifact.artifact_type = "IMAGE".into();
    cached.update(&f.ctx, &artifact, &["type"]).await.unwrap();
    assert_eq!(cached.get(&f.ctx, id).await.unwrap().artifact_type, "IMAGE");

    let pulled = chrono::Utc::now();
    cached.update_pull_time(&f.ctx, id, pulled).await.unwrap();
    let refreshed = cached
        .get_by_digest(&f.ctx, REPOSITORY, DIGEST)
        .await
        .unwrap();
    assert_eq!(refreshed.pull_time.unwrap().timestamp(), pulled.timestamp());
}

#[tokio::test]
async fn delete_inside_transaction_leaves_no_stale_entry() {
    let f = Fixture::new().await;
    let cached = CachedArtifactManager::new(f.artifacts.clone(), f.cache.clone());
    let id = f.seed_artifact().await;
    cached.get(&f.ctx, id).await.unwrap();

    let manager = &cached;
    with_transaction(&f.db, &f.ctx, |ctx| async move {
        manager.delete(&ctx, id).await?;
        // a read inside the transaction must not repopulate the cache
        assert!(manager.get(&ctx, id).await.is_err());
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(cached.count_cache(&f.ctx).await.unwrap(), 0);
    let err = cached.get(&f.ctx, id).await.unwrap_err();
    assert!(err.is_code(ErrorCode::NotFound));
}

#[tokio::test]
async fn deleted_reference_leaves_the_parent_entries() {
    let f = Fixture::new().await;
    let cached = CachedArtifactManager::new(f.artifacts.clone(), f.cache.clone());
    let child = f.seed_artifact().await;
    let mut index = Artifact::new(1, 1, REPOSITORY, "sha256:index");
    index.references.push(Reference {
        child_id: child,
        child_digest: DIGEST.into(),
        ..Reference::default()
    });
    let parent = f.artifacts.create(&f.ctx, &index).await.unwrap();

    assert_eq!(cached.get(&f.ctx, parent).await.unwrap().references.len(), 1);
    let by_digest = cached
        .get_by_digest(&f.ctx, REPOSITORY, "sha256:index")
        .await
        .unwrap();
    let reference = by_digest.references[0].id;

    cached.delete_reference(&f.ctx, reference).await.unwrap();

    assert!(cached.get(&f.ctx, parent).await.unwrap().references.is_empty());
    let by_digest = cached
        .get_by_digest(&f.ctx, REPOSITORY, "sha256:index")
        .await
        .unwrap();
    assert!(by_digest.references.is_empty());
    let err = cached.delete_reference(&f.ctx, reference).await.unwrap_err();
    assert!(err.is_code(ErrorCode::NotFound));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn read_inside_transaction_beside_cold_reader() {
    let f = Fixture::new().await;
    let cached = CachedArtifactManager::new(f.artifacts.clone(), f.cache.clone());
    let id = f.seed_artifact().await;

    let outside = cached.clone();
    let scoped = &cached;
    let reader = with_transaction(&f.db, &f.ctx, |ctx| async move {
        // the transaction holds the only connection of the in-memory pool
        let cold = tokio::spawn(async move {
            let ctx = Context::new();
            outside.get(&ctx, id).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let inside = tokio::time::timeout(Duration::from_secs(5), scoped.get(&ctx, id))
            .await
            .expect("read inside the transaction blocked")?;
        assert_eq!(inside.id, id);
        Ok(cold)
    })
    .await
    .unwrap();

    let cold = reader.await.unwrap().unwrap();
    assert_eq!(cold.id, id);
    assert_eq!(cached.count_cache(&f.ctx).await.unwrap(), 1);
}

#[tokio::test]
async fn repository_pull_count_is_not_stale() {
    let f = Fixture::new().await;
    let cached = CachedRepositoryManager::new(f.repositories.clone(), f.cache.clone());
    let id = cached
        .create(&f.ctx, &Repository::new(1, REPOSITORY))
        .await
        .unwrap();

    assert_eq!(cached.get_by_name(&f.ctx, REPOSITORY).await.unwrap().pull_count, 0);
    cached.add_pull_count(&f.ctx, id).await.unwrap();
    assert_eq!(cached.get_by_name(&f.ctx, REPOSITORY).await.unwrap().pull_count, 1);
    assert_eq!(cached.get(&f.ctx, id).await.unwrap().pull_count, 1);

    cached.flush_all(&f.ctx).await.unwrap();
    assert_eq!(cached.count_cache(&f.ctx).await.unwrap(), 0);
    assert_eq!(cached.resource_type(), "repository");
}

#[tokio::test]
async fn project_and_metadata_follow_writes() {
    let f = Fixture::new().await;
    let projects = CachedProjectManager::new(
        Arc::new(DefaultProjectManager::new(f.db.clone())),
        f.cache.clone(),
    );
    let metadata = CachedMetadataManager::new(
        Arc::new(DefaultMetadataManager::new(f.db.clone())),
        f.cache.clone(),
    );

    let id = projects
        .create(&f.ctx, &Project::new("library", 1), &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(projects.get_by_name(&f.ctx, "library").await.unwrap().project_id, id);
    assert!(metadata.get(&f.ctx, id, &[]).await.unwrap().is_empty());

    let public = BTreeMap::from([("public".to_string(), "true".to_string())]);
    metadata.add(&f.ctx, id, &public).await.unwrap();
    assert_eq!(metadata.get(&f.ctx, id, &["public"]).await.unwrap(), public);

    let private = BTreeMap::from([("public".to_string(), "false".to_string())]);
    metadata.update(&f.ctx, id, &private).await.unwrap();
    assert_eq!(metadata.get(&f.ctx, id, &["public"]).await.unwrap(), private);
    assert!(metadata.get(&f.ctx, id, &["severity"]).await.unwrap().is_empty());

    projects.get(&f.ctx, id).await.unwrap();
    projects.delete(&f.ctx, id).await.unwrap();
    for err in [
        projects.get(&f.ctx, id).await.unwrap_err(),
        projects.get_by_name(&f.ctx, "library").await.unwrap_err(),
    ] {
        assert!(err.is_code(ErrorCode::NotFound));
    }
}

#[tokio::test]
async fn manifest_bodies_round_trip() {
    let f = Fixture::new().await;
    let manifests = ManifestCache::new(f.cache.clone());
    let body = br#"{"schemaVersion":2}"#;

    let err = manifests.get(&f.ctx, DIGEST).await.unwrap_err();
    assert!(err.is_code(ErrorCode::NotFound));

    manifests.save(&f.ctx, DIGEST, body).await.unwrap();
    assert_eq!(manifests.get(&f.ctx, DIGEST).await.unwrap(), body);
    assert_eq!(manifests.count_cache(&f.ctx).await.unwrap(), 1);

    manifests.delete(&f.ctx, DIGEST).await;
    assert!(manifests.get(&f.ctx, DIGEST).await.is_err());
}
