//! Shared fixtures: an in-memory registry and a migrated database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use wharf_artifact::{
    Abstractor, ArtifactController, ArtifactDao, ArtifactManager, BlobFetcher,
    DefaultArtifactManager, DefaultRepositoryManager, RepositoryManager, MIGRATIONS,
};
use wharf_core::{Context, Database, Error, Result};
use wharf_registry::{compute_digest, MediaType, PulledManifest};

pub const REPOSITORY: &str = "library/hello";

#[derive(Default)]
pub struct FakeRegistry {
    manifests: Mutex<HashMap<String, (String, Vec<u8>)>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeRegistry {
    pub fn add_blob(&self, data: &[u8]) -> String {
        let digest = compute_digest(data);
        self.blobs.lock().insert(digest.clone(), data.to_vec());
        digest
    }

    pub fn add_manifest(&self, media_type: &str, data: &[u8]) -> String {
        let digest = compute_digest(data);
        self.manifests
            .lock()
            .insert(digest.clone(), (media_type.to_string(), data.to_vec()));
        digest
    }

    pub fn manifest_len(&self, digest: &str) -> i64 {
        self.manifests.lock()[digest].1.len() as i64
    }

    /// Pushes a schema 2 image with one layer; returns its digest.
    pub fn push_image(&self, os: &str) -> String {
        let config = json!({
            "architecture": "amd64",
            "os": os,
            "created": "2024-05-01T10:00:00Z",
            "history": [{"created_by": format!("ADD rootfs-{os}.tar /")}],
        });
        let config = serde_json::to_vec(&config).unwrap();
        let config_digest = self.add_blob(&config);
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": MediaType::DOCKER_V2,
            "config": {
                "mediaType": MediaType::DOCKER_IMAGE_CONFIG,
                "size": config.len(),
                "digest": config_digest,
            },
            "layers": [{
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 100,
                "digest": compute_digest(os.as_bytes()),
            }],
        });
        self.add_manifest(MediaType::DOCKER_V2, &serde_json::to_vec(&manifest).unwrap())
    }

    /// Pushes an OCI index over `children`; returns its digest.
    pub fn push_index(&self, children: &[(&str, &str)]) -> String {
        let manifests: Vec<_> = children
            .iter()
            .map(|(digest, os)| {
                json!({
                    "mediaType": MediaType::DOCKER_V2,
                    "digest": digest,
                    "size": 10,
                    "platform": {"architecture": "amd64", "os": os},
                })
            })
            .collect();
        let index = json!({
            "schemaVersion": 2,
            "mediaType": MediaType::OCI_INDEX,
            "manifests": manifests,
        });
        self.add_manifest(MediaType::OCI_INDEX, &serde_json::to_vec(&index).unwrap())
    }
}

#[async_trait]
impl BlobFetcher for FakeRegistry {
    async fn pull_manifest(&self, _repository: &str, reference: &str) -> Result<PulledManifest> {
        let manifests = self.manifests.lock();
        let (media_type, payload) = manifests
            .get(reference)
            .ok_or_else(|| Error::not_found(format!("manifest {reference} not found")))?;
        Ok(PulledManifest {
            media_type: media_type.clone(),
            digest: reference.to_string(),
            payload: payload.clone(),
        })
    }

    async fn pull_blob(&self, _repository: &str, digest: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("blob {digest} not found")))
    }
}

pub struct Harness {
    pub ctx: Context,
    pub db: Database,
    pub registry: Arc<FakeRegistry>,
    pub artifacts: Arc<DefaultArtifactManager>,
    pub repositories: Arc<DefaultRepositoryManager>,
    pub abstractor: Abstractor,
    pub controller: ArtifactController,
    pub repository_id: i64,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Database::in_memory().await.unwrap();
        db.migrate(MIGRATIONS).await.unwrap();
        let registry = Arc::new(FakeRegistry::default());
        let artifacts = Arc::new(DefaultArtifactManager::new(ArtifactDao::new(db.clone())));
        let repositories = Arc::new(DefaultRepositoryManager::new(db.clone()));
        let abstractor = Abstractor::new(artifacts.clone(), registry.clone());
        let controller = ArtifactController::new(
            db.clone(),
            artifacts.clone(),
            repositories.clone(),
            abstractor.clone(),
        );
        let ctx = Context::new();
        let (_, repository) = controller.ensure_repository(&ctx, 1, REPOSITORY).await.unwrap();
        Self {
            ctx,
            db,
            registry,
            artifacts,
            repositories,
            abstractor,
            controller,
            repository_id: repository.repository_id,
        }
    }

    /// Records an artifact directly, bypassing abstraction.
    pub async fn seed(&self, digest: &str, size: i64) -> i64 {
        let mut artifact = wharf_artifact::Artifact::new(1, self.repository_id, REPOSITORY, digest);
        artifact.media_type = MediaType::DOCKER_IMAGE_CONFIG.into();
        artifact.manifest_media_type = MediaType::DOCKER_V2.into();
        artifact.size = size;
        self.artifacts.create(&self.ctx, &artifact).await.unwrap()
    }

    pub async fn repository_count(&self) -> i64 {
        self.repositories
            .count(&self.ctx, &wharf_artifact::RepositoryQuery::default())
            .await
            .unwrap()
    }
}
