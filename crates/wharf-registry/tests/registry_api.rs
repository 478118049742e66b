//! Client behaviour against an in-process registry.

mod common;

use common::FakeRegistry;
use wharf_registry::{
    compute_digest, ClientConfig, Descriptor, Manifest, MediaType, RegistryAuth, RegistryClient,
    RegistryError,
};

fn image(config: &[u8], layer: &[u8]) -> Vec<u8> {
    let manifest = Manifest::new(
        Descriptor::new(MediaType::DOCKER_IMAGE_CONFIG, compute_digest(config), config.len() as i64),
        vec![Descriptor::new(
            "application/vnd.docker.image.rootfs.diff.tar.gzip",
            compute_digest(layer),
            layer.len() as i64,
        )],
    );
    serde_json::to_vec(&manifest).unwrap()
}

async fn push_image(client: &RegistryClient, repo: &str, tag: &str) -> String {
    let config = br#"{"architecture":"amd64","os":"linux"}"#;
    let layer = b"layer-bytes";
    client.push_blob(repo, &compute_digest(config), config).await.unwrap();
    client.push_blob(repo, &compute_digest(layer), layer).await.unwrap();
    client
        .push_manifest(repo, tag, MediaType::DOCKER_V2, &image(config, layer))
        .await
        .unwrap()
}

#[tokio::test]
async fn push_then_pull_roundtrip() {
    let registry = FakeRegistry::start(false).await;
    let client = RegistryClient::new(ClientConfig::new(&registry.base)).unwrap();
    client.ping().await.unwrap();

    let digest = push_image(&client, "library/hello", "latest").await;

    let head = client
        .manifest_exist("library/hello", "latest")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.digest, digest);
    assert_eq!(head.media_type.as_str(), MediaType::DOCKER_V2);
    assert!(head.size > 0);

    let by_tag = client.pull_manifest("library/hello", "latest", &[]).await.unwrap();
    let by_digest = client.pull_manifest("library/hello", &digest, &[]).await.unwrap();
    assert_eq!(by_tag, by_digest);
    assert_eq!(by_tag.media_type, MediaType::DOCKER_V2);

    let manifest: Manifest = serde_json::from_slice(&by_tag.payload).unwrap();
    let config = client
        .pull_blob("library/hello", &manifest.config.digest)
        .await
        .unwrap();
    assert!(config.starts_with(b"{\"architecture\""));
    assert_eq!(client.list_tags("library/hello").await.unwrap(), vec!["latest"]);
}

#[tokio::test]
async fn missing_content_is_not_found() {
    let registry = FakeRegistry::start(false).await;
    let client = RegistryClient::new(ClientConfig::new(&registry.base)).unwrap();

    assert!(client.manifest_exist("nope/app", "v1").await.unwrap().is_none());
    assert!(!client.blob_exist("nope/app", "sha256:00").await.unwrap());
    assert!(client.list_tags("nope/app").await.unwrap().is_empty());

    let err = client.pull_manifest("nope/app", "v1", &[]).await.unwrap_err();
    assert!(err.is_not_found());
    let err = client.delete_manifest("nope/app", "v1").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_by_tag_resolves_digest() {
    let registry = FakeRegistry::start(false).await;
    let client = RegistryClient::new(ClientConfig::new(&registry.base)).unwrap();
    push_image(&client, "team/app", "v1").await;

    client.delete_manifest("team/app", "v1").await.unwrap();
    assert!(client.manifest_exist("team/app", "v1").await.unwrap().is_none());
}

#[tokio::test]
async fn catalog_follows_pagination() {
    let registry = FakeRegistry::start(false).await;
    let client = RegistryClient::new(ClientConfig::new(&registry.base)).unwrap();
    for repo in ["a/one", "b/two", "c/three", "d/four", "e/five"] {
        push_image(&client, repo, "latest").await;
    }
    assert_eq!(
        client.catalog().await.unwrap(),
        vec!["a/one", "b/two", "c/three", "d/four", "e/five"]
    );
}

#[tokio::test]
async fn mount_reuses_existing_blob() {
    let registry = FakeRegistry::start(false).await;
    let client = RegistryClient::new(ClientConfig::new(&registry.base)).unwrap();
    push_image(&client, "src/app", "v1").await;

    let layer = compute_digest(b"layer-bytes");
    client.mount_blob("src/app", &layer, "dst/app").await.unwrap();

    let err = client
        .mount_blob("src/app", "sha256:missing", "dst/app")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::UploadFailed { .. }));
}

#[tokio::test]
async fn token_challenge_is_answered_once_per_scope() {
    let registry = FakeRegistry::start(true).await;
    let client = RegistryClient::new(
        ClientConfig::new(&registry.base).with_auth(RegistryAuth::basic("user", "pass")),
    )
    .unwrap();

    client.ping().await.unwrap();
    client.ping().await.unwrap();
    assert_eq!(registry.token_requests(), 1);

    push_image(&client, "library/hello", "latest").await;
    assert!(client.manifest_exist("library/hello", "latest").await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_credentials_surface_unauthorized() {
    let registry = FakeRegistry::start(true).await;
    let client = RegistryClient::new(
        ClientConfig::new(&registry.base).with_auth(RegistryAuth::basic("user", "wrong")),
    )
    .unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));
}

#[tokio::test]
async fn rate_limited_client_still_completes() {
    let registry = FakeRegistry::start(false).await;
    let client =
        RegistryClient::new(ClientConfig::new(&registry.base).with_qps_limit(50)).unwrap();
    for _ in 0..5 {
        client.ping().await.unwrap();
    }
}
