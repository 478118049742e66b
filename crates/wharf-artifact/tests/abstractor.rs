//! Manifest abstraction for each supported manifest kind.

mod common;

use common::{Harness, REPOSITORY};
use serde_json::json;
use wharf_artifact::{Artifact, ArtifactManager};
use wharf_core::ErrorCode;
use wharf_registry::{compute_digest, MediaType};

const V1_MANIFEST: &str = r#"{
   "name": "hello-world",
   "tag": "latest",
   "architecture": "amd64",
   "fsLayers": [
      {"blobSum": "sha256:5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef"},
      {"blobSum": "sha256:cc8567d70002e957612902a8e985ea129d831ebe04057d88fb644857caa45d11"}
   ],
   "history": [
      {"v1Compatibility": "{\"id\":\"e45a5af57b00862e5ef5782a9925979a02ba2b12dff832fd0991335f4a11e5c5\"}"}
   ],
   "schemaVersion": 1,
   "signatures": [
      {
         "header": {"jwk": {"crv": "P-256", "kid": "OD6I:6DRK", "kty": "EC"}, "alg": "ES256"},
         "signature": "XREm0L8WNn27Ga_iE_vRnTxVMhhYY0Zst_FfkKopg6gWSoTOZTuW4rK0fg_IqnKkEKlbD83tD46LKEGi5aIVFg",
         "protected": "eyJmb3JtYXRMZW5ndGgiOjY2MjgsImZvcm1hdFRhaWwiOiJDbjAiLCJ0aW1lIjoiMjAxNS0wNC0wOFQxODo1Mjo1OVoifQ"
      }
   ]
}"#;

fn pending(h: &Harness, digest: &str) -> Artifact {
    Artifact::new(1, h.repository_id, REPOSITORY, digest)
}

#[tokio::test]
async fn schema1_manifest_keeps_zero_size() {
    let h = Harness::new().await;
    for media_type in [MediaType::DOCKER_V1_SIGNED, "application/json", ""] {
        let body = format!("{V1_MANIFEST}{}", media_type.len());
        let digest = h.registry.add_manifest(media_type, body.as_bytes());
        let mut artifact = pending(&h, &digest);
        h.abstractor
            .abstract_metadata(&h.ctx, &mut artifact)
            .await
            .unwrap();
        assert_eq!(artifact.manifest_media_type, MediaType::DOCKER_V1_SIGNED);
        assert_eq!(artifact.media_type, MediaType::DOCKER_V1_SIGNED);
        assert_eq!(artifact.size, 0);
        assert_eq!(artifact.artifact_type, "IMAGE");
    }
}

#[tokio::test]
async fn schema2_manifest_sums_config_and_layers() {
    let h = Harness::new().await;
    let config = h.registry.add_blob(br#"{"architecture":"amd64","os":"linux","author":"me"}"#);
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": MediaType::DOCKER_V2,
        "config": {"mediaType": MediaType::DOCKER_IMAGE_CONFIG, "size": 1510, "digest": config},
        "layers": [{
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": 977,
            "digest": "sha256:1b930d010525941c1d56ec53b97bd057a67ae1865eebf042686d2a2d18271ced",
        }],
        "annotations": {"com.example.key1": "value1"},
    });
    let body = serde_json::to_vec(&manifest).unwrap();
    let digest = h.registry.add_manifest(MediaType::DOCKER_V2, &body);

    let mut artifact = pending(&h, &digest);
    h.abstractor
        .abstract_metadata(&h.ctx, &mut artifact)
        .await
        .unwrap();

    assert_eq!(artifact.manifest_media_type, MediaType::DOCKER_V2);
    assert_eq!(artifact.media_type, MediaType::DOCKER_IMAGE_CONFIG);
    assert_eq!(artifact.size, body.len() as i64 + 1510 + 977);
    assert_eq!(artifact.annotations["com.example.key1"], "value1");
    assert_eq!(artifact.artifact_type, "IMAGE");
    assert_eq!(artifact.extra_attrs["os"], "linux");
    assert_eq!(artifact.extra_attrs["author"], "me");
}

#[tokio::test]
async fn index_size_is_additive_over_children() {
    let h = Harness::new().await;
    let first = compute_digest(b"child-1");
    let second = compute_digest(b"child-2");
    let first_id = h.seed(&first, 10).await;
    let second_id = h.seed(&second, 10).await;
    let digest = h.registry.push_index(&[(&first, "linux"), (&second, "windows")]);

    let mut artifact = pending(&h, &digest);
    h.abstractor
        .abstract_metadata(&h.ctx, &mut artifact)
        .await
        .unwrap();

    assert_eq!(artifact.media_type, MediaType::OCI_INDEX);
    assert_eq!(artifact.size, h.registry.manifest_len(&digest) + 20);
    assert_eq!(artifact.references.len(), 2);
    assert_eq!(artifact.references[0].child_id, first_id);
    assert_eq!(artifact.references[1].child_id, second_id);
    assert_eq!(
        artifact.references[1].platform.as_ref().unwrap().os,
        "windows"
    );
}

#[tokio::test]
async fn index_with_missing_child_is_not_found() {
    let h = Harness::new().await;
    let digest = h
        .registry
        .push_index(&[(&compute_digest(b"never pushed"), "linux")]);
    let mut artifact = pending(&h, &digest);
    let err = h
        .abstractor
        .abstract_metadata(&h.ctx, &mut artifact)
        .await
        .unwrap_err();
    assert!(err.is_code(ErrorCode::NotFound));
}

#[tokio::test]
async fn index_artifact_type_annotation_overrides_media_type() {
    let h = Harness::new().await;
    let child = compute_digest(b"only");
    h.seed(&child, 10).await;
    let index = json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OCI_INDEX,
        "manifests": [{"mediaType": MediaType::OCI_MANIFEST, "digest": child, "size": 10}],
        "annotations": {"org.opencontainers.artifactType": "application/vnd.example.bundle.config.v1+json"},
    });
    let digest = h
        .registry
        .add_manifest(MediaType::OCI_INDEX, &serde_json::to_vec(&index).unwrap());

    let mut artifact = pending(&h, &digest);
    h.abstractor
        .abstract_metadata(&h.ctx, &mut artifact)
        .await
        .unwrap();
    assert_eq!(artifact.media_type, "application/vnd.example.bundle.config.v1+json");
    assert_eq!(artifact.artifact_type, "BUNDLE");
}

#[tokio::test]
async fn cnab_bundle_merges_config_into_extra_attrs() {
    let h = Harness::new().await;
    let bundle = json!({
        "schemaVersion": "v1.0.0",
        "name": "helloworld",
        "version": "0.1.1",
        "description": "A short description of your bundle",
        "invocationImages": [{"imageType": "docker", "image": "cnab/helloworld:0.1.1"}],
    });
    let config_blob = h.registry.add_blob(&serde_json::to_vec(&bundle).unwrap());
    let config_manifest = json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OCI_MANIFEST,
        "config": {"mediaType": "application/vnd.cnab.config.v1+json", "size": 498, "digest": config_blob},
        "layers": [],
    });
    let config_digest = h.registry.add_manifest(
        MediaType::OCI_MANIFEST,
        &serde_json::to_vec(&config_manifest).unwrap(),
    );
    let invocation_digest = compute_digest(b"invocation image");
    h.seed(&config_digest, 300).await;
    h.seed(&invocation_digest, 1000).await;

    let index = json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OCI_INDEX,
        "manifests": [
            {
                "mediaType": MediaType::OCI_MANIFEST,
                "digest": config_digest,
                "size": 300,
                "annotations": {"io.cnab.manifest.type": "config"},
            },
            {
                "mediaType": MediaType::DOCKER_V2,
                "digest": invocation_digest,
                "size": 1000,
                "annotations": {"io.cnab.manifest.type": "invocation"},
            },
        ],
        "annotations": {
            "io.cnab.keywords": "[\"helloworld\",\"cnab\",\"tutorial\"]",
            "io.cnab.runtime_version": "v1.0.0",
            "org.opencontainers.artifactType": MediaType::CNAB,
            "org.opencontainers.image.description": "A short description of your bundle",
            "org.opencontainers.image.title": "helloworld",
            "org.opencontainers.image.version": "0.1.1",
        },
    });
    let digest = h
        .registry
        .add_manifest(MediaType::OCI_INDEX, &serde_json::to_vec(&index).unwrap());

    let mut artifact = pending(&h, &digest);
    h.abstractor
        .abstract_metadata(&h.ctx, &mut artifact)
        .await
        .unwrap();

    assert_eq!(artifact.media_type, MediaType::CNAB);
    assert_eq!(artifact.artifact_type, "CNAB");
    assert_eq!(artifact.references.len(), 2);
    for key in ["schemaVersion", "name", "version", "description", "invocationImages"] {
        assert!(artifact.extra_attrs.contains_key(key), "missing {key}");
    }
    assert_eq!(artifact.extra_attrs["name"], "helloworld");
}

#[tokio::test]
async fn oci_artifact_type_applies_with_empty_config() {
    let h = Harness::new().await;
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OCI_MANIFEST,
        "artifactType": "application/vnd.example.sbom.v1",
        "config": {
            "mediaType": MediaType::OCI_EMPTY,
            "size": 2,
            "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
        },
        "layers": [{"mediaType": "application/spdx+json", "size": 42, "digest": compute_digest(b"sbom")}],
    });
    let body = serde_json::to_vec(&manifest).unwrap();
    let digest = h.registry.add_manifest(MediaType::OCI_MANIFEST, &body);

    let mut artifact = pending(&h, &digest);
    h.abstractor
        .abstract_metadata(&h.ctx, &mut artifact)
        .await
        .unwrap();
    assert_eq!(artifact.media_type, "application/vnd.example.sbom.v1");
    assert_eq!(artifact.artifact_type, "UNKNOWN");
    assert_eq!(artifact.size, body.len() as i64 + 2 + 42);
}

#[tokio::test]
async fn unsupported_manifest_type_is_bad_request() {
    let h = Harness::new().await;
    let digest = h
        .registry
        .add_manifest("application/vnd.example.unknown+json", b"{}");
    let mut artifact = pending(&h, &digest);
    let err = h
        .abstractor
        .abstract_metadata(&h.ctx, &mut artifact)
        .await
        .unwrap_err();
    assert!(err.is_code(ErrorCode::BadRequest));
}

#[tokio::test]
async fn ingest_roundtrips_through_storage() {
    let h = Harness::new().await;
    let first = h.registry.push_image("linux");
    let second = h.registry.push_image("windows");
    let mut first_artifact = pending(&h, &first);
    let mut second_artifact = pending(&h, &second);
    h.abstractor.ingest(&h.ctx, &mut first_artifact).await.unwrap();
    h.abstractor.ingest(&h.ctx, &mut second_artifact).await.unwrap();

    let index = h.registry.push_index(&[(&first, "linux"), (&second, "windows")]);
    let mut artifact = pending(&h, &index);
    let id = h.abstractor.ingest(&h.ctx, &mut artifact).await.unwrap();

    let stored = h.artifacts.get(&h.ctx, id).await.unwrap();
    assert_eq!(stored.digest, artifact.digest);
    assert_eq!(stored.media_type, artifact.media_type);
    assert_eq!(stored.manifest_media_type, artifact.manifest_media_type);
    assert_eq!(stored.artifact_type, artifact.artifact_type);
    assert_eq!(stored.size, artifact.size);
    assert_eq!(stored.push_time, artifact.push_time);
    assert_eq!(stored.annotations, artifact.annotations);
    assert_eq!(stored.extra_attrs, artifact.extra_attrs);

    for reference in &stored.references {
        let child = h
            .artifacts
            .get_by_digest(&h.ctx, REPOSITORY, &reference.child_digest)
            .await
            .unwrap();
        assert_eq!(child.id, reference.child_id);
    }
    let children: Vec<_> = stored.references.iter().map(|r| r.child_id).collect();
    assert_eq!(children, vec![first_artifact.id, second_artifact.id]);

    let err = h.abstractor.ingest(&h.ctx, &mut pending(&h, &index)).await.unwrap_err();
    assert!(err.is_code(ErrorCode::Conflict));
}
