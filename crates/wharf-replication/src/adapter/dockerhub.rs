//! Docker Hub adapter.
//!
//! Discovery, namespace management and tag deletion go through the Hub
//! API at [`HUB_URL`], authenticated with a JWT obtained by logging in.
//! Manifests and blobs move through the distribution API at
//! [`HUB_REGISTRY_URL`].
//!
//! The Hub API is rate limited. Requests pause when fewer than eight calls
//! remain in the current window, and a `429` is retried up to three times
//! after the delay given by `retry-after`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::GlobMatcher;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use wharf_core::Result;
use wharf_registry::auth::Token;
use wharf_registry::{Descriptor, PulledManifest, RegistryError};

use super::native::{image_info, DockerRegistryAdapter, USER_AGENT};
use super::{Adapter, AdapterFactory, ArtifactRegistry};
use crate::error::AdapterError;
use crate::filter;
use crate::model::{
    AdapterPattern, Artifact, CredentialType, Endpoint, EndpointPattern, EndpointType, Filter,
    HealthStatus, Namespace, Registry, RegistryInfo, Resource, REGISTRY_TYPE_DOCKER_HUB,
};
use crate::pool::WorkerPool;
use crate::token::{LazyToken, TokenSource};

/// Hub API endpoint.
pub const HUB_URL: &str = "https://hub.docker.com";
/// Distribution API endpoint of Docker Hub.
pub const HUB_REGISTRY_URL: &str = "https://registry-1.docker.io";

const PAGE_SIZE: usize = 100;
const MAX_ATTEMPTS: usize = 3;
const LOW_MARK: i64 = 8;
const TIMEOUT: Duration = Duration::from_secs(30);

const METADATA_FULL_NAME: &str = "full_name";
const METADATA_COMPANY: &str = "company";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct NamespacesResponse {
    #[serde(default)]
    namespaces: Vec<String>,
}

#[derive(Serialize)]
struct NewOrgRequest<'a> {
    orgname: &'a str,
    full_name: &'a str,
    company: &'a str,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Deserialize)]
struct HubRepository {
    name: String,
    namespace: String,
}

#[derive(Deserialize)]
struct HubTag {
    name: String,
}

struct HubLogin {
    http: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

#[async_trait]
impl TokenSource for HubLogin {
    async fn issue(&self) -> std::result::Result<Token, RegistryError> {
        let response = self
            .http
            .post(&self.url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Unauthorized {
                message: format!("docker hub login failed with {status}: {body}"),
            });
        }
        let login: LoginResponse = response.json().await?;
        tracing::debug!(username = %self.username, "logged in to docker hub");
        Ok(Token {
            value: login.token,
            expires_in: None,
        })
    }
}

/// Adapter for Docker Hub.
pub struct DockerHubAdapter {
    registry: Registry,
    hub_url: String,
    http: reqwest::Client,
    token: Option<LazyToken>,
    native: DockerRegistryAdapter,
    pool: WorkerPool,
}

impl std::fmt::Debug for DockerHubAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerHubAdapter")
            .field("hub_url", &self.hub_url)
            .field("native", &self.native)
            .field("logged_in", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl DockerHubAdapter {
    /// Builds an adapter using the record's URL for the Hub API, or
    /// [`HUB_URL`] when it has none.
    ///
    /// # Errors
    ///
    /// Returns an error when an HTTP client cannot be built.
    pub fn new(registry: Registry) -> Result<Self> {
        let hub_url = if registry.url.is_empty() {
            HUB_URL.to_string()
        } else {
            registry.url.clone()
        };
        Self::with_endpoints(registry, &hub_url, HUB_REGISTRY_URL)
    }

    /// Builds an adapter talking to explicit Hub API and distribution API
    /// endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error when an HTTP client cannot be built.
    pub fn with_endpoints(registry: Registry, hub_url: &str, registry_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(registry.insecure)
            .timeout(TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(AdapterError::from)?;
        let hub_url = hub_url.trim_end_matches('/').to_string();

        let token = registry
            .usable_credential()
            .filter(|c| c.credential_type == CredentialType::Basic)
            .map(|c| {
                LazyToken::new(Arc::new(HubLogin {
                    http: http.clone(),
                    url: format!("{hub_url}/v2/users/login/"),
                    username: c.access_key.clone(),
                    password: c.access_secret.clone(),
                }))
            });

        let native = DockerRegistryAdapter::new(Registry {
            url: registry_url.to_string(),
            ..registry.clone()
        })?;

        Ok(Self {
            registry,
            hub_url,
            http,
            token,
            native,
            pool: WorkerPool::default(),
        })
    }

    /// Replaces the worker pool used for tag listing.
    #[must_use]
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self.native = self.native.with_pool(pool);
        self
    }

    /// Creates `namespace` unless it exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the Hub API refuses the lookup or the creation.
    pub async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        if self.namespace_exists(&namespace.name).await? {
            tracing::info!(namespace = %namespace.name, "namespace already exists in docker hub");
            return Ok(());
        }
        let metadata = |key: &str| {
            namespace
                .metadata
                .get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or(&namespace.name)
                .to_string()
        };
        let full_name = metadata(METADATA_FULL_NAME);
        let company = metadata(METADATA_COMPANY);
        let body = serde_json::to_value(NewOrgRequest {
            orgname: &namespace.name,
            full_name: &full_name,
            company: &company,
        })
        .map_err(AdapterError::from)?;

        let response = self.send(Method::POST, "/v2/orgs/", Some(&body)).await?;
        check("create namespace", response).await?;
        tracing::debug!(namespace = %namespace.name, "namespace created in docker hub");
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let response = self
            .send(Method::GET, &format!("/v2/orgs/{namespace}/"), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check("get namespace", response).await?;
        Ok(true)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces: NamespacesResponse = self
            .get_json("list namespaces", "/v2/repositories/namespaces/")
            .await?;
        tracing::debug!(count = namespaces.namespaces.len(), "listed docker hub namespaces");
        Ok(namespaces.namespaces)
    }

    async fn candidate_namespaces(&self, pattern: &str) -> Result<Vec<String>> {
        let first = pattern.split('/').next().unwrap_or_default();
        if let Some(namespaces) = filter::specific_component(first) {
            tracing::debug!(?namespaces, pattern, "namespaces taken from the name filter");
            return Ok(namespaces);
        }
        self.list_namespaces().await
    }

    async fn list_repositories(&self, namespace: &str) -> Result<Vec<HubRepository>> {
        let mut repositories = Vec::new();
        let mut page = 1;
        loop {
            let path = format!("/v2/repositories/{namespace}/?page={page}&page_size={PAGE_SIZE}");
            let result: Page<HubRepository> = self.get_json("list repositories", &path).await?;
            repositories.extend(result.results);
            if result.next.as_deref().unwrap_or_default().is_empty() {
                break;
            }
            page += 1;
        }
        tracing::debug!(namespace, count = repositories.len(), "listed docker hub repositories");
        Ok(repositories)
    }

    async fn list_hub_tags(&self, namespace: &str, name: &str) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "/v2/repositories/{namespace}/{name}/tags/?page={page}&page_size={PAGE_SIZE}"
            );
            let result: Page<HubTag> = self.get_json("list tags", &path).await?;
            tags.extend(result.results.into_iter().map(|t| t.name));
            if result.next.as_deref().unwrap_or_default().is_empty() {
                break;
            }
            page += 1;
        }
        Ok(tags)
    }

    async fn repository_resource(
        &self,
        repository: HubRepository,
        matcher: Option<&GlobMatcher>,
        filters: &[Filter],
    ) -> Result<Option<Resource>> {
        let name = format!("{}/{}", repository.namespace, repository.name);
        if matcher.is_some_and(|m| !m.is_match(&name)) {
            return Ok(None);
        }
        let tags = self
            .list_hub_tags(&repository.namespace, &repository.name)
            .await?;
        let artifacts = tags.into_iter().map(Artifact::tagged).collect();
        let artifacts = filter::filter_artifacts(artifacts, filters)?;
        if artifacts.is_empty() {
            return Ok(None);
        }
        let mut resource = Resource::image(name, artifacts);
        resource.registry = Some(self.registry.clone());
        Ok(Some(resource))
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None).await?;
        let response = check(operation, response).await?;
        Ok(response.json().await.map_err(AdapterError::from)?)
    }

    /// Sends one Hub API request, waiting out the rate limit.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<Response, AdapterError> {
        let url = format!("{}{path}", self.hub_url);
        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("JWT {}", token.get().await?));
            }
            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                if let Some(token) = &self.token {
                    token.invalidate().await;
                }
            }
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                if let Some(wait) = exhaustion_wait(response.headers(), Utc::now()) {
                    tracing::info!(wait_secs = wait.as_secs_f64(), "docker hub rate limit nearly exhausted, pausing");
                    tokio::time::sleep(wait).await;
                }
                return Ok(response);
            }

            let Some(wait) = retry_after(response.headers(), Utc::now()) else {
                return Err(AdapterError::RateLimited {
                    message: "blocked by docker hub rate limit without retry-after".to_string(),
                });
            };
            tracing::info!(attempt, wait_secs = wait.as_secs_f64(), "docker hub rate limit hit, pausing");
            tokio::time::sleep(wait).await;
        }
        Err(AdapterError::RateLimited {
            message: format!("{method} {path} still limited after {MAX_ATTEMPTS} attempts"),
        })
    }

    fn split_repository(repository: &str) -> std::result::Result<(&str, &str), AdapterError> {
        match repository.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok((namespace, name))
            }
            _ => Err(AdapterError::invalid_resource(format!(
                "docker hub repositories are <namespace>/<name>, got {repository}"
            ))),
        }
    }
}

async fn check(operation: &str, response: Response) -> std::result::Result<Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(operation, status = status.as_u16(), body = %body, "docker hub request failed");
    Err(AdapterError::http(operation, status.as_u16(), body))
}

fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Delay requested by `retry-after`, in seconds or as an HTTP date.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let deadline = DateTime::parse_from_rfc2822(value).ok()?;
    Some(until(deadline.with_timezone(&Utc), now))
}

/// Pause before the next request when the window is nearly used up.
fn exhaustion_wait(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let header = |name: &str| headers.get(name)?.to_str().ok()?.trim().parse::<i64>().ok();
    let remaining = header("x-ratelimit-remaining")?;
    if remaining >= LOW_MARK {
        return None;
    }
    let reset = DateTime::from_timestamp(header("x-ratelimit-reset")?, 0)?;
    Some(until(reset, now))
}

#[async_trait]
impl Adapter for DockerHubAdapter {
    fn info(&self) -> RegistryInfo {
        image_info(REGISTRY_TYPE_DOCKER_HUB)
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut namespaces = BTreeSet::new();
        for resource in resources {
            let name = &resource.metadata.repository.name;
            if name.is_empty() {
                return Err(AdapterError::invalid_resource("the repository name must not be empty").into());
            }
            let namespace = name.split('/').next().unwrap_or_default();
            namespaces.insert(namespace.to_string());
        }

        for name in namespaces {
            let namespace = Namespace {
                name,
                ..Namespace::default()
            };
            self.create_namespace(&namespace).await.map_err(|e| {
                let message = format!("create namespace {} in docker hub: {}", namespace.name, e.message());
                e.with_message(message)
            })?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if let Some(token) = &self.token {
            if let Err(e) = token.get().await {
                tracing::warn!(url = %self.hub_url, error = %e, "docker hub login failed");
                return Ok(HealthStatus::Unhealthy);
            }
        }
        self.native.health_check().await
    }

    fn artifact_registry(&self) -> Option<&dyn ArtifactRegistry> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for DockerHubAdapter {
    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let pattern = filter::name_pattern(filters).unwrap_or_default();
        let matcher = if pattern.is_empty() {
            None
        } else {
            Some(filter::compile(pattern)?)
        };

        let mut repositories = Vec::new();
        for namespace in self.candidate_namespaces(pattern).await? {
            repositories.extend(self.list_repositories(&namespace).await?);
        }

        let found = self
            .pool
            .run(repositories, |repository| {
                self.repository_resource(repository, matcher.as_ref(), filters)
            })
            .await?;

        let resources: Vec<Resource> = found.into_iter().flatten().collect();
        tracing::debug!(count = resources.len(), "fetched docker hub artifacts");
        Ok(filter::filter_resources(resources, filters))
    }

    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<Descriptor>> {
        self.native.manifest_exist(repository, reference).await
    }

    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted: &[&str],
    ) -> Result<PulledManifest> {
        self.native.pull_manifest(repository, reference, accepted).await
    }

    async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        payload: &[u8],
    ) -> Result<String> {
        self.native
            .push_manifest(repository, reference, media_type, payload)
            .await
    }

    /// Docker Hub deletes by tag only; `reference` must be a tag.
    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        let (namespace, name) = Self::split_repository(repository)?;
        let path = format!("/v2/repositories/{namespace}/{name}/tags/{reference}/");
        let response = self.send(Method::DELETE, &path, None).await?;
        check("delete tag", response).await?;
        tracing::debug!(repository, reference, "deleted docker hub tag");
        Ok(())
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool> {
        self.native.blob_exist(repository, digest).await
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        self.native.pull_blob(repository, digest).await
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> Result<()> {
        self.native.push_blob(repository, digest, data).await
    }

    async fn mount_blob(&self, source: &str, digest: &str, destination: &str) -> Result<()> {
        self.native.mount_blob(source, digest, destination).await
    }

    async fn can_be_mount(&self, digest: &str) -> Result<Option<String>> {
        self.native.can_be_mount(digest).await
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.delete_manifest(repository, tag).await
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.native.list_tags(repository).await
    }
}

/// Builds [`DockerHubAdapter`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerHubFactory;

impl AdapterFactory for DockerHubFactory {
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(DockerHubAdapter::new(registry.clone())?))
    }

    fn adapter_pattern(&self) -> Option<AdapterPattern> {
        Some(AdapterPattern {
            endpoint_pattern: Some(EndpointPattern {
                endpoint_type: EndpointType::Fix,
                endpoints: vec![Endpoint {
                    key: "hub.docker.com".to_string(),
                    value: HUB_URL.to_string(),
                }],
            }),
            credential_pattern: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_retry_after_forms() {
        let now = DateTime::parse_from_rfc3339("2024-02-01T10:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(
            retry_after(&headers(&[("retry-after", "12")]), now),
            Some(Duration::from_secs(12))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Thu, 01 Feb 2024 10:01:00 GMT")]), now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Thu, 01 Feb 2024 09:00:00 GMT")]), now),
            Some(Duration::ZERO)
        );
        assert_eq!(retry_after(&headers(&[]), now), None);
        assert_eq!(retry_after(&headers(&[("retry-after", "soon")]), now), None);
    }

    #[test]
    fn test_exhaustion_wait() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let low = headers(&[("x-ratelimit-remaining", "3"), ("x-ratelimit-reset", "1700000030")]);
        assert_eq!(exhaustion_wait(&low, now), Some(Duration::from_secs(30)));
        let plenty = headers(&[("x-ratelimit-remaining", "120"), ("x-ratelimit-reset", "1700000030")]);
        assert_eq!(exhaustion_wait(&plenty, now), None);
        assert_eq!(exhaustion_wait(&headers(&[]), now), None);
    }

    #[test]
    fn test_split_repository() {
        assert_eq!(
            DockerHubAdapter::split_repository("library/hello").unwrap(),
            ("library", "hello")
        );
        assert!(DockerHubAdapter::split_repository("hello").is_err());
        assert!(DockerHubAdapter::split_repository("a/b/c").is_err());
    }

    #[test]
    fn test_factory_pattern() {
        let pattern = DockerHubFactory.adapter_pattern().unwrap();
        let endpoints = pattern.endpoint_pattern.unwrap();
        assert_eq!(endpoints.endpoint_type, EndpointType::Fix);
        assert_eq!(endpoints.endpoints[0].key, "hub.docker.com");
    }
}
