//! OCI Distribution API client.
//!
//! Every request goes through [`RegistryClient::send`], which applies the
//! QPS limiter, attaches credentials and answers one bearer challenge per
//! request before giving up.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{
    HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LINK, LOCATION,
    WWW_AUTHENTICATE,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use crate::auth::{basic_header, scopes_for, Challenge, TokenAuthorizer};
use crate::config::{ClientConfig, RegistryAuth};
use crate::error::RegistryError;
use crate::oci::{compute_digest, is_digest, Catalog, Descriptor, ErrorResponse, MediaType, TagList};

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";
const PAGE_SIZE: usize = 1000;

/// A manifest as pulled from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledManifest {
    /// Media type from the response, or from the document's `mediaType`.
    pub media_type: String,
    /// Content digest.
    pub digest: String,
    /// Raw document bytes.
    pub payload: Vec<u8>,
}

/// Client for the OCI distribution API of one registry.
pub struct RegistryClient {
    config: ClientConfig,
    http: reqwest::Client,
    authorizer: TokenAuthorizer,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("config", &self.config)
            .field("authorizer", &self.authorizer)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl RegistryClient {
    /// Creates a new registry client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wharf_registry::{ClientConfig, RegistryAuth, RegistryClient};
    ///
    /// let config = ClientConfig::new("https://registry.example.com")
    ///     .with_auth(RegistryAuth::basic("admin", "secret"));
    /// let client = RegistryClient::new(config)?;
    /// # Ok::<(), wharf_registry::RegistryError>(())
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self, RegistryError> {
        url::Url::parse(&config.url).map_err(|e| RegistryError::InvalidUrl {
            url: config.url.clone(),
            message: e.to_string(),
        })?;
        let http = Self::build_http_client(&config)?;
        let credentials = config
            .auth
            .credentials()
            .map(|(u, p)| (u.to_string(), p.to_string()));
        let limiter = config
            .qps_limit
            .map(|qps| RateLimiter::direct(Quota::per_second(qps)));

        Ok(Self {
            authorizer: TokenAuthorizer::new(http.clone(), credentials),
            config,
            http,
            limiter,
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Checks that the registry speaks the v2 API and accepts the
    /// configured credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unreachable or rejects the
    /// credentials.
    pub async fn ping(&self) -> Result<(), RegistryError> {
        let url = format!("{}/v2/", self.config.url);
        let response = self.send(Method::GET, &url, |r| r).await?;
        check(response, || "registry API".to_string()).await?;
        Ok(())
    }

    /// Lists every repository, following pagination links.
    ///
    /// # Errors
    ///
    /// Returns an error if any page cannot be retrieved.
    pub async fn catalog(&self) -> Result<Vec<String>, RegistryError> {
        let mut repositories = Vec::new();
        let mut next = Some(format!("{}/v2/_catalog?n={PAGE_SIZE}", self.config.url));
        while let Some(url) = next {
            let response = self.send(Method::GET, &url, |r| r).await?;
            let response = check(response, || "catalog".to_string()).await?;
            next = self.next_page(response.headers());
            let page: Catalog = response.json().await?;
            repositories.extend(page.repositories);
        }
        Ok(repositories)
    }

    /// Lists all tags of a repository; a missing repository has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the tags cannot be retrieved.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let mut tags = Vec::new();
        let mut next = Some(format!(
            "{}/v2/{repository}/tags/list?n={PAGE_SIZE}",
            self.config.url
        ));
        while let Some(url) = next {
            let response = self.send(Method::GET, &url, |r| r).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(tags);
            }
            let response = check(response, || format!("repository {repository}")).await?;
            next = self.next_page(response.headers());
            let page: TagList = response.json().await?;
            tags.extend(page.tags.unwrap_or_default());
        }
        Ok(tags)
    }

    /// Returns the descriptor of a manifest, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be contacted.
    pub async fn manifest_exist(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<Descriptor>, RegistryError> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.config.url);
        let accept = MediaType::ACCEPTED_MANIFESTS.join(", ");
        let response = self
            .send(Method::HEAD, &url, |r| r.header(ACCEPT, accept.as_str()))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, || format!("manifest {repository}:{reference}")).await?;

        let headers = response.headers();
        let digest = header_str(headers, DOCKER_CONTENT_DIGEST)
            .map(str::to_string)
            .or_else(|| is_digest(reference).then(|| reference.to_string()))
            .unwrap_or_default();
        let size = header_str(headers, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        Ok(Some(Descriptor::new(content_type(headers), digest, size)))
    }

    /// Pulls a manifest, asking for `accepted` media types (all known
    /// manifest types when empty).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for a missing manifest and
    /// [`RegistryError::DigestMismatch`] when a by-digest pull returns other
    /// content.
    pub async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted: &[&str],
    ) -> Result<PulledManifest, RegistryError> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.config.url);
        let accept = if accepted.is_empty() {
            MediaType::ACCEPTED_MANIFESTS.join(", ")
        } else {
            accepted.join(", ")
        };
        let response = self
            .send(Method::GET, &url, |r| r.header(ACCEPT, accept.as_str()))
            .await?;
        let response = check(response, || format!("manifest {repository}:{reference}")).await?;

        let mut media_type = content_type(response.headers());
        let header_digest = header_str(response.headers(), DOCKER_CONTENT_DIGEST).map(str::to_string);
        let payload = response.bytes().await?.to_vec();

        if media_type.is_empty() || media_type == MediaType::JSON {
            if let Some(declared) = declared_media_type(&payload) {
                media_type = declared;
            }
        }

        let computed = compute_digest(&payload);
        if is_digest(reference) && reference.starts_with("sha256:") && reference != computed {
            return Err(RegistryError::DigestMismatch {
                expected: reference.to_string(),
                actual: computed,
            });
        }

        Ok(PulledManifest {
            media_type,
            digest: header_digest.unwrap_or(computed),
            payload,
        })
    }

    /// Pushes a manifest under `reference` and returns its digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the manifest.
    pub async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        payload: &[u8],
    ) -> Result<String, RegistryError> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.config.url);
        let response = self
            .send(Method::PUT, &url, |r| {
                r.header(CONTENT_TYPE, media_type).body(payload.to_vec())
            })
            .await?;
        let response = check(response, || format!("repository {repository}")).await?;

        let digest = header_str(response.headers(), DOCKER_CONTENT_DIGEST)
            .map_or_else(|| compute_digest(payload), str::to_string);
        tracing::debug!(repository, reference, digest = %digest, "pushed manifest");
        Ok(digest)
    }

    /// Deletes a manifest. A tag reference is first resolved to its digest,
    /// since the API deletes by digest only.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the manifest does not exist.
    pub async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<(), RegistryError> {
        let digest = if is_digest(reference) {
            reference.to_string()
        } else {
            self.manifest_exist(repository, reference)
                .await?
                .map(|d| d.digest)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| RegistryError::NotFound {
                    what: format!("manifest {repository}:{reference}"),
                })?
        };

        let url = format!("{}/v2/{repository}/manifests/{digest}", self.config.url);
        let response = self.send(Method::DELETE, &url, |r| r).await?;
        check(response, || format!("manifest {repository}@{digest}")).await?;
        Ok(())
    }

    /// Checks whether a blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be contacted.
    pub async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool, RegistryError> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.config.url);
        let response = self.send(Method::HEAD, &url, |r| r).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response, || format!("blob {repository}@{digest}")).await?;
        Ok(true)
    }

    /// Pulls a blob and verifies its digest.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for a missing blob and
    /// [`RegistryError::DigestMismatch`] for corrupt content.
    pub async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.config.url);
        let response = self.send(Method::GET, &url, |r| r).await?;
        let response = check(response, || format!("blob {repository}@{digest}")).await?;
        let data = response.bytes().await?.to_vec();

        if digest.starts_with("sha256:") {
            let actual = compute_digest(&data);
            if actual != digest {
                return Err(RegistryError::DigestMismatch {
                    expected: digest.to_string(),
                    actual,
                });
            }
        }
        Ok(data)
    }

    /// Uploads a blob in a single request after opening an upload session.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UploadFailed`] if the session has no location,
    /// or the registry's error.
    pub async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> Result<(), RegistryError> {
        let start_url = format!("{}/v2/{repository}/blobs/uploads/", self.config.url);
        let response = self.send(Method::POST, &start_url, |r| r).await?;
        let response = check(response, || format!("repository {repository}")).await?;

        let location = header_str(response.headers(), LOCATION.as_str()).ok_or_else(|| {
            RegistryError::UploadFailed {
                message: "no upload location returned".to_string(),
            }
        })?;
        let mut upload_url = self.resolve(location)?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let response = self
            .send(Method::PUT, upload_url.as_str(), |r| {
                r.header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;
        check(response, || format!("upload session of {repository}")).await?;
        tracing::debug!(repository, digest, size = data.len(), "pushed blob");
        Ok(())
    }

    /// Mounts a blob from another repository of the same registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UploadFailed`] when the registry opens an
    /// upload session instead of mounting.
    pub async fn mount_blob(&self, source: &str, digest: &str, destination: &str) -> Result<(), RegistryError> {
        let mut url = self.resolve(&format!("/v2/{destination}/blobs/uploads/"))?;
        url.query_pairs_mut()
            .append_pair("mount", digest)
            .append_pair("from", source);
        let response = self.send(Method::POST, url.as_str(), |r| r).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Err(RegistryError::UploadFailed {
                message: format!("registry did not mount {digest} from {source}"),
            });
        }
        check(response, || format!("blob {source}@{digest}")).await?;
        Ok(())
    }

    /// Deletes a blob.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the blob does not exist.
    pub async fn delete_blob(&self, repository: &str, digest: &str) -> Result<(), RegistryError> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.config.url);
        let response = self.send(Method::DELETE, &url, |r| r).await?;
        check(response, || format!("blob {repository}@{digest}")).await?;
        Ok(())
    }

    /// Sends a request built by `build`, answering at most one bearer
    /// challenge.
    async fn send<F>(&self, method: Method, url: &str, build: F) -> Result<Response, RegistryError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let parsed = url::Url::parse(url).map_err(|e| RegistryError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let scopes = scopes_for(&method, &parsed);
        let mut challenged = false;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }
            let request = build(self.http.request(method.clone(), parsed.clone()));
            let response = self.authorize(request, &scopes).await?.send().await?;

            if response.status() != StatusCode::UNAUTHORIZED
                || challenged
                || matches!(self.config.auth, RegistryAuth::Bearer { .. })
            {
                return Ok(response);
            }
            let challenge = header_str(response.headers(), WWW_AUTHENTICATE.as_str())
                .and_then(Challenge::parse)
                .filter(Challenge::is_bearer);
            let Some(challenge) = challenge else {
                return Ok(response);
            };

            tracing::debug!(realm = challenge.realm().unwrap_or_default(), scopes = ?scopes, "answering bearer challenge");
            self.authorizer.learn(challenge);
            self.authorizer.invalidate(&scopes).await;
            challenged = true;
        }
    }

    async fn authorize(&self, request: RequestBuilder, scopes: &[String]) -> Result<RequestBuilder, RegistryError> {
        let mut headers = HeaderMap::new();
        match &self.config.auth {
            RegistryAuth::Bearer { token } => {
                return Ok(request.bearer_auth(token));
            }
            auth => {
                if let Some(token) = self.authorizer.token(scopes).await? {
                    return Ok(request.bearer_auth(token));
                }
                if let Some((username, password)) = auth.credentials() {
                    headers.insert(AUTHORIZATION, basic_header(username, password)?);
                }
            }
        }
        Ok(request.headers(headers))
    }

    fn resolve(&self, location: &str) -> Result<url::Url, RegistryError> {
        url::Url::parse(&self.config.url)
            .and_then(|base| base.join(location))
            .map_err(|e| RegistryError::InvalidUrl {
                url: location.to_string(),
                message: e.to_string(),
            })
    }

    /// Returns the `rel="next"` target of a `Link` header.
    fn next_page(&self, headers: &HeaderMap) -> Option<String> {
        let link = header_str(headers, LINK.as_str())?;
        if !link.contains("rel=\"next\"") {
            return None;
        }
        let start = link.find('<')? + 1;
        let end = link[start..].find('>')? + start;
        self.resolve(&link[start..end]).ok().map(String::from)
    }

    /// Builds the HTTP client with proper configuration.
    fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, RegistryError> {
        reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| RegistryError::ConnectionFailed {
                url: config.url.clone(),
                source: e,
            })
    }
}

/// Maps a non-success response to an error; `what` names the resource for
/// a 404.
async fn check<W>(response: Response, what: W) -> Result<Response, RegistryError>
where
    W: FnOnce() -> String,
{
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.summary())
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => RegistryError::NotFound { what: what() },
        StatusCode::UNAUTHORIZED => RegistryError::Unauthorized { message },
        StatusCode::FORBIDDEN => RegistryError::Forbidden { message },
        other => RegistryError::HttpError {
            status: other.as_u16(),
            message,
        },
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn content_type(headers: &HeaderMap) -> String {
    header_str(headers, CONTENT_TYPE.as_str())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn declared_media_type(payload: &[u8]) -> Option<String> {
    let document: serde_json::Value = serde_json::from_slice(payload).ok()?;
    document
        .get("mediaType")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new(ClientConfig::new("https://registry.example.com"));
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = RegistryClient::new(ClientConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidUrl { .. }));
    }

    #[test]
    fn test_next_page_relative_link() {
        let client = RegistryClient::new(ClientConfig::new("https://r.example.com")).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            "</v2/_catalog?last=b&n=2>; rel=\"next\"".parse().unwrap(),
        );
        assert_eq!(
            client.next_page(&headers).as_deref(),
            Some("https://r.example.com/v2/_catalog?last=b&n=2")
        );
        assert!(client.next_page(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_content_type_strips_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert_eq!(content_type(&headers), "application/json");
    }

    #[test]
    fn test_declared_media_type() {
        let doc = br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json"}"#;
        assert_eq!(declared_media_type(doc).as_deref(), Some(MediaType::OCI_INDEX));
        assert!(declared_media_type(b"not json").is_none());
    }
}
