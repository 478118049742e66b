//! Token handling for the distribution API.
//!
//! A registry that delegates auth to a token service answers an anonymous
//! request with `401` and a `WWW-Authenticate: Bearer realm=..,service=..,scope=..`
//! challenge. [`TokenAuthorizer`] remembers the challenge, fetches a token
//! for the scopes of each request and keeps it in a [`TokenCache`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use base64::Engine;
use parking_lot::RwLock;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::RegistryError;

/// Longest time a token is kept, whatever its issuer reports.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Lifetime of a token-service token that reports none.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60);

/// A freshly issued token.
#[derive(Clone)]
pub struct Token {
    /// Token value.
    pub value: String,
    /// Lifetime reported by the issuer.
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Tokens keyed by scope, refreshed under one lock.
///
/// A caller that finds the entry missing or expired refreshes it while
/// holding the lock, so concurrent callers wait for that refresh instead of
/// issuing their own. Entries live for the issuer's lifetime capped at
/// [`MAX_TOKEN_LIFETIME`].
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<String, (String, Instant)>>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live token for `scope`, calling `refresh` if there is none.
    ///
    /// # Errors
    ///
    /// Returns the error of `refresh`.
    pub async fn get_or_refresh<F, Fut>(&self, scope: &str, refresh: F) -> Result<String, RegistryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Token, RegistryError>>,
    {
        let mut tokens = self.tokens.lock().await;
        if let Some((value, expires_at)) = tokens.get(scope) {
            if Instant::now() < *expires_at {
                return Ok(value.clone());
            }
        }

        let token = refresh().await?;
        let lifetime = token
            .expires_in
            .map_or(MAX_TOKEN_LIFETIME, |d| d.min(MAX_TOKEN_LIFETIME));
        tracing::debug!(scope, lifetime = ?lifetime, "token refreshed");
        tokens.insert(scope.to_string(), (token.value.clone(), Instant::now() + lifetime));
        Ok(token.value)
    }

    /// Drops the token of `scope`.
    pub async fn invalidate(&self, scope: &str) {
        self.tokens.lock().await.remove(scope);
    }
}

/// A parsed `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Auth scheme, lowercased.
    pub scheme: String,
    /// Parameters with lowercased names.
    pub params: BTreeMap<String, String>,
}

impl Challenge {
    /// Parses a challenge header.
    ///
    /// # Examples
    ///
    /// ```
    /// use wharf_registry::auth::Challenge;
    ///
    /// let c = Challenge::parse(
    ///     r#"Bearer realm="https://auth.example.com/token",service="registry",scope="repository:library/hello:pull,push""#,
    /// ).unwrap();
    /// assert!(c.is_bearer());
    /// assert_eq!(c.scope(), Some("repository:library/hello:pull,push"));
    /// ```
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
        if scheme.is_empty() {
            return None;
        }
        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            params: parse_params(rest),
        })
    }

    /// Returns true for a bearer challenge naming a realm.
    #[must_use]
    pub fn is_bearer(&self) -> bool {
        self.scheme == "bearer" && self.realm().is_some()
    }

    /// Token service URL.
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.params.get("realm").map(String::as_str)
    }

    /// Service name to request tokens for.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.params.get("service").map(String::as_str)
    }

    /// Scope the registry asked for.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.params.get("scope").map(String::as_str)
    }
}

fn parse_params(input: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut rest = input.trim();
    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            quoted
                .find('"')
                .map_or((quoted, ""), |end| (&quoted[..end], &quoted[end + 1..]))
        } else {
            after
                .find(',')
                .map_or((after, ""), |end| (&after[..end], &after[end..]))
        };
        if !key.is_empty() {
            params.insert(key, value.trim().to_string());
        }
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

/// Returns the token scopes a request to `url` needs.
///
/// Repository paths map to `repository:<name>:<actions>` (plus a pull scope
/// on the source of a cross-repository mount), the catalog to
/// `registry:catalog:*`, and the base endpoint to no scope.
#[must_use]
pub fn scopes_for(method: &Method, url: &url::Url) -> Vec<String> {
    let Some(path) = url.path().strip_prefix("/v2/") else {
        return Vec::new();
    };
    if path.is_empty() {
        return Vec::new();
    }
    if path.starts_with("_catalog") {
        return vec!["registry:catalog:*".to_string()];
    }

    let repository = ["/manifests/", "/blobs/", "/tags/"]
        .iter()
        .filter_map(|marker| path.rfind(marker).map(|i| &path[..i]))
        .max_by_key(|repo| repo.len());
    let Some(repository) = repository else {
        return Vec::new();
    };

    let actions = match *method {
        Method::GET | Method::HEAD => "pull",
        Method::DELETE => "delete",
        _ => "pull,push",
    };
    let mut scopes = vec![format!("repository:{repository}:{actions}")];
    if let Some((_, from)) = url.query_pairs().find(|(k, _)| k == "from") {
        scopes.push(format!("repository:{from}:pull"));
    }
    scopes
}

/// Builds a basic `Authorization` header value.
///
/// # Errors
///
/// Returns [`RegistryError::Unauthorized`] if the credentials contain bytes
/// that cannot appear in a header.
pub fn basic_header(username: &str, password: &str) -> Result<HeaderValue, RegistryError> {
    let credentials =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    HeaderValue::from_str(&format!("Basic {credentials}")).map_err(|_| {
        RegistryError::Unauthorized {
            message: "invalid credentials".to_string(),
        }
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Answers bearer challenges with tokens from the challenge's realm.
pub struct TokenAuthorizer {
    http: reqwest::Client,
    credentials: Option<(String, String)>,
    challenge: RwLock<Option<Challenge>>,
    tokens: TokenCache,
}

impl std::fmt::Debug for TokenAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthorizer")
            .field("challenge", &*self.challenge.read())
            .field("anonymous", &self.credentials.is_none())
            .finish_non_exhaustive()
    }
}

impl TokenAuthorizer {
    /// Creates an authorizer using `http` for token requests.
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: Option<(String, String)>) -> Self {
        Self {
            http,
            credentials,
            challenge: RwLock::new(None),
            tokens: TokenCache::new(),
        }
    }

    /// Records the challenge a registry answered with.
    pub fn learn(&self, challenge: Challenge) {
        *self.challenge.write() = Some(challenge);
    }

    /// Returns true once a bearer challenge was seen.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.challenge.read().is_some()
    }

    /// Returns a token for `scopes`, or `None` before any challenge was seen.
    ///
    /// # Errors
    ///
    /// Returns an error if the token service rejects the request.
    pub async fn token(&self, scopes: &[String]) -> Result<Option<String>, RegistryError> {
        let known = self.challenge.read().clone();
        let Some(challenge) = known else {
            return Ok(None);
        };
        let key = scopes.join(" ");
        self.tokens
            .get_or_refresh(&key, || self.fetch(&challenge, scopes))
            .await
            .map(Some)
    }

    /// Forgets the token cached for `scopes`.
    pub async fn invalidate(&self, scopes: &[String]) {
        self.tokens.invalidate(&scopes.join(" ")).await;
    }

    async fn fetch(&self, challenge: &Challenge, scopes: &[String]) -> Result<Token, RegistryError> {
        let realm = challenge.realm().ok_or_else(|| RegistryError::TokenService {
            message: "challenge has no realm".to_string(),
        })?;
        let mut url = url::Url::parse(realm).map_err(|e| RegistryError::InvalidUrl {
            url: realm.to_string(),
            message: e.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = challenge.service() {
                query.append_pair("service", service);
            }
            for scope in scopes {
                query.append_pair("scope", scope);
            }
        }

        let mut request = self.http.get(url);
        if let Some((username, password)) = &self.credentials {
            request = request.header(AUTHORIZATION, basic_header(username, password)?);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 401 {
                RegistryError::Unauthorized { message }
            } else {
                RegistryError::TokenService {
                    message: format!("{status}: {message}"),
                }
            });
        }

        let body: TokenResponse = response.json().await?;
        let value = body
            .token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::TokenService {
                message: "token service returned no token".to_string(),
            })?;
        Ok(Token {
            value,
            expires_in: Some(
                body.expires_in
                    .filter(|s| *s > 0)
                    .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs),
            ),
        })
    }
}
