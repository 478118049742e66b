//! In-process stand-ins for a distribution registry and the Docker Hub API.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::json;
use wharf_registry::compute_digest;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    base
}

fn query(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

#[derive(Default)]
pub struct Distribution {
    /// repository -> reference -> (media type, body)
    pub manifests: BTreeMap<String, BTreeMap<String, (String, Vec<u8>)>>,
    pub blobs: HashMap<String, Vec<u8>>,
    /// Authorization header every request must carry.
    pub authorization: Option<HeaderValue>,
}

impl Distribution {
    pub fn tag(&mut self, repository: &str, tag: &str) {
        let body = format!(r#"{{"schemaVersion":2,"tag":"{repository}:{tag}"}}"#).into_bytes();
        self.manifests.entry(repository.to_string()).or_default().insert(
            tag.to_string(),
            ("application/vnd.oci.image.manifest.v1+json".to_string(), body),
        );
    }
}

/// A distribution registry without a token service, optionally demanding
/// basic credentials or a fixed bearer token.
#[derive(Clone)]
pub struct FakeDistribution {
    pub state: Arc<Mutex<Distribution>>,
    pub base: String,
}

impl FakeDistribution {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(Distribution::default()));
        let router = Router::new()
            .fallback(distribution)
            .with_state(Arc::clone(&state));
        let base = serve(router).await;
        Self { state, base }
    }

    pub fn require_basic(&self, username: &str, password: &str) {
        let expected = wharf_registry::auth::basic_header(username, password).unwrap();
        self.state.lock().unwrap().authorization = Some(expected);
    }

    pub fn require_bearer(&self, token: &str) {
        let expected = HeaderValue::from_str(&format!("Bearer {token}")).unwrap();
        self.state.lock().unwrap().authorization = Some(expected);
    }

    pub fn tag(&self, repository: &str, tag: &str) {
        self.state.lock().unwrap().tag(repository, tag);
    }
}

async fn distribution(
    State(state): State<Arc<Mutex<Distribution>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(expected) = &state.authorization {
        if headers.get(AUTHORIZATION) != Some(expected) {
            return (StatusCode::UNAUTHORIZED, [("www-authenticate", r#"Basic realm="fake""#)]).into_response();
        }
    }

    let Some(rest) = uri.path().strip_prefix("/v2/").map(str::to_string) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if rest.is_empty() {
        return StatusCode::OK.into_response();
    }
    if rest == "_catalog" {
        let repositories: Vec<&String> = state.manifests.keys().collect();
        return axum::Json(json!({ "repositories": repositories })).into_response();
    }
    if let Some(repository) = rest.strip_suffix("/tags/list") {
        let Some(references) = state.manifests.get(repository) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let tags: Vec<&String> = references.keys().filter(|r| !r.contains(':')).collect();
        return axum::Json(json!({ "name": repository, "tags": tags })).into_response();
    }
    if let Some((repository, reference)) = rest.rsplit_once("/manifests/") {
        return match method {
            Method::GET | Method::HEAD => {
                match state.manifests.get(repository).and_then(|m| m.get(reference)) {
                    Some((media_type, payload)) => {
                        let mut response_headers = HeaderMap::new();
                        response_headers.insert(CONTENT_TYPE, HeaderValue::from_str(media_type).unwrap());
                        response_headers.insert(
                            "docker-content-digest",
                            HeaderValue::from_str(&compute_digest(payload)).unwrap(),
                        );
                        response_headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
                        (StatusCode::OK, response_headers, payload.clone()).into_response()
                    }
                    None => StatusCode::NOT_FOUND.into_response(),
                }
            }
            Method::PUT => {
                let media_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let digest = compute_digest(&body);
                let references = state.manifests.entry(repository.to_string()).or_default();
                references.insert(digest.clone(), (media_type.clone(), body.to_vec()));
                references.insert(reference.to_string(), (media_type, body.to_vec()));
                (StatusCode::CREATED, [("docker-content-digest", digest)]).into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }
    if let Some((repository, _)) = rest.split_once("/blobs/uploads") {
        let params = query(&uri);
        return match method {
            Method::POST => {
                if let Some(digest) = params.get("mount") {
                    if state.blobs.contains_key(digest) {
                        return StatusCode::CREATED.into_response();
                    }
                }
                let location = format!("/v2/{repository}/blobs/uploads/session");
                (StatusCode::ACCEPTED, [(LOCATION, location)]).into_response()
            }
            Method::PUT => {
                let Some(digest) = params.get("digest") else {
                    return StatusCode::BAD_REQUEST.into_response();
                };
                state.blobs.insert(digest.clone(), body.to_vec());
                StatusCode::CREATED.into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }
    if let Some((_, digest)) = rest.rsplit_once("/blobs/") {
        return match state.blobs.get(digest) {
            Some(blob) if method == Method::HEAD => {
                (StatusCode::OK, [(CONTENT_LENGTH, blob.len().to_string())]).into_response()
            }
            Some(blob) => (StatusCode::OK, blob.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }
    StatusCode::NOT_FOUND.into_response()
}

pub const HUB_USER: &str = "hubuser";
pub const HUB_PASSWORD: &str = "hubpass";
const HUB_TOKEN: &str = "jwt-token";
const HUB_PAGE: usize = 2;

#[derive(Default)]
pub struct Hub {
    /// namespace -> repository -> tags
    pub namespaces: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
    pub logins: usize,
    pub created: Vec<String>,
    /// Number of upcoming API requests, logins excepted, answered with `429`.
    pub throttle: usize,
    pub throttled: usize,
}

/// The Docker Hub management API.
#[derive(Clone)]
pub struct FakeHub {
    pub state: Arc<Mutex<Hub>>,
    pub base: String,
}

impl FakeHub {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(Hub::default()));
        let router = Router::new().fallback(hub).with_state(Arc::clone(&state));
        let base = serve(router).await;
        Self { state, base }
    }

    pub fn add(&self, namespace: &str, repository: &str, tags: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(repository.to_string(), tags.iter().map(|t| (*t).to_string()).collect());
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut Hub) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

fn page<T: serde::Serialize>(items: Vec<T>, uri: &Uri) -> Response {
    let page: usize = query(uri).get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let start = (page - 1) * HUB_PAGE;
    let next = (items.len() > start + HUB_PAGE).then(|| format!("{}?page={}", uri.path(), page + 1));
    let results: Vec<T> = items.into_iter().skip(start).take(HUB_PAGE).collect();
    axum::Json(json!({ "next": next, "results": results })).into_response()
}

async fn hub(
    State(state): State<Arc<Mutex<Hub>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    let path = uri.path().to_string();

    if path == "/v2/users/login/" && method == Method::POST {
        state.logins += 1;
        let login: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
        if login["username"] == HUB_USER && login["password"] == HUB_PASSWORD {
            return axum::Json(json!({ "token": HUB_TOKEN })).into_response();
        }
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if state.throttle > 0 {
        state.throttle -= 1;
        state.throttled += 1;
        return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "0")]).into_response();
    }

    let expected = format!("JWT {HUB_TOKEN}");
    if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        (Method::GET, ["v2", "repositories", "namespaces"]) => {
            let namespaces: Vec<&String> = state.namespaces.keys().collect();
            axum::Json(json!({ "namespaces": namespaces })).into_response()
        }
        (Method::GET, ["v2", "orgs", namespace]) => {
            if state.namespaces.contains_key(*namespace) {
                axum::Json(json!({ "orgname": namespace })).into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        (Method::POST, ["v2", "orgs"]) => {
            let org: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
            let Some(name) = org["orgname"].as_str().map(str::to_string) else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            state.namespaces.entry(name.clone()).or_default();
            state.created.push(name);
            StatusCode::CREATED.into_response()
        }
        (Method::GET, ["v2", "repositories", namespace]) => {
            let Some(repositories) = state.namespaces.get(*namespace) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let items: Vec<_> = repositories
                .keys()
                .map(|name| json!({ "name": name, "namespace": namespace }))
                .collect();
            page(items, &uri)
        }
        (Method::GET, ["v2", "repositories", namespace, name, "tags"]) => {
            let Some(tags) = state.namespaces.get(*namespace).and_then(|r| r.get(*name)) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let items: Vec<_> = tags.iter().map(|t| json!({ "name": t })).collect();
            page(items, &uri)
        }
        (Method::DELETE, ["v2", "repositories", namespace, name, "tags", tag]) => {
            let removed = state
                .namespaces
                .get_mut(*namespace)
                .and_then(|r| r.get_mut(*name))
                .is_some_and(|tags| tags.remove(*tag));
            if removed {
                StatusCode::NO_CONTENT.into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
