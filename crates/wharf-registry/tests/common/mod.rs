//! In-process distribution API used by the client tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LINK, LOCATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use wharf_registry::compute_digest;

const CATALOG_PAGE: usize = 2;

#[derive(Default)]
pub struct Content {
    pub manifests: HashMap<(String, String), (String, Vec<u8>)>,
    pub blobs: HashMap<String, Vec<u8>>,
    pub token_requests: usize,
}

#[derive(Clone)]
pub struct FakeRegistry {
    pub content: Arc<Mutex<Content>>,
    pub base: String,
    require_token: bool,
}

impl FakeRegistry {
    pub async fn start(require_token: bool) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let registry = Self {
            content: Arc::new(Mutex::new(Content::default())),
            base,
            require_token,
        };
        let app = Router::new().fallback(handle).with_state(registry.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        registry
    }

    pub fn token_requests(&self) -> usize {
        self.content.lock().unwrap().token_requests
    }
}

fn query(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn manifest_response(media_type: &str, body: Vec<u8>) -> Response {
    let digest = compute_digest(&body);
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_str(media_type).unwrap());
    headers.insert("docker-content-digest", HeaderValue::from_str(&digest).unwrap());
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    (StatusCode::OK, headers, body).into_response()
}

async fn handle(
    State(registry): State<FakeRegistry>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();

    if path == "/token" {
        let mut content = registry.content.lock().unwrap();
        content.token_requests += 1;
        let expected = wharf_registry::auth::basic_header("user", "pass").unwrap();
        if headers.get(AUTHORIZATION) != Some(&expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        return axum::Json(serde_json::json!({"token": "good", "expires_in": 300})).into_response();
    }

    if registry.require_token
        && headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some("Bearer good")
    {
        let challenge = format!(r#"Bearer realm="{}/token",service="fake""#, registry.base);
        return (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, challenge)], "").into_response();
    }

    let Some(rest) = path.strip_prefix("/v2/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut content = registry.content.lock().unwrap();

    if rest.is_empty() {
        return StatusCode::OK.into_response();
    }

    if rest == "_catalog" {
        let repos: BTreeSet<String> = content.manifests.keys().map(|(r, _)| r.clone()).collect();
        let last = query(&uri).get("last").cloned().unwrap_or_default();
        let page: Vec<String> = repos
            .into_iter()
            .filter(|r| *r > last)
            .take(CATALOG_PAGE + 1)
            .collect();
        let mut response_headers = HeaderMap::new();
        if page.len() > CATALOG_PAGE {
            let link = format!("</v2/_catalog?last={}&n={CATALOG_PAGE}>; rel=\"next\"", page[CATALOG_PAGE - 1]);
            response_headers.insert(LINK, HeaderValue::from_str(&link).unwrap());
        }
        let repositories: Vec<_> = page.into_iter().take(CATALOG_PAGE).collect();
        return (
            response_headers,
            axum::Json(serde_json::json!({ "repositories": repositories })),
        )
            .into_response();
    }

    if let Some(repo) = rest.strip_suffix("/tags/list") {
        let tags: BTreeSet<String> = content
            .manifests
            .keys()
            .filter(|(r, reference)| r == repo && !reference.contains(':'))
            .map(|(_, t)| t.clone())
            .collect();
        if tags.is_empty() {
            return StatusCode::NOT_FOUND.into_response();
        }
        return axum::Json(serde_json::json!({ "name": repo, "tags": tags })).into_response();
    }

    if let Some((repo, reference)) = rest.rsplit_once("/manifests/") {
        let key = (repo.to_string(), reference.to_string());
        return match method {
            Method::GET | Method::HEAD => match content.manifests.get(&key) {
                Some((media_type, body)) => manifest_response(media_type, body.clone()),
                None => (
                    StatusCode::NOT_FOUND,
                    axum::Json(serde_json::json!({"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown"}]})),
                )
                    .into_response(),
            },
            Method::PUT => {
                let media_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let digest = compute_digest(&body);
                let entry = (media_type, body.to_vec());
                content
                    .manifests
                    .insert((repo.to_string(), digest.clone()), entry.clone());
                content.manifests.insert(key, entry);
                (StatusCode::CREATED, [("docker-content-digest", digest)]).into_response()
            }
            Method::DELETE => {
                if !reference.starts_with("sha256:") {
                    return StatusCode::BAD_REQUEST.into_response();
                }
                let before = content.manifests.len();
                content
                    .manifests
                    .retain(|(r, _), (_, body)| r != repo || compute_digest(body) != reference);
                if content.manifests.len() == before {
                    StatusCode::NOT_FOUND.into_response()
                } else {
                    StatusCode::ACCEPTED.into_response()
                }
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    if let Some((repo, _)) = rest.split_once("/blobs/uploads") {
        let params = query(&uri);
        return match method {
            Method::POST => {
                if let Some(digest) = params.get("mount") {
                    if content.blobs.contains_key(digest) {
                        return StatusCode::CREATED.into_response();
                    }
                }
                let location = format!("/v2/{repo}/blobs/uploads/session-1");
                (StatusCode::ACCEPTED, [(LOCATION, location)]).into_response()
            }
            Method::PUT => {
                let Some(digest) = params.get("digest") else {
                    return StatusCode::BAD_REQUEST.into_response();
                };
                if compute_digest(&body) != *digest {
                    return StatusCode::BAD_REQUEST.into_response();
                }
                content.blobs.insert(digest.clone(), body.to_vec());
                StatusCode::CREATED.into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    if let Some((_, digest)) = rest.rsplit_once("/blobs/") {
        return match method {
            Method::GET | Method::HEAD => match content.blobs.get(digest) {
                Some(data) => (StatusCode::OK, data.clone()).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            },
            Method::DELETE => match content.blobs.remove(digest) {
                Some(_) => StatusCode::ACCEPTED.into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            },
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}
