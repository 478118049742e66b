//! Replication data model: registry records, resources, filters and the
//! capability declarations adapters publish.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registry type tag of Harbor-compatible registries, also used for the
/// local self-reference.
pub const REGISTRY_TYPE_HARBOR: &str = "harbor";
/// Registry type tag of Docker Hub.
pub const REGISTRY_TYPE_DOCKER_HUB: &str = "docker-hub";
/// Registry type tag of a plain distribution registry.
pub const REGISTRY_TYPE_DOCKER_REGISTRY: &str = "docker-registry";

/// Every registry type tag known to the system. Only those with a
/// registered factory can be instantiated.
pub const REGISTRY_TYPES: &[&str] = &[
    REGISTRY_TYPE_HARBOR,
    REGISTRY_TYPE_DOCKER_HUB,
    REGISTRY_TYPE_DOCKER_REGISTRY,
    "aws-ecr",
    "azure-acr",
    "google-gcr",
    "github-ghcr",
    "gitlab",
    "jfrog-artifactory",
    "quay",
    "dtr",
    "ali-acr",
    "huawei-swr",
    "tencent-tcr",
    "volcengine-cr",
    "harbor-satellite",
    "artifact-list-export",
];

/// How the access key and secret are presented to the remote registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    /// Username and password.
    #[default]
    Basic,
    /// OAuth token as the secret.
    OAuth,
    /// Shared secret between cooperating services.
    Secret,
}

impl CredentialType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::OAuth => "oauth",
            Self::Secret => "secret",
        }
    }

    /// Parses the wire name; unknown names fall back to basic.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "oauth" => Self::OAuth,
            "secret" => Self::Secret,
            _ => Self::Basic,
        }
    }
}

/// Credentials of a remote registry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Presentation.
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    /// Username or key id.
    pub access_key: String,
    /// Password, token or secret.
    pub access_secret: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("credential_type", &self.credential_type)
            .field("access_key", &self.access_key)
            .field("access_secret", &"***")
            .finish()
    }
}

impl Credential {
    /// Basic credentials.
    #[must_use]
    pub fn basic(access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            credential_type: CredentialType::Basic,
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        }
    }

    /// True when neither key nor secret is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_key.is_empty() && self.access_secret.is_empty()
    }
}

/// Connection record of a remote registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Assigned on insert; 0 is the local registry.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Adapter type tag, see [`REGISTRY_TYPES`].
    #[serde(rename = "type")]
    pub registry_type: String,
    /// Base URL.
    pub url: String,
    /// Credentials, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    /// Skip TLS verification.
    pub insecure: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Last health status, e.g. `healthy`.
    #[serde(default)]
    pub status: String,
    /// Creation time.
    pub creation_time: DateTime<Utc>,
    /// Last update time.
    pub update_time: DateTime<Utc>,
}

impl Registry {
    /// Creates a record stamped now.
    #[must_use]
    pub fn new(name: impl Into<String>, registry_type: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            registry_type: registry_type.into(),
            url: url.into(),
            credential: None,
            insecure: false,
            description: String::new(),
            status: String::new(),
            creation_time: now,
            update_time: now,
        }
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Sets the TLS verification flag.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Credentials with something in them.
    #[must_use]
    pub fn usable_credential(&self) -> Option<&Credential> {
        self.credential.as_ref().filter(|c| !c.is_empty())
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Reachable with the configured credentials.
    Healthy,
    /// Unreachable or rejecting the credentials.
    Unhealthy,
}

impl HealthStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Container images and other OCI artifacts.
    Image,
    /// Helm charts served by a chart repository.
    Chart,
}

/// A repository as seen by replication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Full name.
    pub name: String,
    /// Provider-specific attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// One artifact of a replicated repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact type, e.g. `IMAGE`.
    #[serde(default, rename = "type")]
    pub artifact_type: String,
    /// Digest when known.
    #[serde(default)]
    pub digest: String,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Label names.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Artifact {
    /// An artifact known only by one tag.
    #[must_use]
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tags: vec![tag.into()],
            ..Self::default()
        }
    }
}

/// Repository and artifacts of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// The repository.
    pub repository: Repository,
    /// Its artifacts.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// The unit of replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Content kind.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Registry the resource lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<Registry>,
    /// What is replicated.
    pub metadata: ResourceMetadata,
    /// Provider-specific extras.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extended_info: Map<String, Value>,
    /// True when the resource is to be deleted at the destination.
    #[serde(default)]
    pub deleted: bool,
}

impl Resource {
    /// An image resource of `repository` carrying `artifacts`.
    #[must_use]
    pub fn image(repository: impl Into<String>, artifacts: Vec<Artifact>) -> Self {
        Self {
            resource_type: ResourceType::Image,
            registry: None,
            metadata: ResourceMetadata {
                repository: Repository {
                    name: repository.into(),
                    metadata: Map::new(),
                },
                artifacts,
            },
            extended_info: Map::new(),
            deleted: false,
        }
    }
}

/// A namespace of a remote registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// Name.
    pub name: String,
    /// Provider-specific attributes.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Kinds of resource filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Repository name pattern.
    Name,
    /// Tag pattern.
    Tag,
    /// Required labels.
    Label,
    /// Resource type.
    Resource,
}

/// A resource filter, serialized as `{"type": .., "value": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Filter {
    /// Keep repositories whose name matches the pattern.
    Name(String),
    /// Keep tags matching the pattern.
    Tag(String),
    /// Keep artifacts carrying every label.
    Label(Vec<String>),
    /// Keep resources of the type.
    Resource(ResourceType),
}

impl Filter {
    /// The filter kind.
    #[must_use]
    pub const fn kind(&self) -> FilterKind {
        match self {
            Self::Name(_) => FilterKind::Name,
            Self::Tag(_) => FilterKind::Tag,
            Self::Label(_) => FilterKind::Label,
            Self::Resource(_) => FilterKind::Resource,
        }
    }
}

/// How a filter is entered in a UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStyle {
    /// Filter kind.
    #[serde(rename = "type")]
    pub kind: FilterKind,
    /// Widget, e.g. `input` or `radio`.
    pub style: String,
    /// Choices for list widgets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl FilterStyle {
    /// A free-text filter.
    #[must_use]
    pub fn text(kind: FilterKind) -> Self {
        Self {
            kind,
            style: "input".to_string(),
            values: Vec::new(),
        }
    }
}

/// When a replication may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// On demand.
    Manual,
    /// On a cron schedule.
    Scheduled,
    /// On push or delete events.
    EventBased,
}

/// Capabilities an adapter declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    /// Registry type tag.
    #[serde(rename = "type")]
    pub registry_type: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Resource types the adapter moves.
    pub supported_resource_types: Vec<ResourceType>,
    /// Filters the adapter honors.
    pub supported_resource_filters: Vec<FilterStyle>,
    /// Triggers the adapter supports.
    pub supported_triggers: Vec<TriggerType>,
}

/// How endpoints of a provider are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EndpointType {
    /// One fixed endpoint.
    Fix,
    /// Pick from a list.
    List,
    /// Any URL.
    Free,
}

/// A named endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Display key.
    pub key: String,
    /// URL.
    pub value: String,
}

/// Pre-populated endpoints of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPattern {
    /// Selection mode.
    pub endpoint_type: EndpointType,
    /// Endpoints.
    pub endpoints: Vec<Endpoint>,
}

/// Shape of the credential inputs of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPattern {
    /// Input type of the key.
    pub access_key_type: String,
    /// Default or hint for the key.
    #[serde(default)]
    pub access_key_data: String,
    /// Input type of the secret.
    pub access_secret_type: String,
    /// Default or hint for the secret.
    #[serde(default)]
    pub access_secret_data: String,
}

/// What a UI needs to offer a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterPattern {
    /// Endpoints, if fixed or listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_pattern: Option<EndpointPattern>,
    /// Credential inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_pattern: Option<CredentialPattern>,
}

/// Filters and paging for registry listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryQuery {
    /// Substring of the name.
    pub name: Option<String>,
    /// Exact type tag.
    pub registry_type: Option<String>,
    /// 1-based page; ignored when `page_size` is 0.
    pub page: u32,
    /// Page size; 0 lists everything.
    pub page_size: u32,
}

/// Named provider patterns, sorted by type tag.
pub type ProviderInfos = BTreeMap<String, AdapterPattern>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_wire_shape() {
        let filters = vec![
            Filter::Name("library/**".into()),
            Filter::Label(vec!["prod".into()]),
            Filter::Resource(ResourceType::Image),
        ];
        let json = serde_json::to_value(&filters).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"type": "name", "value": "library/**"},
                {"type": "label", "value": ["prod"]},
                {"type": "resource", "value": "image"},
            ])
        );
        let back: Vec<Filter> = serde_json::from_value(json).unwrap();
        assert_eq!(back, filters);
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let credential = Credential::basic("admin", "Harbor12345");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("Harbor12345"));
    }

    #[test]
    fn test_usable_credential() {
        let registry = Registry::new("hub", REGISTRY_TYPE_DOCKER_HUB, "https://hub.docker.com");
        assert!(registry.usable_credential().is_none());
        let registry = registry.with_credential(Credential::default());
        assert!(registry.usable_credential().is_none());
        let registry = registry.with_credential(Credential::basic("u", "p"));
        assert_eq!(registry.usable_credential().map(|c| c.access_key.as_str()), Some("u"));
    }

    #[test]
    fn test_registry_types_are_unique() {
        let mut types = REGISTRY_TYPES.to_vec();
        types.sort_unstable();
        types.dedup();
        assert_eq!(types.len(), REGISTRY_TYPES.len());
    }
}
