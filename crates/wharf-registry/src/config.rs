//! Configuration types for the registry client.

use std::num::NonZeroU32;
use std::time::Duration;

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Registry URL (e.g., "<https://registry.example.com>"), without a
    /// trailing slash.
    pub url: String,

    /// Authentication configuration.
    pub auth: RegistryAuth,

    /// Request timeout.
    pub timeout: Duration,

    /// Accept invalid TLS certificates.
    pub insecure: bool,

    /// Upper bound on requests per second, if any.
    pub qps_limit: Option<NonZeroU32>,

    /// User agent string.
    pub user_agent: String,
}

impl ClientConfig {
    /// Creates a new client configuration with the given URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use wharf_registry::ClientConfig;
    ///
    /// let config = ClientConfig::new("https://registry.example.com/");
    /// assert_eq!(config.url, "https://registry.example.com");
    /// ```
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            auth: RegistryAuth::None,
            timeout: Duration::from_secs(30),
            insecure: false,
            qps_limit: None,
            user_agent: format!("wharf-registry/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the authentication method.
    #[must_use]
    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skips TLS certificate verification.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Caps outbound requests per second; zero removes the cap.
    ///
    /// # Examples
    ///
    /// ```
    /// use wharf_registry::ClientConfig;
    ///
    /// let config = ClientConfig::new("https://tcr.example.com").with_qps_limit(20);
    /// assert_eq!(config.qps_limit.map(|q| q.get()), Some(20));
    /// ```
    #[must_use]
    pub const fn with_qps_limit(mut self, qps: u32) -> Self {
        self.qps_limit = NonZeroU32::new(qps);
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Authentication methods for registry access.
#[derive(Clone, Default)]
pub enum RegistryAuth {
    /// Anonymous access. Token challenges are still answered anonymously.
    #[default]
    None,

    /// Username and password, sent as basic auth or exchanged at the token
    /// service named by a bearer challenge.
    Basic {
        /// Username.
        username: String,
        /// Password or token.
        password: String,
    },

    /// A fixed bearer token.
    Bearer {
        /// Token value.
        token: String,
    },
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
        }
    }
}

impl RegistryAuth {
    /// Creates basic authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// use wharf_registry::RegistryAuth;
    ///
    /// let auth = RegistryAuth::basic("user", "pass");
    /// assert_eq!(auth.credentials(), Some(("user", "pass")));
    /// ```
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token authentication.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Returns the username and password of basic auth.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self {
            Self::Basic { username, password } => Some((username, password)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("https://example.com");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(!config.insecure);
        assert!(config.qps_limit.is_none());
        assert!(config.user_agent.starts_with("wharf-registry/"));
    }

    #[test]
    fn test_zero_qps_means_unlimited() {
        let config = ClientConfig::new("https://example.com").with_qps_limit(0);
        assert!(config.qps_limit.is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", RegistryAuth::basic("admin", "Harbor12345"));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("Harbor12345"));
        assert!(!format!("{:?}", RegistryAuth::bearer("t0k3n")).contains("t0k3n"));
    }

    #[test]
    fn test_bearer_has_no_credentials() {
        assert!(RegistryAuth::bearer("x").credentials().is_none());
        assert!(RegistryAuth::None.credentials().is_none());
    }
}
