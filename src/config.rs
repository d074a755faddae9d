//! API configuration.
//!
//! The serializable part ([`ApiConfig`]) can be loaded from environment
//! variables with [`ApiConfig::from_env`]. Pluggable behavior (credential
//! extractor, rate-limit key function, hooks, stores) is attached with the
//! builder methods on [`Api`](crate::Api) and [`ApiConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_TOKEN_PATH;
use crate::rate_limit::RateLimitPolicy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Mount point of the API, e.g. `api/`. Empty mounts at the server root.
    pub api_path: String,
    /// Optional version segment appended to `api_path`, e.g. `v1`.
    pub version: Option<String>,
    pub pretty_json: bool,
    pub enable_cors: bool,
    /// Installs `login`, `logout` and `logoutAll`.
    pub use_default_auth: bool,
    /// Dotted path of hashed login tokens on user records.
    pub token_path: String,
    /// Extra headers sent with every enveloped response.
    pub default_headers: Vec<(String, String)>,
    /// Global limit applied to every endpoint without its own policy.
    pub rate_limit: Option<RateLimitPolicy>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_path: "api/".to_owned(),
            version: None,
            pretty_json: false,
            enable_cors: true,
            use_default_auth: false,
            token_path: DEFAULT_TOKEN_PATH.to_owned(),
            default_headers: Vec::new(),
            rate_limit: None,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `WAYPOST_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key/value source. Unparseable values keep
    /// the current setting.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("WAYPOST_API_PATH") {
            self.api_path = v;
        }
        if let Some(v) = lookup("WAYPOST_API_VERSION") {
            self.version = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("WAYPOST_PRETTY_JSON") {
            self.pretty_json = v.parse().unwrap_or(self.pretty_json);
        }
        if let Some(v) = lookup("WAYPOST_ENABLE_CORS") {
            self.enable_cors = v.parse().unwrap_or(self.enable_cors);
        }
        if let Some(v) = lookup("WAYPOST_DEFAULT_AUTH") {
            self.use_default_auth = v.parse().unwrap_or(self.use_default_auth);
        }
        if let Some(v) = lookup("WAYPOST_TOKEN_PATH") {
            self.token_path = v;
        }

        let points = lookup("WAYPOST_RATE_LIMIT_POINTS").and_then(|v| v.parse().ok());
        let secs = lookup("WAYPOST_RATE_LIMIT_SECS").and_then(|v| v.parse().ok());
        if let (Some(points), Some(secs)) = (points, secs) {
            self.rate_limit = Some(RateLimitPolicy::new(points, Duration::from_secs(secs)));
        }

        self
    }

    pub fn api_path(mut self, path: impl Into<String>) -> Self {
        self.api_path = path.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn pretty_json(mut self, pretty: bool) -> Self {
        self.pretty_json = pretty;
        self
    }

    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn default_auth(mut self, enable: bool) -> Self {
        self.use_default_auth = enable;
        self
    }

    pub fn token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    pub fn default_header(mut self, name: &str, value: &str) -> Self {
        self.default_headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }

    /// `/{api_path}/{version}` without a trailing slash; `""` at the root.
    pub fn base_path(&self) -> String {
        [self.api_path.as_str(), self.version.as_deref().unwrap_or("")]
            .iter()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .fold(String::new(), |acc, s| format!("{acc}/{s}"))
    }

    /// Headers applied to every enveloped response.
    pub fn response_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_owned(), "application/json".to_owned())];
        if self.enable_cors {
            let mut allow = "Origin, X-Requested-With, Content-Type, Accept".to_owned();
            if self.use_default_auth {
                allow.push_str(", Authorization, X-Auth-Token");
            }
            headers.push(("Access-Control-Allow-Origin".to_owned(), "*".to_owned()));
            headers.push(("Access-Control-Allow-Headers".to_owned(), allow));
        }
        for (name, value) in &self.default_headers {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        headers
    }
}
