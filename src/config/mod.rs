//! Client configuration (layered: code > env > environment defaults).

use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use strum::{Display, EnumString};

use crate::error::PipelineError;

const DEVELOPMENT_BASE_URL: &str = "http://localhost:8000";
const DEVELOPMENT_TIMEOUT: Duration = Duration::from_secs(10);
const PRODUCTION_BASE_URL: &str = "https://ai-musical-store-backend-ndig.vercel.app";
// serverless backends need the longer budget
const PRODUCTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Deployment flavour; picks default base URL and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Paths of the account endpoints, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub logout: String,
    pub refresh: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/api/auth/login/".to_string(),
            logout: "/api/auth/logout/".to_string(),
            refresh: "/api/auth/token/refresh/".to_string(),
        }
    }
}

/// Settings shared by every component of the pipeline.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use authpipe::config::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .base_url("https://api.example.com")
///     .request_timeout(Duration::from_secs(5))
///     .build();
/// assert_eq!(
///     config.resolve_url("/api/content/"),
///     "https://api.example.com/api/content/"
/// );
/// ```
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    #[builder(into)]
    pub base_url: String,
    #[builder(default)]
    pub environment: Environment,
    /// Budget for each business call (first attempt and retry alike).
    #[builder(default = DEVELOPMENT_TIMEOUT)]
    pub request_timeout: Duration,
    /// Budget for the refresh exchange.
    #[builder(default = DEVELOPMENT_TIMEOUT)]
    pub refresh_timeout: Duration,
    #[builder(default)]
    pub endpoints: Endpoints,
    /// Where the session file lives; `None` means `~/.authpipe`.
    pub storage_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Defaults for an environment without any overrides.
    pub fn for_environment(environment: Environment) -> Result<Self, PipelineError> {
        Self::from_lookup(|name| match name {
            "AUTHPIPE_ENV" => Some(environment.to_string()),
            _ => None,
        })
    }

    /// Load from `.env` and process environment variables.
    ///
    /// `AUTHPIPE_ENV` selects the environment, `AUTHPIPE_API_URL` overrides
    /// the base URL (and implies the production timeout),
    /// `AUTHPIPE_TIMEOUT_MS` overrides both timeouts and `AUTHPIPE_HOME`
    /// moves the session file.
    pub fn from_env() -> Result<Self, PipelineError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let environment = match lookup("AUTHPIPE_ENV") {
            Some(raw) => raw.trim().parse::<Environment>().map_err(|_| {
                PipelineError::Configuration(format!(
                    "AUTHPIPE_ENV must be development or production, got {raw:?}"
                ))
            })?,
            None => Environment::default(),
        };

        let (base_url, mut timeout) = match lookup("AUTHPIPE_API_URL") {
            Some(url) if !url.trim().is_empty() => (url.trim().to_string(), PRODUCTION_TIMEOUT),
            _ => match environment {
                Environment::Development => (DEVELOPMENT_BASE_URL.to_string(), DEVELOPMENT_TIMEOUT),
                Environment::Production => (PRODUCTION_BASE_URL.to_string(), PRODUCTION_TIMEOUT),
            },
        };

        if let Some(raw) = lookup("AUTHPIPE_TIMEOUT_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                PipelineError::Configuration(format!("AUTHPIPE_TIMEOUT_MS is not a number: {raw:?}"))
            })?;
            if millis == 0 {
                return Err(PipelineError::Configuration(
                    "AUTHPIPE_TIMEOUT_MS must be positive".to_string(),
                ));
            }
            timeout = Duration::from_millis(millis);
        }

        let storage_dir = lookup("AUTHPIPE_HOME")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            base_url,
            environment,
            request_timeout: timeout,
            refresh_timeout: timeout,
            endpoints: Endpoints::default(),
            storage_dir,
        })
    }

    /// Resolve a path against the base URL; absolute URLs pass through.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_to_local_development_server() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn api_url_override_uses_long_timeout() {
        let config =
            ClientConfig::from_lookup(lookup_from(&[("AUTHPIPE_API_URL", "https://api.test")]))
                .unwrap();
        assert_eq!(config.base_url, "https://api.test");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.refresh_timeout, Duration::from_secs(30));
    }

    #[test]
    fn production_defaults_to_hosted_backend() {
        let config = ClientConfig::for_environment(Environment::Production).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.base_url, "https://ai-musical-store-backend-ndig.vercel.app");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.refresh_timeout, Duration::from_secs(30));
    }

    #[test]
    fn production_api_url_override_wins() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("AUTHPIPE_ENV", "production"),
            ("AUTHPIPE_API_URL", "https://staging.test"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://staging.test");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn timeout_override_is_validated() {
        let config = ClientConfig::from_lookup(lookup_from(&[("AUTHPIPE_TIMEOUT_MS", "250")]))
            .unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(250));

        assert!(ClientConfig::from_lookup(lookup_from(&[("AUTHPIPE_TIMEOUT_MS", "soon")])).is_err());
        assert!(ClientConfig::from_lookup(lookup_from(&[("AUTHPIPE_TIMEOUT_MS", "0")])).is_err());
    }

    #[test]
    fn unknown_environment_is_rejected() {
        assert!(ClientConfig::from_lookup(lookup_from(&[("AUTHPIPE_ENV", "staging")])).is_err());
        let config =
            ClientConfig::from_lookup(lookup_from(&[("AUTHPIPE_ENV", "Development")])).unwrap();
        assert_eq!(config.environment, Environment::Development);
    }

    #[test]
    fn resolve_url_joins_paths_and_keeps_absolute_urls() {
        let config = ClientConfig::builder().base_url("http://host:1/").build();
        assert_eq!(config.resolve_url("/api/x/"), "http://host:1/api/x/");
        assert_eq!(config.resolve_url("api/x/"), "http://host:1/api/x/");
        assert_eq!(config.resolve_url("https://other/y"), "https://other/y");
    }

    #[test]
    fn builder_applies_defaults() {
        let config = ClientConfig::builder().base_url("http://host").build();
        assert_eq!(config.endpoints, Endpoints::default());
        assert_eq!(config.refresh_timeout, Duration::from_secs(10));
        assert!(config.storage_dir.is_none());
    }
}
