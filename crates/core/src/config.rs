//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into
//! core services by value. Environment variables are read only in the
//! binary; nothing here touches the process environment during request
//! handling, which keeps behaviour consistent across worker threads and
//! test harnesses.

use std::time::Duration;

use nphies_certificates::TlsPaths;

use crate::{NphiesError, NphiesResult};

/// Which NPHIES environment this process talks to.
///
/// Sandbox uses header-based identification only; production additionally
/// requires mutual TLS with a licenced client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = NphiesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" | "prod" => Ok(Self::Production),
            other => Err(NphiesError::Configuration(format!(
                "unknown environment {other:?} (expected sandbox or production)"
            ))),
        }
    }
}

/// Immutable configuration for the NPHIES integration, resolved at startup.
#[derive(Clone, Debug)]
pub struct NphiesConfig {
    environment: Environment,
    base_url: String,
    license_number: String,
    organization_id: String,
    provider_id: String,
    tls: Option<TlsPaths>,
    max_retries: u32,
    retry_base_delay: Duration,
    request_timeout: Duration,
    worker_count: usize,
    record_retry_limit: u32,
}

impl NphiesConfig {
    /// Creates a new `NphiesConfig` with default tunables.
    ///
    /// # Errors
    ///
    /// Returns `NphiesError::Configuration` when a required identifier is
    /// empty, the base URL is not an http(s) URL, or production mode is
    /// requested without TLS file paths.
    pub fn new(
        environment: Environment,
        base_url: impl Into<String>,
        license_number: impl Into<String>,
        organization_id: impl Into<String>,
        provider_id: impl Into<String>,
        tls: Option<TlsPaths>,
    ) -> NphiesResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_owned();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(NphiesError::Configuration(format!(
                "base URL must use http or https, got {base_url:?}"
            )));
        }

        let license_number = required("license number", license_number.into())?;
        let organization_id = required("organization id", organization_id.into())?;
        let provider_id = required("provider id", provider_id.into())?;

        if environment == Environment::Production && tls.is_none() {
            return Err(NphiesError::Configuration(
                "production mode requires client certificate, key and CA bundle paths".into(),
            ));
        }

        Ok(Self {
            environment,
            base_url,
            license_number,
            organization_id,
            provider_id,
            tls,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            worker_count: 10,
            record_retry_limit: 3,
        })
    }

    /// Overrides the maximum transport retry count (default 3).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Overrides the first retry backoff delay (default 1s).
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Overrides the per-request timeout (default 30s).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the batch worker pool size (default 10).
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Overrides the per-record retry limit in batch runs (default 3).
    pub fn with_record_retry_limit(mut self, limit: u32) -> Self {
        self.record_retry_limit = limit;
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn license_number(&self) -> &str {
        &self.license_number
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn tls(&self) -> Option<&TlsPaths> {
        self.tls.as_ref()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn record_retry_limit(&self) -> u32 {
        self.record_retry_limit
    }
}

fn required(name: &str, value: String) -> NphiesResult<String> {
    let trimmed = value.trim().to_owned();
    if trimmed.is_empty() {
        return Err(NphiesError::Configuration(format!("{name} is required")));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> NphiesResult<NphiesConfig> {
        NphiesConfig::new(
            Environment::Sandbox,
            "https://sandbox.nphies.sa",
            "LIC-100",
            "10000500",
            "PR-10012",
            None,
        )
    }

    #[test]
    fn sandbox_without_tls_is_accepted() {
        let config = sandbox().unwrap();
        assert_eq!(config.base_url(), "https://sandbox.nphies.sa");
        assert_eq!(config.worker_count(), 10);
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let config = NphiesConfig::new(
            Environment::Sandbox,
            "https://sandbox.nphies.sa/",
            "LIC-100",
            "10000500",
            "PR-10012",
            None,
        )
        .unwrap();
        assert_eq!(config.base_url(), "https://sandbox.nphies.sa");
    }

    #[test]
    fn production_without_tls_is_rejected() {
        let result = NphiesConfig::new(
            Environment::Production,
            "https://nphies.sa",
            "LIC-100",
            "10000500",
            "PR-10012",
            None,
        );
        assert!(matches!(result, Err(NphiesError::Configuration(_))));
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        let result = NphiesConfig::new(
            Environment::Sandbox,
            "https://sandbox.nphies.sa",
            "  ",
            "10000500",
            "PR-10012",
            None,
        );
        assert!(matches!(result, Err(NphiesError::Configuration(_))));
    }

    #[test]
    fn non_http_url_is_rejected() {
        let result = NphiesConfig::new(
            Environment::Sandbox,
            "ftp://nphies.sa",
            "LIC-100",
            "10000500",
            "PR-10012",
            None,
        );
        assert!(matches!(result, Err(NphiesError::Configuration(_))));
    }

    #[test]
    fn environment_parses_from_string() {
        assert_eq!(
            "sandbox".parse::<Environment>().unwrap(),
            Environment::Sandbox
        );
        assert_eq!(
            "Production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!("staging".parse::<Environment>().is_err());
    }
}
