//! Authentication context for clearinghouse requests.
//!
//! The header set and (in production) TLS material are computed once from
//! configuration and then shared read-only across all workers. The context
//! is passed into [`crate::client::NphiesClient`] by dependency injection,
//! never looked up ambiently, so tests can substitute a sandbox context.

use nphies_certificates::{CertificateStore, TlsMaterial};

use crate::config::{Environment, NphiesConfig};
use crate::NphiesResult;

/// Identification headers sent on every request, plus the TLS identity in
/// production mode. Immutable after construction.
#[derive(Clone, Debug)]
pub struct AuthContext {
    environment: Environment,
    headers: Vec<(&'static str, String)>,
    tls: Option<TlsMaterial>,
}

impl AuthContext {
    /// Builds the context from configuration, loading and validating the
    /// client certificate when the environment requires mutual TLS.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::NphiesError::Certificate`] failures from
    /// certificate loading; these are fatal at startup in production mode.
    pub fn from_config(config: &NphiesConfig) -> NphiesResult<Self> {
        let headers = vec![
            ("X-License-Number", config.license_number().to_owned()),
            ("X-Organization-ID", config.organization_id().to_owned()),
            ("X-Provider-ID", config.provider_id().to_owned()),
            ("Content-Type", "application/fhir+json".to_owned()),
        ];

        let tls = match (config.environment(), config.tls()) {
            (Environment::Production, Some(paths)) => {
                let material = CertificateStore::load(paths)?;
                tracing::info!(
                    subject = material.subject(),
                    "loaded client certificate for mutual TLS"
                );
                Some(material)
            }
            // NphiesConfig::new rejects production without TLS paths.
            _ => None,
        };

        Ok(Self {
            environment: config.environment(),
            headers,
            tls,
        })
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// The fixed identification headers.
    pub fn headers(&self) -> &[(&'static str, String)] {
        &self.headers
    }

    /// TLS material, present in production mode only.
    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_config() -> NphiesConfig {
        NphiesConfig::new(
            Environment::Sandbox,
            "https://sandbox.nphies.sa",
            "LIC-100",
            "10000500",
            "PR-10012",
            None,
        )
        .unwrap()
    }

    #[test]
    fn sandbox_context_carries_headers_only() {
        let auth = AuthContext::from_config(&sandbox_config()).unwrap();
        assert!(auth.tls().is_none());

        let headers: Vec<&str> = auth.headers().iter().map(|(name, _)| *name).collect();
        assert_eq!(
            headers,
            vec![
                "X-License-Number",
                "X-Organization-ID",
                "X-Provider-ID",
                "Content-Type",
            ]
        );
    }

    #[test]
    fn content_type_is_fhir_json() {
        let auth = AuthContext::from_config(&sandbox_config()).unwrap();
        let content_type = auth
            .headers()
            .iter()
            .find(|(name, _)| *name == "Content-Type")
            .map(|(_, value)| value.as_str());
        assert_eq!(content_type, Some("application/fhir+json"));
    }
}
