//! HTTP transport to the NPHIES message-processing endpoint.
//!
//! One pooled client is built at startup (with the TLS identity in
//! production) and shared across all batch workers. [`NphiesClient::send`]
//! serialises a bundle, attaches the [`AuthContext`] headers and POSTs it,
//! retrying transient failures per the configured [`RetryPolicy`]. Every
//! attempt is logged with PHI-masked context; that logging is the only
//! observable side effect.

use fhir::{Bundle, ParseError};

use crate::auth::AuthContext;
use crate::config::NphiesConfig;
use crate::retry::{is_retryable_status, RetryPolicy};
use crate::{mask_id, NphiesError, NphiesResult};

/// Maximum response-body bytes carried in error values and logs.
const BODY_SNIPPET_LIMIT: usize = 2_000;

/// Client for the clearinghouse message endpoint.
pub struct NphiesClient {
    http: reqwest::Client,
    endpoint: String,
    auth: AuthContext,
    retry: RetryPolicy,
}

impl NphiesClient {
    /// Builds the pooled HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `NphiesError::Configuration` if the TLS identity or CA
    /// certificates cannot be converted, or the underlying client cannot be
    /// constructed.
    pub fn new(config: &NphiesConfig, auth: AuthContext) -> NphiesResult<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout());

        if let Some(material) = auth.tls() {
            let identity = reqwest::Identity::from_pem(material.identity_pem())
                .map_err(|e| NphiesError::Configuration(format!("invalid TLS identity: {e}")))?;
            builder = builder.identity(identity);
            for ca in material.ca_pems() {
                let certificate = reqwest::Certificate::from_pem(ca).map_err(|e| {
                    NphiesError::Configuration(format!("invalid CA certificate: {e}"))
                })?;
                builder = builder.add_root_certificate(certificate);
            }
        }

        let http = builder
            .build()
            .map_err(|e| NphiesError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/message", config.base_url()),
            auth,
            retry: RetryPolicy {
                max_retries: config.max_retries(),
                base_delay: config.retry_base_delay(),
                ..RetryPolicy::default()
            },
        })
    }

    /// Sends a request bundle and returns the raw response bundle.
    ///
    /// Retries network failures and 5xx/429 responses up to the configured
    /// maximum with exponential backoff; 4xx responses are deterministic
    /// rejections and are returned immediately as [`NphiesError::Http`].
    ///
    /// # Errors
    ///
    /// - [`NphiesError::Transport`] after exhausting retries
    /// - [`NphiesError::Http`] on a non-retryable HTTP status
    /// - [`NphiesError::Protocol`] when the response body is not a bundle
    pub async fn send(&self, bundle: &Bundle) -> NphiesResult<Bundle> {
        let max_attempts = self.retry.max_retries + 1;
        let masked = mask_id(&bundle.id);

        for attempt in 1..=max_attempts {
            tracing::info!(bundle = %masked, attempt, max_attempts, "sending bundle to NPHIES");

            let mut request = self.http.post(&self.endpoint).json(bundle);
            for (name, value) in self.auth.headers() {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        tracing::info!(bundle = %masked, attempt, %status, "received response");
                        return response
                            .json::<Bundle>()
                            .await
                            .map_err(|e| ParseError::Body(e.to_string()).into());
                    }

                    if is_retryable_status(status.as_u16()) {
                        tracing::warn!(bundle = %masked, attempt, %status, "retryable status");
                        if attempt < max_attempts {
                            tokio::time::sleep(self.retry.delay_for(attempt)).await;
                            continue;
                        }
                        return Err(NphiesError::Transport {
                            attempts: attempt,
                            detail: format!("HTTP {status}"),
                        });
                    }

                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(bundle = %masked, attempt, %status, "clearinghouse rejected request");
                    return Err(NphiesError::Http {
                        status: status.as_u16(),
                        body: truncate(&body),
                    });
                }
                Err(err) => {
                    tracing::warn!(bundle = %masked, attempt, error = %err, "transport error");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                        continue;
                    }
                    return Err(NphiesError::Transport {
                        attempts: attempt,
                        detail: err.to_string(),
                    });
                }
            }
        }

        unreachable!("send loop always returns within max_attempts")
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= BODY_SNIPPET_LIMIT {
        return body.to_owned();
    }
    let mut end = BODY_SNIPPET_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
