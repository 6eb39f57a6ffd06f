//! Communication polling service.

use std::sync::Arc;

use chrono::Utc;
use fhir::{BundleBuilder, CommunicationMessage, CommunicationStatus, Outcome, ResponseParser};

use crate::client::NphiesClient;
use crate::services::eligibility::check_outbound;
use crate::NphiesResult;

/// Polls the clearinghouse for queued messages (requests for additional
/// information, payer notices) tied to claims and authorizations.
pub struct CommunicationService {
    client: Arc<NphiesClient>,
    builder: BundleBuilder,
    poll_gate: tokio::sync::Mutex<()>,
}

impl CommunicationService {
    pub fn new(client: Arc<NphiesClient>, builder: BundleBuilder) -> Self {
        Self {
            client,
            builder,
            poll_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Retrieves queued communications, marking received ones as read.
    ///
    /// Single-flight: if a poll is already in progress, this call is a
    /// no-op returning an empty list rather than a concurrent duplicate.
    /// Safe to call on a fixed interval.
    pub async fn poll(&self) -> NphiesResult<Vec<CommunicationMessage>> {
        let Ok(_guard) = self.poll_gate.try_lock() else {
            tracing::debug!("communication poll already in progress, skipping");
            return Ok(Vec::new());
        };

        let bundle = self.builder.poll(Utc::now())?;
        check_outbound(&bundle)?;

        let response = self.client.send(&bundle).await?;
        match ResponseParser::communications(&response)? {
            Outcome::Success(mut messages) => {
                for message in &mut messages {
                    if message.status == CommunicationStatus::Pending {
                        message.status = CommunicationStatus::Read;
                    }
                }
                tracing::info!(count = messages.len(), "polled communications");
                Ok(messages)
            }
            Outcome::Rejected(rejection) => {
                tracing::warn!(code = %rejection.code, "communication poll rejected");
                Ok(Vec::new())
            }
        }
    }
}
