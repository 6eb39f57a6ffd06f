//! Claim submission service and lifecycle driver.

use std::sync::Arc;

use chrono::Utc;
use fhir::{
    AdjudicationResult, AdjudicationStatus, BundleBuilder, ClaimInput, Outcome, ResponseParser,
};

use crate::claim_state::{ClaimRegistry, ClaimState};
use crate::client::NphiesClient;
use crate::services::eligibility::check_outbound;
use crate::{mask_id, validation, NphiesResult};

/// Submits claims and drives the claim state machine.
///
/// This service is the only component that mutates claim status. Submitted
/// claims are immutable; corrections require a new claim with a new
/// external id.
pub struct ClaimsService {
    client: Arc<NphiesClient>,
    builder: BundleBuilder,
    registry: Arc<ClaimRegistry>,
}

impl ClaimsService {
    pub fn new(client: Arc<NphiesClient>, builder: BundleBuilder) -> Self {
        Self {
            client,
            builder,
            registry: Arc::new(ClaimRegistry::new()),
        }
    }

    /// Submits one claim for adjudication.
    ///
    /// Drives `draft → submitted → adjudicated`. A business rejection
    /// adjudicates the claim as denied; a transport or protocol failure
    /// reverts it to `draft` so the batch pipeline may retry.
    ///
    /// # Errors
    ///
    /// - [`crate::NphiesError::InvalidState`] when the claim is not in
    ///   `draft` or another operation on the same id is in flight
    /// - validation/transport/protocol errors as for the other services
    pub async fn submit(&self, input: &ClaimInput) -> NphiesResult<Outcome<AdjudicationResult>> {
        validation::validate_claim(input)?;
        self.registry.begin_submission(&input.external_id)?;

        tracing::info!(
            claim = %input.external_id,
            member = %mask_id(input.member_id.as_str()),
            "claim submission"
        );

        let result = self.exchange(input).await;
        self.settle(&input.external_id, &result);
        result
    }

    /// Appeals a denied claim.
    ///
    /// Drives `denied → appealed →` back to an adjudicated state.
    pub async fn appeal(&self, input: &ClaimInput) -> NphiesResult<Outcome<AdjudicationResult>> {
        validation::validate_claim(input)?;
        self.registry.begin_appeal(&input.external_id)?;

        tracing::info!(claim = %input.external_id, "claim appeal");

        let result = self.exchange(input).await;
        self.settle(&input.external_id, &result);
        result
    }

    /// Current lifecycle state of a claim.
    ///
    /// # Errors
    ///
    /// [`crate::NphiesError::InvalidState`] for unknown claims and claims
    /// still in `draft`.
    pub fn status(&self, claim_id: &str) -> NphiesResult<ClaimState> {
        self.registry.status(claim_id)
    }

    async fn exchange(&self, input: &ClaimInput) -> NphiesResult<Outcome<AdjudicationResult>> {
        let bundle = self.builder.claim(input, Utc::now())?;
        check_outbound(&bundle)?;
        let response = self.client.send(&bundle).await?;
        Ok(ResponseParser::claim(&response)?)
    }

    fn settle(&self, claim_id: &str, result: &NphiesResult<Outcome<AdjudicationResult>>) {
        let outcome = match result {
            Ok(Outcome::Success(adjudication)) => Some(adjudication.status),
            // A business rejection is a definitive payer decision.
            Ok(Outcome::Rejected(_)) => Some(AdjudicationStatus::Denied),
            Err(_) => None,
        };
        self.registry.record_outcome(claim_id, outcome);
    }
}
