//! Eligibility-check service.

use std::sync::Arc;

use chrono::Utc;
use fhir::{BundleBuilder, EligibilityInput, EligibilityResult, Outcome, ResponseParser};

use crate::client::NphiesClient;
use crate::{mask_id, validation, NphiesError, NphiesResult};

/// Checks a member's coverage with their payer.
pub struct EligibilityService {
    client: Arc<NphiesClient>,
    builder: BundleBuilder,
}

impl EligibilityService {
    pub fn new(client: Arc<NphiesClient>, builder: BundleBuilder) -> Self {
        Self { client, builder }
    }

    /// Runs one eligibility check.
    ///
    /// Returns [`Outcome::Rejected`] for clearinghouse business rejections;
    /// those are routine data for the caller, not errors.
    ///
    /// # Errors
    ///
    /// - [`NphiesError::Validation`] when the input fails pre-flight checks
    /// - [`NphiesError::Transport`] / [`NphiesError::Http`] from transport
    /// - [`NphiesError::Protocol`] when the response does not parse
    pub async fn check(
        &self,
        input: &EligibilityInput,
    ) -> NphiesResult<Outcome<EligibilityResult>> {
        validation::validate_eligibility(input)?;

        let bundle = self.builder.eligibility(input, Utc::now())?;
        check_outbound(&bundle)?;

        tracing::info!(
            member = %mask_id(input.member_id.as_str()),
            payer = %input.payer_id,
            service_date = %input.service_date,
            "eligibility check"
        );

        let response = self.client.send(&bundle).await?;
        Ok(ResponseParser::eligibility(&response)?)
    }
}

/// Reference integrity on our own outbound bundle; a failure here is a
/// builder bug surfaced as a validation error rather than a protocol one.
pub(crate) fn check_outbound(bundle: &fhir::Bundle) -> NphiesResult<()> {
    bundle.check_references().map_err(|e| {
        NphiesError::Validation(format!("outbound bundle failed reference check: {e}"))
    })
}
