//! Prior-authorization service.

use std::sync::Arc;

use chrono::Utc;
use fhir::{AdjudicationResult, BundleBuilder, ClaimInput, Outcome, ResponseParser};

use crate::client::NphiesClient;
use crate::services::eligibility::check_outbound;
use crate::{mask_id, validation, NphiesResult};

/// Requests payer authorization before services are rendered.
///
/// Prior-auth requests carry the same resource graph as claims; an approved
/// response includes the authorization number (`pre_auth_ref`) quoted on the
/// eventual claim.
pub struct PriorAuthorizationService {
    client: Arc<NphiesClient>,
    builder: BundleBuilder,
}

impl PriorAuthorizationService {
    pub fn new(client: Arc<NphiesClient>, builder: BundleBuilder) -> Self {
        Self { client, builder }
    }

    /// Submits one prior-authorization request.
    pub async fn request(
        &self,
        input: &ClaimInput,
    ) -> NphiesResult<Outcome<AdjudicationResult>> {
        validation::validate_claim(input)?;

        let bundle = self.builder.prior_auth(input, Utc::now())?;
        check_outbound(&bundle)?;

        tracing::info!(
            auth_request = %input.external_id,
            member = %mask_id(input.member_id.as_str()),
            "prior-authorization request"
        );

        let response = self.client.send(&bundle).await?;
        Ok(ResponseParser::prior_auth(&response)?)
    }
}
