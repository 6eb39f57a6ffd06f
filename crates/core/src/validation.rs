//! Pre-flight validation of domain inputs.
//!
//! These checks run before any bundle is constructed or any NPHIES call is
//! consumed: a record that fails here is marked invalid by the batch
//! pipeline without costing a network round trip. Scalar shape validation
//! (identifier digits, ICD-10 form, money precision) already happened when
//! the input types were constructed; this module adds the cross-field
//! rules.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use fhir::{ClaimInput, EligibilityInput};

use crate::{NphiesError, NphiesResult};

/// Earliest service date accepted; anything older is a data-entry error.
const EARLIEST_SERVICE_YEAR: i32 = 2000;

/// How far into the future a service date may lie (forward-dated checks).
const MAX_FUTURE_DAYS: i64 = 366;

/// Validates an eligibility-check input.
///
/// # Errors
///
/// Returns `NphiesError::Validation` if the service date is out of range or
/// no purpose is stated.
pub fn validate_eligibility(input: &EligibilityInput) -> NphiesResult<()> {
    validate_service_date(input.service_date)?;
    if input.purpose.is_empty() {
        return Err(NphiesError::Validation(
            "eligibility request must state at least one purpose".into(),
        ));
    }
    Ok(())
}

/// Validates a claim or prior-authorization input.
///
/// # Errors
///
/// Returns `NphiesError::Validation` if required fields are missing, a line
/// item is degenerate, or a caller-supplied total disagrees with the
/// computed item total.
pub fn validate_claim(input: &ClaimInput) -> NphiesResult<()> {
    if input.external_id.trim().is_empty() {
        return Err(NphiesError::Validation("claim external id is required".into()));
    }
    validate_service_date(input.service_date)?;
    if input.items.is_empty() {
        return Err(NphiesError::Validation(
            "claim must contain at least one line item".into(),
        ));
    }
    if input.diagnoses.is_empty() {
        return Err(NphiesError::Validation(
            "claim must carry at least one diagnosis".into(),
        ));
    }
    for (index, item) in input.items.iter().enumerate() {
        if item.quantity == 0 {
            return Err(NphiesError::Validation(format!(
                "line item {index} has zero quantity"
            )));
        }
    }
    if let Some(supplied) = input.total {
        let computed = input.computed_total();
        if supplied != computed {
            return Err(NphiesError::Validation(format!(
                "supplied total {supplied} does not match computed total {computed}"
            )));
        }
    }
    Ok(())
}

fn validate_service_date(date: NaiveDate) -> NphiesResult<()> {
    if date.year() < EARLIEST_SERVICE_YEAR {
        return Err(NphiesError::Validation(format!(
            "service date {date} is implausibly old"
        )));
    }
    let horizon = Utc::now().date_naive() + Duration::days(MAX_FUTURE_DAYS);
    if date > horizon {
        return Err(NphiesError::Validation(format!(
            "service date {date} is too far in the future"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nphies_types::{DiagnosisCode, MemberId, Money, PayerId, ProcedureCode};

    fn eligibility_input(date: NaiveDate) -> EligibilityInput {
        EligibilityInput::benefits(
            MemberId::new("1234567890").unwrap(),
            PayerId::new("7000911508").unwrap(),
            date,
        )
    }

    fn claim_input() -> ClaimInput {
        ClaimInput {
            external_id: "CLM-0001".to_owned(),
            claim_type: fhir::ClaimType::Professional,
            member_id: MemberId::new("1234567890").unwrap(),
            payer_id: PayerId::new("7000911508").unwrap(),
            service_date: NaiveDate::from_ymd_opt(2025, 10, 22).unwrap(),
            diagnoses: vec![DiagnosisCode::new("J45").unwrap()],
            items: vec![fhir::ClaimItemInput {
                code: ProcedureCode::new("99213").unwrap(),
                quantity: 1,
                unit_price: Money::new(150.0).unwrap(),
            }],
            total: None,
        }
    }

    #[test]
    fn accepts_plausible_eligibility_input() {
        let input = eligibility_input(NaiveDate::from_ymd_opt(2025, 10, 22).unwrap());
        assert!(validate_eligibility(&input).is_ok());
    }

    #[test]
    fn rejects_ancient_service_date() {
        let input = eligibility_input(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap());
        assert!(matches!(
            validate_eligibility(&input),
            Err(NphiesError::Validation(_))
        ));
    }

    #[test]
    fn rejects_far_future_service_date() {
        let future = Utc::now().date_naive() + Duration::days(800);
        let input = eligibility_input(future);
        assert!(matches!(
            validate_eligibility(&input),
            Err(NphiesError::Validation(_))
        ));
    }

    #[test]
    fn rejects_empty_purpose() {
        let mut input = eligibility_input(NaiveDate::from_ymd_opt(2025, 10, 22).unwrap());
        input.purpose.clear();
        assert!(matches!(
            validate_eligibility(&input),
            Err(NphiesError::Validation(_))
        ));
    }

    #[test]
    fn accepts_consistent_claim_total() {
        let mut input = claim_input();
        input.total = Some(Money::new(150.0).unwrap());
        assert!(validate_claim(&input).is_ok());
    }

    #[test]
    fn rejects_mismatched_claim_total() {
        let mut input = claim_input();
        input.total = Some(Money::new(151.0).unwrap());
        let err = validate_claim(&input).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn rejects_blank_external_id() {
        let mut input = claim_input();
        input.external_id = "  ".to_owned();
        assert!(matches!(
            validate_claim(&input),
            Err(NphiesError::Validation(_))
        ));
    }

    #[test]
    fn rejects_claim_without_items_or_diagnoses() {
        let mut input = claim_input();
        input.items.clear();
        assert!(validate_claim(&input).is_err());

        let mut input = claim_input();
        input.diagnoses.clear();
        assert!(validate_claim(&input).is_err());
    }
}
