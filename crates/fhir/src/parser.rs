//! Decoding of inbound response bundles into domain results.
//!
//! Every parse runs the same pre-flight: the bundle must be a `message`
//! bundle, its first entry a MessageHeader carrying the operation's response
//! event, and reference integrity must hold. After that, three outcomes are
//! possible:
//!
//! 1. a successful domain result,
//! 2. a clearinghouse business rejection, surfaced as
//!    [`Outcome::Rejected`]: expected data the caller branches on,
//! 3. a malformed/unexpected structure, surfaced as [`ParseError`]. These
//!    halt processing and are flagged for review, since they may indicate a
//!    clearinghouse contract change.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bundle::{Bundle, BundleKind};
use crate::constants::{ADJUDICATION_SYSTEM, BENEFIT_TYPE_SYSTEM};
use crate::outcome::{
    AdjudicationResult, AdjudicationStatus, Benefits, BusinessRejection, CommunicationMessage,
    CommunicationStatus, CoveragePeriod, EligibilityResult, ItemAdjudication, Outcome,
    RejectionIssue,
};
use crate::resources::{
    ClaimResponse, Communication, CoverageEligibilityResponse, MessageHeader, MoneyValue,
    OperationOutcome, ResponseCode,
};
use crate::{OperationKind, ParseError, ParseResult};
use nphies_types::Money;

/// Decodes response bundles.
///
/// This is a zero-sized type used for namespacing; all methods are
/// associated functions.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses an eligibility-check response.
    pub fn eligibility(bundle: &Bundle) -> ParseResult<Outcome<EligibilityResult>> {
        if let Some(rejection) = preflight(bundle, OperationKind::EligibilityCheck)? {
            return Ok(Outcome::Rejected(rejection));
        }

        let value = bundle
            .first_of("CoverageEligibilityResponse")
            .ok_or(ParseError::MissingResource("CoverageEligibilityResponse"))?;
        let response: CoverageEligibilityResponse = decode(value, "CoverageEligibilityResponse")?;

        if response.outcome == "error" {
            return Ok(Outcome::Rejected(rejection_from_outcomes(
                bundle,
                response.disposition,
            )));
        }

        let eligible = response
            .insurance
            .iter()
            .any(|ins| ins.inforce == Some(true));
        let coverage_status = match response.insurance.first().and_then(|ins| ins.inforce) {
            Some(true) => "in-force".to_owned(),
            Some(false) => "not-in-force".to_owned(),
            None => "unknown".to_owned(),
        };

        let mut benefits = Benefits::default();
        for insurance in &response.insurance {
            for item in &insurance.item {
                for benefit in &item.benefit {
                    let Some(allowed) = &benefit.allowed_money else {
                        continue;
                    };
                    let amount = wire_money(allowed, "CoverageEligibilityResponse")?;
                    match benefit.kind.code_in(BENEFIT_TYPE_SYSTEM) {
                        Some("copay") => benefits.copay = Some(amount),
                        Some("deductible") => benefits.deductible = Some(amount),
                        Some("benefit") | Some("limit") => benefits.limit = Some(amount),
                        _ => {}
                    }
                }
            }
        }

        let coverage_period = response
            .insurance
            .iter()
            .find_map(|ins| ins.benefit_period.as_ref())
            .map(|period| CoveragePeriod {
                start: period.start,
                end: period.end,
            });

        Ok(Outcome::Success(EligibilityResult {
            eligible,
            coverage_status,
            benefits,
            coverage_period,
            disposition: response.disposition,
        }))
    }

    /// Parses a claim-submission response.
    pub fn claim(bundle: &Bundle) -> ParseResult<Outcome<AdjudicationResult>> {
        adjudication(bundle, OperationKind::ClaimSubmission)
    }

    /// Parses a prior-authorization response.
    pub fn prior_auth(bundle: &Bundle) -> ParseResult<Outcome<AdjudicationResult>> {
        adjudication(bundle, OperationKind::PriorAuthorization)
    }

    /// Parses a communication-poll response into the queued messages.
    pub fn communications(bundle: &Bundle) -> ParseResult<Outcome<Vec<CommunicationMessage>>> {
        if let Some(rejection) = preflight(bundle, OperationKind::CommunicationPoll)? {
            return Ok(Outcome::Rejected(rejection));
        }

        let mut messages = Vec::new();
        for value in bundle.all_of("Communication") {
            let communication: Communication = decode(value, "Communication")?;
            let status = match communication.status.as_str() {
                "completed" => CommunicationStatus::Processed,
                _ => CommunicationStatus::Pending,
            };
            messages.push(CommunicationMessage {
                id: communication.id,
                about: communication
                    .about
                    .into_iter()
                    .map(|r| r.reference)
                    .collect(),
                payloads: communication
                    .payload
                    .into_iter()
                    .filter_map(|p| p.content_string)
                    .collect(),
                status,
                sent: communication.sent,
            });
        }

        Ok(Outcome::Success(messages))
    }
}

fn adjudication(
    bundle: &Bundle,
    kind: OperationKind,
) -> ParseResult<Outcome<AdjudicationResult>> {
    if let Some(rejection) = preflight(bundle, kind)? {
        return Ok(Outcome::Rejected(rejection));
    }

    let value = bundle
        .first_of("ClaimResponse")
        .ok_or(ParseError::MissingResource("ClaimResponse"))?;
    let response: ClaimResponse = decode(value, "ClaimResponse")?;

    if response.outcome == "error" {
        return Ok(Outcome::Rejected(rejection_from_outcomes(
            bundle,
            response.disposition,
        )));
    }

    let mut items = Vec::with_capacity(response.item.len());
    for item in &response.item {
        let mut approved = false;
        let mut amount = None;
        let mut reason = None;
        for adjudication in &item.adjudication {
            let category = adjudication.category.code_in(ADJUDICATION_SYSTEM);
            if matches!(category, Some("eligible") | Some("benefit")) {
                if let Some(money_value) = &adjudication.amount {
                    if money_value.value > 0.0 {
                        approved = true;
                        amount = Some(wire_money(money_value, "ClaimResponse")?);
                    }
                }
            }
            if let Some(r) = &adjudication.reason {
                reason = r.text.clone().or_else(|| r.first_code().map(str::to_owned));
            }
        }
        items.push(ItemAdjudication {
            sequence: item.item_sequence,
            approved,
            amount,
            reason,
        });
    }

    let total_approved = response
        .total
        .iter()
        .find(|t| t.category.code_in(ADJUDICATION_SYSTEM) == Some("benefit"))
        .map(|t| wire_money(&t.amount, "ClaimResponse"))
        .transpose()?;

    let status = if items.is_empty() {
        // No per-item detail: fall back to the approved total.
        match total_approved {
            Some(total) if total.cents() > 0 => AdjudicationStatus::Approved,
            _ => AdjudicationStatus::Denied,
        }
    } else if items.iter().all(|i| i.approved) {
        AdjudicationStatus::Approved
    } else if items.iter().any(|i| i.approved) {
        AdjudicationStatus::PartiallyApproved
    } else {
        AdjudicationStatus::Denied
    };

    Ok(Outcome::Success(AdjudicationResult {
        response_id: response.id,
        status,
        pre_auth_ref: response.pre_auth_ref,
        items,
        total_approved,
        disposition: response.disposition,
    }))
}

/// Shared response checks. Returns a rejection when the message layer
/// reports a fatal error.
fn preflight(bundle: &Bundle, kind: OperationKind) -> ParseResult<Option<BusinessRejection>> {
    if bundle.kind != BundleKind::Message {
        return Err(ParseError::NotAMessage(bundle.kind.to_string()));
    }
    let Some(first) = bundle.entry.first() else {
        return Err(ParseError::EmptyBundle);
    };
    if first.resource_type() != Some("MessageHeader") {
        return Err(ParseError::MissingMessageHeader);
    }

    let header: MessageHeader = decode(&first.resource, "MessageHeader")?;
    let expected = kind.response_event();
    if header.event_coding.code != expected {
        return Err(ParseError::UnexpectedEvent {
            expected: expected.to_owned(),
            found: header.event_coding.code,
        });
    }

    bundle.check_references()?;

    match header.response {
        Some(response) if response.code == ResponseCode::FatalError => {
            Ok(Some(rejection_from_outcomes(bundle, None)))
        }
        _ => Ok(None),
    }
}

/// Builds a [`BusinessRejection`] from the OperationOutcome entries of a
/// response bundle.
fn rejection_from_outcomes(bundle: &Bundle, disposition: Option<String>) -> BusinessRejection {
    let mut issues = Vec::new();
    for value in bundle.all_of("OperationOutcome") {
        let Ok(outcome) = decode::<OperationOutcome>(value, "OperationOutcome") else {
            continue;
        };
        for issue in outcome.issue {
            if issue.severity == "error" || issue.severity == "fatal" {
                let code = issue
                    .details
                    .as_ref()
                    .and_then(|d| d.first_code())
                    .unwrap_or(issue.code.as_str())
                    .to_owned();
                let detail = issue
                    .diagnostics
                    .clone()
                    .or_else(|| issue.details.as_ref().and_then(|d| d.text.clone()));
                issues.push(RejectionIssue {
                    severity: issue.severity,
                    code,
                    detail,
                });
            }
        }
    }

    let code = issues
        .first()
        .map(|i| i.code.clone())
        .unwrap_or_else(|| "unknown".to_owned());
    let display = disposition.or_else(|| issues.first().and_then(|i| i.detail.clone()));

    BusinessRejection {
        code,
        display,
        issues,
    }
}

fn wire_money(value: &MoneyValue, resource_type: &'static str) -> ParseResult<Money> {
    Money::new(value.value).map_err(|_| ParseError::BadField {
        resource_type,
        field: "amount",
    })
}

/// Strictly decodes one entry into a typed resource, reporting the JSON path
/// of the first mismatching field.
fn decode<T: DeserializeOwned>(value: &Value, resource_type: &'static str) -> ParseResult<T> {
    serde_path_to_error::deserialize(value.clone()).map_err(|err| {
        let path = err.path().to_string();
        let path = if path.is_empty() {
            "<root>".to_owned()
        } else {
            path
        };
        ParseError::Decode {
            resource_type,
            path,
            detail: err.into_inner().to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn fixed_ts() -> DateTime<Utc> {
        "2025-10-22T09:00:00Z".parse().unwrap()
    }

    fn response_header(event: &str, response_code: Option<&str>, focus: &str) -> Value {
        let mut header = json!({
            "resourceType": "MessageHeader",
            "id": "mh-resp-1",
            "eventCoding": {
                "system": "http://nphies.sa/terminology/CodeSystem/ksa-message-events",
                "code": event,
            },
            "source": {"endpoint": "http://nphies.sa/endpoint/nphies"},
            "focus": [{"reference": focus}],
        });
        if let Some(code) = response_code {
            header["response"] = json!({"identifier": "req-1", "code": code});
        }
        header
    }

    fn eligibility_response_bundle(inforce: bool, copay: f64) -> Bundle {
        let mut bundle = Bundle::message("resp-1", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header(
                "eligibility-response",
                Some("ok"),
                "CoverageEligibilityResponse/er-1",
            ),
        );
        bundle.push_resource(
            "CoverageEligibilityResponse",
            "er-1",
            json!({
                "resourceType": "CoverageEligibilityResponse",
                "id": "er-1",
                "status": "active",
                "purpose": ["benefits"],
                "patient": {"reference": "Patient/p-1"},
                "outcome": "complete",
                "insurance": [{
                    "coverage": {"reference": "Coverage/c-1"},
                    "inforce": inforce,
                    "benefitPeriod": {"start": "2025-01-01", "end": "2025-12-31"},
                    "item": [{
                        "benefit": [
                            {
                                "type": {"coding": [{
                                    "system": "http://nphies.sa/terminology/CodeSystem/benefit-type",
                                    "code": "copay",
                                }]},
                                "allowedMoney": {"value": copay, "currency": "SAR"},
                            },
                            {
                                "type": {"coding": [{"code": "deductible"}]},
                                "allowedMoney": {"value": 500.0, "currency": "SAR"},
                            },
                        ],
                    }],
                }],
            }),
        );
        bundle.push_resource(
            "Patient",
            "p-1",
            json!({"resourceType": "Patient", "id": "p-1"}),
        );
        bundle.push_resource(
            "Coverage",
            "c-1",
            json!({
                "resourceType": "Coverage",
                "id": "c-1",
                "status": "active",
                "beneficiary": {"reference": "Patient/p-1"},
            }),
        );
        bundle
    }

    #[test]
    fn parses_eligible_response_with_benefits() {
        let bundle = eligibility_response_bundle(true, 50.0);
        let result = ResponseParser::eligibility(&bundle)
            .unwrap()
            .success()
            .unwrap();

        assert!(result.eligible);
        assert_eq!(result.coverage_status, "in-force");
        assert_eq!(result.benefits.copay, Some(Money::new(50.0).unwrap()));
        assert_eq!(result.benefits.deductible, Some(Money::new(500.0).unwrap()));
        let period = result.coverage_period.unwrap();
        assert_eq!(period.start.unwrap().to_string(), "2025-01-01");
    }

    #[test]
    fn parses_not_inforce_as_ineligible() {
        let bundle = eligibility_response_bundle(false, 0.0);
        let result = ResponseParser::eligibility(&bundle)
            .unwrap()
            .success()
            .unwrap();
        assert!(!result.eligible);
        assert_eq!(result.coverage_status, "not-in-force");
    }

    #[test]
    fn fatal_error_surfaces_as_business_rejection() {
        let mut bundle = Bundle::message("resp-2", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header("eligibility-response", Some("fatal-error"), "OperationOutcome/oo-1"),
        );
        bundle.push_resource(
            "OperationOutcome",
            "oo-1",
            json!({
                "resourceType": "OperationOutcome",
                "id": "oo-1",
                "issue": [{
                    "severity": "error",
                    "code": "business-rule",
                    "details": {"coding": [{"code": "member-not-found"}]},
                    "diagnostics": "Member is not known to the payer",
                }],
            }),
        );

        match ResponseParser::eligibility(&bundle).unwrap() {
            Outcome::Rejected(rejection) => {
                assert_eq!(rejection.code, "member-not-found");
                assert_eq!(rejection.issues.len(), 1);
                assert_eq!(
                    rejection.issues[0].detail.as_deref(),
                    Some("Member is not known to the payer")
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn unexpected_event_is_a_protocol_error() {
        let mut bundle = Bundle::message("resp-3", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header("claim-response", Some("ok"), "ClaimResponse/cr-x"),
        );
        bundle.push_resource(
            "ClaimResponse",
            "cr-x",
            json!({
                "resourceType": "ClaimResponse",
                "id": "cr-x",
                "status": "active",
                "outcome": "complete",
            }),
        );

        assert!(matches!(
            ResponseParser::eligibility(&bundle),
            Err(ParseError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn missing_primary_resource_is_a_protocol_error() {
        let mut bundle = Bundle::message("resp-4", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header("eligibility-response", Some("ok"), "urn:uuid:none"),
        );

        assert!(matches!(
            ResponseParser::eligibility(&bundle),
            Err(ParseError::MissingResource("CoverageEligibilityResponse"))
        ));
    }

    #[test]
    fn dangling_reference_is_a_protocol_error() {
        let mut bundle = Bundle::message("resp-5", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header(
                "eligibility-response",
                Some("ok"),
                "CoverageEligibilityResponse/gone",
            ),
        );

        assert!(matches!(
            ResponseParser::eligibility(&bundle),
            Err(ParseError::UnresolvedReference { .. })
        ));
    }

    fn claim_response_bundle(items: Value) -> Bundle {
        let mut bundle = Bundle::message("resp-6", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header("claim-response", Some("ok"), "ClaimResponse/cr-1"),
        );
        bundle.push_resource(
            "ClaimResponse",
            "cr-1",
            json!({
                "resourceType": "ClaimResponse",
                "id": "cr-1",
                "status": "active",
                "outcome": "complete",
                "item": items,
                "total": [{
                    "category": {"coding": [{"code": "benefit"}]},
                    "amount": {"value": 120.0, "currency": "SAR"},
                }],
            }),
        );
        bundle
    }

    fn approved_item(sequence: u32, amount: f64) -> Value {
        json!({
            "itemSequence": sequence,
            "adjudication": [{
                "category": {"coding": [{
                    "system": "http://terminology.hl7.org/CodeSystem/adjudication",
                    "code": "benefit",
                }]},
                "amount": {"value": amount, "currency": "SAR"},
            }],
        })
    }

    fn denied_item(sequence: u32) -> Value {
        json!({
            "itemSequence": sequence,
            "adjudication": [{
                "category": {"coding": [{"code": "benefit"}]},
                "amount": {"value": 0.0, "currency": "SAR"},
                "reason": {"coding": [{"code": "not-covered"}]},
            }],
        })
    }

    #[test]
    fn fully_approved_claim() {
        let bundle = claim_response_bundle(json!([approved_item(1, 120.0)]));
        let result = ResponseParser::claim(&bundle).unwrap().success().unwrap();
        assert_eq!(result.status, AdjudicationStatus::Approved);
        assert_eq!(result.total_approved, Some(Money::new(120.0).unwrap()));
        assert!(result.items[0].approved);
    }

    #[test]
    fn fully_denied_claim() {
        let bundle = claim_response_bundle(json!([denied_item(1)]));
        let result = ResponseParser::claim(&bundle).unwrap().success().unwrap();
        assert_eq!(result.status, AdjudicationStatus::Denied);
        assert_eq!(result.items[0].reason.as_deref(), Some("not-covered"));
    }

    #[test]
    fn mixed_items_are_partially_approved() {
        let bundle = claim_response_bundle(json!([approved_item(1, 80.0), denied_item(2)]));
        let result = ResponseParser::claim(&bundle).unwrap().success().unwrap();
        assert_eq!(result.status, AdjudicationStatus::PartiallyApproved);
    }

    #[test]
    fn claim_error_outcome_is_a_rejection() {
        let mut bundle = Bundle::message("resp-7", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header("claim-response", Some("ok"), "ClaimResponse/cr-1"),
        );
        bundle.push_resource(
            "ClaimResponse",
            "cr-1",
            json!({
                "resourceType": "ClaimResponse",
                "id": "cr-1",
                "status": "active",
                "outcome": "error",
                "disposition": "Authorization number missing",
            }),
        );

        match ResponseParser::claim(&bundle).unwrap() {
            Outcome::Rejected(rejection) => {
                assert_eq!(
                    rejection.display.as_deref(),
                    Some("Authorization number missing")
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn parses_polled_communications() {
        let mut bundle = Bundle::message("resp-8", fixed_ts());
        bundle.push_resource(
            "MessageHeader",
            "mh-resp-1",
            response_header("poll-response", Some("ok"), "Communication/comm-1"),
        );
        bundle.push_resource(
            "Communication",
            "comm-1",
            json!({
                "resourceType": "Communication",
                "id": "comm-1",
                "status": "in-progress",
                "about": [{"reference": "http://nphies.sa/Claim/ext-claim-9"}],
                "payload": [{"contentString": "Please supply the discharge summary"}],
                "sent": "2025-10-22T08:30:00Z",
            }),
        );

        let messages = ResponseParser::communications(&bundle)
            .unwrap()
            .success()
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, CommunicationStatus::Pending);
        assert_eq!(
            messages[0].payloads[0],
            "Please supply the discharge summary"
        );
    }

    #[test]
    fn non_message_bundle_is_a_protocol_error() {
        let mut bundle = Bundle::message("resp-9", fixed_ts());
        bundle.kind = BundleKind::Collection;
        assert!(matches!(
            ResponseParser::eligibility(&bundle),
            Err(ParseError::NotAMessage(_))
        ));
    }
}
