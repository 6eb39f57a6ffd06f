//! Typed wire structs for the FHIR resources exchanged with NPHIES.
//!
//! These are deliberately minimal: only the fields this integration reads or
//! writes. Unknown fields in responses are tolerated (no
//! `deny_unknown_fields`) because the clearinghouse owns the response format
//! and extends it over time; what we *do* read is decoded strictly, with
//! `serde_path_to_error` pointing at the failing field (see
//! [`crate::parser`]).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Common data types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: &str, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.to_owned()),
            code: code.into(),
            display: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default)]
    pub coding: Vec<Coding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn coded(system: &str, code: impl Into<String>) -> Self {
        Self {
            coding: vec![Coding::new(system, code)],
            text: None,
        }
    }

    /// First coding's code, if any.
    pub fn first_code(&self) -> Option<&str> {
        self.coding.first().map(|c| c.code.as_str())
    }

    /// First code from a coding in the given system.
    ///
    /// Codings that omit their system are accepted too; payer responses are
    /// inconsistent about carrying it.
    pub fn code_in(&self, system: &str) -> Option<&str> {
        self.coding
            .iter()
            .find(|c| c.system.as_deref().map_or(true, |s| s == system))
            .map(|c| c.code.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub reference: String,
}

impl Reference {
    pub fn local(resource_type: &str, id: &str) -> Self {
        Self {
            reference: format!("{resource_type}/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub value: String,
}

/// Wire money: decimal value plus ISO currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyValue {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleQuantity {
    pub value: f64,
}

// ============================================================================
// MessageHeader
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub resource_type: String,
    pub id: String,
    pub event_coding: Coding,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination: Vec<MessageDestination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Reference>,
    pub source: MessageSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub focus: Vec<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<MessageResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDestination {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSource {
    pub endpoint: String,
}

/// `MessageHeader.response` on inbound messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub identifier: String,
    pub code: ResponseCode,
}

/// Processing outcome reported by the clearinghouse message layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseCode {
    Ok,
    TransientError,
    FatalError,
}

// ============================================================================
// Administrative resources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub resource_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub resource_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    pub resource_type: String,
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<String>,
    pub beneficiary: Reference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payor: Vec<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
}

// ============================================================================
// Eligibility
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageEligibilityRequest {
    pub resource_type: String,
    pub id: String,
    pub status: String,
    pub purpose: Vec<String>,
    pub patient: Reference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serviced_date: Option<NaiveDate>,
    pub created: DateTime<Utc>,
    pub insurer: Reference,
    pub provider: Reference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insurance: Vec<InsuranceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceRef {
    pub coverage: Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageEligibilityResponse {
    pub resource_type: String,
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub purpose: Vec<String>,
    pub patient: Reference,
    /// `complete` when adjudicated, `error` on a business rejection.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
    #[serde(default)]
    pub insurance: Vec<ResponseInsurance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInsurance {
    pub coverage: Reference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inforce: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benefit_period: Option<Period>,
    #[serde(default)]
    pub item: Vec<BenefitItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenefitItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded: Option<bool>,
    #[serde(default)]
    pub benefit: Vec<Benefit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benefit {
    #[serde(rename = "type")]
    pub kind: CodeableConcept,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_money: Option<MoneyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_money: Option<MoneyValue>,
}

// ============================================================================
// Claims
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub resource_type: String,
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: CodeableConcept,
    #[serde(rename = "use")]
    pub use_: String,
    pub patient: Reference,
    pub created: DateTime<Utc>,
    pub insurer: Reference,
    pub provider: Reference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnosis: Vec<ClaimDiagnosis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insurance: Vec<ClaimInsurance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<ClaimItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<MoneyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDiagnosis {
    pub sequence: u32,
    pub diagnosis_codeable_concept: CodeableConcept,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimInsurance {
    pub sequence: u32,
    pub focal: bool,
    pub coverage: Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimItem {
    pub sequence: u32,
    pub product_or_service: CodeableConcept,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serviced_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<SimpleQuantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<MoneyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<MoneyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub resource_type: String,
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Reference>,
    /// `complete` when adjudicated, `error` on a business rejection.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_auth_ref: Option<String>,
    #[serde(default)]
    pub item: Vec<ClaimResponseItem>,
    #[serde(default)]
    pub total: Vec<ClaimResponseTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponseItem {
    pub item_sequence: u32,
    #[serde(default)]
    pub adjudication: Vec<Adjudication>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjudication {
    pub category: CodeableConcept,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<MoneyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CodeableConcept>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResponseTotal {
    pub category: CodeableConcept,
    pub amount: MoneyValue,
}

// ============================================================================
// Communication & polling
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    pub resource_type: String,
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub about: Vec<Reference>,
    #[serde(default)]
    pub payload: Vec<CommunicationPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_string: Option<String>,
}

/// Poll request resource: asks the clearinghouse for queued messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub resource_type: String,
    pub id: String,
    pub status: String,
    pub intent: String,
    pub code: CodeableConcept,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<Reference>,
}

// ============================================================================
// OperationOutcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub issue: Vec<OutcomeIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeIssue {
    pub severity: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}
