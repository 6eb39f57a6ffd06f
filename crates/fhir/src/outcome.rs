//! Domain-level results decoded from NPHIES responses.
//!
//! The central distinction of the response path lives here: a
//! clearinghouse-reported *business rejection* ("member not eligible",
//! "missing authorization") is an expected outcome the caller branches on,
//! so it is data ([`Outcome::Rejected`]) rather than an error. Structural
//! problems are errors ([`crate::ParseError`]) and never reach this module.

use chrono::{DateTime, NaiveDate, Utc};
use nphies_types::Money;
use serde::{Deserialize, Serialize};

/// Result of a domain operation: either the parsed result, or a structured
/// rejection reported by the clearinghouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome<T> {
    Success(T),
    Rejected(BusinessRejection),
}

impl<T> Outcome<T> {
    /// Returns the success value, if this outcome is one.
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// A structured negative outcome reported by NPHIES.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRejection {
    /// Primary rejection code (first error issue's code).
    pub code: String,
    /// Human-readable summary, when the response carried one.
    pub display: Option<String>,
    /// Every error/fatal issue from the accompanying OperationOutcome.
    pub issues: Vec<RejectionIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionIssue {
    pub severity: String,
    pub code: String,
    pub detail: Option<String>,
}

/// Benefit amounts extracted from an eligibility response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Benefits {
    pub copay: Option<Money>,
    pub deductible: Option<Money>,
    pub limit: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoveragePeriod {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Parsed eligibility check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub eligible: bool,
    pub coverage_status: String,
    pub benefits: Benefits,
    pub coverage_period: Option<CoveragePeriod>,
    pub disposition: Option<String>,
}

/// Adjudication verdict for a whole claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjudicationStatus {
    Approved,
    Denied,
    PartiallyApproved,
}

/// Per-line-item adjudication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAdjudication {
    pub sequence: u32,
    pub approved: bool,
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

/// Parsed claim / prior-authorization adjudication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationResult {
    /// The clearinghouse's ClaimResponse id.
    pub response_id: String,
    pub status: AdjudicationStatus,
    /// Authorization number, present on approved prior-auth responses.
    pub pre_auth_ref: Option<String>,
    pub items: Vec<ItemAdjudication>,
    /// Total approved (benefit) amount, when reported.
    pub total_approved: Option<Money>,
    pub disposition: Option<String>,
}

/// Processing state of a polled communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationStatus {
    Pending,
    Read,
    Processed,
}

/// One message retrieved by a communication poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationMessage {
    pub id: String,
    /// Claim / authorization references this message is about.
    pub about: Vec<String>,
    pub payloads: Vec<String>,
    pub status: CommunicationStatus,
    pub sent: Option<DateTime<Utc>>,
}
