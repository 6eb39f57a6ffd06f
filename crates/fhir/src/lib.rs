//! FHIR wire/boundary support for the NPHIES clearinghouse.
//!
//! NPHIES speaks FHIR R4 message Bundles over HTTPS. This crate provides:
//! - wire models for the Bundle envelope and the resources we exchange
//! - a deterministic [`BundleBuilder`] that turns domain inputs into
//!   NPHIES-conformant request bundles
//! - a [`ResponseParser`] that decodes adjudication/eligibility responses
//!   into domain results, keeping clearinghouse business rejections
//!   (expected data) distinct from protocol failures (errors)
//! - reference-integrity checking, applied before send and after receive
//!
//! The crate is pure: no I/O, no clocks (timestamps are passed in), so the
//! builder and parser are trivially thread-safe and the build operation is
//! repeatable for idempotence testing.

pub mod builder;
pub mod bundle;
pub mod constants;
pub mod outcome;
pub mod parser;
pub mod resources;

// Re-export facades
pub use builder::{BundleBuilder, ProviderInfo};
pub use parser::ResponseParser;

// Re-export public domain-level types
pub use builder::{ClaimInput, ClaimItemInput, ClaimType, EligibilityInput, EligibilityPurpose};
pub use bundle::{Bundle, BundleEntry, BundleKind};
pub use outcome::{
    AdjudicationResult, AdjudicationStatus, Benefits, BusinessRejection, CommunicationMessage,
    CommunicationStatus, CoveragePeriod, EligibilityResult, ItemAdjudication, Outcome,
    RejectionIssue,
};

/// The NPHIES message operations this crate can build and parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    EligibilityCheck,
    ClaimSubmission,
    PriorAuthorization,
    CommunicationPoll,
}

impl OperationKind {
    /// Message event code carried in the request MessageHeader.
    pub fn request_event(&self) -> &'static str {
        match self {
            Self::EligibilityCheck => "eligibility-request",
            Self::ClaimSubmission => "claim-request",
            Self::PriorAuthorization => "priorauth-request",
            Self::CommunicationPoll => "poll-request",
        }
    }

    /// Message event code expected in the response MessageHeader.
    pub fn response_event(&self) -> &'static str {
        match self {
            Self::EligibilityCheck => "eligibility-response",
            Self::ClaimSubmission => "claim-response",
            Self::PriorAuthorization => "priorauth-response",
            Self::CommunicationPoll => "poll-response",
        }
    }

    /// Resource type of the primary request resource.
    pub fn primary_resource(&self) -> &'static str {
        match self {
            Self::EligibilityCheck => "CoverageEligibilityRequest",
            Self::ClaimSubmission | Self::PriorAuthorization => "Claim",
            Self::CommunicationPoll => "Task",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::EligibilityCheck => "eligibility",
            Self::ClaimSubmission => "claim",
            Self::PriorAuthorization => "priorauth",
            Self::CommunicationPoll => "poll",
        };
        write!(f, "{name}")
    }
}

/// Errors raised while assembling a request bundle.
///
/// These are validation failures: the domain input cannot produce a
/// conformant bundle, and no bundle is emitted.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("claim must contain at least one line item")]
    NoItems,
    #[error("claim must carry at least one diagnosis")]
    NoDiagnoses,
    #[error("line item {index} has zero quantity")]
    ZeroQuantity { index: usize },
    #[error("supplied total {supplied} does not match computed total {computed}")]
    TotalMismatch { supplied: String, computed: String },
    #[error("eligibility request must state at least one purpose")]
    NoPurpose,
    #[error("failed to serialise resource: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while decoding a response bundle.
///
/// These indicate the response did not conform to the expected structure.
/// Never retried automatically, since a malformed response may signal a
/// clearinghouse contract change. Business rejections are *not* parse
/// errors; they surface as [`outcome::Outcome::Rejected`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("response body is not a FHIR bundle: {0}")]
    Body(String),
    #[error("response is not a message bundle (type {0})")]
    NotAMessage(String),
    #[error("response bundle has no entries")]
    EmptyBundle,
    #[error("first bundle entry is not a MessageHeader")]
    MissingMessageHeader,
    #[error("unexpected message event: expected {expected}, got {found}")]
    UnexpectedEvent { expected: String, found: String },
    #[error("reference {reference} does not resolve within the bundle")]
    UnresolvedReference { reference: String },
    #[error("expected a {0} entry in the response")]
    MissingResource(&'static str),
    #[error("failed to decode {resource_type} at {path}: {detail}")]
    Decode {
        resource_type: &'static str,
        path: String,
        detail: String,
    },
    #[error("{resource_type}.{field} is missing or invalid")]
    BadField {
        resource_type: &'static str,
        field: &'static str,
    },
}

/// Type alias for results that can fail with a [`BuildError`].
pub type BuildResult<T> = Result<T, BuildError>;

/// Type alias for results that can fail with a [`ParseError`].
pub type ParseResult<T> = Result<T, ParseError>;
