//! Error taxonomy for the NPHIES integration core.
//!
//! The variants mirror how failures are handled downstream:
//! - `Configuration` / `Certificate` are fatal at startup
//! - `Validation` marks a single record invalid; the batch continues
//! - `Transport` is the only retryable class
//! - `Http` and `Protocol` are deterministic failures flagged for review
//! - `InvalidState` is always a caller bug and fails fast
//!
//! Clearinghouse business rejections are deliberately *absent* here: they
//! are expected outcomes, carried as data in [`fhir::Outcome::Rejected`].

use nphies_certificates::CertificateError;

#[derive(Debug, thiserror::Error)]
pub enum NphiesError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("transport failure after {attempts} attempt(s): {detail}")]
    Transport { attempts: u32, detail: String },
    #[error("clearinghouse returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("protocol error: {0}")]
    Protocol(#[from] fhir::ParseError),
    #[error("claim {claim_id}: cannot {attempted} from state {from}")]
    InvalidState {
        claim_id: String,
        from: String,
        attempted: String,
    },
}

impl NphiesError {
    /// Whether a record failing with this error may be re-dispatched.
    ///
    /// Only transport failures are transient. HTTP 4xx and protocol errors
    /// are deterministic; re-sending the same payload cannot change them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<fhir::BuildError> for NphiesError {
    fn from(err: fhir::BuildError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<nphies_types::ScalarError> for NphiesError {
    fn from(err: nphies_types::ScalarError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type NphiesResult<T> = std::result::Result<T, NphiesError>;
