//! Claim lifecycle state machine.
//!
//! States: `draft → submitted → {approved | denied | partially_approved}`,
//! with `denied → appealed →` back to an adjudicated state. Transitions are
//! driven only by [`crate::services::ClaimsService`] in response to parser
//! results; no other component mutates claim status. Operations on one
//! claim id are serialised: while a submission or appeal is in flight, any
//! further operation on that id is rejected rather than queued.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use fhir::AdjudicationStatus;

use crate::{NphiesError, NphiesResult};

/// Lifecycle state of a claim tracked by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Draft,
    Submitted,
    Approved,
    Denied,
    PartiallyApproved,
    Appealed,
}

impl ClaimState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::PartiallyApproved => "partially_approved",
            Self::Appealed => "appealed",
        }
    }

    /// Whether the payer has adjudicated this claim.
    pub fn is_adjudicated(&self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::PartiallyApproved)
    }
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
struct Tracked {
    state: ClaimState,
    in_flight: bool,
}

/// In-process registry of claim states, keyed by the provider-assigned
/// external claim id.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    claims: Mutex<HashMap<String, Tracked>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a claim as being submitted.
    ///
    /// An unknown claim id starts in `draft`. Fails with
    /// [`NphiesError::InvalidState`] if the claim is not in `draft` or
    /// another operation on the same id is in flight.
    pub fn begin_submission(&self, claim_id: &str) -> NphiesResult<()> {
        let mut claims = self.lock();
        let entry = claims.entry(claim_id.to_owned()).or_insert(Tracked {
            state: ClaimState::Draft,
            in_flight: false,
        });
        if entry.in_flight || entry.state != ClaimState::Draft {
            return Err(invalid(claim_id, entry.state, "submit"));
        }
        entry.state = ClaimState::Submitted;
        entry.in_flight = true;
        Ok(())
    }

    /// Marks a denied claim as being appealed.
    pub fn begin_appeal(&self, claim_id: &str) -> NphiesResult<()> {
        let mut claims = self.lock();
        let Some(entry) = claims.get_mut(claim_id) else {
            return Err(invalid(claim_id, ClaimState::Draft, "appeal"));
        };
        if entry.in_flight || entry.state != ClaimState::Denied {
            return Err(invalid(claim_id, entry.state, "appeal"));
        }
        entry.state = ClaimState::Appealed;
        entry.in_flight = true;
        Ok(())
    }

    /// Records the outcome of an in-flight operation.
    ///
    /// `None` means the exchange failed before adjudication: the claim
    /// reverts (`submitted → draft`, `appealed → denied`) so a later retry
    /// is legal.
    pub fn record_outcome(&self, claim_id: &str, outcome: Option<AdjudicationStatus>) {
        let mut claims = self.lock();
        let Some(entry) = claims.get_mut(claim_id) else {
            return;
        };
        entry.in_flight = false;
        entry.state = match outcome {
            Some(AdjudicationStatus::Approved) => ClaimState::Approved,
            Some(AdjudicationStatus::Denied) => ClaimState::Denied,
            Some(AdjudicationStatus::PartiallyApproved) => ClaimState::PartiallyApproved,
            None => match entry.state {
                ClaimState::Submitted => ClaimState::Draft,
                ClaimState::Appealed => ClaimState::Denied,
                other => other,
            },
        };
    }

    /// Current state of a claim.
    ///
    /// Fails with [`NphiesError::InvalidState`] for unknown claims and for
    /// claims still in `draft`, which have nothing queryable yet.
    pub fn status(&self, claim_id: &str) -> NphiesResult<ClaimState> {
        let claims = self.lock();
        match claims.get(claim_id) {
            Some(entry) if entry.state != ClaimState::Draft => Ok(entry.state),
            Some(entry) => Err(invalid(claim_id, entry.state, "query status of")),
            None => Err(invalid(claim_id, ClaimState::Draft, "query status of")),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Tracked>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn invalid(claim_id: &str, from: ClaimState, attempted: &str) -> NphiesError {
    NphiesError::InvalidState {
        claim_id: claim_id.to_owned(),
        from: from.to_string(),
        attempted: attempted.to_owned(),
    }
}
