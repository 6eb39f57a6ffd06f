//! # NPHIES Core
//!
//! Protocol client for the NPHIES clearinghouse: configuration, the
//! authentication context, the retrying HTTP transport, pre-flight input
//! validation, the claim state machine, and the four domain services
//! (eligibility, claims, prior authorization, communication polling).
//!
//! **No batch concerns**: bulk input parsing, deduplication and the worker
//! pool live in `nphies-batch`; this crate exposes per-record operations
//! only.

pub mod auth;
pub mod claim_state;
pub mod client;
pub mod config;
pub mod error;
pub mod retry;
pub mod services;
pub mod validation;

pub use auth::AuthContext;
pub use claim_state::{ClaimRegistry, ClaimState};
pub use client::NphiesClient;
pub use config::{Environment, NphiesConfig};
pub use error::{NphiesError, NphiesResult};
pub use retry::RetryPolicy;
pub use services::{
    ClaimsService, CommunicationService, EligibilityService, PriorAuthorizationService,
};

/// Masks an identifier for audit logging, keeping only the last four
/// characters. Applied to every member identifier before it reaches a log
/// line.
pub fn mask_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{visible}", "*".repeat(chars.len() - 4))
}
