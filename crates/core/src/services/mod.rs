//! Domain services, one per NPHIES operation.
//!
//! Each service composes the same stages (validation, bundle building,
//! transport, response parsing) into a single domain-level call. Services
//! are stateless apart from the claim registry and the poll gate; they own
//! no persisted entities.

pub mod claims;
pub mod communication;
pub mod eligibility;
pub mod prior_auth;

pub use claims::ClaimsService;
pub use communication::CommunicationService;
pub use eligibility::EligibilityService;
pub use prior_auth::PriorAuthorizationService;
