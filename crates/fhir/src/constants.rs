//! Code systems and identifier systems used on the NPHIES wire.

/// Code system for message event codes (eligibility-request, claim-request, ...).
pub const MESSAGE_EVENT_SYSTEM: &str =
    "http://nphies.sa/terminology/CodeSystem/ksa-message-events";

/// Identifier system for provider licences.
pub const PROVIDER_LICENSE_SYSTEM: &str = "http://nphies.sa/license/provider-license";

/// Identifier system for payer licences.
pub const PAYER_LICENSE_SYSTEM: &str = "http://nphies.sa/license/payer-license";

/// Identifier system for member (beneficiary) identifiers.
pub const MEMBER_ID_SYSTEM: &str = "http://nphies.sa/identifier/memberid";

/// Diagnosis code system accepted on claims (ICD-10-AM).
pub const ICD10_SYSTEM: &str = "http://hl7.org/fhir/sid/icd-10-am";

/// Procedure / service code system for claim line items.
pub const PROCEDURE_SYSTEM: &str = "http://nphies.sa/terminology/CodeSystem/procedures";

/// Claim type codes (institutional, professional, ...).
pub const CLAIM_TYPE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/claim-type";

/// Adjudication category codes on ClaimResponse items.
pub const ADJUDICATION_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/adjudication";

/// Benefit type codes on eligibility responses.
pub const BENEFIT_TYPE_SYSTEM: &str = "http://nphies.sa/terminology/CodeSystem/benefit-type";

/// Task codes for communication polling.
pub const TASK_CODE_SYSTEM: &str = "http://nphies.sa/terminology/CodeSystem/task-code";

/// All monetary amounts on the wire are Saudi riyal.
pub const CURRENCY: &str = "SAR";

/// Endpoint prefix used for message source/destination endpoints.
pub const ENDPOINT_PREFIX: &str = "http://nphies.sa/endpoint";
