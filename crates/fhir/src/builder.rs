//! Deterministic assembly of outbound request bundles.
//!
//! Entry order is fixed per operation: `[MessageHeader, primary resource,
//! Patient, Coverage, Organization(s)]`. All internal reference ids are
//! derived from the domain input (`patient-<memberId>`,
//! `coverage-<memberId>-<payerId>`, ...) so that two builds from identical
//! input produce structurally identical bundles, the property the batch
//! pipeline's idempotence tests rely on. The caller supplies the bundle
//! timestamp, keeping the builder free of clock access.

use chrono::{DateTime, NaiveDate, Utc};
use nphies_types::{DiagnosisCode, MemberId, Money, PayerId, ProcedureCode};
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::constants::{
    CLAIM_TYPE_SYSTEM, CURRENCY, ENDPOINT_PREFIX, ICD10_SYSTEM, MEMBER_ID_SYSTEM,
    MESSAGE_EVENT_SYSTEM, PAYER_LICENSE_SYSTEM, PROCEDURE_SYSTEM, PROVIDER_LICENSE_SYSTEM,
    TASK_CODE_SYSTEM,
};
use crate::resources::{
    Claim, ClaimDiagnosis, ClaimInsurance, ClaimItem, CodeableConcept, Coding, Coverage,
    CoverageEligibilityRequest, Identifier, InsuranceRef, MessageDestination, MessageHeader,
    MessageSource, MoneyValue, Organization, Patient, Reference, SimpleQuantity, Task,
};
use crate::{BuildError, BuildResult, OperationKind};

// ============================================================================
// Domain inputs
// ============================================================================

/// Why an eligibility check is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EligibilityPurpose {
    Benefits,
    Discovery,
    Validation,
}

impl EligibilityPurpose {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Benefits => "benefits",
            Self::Discovery => "discovery",
            Self::Validation => "validation",
        }
    }
}

/// Input for one eligibility check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityInput {
    pub member_id: MemberId,
    pub payer_id: PayerId,
    pub service_date: NaiveDate,
    pub purpose: Vec<EligibilityPurpose>,
}

impl EligibilityInput {
    /// A standard benefits check.
    pub fn benefits(member_id: MemberId, payer_id: PayerId, service_date: NaiveDate) -> Self {
        Self {
            member_id,
            payer_id,
            service_date,
            purpose: vec![EligibilityPurpose::Benefits],
        }
    }

    /// Natural key used for deduplication within a batch run.
    pub fn natural_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.member_id, self.payer_id, self.service_date
        )
    }
}

/// FHIR claim type of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Institutional,
    Professional,
    Oral,
    Pharmacy,
    Vision,
}

impl ClaimType {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Institutional => "institutional",
            Self::Professional => "professional",
            Self::Oral => "oral",
            Self::Pharmacy => "pharmacy",
            Self::Vision => "vision",
        }
    }
}

/// One claim line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimItemInput {
    pub code: ProcedureCode,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Input for one claim submission or prior-authorization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimInput {
    /// Provider-assigned claim identifier, unique per claim.
    pub external_id: String,
    pub claim_type: ClaimType,
    pub member_id: MemberId,
    pub payer_id: PayerId,
    pub service_date: NaiveDate,
    pub diagnoses: Vec<DiagnosisCode>,
    pub items: Vec<ClaimItemInput>,
    /// Caller-supplied total; must match the computed item total when given.
    pub total: Option<Money>,
}

impl ClaimInput {
    /// Sum of `quantity * unit_price` over all line items.
    pub fn computed_total(&self) -> Money {
        self.items
            .iter()
            .fold(Money::ZERO, |acc, item| {
                acc.plus(item.unit_price.times(item.quantity))
            })
    }

    /// Natural key used for deduplication within a batch run.
    pub fn natural_key(&self) -> String {
        self.external_id.clone()
    }
}

/// The submitting provider's identity, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInfo {
    pub organization_id: String,
    pub provider_id: String,
    pub name: Option<String>,
}

// ============================================================================
// Builder
// ============================================================================

/// Builds outbound message bundles from domain inputs.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    provider: ProviderInfo,
}

impl BundleBuilder {
    pub fn new(provider: ProviderInfo) -> Self {
        Self { provider }
    }

    /// Builds an eligibility-check request bundle.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoPurpose`] when the input states no purpose.
    pub fn eligibility(
        &self,
        input: &EligibilityInput,
        timestamp: DateTime<Utc>,
    ) -> BuildResult<Bundle> {
        if input.purpose.is_empty() {
            return Err(BuildError::NoPurpose);
        }

        let key = format!(
            "{}-{}-{}",
            input.member_id, input.payer_id, input.service_date
        );
        let request_id = format!("elig-{key}");
        let patient_id = patient_id(&input.member_id);
        let coverage_id = coverage_id(&input.member_id, &input.payer_id);
        let payer_org_id = org_id(input.payer_id.as_str());

        let request = CoverageEligibilityRequest {
            resource_type: "CoverageEligibilityRequest".to_owned(),
            id: request_id.clone(),
            status: "active".to_owned(),
            purpose: input
                .purpose
                .iter()
                .map(|p| p.as_code().to_owned())
                .collect(),
            patient: Reference::local("Patient", &patient_id),
            serviced_date: Some(input.service_date),
            created: timestamp,
            insurer: Reference::local("Organization", &payer_org_id),
            provider: Reference::local("Organization", &self.provider_org_id()),
            insurance: vec![InsuranceRef {
                coverage: Reference::local("Coverage", &coverage_id),
            }],
        };

        let mut bundle = Bundle::message(format!("eligibility-{key}"), timestamp);
        self.push_header(
            &mut bundle,
            OperationKind::EligibilityCheck,
            &key,
            Some(&input.payer_id),
            Reference::local("CoverageEligibilityRequest", &request_id),
        )?;
        push(&mut bundle, "CoverageEligibilityRequest", &request_id, &request)?;
        self.push_admin_entries(&mut bundle, &input.member_id, &input.payer_id)?;

        Ok(bundle)
    }

    /// Builds a claim-submission request bundle.
    pub fn claim(&self, input: &ClaimInput, timestamp: DateTime<Utc>) -> BuildResult<Bundle> {
        self.claim_like(input, timestamp, OperationKind::ClaimSubmission)
    }

    /// Builds a prior-authorization request bundle.
    ///
    /// Same resource graph as a claim, with `Claim.use` set to
    /// `preauthorization` and the prior-auth message event.
    pub fn prior_auth(&self, input: &ClaimInput, timestamp: DateTime<Utc>) -> BuildResult<Bundle> {
        self.claim_like(input, timestamp, OperationKind::PriorAuthorization)
    }

    /// Builds a communication-poll request bundle.
    pub fn poll(&self, timestamp: DateTime<Utc>) -> BuildResult<Bundle> {
        let key = self.provider.organization_id.clone();
        let task_id = format!("task-poll-{key}");

        let task = Task {
            resource_type: "Task".to_owned(),
            id: task_id.clone(),
            status: "requested".to_owned(),
            intent: "order".to_owned(),
            code: CodeableConcept::coded(TASK_CODE_SYSTEM, "poll"),
            requester: Some(Reference::local("Organization", &self.provider_org_id())),
        };

        let mut bundle = Bundle::message(format!("poll-{key}"), timestamp);
        self.push_header(
            &mut bundle,
            OperationKind::CommunicationPoll,
            &key,
            None,
            Reference::local("Task", &task_id),
        )?;
        push(&mut bundle, "Task", &task_id, &task)?;
        push(
            &mut bundle,
            "Organization",
            &self.provider_org_id(),
            &self.provider_org(),
        )?;

        Ok(bundle)
    }

    fn claim_like(
        &self,
        input: &ClaimInput,
        timestamp: DateTime<Utc>,
        kind: OperationKind,
    ) -> BuildResult<Bundle> {
        validate_claim_input(input)?;

        let key = input.external_id.trim();
        if key.is_empty() {
            return Err(BuildError::MissingField("external_id"));
        }

        let claim_id = format!("{kind}-{key}");
        let patient_id = patient_id(&input.member_id);
        let coverage_id = coverage_id(&input.member_id, &input.payer_id);
        let payer_org_id = org_id(input.payer_id.as_str());
        let total = input.computed_total();

        let claim = Claim {
            resource_type: "Claim".to_owned(),
            id: claim_id.clone(),
            status: "active".to_owned(),
            kind: CodeableConcept::coded(CLAIM_TYPE_SYSTEM, input.claim_type.as_code()),
            use_: match kind {
                OperationKind::PriorAuthorization => "preauthorization".to_owned(),
                _ => "claim".to_owned(),
            },
            patient: Reference::local("Patient", &patient_id),
            created: timestamp,
            insurer: Reference::local("Organization", &payer_org_id),
            provider: Reference::local("Organization", &self.provider_org_id()),
            diagnosis: input
                .diagnoses
                .iter()
                .enumerate()
                .map(|(i, code)| ClaimDiagnosis {
                    sequence: i as u32 + 1,
                    diagnosis_codeable_concept: CodeableConcept::coded(
                        ICD10_SYSTEM,
                        code.as_str(),
                    ),
                })
                .collect(),
            insurance: vec![ClaimInsurance {
                sequence: 1,
                focal: true,
                coverage: Reference::local("Coverage", &coverage_id),
            }],
            item: input
                .items
                .iter()
                .enumerate()
                .map(|(i, item)| ClaimItem {
                    sequence: i as u32 + 1,
                    product_or_service: CodeableConcept::coded(
                        PROCEDURE_SYSTEM,
                        item.code.as_str(),
                    ),
                    serviced_date: Some(input.service_date),
                    quantity: Some(SimpleQuantity {
                        value: f64::from(item.quantity),
                    }),
                    unit_price: Some(money(item.unit_price)),
                    net: Some(money(item.unit_price.times(item.quantity))),
                })
                .collect(),
            total: Some(money(total)),
        };

        let mut bundle = Bundle::message(format!("{kind}-{key}"), timestamp);
        self.push_header(
            &mut bundle,
            kind,
            key,
            Some(&input.payer_id),
            Reference::local("Claim", &claim_id),
        )?;
        push(&mut bundle, "Claim", &claim_id, &claim)?;
        self.push_admin_entries(&mut bundle, &input.member_id, &input.payer_id)?;

        Ok(bundle)
    }

    fn push_header(
        &self,
        bundle: &mut Bundle,
        kind: OperationKind,
        key: &str,
        payer: Option<&PayerId>,
        focus: Reference,
    ) -> BuildResult<()> {
        let id = format!("mh-{kind}-{key}");
        let destination = match payer {
            Some(payer_id) => MessageDestination {
                endpoint: format!("{ENDPOINT_PREFIX}/payer/{payer_id}"),
                receiver: Some(Reference::local("Organization", &org_id(payer_id.as_str()))),
            },
            None => MessageDestination {
                endpoint: format!("{ENDPOINT_PREFIX}/nphies"),
                receiver: None,
            },
        };

        let header = MessageHeader {
            resource_type: "MessageHeader".to_owned(),
            id: id.clone(),
            event_coding: Coding::new(MESSAGE_EVENT_SYSTEM, kind.request_event()),
            destination: vec![destination],
            sender: Some(Reference::local("Organization", &self.provider_org_id())),
            source: MessageSource {
                endpoint: format!(
                    "{ENDPOINT_PREFIX}/provider/{}",
                    self.provider.organization_id
                ),
            },
            focus: vec![focus],
            response: None,
        };
        push(bundle, "MessageHeader", &id, &header)
    }

    /// Patient, Coverage, provider and payer Organization entries shared by
    /// eligibility and claim bundles.
    fn push_admin_entries(
        &self,
        bundle: &mut Bundle,
        member_id: &MemberId,
        payer_id: &PayerId,
    ) -> BuildResult<()> {
        let patient_id = patient_id(member_id);
        let coverage_id = coverage_id(member_id, payer_id);
        let payer_org_id = org_id(payer_id.as_str());

        let patient = Patient {
            resource_type: "Patient".to_owned(),
            id: patient_id.clone(),
            identifier: vec![Identifier {
                system: Some(MEMBER_ID_SYSTEM.to_owned()),
                value: member_id.to_string(),
            }],
        };
        let coverage = Coverage {
            resource_type: "Coverage".to_owned(),
            id: coverage_id.clone(),
            status: "active".to_owned(),
            subscriber_id: Some(member_id.to_string()),
            beneficiary: Reference::local("Patient", &patient_id),
            payor: vec![Reference::local("Organization", &payer_org_id)],
            period: None,
        };
        let payer_org = Organization {
            resource_type: "Organization".to_owned(),
            id: payer_org_id.clone(),
            identifier: vec![Identifier {
                system: Some(PAYER_LICENSE_SYSTEM.to_owned()),
                value: payer_id.to_string(),
            }],
            name: None,
        };

        push(bundle, "Patient", &patient_id, &patient)?;
        push(bundle, "Coverage", &coverage_id, &coverage)?;
        push(
            bundle,
            "Organization",
            &self.provider_org_id(),
            &self.provider_org(),
        )?;
        push(bundle, "Organization", &payer_org_id, &payer_org)?;
        Ok(())
    }

    fn provider_org_id(&self) -> String {
        org_id(&self.provider.organization_id)
    }

    fn provider_org(&self) -> Organization {
        Organization {
            resource_type: "Organization".to_owned(),
            id: self.provider_org_id(),
            identifier: vec![Identifier {
                system: Some(PROVIDER_LICENSE_SYSTEM.to_owned()),
                value: self.provider.provider_id.clone(),
            }],
            name: self.provider.name.clone(),
        }
    }
}

fn validate_claim_input(input: &ClaimInput) -> BuildResult<()> {
    if input.items.is_empty() {
        return Err(BuildError::NoItems);
    }
    if input.diagnoses.is_empty() {
        return Err(BuildError::NoDiagnoses);
    }
    for (index, item) in input.items.iter().enumerate() {
        if item.quantity == 0 {
            return Err(BuildError::ZeroQuantity { index });
        }
    }
    if let Some(supplied) = input.total {
        let computed = input.computed_total();
        if supplied != computed {
            return Err(BuildError::TotalMismatch {
                supplied: supplied.to_string(),
                computed: computed.to_string(),
            });
        }
    }
    Ok(())
}

fn patient_id(member_id: &MemberId) -> String {
    format!("patient-{member_id}")
}

fn coverage_id(member_id: &MemberId, payer_id: &PayerId) -> String {
    format!("coverage-{member_id}-{payer_id}")
}

fn org_id(id: &str) -> String {
    format!("org-{id}")
}

fn money(amount: Money) -> MoneyValue {
    MoneyValue {
        value: amount.value(),
        currency: Some(CURRENCY.to_owned()),
    }
}

fn push<T: Serialize>(
    bundle: &mut Bundle,
    resource_type: &str,
    id: &str,
    resource: &T,
) -> BuildResult<()> {
    bundle.push_resource(resource_type, id, serde_json::to_value(resource)?);
    Ok(())
}
