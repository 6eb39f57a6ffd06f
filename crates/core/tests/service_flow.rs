//! End-to-end service tests against a canned-response HTTP endpoint.
//!
//! Each test stands up a minimal TCP server that answers every request with
//! one fixed FHIR response bundle, then drives a domain service through the
//! full validate → build → send → parse path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use nphies_core::{
    AuthContext, ClaimState, ClaimsService, CommunicationService, EligibilityService, Environment,
    NphiesClient, NphiesConfig, NphiesError,
};
use fhir::{
    BundleBuilder, ClaimInput, ClaimItemInput, ClaimType, CommunicationStatus, EligibilityInput,
    Outcome, ProviderInfo,
};
use nphies_types::{DiagnosisCode, MemberId, Money, PayerId, ProcedureCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const ELIGIBILITY_RESPONSE: &str = r#"{
  "resourceType": "Bundle",
  "id": "resp-elig",
  "type": "message",
  "timestamp": "2025-10-22T09:00:00Z",
  "entry": [
    {"fullUrl": "MessageHeader/mh-1", "resource": {
      "resourceType": "MessageHeader",
      "id": "mh-1",
      "eventCoding": {"system": "http://nphies.sa/terminology/CodeSystem/ksa-message-events", "code": "eligibility-response"},
      "source": {"endpoint": "http://nphies.sa/endpoint/nphies"},
      "focus": [{"reference": "CoverageEligibilityResponse/er-1"}],
      "response": {"identifier": "req-1", "code": "ok"}
    }},
    {"fullUrl": "CoverageEligibilityResponse/er-1", "resource": {
      "resourceType": "CoverageEligibilityResponse",
      "id": "er-1",
      "status": "active",
      "purpose": ["benefits"],
      "patient": {"reference": "Patient/p-1"},
      "outcome": "complete",
      "insurance": [{
        "coverage": {"reference": "Coverage/c-1"},
        "inforce": true,
        "item": [{"benefit": [
          {"type": {"coding": [{"code": "copay"}]}, "allowedMoney": {"value": 50.0, "currency": "SAR"}}
        ]}]
      }]
    }},
    {"fullUrl": "Patient/p-1", "resource": {"resourceType": "Patient", "id": "p-1"}},
    {"fullUrl": "Coverage/c-1", "resource": {
      "resourceType": "Coverage", "id": "c-1", "status": "active",
      "beneficiary": {"reference": "Patient/p-1"}
    }}
  ]
}"#;

const CLAIM_RESPONSE: &str = r#"{
  "resourceType": "Bundle",
  "id": "resp-claim",
  "type": "message",
  "timestamp": "2025-10-22T09:00:00Z",
  "entry": [
    {"fullUrl": "MessageHeader/mh-1", "resource": {
      "resourceType": "MessageHeader",
      "id": "mh-1",
      "eventCoding": {"system": "http://nphies.sa/terminology/CodeSystem/ksa-message-events", "code": "claim-response"},
      "source": {"endpoint": "http://nphies.sa/endpoint/nphies"},
      "focus": [{"reference": "ClaimResponse/cr-1"}],
      "response": {"identifier": "req-1", "code": "ok"}
    }},
    {"fullUrl": "ClaimResponse/cr-1", "resource": {
      "resourceType": "ClaimResponse",
      "id": "cr-1",
      "status": "active",
      "outcome": "complete",
      "item": [{"itemSequence": 1, "adjudication": [
        {"category": {"coding": [{"code": "benefit"}]}, "amount": {"value": 150.0, "currency": "SAR"}}
      ]}],
      "total": [{"category": {"coding": [{"code": "benefit"}]}, "amount": {"value": 150.0, "currency": "SAR"}}]
    }}
  ]
}"#;

const POLL_RESPONSE: &str = r#"{
  "resourceType": "Bundle",
  "id": "resp-poll",
  "type": "message",
  "timestamp": "2025-10-22T09:00:00Z",
  "entry": [
    {"fullUrl": "MessageHeader/mh-1", "resource": {
      "resourceType": "MessageHeader",
      "id": "mh-1",
      "eventCoding": {"system": "http://nphies.sa/terminology/CodeSystem/ksa-message-events", "code": "poll-response"},
      "source": {"endpoint": "http://nphies.sa/endpoint/nphies"},
      "focus": [{"reference": "Communication/comm-1"}],
      "response": {"identifier": "req-1", "code": "ok"}
    }},
    {"fullUrl": "Communication/comm-1", "resource": {
      "resourceType": "Communication",
      "id": "comm-1",
      "status": "in-progress",
      "payload": [{"contentString": "Please supply the discharge summary"}]
    }}
  ]
}"#;

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buf.len() >= pos + 4 + content_length {
                return Ok(());
            }
        }
    }
}

async fn spawn_server(body: &'static str, delay: Duration) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = read_request(&mut socket).await;
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/fhir+json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len(),
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), hits)
}

fn wiring(base_url: &str) -> (Arc<NphiesClient>, BundleBuilder) {
    let config = NphiesConfig::new(
        Environment::Sandbox,
        base_url,
        "LIC-100",
        "10000500",
        "PR-10012",
        None,
    )
    .unwrap()
    .with_max_retries(0)
    .with_request_timeout(Duration::from_secs(5));
    let auth = AuthContext::from_config(&config).unwrap();
    let client = Arc::new(NphiesClient::new(&config, auth).unwrap());
    let builder = BundleBuilder::new(ProviderInfo {
        organization_id: "10000500".to_owned(),
        provider_id: "PR-10012".to_owned(),
        name: Some("Demo Polyclinic".to_owned()),
    });
    (client, builder)
}

fn eligibility_input() -> EligibilityInput {
    EligibilityInput::benefits(
        MemberId::new("1234567890").unwrap(),
        PayerId::new("7000911508").unwrap(),
        NaiveDate::from_ymd_opt(2025, 10, 22).unwrap(),
    )
}

fn claim_input() -> ClaimInput {
    ClaimInput {
        external_id: "CLM-0001".to_owned(),
        claim_type: ClaimType::Professional,
        member_id: MemberId::new("1234567890").unwrap(),
        payer_id: PayerId::new("7000911508").unwrap(),
        service_date: NaiveDate::from_ymd_opt(2025, 10, 22).unwrap(),
        diagnoses: vec![DiagnosisCode::new("J45").unwrap()],
        items: vec![ClaimItemInput {
            code: ProcedureCode::new("99213").unwrap(),
            quantity: 1,
            unit_price: Money::new(150.0).unwrap(),
        }],
        total: None,
    }
}

#[tokio::test]
async fn eligibility_check_end_to_end() {
    let (base_url, hits) = spawn_server(ELIGIBILITY_RESPONSE, Duration::ZERO).await;
    let (client, builder) = wiring(&base_url);
    let service = EligibilityService::new(client, builder);

    let result = service
        .check(&eligibility_input())
        .await
        .unwrap()
        .success()
        .unwrap();

    assert!(result.eligible);
    assert_eq!(result.benefits.copay, Some(Money::new(50.0).unwrap()));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn claim_submission_adjudicates_and_blocks_resubmission() {
    let (base_url, _hits) = spawn_server(CLAIM_RESPONSE, Duration::ZERO).await;
    let (client, builder) = wiring(&base_url);
    let service = ClaimsService::new(client, builder);

    let input = claim_input();
    let adjudication = service.submit(&input).await.unwrap().success().unwrap();
    assert_eq!(adjudication.total_approved, Some(Money::new(150.0).unwrap()));
    assert_eq!(service.status("CLM-0001").unwrap(), ClaimState::Approved);

    // The claim is immutable once adjudicated.
    match service.submit(&input).await {
        Err(NphiesError::InvalidState { from, .. }) => assert_eq!(from, "approved"),
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[tokio::test]
async fn communication_poll_is_single_flight() {
    let (base_url, hits) = spawn_server(POLL_RESPONSE, Duration::from_millis(300)).await;
    let (client, builder) = wiring(&base_url);
    let service = CommunicationService::new(client, builder);

    let (first, second) = tokio::join!(service.poll(), service.poll());
    let first = first.unwrap();
    let second = second.unwrap();

    // Exactly one of the two overlapping polls reached the endpoint.
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let (messages, skipped) = if first.is_empty() {
        (second, first)
    } else {
        (first, second)
    };
    assert!(skipped.is_empty());
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, CommunicationStatus::Read);
}

#[tokio::test]
async fn validation_failure_consumes_no_network_call() {
    let (base_url, hits) = spawn_server(ELIGIBILITY_RESPONSE, Duration::ZERO).await;
    let (client, builder) = wiring(&base_url);
    let service = EligibilityService::new(client, builder);

    let mut input = eligibility_input();
    input.purpose.clear();

    assert!(matches!(
        service.check(&input).await,
        Err(NphiesError::Validation(_))
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_claim_becomes_denied_and_appealable() {
    const REJECTED_CLAIM: &str = r#"{
      "resourceType": "Bundle",
      "id": "resp-claim-rej",
      "type": "message",
      "timestamp": "2025-10-22T09:00:00Z",
      "entry": [
        {"fullUrl": "MessageHeader/mh-1", "resource": {
          "resourceType": "MessageHeader",
          "id": "mh-1",
          "eventCoding": {"system": "http://nphies.sa/terminology/CodeSystem/ksa-message-events", "code": "claim-response"},
          "source": {"endpoint": "http://nphies.sa/endpoint/nphies"},
          "focus": [{"reference": "ClaimResponse/cr-1"}],
          "response": {"identifier": "req-1", "code": "ok"}
        }},
        {"fullUrl": "ClaimResponse/cr-1", "resource": {
          "resourceType": "ClaimResponse",
          "id": "cr-1",
          "status": "active",
          "outcome": "error",
          "disposition": "Missing prior authorization"
        }}
      ]
    }"#;

    let (base_url, _hits) = spawn_server(REJECTED_CLAIM, Duration::ZERO).await;
    let (client, builder) = wiring(&base_url);
    let service = ClaimsService::new(client, builder);

    let input = claim_input();
    match service.submit(&input).await.unwrap() {
        Outcome::Rejected(rejection) => {
            assert_eq!(
                rejection.display.as_deref(),
                Some("Missing prior authorization")
            );
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(service.status("CLM-0001").unwrap(), ClaimState::Denied);

    // Denied claims may be appealed.
    let appealed = service.appeal(&input).await.unwrap();
    assert!(appealed.is_rejected());
}
