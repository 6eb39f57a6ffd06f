//! Bulk input extraction.
//!
//! Two formats are accepted and normalised to the same domain inputs before
//! validation: CSV (one row per record) and JSON (an array of objects, with
//! nested `services` line items for claims). A malformed *row* becomes a
//! per-record failure carried in [`ParsedRecord`]; only an unreadable file
//! or a missing column fails the whole extraction.
//!
//! Eligibility CSV columns: `member_id, payer_id, service_date[, purpose]`.
//! Claims CSV columns (single-item claims): `claim_id, claim_type,
//! member_id, payer_id, service_date, diagnosis, procedure_code, quantity,
//! unit_price[, total]`; `diagnosis` may hold several codes separated by
//! `|`.

use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use fhir::{ClaimInput, ClaimItemInput, ClaimType, EligibilityInput, EligibilityPurpose};
use nphies_types::{DiagnosisCode, MemberId, Money, PayerId, ProcedureCode};
use serde::Deserialize;

use crate::{BatchError, BatchResult};

/// One input row: its position in the source file and either the normalised
/// domain input or the extraction error for that row.
#[derive(Debug, Clone)]
pub struct ParsedRecord<I> {
    pub line: usize,
    pub input: Result<I, String>,
}

/// Reads eligibility-check records from a CSV or JSON file.
pub fn read_eligibility(path: &Path) -> BatchResult<Vec<ParsedRecord<EligibilityInput>>> {
    match extension(path)? {
        Format::Csv => eligibility_csv(path),
        Format::Json => eligibility_json(path),
    }
}

/// Reads claim records from a CSV or JSON file.
pub fn read_claims(path: &Path) -> BatchResult<Vec<ParsedRecord<ClaimInput>>> {
    match extension(path)? {
        Format::Csv => claims_csv(path),
        Format::Json => claims_json(path),
    }
}

enum Format {
    Csv,
    Json,
}

fn extension(path: &Path) -> BatchResult<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(Format::Csv),
        Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Format::Json),
        _ => Err(BatchError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

// ============================================================================
// CSV
// ============================================================================

fn reader(path: &Path) -> BatchResult<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?)
}

fn header_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
}

fn required_column(path: &Path, headers: &StringRecord, name: &str) -> BatchResult<usize> {
    header_index(headers, name).ok_or_else(|| BatchError::MissingColumn {
        path: path.to_path_buf(),
        column: name.to_owned(),
    })
}

fn field<'a>(record: &'a StringRecord, index: usize, name: &str) -> Result<&'a str, String> {
    record
        .get(index)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing {name}"))
}

fn eligibility_csv(path: &Path) -> BatchResult<Vec<ParsedRecord<EligibilityInput>>> {
    let mut reader = reader(path)?;
    let headers = reader.headers()?.clone();
    let member_col = required_column(path, &headers, "member_id")?;
    let payer_col = required_column(path, &headers, "payer_id")?;
    let date_col = required_column(path, &headers, "service_date")?;
    let purpose_col = header_index(&headers, "purpose");

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        // Line 1 is the header row.
        let line = index + 2;
        let input = row.map_err(|e| e.to_string()).and_then(|row| {
            eligibility_from_fields(
                field(&row, member_col, "member_id")?,
                field(&row, payer_col, "payer_id")?,
                field(&row, date_col, "service_date")?,
                purpose_col.and_then(|col| row.get(col)).filter(|v| !v.is_empty()),
            )
        });
        records.push(ParsedRecord { line, input });
    }
    Ok(records)
}

fn claims_csv(path: &Path) -> BatchResult<Vec<ParsedRecord<ClaimInput>>> {
    let mut reader = reader(path)?;
    let headers = reader.headers()?.clone();
    let claim_col = required_column(path, &headers, "claim_id")?;
    let type_col = required_column(path, &headers, "claim_type")?;
    let member_col = required_column(path, &headers, "member_id")?;
    let payer_col = required_column(path, &headers, "payer_id")?;
    let date_col = required_column(path, &headers, "service_date")?;
    let diagnosis_col = required_column(path, &headers, "diagnosis")?;
    let code_col = required_column(path, &headers, "procedure_code")?;
    let quantity_col = required_column(path, &headers, "quantity")?;
    let price_col = required_column(path, &headers, "unit_price")?;
    let total_col = header_index(&headers, "total");

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let line = index + 2;
        let input = row.map_err(|e| e.to_string()).and_then(|row| {
            let quantity: u32 = field(&row, quantity_col, "quantity")?
                .parse()
                .map_err(|e| format!("invalid quantity: {e}"))?;
            let unit_price: f64 = field(&row, price_col, "unit_price")?
                .parse()
                .map_err(|e| format!("invalid unit_price: {e}"))?;
            let total = match total_col.and_then(|col| row.get(col)).filter(|v| !v.is_empty()) {
                Some(value) => Some(
                    value
                        .parse::<f64>()
                        .map_err(|e| format!("invalid total: {e}"))?,
                ),
                None => None,
            };

            claim_from_fields(
                field(&row, claim_col, "claim_id")?,
                field(&row, type_col, "claim_type")?,
                field(&row, member_col, "member_id")?,
                field(&row, payer_col, "payer_id")?,
                field(&row, date_col, "service_date")?,
                &field(&row, diagnosis_col, "diagnosis")?
                    .split('|')
                    .map(str::to_owned)
                    .collect::<Vec<_>>(),
                &[ServiceRow {
                    code: field(&row, code_col, "procedure_code")?.to_owned(),
                    quantity,
                    unit_price,
                }],
                total,
            )
        });
        records.push(ParsedRecord { line, input });
    }
    Ok(records)
}

// ============================================================================
// JSON
// ============================================================================

#[derive(Debug, Deserialize)]
struct EligibilityRow {
    member_id: String,
    payer_id: String,
    service_date: String,
    #[serde(default)]
    purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaimRow {
    claim_id: String,
    #[serde(default)]
    claim_type: Option<String>,
    member_id: String,
    payer_id: String,
    service_date: String,
    diagnoses: Vec<String>,
    services: Vec<ServiceRow>,
    #[serde(default)]
    total: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ServiceRow {
    code: String,
    quantity: u32,
    unit_price: f64,
}

fn read_json_rows(path: &Path) -> BatchResult<Vec<serde_json::Value>> {
    let text = std::fs::read_to_string(path).map_err(|source| BatchError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn eligibility_json(path: &Path) -> BatchResult<Vec<ParsedRecord<EligibilityInput>>> {
    let rows = read_json_rows(path)?;
    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let input = serde_json::from_value::<EligibilityRow>(value)
                .map_err(|e| e.to_string())
                .and_then(|row| {
                    eligibility_from_fields(
                        &row.member_id,
                        &row.payer_id,
                        &row.service_date,
                        row.purpose.as_deref(),
                    )
                });
            ParsedRecord {
                line: index + 1,
                input,
            }
        })
        .collect())
}

fn claims_json(path: &Path) -> BatchResult<Vec<ParsedRecord<ClaimInput>>> {
    let rows = read_json_rows(path)?;
    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let input = serde_json::from_value::<ClaimRow>(value)
                .map_err(|e| e.to_string())
                .and_then(|row| {
                    claim_from_fields(
                        &row.claim_id,
                        row.claim_type.as_deref().unwrap_or("professional"),
                        &row.member_id,
                        &row.payer_id,
                        &row.service_date,
                        &row.diagnoses,
                        &row.services,
                        row.total,
                    )
                });
            ParsedRecord {
                line: index + 1,
                input,
            }
        })
        .collect())
}

// ============================================================================
// Normalisation
// ============================================================================

fn eligibility_from_fields(
    member_id: &str,
    payer_id: &str,
    service_date: &str,
    purpose: Option<&str>,
) -> Result<EligibilityInput, String> {
    let purpose = match purpose {
        Some(value) => vec![parse_purpose(value)?],
        None => vec![EligibilityPurpose::Benefits],
    };
    Ok(EligibilityInput {
        member_id: MemberId::new(member_id).map_err(|e| e.to_string())?,
        payer_id: PayerId::new(payer_id).map_err(|e| e.to_string())?,
        service_date: parse_date(service_date)?,
        purpose,
    })
}

#[allow(clippy::too_many_arguments)]
fn claim_from_fields(
    claim_id: &str,
    claim_type: &str,
    member_id: &str,
    payer_id: &str,
    service_date: &str,
    diagnoses: &[String],
    services: &[ServiceRow],
    total: Option<f64>,
) -> Result<ClaimInput, String> {
    let claim_id = claim_id.trim();
    if claim_id.is_empty() {
        return Err("missing claim_id".to_owned());
    }

    let diagnoses = diagnoses
        .iter()
        .map(|code| DiagnosisCode::new(code).map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    let items = services
        .iter()
        .map(|service| {
            Ok(ClaimItemInput {
                code: ProcedureCode::new(&service.code).map_err(|e| e.to_string())?,
                quantity: service.quantity,
                unit_price: Money::new(service.unit_price).map_err(|e| e.to_string())?,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(ClaimInput {
        external_id: claim_id.to_owned(),
        claim_type: parse_claim_type(claim_type)?,
        member_id: MemberId::new(member_id).map_err(|e| e.to_string())?,
        payer_id: PayerId::new(payer_id).map_err(|e| e.to_string())?,
        service_date: parse_date(service_date)?,
        diagnoses,
        items,
        total: total
            .map(|value| Money::new(value).map_err(|e| e.to_string()))
            .transpose()?,
    })
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid service_date {value:?} (expected YYYY-MM-DD)"))
}

fn parse_purpose(value: &str) -> Result<EligibilityPurpose, String> {
    match value.trim().to_lowercase().as_str() {
        "benefits" => Ok(EligibilityPurpose::Benefits),
        "discovery" => Ok(EligibilityPurpose::Discovery),
        "validation" => Ok(EligibilityPurpose::Validation),
        other => Err(format!("unknown purpose {other:?}")),
    }
}

fn parse_claim_type(value: &str) -> Result<ClaimType, String> {
    match value.trim().to_lowercase().as_str() {
        "institutional" => Ok(ClaimType::Institutional),
        "professional" => Ok(ClaimType::Professional),
        "oral" | "dental" => Ok(ClaimType::Oral),
        "pharmacy" => Ok(ClaimType::Pharmacy),
        "vision" => Ok(ClaimType::Vision),
        other => Err(format!("unknown claim_type {other:?}")),
    }
}
