//! The Bundle envelope and reference-integrity checking.
//!
//! Entries are held as raw JSON values: the clearinghouse owns the response
//! format and may add fields at any time, so individual resources are only
//! decoded into typed structs at the point where their content is needed
//! (see [`crate::parser`]). Outbound entries are produced from typed structs
//! by the builder, so both directions share this envelope.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ParseError, ParseResult};

/// FHIR bundle types. NPHIES traffic uses `message` in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Message,
    Batch,
    Collection,
    Transaction,
}

impl std::fmt::Display for BundleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Batch => "batch",
            Self::Collection => "collection",
            Self::Transaction => "transaction",
        };
        write!(f, "{name}")
    }
}

/// One entry in a bundle: a full URL plus the resource body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    pub full_url: String,
    pub resource: Value,
}

impl BundleEntry {
    /// The entry's `resourceType`, if present.
    pub fn resource_type(&self) -> Option<&str> {
        self.resource.get("resourceType").and_then(Value::as_str)
    }

    /// The entry's resource `id`, if present.
    pub fn resource_id(&self) -> Option<&str> {
        self.resource.get("id").and_then(Value::as_str)
    }
}

/// A FHIR Bundle: ordered entries plus a type and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub resource_type: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BundleKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    /// Creates an empty message bundle.
    pub fn message(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            resource_type: "Bundle".to_owned(),
            id: id.into(),
            kind: BundleKind::Message,
            timestamp,
            entry: Vec::new(),
        }
    }

    /// Appends a resource, deriving the entry's full URL from its type and id.
    pub fn push_resource(&mut self, resource_type: &str, id: &str, resource: Value) {
        self.entry.push(BundleEntry {
            full_url: format!("{resource_type}/{id}"),
            resource,
        });
    }

    /// Returns the first entry holding a resource of the given type.
    pub fn first_of(&self, resource_type: &str) -> Option<&Value> {
        self.entry
            .iter()
            .find(|e| e.resource_type() == Some(resource_type))
            .map(|e| &e.resource)
    }

    /// Returns every entry holding a resource of the given type, in order.
    pub fn all_of<'a>(&'a self, resource_type: &str) -> Vec<&'a Value> {
        let wanted = resource_type.to_owned();
        self.entry
            .iter()
            .filter(move |e| e.resource_type() == Some(wanted.as_str()))
            .map(|e| &e.resource)
            .collect()
    }

    /// The set of `(resourceType, id)` pairs present in this bundle.
    pub fn resource_keys(&self) -> HashSet<(String, String)> {
        self.entry
            .iter()
            .filter_map(|e| {
                Some((
                    e.resource_type()?.to_owned(),
                    e.resource_id()?.to_owned(),
                ))
            })
            .collect()
    }

    /// Verifies that every relative reference inside the bundle resolves to
    /// an entry of this bundle.
    ///
    /// Absolute URLs, `urn:` identifiers and contained (`#`) references are
    /// outside the bundle's scope and are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnresolvedReference`] naming the first dangling
    /// reference found.
    pub fn check_references(&self) -> ParseResult<()> {
        let keys = self.resource_keys();
        let mut references = Vec::new();
        for entry in &self.entry {
            collect_references(&entry.resource, &mut references);
        }

        for reference in references {
            if reference.contains("://") || reference.starts_with("urn:") || reference.starts_with('#')
            {
                continue;
            }
            let Some((resource_type, id)) = reference.split_once('/') else {
                return Err(ParseError::UnresolvedReference { reference });
            };
            if !keys.contains(&(resource_type.to_owned(), id.to_owned())) {
                return Err(ParseError::UnresolvedReference { reference });
            }
        }
        Ok(())
    }
}

/// Recursively collects the string value of every `reference` field.
fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key == "reference" {
                    if let Some(s) = nested.as_str() {
                        out.push(s.to_owned());
                    }
                }
                collect_references(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}
