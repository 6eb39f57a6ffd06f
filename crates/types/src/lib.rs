//! Validated scalar types shared across the NPHIES integration crates.
//!
//! Identifiers, clinical codes and money amounts arrive from CSV/JSON batch
//! input as plain strings and numbers. These wrappers validate at
//! construction time so downstream code (bundle building, wire
//! serialisation) can rely on well-formed values without re-checking.

/// Errors that can occur when creating validated scalar types.
#[derive(Debug, thiserror::Error)]
pub enum ScalarError {
    /// The input was empty or contained only whitespace
    #[error("value cannot be empty")]
    Empty,
    /// An identifier contained non-digit characters or had a bad length
    #[error("{field} must be {min}-{max} digits, got {value:?}")]
    BadIdentifier {
        field: &'static str,
        min: usize,
        max: usize,
        value: String,
    },
    /// A diagnosis code did not match the ICD-10 shape
    #[error("diagnosis code {0:?} is not a valid ICD-10 code")]
    BadDiagnosisCode(String),
    /// A procedure code contained invalid characters
    #[error("procedure code {0:?} is not a valid procedure code")]
    BadProcedureCode(String),
    /// A money amount was negative, non-finite, or had sub-cent precision
    #[error("invalid money amount {0}")]
    BadAmount(f64),
}

fn validate_digits(
    field: &'static str,
    input: &str,
    min: usize,
    max: usize,
) -> Result<String, ScalarError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ScalarError::Empty);
    }
    let ok = trimmed.len() >= min
        && trimmed.len() <= max
        && trimmed.bytes().all(|b| b.is_ascii_digit());
    if !ok {
        return Err(ScalarError::BadIdentifier {
            field,
            min,
            max,
            value: trimmed.to_owned(),
        });
    }
    Ok(trimmed.to_owned())
}

macro_rules! string_scalar_impls {
    ($name:ident) => {
        impl $name {
            /// Returns the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// A member (beneficiary) identifier: 6-15 digits.
///
/// NPHIES member identifiers are national IDs or iqama numbers; both are
/// all-digit strings. Leading/trailing whitespace is trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberId(String);

impl MemberId {
    /// Creates a new `MemberId`, validating digit content and length.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ScalarError> {
        Ok(Self(validate_digits("member_id", input.as_ref(), 6, 15)?))
    }
}

string_scalar_impls!(MemberId);

/// A payer organisation identifier: 6-15 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayerId(String);

impl PayerId {
    /// Creates a new `PayerId`, validating digit content and length.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ScalarError> {
        Ok(Self(validate_digits("payer_id", input.as_ref(), 6, 15)?))
    }
}

string_scalar_impls!(PayerId);

/// An ICD-10 diagnosis code.
///
/// Accepted shape: one uppercase letter, two digits, then optionally a dot
/// followed by one to four alphanumeric characters (`J45`, `E11.9`,
/// `S72.001`). Lowercase input is upcased during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiagnosisCode(String);

impl DiagnosisCode {
    /// Creates a new `DiagnosisCode` from an ICD-10-shaped string.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ScalarError> {
        let code = input.as_ref().trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(ScalarError::Empty);
        }
        if !Self::is_icd10_shaped(&code) {
            return Err(ScalarError::BadDiagnosisCode(code));
        }
        Ok(Self(code))
    }

    fn is_icd10_shaped(code: &str) -> bool {
        let bytes = code.as_bytes();
        if bytes.len() < 3 || bytes.len() > 8 {
            return false;
        }
        if !bytes[0].is_ascii_uppercase()
            || !bytes[1].is_ascii_digit()
            || !bytes[2].is_ascii_digit()
        {
            return false;
        }
        match bytes.get(3) {
            None => true,
            Some(b'.') => {
                let tail = &bytes[4..];
                !tail.is_empty()
                    && tail.len() <= 4
                    && tail.iter().all(|b| b.is_ascii_alphanumeric())
            }
            Some(_) => false,
        }
    }
}

string_scalar_impls!(DiagnosisCode);

/// A procedure / service code (CPT-style): 1-10 alphanumeric characters,
/// hyphens allowed after the first character.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcedureCode(String);

impl ProcedureCode {
    /// Creates a new `ProcedureCode`.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ScalarError> {
        let code = input.as_ref().trim().to_owned();
        if code.is_empty() {
            return Err(ScalarError::Empty);
        }
        let mut bytes = code.bytes();
        let first_ok = bytes.next().is_some_and(|b| b.is_ascii_alphanumeric());
        let rest_ok = bytes.all(|b| b.is_ascii_alphanumeric() || b == b'-');
        if !first_ok || !rest_ok || code.len() > 10 {
            return Err(ScalarError::BadProcedureCode(code));
        }
        Ok(Self(code))
    }
}

string_scalar_impls!(ProcedureCode);

/// A non-negative money amount with at most two decimal places.
///
/// Stored as whole halalas (hundredths) internally so that equality and
/// summation are exact. The FHIR wire carries decimal values; use
/// [`Money::value`] when serialising and [`Money::new`] when reading
/// caller-supplied amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` from a decimal amount.
    ///
    /// # Errors
    ///
    /// Returns `ScalarError::BadAmount` if the amount is negative,
    /// non-finite, larger than 10^12, or carries sub-cent precision.
    pub fn new(amount: f64) -> Result<Self, ScalarError> {
        if !amount.is_finite() || amount < 0.0 || amount > 1.0e12 {
            return Err(ScalarError::BadAmount(amount));
        }
        let cents = amount * 100.0;
        let rounded = cents.round();
        if (cents - rounded).abs() > 1e-6 {
            return Err(ScalarError::BadAmount(amount));
        }
        Ok(Self(rounded as u64))
    }

    /// A zero amount.
    pub const ZERO: Money = Money(0);

    /// Returns the decimal value (for wire serialisation).
    pub fn value(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns the amount in whole hundredths.
    pub fn cents(&self) -> u64 {
        self.0
    }

    /// Exact sum with another amount.
    pub fn plus(&self, other: Money) -> Money {
        Money(self.0 + other.0)
    }

    /// Exact multiplication by a unit count.
    pub fn times(&self, quantity: u32) -> Money {
        Money(self.0 * u64::from(quantity))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl serde::Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_f64(self.value())
    }
}

impl<'de> serde::Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = f64::deserialize(deserializer)?;
        Money::new(v).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_id_accepts_digit_strings() {
        let id = MemberId::new("1234567890").unwrap();
        assert_eq!(id.as_str(), "1234567890");
    }

    #[test]
    fn member_id_trims_whitespace() {
        let id = MemberId::new("  1234567890 ").unwrap();
        assert_eq!(id.as_str(), "1234567890");
    }

    #[test]
    fn member_id_rejects_letters_and_bad_lengths() {
        assert!(MemberId::new("12345").is_err());
        assert!(MemberId::new("12345abc90").is_err());
        assert!(MemberId::new("").is_err());
        assert!(MemberId::new("1234567890123456").is_err());
    }

    #[test]
    fn diagnosis_code_accepts_icd10_shapes() {
        assert!(DiagnosisCode::new("J45").is_ok());
        assert!(DiagnosisCode::new("E11.9").is_ok());
        assert!(DiagnosisCode::new("S72.001").is_ok());
    }

    #[test]
    fn diagnosis_code_upcases() {
        let code = DiagnosisCode::new("e11.9").unwrap();
        assert_eq!(code.as_str(), "E11.9");
    }

    #[test]
    fn diagnosis_code_rejects_non_icd10() {
        assert!(DiagnosisCode::new("99213").is_err());
        assert!(DiagnosisCode::new("EE1").is_err());
        assert!(DiagnosisCode::new("E1").is_err());
        assert!(DiagnosisCode::new("E11.").is_err());
        assert!(DiagnosisCode::new("E11.12345").is_err());
    }

    #[test]
    fn procedure_code_accepts_cpt_style() {
        assert!(ProcedureCode::new("99213").is_ok());
        assert!(ProcedureCode::new("83036-QW").is_ok());
    }

    #[test]
    fn procedure_code_rejects_junk() {
        assert!(ProcedureCode::new("").is_err());
        assert!(ProcedureCode::new("-99213").is_err());
        assert!(ProcedureCode::new("code with spaces").is_err());
    }

    #[test]
    fn money_round_trips_two_decimal_places() {
        let m = Money::new(150.00).unwrap();
        assert_eq!(m.value(), 150.0);
        assert_eq!(m.to_string(), "150.00");
        assert_eq!(Money::new(0.5).unwrap().to_string(), "0.50");
    }

    #[test]
    fn money_rejects_negative_and_sub_cent() {
        assert!(Money::new(-1.0).is_err());
        assert!(Money::new(f64::NAN).is_err());
        assert!(Money::new(10.001).is_err());
    }

    #[test]
    fn money_arithmetic_is_exact() {
        let unit = Money::new(0.10).unwrap();
        let total = unit.times(3);
        assert_eq!(total, Money::new(0.30).unwrap());
        assert_eq!(total.plus(Money::new(0.70).unwrap()), Money::new(1.0).unwrap());
    }
}
