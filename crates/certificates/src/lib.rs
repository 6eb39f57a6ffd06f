//! Mutual-TLS certificate material for the NPHIES clearinghouse connection.
//!
//! Production traffic to NPHIES requires a client certificate issued against
//! the provider's licence. This crate loads the certificate, private key and
//! CA bundle from PEM files, validates the leaf certificate (well-formed
//! X.509, inside its validity window), and exposes the result as an
//! immutable [`TlsMaterial`] value that the transport layer turns into a TLS
//! identity. Loading happens once at process start; the material is shared
//! read-only across workers afterwards.

use std::path::{Path, PathBuf};

use thiserror::Error;
use x509_parser::prelude::*;
use ::time::OffsetDateTime;

/// Errors that can occur while loading or validating TLS material.
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("failed to read {path}: {source}", path = path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid PEM in {path}: {detail}", path = path.display())]
    Pem { path: PathBuf, detail: String },
    #[error("{path} does not contain a certificate", path = path.display())]
    NotACertificate { path: PathBuf },
    #[error("{path} does not contain a private key", path = path.display())]
    NotAPrivateKey { path: PathBuf },
    #[error("CA bundle {path} contains no certificates", path = path.display())]
    EmptyCaBundle { path: PathBuf },
    #[error("failed to parse X.509 certificate: {0}")]
    X509(String),
    #[error("client certificate for {subject} expired at {not_after}")]
    Expired { subject: String, not_after: String },
    #[error("client certificate for {subject} is not valid until {not_before}")]
    NotYetValid {
        subject: String,
        not_before: String,
    },
}

/// Locations of the PEM files making up the client identity.
#[derive(Clone, Debug)]
pub struct TlsPaths {
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_bundle: PathBuf,
}

/// Validated TLS material, loaded once and reused for every request.
///
/// `identity_pem` is the private key and client certificate concatenated in
/// PEM form, the layout expected by rustls-backed HTTP clients. The CA
/// certificates are kept as individual PEM documents.
#[derive(Clone)]
pub struct TlsMaterial {
    identity_pem: Vec<u8>,
    ca_pems: Vec<Vec<u8>>,
    subject: String,
    not_after: OffsetDateTime,
}

impl TlsMaterial {
    /// The private key + client certificate as concatenated PEM bytes.
    pub fn identity_pem(&self) -> &[u8] {
        &self.identity_pem
    }

    /// CA certificates, one PEM document each.
    pub fn ca_pems(&self) -> &[Vec<u8>] {
        &self.ca_pems
    }

    /// Subject of the client certificate, for logging.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Expiry of the client certificate.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes deliberately excluded.
        f.debug_struct("TlsMaterial")
            .field("subject", &self.subject)
            .field("not_after", &self.not_after)
            .field("ca_count", &self.ca_pems.len())
            .finish()
    }
}

/// Loader for client TLS material.
///
/// This is a zero-sized type used for namespacing; all methods are
/// associated functions.
pub struct CertificateStore;

impl CertificateStore {
    /// Loads and validates TLS material from the given file paths.
    ///
    /// # Errors
    ///
    /// Returns a [`CertificateError`] if any file is missing or unreadable,
    /// the PEM structure is malformed, the key/certificate tags are wrong,
    /// the CA bundle is empty, or the client certificate is outside its
    /// validity window.
    pub fn load(paths: &TlsPaths) -> Result<TlsMaterial, CertificateError> {
        let cert_bytes = read_file(&paths.client_cert)?;
        let key_bytes = read_file(&paths.client_key)?;
        let ca_bytes = read_file(&paths.ca_bundle)?;

        let cert_pem = parse_single_pem(&paths.client_cert, &cert_bytes)?;
        if cert_pem.tag != "CERTIFICATE" {
            return Err(CertificateError::NotACertificate {
                path: paths.client_cert.clone(),
            });
        }

        let key_pem = parse_single_pem(&paths.client_key, &key_bytes)?;
        if !key_pem.tag.contains("PRIVATE KEY") {
            return Err(CertificateError::NotAPrivateKey {
                path: paths.client_key.clone(),
            });
        }

        let ca_pems: Vec<Vec<u8>> = ::pem::parse_many(&ca_bytes)
            .map_err(|e| CertificateError::Pem {
                path: paths.ca_bundle.clone(),
                detail: e.to_string(),
            })?
            .into_iter()
            .filter(|p| p.tag == "CERTIFICATE")
            .map(|p| ::pem::encode(&p).into_bytes())
            .collect();
        if ca_pems.is_empty() {
            return Err(CertificateError::EmptyCaBundle {
                path: paths.ca_bundle.clone(),
            });
        }

        let (subject, not_after) = validate_leaf(&cert_pem.contents)?;

        let mut identity_pem = ::pem::encode(&key_pem).into_bytes();
        identity_pem.extend_from_slice(::pem::encode(&cert_pem).as_bytes());

        Ok(TlsMaterial {
            identity_pem,
            ca_pems,
            subject,
            not_after,
        })
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CertificateError> {
    std::fs::read(path).map_err(|source| CertificateError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_single_pem(path: &Path, bytes: &[u8]) -> Result<::pem::Pem, CertificateError> {
    ::pem::parse(bytes).map_err(|e| CertificateError::Pem {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Parses the leaf certificate DER and checks its validity window against
/// the current time.
fn validate_leaf(der: &[u8]) -> Result<(String, OffsetDateTime), CertificateError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| CertificateError::X509(e.to_string()))?;

    let subject = cert.subject().to_string();
    let now = ASN1Time::now();
    let validity = cert.validity();

    if validity.not_after < now {
        return Err(CertificateError::Expired {
            subject,
            not_after: validity.not_after.to_string(),
        });
    }
    if validity.not_before > now {
        return Err(CertificateError::NotYetValid {
            subject,
            not_before: validity.not_before.to_string(),
        });
    }

    Ok((subject, validity.not_after.to_datetime()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use std::fs;

    fn self_signed(not_before: OffsetDateTime, not_after: OffsetDateTime) -> (String, String) {
        let mut params = CertificateParams::default();
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, "Test Provider");
        params.distinguished_name = subject;
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    fn write_material(dir: &Path, cert_pem: &str, key_pem: &str, ca_pem: &str) -> TlsPaths {
        let paths = TlsPaths {
            client_cert: dir.join("client.pem"),
            client_key: dir.join("client.key"),
            ca_bundle: dir.join("ca.pem"),
        };
        fs::write(&paths.client_cert, cert_pem).unwrap();
        fs::write(&paths.client_key, key_pem).unwrap();
        fs::write(&paths.ca_bundle, ca_pem).unwrap();
        paths
    }

    #[test]
    fn loads_valid_material() {
        let now = OffsetDateTime::now_utc();
        let (cert, key) =
            self_signed(now - ::time::Duration::days(1), now + ::time::Duration::days(365));
        let (ca, _) = self_signed(now - ::time::Duration::days(1), now + ::time::Duration::days(365));

        let dir = tempfile::tempdir().unwrap();
        let paths = write_material(dir.path(), &cert, &key, &ca);

        let material = CertificateStore::load(&paths).unwrap();
        assert!(material.subject().contains("Test Provider"));
        assert_eq!(material.ca_pems().len(), 1);

        let identity = String::from_utf8(material.identity_pem().to_vec()).unwrap();
        assert!(identity.contains("BEGIN PRIVATE KEY"));
        assert!(identity.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn rejects_expired_certificate() {
        let now = OffsetDateTime::now_utc();
        let (cert, key) =
            self_signed(now - ::time::Duration::days(30), now - ::time::Duration::days(1));
        let (ca, _) = self_signed(now - ::time::Duration::days(1), now + ::time::Duration::days(365));

        let dir = tempfile::tempdir().unwrap();
        let paths = write_material(dir.path(), &cert, &key, &ca);

        match CertificateStore::load(&paths) {
            Err(CertificateError::Expired { subject, .. }) => {
                assert!(subject.contains("Test Provider"));
            }
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TlsPaths {
            client_cert: dir.path().join("nope.pem"),
            client_key: dir.path().join("nope.key"),
            ca_bundle: dir.path().join("nope-ca.pem"),
        };
        assert!(matches!(
            CertificateStore::load(&paths),
            Err(CertificateError::Read { .. })
        ));
    }

    #[test]
    fn rejects_key_file_holding_a_certificate() {
        let now = OffsetDateTime::now_utc();
        let (cert, _key) =
            self_signed(now - ::time::Duration::days(1), now + ::time::Duration::days(365));

        let dir = tempfile::tempdir().unwrap();
        // Certificate written where the key should be.
        let paths = write_material(dir.path(), &cert, &cert, &cert);

        assert!(matches!(
            CertificateStore::load(&paths),
            Err(CertificateError::NotAPrivateKey { .. })
        ));
    }

    #[test]
    fn rejects_empty_ca_bundle() {
        let now = OffsetDateTime::now_utc();
        let (cert, key) =
            self_signed(now - ::time::Duration::days(1), now + ::time::Duration::days(365));

        let dir = tempfile::tempdir().unwrap();
        let paths = write_material(dir.path(), &cert, &key, &key);

        assert!(matches!(
            CertificateStore::load(&paths),
            Err(CertificateError::EmptyCaBundle { .. })
        ));
    }

    #[test]
    fn debug_output_excludes_key_bytes() {
        let now = OffsetDateTime::now_utc();
        let (cert, key) =
            self_signed(now - ::time::Duration::days(1), now + ::time::Duration::days(365));
        let (ca, _) = self_signed(now - ::time::Duration::days(1), now + ::time::Duration::days(365));

        let dir = tempfile::tempdir().unwrap();
        let paths = write_material(dir.path(), &cert, &key, &ca);
        let material = CertificateStore::load(&paths).unwrap();

        let debug = format!("{material:?}");
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
