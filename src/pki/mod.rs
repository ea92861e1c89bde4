//! Certificate material for IAM Roles Anywhere nodes.
//!
//! A [CertificateAuthority] is loaded (or generated) once per test run and shared read-only
//! between every node provisioned in that run. Each node gets its own leaf certificate whose
//! common name is the node name, which is what IAM Roles Anywhere maps to the session name.
use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectKeyIdentifier,
        },
        X509Name, X509NameBuilder, X509,
    },
};
use thiserror::Error;
use tracing::debug;

const LEAF_VALIDITY_DAYS: u32 = 7;
const CA_VALIDITY_DAYS: u32 = 30;

#[derive(Error, Debug)]
pub enum CertificateIssueError {
    #[error("invalid CA certificate: `{0}`")]
    InvalidCertificate(#[source] ErrorStack),

    #[error("invalid CA private key: `{0}`")]
    InvalidKey(#[source] ErrorStack),

    #[error("CA private key does not match the CA certificate")]
    KeyMismatch,

    #[error("issuing certificate for `{name}`: `{source}`")]
    Signing {
        name: String,
        #[source]
        source: ErrorStack,
    },
}

/// PEM encoded certificate and private key of a node.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// CA certificate and key. Immutable once built.
#[derive(Clone)]
pub struct CertificateAuthority {
    certificate: X509,
    key: PKey<Private>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("subject", &self.certificate.subject_name())
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CertificateAuthority {
    pub fn from_pem(
        certificate_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self, CertificateIssueError> {
        let certificate =
            X509::from_pem(certificate_pem).map_err(CertificateIssueError::InvalidCertificate)?;
        let key =
            PKey::private_key_from_pem(key_pem).map_err(CertificateIssueError::InvalidKey)?;

        let public_key = certificate
            .public_key()
            .map_err(CertificateIssueError::InvalidCertificate)?;
        if !public_key.public_eq(&key) {
            return Err(CertificateIssueError::KeyMismatch);
        }

        Ok(Self { certificate, key })
    }

    /// Generates a throwaway self-signed CA, for runs that don't bring their own.
    pub fn self_signed(common_name: &str) -> Result<Self, CertificateIssueError> {
        let signing_error = |source| CertificateIssueError::Signing {
            name: common_name.to_string(),
            source,
        };
        Self::build_self_signed(common_name).map_err(signing_error)
    }

    fn build_self_signed(common_name: &str) -> Result<Self, ErrorStack> {
        let key = generate_key()?;
        let name = subject_name(common_name)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(CA_VALIDITY_DAYS)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .digital_signature()
                .build()?,
        )?;
        let subject_key_id =
            SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(subject_key_id)?;
        builder.sign(&key, MessageDigest::sha256())?;

        Ok(Self {
            certificate: builder.build(),
            key,
        })
    }

    pub fn certificate_pem(&self) -> Result<String, ErrorStack> {
        self.certificate.to_pem().map(pem_to_string)
    }

    pub fn private_key_pem(&self) -> Result<String, ErrorStack> {
        self.key.private_key_to_pem_pkcs8().map(pem_to_string)
    }

    /// Issues a fresh client certificate for `node_name` signed by this CA.
    ///
    /// Every call generates new key material.
    pub fn issue(&self, node_name: &str) -> Result<IssuedCertificate, CertificateIssueError> {
        debug!(node_name, "issuing node certificate");
        self.build_leaf(node_name)
            .map_err(|source| CertificateIssueError::Signing {
                name: node_name.to_string(),
                source,
            })
    }

    fn build_leaf(&self, node_name: &str) -> Result<IssuedCertificate, ErrorStack> {
        let key = generate_key()?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;
        let subject = subject_name(node_name)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(self.certificate.subject_name())?;
        builder.set_pubkey(&key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(LEAF_VALIDITY_DAYS)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().client_auth().build()?)?;
        let subject_key_id = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(Some(&self.certificate), None))?;
        builder.append_extension(subject_key_id)?;
        let authority_key_id = AuthorityKeyIdentifier::new()
            .keyid(false)
            .issuer(false)
            .build(&builder.x509v3_context(Some(&self.certificate), None))?;
        builder.append_extension(authority_key_id)?;
        builder.sign(&self.key, MessageDigest::sha256())?;

        Ok(IssuedCertificate {
            certificate_pem: pem_to_string(builder.build().to_pem()?),
            private_key_pem: pem_to_string(key.private_key_to_pem_pkcs8()?),
        })
    }
}

fn generate_key() -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    PKey::from_ec_key(EcKey::generate(&group)?)
}

fn subject_name(common_name: &str) -> Result<X509Name, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(name.build())
}

fn random_serial() -> Result<Asn1Integer, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}

// PEM output of openssl is always ASCII.
fn pem_to_string(pem: Vec<u8>) -> String {
    String::from_utf8_lossy(&pem).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;
    use openssl::x509::X509VerifyResult;

    use super::*;

    pub(crate) fn test_ca() -> CertificateAuthority {
        CertificateAuthority::self_signed("hybrid-e2e-test-ca").unwrap()
    }

    fn common_name(cert: &X509) -> String {
        cert.subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string()
    }

    #[test]
    fn issued_certificate_is_signed_by_ca() {
        let ca = test_ca();
        let issued = ca.issue("hybrid-node-1").unwrap();

        let leaf = X509::from_pem(issued.certificate_pem.as_bytes()).unwrap();
        let ca_cert = X509::from_pem(ca.certificate_pem().unwrap().as_bytes()).unwrap();

        assert_eq!(common_name(&leaf), "hybrid-node-1");
        assert_eq!(ca_cert.issued(&leaf), X509VerifyResult::OK);
        assert!(leaf.verify(&ca_cert.public_key().unwrap()).unwrap());

        let key = PKey::private_key_from_pem(issued.private_key_pem.as_bytes()).unwrap();
        assert!(leaf.public_key().unwrap().public_eq(&key));
    }

    #[test]
    fn issuing_generates_fresh_key_material() {
        let ca = test_ca();
        let first = ca.issue("node").unwrap();
        let second = ca.issue("node").unwrap();
        assert_ne!(first.private_key_pem, second.private_key_pem);
        assert_ne!(first.certificate_pem, second.certificate_pem);
    }

    #[test]
    fn loads_ca_from_pem() {
        let generated = test_ca();
        let ca = CertificateAuthority::from_pem(
            generated.certificate_pem().unwrap().as_bytes(),
            generated.private_key_pem().unwrap().as_bytes(),
        )
        .unwrap();

        assert!(ca.issue("node").is_ok());
    }

    #[test]
    fn rejects_malformed_material() {
        let ca = test_ca();
        let cert = ca.certificate_pem().unwrap();
        let key = ca.private_key_pem().unwrap();

        assert_matches!(
            CertificateAuthority::from_pem(b"not a certificate", key.as_bytes()),
            Err(CertificateIssueError::InvalidCertificate(_))
        );
        assert_matches!(
            CertificateAuthority::from_pem(cert.as_bytes(), b"not a key"),
            Err(CertificateIssueError::InvalidKey(_))
        );
    }

    #[test]
    fn rejects_key_from_another_ca() {
        let ca = test_ca();
        let other = test_ca();
        assert_matches!(
            CertificateAuthority::from_pem(
                ca.certificate_pem().unwrap().as_bytes(),
                other.private_key_pem().unwrap().as_bytes(),
            ),
            Err(CertificateIssueError::KeyMismatch)
        );
    }

    #[test]
    fn debug_output_redacts_keys() {
        let issued = test_ca().issue("node").unwrap();
        assert!(!format!("{issued:?}").contains("PRIVATE KEY"));
    }
}
