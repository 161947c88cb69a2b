//! TLS certificate binding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Target;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CertificateSpec {
    /// PEM encoded certificate (chain). The first block identifies the binding.
    pub cert_pem: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_pem: String,
    /// Organisation the certificate is uploaded for. Falls back to the environment org.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Target>,
}

impl CertificateSpec {
    /// Hex SHA-256 of the DER bytes of the first certificate block.
    pub fn fingerprint(&self) -> Result<String, String> {
        let der = first_pem_block(&self.cert_pem, "CERTIFICATE")
            .ok_or_else(|| "cert_pem holds no CERTIFICATE block".to_string())?;
        Ok(hex::encode(Sha256::digest(&der)))
    }

    /// Remote certificate id: organisation id followed by the fingerprint.
    pub fn certificate_id(&self, org_id: &str) -> Result<String, String> {
        Ok(format!("{}{}", org_id, self.fingerprint()?))
    }

    /// Key followed by certificate, the layout the upload endpoints expect.
    pub fn bundle(&self) -> String {
        let mut out = String::new();
        if !self.key_pem.is_empty() {
            out.push_str(self.key_pem.trim_end());
            out.push('\n');
        }
        out.push_str(self.cert_pem.trim_end());
        out.push('\n');
        out
    }
}

/// Decodes the body of the first PEM block labelled `label`.
pub fn first_pem_block(pem: &str, label: &str) -> Option<Vec<u8>> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let start = pem.find(&begin)? + begin.len();
    let stop = start + pem[start..].find(&end)?;
    let body: String = pem[start..stop]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD.decode(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\naGVsbG8g\nd29ybGQ=\n-----END CERTIFICATE-----\n";

    #[test]
    fn test_first_pem_block() {
        assert_eq!(first_pem_block(PEM, "CERTIFICATE"), Some(b"hello world".to_vec()));
        assert_eq!(first_pem_block(PEM, "PRIVATE KEY"), None);
    }

    #[test]
    fn test_certificate_id_is_org_scoped() {
        let spec = CertificateSpec {
            cert_pem: PEM.to_string(),
            ..Default::default()
        };
        let fp = spec.fingerprint().unwrap();
        assert_eq!(fp, hex::encode(Sha256::digest(b"hello world")));
        assert_eq!(spec.certificate_id("org1").unwrap(), format!("org1{}", fp));
        assert_ne!(
            spec.certificate_id("org1").unwrap(),
            spec.certificate_id("org2").unwrap()
        );
    }

    #[test]
    fn test_fingerprint_rejects_garbage() {
        let spec = CertificateSpec {
            cert_pem: "not a pem".to_string(),
            ..Default::default()
        };
        assert!(spec.fingerprint().is_err());
    }
}
