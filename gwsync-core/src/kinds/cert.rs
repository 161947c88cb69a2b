use serde_json::{Value, json};

use super::{ResourceKind, reference};
use crate::backend::RemoteKind;
use crate::links::{Addresses, LinkError, Reference};
use crate::model::{CertificateSpec, Environment, Identity, Kind, NumberMode, Target};

/// TLS certificate bindings.
///
/// The remote id is derived from the organisation and the certificate bytes, so
/// a changed certificate is uploaded under a new id and the old one removed.
pub struct Certificates;

impl ResourceKind for Certificates {
    const KIND: Kind = Kind::Certificate;

    const REPLACE_ON_CHANGE: bool = true;

    type Spec = CertificateSpec;

    fn remote_kind() -> Option<RemoteKind> {
        Some(RemoteKind::Certificate)
    }

    fn references(spec: &CertificateSpec, namespace: &str) -> Result<Vec<Reference>, String> {
        match &spec.context {
            Some(context) => Ok(vec![reference(
                "context",
                Kind::OperatorContext,
                context,
                namespace,
            )?]),
            None => Ok(Vec::new()),
        }
    }

    fn rewrite(
        mut spec: CertificateSpec,
        _namespace: &str,
        _addresses: &Addresses,
    ) -> Result<CertificateSpec, LinkError> {
        spec.context = None;
        Ok(spec)
    }

    fn context(spec: &CertificateSpec) -> Option<&Target> {
        spec.context.as_ref()
    }

    fn prepare(spec: &mut CertificateSpec, _id: &Identity, env: &Environment) {
        if spec.org_id.is_empty() {
            spec.org_id = env.org().to_string();
        }
    }

    fn validate(spec: &CertificateSpec) -> Result<(), String> {
        spec.fingerprint().map(|_| ())
    }

    fn wire_body(spec: &CertificateSpec, _mode: NumberMode) -> serde_json::Result<Value> {
        Ok(json!({
            "cert_id": spec.certificate_id(&spec.org_id).unwrap_or_default(),
            "org_id": spec.org_id,
            "cert": spec.bundle(),
        }))
    }

    fn planned_remote_id(spec: &CertificateSpec, _env: &Environment) -> Option<String> {
        spec.certificate_id(&spec.org_id).ok()
    }
}
