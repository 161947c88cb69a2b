use super::ResourceKind;
use crate::links::{Addresses, LinkError, Reference};
use crate::model::{Kind, OperatorContextSpec};

/// Operator contexts. Store-only; other kinds read their environment while resolving.
pub struct OperatorContexts;

impl ResourceKind for OperatorContexts {
    const KIND: Kind = Kind::OperatorContext;

    type Spec = OperatorContextSpec;

    fn references(_spec: &OperatorContextSpec, _namespace: &str) -> Result<Vec<Reference>, String> {
        Ok(Vec::new())
    }

    fn rewrite(
        spec: OperatorContextSpec,
        _namespace: &str,
        _addresses: &Addresses,
    ) -> Result<OperatorContextSpec, LinkError> {
        Ok(spec)
    }

    fn validate(spec: &OperatorContextSpec) -> Result<(), String> {
        match spec.env.url.as_deref() {
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                Err(format!("env.url {:?} is not an http(s) URL", url))
            }
            _ => Ok(()),
        }
    }
}
