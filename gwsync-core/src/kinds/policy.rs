use super::{ResourceKind, reference};
use crate::backend::RemoteKind;
use crate::links::{Addresses, LinkError, Reference};
use crate::model::{Environment, GatewayMode, Identity, Kind, SecurityPolicySpec, Target};

/// Access-control policies.
pub struct SecurityPolicies;

impl ResourceKind for SecurityPolicies {
    const KIND: Kind = Kind::SecurityPolicy;

    type Spec = SecurityPolicySpec;

    fn remote_kind() -> Option<RemoteKind> {
        Some(RemoteKind::Policy)
    }

    fn references(spec: &SecurityPolicySpec, namespace: &str) -> Result<Vec<Reference>, String> {
        let mut out = Vec::new();
        for access in &spec.access_rights_array {
            if let Some(target) = &access.target {
                out.push(reference(
                    "access_rights_array.target",
                    Kind::ApiDefinition,
                    target,
                    namespace,
                )?);
            }
        }
        if let Some(context) = &spec.context {
            out.push(reference("context", Kind::OperatorContext, context, namespace)?);
        }
        Ok(out)
    }

    fn rewrite(
        mut spec: SecurityPolicySpec,
        namespace: &str,
        addresses: &Addresses,
    ) -> Result<SecurityPolicySpec, LinkError> {
        for access in spec.access_rights_array.iter_mut() {
            if let Some(target) = access.target.take() {
                let api = addresses.require(Kind::ApiDefinition, &target.identity(namespace))?;
                access.api_id = api.address.clone();
                if access.api_name.is_empty() {
                    access.api_name = api.label.clone();
                }
            }
        }
        spec.rebuild_access_rights();
        spec.context = None;
        Ok(spec)
    }

    fn context(spec: &SecurityPolicySpec) -> Option<&Target> {
        spec.context.as_ref()
    }

    fn prepare(spec: &mut SecurityPolicySpec, id: &Identity, env: &Environment) {
        if spec.id.is_empty() {
            spec.id = id.encoded();
        }
        if spec.org_id.is_empty() {
            spec.org_id = env.org().to_string();
        }
    }

    fn validate(spec: &SecurityPolicySpec) -> Result<(), String> {
        if spec.name.trim().is_empty() {
            return Err("name is empty".to_string());
        }
        for (i, access) in spec.access_rights_array.iter().enumerate() {
            if access.api_id.is_empty() {
                return Err(format!("access_rights_array[{}] names no API", i));
            }
        }
        Ok(())
    }

    fn planned_remote_id(spec: &SecurityPolicySpec, env: &Environment) -> Option<String> {
        (env.mode() == GatewayMode::Gateway && !spec.id.is_empty()).then(|| spec.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::ResolvedTarget;
    use crate::model::ResourceRef;
    use crate::model::policy::AccessDefinition;

    fn policy(targets: &[&str]) -> SecurityPolicySpec {
        SecurityPolicySpec {
            name: "p1".to_string(),
            access_rights_array: targets
                .iter()
                .map(|t| AccessDefinition {
                    target: Some(Target::new(*t)),
                    versions: vec!["Default".to_string()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rewrite_fills_access_rights() {
        let a1 = Identity::new("default", "a1");
        let mut addresses = Addresses::default();
        addresses.insert(ResolvedTarget {
            target: ResourceRef::new(Kind::ApiDefinition, &a1),
            address: a1.encoded(),
            label: "Httpbin".to_string(),
        });

        let spec = policy(&["a1", "a1"]);
        let refs = SecurityPolicies::references(&spec, "default").unwrap();
        assert_eq!(refs.len(), 2);

        let out = SecurityPolicies::rewrite(spec, "default", &addresses).unwrap();
        assert!(out.access_rights_array.iter().all(|a| a.target.is_none()));
        assert_eq!(out.access_rights.len(), 1);
        let right = &out.access_rights[&a1.encoded()];
        assert_eq!(right.api_name, "Httpbin");
        assert_eq!(right.versions, vec!["Default".to_string()]);
        assert!(SecurityPolicies::validate(&out).is_ok());
    }

    #[test]
    fn test_validate_rejects_unresolved_entry() {
        let mut spec = policy(&[]);
        spec.access_rights_array.push(AccessDefinition::default());
        assert!(SecurityPolicies::validate(&spec).is_err());
    }
}
