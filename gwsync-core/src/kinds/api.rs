use serde_json::Value;

use super::{ResourceKind, reference};
use crate::backend::RemoteKind;
use crate::links::{Addresses, LinkError, Reference, api_id, internal_address};
use crate::model::api::{InternalTarget, NUMERIC_FIELDS};
use crate::model::number;
use crate::model::{
    ApiDefinitionSpec, Environment, GatewayMode, Identity, Kind, NumberMode, Target,
};

/// Routed-API definitions.
pub struct ApiDefinitions;

fn internal_url(
    field: &'static str,
    internal: &InternalTarget,
    namespace: &str,
) -> Result<Reference, String> {
    reference(field, Kind::ApiDefinition, &internal.target, namespace)
}

fn resolve_url(
    internal: InternalTarget,
    namespace: &str,
    addresses: &Addresses,
) -> Result<String, LinkError> {
    let resolved = addresses.require(Kind::ApiDefinition, &internal.target.identity(namespace))?;
    Ok(internal.address(&internal_address(&resolved.address)))
}

impl ResourceKind for ApiDefinitions {
    const KIND: Kind = Kind::ApiDefinition;

    type Spec = ApiDefinitionSpec;

    fn remote_kind() -> Option<RemoteKind> {
        Some(RemoteKind::Api)
    }

    fn references(spec: &ApiDefinitionSpec, namespace: &str) -> Result<Vec<Reference>, String> {
        let mut out = Vec::new();

        if let Some(internal) = &spec.proxy.target_internal {
            out.push(internal_url("proxy.target_internal", internal, namespace)?);
        }

        if let Some(versions) = &spec.version_data {
            for info in versions.versions.values() {
                let Some(paths) = &info.extended_paths else {
                    continue;
                };
                for rewrite in &paths.url_rewrites {
                    if let Some(internal) = &rewrite.rewrite_to_internal {
                        out.push(internal_url("url_rewrites.rewrite_to_internal", internal, namespace)?);
                    }
                    for trigger in &rewrite.triggers {
                        if let Some(internal) = &trigger.rewrite_to_internal {
                            out.push(internal_url(
                                "url_rewrites.triggers.rewrite_to_internal",
                                internal,
                                namespace,
                            )?);
                        }
                    }
                }
            }
        }

        for target in &spec.certificate_refs {
            out.push(reference("certificate_refs", Kind::Certificate, target, namespace)?);
        }

        if let Some(graphql) = &spec.graphql {
            match (&graphql.subgraph_ref, &graphql.supergraph_ref) {
                (Some(_), Some(_)) => {
                    return Err(
                        "graphql: subgraph_ref and supergraph_ref are mutually exclusive".to_string(),
                    );
                }
                (Some(t), None) => out.push(reference("graphql.subgraph_ref", Kind::SubGraph, t, namespace)?),
                (None, Some(t)) => {
                    out.push(reference("graphql.supergraph_ref", Kind::SuperGraph, t, namespace)?)
                }
                (None, None) => {}
            }
        }

        if let Some(context) = &spec.context {
            out.push(reference("context", Kind::OperatorContext, context, namespace)?);
        }

        Ok(out)
    }

    fn rewrite(
        mut spec: ApiDefinitionSpec,
        namespace: &str,
        addresses: &Addresses,
    ) -> Result<ApiDefinitionSpec, LinkError> {
        if let Some(internal) = spec.proxy.target_internal.take() {
            spec.proxy.target_url = resolve_url(internal, namespace, addresses)?;
        }

        if let Some(versions) = spec.version_data.as_mut() {
            for info in versions.versions.values_mut() {
                let Some(paths) = info.extended_paths.as_mut() else {
                    continue;
                };
                for rewrite in paths.url_rewrites.iter_mut() {
                    if let Some(internal) = rewrite.rewrite_to_internal.take() {
                        rewrite.rewrite_to = resolve_url(internal, namespace, addresses)?;
                    }
                    for trigger in rewrite.triggers.iter_mut() {
                        if let Some(internal) = trigger.rewrite_to_internal.take() {
                            trigger.rewrite_to = resolve_url(internal, namespace, addresses)?;
                        }
                    }
                }
            }
        }

        for target in std::mem::take(&mut spec.certificate_refs) {
            let resolved = addresses.require(Kind::Certificate, &target.identity(namespace))?;
            if !spec.certificates.contains(&resolved.address) {
                spec.certificates.push(resolved.address.clone());
            }
        }

        if let Some(graphql) = spec.graphql.as_mut() {
            if let Some(target) = graphql.subgraph_ref.take() {
                graphql.schema = addresses
                    .require(Kind::SubGraph, &target.identity(namespace))?
                    .address
                    .clone();
            }
            if let Some(target) = graphql.supergraph_ref.take() {
                graphql.schema = addresses
                    .require(Kind::SuperGraph, &target.identity(namespace))?
                    .address
                    .clone();
            }
        }

        spec.context = None;
        Ok(spec)
    }

    fn context(spec: &ApiDefinitionSpec) -> Option<&Target> {
        spec.context.as_ref()
    }

    fn prepare(spec: &mut ApiDefinitionSpec, id: &Identity, env: &Environment) {
        spec.api_id = api_id(spec, id);
        if spec.org_id.is_empty() {
            spec.org_id = env.org().to_string();
        }
    }

    fn validate(spec: &ApiDefinitionSpec) -> Result<(), String> {
        if spec.name.trim().is_empty() {
            return Err("name is empty".to_string());
        }
        if spec.proxy.target_url.trim().is_empty() {
            return Err("proxy target resolves to nothing: set target_url or target_internal".to_string());
        }
        Ok(())
    }

    fn wire_body(spec: &ApiDefinitionSpec, mode: NumberMode) -> serde_json::Result<Value> {
        number::encode(spec, NUMERIC_FIELDS, mode)
    }

    /// The gateway keys APIs by `api_id`; the dashboard assigns its own ids.
    fn planned_remote_id(spec: &ApiDefinitionSpec, env: &Environment) -> Option<String> {
        (env.mode() == GatewayMode::Gateway && !spec.api_id.is_empty()).then(|| spec.api_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::ResolvedTarget;
    use crate::model::api::{ExtendedPaths, RoutingTrigger, UrlRewrite, VersionData, VersionInfo};
    use crate::model::{ResourceRef, Target};
    use serde_json::json;

    fn internal(name: &str, path: &str) -> InternalTarget {
        InternalTarget {
            target: Target::new(name),
            path: path.to_string(),
            query: String::new(),
        }
    }

    fn spec_with_rewrites() -> ApiDefinitionSpec {
        let rewrite = UrlRewrite {
            path: "/old".to_string(),
            method: "GET".to_string(),
            match_pattern: "/old".to_string(),
            rewrite_to: String::new(),
            rewrite_to_internal: Some(internal("b", "/new")),
            triggers: vec![RoutingTrigger {
                on: "any".to_string(),
                options: json!({}),
                rewrite_to: String::new(),
                rewrite_to_internal: Some(internal("c", "")),
            }],
        };
        let mut versions = std::collections::BTreeMap::new();
        versions.insert(
            "Default".to_string(),
            VersionInfo {
                name: "Default".to_string(),
                extended_paths: Some(ExtendedPaths {
                    url_rewrites: vec![rewrite],
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let mut spec = ApiDefinitionSpec {
            name: "a".to_string(),
            version_data: Some(VersionData {
                not_versioned: true,
                default_version: "Default".to_string(),
                versions,
            }),
            ..Default::default()
        };
        spec.proxy.target_internal = Some(internal("b", ""));
        spec
    }

    fn address_book(names: &[&str]) -> Addresses {
        let mut addresses = Addresses::default();
        for name in names {
            let id = Identity::new("default", *name);
            addresses.insert(ResolvedTarget {
                target: ResourceRef::new(Kind::ApiDefinition, &id),
                address: id.encoded(),
                label: name.to_string(),
            });
        }
        addresses
    }

    #[test]
    fn test_references_in_document_order() {
        let refs = ApiDefinitions::references(&spec_with_rewrites(), "default").unwrap();
        let names: Vec<_> = refs.iter().map(|r| (r.field, r.to.name.as_str())).collect();
        assert_eq!(
            names,
            vec![
                ("proxy.target_internal", "b"),
                ("url_rewrites.rewrite_to_internal", "b"),
                ("url_rewrites.triggers.rewrite_to_internal", "c"),
            ]
        );
    }

    #[test]
    fn test_rewrite_clears_typed_fields() {
        let spec = spec_with_rewrites();
        let out = ApiDefinitions::rewrite(spec.clone(), "default", &address_book(&["b", "c"])).unwrap();

        let b = Identity::new("default", "b").encoded();
        let c = Identity::new("default", "c").encoded();
        assert_eq!(out.proxy.target_url, format!("tyk://{}", b));
        assert!(out.proxy.target_internal.is_none());

        let rw = &out.version_data.as_ref().unwrap().versions["Default"]
            .extended_paths
            .as_ref()
            .unwrap()
            .url_rewrites[0];
        assert_eq!(rw.rewrite_to, format!("tyk://{}/new", b));
        assert!(rw.rewrite_to_internal.is_none());
        assert_eq!(rw.triggers[0].rewrite_to, format!("tyk://{}", c));
        assert!(rw.triggers[0].rewrite_to_internal.is_none());

        // The input is untouched and a second rewrite yields the same result.
        assert!(spec.proxy.target_internal.is_some());
        let again = ApiDefinitions::rewrite(spec, "default", &address_book(&["b", "c"])).unwrap();
        assert_eq!(again, out);

        let wire = serde_json::to_value(&out).unwrap();
        assert!(!wire.to_string().contains("target_internal"));
        assert!(!wire.to_string().contains("rewrite_to_internal"));
    }

    #[test]
    fn test_rewrite_requires_resolution() {
        let err = ApiDefinitions::rewrite(spec_with_rewrites(), "default", &address_book(&["b"]))
            .unwrap_err();
        assert!(matches!(err, LinkError::Invalid(_)));
    }

    #[test]
    fn test_literal_target_is_not_a_reference() {
        let mut spec = ApiDefinitionSpec {
            name: "a".to_string(),
            ..Default::default()
        };
        spec.proxy.target_url = "http://httpbin.org".to_string();
        assert!(ApiDefinitions::references(&spec, "default").unwrap().is_empty());
        assert!(ApiDefinitions::validate(&spec).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_target() {
        let spec = ApiDefinitionSpec {
            name: "a".to_string(),
            ..Default::default()
        };
        assert!(ApiDefinitions::validate(&spec).unwrap_err().contains("resolves to nothing"));
    }

    #[test]
    fn test_graph_refs_are_exclusive() {
        let mut spec = ApiDefinitionSpec::default();
        spec.graphql = Some(crate::model::api::GraphQlConfig {
            subgraph_ref: Some(Target::new("s")),
            supergraph_ref: Some(Target::new("g")),
            ..Default::default()
        });
        assert!(ApiDefinitions::references(&spec, "default").is_err());
    }

    #[test]
    fn test_prepare_defaults_ids() {
        let mut spec = ApiDefinitionSpec::default();
        let env = Environment {
            org: Some("org1".to_string()),
            ..Default::default()
        };
        let id = Identity::new("default", "a");
        ApiDefinitions::prepare(&mut spec, &id, &env);
        assert_eq!(spec.api_id, id.encoded());
        assert_eq!(spec.org_id, "org1");
    }

    #[test]
    fn test_wire_body_numbers() {
        let mut spec = spec_with_rewrites();
        if let Some(paths) = spec
            .version_data
            .as_mut()
            .and_then(|v| v.versions.get_mut("Default"))
            .and_then(|v| v.extended_paths.as_mut())
        {
            paths.circuit_breakers.push(crate::model::api::CircuitBreaker {
                path: "/x".to_string(),
                method: "GET".to_string(),
                threshold_percent: crate::model::Float64::new("0.5"),
                samples: 10,
                return_to_service_after: 60,
            });
        }
        let wire = ApiDefinitions::wire_body(&spec, NumberMode::Number).unwrap();
        assert_eq!(
            wire["version_data"]["versions"]["Default"]["extended_paths"]["circuit_breakers"][0]["threshold_percent"],
            json!(0.5)
        );
        let stored = ApiDefinitions::wire_body(&spec, NumberMode::String).unwrap();
        assert_eq!(
            stored["version_data"]["versions"]["Default"]["extended_paths"]["circuit_breakers"][0]["threshold_percent"],
            json!("0.5")
        );
    }
}
