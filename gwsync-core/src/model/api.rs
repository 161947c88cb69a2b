//! Routed-API definition.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{Float64, Target};

/// Desired state of an API definition.
///
/// Only the fields that carry references or numeric strings are typed, the
/// rest of the payload is passed through to the control plane untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiDefinitionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org_id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub proxy: Proxy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_data: Option<VersionData>,
    /// Certificate bindings, resolved into `certificates`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_refs: Vec<Target>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphql: Option<GraphQlConfig>,
    /// Operator context whose environment this API is pushed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Target>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Proxy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub listen_path: String,
    #[serde(default)]
    pub target_url: String,
    /// Upstream is another managed API. Takes precedence over `target_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_internal: Option<InternalTarget>,
    #[serde(default)]
    pub strip_listen_path: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reference to another API plus the path and query appended to its address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InternalTarget {
    pub target: Target,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
}

impl InternalTarget {
    /// Appends path and query to the referenced API's base address.
    pub fn address(&self, base: &str) -> String {
        let mut out = String::from(base);
        if !self.path.is_empty() {
            if !self.path.starts_with('/') {
                out.push('/');
            }
            out.push_str(&self.path);
        }
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(self.query.trim_start_matches('?'));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionData {
    #[serde(default)]
    pub not_versioned: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_version: String,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionInfo>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_paths: Option<ExtendedPaths>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtendedPaths {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url_rewrites: Vec<UrlRewrite>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub circuit_breakers: Vec<CircuitBreaker>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UrlRewrite {
    pub path: String,
    pub method: String,
    pub match_pattern: String,
    #[serde(default)]
    pub rewrite_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_to_internal: Option<InternalTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<RoutingTrigger>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutingTrigger {
    pub on: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub rewrite_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_to_internal: Option<InternalTarget>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub path: String,
    pub method: String,
    pub threshold_percent: Float64,
    #[serde(default)]
    pub samples: i64,
    #[serde(default)]
    pub return_to_service_after: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphQlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub execution_mode: String,
    #[serde(default)]
    pub schema: String,
    /// Schema comes from a subgraph resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph_ref: Option<Target>,
    /// Schema comes from a supergraph resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supergraph_ref: Option<Target>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Object keys holding numeric strings in API payloads.
pub const NUMERIC_FIELDS: &[&str] = &["threshold_percent"];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_internal_target_address() {
        let t = InternalTarget {
            target: Target::new("a"),
            path: "users".to_string(),
            query: "?page=1".to_string(),
        };
        assert_eq!(t.address("tyk://abc"), "tyk://abc/users?page=1");

        let t = InternalTarget {
            target: Target::new("a"),
            path: String::new(),
            query: String::new(),
        };
        assert_eq!(t.address("tyk://abc"), "tyk://abc");
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let spec: ApiDefinitionSpec = serde_json::from_value(json!({
            "name": "httpbin",
            "protocol": "http",
            "proxy": {"listen_path": "/httpbin", "target_url": "http://httpbin.org", "preserve_host_header": true}
        }))
        .unwrap();
        assert_eq!(spec.extra["protocol"], json!("http"));
        assert_eq!(spec.proxy.extra["preserve_host_header"], json!(true));

        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["protocol"], json!("http"));
        assert!(back.get("context").is_none());
    }
}
