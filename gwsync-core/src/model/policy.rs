//! Access-control policy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::Target;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityPolicySpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org_id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// Access rights as authored, each entry naming a managed API.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_rights_array: Vec<AccessDefinition>,
    /// Access rights keyed by remote API id, built from `access_rights_array`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub access_rights: BTreeMap<String, AccessRight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Target>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccessDefinition {
    /// Managed API this entry grants access to. Cleared after resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

/// Entry of the remote `access_rights` map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccessRight {
    pub api_id: String,
    pub api_name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

impl SecurityPolicySpec {
    /// Rebuilds `access_rights` from the resolved `access_rights_array`.
    pub fn rebuild_access_rights(&mut self) {
        self.access_rights = self
            .access_rights_array
            .iter()
            .filter(|a| !a.api_id.is_empty())
            .map(|a| {
                (
                    a.api_id.clone(),
                    AccessRight {
                        api_id: a.api_id.clone(),
                        api_name: a.api_name.clone(),
                        versions: a.versions.clone(),
                    },
                )
            })
            .collect();
    }
}
