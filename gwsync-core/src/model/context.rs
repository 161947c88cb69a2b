//! Operator context: a per-tenant control-plane environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperatorContextSpec {
    #[serde(default)]
    pub env: Environment,
}

/// Which control-plane flavor a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// Single-tenant gateway admin API.
    #[default]
    #[serde(alias = "ce", alias = "oss")]
    Gateway,
    /// Multi-tenant dashboard API.
    #[serde(alias = "pro")]
    Dashboard,
}

impl FromStr for GatewayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gateway" | "ce" | "oss" => Ok(GatewayMode::Gateway),
            "dashboard" | "pro" => Ok(GatewayMode::Dashboard),
            other => Err(format!("unknown mode {:?}, expected gateway or dashboard", other)),
        }
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayMode::Gateway => f.write_str("gateway"),
            GatewayMode::Dashboard => f.write_str("dashboard"),
        }
    }
}

/// Connection settings for a control plane. Unset fields inherit from the
/// process-wide environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GatewayMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,
}

impl Environment {
    /// Fields set in `overrides` win, the rest come from `self`.
    pub fn merged_with(&self, overrides: &Environment) -> Environment {
        Environment {
            mode: overrides.mode.or(self.mode),
            url: overrides.url.clone().or_else(|| self.url.clone()),
            auth: overrides.auth.clone().or_else(|| self.auth.clone()),
            org: overrides.org.clone().or_else(|| self.org.clone()),
            insecure_skip_verify: overrides.insecure_skip_verify.or(self.insecure_skip_verify),
        }
    }

    pub fn mode(&self) -> GatewayMode {
        self.mode.unwrap_or_default()
    }

    pub fn org(&self) -> &str {
        self.org.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_aliases() {
        assert_eq!("pro".parse::<GatewayMode>(), Ok(GatewayMode::Dashboard));
        assert_eq!("CE".parse::<GatewayMode>(), Ok(GatewayMode::Gateway));
        let m: GatewayMode = serde_json::from_str("\"oss\"").unwrap();
        assert_eq!(m, GatewayMode::Gateway);
    }

    #[test]
    fn test_environment_merge() {
        let base = Environment {
            mode: Some(GatewayMode::Gateway),
            url: Some("http://gw:8080".to_string()),
            auth: Some("secret".to_string()),
            org: None,
            insecure_skip_verify: Some(false),
        };
        let overrides = Environment {
            mode: Some(GatewayMode::Dashboard),
            url: Some("http://dash:3000".to_string()),
            org: Some("org1".to_string()),
            ..Default::default()
        };
        let merged = base.merged_with(&overrides);
        assert_eq!(merged.mode(), GatewayMode::Dashboard);
        assert_eq!(merged.url.as_deref(), Some("http://dash:3000"));
        assert_eq!(merged.auth.as_deref(), Some("secret"));
        assert_eq!(merged.org(), "org1");
        assert_eq!(merged.insecure_skip_verify, Some(false));
    }
}
