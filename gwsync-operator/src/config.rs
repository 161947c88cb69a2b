//! Command-line and environment configuration.

use clap::{ArgAction, Parser, builder::FalseyValueParser};
use std::time::Duration;

use gwsync_core::{Environment, GatewayMode, RetryPolicy};

use crate::controller::ControllerConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "gwsync-operator")]
#[command(about = "gwsync operator - keeps gateway control planes in sync with declared resources")]
pub struct Args {
    /// Control plane flavor: gateway (ce, oss) or dashboard (pro)
    #[arg(long, env = "TYK_MODE", default_value = "gateway")]
    pub mode: GatewayMode,

    /// Control plane base URL
    #[arg(long, env = "TYK_URL")]
    pub url: Option<String>,

    /// Control plane secret or API key
    #[arg(long, env = "TYK_AUTH", hide_env_values = true)]
    pub auth: Option<String>,

    /// Organization id
    #[arg(long, env = "TYK_ORG")]
    pub org: Option<String>,

    /// Skip TLS certificate verification towards the control plane
    #[arg(
        long,
        env = "TYK_TLS_INSECURE_SKIP_VERIFY",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub insecure_skip_verify: bool,

    /// Only reconcile resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Listen address for the REST API
    #[arg(short, long, default_value = "[::]:8080")]
    pub listen: String,

    /// Initial delay before retrying a failed reconcile
    #[arg(long, default_value_t = 5)]
    pub requeue_base_secs: u64,

    /// Upper bound of the retry delay
    #[arg(long, default_value_t = 300)]
    pub requeue_max_secs: u64,

    /// Concurrent reconciles
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Re-reconcile every resource at this interval (disabled when unset)
    #[arg(long)]
    pub resync_secs: Option<u64>,
}

impl Args {
    /// Process-wide control plane environment. Context resources override it field by field.
    pub fn environment(&self) -> Environment {
        Environment {
            mode: Some(self.mode),
            url: self.url.clone().filter(|u| !u.is_empty()),
            auth: self.auth.clone(),
            org: self.org.clone(),
            insecure_skip_verify: Some(self.insecure_skip_verify),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_secs(self.requeue_base_secs.max(1));
        RetryPolicy {
            base,
            max: Duration::from_secs(self.requeue_max_secs).max(base),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers.max(1),
            namespace: self.watch_namespace.clone().filter(|ns| !ns.is_empty()),
            resync: self.resync_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("gwsync-operator").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_mode_aliases() {
        assert_eq!(parse(&["--mode", "pro"]).mode, GatewayMode::Dashboard);
        assert_eq!(parse(&["--mode", "ce"]).mode, GatewayMode::Gateway);
        assert_eq!(parse(&["--mode", "oss"]).mode, GatewayMode::Gateway);
        assert!(
            Args::try_parse_from(["gwsync-operator", "--mode", "enterprise"]).is_err()
        );
    }

    #[test]
    fn test_environment_from_flags() {
        let args = parse(&[
            "--mode",
            "dashboard",
            "--url",
            "http://dash:3000",
            "--auth",
            "key",
            "--org",
            "org1",
            "--insecure-skip-verify",
        ]);
        let env = args.environment();
        assert_eq!(env.mode(), GatewayMode::Dashboard);
        assert_eq!(env.url.as_deref(), Some("http://dash:3000"));
        assert_eq!(env.auth.as_deref(), Some("key"));
        assert_eq!(env.org(), "org1");
        assert_eq!(env.insecure_skip_verify, Some(true));
    }

    #[test]
    fn test_retry_policy_bounds() {
        let policy = parse(&["--requeue-base-secs", "10", "--requeue-max-secs", "2"]).retry_policy();
        assert_eq!(policy.base, Duration::from_secs(10));
        assert_eq!(policy.max, Duration::from_secs(10));

        let policy = parse(&["--requeue-base-secs", "0"]).retry_policy();
        assert_eq!(policy.base, Duration::from_secs(1));
        assert_eq!(policy.max, Duration::from_secs(300));
    }

    #[test]
    fn test_controller_config() {
        let config = parse(&["--workers", "0", "--watch-namespace", "", "--resync-secs", "60"])
            .controller_config();
        assert_eq!(config.workers, 1);
        assert_eq!(config.namespace, None);
        assert_eq!(config.resync, Some(Duration::from_secs(60)));
    }
}
