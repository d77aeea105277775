//! Endpoint, cluster-ID, and region handling for DSQL hostnames

use std::sync::OnceLock;

use regex::Regex;

use dsqlink_core::{Error, Result};


/// Matches `cluster.dsql.us-east-1.on.aws` and suffixed variants like
/// `cluster.dsql-gamma.us-east-1.on.aws`, capturing the region.
fn region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\.dsql[^.]*\.([^.]+)\.on\.aws$").expect("region pattern is valid")
    })
}

/// DSQL cluster IDs are 26 lowercase alphanumeric characters.
fn cluster_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]{26}$").expect("cluster id pattern is valid"))
}

/// Extract the AWS region from a DSQL hostname.
pub fn parse_region(host: &str) -> Result<String> {
    if host.is_empty() {
        return Err(Error::Configuration(
            "hostname is required to parse region".into(),
        ));
    }

    region_pattern()
        .captures(host)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            Error::Configuration(format!("unable to parse region from hostname: '{}'", host))
        })
}

/// Whether the host string is a bare cluster ID rather than a full hostname.
pub fn is_cluster_id(host: &str) -> bool {
    if host.is_empty() || host.contains('.') {
        return false;
    }
    cluster_id_pattern().is_match(host)
}

/// Build a full DSQL hostname from a cluster ID and region.
pub fn build_hostname(cluster_id: &str, region: &str) -> String {
    format!("{}.dsql.{}.on.aws", cluster_id, region)
}

/// Region from the environment: `AWS_REGION`, then `AWS_DEFAULT_REGION`.
pub(crate) fn region_from_env() -> Option<String> {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
}
