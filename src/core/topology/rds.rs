// src/core/topology/rds.rs

//! Endpoint analysis for managed cluster DNS names: distinguishing writer
//! cluster, reader cluster, custom cluster, proxy, and instance endpoints,
//! and deriving the canonical cluster id and the instance endpoint template.

use once_cell::sync::Lazy;
use regex::Regex;

/// What kind of endpoint a hostname is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdsUrlType {
    ClusterWriter,
    ClusterReader,
    CustomCluster,
    Proxy,
    Instance,
    NotRds,
}

impl RdsUrlType {
    pub fn is_cluster_dns(self) -> bool {
        matches!(self, RdsUrlType::ClusterWriter | RdsUrlType::ClusterReader)
    }
}

static CLUSTER_DNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<name>[a-z0-9-]+)\.(?P<marker>cluster-|cluster-ro-|cluster-custom-)(?P<suffix>[a-z0-9]+)\.(?P<region>[a-z0-9-]+)\.rds\.amazonaws\.com$",
    )
    .expect("static regex")
});

static PROXY_DNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9-]+\.proxy-[a-z0-9]+\.[a-z0-9-]+\.rds\.amazonaws\.com$")
        .expect("static regex")
});

static INSTANCE_DNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9-]+\.[a-z0-9]+\.[a-z0-9-]+\.rds\.amazonaws\.com$")
        .expect("static regex")
});

static GREEN_NODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<base>[a-z0-9-]+)-green-[a-z0-9]{6}(?P<rest>\..+)$").expect("static regex")
});

pub fn analyze(host: &str) -> RdsUrlType {
    if let Some(caps) = CLUSTER_DNS.captures(host) {
        return match &caps["marker"] {
            "cluster-" => RdsUrlType::ClusterWriter,
            "cluster-ro-" => RdsUrlType::ClusterReader,
            _ => RdsUrlType::CustomCluster,
        };
    }
    if PROXY_DNS.is_match(host) {
        return RdsUrlType::Proxy;
    }
    if INSTANCE_DNS.is_match(host) {
        return RdsUrlType::Instance;
    }
    RdsUrlType::NotRds
}

/// The canonical cluster id for a cluster DNS name: the writer form of the
/// endpoint, so sibling connections through the reader endpoint share the
/// same cache slot.
pub fn cluster_id_from_host(host: &str) -> Option<String> {
    let caps = CLUSTER_DNS.captures(host)?;
    if &caps["marker"] == "cluster-custom-" {
        return None;
    }
    Some(format!(
        "{}.cluster-{}.{}.rds.amazonaws.com",
        &caps["name"], &caps["suffix"], &caps["region"]
    ))
}

/// Derives the instance endpoint template (`?` marks the instance id slot)
/// from a cluster DNS name.
pub fn instance_template_from_host(host: &str) -> Option<String> {
    let caps = CLUSTER_DNS.captures(host)?;
    Some(format!(
        "?.{}.{}.rds.amazonaws.com",
        &caps["suffix"], &caps["region"]
    ))
}

/// Expands an instance endpoint template for one instance id.
pub fn expand_instance_template(template: &str, host_id: &str) -> String {
    template.replace('?', host_id)
}

static ANY_RDS_DNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(?P<region>[a-z0-9-]+)\.rds\.amazonaws\.com$").expect("static regex")
});

/// Extracts the region segment from any managed endpoint.
pub fn region_from_host(host: &str) -> Option<String> {
    let caps = ANY_RDS_DNS.captures(host)?;
    Some(caps["region"].to_ascii_lowercase())
}

/// True when the hostname carries a blue/green deployment "green" suffix.
pub fn is_green_node(host: &str) -> bool {
    GREEN_NODE.is_match(host)
}

/// Removes the green suffix, recovering the original blue endpoint.
pub fn strip_green_suffix(host: &str) -> Option<String> {
    let caps = GREEN_NODE.captures(host)?;
    Some(format!("{}{}", &caps["base"], &caps["rest"]))
}
