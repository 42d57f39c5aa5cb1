use std::{cmp::Ordering, fmt, str::FromStr};

use crate::Error;

pub const API_SERVER_PREFIX: &str = "tenant-kube-apiserver";
pub const CONTROLLER_MANAGER_PREFIX: &str = "tenant-kube-controller-manager";
pub const KUBECONFIG_SECRET_PREFIX: &str = "tenant-kubeconfig";
pub const NAMESPACE_PREFIX: &str = "kube-tenant";

/// Label carried by a tenant's API server pod and kubeconfig secret.
pub const API_SERVER_LABEL: &str = "kindred.crds.dev/tenant-api-server";
/// Label carried by a tenant's controller manager pod.
pub const CONTROLLER_MANAGER_LABEL: &str = "kindred.crds.dev/tenant-controller-manager";

/// Secret data key holding the serialized tenant kubeconfig.
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Identifies every object belonging to one tenant control plane.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    pub fn from_number(n: u32) -> Self {
        Self(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> String {
        format!("{NAMESPACE_PREFIX}-{}", self.0)
    }

    pub fn api_server_name(&self) -> String {
        format!("{API_SERVER_PREFIX}-{}", self.0)
    }

    pub fn controller_manager_name(&self) -> String {
        format!("{CONTROLLER_MANAGER_PREFIX}-{}", self.0)
    }

    pub fn kubeconfig_secret_name(&self) -> String {
        format!("{KUBECONFIG_SECRET_PREFIX}-{}", self.0)
    }

    /// Key prefix isolating this tenant's objects in the shared etcd.
    pub fn etcd_prefix(&self) -> String {
        format!("/tenant-{}/", self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidTenantId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

// Numeric order; identifiers are digit strings of any length.
impl Ord for TenantId {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.trim_start_matches('0');
        let b = other.0.trim_start_matches('0');
        a.len()
            .cmp(&b.len())
            .then_with(|| a.cmp(b))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TenantId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
