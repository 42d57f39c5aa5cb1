pub mod allocator;
pub mod cluster;
pub mod error;
pub mod inventory;
pub mod kubeconfig;
pub mod provision;
pub mod templates;
pub mod tenant;

pub use allocator::{Allocation, Allocator, RandomAllocator};
pub use cluster::{KubeCluster, TenantCluster};
pub use error::{Error, Result};
pub use inventory::{fetch_kubeconfig, list_tenants, render_table, TenantDescriptor};
pub use kubeconfig::{HostCredentials, Kubeconfig};
pub use provision::{ProvisionConfig, ProvisionedTenant, Provisioner};
pub use tenant::TenantId;
