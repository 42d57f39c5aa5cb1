//! Tenant creation.
//!
//! A tenant is created in a fixed order: namespace, kubeconfig secret, API
//! server pod, controller manager pod. Every object created along the way is
//! remembered so that a later failure can delete them again, newest first.

use tracing::{info, instrument, warn};

use crate::{
    allocator::{Allocation, Allocator},
    cluster::TenantCluster,
    kubeconfig::{self, HostCredentials},
    templates, Error, Result, TenantId,
};

pub const DEFAULT_CONTROL_PLANE_POD: &str = "kube-apiserver-kind-control-plane";
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "kube-system";
pub const MAX_ALLOCATION_ATTEMPTS: usize = 8;

#[derive(Clone, Debug)]
pub struct ProvisionConfig {
    /// Existing API server pod whose host IP the tenant API server binds to.
    pub control_plane_pod: String,
    pub system_namespace: String,
    /// Leave already-created objects in place when a later step fails.
    pub keep_on_failure: bool,
    pub max_allocation_attempts: usize,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            control_plane_pod: DEFAULT_CONTROL_PLANE_POD.to_string(),
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            keep_on_failure: false,
            max_allocation_attempts: MAX_ALLOCATION_ATTEMPTS,
        }
    }
}

/// What a successful creation produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedTenant {
    pub id: TenantId,
    pub namespace: String,
    pub kubeconfig_secret: String,
    pub api_server: String,
    pub controller_manager: String,
    pub server_url: String,
    pub api_server_port: u16,
    pub controller_manager_port: u16,
}

/// An object created during provisioning, in the form needed to delete it.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Created {
    Namespace(String),
    Secret { namespace: String, name: String },
    Pod { namespace: String, name: String },
}

impl Created {
    async fn delete<C: TenantCluster + ?Sized>(&self, cluster: &C) -> Result<()> {
        match self {
            Self::Namespace(name) => cluster.delete_namespace(name).await,
            Self::Secret { namespace, name } => cluster.delete_secret(namespace, name).await,
            Self::Pod { namespace, name } => cluster.delete_pod(namespace, name).await,
        }
    }
}

impl std::fmt::Display for Created {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Namespace(name) => write!(f, "namespace/{name}"),
            Self::Secret { namespace, name } => write!(f, "secret {namespace}/{name}"),
            Self::Pod { namespace, name } => write!(f, "pod {namespace}/{name}"),
        }
    }
}

pub struct Provisioner<'a, C: ?Sized> {
    cluster: &'a C,
    credentials: HostCredentials,
    config: ProvisionConfig,
}

impl<'a, C: TenantCluster + ?Sized> Provisioner<'a, C> {
    pub fn new(cluster: &'a C, credentials: HostCredentials, config: ProvisionConfig) -> Self {
        Self {
            cluster,
            credentials,
            config,
        }
    }

    /// Create one tenant control plane.
    ///
    /// On failure every object this call created is deleted again (unless
    /// `keep_on_failure` is set) and the first error is returned.
    pub async fn create(&self, allocator: &mut dyn Allocator) -> Result<ProvisionedTenant> {
        let allocation = self.allocate(allocator).await?;
        let mut created = Vec::new();

        match self.create_objects(&allocation, &mut created).await {
            Ok(tenant) => Ok(tenant),
            Err(error) => {
                if self.config.keep_on_failure {
                    for object in &created {
                        warn!(%object, "Leaving object from failed tenant creation");
                    }
                } else {
                    self.rollback(created).await;
                }
                Err(error)
            }
        }
    }

    /// Draw allocations until one names a namespace that does not exist yet.
    async fn allocate(&self, allocator: &mut dyn Allocator) -> Result<Allocation> {
        for attempt in 1..=self.config.max_allocation_attempts {
            let allocation = allocator.allocate();
            let namespace = allocation.id.namespace();
            if !self.cluster.namespace_exists(&namespace).await? {
                return Ok(allocation);
            }
            warn!(%namespace, attempt, "Tenant identifier already in use, drawing another");
        }
        Err(Error::AllocationExhausted(self.config.max_allocation_attempts))
    }

    #[instrument(skip_all, fields(tenant = %allocation.id))]
    async fn create_objects(
        &self,
        allocation: &Allocation,
        created: &mut Vec<Created>,
    ) -> Result<ProvisionedTenant> {
        let id = &allocation.id;
        let namespace = id.namespace();

        info!(%namespace, "Creating tenant namespace");
        self.cluster
            .create_namespace(&templates::namespace(id))
            .await?;
        created.push(Created::Namespace(namespace.clone()));

        let host_ip = self.control_plane_host_ip().await?;
        let server_url = kubeconfig::server_url(&host_ip, allocation.api_server_port);

        let secret_name = id.kubeconfig_secret_name();
        info!(
            %namespace,
            secret = %secret_name,
            server = %server_url,
            "Creating tenant kubeconfig secret"
        );
        let document = kubeconfig::for_tenant(id, server_url.clone(), &self.credentials).to_yaml()?;
        self.cluster
            .create_secret(&templates::kubeconfig_secret(id, document))
            .await?;
        created.push(Created::Secret {
            namespace: namespace.clone(),
            name: secret_name.clone(),
        });

        let api_server = id.api_server_name();
        info!(
            %namespace,
            pod = %api_server,
            port = allocation.api_server_port,
            "Creating tenant API server"
        );
        self.cluster
            .create_pod(&templates::api_server(id, allocation.api_server_port))
            .await?;
        created.push(Created::Pod {
            namespace: namespace.clone(),
            name: api_server.clone(),
        });

        let controller_manager = id.controller_manager_name();
        info!(
            %namespace,
            pod = %controller_manager,
            port = allocation.controller_manager_port,
            "Creating tenant controller manager"
        );
        self.cluster
            .create_pod(&templates::controller_manager(
                id,
                allocation.controller_manager_port,
            ))
            .await?;
        created.push(Created::Pod {
            namespace: namespace.clone(),
            name: controller_manager.clone(),
        });

        Ok(ProvisionedTenant {
            id: id.clone(),
            namespace,
            kubeconfig_secret: secret_name,
            api_server,
            controller_manager,
            server_url,
            api_server_port: allocation.api_server_port,
            controller_manager_port: allocation.controller_manager_port,
        })
    }

    async fn control_plane_host_ip(&self) -> Result<String> {
        let ProvisionConfig {
            control_plane_pod,
            system_namespace,
            ..
        } = &self.config;
        let pod = self
            .cluster
            .get_pod(system_namespace, control_plane_pod)
            .await?;
        pod.status
            .and_then(|status| status.host_ip)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                Error::missing_field(
                    format!("pod {system_namespace}/{control_plane_pod}"),
                    ".status.hostIP",
                )
            })
    }

    /// Delete created objects newest first. Failures are logged and skipped so
    /// the caller still sees the error that triggered the rollback.
    async fn rollback(&self, created: Vec<Created>) {
        for object in created.into_iter().rev() {
            match object.delete(self.cluster).await {
                Ok(()) => info!(%object, "Rolled back"),
                Err(error) if error.is_not_found() => {}
                Err(error) => warn!(%object, %error, "Failed to roll back, delete it manually"),
            }
        }
    }
}
