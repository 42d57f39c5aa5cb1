//! Access to the host cluster.
//!
//! The workflows only see [`TenantCluster`]; [`KubeCluster`] implements it
//! with a `kube::Client`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client, ResourceExt,
};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Operations the tenant workflows issue against the host cluster.
///
/// Every error is classified through [`Error::from_kube`], so callers can
/// tell a missing object from a conflict or a transport failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantCluster: Send + Sync {
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn create_pod(&self, pod: &Pod) -> Result<()>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Pods in every namespace carrying `label` (any value).
    async fn list_pods_with_label(&self, label: &str) -> Result<Vec<Pod>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// Secrets in every namespace carrying `label` (any value).
    async fn list_secrets_with_label(&self, label: &str) -> Result<Vec<Secret>>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_namespace<K: kube::Resource>(obj: &K) -> Result<String> {
    obj.namespace()
        .ok_or_else(|| Error::missing_field(obj.name_any(), ".metadata.namespace"))
}

#[async_trait]
impl TenantCluster for KubeCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api = Api::<Namespace>::all(self.client.clone());
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube("Namespace", name, e))?;
        Ok(found.is_some())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        let name = namespace.name_any();
        let api = Api::<Namespace>::all(self.client.clone());
        api.create(&PostParams::default(), namespace)
            .await
            .map_err(|e| Error::from_kube("Namespace", &name, e))?;
        debug!(%name, "Created namespace");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api = Api::<Namespace>::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube("Namespace", name, e))?;
        debug!(%name, "Deleted namespace");
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube("Pod", format!("{namespace}/{name}"), e))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        let name = pod.name_any();
        let namespace = object_namespace(pod)?;
        self.pods(&namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| Error::from_kube("Pod", format!("{namespace}/{name}"), e))?;
        debug!(%namespace, %name, "Created pod");
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube("Pod", format!("{namespace}/{name}"), e))?;
        debug!(%namespace, %name, "Deleted pod");
        Ok(())
    }

    async fn list_pods_with_label(&self, label: &str) -> Result<Vec<Pod>> {
        let pods = Api::<Pod>::all(self.client.clone())
            .list(&ListParams::default().labels(label))
            .await
            .map_err(|e| Error::from_kube("Pod", format!("label {label}"), e))?;
        Ok(pods.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secrets(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube("Secret", format!("{namespace}/{name}"), e))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let name = secret.name_any();
        let namespace = object_namespace(secret)?;
        self.secrets(&namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| Error::from_kube("Secret", format!("{namespace}/{name}"), e))?;
        debug!(%namespace, %name, "Created secret");
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube("Secret", format!("{namespace}/{name}"), e))?;
        debug!(%namespace, %name, "Deleted secret");
        Ok(())
    }

    async fn list_secrets_with_label(&self, label: &str) -> Result<Vec<Secret>> {
        let secrets = Api::<Secret>::all(self.client.clone())
            .list(&ListParams::default().labels(label))
            .await
            .map_err(|e| Error::from_kube("Secret", format!("label {label}"), e))?;
        Ok(secrets.items)
    }
}
