//! Read-only views of existing tenants.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::debug;

use crate::{
    cluster::TenantCluster,
    tenant::{API_SERVER_LABEL, CONTROLLER_MANAGER_LABEL, KUBECONFIG_KEY},
    Error, Result, TenantId,
};

pub const NO_TENANTS: &str = "No tenant instances found.";
const MISSING: &str = "<missing>";

/// Everything found in the cluster for one tenant identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantDescriptor {
    pub id: TenantId,
    pub namespace: String,
    pub api_server: String,
    pub controller_manager: Option<String>,
    pub kubeconfig_secret: Option<String>,
}

/// List tenants, one per identifier labeled on an API server pod.
///
/// Controller managers and kubeconfig secrets are looked up by their own
/// labels and matched on identifier and namespace, so a tenant missing one
/// of them shows up as incomplete instead of being reported as whole.
pub async fn list_tenants<C>(cluster: &C) -> Result<Vec<TenantDescriptor>>
where
    C: TenantCluster + ?Sized,
{
    let api_servers = cluster.list_pods_with_label(API_SERVER_LABEL).await?;
    let managers = cluster
        .list_pods_with_label(CONTROLLER_MANAGER_LABEL)
        .await?;
    let secrets = cluster.list_secrets_with_label(API_SERVER_LABEL).await?;

    let managers = index_by_tenant(managers.iter(), CONTROLLER_MANAGER_LABEL);
    let secrets = index_by_tenant(secrets.iter(), API_SERVER_LABEL);

    let mut tenants = BTreeMap::new();
    for pod in &api_servers {
        let Some(id) = tenant_label(pod, API_SERVER_LABEL) else {
            continue;
        };
        let namespace = pod.namespace().unwrap_or_default();
        let key = (id.clone(), namespace.clone());
        tenants.entry(id.clone()).or_insert_with(|| TenantDescriptor {
            id,
            namespace,
            api_server: pod.name_any(),
            controller_manager: managers.get(&key).cloned(),
            kubeconfig_secret: secrets.get(&key).cloned(),
        });
    }
    debug!(count = tenants.len(), "Listed tenants");

    Ok(tenants.into_values().collect())
}

/// Fetch the kubeconfig stored for `id`, exactly as it was written.
pub async fn fetch_kubeconfig<C>(cluster: &C, id: &TenantId) -> Result<Vec<u8>>
where
    C: TenantCluster + ?Sized,
{
    let namespace = id.namespace();
    let name = id.kubeconfig_secret_name();
    let secret = cluster.get_secret(&namespace, &name).await?;
    secret
        .data
        .and_then(|mut data| data.remove(KUBECONFIG_KEY))
        .map(|bytes| bytes.0)
        .ok_or_else(|| {
            Error::missing_field(format!("secret {namespace}/{name}"), ".data.kubeconfig")
        })
}

/// Render tenants as an aligned table, or the empty-inventory message.
pub fn render_table(tenants: &[TenantDescriptor]) -> String {
    if tenants.is_empty() {
        return format!("{NO_TENANTS}\n");
    }

    let headers = ["ID", "NAMESPACE", "API SERVER", "CONTROLLER MANAGER", "KUBECONFIG"];
    let rows: Vec<[&str; 5]> = tenants
        .iter()
        .map(|t| {
            [
                t.id.as_str(),
                t.namespace.as_str(),
                t.api_server.as_str(),
                t.controller_manager.as_deref().unwrap_or(MISSING),
                t.kubeconfig_secret.as_deref().unwrap_or(MISSING),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&headers).chain(&rows) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

fn tenant_label<K: kube::Resource>(obj: &K, label: &str) -> Option<TenantId> {
    let value = obj.labels().get(label)?;
    match value.parse() {
        Ok(id) => Some(id),
        Err(error) => {
            debug!(name = %obj.name_any(), %error, "Ignoring object with malformed tenant label");
            None
        }
    }
}

fn index_by_tenant<'a, K, I>(objects: I, label: &str) -> BTreeMap<(TenantId, String), String>
where
    K: kube::Resource + 'a,
    I: Iterator<Item = &'a K>,
{
    let mut index = BTreeMap::new();
    for obj in objects {
        let Some(id) = tenant_label(obj, label) else {
            continue;
        };
        index
            .entry((id, obj.namespace().unwrap_or_default()))
            .or_insert_with(|| obj.name_any());
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockTenantCluster;
    use k8s_openapi::{
        api::core::v1::{Pod, Secret},
        ByteString,
    };
    use kube::api::ObjectMeta;

    fn meta(namespace: &str, name: &str, label: &str, id: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(label.to_string(), id.to_string())])),
            ..Default::default()
        }
    }

    fn pod(namespace: &str, name: &str, label: &str, id: &str) -> Pod {
        Pod {
            metadata: meta(namespace, name, label, id),
            ..Default::default()
        }
    }

    fn secret(namespace: &str, name: &str, id: &str) -> Secret {
        Secret {
            metadata: meta(namespace, name, API_SERVER_LABEL, id),
            ..Default::default()
        }
    }

    fn cluster_with(pods: Vec<Pod>, managers: Vec<Pod>, secrets: Vec<Secret>) -> MockTenantCluster {
        let mut cluster = MockTenantCluster::new();
        cluster
            .expect_list_pods_with_label()
            .withf(|label: &str| label == API_SERVER_LABEL)
            .returning(move |_| Ok(pods.clone()));
        cluster
            .expect_list_pods_with_label()
            .withf(|label: &str| label == CONTROLLER_MANAGER_LABEL)
            .returning(move |_| Ok(managers.clone()));
        cluster
            .expect_list_secrets_with_label()
            .returning(move |_| Ok(secrets.clone()));
        cluster
    }

    #[tokio::test]
    async fn aggregates_each_tenant_from_direct_queries() {
        let cluster = cluster_with(
            vec![
                pod("kube-tenant-2", "tenant-kube-apiserver-2", API_SERVER_LABEL, "2"),
                pod("kube-tenant-10", "tenant-kube-apiserver-10", API_SERVER_LABEL, "10"),
            ],
            vec![pod(
                "kube-tenant-2",
                "tenant-kube-controller-manager-2",
                CONTROLLER_MANAGER_LABEL,
                "2",
            )],
            vec![
                secret("kube-tenant-2", "tenant-kubeconfig-2", "2"),
                secret("kube-tenant-10", "tenant-kubeconfig-10", "10"),
            ],
        );

        let tenants = list_tenants(&cluster).await.unwrap();
        let ids: Vec<&str> = tenants.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["2", "10"]);

        let ten = tenants.iter().find(|t| t.id.as_str() == "10").unwrap();
        assert_eq!(ten.namespace, "kube-tenant-10");
        assert_eq!(ten.controller_manager, None);
        assert_eq!(ten.kubeconfig_secret.as_deref(), Some("tenant-kubeconfig-10"));

        let two = tenants.iter().find(|t| t.id.as_str() == "2").unwrap();
        assert_eq!(
            two.controller_manager.as_deref(),
            Some("tenant-kube-controller-manager-2")
        );
    }

    #[tokio::test]
    async fn one_row_per_distinct_identifier() {
        let cluster = cluster_with(
            vec![
                pod("kube-tenant-4", "tenant-kube-apiserver-4", API_SERVER_LABEL, "4"),
                pod("elsewhere", "copy-of-apiserver-4", API_SERVER_LABEL, "4"),
                pod("kube-tenant-6", "not-a-tenant", API_SERVER_LABEL, "six"),
            ],
            vec![],
            vec![],
        );

        let tenants = list_tenants(&cluster).await.unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].id.as_str(), "4");
    }

    #[tokio::test]
    async fn secrets_in_other_namespaces_do_not_count() {
        let cluster = cluster_with(
            vec![pod("kube-tenant-4", "tenant-kube-apiserver-4", API_SERVER_LABEL, "4")],
            vec![],
            vec![secret("default", "tenant-kubeconfig-4", "4")],
        );

        let tenants = list_tenants(&cluster).await.unwrap();
        assert_eq!(tenants[0].kubeconfig_secret, None);
    }

    #[tokio::test]
    async fn empty_cluster_renders_sentinel() {
        let cluster = cluster_with(vec![], vec![], vec![]);
        let tenants = list_tenants(&cluster).await.unwrap();
        assert!(tenants.is_empty());
        assert_eq!(render_table(&tenants), "No tenant instances found.\n");
    }

    #[test]
    fn renders_aligned_table() {
        let tenants = vec![TenantDescriptor {
            id: TenantId::from_number(7),
            namespace: "kube-tenant-7".into(),
            api_server: "tenant-kube-apiserver-7".into(),
            controller_manager: None,
            kubeconfig_secret: Some("tenant-kubeconfig-7".into()),
        }];
        let table = render_table(&tenants);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID  NAMESPACE      API SERVER"));
        assert!(lines[1].contains("<missing>"));
        assert!(lines[1].ends_with("tenant-kubeconfig-7"));
        // columns line up
        assert_eq!(
            lines[0].find("API SERVER"),
            lines[1].find("tenant-kube-apiserver-7")
        );
    }

    #[tokio::test]
    async fn fetches_stored_bytes_verbatim() {
        let stored = b"apiVersion: v1\nkind: Config\n".to_vec();
        let mut cluster = MockTenantCluster::new();
        let bytes = stored.clone();
        cluster
            .expect_get_secret()
            .withf(|ns: &str, name: &str| ns == "kube-tenant-31" && name == "tenant-kubeconfig-31")
            .returning(move |_, _| {
                Ok(Secret {
                    data: Some(BTreeMap::from([(
                        KUBECONFIG_KEY.to_string(),
                        ByteString(bytes.clone()),
                    )])),
                    ..Default::default()
                })
            });

        let id: TenantId = "31".parse().unwrap();
        assert_eq!(fetch_kubeconfig(&cluster, &id).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn missing_secret_is_an_error() {
        let mut cluster = MockTenantCluster::new();
        cluster.expect_get_secret().returning(|ns, name| {
            Err(Error::NotFound {
                kind: "Secret",
                name: format!("{ns}/{name}"),
            })
        });

        let id: TenantId = "404".parse().unwrap();
        let err = fetch_kubeconfig(&cluster, &id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn secret_without_kubeconfig_key_is_an_error() {
        let mut cluster = MockTenantCluster::new();
        cluster
            .expect_get_secret()
            .returning(|_, _| Ok(Secret::default()));

        let id: TenantId = "5".parse().unwrap();
        let err = fetch_kubeconfig(&cluster, &id).await.unwrap_err();
        assert!(matches!(err, Error::MissingField { .. }));
    }
}
