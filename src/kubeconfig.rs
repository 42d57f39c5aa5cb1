//! Kubeconfig documents handed to tenants.
//!
//! A tenant's kubeconfig reuses the operator's own client certificate and the
//! host cluster's certificate authority, pointed at the tenant API server. The
//! credentials are read from the same kubeconfig the host client was built
//! from.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, TenantId};

/// Subset of the kubeconfig format this tool reads and writes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clusters: Vec<NamedCluster>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<NamedUser>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contexts: Vec<NamedContext>,
    #[serde(
        rename = "current-context",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub current_context: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: Option<Cluster>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: Option<Context>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cluster: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// kube writes absent optional fields as explicit nulls.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Kubeconfig {
    /// Convert the document kube loaded (merged from `$KUBECONFIG` or the
    /// default path) into our types.
    pub fn from_kube(kubeconfig: &kube::config::Kubeconfig) -> Result<Self> {
        let value = serde_json::to_value(kubeconfig)
            .map_err(|e| Error::serialization(format!("failed to encode kubeconfig: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| Error::serialization(format!("failed to decode kubeconfig: {e}")))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization(format!("invalid kubeconfig YAML: {e}")))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization(format!("failed to serialize kubeconfig: {e}")))
    }

    /// Server URL of the cluster the current context points at.
    pub fn current_server(&self) -> Option<&str> {
        let context = self.context(self.current_context.as_deref()?)?;
        self.clusters
            .iter()
            .find(|c| c.name == context.cluster)?
            .cluster
            .as_ref()?
            .server
            .as_deref()
    }

    fn context(&self, name: &str) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.context.as_ref())
    }
}

/// Base64-encoded certificate material lifted from the host kubeconfig.
#[derive(Clone, PartialEq, Eq)]
pub struct HostCredentials {
    pub certificate_authority_data: String,
    pub client_certificate_data: String,
    pub client_key_data: String,
}

impl std::fmt::Debug for HostCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCredentials")
            .field("certificate_authority_data", &"<redacted>")
            .field("client_certificate_data", &"<redacted>")
            .field("client_key_data", &"<redacted>")
            .finish()
    }
}

impl HostCredentials {
    /// Resolve the credentials of `context`, or of the current context when
    /// none is given.
    ///
    /// Only certificate-based users can be reused for a tenant; token and
    /// exec-plugin users are rejected.
    pub fn from_kubeconfig(kubeconfig: &Kubeconfig, context: Option<&str>) -> Result<Self> {
        let context_name = context
            .or(kubeconfig.current_context.as_deref())
            .ok_or_else(|| Error::kubeconfig("no context selected and no current-context set"))?;
        let context = kubeconfig
            .context(context_name)
            .ok_or_else(|| Error::kubeconfig(format!("context {context_name} not found")))?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .and_then(|c| c.cluster.as_ref())
            .ok_or_else(|| Error::kubeconfig(format!("cluster {} not found", context.cluster)))?;
        let user = kubeconfig
            .users
            .iter()
            .find(|u| u.name == context.user)
            .and_then(|u| u.user.as_ref())
            .ok_or_else(|| Error::kubeconfig(format!("user {} not found", context.user)))?;

        let certificate_authority_data = inline_or_file(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
        )?
        .ok_or_else(|| {
            Error::kubeconfig(format!(
                "cluster {} has no certificate authority",
                context.cluster
            ))
        })?;
        let client_certificate_data = inline_or_file(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
        )?
        .ok_or_else(|| {
            Error::kubeconfig(format!(
                "user {} has no client certificate; only certificate users can be shared with a tenant",
                context.user
            ))
        })?;
        let client_key_data =
            inline_or_file(user.client_key_data.as_deref(), user.client_key.as_deref())?
                .ok_or_else(|| {
                    Error::kubeconfig(format!("user {} has no client key", context.user))
                })?;

        Ok(Self {
            certificate_authority_data,
            client_certificate_data,
            client_key_data,
        })
    }
}

/// Prefer inline base64 data; otherwise read and encode the referenced file.
fn inline_or_file(data: Option<&str>, path: Option<&str>) -> Result<Option<String>> {
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        return Ok(Some(data.to_string()));
    }
    match path.filter(|p| !p.is_empty()) {
        Some(path) => {
            let bytes = std::fs::read(Path::new(path)).map_err(|e| {
                Error::kubeconfig(format!("failed to read credential file {path}: {e}"))
            })?;
            Ok(Some(STANDARD.encode(bytes)))
        }
        None => Ok(None),
    }
}

/// `https://<host>:<port>`, bracketing IPv6 literals.
pub fn server_url(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("https://[{host}]:{port}")
    } else {
        format!("https://{host}:{port}")
    }
}

/// Build the kubeconfig granting access to a tenant API server.
pub fn for_tenant(id: &TenantId, server: String, credentials: &HostCredentials) -> Kubeconfig {
    let name = id.namespace();
    Kubeconfig {
        api_version: Some("v1".to_string()),
        kind: Some("Config".to_string()),
        clusters: vec![NamedCluster {
            name: name.clone(),
            cluster: Some(Cluster {
                server: Some(server),
                certificate_authority: None,
                certificate_authority_data: Some(credentials.certificate_authority_data.clone()),
            }),
        }],
        users: vec![NamedUser {
            name: name.clone(),
            user: Some(User {
                client_certificate: None,
                client_certificate_data: Some(credentials.client_certificate_data.clone()),
                client_key: None,
                client_key_data: Some(credentials.client_key_data.clone()),
            }),
        }],
        contexts: vec![NamedContext {
            name: name.clone(),
            context: Some(Context {
                cluster: name.clone(),
                user: name.clone(),
                namespace: None,
            }),
        }],
        current_context: Some(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: kind-kind
  cluster:
    server: https://127.0.0.1:38291
    certificate-authority-data: Q0FEQVRB
- name: other
  cluster:
    server: https://10.0.0.1:6443
contexts:
- name: kind-kind
  context:
    cluster: kind-kind
    user: kind-kind
- name: token-only
  context:
    cluster: other
    user: bearer
current-context: kind-kind
users:
- name: kind-kind
  user:
    client-certificate-data: Q0VSVA==
    client-key-data: S0VZ
- name: bearer
  user:
    token: abc
"#;

    fn credentials() -> HostCredentials {
        HostCredentials {
            certificate_authority_data: "Q0FEQVRB".to_string(),
            client_certificate_data: "Q0VSVA==".to_string(),
            client_key_data: "S0VZ".to_string(),
        }
    }

    #[test]
    fn reads_current_context_credentials() {
        let kubeconfig = Kubeconfig::from_yaml(HOST_KUBECONFIG).expect("valid kubeconfig");
        let creds = HostCredentials::from_kubeconfig(&kubeconfig, None).expect("cert user");
        assert_eq!(creds, credentials());
    }

    #[test]
    fn rejects_users_without_certificates() {
        let kubeconfig = Kubeconfig::from_yaml(HOST_KUBECONFIG).expect("valid kubeconfig");
        let err = HostCredentials::from_kubeconfig(&kubeconfig, Some("token-only"))
            .expect_err("token user has no certificate");
        assert!(matches!(err, Error::Kubeconfig(_)));
    }

    #[test]
    fn rejects_unknown_context() {
        let kubeconfig = Kubeconfig::from_yaml(HOST_KUBECONFIG).expect("valid kubeconfig");
        let err = HostCredentials::from_kubeconfig(&kubeconfig, Some("nope")).unwrap_err();
        assert_eq!(err.to_string(), "kubeconfig error: context nope not found");
    }

    #[test]
    fn reads_credentials_from_files() {
        let dir = std::env::temp_dir().join(format!("kindred-creds-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let ca = dir.join("ca.crt");
        std::fs::write(&ca, b"CA").unwrap();

        let kubeconfig = Kubeconfig {
            clusters: vec![NamedCluster {
                name: "c".into(),
                cluster: Some(Cluster {
                    certificate_authority: Some(ca.display().to_string()),
                    ..Default::default()
                }),
            }],
            users: vec![NamedUser {
                name: "u".into(),
                user: Some(User {
                    client_certificate_data: Some("Q0VSVA==".into()),
                    client_key_data: Some("S0VZ".into()),
                    ..Default::default()
                }),
            }],
            contexts: vec![NamedContext {
                name: "ctx".into(),
                context: Some(Context {
                    cluster: "c".into(),
                    user: "u".into(),
                    namespace: None,
                }),
            }],
            current_context: Some("ctx".into()),
            ..Default::default()
        };

        let creds = HostCredentials::from_kubeconfig(&kubeconfig, None).unwrap();
        assert_eq!(creds.certificate_authority_data, STANDARD.encode(b"CA"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn server_url_uses_host_and_port() {
        assert_eq!(server_url("172.18.0.2", 7345), "https://172.18.0.2:7345");
        assert_eq!(server_url("fd00::2", 7001), "https://[fd00::2]:7001");
    }

    #[test]
    fn tenant_kubeconfig_points_at_tenant_server() {
        let id = TenantId::from_number(99);
        let config = for_tenant(&id, server_url("172.18.0.2", 7100), &credentials());
        let yaml = config.to_yaml().expect("serializable");

        assert!(yaml.contains("apiVersion: v1"));
        assert!(yaml.contains("current-context: kube-tenant-99"));
        assert!(yaml.contains("client-key-data: S0VZ"));

        let parsed = Kubeconfig::from_yaml(&yaml).expect("round trips");
        assert_eq!(parsed.current_server(), Some("https://172.18.0.2:7100"));
        let creds = HostCredentials::from_kubeconfig(&parsed, None).unwrap();
        assert_eq!(creds, credentials());
    }
}
