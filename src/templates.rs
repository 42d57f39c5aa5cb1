//! Object templates for one tenant control plane.
//!
//! The pods mirror the static manifests kubeadm writes on a kind control-plane
//! node, with the secure ports, etcd prefix and kubeconfig swapped for the
//! tenant's own.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        Container, HTTPGetAction, HostPathVolumeSource, KeyToPath, Namespace, Pod, PodSpec,
        Probe, ResourceRequirements, Secret, SecretVolumeSource, Toleration, Volume, VolumeMount,
    },
    apimachinery::pkg::{api::resource::Quantity, util::intstr::IntOrString},
    ByteString,
};
use kube::api::ObjectMeta;

use crate::{
    tenant::{API_SERVER_LABEL, CONTROLLER_MANAGER_LABEL, KUBECONFIG_KEY},
    TenantId,
};

pub const API_SERVER_IMAGE: &str = "k8s.gcr.io/kube-apiserver:v1.17.0";
pub const CONTROLLER_MANAGER_IMAGE: &str = "k8s.gcr.io/kube-controller-manager:v1.17.0";

const NODE_NAME: &str = "kind-control-plane";
const ADVERTISE_ADDRESS: &str = "172.17.0.2";
const CONTROLLER_MANAGER_CONF: &str = "tenant-controller-manager.conf";

pub fn namespace(id: &TenantId) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(id.namespace()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn kubeconfig_secret(id: &TenantId, kubeconfig: String) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(id.kubeconfig_secret_name()),
            namespace: Some(id.namespace()),
            labels: Some(labels(API_SERVER_LABEL, id)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            KUBECONFIG_KEY.to_string(),
            ByteString(kubeconfig.into_bytes()),
        )])),
        ..Default::default()
    }
}

/// A kube-apiserver configured against kind defaults, storing its objects
/// under the tenant's etcd prefix.
pub fn api_server(id: &TenantId, secure_port: u16) -> Pod {
    let command: &[&str] = &[
        "kube-apiserver",
        &format!("--advertise-address={ADVERTISE_ADDRESS}"),
        "--allow-privileged=true",
        "--authorization-mode=Node,RBAC",
        "--client-ca-file=/etc/kubernetes/pki/ca.crt",
        "--enable-admission-plugins=NodeRestriction",
        "--enable-bootstrap-token-auth=true",
        "--etcd-cafile=/etc/kubernetes/pki/etcd/ca.crt",
        "--etcd-certfile=/etc/kubernetes/pki/apiserver-etcd-client.crt",
        "--etcd-keyfile=/etc/kubernetes/pki/apiserver-etcd-client.key",
        "--etcd-servers=https://127.0.0.1:2379",
        &format!("--etcd-prefix={}", id.etcd_prefix()),
        "--insecure-port=0",
        "--kubelet-client-certificate=/etc/kubernetes/pki/apiserver-kubelet-client.crt",
        "--kubelet-client-key=/etc/kubernetes/pki/apiserver-kubelet-client.key",
        "--kubelet-preferred-address-types=InternalIP,ExternalIP,Hostname",
        "--proxy-client-cert-file=/etc/kubernetes/pki/front-proxy-client.crt",
        "--proxy-client-key-file=/etc/kubernetes/pki/front-proxy-client.key",
        "--requestheader-allowed-names=front-proxy-client",
        "--requestheader-client-ca-file=/etc/kubernetes/pki/front-proxy-ca.crt",
        "--requestheader-extra-headers-prefix=X-Remote-Extra-",
        "--requestheader-group-headers=X-Remote-Group",
        "--requestheader-username-headers=X-Remote-User",
        &format!("--secure-port={secure_port}"),
        "--service-account-key-file=/etc/kubernetes/pki/sa.pub",
        "--service-cluster-ip-range=10.96.0.0/12",
        "--tls-cert-file=/etc/kubernetes/pki/apiserver.crt",
        "--tls-private-key-file=/etc/kubernetes/pki/apiserver.key",
    ];

    let container = Container {
        name: "kube-apiserver".to_string(),
        image: Some(API_SERVER_IMAGE.to_string()),
        command: Some(command.iter().map(|s| s.to_string()).collect()),
        resources: Some(cpu_request("250m")),
        liveness_probe: Some(healthz_probe(ADVERTISE_ADDRESS, secure_port)),
        volume_mounts: Some(
            SHARED_HOST_PATHS
                .iter()
                .map(|(name, path)| read_only_mount(name, path))
                .collect(),
        ),
        ..static_container()
    };
    let volumes = SHARED_HOST_PATHS
        .iter()
        .map(|(name, path)| host_path_volume(name, path))
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(id.api_server_name()),
            namespace: Some(id.namespace()),
            labels: Some(labels(API_SERVER_LABEL, id)),
            ..Default::default()
        },
        spec: Some(static_pod_spec(container, volumes)),
        status: None,
    }
}

/// A kube-controller-manager running a reduced controller set against the
/// tenant API server, using the kubeconfig secret for every client it builds.
pub fn controller_manager(id: &TenantId, secure_port: u16) -> Pod {
    let kubeconfig = format!("/etc/kubernetes/{CONTROLLER_MANAGER_CONF}");
    let command: &[&str] = &[
        "kube-controller-manager",
        "--allocate-node-cidrs=true",
        &format!("--authentication-kubeconfig={kubeconfig}"),
        &format!("--authorization-kubeconfig={kubeconfig}"),
        "--bind-address=127.0.0.1",
        &format!("--secure-port={secure_port}"),
        // no insecure port
        "--port=0",
        "--client-ca-file=/etc/kubernetes/pki/ca.crt",
        "--cluster-cidr=10.244.0.0/16",
        "--cluster-signing-cert-file=/etc/kubernetes/pki/ca.crt",
        "--cluster-signing-key-file=/etc/kubernetes/pki/ca.key",
        "--controllers=clusterrole-aggregation,garbagecollector,serviceaccount,serviceaccount-token,namespace",
        "--enable-hostpath-provisioner=true",
        &format!("--kubeconfig={kubeconfig}"),
        "--leader-elect=true",
        "--node-cidr-mask-size=24",
        "--requestheader-client-ca-file=/etc/kubernetes/pki/front-proxy-ca.crt",
        "--root-ca-file=/etc/kubernetes/pki/ca.crt",
        "--service-account-private-key-file=/etc/kubernetes/pki/sa.key",
        "--service-cluster-ip-range=10.96.0.0/12",
        "--use-service-account-credentials=true",
    ];

    let mut mounts: Vec<VolumeMount> = SHARED_HOST_PATHS
        .iter()
        .map(|(name, path)| read_only_mount(name, path))
        .collect();
    mounts.push(read_only_mount("flexvolume-dir", FLEXVOLUME_DIR));
    mounts.push(read_only_mount("kubeconfig", "/etc/kubernetes"));

    let mut volumes: Vec<Volume> = SHARED_HOST_PATHS
        .iter()
        .map(|(name, path)| host_path_volume(name, path))
        .collect();
    volumes.push(host_path_volume("flexvolume-dir", FLEXVOLUME_DIR));
    volumes.push(Volume {
        name: "kubeconfig".to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(id.kubeconfig_secret_name()),
            items: Some(vec![KeyToPath {
                key: KUBECONFIG_KEY.to_string(),
                path: CONTROLLER_MANAGER_CONF.to_string(),
                mode: None,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    });

    let container = Container {
        name: "kube-controller-manager".to_string(),
        image: Some(CONTROLLER_MANAGER_IMAGE.to_string()),
        command: Some(command.iter().map(|s| s.to_string()).collect()),
        resources: Some(cpu_request("200m")),
        liveness_probe: Some(healthz_probe("127.0.0.1", secure_port)),
        volume_mounts: Some(mounts),
        ..static_container()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(id.controller_manager_name()),
            namespace: Some(id.namespace()),
            labels: Some(labels(CONTROLLER_MANAGER_LABEL, id)),
            ..Default::default()
        },
        spec: Some(static_pod_spec(container, volumes)),
        status: None,
    }
}

const FLEXVOLUME_DIR: &str = "/usr/libexec/kubernetes/kubelet-plugins/volume/exec";

/// Host directories both components mount read-only.
const SHARED_HOST_PATHS: [(&str, &str); 5] = [
    ("ca-certs", "/etc/ssl/certs"),
    ("etc-ca-certificates", "/etc/ca-certificates"),
    ("k8s-certs", "/etc/kubernetes/pki"),
    (
        "usr-local-share-ca-certificates",
        "/usr/local/share/ca-certificates",
    ),
    ("usr-share-ca-certificates", "/usr/share/ca-certificates"),
];

fn labels(key: &str, id: &TenantId) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), id.to_string())])
}

fn static_container() -> Container {
    Container {
        image_pull_policy: Some("IfNotPresent".to_string()),
        termination_message_path: Some("/dev/termination-log".to_string()),
        termination_message_policy: Some("File".to_string()),
        ..Default::default()
    }
}

fn static_pod_spec(container: Container, volumes: Vec<Volume>) -> PodSpec {
    PodSpec {
        containers: vec![container],
        dns_policy: Some("ClusterFirst".to_string()),
        enable_service_links: Some(true),
        host_network: Some(true),
        node_name: Some(NODE_NAME.to_string()),
        priority: Some(2_000_000_000),
        priority_class_name: Some("system-cluster-critical".to_string()),
        restart_policy: Some("Always".to_string()),
        scheduler_name: Some("default-scheduler".to_string()),
        termination_grace_period_seconds: Some(30),
        tolerations: Some(vec![Toleration {
            effect: Some("NoExecute".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]),
        volumes: Some(volumes),
        ..Default::default()
    }
}

fn cpu_request(cpu: &str) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([(
            "cpu".to_string(),
            Quantity(cpu.to_string()),
        )])),
        ..Default::default()
    }
}

// The probe port must match --secure-port.
fn healthz_probe(host: &str, port: u16) -> Probe {
    Probe {
        failure_threshold: Some(8),
        initial_delay_seconds: Some(15),
        period_seconds: Some(10),
        success_threshold: Some(1),
        timeout_seconds: Some(15),
        http_get: Some(HTTPGetAction {
            host: Some(host.to_string()),
            path: Some("/healthz".to_string()),
            port: IntOrString::Int(port.into()),
            scheme: Some("HTTPS".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some("DirectoryOrCreate".to_string()),
        }),
        ..Default::default()
    }
}
