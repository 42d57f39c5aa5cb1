//! Error types shared by the tenant workflows.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("not allowed to access {kind} {name}: {message}")]
    Forbidden {
        kind: &'static str,
        name: String,
        message: String,
    },

    /// Transport failures, server errors and any API response we do not
    /// classify further.
    #[error("kubernetes error on {kind} {name}: {source}")]
    Kube {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("missing field {field} on {object}")]
    MissingField { object: String, field: &'static str },

    #[error("invalid tenant identifier {0:?}: expected decimal digits")]
    InvalidTenantId(String),

    #[error("no free tenant identifier after {0} attempts")]
    AllocationExhausted(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify a kube error for an operation on the named object.
    pub fn from_kube(kind: &'static str, name: impl Into<String>, error: kube::Error) -> Self {
        let name = name.into();
        match error {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound { kind, name },
            kube::Error::Api(response) if response.code == 409 => {
                Self::AlreadyExists { kind, name }
            }
            kube::Error::Api(response) if response.code == 401 || response.code == 403 => {
                Self::Forbidden {
                    kind,
                    name,
                    message: response.message,
                }
            }
            source => Self::Kube { kind, name, source },
        }
    }

    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn missing_field(object: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            object: object.into(),
            field,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether the failure may go away on its own (server errors, throttling
    /// and transport problems). Nothing retries today; this only shapes the
    /// message shown to the operator.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube {
                source: kube::Error::Api(response),
                ..
            } => response.code >= 500 || response.code == 429,
            Self::Kube { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} message"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classifies_not_found() {
        let err = Error::from_kube("Secret", "tenant-kubeconfig-7", api_error(404, "NotFound"));
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Secret tenant-kubeconfig-7 not found");
    }

    #[test]
    fn classifies_conflict() {
        let err = Error::from_kube("Namespace", "kube-tenant-7", api_error(409, "AlreadyExists"));
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Namespace kube-tenant-7 already exists");
    }

    #[test]
    fn classifies_forbidden() {
        let err = Error::from_kube("Pod", "p", api_error(403, "Forbidden"));
        match err {
            Error::Forbidden { message, .. } => assert_eq!(message, "Forbidden message"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::from_kube("Pod", "p", api_error(503, "ServiceUnavailable"));
        assert!(err.is_transient());
        assert!(!err.is_not_found());

        let throttled = Error::from_kube("Pod", "p", api_error(429, "TooManyRequests"));
        assert!(throttled.is_transient());
    }

    #[test]
    fn other_variants_are_not_transient() {
        assert!(!Error::kubeconfig("no user").is_transient());
        assert!(!Error::AllocationExhausted(8).is_transient());
        assert!(!Error::InvalidTenantId("abc".into()).is_transient());
    }
}
