use crate::utils::NamespacedName;

/// Extension methods for Kubernetes API errors.
pub(crate) trait ExtKubeApiError {
    fn is_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
}

impl ExtKubeApiError for kube::Error {
    fn is_not_found(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 404 || e.code == 410 => true,
            _ => false,
        }
    }

    fn is_conflict(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 409 => true,
            _ => false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ControllerError {
    /// The status sub-resource could not be written because the object kept
    /// changing underneath us.
    #[error("status of {key} still conflicting after {attempts} attempts")]
    ConflictExhausted { key: NamespacedName, attempts: u32 },
    /// The object was deleted and created again while its status was written.
    #[error("{0} was replaced by a new object")]
    ObjectReplaced(NamespacedName),
    /// A worker is already running for this Spreadsheet.
    #[error("a worker for {0} is already running")]
    DuplicateWorker(NamespacedName),
    /// The Spreadsheet watch stream terminated.
    #[error("Spreadsheet watch stream ended")]
    WatchStreamEnded,
    /// Spreadsheet watch stream error
    #[error("{0}")]
    Watch(#[from] kube_runtime::watcher::Error),
    /// Kubernetes API error
    #[error("{0}")]
    KubeApi(#[from] kube::Error),
}

impl ControllerError {
    /// Whether the next cycle has a chance to succeed where this one failed.
    pub(crate) fn is_temporary(&self) -> bool {
        match self {
            ControllerError::DuplicateWorker(_)
            | ControllerError::ObjectReplaced(_)
            | ControllerError::WatchStreamEnded
            | ControllerError::Watch(_) => false,
            ControllerError::KubeApi(e) => !e.is_not_found(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::api_error;

    #[test]
    fn api_error_classification() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(409).is_not_found());
        assert!(api_error(404).is_not_found());
        assert!(api_error(410).is_not_found());
        assert!(!api_error(500).is_conflict());
    }

    #[test]
    fn temporary_errors() {
        let key = NamespacedName::new("default", "report");
        assert!(
            ControllerError::ConflictExhausted {
                key: key.clone(),
                attempts: 5
            }
            .is_temporary()
        );
        assert!(ControllerError::KubeApi(api_error(500)).is_temporary());
        assert!(!ControllerError::KubeApi(api_error(404)).is_temporary());
        assert!(!ControllerError::ObjectReplaced(key.clone()).is_temporary());
        assert!(!ControllerError::DuplicateWorker(key).is_temporary());
        assert!(!ControllerError::WatchStreamEnded.is_temporary());
    }

    #[test]
    fn conflict_exhausted_message() {
        let e = ControllerError::ConflictExhausted {
            key: NamespacedName::new("default", "report"),
            attempts: 5,
        };
        assert_eq!(
            "status of default/report still conflicting after 5 attempts",
            e.to_string()
        );
    }
}
