use crate::{
    MANAGER,
    errors::{ControllerError, ExtKubeApiError},
    utils::{NamespacedName, metric_name},
};

use async_trait::async_trait;
use kube::{Api, Client, api::PostParams};
use log::debug;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};
use spreadsheet_controller_apis::{Spreadsheet, SpreadsheetStatus};
use std::sync::Arc;

/// Total number of status write attempts before giving up on conflicts.
pub(crate) const MAX_STATUS_ATTEMPTS: u32 = 5;

const STATUS_UPDATER: &'static str = "status_updater";

/// Access to [`Spreadsheet`] objects and their status sub-resource.
#[async_trait]
pub(crate) trait SpreadsheetStore: Send + Sync {
    async fn get(&self, key: &NamespacedName) -> kube::Result<Spreadsheet>;

    /// Replace the whole status sub-resource. Fails with a conflict (409) if the
    /// `resourceVersion` of `object` is not the latest one.
    async fn replace_status(
        &self,
        key: &NamespacedName,
        object: &Spreadsheet,
    ) -> kube::Result<Spreadsheet>;
}

/// [`SpreadsheetStore`] backed by the Kubernetes API server.
pub(crate) struct KubeSpreadsheetStore {
    client: Client,
}

impl KubeSpreadsheetStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &NamespacedName) -> Api<Spreadsheet> {
        Api::<Spreadsheet>::namespaced(self.client.clone(), key.namespace.as_str())
    }
}

#[async_trait]
impl SpreadsheetStore for KubeSpreadsheetStore {
    async fn get(&self, key: &NamespacedName) -> kube::Result<Spreadsheet> {
        self.api(key).get_status(key.name.as_str()).await
    }

    async fn replace_status(
        &self,
        key: &NamespacedName,
        object: &Spreadsheet,
    ) -> kube::Result<Spreadsheet> {
        let mut pp = PostParams::default();
        pp.field_manager = Some(MANAGER.to_string());
        self.api(key)
            .replace_status(
                key.name.as_str(),
                &pp,
                serde_json::to_vec(object).map_err(|e| kube::Error::SerdeError(e))?,
            )
            .await
    }
}

/// Writes a desired status document to a [`Spreadsheet`], retrying on
/// optimistic-concurrency conflicts.
#[derive(Clone)]
pub(crate) struct StatusUpdater {
    store: Arc<dyn SpreadsheetStore>,
    status_conflicts: Counter<u64>,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn SpreadsheetStore>) -> Self {
        let meter: Meter = global::meter(STATUS_UPDATER);
        let status_conflicts = meter
            .u64_counter(metric_name("status_conflicts"))
            .with_description("Count of conflicts while replacing the status of Spreadsheet objects")
            .build();
        Self {
            store,
            status_conflicts,
        }
    }

    /// Replace the status of `current` with `desired` and return the object as
    /// stored by the API server afterwards.
    ///
    /// `current` provides the `resourceVersion` for the first attempt. On a
    /// conflict the latest object is fetched and the same status is written
    /// against its `resourceVersion`, up to [`MAX_STATUS_ATTEMPTS`] attempts in
    /// total. The status is always replaced as a whole. If the latest object
    /// has a different uid, `current` was deleted and created again, and
    /// nothing is written.
    pub async fn apply(
        &self,
        current: &Spreadsheet,
        desired: &SpreadsheetStatus,
    ) -> Result<Spreadsheet, ControllerError> {
        let key = NamespacedName::from(current);
        let mut target = current.clone();
        for attempt in 1..=MAX_STATUS_ATTEMPTS {
            target.status = Some(desired.clone());
            match self.store.replace_status(&key, &target).await {
                Ok(_) => return Ok(self.store.get(&key).await?),
                Err(e) if e.is_conflict() => {
                    self.status_conflicts
                        .add(1, &[KeyValue::new("object_namespace", key.namespace.clone())]);
                    debug!(
                        "conflict while updating status of {} (attempt {} of {}): {}",
                        key, attempt, MAX_STATUS_ATTEMPTS, e
                    );
                    if attempt < MAX_STATUS_ATTEMPTS {
                        let latest = self.store.get(&key).await?;
                        if latest.metadata.uid != current.metadata.uid {
                            return Err(ControllerError::ObjectReplaced(key));
                        }
                        target = latest;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::ConflictExhausted {
            key,
            attempts: MAX_STATUS_ATTEMPTS,
        })
    }
}
