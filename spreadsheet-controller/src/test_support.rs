//! In-memory stand-ins for the Kubernetes API and the collaborator services.

use crate::{
    resource_client::{PhaseFailure, ReadRequest, ResourceClient, WriteRequest},
    status_updater::SpreadsheetStore,
    utils::NamespacedName,
};

use async_trait::async_trait;
use bytes::Bytes;
use kube::{api::ObjectMeta, core::ErrorResponse};
use spreadsheet_controller_apis::{Spreadsheet, SpreadsheetSpec, SpreadsheetStatus};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

pub(crate) fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("simulated error {}", code),
        reason: match code {
            404 => "NotFound",
            409 => "Conflict",
            _ => "InternalError",
        }
        .to_string(),
        code,
    })
}

/// A Spreadsheet polling every hour.
pub(crate) fn spreadsheet(namespace: &str, name: &str) -> Spreadsheet {
    Spreadsheet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: SpreadsheetSpec {
            polling_time: "1h".to_string(),
            kube_aggregator_url: "http://aggregator".to_string(),
            kube_formatter_url: "http://formatter".to_string(),
            target_namespace: "all".to_string(),
            scrape_resource: "Pod".to_string(),
        },
        status: None,
    }
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<NamespacedName, Spreadsheet>,
    /// Number of upcoming status writes which lose against another writer.
    conflicts: HashMap<NamespacedName, usize>,
    attempts: HashMap<NamespacedName, usize>,
    writes: Vec<(NamespacedName, SpreadsheetStatus)>,
    version: u64,
}

impl StoreState {
    fn bump(&mut self, key: &NamespacedName) {
        self.version += 1;
        let version = self.version.to_string();
        if let Some(obj) = self.objects.get_mut(key) {
            obj.metadata.resource_version = Some(version);
        }
    }
}

/// [`SpreadsheetStore`] enforcing `resourceVersion` checks like the API server.
#[derive(Default)]
pub(crate) struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    /// Create `obj`, replacing any object with the same name under a new uid.
    pub fn insert(&self, mut obj: Spreadsheet) -> Spreadsheet {
        let key = NamespacedName::from(&obj);
        let mut state = self.state.lock().unwrap();
        obj.metadata.uid = Some(format!("uid-{}", state.version + 1));
        state.objects.insert(key.clone(), obj);
        state.bump(&key);
        state.objects[&key].clone()
    }

    pub fn fail_with_conflicts(&self, key: &NamespacedName, count: usize) {
        self.state
            .lock()
            .unwrap()
            .conflicts
            .insert(key.clone(), count);
    }

    /// Simulate a write by someone else.
    pub fn touch(&self, key: &NamespacedName) {
        self.state.lock().unwrap().bump(key);
    }

    pub fn set_status(&self, key: &NamespacedName, status: SpreadsheetStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(obj) = state.objects.get_mut(key) {
            obj.status = Some(status);
        }
        state.bump(key);
    }

    pub fn status_attempts(&self, key: &NamespacedName) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Successful status writes in order.
    pub fn status_writes(&self) -> Vec<(NamespacedName, SpreadsheetStatus)> {
        self.state.lock().unwrap().writes.clone()
    }
}

#[async_trait]
impl SpreadsheetStore for FakeStore {
    async fn get(&self, key: &NamespacedName) -> kube::Result<Spreadsheet> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| api_error(404))
    }

    async fn replace_status(
        &self,
        key: &NamespacedName,
        object: &Spreadsheet,
    ) -> kube::Result<Spreadsheet> {
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(key.clone()).or_default() += 1;
        let current_version = match state.objects.get(key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(api_error(404)),
        };
        if let Some(conflicts) = state.conflicts.get_mut(key) {
            if *conflicts > 0 {
                *conflicts -= 1;
                state.bump(key);
                return Err(api_error(409));
            }
        }
        if object.metadata.resource_version != current_version {
            return Err(api_error(409));
        }
        if let Some(current) = state.objects.get_mut(key) {
            current.status = object.status.clone();
        }
        state.bump(key);
        let status = object.status.clone().unwrap_or_default();
        state.writes.push((key.clone(), status));
        Ok(state.objects[key].clone())
    }
}

/// [`ResourceClient`] answering from queued results, succeeding once the
/// queues are drained.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    reads: Mutex<VecDeque<Result<Bytes, PhaseFailure>>>,
    writes: Mutex<VecDeque<Result<(), PhaseFailure>>>,
    read_count: AtomicUsize,
    written: Mutex<Vec<(WriteRequest, Bytes)>>,
}

impl ScriptedClient {
    pub fn push_read(&self, result: Result<Bytes, PhaseFailure>) {
        self.reads.lock().unwrap().push_back(result);
    }

    pub fn push_write(&self, result: Result<(), PhaseFailure>) {
        self.writes.lock().unwrap().push_back(result);
    }

    pub fn reads(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    /// All write attempts, successful or not.
    pub fn written(&self) -> Vec<(WriteRequest, Bytes)> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceClient for ScriptedClient {
    async fn read(&self, _request: &ReadRequest) -> Result<Bytes, PhaseFailure> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        self.reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Bytes::from_static(b"{}")))
    }

    async fn write(&self, request: &WriteRequest, body: Bytes) -> Result<(), PhaseFailure> {
        self.written.lock().unwrap().push((request.clone(), body));
        self.writes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
