use crate::{
    errors::ControllerError,
    utils::{NamespacedName, metric_name},
    worker::Worker,
};

use opentelemetry::{
    global,
    metrics::{Counter, Meter},
};
use std::collections::HashMap;
use tokio::{spawn, sync::watch, task::JoinHandle};

const REGISTRY: &'static str = "worker_registry";

/// Handle of a spawned [`Worker`] task.
pub(crate) struct WorkerHandle {
    stop: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to finish after its current cycle. Idempotent.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Mapping of [`Spreadsheet`](spreadsheet_controller_apis::Spreadsheet)
/// (namespace/name) to its running [`Worker`].
///
/// A stopped worker may still be in the middle of a cycle. Its task is kept in
/// `stopping` until it has finished, and a worker started for the same key in
/// the meantime only begins once its predecessor is done.
///
/// Owned and mutated by the watcher only, so it needs no locking.
pub(crate) struct WorkerRegistry {
    workers: HashMap<NamespacedName, WorkerHandle>,
    stopping: HashMap<NamespacedName, JoinHandle<()>>,
    workers_started: Counter<u64>,
    workers_stopped: Counter<u64>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        let meter: Meter = global::meter(REGISTRY);
        let workers_started = meter
            .u64_counter(metric_name("workers_started"))
            .with_description("Count of started Spreadsheet workers")
            .build();
        let workers_stopped = meter
            .u64_counter(metric_name("workers_stopped"))
            .with_description("Count of Spreadsheet workers asked to stop")
            .build();
        Self {
            workers: Default::default(),
            stopping: Default::default(),
            workers_started,
            workers_stopped,
        }
    }

    /// Spawn `worker`, there must not be a live worker for the same key. The
    /// handle of a worker task which already ended is replaced.
    pub fn start(&mut self, worker: Worker) -> Result<(), ControllerError> {
        let key = worker.key().clone();
        if self.contains(&key) {
            return Err(ControllerError::DuplicateWorker(key));
        }
        self.stopping.retain(|_, h| !h.is_finished());
        let (stop, stop_receiver) = watch::channel(false);
        let join_handle = match self.stopping.remove(&key) {
            Some(predecessor) => {
                info!(
                    "worker for {} waits for its predecessor to finish its cycle",
                    key
                );
                spawn(async move {
                    // Cancellation and panics of the predecessor end it just the same.
                    let _ = predecessor.await;
                    worker.run(stop_receiver).await
                })
            }
            None => spawn(worker.run(stop_receiver)),
        };
        self.workers.insert(key, WorkerHandle { stop, join_handle });
        self.workers_started.add(1, &[]);
        Ok(())
    }

    /// Signal the worker of `key` to stop. Its task is tracked in `stopping`
    /// until the current cycle has ended. Returns `false` if there was no such
    /// worker.
    pub fn stop(&mut self, key: &NamespacedName) -> bool {
        match self.workers.remove(key) {
            Some(handle) => {
                handle.stop();
                self.workers_stopped.add(1, &[]);
                if !handle.join_handle.is_finished() {
                    self.stopping.insert(key.clone(), handle.join_handle);
                }
                true
            }
            None => false,
        }
    }

    /// Whether a live worker is registered for `key`.
    pub fn contains(&self, key: &NamespacedName) -> bool {
        self.workers
            .get(key)
            .map_or(false, |h| !h.join_handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }
}
