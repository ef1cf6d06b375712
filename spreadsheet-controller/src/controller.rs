use crate::{
    errors::ControllerError,
    registry::WorkerRegistry,
    resource_client::ResourceClient,
    status_updater::{SpreadsheetStore, StatusUpdater},
    utils::NamespacedName,
    worker::{Worker, WorkerConfig, WorkerMetrics},
};

use futures::{Stream, TryStreamExt};
use kube::Api;
use kube_runtime::watcher::{self, Event};
use spreadsheet_controller_apis::{SUPPORTED_SCRAPE_RESOURCES, Spreadsheet};
use std::{future::Future, sync::Arc};

/// The main controller which will spawn one [`Worker`] per [`Spreadsheet`] object.
pub(crate) struct SpreadsheetController {
    status_updater: StatusUpdater,
    client: Arc<dyn ResourceClient>,
    metrics: WorkerMetrics,
    registry: WorkerRegistry,
}

impl SpreadsheetController {
    pub fn new(store: Arc<dyn SpreadsheetStore>, client: Arc<dyn ResourceClient>) -> Self {
        Self {
            status_updater: StatusUpdater::new(store),
            client,
            metrics: WorkerMetrics::new(),
            registry: WorkerRegistry::new(),
        }
    }

    fn add(&mut self, obj: Spreadsheet) -> Result<(), ControllerError> {
        let config = WorkerConfig::from_spreadsheet(&obj);
        if config.polling_interval.is_zero() {
            warn!(
                "polling time {:?} of {} is zero or could not be parsed, {} will be polled continuously",
                obj.spec.polling_time, config.key, config.key
            );
        }
        if !obj.spec.is_supported_scrape_resource() {
            warn!(
                "scrape resource {:?} of {} is not one of {}",
                obj.spec.scrape_resource,
                config.key,
                SUPPORTED_SCRAPE_RESOURCES.join(",")
            );
        }
        info!(
            "starting worker for {} polling {} every {:?} ({} workers already running)",
            config.key,
            obj.spec.scrape_resource,
            config.polling_interval,
            self.registry.len()
        );
        let worker = Worker::new(
            config,
            obj,
            self.status_updater.clone(),
            self.client.clone(),
            self.metrics.clone(),
        );
        self.registry.start(worker)
    }

    fn apply(&mut self, obj: Spreadsheet) -> Result<(), ControllerError> {
        let key = NamespacedName::from(&obj);
        if obj.spec.is_empty() {
            debug!("ignoring {} as its spec is empty", key);
            return Ok(());
        }
        if self.registry.contains(&key) {
            // Also triggered by our own status updates. A changed spec only takes
            // effect after the object is deleted and created again.
            debug!("ignoring modification of {}", key);
            Ok(())
        } else {
            self.add(obj)
        }
    }

    fn delete(&mut self, obj: &Spreadsheet) {
        let key = NamespacedName::from(obj);
        if self.registry.stop(&key) {
            info!("stopping worker for {}", key);
        } else {
            debug!("{} was not registered with any worker", key);
        }
    }

    pub(crate) fn handle_event(&mut self, event: Event<Spreadsheet>) -> Result<(), ControllerError> {
        match event {
            // Only the initial listing is seen, the watcher re-lists after an
            // error and any error ends `run`.
            Event::Init | Event::InitDone => {}
            Event::InitApply(obj) | Event::Apply(obj) => self.apply(obj)?,
            Event::Delete(obj) => self.delete(&obj),
        }
        Ok(())
    }

    /// Consume `events` until the stream fails or ends, both of which are fatal.
    pub async fn run<S>(mut self, events: S) -> Result<(), ControllerError>
    where
        S: Stream<Item = Result<Event<Spreadsheet>, watcher::Error>>,
    {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.try_next().await? {
            self.handle_event(event)?;
        }
        Err(ControllerError::WatchStreamEnded)
    }

    pub fn start(self, api: Api<Spreadsheet>) -> impl Future<Output = Result<(), ControllerError>> {
        self.run(watcher::watcher(api, watcher::Config::default()))
    }
}
