use crate::{
    errors::ControllerError,
    polling_interval::parse_polling_interval,
    resource_client::{ReadRequest, ResourceClient, WriteRequest},
    status_updater::StatusUpdater,
    utils::{NamespacedName, metric_name},
};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter},
};
use spreadsheet_controller_apis::{
    RECONCILE_FAILED_AGGREGATED, RECONCILE_FAILED_FORMATTED, RECONCILE_SUCCEEDED, Spreadsheet,
    SpreadsheetStatus, now_timestamp,
};
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::watch,
    time::{Duration, sleep},
};

const WORKER: &'static str = "worker";

/// Everything a [`Worker`] needs to know about its [`Spreadsheet`]. Derived once
/// from the spec when the worker is created and never refreshed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct WorkerConfig {
    pub key: NamespacedName,
    pub polling_interval: Duration,
    pub read_request: ReadRequest,
    pub write_request: WriteRequest,
}

impl WorkerConfig {
    pub fn from_spreadsheet(obj: &Spreadsheet) -> Self {
        let key = NamespacedName::from(obj);
        let spec = &obj.spec;
        Self {
            polling_interval: parse_polling_interval(&spec.polling_time),
            read_request: ReadRequest {
                base_url: spec.kube_aggregator_url.clone(),
                kind: spec.scrape_resource.clone(),
                namespace: spec.target_namespace().map(|ns| ns.to_string()),
            },
            write_request: WriteRequest {
                base_url: spec.kube_formatter_url.clone(),
                correlation_id: key.correlation_id(),
            },
            key,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Succeeded,
    FailedAggregated,
    FailedFormatted,
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Succeeded => "succeeded",
            CycleOutcome::FailedAggregated => "failed_aggregated",
            CycleOutcome::FailedFormatted => "failed_formatted",
        }
    }
}

#[derive(Clone)]
pub(crate) struct WorkerMetrics {
    cycle_count: Counter<u64>,
    cycle_duration: Histogram<u64>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let meter: Meter = global::meter(WORKER);
        let cycle_count = meter
            .u64_counter(metric_name("cycle_count"))
            .with_description("Count of Spreadsheet reconcile cycles by outcome")
            .build();
        let cycle_duration = meter
            .u64_histogram(metric_name("cycle_duration_ms"))
            .with_description("Reconcile cycle duration of Spreadsheet objects in milliseconds")
            .with_unit("ms")
            .with_boundaries(vec![
                200.0, 400.0, 800.0, 1600.0, 3200.0, 6400.0, 12800.0, 25600.0, 51200.0,
            ])
            .build();
        Self {
            cycle_count,
            cycle_duration,
        }
    }

    fn record(&self, key: &NamespacedName, outcome: &'static str, duration: Duration) {
        let labels = &[
            KeyValue::new("object_name", key.name.clone()),
            KeyValue::new("object_namespace", key.namespace.clone()),
            KeyValue::new("outcome", outcome),
        ];
        self.cycle_count.add(1, labels);
        self.cycle_duration
            .record(duration.as_millis() as u64, labels);
    }
}

/// Periodically pulls resources from the aggregator, pushes them to the formatter
/// and records the progress in the status of a single [`Spreadsheet`].
pub(crate) struct Worker {
    config: WorkerConfig,
    /// Latest server-confirmed copy of the object, or the local modifications
    /// which still need to be written.
    instance: Spreadsheet,
    status_updater: StatusUpdater,
    client: Arc<dyn ResourceClient>,
    metrics: WorkerMetrics,
    aggregated_started: bool,
    formatted_started: bool,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        mut instance: Spreadsheet,
        status_updater: StatusUpdater,
        client: Arc<dyn ResourceClient>,
        metrics: WorkerMetrics,
    ) -> Self {
        instance.init_status();
        Self {
            config,
            instance,
            status_updater,
            client,
            metrics,
            aggregated_started: false,
            formatted_started: false,
        }
    }

    pub fn key(&self) -> &NamespacedName {
        &self.config.key
    }

    fn status_mut(&mut self) -> &mut SpreadsheetStatus {
        self.instance.init_status()
    }

    async fn push_status(&mut self) -> Result<(), ControllerError> {
        let desired = self.instance.status.clone().unwrap_or_default();
        let mut refreshed = self.status_updater.apply(&self.instance, &desired).await?;
        refreshed.init_status();
        self.instance = refreshed;
        Ok(())
    }

    /// One pass through the aggregated and the formatted phase.
    ///
    /// Collaborator failures end the cycle early with the corresponding outcome.
    /// An `Err` means a status write failed and the rest of the cycle was skipped.
    pub(crate) async fn reconcile_cycle(&mut self) -> Result<CycleOutcome, ControllerError> {
        if !self.aggregated_started {
            self.status_mut().aggregated.start(now_timestamp());
            self.aggregated_started = true;
        }
        self.push_status().await?;

        let body = match self.client.read(&self.config.read_request).await {
            Ok(body) => {
                self.status_mut().aggregated.record_success(now_timestamp());
                self.push_status().await?;
                body
            }
            Err(failure) => {
                warn!(
                    "aggregating {} resources for {} failed: {}",
                    self.config.read_request.kind, self.config.key, failure
                );
                let status = self.status_mut();
                status
                    .aggregated
                    .record_failure(failure.to_string(), now_timestamp());
                status.friendly_description = RECONCILE_FAILED_AGGREGATED.to_string();
                self.push_status().await?;
                return Ok(CycleOutcome::FailedAggregated);
            }
        };

        if !self.formatted_started {
            self.status_mut().formatted.start(now_timestamp());
            self.formatted_started = true;
            self.push_status().await?;
        }

        let outcome = match self.client.write(&self.config.write_request, body).await {
            Ok(()) => {
                let status = self.status_mut();
                status.formatted.record_success(now_timestamp());
                status.friendly_description = RECONCILE_SUCCEEDED.to_string();
                CycleOutcome::Succeeded
            }
            Err(failure) => {
                warn!("formatting for {} failed: {}", self.config.key, failure);
                let status = self.status_mut();
                status
                    .formatted
                    .record_failure(failure.to_string(), now_timestamp());
                status.friendly_description = RECONCILE_FAILED_FORMATTED.to_string();
                CycleOutcome::FailedFormatted
            }
        };
        self.push_status().await?;
        Ok(outcome)
    }

    /// Run cycles until `stop` is set (or its sender is gone). The stop signal is
    /// only observed between cycles, never during one.
    pub(crate) async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let key = self.config.key.clone();
        info!("worker for {} has started", key);
        loop {
            if *stop.borrow() {
                break;
            }
            debug!("worker for {} is running", key);
            let start = Instant::now();
            let outcome = match self.reconcile_cycle().await {
                Ok(outcome) => outcome.label(),
                Err(e) if e.is_temporary() => {
                    warn!("reconcile cycle of {} aborted: {}", key, e);
                    "aborted"
                }
                Err(e) => {
                    error!("reconcile cycle of {} aborted: {}", key, e);
                    "aborted"
                }
            };
            self.metrics.record(&key, outcome, Instant::now() - start);
            debug!(
                "worker for {} is sleeping for {:?}",
                key, self.config.polling_interval
            );
            let stopped = tokio::select! {
                _ = sleep(self.config.polling_interval) => false,
                _ = stop.wait_for(|stopped| *stopped) => true,
            };
            if stopped {
                break;
            }
        }
        info!("worker for {} has finished", key);
    }
}
