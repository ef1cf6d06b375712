use chrono::{DateTime, Local};
use kube::CustomResource;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Placeholder used for every status field which has not been observed yet.
pub const NOT_AVAILABLE: &'static str = "N/A";

/// Sentinel value of `targetNamespace` selecting resources of all namespaces.
pub const ALL_NAMESPACES: &'static str = "all";

pub const RECONCILE_SUCCEEDED: &'static str = "Reconcile Succeeded";
pub const RECONCILE_FAILED_AGGREGATED: &'static str = "Reconcile Failed : aggregated";
pub const RECONCILE_FAILED_FORMATTED: &'static str = "Reconcile Failed : formatted";

/// Format of `startedAt` and `updateAt` timestamps (local time).
pub const TIMESTAMP_FORMAT: &'static str = "%Y/%m/%d %H:%M:%S";

/// Resource kinds the aggregator service knows how to scrape.
pub const SUPPORTED_SCRAPE_RESOURCES: [&'static str; 7] = [
    "Pod",
    "Service",
    "Deployment",
    "ReplicaSet",
    "StatefulSet",
    "Spreadsheet",
    "StorageClass",
];

pub fn format_timestamp(time: DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    format_timestamp(Local::now())
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

/// Spreadsheet report specification, describing which Kubernetes resources should be
/// scraped, how often, and which services aggregate and format them.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sbp.vmware.jp",
    version = "v1alpha1",
    kind = "Spreadsheet",
    plural = "spreadsheet",
    derive = "PartialEq",
    status = "SpreadsheetStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Description",
        "type": "string",
        "jsonPath": ".status.friendlyDescription",
        "description": "Outcome of the latest reconcile cycle."
    }"#,
    printcolumn = r#"{
        "name":"Aggregated",
        "type": "string",
        "jsonPath": ".status.aggregated.success",
        "description": "Whether the latest resource aggregation succeeded."
    }"#,
    printcolumn = r#"{
        "name":"Formatted",
        "type": "string",
        "jsonPath": ".status.formatted.success",
        "description": "Whether the latest spreadsheet formatting succeeded."
    }"#
)]
pub struct SpreadsheetSpec {
    /// Polling interval, e.g. `1h30m`, `45m` or `2h`.
    #[serde(rename = "pollingTime", default)]
    pub polling_time: String,
    /// Base URL of the aggregator service which reads resources from the cluster.
    #[serde(rename = "kubeAggregatorURL", default)]
    pub kube_aggregator_url: String,
    /// Base URL of the formatter service which turns resources into a spreadsheet.
    #[serde(rename = "kubeFormatterURL", default)]
    pub kube_formatter_url: String,
    /// Namespace to scrape, `all` for every namespace.
    #[serde(rename = "targetNamespace", default)]
    pub target_namespace: String,
    /// Kind of the resources to scrape, e.g. `Pod` or `Deployment`.
    #[serde(rename = "scrapeResource", default)]
    pub scrape_resource: String,
}

impl SpreadsheetSpec {
    /// A spec without any field set is not reconciled at all.
    pub fn is_empty(&self) -> bool {
        self.polling_time.is_empty()
            && self.kube_aggregator_url.is_empty()
            && self.kube_formatter_url.is_empty()
            && self.target_namespace.is_empty()
            && self.scrape_resource.is_empty()
    }

    /// The namespace to scrape or `None` if resources of all namespaces are requested.
    pub fn target_namespace(&self) -> Option<&str> {
        if self.target_namespace == ALL_NAMESPACES {
            None
        } else {
            Some(self.target_namespace.as_str())
        }
    }

    pub fn is_supported_scrape_resource(&self) -> bool {
        SUPPORTED_SCRAPE_RESOURCES.contains(&self.scrape_resource.as_str())
    }
}

/// Progress record of one pipeline phase (aggregated or formatted).
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct PhaseStatus {
    /// Error message of the last failed execution.
    #[serde(default = "not_available")]
    pub error: String,
    /// When the phase was executed for the first time.
    #[serde(rename = "startedAt", default = "not_available")]
    pub started_at: String,
    /// `true`, `false` or `N/A` if the phase has not been executed yet.
    #[serde(default = "not_available")]
    pub success: String,
    /// When the phase finished for the last time.
    #[serde(rename = "updateAt", default = "not_available")]
    pub updated_at: String,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self {
            error: not_available(),
            started_at: not_available(),
            success: not_available(),
            updated_at: not_available(),
        }
    }
}

impl PhaseStatus {
    pub fn start(&mut self, at: String) {
        self.started_at = at;
    }

    pub fn record_success(&mut self, at: String) {
        self.success = "true".to_string();
        self.updated_at = at;
    }

    pub fn record_failure(&mut self, error: String, at: String) {
        self.success = "false".to_string();
        self.error = error;
        self.updated_at = at;
    }

    pub fn is_success(&self) -> bool {
        self.success == "true"
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct SpreadsheetStatus {
    /// Phase reading the resources from the aggregator service.
    #[serde(default)]
    pub aggregated: PhaseStatus,
    /// Phase handing the resources over to the formatter service.
    #[serde(default)]
    pub formatted: PhaseStatus,
    /// Human readable outcome of the latest cycle.
    #[serde(rename = "friendlyDescription", default = "not_available")]
    pub friendly_description: String,
}

impl Default for SpreadsheetStatus {
    fn default() -> Self {
        Self {
            aggregated: Default::default(),
            formatted: Default::default(),
            friendly_description: not_available(),
        }
    }
}

impl Spreadsheet {
    /// Make sure a status is present. An existing status is kept as is, so a
    /// restarted controller resumes where the previous one stopped.
    pub fn init_status(&mut self) -> &mut SpreadsheetStatus {
        self.status.get_or_insert_with(SpreadsheetStatus::default)
    }
}
