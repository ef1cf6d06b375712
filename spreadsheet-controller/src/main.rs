#[macro_use]
extern crate log;

use anyhow::anyhow;
use controller::SpreadsheetController;
use kube::{Api, Client};
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus_exporter::start_prometheus_metrics_server;
use resource_client::HttpResourceClient;
use spreadsheet_controller_apis::Spreadsheet;
use status_updater::KubeSpreadsheetStore;
use std::{sync::Arc, time::Duration};

mod controller;
mod errors;
mod polling_interval;
mod prometheus_exporter;
mod registry;
mod resource_client;
mod status_updater;
mod utils;
mod worker;

#[cfg(test)]
mod test_support;

/// The K8s field manager name.
const MANAGER: &'static str = "spreadsheet-controller";

/// Settings of the HTTP client talking to the aggregator and formatter.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CollaboratorSettings {
    /// Applies to connections of both collaborators.
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    accept_invalid_certs: bool,
}

impl CollaboratorSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let timeout = |name: &str, default: u64| secs(name, lookup(name), default);
        Self {
            connect_timeout: timeout("COLLABORATOR_CONNECT_TIMEOUT_SECS", 3),
            read_timeout: timeout("READ_TIMEOUT_SECS", 3),
            write_timeout: timeout("WRITE_TIMEOUT_SECS", 300),
            accept_invalid_certs: flag(lookup("COLLABORATOR_INSECURE_TLS")),
        }
    }
}

#[derive(Clone)]
struct Configuration {
    client: Client,
    spreadsheets: Api<Spreadsheet>,
    collaborators: CollaboratorSettings,
}

impl Configuration {
    pub fn new(client: Client) -> Self {
        let watch_namespace = env_var("WATCH_NAMESPACE").unwrap_or_else(|| "default".to_string());
        let spreadsheets = if watch_namespace == "*" {
            info!("Controller is watching Spreadsheets in all namespaces");
            Api::<Spreadsheet>::all(client.clone())
        } else {
            info!(
                "Controller is only watching Spreadsheets in namespace {}",
                watch_namespace
            );
            Api::<Spreadsheet>::namespaced(client.clone(), watch_namespace.as_str())
        };
        Configuration {
            client,
            spreadsheets,
            collaborators: CollaboratorSettings::from_lookup(env_var),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn secs(name: &str, value: Option<String>, default: u64) -> Duration {
    let secs = match value.map(|v| v.parse::<u64>()) {
        Some(Ok(secs)) => secs,
        Some(Err(e)) => {
            warn!("ignoring invalid {} ({}), using {}s", name, e, default);
            default
        }
        None => default,
    };
    Duration::from_secs(secs)
}

fn flag(value: Option<String>) -> bool {
    value.map_or(false, |v| {
        matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;
    let metrics_addr = env_var("METRICS_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
    let metrics_port = env_var("METRICS_LISTEN_PORT").unwrap_or_else(|| "9000".to_string());
    let metrics_addr = format!("{}:{}", metrics_addr, metrics_port).parse()?;
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    global::set_meter_provider(SdkMeterProvider::builder().with_reader(exporter).build());
    let prometheus_metrics_exporter = start_prometheus_metrics_server(metrics_addr, registry);

    let client = Client::try_default().await?;
    let configuration = Configuration::new(client);
    let collaborators = &configuration.collaborators;
    let resource_client = HttpResourceClient::new(
        collaborators.connect_timeout,
        collaborators.read_timeout,
        collaborators.write_timeout,
        collaborators.accept_invalid_certs,
    )?;
    let store = KubeSpreadsheetStore::new(configuration.client.clone());
    let controller = SpreadsheetController::new(Arc::new(store), Arc::new(resource_client))
        .start(configuration.spreadsheets.clone());
    info!("start controller ...");
    // Neither future ends unless something went wrong; a restart rebuilds all
    // workers from a fresh list of Spreadsheets.
    tokio::select! {
       res = controller => {
           if let Err(e) = &res {
               error!("controller stopped: {}", e);
           }
           res?
       },
       res = prometheus_metrics_exporter => res?,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> CollaboratorSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CollaboratorSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn collaborator_defaults() {
        assert_eq!(
            CollaboratorSettings {
                connect_timeout: Duration::from_secs(3),
                read_timeout: Duration::from_secs(3),
                write_timeout: Duration::from_secs(300),
                accept_invalid_certs: false,
            },
            settings(&[])
        );
    }

    #[test]
    fn connect_timeout_is_shared_by_both_collaborators() {
        let s = settings(&[
            ("COLLABORATOR_CONNECT_TIMEOUT_SECS", "7"),
            ("READ_TIMEOUT_SECS", "4"),
            ("WRITE_TIMEOUT_SECS", "60"),
            ("COLLABORATOR_INSECURE_TLS", "true"),
        ]);
        assert_eq!(Duration::from_secs(7), s.connect_timeout);
        assert_eq!(Duration::from_secs(4), s.read_timeout);
        assert_eq!(Duration::from_secs(60), s.write_timeout);
        assert!(s.accept_invalid_certs);
        // the old, misleading name is not honoured
        assert_eq!(
            Duration::from_secs(3),
            settings(&[("WRITE_CONNECT_TIMEOUT_SECS", "7")]).connect_timeout
        );
    }

    #[test]
    fn timeouts() {
        assert_eq!(Duration::from_secs(3), secs("X", None, 3));
        assert_eq!(Duration::from_secs(10), secs("X", Some("10".to_string()), 3));
        assert_eq!(Duration::from_secs(300), secs("X", Some("5m".to_string()), 300));
    }

    #[test]
    fn flags() {
        assert!(!flag(None));
        assert!(flag(Some("true".to_string())));
        assert!(flag(Some("TRUE".to_string())));
        assert!(flag(Some("1".to_string())));
        assert!(!flag(Some("no".to_string())));
    }
}
