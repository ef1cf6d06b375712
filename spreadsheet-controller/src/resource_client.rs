use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use std::time::Duration;

/// Query sent to the aggregator service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ReadRequest {
    pub base_url: String,
    pub kind: String,
    /// `None` requests resources of all namespaces.
    pub namespace: Option<String>,
}

/// Upload sent to the formatter service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct WriteRequest {
    pub base_url: String,
    pub correlation_id: String,
}

/// Why a collaborator call did not succeed. The [`Display`](std::fmt::Display)
/// output is recorded verbatim as the phase error in the Spreadsheet status.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum PhaseFailure {
    #[error("Timeout")]
    Timeout,
    #[error("status code is {0}")]
    Status(u16),
    /// Any other transport problem, e.g. connection refused.
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for PhaseFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PhaseFailure::Timeout
        } else {
            PhaseFailure::Transport(e.to_string())
        }
    }
}

/// The two collaborator services of a reconcile cycle.
#[async_trait]
pub(crate) trait ResourceClient: Send + Sync {
    /// Fetch the raw JSON document of the requested resources.
    async fn read(&self, request: &ReadRequest) -> Result<Bytes, PhaseFailure>;

    /// Hand a previously read document over for formatting.
    async fn write(&self, request: &WriteRequest, body: Bytes) -> Result<(), PhaseFailure>;
}

fn resource_url(base_url: &str) -> String {
    format!("{}/api/v1/resource", base_url.trim_end_matches('/'))
}

/// [`ResourceClient`] talking HTTP to the aggregator and formatter services.
///
/// Reads are interactive and get a short timeout, writes trigger the whole
/// spreadsheet generation downstream and get a long one.
pub(crate) struct HttpResourceClient {
    client: reqwest::Client,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl HttpResourceClient {
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
        accept_invalid_certs: bool,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self {
            client,
            read_timeout,
            write_timeout,
        })
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn read(&self, request: &ReadRequest) -> Result<Bytes, PhaseFailure> {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(2);
        if let Some(ns) = &request.namespace {
            query.push(("ns", ns.as_str()));
        }
        query.push(("kind", request.kind.as_str()));
        let response = self
            .client
            .get(resource_url(&request.base_url))
            .query(&query)
            .timeout(self.read_timeout)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(PhaseFailure::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?)
    }

    async fn write(&self, request: &WriteRequest, body: Bytes) -> Result<(), PhaseFailure> {
        let response = self
            .client
            .post(resource_url(&request.base_url))
            .query(&[("id", request.correlation_id.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.write_timeout)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(PhaseFailure::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
