use std::time::Duration;

use futures::stream::Stream;
use log::info;

use crate::client::ApiClient;
use crate::error::Result;

use super::stream::LogStream;
use super::types::LogEntry;

/// Default overall timeout for stage logs, which are expected to be finished.
pub const DEFAULT_STAGE_LOG_TIMEOUT: Duration = Duration::from_secs(30);
/// Default overall timeout for the `collect` helpers.
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for draining a log stream into a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    /// Stop after this many entries
    pub max_entries: Option<usize>,
    /// Overall read timeout; expiry returns what was collected so far
    pub timeout: Option<Duration>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            max_entries: None,
            timeout: Some(DEFAULT_COLLECT_TIMEOUT),
        }
    }
}

/// Opens log streams for a single workspace.
pub struct WorkspaceLogs {
    client: ApiClient,
    workspace_id: u64,
}

impl WorkspaceLogs {
    pub fn new(client: ApiClient, workspace_id: u64) -> Self {
        Self {
            client,
            workspace_id,
        }
    }

    pub fn workspace_id(&self) -> u64 {
        self.workspace_id
    }

    pub fn stage_endpoint(&self, stage: &str, step: u32) -> String {
        format!(
            "/workspaces/{}/logs/{}/{step}",
            self.workspace_id,
            urlencoding::encode(stage)
        )
    }

    pub fn server_endpoint(&self, step: u32, server: &str) -> String {
        format!(
            "/workspaces/{}/logs/run/{step}/server/{}",
            self.workspace_id,
            urlencoding::encode(server)
        )
    }

    pub fn replica_endpoint(&self, step: u32, replica: &str) -> String {
        format!(
            "/workspaces/{}/logs/run/{step}/replica/{}",
            self.workspace_id,
            urlencoding::encode(replica)
        )
    }

    /// Open a stream at `endpoint`. Fails without a stream if the handshake is rejected.
    pub async fn open(&self, endpoint: &str, timeout: Option<Duration>) -> Result<LogStream> {
        info!("Streaming logs from {endpoint}");
        let response = self.client.open_event_stream(endpoint).await?;
        Ok(LogStream::from_response(endpoint, response, timeout))
    }

    pub async fn open_stream(
        &self,
        stage: impl AsRef<str>,
        step: u32,
        timeout: Option<Duration>,
    ) -> Result<LogStream> {
        self.open(&self.stage_endpoint(stage.as_ref(), step), timeout)
            .await
    }

    pub async fn open_server_stream(
        &self,
        step: u32,
        server: &str,
        timeout: Option<Duration>,
    ) -> Result<LogStream> {
        self.open(&self.server_endpoint(step, server), timeout).await
    }

    pub async fn open_replica_stream(
        &self,
        step: u32,
        replica: &str,
        timeout: Option<Duration>,
    ) -> Result<LogStream> {
        self.open(&self.replica_endpoint(step, replica), timeout)
            .await
    }

    /// Open a stage step stream bounded by [`DEFAULT_STAGE_LOG_TIMEOUT`].
    pub async fn open_stage_logs(&self, stage: impl AsRef<str>, step: u32) -> Result<LogStream> {
        self.open_stream(stage, step, Some(DEFAULT_STAGE_LOG_TIMEOUT))
            .await
    }

    /// Open a server run log stream that stays open until the server ends it.
    pub async fn open_server_logs(&self, step: u32, server: &str) -> Result<LogStream> {
        self.open_server_stream(step, server, None).await
    }

    /// Open a replica run log stream that stays open until the server ends it.
    pub async fn open_replica_logs(&self, step: u32, replica: &str) -> Result<LogStream> {
        self.open_replica_stream(step, replica, None).await
    }

    /// Stream logs of a stage step, bounded by [`DEFAULT_STAGE_LOG_TIMEOUT`].
    pub async fn stream(
        &self,
        stage: impl AsRef<str>,
        step: u32,
    ) -> Result<impl Stream<Item = Result<LogEntry>> + Send> {
        Ok(self.open_stage_logs(stage, step).await?.into_stream())
    }

    /// Follow the run logs of a server until the server ends the stream.
    pub async fn stream_server(
        &self,
        step: u32,
        server: &str,
    ) -> Result<impl Stream<Item = Result<LogEntry>> + Send> {
        Ok(self.open_server_logs(step, server).await?.into_stream())
    }

    /// Follow the run logs of a replica until the server ends the stream.
    pub async fn stream_replica(
        &self,
        step: u32,
        replica: &str,
    ) -> Result<impl Stream<Item = Result<LogEntry>> + Send> {
        Ok(self.open_replica_logs(step, replica).await?.into_stream())
    }

    pub async fn collect(
        &self,
        stage: impl AsRef<str>,
        step: u32,
        options: CollectOptions,
    ) -> Result<Vec<LogEntry>> {
        self.open_stream(stage, step, options.timeout)
            .await?
            .collect_entries(options.max_entries)
            .await
    }

    pub async fn collect_server(
        &self,
        step: u32,
        server: &str,
        options: CollectOptions,
    ) -> Result<Vec<LogEntry>> {
        self.open_server_stream(step, server, options.timeout)
            .await?
            .collect_entries(options.max_entries)
            .await
    }

    pub async fn collect_replica(
        &self,
        step: u32,
        replica: &str,
        options: CollectOptions,
    ) -> Result<Vec<LogEntry>> {
        self.open_replica_stream(step, replica, options.timeout)
            .await?
            .collect_entries(options.max_entries)
            .await
    }
}
