use async_trait::async_trait;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::error::{Result, StageWatchError};

use super::sync::{wait_for_stage, StageStatusSource, WaitOptions};
use super::types::{PipelineStatus, StageOutcome};

/// Pipeline operations of a single workspace.
pub struct WorkspaceLandscape {
    client: ApiClient,
    workspace_id: u64,
}

impl WorkspaceLandscape {
    pub fn new(client: ApiClient, workspace_id: u64) -> Self {
        Self {
            client,
            workspace_id,
        }
    }

    pub fn workspace_id(&self) -> u64 {
        self.workspace_id
    }

    fn stage_path(&self, stage: &str) -> String {
        format!(
            "/workspaces/{}/pipeline/{}",
            self.workspace_id,
            urlencoding::encode(stage)
        )
    }

    /// One status per replica/server participating in `stage`.
    pub async fn get_stage_status(&self, stage: impl AsRef<str>) -> Result<Vec<PipelineStatus>> {
        self.client.get_json(&self.stage_path(stage.as_ref())).await
    }

    /// Start a stage, optionally with a named CI profile (required on the first run after a deploy).
    pub async fn start_stage(&self, stage: impl AsRef<str>, profile: Option<&str>) -> Result<()> {
        let stage = stage.as_ref();
        let path = match profile {
            Some(profile) => {
                validate_profile_name(profile)?;
                format!("{}/start/{profile}", self.stage_path(stage))
            }
            None => format!("{}/start", self.stage_path(stage)),
        };

        info!("Starting pipeline stage '{stage}' in workspace {}", self.workspace_id);
        self.client.post(&path).await
    }

    pub async fn stop_stage(&self, stage: impl AsRef<str>) -> Result<()> {
        let stage = stage.as_ref();
        info!("Stopping pipeline stage '{stage}' in workspace {}", self.workspace_id);
        self.client
            .post(&format!("{}/stop", self.stage_path(stage)))
            .await
    }

    pub async fn wait_for_stage(
        &self,
        stage: impl AsRef<str>,
        options: &WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        wait_for_stage(self, stage.as_ref(), options, cancel).await
    }
}

#[async_trait]
impl StageStatusSource for WorkspaceLandscape {
    async fn stage_status(&self, stage: &str) -> Result<Vec<PipelineStatus>> {
        self.get_stage_status(stage).await
    }
}

/// Profile names map to `ci.<name>.yml` and may only use `[A-Za-z0-9_-]`.
pub fn validate_profile_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(StageWatchError::InvalidProfileName(name.to_owned()))
    }
}
