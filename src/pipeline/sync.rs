use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StageWatchError};

use super::types::{PipelineState, PipelineStatus, StageOutcome};

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Fetches the current per-worker statuses of a stage.
#[async_trait]
pub trait StageStatusSource: Send + Sync {
    async fn stage_status(&self, stage: &str) -> Result<Vec<PipelineStatus>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Only wait for workers of this server
    pub server: Option<String>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            server: None,
        }
    }
}

/// Whether a worker status counts towards stage completion.
///
/// With a server filter only that server's workers count. Without one, a
/// worker counts if it has any steps, or else if it has left `waiting`.
pub fn is_relevant(status: &PipelineStatus, server: Option<&str>) -> bool {
    if let Some(server) = server {
        return status.server == server;
    }

    if !status.steps.is_empty() {
        return true;
    }

    status.state != PipelineState::Waiting
}

pub fn relevant_statuses(
    statuses: Vec<PipelineStatus>,
    server: Option<&str>,
) -> Vec<PipelineStatus> {
    statuses
        .into_iter()
        .filter(|status| is_relevant(status, server))
        .collect()
}

/// Poll `source` until every relevant worker of `stage` is terminal.
///
/// Workers ending in `failure` or `aborted` still complete the wait; the
/// caller decides pass/fail from the returned outcome. Errors from `source`
/// propagate unchanged.
///
/// # Errors
///
/// - [`StageWatchError::InvalidPollInterval`] for a zero interval, before any fetch
/// - [`StageWatchError::StageTimeout`] when `timeout` of polling elapses
/// - [`StageWatchError::Cancelled`] when `cancel` fires during a fetch or sleep
pub async fn wait_for_stage<S>(
    source: &S,
    stage: &str,
    options: &WaitOptions,
    cancel: &CancellationToken,
) -> Result<StageOutcome>
where
    S: StageStatusSource + ?Sized,
{
    if options.poll_interval.is_zero() {
        return Err(StageWatchError::InvalidPollInterval(options.poll_interval));
    }

    let server = options.server.as_deref();
    let mut elapsed = Duration::ZERO;

    while elapsed < options.timeout {
        let statuses = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StageWatchError::Cancelled),
            statuses = source.stage_status(stage) => statuses?,
        };

        let relevant = relevant_statuses(statuses, server);

        if relevant.is_empty() {
            debug!("Pipeline stage '{stage}': no servers with steps yet, waiting...");
        } else if relevant.iter().all(|s| s.state.is_terminal()) {
            debug!("Pipeline stage '{stage}' completed.");
            return Ok(StageOutcome {
                stage: stage.to_owned(),
                statuses: relevant,
            });
        } else {
            let states = relevant
                .iter()
                .map(|s| format!("{}={}", s.server, s.state))
                .collect::<Vec<_>>()
                .join(", ");
            debug!(
                "Pipeline stage '{stage}' status: {states} (elapsed: {:.1}s)",
                elapsed.as_secs_f64()
            );
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StageWatchError::Cancelled),
            () = tokio::time::sleep(options.poll_interval) => {}
        }
        elapsed += options.poll_interval;
    }

    Err(StageWatchError::StageTimeout {
        stage: stage.to_owned(),
        timeout: options.timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::StepStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed sequence of poll results, repeating the last one.
    struct Scripted {
        polls: Mutex<VecDeque<Vec<PipelineStatus>>>,
        last: Mutex<Vec<PipelineStatus>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(polls: Vec<Vec<PipelineStatus>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                last: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageStatusSource for Scripted {
        async fn stage_status(&self, _stage: &str) -> Result<Vec<PipelineStatus>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.polls.lock().unwrap().pop_front() {
                *last = next;
            }
            Ok(last.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl StageStatusSource for Failing {
        async fn stage_status(&self, _stage: &str) -> Result<Vec<PipelineStatus>> {
            Err(StageWatchError::NotFound("workspace 1".to_string()))
        }
    }

    fn worker(server: &str, state: PipelineState, steps: usize) -> PipelineStatus {
        PipelineStatus {
            state,
            started_at: None,
            finished_at: None,
            steps: (0..steps)
                .map(|_| StepStatus {
                    state,
                    started_at: None,
                    finished_at: None,
                })
                .collect(),
            replica: format!("{server}-0"),
            server: server.to_string(),
        }
    }

    fn options(timeout: u64, poll: u64, server: Option<&str>) -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_secs(timeout),
            poll_interval: Duration::from_secs(poll),
            server: server.map(ToString::to_string),
        }
    }

    #[test]
    fn test_relevance_without_filter() {
        assert!(!is_relevant(&worker("web", PipelineState::Waiting, 0), None));
        assert!(is_relevant(&worker("web", PipelineState::Running, 0), None));
        assert!(is_relevant(&worker("web", PipelineState::Success, 0), None));
        // steps present outweigh the waiting state
        assert!(is_relevant(&worker("web", PipelineState::Waiting, 2), None));
    }

    #[test]
    fn test_relevance_with_server_filter() {
        assert!(is_relevant(&worker("web", PipelineState::Waiting, 0), Some("web")));
        assert!(!is_relevant(&worker("worker", PipelineState::Running, 3), Some("web")));
    }

    #[tokio::test]
    async fn test_zero_poll_interval_fails_without_fetching() {
        let source = Scripted::new(vec![vec![worker("web", PipelineState::Success, 1)]]);

        let err = wait_for_stage(&source, "run", &options(60, 0, None), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StageWatchError::InvalidPollInterval(_)));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_third_poll() {
        let source = Scripted::new(vec![
            vec![worker("web", PipelineState::Waiting, 0)],
            vec![worker("web", PipelineState::Running, 1)],
            vec![worker("web", PipelineState::Success, 1)],
        ]);
        let start = Instant::now();

        let outcome = wait_for_stage(&source, "run", &options(300, 5, None), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(outcome.statuses.len(), 1);
        assert_eq!(outcome.statuses[0].state, PipelineState::Success);
        assert!(outcome.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_filter_ignores_other_servers() {
        let source = Scripted::new(vec![vec![
            worker("web", PipelineState::Success, 1),
            worker("worker", PipelineState::Running, 1),
        ]]);

        let outcome = wait_for_stage(
            &source,
            "run",
            &options(300, 5, Some("web")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(outcome.statuses.len(), 1);
        assert_eq!(outcome.statuses[0].server, "web");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_a_completed_outcome() {
        let source = Scripted::new(vec![vec![
            worker("web", PipelineState::Failure, 2),
            worker("api", PipelineState::Aborted, 0),
            worker("idle", PipelineState::Waiting, 0),
        ]]);

        let outcome = wait_for_stage(&source, "test", &options(30, 5, None), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.statuses.len(), 2);
        assert!(!outcome.all_succeeded());
        assert_eq!(outcome.failed().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_polling_while_nothing_is_relevant() {
        let source = Scripted::new(vec![vec![
            worker("web", PipelineState::Waiting, 0),
            worker("worker", PipelineState::Waiting, 0),
        ]]);

        let err = wait_for_stage(&source, "prepare", &options(20, 5, None), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(source.calls(), 4);
        match err {
            StageWatchError::StageTimeout { stage, timeout } => {
                assert_eq!(stage, "prepare");
                assert_eq!(timeout, Duration::from_secs(20));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_terminal() {
        let source = Scripted::new(vec![vec![worker("web", PipelineState::Running, 1)]]);

        let err = wait_for_stage(&source, "run", &options(12, 5, None), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StageWatchError::StageTimeout { .. }));
        assert!(err.to_string().contains("'run'"));
        // polls at 0s, 5s, 10s
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_propagate() {
        let err = wait_for_stage(&Failing, "run", &options(60, 5, None), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StageWatchError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let source = Scripted::new(vec![vec![worker("web", PipelineState::Running, 1)]]);
        let token = CancellationToken::new();
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            canceller.cancel();
        });

        let err = wait_for_stage(&source, "run", &options(300, 5, None), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, StageWatchError::Cancelled));
        assert_eq!(source.calls(), 2);
    }
}
