//! Timer-driven tracking of a long-running backend action.
//!
//! A monitor starts in [`MonitorState::Submitted`], moves to
//! [`MonitorState::Polling`] once the backend hands back a handle and ends in
//! one of the terminal states. Waits between polls are `tokio` timers, so a
//! slow backend parks a task rather than a thread.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_wait: Duration,
    pub max_wait: Duration,
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub const fn new(initial_wait: Duration, max_wait: Duration, max_retries: u32) -> Self {
        Self {
            initial_wait,
            max_wait,
            max_retries,
        }
    }

    pub fn next_wait(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_wait)
    }
}

impl Default for BackoffPolicy {
    /// 1s doubling up to 15s, 50 polls.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(15), 50)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Submitted,
    Polling,
    Complete,
    Failed,
    Timeout,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitorState::Complete | MonitorState::Failed | MonitorState::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAction {
    Create,
    Update,
}

impl StackAction {
    pub fn complete_status(&self) -> &'static str {
        match self {
            StackAction::Create => "CREATE_COMPLETE",
            StackAction::Update => "UPDATE_COMPLETE",
        }
    }

    pub fn failed_status(&self) -> &'static str {
        match self {
            StackAction::Create => "CREATE_FAILED",
            StackAction::Update => "UPDATE_FAILED",
        }
    }
}

#[derive(Debug)]
pub struct DeploymentMonitor {
    policy: BackoffPolicy,
    state: MonitorState,
    polls: u32,
    waits: Vec<Duration>,
    harvest_polls: u32,
}

impl DeploymentMonitor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: MonitorState::Submitted,
            polls: 0,
            waits: Vec::new(),
            harvest_polls: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Status polls issued so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Waits slept between status polls, in order.
    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }

    pub fn harvest_polls(&self) -> u32 {
        self.harvest_polls
    }

    /// Records the handle returned by the submit call. A missing handle fails the monitor.
    pub fn submitted(&mut self, handle: Option<String>) -> Result<String, MonitorError> {
        match handle {
            Some(handle) => {
                self.state = MonitorState::Polling;
                Ok(handle)
            }
            None => {
                self.state = MonitorState::Failed;
                Err(MonitorError::Unreachable(
                    "unable to contact the VIM to instantiate the stack".to_string(),
                ))
            }
        }
    }

    /// Polls until the status is the completion or failure status of `action`,
    /// or the retry budget runs out.
    pub async fn poll_until_terminal<F, Fut>(
        &mut self,
        action: StackAction,
        mut poll: F,
    ) -> Result<String, MonitorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        self.state = MonitorState::Polling;
        let mut wait = self.policy.initial_wait;

        for attempt in 1..=self.policy.max_retries {
            self.polls += 1;
            let status = poll().await;
            debug!(attempt, status = ?status, "Polled stack status");

            match status.as_deref() {
                Some(s) if s == action.complete_status() => {
                    self.state = MonitorState::Complete;
                    return Ok(s.to_string());
                }
                Some(s) if s == action.failed_status() => {
                    self.state = MonitorState::Failed;
                    return Err(MonitorError::Failed(format!("stack status is {s}")));
                }
                _ => {}
            }

            if attempt < self.policy.max_retries {
                tokio::time::sleep(wait).await;
                self.waits.push(wait);
                wait = self.policy.next_wait(wait);
            }
        }

        warn!(polls = self.polls, "Stack never reached a terminal status");
        self.state = MonitorState::Timeout;
        Err(MonitorError::Timeout(
            "can't get stack status after the maximum number of retries".to_string(),
        ))
    }

    /// Second polling sequence fetching the result of a completed action.
    /// `fetch` yields `None` while the result is unavailable or empty.
    pub async fn harvest<T, F, Fut>(&mut self, mut fetch: F) -> Result<T, MonitorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let mut wait = self.policy.initial_wait;

        for attempt in 1..=self.policy.max_retries {
            self.harvest_polls += 1;
            if let Some(result) = fetch().await {
                self.state = MonitorState::Complete;
                return Ok(result);
            }
            debug!(attempt, "Stack composition not available yet");

            if attempt < self.policy.max_retries {
                tokio::time::sleep(wait).await;
                wait = self.policy.next_wait(wait);
            }
        }

        self.state = MonitorState::Timeout;
        Err(MonitorError::Timeout(
            "can't get stack composition after the maximum number of retries".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn scripted(statuses: Vec<Option<&str>>) -> Arc<Mutex<VecDeque<Option<String>>>> {
        Arc::new(Mutex::new(
            statuses
                .into_iter()
                .map(|s| s.map(str::to_string))
                .collect(),
        ))
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = BackoffPolicy::default();
        let mut wait = policy.initial_wait;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(wait.as_secs());
            wait = policy.next_wait(wait);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 15, 15]);
    }

    #[test]
    fn test_missing_handle_fails_immediately() {
        let mut monitor = DeploymentMonitor::new(BackoffPolicy::default());
        assert_eq!(monitor.state(), MonitorState::Submitted);
        assert!(matches!(
            monitor.submitted(None),
            Err(MonitorError::Unreachable(_))
        ));
        assert_eq!(monitor.state(), MonitorState::Failed);
        assert_eq!(monitor.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_after_three_polls() {
        let script = scripted(vec![None, None, Some("CREATE_FAILED")]);
        let mut monitor = DeploymentMonitor::new(BackoffPolicy::default());
        monitor.submitted(Some("stack-1".into())).unwrap();

        let result = monitor
            .poll_until_terminal(StackAction::Create, || {
                let script = script.clone();
                async move { script.lock().unwrap().pop_front().flatten() }
            })
            .await;

        assert!(matches!(result, Err(MonitorError::Failed(_))));
        assert_eq!(monitor.state(), MonitorState::Failed);
        assert_eq!(monitor.polls(), 3);
        assert_eq!(
            monitor.waits(),
            &[Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_terminal_times_out() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(15), 7);
        let mut monitor = DeploymentMonitor::new(policy);

        let result = monitor
            .poll_until_terminal(StackAction::Create, || async {
                Some("CREATE_IN_PROGRESS".to_string())
            })
            .await;

        assert!(matches!(result, Err(MonitorError::Timeout(_))));
        assert_eq!(monitor.state(), MonitorState::Timeout);
        assert_eq!(monitor.polls(), 7);
        assert_eq!(monitor.waits().len(), 6);
        assert_eq!(monitor.waits().last(), Some(&Duration::from_secs(15)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_completion_ignores_create_statuses() {
        let script = scripted(vec![Some("CREATE_COMPLETE"), Some("UPDATE_COMPLETE")]);
        let mut monitor = DeploymentMonitor::new(BackoffPolicy::default());

        let status = monitor
            .poll_until_terminal(StackAction::Update, || {
                let script = script.clone();
                async move { script.lock().unwrap().pop_front().flatten() }
            })
            .await
            .unwrap();

        assert_eq!(status, "UPDATE_COMPLETE");
        assert_eq!(monitor.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_harvest_uses_independent_counters() {
        let mut monitor = DeploymentMonitor::new(BackoffPolicy::default());
        monitor
            .poll_until_terminal(StackAction::Create, || async {
                Some("CREATE_COMPLETE".to_string())
            })
            .await
            .unwrap();

        let attempts = Arc::new(Mutex::new(0));
        let composition = monitor
            .harvest(|| {
                let attempts = attempts.clone();
                async move {
                    let mut n = attempts.lock().unwrap();
                    *n += 1;
                    (*n >= 3).then(|| vec!["server-1".to_string()])
                }
            })
            .await
            .unwrap();

        assert_eq!(composition, vec!["server-1"]);
        assert_eq!(monitor.polls(), 1);
        assert_eq!(monitor.harvest_polls(), 3);
        assert_eq!(monitor.state(), MonitorState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_composition_times_out() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(2), 4);
        let mut monitor = DeploymentMonitor::new(policy);

        let result: Result<Vec<String>, _> = monitor.harvest(|| async { None }).await;
        assert!(matches!(result, Err(MonitorError::Timeout(_))));
        assert_eq!(monitor.harvest_polls(), 4);
        assert!(monitor.state().is_terminal());
    }
}
