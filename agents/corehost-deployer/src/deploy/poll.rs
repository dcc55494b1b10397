//! Status Poller
//!
//! Queries a runtime instance on a fixed interval until it reaches a
//! terminal status or the configured bound runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deploy::events::{DeployEvent, EventSink};
use crate::error::PollError;
use crate::runtime::adapter::{RuntimeStatus, WorkloadService};

/// Interval and bounds for one polling run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Maximum number of status queries; `None` means no cap
    pub max_attempts: Option<u32>,
    /// Maximum total wait; `None` means no cap
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            timeout: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some() || self.timeout.is_some()
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
            .with_max_attempts(90)
            .with_timeout(Duration::from_secs(1800))
    }
}

/// Polls runtime instance status
pub struct StatusPoller {
    service: Arc<dyn WorkloadService>,
    events: EventSink,
}

impl StatusPoller {
    pub fn new(service: Arc<dyn WorkloadService>) -> Self {
        Self {
            service,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Poll until a terminal status is observed.
    ///
    /// Failure statuses are returned, not raised. Only an exhausted bound or
    /// a failed query produces an error.
    pub async fn await_terminal(
        &self,
        runtime_id: &str,
        policy: PollPolicy,
    ) -> Result<RuntimeStatus, PollError> {
        if !policy.is_bounded() {
            warn!(runtime_id = %runtime_id, "Polling without an attempt or time bound");
        }

        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let status = self
                .service
                .get_status(runtime_id)
                .await
                .map_err(|source| PollError::Query {
                    runtime_id: runtime_id.to_string(),
                    source,
                })?;

            debug!(runtime_id = %runtime_id, attempt = attempts, status = %status, "Status observed");
            self.events
                .emit(DeployEvent::StatusObserved {
                    attempt: attempts,
                    status: status.clone(),
                })
                .await;

            if status.is_terminal() {
                info!(runtime_id = %runtime_id, status = %status, attempts, "Runtime reached terminal status");
                self.events
                    .emit(DeployEvent::TerminalStatus {
                        status: status.clone(),
                    })
                    .await;
                return Ok(status);
            }

            let elapsed = started.elapsed();
            let attempts_exhausted = policy.max_attempts.is_some_and(|max| attempts >= max);
            let time_exhausted = policy
                .timeout
                .is_some_and(|limit| elapsed.saturating_add(policy.interval) > limit);
            if attempts_exhausted || time_exhausted {
                warn!(
                    runtime_id = %runtime_id,
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    "Gave up waiting for terminal status"
                );
                return Err(PollError::Timeout {
                    runtime_id: runtime_id.to_string(),
                    attempts,
                    elapsed,
                    last_status: Some(status),
                });
            }

            tokio::time::sleep(policy.interval).await;
        }
    }
}
