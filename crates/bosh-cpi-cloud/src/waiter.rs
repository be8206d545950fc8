//! Poll-until-target-state waiter
//!
//! Cloud control planes converge slowly. [`ResourceWaiter`] polls a status
//! fetch function until one of the target states is observed, the deadline
//! passes, a terminal failure state shows up, or the enclosing task is
//! cancelled.

use crate::error::{CpiError, Result};
use crate::resource::{ResourceKind, ResourceStatus};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Cooperative cancellation point, consulted once per poll iteration
pub trait TaskCheckpoint: Send + Sync {
    fn checkpoint(&self) -> Result<()>;
}

/// Checkpoint that never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

impl TaskCheckpoint for NoCheckpoint {
    fn checkpoint(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared flag flipped by a task supervisor (signal handler, director) to abort waits
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl TaskCheckpoint for CancellationFlag {
    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CpiError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Generic polling state machine
#[derive(Clone)]
pub struct ResourceWaiter {
    poll_interval: Duration,
    timeout: Duration,
    checkpoint: Arc<dyn TaskCheckpoint>,
}

impl ResourceWaiter {
    pub fn new(
        poll_interval: Duration,
        timeout: Duration,
        checkpoint: Arc<dyn TaskCheckpoint>,
    ) -> Self {
        Self {
            poll_interval,
            timeout,
            checkpoint,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until `fetch` reports one of `targets`
    ///
    /// Returns the observed target state. Fails with `Cancelled`, `Timeout`,
    /// `TerminalState`, or whatever error `fetch` itself returns.
    pub async fn wait<S, F, Fut>(
        &self,
        kind: ResourceKind,
        id: &str,
        targets: &[S],
        mut fetch: F,
    ) -> Result<S>
    where
        S: ResourceStatus,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let started_at = Instant::now();
        let expected: Vec<String> = targets.iter().map(|t| t.to_string()).collect();

        loop {
            self.checkpoint.checkpoint()?;

            let elapsed = started_at.elapsed();
            if elapsed > self.timeout {
                return Err(CpiError::Timeout {
                    kind,
                    id: id.to_string(),
                    targets: expected,
                });
            }

            debug!(
                "Waiting for {} `{}' to be {} ({:.1}s)",
                kind,
                id,
                expected.join(", "),
                elapsed.as_secs_f64()
            );

            let state = fetch().await?;

            if state.is_terminal_failure() {
                return Err(CpiError::TerminalState {
                    kind,
                    id: id.to_string(),
                    observed: state.to_string(),
                    expected,
                });
            }

            if targets.contains(&state) {
                info!(
                    "{} `{}' is now {}, took {:.1}s",
                    kind,
                    id,
                    state,
                    started_at.elapsed().as_secs_f64()
                );
                return Ok(state);
            }

            sleep(self.poll_interval).await;
        }
    }
}

impl Default for ResourceWaiter {
    fn default() -> Self {
        Self::new(
            DEFAULT_POLL_INTERVAL,
            DEFAULT_STATE_TIMEOUT,
            Arc::new(NoCheckpoint),
        )
    }
}
