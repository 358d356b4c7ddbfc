// Task Scheduler - Periodic loops with shortened error backoff
// Each task records its next-attempt instant explicitly: success reschedules
// at the full period, an error reschedules at the task's backoff. A failing
// body never kills its loop.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Timing contract for one periodic task
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: &'static str,
    pub period: Duration,
    pub error_backoff: Duration,
}

/// Spawn a periodic task. The first attempt runs immediately; afterwards the
/// loop sleeps until the recorded next-attempt instant. Flipping the shutdown
/// watch to true stops the loop at the next wakeup.
pub fn spawn_periodic<F, Fut>(
    spec: TaskSpec,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    tokio::spawn(async move {
        info!(task = spec.name, period_secs = spec.period.as_secs(), "Task started");
        let mut next_attempt = Instant::now();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(next_attempt) => {
                    match task().await {
                        Ok(()) => {
                            debug!(task = spec.name, "Task run complete");
                            next_attempt = Instant::now() + spec.period;
                        }
                        Err(e) => {
                            warn!(
                                task = spec.name,
                                error = %e,
                                backoff_secs = spec.error_backoff.as_secs(),
                                "Task run failed, retrying after backoff"
                            );
                            next_attempt = Instant::now() + spec.error_backoff;
                        }
                    }
                }
            }
        }

        info!(task = spec.name, "Task stopped");
    })
}
