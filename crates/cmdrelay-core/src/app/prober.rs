//! QueueProber - 起動時のキュー疎通確認
//!
//! HTTP サーバとワーカーを起動する前に一度だけ走る。
//! リトライを使い切っても起動は止めない（fail-open）。結果は
//! `ServiceStatus` の readiness フラグに書かれ、`/health` から見える。

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::backoff::BackoffPolicy;
use crate::app::status::ServiceStatus;
use crate::ports::{MessageQueue, QueueError};

pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Outcome of a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub attempts: u32,
}

pub struct QueueProber {
    command_queue: Arc<dyn MessageQueue>,
    response_queue: Arc<dyn MessageQueue>,
    status: Arc<ServiceStatus>,
    policy: BackoffPolicy,
    max_retries: u32,
}

impl QueueProber {
    pub fn new(
        command_queue: Arc<dyn MessageQueue>,
        response_queue: Arc<dyn MessageQueue>,
        status: Arc<ServiceStatus>,
    ) -> Self {
        Self {
            command_queue,
            response_queue,
            status,
            policy: BackoffPolicy::probe_default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Probe both queues until they answer or the retry budget runs out.
    ///
    /// Attempt `n` that fails waits `policy.next_delay(n)` before attempt
    /// `n + 1`; there is no wait after the last attempt.
    pub async fn run(&self) -> Readiness {
        for attempt in 1..=self.max_retries {
            info!(attempt, max = self.max_retries, "verifying queues");

            match self.probe_once().await {
                Ok(()) => {
                    info!(attempt, "queues verified");
                    self.status.set_queues_verified(true);
                    return Readiness {
                        ready: true,
                        attempts: attempt,
                    };
                }
                Err(err) if attempt == self.max_retries => {
                    warn!(
                        attempt,
                        error = %err,
                        "queue verification exhausted; continuing without verified queues"
                    );
                }
                Err(err) => {
                    let delay = self.policy.next_delay(attempt);
                    warn!(attempt, error = %err, ?delay, "queue verification failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.status.set_queues_verified(false);
        Readiness {
            ready: false,
            attempts: self.max_retries,
        }
    }

    async fn probe_once(&self) -> Result<(), QueueError> {
        for queue in [&self.command_queue, &self.response_queue] {
            let props = queue.properties().await?;
            info!(
                queue = %props.name,
                approximate_messages = ?props.approximate_message_count,
                "queue reachable"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryQueue;
    use std::time::Duration;
    use tokio::time::Instant;

    fn prober(
        commands: &Arc<InMemoryQueue>,
        responses: &Arc<InMemoryQueue>,
    ) -> (QueueProber, Arc<ServiceStatus>) {
        let status = Arc::new(ServiceStatus::new());
        let prober = QueueProber::new(commands.clone(), responses.clone(), status.clone());
        (prober, status)
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_attempt() {
        let commands = Arc::new(InMemoryQueue::new("commandqueue"));
        let responses = Arc::new(InMemoryQueue::new("responsequeue"));
        let (prober, status) = prober(&commands, &responses);

        let readiness = prober.run().await;
        assert_eq!(readiness, Readiness { ready: true, attempts: 1 });
        assert!(status.queues_verified());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_growing_delay() {
        let commands = Arc::new(InMemoryQueue::new("commandqueue"));
        let responses = Arc::new(InMemoryQueue::new("responsequeue"));
        commands.fail_next(2);
        let (prober, status) = prober(&commands, &responses);

        let started = Instant::now();
        let readiness = prober.run().await;

        assert_eq!(readiness, Readiness { ready: true, attempts: 3 });
        // 5s after attempt 1, 10s after attempt 2
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert!(status.queues_verified());
    }

    #[tokio::test(start_paused = true)]
    async fn response_queue_failure_counts_as_attempt() {
        let commands = Arc::new(InMemoryQueue::new("commandqueue"));
        let responses = Arc::new(InMemoryQueue::new("responsequeue"));
        responses.fail_next(1);
        let (prober, _) = prober(&commands, &responses);

        let readiness = prober.run().await;
        assert_eq!(readiness.attempts, 2);
        assert!(readiness.ready);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_open_after_budget() {
        let commands = Arc::new(InMemoryQueue::new("commandqueue"));
        let responses = Arc::new(InMemoryQueue::new("responsequeue"));
        commands.fail_next(100);
        let (prober, status) = prober(&commands, &responses);
        let prober = prober.with_max_retries(3);

        let started = Instant::now();
        let readiness = prober.run().await;

        assert_eq!(readiness, Readiness { ready: false, attempts: 3 });
        // waits only between attempts: 5s + 10s
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert!(!status.queues_verified());
    }
}
