//! Queue worker: drains work items into the provisioning service.
//!
//! # Polling Model
//!
//! The queue store cannot push notifications, so the worker polls:
//! - a pass that processed at least one item is followed immediately by
//!   another pass, to drain bursts quickly
//! - an empty pass is followed by a sleep of a random whole number of
//!   seconds in the configured range (5 to 10 by default), which spreads
//!   polling from several worker processes apart
//!
//! The sleep is the only blocking point and is interrupted by the shutdown
//! token.
//!
//! # Item Lifecycle
//!
//! An item is claimed under a lease and only removed after the provisioner
//! succeeds. Retryable failures release the claim; permanent failures (or
//! running out of attempts) park the item as failed. If the worker dies in
//! between, the lease expires and another pass picks the item up again.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    models::work_item::ClaimedItem,
    services::provisioner::Provisioner,
    store::{StoreError, WorkQueue},
};

/// Randomized idle delay range, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min_secs: u64,
    max_secs: u64,
}

impl Backoff {
    /// An inverted range is swapped rather than rejected.
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs: min_secs.min(max_secs),
            max_secs: min_secs.max(max_secs),
        }
    }

    /// Uniformly chosen delay within the range, bounds included.
    pub fn next_delay(&self) -> Duration {
        let secs = rand::rng().random_range(self.min_secs..=self.max_secs);
        Duration::from_secs(secs)
    }

    pub fn min(&self) -> Duration {
        Duration::from_secs(self.min_secs)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs(self.max_secs)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(5, 10)
    }
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Items claimed per pass
    pub batch_size: usize,

    /// Claims after which a retryable failure is treated as permanent
    pub max_attempts: i32,

    /// How long a claim is held before another worker may take the item
    pub lease: Duration,

    pub backoff: Backoff,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 5,
            lease: Duration::from_secs(300),
            backoff: Backoff::default(),
        }
    }
}

/// What a single [`QueueWorker::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// At least one item was processed; poll again right away.
    Worked,
    /// Nothing to do; slept for this long.
    Idle(Duration),
    /// Shutdown was requested while sleeping.
    Cancelled,
}

/// Claims work items and hands them to a [`Provisioner`].
pub struct QueueWorker {
    queue: Arc<dyn WorkQueue>,
    provisioner: Arc<dyn Provisioner>,
    settings: WorkerSettings,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        provisioner: Arc<dyn Provisioner>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            provisioner,
            settings,
        }
    }

    /// Process up to one batch, oldest items first.
    ///
    /// Returns `true` if at least one item was claimed.
    ///
    /// # Errors
    ///
    /// Returns the store error if the very first claim fails. Failures after
    /// some items were processed are logged and end the pass early.
    pub async fn run_once(&self) -> Result<bool, StoreError> {
        let mut processed = 0usize;

        while processed < self.settings.batch_size {
            let claimed = match self.queue.claim_next(self.settings.lease).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(e) if processed == 0 => return Err(e),
                Err(e) => {
                    tracing::error!(error = %e, processed, "Claim failed mid-pass");
                    break;
                }
            };
            processed += 1;

            let item_id = claimed.id;
            if let Err(e) = self.process(claimed).await {
                // The claim is still held and will lapse after the lease
                tracing::error!(item_id = %item_id, error = %e, "Could not settle work item");
            }
        }

        if processed > 0 {
            tracing::debug!(processed, "Worker pass complete");
        }

        Ok(processed > 0)
    }

    async fn process(&self, claimed: ClaimedItem) -> Result<(), StoreError> {
        let item_id = claimed.id;

        let settled = match self.provisioner.provision(&claimed).await {
            Ok(()) => {
                tracing::info!(
                    item_id = %item_id,
                    email = %claimed.item.email,
                    "Provisioned account"
                );
                self.queue.complete(&claimed).await?
            }
            Err(e) if e.is_permanent() => {
                tracing::error!(item_id = %item_id, error = %e, "Provisioning rejected");
                self.queue.fail(&claimed, &e.to_string()).await?
            }
            Err(e) if claimed.attempts >= self.settings.max_attempts => {
                tracing::error!(
                    item_id = %item_id,
                    attempts = claimed.attempts,
                    error = %e,
                    "Giving up on work item"
                );
                self.queue.fail(&claimed, &e.to_string()).await?
            }
            Err(e) => {
                tracing::warn!(
                    item_id = %item_id,
                    attempts = claimed.attempts,
                    error = %e,
                    "Provisioning failed, will retry"
                );
                self.queue.release(&claimed).await?
            }
        };

        if !settled {
            tracing::warn!(item_id = %item_id, "Claim expired before the item was settled");
        }

        Ok(())
    }

    /// One pass, then the randomized backoff if nothing was processed.
    ///
    /// Store errors are logged and treated like an empty queue.
    pub async fn poll(&self, shutdown: &CancellationToken) -> PollOutcome {
        let worked = match self.run_once().await {
            Ok(worked) => worked,
            Err(e) => {
                tracing::error!(error = %e, "Worker pass failed");
                false
            }
        };

        if worked {
            return PollOutcome::Worked;
        }

        let delay = self.settings.backoff.next_delay();
        tracing::info!(delay_secs = delay.as_secs(), "No work, sleeping");

        tokio::select! {
            () = tokio::time::sleep(delay) => PollOutcome::Idle(delay),
            () = shutdown.cancelled() => PollOutcome::Cancelled,
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            batch_size = self.settings.batch_size,
            "Queue worker starting"
        );

        while !shutdown.is_cancelled() {
            if self.poll(&shutdown).await == PollOutcome::Cancelled {
                break;
            }
        }

        tracing::info!("Queue worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_bounds() {
        let backoff = Backoff::default();

        for _ in 0..200 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(10));
        }
    }

    #[test]
    fn inverted_backoff_range_is_swapped() {
        let backoff = Backoff::new(9, 3);

        assert_eq!(backoff.min(), Duration::from_secs(3));
        assert_eq!(backoff.max(), Duration::from_secs(9));
    }

    #[test]
    fn degenerate_range_is_constant() {
        assert_eq!(Backoff::new(2, 2).next_delay(), Duration::from_secs(2));
    }
}
