use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info};

use crate::actor::Actor;
use crate::bus::Publisher;
use crate::error::Result;

// Failures tolerated per actor before the whole fleet is considered broken.
const FAILURES_PER_ACTOR: usize = 5;

/// The health of the whole fleet of actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetHealth {
    /// No failures are pending.
    Healthy,
    /// Some polls failed, but fewer than the fleet tolerates.
    Degraded,
    /// Too many polls failed. The process must be restarted.
    Fatal,
}

/// Failure accounting shared by the polling tasks of all actors.
///
/// Both counters are fleet-wide: a failure resets the success streak, and
/// pending failures are forgiven only after a success streak proportional
/// to the fleet size. Once the failures exceed the same bound, the
/// supervisor turns [`FleetHealth::Fatal`] and cancels its fatal token.
///
/// Concurrent ticks update the counters without further coordination, so the
/// thresholds are approximate.
#[derive(Debug)]
pub struct FleetSupervisor {
    threshold: usize,
    polling_error_count: AtomicUsize,
    success_count: AtomicUsize,
    fatal: CancellationToken,
}

impl FleetSupervisor {
    /// Creates a [`FleetSupervisor`] for a fleet with the given number of
    /// actors.
    #[must_use]
    pub fn new(actor_count: usize) -> Self {
        Self {
            threshold: FAILURES_PER_ACTOR * actor_count,
            polling_error_count: AtomicUsize::new(0),
            success_count: AtomicUsize::new(0),
            fatal: CancellationToken::new(),
        }
    }

    /// Records a successful poll.
    pub fn record_success(&self) -> FleetHealth {
        let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.polling_error_count.load(Ordering::SeqCst) > 0 && successes > self.threshold {
            info!("Fleet recovered after {successes} successful polls");
            self.polling_error_count.store(0, Ordering::SeqCst);
        }

        self.health()
    }

    /// Records a failed poll.
    pub fn record_failure(&self) -> FleetHealth {
        let errors = self.polling_error_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.success_count.store(0, Ordering::SeqCst);

        if errors > self.threshold && !self.fatal.is_cancelled() {
            error!(
                "{errors} polling errors exceed the fleet limit of {}",
                self.threshold
            );
            self.fatal.cancel();
        }

        self.health()
    }

    /// Returns the current [`FleetHealth`].
    #[must_use]
    pub fn health(&self) -> FleetHealth {
        if self.fatal.is_cancelled() {
            FleetHealth::Fatal
        } else if self.polling_error_count.load(Ordering::SeqCst) > 0 {
            FleetHealth::Degraded
        } else {
            FleetHealth::Healthy
        }
    }

    /// Returns the number of pending polling errors.
    #[must_use]
    pub fn polling_error_count(&self) -> usize {
        self.polling_error_count.load(Ordering::SeqCst)
    }

    /// Returns the length of the current success streak.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.success_count.load(Ordering::SeqCst)
    }

    /// Returns a token cancelled once the fleet turns
    /// [`FleetHealth::Fatal`].
    #[must_use]
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }
}

/// The handle of all polling tasks.
#[derive(Debug)]
pub struct PollingHandle {
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PollingHandle {
    /// Stops all polling tasks.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    /// Stops all polling tasks and waits for them to terminate.
    pub async fn shutdown(self) {
        self.stop();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Failed to await the polling task: {e}");
            }
        }
    }
}

/// Starts one polling task per actor.
///
/// Each task reads the actor position immediately and then once every
/// `interval`, publishes it under the actor display name and reports the
/// outcome to the [`FleetSupervisor`].
pub fn start_polling<P>(
    actors: &[Arc<Actor>],
    interval: Duration,
    publisher: Arc<P>,
    supervisor: Arc<FleetSupervisor>,
) -> PollingHandle
where
    P: Publisher + Send + Sync + 'static,
{
    let cancellation_token = CancellationToken::new();

    let handles = actors
        .iter()
        .map(|actor| {
            info!("Starting polling of {actor} with interval {interval:?}");
            tokio::spawn(run_polling(
                Arc::clone(actor),
                interval,
                Arc::clone(&publisher),
                Arc::clone(&supervisor),
                cancellation_token.clone(),
            ))
        })
        .collect();

    PollingHandle {
        cancellation_token,
        handles,
    }
}

async fn run_polling<P: Publisher>(
    actor: Arc<Actor>,
    interval: Duration,
    publisher: Arc<P>,
    supervisor: Arc<FleetSupervisor>,
    cancellation_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            _ = ticker.tick() => {
                tokio::select! {
                    () = cancellation_token.cancelled() => { break; }
                    health = poll_actor(&actor, publisher.as_ref(), &supervisor) => {
                        debug!("Fleet health after polling {actor}: {health:?}");
                    }
                }
            }
        }
    }
}

async fn poll_actor<P: Publisher>(
    actor: &Actor,
    publisher: &P,
    supervisor: &FleetSupervisor,
) -> FleetHealth {
    debug!("Polling actor {actor}");
    match publish_position(actor, publisher).await {
        Ok(()) => supervisor.record_success(),
        Err(e) => {
            error!("Failed to poll actor {actor}: {e}");
            supervisor.record_failure()
        }
    }
}

async fn publish_position<P: Publisher>(actor: &Actor, publisher: &P) -> Result<()> {
    let position = actor.get_position().await?;
    let display_name = actor.display_name().await?;

    debug!("Polling result {display_name}: {position}%");
    publisher
        .publish(&display_name, &json!({ "position": position }))
        .await
}
