use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info};

use crate::actor::Actor;

/// Starts the task refreshing the session token of every actor.
///
/// The first refresh happens one `interval` after the call, since actors are
/// logged in at registration. A failed refresh is logged and the actor keeps
/// its previous token until the next round.
///
/// The task stops when the `cancellation_token` is cancelled.
#[must_use]
pub fn spawn_token_refresh(
    actors: Vec<Arc<Actor>>,
    interval: Duration,
    cancellation_token: CancellationToken,
) -> JoinHandle<()> {
    info!("Refreshing session tokens every {interval:?}");
    tokio::spawn(run_token_refresh(actors, interval, cancellation_token))
}

async fn run_token_refresh(
    actors: Vec<Arc<Actor>>,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            _ = ticker.tick() => {
                refresh_tokens(&actors).await;
            }
        }
    }
}

async fn refresh_tokens(actors: &[Arc<Actor>]) {
    for actor in actors {
        debug!("Refreshing session token of {actor}");
        if let Err(e) = actor.update_token().await {
            error!("Failed to refresh the session token of {actor}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::actor::Actor;
    use crate::tests::{MockDevice, PASSWORD, USERNAME, test_timings};

    use super::spawn_token_refresh;

    async fn logged_actor(mock: &MockDevice) -> Arc<Actor> {
        let actor = Actor::new("127.0.0.1")
            .unwrap()
            .base_url(mock.base_url())
            .timings(test_timings());
        actor.login(USERNAME, PASSWORD).await.unwrap();
        Arc::new(actor)
    }

    #[tokio::test]
    async fn refresh_periodically() {
        let mock = MockDevice::start().await;
        let actor = logged_actor(&mock).await;
        assert_eq!(mock.logins(), 1);

        let cancellation_token = CancellationToken::new();
        let handle = spawn_token_refresh(
            vec![actor],
            Duration::from_millis(50),
            cancellation_token.clone(),
        );

        // No refresh right after the start.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mock.logins(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancellation_token.cancel();
        handle.await.unwrap();

        let logins = mock.logins();
        assert!(logins >= 3, "Got {logins} logins");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.logins(), logins);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_running() {
        let mock = MockDevice::start().await;
        let refused = Arc::new(Actor::new("127.0.0.1").unwrap().base_url(mock.base_url()));
        let actor = logged_actor(&mock).await;

        let cancellation_token = CancellationToken::new();
        let handle = spawn_token_refresh(
            vec![refused, Arc::clone(&actor)],
            Duration::from_millis(30),
            cancellation_token.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancellation_token.cancel();
        handle.await.unwrap();

        // The actor without credentials never reaches the device.
        assert!(mock.logins() >= 3);
        let _ = actor.fetch_devices().await.unwrap();
    }
}
