use std::sync::Arc;

use tracing::info;

use crate::actor::{Actor, ActorTimings};
use crate::config::DeviceConfig;
use crate::error::Result;

/// The registry of all shading actors managed by the gateway.
///
/// Actors are kept in registration order, which is also the order used to
/// poll them and to resolve display names.
#[derive(Debug, Default)]
pub struct Registry {
    actors: Vec<Arc<Actor>>,
}

impl Registry {
    /// Creates an empty [`Registry`].
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self { actors: Vec::new() }
    }

    /// Builds, logs in and discovers the devices of one [`Actor`] per
    /// configured device, in configuration order.
    ///
    /// # Errors
    ///
    /// The first actor failing to log in or to fetch its devices aborts the
    /// registration.
    pub async fn register_actors(configs: &[DeviceConfig], timings: ActorTimings) -> Result<Self> {
        let mut registry = Self::new();

        for config in configs {
            info!("Initializing actor {}", config.ip);

            let actor = Actor::from_config(config, timings)?;
            actor.login(&config.username, &config.password).await?;
            let _ = actor.fetch_devices().await?;

            info!(
                "Actor initialized: {} ({})",
                actor.display_name().await.unwrap_or_default(),
                config.ip
            );
            registry.register(actor);
        }

        Ok(registry)
    }

    /// Appends an [`Actor`] to the registry.
    pub fn register(&mut self, actor: Actor) {
        self.actors.push(Arc::new(actor));
    }

    /// Returns all registered actors.
    #[must_use]
    pub fn actors(&self) -> &[Arc<Actor>] {
        &self.actors
    }

    /// Returns the number of registered actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Checks whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Finds the first actor with the given display name.
    pub async fn find(&self, name: &str) -> Option<Arc<Actor>> {
        for actor in &self.actors {
            if actor.display_name().await.is_ok_and(|display| display == name) {
                return Some(Arc::clone(actor));
            }
        }
        None
    }
}
