use std::sync::Arc;

use serde::Deserialize;

use tracing::{error, info};

use crate::actor::Actor;
use crate::error::Result;
use crate::registry::Registry;

/// An action requested through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Open completely.
    Open,
    /// Close completely.
    Close,
    /// Close completely, then tilt to the configured position.
    CloseAndOpenBlinds,
}

/// A command addressed to an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Move to the given position.
    Position {
        /// Target position.
        position: i32,
    },
    /// Run an [`Action`].
    Action {
        /// Requested action.
        action: Action,
    },
}

impl Command {
    /// Classifies a decoded message, returning `None` for unknown shapes.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// Runs the command on the given [`Actor`].
    ///
    /// # Errors
    ///
    /// The error of the underlying actor operation is returned.
    pub async fn apply(self, actor: &Actor) -> Result<()> {
        match self {
            Self::Position { position } => actor.set_position(position).await,
            Self::Action {
                action: Action::Open,
            } => actor.open().await,
            Self::Action {
                action: Action::Close,
            } => actor.close().await,
            Self::Action {
                action: Action::CloseAndOpenBlinds,
            } => actor.close_and_open_blinds().await,
        }
    }
}

/// Routes inbound bus messages to the actors of a [`Registry`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    /// Creates a [`Dispatcher`] over the given [`Registry`].
    #[must_use]
    #[inline]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Handles an inbound message.
    ///
    /// The first segment of `topic` names the actor. Every failure is logged
    /// and swallowed, so a malformed message never reaches the bus
    /// connection.
    pub async fn put_message(&self, topic: &str, payload: &[u8]) {
        info!(
            "MQTT message received on {topic}: {}",
            String::from_utf8_lossy(payload)
        );

        let message = match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(message) => message,
            Err(e) => {
                error!("Error while processing MQTT message: {e}");
                return;
            }
        };

        let device_name = topic.split('/').next().unwrap_or_default();
        let Some(actor) = self.registry.find(device_name).await else {
            error!("Cannot find actor {device_name}");
            return;
        };

        let Some(command) = Command::from_json(message.clone()) else {
            error!("Unknown message type {message}");
            return;
        };

        if let Err(e) = command.apply(&actor).await {
            error!("Failed to run {command:?} on {actor}: {e}");
        }
    }
}
