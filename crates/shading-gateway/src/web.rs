use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use serde::{Deserialize, Serialize};

use tokio::net::TcpListener;

use tokio_util::sync::CancellationToken;

use tracing::{error, info};

use shading_controller::actor::Actor;
use shading_controller::command::{Action, Command};
use shading_controller::registry::Registry;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ActorStatus {
    name: String,
    ip: String,
    position: Option<i32>,
}

impl ActorStatus {
    async fn read(actor: &Actor) -> Self {
        Self {
            name: actor.display_name().await.unwrap_or_default(),
            ip: actor.address().to_owned(),
            position: actor.get_position().await.ok(),
        }
    }
}

#[derive(Deserialize)]
struct PositionRequest {
    position: i32,
}

#[derive(Deserialize)]
struct ActionRequest {
    action: Action,
}

async fn list_actors(State(registry): State<Arc<Registry>>) -> Json<Vec<ActorStatus>> {
    let mut actors = Vec::with_capacity(registry.len());
    for actor in registry.actors() {
        actors.push(ActorStatus::read(actor).await);
    }
    Json(actors)
}

async fn get_actor(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
) -> Result<Json<ActorStatus>, StatusCode> {
    let actor = registry.find(&name).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ActorStatus::read(&actor).await))
}

async fn set_position(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(request): Json<PositionRequest>,
) -> StatusCode {
    if !(0..=100).contains(&request.position) {
        return StatusCode::BAD_REQUEST;
    }

    let Some(actor) = registry.find(&name).await else {
        return StatusCode::NOT_FOUND;
    };

    let command = Command::Position {
        position: request.position,
    };
    match command.apply(&actor).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            error!("Failed to run {command:?} on {actor}: {e}");
            StatusCode::BAD_GATEWAY
        }
    }
}

async fn run_action(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(request): Json<ActionRequest>,
) -> StatusCode {
    let Some(actor) = registry.find(&name).await else {
        return StatusCode::NOT_FOUND;
    };

    // Actions wait for the actor to converge, which may take minutes.
    let command = Command::Action {
        action: request.action,
    };
    let _ = tokio::spawn(async move {
        if let Err(e) = command.apply(&actor).await {
            error!("Failed to run {command:?} on {actor}: {e}");
        }
    });

    StatusCode::ACCEPTED
}

fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/api/actors", get(list_actors))
        .route("/api/actors/{name}", get(get_actor))
        .route("/api/actors/{name}/position", post(set_position))
        .route("/api/actors/{name}/action", post(run_action))
        .with_state(registry)
}

/// Serves the status `REST` interface until the `cancellation_token` is
/// cancelled.
pub(crate) async fn serve(
    registry: Arc<Registry>,
    port: u16,
    cancellation_token: CancellationToken,
) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Impossible to bind the REST interface to port {port}: {e}");
            return;
        }
    };

    info!("REST interface listening on port {port}");
    if let Err(e) = axum::serve(listener, router(registry))
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await
    {
        error!("REST interface stopped: {e}");
    }
}
