//! The `shading-gateway` binary bridges the shading actors of a local network
//! to an `MQTT` broker.
//!
//! It logs in to every configured actor, publishes the actor positions on
//! the broker at a fixed interval and runs the commands received on the
//! `{topic}/{name}/set` topics. An optional `REST` interface reports the
//! actor states and accepts the same commands.
//!
//! The process exits with a non-zero status when too many polls fail, so
//! that a service manager can restart it.

mod web;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use tokio_util::sync::CancellationToken;

use tracing::{Level, error, info, warn};

use shading_controller::actor::ActorTimings;
use shading_controller::bus::MqttBus;
use shading_controller::command::Dispatcher;
use shading_controller::config::Config;
use shading_controller::error::Result;
use shading_controller::polling::{FleetSupervisor, start_polling};
use shading_controller::refresh::spawn_token_refresh;
use shading_controller::registry::Registry;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path of the configuration file.
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Log level, overriding the one of the configuration file.
    #[arg(long)]
    log_level: Option<Level>,
}

fn init_logging(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn load_config(path: &Path, log_level: Option<Level>) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => {
            let level = log_level.or_else(|| config.loglevel.parse().ok());
            init_logging(level.unwrap_or(Level::INFO));
            if level.is_none() {
                warn!("Unknown log level {}, using info", config.loglevel);
            }
            Some(config)
        }
        Err(e) => {
            init_logging(log_level.unwrap_or(Level::INFO));
            error!("{e}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(config) = load_config(&cli.config, cli.log_level) else {
        return ExitCode::FAILURE;
    };

    match run(config).await {
        Ok(exit_code) => exit_code,
        Err(e) => {
            error!("Gateway stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<ExitCode> {
    info!("Starting shading gateway");

    let registry = Arc::new(
        Registry::register_actors(&config.eltako.devices, ActorTimings::default()).await?,
    );
    info!("{} actors registered", registry.len());

    let shutdown = CancellationToken::new();

    let (bus, eventloop) = MqttBus::connect(&config.mqtt)?;
    let bus = Arc::new(bus);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));
    let command_loop = bus.run_command_loop(eventloop, dispatcher, shutdown.clone());

    let supervisor = Arc::new(FleetSupervisor::new(registry.len()));
    let polling = start_polling(
        registry.actors(),
        config.eltako.polling_interval(),
        Arc::clone(&bus),
        Arc::clone(&supervisor),
    );

    let refresh = spawn_token_refresh(
        registry.actors().to_vec(),
        config.eltako.token_refresh_interval(),
        shutdown.clone(),
    );

    let web = config.web.enabled.then(|| {
        tokio::spawn(web::serve(
            Arc::clone(&registry),
            config.web.port,
            shutdown.clone(),
        ))
    });

    let fatal = supervisor.fatal_token();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Unable to listen for the shutdown signal: {e}");
            }
        }
        () = fatal.cancelled() => {
            error!("Too many polling errors, restart required");
            return Ok(ExitCode::FAILURE);
        }
    }

    info!("Shutting down");
    polling.shutdown().await;

    if let Err(e) = bus.disconnect().await {
        warn!("Unable to disconnect from the MQTT broker: {e}");
    }
    shutdown.cancel();

    let tasks = [
        ("command loop", Some(command_loop)),
        ("token refresh", Some(refresh)),
        ("REST interface", web),
    ];
    for (name, handle) in tasks {
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Failed to await the {name} task: {e}");
        }
    }

    Ok(ExitCode::SUCCESS)
}
