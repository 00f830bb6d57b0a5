//! The `shading-controller` library crate provides a set of APIs for
//! driving networked shading actors and bridging them to an `MQTT` broker.
//!
//! A shading actor is a small appliance in a local network that moves
//! blinds or shutters and exposes its state through an authenticated
//! `REST` device API.
//!
//! Core functionalities of this crate include:
//!
//! - Opening and refreshing a session with each actor
//! - Discovering the devices exposed by an actor and moving them to a
//!   requested position, optionally waiting for the position to be reached
//! - Polling every actor periodically and publishing its position on the
//!   broker, while tracking the health of the whole fleet
//! - Translating the commands received from the broker into actor
//!   operations
//!
//! All network operations run on `tokio`, so independent actors are polled
//! and commanded concurrently.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// A client bound to a single shading actor.
pub mod actor;
/// The `MQTT` transport towards the broker.
pub mod bus;
/// Commands received from the broker and their dispatching.
pub mod command;
/// Gateway configuration.
pub mod config;
/// Devices exposed by an actor.
pub mod device;
/// Error management.
pub mod error;
/// Periodic polling of the actor positions and fleet health.
pub mod polling;
/// Periodic refresh of the actor sessions.
pub mod refresh;
/// The registry of all managed actors.
pub mod registry;
/// Retry policy for device API calls.
pub mod retry;
