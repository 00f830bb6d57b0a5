use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

use serde::{Deserialize, Serialize};

use tokio::sync::RwLock;
use tokio::time::Instant;

use tracing::{debug, info, trace};

use crate::config::DeviceConfig;
use crate::device::{CURRENT_POSITION, Device, Devices, TARGET_POSITION};
use crate::error::{Error, ErrorKind, Result};
use crate::retry::{RetryPolicy, with_retry};

/// Default tilt position reached after a full close.
pub const DEFAULT_HALF_OPEN_PERCENTAGE: i32 = 3;

// Path of the device API on an actor.
const API_PATH: &str = "/api/v0";

/// Timing knobs of an [`Actor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorTimings {
    /// Retry policy applied to reads and writes.
    pub retry: RetryPolicy,
    /// Pause between two position reads while waiting for a position.
    pub wait_tick: Duration,
    /// Maximum time spent waiting for a position.
    pub wait_timeout: Duration,
}

impl Default for ActorTimings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            wait_tick: Duration::from_millis(500),
            wait_timeout: Duration::from_secs(100),
        }
    }
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    user: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    api_key: String,
}

#[derive(Serialize)]
struct FunctionValue<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    identifier: &'a str,
    value: i32,
}

// Only the most recently started wait of an actor is allowed to run.
//
// Each wait takes a ticket when it starts and checks it on every iteration:
// once a newer wait has started, the ticket is stale and the wait stops.
#[derive(Debug, Default)]
struct WaitGeneration(AtomicU64);

impl WaitGeneration {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.0.load(Ordering::SeqCst) == ticket
    }
}

/// A client bound to a single shading actor.
///
/// It owns one authenticated session with the device API of the actor,
/// caches the devices the actor exposes and moves them to the requested
/// positions.
#[derive(Debug)]
pub struct Actor {
    address: String,
    name: Option<String>,
    base_url: String,
    half_open_percentage: i32,
    timings: ActorTimings,
    client: Client,
    credentials: RwLock<Option<Credentials>>,
    token: RwLock<Option<String>>,
    devices: RwLock<Devices>,
    wait_generation: WaitGeneration,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ShadingActor{{name: {}; ip: {}}}",
            self.name.as_deref().unwrap_or_default(),
            self.address
        )
    }
}

impl Actor {
    /// Creates an [`Actor`] for the device API reachable at the given
    /// address.
    ///
    /// The actor is neither logged in nor aware of its devices.
    ///
    /// # Errors
    ///
    /// An error is returned if the `HTTP` client cannot be built.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();

        // Actors serve self-signed certificates.
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| {
                Error::new(
                    ErrorKind::Network,
                    format!("Unable to build the HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            base_url: format!("https://{address}:443{API_PATH}"),
            address,
            name: None,
            half_open_percentage: DEFAULT_HALF_OPEN_PERCENTAGE,
            timings: ActorTimings::default(),
            client,
            credentials: RwLock::new(None),
            token: RwLock::new(None),
            devices: RwLock::new(Devices::new()),
            wait_generation: WaitGeneration::default(),
        })
    }

    /// Creates an [`Actor`] from a [`DeviceConfig`], applying its overrides.
    ///
    /// # Errors
    ///
    /// An error is returned if the `HTTP` client cannot be built.
    pub fn from_config(config: &DeviceConfig, timings: ActorTimings) -> Result<Self> {
        let mut actor = Self::new(config.ip.as_str())?.timings(timings);

        if let Some(base_url) = &config.base_url {
            actor = actor.base_url(base_url);
        }

        if let Some(name) = &config.name {
            actor = actor.name(name);
        }

        if let Some(percentage) = config.half_open_percentage() {
            actor = actor.half_open_percentage(percentage);
        }

        Ok(actor)
    }

    /// Sets a display name overriding the one reported by the actor.
    #[must_use]
    #[inline]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the device API base `URL`, replacing `https://{address}:443/api/v0`.
    #[must_use]
    #[inline]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Sets the tilt position reached by [`Self::close_and_open_blinds`].
    #[must_use]
    #[inline]
    pub const fn half_open_percentage(mut self, percentage: i32) -> Self {
        self.half_open_percentage = percentage;
        self
    }

    /// Sets the [`ActorTimings`].
    #[must_use]
    #[inline]
    pub const fn timings(mut self, timings: ActorTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Returns the network address of the actor.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the configured tilt position.
    #[must_use]
    pub const fn configured_half_open_percentage(&self) -> i32 {
        self.half_open_percentage
    }

    /// Stores the credentials and opens a session.
    ///
    /// # Errors
    ///
    /// An error is returned if a credential is empty or if the actor refuses
    /// them.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidCredentials,
                "Username and password are required",
            ));
        }

        *self.credentials.write().await = Some(Credentials {
            username: username.to_owned(),
            password: password.to_owned(),
        });

        self.update_token().await
    }

    /// Opens a new session and replaces the bearer token.
    ///
    /// Requests already in flight keep the token they started with.
    ///
    /// # Errors
    ///
    /// An error is returned if no credentials are stored, if the actor
    /// refuses them or if its answer carries no token.
    pub async fn update_token(&self) -> Result<()> {
        let Some(credentials) = self.credentials.read().await.clone() else {
            return Err(Error::new(
                ErrorKind::Authentication,
                "Username or password not set",
            ));
        };

        let response = self
            .client
            .post(self.url("/login"))
            .header(CONTENT_TYPE, "application/json")
            .json(&LoginRequest {
                user: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(Error::new(
                ErrorKind::Authentication,
                format!(
                    "Unexpected status code {}, expected 200",
                    response.status().as_u16()
                ),
            ));
        }

        let login = response
            .json::<LoginResponse>()
            .await
            .map_err(|e| Error::new(ErrorKind::Protocol, format!("apiKey not found: {e}")))?;

        *self.token.write().await = Some(login.api_key);
        debug!("Session token of {self} updated");

        Ok(())
    }

    /// Fetches the devices exposed by the actor, replacing the cached ones.
    ///
    /// # Errors
    ///
    /// An error is returned on network failures, unexpected status codes or
    /// malformed bodies.
    pub async fn fetch_devices(&self) -> Result<Devices> {
        let response = self.request(Method::GET, "/devices").await.send().await?;
        let response = expect_status(response, StatusCode::OK)?;

        let devices = Devices::from_devices(response.json::<Vec<Device>>().await?);
        *self.devices.write().await = devices.clone();

        Ok(devices)
    }

    /// Returns a copy of the cached devices.
    pub async fn devices(&self) -> Devices {
        self.devices.read().await.clone()
    }

    /// Finds the first cached device exposing the given function.
    ///
    /// # Errors
    ///
    /// An error is returned if no devices are cached or if none of them
    /// exposes the function.
    pub async fn find_device_by_function(&self, identifier: &str) -> Result<Device> {
        self.devices
            .read()
            .await
            .find_by_function(identifier)
            .cloned()
    }

    /// Finds the first cached device exposing the given info.
    ///
    /// # Errors
    ///
    /// An error is returned if no devices are cached or if none of them
    /// exposes the info.
    pub async fn find_device_by_info(&self, identifier: &str) -> Result<Device> {
        self.devices.read().await.find_by_info(identifier).cloned()
    }

    /// Returns the configured name or, when absent, the name of the device
    /// reporting the current position.
    ///
    /// # Errors
    ///
    /// An error is returned if no name is configured and no cached device
    /// reports a position.
    pub async fn display_name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }

        self.find_device_by_info(CURRENT_POSITION)
            .await
            .map(|device| device.display_name)
    }

    /// Moves the device exposing the target position function to the
    /// given position.
    ///
    /// # Errors
    ///
    /// An error is returned if no device exposes the function or if the
    /// actor does not accept the command.
    pub async fn set_position(&self, position: i32) -> Result<()> {
        let device = self.find_device_by_function(TARGET_POSITION).await?;
        self.set_device_position(&device, position).await
    }

    /// Moves the given device to the given position.
    ///
    /// # Errors
    ///
    /// An error is returned if the actor does not accept the command within
    /// the retry budget.
    pub async fn set_device_position(&self, device: &Device, position: i32) -> Result<()> {
        with_retry(&self.timings.retry, || async move {
            info!(
                "Setting position of device {} to {position}",
                device.display_name
            );

            let path = format!(
                "/devices/{}/functions/{TARGET_POSITION}",
                device.device_guid
            );
            let response = self
                .request(Method::PUT, &path)
                .await
                .json(&FunctionValue {
                    kind: "number",
                    identifier: TARGET_POSITION,
                    value: position,
                })
                .send()
                .await?;

            expect_status(response, StatusCode::ACCEPTED).map(|_| ())
        })
        .await
    }

    /// Reads the position of the device reporting the current position.
    ///
    /// # Errors
    ///
    /// An error is returned if no device reports a position or if the read
    /// fails within the retry budget.
    pub async fn get_position(&self) -> Result<i32> {
        let device = self.find_device_by_info(CURRENT_POSITION).await?;
        self.get_device_position(&device).await
    }

    /// Reads the position of the given device.
    ///
    /// # Errors
    ///
    /// An error is returned if the read fails within the retry budget.
    pub async fn get_device_position(&self, device: &Device) -> Result<i32> {
        with_retry(&self.timings.retry, || async move {
            let path = format!("/devices/{}/infos/{CURRENT_POSITION}", device.device_guid);
            let response = self.request(Method::GET, &path).await.send().await?;
            let response = expect_status(response, StatusCode::OK)?;

            let body = response.json::<serde_json::Value>().await?;
            body.get("value")
                .and_then(serde_json::Value::as_f64)
                .map(|value| value.round() as i32)
                .ok_or_else(|| {
                    Error::new(ErrorKind::Protocol, "Position not found in response")
                })
        })
        .await
    }

    /// Waits until the device reporting the current position reaches the
    /// given position.
    ///
    /// # Errors
    ///
    /// See [`Self::wait_for_device_position`].
    pub async fn wait_for_position(&self, position: i32) -> Result<()> {
        check_range(position)?;
        let device = self.find_device_by_info(CURRENT_POSITION).await?;
        self.wait_for_device_position(&device, position).await
    }

    /// Waits until the given device reaches the given position.
    ///
    /// Starting a new wait on the same actor supersedes this one: the
    /// superseded wait returns `Ok(())` at its next iteration.
    ///
    /// # Errors
    ///
    /// An error is returned if the position lies outside `[0, 100]`, before
    /// any request is sent, if a read fails, or if the position is not
    /// reached in time.
    pub async fn wait_for_device_position(&self, device: &Device, position: i32) -> Result<()> {
        check_range(position)?;

        let ticket = self.wait_generation.next();
        debug!(
            "Wait for position of device {} to {position}",
            device.display_name
        );

        let start = Instant::now();
        let mut current = self.get_device_position(device).await?;
        while current != position {
            // A superseded wait stops quietly, even past its deadline.
            if !self.wait_generation.is_current(ticket) {
                debug!(
                    "Wait for position of device {} to {position} aborted",
                    device.display_name
                );
                return Ok(());
            }

            if start.elapsed() > self.timings.wait_timeout {
                return Err(Error::new(
                    ErrorKind::Timeout,
                    format!(
                        "Timeout waiting for position {position} of device {}",
                        device.display_name
                    ),
                ));
            }

            trace!(
                "Current position of device {} is {current}, waiting for {position}",
                device.display_name
            );
            tokio::time::sleep(self.timings.wait_tick).await;
            current = self.get_device_position(device).await?;
        }

        debug!(
            "Position {position} of device {} reached",
            device.display_name
        );
        Ok(())
    }

    /// Moves the device reporting the current position and waits until the
    /// position is reached.
    ///
    /// # Errors
    ///
    /// An error is returned if the move or the wait fails.
    pub async fn set_and_wait_for_position(&self, position: i32) -> Result<()> {
        let device = self.find_device_by_info(CURRENT_POSITION).await?;
        self.set_device_position(&device, position).await?;
        self.wait_for_device_position(&device, position).await
    }

    /// Opens the actor completely.
    ///
    /// # Errors
    ///
    /// See [`Self::set_and_wait_for_position`].
    pub async fn open(&self) -> Result<()> {
        self.set_and_wait_for_position(100).await
    }

    /// Closes the actor completely.
    ///
    /// # Errors
    ///
    /// See [`Self::set_and_wait_for_position`].
    pub async fn close(&self) -> Result<()> {
        self.set_and_wait_for_position(0).await
    }

    /// Closes the actor completely, then moves it to the configured tilt
    /// position.
    ///
    /// The full close gives the blinds a reference point, since their
    /// intermediate positions drift over time.
    ///
    /// # Errors
    ///
    /// See [`Self::set_and_wait_for_position`].
    pub async fn close_and_open_blinds(&self) -> Result<()> {
        self.set_and_wait_for_position(0).await?;
        self.set_and_wait_for_position(self.half_open_percentage)
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    // The token is captured when the request is built, so a concurrent
    // refresh never changes the token of a request in flight.
    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let token = self.token.read().await.clone();

        let builder = self
            .client
            .request(method, self.url(path))
            .header(CONTENT_TYPE, "application/json");

        match token {
            Some(token) => builder.header(AUTHORIZATION, token),
            None => builder,
        }
    }
}

fn check_range(position: i32) -> Result<()> {
    if (0..=100).contains(&position) {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::Range,
            format!("Position {position} is out of range"),
        ))
    }
}

fn expect_status(response: Response, expected: StatusCode) -> Result<Response> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(Error::new(
            ErrorKind::UnexpectedStatus,
            format!(
                "Unexpected status code {}, expected {}",
                response.status().as_u16(),
                expected.as_u16()
            ),
        ))
    }
}
