use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};

fn config_error(info: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Config, info)
}

const fn default_true() -> bool {
    true
}

const fn default_qos() -> u8 {
    1
}

const fn default_polling_interval() -> u64 {
    10_000
}

const fn default_token_refresh_interval() -> u64 {
    60 * 60 * 1000
}

const fn default_web_port() -> u16 {
    8080
}

fn default_client_id() -> String {
    "eltako_mqtt".into()
}

fn default_loglevel() -> String {
    "info".into()
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Broker connection.
    pub mqtt: MqttConfig,
    /// Shading actors and their scheduling.
    pub eltako: ActorsConfig,
    /// Log level: `trace`, `debug`, `info`, `warn` or `error`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
    /// Status `REST` interface.
    #[serde(default)]
    pub web: WebConfig,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MqttConfig {
    /// Broker `URL`, such as `tcp://192.168.0.1:1883`.
    pub url: String,
    /// Base topic, prepended to every published and subscribed topic.
    pub topic: String,
    /// Broker username.
    #[serde(default)]
    pub username: Option<String>,
    /// Broker password.
    #[serde(default)]
    pub password: Option<String>,
    /// Whether published positions are retained.
    #[serde(default = "default_true")]
    pub retain: bool,
    /// Quality of service of published and subscribed messages.
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Whether the gateway announces its own state.
    #[serde(default = "default_true")]
    pub bridge_info: bool,
    /// Topic of the gateway state, `{topic}/bridge/state` when absent.
    #[serde(default)]
    pub bridge_info_topic: Option<String>,
    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl MqttConfig {
    /// Returns the topic of the gateway state.
    #[must_use]
    pub fn bridge_info_topic(&self) -> String {
        self.bridge_info_topic
            .clone()
            .unwrap_or_else(|| format!("{}/bridge/state", self.topic.trim_end_matches('/')))
    }
}

/// Shading actors and their scheduling.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActorsConfig {
    /// Configured actors, in registration order.
    pub devices: Vec<DeviceConfig>,
    /// Interval between two position reads of an actor, in milliseconds.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    /// Interval between two session refreshes, in milliseconds.
    #[serde(default = "default_token_refresh_interval")]
    pub token_refresh_interval: u64,
}

impl ActorsConfig {
    /// Returns the polling interval.
    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval)
    }

    /// Returns the session refresh interval.
    #[must_use]
    pub const fn token_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.token_refresh_interval)
    }
}

/// A single shading actor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceConfig {
    /// Network address.
    #[serde(default)]
    pub ip: String,
    /// Device API username.
    pub username: String,
    /// Device API password.
    pub password: String,
    /// Display name override.
    #[serde(default)]
    pub name: Option<String>,
    /// Device API base `URL` override.
    #[serde(default, rename = "base-url")]
    pub base_url: Option<String>,
    /// Blinds tuning.
    #[serde(default, rename = "blindsConfig")]
    pub blinds_config: Option<BlindsConfig>,
}

impl DeviceConfig {
    /// Creates a [`DeviceConfig`] with the given address and credentials.
    #[must_use]
    pub fn new(
        ip: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            username: username.into(),
            password: password.into(),
            name: None,
            base_url: None,
            blinds_config: None,
        }
    }

    /// Returns the configured tilt position, if any.
    #[must_use]
    pub fn half_open_percentage(&self) -> Option<i32> {
        self.blinds_config
            .as_ref()
            .and_then(|blinds| blinds.half_open_percentage)
    }
}

/// Blinds tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlindsConfig {
    /// Tilt position reached after a full close.
    #[serde(default)]
    pub half_open_percentage: Option<i32>,
}

/// Status `REST` interface settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WebConfig {
    /// Whether the interface is served.
    #[serde(default)]
    pub enabled: bool,
    /// Listening port.
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_web_port(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration file at the given path.
    ///
    /// `${NAME}` placeholders are replaced by the values of the
    /// corresponding environment variables.
    ///
    /// # Errors
    ///
    /// An error is returned if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!(
                "Error reading config file {}: {e}",
                path.display()
            ))
        })?;

        Self::parse(&substitute_env(&raw, |name| std::env::var(name).ok()))
    }

    /// Parses and validates a configuration from its `JSON` text.
    ///
    /// # Errors
    ///
    /// An error is returned if the text is not a valid configuration.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| config_error(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.eltako.devices.is_empty() {
            return Err(config_error("No devices configured"));
        }

        if self.eltako.polling_interval == 0 {
            return Err(config_error("The polling interval must be positive"));
        }

        if self.eltako.token_refresh_interval == 0 {
            return Err(config_error(
                "The token refresh interval must be positive",
            ));
        }

        if self.mqtt.topic.trim_matches('/').is_empty() {
            return Err(config_error("The MQTT topic must not be empty"));
        }

        if self.mqtt.qos > 2 {
            return Err(config_error(format!(
                "Invalid MQTT quality of service {}",
                self.mqtt.qos
            )));
        }

        for (index, device) in self.eltako.devices.iter().enumerate() {
            if device.ip.is_empty() && device.base_url.is_none() {
                return Err(config_error(format!(
                    "Device {index} has neither an ip nor a base-url"
                )));
            }

            if let Some(percentage) = device.half_open_percentage()
                && !(0..=100).contains(&percentage)
            {
                return Err(config_error(format!(
                    "Device {index} has an invalid halfOpenPercentage {percentage}"
                )));
            }
        }

        Ok(())
    }
}

/// Replaces every `${NAME}` placeholder with the value returned by `lookup`.
///
/// Unknown variables and unterminated placeholders are left untouched.
pub fn substitute_env<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        let placeholder = &rest[start..];
        let Some(end) = placeholder.find('}') else {
            break;
        };

        output.push_str(&rest[..start]);
        match lookup(&placeholder[2..end]) {
            Some(value) => output.push_str(&value),
            None => output.push_str(&placeholder[..=end]),
        }
        rest = &placeholder[end + 1..];
    }
    output.push_str(rest);

    output
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::error::{Error, ErrorKind};

    use super::{Config, DeviceConfig, substitute_env};

    fn minimal() -> serde_json::Value {
        json!({
            "mqtt": {
                "url": "tcp://192.168.0.1:1883",
                "topic": "home/eltako"
            },
            "eltako": {
                "devices": [
                    {
                        "ip": "192.168.0.200",
                        "username": "admin",
                        "password": "123456789"
                    }
                ]
            }
        })
    }

    #[test]
    fn defaults() {
        let config = Config::parse(&minimal().to_string()).unwrap();

        assert_eq!(config.loglevel, "info");
        assert!(config.mqtt.retain);
        assert_eq!(config.mqtt.qos, 1);
        assert!(config.mqtt.bridge_info);
        assert_eq!(config.mqtt.bridge_info_topic(), "home/eltako/bridge/state");
        assert_eq!(config.mqtt.client_id, "eltako_mqtt");
        assert_eq!(config.eltako.polling_interval(), Duration::from_secs(10));
        assert_eq!(
            config.eltako.token_refresh_interval(),
            Duration::from_secs(3600)
        );
        assert!(!config.web.enabled);
        assert_eq!(config.web.port, 8080);
        assert_eq!(
            config.eltako.devices,
            vec![DeviceConfig::new("192.168.0.200", "admin", "123456789")]
        );
    }

    #[test]
    fn full_configuration() {
        let config = Config::parse(
            &json!({
                "mqtt": {
                    "url": "tcp://192.168.0.1:1883",
                    "topic": "home/eltako",
                    "username": "broker",
                    "password": "secret",
                    "retain": false,
                    "qos": 2,
                    "bridge-info": false,
                    "bridge-info-topic": "home/bridge"
                },
                "eltako": {
                    "devices": [
                        {
                            "ip": "192.168.0.200",
                            "username": "admin",
                            "password": "123456789",
                            "name": "living-room",
                            "blindsConfig": { "halfOpenPercentage": 2 }
                        }
                    ],
                    "polling-interval": 120000
                },
                "loglevel": "trace",
                "web": { "enabled": true, "port": 9000 }
            })
            .to_string(),
        )
        .unwrap();

        assert!(!config.mqtt.retain);
        assert_eq!(config.mqtt.qos, 2);
        assert_eq!(config.mqtt.bridge_info_topic(), "home/bridge");
        assert_eq!(config.mqtt.username.as_deref(), Some("broker"));
        assert_eq!(config.eltako.polling_interval, 120_000);
        assert_eq!(config.loglevel, "trace");
        assert!(config.web.enabled);
        assert_eq!(config.web.port, 9000);

        let device = &config.eltako.devices[0];
        assert_eq!(device.name.as_deref(), Some("living-room"));
        assert_eq!(device.half_open_percentage(), Some(2));
    }

    #[test]
    fn invalid_configurations() {
        let mut no_devices = minimal();
        no_devices["eltako"]["devices"] = json!([]);

        let mut bad_qos = minimal();
        bad_qos["mqtt"]["qos"] = json!(3);

        let mut no_address = minimal();
        no_address["eltako"]["devices"][0]["ip"] = json!("");

        let mut bad_percentage = minimal();
        bad_percentage["eltako"]["devices"][0]["blindsConfig"] =
            json!({ "halfOpenPercentage": 150 });

        let mut no_polling = minimal();
        no_polling["eltako"]["polling-interval"] = json!(0);

        let mut no_topic = minimal();
        no_topic["mqtt"]["topic"] = json!("");

        let mut root_topic = minimal();
        root_topic["mqtt"]["topic"] = json!("/");

        for config in [
            no_devices,
            bad_qos,
            no_address,
            bad_percentage,
            no_polling,
            no_topic,
            root_topic,
        ] {
            assert_eq!(
                Config::parse(&config.to_string()).unwrap_err().kind(),
                ErrorKind::Config
            );
        }

        assert_eq!(
            Config::parse("not json").unwrap_err().kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn empty_topic() {
        let mut config = minimal();
        config["mqtt"]["topic"] = json!("");

        assert_eq!(
            Config::parse(&config.to_string()),
            Err(Error::new(
                ErrorKind::Config,
                "The MQTT topic must not be empty"
            ))
        );
    }

    #[test]
    fn base_url_replaces_ip() {
        let mut config = minimal();
        config["eltako"]["devices"][0]["ip"] = json!("");
        config["eltako"]["devices"][0]["base-url"] = json!("http://127.0.0.1:8443/api/v0");

        let config = Config::parse(&config.to_string()).unwrap();
        assert_eq!(
            config.eltako.devices[0].base_url.as_deref(),
            Some("http://127.0.0.1:8443/api/v0")
        );
    }

    #[test]
    fn missing_file() {
        assert_eq!(
            Config::load("/nonexistent/config.json").unwrap_err().kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn environment_placeholders() {
        let lookup = |name: &str| match name {
            "MQTT_PASSWORD" => Some("secret".to_owned()),
            "HOST" => Some("192.168.0.1".to_owned()),
            _ => None,
        };

        assert_eq!(
            substitute_env(r#"{"password": "${MQTT_PASSWORD}"}"#, lookup),
            r#"{"password": "secret"}"#
        );
        assert_eq!(
            substitute_env("tcp://${HOST}:1883/${HOST}", lookup),
            "tcp://192.168.0.1:1883/192.168.0.1"
        );
        assert_eq!(substitute_env("${UNKNOWN}", lookup), "${UNKNOWN}");
        assert_eq!(substitute_env("open ${HOST", lookup), "open ${HOST");
        assert_eq!(substitute_env("plain", lookup), "plain");
    }
}
