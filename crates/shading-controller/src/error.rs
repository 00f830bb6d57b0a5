use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Username or password are missing.
    InvalidCredentials,
    /// The actor refused the credentials or they were never set.
    Authentication,
    /// The device catalog of an actor is empty.
    NoDevices,
    /// No device exposes the requested capability.
    DeviceNotFound,
    /// The device API answered with an unexpected status code.
    UnexpectedStatus,
    /// The device API answered with a malformed body.
    Protocol,
    /// A requested position lies outside `[0, 100]`.
    Range,
    /// A position has not been reached in time.
    Timeout,
    /// The device API could not be reached.
    Network,
    /// The `MQTT` client failed.
    Mqtt,
    /// The configuration is invalid or unreadable.
    Config,
    /// An input/output operation failed.
    Io,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid Credentials",
            Self::Authentication => "Authentication",
            Self::NoDevices => "No Devices",
            Self::DeviceNotFound => "Device Not Found",
            Self::UnexpectedStatus => "Unexpected Status",
            Self::Protocol => "Protocol",
            Self::Range => "Range",
            Self::Timeout => "Timeout",
            Self::Network => "Network",
            Self::Mqtt => "Mqtt",
            Self::Config => "Configuration",
            Self::Io => "Input/Output",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A library error.
///
/// It is composed of an [`ErrorKind`] and a description of what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::new(ErrorKind::Protocol, format!("Malformed body: {e}"))
        } else {
            Self::new(ErrorKind::Network, e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Protocol, e.to_string())
    }
}

impl From<rumqttc::v5::ClientError> for Error {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        Self::new(ErrorKind::Mqtt, e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
