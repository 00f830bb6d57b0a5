use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Identifier of the info reporting the current position of an actor.
pub const CURRENT_POSITION: &str = "currentPosition";
/// Identifier of the function moving an actor to a target position.
pub const TARGET_POSITION: &str = "targetPosition";

/// A single named value exposed by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    /// Value type, such as `number` or `enumeration`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Value identifier.
    pub identifier: String,
    /// Raw value.
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A device exposed by the device API of an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device identifier used in request paths.
    pub device_guid: String,
    /// Product identifier.
    pub product_guid: String,
    /// Human-readable device name.
    pub display_name: String,
    /// Readable state.
    #[serde(default)]
    pub infos: Vec<Info>,
    /// Device settings.
    #[serde(default)]
    pub settings: Vec<Info>,
    /// Writable state.
    #[serde(default)]
    pub functions: Vec<Info>,
}

impl Device {
    /// Checks whether the device exposes the info with the given identifier.
    #[must_use]
    pub fn has_info(&self, identifier: &str) -> bool {
        contains(&self.infos, identifier)
    }

    /// Checks whether the device exposes the function with the given
    /// identifier.
    #[must_use]
    pub fn has_function(&self, identifier: &str) -> bool {
        contains(&self.functions, identifier)
    }
}

fn contains(values: &[Info], identifier: &str) -> bool {
    values.iter().any(|info| info.identifier == identifier)
}

/// A catalog of [`Device`]s, kept in fetch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Devices(Vec<Device>);

impl Devices {
    /// Creates an empty [`Devices`] catalog.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a [`Devices`] catalog from a list of [`Device`]s.
    #[must_use]
    #[inline]
    pub const fn from_devices(devices: Vec<Device>) -> Self {
        Self(devices)
    }

    /// Checks whether the catalog is empty.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of devices in the catalog.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns an iterator over the devices.
    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.0.iter()
    }

    /// Finds the first device exposing the function with the given
    /// identifier.
    ///
    /// # Errors
    ///
    /// An error is returned if the catalog is empty or if no device exposes
    /// the function.
    pub fn find_by_function(&self, identifier: &str) -> Result<&Device> {
        self.find_by(identifier, Device::has_function)
    }

    /// Finds the first device exposing the info with the given identifier.
    ///
    /// # Errors
    ///
    /// An error is returned if the catalog is empty or if no device exposes
    /// the info.
    pub fn find_by_info(&self, identifier: &str) -> Result<&Device> {
        self.find_by(identifier, Device::has_info)
    }

    fn find_by(&self, identifier: &str, exposes: fn(&Device, &str) -> bool) -> Result<&Device> {
        if self.0.is_empty() {
            return Err(Error::new(ErrorKind::NoDevices, "No devices found"));
        }

        self.0
            .iter()
            .find(|device| exposes(device, identifier))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::DeviceNotFound,
                    format!("Device not found {identifier}"),
                )
            })
    }
}

impl<'a> IntoIterator for &'a Devices {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use crate::error::{Error, ErrorKind};

    use super::{CURRENT_POSITION, Device, Devices, TARGET_POSITION};

    pub(crate) fn create_devices() -> Devices {
        let devices: Vec<Device> = serde_json::from_value(crate::tests::devices_json()).unwrap();
        Devices::from_devices(devices)
    }

    #[test]
    fn parse_device() {
        let devices = create_devices();

        assert_eq!(devices.len(), 2);

        let shutter = devices.iter().next().unwrap();
        assert_eq!(shutter.display_name, "living room");
        assert_eq!(shutter.infos[0].kind, "number");
        assert_eq!(shutter.infos[0].value, json!(2));
        assert_eq!(shutter.settings.len(), 2);
        assert!(shutter.has_info(CURRENT_POSITION));
        assert!(shutter.has_function(TARGET_POSITION));
        assert!(!shutter.has_function(CURRENT_POSITION));
    }

    #[test]
    fn missing_capability_lists() {
        let device: Device = serde_json::from_value(json!({
            "deviceGuid": "guid",
            "productGuid": "product",
            "displayName": "bare",
        }))
        .unwrap();

        assert!(device.infos.is_empty());
        assert!(device.settings.is_empty());
        assert!(device.functions.is_empty());
    }

    #[test]
    fn empty_catalog() {
        let devices = Devices::new();

        assert_eq!(
            devices.find_by_info(CURRENT_POSITION),
            Err(Error::new(ErrorKind::NoDevices, "No devices found"))
        );
        assert_eq!(
            devices.find_by_function(TARGET_POSITION),
            Err(Error::new(ErrorKind::NoDevices, "No devices found"))
        );
    }

    #[test]
    fn lookup_by_capability() {
        let devices = create_devices();

        let shutter = devices.find_by_info(CURRENT_POSITION).unwrap();
        assert_eq!(shutter.device_guid, crate::tests::DEVICE_GUID);

        let input = devices.find_by_function("inputChannel1").unwrap();
        assert_eq!(input.display_name, "3_CHANNEL_INPUT");

        assert_eq!(
            devices.find_by_info("power-meter").unwrap_err().kind(),
            ErrorKind::DeviceNotFound
        );
        // `targetPosition` is a function, not an info.
        assert_eq!(
            devices.find_by_info(TARGET_POSITION).unwrap_err().kind(),
            ErrorKind::DeviceNotFound
        );
    }

    #[test]
    fn first_match_wins() {
        let mut devices: Vec<Device> = create_devices().iter().cloned().collect();
        let mut twin = devices[0].clone();
        twin.device_guid = "twin".into();
        devices.push(twin);

        let devices = Devices::from_devices(devices);
        assert_eq!(
            devices.find_by_function(TARGET_POSITION).unwrap().device_guid,
            crate::tests::DEVICE_GUID
        );
    }
}
