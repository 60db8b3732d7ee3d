//! Error types for the composition core

use thiserror::Error;

/// Core error type; every variant maps to one user-visible condition
#[derive(Error, Debug)]
pub enum DevError {
    #[error("Parameter '{name}' is missing")]
    MissingParameter { name: String },

    #[error("Parameter '{name}' expects {expected}")]
    InvalidParameterValue { name: String, expected: String },

    #[error("Device '{kind}' can't go on a {bus_kind} bus")]
    BadBusForDevice { kind: String, bus_kind: String },

    #[error("No '{bus_kind}' bus found for device '{kind}'")]
    NoBusForDevice { kind: String, bus_kind: String },

    #[error("Bus '{bus}' does not support hotplugging")]
    BusNoHotplug { bus: String },

    #[error("Bus '{bus}' not found")]
    BusNotFound { bus: String },

    #[error("Device '{device}' has not been found")]
    DeviceNotFound { device: String },

    #[error("Device '{device}' has no child bus")]
    DeviceNoBus { device: String },

    #[error("Device '{device}' has multiple child buses")]
    DeviceMultipleBuses { device: String },

    #[error("Device '{kind}' could not be initialized")]
    DeviceInitFailed { kind: String },

    #[error("Device '{kind}' has no internal state to show")]
    DeviceNoState { kind: String },

    #[error("Property '{kind}.{name}' not found")]
    PropertyNotFound { kind: String, name: String },

    #[error("Property '{name}' doesn't take value '{value}'")]
    PropertyParseRejected { name: String, value: String },

    #[error("{message}")]
    Internal { message: String },
}

impl DevError {
    /// Create a missing parameter error
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter { name: name.into() }
    }

    /// Create an invalid parameter value error
    pub fn invalid_parameter_value(name: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidParameterValue {
            name: name.into(),
            expected: expected.into(),
        }
    }

    /// Create a bad-bus-for-device error
    pub fn bad_bus_for_device(kind: impl Into<String>, bus_kind: impl Into<String>) -> Self {
        Self::BadBusForDevice {
            kind: kind.into(),
            bus_kind: bus_kind.into(),
        }
    }

    /// Create a no-bus-for-device error
    pub fn no_bus_for_device(kind: impl Into<String>, bus_kind: impl Into<String>) -> Self {
        Self::NoBusForDevice {
            kind: kind.into(),
            bus_kind: bus_kind.into(),
        }
    }

    /// Create a hotplug rejection error
    pub fn bus_no_hotplug(bus: impl Into<String>) -> Self {
        Self::BusNoHotplug { bus: bus.into() }
    }

    /// Create a bus-not-found error
    pub fn bus_not_found(bus: impl Into<String>) -> Self {
        Self::BusNotFound { bus: bus.into() }
    }

    /// Create a device-not-found error
    pub fn device_not_found(device: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            device: device.into(),
        }
    }

    /// Create a property-not-found error
    pub fn property_not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::PropertyNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a property parse rejection
    pub fn property_rejected(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::PropertyParseRejected {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, DevError>;

impl From<anyhow::Error> for DevError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal {
            message: format!("{error:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_messages() {
        assert_eq!(
            DevError::missing_parameter("driver").to_string(),
            "Parameter 'driver' is missing"
        );
        assert_eq!(
            DevError::bad_bus_for_device("e1000", "I2C").to_string(),
            "Device 'e1000' can't go on a I2C bus"
        );
        assert_eq!(
            DevError::bus_not_found("pci.0").to_string(),
            "Bus 'pci.0' not found"
        );
        assert_eq!(
            DevError::property_rejected("rate", "fast").to_string(),
            "Property 'rate' doesn't take value 'fast'"
        );
    }
}
