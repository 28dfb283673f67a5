/* Error taxonomy wired to the stable numeric codes the DBus protocol has
 * historically returned. `RatbagError` is the type setters and commit
 * paths return internally; `as_wire_code` is the only thing that crosses
 * the bus (a method's `i32`/`u32` return value). */
use thiserror::Error;

/// The five non-success outcomes of `spec.md` §7, plus `Success` for
/// completeness of the wire mapping.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RatbagError {
    /// Communication with the hardware failed or the device is unsupported.
    #[error("communication with the device failed")]
    Device,

    /// The operation is not supported by this entity's capability set.
    #[error("operation not supported by this entity")]
    Capability,

    /// The input is out of range or violates an object-model invariant.
    #[error("invalid value")]
    InvalidValue,

    /// A low-level I/O failure, e.g. opening the hidraw node.
    #[error("system I/O failure")]
    System,

    /// A programmer bug: a capability was advertised without a matching
    /// driver callback, or similar internal inconsistency.
    #[error("internal implementation error")]
    Implementation,
}

impl RatbagError {
    /// Stable numeric code preserved for wire compatibility with the
    /// original C daemon's return-code convention.
    pub fn as_wire_code(self) -> i32 {
        match self {
            RatbagError::Device => -1,
            RatbagError::Capability => -2,
            RatbagError::InvalidValue => -3,
            RatbagError::System => -4,
            RatbagError::Implementation => -5,
        }
    }
}

/// Success is the absence of a `RatbagError`; wire code 0.
pub const SUCCESS_WIRE_CODE: i32 = 0;

pub type Result<T> = std::result::Result<T, RatbagError>;

/// Map a driver-level I/O failure onto the bus-facing taxonomy.
///
/// `IoctlFailed`/`Io`/`Timeout` are communication failures with the
/// physical device (`Device`); anything about the hidraw node itself not
/// existing or being unopenable is a `System` failure — by the time a
/// driver is running, the node was already opened once during probe, so
/// in practice this path is only reached by the rare re-open race.
pub fn from_driver_error(err: &anyhow::Error) -> RatbagError {
    use crate::driver::DriverError;
    match err.downcast_ref::<DriverError>() {
        Some(DriverError::Io { .. }) => RatbagError::System,
        Some(DriverError::IoctlFailed(_)) => RatbagError::Device,
        Some(DriverError::Timeout { .. }) => RatbagError::Device,
        Some(DriverError::ChecksumMismatch { .. }) => RatbagError::Device,
        Some(DriverError::ProtocolError { .. }) => RatbagError::Device,
        Some(DriverError::BufferTooSmall { .. }) => RatbagError::Implementation,
        None => RatbagError::Device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(RatbagError::Device.as_wire_code(), -1);
        assert_eq!(RatbagError::Capability.as_wire_code(), -2);
        assert_eq!(RatbagError::InvalidValue.as_wire_code(), -3);
        assert_eq!(RatbagError::System.as_wire_code(), -4);
        assert_eq!(RatbagError::Implementation.as_wire_code(), -5);
    }
}
