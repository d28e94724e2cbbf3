use crate::{ports::Capability, state::DriveMode};

/// Failure talking to a capability port.
///
/// Every variant counts as a sensor read failure when it comes out of a sensor,
/// the tick that hit it is skipped and polling continues.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum PortError {
    #[error("device did not answer in time")]
    Timeout,
    #[error("device has no data available")]
    NoData,
    #[error("device failure: {0}")]
    Device(String),
    #[error("device io failed")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeError {
    #[error("mode {active} owns the vehicle")]
    ModeBusy { active: DriveMode },
    #[error("self driving requested without a destination")]
    NoDestination,
    #[error("required capability {0} is not available")]
    CapabilityUnavailable(Capability),
}

#[derive(thiserror::Error, Debug)]
pub enum ActuatorError {
    #[error("vehicle has no engine")]
    EngineUnavailable,
    #[error("engine write failed")]
    Engine(#[source] PortError),
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("unknown operation {0:?}")]
    InvalidOperation(String),
    #[error("malformed destination {0:?}")]
    InvalidDestination(String),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}
