//! Turns operation requests from the front end into mode transitions or manual drive.

use crate::{
    arbiter::ModeArbiter,
    drive::DriveCommand,
    error::DispatchError,
    geo::GeoPoint,
    state::{DriveMode, Waypoint},
};
use serde::Deserialize;
use std::{str::FromStr, sync::Arc};
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Drive(DriveCommand),
    Toggle(DriveMode),
}

impl FromStr for Operation {
    type Err = DispatchError;

    fn from_str(op: &str) -> Result<Self, Self::Err> {
        let operation = match op.trim().to_lowercase().as_str() {
            "forward" => Operation::Drive(DriveCommand::Forward),
            "backward" => Operation::Drive(DriveCommand::Backward),
            "left" => Operation::Drive(DriveCommand::TurnLeft),
            "right" => Operation::Drive(DriveCommand::TurnRight),
            "stop" => Operation::Drive(DriveCommand::Stop),
            "selfdriving" => Operation::Toggle(DriveMode::SelfDriving),
            "selftracking" => Operation::Toggle(DriveMode::SelfTracking),
            "speechdriving" => Operation::Toggle(DriveMode::SpeechDriving),
            _ => return Err(DispatchError::InvalidOperation(op.to_owned())),
        };
        Ok(operation)
    }
}

/// Request as posted by a front end, `{"op": "selfdriving", "dest": "31.2304,121.4737"}`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct OperationRequest {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub dest: Option<String>,
}

impl OperationRequest {
    /// Plain text form, `op` optionally followed by `lat,lon`
    pub fn from_text(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let first = parts.next().unwrap_or_default();
        // a lone destination is a valid request
        if first.contains(',') {
            return Self {
                op: String::new(),
                dest: Some(parts.fold(first.to_owned(), |dest, part| dest + part)),
            };
        }
        let rest: String = parts.collect();
        Self {
            op: first.to_owned(),
            dest: (!rest.is_empty()).then_some(rest),
        }
    }
}

/// Parse `"lat,lon"` in decimal degrees.
pub fn parse_destination(text: &str) -> Result<Waypoint, DispatchError> {
    let invalid = || DispatchError::InvalidDestination(text.to_owned());
    let (latitude, longitude) = text.split_once(',').ok_or_else(invalid)?;
    let latitude: f64 = latitude.trim().parse().map_err(|_| invalid())?;
    let longitude: f64 = longitude.trim().parse().map_err(|_| invalid())?;
    let point = GeoPoint::new(latitude, longitude);
    if point.is_valid() {
        Ok(point)
    } else {
        Err(invalid())
    }
}

pub struct CommandDispatcher {
    arbiter: Arc<ModeArbiter>,
}

impl CommandDispatcher {
    pub fn new(arbiter: Arc<ModeArbiter>) -> Self {
        Self { arbiter }
    }

    /// Front end entry point, validates everything before acting on anything.
    pub async fn handle(&self, request: &OperationRequest) -> Result<(), DispatchError> {
        let destination = match request.dest.as_deref().map(str::trim) {
            Some(dest) if !dest.is_empty() => Some(parse_destination(dest).map_err(|err| {
                warn!("Rejected request: {}", err);
                err
            })?),
            _ => None,
        };
        self.dispatch(&request.op, destination).await
    }

    pub async fn dispatch(
        &self,
        op: &str,
        destination: Option<Waypoint>,
    ) -> Result<(), DispatchError> {
        let operation = if op.trim().is_empty() && destination.is_some() {
            None
        } else {
            Some(op.parse::<Operation>().map_err(|err| {
                warn!("Rejected request: {}", err);
                err
            })?)
        };

        if let Some(destination) = destination {
            self.arbiter.navigator().set_destination(destination);
        }

        match operation {
            None => Ok(()),
            Some(Operation::Toggle(mode)) => {
                let target = if self.arbiter.current_mode() == mode {
                    DriveMode::Manual
                } else {
                    mode
                };
                Ok(self.arbiter.request_mode(target).await?)
            }
            Some(Operation::Drive(command)) => {
                self.arbiter.drive_manual(command).await?;
                Ok(())
            }
        }
    }
}
