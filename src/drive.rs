use serde::{Deserialize, Serialize};
use std::fmt;

/// The only vocabulary the motion executor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveCommand {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    Stop,
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DriveCommand::Forward => "forward",
            DriveCommand::Backward => "backward",
            DriveCommand::TurnLeft => "turn left",
            DriveCommand::TurnRight => "turn right",
            DriveCommand::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rotation {
    Forward,
    Backward,
}

/// Per side wheel speed in percent plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WheelCommand {
    left_pct: u8,
    right_pct: u8,
    left_direction: Rotation,
    right_direction: Rotation,
}

impl WheelCommand {
    pub fn new(
        left_pct: u8,
        right_pct: u8,
        left_direction: Rotation,
        right_direction: Rotation,
    ) -> WheelCommand {
        WheelCommand {
            left_pct: left_pct.min(100),
            right_pct: right_pct.min(100),
            left_direction,
            right_direction,
        }
    }

    pub fn stopped() -> Self {
        Self::new(0, 0, Rotation::Forward, Rotation::Forward)
    }

    /// Turns spin the car in place, one side forward and the other backward.
    pub fn from_drive(command: DriveCommand, magnitude_pct: u8) -> WheelCommand {
        let speed = magnitude_pct.min(100);
        match command {
            DriveCommand::Forward => {
                WheelCommand::new(speed, speed, Rotation::Forward, Rotation::Forward)
            }
            DriveCommand::Backward => {
                WheelCommand::new(speed, speed, Rotation::Backward, Rotation::Backward)
            }
            DriveCommand::TurnLeft => {
                WheelCommand::new(speed, speed, Rotation::Backward, Rotation::Forward)
            }
            DriveCommand::TurnRight => {
                WheelCommand::new(speed, speed, Rotation::Forward, Rotation::Backward)
            }
            DriveCommand::Stop => WheelCommand::stopped(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.left_pct == 0 && self.right_pct == 0
    }

    pub fn left_pct(&self) -> u8 {
        self.left_pct
    }
    pub fn right_pct(&self) -> u8 {
        self.right_pct
    }
    pub fn left_direction(&self) -> Rotation {
        self.left_direction
    }
    pub fn right_direction(&self) -> Rotation {
        self.right_direction
    }
}
