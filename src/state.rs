use crate::{drive::DriveCommand, geo::GeoPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    #[default]
    Manual,
    SelfDriving,
    SelfTracking,
    SpeechDriving,
}

impl DriveMode {
    pub fn is_autonomous(&self) -> bool {
        !matches!(self, DriveMode::Manual)
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DriveMode::Manual => "manual",
            DriveMode::SelfDriving => "self driving",
            DriveMode::SelfTracking => "self tracking",
            DriveMode::SpeechDriving => "speech driving",
        };
        f.write_str(name)
    }
}

pub type Waypoint = GeoPoint;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Pose {
    pub position: Option<GeoPoint>,
    /// compass heading in [0, 360)
    pub heading_degrees: Option<f64>,
    pub position_at: Option<DateTime<Utc>>,
    pub heading_at: Option<DateTime<Utc>>,
}

impl Pose {
    /// Position and heading, if both were refreshed within `max_age`
    pub fn fresh(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Option<(GeoPoint, f64)> {
        let is_fresh = |at: Option<DateTime<Utc>>| at.is_some_and(|at| now - at <= max_age);
        match (self.position, self.heading_degrees) {
            (Some(position), Some(heading))
                if is_fresh(self.position_at) && is_fresh(self.heading_at) =>
            {
                Some((position, heading))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorSnapshot {
    /// `None` when the last read failed or no meter is fitted
    pub distance_cm: Option<f64>,
    pub collision_left: bool,
    pub collision_right: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VehicleState {
    pub mode: DriveMode,
    /// bumped on every autonomous entry so stale tasks can tell they were replaced
    pub session: u64,
    pub waypoint: Option<Waypoint>,
    /// destination recorded while not self driving
    pub pending_waypoint: Option<Waypoint>,
    pub pose: Pose,
    pub sensors: SensorSnapshot,
    pub halted: bool,
    pub last_command: Option<DriveCommand>,
}

/// The single shared record, every access goes through one mutex.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<VehicleState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, f: impl FnOnce(&VehicleState) -> R) -> R {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut VehicleState) -> R) -> R {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn snapshot(&self) -> VehicleState {
        self.read(|state| state.clone())
    }

    pub fn mode(&self) -> DriveMode {
        self.read(|state| state.mode)
    }

    pub fn halted(&self) -> bool {
        self.read(|state| state.halted)
    }

    /// Leave self driving after reaching the waypoint.
    ///
    /// Only applies if `session` is still the active one, returns whether it did.
    pub fn finish_session(&self, session: u64) -> bool {
        self.update(|state| {
            if state.mode.is_autonomous() && state.session == session {
                state.mode = DriveMode::Manual;
                state.waypoint = None;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_manual_and_not_halted() {
        let state = SharedState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.mode, DriveMode::Manual);
        assert!(snapshot.waypoint.is_none());
        assert!(!snapshot.halted);
    }

    #[test]
    fn finish_session_ignores_stale_session() {
        let state = SharedState::new();
        state.update(|state| {
            state.mode = DriveMode::SelfDriving;
            state.session = 2;
            state.waypoint = Some(GeoPoint::new(1.0, 1.0));
        });
        assert!(!state.finish_session(1));
        assert_eq!(state.mode(), DriveMode::SelfDriving);
        assert!(state.finish_session(2));
        assert_eq!(state.mode(), DriveMode::Manual);
        assert!(state.read(|state| state.waypoint.is_none()));
    }

    #[test]
    fn stale_pose_is_not_fresh() {
        let now = Utc::now();
        let pose = Pose {
            position: Some(GeoPoint::new(1.0, 1.0)),
            heading_degrees: Some(90.0),
            position_at: Some(now - chrono::Duration::seconds(5)),
            heading_at: Some(now),
        };
        assert!(pose.fresh(now, chrono::Duration::seconds(1)).is_none());
        assert!(pose.fresh(now, chrono::Duration::seconds(10)).is_some());
    }
}
