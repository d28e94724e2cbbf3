use crate::{
    configuration::NavigationConfig,
    drive::DriveCommand,
    executor::{CommandSource, MotionExecutor},
    geo::{bearing_deg, distance_m, heading_error},
    state::{DriveMode, SharedState, Waypoint},
};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigationStep {
    /// no fresh pose this tick, nothing was sent
    NoFix,
    /// the session this task belongs to is no longer active
    Superseded,
    Arrived {
        distance_m: f64,
    },
    Steer {
        command: DriveCommand,
        magnitude: u8,
        bearing_deg: f64,
        distance_m: f64,
        heading_error: f64,
    },
}

/// Gps waypoint follower, runs only while self driving.
pub struct Navigator {
    state: SharedState,
    executor: Arc<MotionExecutor>,
    config: NavigationConfig,
}

impl Navigator {
    pub fn new(
        state: SharedState,
        executor: Arc<MotionExecutor>,
        config: NavigationConfig,
    ) -> Self {
        Self {
            state,
            executor,
            config,
        }
    }

    /// Replace the target of a running session, otherwise keep it for the next one.
    pub fn set_destination(&self, waypoint: Waypoint) {
        let active = self.state.update(|state| {
            if state.mode == DriveMode::SelfDriving {
                state.waypoint = Some(waypoint);
                true
            } else {
                state.pending_waypoint = Some(waypoint);
                false
            }
        });
        if active {
            info!("Destination changed to {}", waypoint);
        } else {
            info!("Destination {} queued for next self driving", waypoint);
        }
    }

    pub async fn run(&self, cancel: CancellationToken, session: u64) {
        info!("Navigator started for session {}", session);
        let mut ticker = interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }
            match self.tick(session).await {
                NavigationStep::Arrived { .. } | NavigationStep::Superseded => break,
                NavigationStep::NoFix | NavigationStep::Steer { .. } => {}
            }
        }
        info!("Navigator stopped for session {}", session);
    }

    pub async fn tick(&self, session: u64) -> NavigationStep {
        let now = Utc::now();
        let max_age = self.config.max_pose_age();
        let (waypoint, pose) = match self.state.read(|state| {
            let active = state.mode == DriveMode::SelfDriving && state.session == session;
            active.then(|| (state.waypoint, state.pose.fresh(now, max_age)))
        }) {
            Some((Some(waypoint), pose)) => (waypoint, pose),
            _ => return NavigationStep::Superseded,
        };
        let Some((position, heading)) = pose else {
            warn!("No fresh position and heading, skipping navigation tick");
            return NavigationStep::NoFix;
        };

        let distance_m = distance_m(&position, &waypoint);
        if distance_m <= self.config.arrival_radius_m {
            if let Err(err) = self
                .executor
                .execute(DriveCommand::Stop, None, CommandSource::Navigator)
                .await
            {
                error!("Failed to stop at destination: {}", err);
            }
            if self.state.finish_session(session) {
                info!("Arrived at {} ({:.1} m), back to manual", waypoint, distance_m);
            }
            return NavigationStep::Arrived { distance_m };
        }

        let bearing_deg = bearing_deg(&position, &waypoint);
        let heading_error = heading_error(bearing_deg, heading);
        let (command, magnitude) = steer(heading_error, &self.config);
        debug!(
            bearing_deg,
            heading, heading_error, distance_m, "Steering {} at {}%", command, magnitude
        );
        // not retried, the next tick computes a fresh command anyway
        if let Err(err) = self
            .executor
            .execute(command, Some(magnitude), CommandSource::Navigator)
            .await
        {
            error!("Navigator command failed: {}", err);
        }
        NavigationStep::Steer {
            command,
            magnitude,
            bearing_deg,
            distance_m,
            heading_error,
        }
    }
}

/// Map a heading error in degrees to a drive command.
///
/// Inside the dead band the car drives straight at cruise speed, outside it
/// turns towards the target with a magnitude proportional to the error.
pub fn steer(heading_error: f64, config: &NavigationConfig) -> (DriveCommand, u8) {
    if heading_error.abs() <= config.dead_band_deg {
        return (DriveCommand::Forward, config.cruise_pct.min(100));
    }
    let magnitude = (heading_error.abs() * config.turn_gain_pct_per_deg)
        .round()
        .min(config.max_turn_pct.min(100) as f64)
        .max(1.0) as u8;
    if heading_error > 0.0 {
        (DriveCommand::TurnRight, magnitude)
    } else {
        (DriveCommand::TurnLeft, magnitude)
    }
}
