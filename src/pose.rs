use crate::{
    configuration::{PoseConfig, TimingConfig},
    error::PortError,
    geo::wrap_360,
    ports::{Gps, HeadingSensor, Ports},
    state::SharedState,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Keeps `VehicleState::pose` fresh, the only task touching gps and heading sensor.
///
/// A failed read leaves the previous value and its timestamp in place, so
/// consumers notice the staleness through the age of the reading.
pub struct PoseTracker {
    gps: Option<Arc<dyn Gps>>,
    heading_sensor: Option<Arc<dyn HeadingSensor>>,
    state: SharedState,
    config: PoseConfig,
    sensor_timeout: Duration,
}

impl PoseTracker {
    pub fn new(
        ports: &Ports,
        state: SharedState,
        config: PoseConfig,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            gps: ports.gps.clone(),
            heading_sensor: ports.heading_sensor.clone(),
            state,
            config,
            sensor_timeout: timing.sensor_timeout(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if self.gps.is_none() && self.heading_sensor.is_none() {
            warn!("No gps or heading sensor, pose will not be tracked");
            return;
        }
        let mut ticker = interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
        debug!("Pose tracker stopped");
    }

    pub async fn tick(&self) {
        if let Some(gps) = &self.gps {
            match self.bounded(gps.location()).await {
                Ok(position) if position.is_valid() => self.state.update(|state| {
                    state.pose.position = Some(position);
                    state.pose.position_at = Some(Utc::now());
                }),
                Ok(position) => warn!("Gps returned invalid position {}", position),
                Err(err) => warn!("Failed to read gps: {}", err),
            }
        }
        if let Some(heading_sensor) = &self.heading_sensor {
            match self.bounded(heading_sensor.heading()).await {
                Ok(heading) if heading.is_finite() => self.state.update(|state| {
                    state.pose.heading_degrees = Some(wrap_360(heading));
                    state.pose.heading_at = Some(Utc::now());
                }),
                Ok(heading) => warn!("Heading sensor returned {}", heading),
                Err(err) => warn!("Failed to read heading: {}", err),
            }
        }
    }

    async fn bounded<T>(
        &self,
        read: impl std::future::Future<Output = Result<T, PortError>>,
    ) -> Result<T, PortError> {
        timeout(self.sensor_timeout, read)
            .await
            .unwrap_or_else(|_| Err(PortError::Timeout))
    }
}
