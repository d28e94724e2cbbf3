use crate::{
    configuration::{GuardConfig, TimingConfig},
    drive::DriveCommand,
    error::PortError,
    executor::{CommandSource, MotionExecutor},
    ports::{CollisionSwitch, DistanceMeter, Ports},
    state::SharedState,
};
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// switch pressed or obstacle inside the safe distance
    Unsafe,
    Clear,
    /// a read failed, halted is left as it was
    Unknown,
}

/// Always-on safety loop, independent of the drive mode.
///
/// Sole reader of the distance meter and the collision switches.
pub struct ObstacleGuard {
    distance_meter: Option<Arc<dyn DistanceMeter>>,
    collision_left: Option<Arc<dyn CollisionSwitch>>,
    collision_right: Option<Arc<dyn CollisionSwitch>>,
    state: SharedState,
    executor: Arc<MotionExecutor>,
    config: GuardConfig,
    sensor_timeout: Duration,
    clear_ticks: u32,
}

impl ObstacleGuard {
    pub fn new(
        ports: &Ports,
        state: SharedState,
        executor: Arc<MotionExecutor>,
        config: GuardConfig,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            distance_meter: ports.distance_meter.clone(),
            collision_left: ports.collision_left.clone(),
            collision_right: ports.collision_right.clone(),
            state,
            executor,
            config,
            sensor_timeout: timing.sensor_timeout(),
            clear_ticks: 0,
        }
    }

    pub fn has_sensors(&self) -> bool {
        self.distance_meter.is_some()
            || self.collision_left.is_some()
            || self.collision_right.is_some()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if !self.has_sensors() {
            warn!("No distance meter or collision switches, obstacle guard is idle");
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
        debug!("Obstacle guard stopped");
    }

    pub async fn tick(&mut self) -> Verdict {
        let distance = self.read(
            self.distance_meter.clone(),
            "distance meter",
            |meter| async move { meter.distance_cm().await },
        );
        let left = self.read(
            self.collision_left.clone(),
            "left collision switch",
            |switch| async move { switch.pressed().await },
        );
        let right = self.read(
            self.collision_right.clone(),
            "right collision switch",
            |switch| async move { switch.pressed().await },
        );
        let (distance, left, right) = tokio::join!(distance, left, right);
        let distance = distance.and_then(|reading| match reading {
            Some(cm) if !cm.is_finite() || cm < 0.0 => {
                warn!("Discarding distance reading {}", cm);
                Err(PortError::Device(format!("invalid distance {cm}")))
            }
            reading => Ok(reading),
        });

        let distance_cm = distance.as_ref().ok().copied().flatten();
        let left_pressed = matches!(left, Ok(Some(true)));
        let right_pressed = matches!(right, Ok(Some(true)));
        self.state.update(|state| {
            state.sensors.distance_cm = distance_cm;
            state.sensors.collision_left = left_pressed;
            state.sensors.collision_right = right_pressed;
            state.sensors.timestamp = Some(Utc::now());
        });

        let verdict = self.judge(distance, left, right);
        match verdict {
            Verdict::Unsafe => {
                self.clear_ticks = 0;
                let newly_halted = self
                    .state
                    .update(|state| !std::mem::replace(&mut state.halted, true));
                if newly_halted {
                    warn!(
                        ?distance_cm,
                        left_pressed, right_pressed, "Obstacle detected, halting"
                    );
                }
                if let Err(err) = self
                    .executor
                    .execute(DriveCommand::Stop, None, CommandSource::Guard)
                    .await
                {
                    error!("Failed to stop vehicle after obstacle: {}", err);
                }
            }
            Verdict::Clear => {
                self.clear_ticks = self.clear_ticks.saturating_add(1);
                if self.clear_ticks >= self.config.debounce_ticks {
                    let released = self
                        .state
                        .update(|state| std::mem::replace(&mut state.halted, false));
                    if released {
                        info!("Path clear for {} ticks, releasing halt", self.clear_ticks);
                        self.executor.refresh_indicators().await;
                    }
                }
            }
            Verdict::Unknown => {
                self.clear_ticks = 0;
            }
        }
        verdict
    }

    /// Any unsafe reading wins, then any failed reading makes the tick inconclusive.
    fn judge(
        &self,
        distance: Result<Option<f64>, PortError>,
        left: Result<Option<bool>, PortError>,
        right: Result<Option<bool>, PortError>,
    ) -> Verdict {
        let too_close = matches!(distance, Ok(Some(cm)) if cm < self.config.safe_distance_cm);
        let pressed = matches!(left, Ok(Some(true))) || matches!(right, Ok(Some(true)));
        if too_close || pressed {
            Verdict::Unsafe
        } else if distance.is_err() || left.is_err() || right.is_err() {
            Verdict::Unknown
        } else {
            Verdict::Clear
        }
    }

    /// Bounded read of an optional port, `Ok(None)` when the port is not fitted.
    async fn read<P, T, F, Fut>(
        &self,
        port: Option<Arc<P>>,
        name: &str,
        read: F,
    ) -> Result<Option<T>, PortError>
    where
        P: ?Sized,
        F: FnOnce(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T, PortError>>,
    {
        let Some(port) = port else {
            return Ok(None);
        };
        let result = match timeout(self.sensor_timeout, read(port)).await {
            Ok(result) => result,
            Err(_) => Err(PortError::Timeout),
        };
        result.map(Some).map_err(|err| {
            warn!("Failed to read {}: {}", name, err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::MotionConfig;
    use crate::ports::mock::{
        EngineEvent, IndicatorEvent, MockCollisionSwitch, MockDistanceMeter, MockEngine,
        MockIndicator,
    };

    struct Rig {
        guard: ObstacleGuard,
        state: SharedState,
        engine: Arc<MockEngine>,
        distance: Arc<MockDistanceMeter>,
        left: Arc<MockCollisionSwitch>,
        right: Arc<MockCollisionSwitch>,
        led: Arc<MockIndicator>,
    }

    fn rig() -> Rig {
        let engine = Arc::new(MockEngine::default());
        let distance = Arc::new(MockDistanceMeter::new(100.0));
        let left = Arc::new(MockCollisionSwitch::new(false));
        let right = Arc::new(MockCollisionSwitch::new(false));
        let led = Arc::new(MockIndicator::default());
        let ports = Ports::default()
            .with_engine(engine.clone())
            .with_led(led.clone())
            .with_distance_meter(distance.clone())
            .with_collision_switches(left.clone(), right.clone());
        let state = SharedState::new();
        let executor = Arc::new(MotionExecutor::new(
            &ports,
            state.clone(),
            MotionConfig::default(),
        ));
        let guard = ObstacleGuard::new(
            &ports,
            state.clone(),
            executor,
            GuardConfig::default(),
            &TimingConfig::default(),
        );
        Rig {
            guard,
            state,
            engine,
            distance,
            left,
            right,
            led,
        }
    }

    #[tokio::test]
    async fn clear_path_does_nothing() {
        let mut rig = rig();
        assert_eq!(rig.guard.tick().await, Verdict::Clear);
        assert!(!rig.state.halted());
        assert!(rig.engine.events().is_empty());
        assert_eq!(rig.state.read(|s| s.sensors.distance_cm), Some(100.0));
    }

    #[tokio::test]
    async fn close_obstacle_halts_and_stops() {
        let mut rig = rig();
        rig.distance.set(12.0);
        assert_eq!(rig.guard.tick().await, Verdict::Unsafe);
        assert!(rig.state.halted());
        assert_eq!(rig.engine.last_event(), Some(EngineEvent::Stop));
    }

    #[tokio::test]
    async fn exactly_safe_distance_is_clear() {
        let mut rig = rig();
        rig.distance.set(20.0);
        assert_eq!(rig.guard.tick().await, Verdict::Clear);
    }

    #[tokio::test]
    async fn either_switch_halts() {
        let mut rig = rig();
        rig.right.set(true);
        assert_eq!(rig.guard.tick().await, Verdict::Unsafe);
        assert!(rig.state.read(|s| s.sensors.collision_right));
        assert!(rig.state.halted());
    }

    #[tokio::test]
    async fn release_needs_debounce_window() {
        let mut rig = rig();
        rig.left.set(true);
        rig.guard.tick().await;
        rig.left.set(false);

        rig.guard.tick().await;
        rig.guard.tick().await;
        assert!(rig.state.halted());
        rig.guard.tick().await;
        assert!(!rig.state.halted());
    }

    #[tokio::test]
    async fn chatter_restarts_debounce() {
        let mut rig = rig();
        rig.distance.set(5.0);
        rig.guard.tick().await;
        rig.distance.set(50.0);
        rig.guard.tick().await;
        rig.guard.tick().await;
        rig.distance.set(5.0);
        rig.guard.tick().await;
        rig.distance.set(50.0);
        rig.guard.tick().await;
        rig.guard.tick().await;
        assert!(rig.state.halted());
        rig.guard.tick().await;
        assert!(!rig.state.halted());
    }

    #[tokio::test]
    async fn failed_distance_read_keeps_halted_as_is() {
        let mut rig = rig();
        rig.distance.set_failing(true);
        assert_eq!(rig.guard.tick().await, Verdict::Unknown);
        assert!(!rig.state.halted());

        rig.distance.set(5.0);
        rig.guard.tick().await;
        rig.distance.set_failing(true);
        for _ in 0..5 {
            assert_eq!(rig.guard.tick().await, Verdict::Unknown);
        }
        assert!(rig.state.halted());
        assert_eq!(rig.state.read(|s| s.sensors.distance_cm), None);
    }

    #[tokio::test]
    async fn nonsense_distance_counts_as_failed_read() {
        let mut rig = rig();
        rig.distance.set(5.0);
        assert_eq!(rig.guard.tick().await, Verdict::Unsafe);

        for reading in [f64::NAN, f64::NAN, f64::INFINITY, -4.0] {
            rig.distance.set(reading);
            assert_eq!(rig.guard.tick().await, Verdict::Unknown);
            assert_eq!(rig.state.read(|s| s.sensors.distance_cm), None);
        }
        assert!(rig.state.halted());
    }

    #[tokio::test]
    async fn release_switches_led_off() {
        let mut rig = rig();
        rig.distance.set(5.0);
        rig.guard.tick().await;
        rig.distance.set(50.0);
        for _ in 0..3 {
            rig.guard.tick().await;
        }
        assert!(!rig.state.halted());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            rig.led.events(),
            vec![IndicatorEvent::On, IndicatorEvent::Off]
        );
        assert_eq!(rig.engine.events(), vec![EngineEvent::Stop]);
    }

    #[tokio::test]
    async fn pressed_switch_wins_over_failed_meter() {
        let mut rig = rig();
        rig.distance.set_failing(true);
        rig.left.set(true);
        assert_eq!(rig.guard.tick().await, Verdict::Unsafe);
        assert!(rig.state.halted());
    }

    #[tokio::test]
    async fn guard_without_sensors_exits() {
        let state = SharedState::new();
        let ports = Ports::default();
        let executor = Arc::new(MotionExecutor::new(
            &ports,
            state.clone(),
            MotionConfig::default(),
        ));
        let guard = ObstacleGuard::new(
            &ports,
            state,
            executor,
            GuardConfig::default(),
            &TimingConfig::default(),
        );
        assert!(!guard.has_sensors());
        guard.run(CancellationToken::new()).await;
    }
}
