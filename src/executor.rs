//! Single serialization point for every actuator write.

use crate::{
    configuration::MotionConfig,
    drive::{DriveCommand, WheelCommand},
    error::{ActuatorError, PortError},
    ports::{Engine, Indicator, Ports, Servo},
    state::SharedState,
};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::timeout};
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    Manual,
    Navigator,
    Tracker,
    Speech,
    /// obstacle guard, never vetoed
    Guard,
    /// mode transitions and shutdown
    Arbiter,
}

impl CommandSource {
    fn vetoable(&self) -> bool {
        !matches!(self, CommandSource::Guard | CommandSource::Arbiter)
    }
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

async fn bounded(
    limit: Duration,
    write: impl Future<Output = Result<(), PortError>>,
) -> Result<(), PortError> {
    timeout(limit, write)
        .await
        .unwrap_or(Err(PortError::Timeout))
}

#[derive(Debug, Default)]
struct ExecutorState {
    halt_signalled: bool,
}

pub struct MotionExecutor {
    engine: Option<Arc<dyn Engine>>,
    servo: Option<Arc<dyn Servo>>,
    horn: Option<Arc<dyn Indicator>>,
    led: Option<Arc<dyn Indicator>>,
    state: SharedState,
    config: MotionConfig,
    inner: Mutex<ExecutorState>,
}

impl MotionExecutor {
    pub fn new(ports: &Ports, state: SharedState, config: MotionConfig) -> Self {
        Self {
            engine: ports.engine.clone(),
            servo: ports.servo.clone(),
            horn: ports.horn.clone(),
            led: ports.led.clone(),
            state,
            config,
            inner: Mutex::new(ExecutorState::default()),
        }
    }

    /// Forward a command to the engine.
    ///
    /// While the vehicle is halted every command not coming from the guard is
    /// replaced by `Stop`. Returns the command that actually reached the engine.
    /// An engine that does not answer within the actuator timeout fails the
    /// command with [`PortError::Timeout`].
    pub async fn execute(
        &self,
        command: DriveCommand,
        magnitude: Option<u8>,
        source: CommandSource,
    ) -> Result<DriveCommand, ActuatorError> {
        let mut inner = self.inner.lock().await;

        let halted = self.state.halted();
        let command = if halted && source.vetoable() && command != DriveCommand::Stop {
            debug!("Vetoed {} from {} while halted", command, source);
            DriveCommand::Stop
        } else {
            command
        };

        self.update_indicators(&mut inner, halted);

        let engine = self.engine.as_ref().ok_or(ActuatorError::EngineUnavailable)?;
        let limit = self.config.actuator_timeout();
        let result = match command {
            DriveCommand::Stop => bounded(limit, engine.stop()).await,
            command => {
                let magnitude = magnitude.unwrap_or(self.config.default_speed_pct);
                let wheels = WheelCommand::from_drive(command, magnitude);
                bounded(limit, engine.set_drive(wheels)).await
            }
        };
        if let Err(err) = result {
            error!("Engine rejected {} from {}: {}", command, source, err);
            return Err(ActuatorError::Engine(err));
        }

        trace!("Executed {} {:?} from {}", command, magnitude, source);
        self.state.update(|state| state.last_command = Some(command));
        Ok(command)
    }

    /// Bring horn and led in line with the halted flag without touching the engine.
    pub async fn refresh_indicators(&self) {
        let mut inner = self.inner.lock().await;
        self.update_indicators(&mut inner, self.state.halted());
    }

    /// Best effort operator feedback on halt transitions, never waits on the devices.
    fn update_indicators(&self, inner: &mut ExecutorState, halted: bool) {
        if halted == inner.halt_signalled {
            return;
        }
        inner.halt_signalled = halted;
        let limit = self.config.actuator_timeout();
        if halted {
            info!("Vehicle halted by obstacle guard");
            if let Some(horn) = self.horn.clone() {
                let count = self.config.halt_blink_count;
                let interval = Duration::from_millis(self.config.halt_blink_interval_ms);
                // the blink itself takes count intervals
                let limit = limit + interval * count;
                tokio::spawn(async move {
                    if let Err(err) = bounded(limit, horn.blink(count, interval)).await {
                        warn!("Failed to sound horn: {}", err);
                    }
                });
            }
            if let Some(led) = self.led.clone() {
                tokio::spawn(async move {
                    if let Err(err) = bounded(limit, led.on()).await {
                        warn!("Failed to turn led on: {}", err);
                    }
                });
            }
        } else {
            info!("Vehicle released by obstacle guard");
            if let Some(led) = self.led.clone() {
                tokio::spawn(async move {
                    if let Err(err) = bounded(limit, led.off()).await {
                        warn!("Failed to turn led off: {}", err);
                    }
                });
            }
        }
    }

    /// Return every actuator to neutral. Failures are logged, never returned.
    ///
    /// Every write is bounded by the actuator timeout, a hung device only
    /// delays the remaining ones.
    pub async fn neutral(&self) {
        let _inner = self.inner.lock().await;
        let limit = self.config.actuator_timeout();
        if let Some(engine) = &self.engine {
            match bounded(limit, engine.stop()).await {
                Ok(()) => self
                    .state
                    .update(|state| state.last_command = Some(DriveCommand::Stop)),
                Err(err) => error!("Failed to stop engine: {}", err),
            }
        }
        if let Some(servo) = &self.servo {
            if let Err(err) = bounded(limit, servo.roll(self.config.servo_center_deg)).await {
                warn!("Failed to center servo: {}", err);
            }
        }
        for (name, indicator) in [("horn", &self.horn), ("led", &self.led)] {
            if let Some(indicator) = indicator {
                if let Err(err) = bounded(limit, indicator.off()).await {
                    warn!("Failed to turn {} off: {}", name, err);
                }
            }
        }
    }
}
