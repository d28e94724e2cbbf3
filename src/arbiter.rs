use crate::{
    autonomy::{SpeechTask, TrackingTask},
    configuration::{ControlConfig, TimingConfig},
    drive::DriveCommand,
    error::{DispatchError, ModeError},
    executor::{CommandSource, MotionExecutor},
    navigator::Navigator,
    ports::{Capabilities, Capability, Ports},
    state::{DriveMode, SharedState},
};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::*;

struct ActiveTask {
    mode: DriveMode,
    session: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns drive mode transitions and the control task of the active mode.
///
/// Every transition holds the task slot for its whole duration, so two
/// requests can never interleave.
pub struct ModeArbiter {
    state: SharedState,
    capabilities: Capabilities,
    executor: Arc<MotionExecutor>,
    navigator: Arc<Navigator>,
    tracking: Arc<TrackingTask>,
    speech: Arc<SpeechTask>,
    timing: TimingConfig,
    active: Mutex<Option<ActiveTask>>,
}

impl ModeArbiter {
    pub fn new(
        ports: &Ports,
        capabilities: Capabilities,
        state: SharedState,
        executor: Arc<MotionExecutor>,
        config: &ControlConfig,
    ) -> Self {
        let navigator = Navigator::new(state.clone(), executor.clone(), config.navigation.clone());
        let tracking = TrackingTask::new(
            ports,
            state.clone(),
            executor.clone(),
            config.navigation.clone(),
            config.autonomy.clone(),
            &config.timing,
        );
        let speech = SpeechTask::new(
            ports,
            state.clone(),
            executor.clone(),
            config.autonomy.clone(),
            &config.timing,
        );
        Self {
            state,
            capabilities,
            executor,
            navigator: Arc::new(navigator),
            tracking: Arc::new(tracking),
            speech: Arc::new(speech),
            timing: config.timing.clone(),
            active: Mutex::new(None),
        }
    }

    pub fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    pub fn current_mode(&self) -> DriveMode {
        self.state.mode()
    }

    pub async fn request_mode(&self, target: DriveMode) -> Result<(), ModeError> {
        let mut active = self.active.lock().await;
        reap_finished(&mut active).await;

        if target == DriveMode::Manual {
            self.leave_autonomy(&mut active).await;
            return Ok(());
        }

        let current = self.state.mode();
        if current != DriveMode::Manual {
            warn!("Rejected {}, {} is active", target, current);
            return Err(ModeError::ModeBusy { active: current });
        }
        // session ended on its own, the task is still winding down
        if active.is_some() {
            self.leave_autonomy(&mut active).await;
        }

        let waypoint = if target == DriveMode::SelfDriving {
            let waypoint = self
                .state
                .read(|state| state.pending_waypoint.or(state.waypoint));
            match waypoint {
                Some(waypoint) => Some(waypoint),
                None => {
                    warn!("Rejected self driving, no destination set");
                    return Err(ModeError::NoDestination);
                }
            }
        } else {
            None
        };
        if let Some(missing) = self.capabilities.missing(required_capabilities(target)) {
            warn!("Rejected {}, missing {}", target, missing);
            return Err(ModeError::CapabilityUnavailable(missing));
        }

        let session = self.state.update(|state| {
            state.session += 1;
            state.mode = target;
            if let Some(waypoint) = waypoint {
                state.waypoint = Some(waypoint);
                state.pending_waypoint = None;
            }
            state.session
        });
        let cancel = CancellationToken::new();
        let handle = self.spawn_task(target, cancel.clone(), session);
        *active = Some(ActiveTask {
            mode: target,
            session,
            cancel,
            handle,
        });
        match waypoint {
            Some(waypoint) => info!("Entered {} towards {}", target, waypoint),
            None => info!("Entered {}", target),
        }
        Ok(())
    }

    /// Run a manual drive command unless an autonomous mode owns the engine.
    ///
    /// The mode check and the engine write happen under the transition lock,
    /// no mode can be entered in between.
    pub async fn drive_manual(
        &self,
        command: DriveCommand,
    ) -> Result<DriveCommand, DispatchError> {
        let _active = self.active.lock().await;
        let mode = self.state.mode();
        if mode != DriveMode::Manual {
            warn!("Manual {} rejected, {} owns the vehicle", command, mode);
            return Err(ModeError::ModeBusy { active: mode }.into());
        }
        Ok(self
            .executor
            .execute(command, None, CommandSource::Manual)
            .await?)
    }

    fn spawn_task(
        &self,
        mode: DriveMode,
        cancel: CancellationToken,
        session: u64,
    ) -> JoinHandle<()> {
        match mode {
            DriveMode::SelfDriving => {
                let navigator = self.navigator.clone();
                tokio::spawn(async move { navigator.run(cancel, session).await })
            }
            DriveMode::SelfTracking => {
                let tracking = self.tracking.clone();
                tokio::spawn(async move { tracking.run(cancel, session).await })
            }
            DriveMode::SpeechDriving => {
                let speech = self.speech.clone();
                tokio::spawn(async move { speech.run(cancel, session).await })
            }
            DriveMode::Manual => tokio::spawn(async {}),
        }
    }

    /// Cancel the running task, wait for it within the grace period and stop the car.
    async fn leave_autonomy(&self, active: &mut Option<ActiveTask>) {
        let task = active.take();
        let had_task = task.is_some();
        if let Some(mut task) = task {
            task.cancel.cancel();
            let acknowledged = timeout(self.timing.cancel_grace(), &mut task.handle).await;
            match acknowledged {
                Ok(Ok(())) => {
                    debug!("{} task of session {} acknowledged", task.mode, task.session)
                }
                Ok(Err(err)) => error!("{} task ended abnormally: {}", task.mode, err),
                Err(_) => {
                    warn!(
                        "{} task did not stop within {:?}, aborting",
                        task.mode,
                        self.timing.cancel_grace()
                    );
                    task.handle.abort();
                }
            }
        }

        let previous = self.state.update(|state| {
            let previous = state.mode;
            state.mode = DriveMode::Manual;
            state.waypoint = None;
            previous
        });
        if previous.is_autonomous() {
            info!("Left {}, back to manual", previous);
        }
        if previous.is_autonomous() || had_task {
            if let Err(err) = self
                .executor
                .execute(DriveCommand::Stop, None, CommandSource::Arbiter)
                .await
            {
                error!("Failed to stop after leaving autonomy: {}", err);
            }
        }
    }

    /// Kill whatever task is left without waiting, last resort for shutdown.
    pub async fn abort_active(&self) {
        if let Some(task) = self.active.lock().await.take() {
            warn!("Aborting {} task of session {}", task.mode, task.session);
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

async fn reap_finished(active: &mut Option<ActiveTask>) {
    if active.as_ref().is_some_and(|task| task.handle.is_finished()) {
        if let Some(task) = active.take() {
            if let Err(err) = task.handle.await {
                error!("{} task ended abnormally: {}", task.mode, err);
            }
        }
    }
}

fn required_capabilities(mode: DriveMode) -> &'static [Capability] {
    match mode {
        DriveMode::Manual => &[],
        DriveMode::SelfDriving => &[Capability::Engine, Capability::Gps, Capability::HeadingSensor],
        DriveMode::SelfTracking => &[Capability::Tracker, Capability::Engine],
        DriveMode::SpeechDriving => &[Capability::SpeechListener, Capability::Engine],
    }
}
