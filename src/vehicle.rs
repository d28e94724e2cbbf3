use crate::{
    arbiter::ModeArbiter,
    configuration::ControlConfig,
    dispatcher::CommandDispatcher,
    executor::MotionExecutor,
    guard::ObstacleGuard,
    navigator::Navigator,
    pose::PoseTracker,
    ports::{Capabilities, Ports},
    state::{DriveMode, SharedState},
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The assembled control core.
///
/// Built once from the ports the application opened, started, and shut down
/// before the ports are closed.
pub struct Vehicle {
    ports: Ports,
    capabilities: Capabilities,
    config: ControlConfig,
    state: SharedState,
    executor: Arc<MotionExecutor>,
    arbiter: Arc<ModeArbiter>,
    dispatcher: CommandDispatcher,
    cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl Vehicle {
    pub fn new(ports: Ports, config: ControlConfig) -> Self {
        let capabilities = ports.capabilities();
        info!(?capabilities, "Building vehicle");
        let state = SharedState::new();
        let executor = Arc::new(MotionExecutor::new(
            &ports,
            state.clone(),
            config.motion.clone(),
        ));
        let arbiter = Arc::new(ModeArbiter::new(
            &ports,
            capabilities,
            state.clone(),
            executor.clone(),
            &config,
        ));
        let dispatcher = CommandDispatcher::new(arbiter.clone());
        Self {
            ports,
            capabilities,
            config,
            state,
            executor,
            arbiter,
            dispatcher,
            cancel: CancellationToken::new(),
            background: vec![],
        }
    }

    /// Spawn the always-on loops, obstacle guard and pose tracker.
    pub fn start(&mut self) {
        if !self.background.is_empty() {
            warn!("Vehicle already started");
            return;
        }
        let guard = ObstacleGuard::new(
            &self.ports,
            self.state.clone(),
            self.executor.clone(),
            self.config.guard.clone(),
            &self.config.timing,
        );
        let pose = PoseTracker::new(
            &self.ports,
            self.state.clone(),
            self.config.pose.clone(),
            &self.config.timing,
        );
        let guard_cancel = self.cancel.child_token();
        let pose_cancel = self.cancel.child_token();
        self.background
            .push(tokio::spawn(async move { guard.run(guard_cancel).await }));
        self.background
            .push(tokio::spawn(async move { pose.run(pose_cancel).await }));
        info!("Vehicle started");
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn executor(&self) -> &Arc<MotionExecutor> {
        &self.executor
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn arbiter(&self) -> &Arc<ModeArbiter> {
        &self.arbiter
    }

    pub fn navigator(&self) -> &Arc<Navigator> {
        self.arbiter.navigator()
    }

    /// Stop every task and put the actuators in neutral.
    ///
    /// Bounded by the shutdown timeout, tasks that do not finish in time are
    /// aborted. Neutral is applied in every case.
    pub async fn shutdown(mut self) {
        info!("Shutting down vehicle");
        let limit = self.config.timing.shutdown_timeout();

        if timeout(limit, self.arbiter.request_mode(DriveMode::Manual))
            .await
            .is_err()
        {
            warn!("Leaving autonomous mode timed out");
        }
        self.arbiter.abort_active().await;

        self.cancel.cancel();
        let background = std::mem::take(&mut self.background);
        let aborts: Vec<_> = background.iter().map(|handle| handle.abort_handle()).collect();
        match timeout(limit, join_all(background)).await {
            Ok(results) => {
                for err in results.into_iter().filter_map(Result::err) {
                    error!("Background task ended abnormally: {}", err);
                }
            }
            Err(_) => {
                warn!("Background tasks did not stop within {:?}, aborting", limit);
                aborts.iter().for_each(|handle| handle.abort());
            }
        }

        self.executor.neutral().await;
        info!("Vehicle stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{
        EngineEvent, MockDistanceMeter, MockEngine, MockServo, MockSpeechListener,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_leaves_autonomy_and_neutralizes() {
        let engine = Arc::new(MockEngine::default());
        let servo = Arc::new(MockServo::default());
        let ports = Ports::default()
            .with_engine(engine.clone())
            .with_servo(servo.clone())
            .with_distance_meter(Arc::new(MockDistanceMeter::new(100.0)))
            .with_speech_listener(Arc::new(MockSpeechListener::default()));
        let mut vehicle = Vehicle::new(ports, ControlConfig::default());
        vehicle.start();
        vehicle
            .dispatcher()
            .dispatch("speechdriving", None)
            .await
            .unwrap();
        let state = vehicle.state().clone();
        assert_eq!(state.mode(), DriveMode::SpeechDriving);

        vehicle.shutdown().await;
        assert_eq!(state.mode(), DriveMode::Manual);
        assert_eq!(engine.last_event(), Some(EngineEvent::Stop));
        assert_eq!(servo.angles(), vec![0.0]);
    }

    #[tokio::test]
    async fn stalled_engine_freezes_neither_guard_nor_shutdown() {
        let engine = Arc::new(MockEngine::default());
        let distance = Arc::new(MockDistanceMeter::new(100.0));
        let listener = Arc::new(MockSpeechListener::default());
        let ports = Ports::default()
            .with_engine(engine.clone())
            .with_distance_meter(distance.clone())
            .with_speech_listener(listener.clone());
        let mut config = ControlConfig::default();
        config.motion.actuator_timeout_ms = 50;
        config.timing.cancel_grace_ms = 100;
        let mut vehicle = Vehicle::new(ports, config);
        vehicle.start();
        vehicle
            .dispatcher()
            .dispatch("speechdriving", None)
            .await
            .unwrap();

        engine.set_stalled(true);
        listener.say("forward");
        distance.set(5.0);
        let state = vehicle.state().clone();
        tokio::time::sleep(Duration::from_millis(400)).await;
        let earlier = state.read(|state| state.sensors.timestamp);
        tokio::time::sleep(Duration::from_millis(400)).await;
        let later = state.read(|state| state.sensors.timestamp);
        assert!(earlier.is_some());
        assert!(later > earlier, "guard stopped polling");
        assert!(state.halted());

        let stopped = timeout(Duration::from_secs(5), vehicle.shutdown()).await;
        assert!(stopped.is_ok(), "shutdown hung on the engine");
        assert_eq!(state.mode(), DriveMode::Manual);
        assert!(engine.events().is_empty());
    }

    #[tokio::test]
    async fn bare_vehicle_shuts_down() {
        let mut vehicle = Vehicle::new(Ports::default(), ControlConfig::default());
        assert!(!vehicle.capabilities().engine);
        vehicle.start();
        vehicle.shutdown().await;
    }
}
