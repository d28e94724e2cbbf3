//! Self tracking and speech driving.
//!
//! Both follow the navigator lifecycle: spawned by the arbiter with a session
//! id, cancelled through a token, and bail out once their session is gone.

use crate::{
    configuration::{AutonomyConfig, NavigationConfig, TimingConfig},
    drive::DriveCommand,
    error::PortError,
    executor::{CommandSource, MotionExecutor},
    navigator::steer,
    ports::{Ports, SpeechListener, Tracker},
    state::{DriveMode, SharedState},
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    Idle,
    Issued(DriveCommand),
    Superseded,
}

fn session_active(state: &SharedState, mode: DriveMode, session: u64) -> bool {
    state.read(|state| state.mode == mode && state.session == session)
}

async fn bounded<T>(
    limit: Duration,
    read: impl Future<Output = Result<T, PortError>>,
) -> Result<T, PortError> {
    timeout(limit, read)
        .await
        .unwrap_or_else(|_| Err(PortError::Timeout))
}

async fn drive_loop<F, Fut>(tick_period: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TaskStep>,
{
    let mut ticker = interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if tick().await == TaskStep::Superseded {
            break;
        }
    }
}

/// Follows an object reported by the tracker port.
pub struct TrackingTask {
    tracker: Option<Arc<dyn Tracker>>,
    state: SharedState,
    executor: Arc<MotionExecutor>,
    steering: NavigationConfig,
    config: AutonomyConfig,
    sensor_timeout: Duration,
}

impl TrackingTask {
    pub fn new(
        ports: &Ports,
        state: SharedState,
        executor: Arc<MotionExecutor>,
        steering: NavigationConfig,
        config: AutonomyConfig,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            tracker: ports.tracker.clone(),
            state,
            executor,
            steering,
            config,
            sensor_timeout: timing.sensor_timeout(),
        }
    }

    pub async fn run(&self, cancel: CancellationToken, session: u64) {
        info!("Tracking started for session {}", session);
        drive_loop(self.config.tick(), cancel, move || self.tick(session)).await;
        info!("Tracking stopped for session {}", session);
    }

    pub async fn tick(&self, session: u64) -> TaskStep {
        if !session_active(&self.state, DriveMode::SelfTracking, session) {
            return TaskStep::Superseded;
        }
        let Some(tracker) = &self.tracker else {
            return TaskStep::Superseded;
        };
        let sighting = match bounded(self.sensor_timeout, tracker.sighting()).await {
            Ok(sighting) => sighting,
            Err(err) => {
                warn!("Failed to read tracker: {}", err);
                return TaskStep::Idle;
            }
        };
        let (command, magnitude) = match sighting {
            Some(sighting) if !sighting.within_reach => {
                steer(sighting.offset_degrees, &self.steering)
            }
            Some(_) => (DriveCommand::Stop, 0),
            None => {
                trace!("Target lost");
                (DriveCommand::Stop, 0)
            }
        };
        match self
            .executor
            .execute(command, Some(magnitude), CommandSource::Tracker)
            .await
        {
            Ok(issued) => TaskStep::Issued(issued),
            Err(err) => {
                error!("Tracking command failed: {}", err);
                TaskStep::Idle
            }
        }
    }
}

/// Drives by recognized voice commands.
pub struct SpeechTask {
    listener: Option<Arc<dyn SpeechListener>>,
    state: SharedState,
    executor: Arc<MotionExecutor>,
    config: AutonomyConfig,
    sensor_timeout: Duration,
}

impl SpeechTask {
    pub fn new(
        ports: &Ports,
        state: SharedState,
        executor: Arc<MotionExecutor>,
        config: AutonomyConfig,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            listener: ports.speech_listener.clone(),
            state,
            executor,
            config,
            sensor_timeout: timing.sensor_timeout(),
        }
    }

    pub async fn run(&self, cancel: CancellationToken, session: u64) {
        info!("Speech driving started for session {}", session);
        drive_loop(self.config.tick(), cancel, move || self.tick(session)).await;
        info!("Speech driving stopped for session {}", session);
    }

    pub async fn tick(&self, session: u64) -> TaskStep {
        if !session_active(&self.state, DriveMode::SpeechDriving, session) {
            return TaskStep::Superseded;
        }
        let Some(listener) = &self.listener else {
            return TaskStep::Superseded;
        };
        let phrase = match bounded(self.sensor_timeout, listener.listen()).await {
            Ok(Some(phrase)) => phrase,
            Ok(None) => return TaskStep::Idle,
            Err(err) => {
                warn!("Failed to read speech listener: {}", err);
                return TaskStep::Idle;
            }
        };
        let Some(command) = parse_phrase(&phrase) else {
            debug!("No drive command in {:?}", phrase);
            return TaskStep::Idle;
        };
        info!("Heard {:?}, driving {}", phrase, command);
        match self
            .executor
            .execute(command, None, CommandSource::Speech)
            .await
        {
            Ok(issued) => TaskStep::Issued(issued),
            Err(err) => {
                error!("Speech command failed: {}", err);
                TaskStep::Idle
            }
        }
    }
}

/// First drive keyword in a recognized phrase.
pub fn parse_phrase(phrase: &str) -> Option<DriveCommand> {
    phrase
        .split(|c: char| !c.is_alphabetic())
        .find_map(|word| match word.to_lowercase().as_str() {
            "forward" => Some(DriveCommand::Forward),
            "backward" | "back" => Some(DriveCommand::Backward),
            "left" => Some(DriveCommand::TurnLeft),
            "right" => Some(DriveCommand::TurnRight),
            "stop" => Some(DriveCommand::Stop),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration::MotionConfig,
        ports::{
            mock::{EngineEvent, MockEngine, MockSpeechListener, MockTracker},
            Sighting,
        },
    };

    #[test]
    fn phrase_keywords() {
        assert_eq!(parse_phrase("go Forward please"), Some(DriveCommand::Forward));
        assert_eq!(parse_phrase("turn left, then right"), Some(DriveCommand::TurnLeft));
        assert_eq!(parse_phrase("STOP!"), Some(DriveCommand::Stop));
        assert_eq!(parse_phrase("hello there"), None);
        assert_eq!(parse_phrase("leftover"), None);
    }

    fn enter(state: &SharedState, mode: DriveMode, session: u64) {
        state.update(|state| {
            state.mode = mode;
            state.session = session;
        });
    }

    fn executor(ports: &Ports, state: &SharedState) -> Arc<MotionExecutor> {
        Arc::new(MotionExecutor::new(
            ports,
            state.clone(),
            MotionConfig::default(),
        ))
    }

    #[tokio::test]
    async fn tracking_steers_towards_target() {
        let engine = Arc::new(MockEngine::default());
        let tracker = Arc::new(MockTracker::default());
        let ports = Ports::default()
            .with_engine(engine.clone())
            .with_tracker(tracker.clone());
        let state = SharedState::new();
        let task = TrackingTask::new(
            &ports,
            state.clone(),
            executor(&ports, &state),
            NavigationConfig::default(),
            AutonomyConfig::default(),
            &TimingConfig::default(),
        );
        enter(&state, DriveMode::SelfTracking, 1);

        tracker.set(Some(Sighting {
            offset_degrees: -15.0,
            within_reach: false,
        }));
        assert_eq!(task.tick(1).await, TaskStep::Issued(DriveCommand::TurnLeft));

        tracker.set(Some(Sighting {
            offset_degrees: 1.0,
            within_reach: true,
        }));
        assert_eq!(task.tick(1).await, TaskStep::Issued(DriveCommand::Stop));

        tracker.set(None);
        assert_eq!(task.tick(1).await, TaskStep::Issued(DriveCommand::Stop));
        assert_eq!(engine.last_event(), Some(EngineEvent::Stop));

        enter(&state, DriveMode::Manual, 1);
        assert_eq!(task.tick(1).await, TaskStep::Superseded);
    }

    #[tokio::test]
    async fn speech_drives_on_keywords() {
        let engine = Arc::new(MockEngine::default());
        let listener = Arc::new(MockSpeechListener::default());
        let ports = Ports::default()
            .with_engine(engine.clone())
            .with_speech_listener(listener.clone());
        let state = SharedState::new();
        let task = SpeechTask::new(
            &ports,
            state.clone(),
            executor(&ports, &state),
            AutonomyConfig::default(),
            &TimingConfig::default(),
        );
        enter(&state, DriveMode::SpeechDriving, 3);

        assert_eq!(task.tick(3).await, TaskStep::Idle);
        listener.say("move forward");
        listener.say("what a nice day");
        assert_eq!(task.tick(3).await, TaskStep::Issued(DriveCommand::Forward));
        assert_eq!(task.tick(3).await, TaskStep::Idle);
        assert_eq!(engine.events().len(), 1);
        assert_eq!(task.tick(2).await, TaskStep::Superseded);
    }

    #[tokio::test]
    async fn speech_run_stops_on_cancel() {
        let ports = Ports::default().with_speech_listener(Arc::new(MockSpeechListener::default()));
        let state = SharedState::new();
        let task = SpeechTask::new(
            &ports,
            state.clone(),
            executor(&ports, &state),
            AutonomyConfig::default(),
            &TimingConfig::default(),
        );
        enter(&state, DriveMode::SpeechDriving, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        task.run(cancel, 1).await;
    }
}
