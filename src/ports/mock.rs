//! In-memory ports for tests and bench runs without hardware.

use super::{
    CollisionSwitch, DistanceMeter, Engine, Gps, HeadingSensor, Indicator, Servo, Sighting,
    SpeechListener, Tracker,
};
use crate::{drive::WheelCommand, error::PortError, geo::GeoPoint};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failure() -> PortError {
    PortError::Device(String::from("scripted failure"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Drive(WheelCommand),
    Stop,
}

/// Engine recording every write.
#[derive(Default)]
pub struct MockEngine {
    events: Mutex<Vec<EngineEvent>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl MockEngine {
    pub fn events(&self) -> Vec<EngineEvent> {
        lock(&self.events).clone()
    }

    pub fn last_event(&self) -> Option<EngineEvent> {
        lock(&self.events).last().copied()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// A stalled engine never answers, like a motor board that hangs mid frame.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn answer(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn set_drive(&self, command: WheelCommand) -> Result<(), PortError> {
        self.answer().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(failure());
        }
        lock(&self.events).push(EngineEvent::Drive(command));
        Ok(())
    }

    async fn stop(&self) -> Result<(), PortError> {
        self.answer().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(failure());
        }
        lock(&self.events).push(EngineEvent::Stop);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockServo {
    angles: Mutex<Vec<f64>>,
}

impl MockServo {
    pub fn angles(&self) -> Vec<f64> {
        lock(&self.angles).clone()
    }
}

#[async_trait]
impl Servo for MockServo {
    async fn roll(&self, angle_degrees: f64) -> Result<(), PortError> {
        lock(&self.angles).push(angle_degrees);
        Ok(())
    }
}

/// Sensor returning whatever it was last told to, or failing on demand.
pub struct MockSensor<T> {
    value: Mutex<T>,
    failing: AtomicBool,
}

impl<T: Copy> MockSensor<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, value: T) {
        *lock(&self.value) = value;
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn read(&self) -> Result<T, PortError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(failure())
        } else {
            Ok(*lock(&self.value))
        }
    }
}

pub type MockDistanceMeter = MockSensor<f64>;
pub type MockCollisionSwitch = MockSensor<bool>;
pub type MockHeadingSensor = MockSensor<f64>;

#[async_trait]
impl DistanceMeter for MockSensor<f64> {
    async fn distance_cm(&self) -> Result<f64, PortError> {
        self.read()
    }
}

#[async_trait]
impl HeadingSensor for MockSensor<f64> {
    async fn heading(&self) -> Result<f64, PortError> {
        self.read()
    }
}

#[async_trait]
impl CollisionSwitch for MockSensor<bool> {
    async fn pressed(&self) -> Result<bool, PortError> {
        self.read()
    }
}

/// Gps walking through a list of fixes, the last one repeats.
pub struct ScriptedGps {
    fixes: Mutex<VecDeque<Result<GeoPoint, String>>>,
    last: Mutex<Option<GeoPoint>>,
}

impl ScriptedGps {
    pub fn fixed(point: GeoPoint) -> Self {
        Self::scripted(vec![Ok(point)])
    }

    pub fn scripted(fixes: Vec<Result<GeoPoint, String>>) -> Self {
        Self {
            fixes: Mutex::new(fixes.into()),
            last: Mutex::new(None),
        }
    }

    pub fn push(&self, fix: Result<GeoPoint, String>) {
        lock(&self.fixes).push_back(fix);
    }
}

#[async_trait]
impl Gps for ScriptedGps {
    async fn location(&self) -> Result<GeoPoint, PortError> {
        let next = lock(&self.fixes).pop_front();
        match next {
            Some(Ok(point)) => {
                *lock(&self.last) = Some(point);
                Ok(point)
            }
            Some(Err(reason)) => Err(PortError::Device(reason)),
            None => (*lock(&self.last)).ok_or(PortError::NoData),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorEvent {
    On,
    Off,
    Blink(u32),
}

#[derive(Default)]
pub struct MockIndicator {
    events: Mutex<Vec<IndicatorEvent>>,
}

impl MockIndicator {
    pub fn events(&self) -> Vec<IndicatorEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl Indicator for MockIndicator {
    async fn on(&self) -> Result<(), PortError> {
        lock(&self.events).push(IndicatorEvent::On);
        Ok(())
    }

    async fn off(&self) -> Result<(), PortError> {
        lock(&self.events).push(IndicatorEvent::Off);
        Ok(())
    }

    async fn blink(&self, count: u32, _interval: Duration) -> Result<(), PortError> {
        lock(&self.events).push(IndicatorEvent::Blink(count));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTracker {
    sighting: Mutex<Option<Sighting>>,
}

impl MockTracker {
    pub fn set(&self, sighting: Option<Sighting>) {
        *lock(&self.sighting) = sighting;
    }
}

#[async_trait]
impl Tracker for MockTracker {
    async fn sighting(&self) -> Result<Option<Sighting>, PortError> {
        Ok(*lock(&self.sighting))
    }
}

/// Hands out queued phrases one per call.
#[derive(Default)]
pub struct MockSpeechListener {
    phrases: Mutex<VecDeque<String>>,
}

impl MockSpeechListener {
    pub fn say(&self, phrase: &str) {
        lock(&self.phrases).push_back(phrase.to_owned());
    }
}

#[async_trait]
impl SpeechListener for MockSpeechListener {
    async fn listen(&self) -> Result<Option<String>, PortError> {
        Ok(lock(&self.phrases).pop_front())
    }
}
