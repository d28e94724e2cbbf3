//! Capability ports the control core consumes.
//!
//! Drivers live outside this crate, the core only sees these traits. Every port
//! is optional; a missing port degrades what the vehicle can do but never
//! brings the core down.

pub mod mock;
pub mod replay_gps;
pub mod serial_engine;

use crate::{drive::WheelCommand, error::PortError, geo::GeoPoint};
use async_trait::async_trait;
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};

#[async_trait]
pub trait Engine: Send + Sync {
    async fn set_drive(&self, command: WheelCommand) -> Result<(), PortError>;
    async fn stop(&self) -> Result<(), PortError>;
}

#[async_trait]
pub trait Servo: Send + Sync {
    async fn roll(&self, angle_degrees: f64) -> Result<(), PortError>;
}

#[async_trait]
pub trait HeadingSensor: Send + Sync {
    /// Compass heading in degrees
    async fn heading(&self) -> Result<f64, PortError>;
}

#[async_trait]
pub trait DistanceMeter: Send + Sync {
    async fn distance_cm(&self) -> Result<f64, PortError>;
}

#[async_trait]
pub trait CollisionSwitch: Send + Sync {
    async fn pressed(&self) -> Result<bool, PortError>;
}

#[async_trait]
pub trait Gps: Send + Sync {
    async fn location(&self) -> Result<GeoPoint, PortError>;
}

/// Horn, led or light
#[async_trait]
pub trait Indicator: Send + Sync {
    async fn on(&self) -> Result<(), PortError>;
    async fn off(&self) -> Result<(), PortError>;
    async fn blink(&self, count: u32, interval: Duration) -> Result<(), PortError>;
}

/// Where the tracked object is relative to the vehicle nose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sighting {
    /// negative is left of the nose
    pub offset_degrees: f64,
    /// object is close enough to stop in front of it
    pub within_reach: bool,
}

/// Camera backed object tracker, perception itself happens behind this port.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn sighting(&self) -> Result<Option<Sighting>, PortError>;
}

/// Speech recognizer, yields the last recognized phrase if any.
#[async_trait]
pub trait SpeechListener: Send + Sync {
    async fn listen(&self) -> Result<Option<String>, PortError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Engine,
    Servo,
    HeadingSensor,
    DistanceMeter,
    CollisionSwitches,
    Gps,
    Horn,
    Led,
    Tracker,
    SpeechListener,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Capability::Engine => "engine",
            Capability::Servo => "servo",
            Capability::HeadingSensor => "heading sensor",
            Capability::DistanceMeter => "distance meter",
            Capability::CollisionSwitches => "collision switches",
            Capability::Gps => "gps",
            Capability::Horn => "horn",
            Capability::Led => "led",
            Capability::Tracker => "tracker",
            Capability::SpeechListener => "speech listener",
        };
        f.write_str(name)
    }
}

/// Which ports are fitted, computed once when the vehicle is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub engine: bool,
    pub servo: bool,
    pub heading_sensor: bool,
    pub distance_meter: bool,
    pub collision_switches: bool,
    pub gps: bool,
    pub horn: bool,
    pub led: bool,
    pub tracker: bool,
    pub speech_listener: bool,
}

impl Capabilities {
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Engine => self.engine,
            Capability::Servo => self.servo,
            Capability::HeadingSensor => self.heading_sensor,
            Capability::DistanceMeter => self.distance_meter,
            Capability::CollisionSwitches => self.collision_switches,
            Capability::Gps => self.gps,
            Capability::Horn => self.horn,
            Capability::Led => self.led,
            Capability::Tracker => self.tracker,
            Capability::SpeechListener => self.speech_listener,
        }
    }

    /// First missing capability out of `required`
    pub fn missing(&self, required: &[Capability]) -> Option<Capability> {
        required.iter().copied().find(|c| !self.has(*c))
    }
}

/// Ports owned by the surrounding application, the core only keeps references.
#[derive(Clone, Default)]
pub struct Ports {
    pub engine: Option<Arc<dyn Engine>>,
    pub servo: Option<Arc<dyn Servo>>,
    pub heading_sensor: Option<Arc<dyn HeadingSensor>>,
    pub distance_meter: Option<Arc<dyn DistanceMeter>>,
    pub collision_left: Option<Arc<dyn CollisionSwitch>>,
    pub collision_right: Option<Arc<dyn CollisionSwitch>>,
    pub gps: Option<Arc<dyn Gps>>,
    pub horn: Option<Arc<dyn Indicator>>,
    pub led: Option<Arc<dyn Indicator>>,
    pub tracker: Option<Arc<dyn Tracker>>,
    pub speech_listener: Option<Arc<dyn SpeechListener>>,
}

impl Ports {
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_servo(mut self, servo: Arc<dyn Servo>) -> Self {
        self.servo = Some(servo);
        self
    }

    pub fn with_heading_sensor(mut self, heading_sensor: Arc<dyn HeadingSensor>) -> Self {
        self.heading_sensor = Some(heading_sensor);
        self
    }

    pub fn with_distance_meter(mut self, distance_meter: Arc<dyn DistanceMeter>) -> Self {
        self.distance_meter = Some(distance_meter);
        self
    }

    pub fn with_collision_switches(
        mut self,
        left: Arc<dyn CollisionSwitch>,
        right: Arc<dyn CollisionSwitch>,
    ) -> Self {
        self.collision_left = Some(left);
        self.collision_right = Some(right);
        self
    }

    pub fn with_gps(mut self, gps: Arc<dyn Gps>) -> Self {
        self.gps = Some(gps);
        self
    }

    pub fn with_horn(mut self, horn: Arc<dyn Indicator>) -> Self {
        self.horn = Some(horn);
        self
    }

    pub fn with_led(mut self, led: Arc<dyn Indicator>) -> Self {
        self.led = Some(led);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_speech_listener(mut self, speech_listener: Arc<dyn SpeechListener>) -> Self {
        self.speech_listener = Some(speech_listener);
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            engine: self.engine.is_some(),
            servo: self.servo.is_some(),
            heading_sensor: self.heading_sensor.is_some(),
            distance_meter: self.distance_meter.is_some(),
            // a single switch still guards one side
            collision_switches: self.collision_left.is_some() || self.collision_right.is_some(),
            gps: self.gps.is_some(),
            horn: self.horn.is_some(),
            led: self.led.is_some(),
            tracker: self.tracker.is_some(),
            speech_listener: self.speech_listener.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{MockEngine, ScriptedGps};

    #[test]
    fn capabilities_follow_fitted_ports() {
        let ports = Ports::default()
            .with_engine(Arc::new(MockEngine::default()))
            .with_gps(Arc::new(ScriptedGps::fixed(GeoPoint::new(1.0, 2.0))));
        let capabilities = ports.capabilities();
        assert!(capabilities.engine);
        assert!(capabilities.gps);
        assert!(!capabilities.heading_sensor);
        assert_eq!(
            capabilities.missing(&[Capability::Engine, Capability::HeadingSensor]),
            Some(Capability::HeadingSensor)
        );
        assert_eq!(capabilities.missing(&[Capability::Engine]), None);
    }
}
