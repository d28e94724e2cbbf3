use config::Config;
use serde::Deserialize;
use std::{path::PathBuf, str, time::Duration};
use tracing::*;

use crate::ports::{replay_gps::GpsReplayConfig, serial_engine::SerialEngineConfig};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub engine: Option<SerialEngineConfig>,
    #[serde(default)]
    pub gps_replay: Option<GpsReplayConfig>,
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .add_source(config::Environment::with_prefix("ROVER").separator("__"))
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings").required(false))
                .add_source(config::Environment::with_prefix("ROVER").separator("__"))
                .build()?
        };

        Ok(settings.try_deserialize()?)
    }
}

/// Tunables of the control loops.
///
/// None of these come from hardware documentation, they are conservative
/// defaults for a small hobby car and are expected to be tuned per vehicle.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ControlConfig {
    pub navigation: NavigationConfig,
    pub guard: GuardConfig,
    pub pose: PoseConfig,
    pub autonomy: AutonomyConfig,
    pub motion: MotionConfig,
    pub timing: TimingConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NavigationConfig {
    pub tick_ms: u64,
    pub arrival_radius_m: f64,
    /// heading error treated as straight ahead
    pub dead_band_deg: f64,
    pub turn_gain_pct_per_deg: f64,
    pub max_turn_pct: u8,
    pub cruise_pct: u8,
    pub max_pose_age_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            arrival_radius_m: 3.0,
            dead_band_deg: 5.0,
            turn_gain_pct_per_deg: 2.0,
            max_turn_pct: 60,
            cruise_pct: 50,
            max_pose_age_ms: 1000,
        }
    }
}

impl NavigationConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn max_pose_age(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.max_pose_age_ms as i64)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GuardConfig {
    pub tick_ms: u64,
    pub safe_distance_cm: f64,
    /// consecutive clear ticks needed to leave the halted state
    pub debounce_ticks: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            safe_distance_cm: 20.0,
            debounce_ticks: 3,
        }
    }
}

impl GuardConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PoseConfig {
    pub tick_ms: u64,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self { tick_ms: 100 }
    }
}

impl PoseConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AutonomyConfig {
    pub tick_ms: u64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self { tick_ms: 200 }
    }
}

impl AutonomyConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MotionConfig {
    /// speed used when a command carries no magnitude
    pub default_speed_pct: u8,
    pub servo_center_deg: f64,
    pub halt_blink_count: u32,
    pub halt_blink_interval_ms: u64,
    /// upper bound on any single engine, servo or indicator write
    pub actuator_timeout_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            default_speed_pct: 60,
            servo_center_deg: 0.0,
            halt_blink_count: 3,
            halt_blink_interval_ms: 100,
            actuator_timeout_ms: 100,
        }
    }
}

impl MotionConfig {
    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub sensor_timeout_ms: u64,
    pub cancel_grace_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sensor_timeout_ms: 80,
            cancel_grace_ms: 500,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    #[test]
    fn test_config() {
        let builder = Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let config = builder.try_deserialize::<AppConfig>().unwrap();
        assert_eq!(config.control.guard.debounce_ticks, 3);
        assert_eq!(
            config.control.motion.actuator_timeout(),
            Duration::from_millis(100)
        );
        assert!(config.engine.is_some());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let builder = Config::builder()
            .add_source(config::File::from_str(
                "control:\n  guard:\n    safe_distance_cm: 35.0\n",
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let config = builder.try_deserialize::<AppConfig>().unwrap();
        assert_eq!(config.control.guard.safe_distance_cm, 35.0);
        assert_eq!(config.control.guard.tick_ms, 50);
        assert_eq!(config.control.navigation.arrival_radius_m, 3.0);
        assert!(config.engine.is_none());
        assert!(config.gps_replay.is_none());
    }
}
