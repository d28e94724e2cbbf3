use crate::drive::{Rotation, WheelCommand};
use crate::error::PortError;

use super::Engine;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::*;

#[derive(Deserialize, Debug, Clone)]
pub struct SerialEngineConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    115200
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireDriveCommand {
    pub left: i16,
    pub right: i16,
}

impl From<WheelCommand> for WireDriveCommand {
    fn from(command: WheelCommand) -> Self {
        fn wire_speed(pct: u8, direction: Rotation) -> i16 {
            let speed = (pct.min(100) as i16 * 255) / 100;
            match direction {
                Rotation::Forward => speed,
                Rotation::Backward => -speed,
            }
        }
        Self {
            left: wire_speed(command.left_pct(), command.left_direction()),
            right: wire_speed(command.right_pct(), command.right_direction()),
        }
    }
}

impl WireDriveCommand {
    fn encode(&self) -> Vec<u8> {
        // direction flag followed by speed, left side first
        let buffer = vec![
            (self.left > 0) as u8,
            self.left.unsigned_abs().min(255) as u8,
            (self.right > 0) as u8,
            self.right.unsigned_abs().min(255) as u8,
        ];

        let mut encoded = postcard_cobs::encode_vec(&buffer);
        encoded.push(0);
        encoded
    }
}

pub struct MotorProtocol;

impl Decoder for MotorProtocol {
    type Item = ();
    type Error = std::io::Error;

    fn decode(&mut self, _: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(None)
    }
}

impl Encoder<WireDriveCommand> for MotorProtocol {
    type Error = std::io::Error;

    fn encode(&mut self, data: WireDriveCommand, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded_data = data.encode();
        buf.reserve(encoded_data.len());
        buf.put_slice(&encoded_data);
        Ok(())
    }
}

/// Differential drive motor board on a serial line
pub struct SerialEngine {
    framed_port: Mutex<Framed<tokio_serial::SerialStream, MotorProtocol>>,
}

impl SerialEngine {
    pub fn open(config: &SerialEngineConfig) -> Result<Self, PortError> {
        let serial_port = tokio_serial::new(&config.port, config.baud_rate)
            .open_native_async()
            .map_err(|err| PortError::Device(format!("failed opening {}: {err}", config.port)))?;
        info!("Opened motor board on {}", config.port);
        Ok(Self {
            framed_port: Mutex::new(MotorProtocol.framed(serial_port)),
        })
    }

    async fn send(&self, command: WireDriveCommand) -> Result<(), PortError> {
        self.framed_port.lock().await.send(command).await?;
        Ok(())
    }
}

#[async_trait]
impl Engine for SerialEngine {
    async fn set_drive(&self, command: WheelCommand) -> Result<(), PortError> {
        self.send(command.into()).await
    }

    async fn stop(&self) -> Result<(), PortError> {
        self.send(WireDriveCommand::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveCommand;

    #[test]
    fn encoding_adds_trailing_zero() {
        let move_command = WireDriveCommand::default();
        let encoded = move_command.encode();
        assert_eq!(*encoded.last().unwrap(), 0_u8);
    }

    #[test]
    fn left_positive() {
        let move_command = WireDriveCommand {
            left: 255,
            ..Default::default()
        };
        let encoded = move_command.encode();
        let mut iter = encoded.iter();
        assert_eq!(*iter.next().unwrap(), 3_u8);
        assert_eq!(*iter.next().unwrap(), 1_u8);
        assert_eq!(*iter.next().unwrap(), 255_u8);
    }

    #[test]
    fn left_negative() {
        let move_command = WireDriveCommand {
            left: -255,
            ..Default::default()
        };
        let encoded = move_command.encode();
        let mut iter = encoded.iter();
        assert_eq!(*iter.next().unwrap(), 1_u8);
        assert_eq!(*iter.next().unwrap(), 2_u8);
        assert_eq!(*iter.next().unwrap(), 255_u8);
    }

    #[test]
    fn full_left_turn_maps_to_opposite_wheels() {
        let wire: WireDriveCommand = WheelCommand::from_drive(DriveCommand::TurnLeft, 100).into();
        assert_eq!(
            wire,
            WireDriveCommand {
                left: -255,
                right: 255
            }
        );
    }
}
