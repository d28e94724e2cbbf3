//! Gps that plays back a recorded trace.
//!
//! Trace lines look like `2020-06-01T10:00:00,31.230416,121.473701`.

use super::Gps;
use crate::{error::PortError, geo::GeoPoint};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::*;

#[derive(Deserialize, Debug, Clone)]
pub struct GpsReplayConfig {
    pub path: PathBuf,
    #[serde(default = "default_looping")]
    pub looping: bool,
}

fn default_looping() -> bool {
    true
}

pub struct ReplayGps {
    points: Vec<GeoPoint>,
    looping: bool,
    index: Mutex<usize>,
}

impl ReplayGps {
    pub fn new(points: Vec<GeoPoint>, looping: bool) -> Self {
        Self {
            points,
            looping,
            index: Mutex::new(0),
        }
    }

    pub async fn open(config: &GpsReplayConfig) -> Result<Self, PortError> {
        let points = load_trace(&config.path).await?;
        info!(
            "Loaded {} gps fixes from {:?}",
            points.len(),
            config.path
        );
        Ok(Self::new(points, config.looping))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
impl Gps for ReplayGps {
    async fn location(&self) -> Result<GeoPoint, PortError> {
        if self.points.is_empty() {
            return Err(PortError::NoData);
        }
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if *index >= self.points.len() {
            if !self.looping {
                return Err(PortError::NoData);
            }
            *index = 0;
        }
        let point = self.points[*index];
        *index += 1;
        Ok(point)
    }
}

async fn load_trace(path: &Path) -> Result<Vec<GeoPoint>, PortError> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = FramedRead::new(file, LinesCodec::new());
    let mut points = vec![];
    let mut line_number = 0;
    while let Some(line) = lines.next().await {
        line_number += 1;
        let line = line.map_err(|err| PortError::Device(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        points.push(
            parse_trace_line(&line)
                .ok_or_else(|| PortError::Device(format!("bad trace line {line_number}")))?,
        );
    }
    Ok(points)
}

fn parse_trace_line(line: &str) -> Option<GeoPoint> {
    let mut fields = line.trim().rsplit(',');
    let longitude = fields.next()?.trim().parse().ok()?;
    let latitude = fields.next()?.trim().parse().ok()?;
    // timestamp column is required but unused
    fields.next()?;
    let point = GeoPoint::new(latitude, longitude);
    point.is_valid().then_some(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trace_line() {
        let point = parse_trace_line("2020-06-01T10:00:00,31.230416,121.473701").unwrap();
        assert_eq!(point, GeoPoint::new(31.230416, 121.473701));
    }

    #[test]
    fn rejects_missing_timestamp_and_garbage() {
        assert!(parse_trace_line("31.230416,121.473701").is_none());
        assert!(parse_trace_line("2020-06-01T10:00:00,north,121.4").is_none());
        assert!(parse_trace_line("2020-06-01T10:00:00,95.0,121.4").is_none());
    }

    #[tokio::test]
    async fn replay_wraps_around() {
        let gps = ReplayGps::new(vec![GeoPoint::new(1.0, 1.0), GeoPoint::new(2.0, 2.0)], true);
        assert_eq!(gps.location().await.unwrap().latitude, 1.0);
        assert_eq!(gps.location().await.unwrap().latitude, 2.0);
        assert_eq!(gps.location().await.unwrap().latitude, 1.0);
    }

    #[tokio::test]
    async fn replay_without_loop_runs_dry() {
        let gps = ReplayGps::new(vec![GeoPoint::new(1.0, 1.0)], false);
        assert!(gps.location().await.is_ok());
        assert!(matches!(gps.location().await, Err(PortError::NoData)));
    }

    #[tokio::test]
    async fn loads_trace_from_file() {
        let path = std::env::temp_dir().join(format!("rover_trace_{}.csv", std::process::id()));
        tokio::fs::write(
            &path,
            "2020-06-01T10:00:00,31.2300,121.4700\n\n2020-06-01T10:00:01,31.2301,121.4710\n",
        )
        .await
        .unwrap();
        let gps = ReplayGps::open(&GpsReplayConfig {
            path: path.clone(),
            looping: true,
        })
        .await
        .unwrap();
        assert_eq!(gps.len(), 2);
        tokio::fs::remove_file(path).await.unwrap();
    }
}
