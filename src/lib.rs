#![doc = include_str!("../README.md")]
pub mod arbiter;
pub mod autonomy;
pub mod configuration;
pub mod dispatcher;
pub mod drive;
pub mod error;
pub mod executor;
pub mod geo;
pub mod guard;
pub mod logging;
pub mod navigator;
pub mod pose;
pub mod ports;
pub mod state;
pub mod vehicle;
