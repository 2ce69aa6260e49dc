//! Hierarchical water level and temperature sensor network.
//!
//! A parent node polls up to seven children over I2C, fuses their smoothed
//! channel readings into one level and temperature, and answers the same
//! register protocol it speaks to its children.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod bus;
pub mod client;
pub mod error;
pub mod fusion;
pub mod messages;
pub mod node;
pub mod persist;
pub mod responder;
pub mod role;
pub mod sampling;
pub mod state;

pub use error::{BusError, Error};
pub use node::Node;

/// Node slots, parent included.
pub const NUM_NODES: usize = 8;
/// Analog channels per node.
pub const NUM_CHANNELS: usize = 4;
pub const NUM_TOTAL_CHANNELS: usize = NUM_NODES * NUM_CHANNELS;
pub const MAX_CHILDREN: usize = NUM_NODES - 1;

/// Id every node reports in READ_INFO.
pub const SENSOR_ID: u8 = 0xBA;

pub const SAMPLE_PERIOD_MS: u64 = 250;
pub const UPDATE_PERIOD_MS: u64 = 250;
/// Parent waits this long at boot so children are listening before reset.
pub const STARTUP_DELAY_MS: u64 = 250;
pub const BUS_FREQUENCY_HZ: u32 = 100_000;
