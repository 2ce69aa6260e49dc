//! Register map and frame codec.
//!
//! Every payload travels as `[payload..][checksum]`, the checksum being the
//! XOR of all payload bytes folded onto `0xff`. Integers are big-endian.

use crate::error::Error;
use crate::state::{ChannelConfig, ChannelState, Measurement, TemperatureConfig, TemperatureState};

pub const INFO_SIZE: usize = 6;
pub const LEVEL_SIZE: usize = 4;
pub const TEMPERATURE_SIZE: usize = 4;
pub const LEVEL_RAW_SIZE: usize = 7;
pub const TEMPERATURE_RAW_SIZE: usize = 7;
pub const CONFIG_SIZE: usize = 2;
pub const LEVEL_CONFIG_SIZE: usize = 8;
pub const TEMPERATURE_CONFIG_SIZE: usize = 4;

/// Largest frame either side ever buffers.
pub const MAX_FRAME_SIZE: usize = 32;

/// Single byte commands, no payload either way.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Reset = 0x00,
    Enable = 0x01,
    Load = 0x02,
    Store = 0x03,
    Calibrate = 0x04,
    Zero = 0x05,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Command::Reset,
            0x01 => Command::Enable,
            0x02 => Command::Load,
            0x03 => Command::Store,
            0x04 => Command::Calibrate,
            0x05 => Command::Zero,
            other => return Err(other),
        })
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    ReadInfo = 0xA0,
    ReadLevel = 0xA1,
    ReadTemperature = 0xA2,
    ReadLevelRaw = 0xA3,
    ReadTemperatureRaw = 0xA4,
    ReadConfig = 0xA5,
    WriteConfig = 0xA6,
    ReadLevelConfig = 0xA7,
    WriteLevelConfig = 0xA8,
    ReadTemperatureConfig = 0xA9,
    WriteTemperatureConfig = 0xAA,
}

impl Register {
    /// Whether the register takes a sub-index byte (16-bit addressing).
    pub const fn is_indexed(self) -> bool {
        matches!(
            self,
            Register::ReadLevelRaw
                | Register::ReadTemperatureRaw
                | Register::ReadLevelConfig
                | Register::WriteLevelConfig
                | Register::ReadTemperatureConfig
                | Register::WriteTemperatureConfig
        )
    }
}

impl TryFrom<u8> for Register {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0xA0 => Register::ReadInfo,
            0xA1 => Register::ReadLevel,
            0xA2 => Register::ReadTemperature,
            0xA3 => Register::ReadLevelRaw,
            0xA4 => Register::ReadTemperatureRaw,
            0xA5 => Register::ReadConfig,
            0xA6 => Register::WriteConfig,
            0xA7 => Register::ReadLevelConfig,
            0xA8 => Register::WriteLevelConfig,
            0xA9 => Register::ReadTemperatureConfig,
            0xAA => Register::WriteTemperatureConfig,
            other => return Err(other),
        })
    }
}

/// Register address as it goes on the bus.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Address {
    Reg8(u8),
    /// `(register << 8) | index`
    Reg16(u16),
}

impl Address {
    pub const fn register(register: Register) -> Self {
        Address::Reg8(register as u8)
    }

    pub const fn indexed(register: Register, index: u8) -> Self {
        Address::Reg16(((register as u16) << 8) | index as u16)
    }

    /// Writes the address bytes and returns how many were written.
    pub fn encode(&self, buffer: &mut [u8]) -> usize {
        match *self {
            Address::Reg8(reg) => {
                buffer[0] = reg;
                1
            }
            Address::Reg16(reg) => {
                buffer[0..2].copy_from_slice(&reg.to_be_bytes());
                2
            }
        }
    }
}

/// Fixed-layout register payload.
pub trait Payload: Sized {
    const SIZE: usize;

    /// `buffer` is exactly `SIZE` bytes long.
    fn encode(&self, buffer: &mut [u8]);

    /// `buffer` is exactly `SIZE` bytes long.
    fn decode(buffer: &[u8]) -> Self;
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0xff, |checksum, byte| checksum ^ byte)
}

/// Encodes `payload` followed by its checksum, returns the frame length.
pub fn encode_frame<P: Payload>(payload: &P, buffer: &mut [u8]) -> Result<usize, Error> {
    let length = P::SIZE + 1;
    if buffer.len() < length {
        return Err(Error::SizeMismatch);
    }

    payload.encode(&mut buffer[..P::SIZE]);
    buffer[P::SIZE] = checksum(&buffer[..P::SIZE]);

    Ok(length)
}

/// Decodes a frame that must be exactly `P::SIZE + 1` bytes.
pub fn decode_frame<P: Payload>(frame: &[u8]) -> Result<P, Error> {
    if frame.len() != P::SIZE + 1 {
        return Err(Error::SizeMismatch);
    }

    let (payload, end) = frame.split_at(P::SIZE);
    if checksum(payload) != end[0] {
        return Err(Error::ChecksumMismatch);
    }

    Ok(P::decode(payload))
}

// size: 6 bytes
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Info {
    pub id: u8,
    pub level_channels: u8,
    pub temperature_channels: u8,
    pub enabled: bool,
    pub errors: u8,
    pub context: u8,
}

impl Payload for Info {
    const SIZE: usize = INFO_SIZE;

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0] = self.id;
        buffer[1] = self.level_channels;
        buffer[2] = self.temperature_channels;
        buffer[3] = self.enabled as u8;
        buffer[4] = self.errors;
        buffer[5] = self.context;
    }

    fn decode(buffer: &[u8]) -> Self {
        Info {
            id: buffer[0],
            level_channels: buffer[1],
            temperature_channels: buffer[2],
            enabled: buffer[3] != 0,
            errors: buffer[4],
            context: buffer[5],
        }
    }
}

// size: 4 bytes, shared by level and temperature
impl Payload for Measurement {
    const SIZE: usize = LEVEL_SIZE;

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0..2].copy_from_slice(&self.value.to_be_bytes());
        buffer[2] = self.channel as u8;
        buffer[3] = self.valid as u8;
    }

    fn decode(buffer: &[u8]) -> Self {
        Measurement {
            value: i16::from_be_bytes([buffer[0], buffer[1]]),
            channel: buffer[2] as i8,
            valid: buffer[3] != 0,
        }
    }
}

// size: 7 bytes
impl Payload for ChannelState {
    const SIZE: usize = LEVEL_RAW_SIZE;

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0..2].copy_from_slice(&self.value.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.min.to_be_bytes());
        buffer[4..6].copy_from_slice(&self.max.to_be_bytes());
        buffer[6] = self.valid as u8;
    }

    fn decode(buffer: &[u8]) -> Self {
        ChannelState {
            value: u16::from_be_bytes([buffer[0], buffer[1]]),
            min: u16::from_be_bytes([buffer[2], buffer[3]]),
            max: u16::from_be_bytes([buffer[4], buffer[5]]),
            valid: buffer[6] != 0,
        }
    }
}

// size: 7 bytes
impl Payload for TemperatureState {
    const SIZE: usize = TEMPERATURE_RAW_SIZE;

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0..2].copy_from_slice(&self.value.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.min.to_be_bytes());
        buffer[4..6].copy_from_slice(&self.max.to_be_bytes());
        buffer[6] = self.valid as u8;
    }

    fn decode(buffer: &[u8]) -> Self {
        TemperatureState {
            value: i16::from_be_bytes([buffer[0], buffer[1]]),
            min: i16::from_be_bytes([buffer[2], buffer[3]]),
            max: i16::from_be_bytes([buffer[4], buffer[5]]),
            valid: buffer[6] != 0,
        }
    }
}

/// Node-wide configuration register.
// size: 2 bytes
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub default_level: i16,
}

impl Payload for Config {
    const SIZE: usize = CONFIG_SIZE;

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0..2].copy_from_slice(&self.default_level.to_be_bytes());
    }

    fn decode(buffer: &[u8]) -> Self {
        Config {
            default_level: i16::from_be_bytes([buffer[0], buffer[1]]),
        }
    }
}

// size: 8 bytes
impl Payload for ChannelConfig {
    const SIZE: usize = LEVEL_CONFIG_SIZE;

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0] = self.enabled as u8;
        buffer[1..3].copy_from_slice(&self.samples.to_be_bytes());
        buffer[3] = self.alpha;
        buffer[4..6].copy_from_slice(&self.offset.to_be_bytes());
        buffer[6..8].copy_from_slice(&self.level.to_be_bytes());
    }

    fn decode(buffer: &[u8]) -> Self {
        ChannelConfig {
            enabled: buffer[0] != 0,
            samples: u16::from_be_bytes([buffer[1], buffer[2]]),
            alpha: buffer[3],
            offset: u16::from_be_bytes([buffer[4], buffer[5]]),
            level: i16::from_be_bytes([buffer[6], buffer[7]]),
        }
    }
}

// size: 4 bytes
impl Payload for TemperatureConfig {
    const SIZE: usize = TEMPERATURE_CONFIG_SIZE;

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0] = self.enabled as u8;
        buffer[1] = self.alpha;
        buffer[2..4].copy_from_slice(&self.reference.to_be_bytes());
    }

    fn decode(buffer: &[u8]) -> Self {
        TemperatureConfig {
            enabled: buffer[0] != 0,
            alpha: buffer[1],
            reference: u16::from_be_bytes([buffer[2], buffer[3]]),
        }
    }
}
