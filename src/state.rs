use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::{NUM_CHANNELS, NUM_NODES, NUM_TOTAL_CHANNELS};

/// Configuration block shared between the responder and the control loop.
///
/// Locking it enters a critical section, which is what keeps a responder
/// write from interleaving with a store or load.
pub type ConfigLock = Mutex<CriticalSectionRawMutex, RefCell<GlobalConfig>>;

pub fn config_lock(config: GlobalConfig) -> ConfigLock {
    Mutex::new(RefCell::new(config))
}

// size: 8 bytes on the wire
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub samples: u16,
    /// EMA weight of a new sample in percent.
    pub alpha: u8,
    /// Smoothed values above this count as submerged.
    pub offset: u16,
    /// Level reported when this is the first submerged channel.
    pub level: i16,
}

impl ChannelConfig {
    pub const ZERO: Self = Self {
        enabled: false,
        samples: 0,
        alpha: 0,
        offset: 0,
        level: 0,
    };

    pub const fn factory(node: usize, channel: usize) -> Self {
        Self {
            enabled: true,
            samples: 60,
            alpha: 25,
            offset: 512,
            level: (NUM_NODES * NUM_CHANNELS) as i16 - (node * NUM_NODES) as i16 - channel as i16,
        }
    }
}

// size: 4 bytes on the wire
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemperatureConfig {
    pub enabled: bool,
    pub alpha: u8,
    /// ADC scale in microvolts per count.
    pub reference: u16,
}

impl TemperatureConfig {
    pub const ZERO: Self = Self {
        enabled: false,
        alpha: 0,
        reference: 0,
    };

    pub const FACTORY: Self = Self {
        enabled: true,
        alpha: 25,
        reference: 5000,
    };
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    pub channels: [ChannelConfig; NUM_CHANNELS],
    pub temperature: TemperatureConfig,
}

impl NodeConfig {
    pub const ZERO: Self = Self {
        channels: [ChannelConfig::ZERO; NUM_CHANNELS],
        temperature: TemperatureConfig::ZERO,
    };

    pub const fn factory(node: usize) -> Self {
        Self {
            channels: [
                ChannelConfig::factory(node, 0),
                ChannelConfig::factory(node, 1),
                ChannelConfig::factory(node, 2),
                ChannelConfig::factory(node, 3),
            ],
            temperature: TemperatureConfig::FACTORY,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Level reported while no channel is submerged.
    pub default_level: i16,
    pub nodes: [NodeConfig; NUM_NODES],
}

impl GlobalConfig {
    pub const fn zeroed() -> Self {
        Self {
            default_level: 0,
            nodes: [NodeConfig::ZERO; NUM_NODES],
        }
    }

    pub fn factory() -> Self {
        let mut config = Self::zeroed();
        config.restore_factory();
        config
    }

    /// Restores per-node defaults. `default_level` is kept.
    pub fn restore_factory(&mut self) {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            *node = NodeConfig::factory(i);
        }
    }

    pub fn channel(&self, index: u8) -> Option<&ChannelConfig> {
        let (node, channel) = split_channel(index)?;
        Some(&self.nodes[node].channels[channel])
    }

    pub fn channel_mut(&mut self, index: u8) -> Option<&mut ChannelConfig> {
        let (node, channel) = split_channel(index)?;
        Some(&mut self.nodes[node].channels[channel])
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::factory()
    }
}

/// Splits a global channel index into `(node, channel)`.
pub fn split_channel(index: u8) -> Option<(usize, usize)> {
    let index = index as usize;
    if index >= NUM_TOTAL_CHANNELS {
        return None;
    }
    Some((index / NUM_CHANNELS, index % NUM_CHANNELS))
}

/// Maps a temperature index onto a node slot; indices wrap.
pub fn temperature_node(index: u8) -> usize {
    index as usize % NUM_NODES
}

// size: 7 bytes on the wire
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelState {
    pub value: u16,
    pub min: u16,
    pub max: u16,
    pub valid: bool,
}

impl ChannelState {
    pub const RESET: Self = Self {
        value: 0,
        min: u16::MAX,
        max: 0,
        valid: false,
    };

    pub fn zero(&mut self) {
        self.min = u16::MAX;
        self.max = 0;
        self.valid = false;
    }

    pub fn update(&mut self, value: u16) {
        self.value = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.valid = true;
    }
}

// size: 7 bytes on the wire
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemperatureState {
    /// Centi-degrees Celsius.
    pub value: i16,
    pub min: i16,
    pub max: i16,
    pub valid: bool,
}

impl TemperatureState {
    pub const RESET: Self = Self {
        value: 0,
        min: i16::MAX,
        max: i16::MIN,
        valid: false,
    };

    pub fn zero(&mut self) {
        self.min = i16::MAX;
        self.max = i16::MIN;
    }

    pub fn update(&mut self, value: i16) {
        self.value = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.valid = true;
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeState {
    pub channels: [ChannelState; NUM_CHANNELS],
    pub temperature: TemperatureState,
}

impl NodeState {
    pub const RESET: Self = Self {
        channels: [ChannelState::RESET; NUM_CHANNELS],
        temperature: TemperatureState::RESET,
    };

    pub fn zero(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.zero();
        }
        self.temperature.zero();
    }
}

/// Fused level or temperature. `channel == -1` means nothing was submerged.
// size: 4 bytes on the wire
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Measurement {
    pub value: i16,
    pub channel: i8,
    pub valid: bool,
}

impl Measurement {
    pub const NONE: Self = Self {
        value: 0,
        channel: -1,
        valid: false,
    };
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorFlag {
    Init = 0,
    Reset = 1,
    Enable = 2,
    Read = 3,
    Zero = 4,
}

impl ErrorFlag {
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregateState {
    pub enabled: bool,
    pub errors: u8,
    /// 1-based index of the child that caused the last error.
    pub context: u8,
    pub level: Measurement,
    pub temperature: Measurement,
    pub nodes: [NodeState; NUM_NODES],
}

impl AggregateState {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            errors: 0,
            context: 0,
            level: Measurement::NONE,
            temperature: Measurement::NONE,
            nodes: [NodeState::RESET; NUM_NODES],
        }
    }

    pub fn raise(&mut self, flag: ErrorFlag, context: u8) {
        self.errors |= flag.bit();
        self.context = context;
    }

    pub fn has(&self, flag: ErrorFlag) -> bool {
        self.errors & flag.bit() != 0
    }

    pub fn channel(&self, index: u8) -> Option<&ChannelState> {
        let (node, channel) = split_channel(index)?;
        Some(&self.nodes[node].channels[channel])
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::new()
    }
}
