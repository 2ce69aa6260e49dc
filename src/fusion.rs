//! Turns per-channel state into the one level and temperature a node reports.
//!
//! `nodes` always covers the aggregating node and its children, in slot
//! order, so global channel `i * 4 + j` is `nodes[i].channels[j]`.

use crate::state::{GlobalConfig, Measurement, NodeState};
use crate::NUM_CHANNELS;

/// Level of the shallowest submerged channel.
///
/// Channels are scanned in ascending order and the first enabled one whose
/// smoothed value exceeds its offset wins; deeper channels are not checked
/// against their own offsets.
pub fn fuse_level(config: &GlobalConfig, nodes: &[NodeState]) -> Measurement {
    let mut level = Measurement {
        value: config.default_level,
        channel: -1,
        valid: false,
    };
    let mut found = false;

    for (i, node) in nodes.iter().enumerate() {
        for (j, state) in node.channels.iter().enumerate() {
            let cfg = &config.nodes[i].channels[j];
            if !cfg.enabled {
                continue;
            }

            if !found && state.value > cfg.offset {
                level.value = cfg.level;
                level.channel = (i * NUM_CHANNELS + j) as i8;
                found = true;
            }

            level.valid |= state.valid;
        }
    }

    level
}

/// Temperature at and below the water line.
///
/// Every channel at or past `level.channel` contributes its node's
/// temperature once, so nodes with more submerged channels weigh more. With
/// nothing submerged the last enabled temperature input is reported as is.
pub fn fuse_temperature(config: &GlobalConfig, nodes: &[NodeState], level: &Measurement) -> Measurement {
    let mut lowest = 0;
    let mut valid = false;

    for (i, node) in nodes.iter().enumerate() {
        if !config.nodes[i].temperature.enabled {
            continue;
        }
        lowest = node.temperature.value;
        valid |= node.temperature.valid;
    }

    if level.channel < 0 {
        return Measurement {
            value: lowest,
            channel: -1,
            valid,
        };
    }

    let first = level.channel as usize;
    let mut sum: i32 = 0;
    let mut count: i32 = 0;

    for (i, node) in nodes.iter().enumerate() {
        for j in 0..NUM_CHANNELS {
            if i * NUM_CHANNELS + j >= first {
                sum += node.temperature.value as i32;
                count += 1;
            }
        }
    }

    let total = (nodes.len() * NUM_CHANNELS) as i32;
    Measurement {
        value: if count > 0 { (sum / count) as i16 } else { lowest },
        channel: ((total - level.channel as i32) / NUM_CHANNELS as i32) as i8,
        valid,
    }
}

/// Offset a calibration would apply, taken from the last enabled channel.
///
/// `None` while that channel has not seen a sample since the last zero.
pub fn calibration_offset(config: &GlobalConfig, nodes: &[NodeState]) -> Option<u16> {
    let mut min = 0u16;
    let mut max = 0u16;

    for (i, node) in nodes.iter().enumerate() {
        for (j, state) in node.channels.iter().enumerate() {
            if config.nodes[i].channels[j].enabled {
                min = state.min;
                max = state.max;
            }
        }
    }

    if min > max {
        return None;
    }

    Some(min + (max - min) / 3)
}
