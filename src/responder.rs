//! Slave side of the register protocol.
//!
//! Every write transaction from the master goes through [`Responder::receive`].
//! Register reads leave a framed reply that the next read transaction
//! returns as is. Commands are handed back to the caller, which runs them
//! outside the bus path.

use heapless::Vec;

use crate::error::Error;
use crate::messages::{self, Command, Config, Payload, Register, MAX_FRAME_SIZE};
use crate::node::Node;
use crate::state::{split_channel, temperature_node};

/// Outcome of one received write transaction.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// A command for the control loop, nothing to answer.
    Command(Command),
    /// A reply frame is pending.
    Reply,
    /// Configuration was updated.
    Written,
    /// Malformed transaction, nothing changed.
    Nack,
    /// Unknown opcode.
    Ignored,
}

/// Holds at most one pending reply.
#[derive(Debug, Default)]
pub struct Responder {
    reply: Vec<u8, MAX_FRAME_SIZE>,
    nack: bool,
}

impl Responder {
    pub const fn new() -> Self {
        Self {
            reply: Vec::new(),
            nack: false,
        }
    }

    /// Bytes for the next read transaction; empty when nothing is pending.
    pub fn reply(&self) -> &[u8] {
        &self.reply
    }

    /// Whether the last transaction was refused. Diagnostic only: the slave
    /// peripheral has already acknowledged the bytes by the time the frame is
    /// checked, so the master learns of the refusal from the missing reply.
    pub fn nacked(&self) -> bool {
        self.nack
    }

    pub fn receive(&mut self, rx: &[u8], node: &Node) -> Received {
        self.reply.clear();
        self.nack = false;

        let Some(&opcode) = rx.first() else {
            return Received::Ignored;
        };

        if let Ok(command) = Command::try_from(opcode) {
            return Received::Command(command);
        }

        let Ok(register) = Register::try_from(opcode) else {
            trace!("ignoring opcode {:#x}", opcode);
            return Received::Ignored;
        };

        match self.handle(register, rx, node) {
            Ok(received) => received,
            Err(err) => {
                debug!("nack {:#x} ({} bytes): {}", opcode, rx.len(), err);
                self.reply.clear();
                self.nack = true;
                Received::Nack
            }
        }
    }

    fn handle(&mut self, register: Register, rx: &[u8], node: &Node) -> Result<Received, Error> {
        match register {
            Register::ReadInfo => self.queue(&node.describe()),
            Register::ReadLevel => self.queue(&node.state.level),
            Register::ReadTemperature => self.queue(&node.state.temperature),
            Register::ReadLevelRaw => {
                let (i, j) = level_index(index(rx)?)?;
                self.queue(&node.state.nodes[i].channels[j])
            }
            Register::ReadTemperatureRaw => {
                let i = temperature_node(index(rx)?);
                self.queue(&node.state.nodes[i].temperature)
            }
            Register::ReadConfig => {
                let default_level = node.config.lock(|c| c.borrow().default_level);
                self.queue(&Config { default_level })
            }
            Register::WriteConfig => {
                let value: Config = written(rx, 1)?;
                node.config.lock(|c| c.borrow_mut().default_level = value.default_level);
                Ok(Received::Written)
            }
            Register::ReadLevelConfig => {
                let (i, j) = level_index(index(rx)?)?;
                let config = node.config.lock(|c| c.borrow().nodes[i].channels[j]);
                self.queue(&config)
            }
            Register::WriteLevelConfig => {
                let value = written(rx, 2)?;
                let (i, j) = level_index(rx[1])?;
                node.config.lock(|c| c.borrow_mut().nodes[i].channels[j] = value);
                Ok(Received::Written)
            }
            Register::ReadTemperatureConfig => {
                let i = temperature_node(index(rx)?);
                let config = node.config.lock(|c| c.borrow().nodes[i].temperature);
                self.queue(&config)
            }
            Register::WriteTemperatureConfig => {
                let value = written(rx, 2)?;
                let i = temperature_node(rx[1]);
                node.config.lock(|c| c.borrow_mut().nodes[i].temperature = value);
                Ok(Received::Written)
            }
        }
    }

    fn queue<P: Payload>(&mut self, payload: &P) -> Result<Received, Error> {
        self.reply
            .resize_default(P::SIZE + 1)
            .map_err(|_| Error::SizeMismatch)?;
        messages::encode_frame(payload, &mut self.reply)?;
        Ok(Received::Reply)
    }
}

/// Sub-index of an indexed read, which is exactly two bytes long.
fn index(rx: &[u8]) -> Result<u8, Error> {
    match rx {
        [_, index] => Ok(*index),
        _ => Err(Error::SizeMismatch),
    }
}

fn level_index(index: u8) -> Result<(usize, usize), Error> {
    split_channel(index).ok_or(Error::InvalidIndex)
}

/// Payload of a write whose address takes `header` bytes.
fn written<P: Payload>(rx: &[u8], header: usize) -> Result<P, Error> {
    if rx.len() != header + P::SIZE + 1 {
        return Err(Error::SizeMismatch);
    }
    messages::decode_frame(&rx[header..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{checksum, Info};
    use crate::role::NodeInfo;
    use crate::state::{ChannelConfig, ChannelState, TemperatureConfig};
    use crate::SENSOR_ID;

    fn parent() -> Node {
        Node::new(NodeInfo::parent(2))
    }

    #[test]
    fn commands_are_handed_back() {
        let node = parent();
        let mut responder = Responder::new();
        assert_eq!(responder.receive(&[0x04], &node), Received::Command(Command::Calibrate));
        assert!(responder.reply().is_empty());
        assert_eq!(responder.receive(&[0x00], &node), Received::Command(Command::Reset));
    }

    #[test]
    fn unknown_opcodes_are_ignored() {
        let node = parent();
        let mut responder = Responder::new();
        assert_eq!(responder.receive(&[0x42], &node), Received::Ignored);
        assert_eq!(responder.receive(&[], &node), Received::Ignored);
        assert!(!responder.nacked());
        assert!(responder.reply().is_empty());
    }

    #[test]
    fn read_info_reports_node_counts() {
        let node = parent();
        let mut responder = Responder::new();
        assert_eq!(responder.receive(&[0xA0], &node), Received::Reply);

        let info: Info = messages::decode_frame(responder.reply()).unwrap();
        assert_eq!(info.id, SENSOR_ID);
        assert_eq!(info.level_channels, 12);
        assert_eq!(info.temperature_channels, 3);
        assert!(!info.enabled);
    }

    #[test]
    fn short_write_leaves_default_level() {
        let node = parent();
        node.update_config(|c| c.default_level = 7);
        let mut responder = Responder::new();

        assert_eq!(responder.receive(&[0xA6, 0x00], &node), Received::Nack);
        assert!(responder.nacked());
        assert_eq!(responder.receive(&[0xA6, 0x00, 0x09, 0xff ^ 0x09, 0x00], &node), Received::Nack);
        assert_eq!(node.config().default_level, 7);

        assert_eq!(responder.receive(&[0xA6, 0x00, 0x09, 0xff ^ 0x09], &node), Received::Written);
        assert!(!responder.nacked());
        assert_eq!(node.config().default_level, 9);
    }

    #[test]
    fn config_writes_need_exact_length() {
        let node = parent();
        let before = node.config();
        let mut responder = Responder::new();

        let level = ChannelConfig { enabled: true, samples: 20, alpha: 50, offset: 300, level: -3 };
        let mut rx = [0u8; 12];
        rx[0] = 0xA8;
        rx[1] = 6;
        messages::encode_frame(&level, &mut rx[2..11]).unwrap();
        assert_eq!(responder.receive(&rx[..10], &node), Received::Nack);
        assert_eq!(responder.receive(&rx, &node), Received::Nack);

        let temperature = TemperatureConfig { enabled: false, alpha: 80, reference: 3300 };
        let mut rx = [0u8; 8];
        rx[0] = 0xAA;
        rx[1] = 1;
        messages::encode_frame(&temperature, &mut rx[2..7]).unwrap();
        assert_eq!(responder.receive(&rx[..6], &node), Received::Nack);
        assert_eq!(responder.receive(&rx, &node), Received::Nack);

        assert_eq!(node.config(), before);
        assert_eq!(responder.receive(&rx[..7], &node), Received::Written);
        assert_eq!(node.config().nodes[1].temperature, temperature);
    }

    #[test]
    fn temperature_reads_need_exactly_two_bytes() {
        let node = parent();
        let mut responder = Responder::new();

        for opcode in [0xA4, 0xA9] {
            assert_eq!(responder.receive(&[opcode], &node), Received::Nack);
            assert_eq!(responder.receive(&[opcode, 0, 0], &node), Received::Nack);
            assert_eq!(responder.receive(&[opcode, 0], &node), Received::Reply);
        }
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let node = parent();
        let before = node.config();
        let mut responder = Responder::new();

        let config = TemperatureConfig { enabled: false, alpha: 80, reference: 3300 };
        let mut rx = [0u8; 7];
        rx[0] = 0xAA;
        rx[1] = 9;
        messages::encode_frame(&config, &mut rx[2..]).unwrap();
        rx[6] ^= 0x10;

        assert_eq!(responder.receive(&rx, &node), Received::Nack);
        assert_eq!(node.config(), before);

        rx[6] ^= 0x10;
        assert_eq!(responder.receive(&rx, &node), Received::Written);
        // Index wraps onto the node slots.
        assert_eq!(node.config().nodes[1].temperature, config);
    }

    #[test]
    fn level_config_write_then_read() {
        let node = parent();
        let mut responder = Responder::new();
        let config = ChannelConfig { enabled: true, samples: 20, alpha: 50, offset: 300, level: -3 };

        let mut rx = [0u8; 11];
        rx[0] = 0xA8;
        rx[1] = 6;
        messages::encode_frame(&config, &mut rx[2..]).unwrap();
        assert_eq!(responder.receive(&rx, &node), Received::Written);
        assert_eq!(node.config().nodes[1].channels[2], config);

        assert_eq!(responder.receive(&[0xA7, 6], &node), Received::Reply);
        assert_eq!(messages::decode_frame::<ChannelConfig>(responder.reply()), Ok(config));

        rx[1] = 32;
        rx[10] = checksum(&rx[2..10]);
        assert_eq!(responder.receive(&rx, &node), Received::Nack);
    }

    #[test]
    fn indexed_reads_need_exactly_two_bytes() {
        let mut node = parent();
        node.state.nodes[2].channels[1].update(444);
        let mut responder = Responder::new();

        assert_eq!(responder.receive(&[0xA3], &node), Received::Nack);
        assert_eq!(responder.receive(&[0xA3, 9, 0], &node), Received::Nack);
        assert_eq!(responder.receive(&[0xA3, 40], &node), Received::Nack);

        assert_eq!(responder.receive(&[0xA3, 9], &node), Received::Reply);
        let state: ChannelState = messages::decode_frame(responder.reply()).unwrap();
        assert_eq!(state.value, 444);
    }

    #[test]
    fn new_transaction_overwrites_the_reply() {
        let node = parent();
        let mut responder = Responder::new();

        responder.receive(&[0xA0], &node);
        assert_eq!(responder.reply().len(), 7);

        responder.receive(&[0xA5], &node);
        assert_eq!(responder.reply().len(), 3);

        responder.receive(&[0x05], &node);
        assert!(responder.reply().is_empty());
    }
}
