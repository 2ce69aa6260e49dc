//! Persistent configuration image.
//!
//! `magic | default_level | 8 x (4 x level config | temperature config)`,
//! big-endian, followed by the XOR checksum of every preceding byte.

use crate::error::Error;
use crate::messages::{checksum, Payload};
use crate::state::{ChannelConfig, ConfigLock, GlobalConfig, TemperatureConfig};
use crate::{NUM_CHANNELS, NUM_NODES};

pub const CONFIG_MAGIC: u32 = 0xbaab_1234;

const NODE_IMAGE_SIZE: usize = NUM_CHANNELS * ChannelConfig::SIZE + TemperatureConfig::SIZE;

// size: 294 bytes
pub const IMAGE_SIZE: usize = 4 + 2 + NUM_NODES * NODE_IMAGE_SIZE;
/// Image plus trailing checksum.
pub const STORAGE_SIZE: usize = IMAGE_SIZE + 1;

/// Byte addressed non-volatile memory.
pub trait Storage {
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), Error>;
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), Error> {
        (**self).read(offset, buffer)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        (**self).write(offset, bytes)
    }
}

pub fn encode_image(config: &GlobalConfig, buffer: &mut [u8; STORAGE_SIZE]) {
    buffer[0..4].copy_from_slice(&CONFIG_MAGIC.to_be_bytes());
    buffer[4..6].copy_from_slice(&config.default_level.to_be_bytes());

    let mut offset = 6;
    for node in config.nodes.iter() {
        for channel in node.channels.iter() {
            channel.encode(&mut buffer[offset..offset + ChannelConfig::SIZE]);
            offset += ChannelConfig::SIZE;
        }
        node.temperature.encode(&mut buffer[offset..offset + TemperatureConfig::SIZE]);
        offset += TemperatureConfig::SIZE;
    }

    buffer[IMAGE_SIZE] = checksum(&buffer[..IMAGE_SIZE]);
}

/// Verifies magic and checksum before decoding anything.
pub fn decode_image(buffer: &[u8; STORAGE_SIZE]) -> Result<GlobalConfig, Error> {
    if buffer[0..4] != CONFIG_MAGIC.to_be_bytes() {
        return Err(Error::BadMagic);
    }
    if checksum(&buffer[..IMAGE_SIZE]) != buffer[IMAGE_SIZE] {
        return Err(Error::ChecksumMismatch);
    }

    let mut config = GlobalConfig::zeroed();
    config.default_level = i16::from_be_bytes([buffer[4], buffer[5]]);

    let mut offset = 6;
    for node in config.nodes.iter_mut() {
        for channel in node.channels.iter_mut() {
            *channel = ChannelConfig::decode(&buffer[offset..offset + ChannelConfig::SIZE]);
            offset += ChannelConfig::SIZE;
        }
        node.temperature = TemperatureConfig::decode(&buffer[offset..offset + TemperatureConfig::SIZE]);
        offset += TemperatureConfig::SIZE;
    }

    Ok(config)
}

/// Writes the configuration. No responder write can land while this runs.
pub fn store<S: Storage>(config: &ConfigLock, storage: &mut S) -> Result<(), Error> {
    let mut buffer = [0u8; STORAGE_SIZE];
    config.lock(|config| {
        encode_image(&config.borrow(), &mut buffer);
        storage.write(0, &buffer)
    })
}

/// Replaces the configuration with the stored one, or leaves it untouched.
pub fn load<S: Storage>(config: &ConfigLock, storage: &mut S) -> Result<(), Error> {
    let mut buffer = [0u8; STORAGE_SIZE];
    config.lock(|config| {
        storage.read(0, &mut buffer)?;
        *config.borrow_mut() = decode_image(&buffer)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::config_lock;

    struct Memory(std::vec::Vec<u8>);

    impl Storage for Memory {
        fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), Error> {
            let offset = offset as usize;
            let bytes = self.0.get(offset..offset + buffer.len()).ok_or(Error::Storage)?;
            buffer.copy_from_slice(bytes);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
            let offset = offset as usize;
            self.0[offset..offset + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    fn customized() -> GlobalConfig {
        let mut config = GlobalConfig::factory();
        config.default_level = -12;
        config.nodes[3].channels[1].offset = 777;
        config.nodes[7].channels[3].enabled = false;
        config.nodes[5].temperature.reference = 3300;
        config
    }

    #[test]
    fn image_size_is_fixed() {
        assert_eq!(IMAGE_SIZE, 294);
    }

    #[test]
    fn store_then_load_into_zeroed_config() {
        let mut memory = Memory(std::vec![0xff; STORAGE_SIZE]);
        store(&config_lock(customized()), &mut memory).unwrap();

        let restored = config_lock(GlobalConfig::zeroed());
        load(&restored, &mut memory).unwrap();
        assert_eq!(restored.lock(|c| *c.borrow()), customized());
    }

    #[test]
    fn corrupt_image_leaves_config_untouched() {
        let mut memory = Memory(std::vec![0xff; STORAGE_SIZE]);
        store(&config_lock(customized()), &mut memory).unwrap();

        let prior = GlobalConfig::factory();
        let config = config_lock(prior);

        memory.0[100] ^= 0x01;
        assert_eq!(load(&config, &mut memory), Err(Error::ChecksumMismatch));
        assert_eq!(config.lock(|c| *c.borrow()), prior);

        memory.0[100] ^= 0x01;
        memory.0[0] = 0x00;
        assert_eq!(load(&config, &mut memory), Err(Error::BadMagic));
        assert_eq!(config.lock(|c| *c.borrow()), prior);
    }

    #[test]
    fn blank_storage_is_rejected() {
        let mut memory = Memory(std::vec![0xff; STORAGE_SIZE]);
        let config = config_lock(GlobalConfig::factory());
        assert_eq!(load(&config, &mut memory), Err(Error::BadMagic));
    }
}
