//! Master side of the register protocol.

use crate::bus::Bus;
use crate::error::Error;
use crate::messages::{self, Address, Command, Config, Info, Payload, Register, MAX_FRAME_SIZE};
use crate::role::child_address;
use crate::state::{ChannelConfig, ChannelState, Measurement, TemperatureConfig, TemperatureState};
use crate::SENSOR_ID;

/// Handle to one remote sensor node. Holds no bus, every call borrows one.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaterSensor {
    address: u8,
}

impl WaterSensor {
    pub const fn new(address: u8) -> Self {
        Self { address }
    }

    /// Child node in slot `index` (1..=7).
    pub const fn child(index: u8) -> Self {
        Self::new(child_address(index))
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Resets the node and checks it identifies as a healthy water sensor.
    ///
    /// A node runs RESET from its own control task after acknowledging it,
    /// so the info read here can still carry error bits from before the
    /// reset. Callers that see `DeviceReportedError` right after power-up may
    /// want to `identify` again once the node has had a tick to settle.
    pub fn init<B: Bus>(&self, bus: &mut B) -> Result<Info, Error> {
        self.reset(bus)?;
        let info = self.identify(bus)?;

        if info.errors != 0 {
            return Err(Error::DeviceReportedError {
                errors: info.errors,
                context: info.context,
            });
        }

        Ok(info)
    }

    /// Reads the info register and checks the device id.
    pub fn identify<B: Bus>(&self, bus: &mut B) -> Result<Info, Error> {
        let info = self.read_info(bus)?;
        if info.id != SENSOR_ID {
            return Err(Error::DeviceIdentityMismatch { id: info.id });
        }
        Ok(info)
    }

    pub fn reset<B: Bus>(&self, bus: &mut B) -> Result<(), Error> {
        self.command(bus, Command::Reset)
    }

    pub fn enable<B: Bus>(&self, bus: &mut B) -> Result<(), Error> {
        self.command(bus, Command::Enable)
    }

    pub fn load<B: Bus>(&self, bus: &mut B) -> Result<(), Error> {
        self.command(bus, Command::Load)
    }

    pub fn store<B: Bus>(&self, bus: &mut B) -> Result<(), Error> {
        self.command(bus, Command::Store)
    }

    pub fn calibrate<B: Bus>(&self, bus: &mut B) -> Result<(), Error> {
        self.command(bus, Command::Calibrate)
    }

    pub fn zero<B: Bus>(&self, bus: &mut B) -> Result<(), Error> {
        self.command(bus, Command::Zero)
    }

    pub fn read_info<B: Bus>(&self, bus: &mut B) -> Result<Info, Error> {
        self.read(bus, Address::register(Register::ReadInfo))
    }

    pub fn read_level<B: Bus>(&self, bus: &mut B) -> Result<Measurement, Error> {
        self.read(bus, Address::register(Register::ReadLevel))
    }

    pub fn read_temperature<B: Bus>(&self, bus: &mut B) -> Result<Measurement, Error> {
        self.read(bus, Address::register(Register::ReadTemperature))
    }

    pub fn read_level_raw<B: Bus>(&self, bus: &mut B, channel: u8) -> Result<ChannelState, Error> {
        self.read(bus, Address::indexed(Register::ReadLevelRaw, channel))
    }

    pub fn read_temperature_raw<B: Bus>(&self, bus: &mut B, index: u8) -> Result<TemperatureState, Error> {
        self.read(bus, Address::indexed(Register::ReadTemperatureRaw, index))
    }

    pub fn read_config<B: Bus>(&self, bus: &mut B) -> Result<Config, Error> {
        self.read(bus, Address::register(Register::ReadConfig))
    }

    pub fn write_config<B: Bus>(&self, bus: &mut B, config: &Config) -> Result<(), Error> {
        self.write(bus, Address::register(Register::WriteConfig), config)
    }

    pub fn read_level_config<B: Bus>(&self, bus: &mut B, channel: u8) -> Result<ChannelConfig, Error> {
        self.read(bus, Address::indexed(Register::ReadLevelConfig, channel))
    }

    pub fn write_level_config<B: Bus>(&self, bus: &mut B, channel: u8, config: &ChannelConfig) -> Result<(), Error> {
        self.write(bus, Address::indexed(Register::WriteLevelConfig, channel), config)
    }

    pub fn read_temperature_config<B: Bus>(&self, bus: &mut B, index: u8) -> Result<TemperatureConfig, Error> {
        self.read(bus, Address::indexed(Register::ReadTemperatureConfig, index))
    }

    pub fn write_temperature_config<B: Bus>(
        &self,
        bus: &mut B,
        index: u8,
        config: &TemperatureConfig,
    ) -> Result<(), Error> {
        self.write(bus, Address::indexed(Register::WriteTemperatureConfig, index), config)
    }

    fn command<B: Bus>(&self, bus: &mut B, command: Command) -> Result<(), Error> {
        bus.write(self.address, &[command as u8])?;
        Ok(())
    }

    fn read<B: Bus, P: Payload>(&self, bus: &mut B, address: Address) -> Result<P, Error> {
        let mut request = [0u8; 2];
        let length = address.encode(&mut request);
        bus.write(self.address, &request[..length])?;

        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let frame = &mut buffer[..P::SIZE + 1];
        bus.read(self.address, frame)?;

        messages::decode_frame(frame)
    }

    fn write<B: Bus, P: Payload>(&self, bus: &mut B, address: Address, payload: &P) -> Result<(), Error> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let header = address.encode(&mut buffer);
        let length = messages::encode_frame(payload, &mut buffer[header..])?;

        bus.write(self.address, &buffer[..header + length])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use std::vec::Vec;

    /// Records writes and answers reads with a canned frame.
    struct Canned {
        written: Vec<Vec<u8>>,
        reply: Vec<u8>,
        fail: Option<BusError>,
    }

    impl Canned {
        fn replying(reply: &[u8]) -> Self {
            Self { written: Vec::new(), reply: reply.to_vec(), fail: None }
        }
    }

    impl Bus for Canned {
        fn write(&mut self, _address: u8, bytes: &[u8]) -> Result<(), BusError> {
            if let Some(err) = self.fail {
                return Err(err);
            }
            self.written.push(bytes.to_vec());
            Ok(())
        }

        fn read(&mut self, _address: u8, buffer: &mut [u8]) -> Result<(), BusError> {
            if buffer.len() != self.reply.len() {
                return Err(BusError::Other);
            }
            buffer.copy_from_slice(&self.reply);
            Ok(())
        }
    }

    fn frame<P: Payload>(payload: &P) -> Vec<u8> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let length = messages::encode_frame(payload, &mut buffer).unwrap();
        buffer[..length].to_vec()
    }

    #[test]
    fn indexed_read_sends_two_byte_register() {
        let state = ChannelState { value: 700, min: 100, max: 900, valid: true };
        let mut bus = Canned::replying(&frame(&state));

        let sensor = WaterSensor::child(2);
        assert_eq!(sensor.address(), 0x48);
        assert_eq!(sensor.read_level_raw(&mut bus, 3).unwrap(), state);
        assert_eq!(bus.written, [[0xA3, 0x03]]);
    }

    #[test]
    fn write_appends_checksum() {
        let mut bus = Canned::replying(&[]);
        WaterSensor::new(0x70).write_config(&mut bus, &Config { default_level: -2 }).unwrap();
        assert_eq!(bus.written, [[0xA6, 0xff, 0xfe, 0xff ^ 0xff ^ 0xfe]]);
    }

    #[test]
    fn corrupt_reply_is_a_checksum_error() {
        let mut reply = frame(&Measurement { value: 12, channel: 1, valid: true });
        reply[1] ^= 0x80;
        let mut bus = Canned::replying(&reply);
        assert_eq!(WaterSensor::new(0x70).read_level(&mut bus), Err(Error::ChecksumMismatch));
    }

    #[test]
    fn bus_failure_is_reported() {
        let mut bus = Canned::replying(&[]);
        bus.fail = Some(BusError::NoDevice);
        assert_eq!(WaterSensor::new(0x70).zero(&mut bus), Err(Error::Bus(BusError::NoDevice)));
    }

    #[test]
    fn init_checks_identity_and_errors() {
        let healthy = Info { id: SENSOR_ID, level_channels: 4, temperature_channels: 1, enabled: false, errors: 0, context: 0 };
        let mut bus = Canned::replying(&frame(&healthy));
        assert_eq!(WaterSensor::new(0x70).init(&mut bus), Ok(healthy));
        assert_eq!(bus.written, [[0x00], [0xA0]]);

        let stranger = Info { id: 0x42, ..healthy };
        let mut bus = Canned::replying(&frame(&stranger));
        assert_eq!(WaterSensor::new(0x70).init(&mut bus), Err(Error::DeviceIdentityMismatch { id: 0x42 }));

        let failing = Info { errors: 0x08, context: 2, ..healthy };
        let mut bus = Canned::replying(&frame(&failing));
        assert_eq!(
            WaterSensor::new(0x70).init(&mut bus),
            Err(Error::DeviceReportedError { errors: 0x08, context: 2 })
        );
    }
}
