//! Master side transport.
//!
//! A transaction is `begin(address) -> write/read -> end`; a [`Bus`] exposes
//! it as one call per direction so the client never sees a concrete bus type.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};

use crate::error::BusError;

pub trait Bus {
    /// One write transaction to `address`.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError>;

    /// One read transaction from `address`, filling `buffer` completely.
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), BusError>;
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        (**self).write(address, bytes)
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        (**self).read(address, buffer)
    }
}

/// [`Bus`] over any embedded-hal I2C master.
pub struct I2cBus<I> {
    i2c: I,
}

impl<I: I2c> I2cBus<I> {
    pub const fn new(i2c: I) -> Self {
        Self { i2c }
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I: I2c> Bus for I2cBus<I> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        self.i2c.write(address, bytes).map_err(|e| classify(e.kind()))
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        self.i2c.read(address, buffer).map_err(|e| classify(e.kind()))
    }
}

fn classify(kind: ErrorKind) -> BusError {
    match kind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => BusError::NoDevice,
        ErrorKind::NoAcknowledge(_) => BusError::Nack,
        _ => BusError::Other,
    }
}
