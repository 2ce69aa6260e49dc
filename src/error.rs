use core::fmt;

/// Transport level failure reported by a [`Bus`](crate::bus::Bus).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusError {
    /// Nobody acknowledged the address.
    NoDevice,
    /// The device refused a data byte.
    Nack,
    Timeout,
    Other,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    Bus(BusError),
    /// Trailing XOR byte of a frame did not match its payload.
    ChecksumMismatch,
    /// A frame or write payload had the wrong length for its register.
    SizeMismatch,
    /// A device answered READ_INFO with an unexpected id.
    DeviceIdentityMismatch { id: u8 },
    /// A device reported a non-zero error mask during discovery.
    DeviceReportedError { errors: u8, context: u8 },
    /// Channel or node index outside the register map.
    InvalidIndex,
    /// Persistent image does not start with the configuration magic.
    BadMagic,
    /// Non-volatile storage read or write failed.
    Storage,
    /// Analog front end failed a conversion.
    Sensor,
}

impl From<BusError> for Error {
    fn from(err: BusError) -> Self {
        Error::Bus(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bus(err) => write!(f, "bus error: {:?}", err),
            Error::ChecksumMismatch => f.write_str("checksum mismatch"),
            Error::SizeMismatch => f.write_str("size mismatch"),
            Error::DeviceIdentityMismatch { id } => {
                write!(f, "unexpected device id {:#04x}", id)
            }
            Error::DeviceReportedError { errors, context } => {
                write!(f, "device reported errors {:#04x} (context {})", errors, context)
            }
            Error::InvalidIndex => f.write_str("index out of range"),
            Error::BadMagic => f.write_str("bad configuration magic"),
            Error::Storage => f.write_str("storage failure"),
            Error::Sensor => f.write_str("sensor conversion failed"),
        }
    }
}
