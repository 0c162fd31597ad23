use core::convert::Infallible;
use core::fmt::{self, Debug};

use embedded_hal::{i2c, spi};

/// Errors from a device transaction.
///
/// `E` is the bus error and `P` the chip-select pin error. I2C devices have
/// no pin and leave `P` as [`Infallible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E, P = Infallible> {
    /// The underlying bus reported a fault. Passed through unchanged.
    Bus(E),
    /// Driving the chip-select line failed.
    ChipSelect(P),
    /// No peer acknowledged this address during the construction probe.
    PeerNotFound(u8),
    /// The address does not fit in 7 bits.
    InvalidAddress(u8),
    /// The bus lock could not be acquired before the timeout.
    LockTimeout,
    /// The requested range lies outside the buffer.
    OutOfRange,
}

impl<E: Debug, P: Debug> fmt::Display for Error<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bus(err) => write!(f, "bus error: {:?}", err),
            Error::ChipSelect(err) => write!(f, "chip-select error: {:?}", err),
            Error::PeerNotFound(address) => {
                write!(f, "no I2C device at address {:#04x}", address)
            }
            Error::InvalidAddress(address) => {
                write!(f, "invalid 7-bit I2C address {:#04x}", address)
            }
            Error::LockTimeout => write!(f, "bus lock timed out"),
            Error::OutOfRange => write!(f, "range outside buffer"),
        }
    }
}

impl<E: i2c::Error, P: Debug> i2c::Error for Error<E, P> {
    fn kind(&self) -> i2c::ErrorKind {
        match self {
            Error::Bus(err) => err.kind(),
            Error::PeerNotFound(_) => i2c::ErrorKind::NoAcknowledge(
                i2c::NoAcknowledgeSource::Address,
            ),
            _ => i2c::ErrorKind::Other,
        }
    }
}

impl<E: spi::Error, P: Debug> spi::Error for Error<E, P> {
    fn kind(&self) -> spi::ErrorKind {
        match self {
            Error::Bus(err) => err.kind(),
            Error::ChipSelect(_) => spi::ErrorKind::ChipSelectFault,
            _ => spi::ErrorKind::Other,
        }
    }
}
