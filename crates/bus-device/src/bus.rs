use core::ops::{Bound, RangeBounds};

use embedded_hal::spi::{Mode, MODE_0};
use embedded_hal::{i2c, spi};

/// A bus that can be claimed by one user at a time.
///
/// The lock is cooperative and non-reentrant: `try_lock` never blocks, and a
/// second `try_lock` before `unlock` fails, even from the same caller.
pub trait LockableBus {
    /// Try to claim the bus. Returns `true` if the caller now holds it.
    fn try_lock(&self) -> bool;

    /// Give the bus back. Only the current holder may call this.
    fn unlock(&self);
}

/// Raw operations on a shared two-wire addressed bus.
///
/// Callers hold the bus lock around every call.
pub trait I2cBus: LockableBus {
    type Error: i2c::Error;

    /// Write `bytes` to the peer at `address`, ending with a stop condition
    /// when `stop` is set.
    ///
    /// An empty write must succeed exactly when a peer acknowledges
    /// `address`, and otherwise fail with
    /// [`ErrorKind::NoAcknowledge`](i2c::ErrorKind::NoAcknowledge).
    fn write(
        &self,
        address: u8,
        bytes: &[u8],
        stop: bool,
    ) -> Result<(), Self::Error>;

    /// Fill `buffer` with bytes read from the peer at `address`.
    fn read_into(
        &self,
        address: u8,
        buffer: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Complete anything still pending from this transaction. Called once,
    /// right before the bus is unlocked.
    ///
    /// Buses that defer part of a write, such as a write without stop held
    /// for a repeated start, report its failure here.
    fn finish(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Raw operations on a shared chip-select bus.
///
/// Callers hold the bus lock around every call.
pub trait SpiBus: LockableBus {
    type Error: spi::Error;

    /// Apply clock rate, polarity and phase for the next transfers.
    fn configure(&self, clock: &ClockConfig) -> Result<(), Self::Error>;

    fn write(&self, bytes: &[u8]) -> Result<(), Self::Error>;

    fn read_into(&self, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Clock out `write` while filling `read`.
    fn transfer(
        &self,
        read: &mut [u8],
        write: &[u8],
    ) -> Result<(), Self::Error>;

    fn transfer_in_place(&self, buffer: &mut [u8]) -> Result<(), Self::Error>;
}

/// Per-device SPI clock settings, re-applied at the start of every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    /// Clock rate in Hz.
    pub frequency: u32,
    /// Clock polarity and phase.
    pub mode: Mode,
}

impl ClockConfig {
    pub const fn new(frequency: u32, mode: Mode) -> Self {
        Self { frequency, mode }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::new(100_000, MODE_0)
    }
}

fn bounds<R: RangeBounds<usize>>(range: &R) -> (Bound<usize>, Bound<usize>) {
    (range.start_bound().cloned(), range.end_bound().cloned())
}

/// Borrow `buffer[range]` without copying, or `None` if it is out of bounds.
pub(crate) fn window<R: RangeBounds<usize>>(
    buffer: &[u8],
    range: R,
) -> Option<&[u8]> {
    buffer.get(bounds(&range))
}

pub(crate) fn window_mut<R: RangeBounds<usize>>(
    buffer: &mut [u8],
    range: R,
) -> Option<&mut [u8]> {
    buffer.get_mut(bounds(&range))
}
