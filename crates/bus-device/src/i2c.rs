use core::marker::PhantomData;
use core::ops::RangeBounds;

use embedded_hal::i2c::{Error as _, ErrorKind};

use crate::bus::{window, window_mut, I2cBus};
use crate::error::Error;
use crate::lock;

const MAX_ADDRESS: u8 = 0x7F;

/// A single peer on a shared I2C bus.
///
/// Construction probes the address, so an `I2cDevice` always refers to a
/// peer that acknowledged at least once.
///
/// ```ignore
/// let mut rtc = I2cDevice::new(&bus, 0x68)?;
/// let mut status = [0u8; 1];
/// rtc.transaction(|t| t.write_read(&[0x0E], &mut status))?;
/// ```
pub struct I2cDevice<'a, B: I2cBus> {
    bus: &'a B,
    address: u8,
}

impl<'a, B: I2cBus> I2cDevice<'a, B> {
    /// Verify that a peer answers at `address` and wrap it.
    ///
    /// The probe is a zero-length write under its own lock. The lock is
    /// released before this returns, whatever the outcome.
    pub fn new(bus: &'a B, address: u8) -> Result<Self, Error<B::Error>> {
        if address > MAX_ADDRESS {
            return Err(Error::InvalidAddress(address));
        }

        lock::spin(bus);
        let probe = bus.write(address, &[], true).and_then(|()| bus.finish());
        bus.unlock();

        match probe {
            Ok(()) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("I2C device found at {=u8:#x}", address);
                Ok(Self { bus, address })
            }
            Err(err) if matches!(err.kind(), ErrorKind::NoAcknowledge(_)) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("No I2C device at {=u8:#x}", address);
                Err(Error::PeerNotFound(address))
            }
            Err(err) => Err(Error::Bus(err)),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Spin until the bus is ours and open a transaction.
    pub fn lock(&mut self) -> I2cTransaction<'_, B> {
        lock::spin(self.bus);
        self.begin()
    }

    /// Open a transaction, yielding to the executor while the bus is busy.
    pub async fn lock_async(&mut self) -> I2cTransaction<'_, B> {
        lock::spin_async(self.bus).await;
        self.begin()
    }

    /// Run `f` inside one transaction.
    ///
    /// The bus is unlocked afterwards even when `f` fails. If both `f` and
    /// the release fail, the error from `f` is returned.
    pub fn transaction<R, F>(&mut self, f: F) -> Result<R, Error<B::Error>>
    where
        F: FnOnce(&mut I2cTransaction<'_, B>) -> Result<R, Error<B::Error>>,
    {
        let mut transaction = self.lock();
        let result = f(&mut transaction);
        let released = transaction.release();
        let value = result?;
        released?;
        Ok(value)
    }

    fn begin(&mut self) -> I2cTransaction<'_, B> {
        #[cfg(feature = "defmt")]
        defmt::trace!("I2C {=u8:#x}: bus locked", self.address);
        I2cTransaction {
            bus: self.bus,
            address: self.address,
            open: true,
            _device: PhantomData,
        }
    }
}

/// An open I2C transaction. The bus stays locked until this is released or
/// dropped.
///
/// Call [`release`](Self::release) to see a failure of any write the bus
/// deferred; dropping the guard unlocks the same way but can only log it.
pub struct I2cTransaction<'d, B: I2cBus> {
    bus: &'d B,
    address: u8,
    open: bool,
    _device: PhantomData<&'d mut ()>,
}

impl<B: I2cBus> I2cTransaction<'_, B> {
    /// Read `buffer.len()` bytes from the device.
    pub fn read_into(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(), Error<B::Error>> {
        self.bus.read_into(self.address, buffer).map_err(Error::Bus)
    }

    /// Read into `buffer[range]` only, leaving the rest untouched.
    pub fn read_into_range<R: RangeBounds<usize>>(
        &mut self,
        buffer: &mut [u8],
        range: R,
    ) -> Result<(), Error<B::Error>> {
        let buffer = window_mut(buffer, range).ok_or(Error::OutOfRange)?;
        self.read_into(buffer)
    }

    /// Write `buffer` followed by a stop condition.
    pub fn write(&mut self, buffer: &[u8]) -> Result<(), Error<B::Error>> {
        self.write_with_stop(buffer, true)
    }

    pub fn write_range<R: RangeBounds<usize>>(
        &mut self,
        buffer: &[u8],
        range: R,
    ) -> Result<(), Error<B::Error>> {
        let buffer = window(buffer, range).ok_or(Error::OutOfRange)?;
        self.write(buffer)
    }

    /// Write `buffer`, leaving the bus open for a repeated start when `stop`
    /// is false.
    pub fn write_with_stop(
        &mut self,
        buffer: &[u8],
        stop: bool,
    ) -> Result<(), Error<B::Error>> {
        self.bus.write(self.address, buffer, stop).map_err(Error::Bus)
    }

    /// Write a register address then read its contents without releasing the
    /// bus in between.
    pub fn write_read(
        &mut self,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error<B::Error>> {
        self.write_with_stop(write, false)?;
        self.read_into(read)
    }

    /// Finish any deferred write and unlock the bus. The bus is unlocked
    /// even if finishing fails.
    pub fn release(mut self) -> Result<(), Error<B::Error>> {
        self.close()
    }

    fn close(&mut self) -> Result<(), Error<B::Error>> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let finished = self.bus.finish().map_err(Error::Bus);
        self.bus.unlock();

        #[cfg(feature = "defmt")]
        defmt::trace!("I2C {=u8:#x}: bus unlocked", self.address);

        finished
    }
}

impl<B: I2cBus> Drop for I2cTransaction<'_, B> {
    fn drop(&mut self) {
        if self.close().is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "I2C {=u8:#x}: transaction release failed",
                self.address
            );
        }
    }
}
