use core::convert::Infallible;
use core::ops::RangeBounds;

use embassy_time::Duration;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, Mode, Operation};

use crate::bus::{window, window_mut, ClockConfig, SpiBus};
use crate::error::Error;
use crate::lock::{self, Timeout};

/// Byte clocked out after deselect when trailing clocks are requested.
const CLOCK_OUT_BYTE: u8 = 0xFF;

type DeviceError<B, CS> =
    Error<<B as SpiBus>::Error, <CS as digital::ErrorType>::Error>;

/// Settings a [`SpiDevice`] applies around each of its transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    /// Clock applied to the bus every time the lock is taken.
    pub clock: ClockConfig,
    /// Clock cycles to run after chip-select goes high. Rounded up to whole
    /// bytes. SD cards need these to finish internal work.
    pub extra_clocks: u32,
    /// How long to wait for the bus lock.
    pub timeout: Timeout,
}

impl SpiConfig {
    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.clock.frequency = frequency;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.clock.mode = mode;
        self
    }

    pub fn with_extra_clocks(mut self, extra_clocks: u32) -> Self {
        self.extra_clocks = extra_clocks;
        self
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of `0xFF` bytes written after deselect.
    pub fn clock_out_bytes(&self) -> u32 {
        self.extra_clocks.div_ceil(8)
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            extra_clocks: 0,
            timeout: Timeout::default(),
        }
    }
}

/// Stand-in chip-select for peers that are always selected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChipSelect;

impl digital::ErrorType for NoChipSelect {
    type Error = Infallible;
}

impl OutputPin for NoChipSelect {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// A single peer on a shared SPI bus, selected by its own chip-select line.
///
/// Every transaction locks the bus, reapplies this device's clock settings
/// (another device may have changed them) and pulls chip-select low. Ending
/// the transaction raises chip-select, runs any trailing clocks, then unlocks
/// the bus. The unlock happens even if an earlier step or the body failed.
pub struct SpiDevice<'a, B: SpiBus, CS: OutputPin> {
    bus: &'a B,
    cs: CS,
    config: SpiConfig,
}

impl<'a, B: SpiBus> SpiDevice<'a, B, NoChipSelect> {
    pub fn without_chip_select(bus: &'a B, config: SpiConfig) -> Self {
        Self { bus, cs: NoChipSelect, config }
    }
}

impl<'a, B: SpiBus, CS: OutputPin> SpiDevice<'a, B, CS> {
    /// Wrap a peer and deselect it straight away.
    pub fn new(
        bus: &'a B,
        mut cs: CS,
        config: SpiConfig,
    ) -> Result<Self, DeviceError<B, CS>> {
        cs.set_high().map_err(Error::ChipSelect)?;

        #[cfg(feature = "defmt")]
        defmt::debug!("SPI device created: {}", config);

        Ok(Self { bus, cs, config })
    }

    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    /// Takes effect from the next transaction.
    pub fn set_config(&mut self, config: SpiConfig) {
        self.config = config;
    }

    /// Give back the chip-select line.
    pub fn release(self) -> CS {
        self.cs
    }

    /// Lock, configure and select, busy-polling for the lock.
    pub fn lock(
        &mut self,
    ) -> Result<SpiTransaction<'_, 'a, B, CS>, DeviceError<B, CS>> {
        if lock::acquire(self.bus, self.config.timeout).is_err() {
            return Err(self.timed_out());
        }
        self.begin()
    }

    /// Like [`lock`](Self::lock), but yields to the executor while the bus is
    /// busy.
    pub async fn lock_async(
        &mut self,
    ) -> Result<SpiTransaction<'_, 'a, B, CS>, DeviceError<B, CS>> {
        if lock::acquire_async(self.bus, self.config.timeout).await.is_err() {
            return Err(self.timed_out());
        }
        self.begin()
    }

    /// Run `f` inside one transaction.
    ///
    /// The transaction is always ended. If both `f` and the release fail, the
    /// error from `f` is returned.
    pub fn transaction<R, F>(&mut self, f: F) -> Result<R, DeviceError<B, CS>>
    where
        F: FnOnce(
            &mut SpiTransaction<'_, 'a, B, CS>,
        ) -> Result<R, DeviceError<B, CS>>,
    {
        let mut transaction = self.lock()?;
        let result = f(&mut transaction);
        let released = transaction.release();
        let value = result?;
        released?;
        Ok(value)
    }

    fn timed_out(&self) -> DeviceError<B, CS> {
        #[cfg(feature = "defmt")]
        defmt::warn!("SPI bus lock timed out after {}", self.config.timeout);
        Error::LockTimeout
    }

    /// The bus lock is held on entry.
    fn begin(
        &mut self,
    ) -> Result<SpiTransaction<'_, 'a, B, CS>, DeviceError<B, CS>> {
        if let Err(err) = self.bus.configure(&self.config.clock) {
            self.bus.unlock();
            return Err(Error::Bus(err));
        }
        if let Err(err) = self.cs.set_low() {
            self.bus.unlock();
            return Err(Error::ChipSelect(err));
        }

        #[cfg(feature = "defmt")]
        defmt::trace!("SPI bus locked, device selected");

        Ok(SpiTransaction { device: self, open: true })
    }

    fn clock_out(&self) -> Result<(), DeviceError<B, CS>> {
        for _ in 0..self.config.clock_out_bytes() {
            self.bus.write(&[CLOCK_OUT_BYTE]).map_err(Error::Bus)?;
        }
        Ok(())
    }
}

/// An open SPI transaction: bus locked, configured, device selected.
///
/// Call [`release`](Self::release) to see errors from deselecting; dropping
/// the guard ends the transaction the same way but can only log them.
pub struct SpiTransaction<'d, 'a, B: SpiBus, CS: OutputPin> {
    device: &'d mut SpiDevice<'a, B, CS>,
    open: bool,
}

impl<B: SpiBus, CS: OutputPin> SpiTransaction<'_, '_, B, CS> {
    pub fn read_into(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(), DeviceError<B, CS>> {
        self.device.bus.read_into(buffer).map_err(Error::Bus)
    }

    /// Read into `buffer[range]` only, leaving the rest untouched.
    pub fn read_into_range<R: RangeBounds<usize>>(
        &mut self,
        buffer: &mut [u8],
        range: R,
    ) -> Result<(), DeviceError<B, CS>> {
        let buffer = window_mut(buffer, range).ok_or(Error::OutOfRange)?;
        self.read_into(buffer)
    }

    pub fn write(&mut self, buffer: &[u8]) -> Result<(), DeviceError<B, CS>> {
        self.device.bus.write(buffer).map_err(Error::Bus)
    }

    pub fn write_range<R: RangeBounds<usize>>(
        &mut self,
        buffer: &[u8],
        range: R,
    ) -> Result<(), DeviceError<B, CS>> {
        let buffer = window(buffer, range).ok_or(Error::OutOfRange)?;
        self.write(buffer)
    }

    /// Clock out `write` while filling `read`.
    pub fn transfer(
        &mut self,
        read: &mut [u8],
        write: &[u8],
    ) -> Result<(), DeviceError<B, CS>> {
        self.device.bus.transfer(read, write).map_err(Error::Bus)
    }

    pub fn transfer_in_place(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(), DeviceError<B, CS>> {
        self.device.bus.transfer_in_place(buffer).map_err(Error::Bus)
    }

    /// Deselect, clock out and unlock, reporting the first failure.
    ///
    /// If deselecting fails the trailing clocks are skipped, since the peer
    /// would still see them as data. The bus is unlocked either way.
    pub fn release(mut self) -> Result<(), DeviceError<B, CS>> {
        self.close()
    }

    fn close(&mut self) -> Result<(), DeviceError<B, CS>> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let device = &mut *self.device;
        let result = match device.cs.set_high() {
            Ok(()) => device.clock_out(),
            Err(err) => Err(Error::ChipSelect(err)),
        };
        device.bus.unlock();

        #[cfg(feature = "defmt")]
        defmt::trace!("SPI device deselected, bus unlocked");

        result
    }
}

impl<B: SpiBus, CS: OutputPin> Drop for SpiTransaction<'_, '_, B, CS> {
    fn drop(&mut self) {
        if self.close().is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("SPI transaction release failed");
        }
    }
}

impl<B: SpiBus, CS: OutputPin> spi::ErrorType for SpiDevice<'_, B, CS> {
    type Error = DeviceError<B, CS>;
}

impl<B: SpiBus, CS: OutputPin> spi::SpiDevice for SpiDevice<'_, B, CS> {
    fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        SpiDevice::transaction(self, |t| {
            for operation in operations.iter_mut() {
                match operation {
                    Operation::Read(buf) => t.read_into(buf)?,
                    Operation::Write(buf) => t.write(buf)?,
                    Operation::Transfer(read, write) => {
                        t.transfer(read, write)?
                    }
                    Operation::TransferInPlace(buf) => {
                        t.transfer_in_place(buf)?
                    }
                    Operation::DelayNs(ns) => {
                        let ns = u64::from(*ns);
                        embassy_time::block_for(Duration::from_nanos(ns))
                    }
                }
            }
            Ok(())
        })
    }
}
