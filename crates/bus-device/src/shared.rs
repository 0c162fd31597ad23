//! Lockable wrappers that let one owned `embedded-hal` bus be shared by many
//! devices.

use core::cell::RefCell;
use core::fmt::Debug;

use embassy_embedded_hal::SetConfig;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::i2c::{I2c, Operation};
use embedded_hal::spi::{self, SpiBus as HalSpiBus};
use portable_atomic::{AtomicBool, Ordering};

use crate::bus::{ClockConfig, I2cBus, LockableBus, SpiBus};

/// Longest unterminated write kept back for a repeated start.
const HELD_WRITE_CAPACITY: usize = 32;

/// Compare-and-swap lock flag shared by both adapters.
struct LockFlag(AtomicBool);

impl LockFlag {
    const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

struct I2cState<I2C> {
    i2c: I2C,
    /// Address of the write in `held`, if one is waiting for its stop.
    held_for: Option<u8>,
    held: heapless::Vec<u8, HELD_WRITE_CAPACITY>,
}

impl<I2C: I2c> I2cState<I2C> {
    /// Run `operation`, prefixed by any write held back for the same address.
    fn run(
        &mut self,
        address: u8,
        operation: Operation<'_>,
    ) -> Result<(), I2C::Error> {
        if self.held_for == Some(address) {
            let result = self.i2c.transaction(
                address,
                &mut [Operation::Write(&self.held[..]), operation],
            );
            self.discard();
            return result;
        }

        self.flush()?;
        self.i2c.transaction(address, &mut [operation])
    }

    /// Keep `bytes` back until the next operation on `address`. Returns
    /// `false` if they do not fit.
    fn hold(&mut self, address: u8, bytes: &[u8]) -> Result<bool, I2C::Error> {
        if self.held_for.is_some_and(|held_for| held_for != address) {
            self.flush()?;
        }
        if self.held.extend_from_slice(bytes).is_err() {
            return Ok(false);
        }
        self.held_for = Some(address);
        Ok(true)
    }

    /// Send any held write, terminated with a stop.
    fn flush(&mut self) -> Result<(), I2C::Error> {
        let Some(address) = self.held_for else {
            return Ok(());
        };
        let result = self.i2c.write(address, &self.held);
        self.discard();
        result
    }

    fn discard(&mut self) {
        self.held_for = None;
        self.held.clear();
    }
}

/// An `embedded-hal` I2C bus shared between [`I2cDevice`](crate::I2cDevice)s.
///
/// `M` picks the mutex guarding the bus itself, e.g.
/// `CriticalSectionRawMutex` when devices live in different interrupt
/// priorities, `NoopRawMutex` when they share one executor.
///
/// A write without stop is held back (up to 32 bytes) and sent together
/// with the next operation on the same address as one transaction. A read
/// after it gets a repeated start. A write after it does not: `embedded-hal`
/// joins adjacent operations of the same kind, so the two go out as one
/// continuous write with no second address. An operation on a different
/// address flushes the held write with a stop first.
///
/// A failure of the held bytes is reported by whichever call sends them: the
/// next read or write, or [`finish`](I2cBus::finish) at the end of the
/// transaction. Unlocking without `finish` still flushes, but can only log a
/// failure.
pub struct SharedI2c<M: RawMutex, I2C> {
    lock: LockFlag,
    state: Mutex<M, RefCell<I2cState<I2C>>>,
}

impl<M: RawMutex, I2C> SharedI2c<M, I2C> {
    pub const fn new(i2c: I2C) -> Self {
        Self {
            lock: LockFlag::new(),
            state: Mutex::new(RefCell::new(I2cState {
                i2c,
                held_for: None,
                held: heapless::Vec::new(),
            })),
        }
    }

    /// Take the bus back. Any held write is dropped.
    pub fn into_inner(self) -> I2C {
        self.state.into_inner().into_inner().i2c
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut I2cState<I2C>) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }
}

impl<M: RawMutex, I2C: I2c> LockableBus for SharedI2c<M, I2C> {
    fn try_lock(&self) -> bool {
        self.lock.try_lock()
    }

    fn unlock(&self) {
        if self.with_state(I2cState::flush).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("I2C held write failed on unlock");
        }
        self.lock.unlock();
    }
}

impl<M: RawMutex, I2C: I2c> I2cBus for SharedI2c<M, I2C> {
    type Error = I2C::Error;

    fn write(
        &self,
        address: u8,
        bytes: &[u8],
        stop: bool,
    ) -> Result<(), Self::Error> {
        self.with_state(|state| {
            if !stop {
                if state.hold(address, bytes)? {
                    return Ok(());
                }
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "I2C write to {=u8:#x} too long to hold, sending with stop",
                    address
                );
            }
            state.run(address, Operation::Write(bytes))
        })
    }

    fn read_into(
        &self,
        address: u8,
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.with_state(|state| state.run(address, Operation::Read(buffer)))
    }

    fn finish(&self) -> Result<(), Self::Error> {
        self.with_state(I2cState::flush)
    }
}

/// Error from a [`SharedSpi`] bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SharedSpiError<E, C> {
    /// Transfer failed.
    Spi(E),
    /// The bus rejected the clock configuration.
    Config(C),
}

impl<E: spi::Error, C: Debug> spi::Error for SharedSpiError<E, C> {
    fn kind(&self) -> spi::ErrorKind {
        match self {
            SharedSpiError::Spi(err) => err.kind(),
            SharedSpiError::Config(_) => spi::ErrorKind::Other,
        }
    }
}

/// An `embedded-hal` SPI bus shared between [`SpiDevice`](crate::SpiDevice)s.
///
/// `to_config` turns a device's [`ClockConfig`] into the HAL's own config
/// type; it runs every time a device opens a transaction.
pub struct SharedSpi<M: RawMutex, SPI: SetConfig> {
    lock: LockFlag,
    spi: Mutex<M, RefCell<SPI>>,
    to_config: fn(&ClockConfig) -> SPI::Config,
}

impl<M: RawMutex, SPI: SetConfig> SharedSpi<M, SPI> {
    pub const fn new(
        spi: SPI,
        to_config: fn(&ClockConfig) -> SPI::Config,
    ) -> Self {
        Self {
            lock: LockFlag::new(),
            spi: Mutex::new(RefCell::new(spi)),
            to_config,
        }
    }

    pub fn into_inner(self) -> SPI {
        self.spi.into_inner().into_inner()
    }

    fn with_spi<R>(&self, f: impl FnOnce(&mut SPI) -> R) -> R {
        self.spi.lock(|spi| f(&mut spi.borrow_mut()))
    }
}

impl<M: RawMutex, SPI: SetConfig> LockableBus for SharedSpi<M, SPI> {
    fn try_lock(&self) -> bool {
        self.lock.try_lock()
    }

    fn unlock(&self) {
        self.lock.unlock();
    }
}

impl<M, SPI> SpiBus for SharedSpi<M, SPI>
where
    M: RawMutex,
    SPI: HalSpiBus + SetConfig,
    SPI::ConfigError: Debug,
{
    type Error = SharedSpiError<SPI::Error, SPI::ConfigError>;

    fn configure(&self, clock: &ClockConfig) -> Result<(), Self::Error> {
        let config = (self.to_config)(clock);
        self.with_spi(|spi| spi.set_config(&config))
            .map_err(SharedSpiError::Config)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.with_spi(|spi| {
            spi.write(bytes)?;
            spi.flush()
        })
        .map_err(SharedSpiError::Spi)
    }

    fn read_into(&self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.with_spi(|spi| {
            spi.read(buffer)?;
            spi.flush()
        })
        .map_err(SharedSpiError::Spi)
    }

    fn transfer(
        &self,
        read: &mut [u8],
        write: &[u8],
    ) -> Result<(), Self::Error> {
        self.with_spi(|spi| {
            spi.transfer(read, write)?;
            spi.flush()
        })
        .map_err(SharedSpiError::Spi)
    }

    fn transfer_in_place(&self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.with_spi(|spi| {
            spi.transfer_in_place(buffer)?;
            spi.flush()
        })
        .map_err(SharedSpiError::Spi)
    }
}
