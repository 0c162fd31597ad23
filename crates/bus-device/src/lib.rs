#![no_std]
//! Exclusive-access transactions for devices sharing an I2C or SPI bus.
//!
//! A bus is shared by handing the same `&bus` to several device wrappers.
//! Each wrapper opens a transaction by taking the bus lock, applies its own
//! framing (clock configuration and chip-select for SPI), and undoes that
//! framing when the transaction guard is released or dropped, so one device's
//! reads and writes are never interleaved with another's.
//!
//! The wrappers only need the small capability traits in this crate. The
//! [`SharedI2c`] and [`SharedSpi`] adapters provide them for any
//! `embedded-hal` 1.0 bus.

mod bus;
mod error;
mod i2c;
mod lock;
mod shared;
mod spi;

pub use bus::{ClockConfig, I2cBus, LockableBus, SpiBus};
pub use error::Error;
pub use i2c::{I2cDevice, I2cTransaction};
pub use lock::Timeout;
pub use shared::{SharedI2c, SharedSpi, SharedSpiError};
pub use spi::{NoChipSelect, SpiConfig, SpiDevice, SpiTransaction};
