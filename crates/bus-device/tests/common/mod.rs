#![allow(dead_code)]

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bus_device::{ClockConfig, I2cBus, LockableBus, SpiBus};
use embassy_embedded_hal::SetConfig;
use embedded_hal::spi::Mode;
use embedded_hal::{digital, i2c, spi};

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// One I2C operation as seen by a HAL-level mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write(Vec<u8>),
    Read(usize),
}

/// Everything the mocks observe, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Lock,
    Unlock,
    WriteTo { address: u8, bytes: Vec<u8>, stop: bool },
    ReadFrom { address: u8, len: usize },
    Configure(ClockConfig),
    Write(Vec<u8>),
    Read(usize),
    Transfer(Vec<u8>),
    CsLow,
    CsHigh,
    I2cTransaction { address: u8, ops: Vec<Op> },
    SetConfig(MockSpiConfig),
    Flush,
}

#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn count(&self, event: &Event) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockError {
    NoAck,
    Fault,
}

impl i2c::Error for MockError {
    fn kind(&self) -> i2c::ErrorKind {
        match self {
            MockError::NoAck => {
                i2c::ErrorKind::NoAcknowledge(i2c::NoAcknowledgeSource::Address)
            }
            MockError::Fault => i2c::ErrorKind::Bus,
        }
    }
}

impl spi::Error for MockError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinError;

impl digital::Error for PinError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

// ---------------------------------------------------------------------------
// Lock bookkeeping shared by the bus mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockLock {
    locked: Cell<bool>,
    attempts: Cell<usize>,
}

impl MockLock {
    fn try_lock(&self, log: &Log) -> bool {
        self.attempts.set(self.attempts.get() + 1);
        if self.locked.get() {
            return false;
        }
        self.locked.set(true);
        log.push(Event::Lock);
        true
    }

    fn unlock(&self, log: &Log) {
        assert!(self.locked.get(), "unlock without a held lock");
        self.locked.set(false);
        log.push(Event::Unlock);
    }
}

// ---------------------------------------------------------------------------
// Capability-level I2C mock
// ---------------------------------------------------------------------------

/// Records every call. Only addresses in `peers` acknowledge.
pub struct MockI2cBus {
    pub log: Log,
    lock: MockLock,
    peers: Vec<u8>,
    fault: Cell<Option<MockError>>,
    pub reply: u8,
}

impl MockI2cBus {
    pub fn with_peers(peers: &[u8]) -> Self {
        Self {
            log: Log::default(),
            lock: MockLock::default(),
            peers: peers.to_vec(),
            fault: Cell::new(None),
            reply: 0x5A,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.locked.get()
    }

    /// Simulate another holder that never lets go.
    pub fn hold(&self) {
        self.lock.locked.set(true);
    }

    pub fn attempts(&self) -> usize {
        self.lock.attempts.get()
    }

    /// Make the next read or write fail with `error`.
    pub fn fail_next(&self, error: MockError) {
        self.fault.set(Some(error));
    }
}

impl LockableBus for MockI2cBus {
    fn try_lock(&self) -> bool {
        self.lock.try_lock(&self.log)
    }

    fn unlock(&self) {
        self.lock.unlock(&self.log);
    }
}

impl I2cBus for MockI2cBus {
    type Error = MockError;

    fn write(
        &self,
        address: u8,
        bytes: &[u8],
        stop: bool,
    ) -> Result<(), MockError> {
        assert!(self.is_locked(), "write outside a transaction");
        self.log.push(Event::WriteTo { address, bytes: bytes.to_vec(), stop });
        if let Some(error) = self.fault.take() {
            return Err(error);
        }
        if !self.peers.contains(&address) {
            return Err(MockError::NoAck);
        }
        Ok(())
    }

    fn read_into(
        &self,
        address: u8,
        buffer: &mut [u8],
    ) -> Result<(), MockError> {
        assert!(self.is_locked(), "read outside a transaction");
        self.log.push(Event::ReadFrom { address, len: buffer.len() });
        if let Some(error) = self.fault.take() {
            return Err(error);
        }
        buffer.fill(self.reply);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Capability-level SPI mock
// ---------------------------------------------------------------------------

pub struct MockSpiBus {
    pub log: Log,
    lock: MockLock,
    fail_configure: Cell<bool>,
    fail_reads: Cell<bool>,
    fail_writes: Cell<bool>,
    pub reply: u8,
}

impl MockSpiBus {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            lock: MockLock::default(),
            fail_configure: Cell::new(false),
            fail_reads: Cell::new(false),
            fail_writes: Cell::new(false),
            reply: 0x58,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.locked.get()
    }

    pub fn hold(&self) {
        self.lock.locked.set(true);
    }

    pub fn attempts(&self) -> usize {
        self.lock.attempts.get()
    }

    pub fn fail_configure(&self, fail: bool) {
        self.fail_configure.set(fail);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

impl LockableBus for MockSpiBus {
    fn try_lock(&self) -> bool {
        self.lock.try_lock(&self.log)
    }

    fn unlock(&self) {
        self.lock.unlock(&self.log);
    }
}

impl SpiBus for MockSpiBus {
    type Error = MockError;

    fn configure(&self, clock: &ClockConfig) -> Result<(), MockError> {
        assert!(self.is_locked(), "configure outside a transaction");
        self.log.push(Event::Configure(*clock));
        if self.fail_configure.get() {
            return Err(MockError::Fault);
        }
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), MockError> {
        assert!(self.is_locked(), "write outside a transaction");
        self.log.push(Event::Write(bytes.to_vec()));
        if self.fail_writes.get() {
            return Err(MockError::Fault);
        }
        Ok(())
    }

    fn read_into(&self, buffer: &mut [u8]) -> Result<(), MockError> {
        assert!(self.is_locked(), "read outside a transaction");
        self.log.push(Event::Read(buffer.len()));
        if self.fail_reads.get() {
            return Err(MockError::Fault);
        }
        buffer.fill(self.reply);
        Ok(())
    }

    fn transfer(&self, read: &mut [u8], write: &[u8]) -> Result<(), MockError> {
        assert!(self.is_locked(), "transfer outside a transaction");
        self.log.push(Event::Transfer(write.to_vec()));
        read.fill(self.reply);
        Ok(())
    }

    fn transfer_in_place(&self, buffer: &mut [u8]) -> Result<(), MockError> {
        assert!(self.is_locked(), "transfer outside a transaction");
        self.log.push(Event::Transfer(buffer.to_vec()));
        buffer.fill(self.reply);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chip-select pin
// ---------------------------------------------------------------------------

pub struct MockPin {
    log: Log,
    fail_high: Arc<AtomicBool>,
}

impl MockPin {
    pub fn new(log: Log) -> Self {
        Self { log, fail_high: Arc::new(AtomicBool::new(false)) }
    }

    /// Handle that makes later `set_high` calls fail.
    pub fn fail_high_switch(&self) -> Arc<AtomicBool> {
        self.fail_high.clone()
    }
}

impl digital::ErrorType for MockPin {
    type Error = PinError;
}

impl digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), PinError> {
        self.log.push(Event::CsLow);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), PinError> {
        if self.fail_high.load(Ordering::SeqCst) {
            return Err(PinError);
        }
        self.log.push(Event::CsHigh);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// embedded-hal level mocks for the shared adapters
// ---------------------------------------------------------------------------

pub struct MockHalI2c {
    pub log: Log,
    peers: Vec<u8>,
    pub reply: u8,
    /// Fail every transaction that writes at least one byte. Empty probe
    /// writes still succeed.
    pub fail_writes: bool,
}

impl MockHalI2c {
    pub fn new(log: Log, peers: &[u8]) -> Self {
        Self { log, peers: peers.to_vec(), reply: 0x17, fail_writes: false }
    }
}

impl i2c::ErrorType for MockHalI2c {
    type Error = MockError;
}

impl i2c::I2c for MockHalI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), MockError> {
        let ops = operations
            .iter()
            .map(|op| match op {
                i2c::Operation::Write(bytes) => Op::Write(bytes.to_vec()),
                i2c::Operation::Read(buffer) => Op::Read(buffer.len()),
            })
            .collect();
        self.log.push(Event::I2cTransaction { address, ops });

        if !self.peers.contains(&address) {
            return Err(MockError::NoAck);
        }
        let writes_data = operations.iter().any(|op| match op {
            i2c::Operation::Write(bytes) => !bytes.is_empty(),
            i2c::Operation::Read(_) => false,
        });
        if self.fail_writes && writes_data {
            return Err(MockError::Fault);
        }
        for op in operations.iter_mut() {
            if let i2c::Operation::Read(buffer) = op {
                buffer.fill(self.reply);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSpiConfig {
    pub hz: u32,
    pub mode: Mode,
}

pub fn mock_spi_config(clock: &ClockConfig) -> MockSpiConfig {
    MockSpiConfig { hz: clock.frequency, mode: clock.mode }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRejected;

pub struct MockHalSpi {
    pub log: Log,
    pub reply: u8,
    /// Highest frequency `set_config` accepts.
    pub max_hz: u32,
}

impl MockHalSpi {
    pub fn new(log: Log) -> Self {
        Self { log, reply: 0x42, max_hz: 8_000_000 }
    }
}

impl spi::ErrorType for MockHalSpi {
    type Error = MockError;
}

impl spi::SpiBus for MockHalSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), MockError> {
        self.log.push(Event::Read(words.len()));
        words.fill(self.reply);
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), MockError> {
        self.log.push(Event::Write(words.to_vec()));
        Ok(())
    }

    fn transfer(
        &mut self,
        read: &mut [u8],
        write: &[u8],
    ) -> Result<(), MockError> {
        self.log.push(Event::Transfer(write.to_vec()));
        read.fill(self.reply);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), MockError> {
        self.log.push(Event::Transfer(words.to_vec()));
        words.fill(self.reply);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MockError> {
        self.log.push(Event::Flush);
        Ok(())
    }
}

impl SetConfig for MockHalSpi {
    type Config = MockSpiConfig;
    type ConfigError = ConfigRejected;

    fn set_config(
        &mut self,
        config: &MockSpiConfig,
    ) -> Result<(), ConfigRejected> {
        if config.hz > self.max_hz {
            return Err(ConfigRejected);
        }
        self.log.push(Event::SetConfig(*config));
        Ok(())
    }
}
