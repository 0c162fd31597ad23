use embassy_time::{Duration, Instant};

use crate::bus::LockableBus;

/// How long a device may wait for the bus lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Poll until the lock is free, however long that takes.
    Unbounded,
    /// Give up once this much time has passed since the first attempt.
    ///
    /// `Bounded(Duration::from_ticks(0))` still makes one attempt.
    Bounded(Duration),
}

impl Timeout {
    pub const fn from_millis(millis: u64) -> Self {
        Self::Bounded(Duration::from_millis(millis))
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::from_millis(250)
    }
}

/// The lock was still held by someone else when the deadline passed.
#[derive(Debug)]
pub(crate) struct TimedOut;

struct Deadline(Option<(Instant, Duration)>);

impl Deadline {
    fn start(timeout: Timeout) -> Self {
        match timeout {
            Timeout::Unbounded => Self(None),
            Timeout::Bounded(limit) => Self(Some((Instant::now(), limit))),
        }
    }

    fn check(&self) -> Result<(), TimedOut> {
        match self.0 {
            Some((start, limit)) if start.elapsed() >= limit => Err(TimedOut),
            _ => Ok(()),
        }
    }
}

/// Busy-poll until `bus` is locked or `timeout` expires.
pub(crate) fn acquire<B: LockableBus + ?Sized>(
    bus: &B,
    timeout: Timeout,
) -> Result<(), TimedOut> {
    let deadline = Deadline::start(timeout);
    while !bus.try_lock() {
        deadline.check()?;
        core::hint::spin_loop();
    }
    Ok(())
}

/// Like [`acquire`], but yields to the executor between attempts.
pub(crate) async fn acquire_async<B: LockableBus + ?Sized>(
    bus: &B,
    timeout: Timeout,
) -> Result<(), TimedOut> {
    let deadline = Deadline::start(timeout);
    while !bus.try_lock() {
        deadline.check()?;
        embassy_futures::yield_now().await;
    }
    Ok(())
}

/// Busy-poll with no deadline.
pub(crate) fn spin<B: LockableBus + ?Sized>(bus: &B) {
    while !bus.try_lock() {
        core::hint::spin_loop();
    }
}

pub(crate) async fn spin_async<B: LockableBus + ?Sized>(bus: &B) {
    while !bus.try_lock() {
        embassy_futures::yield_now().await;
    }
}
