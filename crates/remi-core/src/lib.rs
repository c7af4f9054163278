//! Core remote process introspection functionality.

mod core;
mod driver;
mod error;
mod retry;

use std::{cell::Cell, time::Duration};

use zerocopy::{FromBytes, IntoBytes};

pub use self::{
    core::{AttachState, MemoryAccess, ProcessId, RemiInfo, RemoteAddress},
    driver::{RemiDriver, RemiRead},
    error::{ErrorKind, RemiError},
    retry::RetryPolicy,
};

/// Diagnostics gathered by the bounded read loop.
#[derive(Debug, Default)]
struct ReadStats {
    last_wait: Cell<Duration>,
    long_waits: Cell<u64>,
}

/// The core functionality for remote memory access.
///
/// `RemiCore` wraps a driver and turns its single-attempt reads into
/// reads that tolerate transient failures. A failed attempt reported as
/// [`RemiError::Busy`] is retried, yielding the processor between attempts,
/// until the [`RetryPolicy`] window elapses.
///
/// `RemiCore` is not `Sync`. A handle is meant to be driven by a single
/// controlling thread, and calls on one handle must not be reentrant.
pub struct RemiCore<Driver>
where
    Driver: RemiRead,
{
    driver: Driver,
    retry: RetryPolicy,
    stats: ReadStats,
}

impl<Driver> RemiCore<Driver>
where
    Driver: RemiRead,
{
    /// Creates a new `RemiCore` instance with the given driver.
    ///
    /// Reads are retried for up to 100 milliseconds by default.
    pub fn new(driver: Driver) -> Result<Self, RemiError> {
        Ok(Self {
            driver,
            retry: RetryPolicy::default(),
            stats: ReadStats::default(),
        })
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    /// Returns the retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns the driver used by this `RemiCore` instance.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Retrieves information about the attached process.
    pub fn info(&self) -> Result<RemiInfo, RemiError> {
        self.driver.info()
    }

    /// Returns the current attach state.
    pub fn state(&self) -> AttachState {
        self.driver.state()
    }

    /// Pauses the target.
    pub fn pause(&self) -> Result<(), RemiError> {
        self.driver.pause()
    }

    /// Resumes the target.
    pub fn resume(&self) -> Result<(), RemiError> {
        self.driver.resume()
    }

    /// Pauses the target and returns a guard that resumes it when dropped.
    pub fn pause_guard(&self) -> Result<RemiPauseGuard<'_, Driver>, RemiError> {
        RemiPauseGuard::new(&self.driver)
    }

    /// Detaches from the target.
    pub fn detach(&self) -> Result<(), RemiError> {
        self.driver.detach()
    }

    /// Returns the time the most recent successful read spent waiting for
    /// the target.
    pub fn last_wait(&self) -> Duration {
        self.stats.last_wait.get()
    }

    /// Returns the number of successful reads that waited longer than the
    /// long wait threshold.
    pub fn long_waits(&self) -> u64 {
        self.stats.long_waits.get()
    }

    /// Reads memory from the target into the whole `buffer`.
    ///
    /// May block the calling thread for up to the retry window. Fails with
    /// [`RemiError::Timeout`] if the target stays busy for the whole window,
    /// and with [`RemiError::AddressOverflow`] before touching the target if
    /// the range wraps around the end of the address space.
    pub fn read(&self, address: RemoteAddress, buffer: &mut [u8]) -> Result<(), RemiError> {
        if address.checked_add(buffer.len() as u64).is_none() {
            return Err(RemiError::AddressOverflow(address));
        }

        let ((), wait) = self
            .retry
            .run(|| self.driver.read_memory(address, buffer))
            .map_err(|err| match err {
                RemiError::Busy => RemiError::Timeout(address),
                err => err,
            })?;

        self.stats.last_wait.set(wait);
        if wait > self.retry.long_wait {
            self.stats.long_waits.set(self.stats.long_waits.get() + 1);
            tracing::debug!(%address, ?wait, "long wait for remote read");
        }

        Ok(())
    }

    /// Reads `length` bytes from the target into the beginning of `buffer`
    /// and returns the filled part.
    ///
    /// Fails with [`RemiError::OutOfBounds`] before touching the target if
    /// `length` exceeds the capacity of `buffer`.
    pub fn read_into<'b>(
        &self,
        address: RemoteAddress,
        buffer: &'b mut [u8],
        length: usize,
    ) -> Result<&'b [u8], RemiError> {
        if length > buffer.len() {
            return Err(RemiError::OutOfBounds {
                length,
                capacity: buffer.len(),
            });
        }

        let buffer = &mut buffer[..length];
        self.read(address, buffer)?;
        Ok(buffer)
    }

    /// Reads a 32-bit unsigned integer from the target.
    pub fn read_u32(&self, address: RemoteAddress) -> Result<u32, RemiError> {
        let mut buffer = [0u8; 4];
        self.read(address, &mut buffer)?;
        Ok(u32::from_ne_bytes(buffer))
    }

    /// Reads a 64-bit unsigned integer from the target.
    pub fn read_u64(&self, address: RemoteAddress) -> Result<u64, RemiError> {
        let mut buffer = [0u8; 8];
        self.read(address, &mut buffer)?;
        Ok(u64::from_ne_bytes(buffer))
    }

    /// Reads a machine word from the target.
    ///
    /// The result is zero-extended to a [`u64`].
    pub fn read_word(&self, address: RemoteAddress) -> Result<u64, RemiError> {
        let mut buffer = [0u8; size_of::<usize>()];
        self.read(address, &mut buffer)?;
        Ok(usize::from_ne_bytes(buffer) as u64)
    }

    /// Reads a pointer from the target.
    pub fn read_address(&self, address: RemoteAddress) -> Result<RemoteAddress, RemiError> {
        self.read_word(address).map(RemoteAddress)
    }

    /// Reads a struct from the target.
    pub fn read_struct<T>(&self, address: RemoteAddress) -> Result<T, RemiError>
    where
        T: FromBytes + IntoBytes,
    {
        let mut result = T::new_zeroed();
        self.read(address, result.as_mut_bytes())?;
        Ok(result)
    }
}

/// A guard that pauses the target when created and resumes it when dropped.
pub struct RemiPauseGuard<'a, Driver>
where
    Driver: RemiDriver,
{
    driver: &'a Driver,
}

impl<'a, Driver> RemiPauseGuard<'a, Driver>
where
    Driver: RemiDriver,
{
    /// Creates a new pause guard.
    pub fn new(driver: &'a Driver) -> Result<Self, RemiError> {
        driver.pause()?;
        Ok(Self { driver })
    }
}

impl<Driver> Drop for RemiPauseGuard<'_, Driver>
where
    Driver: RemiDriver,
{
    fn drop(&mut self) {
        if let Err(err) = self.driver.resume() {
            tracing::error!(?err, "Failed to resume the target process");
        }
    }
}

#[cfg(test)]
mod core_tests;
