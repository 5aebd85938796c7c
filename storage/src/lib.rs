//! Application storage backend contract.
//!
//! The bootloader core does not talk to flash hardware directly.  It goes
//! through the [`AppStorage`] trait, which models the region of storage that
//! holds the single application image: byte-addressable reads and writes plus
//! the upgrade-transaction bracketing that the device driver uses to unlock
//! the region for programming.
//!
//! Reads are permissive: a read that runs off the end of the region returns
//! however many bytes were available (possibly zero) rather than an error.
//! The bootloader relies on short reads to detect the end of the region while
//! scanning.  Writes are strict and must land entirely within the region.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// A write would touch bytes outside the storage region.
    OutOfBounds,
    /// The device reported a read or write failure.
    Io,
    /// A write or finalization was attempted with no upgrade in progress.
    NoUpgrade,
    /// An upgrade was begun while one was already in progress.
    UpgradeActive,
}

pub type Result<T> = core::result::Result<T, Error>;

/// The storage region holding the application image.
///
/// Implementations are not expected to be reentrant; the caller serializes
/// all access.
pub trait AppStorage {
    /// Total size of the region in bytes.
    fn capacity(&self) -> usize;

    /// Read up to `bytes.len()` bytes starting at `offset`.  Returns the
    /// number of bytes actually read; fewer than requested (or zero) means
    /// the end of the region was reached.
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<usize>;

    /// Write `bytes` at `offset`.  Returns the number of bytes written.
    /// Only meaningful while an upgrade is in progress.
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<usize>;

    /// Unlock the region for programming.  Must be balanced by exactly one
    /// call to [`AppStorage::end_upgrade`].
    fn begin_upgrade(&mut self) -> Result<()>;

    /// Finalize an upgrade.  `success` tells the backend whether the new
    /// content should be committed or discarded.
    fn end_upgrade(&mut self, success: bool) -> Result<()>;
}

impl<S: AppStorage + ?Sized> AppStorage for &mut S {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<usize> {
        (**self).read(offset, bytes)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<usize> {
        (**self).write(offset, bytes)
    }

    fn begin_upgrade(&mut self) -> Result<()> {
        (**self).begin_upgrade()
    }

    fn end_upgrade(&mut self, success: bool) -> Result<()> {
        (**self).end_upgrade(success)
    }
}

/// How many of the `length` requested bytes at `offset` actually fall within
/// a region of `capacity` bytes.
pub fn clamp_read(capacity: usize, offset: usize, length: usize) -> usize {
    if offset >= capacity {
        return 0;
    }
    length.min(capacity - offset)
}

/// Validate that a write of `length` bytes at `offset` stays within a region
/// of `capacity` bytes.
pub fn check_write(capacity: usize, offset: usize, length: usize) -> Result<()> {
    if length > capacity || offset > capacity - length {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}
