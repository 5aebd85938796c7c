//! Bootloader boot-decision and upgrade core.
//!
//! This crate decides whether the application image currently in storage is
//! intact and safe to boot, tracks the small lifecycle state machine around
//! that decision, and runs the in-place upgrade transaction that replaces the
//! image without ever leaving the device unbootable by accident.
//!
//! The flash driver itself, the transport that delivers new firmware, and the
//! surrounding command surface all live elsewhere; they reach this core
//! through the [`storage::AppStorage`], [`Downloader`] and [`Clock`] traits.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod bootloader;
mod descriptor;
mod download;
pub mod raw;

pub use bootloader::{Bootloader, State};
pub use descriptor::{locate_app_descriptor, AppDescriptor, AppInfo, ImageCrc, SIGNATURE};
pub use download::{DownloadSink, Downloader};

pub type Result<T> = core::result::Result<T, Error>;

// Use the storage error kind so this does not depend on a particular device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The storage backend reported a failure.
    Storage(storage::Error),
    /// The requested transition is not allowed from the current state.
    InvalidState,
    /// The firmware data source failed to deliver the image.
    Download,
}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Storage(e)
    }
}

/// Monotonic time source used for the boot delay.  Milliseconds from an
/// arbitrary epoch; must never move backwards.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
