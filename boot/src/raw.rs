//! Byte-level views of fixed-layout records.
//!
//! The application descriptor is a `repr(C)` struct whose layout is shared
//! with the image build tooling, so it is read out of storage by filling the
//! struct's own bytes directly rather than by field-by-field decoding.

use core::{mem, slice};

/// Borrow a value as the bytes it occupies in memory.
pub trait AsRaw: Sized {
    fn as_raw(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self as *const Self as *const u8, mem::size_of::<Self>()) }
    }
}

/// Borrow a value as mutable bytes, so a storage read can fill it in place.
///
/// # Safety
///
/// Only implement this for `repr(C)` types without padding whose fields are
/// valid for every possible bit pattern.
pub unsafe trait AsMutRaw: Sized {
    fn as_mut_raw(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self as *mut Self as *mut u8, mem::size_of::<Self>()) }
    }
}
