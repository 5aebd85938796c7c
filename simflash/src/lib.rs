//! Simulated application storage.
//!
//! An in-memory stand-in for the storage region the bootloader manages.
//! Besides plain reads and writes it records the upgrade-transaction
//! bracketing and lets tests inject the failure modes real flash exhibits:
//! unreadable ranges, failed writes, and begin/end transaction errors.
//!
//! Reads clamp at the end of the region instead of failing, which is what
//! the bootloader's scan relies on to know where storage ends.

use std::ops::Range;

use storage::{check_write, clamp_read, AppStorage, Error, Result};

mod clock;
pub mod gen;

pub use clock::TestClock;

pub struct SimFlash {
    data: Vec<u8>,
    read_faults: Vec<Range<usize>>,
    write_faults: Vec<Range<usize>>,
    fail_begin: bool,
    fail_end: bool,
    in_upgrade: bool,
    begin_calls: usize,
    end_calls: Vec<bool>,
    read_high_water: usize,
}

impl SimFlash {
    /// A region of `capacity` bytes, erased to zero.
    pub fn new(capacity: usize) -> SimFlash {
        SimFlash {
            data: vec![0; capacity],
            read_faults: Vec::new(),
            write_faults: Vec::new(),
            fail_begin: false,
            fail_end: false,
            in_upgrade: false,
            begin_calls: 0,
            end_calls: Vec::new(),
            read_high_water: 0,
        }
    }

    /// Place `data` into the region at `offset`, bypassing the upgrade
    /// bracketing.  This is how tests pre-load an image.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        check_write(self.data.len(), offset, data.len())?;
        self.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Reads overlapping `range` will fail with [`Error::Io`].
    pub fn set_read_fault(&mut self, range: Range<usize>) {
        self.read_faults.push(range);
    }

    /// Writes overlapping `range` will fail with [`Error::Io`].
    pub fn set_write_fault(&mut self, range: Range<usize>) {
        self.write_faults.push(range);
    }

    /// The next `begin_upgrade` will fail with [`Error::Io`].
    pub fn fail_begin_upgrade(&mut self) {
        self.fail_begin = true;
    }

    /// Any `end_upgrade` will fail with [`Error::Io`] after recording its
    /// `success` flag.
    pub fn fail_end_upgrade(&mut self) {
        self.fail_end = true;
    }

    /// How many times `begin_upgrade` was invoked.
    pub fn begin_calls(&self) -> usize {
        self.begin_calls
    }

    /// The `success` flag of every `end_upgrade` invocation, in order,
    /// including the ones that were made to fail.
    pub fn end_calls(&self) -> &[bool] {
        &self.end_calls
    }

    /// One past the furthest byte any read has returned.
    pub fn read_high_water(&self) -> usize {
        self.read_high_water
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    fn overlaps(faults: &[Range<usize>], offset: usize, len: usize) -> bool {
        faults.iter().any(|r| offset < r.end && r.start < offset + len)
    }
}

impl AppStorage for SimFlash {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<usize> {
        let n = clamp_read(self.data.len(), offset, bytes.len());
        if n > 0 && Self::overlaps(&self.read_faults, offset, n) {
            return Err(Error::Io);
        }
        if n > 0 {
            bytes[..n].copy_from_slice(&self.data[offset..offset + n]);
            self.read_high_water = self.read_high_water.max(offset + n);
        }
        Ok(n)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<usize> {
        if !self.in_upgrade {
            return Err(Error::NoUpgrade);
        }
        check_write(self.data.len(), offset, bytes.len())?;
        if Self::overlaps(&self.write_faults, offset, bytes.len()) {
            return Err(Error::Io);
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn begin_upgrade(&mut self) -> Result<()> {
        self.begin_calls += 1;
        if self.fail_begin {
            return Err(Error::Io);
        }
        if self.in_upgrade {
            return Err(Error::UpgradeActive);
        }
        self.in_upgrade = true;
        Ok(())
    }

    fn end_upgrade(&mut self, success: bool) -> Result<()> {
        self.end_calls.push(success);
        if !self.in_upgrade {
            return Err(Error::NoUpgrade);
        }
        self.in_upgrade = false;
        if self.fail_end {
            return Err(Error::Io);
        }
        Ok(())
    }
}
