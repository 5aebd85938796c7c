//! Application descriptor location and verification.
//!
//! The application image carries a fixed-layout descriptor embedded at link
//! time.  Finding it means scanning raw storage for the signature, reading
//! the candidate, sanity-checking its fields, and recomputing the whole-image
//! checksum with the descriptor's own checksum words treated as zero.  Flash
//! that has seen wear or partial erasure can contain byte runs that mimic the
//! signature, so a candidate that fails any check only advances the scan; the
//! genuine descriptor may lie further along.

use core::mem::size_of;

use crc::{Crc, CRC_64_WE};
use log::debug;
use storage::AppStorage;

use crate::raw::{AsMutRaw, AsRaw};

/// Magic bytes opening every genuine descriptor.
pub const SIGNATURE: [u8; 8] = *b"APDesc00";

/// The scan looks for the signature at every multiple of this stride.
const SCAN_STRIDE: usize = 8;

/// The checksum consumes the image as a sequence of words of this size.
const WORD_SIZE: usize = 4;

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_WE);

/// Incremental whole-image checksum accumulator.
pub struct ImageCrc(crc::Digest<'static, u64>);

impl ImageCrc {
    pub fn new() -> ImageCrc {
        ImageCrc(CRC64.digest())
    }

    pub fn add(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn get(self) -> u64 {
        self.0.finalize()
    }
}

impl Default for ImageCrc {
    fn default() -> Self {
        ImageCrc::new()
    }
}

/// The descriptor as it sits in the image.  Bit-exact with what the image
/// build tooling writes; 28 bytes, no implicit padding.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppDescriptor {
    pub signature: [u8; 8],
    pub app_info: AppInfo,
}

/// The informational part of the descriptor, also exposed to callers through
/// [`crate::Bootloader::app_info`].
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppInfo {
    /// Total image size in bytes.  Must be a non-zero multiple of the
    /// checksum word size and fit within the storage region.
    pub image_size: u32,
    /// Checksum over the whole image, stored as two consecutive words which
    /// are themselves treated as zero during recomputation.
    image_crc: [u32; 2],
    pub major_version: u8,
    pub minor_version: u8,
    reserved: [u8; 2],
    /// Build-identifying VCS commit, informational only.
    pub vcs_commit: u32,
}

impl AsRaw for AppDescriptor {}
unsafe impl AsMutRaw for AppDescriptor {}

impl AppInfo {
    pub fn image_crc(&self) -> u64 {
        (self.image_crc[1] as u64) << 32 | self.image_crc[0] as u64
    }

    pub fn set_image_crc(&mut self, crc: u64) {
        self.image_crc = [crc as u32, (crc >> 32) as u32];
    }
}

impl AppDescriptor {
    /// Byte offset of the checksum field from the start of the descriptor.
    pub const CRC_FIELD_OFFSET: usize = 12;

    /// A descriptor with a zeroed checksum field, as the build tooling first
    /// lays it into an image before computing the checksum.
    pub fn new(image_size: u32, major_version: u8, minor_version: u8, vcs_commit: u32) -> AppDescriptor {
        AppDescriptor {
            signature: SIGNATURE,
            app_info: AppInfo {
                image_size,
                image_crc: [0; 2],
                major_version,
                minor_version,
                reserved: [0; 2],
                vcs_commit,
            },
        }
    }

    /// Field-level sanity checks, everything short of the checksum.
    pub fn is_structurally_valid(&self, capacity: usize) -> bool {
        let size = self.app_info.image_size as usize;
        self.signature == SIGNATURE && size != 0 && size % WORD_SIZE == 0 && size <= capacity
    }
}

/// Scan the storage region for a valid application descriptor.
///
/// Returns the first candidate that passes the signature, structural and
/// checksum checks, or `None` once the region is exhausted.  Never fails:
/// read errors are treated as the end of accessible storage.
pub fn locate_app_descriptor<B: AppStorage>(backend: &mut B) -> Option<AppDescriptor> {
    let capacity = backend.capacity();
    let mut offset = 0;

    loop {
        // Read the storage in 8 byte increments until the signature turns up.
        let mut signature = [0u8; SIGNATURE.len()];
        match backend.read(offset, &mut signature) {
            Ok(n) if n == signature.len() => {}
            _ => return None,
        }
        if signature != SIGNATURE {
            offset += SCAN_STRIDE;
            continue;
        }

        // Read the entire descriptor.
        let mut desc = AppDescriptor::default();
        match backend.read(offset, desc.as_mut_raw()) {
            Ok(n) if n == size_of::<AppDescriptor>() => {}
            _ => return None,
        }
        if !desc.is_structurally_valid(capacity) {
            debug!("descriptor candidate at {:#x} fails structural checks", offset);
            offset += SCAN_STRIDE;
            continue;
        }

        // Check the firmware checksum.
        if !image_crc_matches(backend, offset, &desc) {
            debug!("app descriptor found at {:#x}, but crc is invalid", offset);
            offset += SCAN_STRIDE;
            continue;
        }

        debug!("app descriptor located at offset {:#x}", offset);
        return Some(desc);
    }
}

/// Recompute the whole-image checksum and compare it to the stored one.
fn image_crc_matches<B: AppStorage>(backend: &mut B, desc_offset: usize, desc: &AppDescriptor) -> bool {
    let crc_offset_in_words = (desc_offset + AppDescriptor::CRC_FIELD_OFFSET) / WORD_SIZE;
    let image_size_in_words = desc.app_info.image_size as usize / WORD_SIZE;

    let mut crc = ImageCrc::new();
    for i in 0..image_size_in_words {
        let mut word = [0u8; WORD_SIZE];
        if i == crc_offset_in_words || i == crc_offset_in_words + 1 {
            // The checksum's own storage reads as zero.
            crc.add(&word);
            continue;
        }
        match backend.read(i * WORD_SIZE, &mut word) {
            Ok(n) if n == WORD_SIZE => crc.add(&word),
            // A word that cannot be read contributes nothing to the sum.
            // Historical behavior, kept bit-compatible with existing image
            // tooling.
            _ => {}
        }
    }

    crc.get() == desc.app_info.image_crc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_bit_exact() {
        assert_eq!(size_of::<AppDescriptor>(), 28);
        assert_eq!(size_of::<AppInfo>(), 20);

        let desc = AppDescriptor::new(4096, 1, 2, 3);
        let base = &desc as *const AppDescriptor as usize;
        let crc = &desc.app_info.image_crc as *const _ as usize;
        assert_eq!(crc - base, AppDescriptor::CRC_FIELD_OFFSET);
        assert_eq!(&desc.as_raw()[..8], &SIGNATURE[..]);
    }

    #[test]
    fn crc_check_value() {
        // CRC-64/WE check value from the catalog.
        let mut crc = ImageCrc::new();
        crc.add(b"123456789");
        assert_eq!(crc.get(), 0x62ec59e3f1a4f00a);
    }

    #[test]
    fn crc_field_round_trip() {
        let mut desc = AppDescriptor::new(4096, 1, 2, 3);
        desc.app_info.set_image_crc(0x0123456789abcdef);
        assert_eq!(desc.app_info.image_crc(), 0x0123456789abcdef);
    }

    #[test]
    fn structural_bounds() {
        let capacity = 64 * 1024;
        assert!(AppDescriptor::new(4096, 0, 0, 0).is_structurally_valid(capacity));
        assert!(!AppDescriptor::new(0, 0, 0, 0).is_structurally_valid(capacity));
        assert!(!AppDescriptor::new(4098, 0, 0, 0).is_structurally_valid(capacity));
        assert!(!AppDescriptor::new(capacity as u32 + 4, 0, 0, 0).is_structurally_valid(capacity));

        let mut desc = AppDescriptor::new(4096, 0, 0, 0);
        desc.signature[0] ^= 0xff;
        assert!(!desc.is_structurally_valid(capacity));
    }
}
