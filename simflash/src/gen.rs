//! Application image generation.
//!
//! The counterpart of the build tooling that embeds a descriptor into a
//! firmware image at link time.  The payload is seeded PRNG noise; the
//! descriptor goes in at a chosen offset and the whole-image checksum is
//! computed exactly the way the bootloader verifies it, with the checksum's
//! own words treated as zero.

use anyhow::{bail, Result};
use boot::raw::AsRaw;
use boot::{AppDescriptor, ImageCrc};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub struct GeneratedImage {
    pub data: Vec<u8>,
    /// Byte offset of the descriptor within `data`.
    pub descriptor_offset: usize,
}

pub struct ImageBuilder {
    /// Total size of the image in bytes.
    size: usize,
    /// Where the descriptor is embedded.  Must be scan-stride aligned.
    descriptor_offset: usize,
    /// Seed for the payload PRNG.
    seed: u64,
    major_version: u8,
    minor_version: u8,
    vcs_commit: u32,
    patches: Vec<(usize, Vec<u8>)>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        ImageBuilder {
            size: 8192,
            descriptor_offset: 128,
            seed: 1,
            major_version: 1,
            minor_version: 0,
            vcs_commit: 0xdeadbeef,
            patches: Vec::new(),
        }
    }
}

impl ImageBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn descriptor_offset(&mut self, offset: usize) -> &mut Self {
        self.descriptor_offset = offset;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn version(&mut self, major: u8, minor: u8) -> &mut Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn vcs_commit(&mut self, commit: u32) -> &mut Self {
        self.vcs_commit = commit;
        self
    }

    /// Overwrite payload bytes before the checksum is computed.  Lets tests
    /// plant signature collisions and other debris inside the image.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> &mut Self {
        self.patches.push((offset, bytes.to_vec()));
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        let desc_len = core::mem::size_of::<AppDescriptor>();
        if self.size % 4 != 0 {
            bail!("image size must be a multiple of the checksum word size");
        }
        if self.descriptor_offset % 8 != 0 {
            bail!("descriptor offset must be 8-byte aligned");
        }
        if self.descriptor_offset + desc_len > self.size {
            bail!("descriptor does not fit in the image");
        }

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let mut data = vec![0u8; self.size];
        rng.fill_bytes(&mut data);

        for (offset, bytes) in &self.patches {
            if offset + bytes.len() > data.len() {
                bail!("patch runs past the end of the image");
            }
            data[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }

        // The descriptor goes in with a zeroed checksum field first; the
        // checksum over the whole image is then written back into it.
        let mut desc = AppDescriptor::new(
            self.size as u32,
            self.major_version,
            self.minor_version,
            self.vcs_commit,
        );
        data[self.descriptor_offset..self.descriptor_offset + desc_len].copy_from_slice(desc.as_raw());

        let crc = image_crc(&data, self.descriptor_offset);
        desc.app_info.set_image_crc(crc);
        data[self.descriptor_offset..self.descriptor_offset + desc_len].copy_from_slice(desc.as_raw());

        Ok(GeneratedImage {
            data,
            descriptor_offset: self.descriptor_offset,
        })
    }
}

/// Checksum of a complete in-memory image, with the two words holding the
/// descriptor's checksum field fed in as zero.
pub fn image_crc(data: &[u8], descriptor_offset: usize) -> u64 {
    let crc_word = (descriptor_offset + AppDescriptor::CRC_FIELD_OFFSET) / 4;
    let mut crc = ImageCrc::new();
    for (i, word) in data.chunks_exact(4).enumerate() {
        if i == crc_word || i == crc_word + 1 {
            crc.add(&[0; 4]);
        } else {
            crc.add(word);
        }
    }
    crc.get()
}
