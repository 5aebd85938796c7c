// Descriptor location and verification against simulated storage.

use boot::raw::AsRaw;
use boot::{locate_app_descriptor, AppDescriptor, Bootloader, ImageCrc, State};
use simflash::gen::ImageBuilder;
use simflash::{SimFlash, TestClock};

const CAPACITY: usize = 64 * 1024;
const DELAY_MS: u64 = 500;

#[test]
fn empty_region_has_no_app() {
    let mut flash = SimFlash::new(CAPACITY);
    assert_eq!(locate_app_descriptor(&mut flash), None);

    let clock = TestClock::new();
    let boot = Bootloader::new(&mut flash, &clock, DELAY_MS);
    assert_eq!(boot.state(), State::NoAppToBoot);
    assert!(boot.app_info().is_none());
}

#[test]
fn valid_image_is_found() {
    let img = ImageBuilder::default().build().unwrap();
    let mut flash = SimFlash::new(CAPACITY);
    flash.install(&img.data, 0).unwrap();

    let desc = locate_app_descriptor(&mut flash).expect("descriptor");
    assert_eq!(desc.app_info.image_size as usize, img.data.len());
    assert_eq!(desc.app_info.major_version, 1);
    assert_eq!(desc.app_info.minor_version, 0);
    assert_eq!(desc.app_info.vcs_commit, 0xdeadbeef);

    let clock = TestClock::new();
    let boot = Bootloader::new(&mut flash, &clock, DELAY_MS);
    assert_eq!(boot.state(), State::BootDelay);
    assert_eq!(boot.app_info().unwrap(), desc.app_info);
}

#[test]
fn payload_bit_flip_rejects_image() {
    let img = ImageBuilder::default().build().unwrap();

    // Corruption sites spread over the payload, away from the descriptor's
    // checksum words.
    for &(offset, bit) in &[(0usize, 0u8), (500, 3), (8191, 7)] {
        let mut data = img.data.clone();
        data[offset] ^= 1 << bit;

        let mut flash = SimFlash::new(CAPACITY);
        flash.install(&data, 0).unwrap();
        assert_eq!(locate_app_descriptor(&mut flash), None, "flip at {offset}:{bit}");
    }
}

#[test]
fn checksum_words_do_not_feed_the_sum() {
    // The stored checksum bytes are not zero, yet verification succeeds, so
    // the recomputation must be substituting zero for those two words.
    let img = ImageBuilder::default().build().unwrap();
    let crc_field = img.descriptor_offset + AppDescriptor::CRC_FIELD_OFFSET;
    assert!(img.data[crc_field..crc_field + 8].iter().any(|&b| b != 0));

    let mut flash = SimFlash::new(CAPACITY);
    flash.install(&img.data, 0).unwrap();
    assert!(locate_app_descriptor(&mut flash).is_some());
}

#[test]
fn structurally_invalid_candidate_does_not_stop_the_scan() {
    // A signature collision with a zero size field is a false positive; the
    // genuine descriptor further along must still be found.
    let fake = AppDescriptor::new(0, 0, 0, 0);
    let img = ImageBuilder::default()
        .descriptor_offset(512)
        .patch(64, fake.as_raw())
        .build()
        .unwrap();

    let mut flash = SimFlash::new(CAPACITY);
    flash.install(&img.data, 0).unwrap();

    let desc = locate_app_descriptor(&mut flash).expect("real descriptor");
    assert_eq!(desc.app_info.vcs_commit, 0xdeadbeef);
}

#[test]
fn checksum_mismatch_candidate_does_not_stop_the_scan() {
    // A structurally plausible descriptor whose checksum does not match the
    // image is skipped, not fatal.
    let fake = AppDescriptor::new(8192, 9, 9, 1);
    let img = ImageBuilder::default()
        .descriptor_offset(512)
        .patch(64, fake.as_raw())
        .build()
        .unwrap();

    let mut flash = SimFlash::new(CAPACITY);
    flash.install(&img.data, 0).unwrap();

    let desc = locate_app_descriptor(&mut flash).expect("real descriptor");
    assert_eq!(desc.app_info.major_version, 1);
    assert_eq!(desc.app_info.vcs_commit, 0xdeadbeef);
}

#[test]
fn unreadable_word_is_left_out_of_the_sum() {
    // A word that cannot be read contributes nothing to the recomputed
    // checksum.  An image whose stored checksum was computed without word
    // 256 verifies only on a device where word 256 is unreadable.
    let img = ImageBuilder::default().build().unwrap();
    let crc_word = (img.descriptor_offset + AppDescriptor::CRC_FIELD_OFFSET) / 4;

    let mut crc = ImageCrc::new();
    for (i, word) in img.data.chunks_exact(4).enumerate() {
        if i == crc_word || i == crc_word + 1 {
            crc.add(&[0; 4]);
        } else if i == 256 {
            // Left out entirely.
        } else {
            crc.add(word);
        }
    }

    // Same descriptor as the builder's, with the short checksum stored.
    let mut desc = AppDescriptor::new(img.data.len() as u32, 1, 0, 0xdeadbeef);
    desc.app_info.set_image_crc(crc.get());
    let desc_len = core::mem::size_of::<AppDescriptor>();
    let mut data = img.data.clone();
    data[img.descriptor_offset..img.descriptor_offset + desc_len].copy_from_slice(desc.as_raw());

    let mut flash = SimFlash::new(CAPACITY);
    flash.install(&data, 0).unwrap();

    // Fully readable storage: word 256 is included and the sums disagree.
    assert_eq!(locate_app_descriptor(&mut flash), None);

    // Word 256 unreadable: its contribution drops out and the sums agree.
    flash.set_read_fault(1024..1028);
    assert!(locate_app_descriptor(&mut flash).is_some());
}

#[test]
fn scan_terminates_at_end_of_region() {
    // Signature-free garbage of an odd size: the scan must walk off the end
    // and stop, never reading past the region.
    for capacity in [100usize, 8 * 1024, CAPACITY] {
        let mut flash = SimFlash::new(capacity);
        let junk: Vec<u8> = (0..capacity).map(|i| (i * 31 % 251) as u8).collect();
        flash.install(&junk, 0).unwrap();

        assert_eq!(locate_app_descriptor(&mut flash), None);
        assert!(flash.read_high_water() <= capacity);
    }
}
