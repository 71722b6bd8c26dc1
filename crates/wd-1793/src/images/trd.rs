//! TRD — raw TR-DOS disk dump.
//!
//! A TRD file is the logical sector contents in order: 16 × 256-byte
//! sectors per track, sides interleaved per cylinder. The disk
//! descriptor lives in sector 9 of track 0; byte 0xE3 holds the disk
//! type (0x16 = 80 cyls double-sided through 0x19 = 40 single-sided)
//! and byte 0xE7 the TR-DOS signature 0x10.
//!
//! This module also hosts the TRD catalogue builders SCL and Hobeta
//! loaders use to synthesise a disk around bare files.

use log::warn;

use crate::disk::{FloppyDisk, FormatSector, ImageKind};
use crate::images::{sector_order, ImageError};

/// Offset of the disk descriptor within the image (track 0, sector 9).
pub const DESCRIPTOR_OFFSET: usize = 8 * 256;

/// In-sector offsets of the descriptor fields.
pub const DESC_FIRST_FREE_SECTOR: usize = 0xE1;
pub const DESC_FIRST_FREE_TRACK: usize = 0xE2;
pub const DESC_DISK_TYPE: usize = 0xE3;
pub const DESC_FILE_COUNT: usize = 0xE4;
pub const DESC_FREE_SECTORS: usize = 0xE5;
pub const DESC_TRDOS_ID: usize = 0xE7;
pub const DESC_LABEL: usize = 0xF5;

/// The TR-DOS signature byte stored at `DESC_TRDOS_ID`.
pub const TRDOS_ID: u8 = 0x10;

/// Geometry for a TR-DOS disk type byte.
#[must_use]
pub fn geometry_for_type(disk_type: u8) -> Option<(usize, usize)> {
    match disk_type {
        0x16 => Some((80, 2)),
        0x17 => Some((40, 2)),
        0x18 => Some((80, 1)),
        0x19 => Some((40, 1)),
        _ => None,
    }
}

/// Parse a TRD image.
///
/// Geometry comes from the descriptor when it carries a valid TR-DOS
/// signature, otherwise from the file size. Oversized or misaligned
/// files are rejected.
pub fn load(data: &[u8], interleave: u8) -> Result<FloppyDisk, ImageError> {
    if data.len() < DESCRIPTOR_OFFSET + 256 {
        return Err(ImageError::invalid(
            ImageKind::Trd,
            data.len(),
            "file smaller than the system track",
        ));
    }
    if data.len() % 256 != 0 {
        return Err(ImageError::invalid(
            ImageKind::Trd,
            data.len(),
            "length is not a whole number of sectors",
        ));
    }
    if data.len() > 86 * 2 * 16 * 256 {
        return Err(ImageError::invalid(
            ImageKind::Trd,
            data.len(),
            "larger than any supported drive",
        ));
    }

    let descriptor = &data[DESCRIPTOR_OFFSET..DESCRIPTOR_OFFSET + 256];
    let (cyls, sides) = match geometry_for_type(descriptor[DESC_DISK_TYPE]) {
        Some(geometry) if descriptor[DESC_TRDOS_ID] == TRDOS_ID => geometry,
        _ => {
            warn!("trd: no valid descriptor, deriving geometry from size");
            match data.len() {
                0x0002_8000 => (40, 1),             // 160 KiB
                0x0005_0000 => (80, 1),             // 320 KiB single-sided
                0x000A_0000 => (80, 2),             // 640 KiB
                n => (n.div_ceil(2 * 16 * 256).max(1), 2),
            }
        }
    };

    let mut disk = FloppyDisk::new(cyls, sides, ImageKind::Trd);
    format_from_linear(&mut disk, data, interleave);
    Ok(disk)
}

/// Format every track of `disk` from a linear TRD byte layout.
pub(crate) fn format_from_linear(disk: &mut FloppyDisk, data: &[u8], interleave: u8) {
    let order = sector_order(interleave, 16);
    let empty = [0u8; 256];
    for cyl in 0..disk.cyls() {
        for side in 0..disk.sides() {
            let track_base = (cyl * disk.sides() + side) * 16 * 256;
            let sectors: Vec<FormatSector<'_>> = order
                .iter()
                .map(|&number| {
                    let offset = track_base + (usize::from(number) - 1) * 256;
                    let payload = data
                        .get(offset..offset + 256)
                        .unwrap_or(&empty);
                    FormatSector {
                        cyl: cyl as u8,
                        head: 0,
                        sector: number,
                        size_code: 1,
                        data: payload,
                        bad_crc: false,
                    }
                })
                .collect();
            disk.format_track(cyl, side, &sectors);
        }
    }
}

/// Build an empty formatted TR-DOS disk: blank catalogue, valid
/// descriptor, every data sector zeroed.
#[must_use]
pub fn empty_disk(interleave: u8) -> FloppyDisk {
    let (cyls, sides) = (80, 2);
    let mut linear = vec![0u8; cyls * sides * 16 * 256];
    let desc = &mut linear[DESCRIPTOR_OFFSET..DESCRIPTOR_OFFSET + 256];
    desc[DESC_FIRST_FREE_SECTOR] = 0;
    desc[DESC_FIRST_FREE_TRACK] = 1;
    desc[DESC_DISK_TYPE] = 0x16;
    let free = ((cyls * sides - 1) * 16) as u16;
    desc[DESC_FREE_SECTORS] = free as u8;
    desc[DESC_FREE_SECTORS + 1] = (free >> 8) as u8;
    desc[DESC_TRDOS_ID] = TRDOS_ID;
    desc[DESC_LABEL..DESC_LABEL + 8].copy_from_slice(b"        ");

    let mut disk = FloppyDisk::new(cyls, sides, ImageKind::Trd);
    format_from_linear(&mut disk, &linear, interleave);
    disk
}

/// Append a file to a TR-DOS disk: 14-byte directory entry (name, type,
/// start, length, sector count) plus the data, stored at the next free
/// position recorded in the descriptor.
///
/// Returns false when the catalogue or the data area is full.
pub fn add_file(disk: &mut FloppyDisk, entry: &[u8; 14], data: &[u8]) -> bool {
    let Some(mut descriptor) = disk.read_sector(0, 0, 9) else {
        return false;
    };
    let file_count = descriptor[DESC_FILE_COUNT] as usize;
    let free_sectors =
        u16::from_le_bytes([descriptor[DESC_FREE_SECTORS], descriptor[DESC_FREE_SECTORS + 1]]);
    let sectors_needed = usize::from(entry[13]).max(data.len().div_ceil(256));
    if file_count >= 128 || usize::from(free_sectors) < sectors_needed {
        return false;
    }

    let mut start_sector = descriptor[DESC_FIRST_FREE_SECTOR] as usize;
    let mut start_track = descriptor[DESC_FIRST_FREE_TRACK] as usize;

    // Directory entry: 16 per catalogue sector, 16 bytes each.
    let cat_sector = 1 + (file_count / 16) as u8;
    let Some(mut catalogue) = disk.read_sector(0, 0, cat_sector) else {
        return false;
    };
    let slot = (file_count % 16) * 16;
    catalogue[slot..slot + 14].copy_from_slice(entry);
    catalogue[slot + 14] = start_sector as u8;
    catalogue[slot + 15] = start_track as u8;
    disk.write_sector(0, 0, cat_sector, &catalogue);

    // File data, sector by sector from the free pointer.
    for chunk in data.chunks(256).chain(
        // Pad with blank sectors when the entry claims more than the data.
        std::iter::repeat_n(
            &[][..],
            sectors_needed.saturating_sub(data.len().div_ceil(256)),
        ),
    ) {
        let mut sector = [0u8; 256];
        sector[..chunk.len()].copy_from_slice(chunk);
        let sides = disk.sides();
        let cyl = start_track / sides;
        let side = start_track % sides;
        if cyl >= disk.cyls() {
            return false;
        }
        disk.write_sector(cyl, side, start_sector as u8 + 1, &sector);
        start_sector += 1;
        if start_sector == 16 {
            start_sector = 0;
            start_track += 1;
        }
    }

    descriptor[DESC_FILE_COUNT] = (file_count + 1) as u8;
    descriptor[DESC_FIRST_FREE_SECTOR] = start_sector as u8;
    descriptor[DESC_FIRST_FREE_TRACK] = start_track as u8;
    let free = free_sectors - sectors_needed as u16;
    descriptor[DESC_FREE_SECTORS] = free as u8;
    descriptor[DESC_FREE_SECTORS + 1] = (free >> 8) as u8;
    disk.write_sector(0, 0, 9, &descriptor);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskFlags;

    /// Minimal valid 640 KiB TRD image with a descriptor.
    pub(crate) fn blank_trd_image() -> Vec<u8> {
        let mut data = vec![0u8; 80 * 2 * 16 * 256];
        data[DESCRIPTOR_OFFSET + DESC_DISK_TYPE] = 0x16;
        data[DESCRIPTOR_OFFSET + DESC_TRDOS_ID] = TRDOS_ID;
        data[DESCRIPTOR_OFFSET + DESC_FIRST_FREE_TRACK] = 1;
        let free = (159 * 16u16).to_le_bytes();
        data[DESCRIPTOR_OFFSET + DESC_FREE_SECTORS] = free[0];
        data[DESCRIPTOR_OFFSET + DESC_FREE_SECTORS + 1] = free[1];
        data
    }

    #[test]
    fn geometry_from_descriptor() {
        let data = blank_trd_image();
        let disk = load(&data, 1).expect("valid TRD");
        assert_eq!(disk.cyls(), 80);
        assert_eq!(disk.sides(), 2);
    }

    #[test]
    fn descriptor_reads_back() {
        let data = blank_trd_image();
        let disk = load(&data, 1).expect("valid TRD");
        let desc = disk.read_sector(0, 0, 9).expect("descriptor sector");
        assert_eq!(desc[DESC_DISK_TYPE], 0x16);
        assert_eq!(desc[DESC_TRDOS_ID], TRDOS_ID);
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let mut data = blank_trd_image();
        // Scatter recognisable bytes over several tracks and both sides.
        data[0] = 0x01;
        data[16 * 256 + 3] = 0x77; // track 0 side 1
        data[79 * 2 * 16 * 256 + 100] = 0xAB; // last cylinder
        for (i, byte) in data.iter_mut().enumerate().skip(0x9000).take(64) {
            *byte = (i & 0xFF) as u8;
        }

        for interleave in 0..3u8 {
            let disk = load(&data, interleave).expect("valid TRD");
            assert_eq!(
                disk.to_trd(),
                data,
                "round trip at interleave {interleave}"
            );
        }
    }

    #[test]
    fn misaligned_length_rejected() {
        let data = vec![0u8; DESCRIPTOR_OFFSET + 300];
        assert!(load(&data, 0).is_err());
    }

    #[test]
    fn truncated_file_rejected() {
        assert!(load(&[0u8; 100], 0).is_err());
    }

    #[test]
    fn empty_disk_has_valid_catalogue() {
        let disk = empty_disk(1);
        let desc = disk.read_sector(0, 0, 9).unwrap();
        assert_eq!(desc[DESC_DISK_TYPE], 0x16);
        assert_eq!(desc[DESC_TRDOS_ID], TRDOS_ID);
        assert_eq!(desc[DESC_FILE_COUNT], 0);
        assert_eq!(desc[DESC_FIRST_FREE_TRACK], 1);
    }

    #[test]
    fn add_file_updates_catalogue_and_data() {
        let mut disk = empty_disk(1);
        let mut entry = [0u8; 14];
        entry[..8].copy_from_slice(b"game    ");
        entry[8] = b'C';
        entry[13] = 2; // two sectors
        let payload: Vec<u8> = (0..512u16).map(|i| i as u8).collect();

        assert!(add_file(&mut disk, &entry, &payload));

        let desc = disk.read_sector(0, 0, 9).unwrap();
        assert_eq!(desc[DESC_FILE_COUNT], 1);
        assert_eq!(desc[DESC_FIRST_FREE_SECTOR], 2);
        assert_eq!(desc[DESC_FIRST_FREE_TRACK], 1);

        let catalogue = disk.read_sector(0, 0, 1).unwrap();
        assert_eq!(&catalogue[..8], b"game    ");
        assert_eq!(catalogue[14], 0, "start sector");
        assert_eq!(catalogue[15], 1, "start track");

        // Track 1 = cylinder 0, side 1 on a double-sided disk.
        let first = disk.read_sector(0, 1, 1).unwrap();
        assert_eq!(first[0], 0);
        assert_eq!(first[255], 255);
        assert!(disk.flags.contains(DiskFlags::SECTOR_DIRTY));
    }
}
