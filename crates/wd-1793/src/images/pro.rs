//! PRO — Profi CP/M disk dump.
//!
//! Profi machines run CP/M on the same WD1793 with 1024-byte sectors,
//! five per track (sector numbers 1-5, size code 3). The image is a
//! linear dump in the same cylinder-major order as TRD.

use crate::disk::{FloppyDisk, FormatSector, ImageKind};
use crate::images::ImageError;

const SECTORS_PER_TRACK: usize = 5;
const SECTOR_SIZE: usize = 1024;

/// Parse a PRO image.
pub fn load(data: &[u8]) -> Result<FloppyDisk, ImageError> {
    let track_bytes = SECTORS_PER_TRACK * SECTOR_SIZE;
    if data.is_empty() || data.len() % track_bytes != 0 {
        return Err(ImageError::invalid(
            ImageKind::Pro,
            data.len(),
            "length is not a whole number of 5120-byte tracks",
        ));
    }
    let total_tracks = data.len() / track_bytes;
    let (cyls, sides) = if total_tracks % 2 == 0 && total_tracks > 40 {
        (total_tracks / 2, 2)
    } else {
        (total_tracks, 1)
    };
    if cyls > 86 {
        return Err(ImageError::invalid(
            ImageKind::Pro,
            data.len(),
            "larger than any supported drive",
        ));
    }

    let mut disk = FloppyDisk::new(cyls, sides, ImageKind::Pro);
    for cyl in 0..cyls {
        for side in 0..sides {
            let base = (cyl * sides + side) * track_bytes;
            let sectors: Vec<FormatSector<'_>> = (0..SECTORS_PER_TRACK)
                .map(|i| FormatSector {
                    cyl: cyl as u8,
                    head: 0,
                    sector: (i + 1) as u8,
                    size_code: 3,
                    data: &data[base + i * SECTOR_SIZE..base + (i + 1) * SECTOR_SIZE],
                    bad_crc: false,
                })
                .collect();
            disk.format_track(cyl, side, &sectors);
        }
    }
    Ok(disk)
}
