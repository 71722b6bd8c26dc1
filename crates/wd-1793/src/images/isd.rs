//! ISD — iS-DOS raw disk dump.
//!
//! Structurally a linear sector dump like TRD (16 × 256-byte sectors per
//! track) but carrying an iS-DOS filesystem instead of a TR-DOS
//! catalogue, so there is no descriptor to read geometry from: it comes
//! from the file size alone.

use crate::disk::{FloppyDisk, ImageKind};
use crate::images::{trd, ImageError};

/// Parse an ISD image.
pub fn load(data: &[u8], interleave: u8) -> Result<FloppyDisk, ImageError> {
    let track_bytes = 16 * 256;
    if data.is_empty() || data.len() % track_bytes != 0 {
        return Err(ImageError::invalid(
            ImageKind::Isd,
            data.len(),
            "length is not a whole number of tracks",
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
            ImageKind::Isd,
            data.len(),
            "larger than any supported drive",
        ));
    }

    let mut disk = FloppyDisk::new(cyls, sides, ImageKind::Isd);
    trd::format_from_linear(&mut disk, data, interleave);
    disk.source = ImageKind::Isd;
    Ok(disk)
}
