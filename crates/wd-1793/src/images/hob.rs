//! Hobeta — a single TR-DOS file with a 17-byte header.
//!
//! Header layout: 8-byte name, type byte, start and length words, a
//! reserved byte, the sector count, and a 16-bit checksum over the first
//! 15 bytes (`sum(b[i] * 257 + i)`). The loader drops the file onto a
//! freshly formatted TRD at the first free position.

use crate::disk::{DiskFlags, FloppyDisk, ImageKind};
use crate::images::{trd, ImageError};

pub const HEADER_LEN: usize = 17;

/// Hobeta header checksum over the first 15 bytes.
#[must_use]
pub fn checksum(header: &[u8]) -> u16 {
    header[..15]
        .iter()
        .enumerate()
        .fold(0u16, |acc, (i, &b)| {
            acc.wrapping_add(u16::from(b).wrapping_mul(257).wrapping_add(i as u16))
        })
}

/// Parse a Hobeta file into a freshly built TR-DOS disk.
pub fn load(data: &[u8], interleave: u8) -> Result<FloppyDisk, ImageError> {
    if data.len() < HEADER_LEN {
        return Err(ImageError::invalid(
            ImageKind::Hob,
            data.len(),
            "file smaller than the header",
        ));
    }
    let stored = u16::from_le_bytes([data[15], data[16]]);
    if checksum(data) != stored {
        return Err(ImageError::invalid(ImageKind::Hob, 15, "header checksum mismatch"));
    }

    let mut entry = [0u8; 14];
    entry.copy_from_slice(&data[..14]);
    let sectors = usize::from(data[14]).max(
        usize::from(u16::from_le_bytes([data[11], data[12]])).div_ceil(256),
    );
    entry[13] = sectors.min(255) as u8;

    let body = &data[HEADER_LEN..];
    if body.len() > sectors * 256 {
        return Err(ImageError::invalid(
            ImageKind::Hob,
            HEADER_LEN,
            "body longer than the declared sector count",
        ));
    }

    let mut disk = trd::empty_disk(interleave);
    if !trd::add_file(&mut disk, &entry, body) {
        return Err(ImageError::invalid(ImageKind::Hob, 0, "file does not fit"));
    }
    disk.flags = DiskFlags::empty();
    disk.source = ImageKind::Hob;
    Ok(disk)
}
