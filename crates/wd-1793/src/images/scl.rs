//! SCL — the "SINCLAIR" file-set format.
//!
//! An SCL file is a TR-DOS catalogue without the disk around it:
//! signature, file count, one 14-byte directory entry per file, then the
//! file bodies back to back (whole sectors each), then a 32-bit checksum
//! of everything before it. Loading means building an empty TRD and
//! adding each file to it.

use log::warn;

use crate::disk::{DiskFlags, FloppyDisk, ImageKind};
use crate::images::{trd, ImageError};

const SIGNATURE: &[u8] = b"SINCLAIR";

/// Parse an SCL file into a freshly built TR-DOS disk.
pub fn load(data: &[u8], interleave: u8) -> Result<FloppyDisk, ImageError> {
    if !data.starts_with(SIGNATURE) {
        return Err(ImageError::invalid(ImageKind::Scl, 0, "bad signature"));
    }
    if data.len() < SIGNATURE.len() + 1 {
        return Err(ImageError::invalid(
            ImageKind::Scl,
            data.len(),
            "truncated header",
        ));
    }

    let file_count = usize::from(data[8]);
    let dir_end = 9 + file_count * 14;
    if data.len() < dir_end {
        return Err(ImageError::invalid(
            ImageKind::Scl,
            data.len(),
            "truncated directory",
        ));
    }

    // Trailing checksum: 32-bit little-endian sum of all preceding bytes.
    if data.len() >= dir_end + 4 {
        let body_end = data.len() - 4;
        let sum: u32 = data[..body_end]
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
        let stored = u32::from_le_bytes(data[body_end..].try_into().expect("4 bytes"));
        if sum != stored {
            // Plenty of real-world SCLs carry a stale checksum; load anyway.
            warn!("scl: checksum mismatch (computed {sum:#010x}, stored {stored:#010x})");
        }
    }

    let mut disk = trd::empty_disk(interleave);
    let mut offset = dir_end;
    for index in 0..file_count {
        let entry_off = 9 + index * 14;
        let entry: [u8; 14] = data[entry_off..entry_off + 14]
            .try_into()
            .expect("bounds checked");
        let sectors = usize::from(entry[13]);
        let body = data.get(offset..offset + sectors * 256).ok_or_else(|| {
            ImageError::invalid(
                ImageKind::Scl,
                offset,
                format!("file {index} body truncated"),
            )
        })?;
        if !trd::add_file(&mut disk, &entry, body) {
            return Err(ImageError::invalid(
                ImageKind::Scl,
                entry_off,
                format!("file {index} does not fit on a TR-DOS disk"),
            ));
        }
        offset += sectors * 256;
    }

    disk.flags = DiskFlags::empty();
    disk.source = ImageKind::Scl;
    Ok(disk)
}
