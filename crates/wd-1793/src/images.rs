//! Disk image loaders.
//!
//! Every format parses into the same [`FloppyDisk`] track store, so the
//! controller never knows where a disk came from. Dispatch is by a
//! detected [`ImageKind`] tag — extension first, then signature checks.
//!
//! Guest-visible defects (bad sector CRCs) do not fail the load; the
//! affected sectors are written with a corrupted CRC so the controller
//! reports CRC_ERROR when the guest touches them. Host-visible defects
//! (truncated files, bad signatures) fail with [`ImageError`] carrying
//! the offending offset.

pub mod fdi;
pub mod hob;
pub mod isd;
pub mod pro;
pub mod scl;
pub mod td0;
pub mod trd;
pub mod udi;

use thiserror::Error;

use crate::disk::{FloppyDisk, ImageKind};

/// Loader failure, reported to the host.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid {kind:?} image at offset {offset:#x}: {reason}")]
    InvalidFormat {
        kind: ImageKind,
        offset: usize,
        reason: String,
    },
    #[error("unsupported {kind:?} image: {reason}")]
    Unsupported { kind: ImageKind, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ImageError {
    pub(crate) fn invalid(kind: ImageKind, offset: usize, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            kind,
            offset,
            reason: reason.into(),
        }
    }
}

/// Detect the image format from a file extension and the data itself.
#[must_use]
pub fn detect(ext: &str, data: &[u8]) -> Option<ImageKind> {
    // Signatures are authoritative where they exist.
    if data.starts_with(b"SINCLAIR") {
        return Some(ImageKind::Scl);
    }
    if data.starts_with(b"FDI") {
        return Some(ImageKind::Fdi);
    }
    if data.starts_with(b"UDI!") {
        return Some(ImageKind::Udi);
    }
    if (data.starts_with(b"TD") || data.starts_with(b"td")) && ext.eq_ignore_ascii_case("td0") {
        return Some(ImageKind::Td0);
    }
    match ext.to_ascii_lowercase().as_str() {
        "trd" => Some(ImageKind::Trd),
        "scl" => Some(ImageKind::Scl),
        "fdi" => Some(ImageKind::Fdi),
        "td0" => Some(ImageKind::Td0),
        "udi" => Some(ImageKind::Udi),
        "isd" => Some(ImageKind::Isd),
        "pro" => Some(ImageKind::Pro),
        "hob" | "$b" | "$c" | "$d" | "$#" => Some(ImageKind::Hob),
        _ => None,
    }
}

/// Parse a disk image of the given kind into a track store.
///
/// `interleave` selects the physical sector order used when the format
/// has to synthesise track layouts (TRD and the TRD-building formats).
///
/// # Errors
///
/// [`ImageError::InvalidFormat`] on malformed input (no partial state is
/// produced), [`ImageError::Unsupported`] for recognised-but-unsupported
/// variants such as LZH-compressed TD0.
pub fn load_image(kind: ImageKind, data: &[u8], interleave: u8) -> Result<FloppyDisk, ImageError> {
    match kind {
        ImageKind::Trd => trd::load(data, interleave),
        ImageKind::Scl => scl::load(data, interleave),
        ImageKind::Hob => hob::load(data, interleave),
        ImageKind::Fdi => fdi::load(data),
        ImageKind::Td0 => td0::load(data),
        ImageKind::Udi => udi::load(data),
        ImageKind::Isd => isd::load(data, interleave),
        ImageKind::Pro => pro::load(data),
    }
}

/// Physical sector order for a 16-sector track at the given interleave
/// setting: 0 = sequential, 1 = 2:1 (classic TR-DOS), 2 = 3:1.
#[must_use]
pub fn sector_order(interleave: u8, count: usize) -> Vec<u8> {
    let step = match interleave {
        1 => 2,
        2 => 3,
        _ => 1,
    };
    let mut order = vec![0u8; count];
    let mut filled = vec![false; count];
    let mut pos = 0usize;
    for sector in 1..=count as u8 {
        while filled[pos] {
            pos = (pos + 1) % count;
        }
        order[pos] = sector;
        filled[pos] = true;
        pos = (pos + step) % count;
    }
    order
}
