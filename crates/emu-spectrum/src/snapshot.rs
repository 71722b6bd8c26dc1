//! Snapshot format dispatch.
//!
//! The three formats identify themselves differently: SNA by exact file
//! size, Z80 by extension (its header has no signature), SP by signature
//! plus an internal size check. Loading restores CPU state and memory
//! banks directly — the tape and disk engines are bypassed entirely.

use crate::error::SnapshotError;
use crate::sna::{self, SNA_128K_BIG_SIZE, SNA_128K_SIZE, SNA_48K_SIZE};
use crate::sp;
use crate::spectrum::Spectrum;
use crate::z80_file;

/// Recognised snapshot container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Sna,
    Z80,
    Sp,
}

/// Identify a snapshot from its extension and content.
#[must_use]
pub fn detect(ext: &str, data: &[u8]) -> Option<SnapshotKind> {
    if matches!(data.len(), SNA_48K_SIZE | SNA_128K_SIZE | SNA_128K_BIG_SIZE) {
        return Some(SnapshotKind::Sna);
    }
    if sp::matches(data) {
        return Some(SnapshotKind::Sp);
    }
    match ext.to_ascii_lowercase().as_str() {
        "z80" => Some(SnapshotKind::Z80),
        "sna" => Some(SnapshotKind::Sna),
        "sp" => Some(SnapshotKind::Sp),
        _ => None,
    }
}

/// Load a snapshot of a known kind.
///
/// # Errors
///
/// The underlying loader's `SnapshotError`.
pub fn load_snapshot(
    spectrum: &mut Spectrum,
    kind: SnapshotKind,
    data: &[u8],
) -> Result<(), SnapshotError> {
    match kind {
        SnapshotKind::Sna => sna::load_sna(spectrum, data),
        SnapshotKind::Z80 => z80_file::load_z80(spectrum, data),
        SnapshotKind::Sp => sp::load_sp(spectrum, data),
    }
}

/// Detect and load in one step.
///
/// # Errors
///
/// `SnapshotError::UnknownFormat` when nothing matches, otherwise the
/// loader's error.
pub fn load_any(spectrum: &mut Spectrum, ext: &str, data: &[u8]) -> Result<(), SnapshotError> {
    let kind = detect(ext, data).ok_or_else(|| {
        SnapshotError::UnknownFormat(format!("extension '{ext}', {} bytes", data.len()))
    })?;
    load_snapshot(spectrum, kind, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sna_detected_by_exact_size() {
        assert_eq!(detect("bin", &vec![0u8; SNA_48K_SIZE]), Some(SnapshotKind::Sna));
        assert_eq!(detect("bin", &vec![0u8; SNA_128K_SIZE]), Some(SnapshotKind::Sna));
        assert_eq!(
            detect("bin", &vec![0u8; SNA_128K_BIG_SIZE]),
            Some(SnapshotKind::Sna)
        );
        assert_eq!(detect("bin", &vec![0u8; 1234]), None);
    }

    #[test]
    fn z80_detected_by_extension() {
        assert_eq!(detect("z80", &[0u8; 100]), Some(SnapshotKind::Z80));
        assert_eq!(detect("Z80", &[0u8; 100]), Some(SnapshotKind::Z80));
    }

    #[test]
    fn sp_detected_by_signature_and_size() {
        let mut data = vec![0u8; 40];
        data[0] = b'S';
        data[1] = b'P';
        data[2] = 2; // 38 + 2 == 40
        assert_eq!(detect("bin", &data), Some(SnapshotKind::Sp));
        data[2] = 7; // inconsistent
        assert_eq!(detect("bin", &data), None);
    }
}
