//! UDI — Ultra Disk Image, a raw MFM stream dump.
//!
//! The only format here that stores tracks exactly the way the track
//! store holds them: raw bytes plus a clock-mark bitmap. Layout:
//!
//! ```text
//! 0x00  "UDI!"
//! 0x04  file length without the trailing CRC (u32 LE)
//! 0x08  version (0x00)
//! 0x09  max cylinder (count - 1)
//! 0x0A  max side (count - 1)
//! 0x0B  flags (unused)
//! 0x0C  extended header size (u32 LE)
//! ...   per track: u8 type (0 = MFM), u16 length, raw bytes,
//!       ceil(length / 8) bitmap bytes
//! ```
//!
//! The file's bitmap flags sync bytes; ID marks for the sector scan are
//! re-derived from the stream itself (A1 A1 A1 FE runs), which also
//! covers files whose bitmaps are sparse or missing.

use log::warn;

use crate::disk::{FloppyDisk, ImageKind, Track};
use crate::images::ImageError;

fn get<'a>(data: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8], ImageError> {
    data.get(offset..offset + len)
        .ok_or_else(|| ImageError::invalid(ImageKind::Udi, offset, "out of bounds"))
}

/// Set id-mark bits wherever the stream carries a sync run + 0xFE.
pub(crate) fn derive_id_marks(track: &mut Track) {
    let positions: Vec<usize> = (3..track.data.len())
        .filter(|&pos| {
            track.data[pos] == 0xFE
                && track.data[pos - 1] == 0xA1
                && track.data[pos - 2] == 0xA1
                && track.data[pos - 3] == 0xA1
        })
        .collect();
    track.clear_marks();
    for pos in positions {
        track.set_id_mark(pos);
    }
}

/// Parse a UDI image.
pub fn load(data: &[u8]) -> Result<FloppyDisk, ImageError> {
    if !data.starts_with(b"UDI!") {
        return Err(ImageError::invalid(ImageKind::Udi, 0, "bad signature"));
    }
    if data.len() < 0x10 {
        return Err(ImageError::invalid(ImageKind::Udi, data.len(), "truncated header"));
    }
    let declared_len = u32::from_le_bytes(data[4..8].try_into().expect("4 bytes")) as usize;
    if declared_len > data.len() {
        return Err(ImageError::invalid(
            ImageKind::Udi,
            4,
            format!("declared length {declared_len} exceeds file size {}", data.len()),
        ));
    }
    let cyls = usize::from(data[9]) + 1;
    let sides = usize::from(data[10]) + 1;
    if sides > 2 {
        return Err(ImageError::invalid(ImageKind::Udi, 10, "more than two sides"));
    }
    let ext_header = u32::from_le_bytes(data[0x0C..0x10].try_into().expect("4 bytes")) as usize;

    let mut disk = FloppyDisk::new(cyls, sides, ImageKind::Udi);
    let mut pos = 0x10 + ext_header;

    for cyl in 0..cyls {
        for side in 0..sides {
            let track_type = get(data, pos, 1)?[0];
            if track_type != 0 {
                warn!("udi: track {cyl}/{side} has unsupported type {track_type}, skipped");
            }
            let len_bytes = get(data, pos + 1, 2)?;
            let track_len = usize::from(u16::from_le_bytes([len_bytes[0], len_bytes[1]]));
            let raw = get(data, pos + 3, track_len)?.to_vec();
            let bitmap_len = track_len.div_ceil(8);
            let bitmap = get(data, pos + 3 + track_len, bitmap_len)?.to_vec();
            pos += 3 + track_len + bitmap_len;

            if track_type == 0 {
                let mut track = Track::from_raw(raw, bitmap);
                derive_id_marks(&mut track);
                disk.set_track(cyl, side, track);
            }
        }
    }

    Ok(disk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{FormatSector, TRACK_LEN};

    /// Wrap raw tracks in a UDI container.
    fn make_udi(tracks: &[&Track], cyls: u8, sides: u8) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"UDI!");
        data.extend_from_slice(&0u32.to_le_bytes()); // fixed up below
        data.push(0); // version
        data.push(cyls - 1);
        data.push(sides - 1);
        data.push(0);
        data.extend_from_slice(&0u32.to_le_bytes()); // no extended header
        for track in tracks {
            data.push(0); // MFM
            data.extend_from_slice(&(track.len() as u16).to_le_bytes());
            data.extend_from_slice(&track.data);
            data.extend_from_slice(track.marks());
        }
        let len = (data.len() as u32).to_le_bytes();
        data[4..8].copy_from_slice(&len);
        data
    }

    fn formatted_track() -> Track {
        let mut disk = FloppyDisk::new(1, 1, ImageKind::Udi);
        let payload = vec![0x99u8; 256];
        disk.format_track(
            0,
            0,
            &[FormatSector {
                cyl: 0,
                head: 0,
                sector: 5,
                size_code: 1,
                data: &payload,
                bad_crc: false,
            }],
        );
        disk.track(0, 0).clone()
    }

    #[test]
    fn raw_stream_round_trips() {
        let track = formatted_track();
        let image = make_udi(&[&track], 1, 1);
        let disk = load(&image).expect("valid UDI");

        assert_eq!(disk.cyls(), 1);
        assert_eq!(disk.sides(), 1);
        assert_eq!(disk.track(0, 0).data, track.data);
        assert_eq!(disk.read_sector(0, 0, 5).unwrap(), vec![0x99u8; 256]);
    }

    #[test]
    fn id_marks_derived_from_stream() {
        let track = formatted_track();
        // Strip the bitmap: loader must find the mark by scanning.
        let image = make_udi(&[&Track::from_raw(track.data.clone(), Vec::new())], 1, 1);
        let disk = load(&image).expect("valid UDI");
        let ids = disk.track(0, 0).sector_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].sector, 5);
        assert!(ids[0].id_crc_ok);
    }

    #[test]
    fn variable_track_lengths_survive() {
        let short = Track::with_len(TRACK_LEN - 500);
        let track = formatted_track();
        let image = make_udi(&[&track, &short], 1, 2);
        let disk = load(&image).expect("valid UDI");
        assert_eq!(disk.track(0, 0).len(), TRACK_LEN);
        assert_eq!(disk.track(0, 1).len(), TRACK_LEN - 500);
    }

    #[test]
    fn bad_signature_rejected() {
        assert!(load(b"IDU!....").is_err());
    }

    #[test]
    fn truncated_track_rejected() {
        let track = formatted_track();
        let mut image = make_udi(&[&track], 1, 1);
        image.truncate(image.len() - 32);
        image[4..8].copy_from_slice(&(32u32).to_le_bytes());
        assert!(load(&image).is_err());
    }
}
