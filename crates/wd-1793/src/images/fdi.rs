//! FDI — full disk image with explicit per-sector headers.
//!
//! The format keeps every sector's CHRN separately, so copy-protected
//! disks with out-of-sequence or duplicate headers survive. Layout:
//!
//! ```text
//! 0x00  "FDI"                    signature
//! 0x03  write-protect flag
//! 0x04  cylinders (u16 LE)
//! 0x06  heads (u16 LE)
//! 0x08  description offset (u16 LE)
//! 0x0A  data offset (u16 LE)
//! 0x0C  extra header length (u16 LE)
//! 0x0E  extra header, then per-track headers
//! ```
//!
//! Each track header: u32 track data offset (relative to the data area),
//! u16 reserved, u8 sector count, then 7 bytes per sector: C, H, R, N,
//! flags, u16 sector offset (relative to the track's data).

use crate::disk::{FloppyDisk, FormatSector, ImageKind};
use crate::images::ImageError;

fn get<'a>(data: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8], ImageError> {
    data.get(offset..offset + len)
        .ok_or_else(|| ImageError::invalid(ImageKind::Fdi, offset, "out of bounds"))
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16, ImageError> {
    let b = get(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32, ImageError> {
    let b = get(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Parse an FDI image.
pub fn load(data: &[u8]) -> Result<FloppyDisk, ImageError> {
    if !data.starts_with(b"FDI") {
        return Err(ImageError::invalid(ImageKind::Fdi, 0, "bad signature"));
    }
    let cyls = usize::from(u16_at(data, 0x04)?);
    let sides = usize::from(u16_at(data, 0x06)?);
    if cyls == 0 || cyls > 86 || !(1..=2).contains(&sides) {
        return Err(ImageError::invalid(
            ImageKind::Fdi,
            0x04,
            format!("implausible geometry {cyls}×{sides}"),
        ));
    }
    let data_offset = usize::from(u16_at(data, 0x0A)?);
    let extra_len = usize::from(u16_at(data, 0x0C)?);

    let mut disk = FloppyDisk::new(cyls, sides, ImageKind::Fdi);
    let mut header_pos = 0x0E + extra_len;

    for cyl in 0..cyls {
        for side in 0..sides {
            let track_offset = data_offset + u32_at(data, header_pos)? as usize;
            let sector_count = usize::from(get(data, header_pos + 6, 1)?[0]);
            header_pos += 7;

            let mut sectors = Vec::with_capacity(sector_count);
            let mut payloads: Vec<(usize, usize, bool)> = Vec::with_capacity(sector_count);
            for _ in 0..sector_count {
                let desc = get(data, header_pos, 7)?;
                let size = 128usize << (desc[3] & 3);
                let sec_offset = track_offset + usize::from(u16::from_le_bytes([desc[5], desc[6]]));
                // Flags: low bits are per-size data-CRC-ok markers, bit 6
                // marks a deleted-data sector.
                let crc_ok = desc[4] & 0x3F != 0;
                get(data, sec_offset, size)?;
                payloads.push((sec_offset, size, !crc_ok));
                sectors.push((desc[0], desc[1], desc[2], desc[3]));
                header_pos += 7;
            }

            let format: Vec<FormatSector<'_>> = sectors
                .iter()
                .zip(&payloads)
                .map(|(&(c, h, r, n), &(offset, size, bad_crc))| FormatSector {
                    cyl: c,
                    head: h,
                    sector: r,
                    size_code: n,
                    data: &data[offset..offset + size],
                    bad_crc,
                })
                .collect();
            disk.format_track(cyl, side, &format);
        }
    }

    Ok(disk)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a one-cylinder, one-side FDI with the given sectors.
    fn make_fdi(sectors: &[(u8, u8, u8, u8, u8, &[u8])]) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(b"FDI");
        header.push(0); // not write protected
        header.extend_from_slice(&1u16.to_le_bytes()); // cyls
        header.extend_from_slice(&1u16.to_le_bytes()); // sides
        header.extend_from_slice(&0u16.to_le_bytes()); // description offset

        let track_headers_len = 7 + sectors.len() * 7;
        let data_offset = (0x0E + track_headers_len) as u16;
        header.extend_from_slice(&data_offset.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // no extra header

        // Track header.
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.push(sectors.len() as u8);

        let mut body = Vec::new();
        for &(c, h, r, n, flags, payload) in sectors {
            header.extend_from_slice(&[c, h, r, n, flags]);
            header.extend_from_slice(&(body.len() as u16).to_le_bytes());
            body.extend_from_slice(payload);
        }
        header.extend_from_slice(&body);
        header
    }

    #[test]
    fn irregular_sector_numbers_survive() {
        let a = vec![0x11u8; 256];
        let b = vec![0x22u8; 256];
        // Sector numbers 0x55 and 0xAA, as a protection scheme would use.
        let image = make_fdi(&[
            (0, 0, 0x55, 1, 0x01, &a),
            (0, 0, 0xAA, 1, 0x01, &b),
        ]);
        let disk = load(&image).expect("valid FDI");

        let ids = disk.track(0, 0).sector_ids();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].sector, 0x55);
        assert_eq!(ids[1].sector, 0xAA);
        assert_eq!(disk.read_sector(0, 0, 0x55).unwrap(), a);
        assert_eq!(disk.read_sector(0, 0, 0xAA).unwrap(), b);
    }

    #[test]
    fn crc_flag_zero_marks_bad_sector() {
        let payload = vec![0x33u8; 256];
        let image = make_fdi(&[(0, 0, 1, 1, 0x00, &payload)]);
        let disk = load(&image).expect("valid FDI");

        let track = disk.track(0, 0);
        let id = track.sector_ids()[0];
        let (data_pos, _) = track.find_data_mark(id.id_pos).unwrap();
        assert!(!track.data_crc_ok(data_pos, 256), "bad CRC preserved");
        assert_eq!(disk.read_sector(0, 0, 1).unwrap(), payload);
    }

    #[test]
    fn bad_signature_rejected() {
        assert!(load(b"XDI....").is_err());
    }

    #[test]
    fn truncated_sector_data_rejected() {
        let payload = vec![0u8; 256];
        let mut image = make_fdi(&[(0, 0, 1, 1, 0x01, &payload)]);
        image.truncate(image.len() - 100);
        assert!(load(&image).is_err());
    }

    #[test]
    fn implausible_geometry_rejected() {
        let mut image = make_fdi(&[(0, 0, 1, 1, 0x01, &[0u8; 256])]);
        image[4] = 0xFF;
        image[5] = 0xFF;
        assert!(load(&image).is_err());
    }
}
