//! TD0 — Teledisk images.
//!
//! Layout per Dave Dunfield's notes on the ImageDisk package: a 12-byte
//! header (signature "TD" for plain or "td" for LZH-compressed data),
//! an optional comment block, then track records of sector headers with
//! individually encoded data blocks (raw, repeated pattern, or RLE).
//! Teledisk's own CRC-16 uses polynomial 0xA097.
//!
//! LZH-compressed files ("td") are recognised and rejected: the corpus
//! has no decompressor for Teledisk's LZSS-Huffman variant and guessing
//! one would corrupt every sector.

use log::{debug, warn};

use crate::disk::{FloppyDisk, FormatSector, ImageKind};
use crate::images::ImageError;

/// Teledisk CRC-16 (polynomial 0xA097, MSB first, zero init).
#[must_use]
pub fn td0_crc(init: u16, data: &[u8]) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0xA097;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn get<'a>(data: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8], ImageError> {
    data.get(offset..offset + len)
        .ok_or_else(|| ImageError::invalid(ImageKind::Td0, offset, "out of bounds"))
}

/// Parse a TD0 image.
pub fn load(data: &[u8]) -> Result<FloppyDisk, ImageError> {
    if data.len() < 12 {
        return Err(ImageError::invalid(ImageKind::Td0, data.len(), "truncated header"));
    }
    match &data[..2] {
        b"TD" => {}
        b"td" => {
            return Err(ImageError::Unsupported {
                kind: ImageKind::Td0,
                reason: "LZH-compressed Teledisk data".into(),
            })
        }
        _ => return Err(ImageError::invalid(ImageKind::Td0, 0, "bad signature")),
    }

    let sides_field = data[9];
    let sides = if sides_field == 1 { 1 } else { 2 };
    let stored_crc = u16::from_le_bytes([data[10], data[11]]);
    if td0_crc(0, &data[..10]) != stored_crc {
        warn!("td0: header CRC mismatch, continuing");
    }

    let mut pos = 12;
    // Bit 7 of the stepping byte flags a comment block.
    if data[7] & 0x80 != 0 {
        let block = get(data, pos, 10)?;
        let comment_len = usize::from(u16::from_le_bytes([block[2], block[3]]));
        pos += 10 + comment_len;
    }

    // First pass: collect track records to learn the geometry.
    struct RawSector {
        c: u8,
        h: u8,
        r: u8,
        n: u8,
        bad_crc: bool,
        data: Vec<u8>,
    }
    let mut tracks: Vec<(u8, u8, Vec<RawSector>)> = Vec::new();

    loop {
        let sector_count = get(data, pos, 1)?[0];
        if sector_count == 0xFF {
            break;
        }
        let head = get(data, pos, 4)?;
        let cyl = head[1];
        let side = head[2] & 1;
        pos += 4;

        let mut sectors = Vec::with_capacity(usize::from(sector_count));
        for _ in 0..sector_count {
            let desc = get(data, pos, 6)?;
            let (c, h, r, n, flags) = (desc[0], desc[1], desc[2], desc[3], desc[4]);
            pos += 6;

            let size = 128usize << (n & 3);
            // Flag 0x30: no data block follows (skipped / not allocated).
            let payload = if flags & 0x30 != 0 {
                vec![0u8; size]
            } else {
                let len_bytes = get(data, pos, 2)?;
                let block_len = usize::from(u16::from_le_bytes([len_bytes[0], len_bytes[1]]));
                let block = get(data, pos + 2, block_len)?;
                pos += 2 + block_len;
                decode_sector_data(block, size)
                    .map_err(|reason| ImageError::invalid(ImageKind::Td0, pos, reason))?
            };
            sectors.push(RawSector {
                c,
                h,
                r,
                n,
                bad_crc: flags & 0x02 != 0,
                data: payload,
            });
        }
        debug!("td0: track cyl={cyl} side={side} sectors={sector_count}");
        tracks.push((cyl, side, sectors));
    }

    let cyls = tracks.iter().map(|&(c, _, _)| usize::from(c) + 1).max().unwrap_or(1);
    let mut disk = FloppyDisk::new(cyls, sides, ImageKind::Td0);

    for (cyl, side, sectors) in &tracks {
        let format: Vec<FormatSector<'_>> = sectors
            .iter()
            .map(|s| FormatSector {
                cyl: s.c,
                head: s.h,
                sector: s.r,
                size_code: s.n,
                data: &s.data,
                bad_crc: s.bad_crc,
            })
            .collect();
        disk.format_track(usize::from(*cyl), usize::from(*side), &format);
    }

    Ok(disk)
}

/// Decode one sector's data block.
fn decode_sector_data(block: &[u8], size: usize) -> Result<Vec<u8>, String> {
    if block.is_empty() {
        return Err("empty data block".into());
    }
    let mut out = Vec::with_capacity(size);
    match block[0] {
        // Raw.
        0 => out.extend_from_slice(&block[1..]),
        // One repeated two-byte pattern.
        1 => {
            if block.len() < 5 {
                return Err("short repeated-pattern block".into());
            }
            let count = usize::from(u16::from_le_bytes([block[1], block[2]]));
            for _ in 0..count {
                out.push(block[3]);
                out.push(block[4]);
            }
        }
        // RLE: a sequence of literal and repeated fragments.
        2 => {
            let mut p = 1;
            while p < block.len() {
                match block[p] {
                    0 => {
                        let len = usize::from(*block.get(p + 1).ok_or("truncated literal")?);
                        let lit = block
                            .get(p + 2..p + 2 + len)
                            .ok_or("truncated literal body")?;
                        out.extend_from_slice(lit);
                        p += 2 + len;
                    }
                    1 => {
                        let count = usize::from(*block.get(p + 1).ok_or("truncated repeat")?);
                        let pat = block.get(p + 2..p + 4).ok_or("truncated repeat pattern")?;
                        for _ in 0..count {
                            out.extend_from_slice(pat);
                        }
                        p += 4;
                    }
                    other => return Err(format!("unknown RLE fragment type {other}")),
                }
            }
        }
        other => return Err(format!("unknown sector encoding {other}")),
    }
    out.resize(size, 0);
    Ok(out)
}
