//! Per-drive track store.
//!
//! A disk is held as raw MFM-formatted byte streams, one per (cylinder,
//! side), with an id-mark bitmap alongside: one bit per track byte, set
//! where an ID address mark (the 0xFE following three A1 sync bytes)
//! sits. Everything the controller does — searching for sectors, reading,
//! writing, formatting — happens directly against these streams, so
//! copy-protected layouts with irregular CHRN values survive untouched.

use bitflags::bitflags;

use crate::crc::{crc16, CRC_AFTER_SYNC};

/// Nominal raw track length in bytes (250 kbit/s at 300 RPM).
pub const TRACK_LEN: usize = 6250;

/// Maximum cylinders any supported drive can seek to.
pub const MAX_CYLS: usize = 86;

/// Maximum bytes between an ID mark and its data mark per the datasheet.
pub const DAM_SEARCH_WINDOW: usize = 43;

bitflags! {
    /// Track-store state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiskFlags: u8 {
        /// At least one sector has been rewritten since loading.
        const SECTOR_DIRTY    = 0x01;
        /// At least one track was reformatted by a Write Track command.
        const TRACK_FORMATTED = 0x02;
    }
}

/// Source image format, retained for save-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageKind {
    #[default]
    Trd,
    Scl,
    Hob,
    Fdi,
    Td0,
    Udi,
    Isd,
    Pro,
}

/// One raw MFM track plus its id-mark bitmap.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub data: Vec<u8>,
    marks: Vec<u8>,
}

/// A sector header found on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorId {
    pub cyl: u8,
    pub head: u8,
    pub sector: u8,
    pub size_code: u8,
    /// Offset of the 0xFE mark byte within the track.
    pub id_pos: usize,
    /// Whether the stored ID CRC is consistent.
    pub id_crc_ok: bool,
}

impl Track {
    /// An unformatted track of the nominal length.
    #[must_use]
    pub fn blank() -> Self {
        Self::with_len(TRACK_LEN)
    }

    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0; len],
            marks: vec![0; len.div_ceil(8)],
        }
    }

    /// Build a track from a raw stream and an existing bitmap (UDI).
    #[must_use]
    pub fn from_raw(data: Vec<u8>, marks: Vec<u8>) -> Self {
        let mut marks = marks;
        marks.resize(data.len().div_ceil(8), 0);
        Self { data, marks }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn is_id_mark(&self, pos: usize) -> bool {
        self.marks[pos / 8] & (1 << (pos % 8)) != 0
    }

    pub fn set_id_mark(&mut self, pos: usize) {
        self.marks[pos / 8] |= 1 << (pos % 8);
    }

    pub fn clear_marks(&mut self) {
        self.marks.iter_mut().for_each(|b| *b = 0);
    }

    /// The raw id-mark bitmap (UDI save-back).
    #[must_use]
    pub fn marks(&self) -> &[u8] {
        &self.marks
    }

    /// Enumerate the sector headers on this track in stream order.
    #[must_use]
    pub fn sector_ids(&self) -> Vec<SectorId> {
        let mut ids = Vec::new();
        for pos in 0..self.data.len() {
            if !self.is_id_mark(pos) {
                continue;
            }
            if pos + 6 >= self.data.len() {
                continue;
            }
            let field = &self.data[pos..pos + 5];
            let stored = (u16::from(self.data[pos + 5]) << 8) | u16::from(self.data[pos + 6]);
            ids.push(SectorId {
                cyl: field[1],
                head: field[2],
                sector: field[3],
                size_code: field[4],
                id_pos: pos,
                id_crc_ok: crc16(CRC_AFTER_SYNC, field) == stored,
            });
        }
        ids
    }

    /// Find the data mark following an ID mark. Returns the offset of the
    /// first data byte and whether the sector is "deleted" (0xF8 mark).
    #[must_use]
    pub fn find_data_mark(&self, id_pos: usize) -> Option<(usize, bool)> {
        // Skip the ID field and its CRC, then scan the gap.
        let start = id_pos + 7;
        let end = (start + DAM_SEARCH_WINDOW).min(self.data.len().saturating_sub(4));
        for pos in start..end {
            if self.data[pos] == 0xA1
                && self.data.get(pos + 1) == Some(&0xA1)
                && self.data.get(pos + 2) == Some(&0xA1)
            {
                match self.data.get(pos + 3) {
                    Some(&0xFB) => return Some((pos + 4, false)),
                    Some(&0xF8) => return Some((pos + 4, true)),
                    _ => {}
                }
            }
        }
        None
    }

    /// Recompute and store the data CRC for the sector whose data starts
    /// at `data_pos` and spans `len` bytes.
    pub fn refresh_data_crc(&mut self, data_pos: usize, len: usize) {
        let mark = self.data[data_pos - 1];
        let mut crc = crc16(CRC_AFTER_SYNC, &[mark]);
        crc = crc16(crc, &self.data[data_pos..data_pos + len]);
        self.data[data_pos + len] = (crc >> 8) as u8;
        self.data[data_pos + len + 1] = crc as u8;
    }

    /// Check the stored data CRC for a sector.
    #[must_use]
    pub fn data_crc_ok(&self, data_pos: usize, len: usize) -> bool {
        if data_pos + len + 2 > self.data.len() {
            return false;
        }
        let mark = self.data[data_pos - 1];
        let mut crc = crc16(CRC_AFTER_SYNC, &[mark]);
        crc = crc16(crc, &self.data[data_pos..data_pos + len]);
        let stored =
            (u16::from(self.data[data_pos + len]) << 8) | u16::from(self.data[data_pos + len + 1]);
        crc == stored
    }
}

/// A sector to lay down when formatting a track.
pub struct FormatSector<'a> {
    pub cyl: u8,
    pub head: u8,
    pub sector: u8,
    pub size_code: u8,
    pub data: &'a [u8],
    /// Store a deliberately wrong data CRC so the controller reports
    /// CRC_ERROR when the guest reads this sector.
    pub bad_crc: bool,
}

/// In-memory floppy disk: `cyls × sides` raw tracks.
#[derive(Debug, Clone)]
pub struct FloppyDisk {
    cyls: usize,
    sides: usize,
    tracks: Vec<Track>,
    pub flags: DiskFlags,
    pub source: ImageKind,
}

impl FloppyDisk {
    /// A disk of blank (unformatted) tracks.
    #[must_use]
    pub fn new(cyls: usize, sides: usize, source: ImageKind) -> Self {
        let cyls = cyls.min(MAX_CYLS);
        Self {
            cyls,
            sides,
            tracks: (0..cyls * sides).map(|_| Track::blank()).collect(),
            flags: DiskFlags::empty(),
            source,
        }
    }

    #[must_use]
    pub fn cyls(&self) -> usize {
        self.cyls
    }

    #[must_use]
    pub fn sides(&self) -> usize {
        self.sides
    }

    #[must_use]
    pub fn track(&self, cyl: usize, side: usize) -> &Track {
        &self.tracks[cyl * self.sides + side]
    }

    pub fn track_mut(&mut self, cyl: usize, side: usize) -> &mut Track {
        &mut self.tracks[cyl * self.sides + side]
    }

    /// Replace a track wholesale (UDI loading, Write Track).
    pub fn set_track(&mut self, cyl: usize, side: usize, track: Track) {
        self.tracks[cyl * self.sides + side] = track;
    }

    /// Lay down a standard MFM track from a sector list, in the given
    /// physical order. Gap and sync sizes follow the IBM System/34 layout
    /// the WD1793 expects.
    pub fn format_track(&mut self, cyl: usize, side: usize, sectors: &[FormatSector<'_>]) {
        let mut track = Track::with_len(TRACK_LEN);
        track.data.clear();

        let data = &mut track.data;
        let mut mark_positions = Vec::new();
        let mut crc_fixups = Vec::new(); // (data_pos, len, bad)

        // Pre-index gap and index address mark.
        data.extend(std::iter::repeat_n(0x4E, 80));
        data.extend(std::iter::repeat_n(0x00, 12));
        data.extend(std::iter::repeat_n(0xC2, 3));
        data.push(0xFC);
        data.extend(std::iter::repeat_n(0x4E, 50));

        for sec in sectors {
            // ID field.
            data.extend(std::iter::repeat_n(0x00, 12));
            data.extend(std::iter::repeat_n(0xA1, 3));
            let id_pos = data.len();
            mark_positions.push(id_pos);
            data.push(0xFE);
            data.extend_from_slice(&[sec.cyl, sec.head, sec.sector, sec.size_code]);
            let crc = crc16(CRC_AFTER_SYNC, &data[id_pos..id_pos + 5]);
            data.push((crc >> 8) as u8);
            data.push(crc as u8);

            // Gap 2, then the data field.
            data.extend(std::iter::repeat_n(0x4E, 22));
            data.extend(std::iter::repeat_n(0x00, 12));
            data.extend(std::iter::repeat_n(0xA1, 3));
            data.push(0xFB);
            let data_pos = data.len();
            data.extend_from_slice(sec.data);
            data.push(0);
            data.push(0);
            crc_fixups.push((data_pos, sec.data.len(), sec.bad_crc));

            // Gap 3.
            data.extend(std::iter::repeat_n(0x4E, 24));
        }

        // Gap 4 out to the nominal length.
        if data.len() < TRACK_LEN {
            let fill = TRACK_LEN - data.len();
            data.extend(std::iter::repeat_n(0x4E, fill));
        }

        track.marks = vec![0; track.data.len().div_ceil(8)];
        for pos in mark_positions {
            track.set_id_mark(pos);
        }
        for (data_pos, len, bad) in crc_fixups {
            track.refresh_data_crc(data_pos, len);
            if bad {
                track.data[data_pos + len] ^= 0xFF;
            }
        }

        self.set_track(cyl, side, track);
    }

    /// Copy one logical sector's data out of the store.
    ///
    /// Returns `None` when no sector with that number exists on the track.
    #[must_use]
    pub fn read_sector(&self, cyl: usize, side: usize, sector: u8) -> Option<Vec<u8>> {
        let track = self.track(cyl, side);
        let id = track.sector_ids().into_iter().find(|s| s.sector == sector)?;
        let (data_pos, _) = track.find_data_mark(id.id_pos)?;
        let len = 128usize << (id.size_code & 3);
        Some(track.data[data_pos..data_pos + len].to_vec())
    }

    /// Overwrite one logical sector's data and refresh its CRC.
    pub fn write_sector(&mut self, cyl: usize, side: usize, sector: u8, bytes: &[u8]) -> bool {
        let sides = self.sides;
        let track = &mut self.tracks[cyl * sides + side];
        let Some(id) = track.sector_ids().into_iter().find(|s| s.sector == sector) else {
            return false;
        };
        let Some((data_pos, _)) = track.find_data_mark(id.id_pos) else {
            return false;
        };
        let len = (128usize << (id.size_code & 3)).min(bytes.len());
        track.data[data_pos..data_pos + len].copy_from_slice(&bytes[..len]);
        track.refresh_data_crc(data_pos, 128usize << (id.size_code & 3));
        self.flags |= DiskFlags::SECTOR_DIRTY;
        true
    }

    /// Re-export the disk as a linear TRD image: 256-byte sectors 1..16 in
    /// logical order, cylinder-major, sides interleaved. Byte-identical to
    /// the source for an unmodified TRD load.
    #[must_use]
    pub fn to_trd(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cyls * self.sides * 16 * 256);
        for cyl in 0..self.cyls {
            for side in 0..self.sides {
                for sector in 1..=16u8 {
                    match self.read_sector(cyl, side, sector) {
                        Some(data) => out.extend_from_slice(&data),
                        None => out.extend(std::iter::repeat_n(0, 256)),
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatted_disk() -> FloppyDisk {
        let mut disk = FloppyDisk::new(2, 1, ImageKind::Trd);
        let payload: Vec<Vec<u8>> = (1..=16u8).map(|s| vec![s; 256]).collect();
        let sectors: Vec<FormatSector<'_>> = payload
            .iter()
            .enumerate()
            .map(|(i, data)| FormatSector {
                cyl: 0,
                head: 0,
                sector: (i + 1) as u8,
                size_code: 1,
                data,
                bad_crc: false,
            })
            .collect();
        disk.format_track(0, 0, &sectors);
        disk
    }

    #[test]
    fn format_lays_down_sixteen_sectors() {
        let disk = formatted_disk();
        let ids = disk.track(0, 0).sector_ids();
        assert_eq!(ids.len(), 16);
        assert!(ids.iter().all(|id| id.id_crc_ok));
        assert_eq!(ids[0].sector, 1);
        assert_eq!(ids[15].sector, 16);
        assert_eq!(disk.track(0, 0).len(), TRACK_LEN);
    }

    #[test]
    fn read_back_matches_written_data() {
        let disk = formatted_disk();
        for s in 1..=16u8 {
            let data = disk.read_sector(0, 0, s).expect("sector present");
            assert_eq!(data, vec![s; 256]);
        }
        assert!(disk.read_sector(0, 0, 17).is_none());
    }

    #[test]
    fn data_crc_verifies_and_survives_rewrite() {
        let mut disk = formatted_disk();
        let track = disk.track(0, 0);
        let id = track.sector_ids()[2];
        let (data_pos, deleted) = track.find_data_mark(id.id_pos).unwrap();
        assert!(!deleted);
        assert!(track.data_crc_ok(data_pos, 256));

        assert!(disk.write_sector(0, 0, 3, &[0xAAu8; 256]));
        let track = disk.track(0, 0);
        assert!(track.data_crc_ok(data_pos, 256), "CRC refreshed on write");
        assert!(disk.flags.contains(DiskFlags::SECTOR_DIRTY));
    }

    #[test]
    fn bad_crc_sector_fails_verification() {
        let mut disk = FloppyDisk::new(1, 1, ImageKind::Trd);
        let data = vec![0x55u8; 256];
        disk.format_track(
            0,
            0,
            &[FormatSector {
                cyl: 0,
                head: 0,
                sector: 1,
                size_code: 1,
                data: &data,
                bad_crc: true,
            }],
        );
        let track = disk.track(0, 0);
        let id = track.sector_ids()[0];
        let (data_pos, _) = track.find_data_mark(id.id_pos).unwrap();
        assert!(!track.data_crc_ok(data_pos, 256));
        // The data itself still reads back.
        assert_eq!(disk.read_sector(0, 0, 1).unwrap(), data);
    }

    #[test]
    fn id_marks_round_trip_through_bitmap() {
        let mut track = Track::with_len(100);
        track.set_id_mark(0);
        track.set_id_mark(97);
        assert!(track.is_id_mark(0));
        assert!(track.is_id_mark(97));
        assert!(!track.is_id_mark(50));
    }
}
