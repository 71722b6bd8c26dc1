//! WD1793 floppy disk controller.
//!
//! Chip-level emulation of the Western Digital FD1793 as wired into the
//! Beta Disk Interface. The controller is time-driven: every register
//! access passes the current absolute T-state count, and `process()`
//! walks the internal state machine up to that moment. Disk rotation is
//! modelled at 300 RPM over raw MFM track streams (see [`FloppyDisk`]),
//! so sector searches take realistic fractions of a revolution — unless
//! `no_delay` is set, which collapses every internal delay to zero.
//!
//! # Register interface
//!
//! Four chip registers (command/status, track, sector, data) plus the
//! Beta Disk system register that selects drive and side and exposes
//! DRQ/INTRQ. The host machine maps these to ports
//! 0x1F/0x3F/0x5F/0x7F/0xFF while TR-DOS is paged in.

#![allow(clippy::cast_possible_truncation)]

pub mod crc;
pub mod disk;
pub mod images;

pub use disk::{DiskFlags, FloppyDisk, FormatSector, ImageKind, SectorId, Track, TRACK_LEN};
pub use images::{load_image, ImageError};

use bitflags::bitflags;
use log::{debug, trace};

bitflags! {
    /// WD1793 status register.
    ///
    /// Bits 1, 2, 4 and 5 have Type I and Type II/III readings; both
    /// names are defined for the shared positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const BUSY          = 0x01;
        const INDEX         = 0x02;
        const DRQ           = 0x02;
        const TRK00         = 0x04;
        const LOST_DATA     = 0x04;
        const CRC_ERROR     = 0x08;
        const SEEK_ERROR    = 0x10;
        const NOT_FOUND     = 0x10;
        const HEAD_LOADED   = 0x20;
        const RECORD_TYPE   = 0x20;
        const WRITE_PROTECT = 0x40;
        const NOT_READY     = 0x80;
    }
}

/// DRQ bit of the system register (port 0xFF reads).
pub const RQS_DRQ: u8 = 0x40;
/// INTRQ bit of the system register.
pub const RQS_INTRQ: u8 = 0x80;

/// Internal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Wait,
    DelayBeforeCmd,
    CmdRw,
    FoundNextId,
    RdSec,
    Read,
    WrSec,
    Write,
    WrTrack,
    WrTrackData,
    Type1Cmd,
    Step,
    SeekStart,
    Seek,
    Verify,
    Reset,
}

/// What the current Type II/III command transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    ReadSector,
    WriteSector,
    ReadAddress,
    ReadTrack,
    WriteTrack,
}

/// One drive slot: inserted disk, head position, write protect.
#[derive(Debug, Default)]
pub struct Drive {
    pub disk: Option<FloppyDisk>,
    pub cyl: usize,
    pub write_protect: bool,
}

/// Step-rate table in milliseconds, indexed by command bits 0-1.
const STEP_RATES_MS: [u64; 4] = [6, 12, 20, 30];

/// Revolutions the ID search may spin before giving up.
const DEFAULT_SEARCH_REVS: u64 = 5;

/// Western Digital WD1793 with four drive slots.
pub struct Wd1793 {
    state: State,
    after_wait: State,
    /// Absolute T-state when the current wait expires.
    next: u64,

    cmd: u8,
    track_reg: u8,
    sector_reg: u8,
    data_reg: u8,
    status: Status,
    rqs: u8,

    drive_sel: usize,
    side: usize,
    step_dir: i8,
    /// Step command wants the track register updated.
    step_update: bool,
    /// Single-step command (as opposed to a seek loop).
    single_step: bool,

    transfer: Transfer,
    rwptr: usize,
    rwlen: usize,
    /// Sector data start, for the CRC refresh after a write.
    data_pos: usize,
    /// Candidate header from the last ID search.
    found: Option<SectorId>,
    /// Rotational byte position the ID search continues from. Kept
    /// separately from wall-clock time so collapsed-delay mode still
    /// walks the track in order.
    search_pos: usize,
    /// Virtual time spent searching for an ID (NOT_FOUND bound).
    search_spent: u64,
    /// When DRQ was last raised (lost-data detection).
    drq_since: u64,
    /// Write Track accumulates the raw bytes the host supplies here.
    fmt_buf: Vec<u8>,

    system: u8,
    motor_until: u64,
    head_loaded: bool,

    no_delay: bool,
    max_search_revs: u64,
    cpu_hz: u64,

    pub drives: [Drive; 4],
}

impl Wd1793 {
    #[must_use]
    pub fn new(cpu_hz: u64) -> Self {
        Self {
            state: State::Idle,
            after_wait: State::Idle,
            next: 0,
            cmd: 0,
            track_reg: 0,
            sector_reg: 1,
            data_reg: 0,
            status: Status::empty(),
            rqs: 0,
            drive_sel: 0,
            side: 0,
            step_dir: 1,
            step_update: false,
            single_step: false,
            transfer: Transfer::ReadSector,
            rwptr: 0,
            rwlen: 0,
            data_pos: 0,
            found: None,
            search_pos: 0,
            search_spent: 0,
            drq_since: 0,
            fmt_buf: Vec::new(),
            system: 0,
            motor_until: 0,
            head_loaded: false,
            no_delay: false,
            max_search_revs: DEFAULT_SEARCH_REVS,
            drives: Default::default(),
            cpu_hz,
        }
    }

    /// Collapse all internal delays to zero.
    pub fn set_no_delay(&mut self, no_delay: bool) {
        self.no_delay = no_delay;
    }

    /// Bound on the ID search, in index-hole revolutions.
    pub fn set_search_revs(&mut self, revs: u64) {
        self.max_search_revs = revs.max(1);
    }

    pub fn insert(&mut self, drive: usize, disk: FloppyDisk) {
        self.drives[drive & 3].disk = Some(disk);
    }

    pub fn eject(&mut self, drive: usize) -> Option<FloppyDisk> {
        self.drives[drive & 3].disk.take()
    }

    #[must_use]
    pub fn selected_drive(&self) -> usize {
        self.drive_sel
    }

    // -----------------------------------------------------------------------
    // Timing helpers
    // -----------------------------------------------------------------------

    /// T-states per disk revolution (300 RPM).
    fn ts_per_rev(&self) -> u64 {
        self.cpu_hz / 5
    }

    /// T-states per raw track byte.
    fn ts_per_byte(&self) -> u64 {
        self.ts_per_rev() / TRACK_LEN as u64
    }

    /// Rotational byte position at an absolute time.
    fn byte_pos(&self, now: u64, track_len: usize) -> usize {
        if track_len == 0 {
            return 0;
        }
        ((now / self.ts_per_byte()) as usize) % track_len
    }

    fn wait_until(&mut self, at: u64, then: State) {
        if self.no_delay {
            self.state = then;
        } else {
            self.next = at;
            self.after_wait = then;
            self.state = State::Wait;
        }
    }

    fn wait_for(&mut self, now: u64, delay: u64, then: State) {
        self.wait_until(now + delay, then);
    }

    // -----------------------------------------------------------------------
    // Register interface
    // -----------------------------------------------------------------------

    /// Read the status register. Clears INTRQ.
    pub fn read_status(&mut self, now: u64) -> u8 {
        self.process(now);
        self.rqs &= !RQS_INTRQ;

        let mut value = self.status;
        let type1 = self.cmd & 0x80 == 0 || self.cmd & 0xF0 == 0xD0;
        if self.ready() {
            value.remove(Status::NOT_READY);
        } else {
            value.insert(Status::NOT_READY);
        }
        if type1 {
            value.remove(Status::INDEX | Status::TRK00 | Status::HEAD_LOADED | Status::WRITE_PROTECT);
            let drive = &self.drives[self.drive_sel];
            if drive.cyl == 0 {
                value.insert(Status::TRK00);
            }
            if drive.write_protect {
                value.insert(Status::WRITE_PROTECT);
            }
            if self.head_loaded && now < self.motor_until {
                value.insert(Status::HEAD_LOADED);
            }
            // Index pulse: ~4 ms hole once per revolution while spinning.
            if self.ready()
                && now < self.motor_until
                && now % self.ts_per_rev() < self.cpu_hz * 4 / 1000
            {
                value.insert(Status::INDEX);
            }
        } else {
            value.set(Status::DRQ, self.rqs & RQS_DRQ != 0);
        }
        value.bits()
    }

    #[must_use]
    pub fn read_track_reg(&self) -> u8 {
        self.track_reg
    }

    #[must_use]
    pub fn read_sector_reg(&self) -> u8 {
        self.sector_reg
    }

    /// Read the data register; during a read transfer this consumes the
    /// next byte from the track stream.
    pub fn read_data(&mut self, now: u64) -> u8 {
        self.process(now);
        if self.state == State::Read && self.rqs & RQS_DRQ != 0 && self.rwlen > 0 {
            let byte = self.current_track_byte();
            self.data_reg = byte;
            self.rwptr += 1;
            self.rwlen -= 1;
            self.rqs &= !RQS_DRQ;
            self.status.remove(Status::DRQ);
            if self.rwlen == 0 {
                self.finish_read(now);
            } else {
                self.drq_since = now;
                let at = now + self.ts_per_byte();
                self.wait_until(at, State::Read);
                self.raise_drq_now_if_collapsed(now);
            }
        }
        self.data_reg
    }

    /// Write the command register. Ignored while busy unless the new
    /// command is a Type IV force interrupt.
    pub fn write_command(&mut self, value: u8, now: u64) {
        self.process(now);

        if value & 0xF0 == 0xD0 {
            // Type IV: force interrupt.
            debug!("wd1793: force interrupt {value:02X}");
            self.cmd = value;
            self.state = State::Idle;
            self.status.remove(Status::BUSY);
            if value & 0x0F != 0 {
                self.rqs |= RQS_INTRQ;
            } else {
                self.rqs &= !RQS_INTRQ;
            }
            return;
        }

        if self.status.contains(Status::BUSY) {
            return;
        }

        self.cmd = value;
        self.rqs = 0;
        self.status.insert(Status::BUSY);
        self.motor_until = now + 2 * self.cpu_hz; // 2 s of spindle
        self.search_spent = 0;

        if value & 0x80 == 0 {
            // Type I: restore/seek/step.
            self.status
                .remove(Status::SEEK_ERROR | Status::CRC_ERROR | Status::NOT_FOUND);
            self.head_loaded = value & 0x08 != 0;
            self.state = State::Type1Cmd;
        } else {
            self.status.remove(
                Status::LOST_DATA
                    | Status::NOT_FOUND
                    | Status::CRC_ERROR
                    | Status::RECORD_TYPE
                    | Status::WRITE_PROTECT,
            );
            self.state = State::DelayBeforeCmd;
        }
        self.process(now);
    }

    pub fn write_track_reg(&mut self, value: u8) {
        self.track_reg = value;
    }

    pub fn write_sector_reg(&mut self, value: u8) {
        self.sector_reg = value;
    }

    /// Write the data register; during a write transfer this feeds the
    /// track stream.
    pub fn write_data(&mut self, value: u8, now: u64) {
        self.process(now);
        self.data_reg = value;

        match self.state {
            State::WrSec if self.rqs & RQS_DRQ != 0 => {
                // First byte supplied: the data field begins.
                self.rqs &= !RQS_DRQ;
                self.status.remove(Status::DRQ);
                self.state = State::Write;
                self.consume_write_byte(now);
            }
            State::Write if self.rqs & RQS_DRQ != 0 => {
                self.rqs &= !RQS_DRQ;
                self.status.remove(Status::DRQ);
                self.consume_write_byte(now);
            }
            State::WrTrackData if self.rqs & RQS_DRQ != 0 => {
                self.rqs &= !RQS_DRQ;
                self.status.remove(Status::DRQ);
                self.fmt_buf.push(value);
                if self.fmt_buf.len() >= self.rwlen {
                    self.finish_write_track();
                } else {
                    self.drq_since = now;
                    let at = now + self.ts_per_byte();
                    self.wait_until(at, State::WrTrackData);
                    self.raise_drq_now_if_collapsed(now);
                }
            }
            _ => {}
        }
    }

    /// Beta Disk system register write: drive select, side select
    /// (active low), HLT, density, and the active-low controller reset.
    pub fn write_system(&mut self, value: u8, now: u64) {
        self.process(now);
        self.system = value;
        self.drive_sel = usize::from(value & 0x03);
        self.side = usize::from(!value >> 4) & 1;
        if value & 0x08 != 0 {
            self.head_loaded = true;
        }
        if value & 0x04 == 0 {
            self.state = State::Reset;
            self.process(now);
        }
    }

    /// Beta Disk system register read: DRQ and INTRQ, rest floating high.
    pub fn read_system(&mut self, now: u64) -> u8 {
        self.process(now);
        self.rqs | 0x3F
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    /// Advance the state machine up to the given absolute T-state.
    pub fn process(&mut self, now: u64) {
        loop {
            match self.state {
                State::Idle => {
                    self.status.remove(Status::BUSY);
                    return;
                }

                State::Wait => {
                    if now < self.next {
                        // Lost-data check while a transfer starves.
                        self.check_lost_data(now);
                        return;
                    }
                    self.state = self.after_wait;
                }

                State::Reset => {
                    self.status = Status::empty();
                    self.rqs = 0;
                    self.cmd = 0;
                    self.sector_reg = 1;
                    self.fmt_buf.clear();
                    self.state = State::Idle;
                }

                // --- Type II / III entry -------------------------------
                State::DelayBeforeCmd => {
                    if !self.ready() {
                        self.complete(now, Status::empty());
                        return;
                    }
                    self.transfer = match self.cmd & 0xF0 {
                        0x80 | 0x90 => Transfer::ReadSector,
                        0xA0 | 0xB0 => Transfer::WriteSector,
                        0xC0 => Transfer::ReadAddress,
                        0xE0 => Transfer::ReadTrack,
                        _ => Transfer::WriteTrack,
                    };
                    if matches!(self.transfer, Transfer::WriteSector | Transfer::WriteTrack)
                        && self.drives[self.drive_sel].write_protect
                    {
                        self.complete(now, Status::WRITE_PROTECT);
                        return;
                    }
                    self.search_pos = self.byte_pos(now, self.current_track_len());
                    // E flag: 15 ms head-settling delay.
                    let settle = if self.cmd & 0x04 != 0 {
                        15 * self.cpu_hz / 1000
                    } else {
                        0
                    };
                    match self.transfer {
                        Transfer::ReadTrack => {
                            // Begin at the index hole.
                            let rev = self.ts_per_rev();
                            let to_index = rev - now % rev;
                            self.rwptr = 0;
                            self.rwlen = self.current_track_len();
                            self.wait_for(now, settle + to_index, State::RdSec);
                        }
                        Transfer::WriteTrack => {
                            self.rwlen = self.current_track_len();
                            self.fmt_buf.clear();
                            self.wait_for(now, settle, State::WrTrack);
                        }
                        _ => self.wait_for(now, settle, State::CmdRw),
                    }
                }

                State::CmdRw => {
                    if !self.schedule_id_search(now) {
                        return;
                    }
                }

                State::FoundNextId => {
                    if !self.inspect_found_id(now) {
                        return;
                    }
                }

                State::RdSec => {
                    // Data (or address/track) bytes start flowing.
                    self.drq_since = now.max(self.next);
                    self.rqs |= RQS_DRQ;
                    self.status.insert(Status::DRQ);
                    self.state = State::Read;
                }

                State::Read => {
                    // DRQ for the next byte is raised by the Wait path out
                    // of read_data(); a starved transfer loses data.
                    if self.rqs & RQS_DRQ == 0 && self.rwlen > 0 {
                        self.rqs |= RQS_DRQ;
                        self.status.insert(Status::DRQ);
                    }
                    self.check_lost_data(now);
                    return;
                }

                State::WrSec => {
                    self.check_lost_data(now);
                    return;
                }

                State::Write => {
                    if self.rqs & RQS_DRQ == 0 && self.rwlen > 0 {
                        self.rqs |= RQS_DRQ;
                        self.status.insert(Status::DRQ);
                        self.drq_since = now;
                    }
                    self.check_lost_data(now);
                    return;
                }

                State::WrTrack => {
                    // Ask for bytes; the transfer proper starts at the
                    // index hole.
                    self.rqs |= RQS_DRQ;
                    self.status.insert(Status::DRQ);
                    self.drq_since = now;
                    let rev = self.ts_per_rev();
                    let to_index = rev - now % rev;
                    self.wait_for(now, to_index, State::WrTrackData);
                }

                State::WrTrackData => {
                    if self.rqs & RQS_DRQ == 0 && self.fmt_buf.len() < self.rwlen {
                        self.rqs |= RQS_DRQ;
                        self.status.insert(Status::DRQ);
                        self.drq_since = now;
                    }
                    self.check_lost_data(now);
                    return;
                }

                // --- Type I ---------------------------------------------
                State::Type1Cmd => {
                    self.rqs = 0;
                    match self.cmd & 0xF0 {
                        0x00 => {
                            // Restore.
                            self.track_reg = 0xFF;
                            self.data_reg = 0;
                            self.state = State::SeekStart;
                        }
                        0x10 => self.state = State::SeekStart,
                        other => {
                            // Step family; 0x40/0x50 step in, 0x60/0x70 out.
                            if other & 0xE0 == 0x40 {
                                self.step_dir = 1;
                            } else if other & 0xE0 == 0x60 {
                                self.step_dir = -1;
                            }
                            self.step_update = self.cmd & 0x10 != 0;
                            self.single_step = true;
                            self.state = State::Step;
                        }
                    }
                }

                State::SeekStart => {
                    self.single_step = false;
                    self.step_update = true;
                    self.state = State::Seek;
                }

                State::Seek => {
                    let drive_cyl = self.drives[self.drive_sel].cyl;
                    let restoring = self.cmd & 0xF0 == 0x00;
                    let arrived = if restoring {
                        drive_cyl == 0
                    } else {
                        self.track_reg == self.data_reg
                    };
                    if arrived {
                        if restoring {
                            self.track_reg = 0;
                        }
                        self.state = State::Verify;
                    } else {
                        self.step_dir = if restoring || self.data_reg < self.track_reg {
                            -1
                        } else {
                            1
                        };
                        self.state = State::Step;
                    }
                }

                State::Step => {
                    trace!(
                        "wd1793: step dir={} cyl={}",
                        self.step_dir,
                        self.drives[self.drive_sel].cyl
                    );
                    let drive = &mut self.drives[self.drive_sel];
                    let cyl = drive.cyl as i32 + i32::from(self.step_dir);
                    drive.cyl = cyl.clamp(0, disk::MAX_CYLS as i32 - 1) as usize;
                    if self.step_update {
                        self.track_reg = self.track_reg.wrapping_add(self.step_dir as u8);
                    }
                    let rate_ms = STEP_RATES_MS[usize::from(self.cmd & 3)];
                    let delay = rate_ms * self.cpu_hz / 1000;
                    let then = if self.single_step {
                        State::Verify
                    } else {
                        State::Seek
                    };
                    self.wait_for(now, delay, then);
                }

                State::Verify => {
                    if self.cmd & 0x04 == 0 {
                        self.complete(now, Status::empty());
                        return;
                    }
                    if !self.ready() {
                        self.complete(now, Status::empty());
                        return;
                    }
                    let verified = self.verify_track_number();
                    let extra = if verified {
                        Status::empty()
                    } else {
                        Status::SEEK_ERROR
                    };
                    self.complete(now, extra);
                    return;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ready(&self) -> bool {
        self.drives[self.drive_sel].disk.is_some()
    }

    fn current_track_len(&self) -> usize {
        let drive = &self.drives[self.drive_sel];
        drive
            .disk
            .as_ref()
            .map_or(TRACK_LEN, |d| {
                let side = self.side.min(d.sides() - 1);
                let len = d.track(drive.cyl.min(d.cyls() - 1), side).len();
                if len == 0 { TRACK_LEN } else { len }
            })
    }

    fn current_track_byte(&self) -> u8 {
        let drive = &self.drives[self.drive_sel];
        drive
            .disk
            .as_ref()
            .and_then(|d| {
                let side = self.side.min(d.sides() - 1);
                let track = d.track(drive.cyl.min(d.cyls() - 1), side);
                track.data.get(self.rwptr).copied()
            })
            .unwrap_or(0)
    }

    /// Find the next ID address mark from the current rotational position
    /// and schedule `FoundNextId` at its arrival time. Returns false when
    /// `process()` should stop looping (a wait was scheduled or the
    /// command finished).
    fn schedule_id_search(&mut self, now: u64) -> bool {
        let bound = self.max_search_revs * self.ts_per_rev();
        if self.search_spent > bound {
            self.complete(now, Status::NOT_FOUND);
            return false;
        }
        let drive = &self.drives[self.drive_sel];
        let Some(disk) = drive.disk.as_ref() else {
            self.complete(now, Status::empty());
            return false;
        };
        let side = self.side.min(disk.sides() - 1);
        let track = disk.track(drive.cyl.min(disk.cyls() - 1), side);
        let ids = track.sector_ids();
        if track.is_empty() || ids.is_empty() {
            // Nothing on this track: burn a revolution and retry.
            let rev = self.ts_per_rev();
            self.search_spent += rev;
            self.wait_for(now, rev, State::CmdRw);
            return self.no_delay;
        }

        let len = track.len();
        let pos = self.search_pos % len;
        let (id, delta) = ids
            .iter()
            .map(|id| {
                let delta = (id.id_pos + len - pos - 1) % len + 1;
                (*id, delta)
            })
            .min_by_key(|&(_, delta)| delta)
            .expect("non-empty id list");

        let delay = delta as u64 * self.ts_per_byte();
        self.search_spent += delay;
        self.search_pos = id.id_pos;
        self.found = Some(id);
        self.wait_for(now, delay, State::FoundNextId);
        self.no_delay
    }

    /// Check the header the search stopped on. Returns false when
    /// `process()` should stop looping.
    fn inspect_found_id(&mut self, now: u64) -> bool {
        let Some(id) = self.found else {
            self.state = State::CmdRw;
            return true;
        };

        if self.transfer == Transfer::ReadAddress {
            // Any header will do; its C value lands in the sector register.
            self.sector_reg = id.cyl;
            if !id.id_crc_ok {
                self.status.insert(Status::CRC_ERROR);
            }
            self.rwptr = id.id_pos + 1;
            self.rwlen = 6;
            self.state = State::RdSec;
            return true;
        }

        let matches = id.cyl == self.track_reg && id.sector == self.sector_reg;
        if !matches {
            self.state = State::CmdRw;
            return true;
        }
        if !id.id_crc_ok {
            self.status.insert(Status::CRC_ERROR);
            self.state = State::CmdRw;
            return true;
        }
        self.status.remove(Status::CRC_ERROR);

        let drive = &self.drives[self.drive_sel];
        // The disk can vanish between the search and the header arriving
        // (host-side eject); treat it like a drive going not-ready.
        let Some(disk) = drive.disk.as_ref() else {
            self.complete(now, Status::empty());
            return false;
        };
        let side = self.side.min(disk.sides() - 1);
        let track = disk.track(drive.cyl.min(disk.cyls() - 1), side);
        let Some((data_pos, deleted)) = track.find_data_mark(id.id_pos) else {
            self.state = State::CmdRw;
            return true;
        };

        let len = 128usize << (id.size_code & 3);
        self.rwptr = data_pos;
        self.rwlen = len;
        self.data_pos = data_pos;

        match self.transfer {
            Transfer::ReadSector => {
                if deleted {
                    self.status.insert(Status::RECORD_TYPE);
                }
                // The data mark is a gap away from the header.
                let gap = (data_pos - id.id_pos) as u64 * self.ts_per_byte();
                self.wait_for(now, gap, State::RdSec);
                self.no_delay
            }
            Transfer::WriteSector => {
                self.rqs |= RQS_DRQ;
                self.status.insert(Status::DRQ);
                self.drq_since = now;
                self.state = State::WrSec;
                false
            }
            _ => unreachable!("track ops never reach the ID match path"),
        }
    }

    /// One byte supplied by the host during a sector write.
    fn consume_write_byte(&mut self, now: u64) {
        let value = self.data_reg;
        let drive = &mut self.drives[self.drive_sel];
        if let Some(disk) = drive.disk.as_mut() {
            let side = self.side.min(disk.sides() - 1);
            let cyl = drive.cyl.min(disk.cyls() - 1);
            let track = disk.track_mut(cyl, side);
            if self.rwptr < track.data.len() {
                track.data[self.rwptr] = value;
            }
        }
        self.rwptr += 1;
        self.rwlen -= 1;

        if self.rwlen == 0 {
            self.finish_write(now);
        } else {
            self.drq_since = now;
            let at = now + self.ts_per_byte();
            self.wait_until(at, State::Write);
            self.raise_drq_now_if_collapsed(now);
        }
    }

    /// With delays collapsed the Wait never runs, so re-raise DRQ at once.
    fn raise_drq_now_if_collapsed(&mut self, now: u64) {
        if self.no_delay {
            self.process(now);
        }
    }

    fn finish_read(&mut self, now: u64) {
        match self.transfer {
            Transfer::ReadSector => {
                let crc_ok = {
                    let drive = &self.drives[self.drive_sel];
                    drive.disk.as_ref().is_some_and(|disk| {
                        let side = self.side.min(disk.sides() - 1);
                        let track = disk.track(drive.cyl.min(disk.cyls() - 1), side);
                        let len = self.rwptr - self.data_pos;
                        track.data_crc_ok(self.data_pos, len)
                    })
                };
                if !crc_ok {
                    self.status.insert(Status::CRC_ERROR);
                }
                if self.cmd & 0x10 != 0 && crc_ok {
                    // Multiple-sector read continues with the next record.
                    self.sector_reg = self.sector_reg.wrapping_add(1);
                    self.search_spent = 0;
                    self.state = State::CmdRw;
                    return;
                }
                self.complete(now, Status::empty());
            }
            _ => self.complete(now, Status::empty()),
        }
    }

    fn finish_write(&mut self, now: u64) {
        let len = self.rwptr - self.data_pos;
        let drive = &mut self.drives[self.drive_sel];
        if let Some(disk) = drive.disk.as_mut() {
            let side = self.side.min(disk.sides() - 1);
            let cyl = drive.cyl.min(disk.cyls() - 1);
            let data_pos = self.data_pos;
            disk.track_mut(cyl, side).refresh_data_crc(data_pos, len);
            disk.flags |= DiskFlags::SECTOR_DIRTY;
        }
        if self.cmd & 0x10 != 0 {
            self.sector_reg = self.sector_reg.wrapping_add(1);
            self.search_spent = 0;
            self.state = State::CmdRw;
            self.process(now);
            return;
        }
        self.complete(now, Status::empty());
    }

    /// Interpret the Write Track byte stream and lay down the new track.
    /// 0xF5 writes an A1 sync byte, 0xF6 a C2, 0xF7 the running CRC.
    fn finish_write_track(&mut self) {
        let mut track = Track::with_len(self.fmt_buf.len().max(TRACK_LEN));
        track.data.clear();
        let mut crc: u16 = 0xFFFF;
        let mut sync_run = 0usize;

        let buf = std::mem::take(&mut self.fmt_buf);
        let mut marks = Vec::new();
        for &byte in &buf {
            match byte {
                0xF5 => {
                    track.data.push(0xA1);
                    sync_run += 1;
                    if sync_run >= 3 {
                        crc = crc::CRC_AFTER_SYNC;
                    }
                    continue;
                }
                0xF6 => {
                    track.data.push(0xC2);
                }
                0xF7 => {
                    track.data.push((crc >> 8) as u8);
                    track.data.push(crc as u8);
                }
                _ => {
                    if byte == 0xFE && sync_run >= 3 {
                        marks.push(track.data.len());
                    }
                    crc = crc::crc16(crc, &[byte]);
                    track.data.push(byte);
                }
            }
            sync_run = 0;
        }
        if track.data.len() < TRACK_LEN {
            let fill = TRACK_LEN - track.data.len();
            track.data.extend(std::iter::repeat_n(0x4E, fill));
        }
        track.clear_marks();
        for pos in marks {
            track.set_id_mark(pos);
        }

        let drive = &mut self.drives[self.drive_sel];
        if let Some(disk) = drive.disk.as_mut() {
            let side = self.side.min(disk.sides() - 1);
            let cyl = drive.cyl.min(disk.cyls() - 1);
            disk.set_track(cyl, side, track);
            disk.flags |= DiskFlags::TRACK_FORMATTED;
        }

        self.status.remove(Status::BUSY | Status::DRQ);
        self.rqs = RQS_INTRQ;
        self.state = State::Idle;
    }

    /// A starved transfer (no host access for a full revolution) sets
    /// LOST_DATA and aborts.
    fn check_lost_data(&mut self, now: u64) {
        let transferring = matches!(
            self.state,
            State::Read | State::Write | State::WrSec | State::WrTrackData
        ) || (self.state == State::Wait
            && matches!(
                self.after_wait,
                State::Read | State::Write | State::WrTrackData
            ));
        if transferring
            && self.rqs & RQS_DRQ != 0
            && !self.no_delay
            && now > self.drq_since + self.ts_per_rev()
        {
            self.status.insert(Status::LOST_DATA);
            self.complete(now, Status::empty());
        }
    }

    // -----------------------------------------------------------------------
    // ROM-trap bulk transfer support
    // -----------------------------------------------------------------------

    /// Bytes left in the active transfer.
    #[must_use]
    pub fn transfer_remaining(&self) -> usize {
        self.rwlen
    }

    /// Whether a read-sector transfer is underway (READ, or waiting to
    /// re-enter it).
    #[must_use]
    pub fn in_read_transfer(&self) -> bool {
        matches!(self.state, State::Read | State::RdSec)
            || (self.state == State::Wait
                && matches!(self.after_wait, State::Read | State::RdSec))
    }

    /// Whether a write-sector transfer is underway.
    #[must_use]
    pub fn in_write_transfer(&self) -> bool {
        matches!(self.state, State::Write | State::WrSec)
            || (self.state == State::Wait
                && matches!(self.after_wait, State::Write | State::WrSec))
    }

    /// Whether DRQ is raised.
    #[must_use]
    pub fn drq_pending(&self) -> bool {
        self.rqs & RQS_DRQ != 0
    }

    /// Force-serve the next byte of an active read transfer, ignoring
    /// DRQ pacing. Used by the TR-DOS ROM trap to drain a sector in one
    /// step. Returns `None` once the transfer is finished.
    pub fn trap_read_byte(&mut self, now: u64) -> Option<u8> {
        if !self.in_read_transfer() || self.rwlen == 0 {
            return None;
        }
        let byte = self.current_track_byte();
        self.data_reg = byte;
        self.rwptr += 1;
        self.rwlen -= 1;
        self.rqs &= !RQS_DRQ;
        self.status.remove(Status::DRQ);
        if self.rwlen == 0 {
            self.finish_read(now);
        } else {
            self.drq_since = now;
            self.state = State::Read;
            self.rqs |= RQS_DRQ;
            self.status.insert(Status::DRQ);
        }
        Some(byte)
    }

    /// Force-feed the next byte of an active write transfer, ignoring
    /// DRQ pacing. Returns false once the transfer is finished.
    pub fn trap_write_byte(&mut self, value: u8, now: u64) -> bool {
        if !self.in_write_transfer() || self.rwlen == 0 {
            return false;
        }
        self.data_reg = value;
        self.rqs &= !RQS_DRQ;
        self.status.remove(Status::DRQ);
        self.state = State::Write;
        self.consume_write_byte(now);
        if self.rwlen > 0 {
            self.state = State::Write;
            self.rqs |= RQS_DRQ;
            self.status.insert(Status::DRQ);
        }
        true
    }

    /// Type I verify: any readable header carrying the track number.
    fn verify_track_number(&self) -> bool {
        let drive = &self.drives[self.drive_sel];
        let Some(disk) = drive.disk.as_ref() else {
            return false;
        };
        let side = self.side.min(disk.sides() - 1);
        let track = disk.track(drive.cyl.min(disk.cyls() - 1), side);
        track
            .sector_ids()
            .iter()
            .any(|id| id.cyl == self.track_reg && id.id_crc_ok)
    }

    /// End the command: drop BUSY and DRQ, raise INTRQ.
    fn complete(&mut self, _now: u64, extra: Status) {
        self.status.insert(extra);
        self.status.remove(Status::BUSY | Status::DRQ);
        self.rqs = RQS_INTRQ;
        self.state = State::Idle;
    }
}
