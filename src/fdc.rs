use std::fmt::{self, Debug};

use tracing::{debug, trace};

use crate::error::DiskError;

pub const DRIVES: usize = 4;
pub const SECTOR_SIZE: usize = 256;
pub const SECTORS_PER_TRACK: usize = 16;
pub const MAX_TRACKS: usize = 80;
const TRACK_SIZE: usize = SECTOR_SIZE * SECTORS_PER_TRACK;
/// Raw bytes a write track command consumes.
const RAW_TRACK_SIZE: usize = 6250;

/// Offset of the disk type byte in the TR-DOS system sector (track 0, sector 9).
const DISK_TYPE_OFFSET: usize = 8 * SECTOR_SIZE + 0xE3;

/// Beta 128 system register bits as seen on port 0xFF.
pub const INTRQ: u8 = 0x80;
pub const DRQ: u8 = 0x40;

/// A disk controller reachable through the TR-DOS ports.
pub trait DiskController: Debug {
    /// Reads WD register `register & 3`: status, track, sector, data.
    fn read_register(&mut self, register: u8) -> u8;
    fn write_register(&mut self, register: u8, value: u8);
    /// INTRQ and DRQ lines, in the layout of port 0xFF.
    fn system_status(&self) -> u8;
    /// Beta 128 system register: drive select, reset, side.
    fn write_system(&mut self, value: u8);
    fn insert_disk(&mut self, drive: usize, image: TrdImage) -> Result<(), DiskError>;
    fn eject_disk(&mut self, drive: usize) -> Result<Option<TrdImage>, DiskError>;
    fn reset(&mut self);
}

/// TR-DOS disk image: 16 sectors of 256 bytes per track side, sides
/// interleaved track by track.
#[derive(Clone, PartialEq, Eq)]
pub struct TrdImage {
    data: Vec<u8>,
    tracks: usize,
    sides: usize,
    write_protected: bool,
}

impl TrdImage {
    pub fn new(mut data: Vec<u8>) -> Result<Self, DiskError> {
        if data.is_empty() || data.len() % TRACK_SIZE != 0 {
            return Err(DiskError::InvalidSize(format!(
                "{} bytes is not a whole number of {} byte tracks",
                data.len(),
                TRACK_SIZE
            )));
        }
        let track_sides = data.len() / TRACK_SIZE;
        if track_sides > MAX_TRACKS * 2 {
            return Err(DiskError::InvalidSize(format!(
                "{} track sides, at most {} supported",
                track_sides,
                MAX_TRACKS * 2
            )));
        }

        let sides = match data.get(DISK_TYPE_OFFSET) {
            Some(0x18) | Some(0x19) => 1,
            _ => 2,
        };
        let tracks = if sides == 2 {
            MAX_TRACKS.min((track_sides + 1) / 2).max(1)
        } else {
            MAX_TRACKS.min(track_sides)
        };
        data.resize(tracks * sides * TRACK_SIZE, 0);

        Ok(Self {
            data,
            tracks,
            sides,
            write_protected: false,
        })
    }

    /// Blank double-sided 80 track disk.
    pub fn blank() -> Self {
        Self {
            data: vec![0; MAX_TRACKS * 2 * TRACK_SIZE],
            tracks: MAX_TRACKS,
            sides: 2,
            write_protected: false,
        }
    }

    pub fn with_write_protect(mut self, protect: bool) -> Self {
        self.write_protected = protect;
        self
    }

    pub fn tracks(&self) -> usize {
        self.tracks
    }

    pub fn sides(&self) -> usize {
        self.sides
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte offset of a sector, numbered from 1.
    fn sector_offset(&self, track: usize, side: usize, sector: usize) -> Option<usize> {
        if track >= self.tracks || side >= self.sides || !(1..=SECTORS_PER_TRACK).contains(&sector)
        {
            return None;
        }
        Some(((track * self.sides + side) * SECTORS_PER_TRACK + sector - 1) * SECTOR_SIZE)
    }
}

impl Debug for TrdImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrdImage")
            .field("tracks", &self.tracks)
            .field("sides", &self.sides)
            .field("write_protected", &self.write_protected)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcState {
    Idle,
    /// Type II/III read, bytes waiting in the buffer.
    Read,
    /// Type II/III write, buffer being filled.
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Sector { multiple: bool },
    Address,
    Track,
    Format,
}

/// Western Digital WD1793 as wired on the Beta 128 interface.
#[derive(Debug)]
pub struct Wd1793 {
    command: u8,
    track: u8,
    sector: u8,
    data: u8,
    /// Physical head position.
    head: u8,
    step_out: bool,
    drive: usize,
    side: usize,
    state: FdcState,
    transfer: Option<Transfer>,
    buffer: Vec<u8>,
    position: usize,
    busy: bool,
    drq: bool,
    intrq: bool,
    /// Type I status layout in effect.
    type_one: bool,
    seek_error: bool,
    record_not_found: bool,
    write_fault: bool,
    drives: [Option<TrdImage>; DRIVES],
}

impl Default for Wd1793 {
    fn default() -> Self {
        Self::new()
    }
}

impl Wd1793 {
    pub fn new() -> Self {
        Self {
            command: 0,
            track: 0,
            sector: 1,
            data: 0,
            head: 0,
            step_out: false,
            drive: 0,
            side: 0,
            state: FdcState::Idle,
            transfer: None,
            buffer: Vec::new(),
            position: 0,
            busy: false,
            drq: false,
            intrq: false,
            type_one: true,
            seek_error: false,
            record_not_found: false,
            write_fault: false,
            drives: Default::default(),
        }
    }

    pub fn state(&self) -> FdcState {
        self.state
    }

    pub fn drive(&self) -> usize {
        self.drive
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn disk(&self, drive: usize) -> Option<&TrdImage> {
        self.drives.get(drive).and_then(Option::as_ref)
    }

    fn current_disk(&self) -> Option<&TrdImage> {
        self.drives[self.drive].as_ref()
    }

    fn status(&self) -> u8 {
        let disk = self.current_disk();
        let mut status = 0;
        if disk.is_none() {
            status |= 0x80;
        }
        if disk.map_or(false, TrdImage::is_write_protected) {
            status |= 0x40;
        }
        if self.busy {
            status |= 0x01;
        }

        if self.type_one {
            // head loaded
            status |= 0x20;
            if self.seek_error {
                status |= 0x10;
            }
            if self.head == 0 {
                status |= 0x04;
            }
        } else {
            if self.write_fault {
                status |= 0x20;
            }
            if self.record_not_found {
                status |= 0x10;
            }
            if self.drq {
                status |= 0x02;
            }
        }
        status
    }

    fn finish(&mut self) {
        self.busy = false;
        self.drq = false;
        self.intrq = true;
        self.state = FdcState::Idle;
        self.transfer = None;
        self.buffer.clear();
        self.position = 0;
    }

    fn execute(&mut self, command: u8) {
        trace!("[FDC] Command {:02X} drive {} side {}", command, self.drive, self.side);
        self.command = command;
        self.intrq = false;
        self.seek_error = false;
        self.record_not_found = false;
        self.write_fault = false;

        match command >> 4 {
            0x0 => self.seek_to(0, command),
            0x1 => self.seek_to(self.data, command),
            0x2 | 0x3 => self.step(self.step_out, command),
            0x4 | 0x5 => self.step(false, command),
            0x6 | 0x7 => self.step(true, command),
            0x8 | 0x9 => self.read_sector(command & 0x10 != 0),
            0xA | 0xB => self.begin_write(Transfer::Sector {
                multiple: command & 0x10 != 0,
            }),
            0xC => self.read_address(),
            0xD => self.force_interrupt(command),
            0xE => self.read_track(),
            _ => self.begin_write(Transfer::Format),
        }
    }

    fn verify_track(&mut self, command: u8) {
        if command & 0x04 == 0 {
            return;
        }
        let tracks = self.current_disk().map_or(0, TrdImage::tracks);
        if self.head as usize >= tracks || self.track != self.head {
            self.seek_error = true;
        }
    }

    fn seek_to(&mut self, target: u8, command: u8) {
        self.type_one = true;
        self.step_out = target < self.track;
        self.head = target.min(MAX_TRACKS as u8 - 1);
        self.track = target;
        self.verify_track(command);
        self.finish();
    }

    fn step(&mut self, out: bool, command: u8) {
        self.type_one = true;
        self.step_out = out;
        if out {
            self.head = self.head.saturating_sub(1);
        } else if (self.head as usize) < MAX_TRACKS - 1 {
            self.head += 1;
        }
        if command & 0x10 != 0 {
            self.track = if out {
                self.track.saturating_sub(1)
            } else {
                self.track.saturating_add(1)
            };
        }
        self.verify_track(command);
        self.finish();
    }

    fn locate(&self) -> Option<usize> {
        let disk = self.current_disk()?;
        if self.track != self.head {
            return None;
        }
        disk.sector_offset(self.head as usize, self.side, self.sector as usize)
    }

    fn start_read(&mut self, transfer: Transfer, bytes: Vec<u8>) {
        self.buffer = bytes;
        self.position = 0;
        self.transfer = Some(transfer);
        self.state = FdcState::Read;
        self.busy = true;
        self.drq = true;
    }

    fn read_sector(&mut self, multiple: bool) {
        self.type_one = false;
        let Some(offset) = self.locate() else {
            self.record_not_found = true;
            self.finish();
            return;
        };
        let bytes = self.current_disk().map_or_else(Vec::new, |disk| {
            disk.data[offset..offset + SECTOR_SIZE].to_vec()
        });
        self.start_read(Transfer::Sector { multiple }, bytes);
    }

    fn read_address(&mut self) {
        self.type_one = false;
        if self.current_disk().is_none() {
            self.record_not_found = true;
            self.finish();
            return;
        }
        // size code 1: 256 byte sectors
        let id = vec![self.head, self.side as u8, self.sector, 0x01, 0x00, 0x00];
        self.sector = self.head;
        self.start_read(Transfer::Address, id);
    }

    fn read_track(&mut self) {
        self.type_one = false;
        let head = self.head as usize;
        let side = self.side;
        let bytes = self
            .current_disk()
            .and_then(|disk| {
                let start = disk.sector_offset(head, side, 1)?;
                Some(disk.data[start..start + TRACK_SIZE].to_vec())
            });
        match bytes {
            Some(bytes) => self.start_read(Transfer::Track, bytes),
            None => {
                self.record_not_found = true;
                self.finish();
            }
        }
    }

    fn begin_write(&mut self, transfer: Transfer) {
        self.type_one = false;
        let Some(disk) = self.current_disk() else {
            self.record_not_found = true;
            self.finish();
            return;
        };
        if disk.is_write_protected() {
            self.write_fault = true;
            self.finish();
            return;
        }
        let len = match transfer {
            Transfer::Format => RAW_TRACK_SIZE,
            _ => {
                if self.locate().is_none() {
                    self.record_not_found = true;
                    self.finish();
                    return;
                }
                SECTOR_SIZE
            }
        };
        self.buffer = vec![0; len];
        self.position = 0;
        self.transfer = Some(transfer);
        self.state = FdcState::Write;
        self.busy = true;
        self.drq = true;
    }

    fn force_interrupt(&mut self, command: u8) {
        let was_busy = self.busy;
        self.busy = false;
        self.drq = false;
        self.state = FdcState::Idle;
        self.transfer = None;
        if !was_busy {
            self.type_one = true;
        }
        self.intrq = command & 0x0F != 0;
    }

    fn read_data(&mut self) -> u8 {
        if self.state != FdcState::Read {
            return self.data;
        }
        self.data = self.buffer.get(self.position).copied().unwrap_or(0);
        self.position += 1;
        if self.position >= self.buffer.len() {
            self.complete_read();
        }
        self.data
    }

    fn complete_read(&mut self) {
        if let Some(Transfer::Sector { multiple: true }) = self.transfer {
            if (self.sector as usize) < SECTORS_PER_TRACK {
                self.sector += 1;
                self.read_sector(true);
                return;
            }
        }
        self.finish();
    }

    fn write_data(&mut self, value: u8) {
        self.data = value;
        if self.state != FdcState::Write {
            return;
        }
        if let Some(byte) = self.buffer.get_mut(self.position) {
            *byte = value;
            self.position += 1;
        }
        if self.position >= self.buffer.len() {
            self.complete_write();
        }
    }

    fn complete_write(&mut self) {
        let head = self.head as usize;
        let side = self.side;
        let transfer = self.transfer;
        let offset = match transfer {
            Some(Transfer::Format) => self.drives[self.drive]
                .as_ref()
                .and_then(|disk| disk.sector_offset(head, side, 1)),
            _ => self.locate(),
        };
        let buffer = std::mem::take(&mut self.buffer);

        if let (Some(disk), Some(offset)) = (self.drives[self.drive].as_mut(), offset) {
            match transfer {
                Some(Transfer::Format) => disk.data[offset..offset + TRACK_SIZE].fill(0),
                _ => disk.data[offset..offset + SECTOR_SIZE].copy_from_slice(&buffer),
            }
        }

        if let Some(Transfer::Sector { multiple: true }) = transfer {
            if (self.sector as usize) < SECTORS_PER_TRACK {
                self.sector += 1;
                self.begin_write(Transfer::Sector { multiple: true });
                return;
            }
        }
        self.finish();
    }
}

impl DiskController for Wd1793 {
    fn read_register(&mut self, register: u8) -> u8 {
        match register & 3 {
            0 => {
                self.intrq = false;
                self.status()
            }
            1 => self.track,
            2 => self.sector,
            _ => self.read_data(),
        }
    }

    fn write_register(&mut self, register: u8, value: u8) {
        match register & 3 {
            0 => {
                // only force interrupt is accepted while busy
                if !self.busy || value >> 4 == 0xD {
                    self.execute(value);
                }
            }
            1 => self.track = value,
            2 => self.sector = value,
            _ => self.write_data(value),
        }
    }

    fn system_status(&self) -> u8 {
        let mut lines = 0;
        if self.intrq {
            lines |= INTRQ;
        }
        if self.drq {
            lines |= DRQ;
        }
        lines
    }

    fn write_system(&mut self, value: u8) {
        self.drive = (value & 3) as usize;
        if value & 0x04 == 0 {
            debug!("[FDC] Reset via system register");
            self.reset();
        }
        let double_sided = self.current_disk().map_or(false, |disk| disk.sides() == 2);
        self.side = if value & 0x10 != 0 || !double_sided { 0 } else { 1 };
    }

    fn insert_disk(&mut self, drive: usize, image: TrdImage) -> Result<(), DiskError> {
        let slot = self.drives.get_mut(drive).ok_or(DiskError::InvalidDrive(drive))?;
        debug!("[FDC] Disk in drive {}: {:?}", drive, image);
        *slot = Some(image);
        Ok(())
    }

    fn eject_disk(&mut self, drive: usize) -> Result<Option<TrdImage>, DiskError> {
        let slot = self.drives.get_mut(drive).ok_or(DiskError::InvalidDrive(drive))?;
        Ok(slot.take())
    }

    fn reset(&mut self) {
        self.command = 0;
        self.track = 0;
        self.sector = 1;
        self.data = 0;
        self.head = 0;
        self.step_out = false;
        self.state = FdcState::Idle;
        self.transfer = None;
        self.buffer.clear();
        self.position = 0;
        self.busy = false;
        self.drq = false;
        self.intrq = false;
        self.type_one = true;
        self.seek_error = false;
        self.record_not_found = false;
        self.write_fault = false;
    }
}

impl fmt::Display for Wd1793 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WD1793 {{ command: {:02X}, drive: {}, side: {}, track: {}, sector: {}, status: {:02X}, state: {:?} }}",
            self.command,
            self.drive,
            self.side,
            self.track,
            self.sector,
            self.status(),
            self.state
        )
    }
}
