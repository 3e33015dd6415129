use derivative::Derivative;
use tracing::{debug, error, info};

use crate::{
    audio::AudioMixer,
    bank::{BackingStore, RomSet, SerialRam, SwapFile, PAGE_SIZE},
    clock::Clock,
    config::MachineConfig,
    cpu::BreakpointHit,
    error::{DiskError, MachineError},
    fdc::{DiskController, TrdImage, Wd1793},
    keyboard::Keyboard,
    memory::{MemoryMap, PageId, PagingLatch},
    psg::{Ay38912, SoundChip},
    timing::TimingProfile,
    video::{DrawState, SnowSource, Video},
};

/// The owned emulator context: time base, paged memory, beam and devices.
/// Every bus cycle goes through here so the beam sees each T-state spent.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Bus {
    pub(crate) config: MachineConfig,
    profile: TimingProfile,
    pub clock: Clock,
    pub memory: MemoryMap,
    pub video: Video,
    pub keyboard: Keyboard,
    pub(crate) latch: PagingLatch,
    pub(crate) psg: Option<Box<dyn SoundChip>>,
    pub(crate) fdc: Box<dyn DiskController>,
    #[derivative(Debug = "ignore")]
    pub(crate) audio: AudioMixer,
    pub(crate) port254: u8,
    pub(crate) tape_ear: bool,
    pub(crate) breakpoint: Option<BreakpointHit>,
    /// I and R as of the current instruction.
    refresh: (u8, u8),
    frame_states: u32,
    int_end: u32,
}

impl Bus {
    pub fn new(config: &MachineConfig, roms: &RomSet) -> Result<Self, MachineError> {
        config.validate()?;
        let profile = TimingProfile::for_arch(config.arch, config.late_timing);
        profile.validate()?;
        roms.validate(config.arch)?;

        let store: Box<dyn BackingStore> = match &config.swap_path {
            Some(path) => Box::new(SwapFile::create(path)?),
            None => Box::new(SerialRam::new()),
        };
        let memory = MemoryMap::with_store(config.arch, roms, config.resident_pages, store);
        let snow = config.snow() && !config.arch.is_pentagon();
        let audio = AudioMixer::new(&profile, config.turbo);
        let psg = config
            .ay_enabled()
            .then(|| Box::new(Ay38912::new(audio.ay_divisor())) as Box<dyn SoundChip>);

        info!(
            "[BUS] {} machine, {} T-states a frame, turbo {}",
            config.arch.name(),
            profile.frame_states(config.turbo),
            config.turbo
        );

        let mut bus = Self {
            config: config.clone(),
            profile,
            clock: Clock::new(),
            memory,
            video: Video::new(profile, snow, config.blend),
            keyboard: Keyboard::new(),
            latch: PagingLatch::default(),
            psg,
            fdc: Box::new(Wd1793::new()),
            audio,
            port254: 0,
            tape_ear: false,
            breakpoint: None,
            refresh: (0, 0),
            frame_states: profile.frame_states(config.turbo),
            int_end: profile.int_window_end(config.turbo),
        };
        bus.reset();
        Ok(bus)
    }

    /// Clears counters, latches and devices. RAM contents are kept.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.latch = PagingLatch::default();
        self.memory.reset();
        self.remap();
        self.video.reset();
        if let Some(psg) = self.psg.as_deref_mut() {
            psg.reset();
        }
        self.fdc.reset();
        self.audio = AudioMixer::new(&self.profile, self.config.turbo);
        self.port254 = 0;
        self.breakpoint = None;
        self.refresh = (0, 0);
        debug!("[BUS] Reset");
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn profile(&self) -> &TimingProfile {
        &self.profile
    }

    pub fn latch(&self) -> PagingLatch {
        self.latch
    }

    /// CPU T-states per frame, turbo included.
    pub fn frame_states(&self) -> u32 {
        self.frame_states
    }

    pub fn int_end(&self) -> u32 {
        self.int_end
    }

    pub fn port254(&self) -> u8 {
        self.port254
    }

    pub fn set_tape_ear(&mut self, ear: bool) {
        self.tape_ear = ear;
    }

    pub fn set_refresh(&mut self, i: u8, r: u8) {
        self.refresh = (i, r);
    }

    /// Page the ULA is showing.
    pub fn vram(&self) -> &[u8; PAGE_SIZE] {
        self.memory.ram_page(self.latch.screen_bank())
    }

    pub fn sound_chip(&self) -> Option<&dyn SoundChip> {
        self.psg.as_deref()
    }

    pub fn set_sound_chip(&mut self, chip: Option<Box<dyn SoundChip>>) {
        self.psg = chip;
    }

    pub fn set_disk_controller(&mut self, fdc: Box<dyn DiskController>) {
        self.fdc = fdc;
    }

    pub fn disk_controller(&self) -> &dyn DiskController {
        self.fdc.as_ref()
    }

    pub fn insert_disk(&mut self, drive: usize, image: TrdImage) -> Result<(), DiskError> {
        self.fdc.insert_disk(drive, image)
    }

    pub fn eject_disk(&mut self, drive: usize) -> Result<Option<TrdImage>, DiskError> {
        self.fdc.eject_disk(drive)
    }

    /// Samples of the last completed frame.
    pub fn audio_samples(&self) -> &[u8] {
        self.audio.samples()
    }

    pub fn breakpoint(&self) -> Option<BreakpointHit> {
        self.breakpoint
    }

    pub(crate) fn latch_breakpoint(&mut self, hit: BreakpointHit) {
        if self.breakpoint.is_none() {
            debug!("[BUS] Breakpoint {:?} at T {}", hit, self.clock.tstates);
            self.breakpoint = Some(hit);
        }
    }

    pub fn clear_breakpoint(&mut self) {
        self.breakpoint = None;
    }

    /// Re-resolves slots 0 and 3 from the latch.
    pub(crate) fn remap(&mut self) {
        if let Err(err) = self.memory.apply_latch(&self.latch) {
            error!("[MEM] Could not apply paging latch {:?}: {}", self.latch, err);
        }
    }

    /// Spends `states` T-states on the bus.
    #[inline]
    pub fn draw(&mut self, states: u32, contended: bool) {
        let vram = self.memory.ram_page(self.latch.screen_bank());
        self.video.draw(&mut self.clock, vram, states, contended);
    }

    /// Spends the fetch half of an M1 cycle at `address`.
    pub fn draw_opcode(&mut self, address: u16) {
        let contended = self.memory.address_contended(address);
        let snow = self.snow_page();
        let vram = self.memory.ram_page(self.latch.screen_bank());
        let source = snow.map(|bank| SnowSource {
            page: self.memory.ram_page(bank),
            r: self.refresh.1,
        });
        self.video
            .draw_opcode(&mut self.clock, vram, contended, source);
    }

    /// Bank whose bytes the refresh address exposes to the ULA, when the
    /// I register points at contended memory.
    fn snow_page(&self) -> Option<usize> {
        if !self.video.snow_mode() {
            return None;
        }
        let page = self.refresh.0 & 0xC0;
        if page == 0x40 {
            return Some(self.latch.screen_bank());
        }
        if self.config.arch.has_128k_paging() && page == 0xC0 && self.latch.bank & 1 == 1 {
            return Some(match (self.latch.bank, self.latch.video) {
                (1 | 3, true) => 3,
                (1 | 3, false) => 1,
                _ => self.latch.screen_bank(),
            });
        }
        None
    }

    /// Opcode fetch: TR-DOS paging traps, M1 timing, then the read.
    pub fn fetch_opcode(&mut self, address: u16) -> u8 {
        self.trdos_trap(address);
        self.draw_opcode(address);
        self.memory.read(address)
    }

    fn trdos_trap(&mut self, address: u16) {
        if !self.memory.has_trdos() {
            return;
        }
        if self.latch.trdos {
            if address >= 0x4000 {
                self.latch.trdos = false;
                self.remap();
            }
        } else if address & 0xFF00 == 0x3D00
            && self.memory.slot(0) == PageId::Rom(self.config.arch.basic_rom())
        {
            debug!("[BUS] TR-DOS paged in at {:04X}", address);
            self.latch.trdos = true;
            self.remap();
        }
    }

    pub fn peek8(&mut self, address: u16) -> u8 {
        let contended = self.memory.address_contended(address);
        self.draw(3, contended);
        self.memory.read(address)
    }

    fn writable(&self, address: u16) -> bool {
        matches!(self.memory.slot((address >> 14) as usize), PageId::Ram(_))
    }

    /// Writes to ROM cost an uncontended cycle and are dropped.
    pub fn poke8(&mut self, address: u16, value: u8) {
        if !self.writable(address) {
            self.draw(3, false);
            return;
        }
        let contended = self.memory.address_contended(address);
        self.draw(3, contended);
        self.memory.write(address, value);
    }

    pub fn peek16(&mut self, address: u16) -> u16 {
        if address & 0x3FFF == 0x3FFF {
            let lsb = self.peek8(address);
            let msb = self.peek8(address.wrapping_add(1));
            return u16::from_le_bytes([lsb, msb]);
        }
        self.word_cycles(address);
        let lsb = self.memory.read(address);
        let msb = self.memory.read(address + 1);
        u16::from_le_bytes([lsb, msb])
    }

    pub fn poke16(&mut self, address: u16, value: u16) {
        let [lsb, msb] = value.to_le_bytes();
        if address & 0x3FFF == 0x3FFF {
            self.poke8(address, lsb);
            self.poke8(address.wrapping_add(1), msb);
            return;
        }
        if !self.writable(address) {
            self.draw(6, false);
            return;
        }
        self.word_cycles(address);
        self.memory.write(address, lsb);
        self.memory.write(address + 1, msb);
    }

    fn word_cycles(&mut self, address: u16) {
        if self.memory.address_contended(address) {
            self.draw(3, true);
            self.draw(3, true);
        } else {
            self.draw(6, false);
        }
    }

    /// Internal CPU cycles with `address` on the bus. Contended addresses
    /// are charged a T-state at a time.
    pub fn address_on_bus(&mut self, address: u16, states: u32) {
        if self.memory.address_contended(address) {
            for _ in 0..states {
                self.draw(1, true);
            }
        } else {
            self.draw(states, false);
        }
    }

    /// Halted M1 cycles one opcode at a time up to `end`, for contended or
    /// snowy screens. Returns the number of fetches.
    pub fn halt_fetches(&mut self, pc: u16, end: u32) -> u32 {
        let mut fetches = 0;
        while self.clock.tstates < end {
            self.draw_opcode(pc);
            let (i, r) = self.refresh;
            self.refresh = (i, (r & 0x80) | (r.wrapping_add(1) & 0x7F));
            fetches += 1;
        }
        fetches
    }

    /// Renders the rest of the pixel area and skips time to `end` in whole
    /// opcode fetches. Returns the number of fetches skipped.
    pub fn skip_halted(&mut self, end: u32) -> u32 {
        let pre = self.clock.tstates;
        if pre >= end {
            return 0;
        }
        let line = self.profile.tstates_per_line;
        while self.video.state() != DrawState::Blank {
            self.draw(line, false);
        }
        self.clock.tstates = pre;

        let mut fetches = (end - pre) >> 2;
        if pre & 3 != 0 {
            fetches += 1;
        }
        self.clock.advance(fetches << 2);
        fetches
    }

    /// Closes a completed frame: beam, audio, then the clock rolls back one
    /// frame.
    pub fn end_frame(&mut self) {
        self.video.end_frame(self.clock.tstates);
        self.audio.beeper_catch_up(self.clock.tstates);
        if let Some(psg) = self.psg.as_deref_mut() {
            self.audio.ay_finish(psg);
        }
        self.audio.end_frame();
        self.clock.end_frame(self.frame_states);
    }

    /// Closes a frame cut short. The clock keeps its position.
    pub fn abort_frame(&mut self) {
        self.video.end_frame(self.clock.tstates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Architecture;

    fn bus(arch: Architecture) -> Bus {
        let rom0 = vec![0xC9u8; PAGE_SIZE];
        let rom1 = vec![0xC9u8; PAGE_SIZE];
        let roms = RomSet::new(&[&rom0, &rom1]);
        Bus::new(&MachineConfig::new(arch), &roms).unwrap()
    }

    #[test]
    fn test_rom_write_dropped_but_timed() {
        let mut bus = bus(Architecture::Spectrum48);
        bus.poke8(0x0010, 0x55);
        assert_eq!(bus.clock.tstates, 3);
        assert_eq!(bus.memory.peek(0x0010), 0xC9);

        bus.poke8(0x8000, 0x55);
        assert_eq!(bus.clock.tstates, 6);
        assert_eq!(bus.memory.peek(0x8000), 0x55);
    }

    #[test]
    fn test_contended_read_in_pixel_window() {
        let mut bus = bus(Architecture::Spectrum48);
        let start = bus.profile().screen_start;
        bus.draw(start, false);

        bus.peek8(0x4000);
        assert_eq!(bus.clock.tstates, start + 6 + 3);
        assert_eq!(bus.clock.wait_states, 6);

        // slot 2 is never contended
        let before = bus.clock.tstates;
        bus.peek8(0x8000);
        assert_eq!(bus.clock.tstates, before + 3);
    }

    #[test]
    fn test_word_access_costs_six() {
        let mut bus = bus(Architecture::Spectrum48);
        bus.poke16(0x8000, 0x1234);
        assert_eq!(bus.peek16(0x8000), 0x1234);
        assert_eq!(bus.clock.tstates, 12);

        // page crossing falls back to byte cycles
        bus.poke16(0xBFFF, 0xABCD);
        assert_eq!(bus.memory.peek(0xBFFF), 0xCD);
        assert_eq!(bus.memory.peek(0xC000), 0xAB);
    }

    #[test]
    fn test_contended_address_on_bus() {
        let mut bus = bus(Architecture::Spectrum48);
        let start = bus.profile().screen_start;
        bus.draw(start, false);
        bus.address_on_bus(0x4000, 2);
        assert!(bus.clock.wait_states > 0);

        let before = bus.clock.tstates;
        bus.address_on_bus(0x8000, 2);
        assert_eq!(bus.clock.tstates, before + 2);
    }

    #[test]
    fn test_trdos_traps() {
        let rom = vec![0u8; PAGE_SIZE];
        let trdos = vec![0xAAu8; PAGE_SIZE];
        let roms = RomSet::new(&[&rom]).with_trdos(&trdos);
        let mut bus = Bus::new(&MachineConfig::new(Architecture::Spectrum48), &roms).unwrap();

        assert_eq!(bus.fetch_opcode(0x3D2F), 0xAA);
        assert!(bus.latch().trdos);
        assert_eq!(bus.fetch_opcode(0x0000), 0xAA);

        bus.fetch_opcode(0x5CC2);
        assert!(!bus.latch().trdos);
        assert_eq!(bus.memory.peek(0x0000), 0);
    }

    #[test]
    fn test_skip_halted_rounds_to_fetches() {
        let mut bus = bus(Architecture::Spectrum48);
        bus.clock.advance(2);
        let end = bus.frame_states() - bus.int_end();
        let fetches = bus.skip_halted(end);

        assert_eq!(fetches, (end - 2) / 4 + 1);
        assert_eq!(bus.clock.tstates, 2 + fetches * 4);
        assert!(bus.clock.tstates >= end);
        assert_eq!(bus.video.state(), DrawState::Blank);
    }

    #[test]
    fn test_end_frame_wraps_exactly_one_frame() {
        let mut bus = bus(Architecture::Spectrum128);
        bus.draw(70908 + 5, false);
        bus.end_frame();
        assert_eq!(bus.clock.tstates, 5);
        assert_eq!(bus.clock.global_tstates, 70908);
        assert_eq!(bus.audio_samples().len(), 622);
    }
}
