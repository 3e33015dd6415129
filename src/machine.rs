use std::{cell::RefCell, rc::Rc};

use tracing::{debug, info};

use crate::{
    bank::RomSet,
    bus::Bus,
    clock::TimingInfo,
    config::{Architecture, MachineConfig},
    cpu::{run_frame, Cpu, FrameControl, FrameOutcome, Z80Core},
    error::{ConfigError, MachineError},
    fdc::TrdImage,
    internal_state::{InternalState, RegisterName, ReportState},
    keyboard::JoystickButton,
    memory::MemoryStats,
    palette,
    sync::{FramePacer, FrameSignal, FrameTiming, HostTime, TimeSource},
    utils::hexdump,
};

pub struct Machine {
    pub bus: Rc<RefCell<Bus>>,
    pub cpu: Cpu,
    control: FrameControl,
    pacer: FramePacer,
}

impl Machine {
    pub fn new(config: &MachineConfig, roms: &RomSet) -> Result<Self, MachineError> {
        Self::with_time_source(config, roms, Box::new(HostTime::default()))
    }

    pub fn with_time_source(
        config: &MachineConfig,
        roms: &RomSet,
        time: Box<dyn TimeSource>,
    ) -> Result<Self, MachineError> {
        info!("[MACHINE] Initializing {}", config.arch.name());
        let bus = Bus::new(config, roms)?;
        let pacer = FramePacer::new(bus.profile(), config.throttle, config.vsync_finetune, time);
        let bus = Rc::new(RefCell::new(bus));
        let cpu = Cpu::new(bus.clone());

        Ok(Self {
            bus,
            cpu,
            control: FrameControl {
                pc_breakpoint: config.breakpoints.pc,
                ..Default::default()
            },
            pacer,
        })
    }

    pub fn config(&self) -> MachineConfig {
        self.bus.borrow().config().clone()
    }

    pub fn arch(&self) -> Architecture {
        self.bus.borrow().config().arch
    }

    /// Cold start. Counters, latches and the CPU are cleared; RAM is kept.
    pub fn reset(&mut self) -> Result<(), MachineError> {
        self.bus.borrow().config().validate()?;
        self.bus.borrow_mut().reset();
        self.cpu.reset();
        self.control.paused = false;
        self.control.nmi_pending = false;
        self.pacer.reset();
        debug!("[MACHINE] Reset");
        Ok(())
    }

    /// Emulates one frame without pacing.
    pub fn step_frame(&mut self) -> FrameOutcome {
        run_frame(&mut self.cpu, &mut self.control)
    }

    /// Emulates one frame and waits out the rest of its wall-clock budget.
    pub fn run_frame(&mut self) -> FrameOutcome {
        self.pacer.begin_frame();
        let outcome = self.step_frame();
        if outcome == FrameOutcome::Completed {
            self.pacer.end_frame();
        }
        outcome
    }

    /// Runs up to `frames` paced frames, stopping early on a pause or breakpoint.
    pub fn run(&mut self, frames: usize) -> FrameOutcome {
        for _ in 0..frames {
            let outcome = self.run_frame();
            if outcome != FrameOutcome::Completed {
                return outcome;
            }
        }
        FrameOutcome::Completed
    }

    /// Executes a single instruction. Returns the T-states it took.
    pub fn step(&mut self) -> u32 {
        self.cpu.step()
    }

    pub fn pc(&self) -> u16 {
        self.cpu.pc()
    }

    pub fn halted(&self) -> bool {
        self.cpu.halted()
    }

    pub fn set_register(&mut self, name: RegisterName, value: u16) -> Result<(), MachineError> {
        self.cpu.set_register(name, value)
    }

    /// Register by its loader name, `"HL'"` or `"HL2"` for the alternate set.
    pub fn set_register_named(&mut self, name: &str, value: u16) -> anyhow::Result<()> {
        let name: RegisterName = name.parse().map_err(anyhow::Error::msg)?;
        self.set_register(name, value)?;
        Ok(())
    }

    pub fn load_memory_page(&mut self, bank: usize, bytes: &[u8]) -> Result<(), MachineError> {
        self.bus.borrow_mut().memory.load_ram_page(bank, bytes)?;
        debug!("[MACHINE] Loaded {} bytes into bank {}", bytes.len(), bank);
        Ok(())
    }

    pub fn set_bank_latch(&mut self, value: u8) {
        self.bus.borrow_mut().set_bank_latch(value);
    }

    pub fn set_border_color(&mut self, colour: u8) {
        let mut bus = self.bus.borrow_mut();
        bus.port254 = (bus.port254 & 0xF8) | (colour & 7);
        bus.video.set_border_colour(colour);
    }

    pub fn insert_disk(&mut self, drive: usize, image: TrdImage) -> Result<(), MachineError> {
        info!("[MACHINE] Inserting disk into drive {}", drive);
        Ok(self.bus.borrow_mut().insert_disk(drive, image)?)
    }

    pub fn eject_disk(&mut self, drive: usize) -> Result<Option<TrdImage>, MachineError> {
        info!("[MACHINE] Ejecting disk from drive {}", drive);
        Ok(self.bus.borrow_mut().eject_disk(drive)?)
    }

    /// Raised at the start of the next frame.
    pub fn trigger_nmi(&mut self) {
        self.control.nmi_pending = true;
    }

    pub fn pause(&mut self) {
        self.control.paused = true;
    }

    /// Leaves a pause or a breakpoint stop.
    pub fn resume(&mut self) {
        self.control.paused = false;
        self.bus.borrow_mut().clear_breakpoint();
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused
    }

    pub fn set_pc_breakpoint(&mut self, pc: Option<u16>) {
        self.control.pc_breakpoint = pc;
    }

    pub fn set_throttle(&mut self, throttle: bool) {
        self.pacer.set_throttle(throttle);
    }

    pub fn last_frame_timing(&self) -> FrameTiming {
        self.pacer.last()
    }

    /// Handle for a display thread.
    pub fn frame_signal(&self) -> FrameSignal {
        self.pacer.signal()
    }

    pub fn memory_dump(&self, start: u16, end: u16) -> String {
        let bus = self.bus.borrow();
        hexdump(|address| bus.memory.peek(address), start, end)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.bus.borrow().memory.stats()
    }

    pub fn timing_info(&self) -> TimingInfo {
        let bus = self.bus.borrow();
        bus.clock.timing_info(bus.profile().tstates_per_line)
    }

    pub fn tstates(&self) -> u32 {
        self.bus.borrow().clock.tstates
    }

    pub fn frames(&self) -> u64 {
        self.bus.borrow().clock.frame_count()
    }

    /// Palette indices of the last completed frame, 320x240.
    pub fn screen(&self) -> Vec<u8> {
        self.bus.borrow().video.buffers().front().to_vec()
    }

    pub fn screen_rgba(&self) -> Vec<u8> {
        palette::to_rgba(self.bus.borrow().video.buffers().front())
    }

    pub fn audio_samples(&self) -> Vec<u8> {
        self.bus.borrow().audio_samples().to_vec()
    }

    pub fn key_down(&mut self, code: &str) {
        self.bus.borrow_mut().keyboard.key_down(code);
    }

    pub fn key_up(&mut self, code: &str) {
        self.bus.borrow_mut().keyboard.key_up(code);
    }

    pub fn set_joystick(&mut self, button: JoystickButton, pressed: bool) {
        self.bus.borrow_mut().keyboard.set_button(button, pressed);
    }

    pub fn set_tape_ear(&mut self, ear: bool) {
        self.bus.borrow_mut().set_tape_ear(ear);
    }
}

impl ReportState for Machine {
    fn report_state(&mut self) -> anyhow::Result<InternalState> {
        self.cpu.report_state()
    }
}

#[derive(Default)]
pub struct MachineBuilder {
    config: Option<MachineConfig>,
    roms: Option<RomSet>,
    time: Option<Box<dyn TimeSource>>,
}

impl MachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arch(&mut self, arch: Architecture) -> &mut Self {
        self.config = Some(MachineConfig::new(arch));
        self
    }

    pub fn config(&mut self, config: MachineConfig) -> &mut Self {
        self.config = Some(config);
        self
    }

    pub fn roms(&mut self, roms: RomSet) -> &mut Self {
        self.roms = Some(roms);
        self
    }

    pub fn system_rom(&mut self, data: &[u8]) -> &mut Self {
        let roms = self.roms.get_or_insert_with(RomSet::default);
        roms.system.push(data.to_vec());
        self
    }

    pub fn trdos_rom(&mut self, data: &[u8]) -> &mut Self {
        let roms = self.roms.get_or_insert_with(RomSet::default);
        roms.trdos = Some(data.to_vec());
        self
    }

    pub fn time_source(&mut self, time: Box<dyn TimeSource>) -> &mut Self {
        self.time = Some(time);
        self
    }

    pub fn build(&mut self) -> Result<Machine, MachineError> {
        let config = self
            .config
            .clone()
            .unwrap_or_else(|| MachineConfig::new(Architecture::Spectrum48));
        let roms = self
            .roms
            .as_ref()
            .ok_or(ConfigError::MissingRom(config.arch.name()))?;
        let time = self
            .time
            .take()
            .unwrap_or_else(|| Box::new(HostTime::default()));
        Machine::with_time_source(&config, roms, time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bank::PAGE_SIZE, cpu::BreakpointHit, sync::ManualTime};

    fn rom_with(program: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; PAGE_SIZE];
        rom[..program.len()].copy_from_slice(program);
        rom
    }

    #[test]
    fn test_builder_requires_roms() {
        let result = MachineBuilder::new().arch(Architecture::Spectrum128).build();
        assert!(matches!(
            result,
            Err(MachineError::Config(ConfigError::MissingRom(_)))
        ));
    }

    #[test]
    fn test_halted_frame_completes() {
        // DI; HALT
        let mut machine = MachineBuilder::new()
            .system_rom(&rom_with(&[0xF3, 0x76]))
            .time_source(Box::new(ManualTime::new()))
            .build()
            .unwrap();

        assert_eq!(machine.step_frame(), FrameOutcome::Completed);
        assert!(machine.halted());
        assert_eq!(machine.frames(), 1);
        assert!(machine.tstates() < 69888);
    }

    #[test]
    fn test_pc_breakpoint_and_resume() {
        // 0000: NOP; NOP; JR 0000
        let mut machine = MachineBuilder::new()
            .system_rom(&rom_with(&[0x00, 0x00, 0x18, 0xFC]))
            .time_source(Box::new(ManualTime::new()))
            .build()
            .unwrap();
        machine.set_pc_breakpoint(Some(0x0002));

        let outcome = machine.step_frame();
        assert_eq!(outcome, FrameOutcome::Breakpoint(BreakpointHit::Pc(0x0002)));
        assert_eq!(machine.pc(), 0x0002);
        assert_eq!(machine.tstates(), 8);

        // Still latched until resumed.
        assert_eq!(
            machine.step_frame(),
            FrameOutcome::Breakpoint(BreakpointHit::Pc(0x0002))
        );
        assert_eq!(machine.tstates(), 8);

        machine.resume();
        machine.set_pc_breakpoint(None);
        assert_eq!(machine.step_frame(), FrameOutcome::Completed);
        assert_eq!(machine.frames(), 1);
    }

    #[test]
    fn test_pause_keeps_clock() {
        let mut machine = MachineBuilder::new()
            .system_rom(&rom_with(&[]))
            .time_source(Box::new(ManualTime::new()))
            .build()
            .unwrap();
        machine.pause();
        assert_eq!(machine.run(3), FrameOutcome::Paused);
        assert_eq!(machine.tstates(), 0);
        assert_eq!(machine.frames(), 0);

        machine.resume();
        assert_eq!(machine.run(2), FrameOutcome::Completed);
        assert_eq!(machine.frames(), 2);
        assert_eq!(machine.frame_signal().frames(), 2);
    }

    #[test]
    fn test_loader_operations() {
        let mut machine = MachineBuilder::new()
            .arch(Architecture::Spectrum128)
            .system_rom(&rom_with(&[]))
            .system_rom(&rom_with(&[]))
            .build()
            .unwrap();

        machine.load_memory_page(3, &[0xAA; PAGE_SIZE]).unwrap();
        machine.set_bank_latch(0x13);
        machine.set_border_color(0x0A);
        machine.set_register_named("pc", 0x8000).unwrap();

        let bus = machine.bus.borrow();
        assert_eq!(bus.memory.peek(0xC000), 0xAA);
        assert_eq!(bus.latch().rom, 1);
        assert_eq!(bus.video.border_colour(), 2);
        assert_eq!(bus.port254() & 7, 2);
        drop(bus);

        assert_eq!(machine.pc(), 0x8000);
        assert!(machine.set_register_named("XY", 0).is_err());
        assert!(machine.memory_dump(0xC000, 0xC00F).starts_with("c000: aa aa"));
    }

    #[test]
    fn test_reset_clears_lock_and_pc() {
        let mut machine = MachineBuilder::new()
            .arch(Architecture::Spectrum128)
            .system_rom(&rom_with(&[]))
            .system_rom(&rom_with(&[]))
            .build()
            .unwrap();
        machine.set_bank_latch(0x20);
        machine.set_register(RegisterName::PC, 0x1234).unwrap();
        assert!(machine.bus.borrow().latch().locked);

        machine.reset().unwrap();
        assert!(!machine.bus.borrow().latch().locked);
        assert_eq!(machine.pc(), 0);
    }
}
