use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use tracing::{debug, trace};
use z80::Z80;

use crate::{
    bus::Bus,
    error::MachineError,
    internal_state::{InternalState, RegisterName, ReportState},
    io::Io,
};

/// What stopped a frame short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointHit {
    Pc(u16),
    PortRead(u16),
    PortWrite(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Completed,
    Paused,
    Breakpoint(BreakpointHit),
}

/// Per-frame switches owned by the machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    pub paused: bool,
    pub nmi_pending: bool,
    pub pc_breakpoint: Option<u16>,
}

/// An instruction stepper driving a shared [`Bus`]. Every memory and port
/// access of a step must go through the bus so the clock and beam see it.
pub trait Z80Core {
    /// Executes one instruction, accepting a pending interrupt first.
    /// Returns the T-states the clock moved.
    fn step(&mut self) -> u32;
    fn pc(&self) -> u16;
    fn halted(&self) -> bool;
    fn set_int(&mut self, active: bool);
    /// Advances the low seven bits of R.
    fn increment_r(&mut self, count: u32);
    /// Pushes PC and jumps to 0x0066.
    fn nmi(&mut self);
    fn bus(&self) -> &Rc<RefCell<Bus>>;
}

/// The `z80` crate core behind [`Z80Core`].
pub struct Cpu {
    z80: Z80<Io>,
}

impl Cpu {
    pub fn new(bus: Rc<RefCell<Bus>>) -> Self {
        Self {
            z80: Z80::new(Io::new(bus)),
        }
    }

    pub fn reset(&mut self) {
        let bus = self.z80.io.bus.clone();
        self.z80 = Z80::new(Io::new(bus));
    }

    pub fn sp(&self) -> u16 {
        self.z80.sp
    }

    pub fn set_register(&mut self, name: RegisterName, value: u16) -> Result<(), MachineError> {
        let byte = value as u8;
        match name {
            RegisterName::A => {
                let [f, _] = self.pair(RegisterPair::AF).to_le_bytes();
                self.load_pair(RegisterPair::AF, u16::from_le_bytes([f, byte]));
            }
            RegisterName::F => {
                let [_, a] = self.pair(RegisterPair::AF).to_le_bytes();
                self.load_pair(RegisterPair::AF, u16::from_le_bytes([byte, a]));
            }
            RegisterName::BC => self.load_pair(RegisterPair::BC, value),
            RegisterName::DE => self.load_pair(RegisterPair::DE, value),
            RegisterName::HL => self.load_pair(RegisterPair::HL, value),
            RegisterName::AF2 => self.load_pair(RegisterPair::AF2, value),
            RegisterName::BC2 => self.load_pair(RegisterPair::BC2, value),
            RegisterName::DE2 => self.load_pair(RegisterPair::DE2, value),
            RegisterName::HL2 => self.load_pair(RegisterPair::HL2, value),
            RegisterName::IX => self.z80.ix = value,
            RegisterName::IY => self.z80.iy = value,
            RegisterName::SP => self.z80.sp = value,
            RegisterName::PC => self.z80.pc = value,
            RegisterName::I => self.z80.i = byte,
            RegisterName::R => self.z80.r = byte,
            RegisterName::IM if value <= 2 => self.z80.interrupt_mode = byte,
            RegisterName::IFF1 => self.z80.iff1 = value != 0,
            RegisterName::IFF2 => self.z80.iff2 = value != 0,
            other => return Err(MachineError::UnsupportedRegister(other)),
        }
        trace!("[CPU] {:?} <- {:04X}", name, value);
        Ok(())
    }

    /// Reads a pair the core keeps private by pushing it into scratch memory.
    pub fn pair(&mut self, pair: RegisterPair) -> u16 {
        let memory = self.run_scratch(&pair.wrap(&[pair.push_opcode()]), 0);
        let byte = |address| memory.get(&address).copied().unwrap_or(0);
        u16::from_le_bytes([byte(SCRATCH_STACK - 2), byte(SCRATCH_STACK - 1)])
    }

    fn load_pair(&mut self, pair: RegisterPair, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        let load = match pair.base() {
            RegisterPair::AF => vec![0xF1],
            RegisterPair::BC => vec![0x01, lo, hi],
            RegisterPair::DE => vec![0x11, lo, hi],
            _ => vec![0x21, lo, hi],
        };
        self.run_scratch(&pair.wrap(&load), value);
    }

    /// Executes `code` against scratch memory holding `stacked` at SP. PC,
    /// SP, R, MEMPTR, HALT and the interrupt lines are put back afterwards
    /// and the bus clock does not move.
    fn run_scratch(&mut self, code: &[u8], stacked: u16) -> HashMap<u16, u8> {
        let z80 = &mut self.z80;
        let saved = (
            z80.pc,
            z80.sp,
            z80.r,
            z80.mem_ptr,
            z80.halted,
            z80.iff_delay,
            z80.irq_pending,
            z80.nmi_pending,
        );

        let mut memory: HashMap<u16, u8> = (SCRATCH_CODE..).zip(code.iter().copied()).collect();
        let [lo, hi] = stacked.to_le_bytes();
        memory.insert(SCRATCH_STACK, lo);
        memory.insert(SCRATCH_STACK + 1, hi);
        z80.io.attach_scratch(memory);

        z80.pc = SCRATCH_CODE;
        z80.sp = SCRATCH_STACK;
        z80.halted = false;
        z80.iff_delay = 0;
        z80.irq_pending = 0;
        z80.nmi_pending = 0;
        let end = SCRATCH_CODE + code.len() as u16;
        while z80.pc < end {
            z80.step();
        }

        let memory = z80.io.detach_scratch();
        (
            z80.pc,
            z80.sp,
            z80.r,
            z80.mem_ptr,
            z80.halted,
            z80.iff_delay,
            z80.irq_pending,
            z80.nmi_pending,
        ) = saved;
        memory
    }
}

const SCRATCH_CODE: u16 = 0x0000;
const SCRATCH_STACK: u16 = 0x8000;

/// Register pairs the `z80` core only exposes through its instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterPair {
    AF,
    BC,
    DE,
    HL,
    AF2,
    BC2,
    DE2,
    HL2,
}

impl RegisterPair {
    fn base(self) -> RegisterPair {
        match self {
            RegisterPair::AF2 => RegisterPair::AF,
            RegisterPair::BC2 => RegisterPair::BC,
            RegisterPair::DE2 => RegisterPair::DE,
            RegisterPair::HL2 => RegisterPair::HL,
            main => main,
        }
    }

    fn push_opcode(self) -> u8 {
        match self.base() {
            RegisterPair::AF => 0xF5,
            RegisterPair::BC => 0xC5,
            RegisterPair::DE => 0xD5,
            _ => 0xE5,
        }
    }

    /// Brackets `code` with EX AF,AF' or EXX for the alternate set.
    fn wrap(self, code: &[u8]) -> Vec<u8> {
        let exchange = match self {
            RegisterPair::AF2 => 0x08,
            RegisterPair::BC2 | RegisterPair::DE2 | RegisterPair::HL2 => 0xD9,
            _ => return code.to_vec(),
        };
        let mut wrapped = Vec::with_capacity(code.len() + 2);
        wrapped.push(exchange);
        wrapped.extend_from_slice(code);
        wrapped.push(exchange);
        wrapped
    }
}

impl Z80Core for Cpu {
    fn step(&mut self) -> u32 {
        self.z80.io.begin_instruction(self.z80.pc, self.z80.i, self.z80.r);
        let reported = self.z80.step();
        self.z80.io.finish_instruction(reported)
    }

    fn pc(&self) -> u16 {
        self.z80.pc
    }

    fn halted(&self) -> bool {
        self.z80.halted
    }

    fn set_int(&mut self, active: bool) {
        if active {
            self.z80.assert_irq(0xFF);
        } else {
            self.z80.clr_irq();
        }
    }

    fn increment_r(&mut self, count: u32) {
        let r = self.z80.r;
        self.z80.r = (r & 0x80) | ((r as u32 + count) as u8 & 0x7F);
    }

    fn nmi(&mut self) {
        self.z80.halted = false;
        self.z80.iff1 = false;
        let pc = self.z80.pc;
        let sp = self.z80.sp.wrapping_sub(2);
        {
            let mut bus = self.z80.io.bus.borrow_mut();
            let ir = u16::from_be_bytes([self.z80.i, self.z80.r]);
            bus.address_on_bus(ir, 5);
            bus.poke16(sp, pc);
        }
        self.z80.sp = sp;
        self.z80.pc = 0x0066;
        debug!("[CPU] NMI from {:04X}", pc);
    }

    fn bus(&self) -> &Rc<RefCell<Bus>> {
        &self.z80.io.bus
    }
}

impl ReportState for Cpu {
    fn report_state(&mut self) -> anyhow::Result<InternalState> {
        let [f, a] = self.pair(RegisterPair::AF).to_le_bytes();
        let bc = self.pair(RegisterPair::BC);
        let de = self.pair(RegisterPair::DE);
        let hl = self.pair(RegisterPair::HL);
        let bus = self.z80.io.bus.borrow();
        Ok(InternalState {
            a,
            f,
            bc,
            de,
            hl,
            ix: self.z80.ix,
            iy: self.z80.iy,
            sp: self.z80.sp,
            pc: self.z80.pc,
            i: self.z80.i,
            r: self.z80.r,
            iff1: self.z80.iff1,
            iff2: self.z80.iff2,
            halted: self.z80.halted,
            tstates: bus.clock.tstates,
            frame: bus.clock.frame_count(),
        })
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("pc", &self.z80.pc)
            .field("sp", &self.z80.sp)
            .field("ix", &self.z80.ix)
            .field("iy", &self.z80.iy)
            .field("i", &self.z80.i)
            .field("r", &self.z80.r)
            .field("iff1", &self.z80.iff1)
            .field("iff2", &self.z80.iff2)
            .field("halted", &self.z80.halted)
            .finish()
    }
}

fn tstates(bus: &Rc<RefCell<Bus>>) -> u32 {
    bus.borrow().clock.tstates
}

/// Latched port breakpoint, or a PC match after the last step.
fn breakpoint<C: Z80Core>(core: &C, control: &FrameControl) -> Option<BreakpointHit> {
    let bus = core.bus();
    if let Some(hit) = bus.borrow().breakpoint() {
        return Some(hit);
    }
    let pc = core.pc();
    if control.pc_breakpoint == Some(pc) {
        bus.borrow_mut().latch_breakpoint(BreakpointHit::Pc(pc));
        return Some(BreakpointHit::Pc(pc));
    }
    None
}

fn bail(bus: &Rc<RefCell<Bus>>, hit: BreakpointHit) -> FrameOutcome {
    debug!("[CPU] Frame cut short by {:?}", hit);
    bus.borrow_mut().abort_frame();
    FrameOutcome::Breakpoint(hit)
}

/// Runs one frame: the interrupt window, a halted fast-forward when the
/// CPU sits in HALT, the rest of the frame, then the frame wrap.
pub fn run_frame<C: Z80Core>(core: &mut C, control: &mut FrameControl) -> FrameOutcome {
    let bus = core.bus().clone();
    if control.paused {
        bus.borrow_mut().abort_frame();
        return FrameOutcome::Paused;
    }
    let latched = bus.borrow().breakpoint();
    if let Some(hit) = latched {
        return bail(&bus, hit);
    }

    let (int_end, frame) = {
        let bus = bus.borrow();
        (bus.int_end(), bus.frame_states())
    };

    core.set_int(true);
    if control.nmi_pending {
        control.nmi_pending = false;
        core.step();
        core.nmi();
    }

    while tstates(&bus) < int_end {
        core.step();
        if let Some(hit) = breakpoint(core, control) {
            core.set_int(false);
            return bail(&bus, hit);
        }
    }
    core.set_int(false);

    if !core.halted() {
        core.step();
    }
    if core.halted() {
        flush_on_halt(core);
    }
    if let Some(hit) = breakpoint(core, control) {
        return bail(&bus, hit);
    }

    while tstates(&bus) < frame {
        core.step();
        if let Some(hit) = breakpoint(core, control) {
            return bail(&bus, hit);
        }
    }

    bus.borrow_mut().end_frame();
    FrameOutcome::Completed
}

/// Spends a halted CPU's time up to `frame - int_end`. Contended or snowy
/// screens need every M1 cycle; otherwise the beam is finished in bulk and
/// the clock skipped in whole fetches.
pub fn flush_on_halt<C: Z80Core>(core: &mut C) {
    let pc = core.pc();
    let fetches = {
        let mut bus = core.bus().borrow_mut();
        let end = bus.frame_states() - bus.int_end();
        if bus.memory.address_contended(pc) || bus.video.snow_mode() {
            bus.halt_fetches(pc, end)
        } else {
            bus.skip_halted(end)
        }
    };
    core.increment_r(fetches);
    trace!("[CPU] HALT at {:04X} skipped {} fetches", pc, fetches);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bank::{RomSet, PAGE_SIZE},
        config::{Architecture, MachineConfig},
    };

    fn cpu_with_program(program: &[u8]) -> Cpu {
        let mut rom = vec![0u8; PAGE_SIZE];
        rom[..program.len()].copy_from_slice(program);
        let bus = Bus::new(
            &MachineConfig::new(Architecture::Spectrum48),
            &RomSet::new(&[&rom]),
        )
        .unwrap();
        Cpu::new(Rc::new(RefCell::new(bus)))
    }

    #[test]
    fn test_step_moves_clock_by_instruction_length() {
        // NOP; LD A,0x42; LD (0x8000),A
        let mut cpu = cpu_with_program(&[0x00, 0x3E, 0x42, 0x32, 0x00, 0x80]);
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.step(), 13);
        assert_eq!(cpu.bus().borrow().clock.tstates, 24);
        assert_eq!(cpu.bus().borrow().memory.peek(0x8000), 0x42);
    }

    #[test]
    fn test_set_register() {
        let mut cpu = cpu_with_program(&[]);
        cpu.set_register(RegisterName::PC, 0x1234).unwrap();
        cpu.set_register(RegisterName::SP, 0x9000).unwrap();
        cpu.set_register(RegisterName::R, 0x05).unwrap();
        cpu.set_register(RegisterName::A, 0x42).unwrap();
        cpu.set_register(RegisterName::F, 0x81).unwrap();
        cpu.set_register(RegisterName::BC, 0x1122).unwrap();
        cpu.set_register(RegisterName::DE, 0x3344).unwrap();
        cpu.set_register(RegisterName::HL, 0xBEEF).unwrap();

        let state = cpu.report_state().unwrap();
        assert_eq!((state.a, state.f), (0x42, 0x81));
        assert_eq!((state.bc, state.de, state.hl), (0x1122, 0x3344, 0xBEEF));
        assert_eq!((state.pc, state.sp, state.r), (0x1234, 0x9000, 0x05));
        assert_eq!(state.tstates, 0);
        assert_eq!(cpu.bus().borrow().memory.peek(0x8FFE), 0);
    }

    #[test]
    fn test_alternate_registers_stay_apart() {
        let mut cpu = cpu_with_program(&[]);
        cpu.set_register(RegisterName::HL, 0x1111).unwrap();
        cpu.set_register(RegisterName::AF2, 0xA55A).unwrap();
        cpu.set_register(RegisterName::BC2, 0x2222).unwrap();
        cpu.set_register(RegisterName::DE2, 0x3333).unwrap();
        cpu.set_register(RegisterName::HL2, 0x4444).unwrap();

        assert_eq!(cpu.pair(RegisterPair::HL), 0x1111);
        assert_eq!(cpu.pair(RegisterPair::BC), 0);
        assert_eq!(cpu.pair(RegisterPair::AF2), 0xA55A);
        assert_eq!(cpu.pair(RegisterPair::BC2), 0x2222);
        assert_eq!(cpu.pair(RegisterPair::DE2), 0x3333);
        assert_eq!(cpu.pair(RegisterPair::HL2), 0x4444);
    }

    #[test]
    fn test_interrupt_mode_range() {
        let mut cpu = cpu_with_program(&[]);
        cpu.set_register(RegisterName::IM, 2).unwrap();
        assert_eq!(cpu.z80.interrupt_mode, 2);
        assert!(matches!(
            cpu.set_register(RegisterName::IM, 3),
            Err(MachineError::UnsupportedRegister(RegisterName::IM))
        ));
        assert_eq!(cpu.z80.interrupt_mode, 2);
    }

    #[test]
    fn test_halted_step_fetches_at_pc() {
        let mut cpu = cpu_with_program(&[]);
        let start = {
            let mut bus = cpu.bus().borrow_mut();
            bus.memory.write(0x6000, 0x76);
            let start = bus.profile().screen_start;
            bus.draw(start, false);
            start
        };
        cpu.set_register(RegisterName::PC, 0x6000).unwrap();

        // HALT fetched at offset 0 waits 6 T-states.
        assert_eq!(cpu.step(), 10);
        assert!(cpu.halted());
        // The halted M1 cycle at 0x6001 lands on offset 10 and waits 4.
        assert_eq!(cpu.step(), 8);
        let bus = cpu.bus().borrow();
        assert_eq!(bus.clock.tstates, start + 18);
        assert_eq!(bus.clock.wait_states, 10);
    }

    #[test]
    fn test_nmi_pushes_pc() {
        let mut cpu = cpu_with_program(&[]);
        cpu.set_register(RegisterName::PC, 0x8123).unwrap();
        cpu.set_register(RegisterName::SP, 0x9000).unwrap();
        cpu.nmi();

        assert_eq!(cpu.pc(), 0x0066);
        assert_eq!(cpu.sp(), 0x8FFE);
        let bus = cpu.bus().borrow();
        assert_eq!(bus.memory.peek(0x8FFE), 0x23);
        assert_eq!(bus.memory.peek(0x8FFF), 0x81);
        assert_eq!(bus.clock.tstates, 11);
    }

    #[test]
    fn test_increment_r_keeps_bit7() {
        let mut cpu = cpu_with_program(&[]);
        cpu.set_register(RegisterName::R, 0xFE).unwrap();
        cpu.increment_r(3);
        assert_eq!(cpu.report_state().unwrap().r, 0x81);
    }
}
