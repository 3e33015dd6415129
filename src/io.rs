use std::{cell::Cell, cell::RefCell, collections::HashMap, rc::Rc};

use z80::Z80_io;

use crate::bus::Bus;

/// Bus adapter handed to the `z80` core. The first read of an instruction
/// is its opcode fetch; a step that reads nothing (a halted core) still
/// fetches at PC. Cycles the core reports beyond what its accesses charged
/// are spent with IR on the address bus.
pub struct Io {
    pub bus: Rc<RefCell<Bus>>,
    fetch_pending: Cell<bool>,
    charged: Cell<u32>,
    pc: Cell<u16>,
    ir: Cell<u16>,
    start: Cell<u64>,
    /// Memory served instead of the bus while registers are moved through
    /// the core. Nothing is timed while it is attached.
    scratch: RefCell<Option<HashMap<u16, u8>>>,
}

impl Io {
    pub fn new(bus: Rc<RefCell<Bus>>) -> Self {
        Io {
            bus,
            fetch_pending: Cell::new(false),
            charged: Cell::new(0),
            pc: Cell::new(0),
            ir: Cell::new(0),
            start: Cell::new(0),
            scratch: RefCell::new(None),
        }
    }

    pub fn attach_scratch(&self, memory: HashMap<u16, u8>) {
        self.scratch.replace(Some(memory));
    }

    pub fn detach_scratch(&self) -> HashMap<u16, u8> {
        self.scratch.take().unwrap_or_default()
    }

    pub fn begin_instruction(&self, pc: u16, i: u8, r: u8) {
        let mut bus = self.bus.borrow_mut();
        bus.set_refresh(i, r);
        self.fetch_pending.set(true);
        self.charged.set(0);
        self.pc.set(pc);
        self.ir.set(u16::from_be_bytes([i, r]));
        self.start.set(bus.clock.now());
    }

    /// Spends the cycles no access accounted for. Returns the T-states the
    /// clock moved over the whole instruction.
    pub fn finish_instruction(&self, reported: u32) -> u32 {
        let mut bus = self.bus.borrow_mut();
        let mut charged = self.charged.get();
        if self.fetch_pending.replace(false) && reported >= charged + 4 {
            bus.draw_opcode(self.pc.get());
            charged += 4;
        }
        if reported > charged {
            bus.address_on_bus(self.ir.get(), reported - charged);
        }
        (bus.clock.now() - self.start.get()) as u32
    }

    fn charge(&self, states: u32) {
        self.charged.set(self.charged.get() + states);
    }
}

impl Z80_io for Io {
    fn read_byte(&self, address: u16) -> u8 {
        if let Some(memory) = self.scratch.borrow().as_ref() {
            return memory.get(&address).copied().unwrap_or(0);
        }
        let mut bus = self.bus.borrow_mut();
        if self.fetch_pending.replace(false) {
            self.charge(4);
            bus.fetch_opcode(address)
        } else {
            self.charge(3);
            bus.peek8(address)
        }
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        if let Some(memory) = self.scratch.get_mut() {
            memory.insert(address, value);
            return;
        }
        self.charge(3);
        self.bus.borrow_mut().poke8(address, value)
    }

    fn port_in(&self, port: u16) -> u8 {
        self.charge(4);
        self.bus.borrow_mut().port_in(port)
    }

    fn port_out(&mut self, port: u16, value: u8) {
        self.charge(4);
        self.bus.borrow_mut().port_out(port, value)
    }
}
