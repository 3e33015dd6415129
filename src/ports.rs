use tracing::trace;

use crate::{
    audio::SPEAKER_LEVELS,
    bus::Bus,
    config::{Architecture, Joystick},
    cpu::BreakpointHit,
};

impl Bus {
    /// IN from `address`. Early contention on the address's page, then the
    /// device, then late contention.
    pub fn port_in(&mut self, address: u16) -> u8 {
        if self.config.breakpoints.port_read == Some(address) {
            self.latch_breakpoint(BreakpointHit::PortRead(address));
        }
        let contended = self.memory.address_contended(address);
        self.draw(1, contended);

        let pentagon = self.config.arch.is_pentagon();
        if address & 1 == 0 {
            let float = self.video.floating_bus(self.clock.tstates, self.vram());
            self.draw(3, !pentagon);
            return self.read_ula(address, float);
        }

        self.late_contention(contended);
        let low = address as u8;

        if self.latch.trdos {
            match address & 0xE3 {
                0x03 | 0x23 | 0x43 | 0x63 => {
                    return self.fdc.read_register(((address >> 5) & 3) as u8)
                }
                0xE3 => return self.fdc.system_status(),
                _ => {}
            }
        }

        match self.config.joystick {
            Joystick::Kempston
                if address & 0xE0 == 0 || low == 0xDF || low == self.config.kempston_port =>
            {
                return self.keyboard.kempston()
            }
            Joystick::Fuller if low == 0x7F => return self.keyboard.fuller(),
            _ => {}
        }

        if address & 0xC002 == 0xC000 {
            if let Some(psg) = self.psg.as_deref() {
                return psg.read_register_data();
            }
        }

        if pentagon {
            return 0xFF;
        }
        let data = self
            .video
            .floating_bus(self.clock.tstates, self.vram())
            .unwrap_or(0xFF);
        if self.config.arch.has_128k_paging() && address & 0x8002 == 0 && !self.latch.locked {
            // the 128K latches whatever the bus floats to when 0x7FFD is read
            trace!("[PORTS] 7FFD read latches {:02X}", data);
            self.latch.locked = data & 0x20 != 0;
            self.latch.bank = (data & 7) as usize;
            self.latch.video = data & 0x08 != 0;
            if !self.config.arch.is_alf() {
                self.latch.rom = ((data >> 4) & 1) as usize;
            }
            self.remap();
        }
        data
    }

    /// Keyboard rows selected by the high byte, EAR on bit 6. With no row
    /// selected the ULA returns the byte it was fetching, if any.
    fn read_ula(&self, address: u16, float: Option<u8>) -> u8 {
        let high = (address >> 8) as u8;
        let mut data = if high == 0xFF {
            match float {
                Some(byte) => return byte,
                None => 0xBF,
            }
        } else {
            0xBF & self.keyboard.read_rows(high)
        };

        let issue2 = self.config.issue2 && self.config.arch.is_48k();
        let mask = if issue2 { 0x18 } else { 0x10 };
        if self.port254 & mask != 0 {
            data |= 0x40;
        }
        if self.tape_ear {
            data ^= 0x40;
        }
        data
    }

    /// OUT to `address`.
    pub fn port_out(&mut self, address: u16, value: u8) {
        if self.config.breakpoints.port_write == Some(address) {
            self.latch_breakpoint(BreakpointHit::PortWrite(address));
        }
        let contended = self.memory.address_contended(address);
        self.draw(1, contended);

        let arch = self.config.arch;
        let pentagon = arch.is_pentagon();

        if arch.is_alf() && address & 0x80 == 0 && address & 1 == 1 {
            self.latch.alf_cartridge = value & 0x80 != 0;
            self.latch.alf_page = ((value & 0x7F) % 64) as usize;
            self.remap();
        }

        if address & 1 == 0 {
            self.write_ula(value, pentagon);
            if address & 0x8002 == 0x8000 && self.write_ay(address, value) {
                self.draw(3, !pentagon);
                return;
            }
            self.draw(3, !pentagon);
        } else {
            if address & 0x8002 == 0x8000 && self.write_ay(address, value) {
                self.late_contention(contended);
                return;
            }
            if self.latch.trdos {
                match address & 0xE3 {
                    0x03 | 0x23 | 0x43 | 0x63 => {
                        self.fdc.write_register(((address >> 5) & 3) as u8, value)
                    }
                    0xE3 => self.fdc.write_system(value),
                    _ => {}
                }
            }
            self.late_contention(contended);
        }

        if pentagon && address & 0x1008 == 0 && !self.latch.locked {
            self.latch.limit_128 = value & 0x04 != 0;
            self.latch.page0_ram = value & 0x08 != 0;
            trace!("[PORTS] EFF7 <- {:02X}", value);
            self.remap();
        }

        if arch.has_128k_paging() && address & 0x8002 == 0 {
            self.write_paging(value);
        }
    }

    fn late_contention(&mut self, contended: bool) {
        if contended {
            self.draw(1, true);
            self.draw(1, true);
            self.draw(1, true);
        } else {
            self.draw(3, false);
        }
    }

    /// Border colour and speaker level.
    fn write_ula(&mut self, value: u8, pentagon: bool) {
        self.port254 = value;
        let colour = value & 7;
        if colour != self.video.border_colour() {
            let vram = self.memory.ram_page(self.latch.screen_bank());
            self.video
                .change_border(&mut self.clock, vram, colour, !pentagon);
        }

        let index = ((value >> 2) & 4) | ((self.tape_ear as u8) << 1) | ((value >> 3) & 1);
        self.audio
            .set_speaker(self.clock.tstates, SPEAKER_LEVELS[index as usize]);
    }

    /// Register select on A14 high, data write otherwise. False without a chip.
    fn write_ay(&mut self, address: u16, value: u8) -> bool {
        let Some(psg) = self.psg.as_deref_mut() else {
            return false;
        };
        if address & 0x4000 != 0 {
            psg.select_register(value);
        } else {
            self.audio.ay_catch_up(self.clock.tstates, psg);
            psg.write_register_data(value);
        }
        true
    }

    /// A 0x7FFD write. Nothing happens while paging is locked; otherwise
    /// the bank is computed, the latch updated and slots 0 and 3 re-resolved,
    /// which also moves the screen source with the video bit.
    pub(crate) fn write_paging(&mut self, value: u8) {
        if self.latch.locked {
            trace!("[PORTS] 7FFD <- {:02X} ignored, paging locked", value);
            return;
        }
        let arch = self.config.arch;
        let d5 = value & 0x20 != 0;
        self.latch.locked = match arch {
            Architecture::Pentagon1024 => self.latch.limit_128 && d5,
            _ => d5,
        };

        let mut bank = (value & 7) as usize;
        let extended = matches!(
            arch,
            Architecture::Pentagon512 | Architecture::Pentagon1024
        );
        if extended && !self.latch.limit_128 && !self.latch.locked {
            if value & 0x40 != 0 {
                bank += 8;
            }
            if value & 0x80 != 0 {
                bank += 16;
            }
            if arch == Architecture::Pentagon1024 && d5 {
                bank += 32;
            }
        }

        self.latch.bank = bank;
        if !arch.is_alf() {
            self.latch.rom = ((value >> 4) & 1) as usize;
        }
        self.latch.video = value & 0x08 != 0;
        trace!("[PORTS] 7FFD <- {:02X}: {:?}", value, self.latch);
        self.remap();
    }

    /// Loader entry: sets the paging register regardless of a lock left
    /// from before the load.
    pub fn set_bank_latch(&mut self, value: u8) {
        if !self.config.arch.has_128k_paging() {
            return;
        }
        self.latch.locked = false;
        self.write_paging(value);
    }
}
