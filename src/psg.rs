use std::fmt::Debug;

use tracing::trace;

/// Output level of each of the 16 amplitude steps, per channel.
const VOLUME_LEVELS: [u8; 16] = [0, 1, 1, 2, 3, 4, 5, 7, 9, 12, 15, 19, 24, 30, 36, 42];

/// Significant bits of each register; unused bits read back as zero.
const REGISTER_MASKS: [u8; 16] = [
    0xFF, 0x0F, 0xFF, 0x0F, 0xFF, 0x0F, 0x1F, 0xFF, 0x1F, 0x1F, 0x1F, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF,
];

/// CPU T-states per tone counter tick: the chip runs at half the CPU clock
/// and tone counters divide it by 8.
const TSTATES_PER_TICK: u32 = 16;

/// A register-mapped sound chip the port decoder talks to.
pub trait SoundChip: Debug {
    fn select_register(&mut self, value: u8);
    fn write_register_data(&mut self, value: u8);
    fn read_register_data(&self) -> u8;
    /// Fills `out` with consecutive output samples.
    fn generate_samples(&mut self, out: &mut [u8]);
    fn reset(&mut self);
}

#[derive(Debug, Default, Clone, Copy)]
struct Tone {
    counter: u32,
    output: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Envelope {
    counter: u32,
    step: u8,
    attack: bool,
    holding: bool,
}

impl Envelope {
    fn level(&self) -> u8 {
        if self.attack {
            self.step
        } else {
            15 - self.step
        }
    }
}

/// General Instrument AY-3-8912.
#[derive(Debug, Clone)]
pub struct Ay38912 {
    registers: [u8; 16],
    selected: u8,
    tones: [Tone; 3],
    noise_counter: u32,
    lfsr: u32,
    envelope: Envelope,
    tstates_per_sample: u32,
    tick_remainder: u32,
}

impl Ay38912 {
    /// A chip producing one sample every `tstates_per_sample` CPU T-states.
    pub fn new(tstates_per_sample: u32) -> Self {
        let mut chip = Self {
            registers: [0; 16],
            selected: 0,
            tones: [Tone::default(); 3],
            noise_counter: 0,
            lfsr: 1,
            envelope: Envelope::default(),
            tstates_per_sample,
            tick_remainder: 0,
        };
        chip.reset();
        chip
    }

    pub fn selected_register(&self) -> u8 {
        self.selected
    }

    pub fn register(&self, index: usize) -> u8 {
        self.registers[index & 0x0F]
    }

    fn tone_period(&self, channel: usize) -> u32 {
        let fine = self.registers[channel * 2] as u32;
        let coarse = (self.registers[channel * 2 + 1] & 0x0F) as u32;
        ((coarse << 8) | fine).max(1)
    }

    fn noise_period(&self) -> u32 {
        ((self.registers[6] & 0x1F) as u32).max(1) * 2
    }

    fn envelope_period(&self) -> u32 {
        let period = ((self.registers[12] as u32) << 8) | self.registers[11] as u32;
        period.max(1) * 2
    }

    fn restart_envelope(&mut self) {
        self.envelope = Envelope {
            counter: 0,
            step: 0,
            attack: self.registers[13] & 0x04 != 0,
            holding: false,
        };
    }

    fn step_envelope(&mut self) {
        if self.envelope.holding {
            return;
        }
        if self.envelope.step < 15 {
            self.envelope.step += 1;
            return;
        }

        let shape = self.registers[13];
        let (cont, alternate, hold) = (shape & 0x08 != 0, shape & 0x02 != 0, shape & 0x01 != 0);
        if !cont {
            self.envelope.attack = false;
            self.envelope.holding = true;
        } else if hold {
            if alternate {
                self.envelope.attack = !self.envelope.attack;
            }
            self.envelope.holding = true;
        } else {
            self.envelope.step = 0;
            if alternate {
                self.envelope.attack = !self.envelope.attack;
            }
        }
    }

    fn tick(&mut self) {
        for channel in 0..3 {
            let period = self.tone_period(channel);
            let tone = &mut self.tones[channel];
            tone.counter += 1;
            if tone.counter >= period {
                tone.counter = 0;
                tone.output = !tone.output;
            }
        }

        self.noise_counter += 1;
        if self.noise_counter >= self.noise_period() {
            self.noise_counter = 0;
            // 17 bit LFSR, taps at bits 0 and 3
            let bit = (self.lfsr ^ (self.lfsr >> 3)) & 1;
            self.lfsr = (self.lfsr >> 1) | (bit << 16);
        }

        self.envelope.counter += 1;
        if self.envelope.counter >= self.envelope_period() {
            self.envelope.counter = 0;
            self.step_envelope();
        }
    }

    fn mix(&self) -> u8 {
        let mixer = self.registers[7];
        let noise = self.lfsr & 1 != 0;
        let mut sample = 0u8;

        for (channel, tone) in self.tones.iter().enumerate() {
            let tone_off = mixer & (1 << channel) != 0;
            let noise_off = mixer & (8 << channel) != 0;
            if !((tone.output || tone_off) && (noise || noise_off)) {
                continue;
            }
            let amplitude = self.registers[8 + channel];
            let level = if amplitude & 0x10 != 0 {
                self.envelope.level()
            } else {
                amplitude & 0x0F
            };
            sample += VOLUME_LEVELS[level as usize];
        }
        sample
    }
}

impl SoundChip for Ay38912 {
    fn select_register(&mut self, value: u8) {
        self.selected = value & 0x0F;
    }

    fn write_register_data(&mut self, value: u8) {
        let index = self.selected as usize;
        trace!("[PSG] R{} <- {:02X}", index, value);
        self.registers[index] = value & REGISTER_MASKS[index];
        if index == 13 {
            self.restart_envelope();
        }
    }

    fn read_register_data(&self) -> u8 {
        self.registers[self.selected as usize]
    }

    fn generate_samples(&mut self, out: &mut [u8]) {
        for sample in out.iter_mut() {
            self.tick_remainder += self.tstates_per_sample;
            while self.tick_remainder >= TSTATES_PER_TICK {
                self.tick_remainder -= TSTATES_PER_TICK;
                self.tick();
            }
            *sample = self.mix();
        }
    }

    fn reset(&mut self) {
        self.registers = [0; 16];
        self.registers[7] = 0xFF;
        self.selected = 0;
        self.tones = [Tone::default(); 3];
        self.noise_counter = 0;
        self.lfsr = 1;
        self.envelope = Envelope::default();
        self.tick_remainder = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_masks() {
        let mut ay = Ay38912::new(112);
        ay.select_register(1);
        ay.write_register_data(0xFF);
        assert_eq!(ay.read_register_data(), 0x0F);

        ay.select_register(0x12);
        assert_eq!(ay.selected_register(), 2);
        ay.write_register_data(0xAB);
        assert_eq!(ay.register(2), 0xAB);
    }

    #[test]
    fn test_silent_after_reset() {
        let mut ay = Ay38912::new(112);
        let mut out = [0xAAu8; 32];
        ay.generate_samples(&mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_tone_square_wave() {
        let mut ay = Ay38912::new(16);
        let writes = [(0, 4), (1, 0), (7, 0b0011_1110), (8, 15)];
        for (register, value) in writes {
            ay.select_register(register);
            ay.write_register_data(value);
        }
        let mut out = [0u8; 16];
        ay.generate_samples(&mut out);

        let loud = VOLUME_LEVELS[15];
        // one tick per sample, the output flips every 4 ticks
        assert_eq!(&out[..8], &[0, 0, 0, loud, loud, loud, loud, 0]);
    }

    #[test]
    fn test_envelope_attack_and_hold() {
        let mut ay = Ay38912::new(16);
        let writes = [(7, 0xFF), (8, 0x10), (11, 1), (12, 0), (13, 0b1101)];
        for (register, value) in writes {
            ay.select_register(register);
            ay.write_register_data(value);
        }
        let mut out = [0u8; 64];
        ay.generate_samples(&mut out);

        assert_eq!(out[0], VOLUME_LEVELS[0]);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(out[63], VOLUME_LEVELS[15]);
    }
}
