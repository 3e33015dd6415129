use crate::{psg::SoundChip, timing::TimingProfile};

/// Speaker output level for each combination of the ULA's EAR and MIC bits
/// and the tape input.
pub const SPEAKER_LEVELS: [u8; 8] = [0, 19, 34, 53, 97, 101, 130, 134];

/// Per-frame audio: the beeper sampled at an oversampled rate and averaged
/// down, plus the AY stepped to the same T-state positions.
#[derive(Debug, Clone)]
pub struct AudioMixer {
    samples: usize,
    oversample: usize,
    beeper_divisor: u32,
    ay_divisor: u32,
    level: u8,
    over: Vec<u8>,
    over_pos: usize,
    ay: Vec<u8>,
    ay_pos: usize,
    output: Vec<u8>,
}

impl AudioMixer {
    pub fn new(profile: &TimingProfile, turbo: u8) -> Self {
        let audio = profile.audio;
        let frame = profile.frame_states(turbo);
        let samples = audio.samples_per_frame as usize;
        let oversample = audio.oversample as usize;

        Self {
            samples,
            oversample,
            beeper_divisor: frame / audio.oversamples_per_frame(),
            ay_divisor: frame / audio.samples_per_frame,
            level: 0,
            over: vec![0; samples * oversample],
            over_pos: 0,
            ay: vec![0; samples],
            ay_pos: 0,
            output: vec![0; samples],
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn beeper_divisor(&self) -> u32 {
        self.beeper_divisor
    }

    pub fn ay_divisor(&self) -> u32 {
        self.ay_divisor
    }

    /// Fills the beeper buffer up to `tstates` with the level in force so far.
    pub fn beeper_catch_up(&mut self, tstates: u32) {
        let target = ((tstates / self.beeper_divisor) as usize).min(self.over.len());
        if target > self.over_pos {
            self.over[self.over_pos..target].fill(self.level);
            self.over_pos = target;
        }
    }

    /// Records a speaker level change at `tstates`.
    pub fn set_speaker(&mut self, tstates: u32, level: u8) {
        if level == self.level {
            return;
        }
        self.beeper_catch_up(tstates);
        self.level = level;
    }

    /// Runs the AY up to `tstates` so a register write lands at the right sample.
    pub fn ay_catch_up(&mut self, tstates: u32, chip: &mut dyn SoundChip) {
        let target = ((tstates / self.ay_divisor) as usize).min(self.ay.len());
        if target > self.ay_pos {
            chip.generate_samples(&mut self.ay[self.ay_pos..target]);
            self.ay_pos = target;
        }
    }

    /// Runs the AY to the end of the frame.
    pub fn ay_finish(&mut self, chip: &mut dyn SoundChip) {
        chip.generate_samples(&mut self.ay[self.ay_pos..]);
        self.ay_pos = self.ay.len();
    }

    /// Completes the beeper buffer and mixes both into the output frame.
    /// The AY part is whatever was generated this frame, silence without a chip.
    pub fn end_frame(&mut self) -> &[u8] {
        self.over[self.over_pos..].fill(self.level);
        self.ay[self.ay_pos..].fill(0);

        for (i, out) in self.output.iter_mut().enumerate() {
            let window = &self.over[i * self.oversample..(i + 1) * self.oversample];
            let beeper = window.iter().map(|&s| s as u32).sum::<u32>() / self.oversample as u32;
            *out = (beeper + self.ay[i] as u32).min(255) as u8;
        }

        self.over_pos = 0;
        self.ay_pos = 0;
        &self.output
    }

    /// Samples of the last completed frame.
    pub fn samples(&self) -> &[u8] {
        &self.output
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples
    }
}
