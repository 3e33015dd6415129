use once_cell::sync::Lazy;

use crate::{config::Architecture, error::ConfigError};

/// Pixel rows in the ULA screen.
pub const SCREEN_LINES: usize = 192;
/// Bytes of bitmap per pixel row.
pub const SCREEN_COLUMNS: usize = 32;
/// Quads (4 T-states, 8 pixels) fetched per pixel row.
pub const QUADS_PER_LINE: u32 = 32;

/// Frame buffer geometry: 256x192 screen inside a 32 px / 24 line border.
pub const FRAME_WIDTH: usize = 320;
pub const FRAME_HEIGHT: usize = 240;
pub const BORDER_LINES_TOP: usize = 24;
pub const BORDER_LINES_BOTTOM: usize = 24;
pub const BORDER_PIXELS_LEFT: usize = 32;

/// First and one-past-last frame buffer rows holding pixel data.
pub const SCREEN_FIRST_ROW: usize = BORDER_LINES_TOP;
pub const SCREEN_END_ROW: usize = BORDER_LINES_TOP + SCREEN_LINES;

/// ULA contention delay, indexed by T-states since the start of the line fetch.
pub const WAIT_STATES: [u8; 128] = {
    const PATTERN: [u8; 8] = [6, 5, 4, 3, 2, 1, 0, 0];
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < table.len() {
        table[i] = PATTERN[i & 7];
        i += 1;
    }
    table
};

/// Flash phase flips after this many frames.
pub const FLASH_FRAMES: u32 = 16;

/// Swaps the middle and low three bits of a pixel row, giving the ULA's
/// row order inside each third of the screen.
pub const fn ula_swap(y: usize) -> usize {
    (y & 0xC0) | ((y & 0x38) >> 3) | ((y & 0x07) << 3)
}

/// Per pixel row offsets into the 16K video page.
#[derive(Debug)]
pub struct VideoOffsets {
    pub bitmap: [u16; SCREEN_LINES],
    pub attribute: [u16; SCREEN_LINES],
}

pub static VIDEO_OFFSETS: Lazy<VideoOffsets> = Lazy::new(|| {
    let mut offsets = VideoOffsets {
        bitmap: [0; SCREEN_LINES],
        attribute: [0; SCREEN_LINES],
    };
    for line in 0..SCREEN_LINES {
        offsets.bitmap[line] = (ula_swap(line) << 5) as u16;
        offsets.attribute[line] = (((line >> 3) << 5) + 0x1800) as u16;
    }
    offsets
});

/// Border columns across one raster line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorderGeometry {
    pub tstates_per_column: u32,
    pub pixels_per_column: usize,
    /// Columns across the full 320 px line.
    pub columns: u32,
    /// Columns left of the pixel area.
    pub left_columns: u32,
    /// Columns hidden behind the pixel area on middle lines.
    pub screen_columns: u32,
}

impl BorderGeometry {
    /// 4 T-states, 8 pixels a column.
    pub const ULA: BorderGeometry = BorderGeometry {
        tstates_per_column: 4,
        pixels_per_column: 8,
        columns: 40,
        left_columns: 4,
        screen_columns: 32,
    };

    /// 1 T-state, 2 pixels a column.
    pub const PENTAGON: BorderGeometry = BorderGeometry {
        tstates_per_column: 1,
        pixels_per_column: 2,
        columns: 160,
        left_columns: 16,
        screen_columns: 128,
    };

    pub fn line_tstates(&self) -> u32 {
        self.columns * self.tstates_per_column
    }

    pub fn screen_tstates(&self) -> u32 {
        self.screen_columns * self.tstates_per_column
    }

    pub fn right_column(&self) -> u32 {
        self.left_columns + self.screen_columns
    }
}

/// Constants of the ULA floating bus formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatingBusTiming {
    /// Subtracted from the clock before splitting it into line and column.
    pub tstate_bias: u32,
    /// Line (from frame start) of the first pixel row.
    pub first_line: u32,
    /// Subtracted from the in-line T-state to get the half-pixel position.
    pub column_bias: u32,
    /// Half-pixel positions at and beyond this are idle bus.
    pub column_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTiming {
    pub samples_per_frame: u32,
    /// Beeper oversamples per output sample.
    pub oversample: u32,
    pub sample_rate: u32,
}

impl AudioTiming {
    pub fn oversamples_per_frame(&self) -> u32 {
        self.samples_per_frame * self.oversample
    }
}

/// Immutable per-architecture constants, chosen at reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    pub name: &'static str,
    pub tstates_per_line: u32,
    pub lines_per_frame: u32,
    pub states_in_frame: u32,
    pub int_start: u32,
    pub int_end: u32,
    /// T-state of the first pixel fetch of row 0.
    pub screen_start: u32,
    /// T-state of the top-left border column.
    pub border_start: u32,
    pub border: BorderGeometry,
    pub contended: bool,
    pub floating_bus: Option<FloatingBusTiming>,
    pub micros_per_frame: u32,
    pub audio: AudioTiming,
}

impl TimingProfile {
    pub const SPECTRUM_48: TimingProfile = TimingProfile {
        name: "48K",
        tstates_per_line: 224,
        lines_per_frame: 312,
        states_in_frame: 69888,
        int_start: 0,
        int_end: 32,
        screen_start: 14335,
        border_start: Self::border_origin(14335, 224, BorderGeometry::ULA),
        border: BorderGeometry::ULA,
        contended: true,
        floating_bus: Some(FloatingBusTiming {
            tstate_bias: 0,
            first_line: 64,
            column_bias: 3,
            column_limit: 125,
        }),
        micros_per_frame: 19968,
        audio: AudioTiming {
            samples_per_frame: 624,
            oversample: 7,
            sample_rate: 31250,
        },
    };

    pub const SPECTRUM_128: TimingProfile = TimingProfile {
        name: "128K",
        tstates_per_line: 228,
        lines_per_frame: 311,
        states_in_frame: 70908,
        int_start: 0,
        int_end: 36,
        screen_start: 14361,
        border_start: Self::border_origin(14361, 228, BorderGeometry::ULA),
        border: BorderGeometry::ULA,
        contended: true,
        floating_bus: Some(FloatingBusTiming {
            tstate_bias: 1,
            first_line: 63,
            column_bias: 0,
            column_limit: 128,
        }),
        micros_per_frame: 19992,
        audio: AudioTiming {
            samples_per_frame: 622,
            oversample: 6,
            sample_rate: 31112,
        },
    };

    pub const PENTAGON: TimingProfile = TimingProfile {
        name: "Pentagon",
        tstates_per_line: 224,
        lines_per_frame: 320,
        states_in_frame: 71680,
        int_start: 0,
        int_end: 32,
        screen_start: 17988,
        border_start: Self::border_origin(17988, 224, BorderGeometry::PENTAGON),
        border: BorderGeometry::PENTAGON,
        contended: false,
        floating_bus: None,
        micros_per_frame: 20480,
        audio: AudioTiming {
            samples_per_frame: 640,
            oversample: 7,
            sample_rate: 31250,
        },
    };

    const fn border_origin(screen_start: u32, tstates_per_line: u32, border: BorderGeometry) -> u32 {
        screen_start
            - BORDER_LINES_TOP as u32 * tstates_per_line
            - border.left_columns * border.tstates_per_column
    }

    pub fn for_arch(arch: Architecture, late_timing: bool) -> TimingProfile {
        let mut profile = match arch {
            Architecture::Spectrum48 => Self::SPECTRUM_48,
            Architecture::Spectrum128 | Architecture::Alf => Self::SPECTRUM_128,
            Architecture::Pentagon | Architecture::Pentagon512 | Architecture::Pentagon1024 => {
                Self::PENTAGON
            }
        };
        if late_timing {
            profile.int_end += 1;
        }
        profile
    }

    /// T-states the CPU runs per emulated frame with a turbo multiplier applied.
    pub fn frame_states(&self, turbo: u8) -> u32 {
        self.states_in_frame << turbo
    }

    /// End of the interrupt window in CPU T-states under turbo.
    pub fn int_window_end(&self, turbo: u8) -> u32 {
        self.int_end << turbo
    }

    pub fn border_line_gap(&self) -> u32 {
        self.tstates_per_line - self.border.line_tstates()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason| {
            tracing::warn!("[TIMING] Profile {} rejected: {}", self.name, reason);
            Err(ConfigError::Timing {
                profile: self.name,
                reason,
            })
        };

        if self.tstates_per_line == 0 || self.lines_per_frame == 0 {
            return fail("zero-length line or frame");
        }
        if self.states_in_frame != self.tstates_per_line * self.lines_per_frame {
            return fail("frame length is not lines times line length");
        }
        if self.int_start >= self.int_end || self.int_end >= self.states_in_frame {
            return fail("interrupt window outside the frame");
        }
        if self.screen_start + SCREEN_LINES as u32 * self.tstates_per_line > self.states_in_frame {
            return fail("pixel area runs past the end of the frame");
        }
        if self.border.line_tstates() > self.tstates_per_line {
            return fail("border line longer than a raster line");
        }
        if self.border_start > self.screen_start {
            return fail("border starts after the pixel area");
        }
        if self.audio.samples_per_frame == 0 || self.audio.oversample == 0 {
            return fail("no audio samples per frame");
        }
        Ok(())
    }
}
