use std::ops::Range;

use tracing::{debug, trace};

use crate::{
    bank::PAGE_SIZE,
    border::{BorderBeam, BorderState},
    clock::Clock,
    palette::{ALU_BYTES, BLEND},
    timing::{
        TimingProfile, BORDER_PIXELS_LEFT, FLASH_FRAMES, FRAME_HEIGHT, FRAME_WIDTH,
        QUADS_PER_LINE, SCREEN_END_ROW, SCREEN_FIRST_ROW, SCREEN_LINES, VIDEO_OFFSETS,
        WAIT_STATES,
    },
};

pub const FRAME_PIXELS: usize = FRAME_WIDTH * FRAME_HEIGHT;

/// T-state columns of the pixel fetch window.
const SNOW_COLUMNS: u32 = QUADS_PER_LINE * 4;

/// Frame rows where an on-screen overlay covers the pixel area.
pub const OVERLAY_SCREEN_ROWS: Range<usize> = 176..192;
/// Byte columns of those rows left to the overlay.
pub const OVERLAY_SCREEN_COLUMNS: Range<u32> = 13..31;

/// Which routine the pixel beam runs on the next draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawState {
    /// Past the last pixel row. Time passes, nothing is fetched.
    Blank,
    /// Waiting for the first fetch of the next pixel row.
    LineStart,
    /// Fetching a pixel row a quad at a time.
    Pixels,
    /// As `Pixels`, leaving the overlay window alone.
    PixelsOverlay,
    /// Fetching a pixel row T-state by T-state with refresh collisions.
    Snow,
}

/// Page exposed to the refresh address during an opcode fetch.
#[derive(Debug, Clone, Copy)]
pub struct SnowSource<'a> {
    pub page: &'a [u8; PAGE_SIZE],
    /// Low seven bits of R at the fetch.
    pub r: u8,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPlacement {
    #[default]
    Screen,
    Border,
}

/// Whether an external overlay owns part of the frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Overlay {
    pub active: bool,
    pub placement: OverlayPlacement,
}

impl Overlay {
    fn on_screen(&self) -> bool {
        self.active && self.placement == OverlayPlacement::Screen
    }

    fn on_border(&self) -> bool {
        self.active && self.placement == OverlayPlacement::Border
    }
}

/// Two frame buffers rotated each frame, plus the unblended copy of the
/// last field used for two-field blending.
#[derive(Debug)]
pub struct FrameBuffers {
    pool: [Vec<u8>; 2],
    back: usize,
    previous: Vec<u8>,
    blend: bool,
    claimed: Option<Range<usize>>,
}

impl FrameBuffers {
    pub fn new(blend: bool) -> Self {
        Self {
            pool: [vec![0; FRAME_PIXELS], vec![0; FRAME_PIXELS]],
            back: 0,
            previous: vec![0; FRAME_PIXELS],
            blend,
            claimed: None,
        }
    }

    pub fn set_blend(&mut self, blend: bool) {
        if blend && !self.blend {
            self.previous.copy_from_slice(&self.pool[self.back]);
        }
        self.blend = blend;
    }

    pub fn blend(&self) -> bool {
        self.blend
    }

    /// Last completed frame.
    pub fn front(&self) -> &[u8] {
        &self.pool[self.back ^ 1]
    }

    /// Frame being drawn.
    pub fn back(&self) -> &[u8] {
        &self.pool[self.back]
    }

    pub fn rotate(&mut self) {
        self.back ^= 1;
    }

    pub fn fill(&mut self, colour: u8) {
        for buffer in self.pool.iter_mut() {
            buffer.fill(colour);
        }
        self.previous.fill(colour);
    }

    /// Writes four packed pixels at `index`.
    #[inline]
    pub fn put_quad(&mut self, index: usize, packed: u32) {
        let Some(target) = self.pool[self.back].get_mut(index..index + 4) else {
            return;
        };
        let pixels = packed.to_le_bytes();
        if self.blend {
            let previous = &mut self.previous[index..index + 4];
            for i in 0..4 {
                target[i] = BLEND[(previous[i] & 0x0F) as usize][(pixels[i] & 0x0F) as usize];
                previous[i] = pixels[i];
            }
        } else {
            target.copy_from_slice(&pixels);
        }
    }

    /// Paints `len` pixels of one colour. Returns true when blending made any
    /// of them differ from the raw colour.
    pub fn put_run(&mut self, index: usize, len: usize, colour: u8) -> bool {
        let Some(target) = self.pool[self.back].get_mut(index..index + len) else {
            return false;
        };
        if !self.blend {
            target.fill(colour);
            return false;
        }

        let mut changed = false;
        let previous = &mut self.previous[index..index + len];
        for (pixel, last) in target.iter_mut().zip(previous.iter_mut()) {
            *pixel = BLEND[(*last & 0x0F) as usize][(colour & 0x0F) as usize];
            changed |= *last != colour;
            *last = colour;
        }
        changed
    }

    /// Hands rows of the back buffer to an overlay renderer.
    pub fn claim_rows(&mut self, rows: Range<usize>) -> Option<&mut [u8]> {
        if rows.start >= rows.end || rows.end > FRAME_HEIGHT {
            return None;
        }
        self.claimed = Some(rows.clone());
        self.pool[self.back].get_mut(rows.start * FRAME_WIDTH..rows.end * FRAME_WIDTH)
    }

    pub fn claimed_rows(&self) -> Option<Range<usize>> {
        self.claimed.clone()
    }

    pub fn release_rows(&mut self) {
        self.claimed = None;
    }
}

/// Snow mode fetch latches, one ULA cycle deep.
#[derive(Debug, Default, Clone, Copy)]
struct SnowLatches {
    phase: u8,
    bitmap: [u8; 2],
    attribute: [u8; 2],
    last_bitmap: u8,
    last_attribute: u8,
    /// Attribute byte read through the refresh address, used on the next phase.
    collided_attribute: Option<u8>,
    /// Second attribute of the cycle repeats the first.
    double_attribute: bool,
}

/// The pixel half of the raster beam and the border beam it owns.
#[derive(Debug)]
pub struct Video {
    profile: TimingProfile,
    snow_mode: bool,
    state: DrawState,
    /// Frame buffer row being drawn.
    row: usize,
    /// T-state of the first fetch of `row`.
    tstate_draw: u32,
    /// Quads fetched on this row, or T-state column in snow mode.
    column: u32,
    /// T-states not yet making up a whole quad.
    rest: u32,
    x: usize,
    bitmap_offset: usize,
    attribute_offset: usize,
    snow: SnowLatches,
    flashing: u8,
    flash_counter: u32,
    border_colour: u8,
    border: BorderBeam,
    border_changed: bool,
    border_next_frame: bool,
    buffers: FrameBuffers,
    overlay: Overlay,
    frames: u64,
}

impl Video {
    pub fn new(profile: TimingProfile, snow_mode: bool, blend: bool) -> Self {
        let mut video = Self {
            profile,
            snow_mode,
            state: DrawState::LineStart,
            row: SCREEN_FIRST_ROW,
            tstate_draw: profile.screen_start,
            column: 0,
            rest: 0,
            x: BORDER_PIXELS_LEFT,
            bitmap_offset: 0,
            attribute_offset: 0,
            snow: SnowLatches::default(),
            flashing: 0,
            flash_counter: 0,
            border_colour: 7,
            border: BorderBeam::new(&profile),
            border_changed: false,
            border_next_frame: false,
            buffers: FrameBuffers::new(blend),
            overlay: Overlay::default(),
            frames: 0,
        };
        video.reset();
        video
    }

    pub fn reset(&mut self) {
        self.state = DrawState::LineStart;
        self.row = SCREEN_FIRST_ROW;
        self.tstate_draw = self.profile.screen_start;
        self.column = 0;
        self.rest = 0;
        self.x = BORDER_PIXELS_LEFT;
        self.snow = SnowLatches::default();
        self.flashing = 0;
        self.flash_counter = 0;
        self.border_colour = 7;
        self.border = BorderBeam::new(&self.profile);
        // paint the reset colour into both buffers over the next two frames
        self.border_changed = true;
        self.border_next_frame = false;
        self.frames = 0;
        debug!(
            "[VIDEO] Reset for {} timing, snow {}",
            self.profile.name, self.snow_mode
        );
    }

    pub fn profile(&self) -> &TimingProfile {
        &self.profile
    }

    pub fn state(&self) -> DrawState {
        self.state
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn snow_mode(&self) -> bool {
        self.snow_mode
    }

    pub fn set_snow_mode(&mut self, snow: bool) {
        self.snow_mode = snow;
    }

    pub fn border_colour(&self) -> u8 {
        self.border_colour
    }

    pub fn border_state(&self) -> BorderState {
        self.border.state()
    }

    pub fn flashing(&self) -> bool {
        self.flashing != 0
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn buffers(&self) -> &FrameBuffers {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut FrameBuffers {
        &mut self.buffers
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay
    }

    pub fn set_overlay(&mut self, overlay: Overlay) {
        self.overlay = overlay;
        // the border under a closed overlay needs repainting
        self.border_changed = true;
    }

    /// Spends `states` T-states on a bus cycle, plus the ULA wait if the
    /// cycle is contended and lands inside the fetch window.
    pub fn draw(&mut self, clock: &mut Clock, vram: &[u8; PAGE_SIZE], states: u32, contended: bool) {
        match self.state {
            DrawState::Blank => clock.advance(states),
            DrawState::LineStart => self.line_start(clock, vram, states),
            DrawState::Pixels | DrawState::PixelsOverlay => {
                self.pixels(clock, vram, states, contended)
            }
            DrawState::Snow => self.snow(clock, vram, states, contended, false, None),
        }
    }

    /// Spends the 4 T-states of an opcode fetch. In snow mode the refresh
    /// cycle of the fetch can corrupt the ULA's next bytes.
    pub fn draw_opcode(
        &mut self,
        clock: &mut Clock,
        vram: &[u8; PAGE_SIZE],
        contended: bool,
        source: Option<SnowSource<'_>>,
    ) {
        match self.state {
            DrawState::LineStart if self.snow_mode => {
                self.snow_line_start_opcode(clock, vram, source)
            }
            DrawState::Snow => self.snow(clock, vram, 4, contended, true, source),
            _ => self.draw(clock, vram, 4, contended),
        }
    }

    fn begin_line(&mut self) {
        let line = self.row - SCREEN_FIRST_ROW;
        self.column = 0;
        self.x = BORDER_PIXELS_LEFT;
        self.bitmap_offset = VIDEO_OFFSETS.bitmap[line] as usize;
        self.attribute_offset = VIDEO_OFFSETS.attribute[line] as usize;
    }

    fn end_line(&mut self) {
        self.tstate_draw += self.profile.tstates_per_line;
        self.row += 1;
        self.state = if self.row == SCREEN_END_ROW {
            DrawState::Blank
        } else {
            DrawState::LineStart
        };
    }

    fn catch_up_border(&mut self, now: u32) {
        if self.border_changed {
            self.advance_border(now);
        }
    }

    fn line_start(&mut self, clock: &mut Clock, vram: &[u8; PAGE_SIZE], states: u32) {
        clock.advance(states);
        if clock.tstates < self.tstate_draw {
            return;
        }
        self.catch_up_border(clock.tstates);
        self.begin_line();

        if self.snow_mode {
            self.snow.phase = 0;
            self.state = DrawState::Snow;
            let behind = clock.tstates - self.tstate_draw;
            if behind > 0 {
                clock.tstates = self.tstate_draw;
                self.snow(clock, vram, behind, false, false, None);
            }
            return;
        }

        self.state = if self.overlay.on_screen() && OVERLAY_SCREEN_ROWS.contains(&self.row) {
            DrawState::PixelsOverlay
        } else {
            DrawState::Pixels
        };
        self.rest = clock.tstates - self.tstate_draw;
        self.pixels(clock, vram, 0, false);
    }

    fn snow_line_start_opcode(
        &mut self,
        clock: &mut Clock,
        vram: &[u8; PAGE_SIZE],
        source: Option<SnowSource<'_>>,
    ) {
        clock.advance(4);
        if clock.tstates < self.tstate_draw {
            return;
        }
        self.catch_up_border(clock.tstates);
        self.begin_line();
        self.snow.phase = 0;
        self.state = DrawState::Snow;

        let behind = clock.tstates - self.tstate_draw;
        if behind > 0 {
            clock.tstates = self.tstate_draw;
            self.snow(clock, vram, behind, false, true, source);
        }
    }

    fn pixels(&mut self, clock: &mut Clock, vram: &[u8; PAGE_SIZE], states: u32, contended: bool) {
        let wait = if contended {
            let index = clock.tstates.wrapping_sub(self.tstate_draw) as usize;
            WAIT_STATES.get(index).copied().unwrap_or(0) as u32
        } else {
            0
        };
        clock.inject_wait(wait);
        clock.advance(states);

        let total = self.rest + states + wait;
        self.rest = total & 3;
        let mut quads = total >> 2;
        let first = self.column;
        self.column += quads;

        let overlay = self.state == DrawState::PixelsOverlay;
        let row_base = self.row * FRAME_WIDTH;
        if self.column >= QUADS_PER_LINE {
            quads -= self.column - QUADS_PER_LINE;
            self.end_line();
        }

        for quad in first..first + quads {
            if overlay && OVERLAY_SCREEN_COLUMNS.contains(&quad) {
                self.skip_byte();
                continue;
            }
            let attribute = vram[self.attribute_offset & 0x3FFF];
            let mut bitmap = vram[self.bitmap_offset & 0x3FFF];
            if attribute & self.flashing != 0 {
                bitmap = !bitmap;
            }
            self.attribute_offset += 1;
            self.bitmap_offset += 1;
            self.paint(row_base, bitmap, attribute);
        }
    }

    fn skip_byte(&mut self) {
        self.attribute_offset += 1;
        self.bitmap_offset += 1;
        self.x += 8;
    }

    #[inline]
    fn paint(&mut self, row_base: usize, bitmap: u8, attribute: u8) {
        let index = row_base + self.x;
        self.buffers
            .put_quad(index, ALU_BYTES[(bitmap >> 4) as usize][attribute as usize]);
        self.buffers
            .put_quad(index + 4, ALU_BYTES[(bitmap & 0x0F) as usize][attribute as usize]);
        self.x += 8;
    }

    /// T-state at a time fetch loop. `opcode` marks the fetch half of an M1
    /// cycle, `source` the page its refresh address collides with.
    fn snow(
        &mut self,
        clock: &mut Clock,
        vram: &[u8; PAGE_SIZE],
        states: u32,
        contended: bool,
        opcode: bool,
        source: Option<SnowSource<'_>>,
    ) {
        let wait = if contended {
            WAIT_STATES.get(self.column as usize).copied().unwrap_or(0) as u32
        } else {
            0
        };
        clock.inject_wait(wait);
        clock.advance(states);
        let mut states = states + wait;

        let overlay = self.overlay.on_screen() && OVERLAY_SCREEN_ROWS.contains(&self.row);
        let mut overlay_column = self.column >> 2;
        let row_base = self.row * FRAME_WIDTH;

        self.column += states;
        if self.column >= SNOW_COLUMNS {
            states -= self.column - SNOW_COLUMNS;
            self.end_line();
        }

        if opcode && self.snow.phase == 6 {
            self.snow.phase = 2;
            return;
        }

        for remaining in (0..states).rev() {
            let collide = opcode && remaining == 0 && source.is_some();
            match self.snow.phase {
                2 => {
                    let bitmap = match source.filter(|_| collide) {
                        Some(src) => {
                            let r = (src.r & 0x7F) as usize;
                            let base = self.bitmap_offset & 0x3F80;
                            self.snow.collided_attribute =
                                Some(src.page[(self.attribute_offset & 0x3F80) | r]);
                            src.page[base | r]
                        }
                        None => vram[self.bitmap_offset & 0x3FFF],
                    };
                    self.bitmap_offset += 1;
                    self.snow.bitmap[0] = bitmap;
                    self.snow.last_bitmap = bitmap;
                }
                3 => {
                    let attribute = match self.snow.collided_attribute.take() {
                        Some(attribute) => attribute,
                        None => vram[self.attribute_offset & 0x3FFF],
                    };
                    self.attribute_offset += 1;
                    self.snow.attribute[0] = attribute;
                    self.snow.last_attribute = attribute;
                    self.snow_paint(row_base, 0, overlay && OVERLAY_SCREEN_COLUMNS.contains(&overlay_column));
                    overlay_column += 1;
                }
                4 => {
                    self.snow.bitmap[1] = if collide {
                        self.snow.double_attribute = true;
                        self.snow.last_bitmap
                    } else {
                        vram[self.bitmap_offset & 0x3FFF]
                    };
                    self.bitmap_offset += 1;
                }
                5 => {
                    self.snow.attribute[1] = if self.snow.double_attribute {
                        self.snow.double_attribute = false;
                        self.snow.last_attribute
                    } else {
                        vram[self.attribute_offset & 0x3FFF]
                    };
                    self.attribute_offset += 1;
                    self.snow_paint(row_base, 1, overlay && OVERLAY_SCREEN_COLUMNS.contains(&overlay_column));
                    overlay_column += 1;
                }
                _ => {}
            }
            self.snow.phase = (self.snow.phase + 1) & 7;
        }
    }

    fn snow_paint(&mut self, row_base: usize, half: usize, hidden: bool) {
        if hidden {
            self.x += 8;
            return;
        }
        let attribute = self.snow.attribute[half];
        let mut bitmap = self.snow.bitmap[half];
        if attribute & self.flashing != 0 {
            bitmap = !bitmap;
        }
        self.paint(row_base, bitmap, attribute);
    }

    fn advance_border(&mut self, now: u32) {
        let changed = self.border.advance(
            now,
            self.border_colour,
            &mut self.buffers,
            self.overlay.on_border(),
        );
        self.border_changed |= changed;
    }

    /// Paints the border up to the current beam position in the old colour,
    /// then latches the new one.
    pub fn change_border(&mut self, clock: &mut Clock, vram: &[u8; PAGE_SIZE], colour: u8, contended: bool) {
        let colour = colour & 7;
        if colour == self.border_colour {
            return;
        }
        self.border_changed = true;
        if contended {
            self.draw(clock, vram, 0, true);
        }
        self.advance_border(clock.tstates);
        trace!(
            "[VIDEO] Border {} -> {} at T {}",
            self.border_colour,
            colour,
            clock.tstates
        );
        self.border_colour = colour;
    }

    /// Sets the border colour outside the run loop, for loaders.
    pub fn set_border_colour(&mut self, colour: u8) {
        self.border_colour = colour & 7;
        self.border_changed = true;
    }

    /// Closes the frame at `now`: finishes pending border work, re-arms both
    /// beams for row 0 and rotates the buffers.
    pub fn end_frame(&mut self, now: u32) {
        self.row = SCREEN_FIRST_ROW;
        self.tstate_draw = self.profile.screen_start;
        self.state = DrawState::LineStart;
        self.column = 0;
        self.rest = 0;
        self.snow.double_attribute = false;
        self.snow.collided_attribute = None;

        if self.border_changed {
            self.advance_border(now.max(self.profile.states_in_frame));
            self.border_next_frame = true;
        } else if self.border_next_frame {
            self.advance_border(now.max(self.profile.states_in_frame));
            self.border_next_frame = false;
        }
        self.border.rearm();
        self.border_changed = false;

        self.flash_counter = self.flash_counter.wrapping_add(1);
        if self.flash_counter % FLASH_FRAMES == 0 {
            self.flashing ^= 0x80;
        }

        self.buffers.rotate();
        self.frames += 1;
    }

    /// Byte the ULA is fetching at `tstates`, or `None` when the bus is idle.
    pub fn floating_bus(&self, tstates: u32, vram: &[u8; PAGE_SIZE]) -> Option<u8> {
        let timing = self.profile.floating_bus?;
        let t = tstates.checked_sub(timing.tstate_bias)?;
        let line = (t / self.profile.tstates_per_line).checked_sub(timing.first_line)? as usize;
        if line >= SCREEN_LINES {
            return None;
        }

        let half_pixel = ((t % self.profile.tstates_per_line) as u8)
            .wrapping_sub(timing.column_bias as u8) as u32;
        if half_pixel >= timing.column_limit || half_pixel & 0x04 != 0 {
            return None;
        }

        let offset = ((half_pixel >> 2) + ((half_pixel >> 1) & 1)) as usize;
        let base = if half_pixel & 1 != 0 {
            VIDEO_OFFSETS.attribute[line]
        } else {
            VIDEO_OFFSETS.bitmap[line]
        } as usize;
        Some(vram[(base + offset) & 0x3FFF])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vram() -> Box<[u8; PAGE_SIZE]> {
        Box::new([0; PAGE_SIZE])
    }

    fn at(buffer: &[u8], row: usize, x: usize) -> &[u8] {
        &buffer[row * FRAME_WIDTH + x..row * FRAME_WIDTH + x + 8]
    }

    fn to_first_fetch(video: &mut Video, clock: &mut Clock, vram: &[u8; PAGE_SIZE]) {
        let start = video.profile().screen_start;
        video.draw(clock, vram, start - clock.tstates, false);
    }

    #[test]
    fn test_quad_paints_eight_pixels() {
        let mut vram = vram();
        vram[0] = 0xF0;
        vram[0x1800] = (7 << 3) | 2;
        let mut video = Video::new(TimingProfile::SPECTRUM_48, false, false);
        let mut clock = Clock::new();

        to_first_fetch(&mut video, &mut clock, &vram);
        assert_eq!(video.state(), DrawState::Pixels);
        video.draw(&mut clock, &vram, 4, false);

        assert_eq!(at(video.buffers().back(), 24, 32), &[2, 2, 2, 2, 7, 7, 7, 7]);
    }

    #[test]
    fn test_contended_access_waits() {
        let vram = vram();
        let mut video = Video::new(TimingProfile::SPECTRUM_48, false, false);
        let mut clock = Clock::new();
        to_first_fetch(&mut video, &mut clock, &vram);

        let before = clock.tstates;
        video.draw(&mut clock, &vram, 3, true);
        assert_eq!(clock.tstates - before, 3 + 6);
        assert_eq!(clock.wait_states, 6);

        // uncontended costs only its own states
        let before = clock.tstates;
        video.draw(&mut clock, &vram, 3, false);
        assert_eq!(clock.tstates - before, 3);
    }

    #[test]
    fn test_row_ends_after_32_quads() {
        let vram = vram();
        let mut video = Video::new(TimingProfile::SPECTRUM_128, false, false);
        let mut clock = Clock::new();
        to_first_fetch(&mut video, &mut clock, &vram);

        for _ in 0..32 {
            video.draw(&mut clock, &vram, 4, false);
        }
        assert_eq!(video.state(), DrawState::LineStart);
        assert_eq!(video.row(), SCREEN_FIRST_ROW + 1);
    }

    #[test]
    fn test_frame_goes_blank_after_last_row() {
        let vram = vram();
        let profile = TimingProfile::PENTAGON;
        let mut video = Video::new(profile, false, false);
        let mut clock = Clock::new();

        while clock.tstates < profile.states_in_frame {
            video.draw(&mut clock, &vram, 4, false);
        }
        assert_eq!(video.state(), DrawState::Blank);
        assert_eq!(video.row(), SCREEN_END_ROW);

        video.end_frame(clock.tstates);
        assert_eq!(video.state(), DrawState::LineStart);
        assert_eq!(video.row(), SCREEN_FIRST_ROW);
        assert_eq!(video.border_state(), BorderState::Waiting);
    }

    #[test]
    fn test_border_change_mid_line() {
        let vram = vram();
        let profile = TimingProfile::SPECTRUM_48;
        let mut video = Video::new(profile, false, false);
        let mut clock = Clock::new();

        clock.advance(profile.border_start + 10 * 4);
        video.change_border(&mut clock, &vram, 2, false);
        assert_eq!(video.border_colour(), 2);
        video.end_frame(profile.states_in_frame);

        let frame = video.buffers().front();
        assert_eq!(at(frame, 0, 72), &[7; 8]);
        assert_eq!(at(frame, 0, 80), &[7; 8]);
        assert_eq!(at(frame, 0, 88), &[2; 8]);
        assert_eq!(at(frame, 1, 0), &[2; 8]);
        assert_eq!(at(frame, 239, 312), &[2; 8]);
    }

    #[test]
    fn test_flash_toggles_every_16_frames() {
        let mut video = Video::new(TimingProfile::SPECTRUM_48, false, false);
        for _ in 0..15 {
            video.end_frame(0);
        }
        assert!(!video.flashing());
        video.end_frame(0);
        assert!(video.flashing());
        assert_eq!(video.frames(), 16);
    }

    #[test]
    fn test_floating_bus_48k() {
        let mut vram = vram();
        let video = Video::new(TimingProfile::SPECTRUM_48, false, false);
        let attribute = VIDEO_OFFSETS.attribute[100] as usize;
        let bitmap = VIDEO_OFFSETS.bitmap[100] as usize;
        vram[attribute] = 0xAB;
        vram[bitmap] = 0xCD;

        let line_start = (64 + 100) * 224;
        assert_eq!(video.floating_bus(line_start + 3, &vram), Some(0xCD));
        assert_eq!(video.floating_bus(line_start + 4, &vram), Some(0xAB));
        assert_eq!(video.floating_bus(line_start + 7, &vram), None);
        assert_eq!(video.floating_bus(line_start, &vram), None);
        assert_eq!(video.floating_bus(1000, &vram), None);
    }

    #[test]
    fn test_no_floating_bus_on_pentagon() {
        let vram = vram();
        let video = Video::new(TimingProfile::PENTAGON, false, false);
        assert_eq!(video.floating_bus(40000, &vram), None);
    }

    #[test]
    fn test_snow_reads_refresh_page() {
        let vram = vram();
        let mut collided = vram.clone();
        collided[5] = 0xFF;
        collided[0x1805] = (7 << 3) | 1;

        let mut video = Video::new(TimingProfile::SPECTRUM_48, true, false);
        let mut clock = Clock::new();
        to_first_fetch(&mut video, &mut clock, &vram);
        assert_eq!(video.state(), DrawState::Snow);

        video.draw(&mut clock, &vram, 7, false);
        let source = SnowSource {
            page: &collided,
            r: 0x85,
        };
        video.draw_opcode(&mut clock, &vram, false, Some(source));
        video.draw(&mut clock, &vram, 1, false);

        let frame = video.buffers().back();
        assert_eq!(at(frame, 24, 40), &[0; 8]);
        assert_eq!(at(frame, 24, 48), &[1; 8]);
    }

    #[test]
    fn test_blend_reports_changes() {
        let mut buffers = FrameBuffers::new(true);
        assert!(buffers.put_run(0, 2, 2));
        assert_eq!(buffers.back()[0], BLEND[0][2]);
        assert!(!buffers.put_run(0, 2, 2));
        assert_eq!(buffers.back()[0], 2);
    }

    #[test]
    fn test_claim_rows() {
        let mut buffers = FrameBuffers::new(false);
        let rows = buffers.claim_rows(220..236).unwrap();
        assert_eq!(rows.len(), 16 * FRAME_WIDTH);
        rows.fill(4);
        assert_eq!(buffers.claimed_rows(), Some(220..236));
        assert!(buffers.claim_rows(230..250).is_none());
        buffers.release_rows();
        assert_eq!(buffers.claimed_rows(), None);
    }
}
