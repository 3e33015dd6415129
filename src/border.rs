use std::ops::Range;

use crate::{
    timing::{BorderGeometry, TimingProfile, FRAME_HEIGHT, SCREEN_END_ROW, SCREEN_FIRST_ROW},
    video::FrameBuffers,
};

/// Bottom border rows the overlay owns when it sits in the border.
pub const OVERLAY_ROWS: Range<usize> = 220..236;
/// Pixel columns of the overlay box inside those rows.
pub const OVERLAY_PIXELS: Range<usize> = 168..312;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderState {
    /// Before the top-left border column of the frame.
    Waiting,
    Top,
    /// Lines beside the pixel area: left and right columns only.
    Middle,
    Bottom,
    /// Whole border painted for this frame.
    Done,
}

/// The border half of the raster beam. Paces itself on its own column
/// width, which differs from the 4 T-state pixel quad on Pentagon.
#[derive(Debug, Clone)]
pub struct BorderBeam {
    geometry: BorderGeometry,
    start: u32,
    line_gap: u32,
    state: BorderState,
    /// T-state at which the next column is painted.
    next: u32,
    column: u32,
    line: usize,
}

impl BorderBeam {
    pub fn new(profile: &TimingProfile) -> Self {
        Self {
            geometry: profile.border,
            start: profile.border_start,
            line_gap: profile.border_line_gap(),
            state: BorderState::Waiting,
            next: profile.border_start,
            column: 0,
            line: 0,
        }
    }

    /// Back to the top-left corner for the next frame.
    pub fn rearm(&mut self) {
        self.state = BorderState::Waiting;
        self.next = self.start;
        self.column = 0;
        self.line = 0;
    }

    pub fn state(&self) -> BorderState {
        self.state
    }

    /// Line and column of the next border column to paint.
    pub fn position(&self) -> (usize, u32) {
        (self.line, self.column)
    }

    /// Paints every border column the beam has reached by `now` in `colour`.
    /// Returns true when blending left a column different from last field.
    pub fn advance(
        &mut self,
        now: u32,
        colour: u8,
        buffers: &mut FrameBuffers,
        overlay: bool,
    ) -> bool {
        let mut blend_changed = false;

        while self.next <= now {
            match self.state {
                BorderState::Done => break,
                BorderState::Waiting => {
                    self.state = BorderState::Top;
                    self.column = 0;
                    self.line = 0;
                }
                BorderState::Top | BorderState::Middle | BorderState::Bottom => {
                    let x = self.column as usize * self.geometry.pixels_per_column;
                    let hidden = overlay
                        && self.state == BorderState::Bottom
                        && OVERLAY_ROWS.contains(&self.line)
                        && OVERLAY_PIXELS.contains(&x);
                    if !hidden {
                        let index = self.line * crate::timing::FRAME_WIDTH + x;
                        blend_changed |=
                            buffers.put_run(index, self.geometry.pixels_per_column, colour);
                    }

                    self.next += self.geometry.tstates_per_column;
                    self.column += 1;

                    if self.state == BorderState::Middle
                        && self.column == self.geometry.left_columns
                    {
                        self.next += self.geometry.screen_tstates();
                        self.column = self.geometry.right_column();
                    } else if self.column == self.geometry.columns {
                        self.column = 0;
                        self.line += 1;
                        self.next += self.line_gap;
                        self.state = match self.line {
                            SCREEN_FIRST_ROW => BorderState::Middle,
                            SCREEN_END_ROW => BorderState::Bottom,
                            FRAME_HEIGHT => BorderState::Done,
                            _ => self.state,
                        };
                    }
                }
            }
        }

        blend_changed
    }
}
