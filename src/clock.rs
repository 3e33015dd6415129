/// Shared T-state time base.
#[derive(Debug, Default, Clone)]
pub struct Clock {
    /// T-states since the start of the current frame. May run past the frame
    /// length mid-instruction; wrapped at frame end.
    pub tstates: u32,

    /// T-states since reset, advanced a whole frame at a time.
    pub global_tstates: u64,

    /// Contention wait states injected since reset.
    pub wait_states: u64,

    /// Completed frames.
    frame_count: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn advance(&mut self, tstates: u32) {
        self.tstates += tstates;
    }

    /// Adds contention delay, counted separately so callers can tell it apart
    /// from the states they asked to spend.
    #[inline]
    pub fn inject_wait(&mut self, tstates: u32) {
        self.tstates += tstates;
        self.wait_states += tstates as u64;
    }

    /// Rolls `tstates` back by exactly one frame.
    pub fn end_frame(&mut self, states_in_frame: u32) {
        self.tstates = self.tstates.saturating_sub(states_in_frame);
        self.global_tstates += states_in_frame as u64;
        self.frame_count += 1;
    }

    /// Absolute T-state including the current partial frame.
    pub fn now(&self) -> u64 {
        self.global_tstates + self.tstates as u64
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Progress through a frame of the given length (0.0 - 1.0)
    pub fn frame_progress(&self, states_in_frame: u32) -> f64 {
        self.tstates as f64 / states_in_frame as f64
    }

    pub fn timing_info(&self, tstates_per_line: u32) -> TimingInfo {
        TimingInfo {
            global_tstates: self.global_tstates,
            tstates: self.tstates,
            line: self.tstates / tstates_per_line,
            line_tstate: self.tstates % tstates_per_line,
            frame_count: self.frame_count,
        }
    }
}

/// Timing information snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingInfo {
    pub global_tstates: u64,
    pub tstates: u32,
    pub line: u32,
    pub line_tstate: u32,
    pub frame_count: u64,
}
