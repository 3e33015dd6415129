use std::{
    cell::Cell,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use once_cell::unsync::OnceCell;
use tracing::{debug, trace};

use crate::{config::VsyncFinetune, timing::TimingProfile};

/// Wall clock seen by the pacer, in microseconds.
pub trait TimeSource {
    fn now_micros(&self) -> u64;
    fn sleep_micros(&self, micros: u64);
}

/// Host monotonic clock. The origin is taken on first use so a machine can
/// be built on targets where the pacer never runs.
#[derive(Debug, Default)]
pub struct HostTime {
    origin: OnceCell<Instant>,
}

impl TimeSource for HostTime {
    fn now_micros(&self) -> u64 {
        let origin = self.origin.get_or_init(Instant::now);
        origin.elapsed().as_micros() as u64
    }

    fn sleep_micros(&self, micros: u64) {
        std::thread::sleep(Duration::from_micros(micros));
    }
}

/// Hand-driven clock. Sleeping advances it; clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualTime {
    now: Rc<Cell<u64>>,
    slept: Rc<Cell<u64>>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, micros: u64) {
        self.now.set(self.now.get() + micros);
    }

    /// Total time spent in `sleep_micros`.
    pub fn slept(&self) -> u64 {
        self.slept.get()
    }
}

impl TimeSource for ManualTime {
    fn now_micros(&self) -> u64 {
        self.now.get()
    }

    fn sleep_micros(&self, micros: u64) {
        self.slept.set(self.slept.get() + micros);
        self.advance(micros);
    }
}

#[derive(Debug, Default)]
struct SignalState {
    vsync: AtomicBool,
    frames: AtomicU64,
}

/// Frame-complete handoff to a display thread. The emulation side posts,
/// the display side only reads.
#[derive(Debug, Default, Clone)]
pub struct FrameSignal {
    state: Arc<SignalState>,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, vsync: bool) {
        self.state.frames.fetch_add(1, Ordering::Release);
        if vsync {
            self.state.vsync.store(true, Ordering::Release);
        }
    }

    /// Frames completed since the signal was created.
    pub fn frames(&self) -> u64 {
        self.state.frames.load(Ordering::Acquire)
    }

    pub fn vsync(&self) -> bool {
        self.state.vsync.load(Ordering::Acquire)
    }

    /// Consumes a pending vsync.
    pub fn take_vsync(&self) -> bool {
        self.state.vsync.swap(false, Ordering::AcqRel)
    }
}

/// Timing of the last paced frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub elapsed_us: u64,
    /// Budget left after emulation; negative on overrun.
    pub idle_us: i64,
    pub vsync: bool,
}

pub struct FramePacer {
    target_us: u64,
    throttle: bool,
    finetune: Option<VsyncFinetune>,
    time: Box<dyn TimeSource>,
    signal: FrameSignal,
    frame_start: Option<u64>,
    prev_post: Option<u64>,
    vsync_accum: i64,
    vsync_count: u32,
    last: FrameTiming,
}

impl FramePacer {
    pub fn new(
        profile: &TimingProfile,
        throttle: bool,
        finetune: Option<VsyncFinetune>,
        time: Box<dyn TimeSource>,
    ) -> Self {
        debug!(
            "[SYNC] {} us per frame, throttle {}",
            profile.micros_per_frame, throttle
        );
        Self {
            target_us: profile.micros_per_frame as u64,
            throttle,
            finetune,
            time,
            signal: FrameSignal::new(),
            frame_start: None,
            prev_post: None,
            vsync_accum: 0,
            vsync_count: 0,
            last: FrameTiming::default(),
        }
    }

    pub fn target_us(&self) -> u64 {
        self.target_us
    }

    pub fn throttle(&self) -> bool {
        self.throttle
    }

    pub fn set_throttle(&mut self, throttle: bool) {
        self.throttle = throttle;
    }

    pub fn signal(&self) -> FrameSignal {
        self.signal.clone()
    }

    pub fn last(&self) -> FrameTiming {
        self.last
    }

    pub fn begin_frame(&mut self) {
        self.frame_start = Some(self.time.now_micros());
    }

    /// Closes a frame: sleeps out the remaining budget when throttled, then
    /// posts the frame to the display side.
    pub fn end_frame(&mut self) -> FrameTiming {
        let now = self.time.now_micros();
        let start = self.frame_start.take().unwrap_or(now);
        let elapsed_us = now - start;
        let idle_us = self.target_us as i64 - elapsed_us as i64;

        if self.throttle && idle_us > 0 {
            self.time.sleep_micros(idle_us as u64);
        } else if idle_us < 0 {
            trace!("[SYNC] Frame overran by {} us", -idle_us);
        }

        let vsync = self.vsync_tick();
        self.signal.post(vsync);
        self.last = FrameTiming {
            elapsed_us,
            idle_us,
            vsync,
        };
        self.last
    }

    /// Accumulates wall time between posts and raises vsync once a frame
    /// budget has gone by. The finetune nudge is folded in every
    /// `every_frames` vsyncs.
    fn vsync_tick(&mut self) -> bool {
        let now = self.time.now_micros();
        let Some(prev) = self.prev_post.replace(now) else {
            self.vsync_accum = 0;
            return false;
        };

        self.vsync_accum += (now - prev) as i64;
        if self.vsync_accum < self.target_us as i64 {
            return false;
        }

        if let Some(finetune) = self.finetune.filter(|f| f.adjust_us != 0) {
            if self.vsync_count == finetune.every_frames {
                self.vsync_accum += finetune.adjust_us as i64;
                self.vsync_count = 0;
            } else {
                self.vsync_count += 1;
            }
        }
        self.vsync_accum -= self.target_us as i64;
        true
    }

    pub fn reset(&mut self) {
        self.frame_start = None;
        self.prev_post = None;
        self.vsync_accum = 0;
        self.vsync_count = 0;
        self.last = FrameTiming::default();
    }
}

impl std::fmt::Debug for FramePacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePacer")
            .field("target_us", &self.target_us)
            .field("throttle", &self.throttle)
            .field("finetune", &self.finetune)
            .field("last", &self.last)
            .finish()
    }
}
