pub mod audio;
pub mod bank;
pub mod border;
pub mod bus;
pub mod clock;
pub mod config;
pub mod cpu;
pub mod error;
pub mod fdc;
pub mod internal_state;
pub mod io;
pub mod keyboard;
pub mod logging;
pub mod machine;
pub mod memory;
pub mod palette;
pub mod ports;
pub mod psg;
pub mod sync;
pub mod timing;
pub mod utils;
pub mod video;

pub use bank::RomSet;
pub use bus::Bus;
pub use config::{Architecture, MachineConfig};
pub use cpu::{run_frame, BreakpointHit, Cpu, FrameControl, FrameOutcome, Z80Core};
pub use error::MachineError;
pub use internal_state::{InternalState, RegisterName, ReportState};
pub use machine::{Machine, MachineBuilder};
pub use timing::TimingProfile;
pub use utils::hexdump;
use wasm_bindgen::prelude::*;

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen(js_name = Machine)]
pub struct JsMachine(Machine);

#[wasm_bindgen(js_class = Machine)]
impl JsMachine {
    /// `config` is a JSON `MachineConfig`; 48K defaults when absent.
    #[wasm_bindgen(constructor)]
    pub fn new(rom_data: &[u8], config: Option<String>) -> Result<JsMachine, JsValue> {
        console_error_panic_hook::set_once();
        tracing_wasm::set_as_global_default();

        let config = match config {
            Some(json) => MachineConfig::from_json(&json).map_err(js_error)?,
            None => MachineConfig::new(Architecture::Spectrum48),
        };
        let machine = Machine::new(&config, &RomSet::from_image(rom_data)).map_err(js_error)?;
        Ok(Self(machine))
    }

    #[wasm_bindgen(getter)]
    pub fn pc(&self) -> u16 {
        self.0.pc()
    }

    #[wasm_bindgen(getter)]
    pub fn tstates(&self) -> u32 {
        self.0.tstates()
    }

    #[wasm_bindgen(getter)]
    pub fn frames(&self) -> u64 {
        self.0.frames()
    }

    pub fn reset(&mut self) -> Result<(), JsValue> {
        self.0.reset().map_err(js_error)
    }

    /// Runs one frame; false when it was cut short.
    #[wasm_bindgen(js_name = stepFrame)]
    pub fn step_frame(&mut self) -> bool {
        self.0.step_frame() == FrameOutcome::Completed
    }

    pub fn pause(&mut self) {
        self.0.pause();
    }

    pub fn resume(&mut self) {
        self.0.resume();
    }

    /// RGBA pixels of the last completed frame.
    pub fn screen(&self) -> Vec<u8> {
        self.0.screen_rgba()
    }

    pub fn audio(&self) -> Vec<u8> {
        self.0.audio_samples()
    }

    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&mut self, code: &str) {
        self.0.key_down(code);
    }

    #[wasm_bindgen(js_name = keyUp)]
    pub fn key_up(&mut self, code: &str) {
        self.0.key_up(code);
    }

    #[wasm_bindgen(js_name = setRegister)]
    pub fn set_register(&mut self, name: &str, value: u16) -> Result<(), JsValue> {
        self.0.set_register_named(name, value).map_err(js_error)
    }

    #[wasm_bindgen(js_name = loadMemoryPage)]
    pub fn load_memory_page(&mut self, bank: usize, data: &[u8]) -> Result<(), JsValue> {
        self.0.load_memory_page(bank, data).map_err(js_error)
    }

    #[wasm_bindgen(js_name = setBankLatch)]
    pub fn set_bank_latch(&mut self, value: u8) {
        self.0.set_bank_latch(value);
    }

    #[wasm_bindgen(js_name = setBorderColor)]
    pub fn set_border_color(&mut self, colour: u8) {
        self.0.set_border_color(colour);
    }

    #[wasm_bindgen(js_name = memoryDump)]
    pub fn memory_dump(&self, start: u16, end: u16) -> String {
        self.0.memory_dump(start, end)
    }
}
