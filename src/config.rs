use std::{fs, path::Path, path::PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Slots plus both candidate screen pages must always fit in direct memory.
pub const MIN_RESIDENT_PAGES: usize = 6;

pub const MAX_TURBO: u8 = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[default]
    Spectrum48,
    Spectrum128,
    Pentagon,
    Pentagon512,
    Pentagon1024,
    Alf,
}

impl Architecture {
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Spectrum48 => "48K",
            Architecture::Spectrum128 => "128K",
            Architecture::Pentagon => "Pentagon",
            Architecture::Pentagon512 => "P512",
            Architecture::Pentagon1024 => "P1024",
            Architecture::Alf => "ALF",
        }
    }

    pub fn is_48k(self) -> bool {
        self == Architecture::Spectrum48
    }

    pub fn is_pentagon(self) -> bool {
        matches!(
            self,
            Architecture::Pentagon | Architecture::Pentagon512 | Architecture::Pentagon1024
        )
    }

    pub fn is_alf(self) -> bool {
        self == Architecture::Alf
    }

    /// Machines decoding the 0x7FFD paging port.
    pub fn has_128k_paging(self) -> bool {
        !self.is_48k()
    }

    pub fn ram_banks(self) -> usize {
        match self {
            Architecture::Pentagon512 => 32,
            Architecture::Pentagon1024 => 64,
            _ => 8,
        }
    }

    /// System ROM pages, not counting TR-DOS or cartridge pages.
    pub fn system_roms(self) -> usize {
        match self {
            Architecture::Spectrum48 | Architecture::Alf => 1,
            _ => 2,
        }
    }

    /// Odd banks sit on the chips the ULA shares. Pentagons have no contention at all.
    pub fn ram_contended(self, bank: usize) -> bool {
        !self.is_pentagon() && bank & 1 == 1
    }

    /// ROM page holding 48K BASIC, the one TR-DOS traps out of.
    pub fn basic_rom(self) -> usize {
        match self {
            Architecture::Spectrum48 | Architecture::Alf => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    #[default]
    Standard,
    Snow,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Joystick {
    None,
    #[default]
    Kempston,
    Fuller,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointConfig {
    pub pc: Option<u16>,
    pub port_read: Option<u16>,
    pub port_write: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VsyncFinetune {
    /// Added to the frame budget, may be negative.
    pub adjust_us: i32,
    pub every_frames: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub arch: Architecture,
    pub render: RenderMode,
    pub blend: bool,
    pub late_timing: bool,
    pub issue2: bool,
    pub ay_on_48k: bool,
    pub joystick: Joystick,
    pub kempston_port: u8,
    pub throttle: bool,
    pub turbo: u8,
    pub resident_pages: usize,
    pub swap_path: Option<PathBuf>,
    pub breakpoints: BreakpointConfig,
    pub vsync_finetune: Option<VsyncFinetune>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            arch: Architecture::default(),
            render: RenderMode::default(),
            blend: false,
            late_timing: false,
            issue2: false,
            ay_on_48k: false,
            joystick: Joystick::default(),
            kempston_port: 0x1F,
            throttle: true,
            turbo: 0,
            resident_pages: 64,
            swap_path: None,
            breakpoints: BreakpointConfig::default(),
            vsync_finetune: None,
        }
    }
}

impl MachineConfig {
    pub fn new(arch: Architecture) -> Self {
        Self {
            arch,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: MachineConfig =
            serde_json::from_str(json).context("parsing machine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turbo > MAX_TURBO {
            tracing::warn!("[CONFIG] Rejecting turbo multiplier {}", self.turbo);
            return Err(ConfigError::Turbo(self.turbo));
        }
        if self.resident_pages < MIN_RESIDENT_PAGES {
            tracing::warn!(
                "[CONFIG] Rejecting resident page budget {}",
                self.resident_pages
            );
            return Err(ConfigError::ResidentBudget {
                budget: self.resident_pages,
                minimum: MIN_RESIDENT_PAGES,
            });
        }
        Ok(())
    }

    /// AY emulation is always on for 128K-class machines, optional on the 48K.
    pub fn ay_enabled(&self) -> bool {
        self.arch.has_128k_paging() || self.ay_on_48k
    }

    pub fn snow(&self) -> bool {
        self.render == RenderMode::Snow
    }
}
