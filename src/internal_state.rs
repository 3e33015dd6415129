use std::{fmt, str::FromStr};

/// Registers a loader can set by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterName {
    A,
    F,
    BC,
    DE,
    HL,
    AF2,
    BC2,
    DE2,
    HL2,
    IX,
    IY,
    SP,
    PC,
    I,
    R,
    IM,
    IFF1,
    IFF2,
}

impl FromStr for RegisterName {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let register = match name.to_ascii_uppercase().as_str() {
            "A" => RegisterName::A,
            "F" => RegisterName::F,
            "BC" => RegisterName::BC,
            "DE" => RegisterName::DE,
            "HL" => RegisterName::HL,
            "AF'" | "AF2" => RegisterName::AF2,
            "BC'" | "BC2" => RegisterName::BC2,
            "DE'" | "DE2" => RegisterName::DE2,
            "HL'" | "HL2" => RegisterName::HL2,
            "IX" => RegisterName::IX,
            "IY" => RegisterName::IY,
            "SP" => RegisterName::SP,
            "PC" => RegisterName::PC,
            "I" => RegisterName::I,
            "R" => RegisterName::R,
            "IM" => RegisterName::IM,
            "IFF1" => RegisterName::IFF1,
            "IFF2" => RegisterName::IFF2,
            _ => return Err(format!("unknown register {}", name)),
        };
        Ok(register)
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct InternalState {
    pub a: u8,
    pub f: u8,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub halted: bool,

    // timing
    pub tstates: u32,
    pub frame: u64,
}

impl fmt::Display for InternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:04X} A: #{:02X} F: #{:02X} BC: #{:04X} DE: #{:04X} HL: #{:04X} IX: #{:04X} IY: #{:04X} SP: #{:04X} I: #{:02X} R: #{:02X}{} - T {} F {}",
            self.pc,
            self.a,
            self.f,
            self.bc,
            self.de,
            self.hl,
            self.ix,
            self.iy,
            self.sp,
            self.i,
            self.r,
            if self.halted { " HALT" } else { "" },
            self.tstates,
            self.frame
        )
    }
}

pub trait ReportState {
    fn report_state(&mut self) -> anyhow::Result<InternalState>;
}
