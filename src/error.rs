use std::{io, path::PathBuf};

use thiserror::Error;

use crate::internal_state::RegisterName;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("ROM image {path:?} could not be read: {source}")]
    Rom {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),
    #[error("register {0:?} is not reachable on this core")]
    UnsupportedRegister(RegisterName),
}

/// Rejected at reset time. The run loop never starts with one of these pending.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("timing profile {profile}: {reason}")]
    Timing {
        profile: &'static str,
        reason: &'static str,
    },
    #[error("missing {0} ROM image")]
    MissingRom(&'static str),
    #[error("ROM image {name} is {len} bytes, expected {expected}")]
    RomSize {
        name: &'static str,
        len: usize,
        expected: usize,
    },
    #[error("resident page budget {budget} is below the minimum of {minimum}")]
    ResidentBudget { budget: usize, minimum: usize },
    #[error("turbo multiplier {0} out of range (0..=3)")]
    Turbo(u8),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory bank {0} does not exist")]
    NoSuchBank(usize),
    #[error("bank {0} is mapped into a slot and cannot be evicted")]
    BankInUse(usize),
    #[error("bank {0} is pinned in direct memory")]
    BankPinned(usize),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bank {bank}: backing store write failed: {source}")]
    Write {
        bank: usize,
        #[source]
        source: io::Error,
    },
    #[error("bank {bank}: backing store read failed: {source}")]
    Read {
        bank: usize,
        #[source]
        source: io::Error,
    },
    #[error("backing store could not be opened at {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("invalid drive number {0}")]
    InvalidDrive(usize),
    #[error("no disk in drive")]
    NoDisk,
    #[error("disk is write protected")]
    WriteProtected,
    #[error("invalid disk size: {0}")]
    InvalidSize(String),
    #[error("format error: {0}")]
    FormatError(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
