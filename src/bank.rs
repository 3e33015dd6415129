use std::{
    fmt::{self, Debug},
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    config::Architecture,
    error::{ConfigError, MachineError, StorageError},
};

pub const PAGE_SIZE: usize = 0x4000;

pub type Page = Box<[u8; PAGE_SIZE]>;

pub fn blank_page() -> Page {
    Box::new([0; PAGE_SIZE])
}

/// Where a bank's bytes currently live.
pub enum Residency {
    /// Directly addressable.
    Resident(Page),
    /// Held by the backing store at this offset.
    Swapped { offset: u64 },
    /// Never touched, reads as zeroes once materialized.
    Uninitialized,
}

impl Debug for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Residency::Resident(_) => write!(f, "Resident"),
            Residency::Swapped { offset } => write!(f, "Swapped({:#x})", offset),
            Residency::Uninitialized => write!(f, "Uninitialized"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankKind {
    Rom,
    Ram,
}

/// A physical 16K page and its residency.
#[derive(Debug)]
pub struct Bank {
    pub index: usize,
    pub kind: BankKind,
    /// Sits on a chip the ULA shares.
    pub contended: bool,
    /// Never evicted, used for ROMs and the screen pages.
    pub pinned: bool,
    /// Written since it was last stored out.
    pub dirty: bool,
    /// The backing store holds a copy.
    pub stored: bool,
    pub residency: Residency,
}

impl Bank {
    pub fn rom(index: usize, image: &[u8]) -> Self {
        let mut page = Box::new([0xFF; PAGE_SIZE]);
        let len = image.len().min(PAGE_SIZE);
        page[..len].copy_from_slice(&image[..len]);

        Self {
            index,
            kind: BankKind::Rom,
            contended: false,
            pinned: true,
            dirty: false,
            stored: false,
            residency: Residency::Resident(page),
        }
    }

    pub fn ram(index: usize, contended: bool, pinned: bool) -> Self {
        Self {
            index,
            kind: BankKind::Ram,
            contended,
            pinned,
            dirty: false,
            stored: false,
            residency: Residency::Uninitialized,
        }
    }

    pub fn is_rom(&self) -> bool {
        self.kind == BankKind::Rom
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.residency, Residency::Resident(_))
    }

    pub fn data(&self) -> Option<&[u8; PAGE_SIZE]> {
        match &self.residency {
            Residency::Resident(page) => Some(&**page),
            _ => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut [u8; PAGE_SIZE]> {
        match &mut self.residency {
            Residency::Resident(page) => Some(&mut **page),
            _ => None,
        }
    }

    pub fn backing_offset(&self) -> u64 {
        (self.index * PAGE_SIZE) as u64
    }
}

/// Secondary storage for evicted RAM banks.
pub trait BackingStore: Debug {
    fn store(&mut self, offset: u64, page: &[u8; PAGE_SIZE]) -> io::Result<()>;
    fn load(&mut self, offset: u64, page: &mut [u8; PAGE_SIZE]) -> io::Result<()>;
}

/// Slow serial-attached RAM, modelled as a flat growable buffer.
#[derive(Debug, Default)]
pub struct SerialRam {
    data: Vec<u8>,
}

impl SerialRam {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for SerialRam {
    fn store(&mut self, offset: u64, page: &[u8; PAGE_SIZE]) -> io::Result<()> {
        let start = offset as usize;
        if self.data.len() < start + PAGE_SIZE {
            self.data.resize(start + PAGE_SIZE, 0);
        }
        self.data[start..start + PAGE_SIZE].copy_from_slice(page);
        Ok(())
    }

    fn load(&mut self, offset: u64, page: &mut [u8; PAGE_SIZE]) -> io::Result<()> {
        let start = offset as usize;
        let src = self
            .data
            .get(start..start + PAGE_SIZE)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "page never stored"))?;
        page.copy_from_slice(src);
        Ok(())
    }
}

/// Backing file on the host filesystem.
#[derive(Debug)]
pub struct SwapFile {
    path: PathBuf,
    file: File,
}

impl SwapFile {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| StorageError::Open {
                path: path.clone(),
                source,
            })?;
        tracing::debug!("[MEM] Swap file at {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for SwapFile {
    fn store(&mut self, offset: u64, page: &[u8; PAGE_SIZE]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page)?;
        self.file.flush()
    }

    fn load(&mut self, offset: u64, page: &mut [u8; PAGE_SIZE]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(page)
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>, MachineError> {
    let rom_error = |source| MachineError::Rom {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(rom_error)?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer).map_err(rom_error)?;
    Ok(buffer)
}

/// ROM images for a machine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RomSet {
    pub system: Vec<Vec<u8>>,
    pub trdos: Option<Vec<u8>>,
    /// ALF firmware pages.
    pub alf: Vec<Vec<u8>>,
    /// Cartridge plugged into the ALF slot.
    pub cartridge: Vec<Vec<u8>>,
}

impl RomSet {
    pub fn new(system: &[&[u8]]) -> Self {
        Self {
            system: system.iter().map(|rom| rom.to_vec()).collect(),
            ..Default::default()
        }
    }

    pub fn with_trdos(mut self, rom: &[u8]) -> Self {
        self.trdos = Some(rom.to_vec());
        self
    }

    pub fn with_alf(mut self, image: &[u8]) -> Self {
        self.alf = image.chunks(PAGE_SIZE).map(|page| page.to_vec()).collect();
        self
    }

    pub fn with_cartridge(mut self, image: &[u8]) -> Self {
        self.cartridge = image.chunks(PAGE_SIZE).map(|page| page.to_vec()).collect();
        self
    }

    /// System ROMs from one image; a 32K image is split into its two pages.
    pub fn from_image(image: &[u8]) -> Self {
        Self {
            system: image.chunks(PAGE_SIZE).map(|page| page.to_vec()).collect(),
            ..Default::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let image = read_image(path.as_ref())?;
        Ok(Self::from_image(&image))
    }

    pub fn load_trdos(self, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let image = read_image(path.as_ref())?;
        Ok(self.with_trdos(&image))
    }

    pub fn validate(&self, arch: Architecture) -> Result<(), ConfigError> {
        if self.system.len() < arch.system_roms() {
            return Err(ConfigError::MissingRom(arch.name()));
        }
        let images = self
            .system
            .iter()
            .chain(self.trdos.iter())
            .chain(self.alf.iter())
            .chain(self.cartridge.iter());
        for image in images {
            if image.len() > PAGE_SIZE {
                return Err(ConfigError::RomSize {
                    name: arch.name(),
                    len: image.len(),
                    expected: PAGE_SIZE,
                });
            }
        }
        if arch.is_alf() && self.alf.is_empty() {
            return Err(ConfigError::MissingRom("ALF firmware"));
        }
        Ok(())
    }
}
