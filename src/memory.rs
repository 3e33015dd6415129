use std::{collections::VecDeque, mem};

use derivative::Derivative;
use tracing::{error, trace, warn};

use crate::{
    bank::{blank_page, BackingStore, Bank, Page, Residency, RomSet, SerialRam, PAGE_SIZE},
    config::Architecture,
    error::{MemoryError, StorageError},
};

/// Screen RAM banks, kept in direct memory for the renderer.
pub const SCREEN_BANKS: [usize; 2] = [5, 7];

/// ALF pages the firmware and cartridge sides can address.
const ALF_FIRMWARE_WINDOW: usize = 16;
const ALF_CARTRIDGE_WINDOW: usize = 64;

static ZERO_PAGE: [u8; PAGE_SIZE] = [0; PAGE_SIZE];

/// A physical page that can back one of the four slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageId {
    Rom(usize),
    Ram(usize),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub synchronizations: u64,
    pub evictions: u64,
    pub bank_switches: u64,
    pub storage_failures: u64,
}

/// Latched paging register state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PagingLatch {
    /// RAM bank at 0xC000.
    pub bank: usize,
    /// Screen from bank 7 instead of 5.
    pub video: bool,
    /// 128K ROM select bit.
    pub rom: usize,
    /// Writes to 0x7FFD ignored until reset.
    pub locked: bool,
    /// Pentagon: RAM 0 at 0x0000.
    pub page0_ram: bool,
    /// Pentagon 1024: extension bits disabled, 128K lock honoured.
    pub limit_128: bool,
    /// TR-DOS ROM mapped at 0x0000.
    pub trdos: bool,
    /// ALF ROM page at 0x0000, rolling over at 64.
    pub alf_page: usize,
    /// ALF selector bit 7: page from the cartridge instead of the firmware.
    pub alf_cartridge: bool,
}

impl PagingLatch {
    pub fn screen_bank(&self) -> usize {
        if self.video {
            SCREEN_BANKS[1]
        } else {
            SCREEN_BANKS[0]
        }
    }
}

/// The paged 64K address space.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct MemoryMap {
    arch: Architecture,
    #[derivative(Debug = "ignore")]
    roms: Vec<Bank>,
    rams: Vec<Bank>,
    trdos_rom: Option<usize>,
    alf_base: usize,
    alf_pages: usize,
    cartridge_base: usize,
    cartridge_pages: usize,
    /// Open-bus ROM shown for ALF pages past the end of an image.
    blank_rom: usize,
    slots: [PageId; 4],
    contended: [bool; 4],
    resident_budget: usize,
    /// Unpinned resident RAM banks, oldest first.
    plugged: VecDeque<usize>,
    #[derivative(Debug = "ignore")]
    store: Box<dyn BackingStore>,
    stats: MemoryStats,
}

impl MemoryMap {
    pub fn new(arch: Architecture, roms: &RomSet, resident_budget: usize) -> Self {
        Self::with_store(arch, roms, resident_budget, Box::new(SerialRam::new()))
    }

    pub fn with_store(
        arch: Architecture,
        roms: &RomSet,
        resident_budget: usize,
        store: Box<dyn BackingStore>,
    ) -> Self {
        let mut rom_banks: Vec<Bank> = roms
            .system
            .iter()
            .enumerate()
            .map(|(index, image)| Bank::rom(index, image))
            .collect();

        let trdos_rom = roms.trdos.as_ref().map(|image| {
            rom_banks.push(Bank::rom(rom_banks.len(), image));
            rom_banks.len() - 1
        });

        let alf_base = rom_banks.len();
        for image in &roms.alf {
            rom_banks.push(Bank::rom(rom_banks.len(), image));
        }
        let cartridge_base = rom_banks.len();
        for image in &roms.cartridge {
            rom_banks.push(Bank::rom(rom_banks.len(), image));
        }
        let blank_rom = rom_banks.len();
        if arch.is_alf() {
            rom_banks.push(Bank::rom(blank_rom, &[]));
        }

        let rams = (0..arch.ram_banks())
            .map(|index| Bank::ram(index, arch.ram_contended(index), SCREEN_BANKS.contains(&index)))
            .collect();

        let mut memory = Self {
            arch,
            roms: rom_banks,
            rams,
            trdos_rom,
            alf_base,
            alf_pages: roms.alf.len(),
            cartridge_base,
            cartridge_pages: roms.cartridge.len(),
            blank_rom,
            slots: [PageId::Rom(0), PageId::Ram(5), PageId::Ram(2), PageId::Ram(0)],
            contended: [false; 4],
            resident_budget,
            plugged: VecDeque::new(),
            store,
            stats: MemoryStats::default(),
        };
        memory.reset();
        memory
    }

    /// Initial mapping: ROM 0, RAM 5, RAM 2, RAM 0. Contents are preserved.
    pub fn reset(&mut self) {
        self.slots = [PageId::Rom(0), PageId::Ram(5), PageId::Ram(2), PageId::Ram(0)];
        for slot in 0..4 {
            self.contended[slot] = self.page_contended(self.slots[slot]);
        }
        for bank in SCREEN_BANKS.into_iter().chain([2, 0]) {
            if bank < self.rams.len() {
                self.materialize(bank);
            }
        }
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    pub fn slot(&self, slot: usize) -> PageId {
        self.slots[slot & 3]
    }

    /// Cached contention flag of a slot.
    #[inline]
    pub fn is_contended(&self, slot: usize) -> bool {
        self.contended[slot & 3]
    }

    #[inline]
    pub fn address_contended(&self, address: u16) -> bool {
        self.contended[(address >> 14) as usize]
    }

    pub fn ram_banks(&self) -> usize {
        self.rams.len()
    }

    pub fn is_resident(&self, bank: usize) -> bool {
        self.rams.get(bank).map_or(false, Bank::is_resident)
    }

    pub fn resident_rams(&self) -> usize {
        self.rams.iter().filter(|bank| bank.is_resident()).count()
    }

    fn page_contended(&self, page: PageId) -> bool {
        match page {
            PageId::Rom(_) => false,
            PageId::Ram(bank) => self.rams.get(bank).map_or(false, |bank| bank.contended),
        }
    }

    fn is_mapped(&self, bank: usize) -> bool {
        self.slots.contains(&PageId::Ram(bank))
    }

    #[inline]
    pub fn read(&mut self, address: u16) -> u8 {
        let offset = (address & 0x3FFF) as usize;
        match self.slots[(address >> 14) as usize] {
            PageId::Rom(rom) => self
                .roms
                .get(rom)
                .and_then(Bank::data)
                .map_or(0xFF, |page| page[offset]),
            PageId::Ram(bank) => self.synchronize(bank).map_or(0xFF, |page| page[offset]),
        }
    }

    /// Reads without materializing anything; swapped-out pages read as 0xFF.
    pub fn peek(&self, address: u16) -> u8 {
        let offset = (address & 0x3FFF) as usize;
        let bank = match self.slots[(address >> 14) as usize] {
            PageId::Rom(rom) => self.roms.get(rom),
            PageId::Ram(bank) => self.rams.get(bank),
        };
        match bank.map(|bank| &bank.residency) {
            Some(Residency::Resident(page)) => page[offset],
            Some(Residency::Uninitialized) => 0,
            _ => 0xFF,
        }
    }

    /// Writes to ROM slots are dropped.
    #[inline]
    pub fn write(&mut self, address: u16, value: u8) {
        let offset = (address & 0x3FFF) as usize;
        if let PageId::Ram(bank) = self.slots[(address >> 14) as usize] {
            if let Ok(page) = self.synchronize(bank) {
                page[offset] = value;
                self.rams[bank].dirty = true;
            }
        }
    }

    /// Binds a slot to a page. Rebinding the page already there is a no-op.
    pub fn switch_bank(&mut self, slot: usize, page: PageId) -> Result<(), MemoryError> {
        let slot = slot & 3;
        match page {
            PageId::Rom(rom) if rom >= self.roms.len() => return Err(MemoryError::NoSuchBank(rom)),
            PageId::Ram(bank) if bank >= self.rams.len() => {
                return Err(MemoryError::NoSuchBank(bank))
            }
            _ => {}
        }
        if self.slots[slot] == page {
            return Ok(());
        }

        trace!("[MEM] Slot {} -> {:?}", slot, page);
        self.slots[slot] = page;
        self.contended[slot] = self.page_contended(page);
        self.stats.bank_switches += 1;

        if let PageId::Ram(bank) = page {
            self.synchronize(bank)?;
        }
        Ok(())
    }

    /// Makes a RAM bank directly addressable, evicting the oldest unmapped
    /// bank when the resident budget is spent.
    pub fn synchronize(&mut self, bank: usize) -> Result<&mut [u8; PAGE_SIZE], MemoryError> {
        let entry = self.rams.get(bank).ok_or(MemoryError::NoSuchBank(bank))?;
        if !entry.is_resident() {
            self.materialize(bank);
        }
        self.rams[bank]
            .data_mut()
            .ok_or(MemoryError::NoSuchBank(bank))
    }

    fn materialize(&mut self, bank: usize) {
        if self.rams[bank].is_resident() {
            return;
        }
        let mut page = self.take_free_page();

        match self.rams[bank].residency {
            Residency::Swapped { offset } => {
                if let Err(source) = self.store.load(offset, &mut page) {
                    let err = StorageError::Read { bank, source };
                    error!("[MEM] {}, continuing with a zero-filled page", err);
                    page.fill(0);
                    self.stats.storage_failures += 1;
                    self.rams[bank].stored = false;
                }
            }
            _ => page.fill(0),
        }

        let entry = &mut self.rams[bank];
        entry.residency = Residency::Resident(page);
        entry.dirty = false;
        if !entry.pinned {
            self.plugged.push_back(bank);
        }
        self.stats.synchronizations += 1;
        trace!("[MEM] Bank {} synchronized", bank);
    }

    fn take_free_page(&mut self) -> Page {
        if self.resident_rams() < self.resident_budget {
            return blank_page();
        }

        let candidates: Vec<usize> = self
            .plugged
            .iter()
            .copied()
            .filter(|&bank| !self.is_mapped(bank))
            .collect();
        for victim in candidates {
            match self.detach(victim) {
                Ok(Some(page)) => return page,
                Ok(None) => {}
                Err(err) => error!("[MEM] Could not evict bank {}: {}", victim, err),
            }
        }

        warn!(
            "[MEM] Resident budget of {} pages exceeded",
            self.resident_budget
        );
        blank_page()
    }

    /// Stores a resident bank out and releases its buffer. A bank whose store
    /// fails stays resident.
    fn detach(&mut self, bank: usize) -> Result<Option<Page>, MemoryError> {
        if self.is_mapped(bank) {
            return Err(MemoryError::BankInUse(bank));
        }
        let entry = self.rams.get_mut(bank).ok_or(MemoryError::NoSuchBank(bank))?;
        if entry.pinned {
            return Err(MemoryError::BankPinned(bank));
        }
        let offset = entry.backing_offset();

        if let Residency::Resident(page) = &entry.residency {
            if entry.dirty || !entry.stored {
                if let Err(source) = self.store.store(offset, page) {
                    self.stats.storage_failures += 1;
                    return Err(StorageError::Write { bank, source }.into());
                }
            }
        }

        let page = match mem::replace(&mut entry.residency, Residency::Swapped { offset }) {
            Residency::Resident(page) => page,
            other => {
                entry.residency = other;
                return Ok(None);
            }
        };
        entry.dirty = false;
        entry.stored = true;
        self.plugged.retain(|&plugged| plugged != bank);
        self.stats.evictions += 1;
        trace!("[MEM] Bank {} evicted to {:#x}", bank, offset);
        Ok(Some(page))
    }

    /// Moves a bank out to the backing store. Mapped and pinned banks are refused.
    pub fn evict_to_backing(&mut self, bank: usize) -> Result<(), MemoryError> {
        self.detach(bank).map(|_| ())
    }

    /// Resident RAM page for the renderer; screen banks always are.
    pub fn ram_page(&self, bank: usize) -> &[u8; PAGE_SIZE] {
        self.rams
            .get(bank)
            .and_then(Bank::data)
            .unwrap_or(&ZERO_PAGE)
    }

    /// Copies a loader-supplied image into a RAM bank.
    pub fn load_ram_page(&mut self, bank: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        let page = self.synchronize(bank)?;
        let len = bytes.len().min(PAGE_SIZE);
        page[..len].copy_from_slice(&bytes[..len]);
        self.rams[bank].dirty = true;
        Ok(())
    }

    /// Page that slot 0 should show for the current latch.
    pub fn resolve_slot0(&self, latch: &PagingLatch) -> PageId {
        if latch.page0_ram {
            return PageId::Ram(0);
        }
        if latch.trdos {
            if let Some(rom) = self.trdos_rom {
                return PageId::Rom(rom);
            }
        }
        if self.arch.is_alf() {
            return PageId::Rom(self.alf_rom(latch));
        }
        PageId::Rom(latch.rom.min(self.roms.len().saturating_sub(1)))
    }

    fn alf_rom(&self, latch: &PagingLatch) -> usize {
        let (base, pages, window) = if latch.alf_cartridge {
            (self.cartridge_base, self.cartridge_pages, ALF_CARTRIDGE_WINDOW)
        } else {
            (self.alf_base, self.alf_pages, ALF_FIRMWARE_WINDOW)
        };
        if latch.alf_page < pages.min(window) {
            base + latch.alf_page
        } else {
            self.blank_rom
        }
    }

    pub fn has_trdos(&self) -> bool {
        self.trdos_rom.is_some()
    }

    /// Re-resolves slots 0 and 3 from the latch.
    pub fn apply_latch(&mut self, latch: &PagingLatch) -> Result<(), MemoryError> {
        let page0 = self.resolve_slot0(latch);
        self.switch_bank(0, page0)?;
        self.switch_bank(3, PageId::Ram(latch.bank % self.rams.len()))
    }
}
