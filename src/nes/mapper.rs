use std::sync::Arc;

use tracing::debug;

use super::cartridge::NesFile;
use super::error::EmuError;
use super::memory::MemoryMap;
use super::ppu::{Mirroring, PATTERN_MEMORY_SIZE, Ppu};

pub const PRG_WINDOW_BASE: u16 = 0x8000;
const PRG_WINDOW_SPAN: u32 = 0x8000;
const PRG_BANK_16K: usize = 0x4000;
const PRG_BANK_32K: usize = 0x8000;
const CHR_BANK_4K: usize = 0x1000;

/// First of the eight NSF bank registers ($5FF8-$5FFF).
pub const NSF_BANK_REGISTERS: u16 = 0x5FF8;
const NSF_WINDOW: usize = 0x1000;

pub fn mapper_name(mapper_id: u16) -> &'static str {
    match mapper_id {
        0 => "NROM",
        1 => "MMC1",
        2 => "UxROM",
        _ => "Unsupported",
    }
}

/// Character data a cartridge hands to the PPU on bank switches.
#[derive(Debug, Clone)]
struct Chr {
    data: Arc<[u8]>,
    ram: bool,
}

impl Chr {
    fn install(&self, ppu: Option<&mut Ppu>, src_offset: usize, dest: usize, len: usize) {
        let Some(ppu) = ppu else {
            return;
        };
        if self.ram {
            ppu.set_pattern_writable(true);
            return;
        }
        if self.data.is_empty() {
            return;
        }
        let start = src_offset % self.data.len();
        let end = (start + len).min(self.data.len());
        ppu.copy_character_rom(dest, &self.data[start..end]);
    }
}

fn map_prg_window(
    memory: &mut MemoryMap,
    base: u16,
    prg: &Arc<[u8]>,
    offset: usize,
    len: usize,
) -> Result<(), EmuError> {
    memory.map_rom(base, len as u32, Arc::clone(prg), offset, len)
}

/// Cartridge bank-switching hardware. Each variant owns its registers; the
/// CPU-visible consequence of every write is a change to the [`MemoryMap`]
/// (and the PPU pattern memory when one is attached).
#[derive(Debug, Clone)]
pub enum Mapper {
    Nrom(Nrom),
    Mmc1(Mmc1),
    Uxrom(Uxrom),
    Nsf(NsfBanks),
}

impl Mapper {
    pub fn for_cartridge(cart: &NesFile) -> Result<Self, EmuError> {
        let prg = Arc::clone(&cart.prg_rom);
        let chr = Chr {
            data: Arc::clone(&cart.chr_rom),
            ram: cart.chr_is_ram,
        };
        match cart.mapper_id {
            0 => Ok(Mapper::Nrom(Nrom { prg, chr })),
            1 => Ok(Mapper::Mmc1(Mmc1::new(prg, chr))),
            2 => Ok(Mapper::Uxrom(Uxrom::new(prg, chr))),
            id => Err(EmuError::UnsupportedMapper(id)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mapper::Nrom(_) => "NROM",
            Mapper::Mmc1(_) => "MMC1",
            Mapper::Uxrom(_) => "UxROM",
            Mapper::Nsf(_) => "NSF",
        }
    }

    /// Whether a CPU write to `addr` is a register write for this mapper.
    pub fn claims(&self, addr: u16) -> bool {
        match self {
            Mapper::Nsf(_) => (NSF_BANK_REGISTERS..=0x5FFF).contains(&addr),
            _ => addr >= PRG_WINDOW_BASE,
        }
    }

    /// Power-up mapping. Running it again restores the same layout.
    pub fn initialize(
        &mut self,
        memory: &mut MemoryMap,
        ppu: Option<&mut Ppu>,
    ) -> Result<(), EmuError> {
        match self {
            Mapper::Nrom(m) => m.initialize(memory, ppu),
            Mapper::Mmc1(m) => m.initialize(memory, ppu),
            Mapper::Uxrom(m) => m.initialize(memory, ppu),
            Mapper::Nsf(m) => m.initialize(memory),
        }
    }

    pub fn write(
        &mut self,
        addr: u16,
        value: u8,
        memory: &mut MemoryMap,
        ppu: Option<&mut Ppu>,
    ) -> Result<(), EmuError> {
        match self {
            Mapper::Nrom(_) => Err(EmuError::UnsupportedBankSwitch {
                mapper: "NROM",
                addr,
                value,
            }),
            Mapper::Mmc1(m) => m.write(addr, value, memory, ppu),
            Mapper::Uxrom(m) => m.write(value, memory),
            Mapper::Nsf(m) => m.write(addr, value, memory),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Nrom {
    prg: Arc<[u8]>,
    chr: Chr,
}

impl Nrom {
    fn initialize(&mut self, memory: &mut MemoryMap, ppu: Option<&mut Ppu>) -> Result<(), EmuError> {
        memory.unmap_range(PRG_WINDOW_BASE, PRG_WINDOW_SPAN);
        // A 16 KB image shows up twice through the 32 KB window.
        let len = self.prg.len().min(PRG_BANK_32K);
        memory.map_rom(PRG_WINDOW_BASE, PRG_WINDOW_SPAN, Arc::clone(&self.prg), 0, len)?;
        self.chr.install(ppu, 0, 0, PATTERN_MEMORY_SIZE);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Mmc1 {
    prg: Arc<[u8]>,
    chr: Chr,

    shift: u8,
    shift_count: u8,
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
    commits: u64,
}

impl Mmc1 {
    const POWER_UP_CONTROL: u8 = 0x0C;

    fn new(prg: Arc<[u8]>, chr: Chr) -> Self {
        Self {
            prg,
            chr,
            shift: 0,
            shift_count: 0,
            control: Self::POWER_UP_CONTROL,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
            commits: 0,
        }
    }

    /// Number of completed five-write register loads.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn prg_bank(&self) -> u8 {
        self.prg_bank
    }

    fn initialize(&mut self, memory: &mut MemoryMap, ppu: Option<&mut Ppu>) -> Result<(), EmuError> {
        self.shift = 0;
        self.shift_count = 0;
        self.control = Self::POWER_UP_CONTROL;
        self.chr_bank0 = 0;
        self.chr_bank1 = 0;
        self.prg_bank = 0;
        self.map_chr(ppu);
        self.map_prg(memory)
    }

    fn write(
        &mut self,
        addr: u16,
        value: u8,
        memory: &mut MemoryMap,
        mut ppu: Option<&mut Ppu>,
    ) -> Result<(), EmuError> {
        if (value & 0x80) != 0 {
            self.shift = 0;
            self.shift_count = 0;
            self.control |= 0x0C;
            return self.map_prg(memory);
        }

        self.shift |= (value & 0x01) << self.shift_count;
        self.shift_count += 1;
        if self.shift_count < 5 {
            return Ok(());
        }

        let data = self.shift;
        self.shift = 0;
        self.shift_count = 0;
        self.commits += 1;
        debug!("MMC1 commit ${addr:04X} <- {data:#04x}");

        match addr {
            0x8000..=0x9FFF => {
                self.control = data;
                if let Some(ppu) = ppu.as_deref_mut() {
                    ppu.set_mirroring(self.mirroring());
                }
                self.map_chr(ppu);
                self.map_prg(memory)
            }
            0xA000..=0xBFFF => {
                self.chr_bank0 = data;
                self.map_chr(ppu);
                Ok(())
            }
            0xC000..=0xDFFF => {
                self.chr_bank1 = data;
                self.map_chr(ppu);
                Ok(())
            }
            _ => {
                self.prg_bank = data & 0x0F;
                self.map_prg(memory)
            }
        }
    }

    fn mirroring(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::OneScreenLower,
            1 => Mirroring::OneScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }

    fn map_prg(&self, memory: &mut MemoryMap) -> Result<(), EmuError> {
        memory.unmap_range(PRG_WINDOW_BASE, PRG_WINDOW_SPAN);
        let bank = self.prg_bank as usize;
        match (self.control >> 2) & 0x03 {
            0 | 1 => map_prg_window(
                memory,
                0x8000,
                &self.prg,
                (bank & !1) * PRG_BANK_16K,
                PRG_BANK_32K,
            ),
            2 => {
                map_prg_window(memory, 0x8000, &self.prg, 0, PRG_BANK_16K)?;
                map_prg_window(memory, 0xC000, &self.prg, bank * PRG_BANK_16K, PRG_BANK_16K)
            }
            _ => {
                let last = self.prg.len().saturating_sub(PRG_BANK_16K);
                map_prg_window(memory, 0x8000, &self.prg, bank * PRG_BANK_16K, PRG_BANK_16K)?;
                map_prg_window(memory, 0xC000, &self.prg, last, PRG_BANK_16K)
            }
        }
    }

    fn map_chr(&self, ppu: Option<&mut Ppu>) {
        if (self.control & 0x10) == 0 {
            let offset = (self.chr_bank0 as usize & 0x1E) * CHR_BANK_4K;
            self.chr.install(ppu, offset, 0, PATTERN_MEMORY_SIZE);
        } else if let Some(ppu) = ppu {
            let low = self.chr_bank0 as usize * CHR_BANK_4K;
            let high = self.chr_bank1 as usize * CHR_BANK_4K;
            self.chr.install(Some(&mut *ppu), low, 0, CHR_BANK_4K);
            self.chr.install(Some(ppu), high, CHR_BANK_4K, CHR_BANK_4K);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Uxrom {
    prg: Arc<[u8]>,
    chr: Chr,
    bank: u8,
}

impl Uxrom {
    fn new(prg: Arc<[u8]>, chr: Chr) -> Self {
        Self { prg, chr, bank: 0 }
    }

    pub fn bank(&self) -> u8 {
        self.bank
    }

    fn initialize(&mut self, memory: &mut MemoryMap, ppu: Option<&mut Ppu>) -> Result<(), EmuError> {
        self.bank = 0;
        memory.unmap_range(PRG_WINDOW_BASE, PRG_WINDOW_SPAN);
        let last = self.prg.len().saturating_sub(PRG_BANK_16K);
        map_prg_window(memory, 0xC000, &self.prg, last, PRG_BANK_16K)?;
        self.chr.install(ppu, 0, 0, PATTERN_MEMORY_SIZE);
        self.map_switchable(memory)
    }

    fn write(&mut self, value: u8, memory: &mut MemoryMap) -> Result<(), EmuError> {
        self.bank = value & 0x0F;
        debug!(bank = self.bank, "UxROM bank select");
        self.map_switchable(memory)
    }

    fn map_switchable(&self, memory: &mut MemoryMap) -> Result<(), EmuError> {
        memory.unmap_range(0x8000, PRG_BANK_16K as u32);
        let offset = self.bank as usize * PRG_BANK_16K;
        map_prg_window(memory, 0x8000, &self.prg, offset, PRG_BANK_16K)
    }
}

/// Bank registers of an NSF image. Until the first register write the
/// image sits flat at its load address; afterwards each 4 KB window of
/// $8000-$FFFF shows `bank * 4096` of the image padded to its load offset.
#[derive(Debug, Clone)]
pub struct NsfBanks {
    direct: Arc<[u8]>,
    padded: Arc<[u8]>,
    registers: [u8; 8],
    banked: bool,
}

impl NsfBanks {
    pub fn new(load_address: u16, data: &[u8]) -> Self {
        let mut direct = vec![0u8; PRG_BANK_32K];
        let start = (load_address.max(PRG_WINDOW_BASE) - PRG_WINDOW_BASE) as usize;
        let len = data.len().min(PRG_BANK_32K - start);
        direct[start..start + len].copy_from_slice(&data[..len]);

        let pad = (load_address as usize) & (NSF_WINDOW - 1);
        let total = (pad + data.len()).div_ceil(NSF_WINDOW).max(1) * NSF_WINDOW;
        let mut padded = vec![0u8; total];
        padded[pad..pad + data.len()].copy_from_slice(data);

        Self {
            direct: Arc::from(direct),
            padded: Arc::from(padded),
            registers: [0; 8],
            banked: false,
        }
    }

    pub fn registers(&self) -> [u8; 8] {
        self.registers
    }

    pub fn is_banked(&self) -> bool {
        self.banked
    }

    pub fn bank_count(&self) -> usize {
        self.padded.len() / NSF_WINDOW
    }

    fn initialize(&mut self, memory: &mut MemoryMap) -> Result<(), EmuError> {
        self.registers = [0; 8];
        self.banked = false;
        memory.unmap_range(PRG_WINDOW_BASE, PRG_WINDOW_SPAN);
        memory.map_rom(
            PRG_WINDOW_BASE,
            PRG_WINDOW_SPAN,
            Arc::clone(&self.direct),
            0,
            PRG_BANK_32K,
        )
    }

    fn write(&mut self, addr: u16, value: u8, memory: &mut MemoryMap) -> Result<(), EmuError> {
        let slot = (addr - NSF_BANK_REGISTERS) as usize & 0x07;
        self.registers[slot] = value;
        if self.banked {
            return self.map_slot(slot, memory);
        }
        debug!("NSF image switched to banked addressing");
        self.banked = true;
        memory.unmap_range(PRG_WINDOW_BASE, PRG_WINDOW_SPAN);
        (0..8).try_for_each(|slot| self.map_slot(slot, memory))
    }

    fn map_slot(&self, slot: usize, memory: &mut MemoryMap) -> Result<(), EmuError> {
        let base = PRG_WINDOW_BASE + (slot * NSF_WINDOW) as u16;
        memory.unmap_range(base, NSF_WINDOW as u32);
        let offset = self.registers[slot] as usize * NSF_WINDOW;
        map_prg_window(memory, base, &self.padded, offset, NSF_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_banks(total_size: usize, bank_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; total_size];
        for (bank, chunk) in data.chunks_mut(bank_size).enumerate() {
            chunk.fill((bank as u8).wrapping_add(1));
        }
        data
    }

    fn make_cart(mapper_id: u16, prg: Vec<u8>, chr: Vec<u8>) -> NesFile {
        NesFile {
            mapper_id,
            submapper_id: 0,
            mirroring: Mirroring::Horizontal,
            has_battery: false,
            is_nes2: false,
            trainer: None,
            prg_rom: Arc::from(prg),
            chr_rom: Arc::from(chr),
            chr_is_ram: false,
            prg_ram_size: 8 * 1024,
            sha1: String::new(),
        }
    }

    fn boot(cart: &NesFile) -> (Mapper, MemoryMap, Ppu) {
        let mut mapper = Mapper::for_cartridge(cart).unwrap();
        let mut memory = MemoryMap::new();
        let mut ppu = Ppu::new(cart.mirroring);
        mapper.initialize(&mut memory, Some(&mut ppu)).unwrap();
        (mapper, memory, ppu)
    }

    /// Loads `value` into an MMC1 register with five serial writes.
    fn mmc1_load(mapper: &mut Mapper, memory: &mut MemoryMap, ppu: &mut Ppu, addr: u16, value: u8) {
        for bit in 0..5 {
            mapper
                .write(addr, (value >> bit) & 0x01, memory, Some(&mut *ppu))
                .unwrap();
        }
    }

    fn mmc1_commits(mapper: &Mapper) -> u64 {
        match mapper {
            Mapper::Mmc1(m) => m.commits(),
            _ => panic!("not an MMC1"),
        }
    }

    #[test]
    fn unknown_mapper_is_rejected() {
        let cart = make_cart(4, patterned_banks(0x8000, 0x4000), vec![0; 0x2000]);
        assert_eq!(
            Mapper::for_cartridge(&cart).unwrap_err(),
            EmuError::UnsupportedMapper(4)
        );
    }

    #[test]
    fn only_loadable_mappers_have_names() {
        assert_eq!(mapper_name(0), "NROM");
        assert_eq!(mapper_name(1), "MMC1");
        assert_eq!(mapper_name(2), "UxROM");
        for id in [3, 4, 7, 24, 66] {
            assert_eq!(mapper_name(id), "Unsupported");
        }
    }

    #[test]
    fn nrom_mirrors_16k_and_refuses_bank_switch() {
        let cart = make_cart(0, patterned_banks(0x4000, 0x4000), patterned_banks(0x2000, 0x1000));
        let (mut mapper, mut memory, mut ppu) = boot(&cart);
        assert_eq!(memory.peek(0x8000), Some(1));
        assert_eq!(memory.peek(0xC000), Some(1));
        assert!(matches!(
            mapper.write(0x8000, 1, &mut memory, Some(&mut ppu)),
            Err(EmuError::UnsupportedBankSwitch { mapper: "NROM", .. })
        ));
    }

    #[test]
    fn mmc1_commits_once_per_five_writes() {
        let cart = make_cart(1, patterned_banks(8 * 0x4000, 0x4000), vec![0; 0x2000]);
        let (mut mapper, mut memory, mut ppu) = boot(&cart);

        for i in 0..4 {
            mapper.write(0xE000, 0, &mut memory, Some(&mut ppu)).unwrap();
            assert_eq!(mmc1_commits(&mapper), 0, "write {i} must not commit");
        }
        mapper.write(0xE000, 0, &mut memory, Some(&mut ppu)).unwrap();
        assert_eq!(mmc1_commits(&mapper), 1);

        for _ in 0..10 {
            mapper.write(0xE000, 0, &mut memory, Some(&mut ppu)).unwrap();
        }
        assert_eq!(mmc1_commits(&mapper), 3);
    }

    #[test]
    fn mmc1_reset_bit_discards_partial_load() {
        let cart = make_cart(1, patterned_banks(8 * 0x4000, 0x4000), vec![0; 0x2000]);
        let (mut mapper, mut memory, mut ppu) = boot(&cart);

        for _ in 0..3 {
            mapper.write(0xE000, 1, &mut memory, Some(&mut ppu)).unwrap();
        }
        mapper.write(0xE000, 0x80, &mut memory, Some(&mut ppu)).unwrap();
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0xE000, 0x02);

        assert_eq!(mmc1_commits(&mapper), 1);
        let Mapper::Mmc1(mmc1) = &mapper else {
            unreachable!()
        };
        assert_eq!(mmc1.prg_bank(), 2);
        assert_eq!(mmc1.control() & 0x0C, 0x0C);
    }

    #[test]
    fn mmc1_prg_modes() {
        let cart = make_cart(1, patterned_banks(8 * 0x4000, 0x4000), vec![0; 0x2000]);
        let (mut mapper, mut memory, mut ppu) = boot(&cart);

        // Power-up: switchable low, last bank fixed high.
        assert_eq!(memory.peek(0x8000), Some(1));
        assert_eq!(memory.peek(0xC000), Some(8));

        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0xE000, 2);
        assert_eq!(memory.peek(0x8000), Some(3));
        assert_eq!(memory.peek(0xFFFF), Some(8));

        // Fixed first bank, switchable high.
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0x8000, 0x08);
        assert_eq!(memory.peek(0x8000), Some(1));
        assert_eq!(memory.peek(0xC000), Some(3));

        // 32 KB mode ignores the low bank bit.
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0xE000, 5);
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0x8000, 0x00);
        assert_eq!(memory.peek(0x8000), Some(5));
        assert_eq!(memory.peek(0xC000), Some(6));
    }

    #[test]
    fn mmc1_control_sets_mirroring() {
        let cart = make_cart(1, patterned_banks(2 * 0x4000, 0x4000), vec![0; 0x2000]);
        let (mut mapper, mut memory, mut ppu) = boot(&cart);
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0x8000, 0x0E);
        assert_eq!(ppu.mirroring(), Mirroring::Vertical);
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0x9FFF, 0x0F);
        assert_eq!(ppu.mirroring(), Mirroring::Horizontal);
    }

    #[test]
    fn mmc1_bank_past_rom_end_is_an_error() {
        let cart = make_cart(1, patterned_banks(2 * 0x4000, 0x4000), vec![0; 0x2000]);
        let (mut mapper, mut memory, mut ppu) = boot(&cart);
        let mut result = Ok(());
        for bit in 0..5 {
            result = mapper.write(0xE000, (7 >> bit) & 1, &mut memory, Some(&mut ppu));
        }
        assert!(matches!(result, Err(EmuError::BankOutOfRange { .. })));
    }

    #[test]
    fn initialize_is_idempotent() {
        let cart = make_cart(1, patterned_banks(4 * 0x4000, 0x4000), patterned_banks(0x4000, 0x1000));
        let (mut mapper, mut memory, mut ppu) = boot(&cart);
        let first = memory.layout();

        let (_, fresh, _) = boot(&cart);
        assert_eq!(fresh.layout(), first);

        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0xE000, 1);
        assert_ne!(memory.layout(), first);
        mapper.initialize(&mut memory, Some(&mut ppu)).unwrap();
        assert_eq!(memory.layout(), first);
    }

    #[test]
    fn repeated_bank_switch_is_idempotent() {
        let cart = make_cart(2, patterned_banks(4 * 0x4000, 0x4000), vec![0; 0x2000]);
        let (mut mapper, mut memory, mut ppu) = boot(&cart);
        mapper.write(0x8000, 2, &mut memory, Some(&mut ppu)).unwrap();
        let once = memory.layout();
        mapper.write(0xFFF0, 2, &mut memory, Some(&mut ppu)).unwrap();
        assert_eq!(memory.layout(), once);
    }

    #[test]
    fn uxrom_keeps_last_bank_fixed() {
        let cart = make_cart(2, patterned_banks(3 * 0x4000, 0x4000), vec![0; 0x2000]);
        let (mut mapper, mut memory, mut ppu) = boot(&cart);
        mapper.write(0x8000, 1, &mut memory, Some(&mut ppu)).unwrap();
        assert_eq!(memory.peek(0x8000), Some(2));
        assert_eq!(memory.peek(0xC000), Some(3));
        assert!(mapper.write(0x8000, 5, &mut memory, None).is_err());
    }

    #[test]
    fn chr_banks_reach_the_ppu() {
        let cart = make_cart(1, patterned_banks(2 * 0x4000, 0x4000), patterned_banks(4 * 0x1000, 0x1000));
        let (mut mapper, mut memory, mut ppu) = boot(&cart);
        // 4 KB CHR mode, bank 3 in the low half.
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0x8000, 0x1C);
        mmc1_load(&mut mapper, &mut memory, &mut ppu, 0xA000, 3);
        ppu.cpu_write_register(0x2006, 0x00);
        ppu.cpu_write_register(0x2006, 0x00);
        ppu.cpu_read_register(0x2007);
        assert_eq!(ppu.cpu_read_register(0x2007), 4);
    }

    #[test]
    fn nsf_switches_from_direct_to_banked() {
        let mut data = patterned_banks(3 * 0x1000, 0x1000);
        data.truncate(0x2F00);
        let mut banks = Mapper::Nsf(NsfBanks::new(0x8100, &data));
        let mut memory = MemoryMap::new();
        banks.initialize(&mut memory, None).unwrap();
        assert_eq!(memory.peek(0x8100), Some(1));
        assert_eq!(memory.peek(0x8000), Some(0));

        assert!(banks.claims(0x5FFA));
        assert!(!banks.claims(0x8000));
        banks.write(0x5FF8, 2, &mut memory, None).unwrap();
        // Bank 2 of the padded image starts 0x100 bytes into data bank 1.
        assert_eq!(memory.peek(0x8000), Some(2));
        assert_eq!(memory.peek(0x80FF), Some(2));
        assert_eq!(memory.peek(0x8100), Some(3));
        assert_eq!(memory.peek(0x9000), Some(0));
    }
}
