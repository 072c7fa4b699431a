pub mod apu;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod instruction;
pub mod mapper;
pub mod memory;
pub mod nsf;
mod palette;
pub mod ppu;
pub mod screen;
pub mod vrc6;

use std::collections::VecDeque;
use tracing::info;

use crate::config::EmulatorConfig;
use crate::session::Machine;
use apu::{Apu, ApuHost, cycles_per_sample};
use cartridge::NesFile;
use controller::{Controller, InputPort};
use cpu::{Bus, Cpu, CpuRegisters};
use error::EmuError;
use mapper::{Mapper, mapper_name};
use memory::MemoryMap;
use ppu::{Mirroring, Ppu, PpuRegisters};
use screen::VirtualScreen;

pub const BUTTON_A: u8 = 0x01;
pub const BUTTON_B: u8 = 0x02;
pub const BUTTON_SELECT: u8 = 0x04;
pub const BUTTON_START: u8 = 0x08;
pub const BUTTON_UP: u8 = 0x10;
pub const BUTTON_DOWN: u8 = 0x20;
pub const BUTTON_LEFT: u8 = 0x40;
pub const BUTTON_RIGHT: u8 = 0x80;

pub(crate) const FLAG_CARRY: u8 = 0x01;
pub(crate) const FLAG_ZERO: u8 = 0x02;
pub(crate) const FLAG_INTERRUPT: u8 = 0x04;
pub(crate) const FLAG_DECIMAL: u8 = 0x08;
pub(crate) const FLAG_BREAK: u8 = 0x10;
pub(crate) const FLAG_UNUSED: u8 = 0x20;
pub(crate) const FLAG_OVERFLOW: u8 = 0x40;
pub(crate) const FLAG_NEGATIVE: u8 = 0x80;

pub const RAM_SIZE: usize = 0x0800;
const RAM_SPAN: u32 = 0x2000;
pub const PRG_RAM_BASE: u16 = 0x6000;
const PRG_RAM_SIZE: usize = 0x2000;
const TRAINER_BASE: u16 = 0x7000;
const OAM_DMA_CYCLES: u32 = 513;
const MAX_DEBUG_EVENTS: usize = 512;

/// Result of one instruction boundary: the cycles it took and what the
/// other units produced while catching up.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub cycles: u32,
    pub nmi: bool,
    pub frame_completed: bool,
    /// Sample blocks completed during this step, oldest first.
    pub audio: Vec<Vec<f32>>,
}

/// Everything the CPU can reach: RAM and cartridge space through the memory
/// map, plus the memory-mapped PPU, APU and controller.
pub struct SystemBus {
    pub memory: MemoryMap,
    pub ppu: Ppu,
    pub apu: Apu,
    pub mapper: Mapper,
    pub controller: Controller,
    video: bool,
    dma_stall: u32,
    dma_page: Option<u8>,
    open_bus: u8,
}

impl SystemBus {
    fn oam_dma(&mut self, page: u8) -> Result<(), EmuError> {
        let base = (page as u16) << 8;
        let mut bytes = [0u8; 256];
        for (idx, slot) in bytes.iter_mut().enumerate() {
            *slot = self.read(base.wrapping_add(idx as u16))?;
        }
        if self.video {
            self.ppu.write_oam_dma(&bytes);
        }
        self.dma_stall += OAM_DMA_CYCLES;
        self.dma_page = Some(page);
        Ok(())
    }
}

impl Bus for SystemBus {
    fn read(&mut self, addr: u16) -> Result<u8, EmuError> {
        let value = match addr {
            0x0000..=0x1FFF => self.memory.read(addr)?,
            0x2000..=0x3FFF if self.video => self.ppu.cpu_read_register(addr),
            0x2000..=0x3FFF => self.open_bus,
            0x4015 => self.apu.read_status(),
            0x4016 => self.controller.read(),
            // Second port has nothing plugged in.
            0x4017 => 0x40,
            0x4000..=0x401F => self.open_bus,
            _ if self.memory.is_mapped(addr) => self.memory.read(addr)?,
            0x4020..=0x5FFF => self.open_bus,
            _ => return Err(EmuError::AccessFault { addr, write: false }),
        };
        self.open_bus = value;
        Ok(value)
    }

    fn write(&mut self, addr: u16, value: u8) -> Result<(), EmuError> {
        self.open_bus = value;
        match addr {
            0x0000..=0x1FFF => self.memory.write(addr, value),
            0x2000..=0x3FFF => {
                if self.video {
                    self.ppu.cpu_write_register(addr, value);
                }
                Ok(())
            }
            0x4014 => self.oam_dma(value),
            0x4016 => {
                self.controller.write_strobe(value);
                Ok(())
            }
            0x4000..=0x4017 => {
                self.apu.write_register(addr, value);
                Ok(())
            }
            0x4018..=0x401F => Ok(()),
            _ if self.mapper.claims(addr) => {
                let ppu = if self.video { Some(&mut self.ppu) } else { None };
                self.mapper.write(addr, value, &mut self.memory, ppu)
            }
            _ if self.apu.write_expansion(addr, value) => Ok(()),
            _ if self.memory.is_mapped(addr) => self.memory.write(addr, value),
            0x4020..=0x5FFF => Ok(()),
            _ => Err(EmuError::AccessFault { addr, write: true }),
        }
    }

    fn is_code(&self, addr: u16) -> bool {
        self.memory.is_mapped(addr)
    }

    fn stack_base(&self) -> u16 {
        self.memory.stack_base()
    }
}

/// The APU's window onto the rest of the console while it runs.
struct CpuSide<'a> {
    memory: &'a MemoryMap,
    cpu: &'a mut Cpu,
}

impl ApuHost for CpuSide<'_> {
    fn dmc_read(&mut self, addr: u16) -> u8 {
        self.memory.peek(addr).unwrap_or(0)
    }

    fn irq_line(&mut self, asserted: bool) {
        self.cpu.set_irq_line(asserted);
    }
}

/// A whole console: CPU plus everything on its bus, stepped one instruction
/// at a time with the PPU and APU caught up after each.
pub struct Nes {
    pub cpu: Cpu,
    pub bus: SystemBus,
    cycles_per_sample: f64,
    apu_carry: u32,
    nmi_count: u64,
    description: String,
    debug_events: VecDeque<String>,
}

impl Nes {
    pub fn from_nes_file(cart: &NesFile, config: &EmulatorConfig) -> Result<Self, EmuError> {
        let mapper = Mapper::for_cartridge(cart)?;
        let mut nes = Self::assemble(mapper, cart.mirroring, true, config)?;

        let id = cart.mapper_id;
        nes.description = if cart.submapper_id != 0 {
            format!(
                "{} (mapper {id}, submapper {})",
                mapper_name(id),
                cart.submapper_id
            )
        } else {
            format!("{} (mapper {id})", mapper_name(id))
        };

        if let Some(trainer) = &cart.trainer {
            for (i, byte) in trainer.iter().enumerate() {
                nes.bus.memory.write(TRAINER_BASE + i as u16, *byte)?;
            }
        }
        nes.reset()?;

        info!(
            mapper = %nes.description,
            prg = cart.prg_rom.len(),
            chr = cart.chr_rom.len(),
            chr_ram = cart.chr_is_ram,
            sha1 = %cart.sha1,
            "cartridge loaded"
        );
        let event = format!("ROM loaded: {}", nes.description);
        nes.push_debug_event(event);
        Ok(nes)
    }

    /// Builds the bus around `mapper` and performs its power-up mapping,
    /// leaving the CPU at its power-up state.
    pub(crate) fn assemble(
        mut mapper: Mapper,
        mirroring: Mirroring,
        video: bool,
        config: &EmulatorConfig,
    ) -> Result<Self, EmuError> {
        let mut memory = MemoryMap::new();
        memory.map_ram(0x0000, RAM_SPAN, RAM_SIZE)?;
        memory.map_ram(PRG_RAM_BASE, PRG_RAM_SIZE as u32, PRG_RAM_SIZE)?;

        let mut ppu = Ppu::new(mirroring);
        ppu.set_debug_overlay(config.debug_overlay);
        mapper.initialize(&mut memory, if video { Some(&mut ppu) } else { None })?;

        Ok(Self {
            cpu: Cpu::new(),
            bus: SystemBus {
                memory,
                ppu,
                apu: Apu::new(config.sample_rate, config.audio_block_size),
                mapper,
                controller: Controller::new(InputPort::new()),
                video,
                dma_stall: 0,
                dma_page: None,
                open_bus: 0,
            },
            cycles_per_sample: cycles_per_sample(config.sample_rate),
            apu_carry: 0,
            nmi_count: 0,
            description: String::new(),
            debug_events: VecDeque::with_capacity(MAX_DEBUG_EVENTS),
        })
    }

    /// Power-up mapping, APU reset and the reset vector.
    pub fn reset(&mut self) -> Result<(), EmuError> {
        let SystemBus {
            memory,
            ppu,
            mapper,
            video,
            ..
        } = &mut self.bus;
        mapper.initialize(memory, if *video { Some(ppu) } else { None })?;
        self.bus.apu.reset();
        self.bus.dma_stall = 0;
        self.apu_carry = 0;
        self.cpu.reset(&mut self.bus)?;
        self.push_debug_event(format!("CPU reset, PC=${:04X}", self.cpu.pc));
        Ok(())
    }

    pub fn input_port(&self) -> InputPort {
        self.bus.controller.port()
    }

    pub fn has_video(&self) -> bool {
        self.bus.video
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn nmi_count(&self) -> u64 {
        self.nmi_count
    }

    pub fn memory(&self) -> &MemoryMap {
        &self.bus.memory
    }

    pub fn peek(&self, addr: u16) -> Option<u8> {
        self.bus.memory.peek(addr)
    }

    /// Runs one instruction (or a pending IRQ), then advances the PPU by
    /// three dots and the APU by half a cycle for every CPU cycle spent.
    pub fn step(&mut self, mut screen: Option<&mut VirtualScreen>) -> Result<StepOutcome, EmuError> {
        self.bus.controller.latch_port();

        let mut cycles = self.cpu.step(&mut self.bus)?;
        if self.bus.dma_stall > 0 {
            let stall = std::mem::take(&mut self.bus.dma_stall) + (self.cpu.cycles & 1) as u32;
            self.cpu.add_cycles(stall);
            cycles += stall;
            if let Some(page) = self.bus.dma_page.take() {
                self.push_debug_event(format!("OAM DMA page=${page:02X} stall_cycles={stall}"));
            }
        }

        let mut outcome = StepOutcome::default();
        if self.bus.video {
            let events = self.bus.ppu.run(cycles, screen.as_deref_mut());
            outcome.frame_completed = events.frame_completed;
            if events.nmi {
                let extra = self.cpu.nmi(&mut self.bus)?;
                self.nmi_count += 1;
                outcome.nmi = true;
                self.push_debug_event(format!("NMI serviced -> PC=${:04X}", self.cpu.pc));
                let late = self.bus.ppu.run(extra, screen);
                outcome.frame_completed |= late.frame_completed;
                cycles += extra;
            }
        }
        outcome.cycles = cycles;

        self.apu_carry += cycles;
        let apu_cycles = self.apu_carry / 2;
        self.apu_carry %= 2;
        let SystemBus { apu, memory, .. } = &mut self.bus;
        let mut host = CpuSide {
            memory,
            cpu: &mut self.cpu,
        };
        outcome.audio = apu.run(apu_cycles, self.cycles_per_sample, &mut host);
        Ok(outcome)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }
        self.debug_events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn push_debug_event<S: Into<String>>(&mut self, event: S) {
        if self.debug_events.len() >= MAX_DEBUG_EVENTS {
            self.debug_events.pop_front();
        }
        self.debug_events.push_back(event.into());
    }
}

impl Machine for Nes {
    fn step(&mut self, screen: Option<&mut VirtualScreen>) -> Result<StepOutcome, EmuError> {
        Nes::step(self, screen)
    }

    fn registers(&self) -> CpuRegisters {
        self.cpu.registers()
    }

    fn ppu_registers(&self) -> Option<PpuRegisters> {
        self.bus.video.then(|| self.bus.ppu.registers())
    }

    fn set_debug_overlay(&mut self, enabled: bool) {
        self.bus.ppu.set_debug_overlay(enabled);
    }

    fn debug_overlay(&self) -> bool {
        self.bus.ppu.debug_overlay()
    }

    fn recent_events(&self, limit: usize) -> Vec<String> {
        Nes::recent_events(self, limit)
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn input_port(&self) -> InputPort {
        Nes::input_port(self)
    }

    fn has_video(&self) -> bool {
        self.bus.video
    }
}
