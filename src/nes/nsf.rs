//! NSF music images: header parsing, the bootstrap that drives the tune's
//! init/play routines, and the video-less machine that runs it.

use anyhow::{Context, Result, bail};
use std::{fs, path::Path, sync::Arc};
use tracing::{info, warn};

use super::apu::CPU_CLOCK_HZ;
use super::controller::InputPort;
use super::cpu::{Bus, CpuRegisters};
use super::error::EmuError;
use super::mapper::{Mapper, NSF_BANK_REGISTERS, NsfBanks};
use super::ppu::{Mirroring, PpuRegisters};
use super::screen::VirtualScreen;
use super::{Nes, StepOutcome};
use crate::config::EmulatorConfig;
use crate::session::Machine;

const HEADER_LEN: usize = 0x80;
const TEXT_FIELD_LEN: usize = 32;
const DEFAULT_PLAY_RATE_HZ: f64 = 60.0988;

/// Where the bootstrap program lives. Nothing else decodes $4100-$41FF.
pub const BOOTSTRAP_BASE: u16 = 0x4100;
const BOOTSTRAP_SPAN: u32 = 0x100;

const EXPANSION_VRC6: u8 = 0x01;

const OP_LDA_IMM: u8 = 0xA9;
const OP_LDX_IMM: u8 = 0xA2;
const OP_STA_ABS: u8 = 0x8D;
const OP_JSR: u8 = 0x20;
const OP_JMP_ABS: u8 = 0x4C;

/// Parsed NSF header plus the tune data that follows it.
#[derive(Debug, Clone)]
pub struct NsfFile {
    pub version: u8,
    pub song_count: u8,
    /// 1-based, as stored in the header.
    pub starting_song: u8,
    pub load_address: u16,
    pub init_address: u16,
    pub play_address: u16,
    pub name: String,
    pub artist: String,
    pub copyright: String,
    /// Play period in microseconds on NTSC.
    pub ntsc_speed: u16,
    pub bank_init: [u8; 8],
    pub pal_speed: u16,
    pub region_flags: u8,
    pub expansion: u8,
    pub data: Arc<[u8]>,
}

impl NsfFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read NSF: {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            bail!("NSF is too small to contain its 0x80-byte header");
        }
        if &bytes[0..5] != b"NESM\x1A" {
            bail!("invalid NSF header magic, expected NESM<EOF>");
        }
        if bytes.len() == HEADER_LEN {
            bail!("NSF truncated: header present but no tune data follows");
        }

        let word = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let song_count = bytes[0x06];
        if song_count == 0 {
            bail!("NSF declares zero songs");
        }
        let load_address = word(0x08);
        if load_address < 0x8000 {
            bail!("NSF load address ${load_address:04X} is below $8000");
        }
        let mut bank_init = [0u8; 8];
        bank_init.copy_from_slice(&bytes[0x70..0x78]);

        Ok(Self {
            version: bytes[0x05],
            song_count,
            starting_song: bytes[0x07].clamp(1, song_count),
            load_address,
            init_address: word(0x0A),
            play_address: word(0x0C),
            name: text_field(&bytes[0x0E..0x0E + TEXT_FIELD_LEN]),
            artist: text_field(&bytes[0x2E..0x2E + TEXT_FIELD_LEN]),
            copyright: text_field(&bytes[0x4E..0x4E + TEXT_FIELD_LEN]),
            ntsc_speed: word(0x6E),
            bank_init,
            pal_speed: word(0x78),
            region_flags: bytes[0x7A],
            expansion: bytes[0x7B],
            data: Arc::from(&bytes[HEADER_LEN..]),
        })
    }

    /// Any nonzero initial bank value means the image expects banked addressing.
    pub fn is_banked(&self) -> bool {
        self.bank_init.iter().any(|&bank| bank != 0)
    }

    pub fn is_pal(&self) -> bool {
        (self.region_flags & 0x03) == 0x01
    }

    pub fn uses_vrc6(&self) -> bool {
        (self.expansion & EXPANSION_VRC6) != 0
    }

    /// Calls to `play` per second on NTSC.
    pub fn play_rate_hz(&self) -> f64 {
        if self.ntsc_speed == 0 {
            DEFAULT_PLAY_RATE_HZ
        } else {
            1_000_000.0 / self.ntsc_speed as f64
        }
    }
}

fn text_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

/// The synthesized driver program and the two addresses the player watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub code: Vec<u8>,
    /// The resident `JSR play`. Reaching it means `init` has returned.
    pub play_call: u16,
    /// `JMP` to itself; the CPU idles here between play calls.
    pub spin: u16,
}

/// `track` is 0-based.
pub fn synthesize_bootstrap(nsf: &NsfFile, track: u8) -> Bootstrap {
    let mut code = Vec::with_capacity(64);
    if nsf.is_banked() {
        for (slot, bank) in nsf.bank_init.iter().enumerate() {
            let [lo, hi] = (NSF_BANK_REGISTERS + slot as u16).to_le_bytes();
            code.extend_from_slice(&[OP_LDA_IMM, *bank, OP_STA_ABS, lo, hi]);
        }
    }

    let [init_lo, init_hi] = nsf.init_address.to_le_bytes();
    let region = u8::from(nsf.is_pal());
    code.extend_from_slice(&[OP_LDA_IMM, track, OP_LDX_IMM, region, OP_JSR, init_lo, init_hi]);

    let play_call = BOOTSTRAP_BASE + code.len() as u16;
    let [play_lo, play_hi] = nsf.play_address.to_le_bytes();
    code.extend_from_slice(&[OP_JSR, play_lo, play_hi]);

    let spin = BOOTSTRAP_BASE + code.len() as u16;
    let [spin_lo, spin_hi] = spin.to_le_bytes();
    code.extend_from_slice(&[OP_JMP_ABS, spin_lo, spin_hi]);

    Bootstrap {
        code,
        play_call,
        spin,
    }
}

/// Runs one track of an NSF: no PPU, the play routine re-entered on a
/// cycle-counted timer instead of vblank.
pub struct NsfPlayer {
    nes: Nes,
    track: u8,
    bootstrap: Bootstrap,
    init_returned: bool,
    play_period: f64,
    until_play: f64,
    play_due: bool,
    plays: u64,
}

impl NsfPlayer {
    /// `track` is 0-based and is clamped to the song count.
    pub fn new(nsf: &NsfFile, track: u8, config: &EmulatorConfig) -> Result<Self, EmuError> {
        let track = track.min(nsf.song_count.saturating_sub(1));
        let mapper = Mapper::Nsf(NsfBanks::new(nsf.load_address, &nsf.data));
        let mut nes = Nes::assemble(mapper, Mirroring::Horizontal, false, config)?;

        if nsf.uses_vrc6() {
            nes.bus.apu.enable_vrc6();
        }
        let unsupported = nsf.expansion & !EXPANSION_VRC6;
        if unsupported != 0 {
            warn!(
                flags = unsupported,
                "NSF requests expansion audio that is not emulated"
            );
        }

        let bootstrap = synthesize_bootstrap(nsf, track);
        let image: Arc<[u8]> = Arc::from(bootstrap.code.as_slice());
        nes.bus
            .memory
            .map_rom(BOOTSTRAP_BASE, BOOTSTRAP_SPAN, image, 0, bootstrap.code.len())?;

        // Silence the APU the way a freshly powered console would be.
        for addr in 0x4000..=0x4013 {
            nes.bus.write(addr, 0x00)?;
        }
        nes.bus.write(0x4015, 0x0F)?;
        nes.bus.write(0x4017, 0x40)?;
        nes.cpu.pc = BOOTSTRAP_BASE;

        let description = if nsf.name.is_empty() {
            format!("NSF track {}/{}", track + 1, nsf.song_count)
        } else {
            format!("{} - track {}/{}", nsf.name, track + 1, nsf.song_count)
        };
        nes.description = description;
        nes.push_debug_event(format!(
            "NSF bootstrap at ${BOOTSTRAP_BASE:04X}, play call ${:04X}",
            bootstrap.play_call
        ));
        info!(
            name = %nsf.name,
            artist = %nsf.artist,
            track = track + 1,
            songs = nsf.song_count,
            banked = nsf.is_banked(),
            rate_hz = nsf.play_rate_hz(),
            "NSF loaded"
        );

        let play_period = CPU_CLOCK_HZ / nsf.play_rate_hz();
        Ok(Self {
            nes,
            track,
            bootstrap,
            init_returned: false,
            play_period,
            until_play: play_period,
            play_due: false,
            plays: 0,
        })
    }

    pub fn track(&self) -> u8 {
        self.track
    }

    pub fn bootstrap(&self) -> &Bootstrap {
        &self.bootstrap
    }

    pub fn init_returned(&self) -> bool {
        self.init_returned
    }

    /// Timer-driven play calls so far, not counting the one right after init.
    pub fn plays(&self) -> u64 {
        self.plays
    }

    pub fn console(&self) -> &Nes {
        &self.nes
    }

    fn advance_timer(&mut self, cycles: u32) {
        if !self.init_returned {
            if self.nes.cpu.pc == self.bootstrap.play_call {
                self.init_returned = true;
                self.until_play = self.play_period;
            }
            return;
        }

        self.until_play -= cycles as f64;
        if self.until_play <= 0.0 {
            self.until_play += self.play_period;
            self.play_due = true;
        }
        // A play routine that overruns its slot finishes before the next call.
        if self.play_due && self.nes.cpu.pc == self.bootstrap.spin {
            self.play_due = false;
            self.plays += 1;
            self.nes.cpu.pc = self.bootstrap.play_call;
        }
    }
}

impl Machine for NsfPlayer {
    fn step(&mut self, _screen: Option<&mut VirtualScreen>) -> Result<StepOutcome, EmuError> {
        let outcome = self.nes.step(None)?;
        self.advance_timer(outcome.cycles);
        Ok(outcome)
    }

    fn registers(&self) -> CpuRegisters {
        self.nes.cpu.registers()
    }

    fn ppu_registers(&self) -> Option<PpuRegisters> {
        None
    }

    fn set_debug_overlay(&mut self, _enabled: bool) {}

    fn debug_overlay(&self) -> bool {
        false
    }

    fn recent_events(&self, limit: usize) -> Vec<String> {
        self.nes.recent_events(limit)
    }

    fn description(&self) -> String {
        self.nes.description().to_string()
    }

    fn input_port(&self) -> InputPort {
        self.nes.input_port()
    }

    fn has_video(&self) -> bool {
        false
    }
}
