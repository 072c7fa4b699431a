use serde::Serialize;

use super::palette;
use super::screen::{SCREEN_HEIGHT, SCREEN_WIDTH, VirtualScreen};

pub const DOTS_PER_CPU_CYCLE: u32 = 3;
pub const DOTS_PER_SCANLINE: i16 = 341;
pub const VBLANK_SCANLINE: i16 = 241;
pub const PRE_RENDER_SCANLINE: i16 = 261;

/// Size of the PPU-side pattern memory: two 4 KB pattern tables.
pub const PATTERN_MEMORY_SIZE: usize = 0x2000;

const CTRL_NMI_ENABLE: u8 = 0x80;
const CTRL_VRAM_INC_32: u8 = 0x04;
const CTRL_SPRITE_TABLE: u8 = 0x08;
const CTRL_BG_TABLE: u8 = 0x10;
const CTRL_SPRITE_SIZE_16: u8 = 0x20;

const MASK_SHOW_BG_LEFT: u8 = 0x02;
const MASK_SHOW_SPRITE_LEFT: u8 = 0x04;
const MASK_SHOW_BG: u8 = 0x08;
const MASK_SHOW_SPRITES: u8 = 0x10;

const STATUS_SPRITE_OVERFLOW: u8 = 0x20;
const STATUS_SPRITE_ZERO_HIT: u8 = 0x40;
const STATUS_VBLANK: u8 = 0x80;

const OVERLAY_COLOR: u32 = 0xFF00_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    OneScreenLower,
    OneScreenUpper,
    FourScreen,
}

/// What happened during one [`Ppu::run`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuEvents {
    pub nmi: bool,
    pub frame_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PpuRegisters {
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub scanline: i16,
    pub dot: i16,
    pub frame: u64,
}

pub struct Ppu {
    ctrl: u8,
    mask: u8,
    status: u8,

    oam_addr: u8,
    oam: [u8; 256],

    patterns: Box<[u8; PATTERN_MEMORY_SIZE]>,
    patterns_writable: bool,
    vram: [u8; 4096],
    palette_ram: [u8; 32],
    mirroring: Mirroring,

    write_toggle: bool,
    v: u16,
    t: u16,
    fine_x: u8,
    read_buffer: u8,
    open_bus: u8,

    scanline: i16,
    dot: i16,
    odd_frame: bool,
    frame: u64,
    nmi_line: bool,
    nmi_pending: bool,
    frame_completed: bool,
    debug_overlay: bool,

    next_tile_id: u8,
    next_tile_attr: u8,
    next_tile_lsb: u8,
    next_tile_msb: u8,
    bg_shift_pattern_lo: u16,
    bg_shift_pattern_hi: u16,
    bg_shift_attr_lo: u16,
    bg_shift_attr_hi: u16,

    sprite_count: usize,
    sprite_patterns_lo: [u8; 8],
    sprite_patterns_hi: [u8; 8],
    sprite_x: [u8; 8],
    sprite_attributes: [u8; 8],
    sprite_is_zero: [bool; 8],
}

impl Ppu {
    pub fn new(mirroring: Mirroring) -> Self {
        Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            oam: [0; 256],
            patterns: Box::new([0; PATTERN_MEMORY_SIZE]),
            patterns_writable: false,
            vram: [0; 4096],
            palette_ram: [0x0F; 32],
            mirroring,
            write_toggle: false,
            v: 0,
            t: 0,
            fine_x: 0,
            read_buffer: 0,
            open_bus: 0,
            scanline: PRE_RENDER_SCANLINE,
            dot: 0,
            odd_frame: false,
            frame: 0,
            nmi_line: false,
            nmi_pending: false,
            frame_completed: false,
            debug_overlay: false,
            next_tile_id: 0,
            next_tile_attr: 0,
            next_tile_lsb: 0,
            next_tile_msb: 0,
            bg_shift_pattern_lo: 0,
            bg_shift_pattern_hi: 0,
            bg_shift_attr_lo: 0,
            bg_shift_attr_hi: 0,
            sprite_count: 0,
            sprite_patterns_lo: [0; 8],
            sprite_patterns_hi: [0; 8],
            sprite_x: [0; 8],
            sprite_attributes: [0; 8],
            sprite_is_zero: [false; 8],
        }
    }

    /// Installs pattern-table bytes at `offset` (0..0x2000). Bytes past the
    /// end of pattern memory are ignored.
    pub fn copy_character_rom(&mut self, offset: usize, bytes: &[u8]) {
        if offset >= PATTERN_MEMORY_SIZE {
            return;
        }
        let len = bytes.len().min(PATTERN_MEMORY_SIZE - offset);
        self.patterns[offset..offset + len].copy_from_slice(&bytes[..len]);
    }

    /// CHR-RAM cartridges let the CPU write pattern data through $2007.
    pub fn set_pattern_writable(&mut self, writable: bool) {
        self.patterns_writable = writable;
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.mirroring = mirroring;
    }

    pub fn set_debug_overlay(&mut self, enabled: bool) {
        self.debug_overlay = enabled;
    }

    pub fn debug_overlay(&self) -> bool {
        self.debug_overlay
    }

    pub fn registers(&self) -> PpuRegisters {
        PpuRegisters {
            ctrl: self.ctrl,
            mask: self.mask,
            status: self.status,
            scanline: self.scanline,
            dot: self.dot,
            frame: self.frame,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Advances `3 * cpu_cycles` dots, drawing into `screen` when one is
    /// handed over.
    pub fn run(&mut self, cpu_cycles: u32, mut screen: Option<&mut VirtualScreen>) -> PpuEvents {
        self.frame_completed = false;
        for _ in 0..cpu_cycles * DOTS_PER_CPU_CYCLE {
            self.tick(screen.as_deref_mut());
        }
        if self.frame_completed {
            if let Some(screen) = screen {
                if self.debug_overlay {
                    self.draw_sprite_overlay(screen);
                }
                screen.set_frame_number(self.frame);
            }
        }
        // Edges raised by register writes between runs are reported here too.
        PpuEvents {
            nmi: std::mem::take(&mut self.nmi_pending),
            frame_completed: self.frame_completed,
        }
    }

    pub fn cpu_read_register(&mut self, addr: u16) -> u8 {
        let value = match 0x2000 | (addr & 0x0007) {
            0x2002 => {
                let value = (self.status & 0xE0) | (self.open_bus & 0x1F);
                self.status &= !STATUS_VBLANK;
                self.write_toggle = false;
                self.update_nmi_line();
                value
            }
            0x2004 => self.oam[self.oam_addr as usize],
            0x2007 => {
                let ppu_addr = self.v & 0x3FFF;
                let value = self.ppu_read(ppu_addr);
                let result = if ppu_addr >= 0x3F00 {
                    // Palette reads bypass the buffer, which picks up the
                    // nametable byte underneath instead.
                    self.read_buffer = self.ppu_read((ppu_addr - 0x1000) & 0x3FFF);
                    value
                } else {
                    let buffered = self.read_buffer;
                    self.read_buffer = value;
                    buffered
                };
                self.increment_vram_addr();
                result
            }
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    pub fn cpu_write_register(&mut self, addr: u16, value: u8) {
        self.open_bus = value;
        match 0x2000 | (addr & 0x0007) {
            0x2000 => {
                self.ctrl = value;
                self.t = (self.t & !0x0C00) | (((value as u16) & 0x03) << 10);
                self.update_nmi_line();
            }
            0x2001 => self.mask = value,
            0x2003 => self.oam_addr = value,
            0x2004 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            0x2005 => {
                if !self.write_toggle {
                    self.fine_x = value & 0x07;
                    self.t = (self.t & !0x001F) | ((value as u16) >> 3);
                } else {
                    self.t = (self.t & !0x03E0) | (((value as u16) >> 3) << 5);
                    self.t = (self.t & !0x7000) | (((value as u16) & 0x07) << 12);
                }
                self.write_toggle = !self.write_toggle;
            }
            0x2006 => {
                if !self.write_toggle {
                    self.t = (self.t & 0x00FF) | (((value as u16) & 0x3F) << 8);
                } else {
                    self.t = (self.t & 0x7F00) | value as u16;
                    self.v = self.t;
                }
                self.write_toggle = !self.write_toggle;
            }
            0x2007 => {
                self.ppu_write(self.v & 0x3FFF, value);
                self.increment_vram_addr();
            }
            _ => {}
        }
    }

    pub fn write_oam_dma(&mut self, bytes: &[u8; 256]) {
        for byte in bytes {
            self.oam[self.oam_addr as usize] = *byte;
            self.oam_addr = self.oam_addr.wrapping_add(1);
        }
    }

    fn tick(&mut self, screen: Option<&mut VirtualScreen>) {
        let visible_line = (0..SCREEN_HEIGHT as i16).contains(&self.scanline);
        let pre_render = self.scanline == PRE_RENDER_SCANLINE;
        let rendering_enabled = self.rendering_enabled();

        if pre_render && self.dot == 1 {
            self.status &= !(STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT | STATUS_SPRITE_OVERFLOW);
            self.update_nmi_line();
        }

        if self.scanline == VBLANK_SCANLINE && self.dot == 1 {
            self.status |= STATUS_VBLANK;
            self.frame = self.frame.wrapping_add(1);
            self.frame_completed = true;
            self.update_nmi_line();
        }

        if visible_line && self.dot == 0 {
            self.evaluate_sprites(self.scanline);
        }

        if visible_line && (1..=256).contains(&self.dot) {
            let color = self.render_pixel((self.dot - 1) as usize);
            if let Some(screen) = screen {
                screen.set_pixel((self.dot - 1) as usize, self.scanline as usize, color);
            }
        }

        if (visible_line || pre_render) && rendering_enabled {
            self.fetch_background();
            if visible_line && (1..=256).contains(&self.dot) {
                self.shift_sprite_registers();
            }
            if self.dot == 256 {
                self.increment_y();
            }
            if self.dot == 257 {
                self.load_background_shifters();
                self.copy_horizontal_bits();
            }
            if pre_render && (280..=304).contains(&self.dot) {
                self.copy_vertical_bits();
            }
        }

        // Odd frames skip the last pre-render dot while rendering is on.
        if pre_render && rendering_enabled && self.odd_frame && self.dot == 339 {
            self.dot = 0;
            self.scanline = 0;
            self.odd_frame = false;
            return;
        }

        self.dot += 1;
        if self.dot >= DOTS_PER_SCANLINE {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline > PRE_RENDER_SCANLINE {
                self.scanline = 0;
                self.odd_frame = !self.odd_frame;
            }
        }
    }

    fn fetch_background(&mut self) {
        if !((1..=256).contains(&self.dot) || (321..=336).contains(&self.dot)) {
            return;
        }
        self.shift_background_registers();

        let bg_table: u16 = if (self.ctrl & CTRL_BG_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        };
        let fine_y = (self.v >> 12) & 0x07;
        match (self.dot - 1) & 0x07 {
            0 => {
                self.load_background_shifters();
                self.next_tile_id = self.ppu_read(0x2000 | (self.v & 0x0FFF));
            }
            2 => {
                let addr = 0x23C0
                    | (self.v & 0x0C00)
                    | ((self.v >> 4) & 0x0038)
                    | ((self.v >> 2) & 0x0007);
                let attr = self.ppu_read(addr);
                let shift = ((self.v >> 4) & 0x04) | (self.v & 0x02);
                self.next_tile_attr = (attr >> shift) & 0x03;
            }
            4 => {
                let addr = bg_table + (self.next_tile_id as u16) * 16 + fine_y;
                self.next_tile_lsb = self.ppu_read(addr);
            }
            6 => {
                let addr = bg_table + (self.next_tile_id as u16) * 16 + fine_y + 8;
                self.next_tile_msb = self.ppu_read(addr);
            }
            7 => self.increment_coarse_x(),
            _ => {}
        }
    }

    fn rendering_enabled(&self) -> bool {
        (self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES)) != 0
    }

    fn update_nmi_line(&mut self) {
        let line = (self.ctrl & CTRL_NMI_ENABLE) != 0 && (self.status & STATUS_VBLANK) != 0;
        if line && !self.nmi_line {
            self.nmi_pending = true;
        }
        self.nmi_line = line;
    }

    fn render_pixel(&mut self, x: usize) -> u32 {
        let (bg_pixel, bg_palette) = self.background_sample(x);
        let (spr_pixel, spr_palette, spr_behind_bg, spr_zero) = self.sprite_sample(x);
        let bg_opaque = bg_pixel != 0;

        if spr_zero && bg_opaque && x < 255 {
            self.status |= STATUS_SPRITE_ZERO_HIT;
        }

        let index = match (bg_opaque, spr_pixel != 0) {
            (true, true) if !spr_behind_bg => 0x10 | (spr_palette << 2) | spr_pixel,
            (true, _) => (bg_palette << 2) | bg_pixel,
            (false, true) => 0x10 | (spr_palette << 2) | spr_pixel,
            (false, false) => 0,
        };
        let color = self.palette_ram[palette_index(0x3F00 | index as u16)];
        palette::rgba(color)
    }

    fn background_sample(&self, x: usize) -> (u8, u8) {
        if (self.mask & MASK_SHOW_BG) == 0 || (x < 8 && (self.mask & MASK_SHOW_BG_LEFT) == 0) {
            return (0, 0);
        }
        let bit = 0x8000u16 >> self.fine_x;
        let p0 = u8::from((self.bg_shift_pattern_lo & bit) != 0);
        let p1 = u8::from((self.bg_shift_pattern_hi & bit) != 0);
        let a0 = u8::from((self.bg_shift_attr_lo & bit) != 0);
        let a1 = u8::from((self.bg_shift_attr_hi & bit) != 0);
        ((p1 << 1) | p0, (a1 << 1) | a0)
    }

    /// First opaque sprite pixel at `x`: (pixel, palette, behind background, is sprite 0).
    fn sprite_sample(&self, x: usize) -> (u8, u8, bool, bool) {
        if (self.mask & MASK_SHOW_SPRITES) == 0
            || (x < 8 && (self.mask & MASK_SHOW_SPRITE_LEFT) == 0)
        {
            return (0, 0, false, false);
        }
        for i in 0..self.sprite_count {
            if self.sprite_x[i] != 0 {
                continue;
            }
            let p0 = (self.sprite_patterns_lo[i] & 0x80) >> 7;
            let p1 = (self.sprite_patterns_hi[i] & 0x80) >> 6;
            let pixel = p0 | p1;
            if pixel == 0 {
                continue;
            }
            let attributes = self.sprite_attributes[i];
            return (
                pixel,
                attributes & 0x03,
                (attributes & 0x20) != 0,
                self.sprite_is_zero[i],
            );
        }
        (0, 0, false, false)
    }

    fn shift_background_registers(&mut self) {
        self.bg_shift_pattern_lo <<= 1;
        self.bg_shift_pattern_hi <<= 1;
        self.bg_shift_attr_lo <<= 1;
        self.bg_shift_attr_hi <<= 1;
    }

    fn shift_sprite_registers(&mut self) {
        for i in 0..self.sprite_count {
            if self.sprite_x[i] > 0 {
                self.sprite_x[i] -= 1;
            } else {
                self.sprite_patterns_lo[i] <<= 1;
                self.sprite_patterns_hi[i] <<= 1;
            }
        }
    }

    fn load_background_shifters(&mut self) {
        self.bg_shift_pattern_lo = (self.bg_shift_pattern_lo & 0xFF00) | self.next_tile_lsb as u16;
        self.bg_shift_pattern_hi = (self.bg_shift_pattern_hi & 0xFF00) | self.next_tile_msb as u16;
        let fill = |bit: u8| if (self.next_tile_attr & bit) != 0 { 0xFF } else { 0x00 };
        let (attr_lo, attr_hi) = (fill(0x01), fill(0x02));
        self.bg_shift_attr_lo = (self.bg_shift_attr_lo & 0xFF00) | attr_lo;
        self.bg_shift_attr_hi = (self.bg_shift_attr_hi & 0xFF00) | attr_hi;
    }

    fn increment_coarse_x(&mut self) {
        if (self.v & 0x001F) == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v = self.v.wrapping_add(1);
        }
    }

    fn increment_y(&mut self) {
        if (self.v & 0x7000) != 0x7000 {
            self.v = self.v.wrapping_add(0x1000);
            return;
        }
        self.v &= !0x7000;
        let mut coarse_y = (self.v & 0x03E0) >> 5;
        match coarse_y {
            29 => {
                coarse_y = 0;
                self.v ^= 0x0800;
            }
            31 => coarse_y = 0,
            _ => coarse_y += 1,
        }
        self.v = (self.v & !0x03E0) | (coarse_y << 5);
    }

    fn copy_horizontal_bits(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    fn copy_vertical_bits(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }

    fn sprite_height(&self) -> i16 {
        if (self.ctrl & CTRL_SPRITE_SIZE_16) != 0 {
            16
        } else {
            8
        }
    }

    /// Loads up to eight sprites for `scanline`; a ninth sets the overflow flag.
    fn evaluate_sprites(&mut self, scanline: i16) {
        self.sprite_count = 0;
        let height = self.sprite_height();

        for i in 0..64 {
            let base = i * 4;
            let row = scanline - (self.oam[base] as i16 + 1);
            if !(0..height).contains(&row) {
                continue;
            }
            if self.sprite_count == 8 {
                if self.rendering_enabled() {
                    self.status |= STATUS_SPRITE_OVERFLOW;
                }
                break;
            }

            let tile_index = self.oam[base + 1];
            let attributes = self.oam[base + 2];
            let mut sprite_row = row as u16;
            if (attributes & 0x80) != 0 {
                sprite_row = (height as u16 - 1) - sprite_row;
            }

            let (table, tile) = if height == 16 {
                (
                    ((tile_index & 0x01) as u16) * 0x1000,
                    ((tile_index & 0xFE) as u16) + sprite_row / 8,
                )
            } else if (self.ctrl & CTRL_SPRITE_TABLE) != 0 {
                (0x1000, tile_index as u16)
            } else {
                (0x0000, tile_index as u16)
            };
            let addr = table + tile * 16 + (sprite_row & 0x07);
            let mut low = self.ppu_read(addr);
            let mut high = self.ppu_read(addr + 8);
            if (attributes & 0x40) != 0 {
                low = low.reverse_bits();
                high = high.reverse_bits();
            }

            let slot = self.sprite_count;
            self.sprite_patterns_lo[slot] = low;
            self.sprite_patterns_hi[slot] = high;
            self.sprite_x[slot] = self.oam[base + 3];
            self.sprite_attributes[slot] = attributes;
            self.sprite_is_zero[slot] = i == 0;
            self.sprite_count += 1;
        }
    }

    fn draw_sprite_overlay(&self, screen: &mut VirtualScreen) {
        let height = self.sprite_height() as usize;
        for sprite in self.oam.chunks_exact(4) {
            let top = sprite[0] as usize + 1;
            let left = sprite[3] as usize;
            if top >= SCREEN_HEIGHT {
                continue;
            }
            for dx in 0..8 {
                screen.set_pixel(left + dx, top, OVERLAY_COLOR);
                screen.set_pixel(left + dx, top + height - 1, OVERLAY_COLOR);
            }
            for dy in 0..height {
                screen.set_pixel(left, top + dy, OVERLAY_COLOR);
                screen.set_pixel((left + 7).min(SCREEN_WIDTH - 1), top + dy, OVERLAY_COLOR);
            }
        }
    }

    fn increment_vram_addr(&mut self) {
        let step = if (self.ctrl & CTRL_VRAM_INC_32) != 0 {
            32
        } else {
            1
        };
        self.v = self.v.wrapping_add(step);
    }

    fn ppu_read(&self, addr: u16) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => self.patterns[addr as usize],
            0x2000..=0x3EFF => self.vram[self.mirrored_vram_index(addr)],
            _ => self.palette_ram[palette_index(addr)],
        }
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                if self.patterns_writable {
                    self.patterns[addr as usize] = value;
                }
            }
            0x2000..=0x3EFF => {
                let index = self.mirrored_vram_index(addr);
                self.vram[index] = value;
            }
            _ => self.palette_ram[palette_index(addr)] = value,
        }
    }

    fn mirrored_vram_index(&self, addr: u16) -> usize {
        let index = ((addr - 0x2000) % 0x1000) as usize;
        let table = index / 0x400;
        let offset = index % 0x400;
        let mapped_table = match self.mirroring {
            Mirroring::Horizontal => table / 2,
            Mirroring::Vertical => table & 1,
            Mirroring::OneScreenLower => 0,
            Mirroring::OneScreenUpper => 1,
            Mirroring::FourScreen => table,
        };
        mapped_table * 0x400 + offset
    }
}

/// $3F10/$3F14/$3F18/$3F1C alias the background entries below them.
fn palette_index(addr: u16) -> usize {
    let mut index = (addr as usize) & 0x1F;
    if index >= 16 && (index & 0x03) == 0 {
        index -= 16;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_CYCLES_PER_FRAME: u32 = 29_781;

    fn run_until<F: FnMut(&PpuEvents) -> bool>(ppu: &mut Ppu, mut stop: F) -> u32 {
        let mut cycles = 0;
        for _ in 0..CPU_CYCLES_PER_FRAME * 3 {
            cycles += 1;
            if stop(&ppu.run(1, None)) {
                return cycles;
            }
        }
        panic!("condition never reached");
    }

    #[test]
    fn vblank_raises_nmi_once_per_frame() {
        let mut ppu = Ppu::new(Mirroring::Horizontal);
        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE);
        run_until(&mut ppu, |e| e.nmi);
        let regs = ppu.registers();
        assert_eq!(regs.scanline, VBLANK_SCANLINE);
        assert_ne!(regs.status & STATUS_VBLANK, 0);

        // Rendering disabled: a full frame is exactly 341 * 262 dots.
        let cycles = run_until(&mut ppu, |e| e.nmi);
        assert!((29_780..=29_781).contains(&cycles), "{cycles}");
    }

    #[test]
    fn frame_completes_without_nmi_enabled() {
        let mut ppu = Ppu::new(Mirroring::Horizontal);
        let mut nmi_seen = false;
        run_until(&mut ppu, |e| {
            nmi_seen |= e.nmi;
            e.frame_completed
        });
        assert!(!nmi_seen);
        assert_eq!(ppu.frame_count(), 1);
    }

    #[test]
    fn status_read_clears_vblank_and_toggle() {
        let mut ppu = Ppu::new(Mirroring::Horizontal);
        run_until(&mut ppu, |e| e.frame_completed);
        let status = ppu.cpu_read_register(0x2002);
        assert_ne!(status & STATUS_VBLANK, 0);
        assert_eq!(ppu.cpu_read_register(0x2002) & STATUS_VBLANK, 0);
    }

    #[test]
    fn vblank_clears_on_pre_render_line() {
        let mut ppu = Ppu::new(Mirroring::Horizontal);
        run_until(&mut ppu, |e| e.frame_completed);
        while ppu.registers().scanline != PRE_RENDER_SCANLINE || ppu.registers().dot < 2 {
            ppu.run(1, None);
        }
        assert_eq!(ppu.registers().status & STATUS_VBLANK, 0);
    }

    #[test]
    fn vram_data_port_uses_read_buffer() {
        let mut ppu = Ppu::new(Mirroring::Vertical);
        ppu.cpu_write_register(0x2006, 0x20);
        ppu.cpu_write_register(0x2006, 0x05);
        ppu.cpu_write_register(0x2007, 0xAB);
        // Vertical mirroring: $2805 aliases $2005.
        ppu.cpu_write_register(0x2006, 0x28);
        ppu.cpu_write_register(0x2006, 0x05);
        assert_eq!(ppu.cpu_read_register(0x2007), 0x00);
        assert_eq!(ppu.cpu_read_register(0x2007), 0xAB);
    }

    #[test]
    fn horizontal_mirroring_pairs_tables() {
        let mut ppu = Ppu::new(Mirroring::Horizontal);
        assert_eq!(ppu.mirrored_vram_index(0x2400), ppu.mirrored_vram_index(0x2000));
        assert_ne!(ppu.mirrored_vram_index(0x2800), ppu.mirrored_vram_index(0x2000));
        ppu.set_mirroring(Mirroring::Vertical);
        assert_eq!(ppu.mirrored_vram_index(0x2800), ppu.mirrored_vram_index(0x2000));
    }

    #[test]
    fn palette_mirrors_sprite_backdrop() {
        assert_eq!(palette_index(0x3F10), 0);
        assert_eq!(palette_index(0x3F14), 4);
        assert_eq!(palette_index(0x3F11), 0x11);
        assert_eq!(palette_index(0x3F30), 0);
    }

    #[test]
    fn chr_rom_is_read_only_unless_writable() {
        let mut ppu = Ppu::new(Mirroring::Horizontal);
        ppu.copy_character_rom(0x0010, &[0x55]);
        ppu.cpu_write_register(0x2006, 0x00);
        ppu.cpu_write_register(0x2006, 0x10);
        ppu.cpu_write_register(0x2007, 0xAA);
        assert_eq!(ppu.ppu_read(0x0010), 0x55);
        ppu.set_pattern_writable(true);
        ppu.cpu_write_register(0x2006, 0x00);
        ppu.cpu_write_register(0x2006, 0x10);
        ppu.cpu_write_register(0x2007, 0xAA);
        assert_eq!(ppu.ppu_read(0x0010), 0xAA);
    }

    #[test]
    fn renders_backdrop_into_handed_buffer() {
        let mut ppu = Ppu::new(Mirroring::Horizontal);
        // Backdrop colour $21.
        ppu.cpu_write_register(0x2006, 0x3F);
        ppu.cpu_write_register(0x2006, 0x00);
        ppu.cpu_write_register(0x2007, 0x21);
        ppu.cpu_write_register(0x2001, MASK_SHOW_BG | MASK_SHOW_BG_LEFT);
        let mut screen = VirtualScreen::new();
        loop {
            if ppu.run(1, Some(&mut screen)).frame_completed {
                break;
            }
        }
        assert_eq!(screen.pixel(100, 100), palette::rgba(0x21));
        assert_eq!(screen.frame_number(), 1);
    }
}
