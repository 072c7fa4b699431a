use serde::Serialize;

use super::error::EmuError;
use super::instruction::{AddrMode, Instruction, Mnemonic, lookup};
use super::memory::STACK_BASE;
use super::{
    FLAG_BREAK, FLAG_CARRY, FLAG_DECIMAL, FLAG_INTERRUPT, FLAG_NEGATIVE, FLAG_OVERFLOW,
    FLAG_UNUSED, FLAG_ZERO,
};

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Power-up status byte: interrupt-disable plus both "B" bits.
pub const POWER_UP_STATUS: u8 = 0x34;
pub const POWER_UP_SP: u8 = 0xFD;

const INTERRUPT_CYCLES: u32 = 7;

/// The CPU's view of the address space.
pub trait Bus {
    fn read(&mut self, addr: u16) -> Result<u8, EmuError>;
    fn write(&mut self, addr: u16, value: u8) -> Result<(), EmuError>;
    /// Whether an instruction may be fetched from `addr`.
    fn is_code(&self, addr: u16) -> bool;
    fn stack_base(&self) -> u16 {
        STACK_BASE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuRegisters {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub pc: u16,
    pub cycles: u64,
}

#[derive(Debug, Clone)]
pub struct Cpu {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub pc: u16,
    pub cycles: u64,
    irq_line: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            p: POWER_UP_STATUS,
            sp: POWER_UP_SP,
            pc: 0,
            cycles: 0,
            irq_line: false,
        }
    }

    pub fn reset<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<(), EmuError> {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.p = POWER_UP_STATUS;
        self.sp = POWER_UP_SP;
        self.irq_line = false;
        self.pc = self.read_u16(bus, RESET_VECTOR)?;
        Ok(())
    }

    pub fn registers(&self) -> CpuRegisters {
        CpuRegisters {
            a: self.a,
            x: self.x,
            y: self.y,
            p: self.p,
            sp: self.sp,
            pc: self.pc,
            cycles: self.cycles,
        }
    }

    /// Level-triggered IRQ input (APU frame counter, DMC).
    pub fn set_irq_line(&mut self, asserted: bool) {
        self.irq_line = asserted;
    }

    /// Cycles the CPU spends stalled outside instruction execution (OAM DMA).
    pub fn add_cycles(&mut self, cycles: u32) {
        self.cycles += cycles as u64;
    }

    /// Services a pending IRQ if one is asserted and unmasked, otherwise
    /// runs one instruction. Returns the cycles consumed.
    pub fn step<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<u32, EmuError> {
        if self.irq_line && !self.get_flag(FLAG_INTERRUPT) {
            return self.irq(bus);
        }
        let instr = self.fetch(bus)?;
        tracing::trace!(pc = format_args!("{:04X}", self.pc), "{instr}");
        self.execute(bus, &instr)
    }

    pub fn fetch<B: Bus + ?Sized>(&self, bus: &mut B) -> Result<Instruction, EmuError> {
        let pc = self.pc;
        if !bus.is_code(pc) {
            return Err(EmuError::PcOutOfRange(pc));
        }
        let opcode = bus.read(pc)?;
        let info = lookup(opcode).ok_or(EmuError::UnknownOpcode { opcode, pc })?;
        let count = info.operand_count as usize;
        let mut operands = [0u8; 2];
        for (i, slot) in operands.iter_mut().take(count).enumerate() {
            *slot = bus.read(pc.wrapping_add(1 + i as u16))?;
        }
        Instruction::decode(pc, opcode, &operands[..count])
    }

    pub fn nmi<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<u32, EmuError> {
        self.interrupt(bus, NMI_VECTOR)
    }

    /// Maskable interrupt. Does nothing while the interrupt-disable flag is set.
    pub fn irq<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<u32, EmuError> {
        if self.get_flag(FLAG_INTERRUPT) {
            return Ok(0);
        }
        self.interrupt(bus, IRQ_VECTOR)
    }

    fn interrupt<B: Bus + ?Sized>(&mut self, bus: &mut B, vector: u16) -> Result<u32, EmuError> {
        self.push_u16(bus, self.pc)?;
        self.push(bus, (self.p & !FLAG_BREAK) | FLAG_UNUSED)?;
        self.set_flag(FLAG_INTERRUPT, true);
        self.pc = self.read_u16(bus, vector)?;
        self.cycles += INTERRUPT_CYCLES as u64;
        Ok(INTERRUPT_CYCLES)
    }

    /// Runs a decoded instruction. PC moves past the encoding before the
    /// operation runs, so branches and jumps overwrite it.
    pub fn execute<B: Bus + ?Sized>(
        &mut self,
        bus: &mut B,
        instr: &Instruction,
    ) -> Result<u32, EmuError> {
        self.pc = self.pc.wrapping_add(instr.len());
        let mut cycles = instr.info.cycles as u32;

        let (addr, crossed) = match instr.mode() {
            AddrMode::Implied | AddrMode::Accumulator | AddrMode::Immediate | AddrMode::Relative => {
                (0, false)
            }
            _ => self.resolve(bus, instr)?,
        };
        if crossed && instr.info.page_penalty {
            cycles += 1;
        }

        match instr.mnemonic() {
            Mnemonic::Lda => {
                self.a = self.operand(bus, instr, addr)?;
                self.update_zn(self.a);
            }
            Mnemonic::Ldx => {
                self.x = self.operand(bus, instr, addr)?;
                self.update_zn(self.x);
            }
            Mnemonic::Ldy => {
                self.y = self.operand(bus, instr, addr)?;
                self.update_zn(self.y);
            }
            Mnemonic::Lax => {
                let value = self.operand(bus, instr, addr)?;
                self.a = value;
                self.x = value;
                self.update_zn(value);
            }
            Mnemonic::Sta => bus.write(addr, self.a)?,
            Mnemonic::Stx => bus.write(addr, self.x)?,
            Mnemonic::Sty => bus.write(addr, self.y)?,
            Mnemonic::Sax => bus.write(addr, self.a & self.x)?,

            Mnemonic::Adc => {
                let value = self.operand(bus, instr, addr)?;
                self.adc(value);
            }
            Mnemonic::Sbc => {
                let value = self.operand(bus, instr, addr)?;
                self.sbc(value);
            }
            Mnemonic::And => {
                self.a &= self.operand(bus, instr, addr)?;
                self.update_zn(self.a);
            }
            Mnemonic::Ora => {
                self.a |= self.operand(bus, instr, addr)?;
                self.update_zn(self.a);
            }
            Mnemonic::Eor => {
                self.a ^= self.operand(bus, instr, addr)?;
                self.update_zn(self.a);
            }
            Mnemonic::Cmp => {
                let value = self.operand(bus, instr, addr)?;
                self.compare(self.a, value);
            }
            Mnemonic::Cpx => {
                let value = self.operand(bus, instr, addr)?;
                self.compare(self.x, value);
            }
            Mnemonic::Cpy => {
                let value = self.operand(bus, instr, addr)?;
                self.compare(self.y, value);
            }
            Mnemonic::Bit => {
                let value = bus.read(addr)?;
                self.set_flag(FLAG_ZERO, (self.a & value) == 0);
                self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
                self.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
            }

            Mnemonic::Asl => self.modify(bus, instr, addr, Cpu::asl)?,
            Mnemonic::Lsr => self.modify(bus, instr, addr, Cpu::lsr)?,
            Mnemonic::Rol => self.modify(bus, instr, addr, Cpu::rol)?,
            Mnemonic::Ror => self.modify(bus, instr, addr, Cpu::ror)?,
            Mnemonic::Inc => self.modify(bus, instr, addr, |cpu, v| {
                let out = v.wrapping_add(1);
                cpu.update_zn(out);
                out
            })?,
            Mnemonic::Dec => self.modify(bus, instr, addr, |cpu, v| {
                let out = v.wrapping_sub(1);
                cpu.update_zn(out);
                out
            })?,
            Mnemonic::Slo => self.modify(bus, instr, addr, |cpu, v| {
                let shifted = cpu.asl(v);
                cpu.a |= shifted;
                cpu.update_zn(cpu.a);
                shifted
            })?,
            Mnemonic::Rla => self.modify(bus, instr, addr, |cpu, v| {
                let shifted = cpu.rol(v);
                cpu.a &= shifted;
                cpu.update_zn(cpu.a);
                shifted
            })?,
            Mnemonic::Sre => self.modify(bus, instr, addr, |cpu, v| {
                let shifted = cpu.lsr(v);
                cpu.a ^= shifted;
                cpu.update_zn(cpu.a);
                shifted
            })?,
            Mnemonic::Rra => self.modify(bus, instr, addr, |cpu, v| {
                let shifted = cpu.ror(v);
                cpu.adc(shifted);
                shifted
            })?,
            Mnemonic::Dcp => self.modify(bus, instr, addr, |cpu, v| {
                let out = v.wrapping_sub(1);
                cpu.compare(cpu.a, out);
                out
            })?,
            Mnemonic::Isc => self.modify(bus, instr, addr, |cpu, v| {
                let out = v.wrapping_add(1);
                cpu.sbc(out);
                out
            })?,

            Mnemonic::Anc => {
                self.a &= instr.byte();
                self.update_zn(self.a);
                self.set_flag(FLAG_CARRY, (self.a & 0x80) != 0);
            }
            Mnemonic::Alr => {
                self.a &= instr.byte();
                self.a = self.lsr(self.a);
            }
            Mnemonic::Arr => {
                self.a &= instr.byte();
                let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
                self.a = (self.a >> 1) | carry_in;
                self.update_zn(self.a);
                self.set_flag(FLAG_CARRY, (self.a & 0x40) != 0);
                self.set_flag(
                    FLAG_OVERFLOW,
                    (((self.a >> 6) & 0x01) ^ ((self.a >> 5) & 0x01)) != 0,
                );
            }
            Mnemonic::Axs => {
                let and = self.a & self.x;
                let imm = instr.byte();
                self.set_flag(FLAG_CARRY, and >= imm);
                self.x = and.wrapping_sub(imm);
                self.update_zn(self.x);
            }

            Mnemonic::Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zn(self.x);
            }
            Mnemonic::Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zn(self.y);
            }
            Mnemonic::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zn(self.x);
            }
            Mnemonic::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zn(self.y);
            }
            Mnemonic::Tax => {
                self.x = self.a;
                self.update_zn(self.x);
            }
            Mnemonic::Tay => {
                self.y = self.a;
                self.update_zn(self.y);
            }
            Mnemonic::Txa => {
                self.a = self.x;
                self.update_zn(self.a);
            }
            Mnemonic::Tya => {
                self.a = self.y;
                self.update_zn(self.a);
            }
            Mnemonic::Tsx => {
                self.x = self.sp;
                self.update_zn(self.x);
            }
            Mnemonic::Txs => self.sp = self.x,

            Mnemonic::Clc => self.set_flag(FLAG_CARRY, false),
            Mnemonic::Sec => self.set_flag(FLAG_CARRY, true),
            Mnemonic::Cli => self.set_flag(FLAG_INTERRUPT, false),
            Mnemonic::Sei => self.set_flag(FLAG_INTERRUPT, true),
            Mnemonic::Cld => self.set_flag(FLAG_DECIMAL, false),
            Mnemonic::Sed => self.set_flag(FLAG_DECIMAL, true),
            Mnemonic::Clv => self.set_flag(FLAG_OVERFLOW, false),

            Mnemonic::Bcc => cycles += self.branch(!self.get_flag(FLAG_CARRY), instr),
            Mnemonic::Bcs => cycles += self.branch(self.get_flag(FLAG_CARRY), instr),
            Mnemonic::Bne => cycles += self.branch(!self.get_flag(FLAG_ZERO), instr),
            Mnemonic::Beq => cycles += self.branch(self.get_flag(FLAG_ZERO), instr),
            Mnemonic::Bpl => cycles += self.branch(!self.get_flag(FLAG_NEGATIVE), instr),
            Mnemonic::Bmi => cycles += self.branch(self.get_flag(FLAG_NEGATIVE), instr),
            Mnemonic::Bvc => cycles += self.branch(!self.get_flag(FLAG_OVERFLOW), instr),
            Mnemonic::Bvs => cycles += self.branch(self.get_flag(FLAG_OVERFLOW), instr),

            Mnemonic::Jmp => self.pc = addr,
            Mnemonic::Jsr => {
                self.push_u16(bus, self.pc.wrapping_sub(1))?;
                self.pc = addr;
            }
            Mnemonic::Rts => {
                self.pc = self.pop_u16(bus)?.wrapping_add(1);
            }
            Mnemonic::Rti => {
                let popped = self.pop(bus)?;
                self.p = self.merge_status(popped);
                self.pc = self.pop_u16(bus)?;
            }
            Mnemonic::Brk => {
                // BRK is followed by a padding byte the return address skips.
                self.push_u16(bus, self.pc.wrapping_add(1))?;
                self.push(bus, self.p | FLAG_BREAK | FLAG_UNUSED)?;
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.read_u16(bus, IRQ_VECTOR)?;
            }

            Mnemonic::Pha => self.push(bus, self.a)?,
            Mnemonic::Php => self.push(bus, self.p | FLAG_BREAK | FLAG_UNUSED)?,
            Mnemonic::Pla => {
                self.a = self.pop(bus)?;
                self.update_zn(self.a);
            }
            Mnemonic::Plp => {
                let popped = self.pop(bus)?;
                self.p = self.merge_status(popped);
            }

            Mnemonic::Nop => {
                if !matches!(
                    instr.mode(),
                    AddrMode::Implied | AddrMode::Immediate | AddrMode::Accumulator
                ) {
                    bus.read(addr)?;
                }
            }
        }

        self.cycles += cycles as u64;
        Ok(cycles)
    }

    fn resolve<B: Bus + ?Sized>(
        &self,
        bus: &mut B,
        instr: &Instruction,
    ) -> Result<(u16, bool), EmuError> {
        Ok(match instr.mode() {
            AddrMode::ZeroPage => (instr.byte() as u16, false),
            AddrMode::ZeroPageX => (instr.byte().wrapping_add(self.x) as u16, false),
            AddrMode::ZeroPageY => (instr.byte().wrapping_add(self.y) as u16, false),
            AddrMode::Absolute => (instr.word(), false),
            AddrMode::AbsoluteX => indexed(instr.word(), self.x),
            AddrMode::AbsoluteY => indexed(instr.word(), self.y),
            AddrMode::Indirect => {
                // The high byte never carries into the next page: JMP ($10FF)
                // reads $10FF and $1000.
                let ptr = instr.word();
                let lo = bus.read(ptr)? as u16;
                let hi_addr = (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF);
                let hi = bus.read(hi_addr)? as u16;
                ((hi << 8) | lo, false)
            }
            AddrMode::IndirectX => {
                let zp = instr.byte().wrapping_add(self.x);
                (self.read_zp_u16(bus, zp)?, false)
            }
            AddrMode::IndirectY => {
                let ptr = self.read_zp_u16(bus, instr.byte())?;
                indexed(ptr, self.y)
            }
            AddrMode::Implied | AddrMode::Accumulator | AddrMode::Immediate | AddrMode::Relative => {
                (0, false)
            }
        })
    }

    fn operand<B: Bus + ?Sized>(
        &self,
        bus: &mut B,
        instr: &Instruction,
        addr: u16,
    ) -> Result<u8, EmuError> {
        if instr.mode() == AddrMode::Immediate {
            Ok(instr.byte())
        } else {
            bus.read(addr)
        }
    }

    fn modify<B, F>(
        &mut self,
        bus: &mut B,
        instr: &Instruction,
        addr: u16,
        op: F,
    ) -> Result<(), EmuError>
    where
        B: Bus + ?Sized,
        F: FnOnce(&mut Cpu, u8) -> u8,
    {
        if instr.mode() == AddrMode::Accumulator {
            let value = self.a;
            self.a = op(self, value);
            return Ok(());
        }
        let value = bus.read(addr)?;
        let out = op(self, value);
        bus.write(addr, out)
    }

    fn branch(&mut self, condition: bool, instr: &Instruction) -> u32 {
        if !condition {
            return 0;
        }
        let old_pc = self.pc;
        self.pc = old_pc.wrapping_add(instr.byte() as i8 as i16 as u16);
        if (old_pc & 0xFF00) != (self.pc & 0xFF00) {
            2
        } else {
            1
        }
    }

    /// PLP and RTI keep the CPU's own B bits.
    fn merge_status(&self, popped: u8) -> u8 {
        (popped & !(FLAG_BREAK | FLAG_UNUSED)) | (self.p & (FLAG_BREAK | FLAG_UNUSED))
    }

    fn read_u16<B: Bus + ?Sized>(&self, bus: &mut B, addr: u16) -> Result<u16, EmuError> {
        let lo = bus.read(addr)? as u16;
        let hi = bus.read(addr.wrapping_add(1))? as u16;
        Ok((hi << 8) | lo)
    }

    fn read_zp_u16<B: Bus + ?Sized>(&self, bus: &mut B, zp: u8) -> Result<u16, EmuError> {
        let lo = bus.read(zp as u16)? as u16;
        let hi = bus.read(zp.wrapping_add(1) as u16)? as u16;
        Ok((hi << 8) | lo)
    }

    fn push<B: Bus + ?Sized>(&mut self, bus: &mut B, value: u8) -> Result<(), EmuError> {
        let addr = bus.stack_base().wrapping_add(self.sp as u16);
        bus.write(addr, value)?;
        self.sp = self.sp.wrapping_sub(1);
        Ok(())
    }

    fn pop<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<u8, EmuError> {
        self.sp = self.sp.wrapping_add(1);
        let addr = bus.stack_base().wrapping_add(self.sp as u16);
        bus.read(addr)
    }

    fn push_u16<B: Bus + ?Sized>(&mut self, bus: &mut B, value: u16) -> Result<(), EmuError> {
        self.push(bus, (value >> 8) as u8)?;
        self.push(bus, value as u8)
    }

    fn pop_u16<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<u16, EmuError> {
        let lo = self.pop(bus)? as u16;
        let hi = self.pop(bus)? as u16;
        Ok((hi << 8) | lo)
    }

    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
        self.p |= FLAG_UNUSED;
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    fn update_zn(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.update_zn(result);
    }

    fn adc(&mut self, value: u8) {
        let carry_in = u16::from(self.get_flag(FLAG_CARRY));
        let sum = self.a as u16 + value as u16 + carry_in;
        let signed = self.a as i8 as i16 + value as i8 as i16 + carry_in as i16;

        self.set_flag(FLAG_CARRY, sum > 0xFF);
        self.set_flag(FLAG_OVERFLOW, !(-128..=127).contains(&signed));

        self.a = sum as u8;
        self.update_zn(self.a);
    }

    fn sbc(&mut self, value: u8) {
        self.adc(!value);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.get_flag(FLAG_CARRY));
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.update_zn(result);
        result
    }
}

fn indexed(base: u16, index: u8) -> (u16, bool) {
    let addr = base.wrapping_add(index as u16);
    (addr, (base & 0xFF00) != (addr & 0xFF00))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::nes::memory::MemoryMap;

    const PRG_BASE: u16 = 0x8000;

    /// 2 KB RAM mirrored below $2000 and a 32 KB program image whose reset
    /// and IRQ vectors both point at $8000.
    fn machine(program: &[u8]) -> (Cpu, MemoryMap) {
        let mut prg = vec![0xEAu8; 0x8000];
        prg[..program.len()].copy_from_slice(program);
        prg[0x7FFC] = 0x00;
        prg[0x7FFD] = 0x80;
        prg[0x7FFE] = 0x00;
        prg[0x7FFF] = 0x90;
        let prg: Arc<[u8]> = prg.into();

        let mut map = MemoryMap::new();
        map.map_ram(0x0000, 0x2000, 0x0800).unwrap();
        map.map_rom(PRG_BASE, 0x8000, prg, 0, 0x8000).unwrap();

        let mut cpu = Cpu::new();
        cpu.reset(&mut map).unwrap();
        (cpu, map)
    }

    /// Steps until the next opcode is BRK.
    fn run_to_brk(cpu: &mut Cpu, map: &mut MemoryMap) {
        for _ in 0..10_000 {
            if map.read(cpu.pc).unwrap() == 0x00 {
                return;
            }
            cpu.step(map).unwrap();
        }
        panic!("program never reached BRK");
    }

    #[test]
    fn power_up_state() {
        let (cpu, _) = machine(&[0x00]);
        assert_eq!(cpu.p, 0x34);
        assert_eq!(cpu.sp, 0xFD);
        assert_eq!(cpu.pc, 0x8000);
    }

    #[test]
    fn load_store_sequence() {
        let program = [
            0xA9, 0x01, 0x8D, 0x00, 0x02, // LDA #$01; STA $0200
            0xA9, 0x05, 0x8D, 0x01, 0x02, // LDA #$05; STA $0201
            0xA9, 0x08, 0x8D, 0x02, 0x02, // LDA #$08; STA $0202
            0x00,
        ];
        let (mut cpu, mut map) = machine(&program);
        run_to_brk(&mut cpu, &mut map);

        assert_eq!(cpu.a, 0x08);
        assert_eq!(cpu.pc, PRG_BASE + 15);
        let mem: Vec<u8> = (0x0200..=0x0202).map(|a| map.read(a).unwrap()).collect();
        assert_eq!(mem, [1, 5, 8]);
        assert_eq!(cpu.cycles, 3 * (2 + 4));
    }

    #[test]
    fn adc_after_transfer_and_increment() {
        // LDA #$C0; TAX; INX; ADC #$C4; BRK
        let (mut cpu, mut map) = machine(&[0xA9, 0xC0, 0xAA, 0xE8, 0x69, 0xC4, 0x00]);
        run_to_brk(&mut cpu, &mut map);

        assert_eq!(cpu.a, 0x84);
        assert_eq!(cpu.x, 0xC1);
        assert!(cpu.get_flag(FLAG_CARRY));
        assert!(!cpu.get_flag(FLAG_OVERFLOW));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn adc_signed_overflow() {
        // LDA #$50; ADC #$50 -> 0xA0, V set, C clear
        let (mut cpu, mut map) = machine(&[0xA9, 0x50, 0x69, 0x50, 0x00]);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.a, 0xA0);
        assert!(cpu.get_flag(FLAG_OVERFLOW));
        assert!(!cpu.get_flag(FLAG_CARRY));
    }

    #[test]
    fn sbc_borrow_and_overflow() {
        // SEC; LDA #$80; SBC #$01 -> 0x7F, V set, C set (no borrow)
        let (mut cpu, mut map) = machine(&[0x38, 0xA9, 0x80, 0xE9, 0x01, 0x00]);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.a, 0x7F);
        assert!(cpu.get_flag(FLAG_OVERFLOW));
        assert!(cpu.get_flag(FLAG_CARRY));
    }

    #[test]
    fn bne_loop_runs_body_five_times() {
        let program = [
            0xA2, 0x08, // LDX #8
            0xC8, // loop: INY
            0xCA, // DEX
            0xE0, 0x03, // CPX #3
            0xD0, 0xFA, // BNE loop (-6)
            0x00,
        ];
        let (mut cpu, mut map) = machine(&program);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.y, 5);
        assert_eq!(cpu.x, 3);
        assert_eq!(cpu.pc, PRG_BASE + 8);
    }

    #[test]
    fn stack_round_trip_reverses_order() {
        let program = [
            0xA2, 0x00, // LDX #0
            0x8A, // push: TXA
            0x48, // PHA
            0xE8, // INX
            0xE0, 0x10, // CPX #16
            0xD0, 0xF9, // BNE push
            0xA2, 0x00, // LDX #0
            0x68, // pop: PLA
            0x9D, 0x00, 0x03, // STA $0300,X
            0xE8, // INX
            0xE0, 0x10, // CPX #16
            0xD0, 0xF7, // BNE pop
            0x00,
        ];
        let (mut cpu, mut map) = machine(&program);
        run_to_brk(&mut cpu, &mut map);

        assert_eq!(cpu.sp, 0xFD);
        for i in 0..16u16 {
            assert_eq!(map.read(0x0300 + i).unwrap(), 15 - i as u8);
            // Bytes were pushed into the stack page, mirrored at $0900.
            assert_eq!(map.read(0x0900 + 0xFD - i).unwrap(), i as u8);
        }
    }

    #[test]
    fn compare_sets_carry_when_register_not_less() {
        // LDA #$40; CMP #$40; BRK
        let (mut cpu, mut map) = machine(&[0xA9, 0x40, 0xC9, 0x40, 0x00]);
        run_to_brk(&mut cpu, &mut map);
        assert!(cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_ZERO));

        // LDY #$10; CPY #$20 -> borrow, negative result
        let (mut cpu, mut map) = machine(&[0xA0, 0x10, 0xC0, 0x20, 0x00]);
        run_to_brk(&mut cpu, &mut map);
        assert!(!cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn rotates_fold_prior_carry() {
        // SEC; LDA #$80; ROL A -> A=0x01, C=1; ROR A -> A=0x80, C=1
        let (mut cpu, mut map) = machine(&[0x38, 0xA9, 0x80, 0x2A, 0x00]);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.a, 0x01);
        assert!(cpu.get_flag(FLAG_CARRY));

        let (mut cpu, mut map) = machine(&[0x38, 0xA9, 0x01, 0x6A, 0x00]);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.a, 0x80);
        assert!(cpu.get_flag(FLAG_CARRY));
    }

    #[test]
    fn bit_copies_operand_bits() {
        // LDA #$C0; STA $10; LDA #$01; BIT $10
        let (mut cpu, mut map) = machine(&[0xA9, 0xC0, 0x85, 0x10, 0xA9, 0x01, 0x24, 0x10, 0x00]);
        run_to_brk(&mut cpu, &mut map);
        assert!(cpu.get_flag(FLAG_ZERO));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
        assert!(cpu.get_flag(FLAG_OVERFLOW));
    }

    #[test]
    fn php_forces_b_bits_and_plp_keeps_current_ones() {
        // PHP; PLA; STA $20; LDA #$00; PHA; PLP
        let program = [0x08, 0x68, 0x85, 0x20, 0xA9, 0x00, 0x48, 0x28, 0x00];
        let (mut cpu, mut map) = machine(&program);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(map.read(0x20).unwrap() & 0x30, 0x30);
        assert_eq!(cpu.p & 0x30, 0x30);
        assert!(!cpu.get_flag(FLAG_INTERRUPT));
    }

    #[test]
    fn indexed_indirect_wraps_in_zero_page() {
        // LDX #$01; LDA ($FE,X): pointer bytes at $FF and $00
        let program = [
            0xA9, 0x34, 0x85, 0xFF, // LDA #$34; STA $FF
            0xA9, 0x02, 0x85, 0x00, // LDA #$02; STA $00
            0xA9, 0x77, 0x8D, 0x34, 0x02, // LDA #$77; STA $0234
            0xA2, 0x01, 0xA1, 0xFE, // LDX #1; LDA ($FE,X)
            0x00,
        ];
        let (mut cpu, mut map) = machine(&program);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.a, 0x77);
    }

    #[test]
    fn jsr_rts_round_trip() {
        // JSR $8006; BRK; ...; $8006: LDA #$42; RTS
        let mut program = vec![0x20, 0x06, 0x80, 0x00, 0xEA, 0xEA];
        program.extend_from_slice(&[0xA9, 0x42, 0x60]);
        let (mut cpu, mut map) = machine(&program);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.a, 0x42);
        assert_eq!(cpu.pc, 0x8003);
        assert_eq!(cpu.sp, 0xFD);
    }

    #[test]
    fn jmp_indirect_page_wrap_bug() {
        // Pointer at $02FF/$0200 (not $0300).
        let program = [
            0xA9, 0x10, 0x8D, 0xFF, 0x02, // LDA #$10; STA $02FF
            0xA9, 0x80, 0x8D, 0x00, 0x02, // LDA #$80; STA $0200
            0x6C, 0xFF, 0x02, // JMP ($02FF)
        ];
        let (mut cpu, mut map) = machine(&program);
        for _ in 0..5 {
            cpu.step(&mut map).unwrap();
        }
        assert_eq!(cpu.pc, 0x8010);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let (mut cpu, mut map) = machine(&[0x02]);
        assert_eq!(
            cpu.step(&mut map),
            Err(EmuError::UnknownOpcode {
                opcode: 0x02,
                pc: 0x8000
            })
        );
    }

    #[test]
    fn fetch_outside_mapped_code_fails() {
        let (mut cpu, mut map) = machine(&[0x4C, 0x00, 0x40]); // JMP $4000
        cpu.step(&mut map).unwrap();
        assert_eq!(cpu.step(&mut map), Err(EmuError::PcOutOfRange(0x4000)));
    }

    #[test]
    fn page_cross_adds_a_cycle() {
        // LDX #$01; LDA $80FF,X
        let (mut cpu, mut map) = machine(&[0xA2, 0x01, 0xBD, 0xFF, 0x80, 0x00]);
        cpu.step(&mut map).unwrap();
        assert_eq!(cpu.step(&mut map).unwrap(), 5);
    }

    #[test]
    fn nmi_pushes_state_and_vectors() {
        let (mut cpu, mut map) = machine(&[0xEA]);
        // NMI vector in the image is $EAEA (filled with NOPs).
        let cycles = cpu.nmi(&mut map).unwrap();
        assert_eq!(cycles, 7);
        assert_eq!(cpu.pc, 0xEAEA);
        assert_eq!(cpu.sp, 0xFA);
        assert_eq!(map.read(0x01FB).unwrap() & FLAG_BREAK, 0);
    }

    #[test]
    fn irq_respects_interrupt_disable() {
        // CLI; NOP
        let (mut cpu, mut map) = machine(&[0x58, 0xEA]);
        cpu.set_irq_line(true);
        // I is set at power-up, so CLI runs first.
        cpu.step(&mut map).unwrap();
        assert_eq!(cpu.step(&mut map).unwrap(), 7);
        assert_eq!(cpu.pc, 0x9000);
    }

    #[test]
    fn unofficial_lax_and_dcp() {
        // LDA #$05; STA $10; LAX $10; DCP $10
        let program = [0xA9, 0x05, 0x85, 0x10, 0xA7, 0x10, 0xC7, 0x10, 0x00];
        let (mut cpu, mut map) = machine(&program);
        run_to_brk(&mut cpu, &mut map);
        assert_eq!(cpu.x, 0x05);
        assert_eq!(map.read(0x10).unwrap(), 0x04);
        assert!(cpu.get_flag(FLAG_CARRY));
    }
}
