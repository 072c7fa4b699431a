use std::fmt;

use super::error::EmuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

impl AddrMode {
    pub const fn operand_count(self) -> u8 {
        match self {
            AddrMode::Implied | AddrMode::Accumulator => 0,
            AddrMode::Immediate
            | AddrMode::ZeroPage
            | AddrMode::ZeroPageX
            | AddrMode::ZeroPageY
            | AddrMode::IndirectX
            | AddrMode::IndirectY
            | AddrMode::Relative => 1,
            AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY | AddrMode::Indirect => {
                2
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Undocumented but stable on the 2A03.
    Alr,
    Anc,
    Arr,
    Axs,
    Dcp,
    Isc,
    Lax,
    Rla,
    Rra,
    Sax,
    Slo,
    Sre,
}

impl Mnemonic {
    pub fn name(self) -> &'static str {
        match self {
            Mnemonic::Adc => "ADC",
            Mnemonic::And => "AND",
            Mnemonic::Asl => "ASL",
            Mnemonic::Bcc => "BCC",
            Mnemonic::Bcs => "BCS",
            Mnemonic::Beq => "BEQ",
            Mnemonic::Bit => "BIT",
            Mnemonic::Bmi => "BMI",
            Mnemonic::Bne => "BNE",
            Mnemonic::Bpl => "BPL",
            Mnemonic::Brk => "BRK",
            Mnemonic::Bvc => "BVC",
            Mnemonic::Bvs => "BVS",
            Mnemonic::Clc => "CLC",
            Mnemonic::Cld => "CLD",
            Mnemonic::Cli => "CLI",
            Mnemonic::Clv => "CLV",
            Mnemonic::Cmp => "CMP",
            Mnemonic::Cpx => "CPX",
            Mnemonic::Cpy => "CPY",
            Mnemonic::Dec => "DEC",
            Mnemonic::Dex => "DEX",
            Mnemonic::Dey => "DEY",
            Mnemonic::Eor => "EOR",
            Mnemonic::Inc => "INC",
            Mnemonic::Inx => "INX",
            Mnemonic::Iny => "INY",
            Mnemonic::Jmp => "JMP",
            Mnemonic::Jsr => "JSR",
            Mnemonic::Lda => "LDA",
            Mnemonic::Ldx => "LDX",
            Mnemonic::Ldy => "LDY",
            Mnemonic::Lsr => "LSR",
            Mnemonic::Nop => "NOP",
            Mnemonic::Ora => "ORA",
            Mnemonic::Pha => "PHA",
            Mnemonic::Php => "PHP",
            Mnemonic::Pla => "PLA",
            Mnemonic::Plp => "PLP",
            Mnemonic::Rol => "ROL",
            Mnemonic::Ror => "ROR",
            Mnemonic::Rti => "RTI",
            Mnemonic::Rts => "RTS",
            Mnemonic::Sbc => "SBC",
            Mnemonic::Sec => "SEC",
            Mnemonic::Sed => "SED",
            Mnemonic::Sei => "SEI",
            Mnemonic::Sta => "STA",
            Mnemonic::Stx => "STX",
            Mnemonic::Sty => "STY",
            Mnemonic::Tax => "TAX",
            Mnemonic::Tay => "TAY",
            Mnemonic::Tsx => "TSX",
            Mnemonic::Txa => "TXA",
            Mnemonic::Txs => "TXS",
            Mnemonic::Tya => "TYA",
            Mnemonic::Alr => "ALR",
            Mnemonic::Anc => "ANC",
            Mnemonic::Arr => "ARR",
            Mnemonic::Axs => "AXS",
            Mnemonic::Dcp => "DCP",
            Mnemonic::Isc => "ISC",
            Mnemonic::Lax => "LAX",
            Mnemonic::Rla => "RLA",
            Mnemonic::Rra => "RRA",
            Mnemonic::Sax => "SAX",
            Mnemonic::Slo => "SLO",
            Mnemonic::Sre => "SRE",
        }
    }
}

/// Static decode data for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub mnemonic: Mnemonic,
    pub mode: AddrMode,
    pub operand_count: u8,
    /// Base cost in CPU cycles.
    pub cycles: u8,
    /// One extra cycle when indexing crosses a page.
    pub page_penalty: bool,
}

const fn op(mnemonic: Mnemonic, mode: AddrMode, cycles: u8, page_penalty: bool) -> OpInfo {
    OpInfo {
        mnemonic,
        mode,
        operand_count: mode.operand_count(),
        cycles,
        page_penalty,
    }
}

use AddrMode::{
    Absolute as Abs, AbsoluteX as AbsX, AbsoluteY as AbsY, Accumulator as Acc, Immediate as Imm,
    Implied as Imp, Indirect as Ind, IndirectX as IndX, IndirectY as IndY, Relative as Rel,
    ZeroPage as Zp, ZeroPageX as ZpX, ZeroPageY as ZpY,
};
use Mnemonic::*;

#[rustfmt::skip]
const ENTRIES: &[(u8, OpInfo)] = &[
    (0x69, op(Adc, Imm, 2, false)), (0x65, op(Adc, Zp, 3, false)), (0x75, op(Adc, ZpX, 4, false)),
    (0x6D, op(Adc, Abs, 4, false)), (0x7D, op(Adc, AbsX, 4, true)), (0x79, op(Adc, AbsY, 4, true)),
    (0x61, op(Adc, IndX, 6, false)), (0x71, op(Adc, IndY, 5, true)),

    (0x29, op(And, Imm, 2, false)), (0x25, op(And, Zp, 3, false)), (0x35, op(And, ZpX, 4, false)),
    (0x2D, op(And, Abs, 4, false)), (0x3D, op(And, AbsX, 4, true)), (0x39, op(And, AbsY, 4, true)),
    (0x21, op(And, IndX, 6, false)), (0x31, op(And, IndY, 5, true)),

    (0x0A, op(Asl, Acc, 2, false)), (0x06, op(Asl, Zp, 5, false)), (0x16, op(Asl, ZpX, 6, false)),
    (0x0E, op(Asl, Abs, 6, false)), (0x1E, op(Asl, AbsX, 7, false)),

    (0x90, op(Bcc, Rel, 2, false)), (0xB0, op(Bcs, Rel, 2, false)), (0xF0, op(Beq, Rel, 2, false)),
    (0x30, op(Bmi, Rel, 2, false)), (0xD0, op(Bne, Rel, 2, false)), (0x10, op(Bpl, Rel, 2, false)),
    (0x50, op(Bvc, Rel, 2, false)), (0x70, op(Bvs, Rel, 2, false)),

    (0x24, op(Bit, Zp, 3, false)), (0x2C, op(Bit, Abs, 4, false)),

    (0x00, op(Brk, Imp, 7, false)),

    (0x18, op(Clc, Imp, 2, false)), (0xD8, op(Cld, Imp, 2, false)), (0x58, op(Cli, Imp, 2, false)),
    (0xB8, op(Clv, Imp, 2, false)),

    (0xC9, op(Cmp, Imm, 2, false)), (0xC5, op(Cmp, Zp, 3, false)), (0xD5, op(Cmp, ZpX, 4, false)),
    (0xCD, op(Cmp, Abs, 4, false)), (0xDD, op(Cmp, AbsX, 4, true)), (0xD9, op(Cmp, AbsY, 4, true)),
    (0xC1, op(Cmp, IndX, 6, false)), (0xD1, op(Cmp, IndY, 5, true)),

    (0xE0, op(Cpx, Imm, 2, false)), (0xE4, op(Cpx, Zp, 3, false)), (0xEC, op(Cpx, Abs, 4, false)),
    (0xC0, op(Cpy, Imm, 2, false)), (0xC4, op(Cpy, Zp, 3, false)), (0xCC, op(Cpy, Abs, 4, false)),

    (0xC6, op(Dec, Zp, 5, false)), (0xD6, op(Dec, ZpX, 6, false)), (0xCE, op(Dec, Abs, 6, false)),
    (0xDE, op(Dec, AbsX, 7, false)),
    (0xCA, op(Dex, Imp, 2, false)), (0x88, op(Dey, Imp, 2, false)),

    (0x49, op(Eor, Imm, 2, false)), (0x45, op(Eor, Zp, 3, false)), (0x55, op(Eor, ZpX, 4, false)),
    (0x4D, op(Eor, Abs, 4, false)), (0x5D, op(Eor, AbsX, 4, true)), (0x59, op(Eor, AbsY, 4, true)),
    (0x41, op(Eor, IndX, 6, false)), (0x51, op(Eor, IndY, 5, true)),

    (0xE6, op(Inc, Zp, 5, false)), (0xF6, op(Inc, ZpX, 6, false)), (0xEE, op(Inc, Abs, 6, false)),
    (0xFE, op(Inc, AbsX, 7, false)),
    (0xE8, op(Inx, Imp, 2, false)), (0xC8, op(Iny, Imp, 2, false)),

    (0x4C, op(Jmp, Abs, 3, false)), (0x6C, op(Jmp, Ind, 5, false)),
    (0x20, op(Jsr, Abs, 6, false)),

    (0xA9, op(Lda, Imm, 2, false)), (0xA5, op(Lda, Zp, 3, false)), (0xB5, op(Lda, ZpX, 4, false)),
    (0xAD, op(Lda, Abs, 4, false)), (0xBD, op(Lda, AbsX, 4, true)), (0xB9, op(Lda, AbsY, 4, true)),
    (0xA1, op(Lda, IndX, 6, false)), (0xB1, op(Lda, IndY, 5, true)),

    (0xA2, op(Ldx, Imm, 2, false)), (0xA6, op(Ldx, Zp, 3, false)), (0xB6, op(Ldx, ZpY, 4, false)),
    (0xAE, op(Ldx, Abs, 4, false)), (0xBE, op(Ldx, AbsY, 4, true)),

    (0xA0, op(Ldy, Imm, 2, false)), (0xA4, op(Ldy, Zp, 3, false)), (0xB4, op(Ldy, ZpX, 4, false)),
    (0xAC, op(Ldy, Abs, 4, false)), (0xBC, op(Ldy, AbsX, 4, true)),

    (0x4A, op(Lsr, Acc, 2, false)), (0x46, op(Lsr, Zp, 5, false)), (0x56, op(Lsr, ZpX, 6, false)),
    (0x4E, op(Lsr, Abs, 6, false)), (0x5E, op(Lsr, AbsX, 7, false)),

    (0xEA, op(Nop, Imp, 2, false)),

    (0x09, op(Ora, Imm, 2, false)), (0x05, op(Ora, Zp, 3, false)), (0x15, op(Ora, ZpX, 4, false)),
    (0x0D, op(Ora, Abs, 4, false)), (0x1D, op(Ora, AbsX, 4, true)), (0x19, op(Ora, AbsY, 4, true)),
    (0x01, op(Ora, IndX, 6, false)), (0x11, op(Ora, IndY, 5, true)),

    (0x48, op(Pha, Imp, 3, false)), (0x08, op(Php, Imp, 3, false)),
    (0x68, op(Pla, Imp, 4, false)), (0x28, op(Plp, Imp, 4, false)),

    (0x2A, op(Rol, Acc, 2, false)), (0x26, op(Rol, Zp, 5, false)), (0x36, op(Rol, ZpX, 6, false)),
    (0x2E, op(Rol, Abs, 6, false)), (0x3E, op(Rol, AbsX, 7, false)),

    (0x6A, op(Ror, Acc, 2, false)), (0x66, op(Ror, Zp, 5, false)), (0x76, op(Ror, ZpX, 6, false)),
    (0x6E, op(Ror, Abs, 6, false)), (0x7E, op(Ror, AbsX, 7, false)),

    (0x40, op(Rti, Imp, 6, false)), (0x60, op(Rts, Imp, 6, false)),

    (0xE9, op(Sbc, Imm, 2, false)), (0xE5, op(Sbc, Zp, 3, false)), (0xF5, op(Sbc, ZpX, 4, false)),
    (0xED, op(Sbc, Abs, 4, false)), (0xFD, op(Sbc, AbsX, 4, true)), (0xF9, op(Sbc, AbsY, 4, true)),
    (0xE1, op(Sbc, IndX, 6, false)), (0xF1, op(Sbc, IndY, 5, true)),

    (0x38, op(Sec, Imp, 2, false)), (0xF8, op(Sed, Imp, 2, false)), (0x78, op(Sei, Imp, 2, false)),

    (0x85, op(Sta, Zp, 3, false)), (0x95, op(Sta, ZpX, 4, false)), (0x8D, op(Sta, Abs, 4, false)),
    (0x9D, op(Sta, AbsX, 5, false)), (0x99, op(Sta, AbsY, 5, false)), (0x81, op(Sta, IndX, 6, false)),
    (0x91, op(Sta, IndY, 6, false)),

    (0x86, op(Stx, Zp, 3, false)), (0x96, op(Stx, ZpY, 4, false)), (0x8E, op(Stx, Abs, 4, false)),
    (0x84, op(Sty, Zp, 3, false)), (0x94, op(Sty, ZpX, 4, false)), (0x8C, op(Sty, Abs, 4, false)),

    (0xAA, op(Tax, Imp, 2, false)), (0xA8, op(Tay, Imp, 2, false)), (0xBA, op(Tsx, Imp, 2, false)),
    (0x8A, op(Txa, Imp, 2, false)), (0x9A, op(Txs, Imp, 2, false)), (0x98, op(Tya, Imp, 2, false)),

    // Undocumented NOPs.
    (0x1A, op(Nop, Imp, 2, false)), (0x3A, op(Nop, Imp, 2, false)), (0x5A, op(Nop, Imp, 2, false)),
    (0x7A, op(Nop, Imp, 2, false)), (0xDA, op(Nop, Imp, 2, false)), (0xFA, op(Nop, Imp, 2, false)),
    (0x80, op(Nop, Imm, 2, false)), (0x82, op(Nop, Imm, 2, false)), (0x89, op(Nop, Imm, 2, false)),
    (0xC2, op(Nop, Imm, 2, false)), (0xE2, op(Nop, Imm, 2, false)),
    (0x04, op(Nop, Zp, 3, false)), (0x44, op(Nop, Zp, 3, false)), (0x64, op(Nop, Zp, 3, false)),
    (0x14, op(Nop, ZpX, 4, false)), (0x34, op(Nop, ZpX, 4, false)), (0x54, op(Nop, ZpX, 4, false)),
    (0x74, op(Nop, ZpX, 4, false)), (0xD4, op(Nop, ZpX, 4, false)), (0xF4, op(Nop, ZpX, 4, false)),
    (0x0C, op(Nop, Abs, 4, false)),
    (0x1C, op(Nop, AbsX, 4, true)), (0x3C, op(Nop, AbsX, 4, true)), (0x5C, op(Nop, AbsX, 4, true)),
    (0x7C, op(Nop, AbsX, 4, true)), (0xDC, op(Nop, AbsX, 4, true)), (0xFC, op(Nop, AbsX, 4, true)),

    (0xA7, op(Lax, Zp, 3, false)), (0xB7, op(Lax, ZpY, 4, false)), (0xAF, op(Lax, Abs, 4, false)),
    (0xBF, op(Lax, AbsY, 4, true)), (0xA3, op(Lax, IndX, 6, false)), (0xB3, op(Lax, IndY, 5, true)),

    (0x87, op(Sax, Zp, 3, false)), (0x97, op(Sax, ZpY, 4, false)), (0x8F, op(Sax, Abs, 4, false)),
    (0x83, op(Sax, IndX, 6, false)),

    (0xEB, op(Sbc, Imm, 2, false)),

    (0xC7, op(Dcp, Zp, 5, false)), (0xD7, op(Dcp, ZpX, 6, false)), (0xCF, op(Dcp, Abs, 6, false)),
    (0xDF, op(Dcp, AbsX, 7, false)), (0xDB, op(Dcp, AbsY, 7, false)), (0xC3, op(Dcp, IndX, 8, false)),
    (0xD3, op(Dcp, IndY, 8, false)),

    (0xE7, op(Isc, Zp, 5, false)), (0xF7, op(Isc, ZpX, 6, false)), (0xEF, op(Isc, Abs, 6, false)),
    (0xFF, op(Isc, AbsX, 7, false)), (0xFB, op(Isc, AbsY, 7, false)), (0xE3, op(Isc, IndX, 8, false)),
    (0xF3, op(Isc, IndY, 8, false)),

    (0x07, op(Slo, Zp, 5, false)), (0x17, op(Slo, ZpX, 6, false)), (0x0F, op(Slo, Abs, 6, false)),
    (0x1F, op(Slo, AbsX, 7, false)), (0x1B, op(Slo, AbsY, 7, false)), (0x03, op(Slo, IndX, 8, false)),
    (0x13, op(Slo, IndY, 8, false)),

    (0x27, op(Rla, Zp, 5, false)), (0x37, op(Rla, ZpX, 6, false)), (0x2F, op(Rla, Abs, 6, false)),
    (0x3F, op(Rla, AbsX, 7, false)), (0x3B, op(Rla, AbsY, 7, false)), (0x23, op(Rla, IndX, 8, false)),
    (0x33, op(Rla, IndY, 8, false)),

    (0x47, op(Sre, Zp, 5, false)), (0x57, op(Sre, ZpX, 6, false)), (0x4F, op(Sre, Abs, 6, false)),
    (0x5F, op(Sre, AbsX, 7, false)), (0x5B, op(Sre, AbsY, 7, false)), (0x43, op(Sre, IndX, 8, false)),
    (0x53, op(Sre, IndY, 8, false)),

    (0x67, op(Rra, Zp, 5, false)), (0x77, op(Rra, ZpX, 6, false)), (0x6F, op(Rra, Abs, 6, false)),
    (0x7F, op(Rra, AbsX, 7, false)), (0x7B, op(Rra, AbsY, 7, false)), (0x63, op(Rra, IndX, 8, false)),
    (0x73, op(Rra, IndY, 8, false)),

    (0x0B, op(Anc, Imm, 2, false)), (0x2B, op(Anc, Imm, 2, false)),
    (0x4B, op(Alr, Imm, 2, false)), (0x6B, op(Arr, Imm, 2, false)), (0xCB, op(Axs, Imm, 2, false)),
];

const fn build_table() -> [Option<OpInfo>; 256] {
    let mut table = [None; 256];
    let mut i = 0;
    while i < ENTRIES.len() {
        let (code, info) = ENTRIES[i];
        assert!(info.operand_count <= 2, "an instruction carries at most two operand bytes");
        assert!(table[code as usize].is_none(), "duplicate opcode in decode table");
        table[code as usize] = Some(info);
        i += 1;
    }
    table
}

/// Opcode -> decode data. `None` marks opcodes the core refuses to run
/// (the KIL/JAM family and the unstable store/transfer oddities).
pub static OPCODES: [Option<OpInfo>; 256] = build_table();

pub fn lookup(opcode: u8) -> Option<OpInfo> {
    OPCODES[opcode as usize]
}

/// One decoded instruction: opcode, its table entry and 0-2 operand bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub info: OpInfo,
    operands: [u8; 2],
}

impl Instruction {
    pub fn decode(pc: u16, opcode: u8, operands: &[u8]) -> Result<Self, EmuError> {
        let info = lookup(opcode).ok_or(EmuError::UnknownOpcode { opcode, pc })?;
        if operands.len() != info.operand_count as usize {
            return Err(EmuError::OperandMismatch {
                opcode,
                expected: info.operand_count,
                actual: operands.len(),
            });
        }
        let mut bytes = [0u8; 2];
        bytes[..operands.len()].copy_from_slice(operands);
        Ok(Self {
            opcode,
            info,
            operands: bytes,
        })
    }

    pub fn mnemonic(&self) -> Mnemonic {
        self.info.mnemonic
    }

    pub fn mode(&self) -> AddrMode {
        self.info.mode
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> u16 {
        1 + self.info.operand_count as u16
    }

    pub fn operands(&self) -> &[u8] {
        &self.operands[..self.info.operand_count as usize]
    }

    pub fn byte(&self) -> u8 {
        self.operands[0]
    }

    pub fn word(&self) -> u16 {
        u16::from_le_bytes(self.operands)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.mnemonic().name();
        let b = self.byte();
        let w = self.word();
        match self.mode() {
            AddrMode::Implied => write!(f, "{name}"),
            AddrMode::Accumulator => write!(f, "{name} A"),
            AddrMode::Immediate => write!(f, "{name} #${b:02X}"),
            AddrMode::ZeroPage => write!(f, "{name} ${b:02X}"),
            AddrMode::ZeroPageX => write!(f, "{name} ${b:02X},X"),
            AddrMode::ZeroPageY => write!(f, "{name} ${b:02X},Y"),
            AddrMode::Absolute => write!(f, "{name} ${w:04X}"),
            AddrMode::AbsoluteX => write!(f, "{name} ${w:04X},X"),
            AddrMode::AbsoluteY => write!(f, "{name} ${w:04X},Y"),
            AddrMode::Indirect => write!(f, "{name} (${w:04X})"),
            AddrMode::IndirectX => write!(f, "{name} (${b:02X},X)"),
            AddrMode::IndirectY => write!(f, "{name} (${b:02X}),Y"),
            AddrMode::Relative => write!(f, "{name} {:+}", b as i8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn official_opcode_count_is_complete() {
        let official = OPCODES
            .iter()
            .flatten()
            .filter(|info| {
                !matches!(
                    info.mnemonic,
                    Alr | Anc | Arr | Axs | Dcp | Isc | Lax | Rla | Rra | Sax | Slo | Sre
                )
            })
            .count();
        // 151 documented opcodes, plus 27 undocumented NOP encodings and $EB.
        assert_eq!(official, 151 + 27 + 1);
    }

    #[test]
    fn jam_opcodes_stay_unknown() {
        for code in [0x02u8, 0x12, 0x22, 0x32, 0x42, 0x52, 0x62, 0x72, 0x92, 0xB2, 0xD2, 0xF2] {
            assert!(lookup(code).is_none(), "opcode {code:02X} should not decode");
        }
    }

    #[test]
    fn decode_rejects_wrong_operand_count() {
        let err = Instruction::decode(0x8000, 0xA9, &[]).unwrap_err();
        assert_eq!(
            err,
            EmuError::OperandMismatch {
                opcode: 0xA9,
                expected: 1,
                actual: 0
            }
        );
    }

    #[test]
    fn decode_reports_unknown_opcode_with_pc() {
        let err = Instruction::decode(0x8123, 0x02, &[]).unwrap_err();
        assert_eq!(
            err,
            EmuError::UnknownOpcode {
                opcode: 0x02,
                pc: 0x8123
            }
        );
    }

    #[test]
    fn disassembly_formats_operands() {
        let lda = Instruction::decode(0, 0xBD, &[0x34, 0x12]).unwrap();
        assert_eq!(lda.to_string(), "LDA $1234,X");
        assert_eq!(lda.len(), 3);
        let bne = Instruction::decode(0, 0xD0, &[0xFB]).unwrap();
        assert_eq!(bne.to_string(), "BNE -5");
    }
}
