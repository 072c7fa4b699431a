use std::fmt;

/// Conditions that end the current emulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuError {
    UnknownOpcode {
        opcode: u8,
        pc: u16,
    },
    OperandMismatch {
        opcode: u8,
        expected: u8,
        actual: usize,
    },
    PcOutOfRange(u16),
    AccessFault {
        addr: u16,
        write: bool,
    },
    RegionOverlap {
        base: u16,
        span: u32,
    },
    UnsupportedMapper(u16),
    UnsupportedBankSwitch {
        mapper: &'static str,
        addr: u16,
        value: u8,
    },
    BankOutOfRange {
        offset: usize,
        len: usize,
        rom_len: usize,
    },
}

impl fmt::Display for EmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmuError::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode ${opcode:02X} at ${pc:04X}")
            }
            EmuError::OperandMismatch {
                opcode,
                expected,
                actual,
            } => write!(
                f,
                "opcode ${opcode:02X} takes {expected} operand byte(s), got {actual}"
            ),
            EmuError::PcOutOfRange(pc) => {
                write!(f, "program counter ${pc:04X} is outside any mapped region")
            }
            EmuError::AccessFault { addr, write } => {
                let kind = if *write { "write" } else { "read" };
                write!(f, "{kind} of unmapped address ${addr:04X}")
            }
            EmuError::RegionOverlap { base, span } => write!(
                f,
                "region ${base:04X} (+${span:X}) overlaps an existing mapping"
            ),
            EmuError::UnsupportedMapper(id) => write!(f, "mapper {id} is not supported"),
            EmuError::UnsupportedBankSwitch {
                mapper,
                addr,
                value,
            } => write!(
                f,
                "{mapper} has no bank switching (write ${value:02X} to ${addr:04X})"
            ),
            EmuError::BankOutOfRange {
                offset,
                len,
                rom_len,
            } => write!(
                f,
                "bank window ${offset:X}..${:X} exceeds ROM size ${rom_len:X}",
                offset + len
            ),
        }
    }
}

impl std::error::Error for EmuError {}
