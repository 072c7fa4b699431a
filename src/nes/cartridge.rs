use anyhow::{Context, Result, bail};
use sha1::{Digest, Sha1};
use std::{fs, path::Path, sync::Arc};

use super::ppu::Mirroring;

const HEADER_LEN: usize = 16;
const TRAINER_LEN: usize = 512;
const PRG_UNIT: usize = 16 * 1024;
const CHR_UNIT: usize = 8 * 1024;

/// Parsed iNES / NES 2.0 image.
#[derive(Debug, Clone)]
pub struct NesFile {
    pub mapper_id: u16,
    pub submapper_id: u8,
    pub mirroring: Mirroring,
    pub has_battery: bool,
    pub is_nes2: bool,
    pub trainer: Option<Vec<u8>>,
    pub prg_rom: Arc<[u8]>,
    pub chr_rom: Arc<[u8]>,
    pub chr_is_ram: bool,
    pub prg_ram_size: usize,
    /// Hex SHA-1 of PRG followed by CHR, for identifying dumps.
    pub sha1: String,
}

impl NesFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read ROM: {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            bail!("ROM is too small to contain an iNES header");
        }
        if &bytes[0..4] != b"NES\x1A" {
            bail!("invalid iNES header magic, expected NES<EOF>");
        }

        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let is_nes2 = (flags7 & 0x0C) == 0x08;

        let mapper_low = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let mapper_id = if is_nes2 {
            mapper_low | (((bytes[8] as u16) & 0x0F) << 8)
        } else {
            mapper_low
        };
        let submapper_id = if is_nes2 { bytes[8] >> 4 } else { 0 };

        let mirroring = if (flags6 & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let has_battery = (flags6 & 0x02) != 0;
        let trainer_present = (flags6 & 0x04) != 0;

        let (prg_size, chr_size, prg_ram_size) = if is_nes2 {
            let prg = rom_size(bytes[4], bytes[9] & 0x0F, PRG_UNIT)?;
            let chr = rom_size(bytes[5], bytes[9] >> 4, CHR_UNIT)?;
            let shift = bytes[10] & 0x0F;
            let prg_ram = if shift == 0 { 8 * 1024 } else { 64usize << shift };
            (prg, chr, prg_ram)
        } else {
            let prg_ram_units = if bytes[8] == 0 { 1 } else { bytes[8] as usize };
            (
                bytes[4] as usize * PRG_UNIT,
                bytes[5] as usize * CHR_UNIT,
                prg_ram_units * 8 * 1024,
            )
        };
        if prg_size == 0 {
            bail!("invalid PRG ROM: header declares zero banks");
        }

        let mut cursor = HEADER_LEN;
        let trainer = if trainer_present {
            let end = cursor + TRAINER_LEN;
            let Some(data) = bytes.get(cursor..end) else {
                bail!("ROM truncated: trainer flag set but file ends inside the trainer");
            };
            cursor = end;
            Some(data.to_vec())
        } else {
            None
        };

        let Some(prg) = bytes.get(cursor..cursor + prg_size) else {
            bail!("ROM truncated: expected {prg_size} PRG bytes but file ended early");
        };
        cursor += prg_size;

        let (chr, chr_is_ram) = if chr_size == 0 {
            (vec![0; CHR_UNIT], true)
        } else {
            let Some(chr) = bytes.get(cursor..cursor + chr_size) else {
                bail!("ROM truncated: expected {chr_size} CHR bytes but file ended early");
            };
            (chr.to_vec(), false)
        };

        let mut hasher = Sha1::new();
        hasher.update(prg);
        if !chr_is_ram {
            hasher.update(&chr);
        }
        let sha1 = hex(&hasher.finalize());

        Ok(Self {
            mapper_id,
            submapper_id,
            mirroring,
            has_battery,
            is_nes2,
            trainer,
            prg_rom: Arc::from(prg),
            chr_rom: Arc::from(chr),
            chr_is_ram,
            prg_ram_size,
            sha1,
        })
    }
}

/// NES 2.0 size field: a plain unit count, or `2^E * (M*2+1)` bytes when the
/// high nibble is 0xF.
fn rom_size(low: u8, high_nibble: u8, unit: usize) -> Result<usize> {
    if high_nibble == 0x0F {
        let exponent = (low >> 2) as u32;
        let multiplier = ((low & 0x03) as usize) * 2 + 1;
        if exponent > 30 {
            bail!("NES 2.0 ROM size exponent {exponent} is too large");
        }
        Ok((1usize << exponent) * multiplier)
    } else {
        Ok((((high_nibble as usize) << 8) | low as usize) * unit)
    }
}

pub fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(flags6: u8, flags7: u8, prg_units: u8, chr_units: u8) -> Vec<u8> {
        let mut bytes = vec![b'N', b'E', b'S', 0x1A, prg_units, chr_units, flags6, flags7];
        bytes.resize(HEADER_LEN, 0);
        if (flags6 & 0x04) != 0 {
            bytes.extend(std::iter::repeat_n(0xEE, TRAINER_LEN));
        }
        bytes.extend(std::iter::repeat_n(0xAA, prg_units as usize * PRG_UNIT));
        bytes.extend(std::iter::repeat_n(0xCC, chr_units as usize * CHR_UNIT));
        bytes
    }

    #[test]
    fn parses_ines_header_fields() {
        let cart = NesFile::from_bytes(&image(0x13, 0x00, 2, 1)).unwrap();
        assert_eq!(cart.mapper_id, 1);
        assert_eq!(cart.mirroring, Mirroring::Vertical);
        assert!(cart.has_battery);
        assert_eq!(cart.prg_rom.len(), 2 * PRG_UNIT);
        assert_eq!(cart.chr_rom.len(), CHR_UNIT);
        assert!(!cart.chr_is_ram);
        assert_eq!(cart.sha1.len(), 40);
    }

    #[test]
    fn trainer_precedes_prg() {
        let cart = NesFile::from_bytes(&image(0x04, 0x00, 1, 0)).unwrap();
        assert_eq!(cart.trainer.as_deref().map(<[u8]>::len), Some(TRAINER_LEN));
        assert!(cart.prg_rom.iter().all(|&b| b == 0xAA));
        assert!(cart.chr_is_ram);
        assert_eq!(cart.chr_rom.len(), CHR_UNIT);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let mut bytes = image(0x00, 0x00, 1, 1);
        bytes[3] = 0x00;
        assert!(NesFile::from_bytes(&bytes).is_err());

        let mut bytes = image(0x00, 0x00, 1, 1);
        bytes.truncate(HEADER_LEN + 100);
        let err = NesFile::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("PRG"));

        assert!(NesFile::from_bytes(&bytes[..8]).is_err());
    }

    #[test]
    fn nes2_mapper_and_exponent_sizes() {
        assert_eq!(rom_size(0x02, 0x00, PRG_UNIT).unwrap(), 2 * PRG_UNIT);
        // 2^14 * 1 = 16 KB.
        assert_eq!(rom_size(14 << 2, 0x0F, PRG_UNIT).unwrap(), 0x4000);
        // 2^10 * 3
        assert_eq!(rom_size((10 << 2) | 1, 0x0F, PRG_UNIT).unwrap(), 3 * 1024);

        let mut bytes = image(0x20, 0x18, 1, 1);
        bytes[8] = 0x31;
        let cart = NesFile::from_bytes(&bytes).unwrap();
        assert!(cart.is_nes2);
        assert_eq!(cart.mapper_id, 0x112);
        assert_eq!(cart.submapper_id, 3);
    }
}
