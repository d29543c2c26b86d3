// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! DOM temperature decoding from a transceiver EEPROM image.
//!
//! The module temperature is a big-endian signed 16-bit value in units of
//! 1/256 degree Celsius. Its location depends on the management interface
//! announced by the identifier byte at offset 0.

/// Identifier byte values (SFF-8024).
const ID_SFP: u8 = 0x03;
const ID_QSFP: u8 = 0x0c;
const ID_QSFP_PLUS: u8 = 0x0d;
const ID_QSFP28: u8 = 0x11;
const ID_QSFP_DD: u8 = 0x18;
const ID_OSFP: u8 = 0x19;
const ID_QSFP_CMIS: u8 = 0x1e;

/// CMIS lower memory.
const CMIS_TEMP_OFFSET: usize = 14;
/// SFF-8636 lower page.
const SFF8636_TEMP_OFFSET: usize = 22;
/// SFF-8472 diagnostics live at A2h, exposed after the 256-byte A0h page.
const SFF8472_TEMP_OFFSET: usize = 256 + 96;
const SFF8472_DIAG_TYPE: usize = 92;
const SFF8472_DDM_IMPLEMENTED: u8 = 0x40;

/// Bytes that must be read to decode any supported module.
pub const EEPROM_READ_LEN: usize = SFF8472_TEMP_OFFSET + 2;

/// Management interface of a module, as far as temperature is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMap {
    Cmis,
    Sff8636,
    Sff8472,
}

impl MemoryMap {
    pub fn from_identifier(id: u8) -> Option<Self> {
        match id {
            ID_QSFP_DD | ID_OSFP | ID_QSFP_CMIS => Some(MemoryMap::Cmis),
            ID_QSFP | ID_QSFP_PLUS | ID_QSFP28 => Some(MemoryMap::Sff8636),
            ID_SFP => Some(MemoryMap::Sff8472),
            _ => None,
        }
    }

    fn temperature_offset(self) -> usize {
        match self {
            MemoryMap::Cmis => CMIS_TEMP_OFFSET,
            MemoryMap::Sff8636 => SFF8636_TEMP_OFFSET,
            MemoryMap::Sff8472 => SFF8472_TEMP_OFFSET,
        }
    }
}

/// Module temperature in millidegrees Celsius, or `None` when the image is
/// too short, the module type is unknown or it has no diagnostics.
pub fn module_temperature_mc(eeprom: &[u8]) -> Option<i32> {
    let map = MemoryMap::from_identifier(*eeprom.first()?)?;

    if map == MemoryMap::Sff8472 {
        let diag = *eeprom.get(SFF8472_DIAG_TYPE)?;
        if diag & SFF8472_DDM_IMPLEMENTED == 0 {
            return None;
        }
    }

    let offset = map.temperature_offset();
    let raw = i16::from_be_bytes([*eeprom.get(offset)?, *eeprom.get(offset + 1)?]);
    Some(i32::from(raw) * 1000 / 256)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: u8, offset: usize, raw: i16) -> Vec<u8> {
        let mut buf = vec![0u8; EEPROM_READ_LEN];
        buf[0] = id;
        buf[offset..offset + 2].copy_from_slice(&raw.to_be_bytes());
        buf
    }

    #[test]
    fn cmis_module_temperature() {
        // 45.5C = 45.5 * 256
        let buf = image(ID_QSFP_DD, CMIS_TEMP_OFFSET, 11648);
        assert_eq!(module_temperature_mc(&buf), Some(45500));
    }

    #[test]
    fn sff8636_module_temperature() {
        let buf = image(ID_QSFP28, SFF8636_TEMP_OFFSET, 30 * 256);
        assert_eq!(module_temperature_mc(&buf), Some(30000));
    }

    #[test]
    fn negative_temperature() {
        let buf = image(ID_OSFP, CMIS_TEMP_OFFSET, -5 * 256);
        assert_eq!(module_temperature_mc(&buf), Some(-5000));
    }

    #[test]
    fn sfp_requires_ddm() {
        let mut buf = image(ID_SFP, SFF8472_TEMP_OFFSET, 40 * 256);
        assert_eq!(module_temperature_mc(&buf), None);
        buf[SFF8472_DIAG_TYPE] = SFF8472_DDM_IMPLEMENTED;
        assert_eq!(module_temperature_mc(&buf), Some(40000));
    }

    #[test]
    fn unknown_or_short_image() {
        assert_eq!(module_temperature_mc(&[]), None);
        assert_eq!(module_temperature_mc(&[0x7f; 32]), None);
        assert_eq!(module_temperature_mc(&[ID_QSFP_DD, 0, 0]), None);
    }
}
