//! MMU and cache discipline around SPL execution.
//!
//! The A10-generation BROMs run FEL with the MMU on, behind a flat
//! 1:1 section mapping. The SPL must be entered with the MMU off, and
//! once DRAM is up the table is put back with a write-combine mapping
//! over DRAM so the bulk U-Boot upload is not crawling through
//! strongly-ordered memory.

use crate::device::FelDevice;
use crate::error::{Error, Result};
use crate::stubs;
use crate::transport::Transport;

pub const DRAM_BASE: u32 = 0x4000_0000;
pub const DRAM_SIZE: u32 = 0x8000_0000;

const SECTION_COUNT: usize = 4096;
const TABLE_BYTES: usize = SECTION_COUNT * 4;

/// The BROM's first-level translation table, decoded to host words,
/// plus the TTBR0 base it was read from.
pub struct TranslationTable {
    base: u32,
    entries: Vec<u32>,
}

/// Sample the IRQ-mode and supervisor stack pointers.
pub fn stack_pointers<T: Transport>(device: &mut FelDevice<T>) -> Result<(u32, u32)> {
    let scratch = device.soc().scratch_addr;
    device.exec_stub(stubs::SAMPLE_STACK_POINTERS)?;
    let mut raw = [0u8; 8];
    device.read(scratch + stubs::STACK_RESULT_OFFSET, &mut raw)?;
    let sp_irq = u32::from_le_bytes(raw[0..4].try_into().unwrap());
    let sp = u32::from_le_bytes(raw[4..8].try_into().unwrap());
    Ok((sp_irq, sp))
}

fn read_ttbr0<T: Transport>(device: &mut FelDevice<T>) -> Result<u32> {
    let scratch = device.soc().scratch_addr;
    device.exec_stub(stubs::READ_TTBR0)?;
    device.read_u32(scratch + stubs::REG_RESULT_OFFSET)
}

fn read_sctlr<T: Transport>(device: &mut FelDevice<T>) -> Result<u32> {
    let scratch = device.soc().scratch_addr;
    device.exec_stub(stubs::READ_SCTLR)?;
    device.read_u32(scratch + stubs::REG_RESULT_OFFSET)
}

/// Capture the BROM's translation table and turn the MMU off.
///
/// Returns `None` when the BROM never enabled the MMU (nothing to
/// restore later). Anything unexpected about the table — TEX remap
/// active, a misaligned TTBR0, an entry that is not a flat section
/// mapping — is fatal rather than worked around.
pub fn backup_and_disable<T: Transport>(
    device: &mut FelDevice<T>,
) -> Result<Option<TranslationTable>> {
    let sctlr = read_sctlr(device)?;
    if sctlr & 1 == 0 {
        log::info!("MMU is not enabled by BROM");
        return Ok(None);
    }
    if (sctlr >> 28) & 1 != 0 {
        return Err(Error::TexRemapEnabled);
    }

    let base = read_ttbr0(device)?;
    if base & 0x3FFF != 0 {
        return Err(Error::MisalignedTranslationTable(base));
    }

    log::info!("reading the MMU translation table from {:#010x}", base);
    let mut raw = vec![0u8; TABLE_BYTES];
    device.read(base, &mut raw)?;
    let entries: Vec<u32> = raw
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes(word.try_into().unwrap()))
        .collect();

    for (index, &entry) in entries.iter().enumerate() {
        let index = index as u32;
        if (entry >> 1) & 1 != 1 || (entry >> 18) & 1 != 0 {
            return Err(Error::NotSectionDescriptor { index, entry });
        }
        if entry >> 20 != index {
            return Err(Error::NotIdentityMapping { index, entry });
        }
    }

    log::info!("disabling I-cache, MMU and branch prediction");
    device.exec_stub(stubs::DISABLE_MMU)?;
    Ok(Some(TranslationTable { base, entries }))
}

/// Put a captured translation table back, with DRAM switched to a
/// write-combine-friendly mapping and the BROM section cacheable, and
/// re-enable the MMU.
pub fn restore_and_enable<T: Transport>(
    device: &mut FelDevice<T>,
    mut table: TranslationTable,
) -> Result<()> {
    const TEXCB_MASK: u32 = (7 << 12) | (1 << 3) | (1 << 2);

    log::info!("setting write-combine mapping for DRAM");
    for section in (DRAM_BASE >> 20)..((DRAM_BASE + DRAM_SIZE) >> 20) {
        // TEXCB = 00100, normal uncached
        let entry = &mut table.entries[section as usize];
        *entry &= !TEXCB_MASK;
        *entry |= 1 << 12;
    }

    log::info!("setting cached mapping for BROM");
    // TEXCB = 00111, normal write-back
    table.entries[0xFFF] &= !TEXCB_MASK;
    table.entries[0xFFF] |= (1 << 12) | (1 << 3) | (1 << 2);

    log::info!("writing back the MMU translation table");
    let mut raw = Vec::with_capacity(TABLE_BYTES);
    for entry in &table.entries {
        raw.extend_from_slice(&entry.to_le_bytes());
    }
    device.write(table.base, &raw)?;

    log::info!("enabling I-cache, MMU and branch prediction");
    device.exec_stub(stubs::ENABLE_MMU)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_table() -> TranslationTable {
        TranslationTable {
            base: 0x8000,
            entries: (0..SECTION_COUNT as u32).map(|i| (i << 20) | 0b10 | (3 << 10)).collect(),
        }
    }

    #[test]
    fn identity_table_passes_validation() {
        for (index, &entry) in identity_table().entries.iter().enumerate() {
            assert_eq!((entry >> 1) & 1, 1);
            assert_eq!((entry >> 18) & 1, 0);
            assert_eq!(entry >> 20, index as u32);
        }
    }

    #[test]
    fn dram_sections_become_write_combine() {
        let mut table = identity_table();
        const TEXCB_MASK: u32 = (7 << 12) | (1 << 3) | (1 << 2);
        // replicate the rewrite without a device
        for section in (DRAM_BASE >> 20)..((DRAM_BASE + DRAM_SIZE) >> 20) {
            let entry = &mut table.entries[section as usize];
            *entry &= !TEXCB_MASK;
            *entry |= 1 << 12;
        }
        assert_eq!(table.entries[0x400] & TEXCB_MASK, 1 << 12);
        assert_eq!(table.entries[0xBFF] & TEXCB_MASK, 1 << 12);
        // sections outside DRAM keep their attributes
        assert_eq!(table.entries[0x3FF] & TEXCB_MASK, 0);
    }
}
