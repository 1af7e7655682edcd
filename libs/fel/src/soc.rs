//! Static per-SoC SRAM descriptions.
//!
//! The BROM keeps parts of SRAM live while FEL runs (its stacks, its
//! data). Before an SPL can be placed there, those regions have to be
//! stashed elsewhere and restored afterwards. Each supported SoC
//! carries a table of such swap regions plus the addresses where the
//! scratch stubs and the SPL-return thunk may be placed.

/// One SRAM region to exchange around SPL execution. `buf1` is the
/// BROM-live region whose bytes must survive; `buf2` is the backup
/// location they are stashed at while the SPL runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapBuffer {
    pub buf1: u32,
    pub buf2: u32,
    pub size: u32,
}

/// SRAM layout of one SoC variant.
#[derive(Debug)]
pub struct SocInfo {
    pub soc_id: u16,
    /// Where the SPL ends up. Absent on descriptors that cannot stage
    /// an SPL (the generic fallback); `spl`/`uboot` must refuse those.
    pub spl_addr: Option<u32>,
    /// A safe place to upload and run short code stubs.
    pub scratch_addr: u32,
    /// Placement and size cap for the FEL-to-SPL thunk.
    pub thunk_addr: u32,
    pub thunk_size: u32,
    /// Whether the L2 cache must be enabled by hand before the SPL.
    pub needs_l2en: bool,
    /// Sorted by `buf1`, non-overlapping.
    pub swap_buffers: &'static [SwapBuffer],
}

/*
 * The FEL code in the A10/A13/A20 BROM keeps two stacks in SRAM: one
 * at 0x2000 (growing down) for the IRQ handler and one at 0x7000 for
 * regular code. To hand the whole A1/A2 sections to the SPL, both are
 * moved out of the way, along with the somewhat suspicious area above
 * 0x7000, into section A3 at 0x8000.
 */
const A10_A13_A20_SWAP_BUFFERS: &[SwapBuffer] = &[
    SwapBuffer { buf1: 0x01800, buf2: 0x8000, size: 0x800 },
    SwapBuffer { buf1: 0x05C00, buf2: 0x8800, size: 0x8000 - 0x5C00 },
];

/*
 * The A31 family has no SRAM at 0x8000; the section at 0x44000
 * (normally shared with the OpenRISC core) serves as backup space
 * instead.
 */
const A31_SWAP_BUFFERS: &[SwapBuffer] = &[
    SwapBuffer { buf1: 0x01800, buf2: 0x44000, size: 0x800 },
    SwapBuffer { buf1: 0x05C00, buf2: 0x44800, size: 0x8000 - 0x5C00 },
];

pub const SOC_INFO_TABLE: &[SocInfo] = &[
    SocInfo {
        soc_id: 0x1623, // Allwinner A10
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0xAE00,
        thunk_size: 0x200,
        needs_l2en: true,
        swap_buffers: A10_A13_A20_SWAP_BUFFERS,
    },
    SocInfo {
        soc_id: 0x1625, // Allwinner A13
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0xAE00,
        thunk_size: 0x200,
        needs_l2en: true,
        swap_buffers: A10_A13_A20_SWAP_BUFFERS,
    },
    SocInfo {
        soc_id: 0x1651, // Allwinner A20
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0xAE00,
        thunk_size: 0x200,
        needs_l2en: false,
        swap_buffers: A10_A13_A20_SWAP_BUFFERS,
    },
    SocInfo {
        soc_id: 0x1650, // Allwinner A23
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0x46E00,
        thunk_size: 0x200,
        needs_l2en: false,
        swap_buffers: A31_SWAP_BUFFERS,
    },
    SocInfo {
        soc_id: 0x1633, // Allwinner A31
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0x46E00,
        thunk_size: 0x200,
        needs_l2en: false,
        swap_buffers: A31_SWAP_BUFFERS,
    },
    SocInfo {
        soc_id: 0x1667, // Allwinner A33
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0x46E00,
        thunk_size: 0x200,
        needs_l2en: false,
        swap_buffers: A31_SWAP_BUFFERS,
    },
    SocInfo {
        soc_id: 0x1673, // Allwinner A83T
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0x46E00,
        thunk_size: 0x200,
        needs_l2en: false,
        swap_buffers: A31_SWAP_BUFFERS,
    },
    SocInfo {
        soc_id: 0x1680, // Allwinner H3
        spl_addr: Some(0),
        scratch_addr: 0x2000,
        thunk_addr: 0x46E00,
        thunk_size: 0x200,
        needs_l2en: false,
        swap_buffers: A31_SWAP_BUFFERS,
    },
];

/*
 * Conservative guess for BROMs similar to the A10..A31 generation but
 * with no extra SRAM past 0x8000, assuming the IRQ stack never grows
 * beyond 0x400 bytes. It cannot stage an SPL (no known SPL address);
 * it exists so that plain read/write/execute keep working on unknown
 * chips.
 */
pub const GENERIC_SOC_INFO: SocInfo = SocInfo {
    soc_id: 0,
    spl_addr: None,
    scratch_addr: 0x2000,
    thunk_addr: 0x5680,
    thunk_size: 0x180,
    needs_l2en: false,
    swap_buffers: &[SwapBuffer { buf1: 0x1C00, buf2: 0x5800, size: 0x400 }],
};

/// Look a SoC up by its effective id, falling back to the generic
/// descriptor (with a warning) for chips not in the table.
pub fn lookup(soc_id: u16) -> &'static SocInfo {
    match SOC_INFO_TABLE.iter().find(|soc| soc.soc_id == soc_id) {
        Some(soc) => soc,
        None => {
            log::warn!(
                "no SRAM description for SoC id {:#06x}, using the generic fallback",
                soc_id
            );
            &GENERIC_SOC_INFO
        }
    }
}

/// Marketing name of a SoC id, for the version report.
pub fn soc_name(soc_id: u16) -> Option<&'static str> {
    match soc_id {
        0x1623 => Some("A10"),
        0x1625 => Some("A13"),
        0x1633 => Some("A31"),
        0x1639 => Some("A80"),
        0x1650 => Some("A23"),
        0x1651 => Some("A20"),
        0x1667 => Some("A33"),
        0x1673 => Some("A83T"),
        0x1680 => Some("H3"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_swap_buffers(swap_buffers: &[SwapBuffer]) {
        for pair in swap_buffers.windows(2) {
            assert!(pair[0].buf1 < pair[1].buf1, "not sorted by buf1");
            assert!(
                pair[0].buf1 + pair[0].size <= pair[1].buf1,
                "regions overlap: {:x?}",
                pair
            );
        }
        for swap in swap_buffers {
            assert!(swap.size > 0, "empty swap region {:x?}", swap);
            assert!(swap.size % 4 == 0, "unaligned swap region {:x?}", swap);
        }
    }

    #[test]
    fn tables_are_sorted_and_disjoint() {
        for soc in SOC_INFO_TABLE {
            check_swap_buffers(soc.swap_buffers);
        }
        check_swap_buffers(GENERIC_SOC_INFO.swap_buffers);
    }

    #[test]
    fn tabled_socs_support_spl() {
        for soc in SOC_INFO_TABLE {
            assert!(soc.spl_addr.is_some(), "{:#06x} lost its SPL address", soc.soc_id);
            assert!(soc.thunk_size > 0);
        }
        assert!(GENERIC_SOC_INFO.spl_addr.is_none());
    }

    #[test]
    fn lookup_known_and_fallback() {
        assert_eq!(lookup(0x1651).soc_id, 0x1651);
        assert!(!lookup(0x1651).needs_l2en);
        assert!(lookup(0x1623).needs_l2en);
        // A80 has a name but no SRAM description
        assert_eq!(soc_name(0x1639), Some("A80"));
        assert!(lookup(0x1639).spl_addr.is_none());
        assert_eq!(soc_name(0xffff), None);
    }
}
