//! Injected ARM code, kept as data.
//!
//! Every stub here is position-independent ARM code. The BROM invokes
//! uploaded code with a BL, so each stub must end in `bx lr` — that is
//! what gets the FEL status record posted and control back to the
//! host. Stubs that produce results store them at fixed offsets
//! relative to the start of their own instruction stream; the host
//! reads them back from `scratch_addr + offset`.
//!
//! The words are stored host-endian and converted to little-endian
//! when they are written to the device.

/// Sets the L2EN bit (bit 1) of the CP15 auxiliary control register.
/// No result.
pub const ENABLE_L2_CACHE: &[u32] = &[
    0xee11_2f30, // mrc 15, 0, r2, cr1, cr0, {1}
    0xe382_2002, // orr r2, r2, #2
    0xee01_2f30, // mcr 15, 0, r2, cr1, cr0, {1}
    0xe12f_ff1e, // bx  lr
];

/// Samples the IRQ-mode and regular stack pointers by briefly
/// switching CPSR modes. Works on every core, unlike an `mrs r0,
/// SP_irq`, which needs the virtualization extensions. Results: two
/// words at [`STACK_RESULT_OFFSET`], `sp_irq` then `sp`.
pub const SAMPLE_STACK_POINTERS: &[u32] = &[
    0xe10f_0000, // mrs r0, CPSR
    0xe3c0_101f, // bic r1, r0, #31
    0xe381_1012, // orr r1, r1, #18
    0xe121_f001, // msr CPSR_c, r1
    0xe1a0_100d, // mov r1, sp
    0xe121_f000, // msr CPSR_c, r0
    0xe58f_1004, // str r1, [pc, #4]
    0xe58f_d004, // str sp, [pc, #4]
    0xe12f_ff1e, // bx  lr
];

pub const STACK_RESULT_OFFSET: u32 = 0x24;

/// Reads TTBR0. Result: one word at [`REG_RESULT_OFFSET`].
pub const READ_TTBR0: &[u32] = &[
    0xee12_2f10, // mrc 15, 0, r2, cr2, cr0, {0}
    0xe58f_2008, // str r2, [pc, #8]
    0xe12f_ff1e, // bx  lr
];

/// Reads SCTLR. Result: one word at [`REG_RESULT_OFFSET`].
pub const READ_SCTLR: &[u32] = &[
    0xee11_2f10, // mrc 15, 0, r2, cr1, cr0, {0}
    0xe58f_2008, // str r2, [pc, #8]
    0xe12f_ff1e, // bx  lr
];

pub const REG_RESULT_OFFSET: u32 = 0x14;

/// Disables the I-cache, the MMU and branch prediction. No result.
pub const DISABLE_MMU: &[u32] = &[
    0xee11_0f10, // mrc 15, 0, r0, cr1, cr0, {0}
    0xe3c0_0001, // bic r0, r0, #1
    0xe3c0_0a01, // bic r0, r0, #4096
    0xe3c0_0b02, // bic r0, r0, #2048
    0xee01_0f10, // mcr 15, 0, r0, cr1, cr0, {0}
    0xe12f_ff1e, // bx  lr
];

/// Invalidates I-cache, TLB and BTB, then re-enables the I-cache, the
/// MMU and branch prediction. No result.
pub const ENABLE_MMU: &[u32] = &[
    0xe3a0_0000, // mov r0, #0
    0xee08_0f17, // mcr 15, 0, r0, cr8, cr7, {0}   (TLBIALL)
    0xee07_0f15, // mcr 15, 0, r0, cr7, cr5, {0}   (ICIALLU)
    0xee07_0fd5, // mcr 15, 0, r0, cr7, cr5, {6}   (BPIALL)
    0xf57f_f04f, // dsb sy
    0xf57f_f06f, // isb sy
    0xee11_0f10, // mrc 15, 0, r0, cr1, cr0, {0}
    0xe380_0001, // orr r0, r0, #1
    0xe380_0a01, // orr r0, r0, #4096
    0xe380_0b02, // orr r0, r0, #2048
    0xee01_0f10, // mcr 15, 0, r0, cr1, cr0, {0}
    0xe12f_ff1e, // bx  lr
];

/// The FEL-to-SPL thunk. Expects a parameter block appended directly
/// after the code: one word with the SPL entry address, then the swap
/// triples `(buf1, buf2, size)`, terminated by an all-zero triple.
///
/// On the device it exchanges every `buf1`/`buf2` pair, calls the SPL,
/// exchanges the pairs back once the SPL returns, and finally returns
/// to its own caller in the BROM. The saved registers live on the
/// BROM stack, which itself sits inside a swap region; they are
/// stashed by the first exchange and back in place before the pop.
pub const FEL_TO_SPL_THUNK: &[u32] = &[
    0xe92d_40f0, // push  {r4-r7, lr}
    0xeb00_0004, // bl    <swap>
    0xe28f_003c, // adr   r0, <params>
    0xe590_0000, // ldr   r0, [r0]
    0xe12f_ff30, // blx   r0
    0xeb00_0000, // bl    <swap>
    0xe8bd_80f0, // pop   {r4-r7, pc}
    // swap:
    0xe28f_1028, // adr   r1, <params>
    0xe281_1004, // add   r1, r1, #4
    // next:
    0xe8b1_001c, // ldmia r1!, {r2, r3, r4}
    0xe354_0000, // cmp   r4, #0
    0x012f_ff1e, // bxeq  lr
    // word:
    0xe592_5000, // ldr   r5, [r2]
    0xe593_6000, // ldr   r6, [r3]
    0xe482_6004, // str   r6, [r2], #4
    0xe483_5004, // str   r5, [r3], #4
    0xe254_4004, // subs  r4, r4, #4
    0x1aff_fff9, // bne   <word>
    0xeaff_fff5, // b     <next>
    // params: appended by the host
];
