//! SPL staging: eGON validation, the swap-buffer walk, the thunk.
//!
//! The SPL wants to sit at the very bottom of SRAM, which is exactly
//! where the BROM keeps its own live data. The walk below routes the
//! colliding portions of the image to per-SoC backup locations; the
//! thunk then runs on the device, exchanges the regions, calls the
//! SPL, exchanges them back and returns to FEL.

use std::time::Duration;

use crate::device::FelDevice;
use crate::error::{Error, Result};
use crate::mmu;
use crate::soc::SwapBuffer;
use crate::stubs;
use crate::transport::Transport;

/// Maximum SPL size, and at the same time the offset of the main
/// U-Boot image inside a combined `u-boot-sunxi-with-spl.bin`.
pub const SPL_LEN_LIMIT: u32 = 0x8000;

/// eGON stamp: the stored checksum satisfies
/// `2 * stored == STAMP_VALUE + sum of all image words (mod 2^32)`.
const STAMP_VALUE: u32 = 0x5F0A_6C39;

const EGON_MAGIC: &[u8; 8] = b"eGON.BT0";
/// Written over the eGON magic by an SPL that came back cleanly.
const EGON_DONE_MAGIC: &[u8; 8] = b"eGON.FEL";

/// Marks the "sunxi" SPL header variant that reserves fields for
/// passing information to U-Boot.
const SPL_SIGNATURE: &[u8; 3] = b"SPL";
const SPL_MIN_VERSION: u8 = 1;
const SPL_MAX_VERSION: u8 = 1;

/// Pause between the thunk returning and the next USB transfer. The
/// BROM needs a moment to get back into its FEL loop; a transfer
/// issued immediately races the device-side completion and kills the
/// session.
pub const SPL_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Validate the eGON header and checksum; returns the image body
/// truncated to the header's length field.
fn checked_spl(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 32 || &data[4..12] != EGON_MAGIC {
        return Err(Error::EgonHeaderMissing);
    }
    let stored = u32::from_le_bytes(data[12..16].try_into().unwrap());
    let length = u32::from_le_bytes(data[16..20].try_into().unwrap());
    if length as usize > data.len() || length % 4 != 0 {
        return Err(Error::EgonBadLength(length));
    }
    let body = &data[..length as usize];
    let mut sum = 0u32;
    for word in body.chunks_exact(4) {
        sum = sum.wrapping_add(u32::from_le_bytes(word.try_into().unwrap()));
    }
    if stored.wrapping_mul(2) != STAMP_VALUE.wrapping_add(sum) {
        return Err(Error::EgonChecksum);
    }
    Ok(body)
}

/// One planned transfer: `data[start..end]` goes to `addr`.
#[derive(Debug, PartialEq, Eq)]
struct StageWrite {
    addr: u32,
    start: usize,
    end: usize,
}

struct StagePlan {
    writes: Vec<StageWrite>,
    /// How large the SPL may actually be, after shrinking the generic
    /// limit so the image overruns neither its own backup stash nor
    /// the thunk.
    len_limit: u32,
}

/// Walk the sorted swap regions and lay the image out around them:
/// linear stretches land at their natural address, stretches that
/// would cover a BROM-live region are redirected to its backup
/// location (the thunk exchanges them into place later).
fn plan_stage(spl_addr: u32, swap_buffers: &[SwapBuffer], spl_len: u32, thunk_addr: u32) -> StagePlan {
    let len = spl_len as usize;
    let mut len_limit = SPL_LEN_LIMIT;
    let mut cur_addr = spl_addr;
    let mut offset = 0usize;
    let mut writes = Vec::new();

    for swap in swap_buffers {
        if swap.buf2 >= spl_addr && swap.buf2 < spl_addr + len_limit {
            len_limit = swap.buf2 - spl_addr;
        }
        if offset < len && cur_addr < swap.buf1 {
            let take = ((swap.buf1 - cur_addr) as usize).min(len - offset);
            writes.push(StageWrite { addr: cur_addr, start: offset, end: offset + take });
            cur_addr += take as u32;
            offset += take;
        }
        if offset < len && cur_addr == swap.buf1 {
            let take = (swap.size as usize).min(len - offset);
            writes.push(StageWrite { addr: swap.buf2, start: offset, end: offset + take });
            cur_addr += take as u32;
            offset += take;
        }
    }

    len_limit = len_limit.min(thunk_addr - spl_addr);

    if offset < len {
        writes.push(StageWrite { addr: cur_addr, start: offset, end: len });
    }

    StagePlan { writes, len_limit }
}

/// Serialize the thunk: code, the SPL entry address, then the swap
/// triples with the all-zero terminator the device-side loop stops on.
fn build_thunk(spl_addr: u32, swap_buffers: &[SwapBuffer], thunk_size: u32) -> Result<Vec<u8>> {
    let words = stubs::FEL_TO_SPL_THUNK.len() + 1 + (swap_buffers.len() + 1) * 3;
    if words * 4 > thunk_size as usize {
        return Err(Error::ThunkTooLarge { need: words * 4, have: thunk_size as usize });
    }
    let mut thunk = Vec::with_capacity(words * 4);
    for word in stubs::FEL_TO_SPL_THUNK {
        thunk.extend_from_slice(&word.to_le_bytes());
    }
    thunk.extend_from_slice(&spl_addr.to_le_bytes());
    for swap in swap_buffers {
        thunk.extend_from_slice(&swap.buf1.to_le_bytes());
        thunk.extend_from_slice(&swap.buf2.to_le_bytes());
        thunk.extend_from_slice(&swap.size.to_le_bytes());
    }
    thunk.extend_from_slice(&[0u8; 12]);
    Ok(thunk)
}

impl<T: Transport> FelDevice<T> {
    /// Load an eGON-signed SPL into SRAM and run it through the thunk.
    ///
    /// On success the SPL has initialized DRAM, rewritten its header
    /// magic to `eGON.FEL` and handed control back to the BROM; if the
    /// BROM had the MMU on, it is back on with DRAM mapped
    /// write-combine.
    pub fn load_and_exec_spl(&mut self, data: &[u8]) -> Result<()> {
        let soc = self.soc();
        let spl_addr = soc.spl_addr.ok_or(Error::SplNotSupported(soc.soc_id))?;

        let body = checked_spl(data)?;
        let spl_len = body.len() as u32;

        if soc.needs_l2en {
            log::info!("enabling the L2 cache");
            self.exec_stub(stubs::ENABLE_L2_CACHE)?;
        }

        let (sp_irq, sp) = mmu::stack_pointers(self)?;
        log::info!("stack pointers: sp_irq={:#010x}, sp={:#010x}", sp_irq, sp);

        let table = mmu::backup_and_disable(self)?;

        let plan = plan_stage(spl_addr, soc.swap_buffers, spl_len, soc.thunk_addr);
        if spl_len > plan.len_limit {
            return Err(Error::SplTooLarge { need: spl_len, have: plan.len_limit });
        }
        for write in &plan.writes {
            self.write(write.addr, &body[write.start..write.end])?;
        }

        let thunk = build_thunk(spl_addr, soc.swap_buffers, soc.thunk_size)?;
        log::info!("executing the SPL");
        self.write(soc.thunk_addr, &thunk)?;
        self.execute(soc.thunk_addr)?;
        std::thread::sleep(SPL_SETTLE_DELAY);

        // a clean SPL exit rewrites its own header magic
        let mut signature = [0u8; 8];
        self.read(spl_addr + 4, &mut signature)?;
        if &signature != EGON_DONE_MAGIC {
            return Err(Error::SplFailure(signature));
        }

        if let Some(table) = table {
            mmu::restore_and_enable(self, table)?;
        }
        Ok(())
    }

    /// Whether the SPL currently in SRAM carries the "sunxi" header
    /// variant (at a supported version), i.e. whether there are header
    /// fields we may use to pass information to U-Boot. A plain
    /// Allwinner boot0 has no such fields.
    pub fn have_sunxi_spl(&mut self) -> Result<bool> {
        let spl_addr = match self.soc().spl_addr {
            Some(addr) => addr,
            None => return Ok(false),
        };
        let mut signature = [0u8; 4];
        self.read(spl_addr + 0x14, &mut signature)?;
        if &signature[0..3] != SPL_SIGNATURE {
            return Ok(false);
        }
        let version = signature[3];
        if version < SPL_MIN_VERSION {
            log::warn!(
                "sunxi SPL version {:#04x} is older than {:#04x}; update U-Boot (mksunxiboot)",
                version,
                SPL_MIN_VERSION
            );
            return Ok(false);
        }
        if version > SPL_MAX_VERSION {
            log::warn!(
                "sunxi SPL version {:#04x} is newer than the supported {:#04x}; update this tool",
                version,
                SPL_MAX_VERSION
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Store a boot-script DRAM address in the sunxi SPL header for
    /// U-Boot to pick up. A no-op when no suitable header is present.
    pub fn pass_fel_information(&mut self, script_addr: u32) -> Result<()> {
        let spl_addr = match self.soc().spl_addr {
            Some(addr) => addr,
            None => return Ok(()),
        };
        if self.have_sunxi_spl()? {
            log::info!("passing boot info via sunxi SPL: script address {:#010x}", script_addr);
            self.write(spl_addr + 0x18, &script_addr.to_le_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::a20_device;
    use crate::transport::testing::MockTransport;

    /// Build a checksum-correct eGON image of `len` bytes (multiple of
    /// four, at least 32), with the header length field set to `len`.
    pub(crate) fn egon_image(len: usize) -> Vec<u8> {
        assert!(len >= 32 && len % 4 == 0);
        let mut image = vec![0u8; len];
        image[0..4].copy_from_slice(&0xea00_0016u32.to_le_bytes()); // b <reset>
        image[4..12].copy_from_slice(EGON_MAGIC);
        image[16..20].copy_from_slice(&(len as u32).to_le_bytes());
        for (index, word) in image[20..].chunks_exact_mut(4).enumerate() {
            word.copy_from_slice(&(index as u32).to_le_bytes());
        }
        // solve for the stored checksum: stored = STAMP + sum of the
        // other words
        let mut sum = 0u32;
        for word in image.chunks_exact(4) {
            sum = sum.wrapping_add(u32::from_le_bytes(word.try_into().unwrap()));
        }
        let stored = STAMP_VALUE.wrapping_add(sum);
        image[12..16].copy_from_slice(&stored.to_le_bytes());
        image
    }

    fn push_write_ok(mock: &mut MockTransport) {
        mock.push_awus();
        mock.push_awus();
        mock.push_status();
        mock.push_awus();
    }

    fn push_exec_ok(mock: &mut MockTransport) {
        mock.push_awus();
        mock.push_status();
        mock.push_awus();
    }

    fn push_read_ok(mock: &mut MockTransport, data: &[u8]) {
        mock.push_awus();
        mock.push_data(data);
        mock.push_awus();
        mock.push_status();
        mock.push_awus();
    }

    #[test]
    fn checksum_accepts_and_rejects() {
        let image = egon_image(64);
        assert!(checked_spl(&image).is_ok());

        // flipping any byte outside the checksum field fails
        let mut corrupt = image.clone();
        corrupt[20] ^= 1;
        assert!(matches!(checked_spl(&corrupt), Err(Error::EgonChecksum)));

        let mut corrupt = image.clone();
        corrupt[63] ^= 0x80;
        assert!(matches!(checked_spl(&corrupt), Err(Error::EgonChecksum)));

        // trailing garbage past the header length is ignored
        let mut padded = image;
        padded.extend_from_slice(&[0xFF; 8]);
        assert_eq!(checked_spl(&padded).unwrap().len(), 64);
    }

    #[test]
    fn header_validation() {
        assert!(matches!(checked_spl(&[0u8; 16]), Err(Error::EgonHeaderMissing)));

        let mut image = egon_image(64);
        image[4] = b'x';
        assert!(matches!(checked_spl(&image), Err(Error::EgonHeaderMissing)));

        // length larger than the buffer
        let mut image = egon_image(64);
        image[16..20].copy_from_slice(&128u32.to_le_bytes());
        assert!(matches!(checked_spl(&image), Err(Error::EgonBadLength(128))));

        // length not a word multiple
        let mut image = egon_image(64);
        image[16..20].copy_from_slice(&63u32.to_le_bytes());
        assert!(matches!(checked_spl(&image), Err(Error::EgonBadLength(63))));
    }

    #[test]
    fn staging_walks_around_swap_regions() {
        // A10/A13/A20 layout: stacks at 0x1800 and 0x5C00 are stashed
        // in section A3
        let swap = &[
            SwapBuffer { buf1: 0x1800, buf2: 0x8000, size: 0x800 },
            SwapBuffer { buf1: 0x5C00, buf2: 0x8800, size: 0x2400 },
        ];

        // a 24 KiB SPL ends inside the second swap region
        let plan = plan_stage(0, swap, 0x6000, 0xAE00);
        assert_eq!(
            plan.writes,
            vec![
                StageWrite { addr: 0x0000, start: 0x0000, end: 0x1800 },
                StageWrite { addr: 0x8000, start: 0x1800, end: 0x2000 },
                StageWrite { addr: 0x2000, start: 0x2000, end: 0x5C00 },
                StageWrite { addr: 0x8800, start: 0x5C00, end: 0x6000 },
            ]
        );
        assert_eq!(plan.len_limit, 0x8000);

        // a full 32 KiB SPL exactly fills the staging area
        let plan = plan_stage(0, swap, 0x8000, 0xAE00);
        assert_eq!(
            plan.writes,
            vec![
                StageWrite { addr: 0x0000, start: 0x0000, end: 0x1800 },
                StageWrite { addr: 0x8000, start: 0x1800, end: 0x2000 },
                StageWrite { addr: 0x2000, start: 0x2000, end: 0x5C00 },
                StageWrite { addr: 0x8800, start: 0x5C00, end: 0x8000 },
            ]
        );

        // a tiny SPL never reaches the second region
        let plan = plan_stage(0, swap, 0x1000, 0xAE00);
        assert_eq!(plan.writes, vec![StageWrite { addr: 0, start: 0, end: 0x1000 }]);
    }

    #[test]
    fn staging_limit_shrinks_for_stash_and_thunk() {
        // a backup location inside the SPL window caps the image below
        // that location
        let swap = &[SwapBuffer { buf1: 0x1C00, buf2: 0x5800, size: 0x400 }];
        let plan = plan_stage(0, swap, 0x1000, 0x5680);
        assert_eq!(plan.len_limit, 0x5680); // thunk is the tighter cap

        let plan = plan_stage(0x1000, swap, 0x1000, 0x7000);
        assert_eq!(plan.len_limit, 0x5800 - 0x1000);
    }

    #[test]
    fn thunk_blob_layout() {
        let swap = &[SwapBuffer { buf1: 0x1800, buf2: 0x8000, size: 0x800 }];
        let thunk = build_thunk(0, swap, 0x200).unwrap();
        let code_len = stubs::FEL_TO_SPL_THUNK.len() * 4;
        assert_eq!(thunk.len(), code_len + 4 + 2 * 12);
        assert_eq!(
            u32::from_le_bytes(thunk[0..4].try_into().unwrap()),
            stubs::FEL_TO_SPL_THUNK[0]
        );
        // parameter block: SPL address, the triple, the terminator
        assert_eq!(&thunk[code_len..code_len + 4], &[0, 0, 0, 0]);
        let triple = &thunk[code_len + 4..code_len + 16];
        assert_eq!(u32::from_le_bytes(triple[0..4].try_into().unwrap()), 0x1800);
        assert_eq!(u32::from_le_bytes(triple[4..8].try_into().unwrap()), 0x8000);
        assert_eq!(u32::from_le_bytes(triple[8..12].try_into().unwrap()), 0x800);
        assert_eq!(&thunk[code_len + 16..], &[0u8; 12]);

        // an undersized thunk window is refused
        assert!(matches!(
            build_thunk(0, swap, 0x40),
            Err(Error::ThunkTooLarge { .. })
        ));
    }

    #[test]
    fn load_and_exec_spl_happy_path() {
        let mut device = a20_device();
        let image = egon_image(64);

        let mock = device.mock();
        // stack sample stub: upload, run, read the two words back
        push_write_ok(mock);
        push_exec_ok(mock);
        push_read_ok(mock, &[0x00, 0x20, 0x00, 0x00, 0x00, 0x70, 0x00, 0x00]);
        // SCTLR probe reports the MMU off, so no table backup follows
        push_write_ok(mock);
        push_exec_ok(mock);
        push_read_ok(mock, &0u32.to_le_bytes());
        // one staged write (the image is tiny), thunk upload, exec
        push_write_ok(mock);
        push_write_ok(mock);
        push_exec_ok(mock);
        // the SPL reports a clean exit
        push_read_ok(mock, EGON_DONE_MAGIC);

        device.load_and_exec_spl(&image).unwrap();
        assert!(device.mock().replies.is_empty(), "unconsumed replies");
    }

    #[test]
    fn spl_failure_code_is_surfaced() {
        let mut device = a20_device();
        let image = egon_image(64);

        let mock = device.mock();
        push_write_ok(mock);
        push_exec_ok(mock);
        push_read_ok(mock, &[0u8; 8]);
        push_write_ok(mock);
        push_exec_ok(mock);
        push_read_ok(mock, &0u32.to_le_bytes());
        push_write_ok(mock);
        push_write_ok(mock);
        push_exec_ok(mock);
        // still the entry magic: the SPL never came back
        push_read_ok(mock, b"eGON.BT0");

        let err = device.load_and_exec_spl(&image).unwrap_err();
        assert!(matches!(err, Error::SplFailure(code) if &code == b"eGON.BT0"));
    }

    #[test]
    fn oversize_spl_is_refused_before_any_write() {
        let mut device = a20_device();
        // valid image, but larger than the 32 KiB window
        let image = egon_image(0x9000);

        let mock = device.mock();
        push_write_ok(mock);
        push_exec_ok(mock);
        push_read_ok(mock, &[0u8; 8]);
        push_write_ok(mock);
        push_exec_ok(mock);
        push_read_ok(mock, &0u32.to_le_bytes());

        let err = device.load_and_exec_spl(&image).unwrap_err();
        assert!(matches!(err, Error::SplTooLarge { need: 0x9000, have: 0x8000 }));
        // only the probe replies were scripted: had any byte of the
        // image been staged, the mock would have hit an unscripted recv
        assert!(device.mock().replies.is_empty());
    }

    #[test]
    fn generic_soc_refuses_spl() {
        let mut mock = MockTransport::new();
        mock.push_awus();
        mock.push_data(&crate::device::tests::version_reply(0x0099_9900));
        mock.push_awus();
        mock.push_status();
        mock.push_awus();
        let mut device = FelDevice::with_transport(mock).unwrap();
        assert!(device.soc().spl_addr.is_none());

        let err = device.load_and_exec_spl(&egon_image(64)).unwrap_err();
        assert!(matches!(err, Error::SplNotSupported(0x9999)));
    }

    #[test]
    fn sunxi_spl_side_channel() {
        let mut device = a20_device();

        // "SPL" signature, version 1: supported
        push_read_ok(device.mock(), b"SPL\x01");
        assert!(device.have_sunxi_spl().unwrap());

        // plain boot0: no side channel
        push_read_ok(device.mock(), b"\0\0\0\0");
        assert!(!device.have_sunxi_spl().unwrap());

        // unsupported version: reported and treated as absent
        push_read_ok(device.mock(), b"SPL\x02");
        assert!(!device.have_sunxi_spl().unwrap());

        // pass_fel_information writes the script address at +0x18
        push_read_ok(device.mock(), b"SPL\x01");
        push_write_ok(device.mock());
        device.pass_fel_information(0x4310_0000).unwrap();
        let sent = &device.mock().sent;
        let request = &sent[sent.len() - 4];
        assert_eq!(u32::from_le_bytes(request[0..4].try_into().unwrap()), 0x101);
        assert_eq!(u32::from_le_bytes(request[4..8].try_into().unwrap()), 0x18);
        assert_eq!(sent[sent.len() - 2], 0x4310_0000u32.to_le_bytes().to_vec());
    }
}
