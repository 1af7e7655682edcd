use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while driving a FEL-mode device.
///
/// Roughly grouped: USB transport failures, protocol-level surprises
/// (bad headers, bad signatures), configuration problems (a SoC or an
/// MMU state we cannot work with) and the U-Boot overwrite interlock.
/// None of these are recoverable; callers are expected to abort the
/// session.
#[derive(Debug, Error)]
pub enum Error {
    // --- transport ---
    #[error("usb transfer failed: {0}")]
    Usb(#[from] rusb::Error),

    #[error("no Allwinner FEL device found (vendor 1f3a, product efe8)")]
    DeviceNotFound,

    #[error("FEL interface has no bulk {0} endpoint")]
    MissingEndpoint(&'static str),

    #[error("bad response envelope {0:02x?}, expected \"AWUS\"")]
    BadResponseEnvelope([u8; 4]),

    // --- protocol ---
    #[error("eGON header not found")]
    EgonHeaderMissing,

    #[error("bad length {0:#x} in the eGON header")]
    EgonBadLength(u32),

    #[error("eGON checksum check failed")]
    EgonChecksum,

    #[error("SPL did not return to FEL, failure code {0:02x?}")]
    SplFailure([u8; 8]),

    #[error("invalid U-Boot image: bad size or signature")]
    ImageInvalid,

    #[error("invalid U-Boot image: wrong architecture")]
    ImageArchMismatch,

    #[error("U-Boot image type mismatch: expected firmware (0x05), got {0:#04x}")]
    ImageTypeMismatch(u8),

    #[error("U-Boot image data size mismatch: header says {header}, file carries {actual}")]
    ImageSizeMismatch { header: u32, actual: u32 },

    // --- configuration ---
    #[error("SPL loading is not supported on this SoC (id {0:#06x})")]
    SplNotSupported(u16),

    #[error("TEX remap is enabled")]
    TexRemapEnabled,

    #[error("unexpected TTBR0 {0:#010x}, translation table must be 16 KiB aligned")]
    MisalignedTranslationTable(u32),

    #[error("MMU entry {index:#x} ({entry:#010x}) is not a section descriptor")]
    NotSectionDescriptor { index: u32, entry: u32 },

    #[error("MMU entry {index:#x} ({entry:#010x}) is not an identity mapping")]
    NotIdentityMapping { index: u32, entry: u32 },

    #[error("SPL too large (need {need:#x}, have {have:#x})")]
    SplTooLarge { need: u32, have: u32 },

    #[error("thunk too large (need {need:#x}, have {have:#x})")]
    ThunkTooLarge { need: usize, have: usize },

    // --- interlock ---
    #[error(
        "write {start:#010x}..{end:#010x} would overwrite U-Boot at \
         {uboot_start:#010x}..{uboot_end:#010x}"
    )]
    UbootOverlap { start: u32, end: u32, uboot_start: u32, uboot_end: u32 },
}
