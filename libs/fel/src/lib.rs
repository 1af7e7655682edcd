//! Host-side driver for the Allwinner FEL USB boot-recovery protocol.
//!
//! An Allwinner SoC with no (or a broken) boot medium falls into its
//! boot-ROM's FEL mode: a vendor bulk-USB channel over which a host
//! may read and write memory and call code. This crate speaks that
//! protocol and builds the interesting part on top of it — staging a
//! U-Boot SPL in SRAM around the regions the BROM keeps live, running
//! it to bring up DRAM, then pushing a full U-Boot image there.
//!
//! The entry point is [`FelDevice`]: open a session, then issue
//! commands. All operations are synchronous and strictly ordered on
//! the bulk pipe; any failure is fatal to the session.

pub mod device;
pub mod error;
pub mod image;
pub mod mmu;
pub mod protocol;
pub mod soc;
pub mod spl;
pub mod stubs;
pub mod transport;

pub use device::{FelDevice, UbootFootprint};
pub use error::{Error, Result};
