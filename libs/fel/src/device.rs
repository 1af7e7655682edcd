//! The FEL session: an opened device plus the command surface.

use crate::error::{Error, Result};
use crate::protocol::{
    FelRequest, UsbRequest, Version, AW_USB_RESPONSE_LEN, FEL_STATUS_LEN, FEL_VERSION_LEN,
};
use crate::soc::{self, SocInfo};
use crate::transport::{Transport, UsbBus};

/// Byte span of a loaded U-Boot image. Armed once by a successful
/// [`FelDevice::write_uboot_image`] and consulted by the write
/// interlock from then on.
#[derive(Debug, Clone, Copy)]
pub struct UbootFootprint {
    pub entry: u32,
    pub size: u32,
}

/// Progress callback, `(total, completed, chunk_len)` in bytes.
pub type ProgressFn = Box<dyn FnMut(usize, usize, usize)>;

/// A session with one device in FEL mode.
///
/// The SoC descriptor is resolved once, right after open, from the
/// BROM's version record. Every command is a strictly serial
/// request/payload/status exchange; nothing else may interleave on
/// the bulk pipe.
pub struct FelDevice<T: Transport = UsbBus> {
    transport: T,
    version: Version,
    soc: &'static SocInfo,
    uboot: Option<UbootFootprint>,
    progress: Option<ProgressFn>,
}

impl FelDevice<UsbBus> {
    /// Open the first matching FEL device (optionally pinned to a
    /// `(bus, device)` pair) and probe its identity.
    pub fn open(filter: Option<(u8, u8)>) -> Result<Self> {
        Self::with_transport(UsbBus::open(filter)?)
    }
}

impl<T: Transport> FelDevice<T> {
    /// Wrap an already-connected transport and probe the SoC.
    pub fn with_transport(transport: T) -> Result<Self> {
        let mut device = FelDevice {
            transport,
            version: Version::default(),
            soc: &soc::GENERIC_SOC_INFO,
            uboot: None,
            progress: None,
        };
        device.version = device.query_version()?;
        device.soc = soc::lookup(device.version.soc_id);
        log::info!(
            "connected to SoC id {:#06x} ({})",
            device.version.soc_id,
            soc::soc_name(device.version.soc_id).unwrap_or("unknown")
        );
        Ok(device)
    }

    /// The version record captured at open.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The SRAM description resolved at open.
    pub fn soc(&self) -> &'static SocInfo {
        self.soc
    }

    /// Span of the U-Boot image loaded in this session, if any.
    pub fn uboot(&self) -> Option<UbootFootprint> {
        self.uboot
    }

    pub(crate) fn set_uboot(&mut self, footprint: UbootFootprint) {
        self.uboot = Some(footprint);
    }

    /// Install a progress callback for the payload phases of
    /// subsequent reads and writes.
    pub fn set_progress(&mut self, progress: ProgressFn) {
        self.progress = Some(progress);
    }

    /// Read `buf.len()` bytes of device memory at `addr`.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.fel_request(FelRequest::read_raw(addr, buf.len() as u32))?;
        self.aw_read(buf, true)?;
        self.read_status()
    }

    /// Write `data` to device memory at `addr`, refusing to touch a
    /// loaded U-Boot image. The guarded span is inclusive at the top:
    /// even the write abutting `entry + size` is refused.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if let Some(uboot) = self.uboot {
            let start = addr as u64;
            let end = addr as u64 + data.len() as u64;
            let uboot_start = uboot.entry as u64;
            let uboot_end = uboot.entry as u64 + uboot.size as u64;
            if uboot.size > 0 && start <= uboot_end && end >= uboot_start {
                return Err(Error::UbootOverlap {
                    start: addr,
                    end: end.min(u32::MAX as u64) as u32,
                    uboot_start: uboot.entry,
                    uboot_end: uboot_end.min(u32::MAX as u64) as u32,
                });
            }
        }
        self.fel_request(FelRequest::write_raw(addr, data.len() as u32))?;
        self.aw_write(data, true)?;
        self.read_status()
    }

    /// Call code at `addr`. Returns once the device posts the FEL
    /// status, i.e. once the called code came back via `bx lr`.
    pub fn execute(&mut self, addr: u32) -> Result<()> {
        self.fel_request(FelRequest::exec(addr))?;
        self.read_status()
    }

    /// Fill `len` bytes at `addr` with `value`.
    pub fn fill(&mut self, addr: u32, len: usize, value: u8) -> Result<()> {
        self.write(addr, &vec![value; len])
    }

    /// Upload a code stub to the scratch area and run it. See the
    /// stub constants for their result conventions.
    pub fn exec_stub(&mut self, code: &[u32]) -> Result<()> {
        let scratch = self.soc.scratch_addr;
        let mut bytes = Vec::with_capacity(code.len() * 4);
        for word in code {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        self.write(scratch, &bytes)?;
        self.execute(scratch)
    }

    /// Read one little-endian word of device memory.
    pub fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn query_version(&mut self) -> Result<Version> {
        self.fel_request(FelRequest::version())?;
        let mut raw = [0u8; FEL_VERSION_LEN];
        self.aw_read(&mut raw, false)?;
        self.read_status()?;
        Ok(Version::parse(&raw))
    }

    fn fel_request(&mut self, request: FelRequest) -> Result<()> {
        self.aw_write(&request.to_bytes(), false)
    }

    fn read_status(&mut self) -> Result<()> {
        // eight opaque bytes; they must be consumed to keep the pipe
        // in sync, their content is ignored
        let mut status = [0u8; FEL_STATUS_LEN];
        self.aw_read(&mut status, false)
    }

    fn aw_write(&mut self, payload: &[u8], with_progress: bool) -> Result<()> {
        let envelope = UsbRequest::write(payload.len() as u32).to_bytes();
        self.transport.send(&envelope, None)?;
        let progress =
            if with_progress { self.progress.as_deref_mut() } else { None };
        self.transport.send(payload, progress)?;
        self.read_awus()
    }

    fn aw_read(&mut self, buf: &mut [u8], with_progress: bool) -> Result<()> {
        let envelope = UsbRequest::read(buf.len() as u32).to_bytes();
        self.transport.send(&envelope, None)?;
        let progress =
            if with_progress { self.progress.as_deref_mut() } else { None };
        self.transport.recv(buf, progress)?;
        self.read_awus()
    }

    fn read_awus(&mut self) -> Result<()> {
        let mut response = [0u8; AW_USB_RESPONSE_LEN];
        self.transport.recv(&mut response, None)?;
        if &response[0..4] != b"AWUS" {
            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&response[0..4]);
            return Err(Error::BadResponseEnvelope(prefix));
        }
        Ok(())
    }
}
