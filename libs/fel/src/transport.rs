//! Bulk transport to a device in FEL mode.
//!
//! The protocol layers only ever see the [`Transport`] trait, so they
//! can be exercised against a scripted mock; [`UsbBus`] is the real
//! rusb-backed implementation, including the open/claim/endpoint-scan
//! dance.

use std::time::Duration;

use rusb::{DeviceHandle, Direction, GlobalContext, TransferType};

use crate::error::{Error, Result};

/// USB vendor id of the Allwinner BROM FEL device.
pub const VENDOR_ID: u16 = 0x1f3a;
/// USB product id of the Allwinner BROM FEL device.
pub const PRODUCT_ID: u16 = 0xefe8;

/// Largest single bulk transfer; longer payloads are split.
pub const MAX_BULK_CHUNK: usize = 4 * 1024 * 1024;

/// Per-transfer timeout. There is no separate timeout for device-side
/// computation: while injected code runs, the host simply blocks on
/// the status read, so a very long SPL init can trip this.
pub const USB_TIMEOUT: Duration = Duration::from_secs(60);

/// Optional per-chunk progress callback, invoked after each completed
/// chunk with `(total, completed, chunk_len)` byte counts.
pub type Progress<'a> = Option<&'a mut (dyn FnMut(usize, usize, usize) + 'static)>;

/// A bidirectional bulk pipe. Transfers either complete fully or fail;
/// there are no retries at this layer.
pub trait Transport {
    fn send(&mut self, data: &[u8], progress: Progress) -> Result<()>;
    fn recv(&mut self, data: &mut [u8], progress: Progress) -> Result<()>;
}

/// An opened and claimed FEL USB device.
pub struct UsbBus {
    handle: DeviceHandle<GlobalContext>,
    ep_in: u8,
    ep_out: u8,
    timeout: Duration,
    detached_iface: Option<u8>,
}

impl UsbBus {
    /// Find, open and claim a FEL device. `filter` restricts the match
    /// to a specific `(bus, device)` pair, as given with `--dev`.
    pub fn open(filter: Option<(u8, u8)>) -> Result<Self> {
        let device = rusb::devices()?
            .iter()
            .find(|dev| {
                if let Some((bus, addr)) = filter {
                    if dev.bus_number() != bus || dev.address() != addr {
                        return false;
                    }
                }
                match dev.device_descriptor() {
                    Ok(desc) => {
                        desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID
                    }
                    Err(_) => false,
                }
            })
            .ok_or(Error::DeviceNotFound)?;

        let mut handle = device.open()?;

        // If another driver holds the interface, detach it for the
        // session and put it back when the bus is dropped.
        let mut detached_iface = None;
        if handle.claim_interface(0).is_err() {
            handle.detach_kernel_driver(0)?;
            detached_iface = Some(0);
            handle.claim_interface(0)?;
        }

        // First bulk IN and first bulk OUT of interface 0 in the first
        // configuration carry the FEL channel.
        let config = device.config_descriptor(0)?;
        let mut ep_in = None;
        let mut ep_out = None;
        for interface in config.interfaces().filter(|i| i.number() == 0) {
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        Direction::In => {
                            ep_in.get_or_insert(endpoint.address());
                        }
                        Direction::Out => {
                            ep_out.get_or_insert(endpoint.address());
                        }
                    }
                }
            }
        }

        Ok(UsbBus {
            handle,
            ep_in: ep_in.ok_or(Error::MissingEndpoint("IN"))?,
            ep_out: ep_out.ok_or(Error::MissingEndpoint("OUT"))?,
            timeout: USB_TIMEOUT,
            detached_iface,
        })
    }
}

impl Transport for UsbBus {
    fn send(&mut self, data: &[u8], mut progress: Progress) -> Result<()> {
        let total = data.len();
        let mut done = 0;
        while done < total {
            let chunk = (total - done).min(MAX_BULK_CHUNK);
            let mut sent = 0;
            while sent < chunk {
                sent += self.handle.write_bulk(
                    self.ep_out,
                    &data[done + sent..done + chunk],
                    self.timeout,
                )?;
            }
            done += chunk;
            if let Some(callback) = progress.as_mut() {
                callback(total, done, chunk);
            }
        }
        Ok(())
    }

    fn recv(&mut self, data: &mut [u8], mut progress: Progress) -> Result<()> {
        let total = data.len();
        let mut done = 0;
        while done < total {
            let chunk = (total - done).min(MAX_BULK_CHUNK);
            let mut received = 0;
            while received < chunk {
                received += self.handle.read_bulk(
                    self.ep_in,
                    &mut data[done + received..done + chunk],
                    self.timeout,
                )?;
            }
            done += chunk;
            if let Some(callback) = progress.as_mut() {
                callback(total, done, chunk);
            }
        }
        Ok(())
    }
}

impl Drop for UsbBus {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(0);
        if let Some(iface) = self.detached_iface {
            let _ = self.handle.attach_kernel_driver(iface);
        }
    }
}
