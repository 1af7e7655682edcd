//! U-Boot mkimage "legacy" images.
//!
//! A 64-byte big-endian header in front of the payload. Only firmware
//! images are accepted for upload; script images matter solely for the
//! boot-script side channel. The header's data CRC (`ih_dcrc`, bytes
//! 24..28) is accepted unchecked.

use byteorder::{BigEndian, ByteOrder};

use crate::device::{FelDevice, UbootFootprint};
use crate::error::{Error, Result};
use crate::spl::SPL_LEN_LIMIT;
use crate::transport::Transport;

/// Total size of the mkimage legacy header.
pub const HEADER_SIZE: usize = 64;

const IH_MAGIC: u32 = 0x2705_1956;
const IH_ARCH_ARM: u8 = 2;

/// `ih_type` for a firmware image (a main U-Boot binary).
pub const TYPE_FIRMWARE: u8 = 5;
/// `ih_type` for a script image (boot.scr).
pub const TYPE_SCRIPT: u8 = 6;

const NAME_OFFSET: usize = 32;
const NAME_LEN: usize = 32;

/// Classify a buffer by its mkimage header: the `ih_type` byte for a
/// well-formed ARM image, [`Error::ImageInvalid`] for a short buffer
/// or magic mismatch, [`Error::ImageArchMismatch`] for a non-ARM one.
pub fn image_type(data: &[u8]) -> Result<u8> {
    if data.len() <= HEADER_SIZE {
        return Err(Error::ImageInvalid);
    }
    if BigEndian::read_u32(&data[0..4]) != IH_MAGIC {
        return Err(Error::ImageInvalid);
    }
    if data[29] != IH_ARCH_ARM {
        return Err(Error::ImageArchMismatch);
    }
    Ok(data[30])
}

fn image_name(data: &[u8]) -> String {
    let raw = &data[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
    let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl<T: Transport> FelDevice<T> {
    /// Upload a U-Boot firmware image to the load address its header
    /// declares, and arm the overwrite interlock with its span.
    ///
    /// A buffer with no payload past the header is silently ignored
    /// (there is nothing to transfer).
    pub fn write_uboot_image(&mut self, data: &[u8]) -> Result<()> {
        if data.len() <= HEADER_SIZE {
            return Ok(());
        }
        let kind = image_type(data)?;
        if kind != TYPE_FIRMWARE {
            return Err(Error::ImageTypeMismatch(kind));
        }
        let data_size = BigEndian::read_u32(&data[12..16]);
        let load_addr = BigEndian::read_u32(&data[16..20]);
        if data_size as usize != data.len() - HEADER_SIZE {
            return Err(Error::ImageSizeMismatch {
                header: data_size,
                actual: (data.len() - HEADER_SIZE) as u32,
            });
        }

        log::info!(
            "writing image \"{}\", {} bytes at {:#010x}",
            image_name(data),
            data_size,
            load_addr
        );
        self.write(load_addr, &data[HEADER_SIZE..])?;
        self.set_uboot(UbootFootprint { entry: load_addr, size: data_size });
        Ok(())
    }

    /// The common part of the `spl` and `uboot` commands: run the SPL
    /// from the buffer, then transfer the main U-Boot image if the
    /// file carries one past the SPL area. Whether U-Boot then gets
    /// started is the caller's business.
    pub fn process_spl_and_uboot(&mut self, data: &[u8]) -> Result<()> {
        self.load_and_exec_spl(data)?;
        if data.len() > SPL_LEN_LIMIT as usize {
            self.write_uboot_image(&data[SPL_LEN_LIMIT as usize..])?;
        }
        Ok(())
    }
}
