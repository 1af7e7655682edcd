//! Wire records of the FEL protocol.
//!
//! Two request/response envelopes are nested on the bulk pipe. The
//! outer AW-USB layer frames every transfer: a 32-byte "AWUC" request
//! announcing direction and length, the payload itself, then a 13-byte
//! "AWUS" acknowledgement that must be consumed. The inner FEL layer
//! rides on top of it: a 16-byte command record, an optional data
//! phase, and an 8-byte status record. All integers on the wire are
//! little-endian; the records are packed, so they are serialized
//! field by field rather than transmuted.

/// Direction code: the host will read the payload phase.
pub const AW_USB_READ: u16 = 0x11;
/// Direction code: the host will write the payload phase.
pub const AW_USB_WRITE: u16 = 0x12;

/// Length of the serialized AW-USB request envelope.
pub const AW_USB_REQUEST_LEN: usize = 32;
/// Length of the AW-USB response; only the first four bytes carry the
/// "AWUS" signature, the rest is consumed and ignored.
pub const AW_USB_RESPONSE_LEN: usize = 13;
/// Length of the FEL status record read after every command.
pub const FEL_STATUS_LEN: usize = 8;
/// Length of the FEL version record.
pub const FEL_VERSION_LEN: usize = 32;

const FEL_VERSION: u32 = 0x001;
const FEL_WRITE: u32 = 0x101;
const FEL_EXEC: u32 = 0x102;
const FEL_READ: u32 = 0x103;

/// Outer AW-USB request envelope.
pub struct UsbRequest {
    direction: u16,
    length: u32,
}

impl UsbRequest {
    /// Envelope for a device-to-host payload of `length` bytes.
    pub const fn read(length: u32) -> Self {
        UsbRequest { direction: AW_USB_READ, length }
    }

    /// Envelope for a host-to-device payload of `length` bytes.
    pub const fn write(length: u32) -> Self {
        UsbRequest { direction: AW_USB_WRITE, length }
    }

    pub fn to_bytes(&self) -> [u8; AW_USB_REQUEST_LEN] {
        let mut buf = [0u8; AW_USB_REQUEST_LEN];
        buf[0..4].copy_from_slice(b"AWUC");
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf[12..16].copy_from_slice(&0x0c00_0000u32.to_le_bytes());
        buf[16..18].copy_from_slice(&self.direction.to_le_bytes());
        // the length is carried twice; the remaining ten bytes are pad
        buf[18..22].copy_from_slice(&self.length.to_le_bytes());
        buf
    }
}

/// Inner FEL command record.
pub struct FelRequest {
    request: u32,
    address: u32,
    length: u32,
}

impl FelRequest {
    pub const fn version() -> Self {
        FelRequest { request: FEL_VERSION, address: 0, length: 0 }
    }

    pub const fn read_raw(address: u32, length: u32) -> Self {
        FelRequest { request: FEL_READ, address, length }
    }

    pub const fn write_raw(address: u32, length: u32) -> Self {
        FelRequest { request: FEL_WRITE, address, length }
    }

    /// Call `address`; control comes back once the code there executes
    /// a return to the link register.
    pub const fn exec(address: u32) -> Self {
        FelRequest { request: FEL_EXEC, address, length: 0 }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&self.request.to_le_bytes());
        buf[4..8].copy_from_slice(&self.address.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf
    }
}

/// Decoded FEL version record, as returned by the BROM.
#[derive(Debug, Clone, Copy, Default)]
pub struct Version {
    pub signature: [u8; 8],
    /// Effective SoC id, e.g. 0x1651 for an A20. The raw field carries
    /// it as `0x00165100`; the middle 16 bits are the id.
    pub soc_id: u16,
    pub firmware: u32,
    pub protocol: u16,
    pub dflag: u8,
    pub dlength: u8,
    pub scratchpad: u32,
    pub pad: [u32; 2],
}

impl Version {
    pub fn parse(raw: &[u8; FEL_VERSION_LEN]) -> Self {
        let le32 = |at: usize| u32::from_le_bytes(raw[at..at + 4].try_into().unwrap());
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&raw[0..8]);
        Version {
            signature,
            soc_id: ((le32(8) >> 8) & 0xFFFF) as u16,
            firmware: le32(12),
            protocol: u16::from_le_bytes(raw[16..18].try_into().unwrap()),
            dflag: raw[18],
            dlength: raw[19],
            scratchpad: le32(20),
            pad: [le32(24), le32(28)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_request_layout() {
        let read = UsbRequest::read(0x1234).to_bytes();
        assert_eq!(read.len(), AW_USB_REQUEST_LEN);
        assert_eq!(&read[0..4], b"AWUC");
        assert_eq!(&read[4..8], &[0, 0, 0, 0]);
        assert_eq!(u32::from_le_bytes(read[8..12].try_into().unwrap()), 0x1234);
        assert_eq!(u32::from_le_bytes(read[12..16].try_into().unwrap()), 0x0c00_0000);
        assert_eq!(u16::from_le_bytes(read[16..18].try_into().unwrap()), AW_USB_READ);
        assert_eq!(u32::from_le_bytes(read[18..22].try_into().unwrap()), 0x1234);
        assert_eq!(&read[22..32], &[0u8; 10]);

        let write = UsbRequest::write(0x0500_0000).to_bytes();
        assert_eq!(u16::from_le_bytes(write[16..18].try_into().unwrap()), AW_USB_WRITE);
        assert_eq!(u32::from_le_bytes(write[8..12].try_into().unwrap()), 0x0500_0000);
        assert_eq!(u32::from_le_bytes(write[18..22].try_into().unwrap()), 0x0500_0000);
    }

    #[test]
    fn fel_request_layout() {
        let read = FelRequest::read_raw(0xA0B0_C0D0, 0x11).to_bytes();
        assert_eq!(u32::from_le_bytes(read[0..4].try_into().unwrap()), 0x103);
        assert_eq!(u32::from_le_bytes(read[4..8].try_into().unwrap()), 0xA0B0_C0D0);
        assert_eq!(u32::from_le_bytes(read[8..12].try_into().unwrap()), 0x11);
        assert_eq!(u32::from_le_bytes(read[12..16].try_into().unwrap()), 0);

        let exec = FelRequest::exec(0x2000).to_bytes();
        assert_eq!(u32::from_le_bytes(exec[0..4].try_into().unwrap()), 0x102);
        assert_eq!(u32::from_le_bytes(exec[8..12].try_into().unwrap()), 0);

        let write = FelRequest::write_raw(0x4A00_0000, 0x8000).to_bytes();
        assert_eq!(u32::from_le_bytes(write[0..4].try_into().unwrap()), 0x101);

        let version = FelRequest::version().to_bytes();
        assert_eq!(u32::from_le_bytes(version[0..4].try_into().unwrap()), 0x001);
        assert_eq!(&version[4..16], &[0u8; 12]);
    }

    #[test]
    fn version_decode() {
        let mut raw = [0u8; FEL_VERSION_LEN];
        raw[0..8].copy_from_slice(b"AWUSBFEX");
        raw[8..12].copy_from_slice(&0x0016_5100u32.to_le_bytes());
        raw[12..16].copy_from_slice(&1u32.to_le_bytes());
        raw[16..18].copy_from_slice(&1u16.to_le_bytes());
        raw[18] = 0x44;
        raw[19] = 0x08;
        raw[20..24].copy_from_slice(&0x7e00u32.to_le_bytes());

        let version = Version::parse(&raw);
        assert_eq!(&version.signature, b"AWUSBFEX");
        assert_eq!(version.soc_id, 0x1651);
        assert_eq!(version.firmware, 1);
        assert_eq!(version.protocol, 1);
        assert_eq!(version.dflag, 0x44);
        assert_eq!(version.dlength, 0x08);
        // the scratchpad is a full 32-bit little-endian field
        assert_eq!(version.scratchpad, 0x7e00);
        assert_eq!(version.pad, [0, 0]);
    }
}
