//! OTA firmware transfer: descriptors, block codecs, image checksum.
//!
//! Firmware is delivered block-by-block from the controller, newest block
//! first, into an external flash area. The stored image is prefixed by a
//! boot marker the bootloader picks up after reboot. All payload structs
//! have explicit encode/decode with checked lengths.

use crate::storage::{Storage, ADDR_FIRMWARE_CONFIG};

/// Size of one firmware transfer block.
pub const FIRMWARE_BLOCK_SIZE: usize = 16;

/// Flash offset where the image starts (the boot marker precedes it).
pub const FIRMWARE_START_OFFSET: u32 = 10;

/// Encoded size of a [`FirmwareConfig`].
pub const FIRMWARE_CONFIG_SIZE: usize = 8;

/// Encoded size of a [`FirmwareRequest`].
pub const FIRMWARE_REQUEST_SIZE: usize = 6;

/// Descriptor of a firmware image: type, version, block count, checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FirmwareConfig {
    pub fw_type: u16,
    pub version: u16,
    pub blocks: u16,
    pub crc: u16,
}

impl FirmwareConfig {
    /// Decode from payload bytes.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < FIRMWARE_CONFIG_SIZE {
            return None;
        }
        Some(Self {
            fw_type: u16::from_le_bytes([data[0], data[1]]),
            version: u16::from_le_bytes([data[2], data[3]]),
            blocks: u16::from_le_bytes([data[4], data[5]]),
            crc: u16::from_le_bytes([data[6], data[7]]),
        })
    }

    /// Encode to payload bytes.
    pub fn encode(&self) -> [u8; FIRMWARE_CONFIG_SIZE] {
        let mut out = [0u8; FIRMWARE_CONFIG_SIZE];
        out[0..2].copy_from_slice(&self.fw_type.to_le_bytes());
        out[2..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..6].copy_from_slice(&self.blocks.to_le_bytes());
        out[6..8].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    /// Load the persisted descriptor.
    pub fn load(storage: &dyn Storage) -> Self {
        let mut buf = [0u8; FIRMWARE_CONFIG_SIZE];
        storage.read_block(ADDR_FIRMWARE_CONFIG, &mut buf);
        Self::decode(&buf).unwrap_or_default()
    }

    /// Persist the descriptor.
    pub fn persist(&self, storage: &mut dyn Storage) {
        storage.write_block(ADDR_FIRMWARE_CONFIG, &self.encode());
    }

    /// Total image size in bytes.
    pub fn image_size(&self) -> u32 {
        self.blocks as u32 * FIRMWARE_BLOCK_SIZE as u32
    }
}

/// Request for one firmware block (also the firmware-config request
/// header, without a block field).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirmwareRequest {
    pub fw_type: u16,
    pub version: u16,
    pub block: u16,
}

impl FirmwareRequest {
    /// Decode from payload bytes.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < FIRMWARE_REQUEST_SIZE {
            return None;
        }
        Some(Self {
            fw_type: u16::from_le_bytes([data[0], data[1]]),
            version: u16::from_le_bytes([data[2], data[3]]),
            block: u16::from_le_bytes([data[4], data[5]]),
        })
    }

    /// Encode to payload bytes.
    pub fn encode(&self) -> [u8; FIRMWARE_REQUEST_SIZE] {
        let mut out = [0u8; FIRMWARE_REQUEST_SIZE];
        out[0..2].copy_from_slice(&self.fw_type.to_le_bytes());
        out[2..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..6].copy_from_slice(&self.block.to_le_bytes());
        out
    }
}

/// One received firmware block: request header plus data bytes.
#[derive(Clone, Copy, Debug)]
pub struct FirmwareResponse {
    pub fw_type: u16,
    pub version: u16,
    pub block: u16,
    pub data: [u8; FIRMWARE_BLOCK_SIZE],
}

impl FirmwareResponse {
    /// Decode from payload bytes.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < FIRMWARE_REQUEST_SIZE + FIRMWARE_BLOCK_SIZE {
            return None;
        }
        let head = FirmwareRequest::decode(payload)?;
        let mut data = [0u8; FIRMWARE_BLOCK_SIZE];
        data.copy_from_slice(&payload[FIRMWARE_REQUEST_SIZE..FIRMWARE_REQUEST_SIZE + FIRMWARE_BLOCK_SIZE]);
        Some(Self {
            fw_type: head.fw_type,
            version: head.version,
            block: head.block,
            data,
        })
    }

    /// Encode to payload bytes.
    pub fn encode(&self) -> [u8; FIRMWARE_REQUEST_SIZE + FIRMWARE_BLOCK_SIZE] {
        let mut out = [0u8; FIRMWARE_REQUEST_SIZE + FIRMWARE_BLOCK_SIZE];
        out[..FIRMWARE_REQUEST_SIZE].copy_from_slice(
            &FirmwareRequest {
                fw_type: self.fw_type,
                version: self.version,
                block: self.block,
            }
            .encode(),
        );
        out[FIRMWARE_REQUEST_SIZE..].copy_from_slice(&self.data);
        out
    }
}

/// Flash store for the firmware image.
///
/// Writes are expected to complete before return (the driver waits out
/// the busy flag).
pub trait FlashStore {
    /// Initialize the flash device. False means the device is absent or
    /// unresponsive; the update is abandoned.
    fn init(&mut self) -> bool;

    /// Erase the image area.
    fn erase(&mut self);

    /// Write bytes at an absolute flash offset.
    fn write(&mut self, offset: u32, data: &[u8]);

    /// Read one byte at an absolute flash offset.
    fn read_byte(&self, offset: u32) -> u8;
}

/// CRC16 (reflected, polynomial 0xA001, init 0xFFFF) over a byte stream.
pub fn crc16(bytes: impl IntoIterator<Item = u8>) -> u16 {
    let mut crc: u16 = !0;
    for byte in bytes {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
