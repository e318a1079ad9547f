//! OTA Transfer State Machine
//!
//! The controller pushes firmware block-by-block, newest block first.
//! The node drives the transfer: it requests each block and counts down;
//! a retry timer re-requests the current block when the link goes quiet.
//! After the last block the image is checksummed against the announced
//! descriptor and, on a match, a boot marker is written and the node
//! reboots into the bootloader.

use crate::firmware::{
    crc16, FirmwareConfig, FirmwareRequest, FirmwareResponse, FIRMWARE_BLOCK_SIZE,
    FIRMWARE_START_OFFSET,
};
use crate::link::Indicator;
use crate::message::{Message, StreamType, GATEWAY_ADDRESS};
use crate::node::{Node, NodeState};
use crate::storage::Storage;
use tracing::{debug, error, info, warn};

impl Node {
    /// Ask the controller for the current firmware descriptor.
    ///
    /// Sent during presentation; the payload reports the firmware we are
    /// running plus the bootloader version so the controller can decide
    /// whether an update is due.
    pub(in crate::node) fn request_firmware_config(&mut self) {
        self.firmware.ongoing = false;

        let mut payload = Vec::with_capacity(10);
        payload.extend_from_slice(&self.firmware.config.encode());
        payload.extend_from_slice(&self.config.ota.bootloader_version.to_le_bytes());

        let mut request = Message::stream(
            self.context.node_id,
            GATEWAY_ADDRESS,
            StreamType::FirmwareConfigRequest,
        );
        request.set_raw(&payload);
        self.send_routed(&mut request);
    }

    /// Handle a stream (firmware transfer) message addressed to us.
    ///
    /// Returns true when the message was consumed by the transfer logic.
    pub(in crate::node) fn handle_stream(&mut self, msg: &Message) -> bool {
        match msg.stream_type() {
            Some(StreamType::FirmwareConfigResponse) => {
                self.handle_firmware_config_response(msg);
                true
            }
            Some(StreamType::FirmwareResponse) => {
                self.handle_firmware_block(msg);
                true
            }
            _ => false,
        }
    }

    /// Controller answered with the firmware it wants us to run.
    fn handle_firmware_config_response(&mut self, msg: &Message) {
        let announced = match FirmwareConfig::decode(msg.payload()) {
            Some(fc) => fc,
            None => {
                debug!("malformed firmware descriptor dropped");
                return;
            }
        };

        if announced.blocks == 0 {
            debug!("empty firmware image dropped");
            return;
        }
        if announced == self.firmware.config {
            debug!(
                fw_type = announced.fw_type,
                version = announced.version,
                "firmware up to date"
            );
            return;
        }

        let flash_ok = match self.flash.as_mut() {
            Some(flash) => flash.init(),
            None => false,
        };
        if !flash_ok {
            error!("flash unavailable, firmware update abandoned");
            self.pulse(Indicator::Error);
            self.firmware.ongoing = false;
            return;
        }

        info!(
            fw_type = announced.fw_type,
            version = announced.version,
            blocks = announced.blocks,
            "firmware update starting"
        );
        if let Some(flash) = self.flash.as_mut() {
            flash.erase();
        }

        self.firmware.pending = announced;
        self.firmware.block = announced.blocks;
        self.firmware.ongoing = true;
        // +1 so the immediate first request does not consume a retry.
        self.firmware.retries = self.config.ota.retries.saturating_add(1);
        self.firmware.last_request_ms = 0;
    }

    /// One firmware block arrived.
    fn handle_firmware_block(&mut self, msg: &Message) {
        if !self.firmware.ongoing {
            return;
        }
        let response = match FirmwareResponse::decode(msg.payload()) {
            Some(r) => r,
            None => {
                debug!("malformed firmware block dropped");
                return;
            }
        };

        let expected = self.firmware.block - 1;
        if response.block != expected {
            debug!(
                got = response.block,
                expected, "out-of-order firmware block ignored"
            );
            return;
        }

        let offset = FIRMWARE_START_OFFSET + response.block as u32 * FIRMWARE_BLOCK_SIZE as u32;
        if let Some(flash) = self.flash.as_mut() {
            flash.write(offset, &response.data);
        }
        self.firmware.block -= 1;
        self.firmware.retries = self.config.ota.retries.saturating_add(1);
        // Expire the timer so the next block is requested on the very
        // next idle poll; the delay only paces re-requests.
        self.firmware.last_request_ms = 0;

        if self.firmware.block == 0 {
            self.finish_firmware_transfer();
        }
    }

    /// All blocks received: verify the image and hand over to the
    /// bootloader.
    fn finish_firmware_transfer(&mut self) {
        self.firmware.ongoing = false;
        let pending = self.firmware.pending;

        let image_crc = match self.flash.as_ref() {
            Some(flash) => {
                let size = pending.image_size();
                crc16((0..size).map(|i| flash.read_byte(FIRMWARE_START_OFFSET + i)))
            }
            None => return,
        };

        if image_crc != pending.crc {
            error!(
                expected = pending.crc,
                actual = image_crc,
                "firmware image checksum mismatch, update abandoned"
            );
            self.pulse(Indicator::Error);
            return;
        }

        // Boot marker the bootloader scans for: magic, image size
        // (big endian), terminator.
        let size = pending.image_size();
        let mut marker = [0u8; FIRMWARE_START_OFFSET as usize];
        marker[..7].copy_from_slice(b"FLXIMG:");
        marker[7] = (size >> 8) as u8;
        marker[8] = (size & 0xFF) as u8;
        marker[9] = b':';
        if let Some(flash) = self.flash.as_mut() {
            flash.write(0, &marker);
        }

        self.firmware.config = pending;
        self.firmware.config.persist(&mut *self.storage);

        info!(
            fw_type = pending.fw_type,
            version = pending.version,
            "firmware image verified, rebooting"
        );
        self.clock.reboot();
        self.state = NodeState::Rebooting;
    }

    /// Advance the block retry timer; called whenever the link is idle.
    ///
    /// Also issues the very first block request of a transfer (the timer
    /// starts expired).
    pub(in crate::node) fn firmware_retry_tick(&mut self) {
        if !self.firmware.ongoing {
            return;
        }
        let now = self.now_ms();
        if now.saturating_sub(self.firmware.last_request_ms) < self.config.ota.retry_delay_ms {
            return;
        }

        if self.firmware.retries == 0 {
            warn!(
                block = self.firmware.block,
                "firmware block retries exhausted, update abandoned"
            );
            self.pulse(Indicator::Error);
            self.firmware.ongoing = false;
            return;
        }
        self.firmware.retries -= 1;
        self.firmware.last_request_ms = now;

        let request = FirmwareRequest {
            fw_type: self.firmware.pending.fw_type,
            version: self.firmware.pending.version,
            block: self.firmware.block - 1,
        };
        let mut msg = Message::stream(
            self.context.node_id,
            GATEWAY_ADDRESS,
            StreamType::FirmwareRequest,
        );
        msg.set_raw(&request.encode());
        self.send_routed(&mut msg);
    }
}

/// Live OTA transfer state.
#[derive(Debug)]
pub struct FirmwareState {
    /// A transfer is in progress.
    pub ongoing: bool,
    /// Descriptor of the firmware currently installed (persisted).
    pub config: FirmwareConfig,
    /// Descriptor of the firmware being transferred.
    pub pending: FirmwareConfig,
    /// Blocks still outstanding; the next request is for `block - 1`.
    pub block: u16,
    /// Requests left for the current block before the transfer is
    /// abandoned.
    pub retries: u8,
    /// When the current block was last requested.
    pub last_request_ms: u64,
}

impl FirmwareState {
    /// Load the persisted descriptor; no transfer in progress.
    pub fn load(storage: &dyn Storage) -> Self {
        let config = FirmwareConfig::load(storage);
        Self {
            ongoing: false,
            config,
            pending: config,
            block: 0,
            retries: 0,
            last_request_ms: 0,
        }
    }
}
