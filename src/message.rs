//! Wire Format Parsing and Serialization
//!
//! Defines the fixed-size mesh frame that is the only transport unit.
//! Every frame begins with an 8-byte header followed by a length-tagged
//! payload, bounded by the link's maximum frame size.
//!
//! ## Header (8 bytes)
//!
//! ```text
//! [ver(4bits)+command(4bits)][flags+ptype:1][sender:1][last:1]
//! [destination:1][sensor:1][type:1][length:1]
//! ```
//!
//! A signed frame always occupies [`MAX_FRAME_SIZE`] bytes regardless of
//! logical payload length, with the signature in the trailing
//! [`SIGNATURE_SIZE`] bytes.

// ============================================================================
// Constants
// ============================================================================

/// Protocol version (high nibble of byte 0). Frames with any other
/// version are dropped by the dispatcher.
pub const PROTOCOL_VERSION: u8 = 2;

/// Maximum size of a frame on the wire (radio link frame size).
pub const MAX_FRAME_SIZE: usize = 32;

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 8;

/// Maximum logical payload length for an unsigned frame.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// Size of the truncated signature carried in the frame tail.
pub const SIGNATURE_SIZE: usize = 8;

/// Maximum payload length when the frame is signed (signature reserves
/// the frame tail).
pub const MAX_SIGNED_PAYLOAD_SIZE: usize = MAX_PAYLOAD_SIZE - SIGNATURE_SIZE;

/// Address of the gateway node.
pub const GATEWAY_ADDRESS: u8 = 0;

/// Broadcast address; also the "unassigned" sentinel for node/parent ids.
pub const BROADCAST_ADDRESS: u8 = 255;

/// Sentinel for a node id or parent id that has not been assigned yet.
pub const AUTO: u8 = 255;

/// Sensor id used for node-internal (non-sensor) messages.
pub const NODE_SENSOR_ID: u8 = 255;

/// Sentinel distance meaning "no known path to the gateway".
pub const DISTANCE_INVALID: u8 = 255;

// Flag bits (low nibble of header byte 1).
const FLAG_REQUEST_ACK: u8 = 0x01;
const FLAG_IS_ACK: u8 = 0x02;
const FLAG_SIGNED: u8 = 0x04;

// ============================================================================
// Enums
// ============================================================================

/// Top-level message class (low nibble of header byte 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Node/sensor presentation to the controller.
    Presentation = 0,
    /// Set a sensor value.
    Set = 1,
    /// Request a sensor value.
    Req = 2,
    /// Internal protocol message (subtype in [`InternalType`]).
    Internal = 3,
    /// Stream transfer (subtype in [`StreamType`]); used for OTA firmware.
    Stream = 4,
}

impl Command {
    /// Decode a command nibble.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Command::Presentation),
            1 => Some(Command::Set),
            2 => Some(Command::Req),
            3 => Some(Command::Internal),
            4 => Some(Command::Stream),
            _ => None,
        }
    }
}

/// Subtypes for [`Command::Internal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalType {
    IdRequest = 3,
    IdResponse = 4,
    Config = 6,
    FindParent = 7,
    FindParentResponse = 8,
    Reboot = 13,
    GatewayReady = 14,
    RequestSigning = 15,
    GetNonce = 16,
    GetNonceResponse = 17,
    Heartbeat = 18,
    HeartbeatResponse = 19,
    Discover = 20,
    DiscoverResponse = 21,
}

impl InternalType {
    /// Decode an internal subtype byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        use InternalType::*;
        match value {
            3 => Some(IdRequest),
            4 => Some(IdResponse),
            6 => Some(Config),
            7 => Some(FindParent),
            8 => Some(FindParentResponse),
            13 => Some(Reboot),
            14 => Some(GatewayReady),
            15 => Some(RequestSigning),
            16 => Some(GetNonce),
            17 => Some(GetNonceResponse),
            18 => Some(Heartbeat),
            19 => Some(HeartbeatResponse),
            20 => Some(Discover),
            21 => Some(DiscoverResponse),
            _ => None,
        }
    }

    /// Whether this internal type is exempt from the signing requirement.
    ///
    /// Handshake, discovery, addressing and heartbeat messages are never
    /// signed: signing them would deadlock the handshake itself, and they
    /// are exchanged before any trust relation exists.
    pub fn is_signing_exempt(self) -> bool {
        use InternalType::*;
        matches!(
            self,
            GetNonce
                | GetNonceResponse
                | RequestSigning
                | IdRequest
                | IdResponse
                | FindParent
                | FindParentResponse
                | Heartbeat
                | HeartbeatResponse
        )
    }
}

/// Subtypes for [`Command::Stream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    FirmwareConfigRequest = 0,
    FirmwareConfigResponse = 1,
    FirmwareRequest = 2,
    FirmwareResponse = 3,
}

impl StreamType {
    /// Decode a stream subtype byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StreamType::FirmwareConfigRequest),
            1 => Some(StreamType::FirmwareConfigResponse),
            2 => Some(StreamType::FirmwareRequest),
            3 => Some(StreamType::FirmwareResponse),
            _ => None,
        }
    }
}

/// Payload encoding tag (high nibble of header byte 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadType {
    Raw = 0,
    Byte = 1,
    Uint16 = 2,
    Uint32 = 3,
    Str = 4,
}

impl PayloadType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PayloadType::Raw),
            1 => Some(PayloadType::Byte),
            2 => Some(PayloadType::Uint16),
            3 => Some(PayloadType::Uint32),
            4 => Some(PayloadType::Str),
            _ => None,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A single mesh message: fixed header, typed payload, optional signature.
///
/// This is the only transport unit in the system. It is deliberately
/// `Copy`-friendly in size (one radio frame) so the core can keep scratch
/// copies without allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    /// Originating node address.
    pub sender: u8,
    /// Previous hop address (rewritten on every transmission).
    pub last: u8,
    /// Final destination address.
    pub destination: u8,
    /// Logical child-sensor id on the originating node.
    pub sensor: u8,
    /// Message class.
    pub command: Command,
    /// Command-scoped subtype.
    pub msg_type: u8,
    /// Protocol version this frame was encoded with.
    pub version: u8,
    /// Sender requests an acknowledgement echo.
    pub ack_request: bool,
    /// This message is an acknowledgement echo.
    pub is_ack: bool,
    /// Frame carries a signature in its tail.
    pub signed: bool,
    /// Payload encoding tag.
    pub payload_type: PayloadType,
    length: u8,
    payload: [u8; MAX_PAYLOAD_SIZE],
    /// Truncated message signature; meaningful only when `signed` is set.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl Message {
    /// Create a message with an empty raw payload.
    pub fn new(sender: u8, destination: u8, sensor: u8, command: Command, msg_type: u8) -> Self {
        Self {
            sender,
            last: sender,
            destination,
            sensor,
            command,
            msg_type,
            version: PROTOCOL_VERSION,
            ack_request: false,
            is_ack: false,
            signed: false,
            payload_type: PayloadType::Raw,
            length: 0,
            payload: [0u8; MAX_PAYLOAD_SIZE],
            signature: [0u8; SIGNATURE_SIZE],
        }
    }

    /// Create an internal protocol message.
    pub fn internal(sender: u8, destination: u8, itype: InternalType) -> Self {
        Self::new(sender, destination, NODE_SENSOR_ID, Command::Internal, itype as u8)
    }

    /// Create a stream (firmware transfer) message.
    pub fn stream(sender: u8, destination: u8, stype: StreamType) -> Self {
        Self::new(sender, destination, NODE_SENSOR_ID, Command::Stream, stype as u8)
    }

    /// Decoded internal subtype, if this is an internal message.
    pub fn internal_type(&self) -> Option<InternalType> {
        if self.command == Command::Internal {
            InternalType::from_u8(self.msg_type)
        } else {
            None
        }
    }

    /// Decoded stream subtype, if this is a stream message.
    pub fn stream_type(&self) -> Option<StreamType> {
        if self.command == Command::Stream {
            StreamType::from_u8(self.msg_type)
        } else {
            None
        }
    }

    // === Payload accessors ===

    /// Logical payload length.
    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.length as usize]
    }

    /// Set a raw payload. Bytes beyond the frame capacity are truncated.
    pub fn set_raw(&mut self, data: &[u8]) -> &mut Self {
        let n = data.len().min(MAX_PAYLOAD_SIZE);
        self.payload[..n].copy_from_slice(&data[..n]);
        self.length = n as u8;
        self.payload_type = PayloadType::Raw;
        self
    }

    /// Set a single-byte payload.
    pub fn set_u8(&mut self, value: u8) -> &mut Self {
        self.payload[0] = value;
        self.length = 1;
        self.payload_type = PayloadType::Byte;
        self
    }

    /// Set a 16-bit payload (little endian).
    pub fn set_u16(&mut self, value: u16) -> &mut Self {
        self.payload[..2].copy_from_slice(&value.to_le_bytes());
        self.length = 2;
        self.payload_type = PayloadType::Uint16;
        self
    }

    /// Set a 32-bit payload (little endian).
    pub fn set_u32(&mut self, value: u32) -> &mut Self {
        self.payload[..4].copy_from_slice(&value.to_le_bytes());
        self.length = 4;
        self.payload_type = PayloadType::Uint32;
        self
    }

    /// Set a string payload. Truncated at the frame capacity.
    pub fn set_str(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        let n = bytes.len().min(MAX_PAYLOAD_SIZE);
        self.payload[..n].copy_from_slice(&bytes[..n]);
        self.length = n as u8;
        self.payload_type = PayloadType::Str;
        self
    }

    /// Set a boolean payload (encoded as a byte).
    pub fn set_bool(&mut self, value: bool) -> &mut Self {
        self.set_u8(value as u8)
    }

    /// First payload byte, or 0 if empty.
    pub fn get_u8(&self) -> u8 {
        if self.length >= 1 {
            self.payload[0]
        } else {
            0
        }
    }

    /// Payload as little-endian u16, or 0 if too short.
    pub fn get_u16(&self) -> u16 {
        if self.length >= 2 {
            u16::from_le_bytes([self.payload[0], self.payload[1]])
        } else {
            0
        }
    }

    /// Payload as little-endian u32, or 0 if too short.
    pub fn get_u32(&self) -> u32 {
        if self.length >= 4 {
            u32::from_le_bytes([self.payload[0], self.payload[1], self.payload[2], self.payload[3]])
        } else {
            0
        }
    }

    /// Payload as boolean (first byte non-zero).
    pub fn get_bool(&self) -> bool {
        self.get_u8() != 0
    }

    /// Payload interpreted as UTF-8, lossy.
    pub fn get_str(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }

    // === Wire encoding ===

    /// Encode this message to wire bytes.
    ///
    /// Unsigned frames are `HEADER_SIZE + length` bytes. Signed frames
    /// always occupy the full [`MAX_FRAME_SIZE`], padded with zeros, with
    /// the signature in the trailing [`SIGNATURE_SIZE`] bytes.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = vec![0u8; self.frame_len()];
        frame[0] = (self.version << 4) | (self.command as u8 & 0x0F);
        let mut flags = 0u8;
        if self.ack_request {
            flags |= FLAG_REQUEST_ACK;
        }
        if self.is_ack {
            flags |= FLAG_IS_ACK;
        }
        if self.signed {
            flags |= FLAG_SIGNED;
        }
        frame[1] = flags | ((self.payload_type as u8) << 4);
        frame[2] = self.sender;
        frame[3] = self.last;
        frame[4] = self.destination;
        frame[5] = self.sensor;
        frame[6] = self.msg_type;
        frame[7] = self.length;
        let len = self.length as usize;
        frame[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&self.payload[..len]);
        if self.signed {
            frame[MAX_FRAME_SIZE - SIGNATURE_SIZE..].copy_from_slice(&self.signature);
        }
        frame
    }

    /// The on-wire length of this message.
    pub fn frame_len(&self) -> usize {
        if self.signed {
            MAX_FRAME_SIZE
        } else {
            HEADER_SIZE + self.length as usize
        }
    }

    /// Decode a message from wire bytes.
    ///
    /// Rejects frames that are shorter than the header, longer than the
    /// maximum frame size, carry an unknown command or payload type, or
    /// whose declared payload length does not fit the received bytes.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        if frame.len() < HEADER_SIZE || frame.len() > MAX_FRAME_SIZE {
            return None;
        }

        let version = frame[0] >> 4;
        let command = Command::from_u8(frame[0] & 0x0F)?;
        let flags = frame[1] & 0x0F;
        let payload_type = PayloadType::from_u8(frame[1] >> 4)?;
        let signed = flags & FLAG_SIGNED != 0;
        let length = frame[7];

        let max_len = if signed { MAX_SIGNED_PAYLOAD_SIZE } else { MAX_PAYLOAD_SIZE };
        if length as usize > max_len {
            return None;
        }
        // Signed frames must be full-size; unsigned frames must cover
        // their declared payload.
        if signed {
            if frame.len() != MAX_FRAME_SIZE {
                return None;
            }
        } else if frame.len() < HEADER_SIZE + length as usize {
            return None;
        }

        let mut payload = [0u8; MAX_PAYLOAD_SIZE];
        payload[..length as usize]
            .copy_from_slice(&frame[HEADER_SIZE..HEADER_SIZE + length as usize]);

        let mut signature = [0u8; SIGNATURE_SIZE];
        if signed {
            signature.copy_from_slice(&frame[MAX_FRAME_SIZE - SIGNATURE_SIZE..]);
        }

        Some(Self {
            sender: frame[2],
            last: frame[3],
            destination: frame[4],
            sensor: frame[5],
            command,
            msg_type: frame[6],
            version,
            ack_request: flags & FLAG_REQUEST_ACK != 0,
            is_ack: flags & FLAG_IS_ACK != 0,
            signed,
            payload_type,
            length,
            payload,
            signature,
        })
    }

    /// The full-size frame with the signature bytes zeroed.
    ///
    /// This is the canonical byte sequence a signature covers: the signed
    /// flag is set, the frame padded to maximum size, and the last-hop
    /// field pinned to the sender. Relays rewrite `last` on every hop,
    /// so it cannot be part of the signed bytes.
    pub fn signing_view(&self) -> [u8; MAX_FRAME_SIZE] {
        let mut copy = *self;
        copy.signed = true;
        copy.signature = [0u8; SIGNATURE_SIZE];
        copy.last = copy.sender;
        let frame = copy.to_frame();
        let mut out = [0u8; MAX_FRAME_SIZE];
        out.copy_from_slice(&frame);
        out
    }
}

/// Whether a distance value denotes a known path to the gateway.
pub fn is_valid_distance(distance: u8) -> bool {
    distance != DISTANCE_INVALID
}

// ============================================================================
// Tests
// ============================================================================
