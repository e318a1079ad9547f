//! Gateway hand-off and the serial text protocol.
//!
//! A gateway node bridges the mesh to the controller: every message that
//! terminates at the gateway is additionally handed to the
//! [`GatewayTransport`], and controller messages are injected into the
//! mesh as if they had arrived over the radio link.
//!
//! The controller-facing wire format is a newline-terminated ASCII line,
//! one message per line:
//!
//! ```text
//! sender;sensor;command;ack;type;payload\n
//! ```
//!
//! Raw payloads are hex-encoded; everything else is plain text. Malformed
//! or over-length lines are discarded and the input buffer reset.

use crate::message::{Command, Message, PayloadType, GATEWAY_ADDRESS, MAX_PAYLOAD_SIZE};
use thiserror::Error;

/// Maximum accepted line length, terminator included.
pub const MAX_LINE_LENGTH: usize = 100;

/// Errors decoding a controller line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("expected 6 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid numeric field '{0}'")]
    InvalidNumber(String),

    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    #[error("invalid hex payload")]
    InvalidHex,

    #[error("line too long: max {max}, got {got}")]
    LineTooLong { max: usize, got: usize },
}

/// Controller-facing transport: hands fully-formed messages to the
/// controller channel and polls for injected controller messages.
///
/// This interface is exposed, not implemented, by the core; a serial or
/// network bridge supplies it.
pub trait GatewayTransport {
    /// Deliver a message that terminated at the gateway to the controller.
    fn send(&mut self, msg: &Message) -> bool;

    /// Poll for one controller message to inject into the mesh.
    fn receive(&mut self) -> Option<Message>;
}

// ============================================================================
// Line codec
// ============================================================================

/// Format a message as a controller line (no terminator).
pub fn format_line(msg: &Message) -> String {
    let payload = match msg.payload_type {
        PayloadType::Raw => hex_encode(msg.payload()),
        _ => msg.get_str(),
    };
    format!(
        "{};{};{};{};{};{}",
        msg.sender,
        msg.sensor,
        msg.command as u8,
        u8::from(msg.ack_request),
        msg.msg_type,
        payload
    )
}

/// Parse a controller line into a message.
///
/// The line's leading address is the mesh destination; the gateway
/// becomes sender and last hop.
pub fn parse_line(line: &str) -> Result<Message, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.len() > MAX_LINE_LENGTH {
        return Err(ProtocolError::LineTooLong {
            max: MAX_LINE_LENGTH,
            got: line.len(),
        });
    }

    // Payload may contain ';', so split off the first five fields only.
    let fields: Vec<&str> = line.splitn(6, ';').collect();
    if fields.len() != 6 {
        return Err(ProtocolError::FieldCount(fields.len()));
    }

    let destination = parse_u8(fields[0])?;
    let sensor = parse_u8(fields[1])?;
    let command_raw = parse_u8(fields[2])?;
    let ack = parse_u8(fields[3])?;
    let msg_type = parse_u8(fields[4])?;
    let payload = fields[5];

    let command =
        Command::from_u8(command_raw).ok_or(ProtocolError::UnknownCommand(command_raw))?;

    let mut msg = Message::new(GATEWAY_ADDRESS, destination, sensor, command, msg_type);
    msg.ack_request = ack != 0;
    match command {
        Command::Stream => {
            let bytes = hex_decode(payload)?;
            msg.set_raw(&bytes);
        }
        _ => {
            msg.set_str(payload);
        }
    }
    Ok(msg)
}

fn parse_u8(field: &str) -> Result<u8, ProtocolError> {
    field
        .parse::<u8>()
        .map_err(|_| ProtocolError::InvalidNumber(field.to_string()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn hex_decode(text: &str) -> Result<Vec<u8>, ProtocolError> {
    if text.len() % 2 != 0 || text.len() / 2 > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::InvalidHex);
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| ProtocolError::InvalidHex))
        .collect()
}

// ============================================================================
// Line accumulation
// ============================================================================

/// Byte-at-a-time accumulator for the controller input stream.
///
/// Feeds bytes until a newline completes a line; an over-length line
/// discards the buffer and starts over.
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Feed one input byte. Returns a completed line (without the
    /// terminator) when a newline arrives.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' {
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            return Some(line);
        }
        if self.buf.len() >= MAX_LINE_LENGTH - 1 {
            // Over-length input: throw the whole line away.
            self.buf.clear();
            return None;
        }
        self.buf.push(byte);
        None
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
