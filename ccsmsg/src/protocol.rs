//! Protocol definitions for Ccs
//!
//! Every message on a Ccs, ISS or DpRt connection is a frame: a 4-byte
//! big-endian length followed by that many bytes of JSON. The JSON document
//! is a `ProtocolMessage` wrapping the command or reply.

use std::io::{Read, Write};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::error::{CcsError, CcsResult};

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message size in bytes
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol message header
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol version
    pub version: u8,
    /// Length of the serialized payload
    pub length: u32,
}

/// A protocol message wrapping a command or a reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage<T> {
    pub header: MessageHeader,
    pub payload: T,
}

impl<T: Serialize> ProtocolMessage<T> {
    /// Wrap a payload, recording its serialized length
    pub fn new(payload: T) -> Result<Self, serde_json::Error> {
        let payload_bytes = serde_json::to_vec(&payload)?;
        Ok(Self {
            header: MessageHeader {
                version: PROTOCOL_VERSION,
                length: payload_bytes.len() as u32,
            },
            payload,
        })
    }

    /// Serialize the entire message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> ProtocolMessage<T> {
    /// Deserialize a message from bytes, checking the protocol version
    pub fn from_bytes(data: &[u8]) -> CcsResult<Self> {
        let msg: Self = serde_json::from_slice(data)?;
        if msg.header.version != PROTOCOL_VERSION {
            return Err(CcsError::Protocol(format!(
                "Unsupported protocol version {}", msg.header.version
            )));
        }
        Ok(msg)
    }
}

/// Write one framed message
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, payload: &T) -> CcsResult<()> {
    let data = ProtocolMessage::new(payload)?.to_bytes()?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CcsError::Protocol(format!("Message of {} bytes is too long", data.len())));
    }
    // Send length prefix (4 bytes big endian)
    let len_bytes = (data.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> CcsResult<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len == 0 || len > MAX_MESSAGE_SIZE {
        return Err(CcsError::Protocol(format!("Invalid message length {}", len)));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    let msg = ProtocolMessage::<T>::from_bytes(&data)?;
    Ok(msg.payload)
}
