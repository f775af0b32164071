//! Frame codec for the Nothing SPP protocol.
//!
//! Every exchange on the RFCOMM link is a single frame:
//!
//! ```text
//! 55 60 01 | opcode:u16le | len:u8 | 00 | operation:u8 | payload[len] | crc:u16le
//! ```
//!
//! The checksum is CRC-16/MODBUS computed over header and payload. Frames
//! carry no correlation id, so a response is matched to its request purely
//! by opcode and ordering.

use log::{debug, warn};
use smallvec::SmallVec;
use thiserror::Error;

pub type Payload = SmallVec<[u8; 32]>;

pub const HEADER_MAGIC: [u8; 3] = [0x55, 0x60, 0x01];
pub const HEADER_LEN: usize = 8;
pub const CRC_LEN: usize = 2;
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Error type for frame encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
   /// Byte length disagrees with the header, or a field holds an invalid value
   #[error("Malformed frame: {0}")]
   Malformed(String),

   /// Integrity field does not match the recomputed checksum
   #[error("Checksum mismatch: frame carries 0x{expected:04x}, computed 0x{actual:04x}")]
   ChecksumMismatch { expected: u16, actual: u16 },

   /// A value lies outside the interval the device accepts
   #[error("{field} out of range: {value} not in [{min}, {max}]")]
   OutOfRange {
      field: &'static str,
      value: i64,
      min: i64,
      max: i64,
   },

   /// Frame decoded but does not carry the expected response
   #[error("Unexpected frame 0x{opcode:04x} while decoding {expected}")]
   UnexpectedResponse { opcode: u16, expected: &'static str },
}

impl ProtocolError {
   pub fn malformed(reason: impl Into<String>) -> Self {
      Self::Malformed(reason.into())
   }

   pub const fn kind(&self) -> &'static str {
      match self {
         Self::Malformed(_) => "malformed",
         Self::ChecksumMismatch { .. } => "checksum_mismatch",
         Self::OutOfRange { .. } => "out_of_range",
         Self::UnexpectedResponse { .. } => "unexpected_response",
      }
   }
}

/// Checks `value` against the closed interval `[min, max]`.
pub fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ProtocolError> {
   if (min..=max).contains(&value) {
      Ok(())
   } else {
      Err(ProtocolError::OutOfRange {
         field,
         value,
         min,
         max,
      })
   }
}

/// A single protocol frame, request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
   pub opcode: u16,
   pub operation_id: u8,
   pub payload: Payload,
}

impl Frame {
   /// Builds a frame, rejecting payloads the one-byte length field cannot describe.
   pub fn new(opcode: u16, payload: &[u8]) -> Result<Self, ProtocolError> {
      check_range(
         "payload length",
         payload.len() as i64,
         0,
         MAX_PAYLOAD_LEN as i64,
      )?;
      Ok(Self {
         opcode,
         operation_id: 0,
         payload: Payload::from_slice(payload),
      })
   }

   pub fn with_operation_id(mut self, operation_id: u8) -> Self {
      self.operation_id = operation_id;
      self
   }

   pub fn encoded_len(&self) -> usize {
      HEADER_LEN + self.payload.len() + CRC_LEN
   }

   /// Serializes the frame including its checksum.
   pub fn encode(&self) -> Vec<u8> {
      let mut bytes = Vec::with_capacity(self.encoded_len());
      bytes.extend_from_slice(&HEADER_MAGIC);
      bytes.extend_from_slice(&self.opcode.to_le_bytes());
      bytes.push(self.payload.len() as u8);
      bytes.push(0x00);
      bytes.push(self.operation_id);
      bytes.extend_from_slice(&self.payload);
      let crc = crc16(&bytes);
      bytes.extend_from_slice(&crc.to_le_bytes());
      bytes
   }

   /// Parses exactly one frame from `bytes`.
   pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
      if bytes.len() < HEADER_LEN + CRC_LEN {
         return Err(ProtocolError::malformed(format!(
            "{} bytes is shorter than an empty frame",
            bytes.len()
         )));
      }
      if bytes[..3] != HEADER_MAGIC {
         return Err(ProtocolError::malformed(format!(
            "bad header magic {}",
            hex::encode(&bytes[..3])
         )));
      }

      let payload_len = bytes[5] as usize;
      let total_len = HEADER_LEN + payload_len + CRC_LEN;
      if bytes.len() != total_len {
         return Err(ProtocolError::malformed(format!(
            "header declares {payload_len} payload bytes ({total_len} total), got {}",
            bytes.len()
         )));
      }

      let body = &bytes[..total_len - CRC_LEN];
      let expected = u16::from_le_bytes([bytes[total_len - 2], bytes[total_len - 1]]);
      let actual = crc16(body);
      if expected != actual {
         return Err(ProtocolError::ChecksumMismatch { expected, actual });
      }

      Ok(Self {
         opcode: u16::from_le_bytes([bytes[3], bytes[4]]),
         operation_id: bytes[7],
         payload: Payload::from_slice(&bytes[HEADER_LEN..HEADER_LEN + payload_len]),
      })
   }
}

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(bytes: &[u8]) -> u16 {
   let mut crc: u16 = 0xFFFF;
   for &byte in bytes {
      crc ^= u16::from(byte);
      for _ in 0..8 {
         if crc & 1 == 1 {
            crc = (crc >> 1) ^ 0xA001;
         } else {
            crc >>= 1;
         }
      }
   }
   crc
}

/// Reassembles frames from an RFCOMM byte stream.
///
/// Bytes ahead of a header magic are discarded so the reader resynchronizes
/// after line noise or a partially read frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
   buf: Vec<u8>,
}

impl FrameBuffer {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn extend(&mut self, bytes: &[u8]) {
      self.buf.extend_from_slice(bytes);
   }

   pub fn len(&self) -> usize {
      self.buf.len()
   }

   pub fn is_empty(&self) -> bool {
      self.buf.is_empty()
   }

   /// Pops the next complete frame, or `None` if more bytes are needed.
   pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
      loop {
         let Some(start) = self.buf.iter().position(|&b| b == HEADER_MAGIC[0]) else {
            if !self.buf.is_empty() {
               debug!("Discarding {} bytes of noise", self.buf.len());
               self.buf.clear();
            }
            return None;
         };
         if start > 0 {
            debug!("Skipping {start} bytes before header");
            self.buf.drain(..start);
         }
         if self.buf.len() < HEADER_LEN {
            return None;
         }
         if self.buf[1..3] != HEADER_MAGIC[1..] {
            self.buf.drain(..1);
            continue;
         }

         let total_len = HEADER_LEN + self.buf[5] as usize + CRC_LEN;
         if self.buf.len() < total_len {
            return None;
         }
         let bytes: Vec<u8> = self.buf.drain(..total_len).collect();
         let result = Frame::decode(&bytes);
         if let Err(e) = &result {
            warn!("Dropping frame {}: {e}", hex::encode(&bytes));
         }
         return Some(result);
      }
   }
}
