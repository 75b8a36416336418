//! Frame codec - wire layout serialization
//!
//! ```text
//! PREAMBLE(128) | ADDR(1) | TYPE(1) | SEQ(1) | PAYLOAD(n) | CRC32(4, big-endian)
//! ```
//!
//! The CRC covers `SEQ | PAYLOAD` only. Building a frame is three steps:
//! encode the body, append its checksum, wrap it in preamble and header.
use bytes::{BufMut, Bytes, BytesMut};

use crate::contracts::FrameType;
use crate::crc::CrcEngine;
use crate::errors::{LinkError, Result};
use crate::PREAMBLE;

/// Stateless encoder bound to a payload length and CRC variant
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    payload_len: usize,
    crc: CrcEngine,
}

impl FrameCodec {
    pub fn new(payload_len: usize, crc: CrcEngine) -> Self {
        Self { payload_len, crc }
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn crc(&self) -> &CrcEngine {
        &self.crc
    }

    /// `SEQ | PAYLOAD`
    pub fn encode_data(&self, seq: u8, payload: &[u8]) -> Result<Bytes> {
        self.encode_body(seq, payload)
    }

    /// `NEXT_SEQ | PAYLOAD`
    pub fn encode_ack(&self, next_seq: u8, payload: &[u8]) -> Result<Bytes> {
        self.encode_body(next_seq, payload)
    }

    fn encode_body(&self, lead: u8, payload: &[u8]) -> Result<Bytes> {
        if payload.len() != self.payload_len {
            return Err(LinkError::Length {
                expected: self.payload_len,
                actual: payload.len(),
            });
        }

        let mut body = BytesMut::with_capacity(crate::SEQ_LEN + self.payload_len + crate::CRC_LEN);
        body.put_u8(lead);
        body.put_slice(payload);
        Ok(body.freeze())
    }

    /// Append the big-endian checksum of `body`
    pub fn append_crc(&self, body: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(body.len() + crate::CRC_LEN);
        out.put_slice(body);
        out.put_u32(self.crc.compute(body));
        out.freeze()
    }

    /// Complete data frame ready for the transport
    pub fn build_data_frame(&self, address: u8, seq: u8, payload: &[u8]) -> Result<Bytes> {
        let body = self.encode_data(seq, payload)?;
        Ok(wrap(address, FrameType::Data, &self.append_crc(&body)))
    }

    /// Complete ACK frame ready for the transport
    pub fn build_ack_frame(&self, address: u8, next_seq: u8, payload: &[u8]) -> Result<Bytes> {
        let body = self.encode_ack(next_seq, payload)?;
        Ok(wrap(address, FrameType::Ack, &self.append_crc(&body)))
    }
}

/// Prepend `PREAMBLE | address | type` to `body`
pub fn wrap(address: u8, frame_type: FrameType, body: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(PREAMBLE.len() + crate::HEADER_LEN + body.len());
    frame.put_slice(&PREAMBLE);
    frame.put_u8(address);
    frame.put_u8(frame_type.as_byte());
    frame.put_slice(body);
    frame.freeze()
}

/// [`wrap`] for an untyped frame-type byte
pub fn wrap_raw(address: u8, frame_type: u8, body: &[u8]) -> Result<Bytes> {
    Ok(wrap(address, FrameType::try_from(frame_type)?, body))
}

/// Zero-pad or truncate `data` to exactly `payload_len` bytes
pub fn pad_payload(data: &[u8], payload_len: usize) -> Bytes {
    let mut out = BytesMut::zeroed(payload_len);
    let n = data.len().min(payload_len);
    out[..n].copy_from_slice(&data[..n]);
    out.freeze()
}
