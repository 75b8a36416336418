//! Integrity gates
//!
//! The data gate runs on the receiving node: it verifies `[Seq | Payload | CRC]`,
//! forwards the payload and produces the ACK body for every verified frame,
//! duplicates included (the receiver keeps no sequence state). The ACK gate
//! runs on the transmitting node and reduces a verified ACK to a one-byte token.
use bytes::{BufMut, Bytes, BytesMut};

use crate::contracts::{
    next_seq, AckMeta, AckToken, DataMeta, DropDiagnostic, DropReason, FramePath,
};
use crate::crc::CrcEngine;

/// Split `content` into body and big-endian trailer, verifying the checksum
fn check(crc: &CrcEngine, content: &Bytes) -> Option<Bytes> {
    let split = content.len().checked_sub(crate::CRC_LEN)?;
    let body = content.slice(..split);
    let trailer: [u8; 4] = content[split..].try_into().ok()?;
    crc.verify(&body, u32::from_be_bytes(trailer)).then_some(body)
}

/// Output of the data gate for a verified frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedData {
    pub payload: Bytes,
    pub meta: DataMeta,
    /// `[NextSeq | Payload]`, checksummed and wrapped by the caller
    pub ack_body: Bytes,
    pub ack_meta: AckMeta,
}

/// Verify-and-acknowledge gate for incoming data frames
#[derive(Debug, Clone, Copy)]
pub struct DataGate {
    payload_len: usize,
    crc: CrcEngine,
}

impl DataGate {
    pub fn new(payload_len: usize, crc: CrcEngine) -> Self {
        Self { payload_len, crc }
    }

    pub fn process(&self, content: &Bytes) -> Result<VerifiedData, DropDiagnostic> {
        let expected = crate::SEQ_LEN + self.payload_len + crate::CRC_LEN;
        let reject = |reason| DropDiagnostic::new(reason, FramePath::Data, content.clone());

        if content.len() < expected {
            return Err(reject(DropReason::ShortFrame));
        }
        if content.len() > expected {
            return Err(reject(DropReason::BadPayloadLen));
        }

        let body = check(&self.crc, content).ok_or_else(|| reject(DropReason::CrcFail))?;
        let seq = body[0];
        let payload = body.slice(crate::SEQ_LEN..);
        let ack = next_seq(seq);

        let mut ack_body = BytesMut::with_capacity(body.len());
        ack_body.put_u8(ack);
        ack_body.put_slice(&payload);

        Ok(VerifiedData {
            payload,
            meta: DataMeta { crc_ok: true, seq },
            ack_body: ack_body.freeze(),
            ack_meta: AckMeta { ack, crc_ok: true },
        })
    }
}

/// Minimal verify gate for incoming ACK frames
#[derive(Debug, Clone, Copy)]
pub struct AckGate {
    payload_len: usize,
    crc: CrcEngine,
}

impl AckGate {
    pub fn new(payload_len: usize, crc: CrcEngine) -> Self {
        Self { payload_len, crc }
    }

    pub fn process(&self, content: &Bytes) -> Result<AckToken, DropDiagnostic> {
        let reject = |reason| DropDiagnostic::new(reason, FramePath::Ack, content.clone());

        if content.len() != crate::SEQ_LEN + self.payload_len + crate::CRC_LEN {
            return Err(reject(DropReason::BadLen));
        }

        // The echoed payload only exists to give ACKs the same CRC coverage as data.
        let body = check(&self.crc, content).ok_or_else(|| reject(DropReason::CrcFail))?;
        Ok(AckToken::new(body[0]))
    }
}
