//! Core data structures for the link protocol
//!
//! Typed messages and metadata records that flow between the receive
//! pipeline, the ARQ engine and the application. Each message kind carries its
//! own metadata struct rather than a key/value dictionary.
use std::fmt;
use std::time::Instant;

use bytes::Bytes;

use crate::errors::LinkError;

/// Frame type byte following the address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x01,
    Ack = 0x02,
}

impl FrameType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Ack),
            other => Err(LinkError::InvalidFrameType(other)),
        }
    }
}

/// Sequence number following `seq`, modulo 256
#[inline]
pub fn next_seq(seq: u8) -> u8 {
    seq.wrapping_add(1)
}

/// Which receive path produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePath {
    Data,
    Ack,
}

impl fmt::Display for FramePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::Ack => f.write_str("ack"),
        }
    }
}

/// Why a received buffer was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// No preamble occurrence in the buffer
    PreambleNotFound,
    /// Preamble found but address/type bytes missing
    ShortAfterPreamble,
    /// Frame addressed to another node
    AddrMismatch,
    /// ACK frame shorter than the fixed ACK content window
    ShortAckWindow,
    /// Data content shorter than `[Seq | Payload | CRC]`
    ShortFrame,
    /// Data content longer than `[Seq | Payload | CRC]`
    BadPayloadLen,
    /// ACK content of the wrong length
    BadLen,
    /// Checksum mismatch
    CrcFail,
    /// Unexpected fault while processing the buffer
    Internal,
}

/// Error class of a drop, used to pick a log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropClass {
    Alignment,
    Addressing,
    Integrity,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreambleNotFound => "preamble_not_found",
            Self::ShortAfterPreamble => "short_after_preamble",
            Self::AddrMismatch => "addr_mismatch",
            Self::ShortAckWindow => "short_ack_window",
            Self::ShortFrame => "short_frame",
            Self::BadPayloadLen => "bad_payload_len",
            Self::BadLen => "bad_len",
            Self::CrcFail => "crc_fail",
            Self::Internal => "internal",
        }
    }

    pub fn class(&self) -> DropClass {
        match self {
            Self::PreambleNotFound | Self::ShortAfterPreamble | Self::ShortAckWindow => {
                DropClass::Alignment
            }
            Self::AddrMismatch => DropClass::Addressing,
            Self::ShortFrame | Self::BadPayloadLen | Self::BadLen | Self::CrcFail | Self::Internal => {
                DropClass::Integrity
            }
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic record for a discarded buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropDiagnostic {
    pub reason: DropReason,
    pub path: FramePath,
    /// The bytes that were rejected, as seen by the dropping stage
    pub frame: Bytes,
}

impl DropDiagnostic {
    pub fn new(reason: DropReason, path: FramePath, frame: Bytes) -> Self {
        Self { reason, path, frame }
    }
}

/// Metadata attached by an address/type filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub address: u8,
    pub seq: u8,
}

/// Metadata of a verified data payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMeta {
    pub crc_ok: bool,
    pub seq: u8,
}

/// Metadata of an ACK body or token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMeta {
    pub ack: u8,
    pub crc_ok: bool,
}

/// Compact ACK signal consumed by the ARQ engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckToken {
    pub next_seq: u8,
    pub meta: AckMeta,
}

impl AckToken {
    pub fn new(next_seq: u8) -> Self {
        Self {
            next_seq,
            meta: AckMeta {
                ack: next_seq,
                crc_ok: true,
            },
        }
    }

    /// One-byte wire form of the token
    pub fn to_bytes(&self) -> [u8; 1] {
        [self.next_seq]
    }
}

/// Output of the receive pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMessage {
    /// Verified application payload
    DataFrame { payload: Bytes, meta: DataMeta },
    /// `[NextSeq | Payload]` to be checksummed, wrapped and sent back
    AckBody { body: Bytes, meta: AckMeta },
    /// Verified acknowledgment for the local transmit loop
    AckToken(AckToken),
    /// Discarded buffer
    Drop(DropDiagnostic),
}

/// Lifecycle of a payload inside the ARQ engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Queued,
    Transmitting,
    AwaitingAck,
    Retrying,
    Acked,
    GivenUp,
}

/// The single in-flight frame
#[derive(Debug, Clone)]
pub struct PendingTransmission {
    pub seq: u8,
    /// Complete wire frame, retransmitted unchanged
    pub frame: Bytes,
    /// Retransmissions so far (0 on the first attempt)
    pub retries: u32,
    /// ACK deadline of the current attempt
    pub deadline: Instant,
}

/// Final outcome of a pending transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    Acked,
    GivenUp,
}

/// Report emitted when a pending transmission finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitReport {
    pub seq: u8,
    /// Total transmissions of this frame
    pub attempts: u32,
    pub outcome: TransmitOutcome,
}
