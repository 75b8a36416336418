//! HalfLink Core - half-duplex link layer over byte-stream radio links
//!
//! **Creator**: Shayan Golmezerji
//! **License**: Creative Commons Attribution 4.0 International (CC BY 4.0)
//!
//! Frames outgoing payloads, recovers frames from a noisy and misaligned
//! incoming byte stream, checks every frame with CRC-32 and delivers data
//! reliably with stop-and-wait ARQ. Outgoing ACKs take priority over outgoing
//! data on the shared channel.
//!
//! # Wire format
//! ```text
//! DATA: PREAMBLE(128) | ADDR | 0x01 | SEQ      | PAYLOAD | CRC32_BE(SEQ | PAYLOAD)
//! ACK:  PREAMBLE(128) | ADDR | 0x02 | NEXT_SEQ | PAYLOAD | CRC32_BE(NEXT_SEQ | PAYLOAD)
//! ```
//!
//! # Quick start
//! ```no_run
//! use std::sync::Arc;
//! use halflink_core::{LinkConfig, LinkNode, MemoryLink, ReceivePump};
//!
//! let (a, b) = MemoryLink::duplex();
//! let node = Arc::new(LinkNode::new(LinkConfig::new(1, 2), Arc::new(a.sender))?);
//! let _pump = ReceivePump::spawn(Arc::clone(&node), a.receiver)?;
//! node.start()?;
//! node.submit(b"hello")?;
//! # drop(b);
//! # Ok::<(), halflink_core::LinkError>(())
//! ```

pub mod errors;
pub mod config;
pub mod contracts;
pub mod crc;
pub mod codec;
pub mod scanner;
pub mod filter;
pub mod integrity;
pub mod receiver;
pub mod transmitter;
pub mod arq;
pub mod node;

pub use arq::{ArqEngine, ArqStats};
pub use config::{LinkConfig, SharedConfig};
pub use contracts::{
    AckToken, DataMeta, DropDiagnostic, DropReason, FrameType, LinkMessage, TransmitOutcome,
    TransmitReport, TxState,
};
pub use crc::{CrcEngine, CrcVariant};
pub use errors::{LinkError, Result};
pub use node::{LinkNode, ReceivePump};
pub use transmitter::{FrameSource, MemoryLink, Transport, UdpTransport};

/// Frame synchronization pattern; must be byte-identical on both link ends
pub const PREAMBLE: [u8; 128] = {
    const PATTERN: [u8; 32] = [
        0xD3, 0x42, 0xA1, 0x7F, 0x9C, 0xE2, 0x55, 0xAA,
        0x13, 0x87, 0x4E, 0xB1, 0x2C, 0xF0, 0x99, 0x6D,
        0x3A, 0xC4, 0x1F, 0x82, 0x5B, 0xD8, 0x66, 0xE7,
        0x24, 0x91, 0x7C, 0x0B, 0x38, 0xF2, 0x4D, 0xC6,
    ];
    let mut out = [0u8; 128];
    let mut i = 0;
    while i < out.len() {
        out[i] = PATTERN[i % PATTERN.len()];
        i += 1;
    }
    out
};

/// CRC-32 generator polynomial (normal form)
pub const CRC_POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Checksum trailer length
pub const CRC_LEN: usize = 4;

/// Address + frame type
pub const HEADER_LEN: usize = 2;

/// Sequence number length
pub const SEQ_LEN: usize = 1;

/// Default payload block size in bytes
pub const DEFAULT_PAYLOAD_LEN: usize = 40;

/// Default ACK wait per attempt, in seconds
pub const DEFAULT_WAIT_TIME_S: f64 = 0.3;

/// Upper bound on the ACK wait per attempt, in seconds
pub const MAX_WAIT_TIME_S: u64 = 3600;

/// Default retransmissions after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default data hold-off after sending a local ACK
pub const DEFAULT_GUARD_INTERVAL_MS: u32 = 150;

/// Sleep increment while waiting out the guard interval
pub const GUARD_POLL_INTERVAL_MS: u64 = 10;

/// Longest a worker blocks before re-checking its run flag
pub const WORKER_WAKE_INTERVAL_MS: u64 = 100;

/// Bound on waiting for the transmit worker to exit
pub const WORKER_JOIN_TIMEOUT_MS: u64 = 1000;

/// Datagram buffer size for the UDP binding
pub const UDP_RECV_BUFFER_SIZE: usize = 2048;
