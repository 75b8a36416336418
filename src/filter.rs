//! Address/type filters
//!
//! Two independent instances sit behind the preamble scanner. The data filter
//! forwards everything after the header and leaves length checking to the
//! integrity gate; the ACK filter cuts out a fixed-length content window.
//! Both read the local address from [`SharedConfig`] on every buffer, so an
//! address change applies from the next frame onward.
use bytes::Bytes;

use crate::config::SharedConfig;
use crate::contracts::{DropDiagnostic, DropReason, FrameMeta, FramePath, FrameType};
use crate::scanner;

/// Content forwarded to an integrity gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredFrame {
    pub meta: FrameMeta,
    /// `[Seq | Payload | CRC]` with preamble and header stripped
    pub content: Bytes,
}

/// Result of running one buffer through a filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Forward(FilteredFrame),
    /// Valid traffic of the other frame type; discarded without a diagnostic
    Ignored,
    Dropped(DropDiagnostic),
}

/// Header fields located after the preamble
struct Located {
    /// Offset of the first content byte (after address and type)
    content_start: usize,
    address: u8,
    frame_type: u8,
}

/// Scanner + short-buffer + address checks shared by both filters
fn locate(
    buf: &Bytes,
    local_address: u8,
    path: FramePath,
) -> Result<Located, DropDiagnostic> {
    let header_start = scanner::frame_start(buf)
        .ok_or_else(|| DropDiagnostic::new(DropReason::PreambleNotFound, path, buf.clone()))?;

    if buf.len() < header_start + crate::HEADER_LEN {
        return Err(DropDiagnostic::new(DropReason::ShortAfterPreamble, path, buf.clone()));
    }

    let address = buf[header_start];
    if address != local_address {
        return Err(DropDiagnostic::new(DropReason::AddrMismatch, path, buf.clone()));
    }

    Ok(Located {
        content_start: header_start + crate::HEADER_LEN,
        address,
        frame_type: buf[header_start + 1],
    })
}

/// Filter for the data path
#[derive(Debug, Clone)]
pub struct DataFilter {
    config: SharedConfig,
}

impl DataFilter {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    pub fn process(&self, buf: &Bytes) -> FilterOutcome {
        let located = match locate(buf, self.config.address(), FramePath::Data) {
            Ok(located) => located,
            Err(drop) => return FilterOutcome::Dropped(drop),
        };

        if located.frame_type != FrameType::Data.as_byte() {
            return FilterOutcome::Ignored;
        }

        let content = buf.slice(located.content_start..);
        let Some(&seq) = content.first() else {
            return FilterOutcome::Dropped(DropDiagnostic::new(
                DropReason::ShortFrame,
                FramePath::Data,
                buf.clone(),
            ));
        };

        FilterOutcome::Forward(FilteredFrame {
            meta: FrameMeta {
                address: located.address,
                seq,
            },
            content,
        })
    }
}

/// Filter for the ACK path
#[derive(Debug, Clone)]
pub struct AckFilter {
    config: SharedConfig,
}

impl AckFilter {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    /// Length of `[NextSeq | Payload | CRC]`
    fn window_len(&self) -> usize {
        crate::SEQ_LEN + self.config.payload_len() + crate::CRC_LEN
    }

    pub fn process(&self, buf: &Bytes) -> FilterOutcome {
        let located = match locate(buf, self.config.address(), FramePath::Ack) {
            Ok(located) => located,
            Err(drop) => return FilterOutcome::Dropped(drop),
        };

        if located.frame_type != FrameType::Ack.as_byte() {
            return FilterOutcome::Ignored;
        }

        let end = located.content_start + self.window_len();
        if buf.len() < end {
            return FilterOutcome::Dropped(DropDiagnostic::new(
                DropReason::ShortAckWindow,
                FramePath::Ack,
                buf.clone(),
            ));
        }

        let content = buf.slice(located.content_start..end);
        FilterOutcome::Forward(FilteredFrame {
            meta: FrameMeta {
                address: located.address,
                seq: content[0],
            },
            content,
        })
    }
}
