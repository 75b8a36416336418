//! Receive pipeline
//!
//! Every received buffer is offered to both paths, since one transport stream
//! carries data and ACK frames alike:
//!
//! ```text
//! buffer -> scanner -> DataFilter -> DataGate -> AckBody + DataFrame
//!        -> scanner -> AckFilter  -> AckGate  -> AckToken
//! ```
//!
//! The pipeline is stateless apart from the shared configuration and runs on
//! whichever thread delivers the buffer.
use bytes::Bytes;

use crate::config::SharedConfig;
use crate::contracts::LinkMessage;
use crate::crc::CrcEngine;
use crate::filter::{AckFilter, DataFilter, FilterOutcome};
use crate::integrity::{AckGate, DataGate};

pub struct Receiver {
    data_filter: DataFilter,
    ack_filter: AckFilter,
    data_gate: DataGate,
    ack_gate: AckGate,
}

impl Receiver {
    pub fn new(config: SharedConfig) -> Self {
        let payload_len = config.payload_len();
        let crc = CrcEngine::new(config.crc_variant());

        Self {
            data_filter: DataFilter::new(config.clone()),
            ack_filter: AckFilter::new(config),
            data_gate: DataGate::new(payload_len, crc),
            ack_gate: AckGate::new(payload_len, crc),
        }
    }

    /// Run one buffer through both paths
    ///
    /// For a verified data frame the ACK body is emitted ahead of the payload
    /// so the caller can put it on the channel first.
    pub fn process(&self, buf: &Bytes) -> Vec<LinkMessage> {
        let mut out = Vec::with_capacity(2);
        self.process_data(buf, &mut out);
        self.process_ack(buf, &mut out);
        out
    }

    /// Data path only
    pub fn process_data(&self, buf: &Bytes, out: &mut Vec<LinkMessage>) {
        match self.data_filter.process(buf) {
            FilterOutcome::Forward(frame) => match self.data_gate.process(&frame.content) {
                Ok(verified) => {
                    out.push(LinkMessage::AckBody {
                        body: verified.ack_body,
                        meta: verified.ack_meta,
                    });
                    out.push(LinkMessage::DataFrame {
                        payload: verified.payload,
                        meta: verified.meta,
                    });
                }
                Err(drop) => out.push(LinkMessage::Drop(drop)),
            },
            FilterOutcome::Ignored => {}
            FilterOutcome::Dropped(drop) => out.push(LinkMessage::Drop(drop)),
        }
    }

    /// ACK path only
    pub fn process_ack(&self, buf: &Bytes, out: &mut Vec<LinkMessage>) {
        match self.ack_filter.process(buf) {
            FilterOutcome::Forward(frame) => match self.ack_gate.process(&frame.content) {
                Ok(token) => out.push(LinkMessage::AckToken(token)),
                Err(drop) => out.push(LinkMessage::Drop(drop)),
            },
            FilterOutcome::Ignored => {}
            FilterOutcome::Dropped(drop) => out.push(LinkMessage::Drop(drop)),
        }
    }
}
