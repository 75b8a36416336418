//! Link configuration
//!
//! `LinkConfig` is a plain value with fluent setters. Components that must
//! observe runtime address changes hold a [`SharedConfig`] handle instead of a
//! copy, so an update reaches every filter and the transmit path at once.
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::crc::CrcVariant;
use crate::errors::{LinkError, Result};

/// Configuration surface of a link node
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Local address; incoming frames for any other address are dropped
    pub address: u8,

    /// Destination address stamped on outgoing data and ACK frames
    pub peer_address: u8,

    /// Fixed payload block length in bytes
    pub payload_len: usize,

    /// How long to wait for a matching ACK before retransmitting
    pub wait_time: Duration,

    /// Retransmissions allowed after the first attempt
    pub max_retries: u32,

    /// Checksum parameterization, shared by both link ends
    pub crc_variant: CrcVariant,

    /// Data transmission hold-off after this node starts sending an ACK
    pub guard_interval: Duration,

    /// Sleep increment while waiting out the guard interval
    pub guard_poll_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: 0,
            peer_address: 0,
            payload_len: crate::DEFAULT_PAYLOAD_LEN,
            wait_time: Duration::from_secs_f64(crate::DEFAULT_WAIT_TIME_S),
            max_retries: crate::DEFAULT_MAX_RETRIES,
            crc_variant: CrcVariant::default(),
            guard_interval: Duration::from_millis(crate::DEFAULT_GUARD_INTERVAL_MS as u64),
            guard_poll_interval: Duration::from_millis(crate::GUARD_POLL_INTERVAL_MS),
        }
    }
}

impl LinkConfig {
    pub fn new(address: u8, peer_address: u8) -> Self {
        Self {
            address,
            peer_address,
            ..Self::default()
        }
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_peer_address(mut self, peer_address: u8) -> Self {
        self.peer_address = peer_address;
        self
    }

    pub fn with_payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    /// Set the ACK wait time in (fractional) seconds
    ///
    /// Invalid values are kept as zero and rejected by [`validate`](Self::validate).
    pub fn with_wait_time_s(mut self, seconds: f64) -> Self {
        self.wait_time = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_crc_variant(mut self, crc_variant: CrcVariant) -> Self {
        self.crc_variant = crc_variant;
        self
    }

    pub fn with_guard_interval_ms(mut self, guard_interval_ms: u32) -> Self {
        self.guard_interval = Duration::from_millis(guard_interval_ms as u64);
        self
    }

    pub fn with_guard_poll_interval(mut self, interval: Duration) -> Self {
        self.guard_poll_interval = interval;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.payload_len == 0 {
            return Err(LinkError::config("payload_len must be greater than zero"));
        }
        if self.wait_time.is_zero() {
            return Err(LinkError::config("wait_time must be a positive, finite duration"));
        }
        if self.wait_time > Duration::from_secs(crate::MAX_WAIT_TIME_S) {
            return Err(LinkError::config(format!(
                "wait_time must not exceed {}s",
                crate::MAX_WAIT_TIME_S
            )));
        }
        if self.guard_poll_interval.is_zero() {
            return Err(LinkError::config("guard_poll_interval must be greater than zero"));
        }
        Ok(())
    }

    /// Length of `[Seq | Payload | CRC]`, the content both integrity gates expect
    pub fn frame_content_len(&self) -> usize {
        crate::SEQ_LEN + self.payload_len + crate::CRC_LEN
    }

    /// Length of a complete frame on the wire, preamble included
    pub fn wire_frame_len(&self) -> usize {
        crate::PREAMBLE.len() + crate::HEADER_LEN + self.frame_content_len()
    }
}

/// Shared, runtime-updatable configuration handle
///
/// Cloning is cheap; all clones observe the same settings. Only the addresses
/// are mutable after construction: payload length and CRC variant define the
/// wire format and stay fixed.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<LinkConfig>>,
}

impl SharedConfig {
    /// Validate and wrap a configuration
    pub fn new(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> LinkConfig {
        self.inner.read().clone()
    }

    pub fn address(&self) -> u8 {
        self.inner.read().address
    }

    pub fn peer_address(&self) -> u8 {
        self.inner.read().peer_address
    }

    pub fn payload_len(&self) -> usize {
        self.inner.read().payload_len
    }

    pub fn crc_variant(&self) -> CrcVariant {
        self.inner.read().crc_variant
    }

    /// Change the local address; applies from the next frame processed
    pub fn set_address(&self, address: u8) {
        self.inner.write().address = address;
    }

    /// Change the destination address; applies from the next frame built
    pub fn set_peer_address(&self, peer_address: u8) {
        self.inner.write().peer_address = peer_address;
    }
}
