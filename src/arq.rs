//! ARQ engine - stop-and-wait reliable delivery
//!
//! One dedicated worker thread drains the payload queue, keeping exactly one
//! frame in flight. Each frame is retransmitted every `wait_time` until a
//! matching ACK token arrives or `max_retries` retransmissions have been spent.
//! The sequence counter advances in both cases, so a frame that was given up
//! still consumes its sequence number.
//!
//! Before every attempt the worker also waits out the local-ACK guard window:
//! on a half-duplex channel this node's own outgoing ACK always goes first.
//!
//! Cross-thread state is split three ways: the queue (mutex + condvar, pushed
//! by the application), the ACK slot (mutex + condvar, set by the receive
//! path) and the guard deadline (an atomic timestamp, no locking).
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::codec::{pad_payload, FrameCodec};
use crate::config::{LinkConfig, SharedConfig};
use crate::contracts::{
    next_seq, PendingTransmission, TransmitOutcome, TransmitReport, TxState,
};
use crate::crc::CrcEngine;
use crate::errors::{LinkError, Result};
use crate::transmitter::Transport;

/// Callback invoked once per finished transmission
pub type ReportHook = Box<dyn Fn(&TransmitReport) + Send + Sync>;

/// Counters since the engine was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArqStats {
    /// Frames handed to the transport, retransmissions included
    pub transmissions: u64,
    pub acked: u64,
    pub given_up: u64,
    /// ACK tokens that did not match the frame in flight
    pub stale_acks: u64,
}

#[derive(Default)]
struct Counters {
    transmissions: AtomicU64,
    acked: AtomicU64,
    given_up: AtomicU64,
    stale_acks: AtomicU64,
}

/// ACK token exchange between the receive path and the worker
#[derive(Default)]
struct AckSlot {
    /// Token the in-flight frame is waiting for
    expected: Option<u8>,
    /// Most recent token received, matching or not
    last: Option<u8>,
    matched: bool,
}

struct Shared {
    config: SharedConfig,
    codec: FrameCodec,
    transport: Arc<dyn Transport>,

    running: AtomicBool,
    stopped: AtomicBool,

    queue: Mutex<VecDeque<Bytes>>,
    queue_cv: Condvar,

    ack: Mutex<AckSlot>,
    ack_cv: Condvar,

    /// Reference point for `guard_until_us`
    epoch: Instant,
    guard_until_us: AtomicU64,

    seq: AtomicU8,
    state: Mutex<TxState>,
    pending: Mutex<Option<PendingTransmission>>,
    counters: Counters,
    report_hook: RwLock<Option<ReportHook>>,
}

/// Stop-and-wait transmit engine
pub struct ArqEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ArqEngine {
    /// Create a stopped engine; payloads may be queued before [`start`](Self::start)
    pub fn new(config: SharedConfig, transport: Arc<dyn Transport>) -> Self {
        let codec = FrameCodec::new(config.payload_len(), CrcEngine::new(config.crc_variant()));

        Self {
            shared: Arc::new(Shared {
                config,
                codec,
                transport,
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                queue: Mutex::new(VecDeque::new()),
                queue_cv: Condvar::new(),
                ack: Mutex::new(AckSlot::default()),
                ack_cv: Condvar::new(),
                epoch: Instant::now(),
                guard_until_us: AtomicU64::new(0),
                seq: AtomicU8::new(0),
                state: Mutex::new(TxState::Idle),
                pending: Mutex::new(None),
                counters: Counters::default(),
                report_hook: RwLock::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the transmit worker
    pub fn start(&self) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(LinkError::EngineStopped);
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("halflink-arq".into())
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                LinkError::Io(e)
            })?;

        *worker = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait (bounded) for it to exit
    ///
    /// Queued payloads that were never sent are discarded.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        {
            let _queue = self.shared.queue.lock();
            self.shared.queue_cv.notify_all();
        }
        {
            let _ack = self.shared.ack.lock();
            self.shared.ack_cv.notify_all();
        }

        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        let deadline = Instant::now() + Duration::from_millis(crate::WORKER_JOIN_TIMEOUT_MS);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("ARQ worker exited with a panic");
            }
        } else {
            warn!("ARQ worker did not exit within {}ms, detaching", crate::WORKER_JOIN_TIMEOUT_MS);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Queue application data for transmission
    ///
    /// Data shorter than the payload size is zero-padded. Longer data is
    /// rejected: chunking is the caller's job.
    pub fn submit(&self, data: &[u8]) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(LinkError::EngineStopped);
        }

        let payload_len = self.shared.codec.payload_len();
        if data.len() > payload_len {
            return Err(LinkError::PayloadTooLarge {
                len: data.len(),
                max: payload_len,
            });
        }

        let payload = pad_payload(data, payload_len);
        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(payload);
            self.shared.queue_cv.notify_one();
        }

        let mut state = self.shared.state.lock();
        if matches!(*state, TxState::Idle | TxState::Acked | TxState::GivenUp) {
            *state = TxState::Queued;
        }
        Ok(())
    }

    /// Feed a verified ACK token from the receive path
    pub fn on_ack_token(&self, next_seq: u8) {
        let mut slot = self.shared.ack.lock();
        slot.last = Some(next_seq);

        if slot.expected == Some(next_seq) {
            slot.matched = true;
            self.shared.ack_cv.notify_all();
            debug!(ack = next_seq, "ACK token matched in-flight frame");
        } else {
            self.shared.counters.stale_acks.fetch_add(1, Ordering::Relaxed);
            debug!(ack = next_seq, expected = ?slot.expected, "ignoring stale ACK token");
        }
    }

    /// Hold back data transmission for one guard interval
    ///
    /// Called when this node is about to put its own ACK on the channel.
    pub fn on_local_ack_in_flight(&self) {
        let guard = self.shared.config.snapshot().guard_interval;
        let until = self.shared.now_us().saturating_add(guard.as_micros() as u64);
        self.shared.guard_until_us.fetch_max(until, Ordering::AcqRel);
        trace!(guard_ms = guard.as_millis() as u64, "local ACK in flight, holding data");
    }

    /// Register a callback for finished transmissions (acked or given up)
    pub fn set_report_hook<F>(&self, hook: F)
    where
        F: Fn(&TransmitReport) + Send + Sync + 'static,
    {
        *self.shared.report_hook.write() = Some(Box::new(hook));
    }

    /// Sequence number the next dequeued payload will carry
    pub fn next_sequence(&self) -> u8 {
        self.shared.seq.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TxState {
        *self.shared.state.lock()
    }

    /// Snapshot of the in-flight frame, if any
    pub fn pending(&self) -> Option<PendingTransmission> {
        self.shared.pending.lock().clone()
    }

    /// Payloads waiting behind the in-flight frame
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Most recent ACK token seen, matching or not
    pub fn last_ack(&self) -> Option<u8> {
        self.shared.ack.lock().last
    }

    pub fn stats(&self) -> ArqStats {
        let c = &self.shared.counters;
        ArqStats {
            transmissions: c.transmissions.load(Ordering::Relaxed),
            acked: c.acked.load(Ordering::Relaxed),
            given_up: c.given_up.load(Ordering::Relaxed),
            stale_acks: c.stale_acks.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ArqEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_state(&self, state: TxState) {
        *self.state.lock() = state;
    }

    fn run(&self) {
        info!("ARQ transmit loop started");

        while let Some(payload) = self.next_payload() {
            let seq = self.seq.load(Ordering::Acquire);
            if panic::catch_unwind(AssertUnwindSafe(|| self.transmit(payload))).is_err() {
                warn!(seq, "panic while transmitting, abandoning frame");
                self.abandon(seq);
            }
        }

        *self.pending.lock() = None;
        info!("ARQ transmit loop stopped");
    }

    /// Block until a payload is queued; `None` once the engine stops
    fn next_payload(&self) -> Option<Bytes> {
        let wake = Duration::from_millis(crate::WORKER_WAKE_INTERVAL_MS);
        let mut queue = self.queue.lock();

        loop {
            if !self.is_running() {
                return None;
            }
            if let Some(payload) = queue.pop_front() {
                return Some(payload);
            }
            self.queue_cv.wait_for(&mut queue, wake);
        }
    }

    /// Run the retry loop for one payload
    fn transmit(&self, payload: Bytes) {
        let seq = self.seq.load(Ordering::Acquire);
        let expected = next_seq(seq);
        let config = self.config.snapshot();

        let outcome = match self.codec.build_data_frame(config.peer_address, seq, &payload) {
            Ok(frame) => self.retry_loop(seq, expected, frame, &config),
            Err(e) => {
                warn!(seq, error = %e, "failed to build data frame");
                Some((TransmitOutcome::GivenUp, 0))
            }
        };

        *self.pending.lock() = None;
        {
            let mut slot = self.ack.lock();
            slot.expected = None;
            slot.matched = false;
        }

        let Some((outcome, attempts)) = outcome else {
            // Stopped mid-flight.
            return;
        };

        self.seq.store(expected, Ordering::Release);

        match outcome {
            TransmitOutcome::Acked => {
                self.counters.acked.fetch_add(1, Ordering::Relaxed);
                info!(seq, attempts, "frame acknowledged");
            }
            TransmitOutcome::GivenUp => {
                self.counters.given_up.fetch_add(1, Ordering::Relaxed);
                warn!(seq, attempts, "dropping frame after retries exhausted");
            }
        }

        self.set_state(match outcome {
            TransmitOutcome::Acked => TxState::Acked,
            TransmitOutcome::GivenUp => TxState::GivenUp,
        });
        self.report(TransmitReport {
            seq,
            attempts,
            outcome,
        });
    }

    /// Give up on the frame that was in flight when `transmit` panicked
    ///
    /// The frame may already be on the air, so its sequence number is consumed.
    fn abandon(&self, seq: u8) {
        let attempts = self
            .pending
            .lock()
            .take()
            .map_or(0, |pending| pending.retries + 1);
        {
            let mut slot = self.ack.lock();
            slot.expected = None;
            slot.matched = false;
        }

        let _ = self
            .seq
            .compare_exchange(seq, next_seq(seq), Ordering::AcqRel, Ordering::Acquire);
        self.counters.given_up.fetch_add(1, Ordering::Relaxed);
        self.set_state(TxState::GivenUp);
        self.report(TransmitReport {
            seq,
            attempts,
            outcome: TransmitOutcome::GivenUp,
        });
    }

    /// Returns the outcome and attempt count, or `None` if stopped first
    fn retry_loop(
        &self,
        seq: u8,
        expected: u8,
        frame: Bytes,
        config: &LinkConfig,
    ) -> Option<(TransmitOutcome, u32)> {
        {
            let mut slot = self.ack.lock();
            slot.expected = Some(expected);
            slot.matched = false;
        }

        let mut attempts: u32 = 0;
        loop {
            if !self.wait_guard(config.guard_poll_interval) {
                return None;
            }
            // Late ACK for the previous attempt.
            if self.ack_matched() {
                return Some((TransmitOutcome::Acked, attempts));
            }

            let now = Instant::now();
            let deadline = now
                .checked_add(config.wait_time)
                .unwrap_or_else(|| now + Duration::from_secs(crate::MAX_WAIT_TIME_S));
            *self.pending.lock() = Some(PendingTransmission {
                seq,
                frame: frame.clone(),
                retries: attempts,
                deadline,
            });

            self.set_state(TxState::Transmitting);
            attempts += 1;
            self.counters.transmissions.fetch_add(1, Ordering::Relaxed);
            trace!(seq, attempt = attempts, len = frame.len(), "transmitting data frame");

            if let Err(e) = self.transport.send(&frame) {
                // Treated like a lost frame; the ACK timeout drives the retry.
                warn!(seq, attempt = attempts, error = %e, "transport send failed");
            }

            self.set_state(TxState::AwaitingAck);
            if self.wait_for_ack(deadline) {
                return Some((TransmitOutcome::Acked, attempts));
            }
            if !self.is_running() {
                return None;
            }

            if attempts > config.max_retries {
                let outcome = if self.ack_matched() {
                    TransmitOutcome::Acked
                } else {
                    TransmitOutcome::GivenUp
                };
                return Some((outcome, attempts));
            }

            self.set_state(TxState::Retrying);
            debug!(seq, retry = attempts, "ACK timeout, retrying");
        }
    }

    fn ack_matched(&self) -> bool {
        self.ack.lock().matched
    }

    /// Wait out the local-ACK guard window; `false` if stopped meanwhile
    fn wait_guard(&self, poll: Duration) -> bool {
        loop {
            if !self.is_running() {
                return false;
            }

            let until = self.guard_until_us.load(Ordering::Acquire);
            let now = self.now_us();
            if now >= until {
                return true;
            }

            let remaining = Duration::from_micros(until - now);
            thread::sleep(remaining.min(poll));
        }
    }

    /// Wait for the expected ACK until `deadline`
    fn wait_for_ack(&self, deadline: Instant) -> bool {
        let mut slot = self.ack.lock();

        loop {
            if slot.matched {
                return true;
            }
            if !self.is_running() {
                return false;
            }
            if self.ack_cv.wait_until(&mut slot, deadline).timed_out() {
                return slot.matched;
            }
        }
    }

    fn report(&self, report: TransmitReport) {
        let hook = self.report_hook.read();
        if let Some(hook) = hook.as_ref() {
            if panic::catch_unwind(AssertUnwindSafe(|| hook(&report))).is_err() {
                warn!(seq = report.seq, "transmit report hook panicked");
            }
        }
    }
}
