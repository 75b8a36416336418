//! Link node - wiring of receive pipeline, ARQ engine and transport
//!
//! A `LinkNode` is what an application talks to: it submits payloads, gets
//! verified payloads back through a delivery callback, and optionally
//! subscribes to drop diagnostics. The receive side runs on the caller's
//! thread (usually a [`ReceivePump`]); the transmit side runs on the ARQ
//! engine's worker.
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::arq::ArqEngine;
use crate::codec::{wrap, FrameCodec};
use crate::config::{LinkConfig, SharedConfig};
use crate::contracts::{
    AckMeta, DataMeta, DropClass, DropDiagnostic, DropReason, FramePath, FrameType,
    LinkMessage, TransmitReport,
};
use crate::crc::CrcEngine;
use crate::errors::Result;
use crate::receiver::Receiver;
use crate::transmitter::{FrameSource, Transport};

/// Application callback for verified payloads
pub type DeliveryCallback = Box<dyn Fn(Bytes, DataMeta) + Send + Sync>;

/// One end of a half-duplex link
pub struct LinkNode {
    config: SharedConfig,
    codec: FrameCodec,
    receiver: Receiver,
    engine: ArqEngine,
    transport: Arc<dyn Transport>,
    on_payload: RwLock<Option<DeliveryCallback>>,
    diagnostics: Mutex<Option<mpsc::Sender<DropDiagnostic>>>,
}

impl LinkNode {
    /// Validate `config` and build a stopped node
    pub fn new(config: LinkConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let config = SharedConfig::new(config)?;
        let codec = FrameCodec::new(config.payload_len(), CrcEngine::new(config.crc_variant()));

        Ok(Self {
            receiver: Receiver::new(config.clone()),
            engine: ArqEngine::new(config.clone(), Arc::clone(&transport)),
            config,
            codec,
            transport,
            on_payload: RwLock::new(None),
            diagnostics: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn engine(&self) -> &ArqEngine {
        &self.engine
    }

    pub fn start(&self) -> Result<()> {
        self.engine.start()?;
        let config = self.config.snapshot();
        info!(
            address = config.address,
            peer = config.peer_address,
            payload_len = config.payload_len,
            crc = %config.crc_variant,
            "link node started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Queue data for reliable delivery to the peer
    pub fn submit(&self, data: &[u8]) -> Result<()> {
        self.engine.submit(data)
    }

    pub fn set_address(&self, address: u8) {
        self.config.set_address(address);
    }

    pub fn set_peer_address(&self, peer_address: u8) {
        self.config.set_peer_address(peer_address);
    }

    /// Register the delivery callback, replacing any previous one
    pub fn on_payload_received<F>(&self, callback: F)
    where
        F: Fn(Bytes, DataMeta) + Send + Sync + 'static,
    {
        *self.on_payload.write() = Some(Box::new(callback));
    }

    /// Register a callback for finished transmissions
    pub fn on_transmit_report<F>(&self, callback: F)
    where
        F: Fn(&TransmitReport) + Send + Sync + 'static,
    {
        self.engine.set_report_hook(callback);
    }

    /// Subscribe to drop diagnostics; replaces any earlier subscription
    pub fn diagnostics(&self) -> mpsc::Receiver<DropDiagnostic> {
        let (tx, rx) = mpsc::channel();
        *self.diagnostics.lock() = Some(tx);
        rx
    }

    /// Process one received buffer
    ///
    /// Never fails: anything that goes wrong is reported as a drop. The two
    /// paths are isolated, so a fault on one still lets the other run.
    pub fn receive(&self, buf: impl Into<Bytes>) {
        let buf = buf.into();

        for path in [FramePath::Data, FramePath::Ack] {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut out = Vec::with_capacity(2);
                match path {
                    FramePath::Data => self.receiver.process_data(&buf, &mut out),
                    FramePath::Ack => self.receiver.process_ack(&buf, &mut out),
                }
                for msg in out {
                    self.dispatch(msg);
                }
            }));

            if result.is_err() {
                warn!(%path, len = buf.len(), "panic while processing received buffer");
                self.emit_drop(DropDiagnostic::new(DropReason::Internal, path, buf.clone()));
            }
        }
    }

    fn dispatch(&self, msg: LinkMessage) {
        match msg {
            LinkMessage::AckBody { body, meta } => self.send_ack(body, meta),
            LinkMessage::DataFrame { payload, meta } => self.deliver(payload, meta),
            LinkMessage::AckToken(token) => self.engine.on_ack_token(token.next_seq),
            LinkMessage::Drop(drop) => self.emit_drop(drop),
        }
    }

    /// Checksum, wrap and transmit an ACK body
    ///
    /// The guard is raised first so the local transmit loop holds its data
    /// frame until the ACK has cleared the channel.
    fn send_ack(&self, body: Bytes, meta: AckMeta) {
        self.engine.on_local_ack_in_flight();

        let frame = wrap(self.config.peer_address(), FrameType::Ack, &self.codec.append_crc(&body));
        trace!(ack = meta.ack, len = frame.len(), "sending ACK");

        if let Err(e) = self.transport.send(&frame) {
            warn!(ack = meta.ack, error = %e, "failed to send ACK");
        }
    }

    fn deliver(&self, payload: Bytes, meta: DataMeta) {
        debug!(seq = meta.seq, len = payload.len(), "payload received");
        if let Some(callback) = self.on_payload.read().as_ref() {
            callback(payload, meta);
        }
    }

    fn emit_drop(&self, drop: DropDiagnostic) {
        match drop.reason.class() {
            DropClass::Addressing => {
                trace!(reason = %drop.reason, path = %drop.path, "frame for another node")
            }
            DropClass::Alignment | DropClass::Integrity => debug!(
                reason = %drop.reason,
                path = %drop.path,
                len = drop.frame.len(),
                "dropping frame"
            ),
        }

        let mut diagnostics = self.diagnostics.lock();
        if let Some(tx) = diagnostics.as_ref() {
            if tx.send(drop).is_err() {
                // Subscriber went away.
                *diagnostics = None;
            }
        }
    }
}

impl Drop for LinkNode {
    fn drop(&mut self) {
        self.engine.stop();
    }
}

/// Worker feeding received buffers from a [`FrameSource`] into a node
pub struct ReceivePump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReceivePump {
    pub fn spawn<S>(node: Arc<LinkNode>, mut source: S) -> Result<Self>
    where
        S: FrameSource + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let wake = Duration::from_millis(crate::WORKER_WAKE_INTERVAL_MS);

        let handle = thread::Builder::new()
            .name("halflink-rx".into())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    match source.recv_timeout(wake) {
                        Ok(Some(buf)) => node.receive(buf),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "receive source closed");
                            break;
                        }
                    }
                }
                flag.store(false, Ordering::Release);
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the pump; returns within one receive timeout
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("receive pump exited with a panic");
            }
        }
    }
}

impl Drop for ReceivePump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmitter::RecordingTransport;
    use crate::PREAMBLE;

    fn node(address: u8, peer: u8) -> (LinkNode, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let config = LinkConfig::new(address, peer).with_payload_len(8);
        (LinkNode::new(config, transport.clone()).unwrap(), transport)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        assert!(LinkNode::new(LinkConfig::default().with_payload_len(0), transport).is_err());
    }

    #[test]
    fn test_data_frame_delivered_and_acked() {
        let (node, transport) = node(2, 1);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        node.on_payload_received(move |payload, meta| sink.lock().push((payload, meta)));

        let frame = node.codec.build_data_frame(2, 41, b"ABCDEFGH").unwrap();
        node.receive(frame);

        assert_eq!(
            delivered.lock().as_slice(),
            &[(Bytes::from_static(b"ABCDEFGH"), DataMeta { crc_ok: true, seq: 41 })]
        );

        let expected_ack = node.codec.build_ack_frame(1, 42, b"ABCDEFGH").unwrap();
        assert_eq!(transport.frames(), vec![expected_ack]);
    }

    #[test]
    fn test_foreign_frame_reported() {
        let (node, transport) = node(2, 1);
        let diagnostics = node.diagnostics();

        let frame = node.codec.build_data_frame(3, 0, b"ABCDEFGH").unwrap();
        node.receive(frame);

        assert_eq!(transport.count(), 0);
        let reasons: Vec<_> = diagnostics.try_iter().map(|d| d.reason).collect();
        assert_eq!(reasons, vec![DropReason::AddrMismatch, DropReason::AddrMismatch]);
    }

    #[test]
    fn test_panicking_callback_contained() {
        let (node, _) = node(2, 1);
        let diagnostics = node.diagnostics();
        node.on_payload_received(|_, _| panic!("application bug"));

        node.receive(node.codec.build_data_frame(2, 0, b"ABCDEFGH").unwrap());

        let drops: Vec<_> = diagnostics.try_iter().collect();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].reason, DropReason::Internal);
        assert_eq!(drops[0].path, FramePath::Data);
    }

    #[test]
    fn test_ack_path_runs_after_data_path_panic() {
        let (node, transport) = node(2, 1);
        let diagnostics = node.diagnostics();
        node.on_payload_received(|_, _| panic!("application bug"));

        // ACK body goes out before the callback panics.
        node.receive(node.codec.build_data_frame(2, 0, b"ABCDEFGH").unwrap());
        assert_eq!(transport.count(), 1);

        node.receive(node.codec.build_ack_frame(2, 1, b"ABCDEFGH").unwrap());
        assert_eq!(node.engine.last_ack(), Some(1));
        assert_eq!(diagnostics.try_iter().filter(|d| d.path == FramePath::Ack).count(), 0);
    }

    #[test]
    fn test_garbage_after_preamble() {
        let (node, transport) = node(2, 1);
        let diagnostics = node.diagnostics();

        let mut buf = PREAMBLE.to_vec();
        buf.extend_from_slice(&[2, 1, 0, 0, 0]);
        node.receive(buf);

        assert_eq!(transport.count(), 0);
        let drop = diagnostics.try_recv().unwrap();
        assert_eq!(drop.reason, DropReason::ShortFrame);
    }
}
