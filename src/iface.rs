use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};
use crate::ifac::IfacGate;
use crate::packet::Packet;
use crate::utils::CacheSet;

const RAW_FRAME_QUEUE_CAPACITY: usize = 128;
const SEEN_FRAMES_CAPACITY: usize = 4096;

pub type RawFrame = Vec<u8>;

/// Inbound entry point of the router. Consumed by the adapter layer,
/// implemented by the transport; `inbound` must return quickly.
pub trait TransportInbound: Send + Sync {
    fn inbound(&self, raw: &[u8], source: &InterfaceRef);
}

/// Frame travelling from an interface task to its adapter's dispatch
/// queue, tagged with the concrete delivering interface.
pub struct InboundFrame {
    pub source: InterfaceRef,
    pub raw: RawFrame,
}

pub type InboundSender = mpsc::Sender<InboundFrame>;

/// Capability record for one interface: identity, flags, liveness, and a
/// queue toward the wire. This is what the router sees.
#[derive(Clone)]
pub struct InterfaceRef {
    name: Arc<str>,
    address: AddressHash,
    can_send: bool,
    can_receive: bool,
    online: Arc<AtomicBool>,
    tx: mpsc::Sender<RawFrame>,
}

impl InterfaceRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &AddressHash {
        &self.address
    }

    pub fn can_send(&self) -> bool {
        self.can_send
    }

    pub fn can_receive(&self) -> bool {
        self.can_receive
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Queues a raw frame for the interface task. Does not block; a full
    /// or closed queue drops the frame with a warning.
    pub fn send(&self, raw: RawFrame) -> Result<(), RnsError> {
        if !self.can_send {
            return Err(RnsError::InvalidArgument);
        }

        self.tx.try_send(raw).map_err(|err| {
            log::warn!("iface: tx queue unavailable on {}: {}", self.address, err);
            RnsError::ConnectionError
        })
    }
}

/// Registration handle a concrete interface presents to the stack. The
/// interface task keeps the receiver half of the wire queue and flips
/// the online flag; the adapter side installs the inbound callback.
#[derive(Clone)]
pub struct InterfaceHandle {
    reference: InterfaceRef,
    gate: IfacGate,
    inbound_slot: Arc<OnceLock<InboundSender>>,
}

impl InterfaceHandle {
    pub fn new(
        name: &str,
        can_send: bool,
        can_receive: bool,
        gate: IfacGate,
    ) -> (Self, mpsc::Receiver<RawFrame>) {
        let (tx, rx) = mpsc::channel(RAW_FRAME_QUEUE_CAPACITY);

        let handle = Self {
            reference: InterfaceRef {
                name: Arc::from(name),
                address: AddressHash::new_from_slice(name.as_bytes()),
                can_send,
                can_receive,
                online: Arc::new(AtomicBool::new(false)),
                tx,
            },
            gate,
            inbound_slot: Arc::new(OnceLock::new()),
        };

        (handle, rx)
    }

    pub fn reference(&self) -> &InterfaceRef {
        &self.reference
    }

    pub fn address(&self) -> &AddressHash {
        &self.reference.address
    }

    pub fn gate(&self) -> &IfacGate {
        &self.gate
    }

    pub fn set_online(&self, online: bool) {
        self.reference.online.store(online, Ordering::Release);
    }

    /// Installs the inbound callback iff none exists. A composite parent
    /// pre-installs its dispatcher on child handles; those installs win.
    pub fn install_inbound(&self, sender: InboundSender) -> bool {
        self.inbound_slot.set(sender).is_ok()
    }

    pub fn inbound_installed(&self) -> bool {
        self.inbound_slot.get().is_some()
    }

    /// Hands bytes received from the wire to whoever installed the
    /// inbound callback. Called by the interface task.
    pub async fn deliver_raw(&self, raw: RawFrame) {
        if let Some(sender) = self.inbound_slot.get() {
            let _ = sender.send(InboundFrame { source: self.reference.clone(), raw }).await;
        }
    }
}

/// One adapter per interface. Outbound frames pass the IFAC gate before
/// queueing; inbound frames arrive through the dispatch task spawned at
/// creation.
pub struct InterfaceAdapter {
    reference: InterfaceRef,
    gate: IfacGate,
    inbound_tx: InboundSender,
}

impl InterfaceAdapter {
    pub fn reference(&self) -> &InterfaceRef {
        &self.reference
    }

    pub fn send(&self, raw: &[u8]) -> Result<(), RnsError> {
        let framed = self.gate.outbound(raw)?;
        self.reference.send(framed)
    }

    /// Sender a composite interface wires into its children so their
    /// frames flow through this adapter's dispatch pipeline.
    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound_tx.clone()
    }
}

#[derive(Default)]
struct InboundCounters {
    ifac_dropped: AtomicU64,
    decode_dropped: AtomicU64,
    duplicates: AtomicU64,
}

/// Snapshot of the dispatch drop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InboundStats {
    pub ifac_dropped: u64,
    pub decode_dropped: u64,
    pub duplicates: u64,
}

/// Adapter registry: at most one adapter per interface identity, safe
/// under concurrent `get_or_create` from interface setup threads.
pub struct InterfaceMap {
    transport: Arc<dyn TransportInbound>,
    runtime: tokio::runtime::Handle,
    adapters: Mutex<HashMap<AddressHash, Arc<InterfaceAdapter>>>,
    seen: Arc<Mutex<CacheSet<Hash>>>,
    counters: Arc<InboundCounters>,
    stop: CancellationToken,
}

impl InterfaceMap {
    /// Must be called within a tokio runtime; dispatch tasks spawn onto
    /// the captured handle so `get_or_create` works from any thread.
    pub fn new(transport: Arc<dyn TransportInbound>) -> Self {
        Self {
            transport,
            runtime: tokio::runtime::Handle::current(),
            adapters: Mutex::new(HashMap::new()),
            seen: Arc::new(Mutex::new(CacheSet::new(SEEN_FRAMES_CAPACITY))),
            counters: Arc::new(InboundCounters::default()),
            stop: CancellationToken::new(),
        }
    }

    pub fn get_or_create(&self, handle: &InterfaceHandle) -> Arc<InterfaceAdapter> {
        let mut adapters = self.adapters.lock().expect("adapter map lock");

        adapters
            .entry(*handle.address())
            .or_insert_with(|| {
                let (inbound_tx, inbound_rx) = mpsc::channel(RAW_FRAME_QUEUE_CAPACITY);

                if !handle.install_inbound(inbound_tx.clone()) {
                    log::debug!(
                        "iface: inbound callback already installed on {}",
                        handle.address()
                    );
                }

                self.runtime.spawn(dispatch_frames(
                    inbound_rx,
                    handle.gate().clone(),
                    self.seen.clone(),
                    self.transport.clone(),
                    self.counters.clone(),
                    self.stop.child_token(),
                ));

                log::debug!("iface: adapter created for {}", handle.address());

                Arc::new(InterfaceAdapter {
                    reference: handle.reference().clone(),
                    gate: handle.gate().clone(),
                    inbound_tx,
                })
            })
            .clone()
    }

    pub fn stats(&self) -> InboundStats {
        InboundStats {
            ifac_dropped: self.counters.ifac_dropped.load(Ordering::Relaxed),
            decode_dropped: self.counters.decode_dropped.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
        }
    }

    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

impl Drop for InterfaceMap {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Per-adapter dispatch loop: IFAC gate, decode check, dedupe, then the
/// router. Frames from one interface keep their arrival order; nothing
/// here blocks on I/O.
async fn dispatch_frames(
    mut inbound_rx: mpsc::Receiver<InboundFrame>,
    gate: IfacGate,
    seen: Arc<Mutex<CacheSet<Hash>>>,
    transport: Arc<dyn TransportInbound>,
    counters: Arc<InboundCounters>,
    stop: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = inbound_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let Some(open) = gate.inbound(&frame.raw) else {
            counters.ifac_dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("iface: dropped frame failing access check on {}", frame.source.address());
            continue;
        };

        let packet = match Packet::from_bytes(&open) {
            Ok(packet) => packet,
            Err(err) => {
                counters.decode_dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("iface: undecodable frame on {}: {}", frame.source.address(), err);
                continue;
            }
        };

        let fresh = seen.lock().map(|mut seen| seen.insert(packet.hash())).unwrap_or(true);
        if !fresh {
            counters.duplicates.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        transport.inbound(&open, &frame.source);
    }
}
