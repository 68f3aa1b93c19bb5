//! Adapter registry and inbound dispatch behavior: memoization under
//! concurrency, install-once callbacks, access gating, deduplication,
//! and the delivery contract toward the router.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand_core::OsRng;

use reticulum_core::destination::{DestinationName, SingleInputDestination};
use reticulum_core::hash::AddressHash;
use reticulum_core::identity::PrivateIdentity;
use reticulum_core::ifac::{IfacCredentials, IfacGate, DEFAULT_IFAC_SIZE};
use reticulum_core::iface::{InterfaceHandle, InterfaceMap, InterfaceRef, TransportInbound};

#[derive(Default)]
struct CollectTransport {
    frames: Mutex<Vec<(Vec<u8>, AddressHash, String)>>,
}

impl TransportInbound for CollectTransport {
    fn inbound(&self, raw: &[u8], source: &InterfaceRef) {
        self.frames.lock().expect("frame log lock").push((
            raw.to_vec(),
            *source.address(),
            source.name().to_string(),
        ));
    }
}

impl CollectTransport {
    fn frames(&self) -> Vec<(Vec<u8>, AddressHash, String)> {
        self.frames.lock().expect("frame log lock").clone()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for dispatch");
}

fn announce_frame(aspect: &str) -> Vec<u8> {
    let identity = PrivateIdentity::new_from_rand(OsRng);
    let mut destination =
        SingleInputDestination::new(identity, DestinationName::new("adapter", aspect));
    let packet = destination.announce(OsRng, None).expect("valid announce");
    packet.to_bytes().expect("encodable packet")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_get_or_create_returns_one_adapter() {
    let transport = Arc::new(CollectTransport::default());
    let map = Arc::new(InterfaceMap::new(transport));

    let (handle, _wire_rx) = InterfaceHandle::new("iface-a", true, true, IfacGate::Open);

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let map = map.clone();
            let handle = handle.clone();
            std::thread::spawn(move || map.get_or_create(&handle))
        })
        .collect();

    let adapters: Vec<_> = threads.into_iter().map(|t| t.join().expect("thread join")).collect();
    for adapter in &adapters[1..] {
        assert!(Arc::ptr_eq(&adapters[0], adapter));
    }

    // The receive callback went in exactly once.
    assert!(handle.inbound_installed());
}

#[tokio::test]
async fn delivered_frames_reach_the_router_in_order() {
    let transport = Arc::new(CollectTransport::default());
    let map = InterfaceMap::new(transport.clone());

    let (handle, _wire_rx) = InterfaceHandle::new("iface-b", true, true, IfacGate::Open);
    handle.set_online(true);
    let _adapter = map.get_or_create(&handle);

    let frames: Vec<_> = (0..12).map(|index| announce_frame(&format!("seq.{index}"))).collect();
    for frame in &frames {
        handle.deliver_raw(frame.clone()).await;
    }

    wait_until(|| transport.frames().len() == frames.len()).await;

    let received = transport.frames();
    for (index, (raw, address, name)) in received.iter().enumerate() {
        assert_eq!(raw, &frames[index]);
        assert_eq!(address, handle.address());
        assert_eq!(name, "iface-b");
    }
}

#[tokio::test]
async fn duplicate_frames_are_dropped() {
    let transport = Arc::new(CollectTransport::default());
    let map = InterfaceMap::new(transport.clone());

    let (handle, _wire_rx) = InterfaceHandle::new("iface-c", true, true, IfacGate::Open);
    let _adapter = map.get_or_create(&handle);

    let frame = announce_frame("dup");
    handle.deliver_raw(frame.clone()).await;
    handle.deliver_raw(frame.clone()).await;

    wait_until(|| map.stats().duplicates == 1).await;
    assert_eq!(transport.frames().len(), 1);
}

#[tokio::test]
async fn authenticated_gate_filters_inbound() {
    let credentials = IfacCredentials::derive(Some("adapter-net"), None, DEFAULT_IFAC_SIZE)
        .expect("valid derivation")
        .expect("credentials present");
    let transport = Arc::new(CollectTransport::default());
    let map = InterfaceMap::new(transport.clone());

    let (handle, _wire_rx) =
        InterfaceHandle::new("iface-d", true, true, IfacGate::Authenticated(credentials.clone()));
    let _adapter = map.get_or_create(&handle);

    let frame = announce_frame("guarded");

    // An unauthenticated frame never reaches the router.
    handle.deliver_raw(frame.clone()).await;
    wait_until(|| map.stats().ifac_dropped == 1).await;
    assert!(transport.frames().is_empty());

    // The same frame with this network's access code does.
    let masked = credentials.mask_outbound(&frame).expect("maskable frame");
    handle.deliver_raw(masked).await;
    wait_until(|| !transport.frames().is_empty()).await;
    assert_eq!(transport.frames()[0].0, frame);
}

#[tokio::test]
async fn adapter_send_applies_gate_before_the_wire() {
    let credentials = IfacCredentials::derive(Some("adapter-net"), None, DEFAULT_IFAC_SIZE)
        .expect("valid derivation")
        .expect("credentials present");
    let transport = Arc::new(CollectTransport::default());
    let map = InterfaceMap::new(transport);

    let (handle, mut wire_rx) =
        InterfaceHandle::new("iface-e", true, true, IfacGate::Authenticated(credentials.clone()));
    let adapter = map.get_or_create(&handle);

    let frame = announce_frame("outbound");
    adapter.send(&frame).expect("queued frame");

    let on_wire = wire_rx.recv().await.expect("frame on wire");
    assert_ne!(on_wire, frame);

    let (open, _) = credentials.unmask_inbound(&on_wire).expect("authentic frame");
    assert_eq!(open, frame);
}

#[tokio::test]
async fn composite_parent_keeps_its_inbound_callback() {
    let transport = Arc::new(CollectTransport::default());
    let map = InterfaceMap::new(transport.clone());

    let (parent, _parent_wire) = InterfaceHandle::new("server", true, true, IfacGate::Open);
    let parent_adapter = map.get_or_create(&parent);

    // A server interface wires each client socket into its own dispatch.
    let (child, _child_wire) = InterfaceHandle::new("server/client-1", true, true, IfacGate::Open);
    assert!(child.install_inbound(parent_adapter.inbound_sender()));

    // A later adapter lookup must not overwrite the parent's callback.
    let _child_adapter = map.get_or_create(&child);

    let frame = announce_frame("fanout");
    child.deliver_raw(frame.clone()).await;

    wait_until(|| !transport.frames().is_empty()).await;
    let (raw, address, name) = transport.frames()[0].clone();
    assert_eq!(raw, frame);
    assert_eq!(address, *child.address());
    assert_eq!(name, "server/client-1");
}
