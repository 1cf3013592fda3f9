// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end firmware updates between two nodes on the loopback network.

mod common;

use bristlemouth::config::DfuSettings;
use bristlemouth::dfu::{
    crc16_ccitt, DfuContext, DfuEngine, DfuErr, DfuState, ImageInfo, RebootStore,
};
use bristlemouth::pubsub::{Bus, PubSubCallback};
use bristlemouth::sim::{
    attach_dfu, BusDfuTransport, LoopbackNetwork, MemPartition, MemPlatform, MemRebootStore,
    DFU_TOPIC,
};
use bristlemouth::NodeId;
use common::{wait_until, WAIT};
use crossbeam::channel::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

const HOST: NodeId = 0x0000_0000_0000_aaaa;
const CLIENT: NodeId = 0x0000_0000_0000_bbbb;
const RUNNING_SHA: u32 = 0x1111_1111;
const NEW_SHA: u32 = 0x2222_2222;
const SLOT_SIZE: u32 = 64 * 1024;
/// BOOT_COMPLETE may go out before the rebooted client is subscribed, in
/// which case the confirmation only lands on the first retry.
const CONFIRM_WAIT: Duration = Duration::from_secs(10);

type Finish = (bool, DfuErr, NodeId);

fn test_image(len: usize) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    (0..len).map(|_| rng.u8(..)).collect()
}

fn image_info(image: &[u8], chunk_size: u16) -> ImageInfo {
    ImageInfo {
        image_size: image.len() as u32,
        chunk_size,
        crc16: crc16_ccitt(0, image),
        major_ver: 2,
        minor_ver: 1,
        filter_key: 0,
        git_sha: NEW_SHA,
    }
}

/// Persistent parts of the client, surviving its simulated reboot.
struct ClientHardware {
    slot: Arc<MemPartition>,
    store: Arc<MemRebootStore>,
    platform: Arc<MemPlatform>,
}

struct Pair {
    client_bus: Arc<Bus>,
    host: DfuEngine,
    client: DfuEngine,
    client_sub: PubSubCallback,
    hw: ClientHardware,
    _net: Arc<LoopbackNetwork>,
}

impl Pair {
    fn start(image: Vec<u8>) -> Self {
        let net = LoopbackNetwork::new();
        let host_bus = Bus::start(HOST, None, 64).expect("host bus");
        let client_bus = Bus::start(CLIENT, None, 64).expect("client bus");
        net.attach(&host_bus);
        net.attach(&client_bus);

        let settings = DfuSettings::default();
        let host_ctx = DfuContext {
            transport: BusDfuTransport::new(host_bus.clone()),
            image: MemPartition::with_data(image),
            slot: MemPartition::new(SLOT_SIZE),
            reboot_store: MemRebootStore::new(),
            platform: MemPlatform::new(0x3333_3333),
        };
        let host = DfuEngine::start(HOST, &settings, host_ctx).expect("host engine");
        attach_dfu(&host_bus, host.handle()).expect("attach host");

        let hw = ClientHardware {
            slot: MemPartition::new(SLOT_SIZE),
            store: MemRebootStore::new(),
            platform: MemPlatform::new(RUNNING_SHA),
        };
        let (client, client_sub) = boot_client(&client_bus, &hw);

        Self {
            client_bus,
            host,
            client,
            client_sub,
            hw,
            _net: net,
        }
    }

    fn initiate(&self, info: ImageInfo) -> Receiver<Finish> {
        let (tx, rx) = channel::bounded(4);
        self.host
            .handle()
            .initiate_update(
                info,
                CLIENT,
                move |ok, err, node| {
                    let _ = tx.send((ok, err, node));
                },
                Duration::from_secs(30),
            )
            .expect("initiate");
        rx
    }

    /// Power-cycle the client: drop its engine and start a fresh one on
    /// the same flash and reboot store.
    fn reboot_client(&mut self, now_running: u32) {
        self.client.stop();
        self.client_bus
            .unsubscribe(DFU_TOPIC, &self.client_sub)
            .expect("unsubscribe");
        self.hw.platform.set_git_sha(now_running);

        let (client, sub) = boot_client(&self.client_bus, &self.hw);
        self.client = client;
        self.client_sub = sub;
    }
}

fn boot_client(bus: &Arc<Bus>, hw: &ClientHardware) -> (DfuEngine, PubSubCallback) {
    let ctx = DfuContext {
        transport: BusDfuTransport::new(bus.clone()),
        image: MemPartition::new(SLOT_SIZE),
        slot: hw.slot.clone(),
        reboot_store: hw.store.clone(),
        platform: hw.platform.clone(),
    };
    let engine = DfuEngine::start(CLIENT, &DfuSettings::default(), ctx).expect("client engine");
    let sub = attach_dfu(bus, engine.handle()).expect("attach client");
    (engine, sub)
}

#[test]
fn test_full_update_with_reboot() {
    let image = test_image(5000);
    let mut pair = Pair::start(image.clone());
    let done = pair.initiate(image_info(&image, 512));

    assert!(
        pair.hw.platform.wait_for_reset(WAIT),
        "client never asked to activate the new image"
    );
    assert_eq!(pair.client.state(), DfuState::ClientActivating);
    assert_eq!(&pair.hw.slot.contents()[..image.len()], &image[..]);
    assert_eq!(pair.host.state(), DfuState::HostUpdate);

    pair.reboot_client(NEW_SHA);

    let (ok, err, node) = done.recv_timeout(CONFIRM_WAIT).expect("host outcome");
    assert!(ok);
    assert_eq!(err, DfuErr::None);
    assert_eq!(node, CLIENT);
    assert!(done.recv_timeout(Duration::from_millis(100)).is_err());

    assert!(wait_until(|| pair.client.state() == DfuState::Idle));
    assert!(wait_until(|| pair.host.state() == DfuState::Idle));
    assert_eq!(pair.hw.platform.confirmations(), 1);
    assert_eq!(pair.hw.platform.reverts(), 0);
    assert!(!pair.hw.store.load().is_valid());
}

#[test]
fn test_wrong_version_after_reboot_reverts() {
    let image = test_image(1500);
    let mut pair = Pair::start(image.clone());
    let done = pair.initiate(image_info(&image, 256));

    assert!(pair.hw.platform.wait_for_reset(WAIT));
    // Bootloader fell back to the old image
    pair.reboot_client(RUNNING_SHA);

    let (ok, err, _) = done.recv_timeout(WAIT).expect("host outcome");
    assert!(!ok);
    assert_eq!(err, DfuErr::WrongVer);
    assert!(wait_until(|| pair.hw.platform.reverts() == 1));
    assert_eq!(pair.hw.platform.confirmations(), 0);
    assert!(wait_until(|| pair.client.state() == DfuState::Idle));
}

#[test]
fn test_same_version_is_refused() {
    let image = test_image(800);
    let pair = Pair::start(image.clone());
    let mut info = image_info(&image, 128);
    info.git_sha = RUNNING_SHA;
    let done = pair.initiate(info);

    let (ok, err, node) = done.recv_timeout(WAIT).expect("host outcome");
    assert_eq!((ok, err, node), (false, DfuErr::SameVer, CLIENT));
    assert_eq!(pair.hw.platform.pending_resets(), 0);
    assert!(wait_until(|| pair.host.state() == DfuState::Idle));
    assert_eq!(pair.client.state(), DfuState::Idle);
}

#[test]
fn test_corrupt_image_fails_crc() {
    let image = test_image(3000);
    let pair = Pair::start(image.clone());
    let mut info = image_info(&image, 512);
    info.crc16 ^= 0x0100;
    let done = pair.initiate(info);

    let (ok, err, _) = done.recv_timeout(WAIT).expect("host outcome");
    assert!(!ok);
    assert_eq!(err, DfuErr::BadCrc);
    assert_eq!(pair.hw.platform.pending_resets(), 0);
    assert!(wait_until(|| pair.client.state() == DfuState::Idle));
    assert!(wait_until(|| pair.host.state() == DfuState::Idle));
}

#[test]
fn test_host_abort_mid_transfer() {
    let image = test_image(8000);
    let pair = Pair::start(image.clone());
    let done = pair.initiate(image_info(&image, 64));

    // The client never reboots here, so the host stays in HostUpdate
    assert!(wait_until(|| pair.host.state() == DfuState::HostUpdate));
    pair.host.handle().abort().expect("abort");

    let (ok, err, _) = done.recv_timeout(WAIT).expect("host outcome");
    assert!(!ok);
    assert_eq!(err, DfuErr::Aborted);
    assert!(wait_until(|| pair.host.state() == DfuState::Idle));
}
