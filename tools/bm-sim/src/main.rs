// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! bm-sim - simulated Bristlemouth mesh
//!
//! Builds a line of in-memory nodes (one two-port switch each) and runs a
//! service echo or a firmware update across it.

use bristlemouth::config::NodeConfig;
use bristlemouth::dfu::{crc16_ccitt, DfuContext, DfuEngine, DfuErr, ImageInfo};
use bristlemouth::l2::{DeviceConfig, L2Engine};
use bristlemouth::pubsub::{Bus, PubSubCallback};
use bristlemouth::service::{EchoService, ServiceRequester, ServiceServer};
use bristlemouth::sim::{
    attach_dfu, BusDfuTransport, MemDevice, MemPartition, MemPlatform, MemRebootStore, MeshNetif,
    MeshTransport, DFU_TOPIC,
};
use bristlemouth::timer_handler::TimerCallbackHandler;
use bristlemouth::NodeId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLOT_SIZE: u32 = 256 * 1024;
const LINK_WAIT: Duration = Duration::from_secs(3);

/// Bristlemouth mesh simulator
#[derive(Parser, Debug)]
#[command(name = "bm-sim")]
#[command(version)]
#[command(about = "Run service and DFU exchanges over a simulated mesh")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Node configuration (TOML); node ids count up from its node_id
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Echo a message from the first node of a line to the last
    Echo {
        /// Number of nodes in the line
        #[arg(short = 'n', long, default_value = "3")]
        nodes: usize,

        /// Message to echo
        #[arg(short, long, default_value = "hello mesh")]
        message: String,

        /// Request timeout in milliseconds
        #[arg(short, long, default_value = "1000")]
        timeout: u64,
    },

    /// Push a random image from node 0 to node 1 and reboot it
    Dfu {
        /// Image size in bytes
        #[arg(short, long, default_value = "16384")]
        size: u32,

        /// Chunk size in bytes
        #[arg(long, default_value = "512")]
        chunk: u16,

        /// Make the client boot the wrong image
        #[arg(long)]
        bad_boot: bool,
    },
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::with_node_id(0x0100),
    };
    config.validate()?;

    match &args.mode {
        Mode::Echo {
            nodes,
            message,
            timeout,
        } => run_echo(&config, *nodes, message, Duration::from_millis(*timeout)),
        Mode::Dfu {
            size,
            chunk,
            bad_boot,
        } => run_dfu(&config, *size, *chunk, *bad_boot),
    }
}

// ============================================================================
// Mesh
// ============================================================================

struct SimNode {
    node_id: NodeId,
    bus: Arc<Bus>,
    device: Arc<MemDevice>,
    l2: L2Engine,
}

impl SimNode {
    fn start(
        index: u32,
        node_id: NodeId,
        config: &NodeConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let bus = Bus::start(node_id, None, config.bus.queue_len)?;
        let device = MemDevice::new(index);
        let l2 = L2Engine::start(
            vec![DeviceConfig::new(device.clone())],
            MeshNetif::new(&bus),
            None,
            &config.l2,
        )?;
        bus.set_transport(Some(MeshTransport::new(node_id, l2.handle())));
        Ok(Self {
            node_id,
            bus,
            device,
            l2,
        })
    }
}

fn build_line(
    config: &NodeConfig,
    count: usize,
) -> Result<Vec<SimNode>, Box<dyn std::error::Error>> {
    if count < 2 {
        return Err("need at least two nodes".into());
    }

    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let node_id = config.node_id + i as NodeId;
        nodes.push(SimNode::start(i as u32, node_id, config)?);
    }
    for pair in nodes.windows(2) {
        MemDevice::connect(&pair[0].device, 1, &pair[1].device, 0)?;
    }

    let deadline = Instant::now() + LINK_WAIT;
    for (i, node) in nodes.iter().enumerate() {
        let expected = if i == 0 || i == count - 1 { 1 } else { 2 };
        while node.l2.handle().enabled_port_mask().count_ones() < expected {
            if Instant::now() >= deadline {
                return Err(format!("links of {:016x} never came up", node.node_id).into());
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
    println!("Mesh: {} nodes in a line", count);
    Ok(nodes)
}

// ============================================================================
// Echo
// ============================================================================

fn run_echo(
    config: &NodeConfig,
    count: usize,
    message: &str,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let nodes = build_line(config, count)?;
    let first = &nodes[0];
    let last = &nodes[count - 1];

    let server = ServiceServer::new(last.bus.clone(), &config.service);
    let echo = EchoService::register(&server)?;

    let timers = TimerCallbackHandler::start(config.service.timer_queue_len)?;
    let requester = ServiceRequester::start(first.bus.clone(), &timers, &config.service)?;

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    requester.request(echo.service(), message.as_bytes(), timeout, move |ack, id, _svc, data| {
        let _ = tx.send((ack, id, data.to_vec()));
    })?;

    // Expiry runs on a sweep, so allow one extra period
    let (ack, id, data) = rx.recv_timeout(timeout + config.service.expiry_period() * 2)?;
    if !ack {
        return Err(format!("request {} to '{}' expired", id, echo.service()).into());
    }

    println!(
        "{:016x} -> {:016x}: '{}' in {:?}",
        first.node_id,
        last.node_id,
        String::from_utf8_lossy(&data),
        started.elapsed()
    );
    for node in &nodes {
        let (tx_frames, rx_frames, flooded, ..) = node.l2.metrics().snapshot();
        log::info!(
            "[SIM] {:016x}: rx={} tx={} flooded={}",
            node.node_id,
            rx_frames,
            tx_frames,
            flooded
        );
    }
    Ok(())
}

// ============================================================================
// DFU
// ============================================================================

struct SimClient {
    slot: Arc<MemPartition>,
    store: Arc<MemRebootStore>,
    platform: Arc<MemPlatform>,
}

impl SimClient {
    fn boot(
        &self,
        node: &SimNode,
        config: &NodeConfig,
    ) -> Result<(DfuEngine, PubSubCallback), Box<dyn std::error::Error>> {
        let ctx = DfuContext {
            transport: BusDfuTransport::new(node.bus.clone()),
            image: MemPartition::new(SLOT_SIZE),
            slot: self.slot.clone(),
            reboot_store: self.store.clone(),
            platform: self.platform.clone(),
        };
        let engine = DfuEngine::start(node.node_id, &config.dfu, ctx)?;
        let sub = attach_dfu(&node.bus, engine.handle())?;
        Ok((engine, sub))
    }
}

fn run_dfu(
    config: &NodeConfig,
    size: u32,
    chunk: u16,
    bad_boot: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if size == 0 || size > SLOT_SIZE {
        return Err(format!("image size must be 1..={} bytes", SLOT_SIZE).into());
    }

    let nodes = build_line(config, 2)?;
    let (host_node, client_node) = (&nodes[0], &nodes[1]);

    let mut image = vec![0u8; size as usize];
    fastrand::fill(&mut image);
    let running_sha = fastrand::u32(..);
    let info = ImageInfo {
        image_size: size,
        chunk_size: chunk,
        crc16: crc16_ccitt(0, &image),
        major_ver: 1,
        minor_ver: 0,
        filter_key: 0,
        git_sha: running_sha.wrapping_add(1),
    };

    let host_ctx = DfuContext {
        transport: BusDfuTransport::new(host_node.bus.clone()),
        image: MemPartition::with_data(image.clone()),
        slot: MemPartition::new(SLOT_SIZE),
        reboot_store: MemRebootStore::new(),
        platform: MemPlatform::new(running_sha),
    };
    let host = DfuEngine::start(host_node.node_id, &config.dfu, host_ctx)?;
    attach_dfu(&host_node.bus, host.handle())?;

    let client = SimClient {
        slot: MemPartition::new(SLOT_SIZE),
        store: MemRebootStore::new(),
        platform: MemPlatform::new(running_sha),
    };
    let (mut client_engine, sub) = client.boot(client_node, config)?;

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    host.handle().initiate_update(
        info,
        client_node.node_id,
        move |ok, err, node| {
            let _ = tx.send((ok, err, node));
        },
        config.dfu.update_timeout(),
    )?;
    println!(
        "Sending {} bytes in {} chunks to {:016x}",
        size,
        info.num_chunks(),
        client_node.node_id
    );

    let transfer_wait = config.dfu.update_timeout();
    if !client.platform.wait_for_reset(transfer_wait) {
        let outcome = rx.try_recv().map_or(DfuErr::Timeout, |(_, err, _)| err);
        return Err(format!("transfer failed: {}", outcome).into());
    }
    println!("Transfer done in {:?}, rebooting client", started.elapsed());

    client_engine.stop();
    client_node.bus.unsubscribe(DFU_TOPIC, &sub)?;
    client
        .platform
        .set_git_sha(if bad_boot { running_sha } else { info.git_sha });
    let (_client_engine, _sub) = client.boot(client_node, config)?;

    let (ok, err, node) = rx.recv_timeout(transfer_wait)?;
    if ok {
        println!(
            "Update of {:016x} confirmed in {:?} (confirmations={})",
            node,
            started.elapsed(),
            client.platform.confirmations()
        );
        Ok(())
    } else {
        Err(format!(
            "update of {:016x} failed: {} (reverts={})",
            node,
            err,
            client.platform.reverts()
        )
        .into())
    }
}
