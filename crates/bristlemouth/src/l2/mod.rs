// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! L2 forwarding engine.
//!
//! Moves Ethernet frames between one or more multi-port switch devices and
//! the upper network layer. Ports of all configured devices are numbered
//! globally (device 0 first), so a single `u8` port mask addresses every
//! physical port of the node.
//!
//! # Architecture
//!
//! ```text
//!  device RX callback    application TX     link-change shim
//!          |                    |                   |
//!          v                    v                   v
//!   +----------------------------------------------------+
//!   |  L2Handle (producers only enqueue, bounded waits)  |
//!   +--------------+-----------------------+-------------+
//!                  | data channel          | control channel
//!                  v                       v
//!   +----------------------------------------------------+
//!   |  bm-l2 thread: Tx fan-out | Rx stamp+flood | link  |
//!   +-------+-------------------------------+------------+
//!           |                               |
//!      NetDevice::tx                 NetInterface::input
//! ```
//!
//! Frames travel as owned `Vec<u8>` buffers moved through the channels: the
//! buffer is owned by the queue until the engine thread takes it, and a failed
//! enqueue hands it straight back to the producer who drops it.

mod device;
mod engine;
mod error;
pub mod frame;
mod netif;

pub use device::{
    DeviceConfig, DeviceError, DeviceHandle, NetDevice, NetDeviceKind, ADIN2111_PORT_MASK,
    ADIN2111_PORT_NUM,
};
pub use engine::{DeviceInfo, L2Engine, L2Event, L2Handle, L2Metrics, LinkChangeCallback};
pub use error::L2Error;
pub use netif::{NetInterface, ETHERNET_MTU, NETIF_LINK_SPEED_BPS, NETIF_NAME};
