// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory stand-ins for hardware and the network.
//!
//! Used by the tests, the benches and `bm-sim` to run one or more complete
//! nodes inside a single process.
//!
//! | Type                 | Stands in for                               |
//! |----------------------|---------------------------------------------|
//! | [`MemDevice`]        | ADIN2111 switch; ports can be wired together |
//! | [`CaptureNetif`]     | upper network stack, records frames          |
//! | [`MeshNetif`]        | upper stack carrying pub/sub over L2         |
//! | [`MeshTransport`]    | pub/sub transport sending through L2         |
//! | [`LoopbackNetwork`]  | pub/sub between buses, no L2 at all          |
//! | [`MemPartition`]     | flash partition with fault injection         |
//! | [`MemRebootStore`]   | no-init RAM holding the reboot info          |
//! | [`MemPlatform`]      | bootloader hooks, records resets             |

mod device;
mod dfu;
mod mesh;
mod network;

pub use device::{MemDevice, SentFrame};
pub use dfu::{
    attach_dfu, BusDfuTransport, CaptureDfuTransport, MemPartition, MemPlatform, MemRebootStore,
    DFU_TOPIC,
};
pub use mesh::{CaptureNetif, MeshNetif, MeshTransport};
pub use network::LoopbackNetwork;
