// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device firmware update.
//!
//! A node is either idle, a **host** pushing an image to one client, or a
//! **client** receiving one. The host offers the image with START; the
//! client pulls it chunk by chunk, validates length and CRC16, asks the
//! host for permission to reboot, reboots into the new image and confirms
//! it once the host acknowledges the boot.
//!
//! ```text
//!  host                                   client
//!   | START ----------------------------->  |  Idle -> ClientReceiving
//!   |  <------------------------------ ACK  |
//!   |  <------------------ PAYLOAD_REQ(n)   |
//!   | HEARTBEAT, PAYLOAD(n) ------------->  |  ... until the last chunk
//!   |  <----------------------- REBOOT_REQ  |  ClientValidating -> ClientRebootReq
//!   | REBOOT ---------------------------->  |  ClientActivating (reset)
//!   |  <-------------------- BOOT_COMPLETE  |  Init -> ClientRebootDone
//!   | END(success) ---------------------->  |
//!   |  <--------------------- END(success)  |  Idle
//! ```
//!
//! Everything runs on the `bm-dfu` thread ([`DfuEngine`]); other threads
//! talk to it through a [`DfuHandle`].

mod client;
mod crc;
mod engine;
mod error;
mod event;
mod host;
mod machine;
pub mod messages;
mod platform;
mod timer;

pub use client::BM_IMG_PAGE_LENGTH;
pub use crc::crc16_ccitt;
pub use engine::{DfuEngine, DfuHandle};
pub use error::{DfuErr, DfuError};
pub use event::{DfuEvent, FinishCallback};
pub use machine::{DfuContext, DfuCore, DfuState};
pub use messages::{DfuAddr, DfuFrame, DfuMessage, DfuResult, ImageInfo, BM_DFU_IMG_INFO_FORCE_UPDATE};
pub use platform::{
    DfuTransport, FlashError, FlashPartition, Platform, RebootInfo, RebootStore, DFU_REBOOT_MAGIC,
};
pub use timer::{DfuTimer, DfuTimers};
