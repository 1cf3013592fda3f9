// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upper-layer network interface contract.

/// Two-character interface tag.
pub const NETIF_NAME: &str = "bm";

/// Fixed Ethernet MTU.
pub const ETHERNET_MTU: usize = 1500;

/// Nominal 10BASE-T1L link speed.
pub const NETIF_LINK_SPEED_BPS: u64 = 10_000_000;

/// The network stack sitting above L2 (IPv6/UDP in the reference system).
pub trait NetInterface: Send + Sync {
    /// Hand a received frame up the stack.
    ///
    /// On success the stack owns the frame. On failure the frame is handed
    /// back and the L2 engine drops it.
    fn input(&self, frame: Vec<u8>) -> Result<(), Vec<u8>>;

    /// Logical interface up/down, bracketed by device power sequencing.
    fn set_up(&self, _up: bool) {}
}
