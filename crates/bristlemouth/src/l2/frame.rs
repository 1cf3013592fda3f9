// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reserved-byte layout of frames crossing the L2 layer.
//!
//! Bristlemouth carries per-port routing hints inside the IPv6 addresses of
//! every frame:
//!
//! ```text
//! | eth (14) | ip6 hdr: ... src addr @8 (16) | dst addr @24 (16) | ...
//!                        ^ [4] egress  [5] ingress     ^ [0..2] FF 03 = global multicast
//!                                                      ^ [13] app-stamped egress port
//! ```
//!
//! All offsets are fixed wire-format constants.

/// Ethernet header length.
pub const ETH_HEADER_LEN: usize = 14;

/// IPv6 fixed header length.
pub const IPV6_HEADER_LEN: usize = 40;

/// Offset of the source address inside the IPv6 header.
pub const IPV6_SRC_ADDR_OFFSET: usize = 8;

/// Offset of the destination address inside the IPv6 header.
pub const IPV6_DST_ADDR_OFFSET: usize = 24;

/// Source-address byte carrying the egress port mask of the sender.
pub const EGRESS_PORT_IDX: usize = 4;

/// Source-address byte carrying the ingress port mask stamped on RX.
pub const INGRESS_PORT_IDX: usize = 5;

/// Destination-address byte where the application may request a single
/// egress port (1-based) before handing the frame to `link_output`.
pub const DST_EGRESS_PORT_IDX: usize = 13;

/// First two destination-address bytes identifying Bristlemouth global
/// multicast traffic. Project convention, not IPv6 scope decoding.
pub const GLOBAL_MULTICAST_PREFIX: [u8; 2] = [0xFF, 0x03];

/// Smallest frame that contains a full IPv6 header.
pub const MIN_FRAME_LEN: usize = ETH_HEADER_LEN + IPV6_HEADER_LEN;

const SRC_ADDR: usize = ETH_HEADER_LEN + IPV6_SRC_ADDR_OFFSET;
const DST_ADDR: usize = ETH_HEADER_LEN + IPV6_DST_ADDR_OFFSET;

/// Absolute frame offset of the ingress-port byte.
pub const INGRESS_PORT_OFFSET: usize = SRC_ADDR + INGRESS_PORT_IDX;

/// Absolute frame offset of the egress-port byte.
pub const EGRESS_PORT_OFFSET: usize = SRC_ADDR + EGRESS_PORT_IDX;

/// Absolute frame offset of the application egress-port request.
pub const DST_EGRESS_PORT_OFFSET: usize = DST_ADDR + DST_EGRESS_PORT_IDX;

/// Stamp the ingress port mask into the source address.
///
/// Returns `false` (frame untouched) when the frame is too short.
#[inline]
pub fn stamp_ingress_port(frame: &mut [u8], port_mask: u8) -> bool {
    match frame.get_mut(INGRESS_PORT_OFFSET) {
        Some(byte) => {
            *byte = port_mask;
            true
        }
        None => false,
    }
}

/// Ingress port mask previously stamped by the L2 engine.
#[inline]
pub fn ingress_port(frame: &[u8]) -> Option<u8> {
    frame.get(INGRESS_PORT_OFFSET).copied()
}

/// Stamp the egress port mask into the source address.
#[inline]
pub fn stamp_egress_port(frame: &mut [u8], port_mask: u8) -> bool {
    match frame.get_mut(EGRESS_PORT_OFFSET) {
        Some(byte) => {
            *byte = port_mask;
            true
        }
        None => false,
    }
}

#[inline]
pub fn egress_port(frame: &[u8]) -> Option<u8> {
    frame.get(EGRESS_PORT_OFFSET).copied()
}

/// True when the destination address starts with [`GLOBAL_MULTICAST_PREFIX`].
#[inline]
pub fn is_global_multicast(frame: &[u8]) -> bool {
    frame.get(DST_ADDR..DST_ADDR + 2) == Some(&GLOBAL_MULTICAST_PREFIX[..])
}

/// Ask `link_output` to send this frame on a single 1-based port.
#[inline]
pub fn request_egress_port(frame: &mut [u8], port: u8) -> bool {
    match frame.get_mut(DST_EGRESS_PORT_OFFSET) {
        Some(byte) => {
            *byte = port;
            true
        }
        None => false,
    }
}

/// Read and clear the application egress-port request.
///
/// The byte is always zeroed so it never leaks onto the wire.
#[inline]
pub fn take_requested_egress_port(frame: &mut [u8]) -> Option<u8> {
    frame
        .get_mut(DST_EGRESS_PORT_OFFSET)
        .map(|byte| std::mem::replace(byte, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Vec<u8> {
        vec![0u8; MIN_FRAME_LEN + 8]
    }

    #[test]
    fn test_offsets() {
        assert_eq!(INGRESS_PORT_OFFSET, 27);
        assert_eq!(EGRESS_PORT_OFFSET, 26);
        assert_eq!(DST_EGRESS_PORT_OFFSET, 51);
    }

    #[test]
    fn test_global_multicast_detection() {
        let mut f = frame();
        assert!(!is_global_multicast(&f));
        f[38] = 0xFF;
        assert!(!is_global_multicast(&f));
        f[39] = 0x03;
        assert!(is_global_multicast(&f));
        // ff02 (link-local scope) is not the Bristlemouth marker
        f[39] = 0x02;
        assert!(!is_global_multicast(&f));
    }

    #[test]
    fn test_short_frames_are_ignored() {
        let mut short = vec![0u8; 20];
        assert!(!stamp_ingress_port(&mut short, 0b10));
        assert!(!is_global_multicast(&short));
        assert_eq!(take_requested_egress_port(&mut short), None);
        assert!(short.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_take_egress_clears_byte() {
        let mut f = frame();
        assert!(request_egress_port(&mut f, 2));
        assert_eq!(take_requested_egress_port(&mut f), Some(2));
        assert_eq!(f[DST_EGRESS_PORT_OFFSET], 0);
        assert_eq!(take_requested_egress_port(&mut f), Some(0));
    }

    #[test]
    fn test_stamp_ingress() {
        let mut f = frame();
        assert!(stamp_ingress_port(&mut f, 0b0100));
        assert_eq!(ingress_port(&f), Some(0b0100));
        assert_eq!(f[27], 0b0100);
    }
}
