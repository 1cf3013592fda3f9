// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CRC16-CCITT as used by the DFU image check.
//!
//! Reflected polynomial 0x8408, caller-provided seed, no final XOR. Feeding
//! the image in chunks with the previous result as seed gives the same value
//! as a single pass.

/// Update `seed` with `data`.
pub fn crc16_ccitt(seed: u16, data: &[u8]) -> u16 {
    data.iter().fold(seed, |crc, &byte| {
        let e = (crc as u8) ^ byte;
        let f = e ^ (e << 4);
        let f = f as u16;
        (crc >> 8) ^ (f << 8) ^ (f << 3) ^ (f >> 4)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kermit_check_value() {
        // CRC-16/KERMIT check value for "123456789"
        assert_eq!(crc16_ccitt(0, b"123456789"), 0x2189);
    }

    #[test]
    fn test_chunked_equals_single_pass() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
        let whole = crc16_ccitt(0, &data);
        let chunked = data.chunks(333).fold(0, |crc, chunk| crc16_ccitt(crc, chunk));
        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_empty_keeps_seed() {
        assert_eq!(crc16_ccitt(0xBEEF, &[]), 0xBEEF);
    }
}
