// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DFU wire frames.
//!
//! ```text
//! | type u8 | src_node_id u64 LE | dst_node_id u64 LE | body |
//! ```
//!
//! Bodies by type:
//!
//! | Type          | Value | Body                                   |
//! |---------------|-------|----------------------------------------|
//! | START         | 0xD0  | `ImageInfo` (18 bytes)                 |
//! | PAYLOAD_REQ   | 0xD1  | `seq_num u16`                          |
//! | PAYLOAD       | 0xD2  | `payload_length u16`, payload bytes    |
//! | END           | 0xD3  | `success u8`, `err_code u8`            |
//! | ACK           | 0xD4  | `success u8`, `err_code u8`            |
//! | ABORT         | 0xD5  | `success u8`, `err_code u8`            |
//! | HEARTBEAT     | 0xD6  | -                                      |
//! | REBOOT_REQ    | 0xD7  | -                                      |
//! | REBOOT        | 0xD8  | -                                      |
//! | BOOT_COMPLETE | 0xD9  | -                                      |

use super::error::{DfuErr, DfuError};
use crate::NodeId;

pub const BCMP_DFU_START: u8 = 0xD0;
pub const BCMP_DFU_PAYLOAD_REQ: u8 = 0xD1;
pub const BCMP_DFU_PAYLOAD: u8 = 0xD2;
pub const BCMP_DFU_END: u8 = 0xD3;
pub const BCMP_DFU_ACK: u8 = 0xD4;
pub const BCMP_DFU_ABORT: u8 = 0xD5;
pub const BCMP_DFU_HEARTBEAT: u8 = 0xD6;
pub const BCMP_DFU_REBOOT_REQ: u8 = 0xD7;
pub const BCMP_DFU_REBOOT: u8 = 0xD8;
pub const BCMP_DFU_BOOT_COMPLETE: u8 = 0xD9;

/// Length of the type byte plus the address pair.
pub const DFU_HEADER_LEN: usize = 1 + 16;

/// `filter_key` value that bypasses the same-version check.
pub const BM_DFU_IMG_INFO_FORCE_UPDATE: u32 = 1;

/// Source and destination of a DFU frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DfuAddr {
    pub src_node_id: NodeId,
    pub dst_node_id: NodeId,
}

impl DfuAddr {
    pub fn new(src_node_id: NodeId, dst_node_id: NodeId) -> Self {
        Self {
            src_node_id,
            dst_node_id,
        }
    }
}

/// Description of the image offered in START.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageInfo {
    pub image_size: u32,
    pub chunk_size: u16,
    pub crc16: u16,
    pub major_ver: u8,
    pub minor_ver: u8,
    pub filter_key: u32,
    pub git_sha: u32,
}

impl ImageInfo {
    pub const LEN: usize = 18;

    /// Number of chunks needed to carry the image.
    pub fn num_chunks(&self) -> u32 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.image_size.div_ceil(self.chunk_size as u32)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.image_size.to_le_bytes());
        buf.extend_from_slice(&self.chunk_size.to_le_bytes());
        buf.extend_from_slice(&self.crc16.to_le_bytes());
        buf.push(self.major_ver);
        buf.push(self.minor_ver);
        buf.extend_from_slice(&self.filter_key.to_le_bytes());
        buf.extend_from_slice(&self.git_sha.to_le_bytes());
    }
}

/// `success` flag plus error code, as carried by ACK, END and ABORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuResult {
    pub success: bool,
    pub err: DfuErr,
}

impl DfuResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            err: DfuErr::None,
        }
    }

    pub fn fail(err: DfuErr) -> Self {
        Self {
            success: false,
            err,
        }
    }
}

/// Frame body, one variant per wire type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuMessage {
    Start(ImageInfo),
    PayloadReq { seq_num: u16 },
    Payload(Vec<u8>),
    End(DfuResult),
    Ack(DfuResult),
    Abort(DfuResult),
    Heartbeat,
    RebootReq,
    Reboot,
    BootComplete,
}

impl DfuMessage {
    pub fn frame_type(&self) -> u8 {
        match self {
            Self::Start(_) => BCMP_DFU_START,
            Self::PayloadReq { .. } => BCMP_DFU_PAYLOAD_REQ,
            Self::Payload(_) => BCMP_DFU_PAYLOAD,
            Self::End(_) => BCMP_DFU_END,
            Self::Ack(_) => BCMP_DFU_ACK,
            Self::Abort(_) => BCMP_DFU_ABORT,
            Self::Heartbeat => BCMP_DFU_HEARTBEAT,
            Self::RebootReq => BCMP_DFU_REBOOT_REQ,
            Self::Reboot => BCMP_DFU_REBOOT,
            Self::BootComplete => BCMP_DFU_BOOT_COMPLETE,
        }
    }
}

/// A decoded DFU frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuFrame {
    pub addr: DfuAddr,
    pub msg: DfuMessage,
}

impl DfuFrame {
    pub fn new(src_node_id: NodeId, dst_node_id: NodeId, msg: DfuMessage) -> Self {
        Self {
            addr: DfuAddr::new(src_node_id, dst_node_id),
            msg,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = match &self.msg {
            DfuMessage::Start(_) => ImageInfo::LEN,
            DfuMessage::PayloadReq { .. } => 2,
            DfuMessage::Payload(data) => 2 + data.len(),
            DfuMessage::End(_) | DfuMessage::Ack(_) | DfuMessage::Abort(_) => 2,
            _ => 0,
        };

        let mut buf = Vec::with_capacity(DFU_HEADER_LEN + body_len);
        buf.push(self.msg.frame_type());
        buf.extend_from_slice(&self.addr.src_node_id.to_le_bytes());
        buf.extend_from_slice(&self.addr.dst_node_id.to_le_bytes());

        match &self.msg {
            DfuMessage::Start(info) => info.encode_into(&mut buf),
            DfuMessage::PayloadReq { seq_num } => buf.extend_from_slice(&seq_num.to_le_bytes()),
            DfuMessage::Payload(data) => {
                debug_assert!(data.len() <= u16::MAX as usize);
                buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
                buf.extend_from_slice(data);
            }
            DfuMessage::End(result) | DfuMessage::Ack(result) | DfuMessage::Abort(result) => {
                buf.push(result.success as u8);
                buf.push(result.err.code());
            }
            DfuMessage::Heartbeat
            | DfuMessage::RebootReq
            | DfuMessage::Reboot
            | DfuMessage::BootComplete => {}
        }
        buf
    }

    pub fn decode(wire: &[u8]) -> Result<Self, DfuError> {
        let mut r = Reader::new(wire);
        let ty = r.u8()?;
        let addr = DfuAddr::new(r.u64()?, r.u64()?);

        let msg = match ty {
            BCMP_DFU_START => DfuMessage::Start(ImageInfo {
                image_size: r.u32()?,
                chunk_size: r.u16()?,
                crc16: r.u16()?,
                major_ver: r.u8()?,
                minor_ver: r.u8()?,
                filter_key: r.u32()?,
                git_sha: r.u32()?,
            }),
            BCMP_DFU_PAYLOAD_REQ => DfuMessage::PayloadReq { seq_num: r.u16()? },
            BCMP_DFU_PAYLOAD => {
                let len = r.u16()? as usize;
                DfuMessage::Payload(r.bytes(len)?.to_vec())
            }
            BCMP_DFU_END => DfuMessage::End(r.result()?),
            BCMP_DFU_ACK => DfuMessage::Ack(r.result()?),
            BCMP_DFU_ABORT => DfuMessage::Abort(r.result()?),
            BCMP_DFU_HEARTBEAT => DfuMessage::Heartbeat,
            BCMP_DFU_REBOOT_REQ => DfuMessage::RebootReq,
            BCMP_DFU_REBOOT => DfuMessage::Reboot,
            BCMP_DFU_BOOT_COMPLETE => DfuMessage::BootComplete,
            _ => return Err(DfuError::Decode("unknown frame type")),
        };

        if !r.is_empty() {
            return Err(DfuError::Decode("trailing bytes"));
        }
        Ok(Self { addr, msg })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DfuError> {
        if self.buf.len() < n {
            return Err(DfuError::Decode("truncated frame"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DfuError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DfuError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DfuError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DfuError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DfuError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn result(&mut self) -> Result<DfuResult, DfuError> {
        let success = self.u8()? != 0;
        let err = DfuErr::from_u8(self.u8()?).ok_or(DfuError::Decode("unknown error code"))?;
        Ok(DfuResult { success, err })
    }
}
