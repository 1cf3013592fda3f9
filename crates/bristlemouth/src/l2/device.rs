// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Physical network device contract consumed by the L2 engine.

use std::fmt;
use std::sync::Arc;

use super::engine::L2Handle;

/// Ports per ADIN2111 switch.
pub const ADIN2111_PORT_NUM: u8 = 2;

/// Device-local port mask covering every ADIN2111 port.
pub const ADIN2111_PORT_MASK: u8 = 0b11;

/// Opaque identity of a device, used by RX/link callbacks to name their source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDeviceKind {
    /// Empty slot. Contributes no ports.
    None,
    /// Analog Devices ADIN2111 two-port 10BASE-T1L switch.
    Adin2111,
}

impl NetDeviceKind {
    /// Number of ports a device of this kind exposes.
    pub const fn port_count(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Adin2111 => ADIN2111_PORT_NUM,
        }
    }

    /// Device-local mask covering all ports.
    pub const fn port_mask(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Adin2111 => ADIN2111_PORT_MASK,
        }
    }
}

/// Errors reported by a device driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Hardware initialisation failed
    InitFailed(String),
    /// Frame could not be submitted
    TxFailed(String),
    /// Power control failed
    PowerFailed(String),
    /// Operation not provided by this driver
    Unsupported,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed(msg) => write!(f, "device init failed: {}", msg),
            Self::TxFailed(msg) => write!(f, "device tx failed: {}", msg),
            Self::PowerFailed(msg) => write!(f, "device power control failed: {}", msg),
            Self::Unsupported => write!(f, "operation not supported by device"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// A multi-port switch device driven by the L2 engine.
///
/// # Thread Safety
/// `tx`, `set_power` and `renegotiate` are only ever called from the L2
/// thread. The driver calls back into the [`L2Handle`] passed to `init` from
/// its own RX/interrupt context.
pub trait NetDevice: Send + Sync {
    fn kind(&self) -> NetDeviceKind;

    fn handle(&self) -> DeviceHandle;

    /// Bring the hardware up and keep `sink` for RX and link-change reports.
    fn init(&self, sink: L2Handle, port_mask: u8) -> Result<(), DeviceError>;

    /// Transmit on the device-local ports in `port_mask`.
    ///
    /// `port_offset` is the device's global start index, for drivers that
    /// need to report global port numbers.
    fn tx(&self, frame: &[u8], port_mask: u8, port_offset: u8) -> Result<(), DeviceError>;

    /// Switch the ports in `port_mask` on or off.
    fn set_power(&self, _on: bool, _port_mask: u8) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Restart link negotiation on a port that received traffic while the
    /// engine believed it was down.
    fn renegotiate(&self, _port_mask: u8) {}
}

/// One configured device slot.
#[derive(Clone)]
pub struct DeviceConfig {
    pub device: Arc<dyn NetDevice>,
    /// Device-local ports to enable at init.
    pub port_mask: u8,
}

impl DeviceConfig {
    /// Slot with every port of the device enabled.
    pub fn new(device: Arc<dyn NetDevice>) -> Self {
        let port_mask = device.kind().port_mask();
        Self { device, port_mask }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("handle", &self.device.handle())
            .field("kind", &self.device.kind())
            .field("port_mask", &self.port_mask)
            .finish()
    }
}
