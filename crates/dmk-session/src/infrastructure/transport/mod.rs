//! Byte-transport abstraction.
//!
//! A transport backend (USB HID, BLE, a TCP proxy to a speculos emulator...)
//! implements two traits:
//!
//! - [`Transport`] opens a connection to a device it discovered.
//! - [`TransportConnection`] moves frames over that connection.
//!
//! # How incoming frames flow (for beginners)
//!
//! The session hands the connection a [`FrameSink`] (the sending half of an
//! unbounded channel) right after opening it.  Whatever thread or task the
//! backend reads on simply pushes each received frame into that sink.  When
//! the device goes away the backend drops the sink; the session sees the
//! channel close and marks itself `NotConnected`.

pub mod mock;

use async_trait::async_trait;
use dmk_core::DeviceId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Where a connection delivers the frames it receives.
pub type FrameSink = mpsc::UnboundedSender<Vec<u8>>;

/// Errors surfaced by transport backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("failed to open connection to {device}: {reason}")]
    OpenFailed { device: DeviceId, reason: String },

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    /// The backend enforces its own deadline and it elapsed.
    #[error("no response from device")]
    NoResponse,
}

/// One open connection to a physical device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportConnection: Send + Sync {
    fn device_id(&self) -> DeviceId;

    /// Writes one frame.  May suspend while the transport applies back-pressure.
    async fn write(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Registers the sink incoming frames are pushed to.
    ///
    /// Called once by the session right after the connection is opened.
    fn set_frame_sink(&self, sink: FrameSink);

    /// Closes the connection and drops the frame sink.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A physical medium able to open connections to devices.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier for logs (`"usb-hid"`, `"ble"`, `"mock"`).
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`TransportError::DeviceNotFound`] or
    /// [`TransportError::OpenFailed`].
    async fn open(&self, device: &DeviceId) -> Result<Box<dyn TransportConnection>, TransportError>;
}
