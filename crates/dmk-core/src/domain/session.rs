//! Session identifiers and observable session state.
//!
//! # Device status lifecycle (for beginners)
//!
//! ```text
//!            0x5515 reply
//! Connected ─────────────► Locked
//!     ▲                      │
//!     └──────────────────────┘ any other reply
//!
//! Connected / Locked ──► NotConnected   (unplug or explicit close; terminal)
//! ```
//!
//! `NotConnected` is terminal: once a session reports it, the registry drops
//! the session and a new one must be opened after reconnecting.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one device session.
pub type DeviceSessionId = Uuid;

/// Identifier of a physical device, assigned by the transport that found it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Connected,
    /// The device answered `0x5515`: it is waiting for its PIN.
    Locked,
    NotConnected,
}

impl DeviceStatus {
    pub fn is_terminal(self) -> bool {
        self == Self::NotConnected
    }
}

/// Firmware versions reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub mcu: String,
    pub bootloader: String,
    pub os: String,
}

/// The app currently open on the device ("BOLOS" on the dashboard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningApp {
    pub name: String,
    pub version: String,
}

impl RunningApp {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Snapshot of everything known about one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSessionState {
    pub session_id: DeviceSessionId,
    pub device_status: DeviceStatus,
    pub battery_level: Option<u8>,
    pub firmware_version: Option<FirmwareVersion>,
    pub current_app: Option<RunningApp>,
}

impl DeviceSessionState {
    /// Initial state of a freshly opened session.
    pub fn connected(session_id: DeviceSessionId) -> Self {
        Self {
            session_id,
            device_status: DeviceStatus::Connected,
            battery_level: None,
            firmware_version: None,
            current_app: None,
        }
    }
}

/// A partial change to a [`DeviceSessionState`].
///
/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStateUpdate {
    pub device_status: Option<DeviceStatus>,
    pub battery_level: Option<u8>,
    pub firmware_version: Option<FirmwareVersion>,
    pub current_app: Option<RunningApp>,
}

impl SessionStateUpdate {
    pub fn with_device_status(mut self, status: DeviceStatus) -> Self {
        self.device_status = Some(status);
        self
    }

    pub fn with_battery_level(mut self, level: u8) -> Self {
        self.battery_level = Some(level);
        self
    }

    pub fn with_firmware_version(mut self, version: FirmwareVersion) -> Self {
        self.firmware_version = Some(version);
        self
    }

    pub fn with_current_app(mut self, app: RunningApp) -> Self {
        self.current_app = Some(app);
        self
    }

    /// Applies the update and reports whether anything changed.
    ///
    /// A terminal `NotConnected` state is never revived: once a session is
    /// not connected, only metadata fields may still change.
    pub fn apply(self, state: &mut DeviceSessionState) -> bool {
        let mut changed = false;
        if let Some(status) = self.device_status {
            if state.device_status != status && !state.device_status.is_terminal() {
                state.device_status = status;
                changed = true;
            }
        }
        if let Some(level) = self.battery_level {
            changed |= state.battery_level.replace(level) != Some(level);
        }
        if let Some(version) = self.firmware_version {
            if state.firmware_version.as_ref() != Some(&version) {
                state.firmware_version = Some(version);
                changed = true;
            }
        }
        if let Some(app) = self.current_app {
            if state.current_app.as_ref() != Some(&app) {
                state.current_app = Some(app);
                changed = true;
            }
        }
        changed
    }
}
