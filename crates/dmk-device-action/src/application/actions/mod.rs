//! Built-in generic device actions.
//!
//! None of these knows any device-specific APDU layout; they are building
//! blocks around the engine.
//!
//! # Sub-modules
//!
//! - [`send_command`]: send one command, announcing the user interaction it needs.
//! - [`call_task`]: run an arbitrary async task against the [`InternalApi`].
//! - [`get_device_status`]: wait for unlock, then report the session state.
//!
//! [`InternalApi`]: super::internal_api::InternalApi

pub mod call_task;
pub mod get_device_status;
pub mod send_command;

use std::convert::Infallible;
use std::fmt;
use std::time::Duration;

use dmk_core::CommandError;
use dmk_session::SessionError;
use thiserror::Error;

pub use call_task::CallTaskDeviceAction;
pub use get_device_status::{DeviceStatusReport, GetDeviceStatusDeviceAction};
pub use send_command::SendCommandDeviceAction;

/// How long built-in actions wait for the user to unlock the device.
pub const DEFAULT_UNLOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors produced by the built-in actions.
///
/// `E` is the command error type for [`SendCommandDeviceAction`].
#[derive(Debug, Error, PartialEq)]
pub enum DeviceActionError<E: fmt::Debug + fmt::Display = Infallible> {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The device was still locked when the unlock timeout elapsed.
    #[error("device still locked after {0:?}")]
    DeviceLocked(Duration),

    #[error("{0}")]
    Command(CommandError<E>),
}

impl<E: fmt::Debug + fmt::Display> DeviceActionError<E> {
    /// Maps a failed unlock wait, turning its timeout into `DeviceLocked`.
    pub(crate) fn from_unlock(error: SessionError) -> Self {
        match error {
            SessionError::Timeout(waited) => Self::DeviceLocked(waited),
            other => Self::Session(other),
        }
    }
}
