//! States a device-action execution goes through.

use serde::{Deserialize, Serialize};

/// One observable state of a device-action execution.
///
/// Legal sequences are `NotStarted`, then any number of `Pending`, then
/// exactly one of `Completed`, `Error` or `Stopped`.  A cancelled execution
/// may go straight from `NotStarted` to `Stopped` if it never got its turn
/// on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceActionState<O, E, I> {
    NotStarted,
    /// Running.  The value tells the caller what the device or the user
    /// is expected to do next.
    Pending(I),
    /// Cancelled by the caller.  Not an error.
    Stopped,
    Completed(O),
    Error(E),
}

impl<O, E, I> DeviceActionState<O, E, I> {
    /// `true` for `Completed`, `Error` and `Stopped`: nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed(_) | Self::Error(_))
    }

    pub fn intermediate(&self) -> Option<&I> {
        match self {
            Self::Pending(intermediate) => Some(intermediate),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&O> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Pending(_) => "pending",
            Self::Stopped => "stopped",
            Self::Completed(_) => "completed",
            Self::Error(_) => "error",
        }
    }
}

/// What the user has to do on the device before the action can go on.
///
/// Only the signal is modelled here; rendering a prompt is up to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserInteractionRequired {
    #[default]
    None,
    UnlockDevice,
    ConfirmOpenApp,
    SignTransaction,
    SignPersonalMessage,
    SignTypedData,
    VerifyAddress,
    AllowSecureConnection,
    AllowListApps,
}

impl UserInteractionRequired {
    pub fn is_required(self) -> bool {
        self != Self::None
    }
}
