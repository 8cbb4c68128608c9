//! The contract every typed device command implements.
//!
//! A session sends commands without knowing their byte layout: it asks the
//! command for its [`Apdu`], performs the exchange, and hands the reply back
//! to the command for parsing.  Status words other than `0x9000` are mapped
//! to typed errors here, in the command layer, never by the session.

use std::fmt;

use thiserror::Error;

use crate::apdu::{Apdu, ApduResponse, StatusWord};
use crate::domain::session::SessionStateUpdate;

/// Errors a command can produce when interpreting a reply.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError<E> {
    /// The device rejected the command with a status word the command knows.
    #[error("{command} failed with status {status}: {error}")]
    Device {
        command: String,
        status: StatusWord,
        error: E,
    },

    /// A status word shared by every command (locked device, refused, ...).
    #[error("{command} failed: {error}")]
    Global {
        command: String,
        error: GlobalCommandError,
    },

    /// The reply succeeded but its payload could not be parsed.
    #[error("{command} returned an invalid response: {reason}")]
    InvalidResponse { command: String, reason: String },
}

/// Result type returned by [`Command::parse_response`].
pub type CommandResult<T, E> = Result<T, CommandError<E>>;

/// Status words with the same meaning for every command.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GlobalCommandError {
    #[error("device is locked")]
    DeviceLocked,
    #[error("action refused by the user")]
    ActionRefused,
    #[error("PIN is not set")]
    PinNotSet,
    #[error("device is in recovery mode")]
    DeviceInRecoveryMode,
    #[error("conditions of use not satisfied")]
    ConditionsNotSatisfied,
    #[error("wrong data length")]
    WrongLength,
    #[error("invalid data")]
    InvalidData,
    #[error("instruction not supported")]
    InsNotSupported,
    #[error("class not supported")]
    ClaNotSupported,
    #[error("unexpected status word {0}")]
    Unknown(StatusWord),
}

impl GlobalCommandError {
    /// Maps a non-success status word to its shared meaning.
    pub fn from_status(status: StatusWord) -> Self {
        match status.0 {
            0x5515 => Self::DeviceLocked,
            0x5501 => Self::ActionRefused,
            0x5502 => Self::PinNotSet,
            0x662F => Self::DeviceInRecoveryMode,
            0x6985 => Self::ConditionsNotSatisfied,
            0x6700 => Self::WrongLength,
            0x6A80 => Self::InvalidData,
            0x6D00 => Self::InsNotSupported,
            0x6E00 => Self::ClaNotSupported,
            _ => Self::Unknown(status),
        }
    }
}

/// A typed device command.
///
/// Implementations provide the request APDU and the reply parser.  They
/// may also describe how a successful reply changes the session state
/// (running app, firmware version, battery level).
pub trait Command: Send + Sync {
    /// Value produced by a successful reply.
    type Response: Send + 'static;
    /// Command-specific error mapped from status words.
    type Error: fmt::Debug + fmt::Display + Send + 'static;

    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Request bytes, already in `[cla, ins, p1, p2, len, data]` form.
    fn apdu(&self) -> Apdu;

    fn parse_response(&self, response: &ApduResponse) -> CommandResult<Self::Response, Self::Error>;

    /// Session state change implied by a successful response.
    fn session_update(&self, _response: &Self::Response) -> Option<SessionStateUpdate> {
        None
    }
}

/// Checks the status word of `response` for `command`.
///
/// `lookup` maps command-specific status words; anything it does not know
/// falls back to [`GlobalCommandError`].
///
/// # Errors
///
/// Returns [`CommandError::Device`] or [`CommandError::Global`] for every
/// status word except `0x9000`.
pub fn check_status<E>(
    command: &str,
    response: &ApduResponse,
    lookup: impl FnOnce(StatusWord) -> Option<E>,
) -> CommandResult<(), E> {
    if response.status.is_success() {
        return Ok(());
    }
    match lookup(response.status) {
        Some(error) => Err(CommandError::Device {
            command: command.to_string(),
            status: response.status,
            error,
        }),
        None => Err(CommandError::Global {
            command: command.to_string(),
            error: GlobalCommandError::from_status(response.status),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum EchoError {
        EmptyEcho,
    }

    impl fmt::Display for EchoError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "empty echo")
        }
    }

    #[test]
    fn test_check_status_accepts_success() {
        let response = ApduResponse::new(vec![0x01], StatusWord::SUCCESS);
        assert_eq!(check_status::<EchoError>("Echo", &response, |_| None), Ok(()));
    }

    #[test]
    fn test_check_status_prefers_command_specific_mapping() {
        // Arrange
        let response = ApduResponse::new(Vec::new(), StatusWord(0x6A84));

        // Act
        let result = check_status("Echo", &response, |sw| {
            (sw == StatusWord(0x6A84)).then_some(EchoError::EmptyEcho)
        });

        // Assert
        assert_eq!(
            result,
            Err(CommandError::Device {
                command: "Echo".to_string(),
                status: StatusWord(0x6A84),
                error: EchoError::EmptyEcho,
            })
        );
    }

    #[test]
    fn test_check_status_falls_back_to_global_errors() {
        let response = ApduResponse::new(Vec::new(), StatusWord::LOCKED_DEVICE);
        let result = check_status::<EchoError>("Echo", &response, |_| None);
        assert_eq!(
            result,
            Err(CommandError::Global {
                command: "Echo".to_string(),
                error: GlobalCommandError::DeviceLocked,
            })
        );
    }

    #[test]
    fn test_check_status_fails_for_every_non_success_word() {
        for raw in 0..=u16::MAX {
            let response = ApduResponse::new(Vec::new(), StatusWord(raw));
            let ok = check_status::<EchoError>("Echo", &response, |_| None).is_ok();
            assert_eq!(ok, raw == 0x9000);
        }
    }

    #[test]
    fn test_unknown_status_keeps_raw_value() {
        assert_eq!(
            GlobalCommandError::from_status(StatusWord(0x1234)),
            GlobalCommandError::Unknown(StatusWord(0x1234))
        );
    }
}
