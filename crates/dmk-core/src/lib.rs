//! # dmk-core
//!
//! Shared foundation of the Device Management Kit: the APDU model, the
//! transport frame codec, the `Command` contract and the session domain types.
//!
//! This crate has no async runtime and no I/O.  Everything in it is a pure
//! transformation over bytes or plain data, which keeps it usable from the
//! session layer, from transport backends and from tests alike.
//!
//! # Architecture overview (for beginners)
//!
//! A hardware wallet speaks in *APDUs*: a small command header
//! (`cla`, `ins`, `p1`, `p2`) followed by a length-prefixed payload.  The
//! device answers with some data followed by a two-byte *status word*
//! (`0x9000` means success).
//!
//! Physical links do not carry APDUs directly.  USB HID moves fixed 64-byte
//! reports and BLE moves MTU-sized notifications, so every APDU is cut into
//! *frames* before it is written and stitched back together on the way in.
//!
//! - **`apdu`** – Building, serialising and parsing APDUs and their replies.
//! - **`framing`** – Segmenting a byte buffer into transport frames and
//!   reassembling a reply from arriving frames, with strict sequence checks.
//! - **`command`** – The contract a typed device command implements so the
//!   session can send it without knowing its byte layout.
//! - **`domain`** – Session identifiers and the observable session state
//!   (connection status, battery, firmware, running app).

pub mod apdu;
pub mod command;
pub mod domain;
pub mod framing;

pub use apdu::{Apdu, ApduBuilder, ApduBuilderError, ApduParser, ApduParserError, ApduResponse, StatusWord};
pub use command::{check_status, Command, CommandError, CommandResult, GlobalCommandError};
pub use domain::session::{
    DeviceId, DeviceSessionId, DeviceSessionState, DeviceStatus, FirmwareVersion, RunningApp,
    SessionStateUpdate,
};
pub use framing::{segment, Frame, FrameAssembler, FrameConfig, FrameHeader, FrameSegmenter, FramingError, SequenceError};
