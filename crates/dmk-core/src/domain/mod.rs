//! Domain types shared by the session and device-action layers.
//!
//! # Sub-modules
//!
//! - **`session`** – Identifiers and the observable state of one device
//!   session: connection status, battery level, firmware version and the
//!   app currently running on the device.

pub mod session;
