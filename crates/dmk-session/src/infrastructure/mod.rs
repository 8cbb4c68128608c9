//! Infrastructure layer: byte transports and configuration storage.
//!
//! # Sub-modules
//!
//! - **`transport`** – The byte-transport seam every physical medium
//!   implements, plus a scripted in-memory device for tests.
//! - **`storage`** – TOML configuration persistence.

pub mod storage;
pub mod transport;
