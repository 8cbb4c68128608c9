//! Application layer of the session crate.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The application layer orchestrates the pure codec from `dmk-core` and the
//! transport abstraction from the infrastructure layer.  It depends on the
//! `TransportConnection` trait, never on a concrete USB or BLE backend, so
//! every use case here can be exercised against the mock transport.
//!
//! # Sub-modules
//!
//! - **`exchange_mutex`** – FIFO async lock with synchronous hand-off.
//! - **`device_session`** – One connection: APDU exchanges, typed commands,
//!   the session-state feed and teardown.
//! - **`session_registry`** – The table of open sessions plus a merged
//!   state-change feed.

pub mod device_session;
pub mod exchange_mutex;
pub mod session_registry;
