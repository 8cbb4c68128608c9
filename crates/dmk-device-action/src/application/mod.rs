//! Application layer: running device actions.
//!
//! # Sub-modules
//!
//! - [`engine`]: the `DeviceAction` contract and its runner.
//! - [`internal_api`]: the session-scoped API handed to a running action.
//! - [`actions`]: generic built-in actions.

pub mod actions;
pub mod engine;
pub mod internal_api;
