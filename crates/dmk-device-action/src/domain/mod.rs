//! Domain layer: the vocabulary of device-action states.
//!
//! # Sub-modules
//!
//! - [`state`]: `DeviceActionState` and `UserInteractionRequired`.

pub mod state;
