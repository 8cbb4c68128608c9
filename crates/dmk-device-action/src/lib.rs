//! dmk-device-action library entry point.
//!
//! A *device action* is a multi-step workflow against one device session:
//! open an app, wait for the user to unlock the device, send a handful of
//! commands, report a result.  Each execution is a small state machine:
//!
//! ```text
//! NotStarted ──► Pending(i)* ──┬──► Completed(output)
//!                              ├──► Error(error)
//!                              └──► Stopped        (cancelled)
//! ```
//!
//! The caller observes the states as a stream and may cancel at any time.
//! A running action holds the session's intent queue, so two actions on the
//! same session never interleave their commands unless the session's unsafe
//! bypass is enabled.
//!
//! # Module layout
//!
//! - `domain`: the state and user-interaction vocabulary.
//! - `application`: the engine, the `InternalApi` actions talk to and the
//!   built-in generic actions.

pub mod application;
pub mod domain;

pub use application::actions::{
    CallTaskDeviceAction, DeviceActionError, DeviceStatusReport, GetDeviceStatusDeviceAction,
    SendCommandDeviceAction, DEFAULT_UNLOCK_TIMEOUT,
};
pub use application::engine::{
    execute_device_action, ActionContext, CancelHandle, DeviceAction, DeviceActionExecution,
    DeviceActionStates, UnlockProbe, DEFAULT_UNLOCK_PROBE_INTERVAL,
};
pub use application::internal_api::InternalApi;
pub use domain::state::{DeviceActionState, UserInteractionRequired};
