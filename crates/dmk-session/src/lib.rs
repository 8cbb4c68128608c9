//! dmk-session library entry point.
//!
//! A *device session* owns one physical connection to a hardware wallet and
//! is the only component allowed to write frames to it.  Every APDU sent
//! through a session goes through two FIFO queues:
//!
//! - the **intent queue**, which serialises whole device actions (a
//!   multi-command workflow holds it from start to finish), and
//! - the **exchange mutex**, which guarantees that at most one APDU
//!   request/reply round trip is on the wire at any time.
//!
//! The [`application::session_registry::SessionRegistry`] owns every open
//! session and drops them once they report `NotConnected`.

pub mod application;
pub mod infrastructure;

pub use application::device_session::{DeviceSession, SessionConfig, SessionError};
pub use application::exchange_mutex::{ExchangeGuard, ExchangeMutex};
pub use application::session_registry::{RegistryError, SessionRegistry};
pub use infrastructure::storage::config::{load_config, save_config, ConfigError, DmkConfig};
pub use infrastructure::transport::{FrameSink, Transport, TransportConnection, TransportError};
