//! SessionRegistry: the table of open device sessions.
//!
//! The registry is the sole owner of session lifetimes.  It is constructed
//! explicitly at application start, handed to whoever needs it as an
//! `Arc<SessionRegistry>`, and torn down with [`SessionRegistry::close_all`].
//!
//! # Automatic removal (for beginners)
//!
//! Adding a session spawns a small watcher task that subscribes to the
//! session's state feed.  Every state change is forwarded to the registry's
//! merged broadcast feed; the first `NotConnected` state removes the session
//! from the table and ends the watcher.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use dmk_core::{DeviceId, DeviceSessionId, DeviceSessionState};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::device_session::{DeviceSession, SessionConfig, SessionError};
use crate::infrastructure::transport::{Transport, TransportError};

/// Capacity of the merged state feed before slow subscribers start lagging.
const STATE_FEED_CAPACITY: usize = 64;

/// Errors returned by registry operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    SessionNotFound(DeviceSessionId),

    #[error("no session open for device {0}")]
    DeviceNotFound(DeviceId),

    #[error("failed to open session: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to open session: {0}")]
    Session(#[from] SessionError),
}

/// Table of open sessions keyed by session id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<DeviceSessionId, Arc<DeviceSession>>>,
    state_feed: broadcast::Sender<DeviceSessionState>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        let (state_feed, _) = broadcast::channel(STATE_FEED_CAPACITY);
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            state_feed,
        })
    }

    /// Opens a connection through `transport` and registers a session on it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Transport`] if the connection cannot be
    /// opened, or [`RegistryError::Session`] if `config` is unusable.
    pub async fn open_session(
        self: &Arc<Self>,
        transport: &dyn Transport,
        device: &DeviceId,
        config: SessionConfig,
    ) -> Result<Arc<DeviceSession>, RegistryError> {
        let connection = transport.open(device).await?;
        let session = DeviceSession::open(connection, config)?;
        debug!("{} transport opened session {}", transport.name(), session.id());
        self.add(Arc::clone(&session));
        Ok(session)
    }

    /// Registers `session` and starts watching its state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(self: &Arc<Self>, session: Arc<DeviceSession>) {
        let id = session.id();
        let mut states = session.subscribe_state();
        self.write().insert(id, session);
        info!("session {id} registered");

        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let state = states.borrow_and_update().clone();
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                // No subscribers is fine; the feed is best-effort.
                let _ = registry.state_feed.send(state.clone());
                if state.device_status.is_terminal() {
                    // Already removed when the close was explicit.
                    let _ = registry.remove(id).await;
                    return;
                }
                drop(registry);
                if states.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    /// Removes a session from the table and closes it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SessionNotFound`] if no such session is registered.
    pub async fn remove(&self, id: DeviceSessionId) -> Result<Arc<DeviceSession>, RegistryError> {
        let session = self
            .write()
            .remove(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;
        session.close().await;
        info!("session {id} removed");
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::SessionNotFound`] if no such session is registered.
    pub fn get_by_id(&self, id: DeviceSessionId) -> Result<Arc<DeviceSession>, RegistryError> {
        self.read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::SessionNotFound(id))
    }

    /// All sessions open on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DeviceNotFound`] if there are none.
    pub fn get_by_device_id(&self, device: &DeviceId) -> Result<Vec<Arc<DeviceSession>>, RegistryError> {
        let sessions: Vec<_> = self
            .read()
            .values()
            .filter(|session| session.device_id() == device)
            .cloned()
            .collect();
        if sessions.is_empty() {
            return Err(RegistryError::DeviceNotFound(device.clone()));
        }
        Ok(sessions)
    }

    pub fn all(&self) -> Vec<Arc<DeviceSession>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Subscribes to state changes of every registered session.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceSessionState> {
        self.state_feed.subscribe()
    }

    /// Closes and removes every session.
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.write().drain().map(|(_, session)| session).collect();
        for session in sessions {
            session.close().await;
        }
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceSessionId, Arc<DeviceSession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceSessionId, Arc<DeviceSession>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
