//! DeviceSession: one open connection to one device.
//!
//! # Exchange pipeline
//!
//! ```text
//! send_command(cmd)
//!   └─ intent queue (skipped when bypassed)
//!        └─ exchange mutex
//!             ├─ discard stale frames
//!             ├─ segment cmd.apdu() and write every frame in order
//!             ├─ feed incoming frames to a FrameAssembler until a reply
//!             └─ record Locked / Connected from the status word
//!        └─ cmd.parse_response(reply), apply cmd.session_update(..)
//! ```
//!
//! Once an exchange holds the mutex it runs in its own task, which also owns
//! the mutex guard.  A caller that stops waiting (a cancelled device action,
//! an elapsed timeout) therefore never leaves a half-written request on the
//! wire: the exchange finishes, its reply is discarded, and the mutex is
//! released for the next caller.
//!
//! # Session state feed
//!
//! State lives in a `tokio::sync::watch` channel.  A new subscriber sees the
//! latest value immediately, then every subsequent change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dmk_core::{
    segment, Apdu, ApduResponse, Command, CommandResult, DeviceId, DeviceSessionId,
    DeviceSessionState, DeviceStatus, FrameAssembler, FrameConfig, FramingError,
    SessionStateUpdate, StatusWord,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::exchange_mutex::{ExchangeGuard, ExchangeMutex};
use crate::infrastructure::transport::{TransportConnection, TransportError};

/// Errors returned by session operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The reply frames were inconsistent; the exchange was abandoned.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("device disconnected")]
    Disconnected,

    #[error("session {0} is closed")]
    Closed(DeviceSessionId),

    /// No reply within the caller's deadline.  The exchange itself keeps
    /// running and still releases the mutex when it ends.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("exchange task failed: {0}")]
    ExchangeAborted(String),
}

/// Settings a session is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub frame: FrameConfig,
    /// Let device actions and commands skip the intent queue.
    ///
    /// Commands from concurrent actions may then interleave on the wire; the
    /// exchange mutex still keeps individual exchanges apart.
    pub unsafe_bypass_intent_queue: bool,
    /// Deadline applied to `send_apdu` / `send_command` when set.
    pub abort_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::usb_hid(),
            unsafe_bypass_intent_queue: false,
            abort_timeout: None,
        }
    }
}

/// One open device connection and everything serialised on it.
pub struct DeviceSession {
    id: DeviceSessionId,
    device_id: DeviceId,
    config: SessionConfig,
    connection: Box<dyn TransportConnection>,
    exchange_mutex: Arc<ExchangeMutex>,
    intent_queue: Arc<ExchangeMutex>,
    bypass_intent_queue: AtomicBool,
    state: Arc<watch::Sender<DeviceSessionState>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: CancellationToken,
    closing: AtomicBool,
}

impl DeviceSession {
    /// Wraps an open connection in a new session.
    ///
    /// Registers the session's frame sink on the connection and spawns the
    /// task that forwards incoming frames, so this must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Framing`] if `config.frame` cannot carry a
    /// single frame.
    pub fn open(
        connection: Box<dyn TransportConnection>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        config.frame.validate()?;

        let id = Uuid::new_v4();
        let device_id = connection.device_id();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        connection.set_frame_sink(transport_tx);

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let state = Arc::new(watch::Sender::new(DeviceSessionState::connected(id)));
        let closed = CancellationToken::new();

        tokio::spawn(pump_frames(
            id,
            transport_rx,
            frame_tx,
            Arc::clone(&state),
            closed.clone(),
        ));

        info!("session {id} opened on device {device_id}");

        Ok(Arc::new(Self {
            id,
            device_id,
            bypass_intent_queue: AtomicBool::new(config.unsafe_bypass_intent_queue),
            config,
            connection,
            exchange_mutex: Arc::new(ExchangeMutex::new()),
            intent_queue: Arc::new(ExchangeMutex::new()),
            state,
            incoming: Mutex::new(frame_rx),
            closed,
            closing: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> DeviceSessionId {
        self.id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn frame_config(&self) -> &FrameConfig {
        &self.config.frame
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Sends one APDU through the intent queue and the exchange mutex.
    ///
    /// Applies the configured abort timeout, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on transport, framing or session failures.
    /// A non-success status word is **not** an error at this level.
    pub async fn send_apdu(self: &Arc<Self>, apdu: &Apdu) -> Result<ApduResponse, SessionError> {
        match self.config.abort_timeout {
            Some(timeout) => self.send_apdu_with_timeout(apdu, timeout).await,
            None => self.queued_apdu(apdu).await,
        }
    }

    /// Like [`DeviceSession::send_apdu`] with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] if no reply arrives in time.
    pub async fn send_apdu_with_timeout(
        self: &Arc<Self>,
        apdu: &Apdu,
        timeout: Duration,
    ) -> Result<ApduResponse, SessionError> {
        tokio::time::timeout(timeout, self.queued_apdu(apdu))
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
    }

    /// Sends a typed command through the intent queue and the exchange mutex.
    ///
    /// The outer `Result` reports session failures; the inner
    /// [`CommandResult`] is the command's own interpretation of the reply.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on transport, framing or session failures.
    pub async fn send_command<C: Command>(
        self: &Arc<Self>,
        command: &C,
    ) -> Result<CommandResult<C::Response, C::Error>, SessionError> {
        match self.config.abort_timeout {
            Some(timeout) => self.send_command_with_timeout(command, timeout).await,
            None => self.queued_command(command).await,
        }
    }

    /// Like [`DeviceSession::send_command`] with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] if no reply arrives in time.
    pub async fn send_command_with_timeout<C: Command>(
        self: &Arc<Self>,
        command: &C,
        timeout: Duration,
    ) -> Result<CommandResult<C::Response, C::Error>, SessionError> {
        tokio::time::timeout(timeout, self.queued_command(command))
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
    }

    /// Sends a typed command without entering the intent queue.
    ///
    /// For callers that already hold the intent queue (a running device
    /// action).  The exchange mutex still applies.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on transport, framing or session failures.
    pub async fn exchange_command<C: Command>(
        self: &Arc<Self>,
        command: &C,
    ) -> Result<CommandResult<C::Response, C::Error>, SessionError> {
        let response = self.exchange_apdu(&command.apdu()).await?;
        let result = command.parse_response(&response);
        if let Ok(value) = &result {
            if let Some(update) = command.session_update(value) {
                self.update_state(update);
            }
        }
        Ok(result)
    }

    /// Performs one exchange under the exchange mutex, skipping the intent queue.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] if the session is closed before or during
    ///   the exchange.
    /// - [`SessionError::Disconnected`] if the device goes away.
    /// - [`SessionError::Transport`] if a frame cannot be written.
    /// - [`SessionError::Framing`] if the reply frames are inconsistent.
    pub async fn exchange_apdu(self: &Arc<Self>, apdu: &Apdu) -> Result<ApduResponse, SessionError> {
        self.ensure_open()?;
        let guard = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(SessionError::Closed(self.id)),
            guard = self.exchange_mutex.lock() => guard,
        };

        let session = Arc::clone(self);
        let request = apdu.to_bytes();
        let exchange = tokio::spawn(async move {
            let _guard = guard;
            session.run_exchange(request).await
        });

        match exchange.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::ExchangeAborted(e.to_string())),
        }
    }

    // ── Intent queue ──────────────────────────────────────────────────────────

    /// Waits for this caller's turn in the intent queue.
    ///
    /// Returns `Ok(None)` when the queue is bypassed.  Hold the returned
    /// guard for as long as the caller's command sequence must not be
    /// interleaved with others.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] or [`SessionError::Disconnected`] if
    /// the session ends before the caller's turn.
    pub async fn enter_intent_queue(&self) -> Result<Option<ExchangeGuard>, SessionError> {
        self.ensure_open()?;
        if self.is_bypassing_intent_queue() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(SessionError::Closed(self.id)),
            guard = self.intent_queue.lock() => Ok(Some(guard)),
        }
    }

    /// Enables or disables the unsafe intent-queue bypass at runtime.
    pub fn set_unsafe_bypass_intent_queue(&self, bypass: bool) {
        if bypass {
            warn!("session {}: intent queue bypass enabled", self.id);
        }
        self.bypass_intent_queue.store(bypass, Ordering::SeqCst);
    }

    pub fn is_bypassing_intent_queue(&self) -> bool {
        self.bypass_intent_queue.load(Ordering::SeqCst)
    }

    // ── State ─────────────────────────────────────────────────────────────────

    /// Current state snapshot.
    pub fn state(&self) -> DeviceSessionState {
        self.state.borrow().clone()
    }

    /// Subscribes to the state feed: the latest value, then every change.
    pub fn subscribe_state(&self) -> watch::Receiver<DeviceSessionState> {
        self.state.subscribe()
    }

    /// Applies `update` and notifies subscribers if anything changed.
    pub fn update_state(&self, update: SessionStateUpdate) -> bool {
        self.state.send_if_modified(|state| update.apply(state))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Closes the session.  Idempotent.
    ///
    /// Marks the session `NotConnected`, wakes every caller waiting on it
    /// with [`SessionError::Closed`], drops queued waiters and closes the
    /// connection.  An exchange already on the wire is abandoned.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("session {} closing", self.id);

        self.closed.cancel();
        self.exchange_mutex.clear();
        self.intent_queue.clear();
        mark_not_connected(&self.state);

        if let Err(e) = self.connection.close().await {
            warn!("session {}: error closing connection: {e}", self.id);
        }
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed(self.id));
        }
        if self.state.borrow().device_status == DeviceStatus::NotConnected {
            return Err(SessionError::Disconnected);
        }
        Ok(())
    }

    async fn queued_apdu(self: &Arc<Self>, apdu: &Apdu) -> Result<ApduResponse, SessionError> {
        let _intent = self.enter_intent_queue().await?;
        self.exchange_apdu(apdu).await
    }

    async fn queued_command<C: Command>(
        self: &Arc<Self>,
        command: &C,
    ) -> Result<CommandResult<C::Response, C::Error>, SessionError> {
        let _intent = self.enter_intent_queue().await?;
        debug!("session {}: sending {}", self.id, command.name());
        self.exchange_command(command).await
    }

    /// Body of one exchange.  Runs with the exchange mutex held.
    async fn run_exchange(&self, request: Vec<u8>) -> Result<ApduResponse, SessionError> {
        let mut incoming = self.incoming.lock().await;
        self.ensure_open()?;

        while let Ok(stale) = incoming.try_recv() {
            warn!("session {}: discarding stale frame {}", self.id, hex::encode(&stale));
        }

        debug!("session {} => {}", self.id, hex::encode(&request));
        for frame in segment(&request, &self.config.frame)? {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(SessionError::Closed(self.id)),
                written = self.connection.write(frame.to_bytes()) => written?,
            }
        }

        let mut assembler = FrameAssembler::new(&self.config.frame);
        let response = loop {
            let frame = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(SessionError::Closed(self.id)),
                frame = incoming.recv() => frame.ok_or(SessionError::Disconnected)?,
            };
            match assembler.feed(&frame) {
                Ok(Some(response)) => break response,
                Ok(None) => continue,
                Err(e) => {
                    warn!("session {}: exchange failed: {e}", self.id);
                    return Err(e.into());
                }
            }
        };

        debug!(
            "session {} <= {} {}",
            self.id,
            hex::encode(&response.data),
            response.status
        );
        self.record_reply_status(response.status);
        Ok(response)
    }

    fn record_reply_status(&self, status: StatusWord) {
        let device_status = if status.is_locked_device() {
            DeviceStatus::Locked
        } else {
            DeviceStatus::Connected
        };
        self.update_state(SessionStateUpdate::default().with_device_status(device_status));
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

fn mark_not_connected(state: &watch::Sender<DeviceSessionState>) {
    state.send_if_modified(|state| {
        if state.device_status == DeviceStatus::NotConnected {
            return false;
        }
        state.device_status = DeviceStatus::NotConnected;
        true
    });
}

/// Forwards transport frames to the session until the transport drops its
/// sink (device gone) or the session is closed.
async fn pump_frames(
    id: DeviceSessionId,
    mut transport_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    frame_tx: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<watch::Sender<DeviceSessionState>>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            frame = transport_rx.recv() => match frame {
                Some(frame) => {
                    if frame_tx.send(frame).is_err() {
                        return;
                    }
                }
                None => break,
            },
        }
    }
    warn!("session {id}: transport closed, device disconnected");
    mark_not_connected(&state);
}
