//! The device-action contract and its runner.
//!
//! # How an execution runs (for beginners)
//!
//! [`execute_device_action`] returns immediately with two handles:
//!
//! - [`DeviceActionStates`], the receiving end of a channel the runner
//!   pushes states into.  It already holds `NotStarted` when returned.
//! - [`CancelHandle`], which asks the runner to stop.
//!
//! The runner itself is a spawned tokio task:
//!
//! ```text
//! enter intent queue ─► emit Pending(initial) ─► action.run(ctx)
//!        ▲                                            │
//!        └──────── raced against cancel ──────────────┘
//! ```
//!
//! Cancelling drops the whole right-hand future at its current `.await`.
//! A queued mutex waiter is withdrawn, the intent-queue guard is dropped,
//! and an exchange already on the wire finishes in its own task and
//! releases the exchange mutex when its reply arrives.  The runner then
//! emits `Stopped` and closes the channel.
//!
//! Dropping [`DeviceActionStates`] counts as a cancel: nobody is listening.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dmk_core::{Apdu, DeviceStatus};
use dmk_session::{DeviceSession, SessionError};
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::internal_api::InternalApi;
use crate::domain::state::{DeviceActionState, UserInteractionRequired};

// ── Contract ──────────────────────────────────────────────────────────────────

/// A multi-step workflow against one device session.
///
/// The action's input is the implementing struct's own fields.
#[async_trait]
pub trait DeviceAction: Send + Sync + 'static {
    type Output: Send + 'static;
    /// Session failures must convert into the action's error so `?` works
    /// on every [`InternalApi`] call.
    type Error: From<SessionError> + Send + 'static;
    type Intermediate: Clone + Send + Sync + 'static;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Value carried by the first `Pending` state.
    fn initial_intermediate(&self) -> Self::Intermediate;

    /// Body of the workflow.
    ///
    /// Every `.await` is a point where a cancel can take effect.
    async fn run(&self, ctx: ActionContext<Self::Intermediate>) -> Result<Self::Output, Self::Error>;
}

type Emitter<I> = Arc<dyn Fn(I) + Send + Sync>;

/// What a running action gets: the session API and a way to report progress.
pub struct ActionContext<I> {
    api: InternalApi,
    emit: Emitter<I>,
}

impl<I> Clone for ActionContext<I> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            emit: Arc::clone(&self.emit),
        }
    }
}

impl<I: Clone + Send + 'static> ActionContext<I> {
    pub fn api(&self) -> &InternalApi {
        &self.api
    }

    /// Publishes `Pending(intermediate)`.  Ignored once the execution has ended.
    pub fn emit(&self, intermediate: I) {
        (self.emit)(intermediate);
    }

    /// Waits for a locked device to be unlocked.
    ///
    /// Returns at once if the device is not locked.  Otherwise emits
    /// `UnlockDevice` and sends `probe.apdu` every `probe.interval` until
    /// a reply other than `0x5515` comes back, then emits `None`.  The
    /// running action holds the intent queue, so nobody else can refresh
    /// the lock status meanwhile.  A session state update to `Connected`
    /// also ends the wait.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] if the device stays locked for
    /// `timeout`, [`SessionError::Disconnected`] if it goes away, or the
    /// probe's own exchange error.
    pub async fn wait_until_unlocked(
        &self,
        timeout: Duration,
        probe: &UnlockProbe,
    ) -> Result<(), SessionError>
    where
        I: From<UserInteractionRequired>,
    {
        if self.api.device_session_state().device_status != DeviceStatus::Locked {
            return Ok(());
        }
        self.emit(I::from(UserInteractionRequired::UnlockDevice));

        let unlocked = async {
            loop {
                tokio::select! {
                    state = self.api.wait_for_session_state(
                        |s| s.device_status == DeviceStatus::Connected,
                        None,
                    ) => return state.map(|_| ()),
                    _ = tokio::time::sleep(probe.interval) => {}
                }
                let response = self.api.send_apdu(&probe.apdu).await?;
                if !response.status.is_locked_device() {
                    return Ok(());
                }
                debug!("device still locked, probing again in {:?}", probe.interval);
            }
        };
        tokio::time::timeout(timeout, unlocked)
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;

        self.emit(I::from(UserInteractionRequired::None));
        Ok(())
    }
}

/// How often a locked device is probed while an action waits for unlock.
pub const DEFAULT_UNLOCK_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// The request [`ActionContext::wait_until_unlocked`] sends to find out
/// whether a locked device has been unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockProbe {
    pub apdu: Apdu,
    pub interval: Duration,
}

impl UnlockProbe {
    pub fn new(apdu: Apdu, interval: Duration) -> Self {
        Self { apdu, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for UnlockProbe {
    /// Get-app-and-version (`B0 01 00 00`): answered by the OS and by
    /// every app, with `0x5515` while the device is locked.
    fn default() -> Self {
        Self::new(
            Apdu::without_data(0xB0, 0x01, 0x00, 0x00),
            DEFAULT_UNLOCK_PROBE_INTERVAL,
        )
    }
}

// ── Execution handles ─────────────────────────────────────────────────────────

/// Sending side of an execution's state channel.
///
/// Taking the sender out on the terminal state closes the channel and turns
/// every later emit into a no-op.
struct StateSender<O, E, I> {
    sender: Mutex<Option<mpsc::UnboundedSender<DeviceActionState<O, E, I>>>>,
}

impl<O, E, I> StateSender<O, E, I> {
    fn new(sender: mpsc::UnboundedSender<DeviceActionState<O, E, I>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn send(&self, state: DeviceActionState<O, E, I>) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = guard.as_ref() {
            // A dropped receiver is handled by the runner as a cancel.
            let _ = sender.send(state);
        }
    }

    fn finish(&self, terminal: DeviceActionState<O, E, I>) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(terminal);
        }
    }
}

/// The states of one execution, in order, ending with a terminal state.
///
/// Also a [`Stream`].
pub struct DeviceActionStates<O, E, I> {
    receiver: mpsc::UnboundedReceiver<DeviceActionState<O, E, I>>,
}

impl<O, E, I> DeviceActionStates<O, E, I> {
    /// Next state, or `None` after the terminal state.
    pub async fn next_state(&mut self) -> Option<DeviceActionState<O, E, I>> {
        self.receiver.recv().await
    }

    /// Drains the execution and returns its terminal state.
    pub async fn final_state(mut self) -> Option<DeviceActionState<O, E, I>> {
        let mut last = None;
        while let Some(state) = self.receiver.recv().await {
            last = Some(state);
        }
        last
    }

    /// Drains the execution and returns every state it produced.
    pub async fn collect_all(mut self) -> Vec<DeviceActionState<O, E, I>> {
        let mut states = Vec::new();
        while let Some(state) = self.receiver.recv().await {
            states.push(state);
        }
        states
    }
}

// No field is ever pinned.
impl<O, E, I> Unpin for DeviceActionStates<O, E, I> {}

impl<O, E, I> Stream for DeviceActionStates<O, E, I> {
    type Item = DeviceActionState<O, E, I>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Stops an execution.  Idempotent; cloning shares the same execution.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handles returned by [`execute_device_action`].
pub struct DeviceActionExecution<O, E, I> {
    pub states: DeviceActionStates<O, E, I>,
    pub cancel: CancelHandle,
}

// ── Runner ────────────────────────────────────────────────────────────────────

/// Starts `action` on `session`.
///
/// Must be called from within a tokio runtime.
pub fn execute_device_action<A: DeviceAction>(
    session: &Arc<DeviceSession>,
    action: A,
) -> DeviceActionExecution<A::Output, A::Error, A::Intermediate> {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = tx.clone();
    let sender = Arc::new(StateSender::new(tx));
    sender.send(DeviceActionState::NotStarted);

    let token = CancellationToken::new();
    tokio::spawn(drive(
        Arc::clone(session),
        action,
        sender,
        listener,
        token.clone(),
    ));

    DeviceActionExecution {
        states: DeviceActionStates { receiver: rx },
        cancel: CancelHandle { token },
    }
}

async fn drive<A: DeviceAction>(
    session: Arc<DeviceSession>,
    action: A,
    sender: Arc<StateSender<A::Output, A::Error, A::Intermediate>>,
    listener: mpsc::UnboundedSender<DeviceActionState<A::Output, A::Error, A::Intermediate>>,
    token: CancellationToken,
) {
    let session_id = session.id();
    info!("device action {} started on session {session_id}", action.name());

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        _ = listener.closed() => {
            debug!("device action {}: states dropped, stopping", action.name());
            None
        }
        outcome = run_in_turn(&session, &action, &sender) => Some(outcome),
    };
    drop(listener);

    let terminal = match outcome {
        None => DeviceActionState::Stopped,
        Some(Ok(output)) => DeviceActionState::Completed(output),
        Some(Err(error)) => DeviceActionState::Error(error),
    };
    info!(
        "device action {} on session {session_id}: {}",
        action.name(),
        terminal.label()
    );
    sender.finish(terminal);
}

/// Waits for the action's turn on the session, then runs it.
///
/// The intent-queue guard lives in this future, so it is released when the
/// action ends and also when the future is dropped by a cancel.
async fn run_in_turn<A: DeviceAction>(
    session: &Arc<DeviceSession>,
    action: &A,
    sender: &Arc<StateSender<A::Output, A::Error, A::Intermediate>>,
) -> Result<A::Output, A::Error> {
    let _turn = session.enter_intent_queue().await?;
    sender.send(DeviceActionState::Pending(action.initial_intermediate()));

    let emitter = Arc::clone(sender);
    let ctx = ActionContext {
        api: InternalApi::new(Arc::clone(session)),
        emit: Arc::new(move |intermediate| {
            emitter.send(DeviceActionState::Pending(intermediate));
        }),
    };
    action.run(ctx).await
}
