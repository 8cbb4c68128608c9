//! The session-scoped API handed to a running device action.
//!
//! A running action already holds the session's intent queue (unless the
//! session bypasses it), so commands sent here go straight to the exchange
//! mutex.  Going through the intent queue again would deadlock the action
//! against itself.

use std::sync::Arc;
use std::time::Duration;

use dmk_core::{
    Apdu, ApduResponse, Command, CommandResult, DeviceSessionId, DeviceSessionState,
    DeviceStatus, SessionStateUpdate,
};
use dmk_session::{DeviceSession, SessionError};
use tokio::sync::watch;

/// What a device action may do with its session.
#[derive(Debug, Clone)]
pub struct InternalApi {
    session: Arc<DeviceSession>,
}

impl InternalApi {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session }
    }

    pub fn session_id(&self) -> DeviceSessionId {
        self.session.id()
    }

    /// Sends one raw APDU.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on transport, framing or session failures.
    pub async fn send_apdu(&self, apdu: &Apdu) -> Result<ApduResponse, SessionError> {
        self.session.exchange_apdu(apdu).await
    }

    /// Sends a typed command and applies its session update on success.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on transport, framing or session failures.
    /// Status-word failures are in the inner [`CommandResult`].
    pub async fn send_command<C: Command>(
        &self,
        command: &C,
    ) -> Result<CommandResult<C::Response, C::Error>, SessionError> {
        self.session.exchange_command(command).await
    }

    pub fn device_session_state(&self) -> DeviceSessionState {
        self.session.state()
    }

    pub fn observe_device_session_state(&self) -> watch::Receiver<DeviceSessionState> {
        self.session.subscribe_state()
    }

    pub fn update_device_session_state(&self, update: SessionStateUpdate) -> bool {
        self.session.update_state(update)
    }

    /// Waits until the session state satisfies `predicate`.
    ///
    /// The current state is checked first, so an already-satisfied
    /// predicate returns immediately.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Disconnected`] if the session reaches
    ///   `NotConnected` without satisfying `predicate`.
    /// - [`SessionError::Timeout`] if `timeout` elapses first.
    pub async fn wait_for_session_state(
        &self,
        predicate: impl Fn(&DeviceSessionState) -> bool + Send,
        timeout: Option<Duration>,
    ) -> Result<DeviceSessionState, SessionError> {
        let mut states = self.session.subscribe_state();
        let wait = async move {
            loop {
                {
                    let state = states.borrow_and_update();
                    if predicate(&state) {
                        return Ok(state.clone());
                    }
                    if state.device_status == DeviceStatus::NotConnected {
                        return Err(SessionError::Disconnected);
                    }
                }
                if states.changed().await.is_err() {
                    return Err(SessionError::Disconnected);
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| SessionError::Timeout(limit))?,
            None => wait.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmk_core::{DeviceId, FrameConfig, StatusWord};
    use dmk_session::infrastructure::transport::mock::{
        status_responder, MockDeviceConnection, MockDeviceController,
    };
    use dmk_session::SessionConfig;

    fn api() -> (InternalApi, MockDeviceController) {
        let (connection, controller) = MockDeviceConnection::new(
            DeviceId::from("nano-x"),
            FrameConfig::usb_hid(),
            status_responder(StatusWord::SUCCESS),
        );
        let session = DeviceSession::open(Box::new(connection), SessionConfig::default()).unwrap();
        (InternalApi::new(session), controller)
    }

    fn locked() -> SessionStateUpdate {
        SessionStateUpdate::default().with_device_status(DeviceStatus::Locked)
    }

    #[tokio::test]
    async fn test_send_apdu_does_not_wait_for_intent_queue() {
        // Arrange
        let (api, controller) = api();
        let _intent = api.session.enter_intent_queue().await.unwrap();

        // Act
        let response = api
            .send_apdu(&Apdu::new(0xE0, 0x01, 0, 0, Vec::new()).unwrap())
            .await
            .unwrap();

        // Assert
        assert!(response.is_success());
        assert_eq!(controller.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_satisfied_predicate_returns_immediately() {
        let (api, _controller) = api();

        let state = api
            .wait_for_session_state(|s| s.device_status == DeviceStatus::Connected, None)
            .await
            .unwrap();

        assert_eq!(state.session_id, api.session_id());
    }

    #[tokio::test]
    async fn test_wait_for_state_resolves_on_later_change() {
        // Arrange
        let (api, _controller) = api();
        api.update_device_session_state(locked());
        let waiter = tokio::spawn({
            let api = api.clone();
            async move {
                api.wait_for_session_state(|s| s.device_status == DeviceStatus::Connected, None)
                    .await
            }
        });

        // Act
        tokio::task::yield_now().await;
        api.update_device_session_state(
            SessionStateUpdate::default().with_device_status(DeviceStatus::Connected),
        );

        // Assert
        let state = waiter.await.unwrap().unwrap();
        assert_eq!(state.device_status, DeviceStatus::Connected);
    }

    #[tokio::test]
    async fn test_wait_for_state_times_out() {
        let (api, _controller) = api();
        api.update_device_session_state(locked());

        let result = api
            .wait_for_session_state(
                |s| s.device_status == DeviceStatus::Connected,
                Some(Duration::from_millis(10)),
            )
            .await;

        assert_eq!(result, Err(SessionError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_wait_for_state_fails_when_session_closes() {
        // Arrange
        let (api, _controller) = api();
        api.update_device_session_state(locked());
        let waiter = tokio::spawn({
            let api = api.clone();
            async move {
                api.wait_for_session_state(|s| s.device_status == DeviceStatus::Connected, None)
                    .await
            }
        });

        // Act
        tokio::task::yield_now().await;
        api.session.close().await;

        // Assert
        assert_eq!(waiter.await.unwrap(), Err(SessionError::Disconnected));
    }
}
