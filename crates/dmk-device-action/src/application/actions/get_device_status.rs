//! Report what the session knows about the device.

use std::time::Duration;

use async_trait::async_trait;
use dmk_core::{DeviceSessionState, DeviceStatus, FirmwareVersion, RunningApp};
use serde::{Deserialize, Serialize};

use super::{DeviceActionError, DEFAULT_UNLOCK_TIMEOUT};
use crate::application::engine::{ActionContext, DeviceAction, UnlockProbe};
use crate::domain::state::UserInteractionRequired;

/// Output of [`GetDeviceStatusDeviceAction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusReport {
    pub device_status: DeviceStatus,
    pub current_app: Option<RunningApp>,
    pub firmware_version: Option<FirmwareVersion>,
    pub battery_level: Option<u8>,
}

impl From<DeviceSessionState> for DeviceStatusReport {
    fn from(state: DeviceSessionState) -> Self {
        Self {
            device_status: state.device_status,
            current_app: state.current_app,
            firmware_version: state.firmware_version,
            battery_level: state.battery_level,
        }
    }
}

/// Waits for a locked device to be unlocked, then reports its state.
#[derive(Debug, Clone)]
pub struct GetDeviceStatusDeviceAction {
    unlock_timeout: Duration,
    unlock_probe: UnlockProbe,
}

impl GetDeviceStatusDeviceAction {
    pub fn new(unlock_timeout: Duration) -> Self {
        Self {
            unlock_timeout,
            unlock_probe: UnlockProbe::default(),
        }
    }

    pub fn with_unlock_probe(mut self, probe: UnlockProbe) -> Self {
        self.unlock_probe = probe;
        self
    }
}

impl Default for GetDeviceStatusDeviceAction {
    fn default() -> Self {
        Self::new(DEFAULT_UNLOCK_TIMEOUT)
    }
}

#[async_trait]
impl DeviceAction for GetDeviceStatusDeviceAction {
    type Output = DeviceStatusReport;
    type Error = DeviceActionError;
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &str {
        "GetDeviceStatus"
    }

    fn initial_intermediate(&self) -> UserInteractionRequired {
        UserInteractionRequired::None
    }

    async fn run(
        &self,
        ctx: ActionContext<UserInteractionRequired>,
    ) -> Result<DeviceStatusReport, DeviceActionError> {
        ctx.wait_until_unlocked(self.unlock_timeout, &self.unlock_probe)
            .await
            .map_err(DeviceActionError::from_unlock)?;
        Ok(ctx.api().device_session_state().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::execute_device_action;
    use crate::domain::state::DeviceActionState;
    use dmk_core::{Apdu, DeviceId, FrameConfig, SessionStateUpdate, StatusWord};
    use dmk_session::infrastructure::transport::mock::{
        status_responder, MockDeviceConnection, Responder,
    };
    use dmk_session::{DeviceSession, SessionConfig};
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session() -> Arc<DeviceSession> {
        let (connection, _controller) = MockDeviceConnection::new(
            DeviceId::from("nano-x"),
            FrameConfig::usb_hid(),
            status_responder(StatusWord::SUCCESS),
        );
        DeviceSession::open(Box::new(connection), SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_unlocked_device_reports_current_app() {
        // Arrange
        let session = session();
        session.update_state(
            SessionStateUpdate::default()
                .with_current_app(RunningApp::new("Bitcoin", "2.1.0"))
                .with_battery_level(80),
        );

        // Act
        let last = execute_device_action(&session, GetDeviceStatusDeviceAction::default())
            .states
            .final_state()
            .await;

        // Assert
        assert_eq!(
            last,
            Some(DeviceActionState::Completed(DeviceStatusReport {
                device_status: DeviceStatus::Connected,
                current_app: Some(RunningApp::new("Bitcoin", "2.1.0")),
                firmware_version: None,
                battery_level: Some(80),
            }))
        );
    }

    #[tokio::test]
    async fn test_locked_device_prompts_for_unlock_then_reports() {
        // Arrange
        let session = session();
        session.update_state(SessionStateUpdate::default().with_device_status(DeviceStatus::Locked));
        let mut execution = execute_device_action(&session, GetDeviceStatusDeviceAction::default());

        // Act
        let mut last = None;
        while let Some(state) = execution.states.next().await {
            if state == DeviceActionState::Pending(UserInteractionRequired::UnlockDevice) {
                session.update_state(
                    SessionStateUpdate::default().with_device_status(DeviceStatus::Connected),
                );
            }
            last = Some(state);
        }

        // Assert
        let report = last.and_then(|state| state.output().cloned()).expect("completed");
        assert_eq!(report.device_status, DeviceStatus::Connected);
    }

    #[tokio::test]
    async fn test_device_that_stays_locked_fails_with_device_locked() {
        let session = session();
        session.update_state(SessionStateUpdate::default().with_device_status(DeviceStatus::Locked));

        let last = execute_device_action(
            &session,
            GetDeviceStatusDeviceAction::new(Duration::from_millis(10)),
        )
        .states
        .final_state()
        .await;

        assert_eq!(
            last,
            Some(DeviceActionState::Error(DeviceActionError::DeviceLocked(
                Duration::from_millis(10)
            )))
        );
    }

    #[tokio::test]
    async fn test_locked_device_is_probed_until_it_reports_unlocked() {
        // Arrange: first reply is 0x5515, every later one 0x9000.
        let answered = Arc::new(AtomicUsize::new(0));
        let responder: Responder = {
            let answered = Arc::clone(&answered);
            Arc::new(move |_request: &[u8]| {
                let status = if answered.fetch_add(1, Ordering::SeqCst) == 0 {
                    StatusWord::LOCKED_DEVICE
                } else {
                    StatusWord::SUCCESS
                };
                status.to_bytes().to_vec()
            })
        };
        let (connection, controller) =
            MockDeviceConnection::new(DeviceId::from("nano-x"), FrameConfig::usb_hid(), responder);
        let session = DeviceSession::open(Box::new(connection), SessionConfig::default()).unwrap();
        session
            .send_apdu(&Apdu::without_data(0xE0, 0x01, 0x00, 0x00))
            .await
            .unwrap();
        assert_eq!(session.state().device_status, DeviceStatus::Locked);
        let action = GetDeviceStatusDeviceAction::new(Duration::from_millis(500))
            .with_unlock_probe(UnlockProbe::default().with_interval(Duration::from_millis(10)));

        // Act
        let states = execute_device_action(&session, action).states.collect_all().await;

        // Assert
        assert!(states.contains(&DeviceActionState::Pending(UserInteractionRequired::UnlockDevice)));
        let report = states.last().and_then(|state| state.output().cloned()).expect("completed");
        assert_eq!(report.device_status, DeviceStatus::Connected);
        assert_eq!(controller.requests().len(), 2);
    }
}
