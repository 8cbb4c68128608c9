//! Run an arbitrary async task as a device action.

use std::future::Future;

use async_trait::async_trait;
use dmk_session::SessionError;

use crate::application::engine::{ActionContext, DeviceAction};
use crate::application::internal_api::InternalApi;
use crate::domain::state::UserInteractionRequired;

/// Runs `task` with the action's [`InternalApi`] while holding the
/// session's intent queue.
///
/// Handy for short command sequences that do not deserve their own action
/// type.  The task's error type only needs to accept session errors.
pub struct CallTaskDeviceAction<F> {
    name: String,
    task: F,
    user_interaction: UserInteractionRequired,
}

impl<F> CallTaskDeviceAction<F> {
    pub fn new(name: impl Into<String>, task: F) -> Self {
        Self {
            name: name.into(),
            task,
            user_interaction: UserInteractionRequired::None,
        }
    }

    /// Interaction reported for the whole duration of the task.
    pub fn with_user_interaction(mut self, interaction: UserInteractionRequired) -> Self {
        self.user_interaction = interaction;
        self
    }
}

#[async_trait]
impl<F, Fut, T, E> DeviceAction for CallTaskDeviceAction<F>
where
    F: Fn(InternalApi) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<SessionError> + Send + 'static,
{
    type Output = T;
    type Error = E;
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &str {
        &self.name
    }

    fn initial_intermediate(&self) -> UserInteractionRequired {
        self.user_interaction
    }

    async fn run(&self, ctx: ActionContext<UserInteractionRequired>) -> Result<T, E> {
        (self.task)(ctx.api().clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::execute_device_action;
    use crate::domain::state::DeviceActionState;
    use dmk_core::{Apdu, DeviceId, FrameConfig, StatusWord};
    use dmk_session::infrastructure::transport::mock::{
        status_responder, MockDeviceConnection, MockDeviceController,
    };
    use dmk_session::{DeviceSession, SessionConfig};
    use std::sync::Arc;

    fn session() -> (Arc<DeviceSession>, MockDeviceController) {
        let (connection, controller) = MockDeviceConnection::new(
            DeviceId::from("flex"),
            FrameConfig::usb_hid(),
            status_responder(StatusWord::SUCCESS),
        );
        let session = DeviceSession::open(Box::new(connection), SessionConfig::default()).unwrap();
        (session, controller)
    }

    #[tokio::test]
    async fn test_task_runs_command_sequence_and_returns_its_value() {
        // Arrange
        let (session, controller) = session();
        let action = CallTaskDeviceAction::new("ThreePings", |api: InternalApi| async move {
            let ping = Apdu::new(0xE0, 0x01, 0, 0, Vec::new()).expect("empty apdu");
            let mut ok = 0u8;
            for _ in 0..3 {
                if api.send_apdu(&ping).await?.is_success() {
                    ok += 1;
                }
            }
            Ok::<u8, SessionError>(ok)
        });

        // Act
        let last = execute_device_action(&session, action).states.final_state().await;

        // Assert
        assert_eq!(last, Some(DeviceActionState::Completed(3)));
        assert_eq!(controller.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_task_error_is_error_state() {
        let (session, _controller) = session();
        let action = CallTaskDeviceAction::new("Fails", |_api: InternalApi| async move {
            Err::<(), SessionError>(SessionError::Disconnected)
        })
        .with_user_interaction(UserInteractionRequired::AllowListApps);

        let states = execute_device_action(&session, action).states.collect_all().await;

        assert_eq!(
            states,
            vec![
                DeviceActionState::NotStarted,
                DeviceActionState::Pending(UserInteractionRequired::AllowListApps),
                DeviceActionState::Error(SessionError::Disconnected),
            ]
        );
    }
}
