//! Send one command as a device action.

use async_trait::async_trait;
use dmk_core::Command;
use std::time::Duration;

use super::{DeviceActionError, DEFAULT_UNLOCK_TIMEOUT};
use crate::application::engine::{ActionContext, DeviceAction, UnlockProbe};
use crate::domain::state::UserInteractionRequired;

/// Sends `command` once the device is unlocked.
///
/// While the command is on the wire the action reports the user
/// interaction it was built with (`SignTransaction`, `VerifyAddress`, ...),
/// so a UI can prompt the user to look at the device.
pub struct SendCommandDeviceAction<C> {
    command: C,
    user_interaction: UserInteractionRequired,
    unlock_timeout: Duration,
    unlock_probe: UnlockProbe,
}

impl<C: Command> SendCommandDeviceAction<C> {
    pub fn new(command: C) -> Self {
        Self {
            command,
            user_interaction: UserInteractionRequired::None,
            unlock_timeout: DEFAULT_UNLOCK_TIMEOUT,
            unlock_probe: UnlockProbe::default(),
        }
    }

    pub fn with_user_interaction(mut self, interaction: UserInteractionRequired) -> Self {
        self.user_interaction = interaction;
        self
    }

    pub fn with_unlock_timeout(mut self, timeout: Duration) -> Self {
        self.unlock_timeout = timeout;
        self
    }

    /// Replaces the request used to check whether a locked device has
    /// been unlocked.
    pub fn with_unlock_probe(mut self, probe: UnlockProbe) -> Self {
        self.unlock_probe = probe;
        self
    }
}

#[async_trait]
impl<C: Command + 'static> DeviceAction for SendCommandDeviceAction<C> {
    type Output = C::Response;
    type Error = DeviceActionError<C::Error>;
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &str {
        self.command.name()
    }

    fn initial_intermediate(&self) -> UserInteractionRequired {
        UserInteractionRequired::None
    }

    async fn run(
        &self,
        ctx: ActionContext<UserInteractionRequired>,
    ) -> Result<C::Response, DeviceActionError<C::Error>> {
        ctx.wait_until_unlocked(self.unlock_timeout, &self.unlock_probe)
            .await
            .map_err(DeviceActionError::from_unlock)?;

        if self.user_interaction.is_required() {
            ctx.emit(self.user_interaction);
        }
        let result = ctx.api().send_command(&self.command).await?;
        if self.user_interaction.is_required() {
            ctx.emit(UserInteractionRequired::None);
        }
        result.map_err(DeviceActionError::Command)
    }
}
