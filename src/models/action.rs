use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// One of the three power commands sharing a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Boot,
    Shutdown,
    Reboot,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Boot => "boot",
            PowerAction::Shutdown => "shutdown",
            PowerAction::Reboot => "reboot",
        }
    }

    /// Powering on never disturbs anyone, so only shutdown and reboot check for players.
    pub fn requires_idle_check(&self) -> bool {
        !matches!(self, PowerAction::Boot)
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            PowerAction::Boot => "Server booted!",
            PowerAction::Shutdown => "Server shut down!",
            PowerAction::Reboot => "Server rebooting!",
        }
    }

    pub fn players_online_message(&self) -> &'static str {
        match self {
            PowerAction::Boot => "Server can't be booted, someone is online!",
            PowerAction::Shutdown => "Server can't be shut down, someone is online!",
            PowerAction::Reboot => "Server can't be rebooted, someone is online!",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            PowerAction::Boot => "Something went wrong, have an adult check the logs",
            PowerAction::Shutdown | PowerAction::Reboot => {
                "Server appears to be already offline, check the logs"
            }
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boot" => Ok(PowerAction::Boot),
            "shutdown" => Ok(PowerAction::Shutdown),
            "reboot" => Ok(PowerAction::Reboot),
            other => Err(format!("Unknown action '{}'. Valid: boot, shutdown, reboot", other)),
        }
    }
}

/// Confirmation prompt handed back to the chat layer for an override.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OverridePrompt {
    pub id: Uuid,
    pub action: PowerAction,
    pub guild: String,
    pub requester: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The endpoint accepted the action. `unconfirmed_servers` could not be queried
    /// beforehand and were assumed empty.
    Executed {
        action: PowerAction,
        unconfirmed_servers: Vec<String>,
    },
    OnCooldown {
        action: PowerAction,
        remaining_secs: u64,
    },
    PlayersOnline {
        action: PowerAction,
        failed_servers: Vec<String>,
    },
    AwaitingConfirmation(OverridePrompt),
}

impl ActionOutcome {
    pub fn message(&self) -> String {
        match self {
            ActionOutcome::Executed { action, unconfirmed_servers } if unconfirmed_servers.is_empty() => {
                action.success_message().to_string()
            }
            ActionOutcome::Executed { action, unconfirmed_servers } => format!(
                "{} (could not confirm these were empty: {})",
                action.success_message(),
                unconfirmed_servers.join(", ")
            ),
            ActionOutcome::OnCooldown { action, remaining_secs } => format!(
                "`/{}` is currently on cooldown. Please wait another {}s before retrying, or retry with `/override {}`.",
                action, remaining_secs, action
            ),
            ActionOutcome::PlayersOnline { action, .. } => action.players_online_message().to_string(),
            ActionOutcome::AwaitingConfirmation(prompt) => format!(
                "Are you sure that you want to force `{}`? Confirm before {}.",
                prompt.action,
                prompt.expires_at.format("%H:%M:%S UTC")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CooldownState {
    Ready,
    Cooldown { remaining_secs: u64 },
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

impl From<ActionOutcome> for ActionResponse {
    fn from(outcome: ActionOutcome) -> Self {
        Self {
            message: outcome.message(),
            outcome,
        }
    }
}
