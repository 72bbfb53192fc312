//! Lifecycle stages.
//!
//! ```text
//! translation → compliance → awaitingApproval → scheduled → publishing → completed
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// Waiting for every required locale to be translated
    Translation,
    /// Compliance check running; advances on its own
    Compliance,
    /// Waiting for an editor to approve
    AwaitingApproval,
    /// Waiting for the publish time or an explicit publish-now
    Scheduled,
    /// Publishing to every onboarded site
    Publishing,
    /// Done; no further mutation
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Translation,
        Stage::Compliance,
        Stage::AwaitingApproval,
        Stage::Scheduled,
        Stage::Publishing,
        Stage::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Translation => "translation",
            Stage::Compliance => "compliance",
            Stage::AwaitingApproval => "awaitingApproval",
            Stage::Scheduled => "scheduled",
            Stage::Publishing => "publishing",
            Stage::Completed => "completed",
        }
    }

    /// The stage that follows this one, `None` for `Completed`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Translation => Some(Stage::Compliance),
            Stage::Compliance => Some(Stage::AwaitingApproval),
            Stage::AwaitingApproval => Some(Stage::Scheduled),
            Stage::Scheduled => Some(Stage::Publishing),
            Stage::Publishing => Some(Stage::Completed),
            Stage::Completed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Translation
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value.trim())
            .ok_or_else(|| format!("invalid stage '{value}'"))
    }
}
