//! Bot sessions and the global execution slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Ended => "ended",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// A bot's working session, with activity counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSession {
    pub session_id: String,
    pub bot_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub accounts_processed: i64,
    pub phases_completed: i64,
    pub phases_failed: i64,
    pub last_error_message: Option<String>,
}

/// The single global claim ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSlot {
    pub bot_id: Option<String>,
    pub session_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BotSlot {
    /// Held by some bot and not yet expired.
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.bot_id.is_some() && self.expires_at.is_some_and(|exp| exp > now)
    }

    /// Whether `bot_id` could claim the slot at `now`.
    pub fn is_claimable_by(&self, bot_id: &str, now: DateTime<Utc>) -> bool {
        !self.is_held_at(now) || self.bot_id.as_deref() == Some(bot_id)
    }
}

/// Answer to "may this bot start work right now?".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPermission {
    pub allowed: bool,
    pub reason: Option<String>,
    pub active_bot_id: Option<String>,
}
