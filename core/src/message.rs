//! Incoming game-message schema.
//!
//! The queue delivers loosely-typed JSON; this module parses it into an
//! explicit record type with optional fields, and applies defaults at
//! the boundary so the rest of the pipeline runs over a total model.

use crate::error::{ProcResult, ProcessorError};
use crate::records::parse_datetime_flexible;
use crate::types::UNASSIGNED_VENUE_ID;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMessage {
    pub game: GameInfo,
    #[serde(default)]
    pub players: PlayerRoster,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub id: String,
    #[serde(default)]
    pub venue_id: Option<String>,
    /// Tenant override for this message.
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub game_start_date_time: Option<String>,
    #[serde(default)]
    pub game_end_date_time: Option<String>,
    #[serde(default)]
    pub buy_in: Option<f64>,
    #[serde(default)]
    pub rake: Option<f64>,
    #[serde(default)]
    pub venue_assignment_status: Option<String>,
    #[serde(default)]
    pub total_unique_players: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRoster {
    #[serde(default)]
    pub total_unique_players: Option<u32>,
    #[serde(default)]
    pub all_players: Vec<PlayerData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    pub name: String,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(default)]
    pub winnings: Option<f64>,
    #[serde(default)]
    pub is_qualification: Option<bool>,
}

impl GameMessage {
    pub fn parse(body: &str) -> ProcResult<Self> {
        serde_json::from_str(body)
            .map_err(|e| ProcessorError::Input(format!("malformed game message: {e}")))
    }

    /// `totalRunners` fallback chain: game-level, then roster-level, then 0.
    pub fn total_runners(&self) -> u32 {
        self.game
            .total_unique_players
            .or(self.players.total_unique_players)
            .unwrap_or(0)
    }
}

impl GameInfo {
    /// Game start instant. Date-only values are promoted to midnight UTC;
    /// absent or unparseable values yield `None` and the caller falls back
    /// to the processing time.
    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        self.game_start_date_time
            .as_deref()
            .and_then(parse_datetime_flexible)
    }

    /// The venue id when the game can be venue-assigned: present and not
    /// the unassigned sentinel.
    pub fn assignable_venue(&self) -> Option<&str> {
        match self.venue_id.as_deref() {
            Some(v) if !v.is_empty() && v != UNASSIGNED_VENUE_ID => Some(v),
            _ => None,
        }
    }

    pub fn buy_in(&self) -> f64 {
        self.buy_in.unwrap_or(0.0)
    }

    pub fn rake(&self) -> f64 {
        self.rake.unwrap_or(0.0)
    }
}

impl PlayerData {
    pub fn points(&self) -> f64 {
        self.points.unwrap_or(0.0)
    }

    pub fn winnings(&self) -> f64 {
        self.winnings.unwrap_or(0.0)
    }

    pub fn is_qualification(&self) -> bool {
        self.is_qualification.unwrap_or(false)
    }

    /// "In the money": won a prize or qualified onward.
    pub fn in_the_money(&self) -> bool {
        self.winnings() > 0.0 || self.is_qualification()
    }
}
