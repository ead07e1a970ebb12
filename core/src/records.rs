//! Derived-record types written to the record store.
//!
//! These structs are the wire format of the store docs: field names are
//! camelCase, every record carries the `__typename` tag, an optimistic
//! `_version`, `_lastChangedAt` (Unix ms) and ISO-8601 `createdAt` /
//! `updatedAt` timestamps. Counters read back from legacy records may be
//! missing attributes, so numeric fields default on deserialize.

use crate::error::{ProcResult, ProcessorError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A store document: one record as a JSON object.
pub type Doc = serde_json::Map<String, serde_json::Value>;

/// Millisecond-precision ISO-8601 (`2025-01-15T19:00:00.000Z`) — the
/// format every date attribute is stored in.
pub const ISO_MS_FMT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_iso_ms(dt: DateTime<Utc>) -> String {
    dt.format(ISO_MS_FMT).to_string()
}

/// Parse an ISO-8601 datetime, promoting date-only values to midnight UTC.
pub fn parse_datetime_flexible(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc))
}

/// Serde adapter pinning dates to [`ISO_MS_FMT`].
pub mod iso_ms {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format_iso_ms(*dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        parse_datetime_flexible(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unparseable datetime: {s}")))
    }
}

/// Serialize a record into a store doc.
pub fn to_doc<T: Serialize>(record: &T) -> ProcResult<Doc> {
    match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProcessorError::Input("record is not a JSON object".into())),
        Err(e) => Err(ProcessorError::Input(format!("record encode failed: {e}"))),
    }
}

/// Decode a store doc into a typed record.
pub fn from_doc<T: DeserializeOwned>(doc: Doc) -> ProcResult<T> {
    serde_json::from_value(serde_json::Value::Object(doc))
        .map_err(|e| ProcessorError::TransientIo(format!("record decode failed: {e}")))
}

// ── Status enums ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerCategory {
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueAssignmentStatus {
    AutoAssigned,
    PendingAssignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Registered,
    Completed,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Registered => "REGISTERED",
            EntryStatus::Completed => "COMPLETED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    BuyIn,
    Qualification,
    Prize,
}

// ── Records ──────────────────────────────────────────────────────────────────

/// Lifetime profile per named player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: String,
    #[serde(rename = "__typename", default = "typename_player")]
    pub typename: String,
    pub name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub status: PlayerStatus,
    pub category: PlayerCategory,
    #[serde(default)]
    pub credit_balance: f64,
    #[serde(default)]
    pub points_balance: f64,
    #[serde(with = "iso_ms")]
    pub registration_date: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub first_game_played: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub last_played_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_venue_id: Option<String>,
    pub venue_assignment_status: VenueAssignmentStatus,
    pub targeting_classification: String,
    /// Resolved tenant id.
    pub primary_entity_id: String,
    #[serde(rename = "_version", default)]
    pub version: i64,
    #[serde(rename = "_lastChangedAt", default)]
    pub last_changed_at: i64,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

/// Immutable outcome of one player in one game. Its presence is the
/// idempotency beacon for the whole per-player commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResultRecord {
    /// `playerId#gameId`.
    pub id: String,
    #[serde(rename = "__typename", default = "typename_result")]
    pub typename: String,
    pub player_id: String,
    pub game_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<String>,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finishing_place: Option<u32>,
    #[serde(default)]
    pub prize_won: bool,
    #[serde(default)]
    pub amount_won: f64,
    #[serde(default)]
    pub points_earned: f64,
    #[serde(default)]
    pub is_multi_day_qualification: bool,
    #[serde(default)]
    pub total_runners: u32,
    #[serde(with = "iso_ms")]
    pub game_start_date_time: DateTime<Utc>,
    #[serde(rename = "_version", default)]
    pub version: i64,
    #[serde(rename = "_lastChangedAt", default)]
    pub last_changed_at: i64,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

/// Monotonic counters over all of a player's games. Keyed by player id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummaryRecord {
    pub id: String,
    #[serde(rename = "__typename", default = "typename_summary")]
    pub typename: String,
    pub entity_id: String,
    #[serde(default)]
    pub sessions_played: i64,
    #[serde(default)]
    pub tournaments_played: i64,
    #[serde(rename = "tournamentITM", default)]
    pub tournament_itm: i64,
    #[serde(default)]
    pub tournaments_cashed: i64,
    #[serde(default)]
    pub venues_visited: i64,
    #[serde(default)]
    pub tournament_winnings: f64,
    #[serde(default)]
    pub total_winnings: f64,
    #[serde(default)]
    pub tournament_buy_ins: f64,
    #[serde(default)]
    pub total_buy_ins: f64,
    #[serde(default)]
    pub net_balance: f64,
    #[serde(with = "iso_ms")]
    pub last_played: DateTime<Utc>,
    #[serde(rename = "_version", default)]
    pub version: i64,
    #[serde(rename = "_lastChangedAt", default)]
    pub last_changed_at: i64,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

/// One player's relationship to one venue within one tenant. Surrogate
/// primary key; looked up through the `visitKey` secondary index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerVenueRecord {
    pub id: String,
    #[serde(rename = "__typename", default = "typename_venue")]
    pub typename: String,
    pub player_id: String,
    pub venue_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_key: Option<String>,
    #[serde(default)]
    pub total_games_played: i64,
    #[serde(default)]
    pub average_buy_in: f64,
    #[serde(with = "iso_ms")]
    pub first_played_date: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub last_played_date: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub membership_created_date: DateTime<Utc>,
    pub targeting_classification: String,
    #[serde(rename = "_version", default)]
    pub version: i64,
    #[serde(rename = "_lastChangedAt", default)]
    pub last_changed_at: i64,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

/// Append-only financial event. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTransactionRecord {
    pub id: String,
    #[serde(rename = "__typename", default = "typename_transaction")]
    pub typename: String,
    pub player_id: String,
    pub game_id: String,
    pub entity_id: String,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub rake: f64,
    #[serde(with = "iso_ms")]
    pub transaction_date: DateTime<Utc>,
    #[serde(rename = "_version", default)]
    pub version: i64,
    #[serde(rename = "_lastChangedAt", default)]
    pub last_changed_at: i64,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

/// Registration/seat status of one player in one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntryRecord {
    /// `gameId#playerId`.
    pub id: String,
    #[serde(rename = "__typename", default = "typename_entry")]
    pub typename: String,
    pub game_id: String,
    pub player_id: String,
    pub entity_id: String,
    pub status: EntryStatus,
    #[serde(with = "iso_ms")]
    pub registration_date_time: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub game_start_date_time: DateTime<Utc>,
    #[serde(rename = "_version", default)]
    pub version: i64,
    #[serde(rename = "_lastChangedAt", default)]
    pub last_changed_at: i64,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

pub const TYPENAME_PLAYER: &str = "Player";
pub const TYPENAME_RESULT: &str = "PlayerResult";
pub const TYPENAME_SUMMARY: &str = "PlayerSummary";
pub const TYPENAME_VENUE: &str = "PlayerVenue";
pub const TYPENAME_TRANSACTION: &str = "PlayerTransaction";
pub const TYPENAME_ENTRY: &str = "PlayerEntry";

fn typename_player() -> String {
    TYPENAME_PLAYER.into()
}
fn typename_result() -> String {
    TYPENAME_RESULT.into()
}
fn typename_summary() -> String {
    TYPENAME_SUMMARY.into()
}
fn typename_venue() -> String {
    TYPENAME_VENUE.into()
}
fn typename_transaction() -> String {
    TYPENAME_TRANSACTION.into()
}
fn typename_entry() -> String {
    TYPENAME_ENTRY.into()
}
