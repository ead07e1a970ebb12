//! Shared primitive types used across the entire processor.

/// Stable 32-hex identifier derived from a player's normalised name.
pub type PlayerId = String;

/// Identifier of one game (tournament), assigned upstream.
pub type GameId = String;

/// Operator-owned data partition. Every written record carries one.
pub type TenantId = String;

/// Physical location identifier.
pub type VenueId = String;

/// The "unassigned venue" sentinel. Games carrying this venue id never
/// create or mutate PlayerVenue records.
pub const UNASSIGNED_VENUE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Separator used in compound primary keys.
pub const KEY_SEP: &str = "#";

/// Primary key of a PlayerResult: `playerId#gameId`.
pub fn result_key(player_id: &str, game_id: &str) -> String {
    format!("{player_id}{KEY_SEP}{game_id}")
}

/// Primary key of a PlayerEntry: `gameId#playerId`.
pub fn entry_key(game_id: &str, player_id: &str) -> String {
    format!("{game_id}{KEY_SEP}{player_id}")
}
