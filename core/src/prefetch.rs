//! Pre-fetch planner: one read snapshot per message.
//!
//! Replaces per-player lookups with four batched gets (Player,
//! PlayerResult, PlayerSummary, PlayerEntry) plus a bounded scatter of
//! index queries for PlayerVenue, whose lookup key is a secondary-index
//! value. A failed lookup degrades to "absent" — the per-player step
//! relies on conditional puts for safety, never on snapshot completeness.

use crate::identity::{player_id_of, visit_key};
use crate::message::GameMessage;
use crate::naming::RecordGroup;
use crate::records::{
    from_doc, PlayerEntryRecord, PlayerRecord, PlayerResultRecord, PlayerSummaryRecord,
    PlayerVenueRecord,
};
use crate::store::Gateway;
use crate::types::{entry_key, result_key, PlayerId};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// In-flight cap for the PlayerVenue index scatter.
pub const VENUE_SCATTER_CAP: usize = 10;

/// Pre-fetched state for one message, keyed for O(1) lookup.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// By player id.
    pub players: HashMap<PlayerId, PlayerRecord>,
    /// By `playerId#gameId`.
    pub results: HashMap<String, PlayerResultRecord>,
    /// By player id.
    pub summaries: HashMap<PlayerId, PlayerSummaryRecord>,
    /// By `gameId#playerId`.
    pub entries: HashMap<String, PlayerEntryRecord>,
    /// By player id; empty when the game venue is the sentinel.
    pub venues: HashMap<PlayerId, PlayerVenueRecord>,
}

/// Fetch the full snapshot for `message`. The four batch-gets and the
/// venue scatter run concurrently; they are independent reads.
pub fn fetch_snapshot(gateway: &Gateway, message: &GameMessage, tenant_id: &str) -> Snapshot {
    let player_ids = distinct_player_ids(message);
    let result_keys: Vec<String> = player_ids
        .iter()
        .map(|pid| result_key(pid, &message.game.id))
        .collect();
    let entry_keys: Vec<String> = player_ids
        .iter()
        .map(|pid| entry_key(&message.game.id, pid))
        .collect();
    let venue_id = message.game.assignable_venue();

    let mut snapshot = Snapshot::default();
    thread::scope(|s| {
        let players = s.spawn(|| typed_batch(gateway, RecordGroup::Player, &player_ids));
        let results = s.spawn(|| typed_batch(gateway, RecordGroup::PlayerResult, &result_keys));
        let summaries = s.spawn(|| typed_batch(gateway, RecordGroup::PlayerSummary, &player_ids));
        let entries = s.spawn(|| typed_batch(gateway, RecordGroup::PlayerEntry, &entry_keys));
        let venues = s.spawn(|| match venue_id {
            Some(v) => scatter_venues(gateway, &player_ids, tenant_id, v),
            None => HashMap::new(),
        });
        snapshot.players = join_lookup(players, "Player");
        snapshot.results = join_lookup(results, "PlayerResult");
        snapshot.summaries = join_lookup(summaries, "PlayerSummary");
        snapshot.entries = join_lookup(entries, "PlayerEntry");
        snapshot.venues = join_lookup(venues, "PlayerVenue");
    });
    snapshot
}

/// Distinct player ids in roster order. Players whose id cannot be
/// derived (empty name) are left out here; the per-player step reports
/// them as failures.
fn distinct_player_ids(message: &GameMessage) -> Vec<PlayerId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(message.players.all_players.len());
    for player in &message.players.all_players {
        if let Ok(pid) = player_id_of(&player.name) {
            if seen.insert(pid.clone()) {
                ids.push(pid);
            }
        }
    }
    ids
}

fn typed_batch<T: DeserializeOwned>(
    gateway: &Gateway,
    group: RecordGroup,
    keys: &[String],
) -> HashMap<String, T> {
    if keys.is_empty() {
        return HashMap::new();
    }
    let docs = match gateway.batch_get(group, keys, group.key_attr()) {
        Ok(docs) => docs,
        Err(e) => {
            log::warn!(
                "prefetch {}: lookup failed, treating all keys as absent: {e}",
                group.logical_name()
            );
            return HashMap::new();
        }
    };
    docs.into_iter()
        .filter_map(|(key, doc)| match from_doc::<T>(doc) {
            Ok(record) => Some((key, record)),
            Err(e) => {
                log::warn!("prefetch {}: undecodable record {key}: {e}", group.logical_name());
                None
            }
        })
        .collect()
}

/// Bounded fan-out of single index queries: at most
/// [`VENUE_SCATTER_CAP`] in flight, next query dispatched as soon as a
/// worker frees up.
fn scatter_venues(
    gateway: &Gateway,
    player_ids: &[PlayerId],
    tenant_id: &str,
    venue_id: &str,
) -> HashMap<PlayerId, PlayerVenueRecord> {
    let cursor = AtomicUsize::new(0);
    let found = Mutex::new(HashMap::new());
    thread::scope(|s| {
        for _ in 0..VENUE_SCATTER_CAP.min(player_ids.len()) {
            s.spawn(|| loop {
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(pid) = player_ids.get(i) else { break };
                let key = visit_key(pid, tenant_id, venue_id);
                match gateway.query_by_index(RecordGroup::PlayerVenue, "visitKey", &key) {
                    Ok(Some(doc)) => match from_doc::<PlayerVenueRecord>(doc) {
                        Ok(record) => {
                            if let Ok(mut map) = found.lock() {
                                map.insert(pid.clone(), record);
                            }
                        }
                        Err(e) => log::warn!("prefetch PlayerVenue: undecodable record for {key}: {e}"),
                    },
                    Ok(None) => {}
                    Err(e) => log::warn!("prefetch PlayerVenue: query failed for {key}: {e}"),
                }
            });
        }
    });
    found.into_inner().unwrap_or_default()
}

fn join_lookup<T>(
    handle: thread::ScopedJoinHandle<'_, HashMap<String, T>>,
    group: &str,
) -> HashMap<String, T> {
    handle.join().unwrap_or_else(|_| {
        log::error!("prefetch {group}: lookup task panicked, treating all keys as absent");
        HashMap::new()
    })
}
