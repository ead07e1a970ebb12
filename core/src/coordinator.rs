//! Bounded fan-out across the players of one message.
//!
//! A fixed pool of workers pulls the next player from a shared cursor,
//! so a new task starts the moment an in-flight one completes — this is
//! not a sliced-batch-then-join loop. The record store is the only
//! shared resource; tasks never touch each other's state.

use crate::commit::{process_player, GameContext, PlayerOutcome};
use crate::message::PlayerData;
use crate::prefetch::Snapshot;
use crate::store::Gateway;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// Hard cap on in-flight per-player tasks.
pub const MAX_IN_FLIGHT: usize = 5;

/// Run every player task and collect the outcomes. On cancellation no
/// new tasks start; in-flight ones finish (store writes are
/// point-in-time atomic) and no rollback is attempted.
pub fn run_players(
    gateway: &Gateway,
    ctx: &GameContext<'_>,
    players: &[&PlayerData],
    snapshot: &Snapshot,
    cancelled: &AtomicBool,
) -> Vec<PlayerOutcome> {
    if players.is_empty() {
        return Vec::new();
    }
    let cursor = AtomicUsize::new(0);
    let outcomes = Mutex::new(Vec::with_capacity(players.len()));
    thread::scope(|s| {
        for _ in 0..MAX_IN_FLIGHT.min(players.len()) {
            s.spawn(|| loop {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(player) = players.get(i) else { break };
                let outcome = process_player(gateway, ctx, player, snapshot);
                // A poisoned collector still holds the outcomes pushed
                // so far; recover them rather than panicking.
                outcomes
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(outcome);
            });
        }
    });
    outcomes.into_inner().unwrap_or_else(|p| p.into_inner())
}
