//! Per-player commit planner.
//!
//! Turns (message, snapshot) into writes for one player: an optional
//! Player profile upsert issued first, then one atomic bundle carrying
//! the PlayerResult, the venue and summary movements, the transaction
//! records and the entry. The PlayerResult put-if-absent is the
//! idempotency beacon: its presence in the snapshot short-circuits the
//! whole step, and its conflict aborts the bundle on a lost race.
//!
//! Counter movement is expressed as gateway increments — the store
//! computes every new counter value server-side.

use crate::error::{ProcResult, ProcessorError};
use crate::identity::{activity_bucket, player_id_of, split_name, visit_key};
use crate::message::{GameMessage, PlayerData};
use crate::naming::RecordGroup;
use crate::prefetch::Snapshot;
use crate::records::{
    format_iso_ms, to_doc, EntryStatus, PlayerCategory, PlayerEntryRecord, PlayerRecord,
    PlayerResultRecord, PlayerStatus, PlayerSummaryRecord, PlayerTransactionRecord,
    PlayerVenueRecord, TransactionType, VenueAssignmentStatus, TYPENAME_ENTRY, TYPENAME_PLAYER,
    TYPENAME_RESULT, TYPENAME_SUMMARY, TYPENAME_TRANSACTION, TYPENAME_VENUE,
};
use crate::store::{Assign, Gateway, Increment, WriteItem, MAX_TRANSACTION_ITEMS};
use crate::types::{entry_key, result_key, PlayerId};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Per-message processing context shared by all player tasks.
pub struct GameContext<'a> {
    pub message: &'a GameMessage,
    pub tenant_id: &'a str,
    /// Wall-clock instant of this invocation; also the fallback game
    /// date when the message carries none.
    pub now: DateTime<Utc>,
}

impl GameContext<'_> {
    pub fn game_date(&self) -> DateTime<Utc> {
        self.message.game.start_datetime().unwrap_or(self.now)
    }

    fn now_ms(&self) -> i64 {
        self.now.timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// All records committed.
    Committed,
    /// PlayerResult already present — retry fast-path, no I/O.
    Skipped,
    Failed(String),
}

/// Structured result of one per-player task. The task never propagates
/// an error upward; the coordinator collects these.
#[derive(Debug, Clone)]
pub struct PlayerOutcome {
    pub player_id: Option<PlayerId>,
    pub player_name: String,
    pub status: OutcomeStatus,
}

impl PlayerOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, OutcomeStatus::Committed | OutcomeStatus::Skipped)
    }
}

/// Process one player of one message end to end. Catches its own
/// errors and reports a structured outcome.
pub fn process_player(
    gateway: &Gateway,
    ctx: &GameContext<'_>,
    player: &PlayerData,
    snapshot: &Snapshot,
) -> PlayerOutcome {
    let player_id = match player_id_of(&player.name) {
        Ok(pid) => pid,
        Err(e) => {
            return PlayerOutcome {
                player_id: None,
                player_name: player.name.clone(),
                status: OutcomeStatus::Failed(e.to_string()),
            }
        }
    };
    let beacon = result_key(&player_id, &ctx.message.game.id);
    if snapshot.results.contains_key(&beacon) {
        log::debug!("player {player_id}: result {beacon} already present, skipping");
        return PlayerOutcome {
            player_id: Some(player_id),
            player_name: player.name.clone(),
            status: OutcomeStatus::Skipped,
        };
    }
    let status = match commit_player(gateway, ctx, player, &player_id, snapshot) {
        Ok(()) => OutcomeStatus::Committed,
        Err(e) => OutcomeStatus::Failed(e.to_string()),
    };
    PlayerOutcome {
        player_id: Some(player_id),
        player_name: player.name.clone(),
        status,
    }
}

fn commit_player(
    gateway: &Gateway,
    ctx: &GameContext<'_>,
    player: &PlayerData,
    player_id: &str,
    snapshot: &Snapshot,
) -> ProcResult<()> {
    upsert_player(gateway, ctx, player, player_id, snapshot)?;
    let bundle = build_bundle(ctx, player, player_id, snapshot)?;
    if bundle.len() > MAX_TRANSACTION_ITEMS {
        return Err(ProcessorError::TooManyItems {
            count: bundle.len(),
        });
    }
    gateway.transactional_write(bundle)?;
    log::debug!("player {player_id}: committed game {}", ctx.message.game.id);
    Ok(())
}

// ── 1.a Player profile upsert ────────────────────────────────────────────────

/// Issued before the bundle: the Player record is shared across games
/// and is not part of the per-game atomic unit. A retry is safe — the
/// create path is conditional and the update path is delta-based.
fn upsert_player(
    gateway: &Gateway,
    ctx: &GameContext<'_>,
    player: &PlayerData,
    player_id: &str,
    snapshot: &Snapshot,
) -> ProcResult<()> {
    let game_date = ctx.game_date();
    match snapshot.players.get(player_id) {
        Some(existing) => {
            let mut assigns = vec![
                Assign::new("updatedAt", format_iso_ms(ctx.now)),
                Assign::new("_lastChangedAt", ctx.now_ms()),
                Assign::new("primaryEntityId", ctx.tenant_id),
            ];
            if game_date < existing.registration_date {
                assigns.push(Assign::new("registrationDate", format_iso_ms(game_date)));
                assigns.push(Assign::new("firstGamePlayed", format_iso_ms(game_date)));
                if let Some(venue) = ctx.message.game.assignable_venue() {
                    assigns.push(Assign::new("registrationVenueId", venue));
                }
            }
            if game_date > existing.last_played_date {
                assigns.push(Assign::new("lastPlayedDate", format_iso_ms(game_date)));
                let bucket =
                    activity_bucket(Some(game_date), Some(existing.registration_date), ctx.now);
                assigns.push(Assign::new("targetingClassification", bucket.as_str()));
            }
            let increments = vec![
                Increment::by_int("_version", 1),
                Increment::by_float("pointsBalance", player.points()),
            ];
            gateway.update(RecordGroup::Player, player_id, &assigns, &increments)
        }
        None => {
            let record = new_player(ctx, player, player_id, game_date);
            let doc = to_doc(&record)?;
            match gateway.conditional_put(RecordGroup::Player, &doc, RecordGroup::Player.key_attr())
            {
                Ok(()) => Ok(()),
                // Lost the create race to a concurrent game; the record
                // exists now, which is all this step needs.
                Err(ProcessorError::AlreadyExists { .. }) => {
                    log::warn!("player {player_id}: lost create race, continuing");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    }
}

fn new_player(
    ctx: &GameContext<'_>,
    player: &PlayerData,
    player_id: &str,
    game_date: DateTime<Utc>,
) -> PlayerRecord {
    let parts = split_name(&player.name);
    let venue = ctx.message.game.assignable_venue();
    PlayerRecord {
        id: player_id.to_string(),
        typename: TYPENAME_PLAYER.into(),
        name: player.name.trim().to_string(),
        first_name: parts.first,
        last_name: parts.last,
        status: PlayerStatus::Active,
        category: PlayerCategory::New,
        credit_balance: 0.0,
        points_balance: player.points(),
        registration_date: game_date,
        first_game_played: game_date,
        last_played_date: game_date,
        registration_venue_id: venue.map(str::to_string),
        venue_assignment_status: if venue.is_some() {
            VenueAssignmentStatus::AutoAssigned
        } else {
            VenueAssignmentStatus::PendingAssignment
        },
        targeting_classification: activity_bucket(Some(game_date), Some(game_date), ctx.now)
            .as_str()
            .to_string(),
        primary_entity_id: ctx.tenant_id.to_string(),
        version: 1,
        last_changed_at: ctx.now_ms(),
        created_at: ctx.now,
        updated_at: ctx.now,
    }
}

// ── 1.b Atomic bundle ────────────────────────────────────────────────────────

fn build_bundle(
    ctx: &GameContext<'_>,
    player: &PlayerData,
    player_id: &str,
    snapshot: &Snapshot,
) -> ProcResult<Vec<WriteItem>> {
    let mut bundle = Vec::with_capacity(6);
    bundle.push(result_item(ctx, player, player_id)?);
    if let Some(item) = venue_item(ctx, player_id, snapshot)? {
        bundle.push(item);
    }
    bundle.push(summary_item(ctx, player, player_id, snapshot)?);
    bundle.push(transaction_item(ctx, player_id, TransactionType::BuyIn)?);
    if player.is_qualification() {
        bundle.push(transaction_item(ctx, player_id, TransactionType::Qualification)?);
    }
    bundle.push(entry_item(ctx, player_id, snapshot)?);
    Ok(bundle)
}

/// The idempotency beacon: create-if-absent, so a concurrent commit of
/// the same (player, game) aborts the whole bundle.
fn result_item(
    ctx: &GameContext<'_>,
    player: &PlayerData,
    player_id: &str,
) -> ProcResult<WriteItem> {
    let game = &ctx.message.game;
    let record = PlayerResultRecord {
        id: result_key(player_id, &game.id),
        typename: TYPENAME_RESULT.into(),
        player_id: player_id.to_string(),
        game_id: game.id.clone(),
        venue_id: game.venue_id.clone(),
        entity_id: ctx.tenant_id.to_string(),
        finishing_place: player.rank,
        prize_won: player.in_the_money(),
        amount_won: player.winnings(),
        points_earned: player.points(),
        is_multi_day_qualification: player.is_qualification(),
        total_runners: ctx.message.total_runners(),
        game_start_date_time: ctx.game_date(),
        version: 1,
        last_changed_at: ctx.now_ms(),
        created_at: ctx.now,
        updated_at: ctx.now,
    };
    Ok(WriteItem::PutIfAbsent {
        group: RecordGroup::PlayerResult,
        doc: to_doc(&record)?,
    })
}

/// PlayerVenue movement. `None` when the game venue is the sentinel:
/// no venue record is written and `venuesVisited` stays untouched.
fn venue_item(
    ctx: &GameContext<'_>,
    player_id: &str,
    snapshot: &Snapshot,
) -> ProcResult<Option<WriteItem>> {
    let Some(venue_id) = ctx.message.game.assignable_venue() else {
        return Ok(None);
    };
    let game_date = ctx.game_date();
    let buy_in = ctx.message.game.buy_in();
    let item = match snapshot.venues.get(player_id) {
        Some(existing) => {
            let mut assigns = vec![
                Assign::new("updatedAt", format_iso_ms(ctx.now)),
                Assign::new("_lastChangedAt", ctx.now_ms()),
            ];
            // Running average recomputed from the snapshot's own
            // counters. Safe because no two processors commit the same
            // (player, venue) pair from the same game.
            let prev_games = existing.total_games_played as f64;
            let new_average = (existing.average_buy_in * prev_games + buy_in) / (prev_games + 1.0);
            assigns.push(Assign::new("averageBuyIn", new_average));
            if existing.entity_id.is_none() {
                assigns.push(Assign::new("entityId", ctx.tenant_id));
            }
            if existing.visit_key.is_none() {
                assigns.push(Assign::new(
                    "visitKey",
                    visit_key(player_id, ctx.tenant_id, venue_id),
                ));
            }
            if game_date < existing.first_played_date {
                assigns.push(Assign::new("firstPlayedDate", format_iso_ms(game_date)));
            }
            if game_date > existing.last_played_date {
                assigns.push(Assign::new("lastPlayedDate", format_iso_ms(game_date)));
                let bucket = activity_bucket(
                    Some(game_date),
                    Some(existing.membership_created_date),
                    ctx.now,
                );
                assigns.push(Assign::new("targetingClassification", bucket.as_str()));
            }
            WriteItem::Update {
                group: RecordGroup::PlayerVenue,
                key: existing.id.clone(),
                assigns,
                increments: vec![
                    Increment::by_int("_version", 1),
                    Increment::by_int("totalGamesPlayed", 1),
                ],
            }
        }
        None => {
            let record = PlayerVenueRecord {
                id: Uuid::new_v4().to_string(),
                typename: TYPENAME_VENUE.into(),
                player_id: player_id.to_string(),
                venue_id: venue_id.to_string(),
                entity_id: Some(ctx.tenant_id.to_string()),
                visit_key: Some(visit_key(player_id, ctx.tenant_id, venue_id)),
                total_games_played: 1,
                average_buy_in: buy_in,
                first_played_date: game_date,
                last_played_date: game_date,
                membership_created_date: game_date,
                targeting_classification: activity_bucket(
                    Some(game_date),
                    Some(game_date),
                    ctx.now,
                )
                .as_str()
                .to_string(),
                version: 1,
                last_changed_at: ctx.now_ms(),
                created_at: ctx.now,
                updated_at: ctx.now,
            };
            // Surrogate id, no precondition: two concurrent first
            // visits may race; later updates compose.
            WriteItem::Put {
                group: RecordGroup::PlayerVenue,
                doc: to_doc(&record)?,
            }
        }
    };
    Ok(Some(item))
}

fn summary_item(
    ctx: &GameContext<'_>,
    player: &PlayerData,
    player_id: &str,
    snapshot: &Snapshot,
) -> ProcResult<WriteItem> {
    let game_date = ctx.game_date();
    let winnings = player.winnings();
    let buy_in = ctx.message.game.buy_in();
    let first_venue_visit =
        ctx.message.game.assignable_venue().is_some() && !snapshot.venues.contains_key(player_id);
    match snapshot.summaries.get(player_id) {
        Some(existing) => {
            let mut assigns = vec![
                Assign::new("updatedAt", format_iso_ms(ctx.now)),
                Assign::new("_lastChangedAt", ctx.now_ms()),
                Assign::new("entityId", ctx.tenant_id),
            ];
            if game_date > existing.last_played {
                assigns.push(Assign::new("lastPlayed", format_iso_ms(game_date)));
            }
            let mut increments = vec![
                // if-not-exists + 1: legacy records without _version
                // become versioned on their first movement.
                Increment::by_int("_version", 1),
                Increment::by_int("sessionsPlayed", 1),
                Increment::by_int("tournamentsPlayed", 1),
                Increment::by_float("tournamentWinnings", winnings),
                Increment::by_float("totalWinnings", winnings),
                Increment::by_float("tournamentBuyIns", buy_in),
                Increment::by_float("totalBuyIns", buy_in),
                Increment::by_float("netBalance", winnings - buy_in),
            ];
            if player.in_the_money() {
                increments.push(Increment::by_int("tournamentITM", 1));
            }
            if winnings > 0.0 {
                increments.push(Increment::by_int("tournamentsCashed", 1));
            }
            if first_venue_visit {
                increments.push(Increment::by_int("venuesVisited", 1));
            }
            Ok(WriteItem::Update {
                group: RecordGroup::PlayerSummary,
                key: player_id.to_string(),
                assigns,
                increments,
            })
        }
        None => {
            let record = PlayerSummaryRecord {
                id: player_id.to_string(),
                typename: TYPENAME_SUMMARY.into(),
                entity_id: ctx.tenant_id.to_string(),
                sessions_played: 1,
                tournaments_played: 1,
                tournament_itm: if player.in_the_money() { 1 } else { 0 },
                tournaments_cashed: if winnings > 0.0 { 1 } else { 0 },
                venues_visited: if first_venue_visit { 1 } else { 0 },
                tournament_winnings: winnings,
                total_winnings: winnings,
                tournament_buy_ins: buy_in,
                total_buy_ins: buy_in,
                net_balance: winnings - buy_in,
                last_played: game_date,
                version: 1,
                last_changed_at: ctx.now_ms(),
                created_at: ctx.now,
                updated_at: ctx.now,
            };
            // Create-if-absent so a concurrent first observation aborts
            // instead of overwriting the other game's contribution; the
            // redelivery takes the update path.
            Ok(WriteItem::PutIfAbsent {
                group: RecordGroup::PlayerSummary,
                doc: to_doc(&record)?,
            })
        }
    }
}

fn transaction_item(
    ctx: &GameContext<'_>,
    player_id: &str,
    transaction_type: TransactionType,
) -> ProcResult<WriteItem> {
    let (amount, rake) = match transaction_type {
        TransactionType::BuyIn => (ctx.message.game.buy_in(), ctx.message.game.rake()),
        TransactionType::Qualification => (0.0, 0.0),
        TransactionType::Prize => (0.0, 0.0),
    };
    let record = PlayerTransactionRecord {
        id: Uuid::new_v4().to_string(),
        typename: TYPENAME_TRANSACTION.into(),
        player_id: player_id.to_string(),
        game_id: ctx.message.game.id.clone(),
        entity_id: ctx.tenant_id.to_string(),
        transaction_type,
        amount,
        rake,
        transaction_date: ctx.game_date(),
        version: 1,
        last_changed_at: ctx.now_ms(),
        created_at: ctx.now,
        updated_at: ctx.now,
    };
    Ok(WriteItem::Put {
        group: RecordGroup::PlayerTransaction,
        doc: to_doc(&record)?,
    })
}

/// A game observed with a result is a completed entry: create it
/// completed, or transition an existing registration.
fn entry_item(
    ctx: &GameContext<'_>,
    player_id: &str,
    snapshot: &Snapshot,
) -> ProcResult<WriteItem> {
    let key = entry_key(&ctx.message.game.id, player_id);
    match snapshot.entries.get(&key) {
        Some(_) => Ok(WriteItem::Update {
            group: RecordGroup::PlayerEntry,
            key,
            assigns: vec![
                Assign::new("status", EntryStatus::Completed.as_str()),
                Assign::new("updatedAt", format_iso_ms(ctx.now)),
                Assign::new("_lastChangedAt", ctx.now_ms()),
                Assign::new("entityId", ctx.tenant_id),
            ],
            increments: vec![Increment::by_int("_version", 1)],
        }),
        None => {
            let game_date = ctx.game_date();
            let record = PlayerEntryRecord {
                id: key,
                typename: TYPENAME_ENTRY.into(),
                game_id: ctx.message.game.id.clone(),
                player_id: player_id.to_string(),
                entity_id: ctx.tenant_id.to_string(),
                status: EntryStatus::Completed,
                registration_date_time: game_date,
                game_start_date_time: game_date,
                version: 1,
                last_changed_at: ctx.now_ms(),
                created_at: ctx.now,
                updated_at: ctx.now,
            };
            Ok(WriteItem::Put {
                group: RecordGroup::PlayerEntry,
                doc: to_doc(&record)?,
            })
        }
    }
}
