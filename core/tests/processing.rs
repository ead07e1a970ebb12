//! End-to-end message processing against the in-memory store: first
//! observations, redelivery, venue handling, tenancy.

use chrono::{TimeZone, Utc};
use railbird_core::config::ProcessorConfig;
use railbird_core::driver::{InvocationSummary, MessageDriver};
use railbird_core::identity::{activity_bucket, player_id_of};
use railbird_core::naming::{RecordGroup, TableNamer};
use railbird_core::records::{
    from_doc, EntryStatus, PlayerEntryRecord, PlayerRecord, PlayerResultRecord,
    PlayerSummaryRecord, PlayerTransactionRecord, PlayerVenueRecord, VenueAssignmentStatus,
};
use railbird_core::store::Gateway;
use railbird_core::types::{entry_key, result_key, UNASSIGNED_VENUE_ID};
use railbird_core::{ProcResult, ProcessorError};
use serde::de::DeserializeOwned;
use serde_json::json;

fn setup() -> (Gateway, ProcessorConfig) {
    let config = ProcessorConfig::new("testapi", "test", None);
    let gateway = Gateway::in_memory(TableNamer::new(&config)).unwrap();
    (gateway, config)
}

fn run(
    gateway: &Gateway,
    config: &ProcessorConfig,
    bodies: &[serde_json::Value],
) -> ProcResult<InvocationSummary> {
    let driver = MessageDriver::new(gateway, config);
    let strings: Vec<String> = bodies.iter().map(|b| b.to_string()).collect();
    driver.process_batch(&strings)
}

fn get_record<T: DeserializeOwned>(gateway: &Gateway, group: RecordGroup, key: &str) -> Option<T> {
    let got = gateway
        .batch_get(group, &[key.to_string()], "id")
        .unwrap();
    got.get(key).cloned().map(|doc| from_doc(doc).unwrap())
}

fn alice_first_game() -> serde_json::Value {
    json!({
        "game": {
            "id": "g1", "venueId": "V-1", "entityId": "T-1",
            "gameStartDateTime": "2025-01-15T19:00:00.000Z",
            "buyIn": 50, "rake": 10, "totalUniquePlayers": 20
        },
        "players": {"allPlayers": [
            {"name": "Alice Example", "rank": 3, "points": 100, "winnings": 300}
        ]}
    })
}

fn alice_second_game() -> serde_json::Value {
    json!({
        "game": {
            "id": "g2", "venueId": "V-2", "entityId": "T-1",
            "gameStartDateTime": "2025-02-01T19:00:00.000Z",
            "buyIn": 50, "rake": 10, "totalUniquePlayers": 30
        },
        "players": {"allPlayers": [
            {"name": "alice example", "rank": 1, "points": 150,
             "winnings": 0, "isQualification": true}
        ]}
    })
}

/// An empty roster writes nothing and reports 204.
#[test]
fn empty_roster_is_a_no_op() {
    let (gateway, config) = setup();
    let body = json!({"game": {"id": "g1", "venueId": null, "entityId": "T-1"},
                      "players": {"allPlayers": []}});
    let summary = run(&gateway, &config, &[body]).unwrap();
    assert_eq!(summary.status_code, 204);
    assert_eq!(summary.total_processed, 0);
    assert_eq!(summary.tenant_id.as_deref(), Some("T-1"));
}

/// An invocation with no messages at all also reports 204.
#[test]
fn empty_invocation_is_a_no_op() {
    let (gateway, config) = setup();
    let summary = run(&gateway, &config, &[]).unwrap();
    assert_eq!(summary.status_code, 204);
}

/// First observation of a player at an assigned venue materialises all
/// six records with the expected values.
#[test]
fn first_observation_writes_all_records() {
    let (gateway, config) = setup();
    let summary = run(&gateway, &config, &[alice_first_game()]).unwrap();
    assert_eq!(summary.status_code, 200);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 0);

    let pid = player_id_of("Alice Example").unwrap();
    let game_date = Utc.with_ymd_and_hms(2025, 1, 15, 19, 0, 0).unwrap();

    let player: PlayerRecord = get_record(&gateway, RecordGroup::Player, &pid).unwrap();
    assert_eq!(player.registration_date, game_date);
    assert_eq!(player.first_game_played, game_date);
    assert_eq!(player.last_played_date, game_date);
    assert_eq!(player.points_balance, 100.0);
    assert_eq!(player.registration_venue_id.as_deref(), Some("V-1"));
    assert_eq!(
        player.venue_assignment_status,
        VenueAssignmentStatus::AutoAssigned
    );
    assert_eq!(player.first_name, "Alice");
    assert_eq!(player.last_name, "Example");
    assert_eq!(player.version, 1);
    let expected_bucket = activity_bucket(Some(game_date), Some(game_date), Utc::now());
    assert_eq!(player.targeting_classification, expected_bucket.as_str());

    let result: PlayerResultRecord =
        get_record(&gateway, RecordGroup::PlayerResult, &result_key(&pid, "g1")).unwrap();
    assert_eq!(result.amount_won, 300.0);
    assert!(result.prize_won);
    assert_eq!(result.finishing_place, Some(3));
    assert_eq!(result.total_runners, 20);
    assert_eq!(result.game_start_date_time, game_date);

    let venue_doc = gateway
        .query_by_index(RecordGroup::PlayerVenue, "visitKey", &format!("{pid}#T-1#V-1"))
        .unwrap()
        .expect("venue record should exist");
    let venue: PlayerVenueRecord = from_doc(venue_doc).unwrap();
    assert_eq!(venue.total_games_played, 1);
    assert_eq!(venue.average_buy_in, 50.0);
    assert_eq!(venue.first_played_date, game_date);
    assert_eq!(venue.last_played_date, game_date);

    let summary_rec: PlayerSummaryRecord =
        get_record(&gateway, RecordGroup::PlayerSummary, &pid).unwrap();
    assert_eq!(summary_rec.tournaments_played, 1);
    assert_eq!(summary_rec.tournament_itm, 1);
    assert_eq!(summary_rec.tournaments_cashed, 1);
    assert_eq!(summary_rec.venues_visited, 1);
    assert_eq!(summary_rec.net_balance, 250.0);
    assert_eq!(summary_rec.total_buy_ins, 50.0);
    assert_eq!(summary_rec.total_winnings, 300.0);
    assert_eq!(summary_rec.last_played, game_date);

    let buy_in_doc = gateway
        .query_by_index(RecordGroup::PlayerTransaction, "transactionType", "BUY_IN")
        .unwrap()
        .expect("buy-in transaction should exist");
    let buy_in: PlayerTransactionRecord = from_doc(buy_in_doc).unwrap();
    assert_eq!(buy_in.amount, 50.0);
    assert_eq!(buy_in.rake, 10.0);
    assert_eq!(buy_in.transaction_date, game_date);
    // No qualification was flagged, so no such transaction exists.
    assert!(gateway
        .query_by_index(RecordGroup::PlayerTransaction, "transactionType", "QUALIFICATION")
        .unwrap()
        .is_none());

    let entry: PlayerEntryRecord =
        get_record(&gateway, RecordGroup::PlayerEntry, &entry_key("g1", &pid)).unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);
}

/// Redelivering the same message is a fast-path skip: the derived state
/// is unchanged.
#[test]
fn redelivery_is_idempotent() {
    let (gateway, config) = setup();
    run(&gateway, &config, &[alice_first_game()]).unwrap();

    let pid = player_id_of("Alice Example").unwrap();
    let player_before = gateway
        .batch_get(RecordGroup::Player, &[pid.clone()], "id")
        .unwrap();
    let summary_before = gateway
        .batch_get(RecordGroup::PlayerSummary, &[pid.clone()], "id")
        .unwrap();

    let replay = run(&gateway, &config, &[alice_first_game()]).unwrap();
    assert_eq!(replay.successful, 1, "skip counts as success");
    assert_eq!(replay.failed, 0);

    let player_after = gateway
        .batch_get(RecordGroup::Player, &[pid.clone()], "id")
        .unwrap();
    let summary_after = gateway
        .batch_get(RecordGroup::PlayerSummary, &[pid], "id")
        .unwrap();
    assert_eq!(player_before, player_after);
    assert_eq!(summary_before, summary_after);
}

/// The same player listed twice in one roster (same id after
/// normalisation) runs exactly one task: the points delta is applied
/// once and the message succeeds on first delivery.
#[test]
fn duplicate_roster_entries_are_processed_once() {
    let (gateway, config) = setup();
    run(&gateway, &config, &[alice_first_game()]).unwrap();

    let body = json!({
        "game": {
            "id": "g8", "venueId": "V-1", "entityId": "T-1",
            "gameStartDateTime": "2025-02-20T19:00:00.000Z", "buyIn": 50
        },
        "players": {"allPlayers": [
            {"name": "Alice Example", "rank": 2, "points": 100},
            {"name": "  alice example  ", "rank": 2, "points": 100}
        ]}
    });
    let summary = run(&gateway, &config, &[body]).unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.successful, 2, "the duplicate counts as handled");

    let pid = player_id_of("Alice Example").unwrap();
    let player: PlayerRecord = get_record(&gateway, RecordGroup::Player, &pid).unwrap();
    assert_eq!(player.points_balance, 200.0, "duplicate entry credited once");

    let summary_rec: PlayerSummaryRecord =
        get_record(&gateway, RecordGroup::PlayerSummary, &pid).unwrap();
    assert_eq!(summary_rec.tournaments_played, 2, "one per distinct game");
}

/// A later game at a new venue: counters advance, registration stays,
/// the qualification transaction is appended, and tournamentsPlayed
/// matches the number of distinct results.
#[test]
fn second_game_advances_counters() {
    let (gateway, config) = setup();
    run(&gateway, &config, &[alice_first_game()]).unwrap();
    run(&gateway, &config, &[alice_second_game()]).unwrap();

    // Mixed case resolves to the same player.
    let pid = player_id_of("Alice Example").unwrap();
    assert_eq!(pid, player_id_of("alice example").unwrap());

    let first_date = Utc.with_ymd_and_hms(2025, 1, 15, 19, 0, 0).unwrap();
    let second_date = Utc.with_ymd_and_hms(2025, 2, 1, 19, 0, 0).unwrap();

    let player: PlayerRecord = get_record(&gateway, RecordGroup::Player, &pid).unwrap();
    assert_eq!(player.points_balance, 250.0);
    assert_eq!(player.registration_date, first_date, "registration never moves later");
    assert_eq!(player.last_played_date, second_date);
    assert_eq!(player.version, 2);

    let result: PlayerResultRecord =
        get_record(&gateway, RecordGroup::PlayerResult, &result_key(&pid, "g2")).unwrap();
    assert!(result.prize_won, "qualification counts as in the money");
    assert_eq!(result.amount_won, 0.0);
    assert!(result.is_multi_day_qualification);

    let results = gateway
        .batch_get(
            RecordGroup::PlayerResult,
            &[result_key(&pid, "g1"), result_key(&pid, "g2")],
            "id",
        )
        .unwrap();
    assert_eq!(results.len(), 2);

    let summary: PlayerSummaryRecord =
        get_record(&gateway, RecordGroup::PlayerSummary, &pid).unwrap();
    assert_eq!(summary.tournaments_played, 2);
    assert_eq!(summary.tournaments_played as usize, results.len());
    assert_eq!(summary.tournament_itm, 2);
    assert_eq!(summary.tournaments_cashed, 1);
    assert_eq!(summary.venues_visited, 2);
    assert_eq!(summary.total_buy_ins, 100.0);
    assert_eq!(summary.total_winnings, 300.0);
    assert_eq!(summary.net_balance, 200.0);
    assert_eq!(summary.last_played, second_date);
    assert_eq!(summary.version, 2);

    // A distinct venue record per venue; the first is untouched.
    let v1_doc = gateway
        .query_by_index(RecordGroup::PlayerVenue, "visitKey", &format!("{pid}#T-1#V-1"))
        .unwrap()
        .unwrap();
    let v1: PlayerVenueRecord = from_doc(v1_doc).unwrap();
    assert_eq!(v1.total_games_played, 1);
    let v2_doc = gateway
        .query_by_index(RecordGroup::PlayerVenue, "visitKey", &format!("{pid}#T-1#V-2"))
        .unwrap()
        .unwrap();
    let v2: PlayerVenueRecord = from_doc(v2_doc).unwrap();
    assert_eq!(v2.total_games_played, 1);
    assert_eq!(v2.average_buy_in, 50.0);

    let qual_doc = gateway
        .query_by_index(RecordGroup::PlayerTransaction, "transactionType", "QUALIFICATION")
        .unwrap()
        .expect("qualification transaction should exist");
    let qual: PlayerTransactionRecord = from_doc(qual_doc).unwrap();
    assert_eq!(qual.amount, 0.0);
    assert_eq!(qual.game_id, "g2");
}

/// A repeat visit to a known venue moves the running average and the
/// play-date window instead of creating a second record.
#[test]
fn repeat_venue_visit_updates_in_place() {
    let (gateway, config) = setup();
    run(&gateway, &config, &[alice_first_game()]).unwrap();

    let body = json!({
        "game": {
            "id": "g9", "venueId": "V-1", "entityId": "T-1",
            "gameStartDateTime": "2025-03-10T19:00:00.000Z",
            "buyIn": 150, "rake": 10
        },
        "players": {"allPlayers": [{"name": "Alice Example"}]}
    });
    run(&gateway, &config, &[body]).unwrap();

    let pid = player_id_of("Alice Example").unwrap();
    let doc = gateway
        .query_by_index(RecordGroup::PlayerVenue, "visitKey", &format!("{pid}#T-1#V-1"))
        .unwrap()
        .unwrap();
    let venue: PlayerVenueRecord = from_doc(doc).unwrap();
    assert_eq!(venue.total_games_played, 2);
    assert_eq!(venue.average_buy_in, 100.0, "(50 + 150) / 2");
    assert_eq!(
        venue.first_played_date,
        Utc.with_ymd_and_hms(2025, 1, 15, 19, 0, 0).unwrap()
    );
    assert_eq!(
        venue.last_played_date,
        Utc.with_ymd_and_hms(2025, 3, 10, 19, 0, 0).unwrap()
    );
    assert_eq!(venue.version, 2);

    // One venue, visited twice: venuesVisited stays at 1.
    let summary: PlayerSummaryRecord =
        get_record(&gateway, RecordGroup::PlayerSummary, &pid).unwrap();
    assert_eq!(summary.venues_visited, 1);
}

/// The unassigned-venue sentinel suppresses the venue record and the
/// venuesVisited increment; everything else is written.
#[test]
fn sentinel_venue_skips_venue_records() {
    let (gateway, config) = setup();
    let body = json!({
        "game": {
            "id": "g3", "venueId": UNASSIGNED_VENUE_ID, "entityId": "T-1",
            "gameStartDateTime": "2025-03-01T20:00:00.000Z", "buyIn": 20
        },
        "players": {"allPlayers": [{"name": "Bob"}]}
    });
    run(&gateway, &config, &[body]).unwrap();

    let pid = player_id_of("Bob").unwrap();
    let player: PlayerRecord = get_record(&gateway, RecordGroup::Player, &pid).unwrap();
    assert_eq!(player.registration_venue_id, None);
    assert_eq!(
        player.venue_assignment_status,
        VenueAssignmentStatus::PendingAssignment
    );

    assert!(get_record::<PlayerResultRecord>(
        &gateway,
        RecordGroup::PlayerResult,
        &result_key(&pid, "g3")
    )
    .is_some());
    assert!(get_record::<PlayerEntryRecord>(
        &gateway,
        RecordGroup::PlayerEntry,
        &entry_key("g3", &pid)
    )
    .is_some());

    let summary: PlayerSummaryRecord =
        get_record(&gateway, RecordGroup::PlayerSummary, &pid).unwrap();
    assert_eq!(summary.venues_visited, 0);
    assert_eq!(summary.total_buy_ins, 20.0);

    let visit = gateway
        .query_by_index(
            RecordGroup::PlayerVenue,
            "visitKey",
            &format!("{pid}#T-1#{UNASSIGNED_VENUE_ID}"),
        )
        .unwrap();
    assert!(visit.is_none(), "no PlayerVenue for the sentinel");
}

/// A date-only game start is promoted to midnight UTC.
#[test]
fn date_only_start_promoted_to_midnight() {
    let (gateway, config) = setup();
    let body = json!({
        "game": {"id": "g4", "entityId": "T-1", "gameStartDateTime": "2025-04-02", "buyIn": 5},
        "players": {"allPlayers": [{"name": "Carol"}]}
    });
    run(&gateway, &config, &[body]).unwrap();

    let pid = player_id_of("Carol").unwrap();
    let result: PlayerResultRecord =
        get_record(&gateway, RecordGroup::PlayerResult, &result_key(&pid, "g4")).unwrap();
    assert_eq!(
        result.game_start_date_time,
        Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap()
    );
}

/// Every record written from one message carries the same tenant.
#[test]
fn tenant_is_consistent_across_records() {
    let (gateway, config) = setup();
    run(&gateway, &config, &[alice_first_game()]).unwrap();

    let pid = player_id_of("Alice Example").unwrap();
    let player: PlayerRecord = get_record(&gateway, RecordGroup::Player, &pid).unwrap();
    let result: PlayerResultRecord =
        get_record(&gateway, RecordGroup::PlayerResult, &result_key(&pid, "g1")).unwrap();
    let summary: PlayerSummaryRecord =
        get_record(&gateway, RecordGroup::PlayerSummary, &pid).unwrap();
    let entry: PlayerEntryRecord =
        get_record(&gateway, RecordGroup::PlayerEntry, &entry_key("g1", &pid)).unwrap();
    let venue_doc = gateway
        .query_by_index(RecordGroup::PlayerVenue, "visitKey", &format!("{pid}#T-1#V-1"))
        .unwrap()
        .unwrap();
    let venue: PlayerVenueRecord = from_doc(venue_doc).unwrap();

    assert_eq!(player.primary_entity_id, "T-1");
    assert_eq!(result.entity_id, "T-1");
    assert_eq!(summary.entity_id, "T-1");
    assert_eq!(entry.entity_id, "T-1");
    assert_eq!(venue.entity_id.as_deref(), Some("T-1"));
}

/// The process default fills in when the message has no tenant; with
/// neither, the message fails and the invocation is redelivered.
#[test]
fn tenant_resolution_falls_back_to_default() {
    let config = ProcessorConfig::new("testapi", "test", Some("T-default".into()));
    let gateway = Gateway::in_memory(TableNamer::new(&config)).unwrap();
    let body = json!({
        "game": {"id": "g5", "gameStartDateTime": "2025-05-01T12:00:00.000Z"},
        "players": {"allPlayers": [{"name": "Dave"}]}
    });
    let summary = run(&gateway, &config, &[body.clone()]).unwrap();
    assert_eq!(summary.tenant_id.as_deref(), Some("T-default"));

    let bare_config = ProcessorConfig::new("testapi", "test", None);
    let bare_gateway = Gateway::in_memory(TableNamer::new(&bare_config)).unwrap();
    let err = run(&bare_gateway, &bare_config, &[body]).unwrap_err();
    assert!(matches!(
        err,
        ProcessorError::BatchFailed {
            failed_messages: 1,
            ..
        }
    ));
}

/// A malformed body fails that message only, and the invocation
/// signals failure for redelivery. A healthy sibling message in the
/// same batch still commits, and the error keeps message failures
/// separate from per-player counts.
#[test]
fn malformed_message_fails_invocation() {
    let (gateway, config) = setup();
    let driver = MessageDriver::new(&gateway, &config);
    let err = driver
        .process_batch(&["not json".to_string(), alice_first_game().to_string()])
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessorError::BatchFailed {
            failed: 0,
            total: 1,
            failed_messages: 1,
        }
    ));

    // The well-formed message's player committed despite the batch error.
    let pid = player_id_of("Alice Example").unwrap();
    assert!(get_record::<PlayerRecord>(&gateway, RecordGroup::Player, &pid).is_some());
}

/// A player with an empty name fails; the other players of the message
/// still commit, and the invocation reports the partial failure.
#[test]
fn empty_name_fails_only_that_player() {
    let (gateway, config) = setup();
    let body = json!({
        "game": {"id": "g6", "entityId": "T-1", "gameStartDateTime": "2025-06-01T10:00:00.000Z"},
        "players": {"allPlayers": [{"name": "  "}, {"name": "Erin"}]}
    });
    let err = run(&gateway, &config, &[body]).unwrap_err();
    assert!(matches!(err, ProcessorError::BatchFailed { failed: 1, .. }));

    let pid = player_id_of("Erin").unwrap();
    assert!(get_record::<PlayerResultRecord>(
        &gateway,
        RecordGroup::PlayerResult,
        &result_key(&pid, "g6")
    )
    .is_some());
}

/// Transactions are append-only: across two games the ledger holds
/// exactly the buy-ins and the one qualification, nothing mutated.
#[test]
fn transaction_ledger_is_append_only() {
    let path = std::env::temp_dir().join(format!("railbird-test-{}.db", uuid::Uuid::new_v4()));
    let path = path.to_str().unwrap().to_string();
    let config = ProcessorConfig::new("testapi", "test", None);
    {
        let gateway = Gateway::open(&path, TableNamer::new(&config)).unwrap();
        run(&gateway, &config, &[alice_first_game()]).unwrap();
        run(&gateway, &config, &[alice_second_game()]).unwrap();
        // Replay must not append anything.
        run(&gateway, &config, &[alice_second_game()]).unwrap();
        gateway.shutdown().unwrap();
    }

    let conn = rusqlite::Connection::open(&path).unwrap();
    let count = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap() };
    assert_eq!(
        count("SELECT COUNT(*) FROM \"PlayerTransaction-testapi-test\""),
        3,
        "two buy-ins and one qualification"
    );
    assert_eq!(
        count(
            "SELECT COUNT(*) FROM \"PlayerTransaction-testapi-test\" \
             WHERE json_extract(doc, '$.transactionType') = 'BUY_IN'"
        ),
        2
    );
    assert_eq!(count("SELECT COUNT(*) FROM \"PlayerResult-testapi-test\""), 2);
    assert_eq!(count("SELECT COUNT(*) FROM \"Player-testapi-test\""), 1);
    drop(conn);
    let _ = std::fs::remove_file(&path);
}
