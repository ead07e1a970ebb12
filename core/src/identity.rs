//! Identity derivation and activity classification.
//!
//! Pure functions only — no I/O, no shared state. The player id is
//! deterministic from the name so that the same player observed in any
//! game, by any processor, lands on the same records.

use crate::error::{ProcResult, ProcessorError};
use crate::types::{PlayerId, KEY_SEP};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Stable player id: lower-case, trim, SHA-256, hex, first 32 chars.
pub fn player_id_of(name: &str) -> ProcResult<PlayerId> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ProcessorError::Input("player name is empty".into()));
    }
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

/// Secondary-index key of a PlayerVenue: `playerId#tenantId#venueId`.
pub fn visit_key(player_id: &str, tenant_id: &str, venue_id: &str) -> String {
    format!("{player_id}{KEY_SEP}{tenant_id}{KEY_SEP}{venue_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameParts {
    pub first: String,
    pub last: String,
    pub given: String,
}

/// Split a display name into first/last/given parts.
///
/// A comma means "Last, First" form; otherwise the first whitespace
/// token is the first name and the remainder the last name.
pub fn split_name(name: &str) -> NameParts {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return NameParts {
            first: "Unknown".into(),
            last: String::new(),
            given: "Unknown".into(),
        };
    }
    if let Some((last, first)) = trimmed.split_once(',') {
        let first = first.trim().to_string();
        return NameParts {
            given: first.clone(),
            first,
            last: last.trim().to_string(),
        };
    }
    let mut tokens = trimmed.split_whitespace();
    let first = tokens.next().unwrap_or_default().to_string();
    let last = tokens.collect::<Vec<_>>().join(" ");
    NameParts {
        given: first.clone(),
        first,
        last,
    }
}

/// Calendar-day difference between two instants, rounded down,
/// always non-negative.
pub fn days_between(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    if b >= a {
        (b - a).num_days()
    } else {
        (a - b).num_days()
    }
}

/// Targeting bucket for a player or venue membership. The labels are the
/// literal strings stored in `targetingClassification` and are consumed
/// by downstream campaign tooling — never reword them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityBucket {
    NotActivatedEl,
    NotActivated31To60,
    NotActivated61To90,
    NotActivated91To120,
    NotActivated121To180,
    NotActivated181To360,
    NotActivated361Plus,
    ActiveEl,
    RetainInactive31To60,
    RetainInactive61To90,
    Churned91To120,
    Churned121To180,
    Churned181To360,
    Churned361,
}

impl ActivityBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityBucket::NotActivatedEl => "NotActivated_EL",
            ActivityBucket::NotActivated31To60 => "NotActivated_31_60d",
            ActivityBucket::NotActivated61To90 => "NotActivated_61_90d",
            ActivityBucket::NotActivated91To120 => "NotActivated_91_120d",
            ActivityBucket::NotActivated121To180 => "NotActivated_121_180d",
            ActivityBucket::NotActivated181To360 => "NotActivated_181_360d",
            ActivityBucket::NotActivated361Plus => "Not Activated - 361d+",
            ActivityBucket::ActiveEl => "Active_EL",
            ActivityBucket::RetainInactive31To60 => "Retain_Inactive31_60d",
            ActivityBucket::RetainInactive61To90 => "Retain_Inactive61_90d",
            ActivityBucket::Churned91To120 => "Churned_91_120d",
            ActivityBucket::Churned121To180 => "Churned_121_180d",
            ActivityBucket::Churned181To360 => "Churned_181_360d",
            ActivityBucket::Churned361 => "Churned_361d",
        }
    }
}

/// Classify a player by recency of activity.
///
/// No last activity: bucket by days since membership creation (the
/// "not activated" family). Otherwise bucket by days since the last
/// activity. Thresholds: 30 / 60 / 90 / 120 / 180 / 360 days.
pub fn activity_bucket(
    last_activity: Option<DateTime<Utc>>,
    membership_created: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ActivityBucket {
    match last_activity {
        None => {
            let created = match membership_created {
                Some(c) => c,
                None => return ActivityBucket::NotActivatedEl,
            };
            match days_between(created, now) {
                d if d <= 30 => ActivityBucket::NotActivatedEl,
                d if d <= 60 => ActivityBucket::NotActivated31To60,
                d if d <= 90 => ActivityBucket::NotActivated61To90,
                d if d <= 120 => ActivityBucket::NotActivated91To120,
                d if d <= 180 => ActivityBucket::NotActivated121To180,
                d if d <= 360 => ActivityBucket::NotActivated181To360,
                _ => ActivityBucket::NotActivated361Plus,
            }
        }
        Some(last) => match days_between(last, now) {
            d if d <= 30 => ActivityBucket::ActiveEl,
            d if d <= 60 => ActivityBucket::RetainInactive31To60,
            d if d <= 90 => ActivityBucket::RetainInactive61To90,
            d if d <= 120 => ActivityBucket::Churned91To120,
            d if d <= 180 => ActivityBucket::Churned121To180,
            d if d <= 360 => ActivityBucket::Churned181To360,
            _ => ActivityBucket::Churned361,
        },
    }
}
