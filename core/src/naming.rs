//! Logical record groups and their physical store names.

use crate::config::ProcessorConfig;

/// The six record groups the processor writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordGroup {
    Player,
    PlayerResult,
    PlayerSummary,
    PlayerVenue,
    PlayerTransaction,
    PlayerEntry,
}

impl RecordGroup {
    pub const ALL: [RecordGroup; 6] = [
        RecordGroup::Player,
        RecordGroup::PlayerResult,
        RecordGroup::PlayerSummary,
        RecordGroup::PlayerVenue,
        RecordGroup::PlayerTransaction,
        RecordGroup::PlayerEntry,
    ];

    pub fn logical_name(self) -> &'static str {
        match self {
            RecordGroup::Player => "Player",
            RecordGroup::PlayerResult => "PlayerResult",
            RecordGroup::PlayerSummary => "PlayerSummary",
            RecordGroup::PlayerVenue => "PlayerVenue",
            RecordGroup::PlayerTransaction => "PlayerTransaction",
            RecordGroup::PlayerEntry => "PlayerEntry",
        }
    }

    /// Primary-key attribute of records in this group.
    pub fn key_attr(self) -> &'static str {
        "id"
    }
}

/// Resolves logical group names to deployment-specific physical names.
/// A pure function over the configuration struct.
#[derive(Debug, Clone)]
pub struct TableNamer {
    api_id: String,
    environment: String,
}

impl TableNamer {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            api_id: config.api_id.clone(),
            environment: config.environment.clone(),
        }
    }

    pub fn physical_name(&self, group: RecordGroup) -> String {
        format!(
            "{}-{}-{}",
            group.logical_name(),
            self.api_id,
            self.environment
        )
    }
}
