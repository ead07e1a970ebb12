//! Message driver: one invocation over a batch of delivered messages.
//!
//! Per message: parse, resolve tenant, pre-fetch, fan out, aggregate.
//! Any recorded failure fails the whole invocation so the queue
//! redelivers; the PlayerResult beacon de-duplicates the redelivery.
//! There is no in-process retry.

use crate::commit::{GameContext, OutcomeStatus};
use crate::config::ProcessorConfig;
use crate::coordinator::run_players;
use crate::error::{ProcResult, ProcessorError};
use crate::identity::player_id_of;
use crate::message::GameMessage;
use crate::prefetch::fetch_snapshot;
use crate::store::Gateway;
use crate::types::{result_key, TenantId};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;

/// Result of one all-success invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSummary {
    /// 200, or 204 when no player needed processing.
    pub status_code: u16,
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Tenant resolved for the last message processed.
    pub tenant_id: Option<TenantId>,
}

struct MessageStats {
    processed: usize,
    successful: usize,
    failed: usize,
    tenant_id: TenantId,
}

pub struct MessageDriver<'a> {
    gateway: &'a Gateway,
    config: &'a ProcessorConfig,
}

impl<'a> MessageDriver<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a ProcessorConfig) -> Self {
        Self { gateway, config }
    }

    /// Process every message body delivered in one invocation. Returns
    /// the summary on all-success; raises `BatchFailed` when any player
    /// or message failed, so the queue redelivers.
    pub fn process_batch(&self, bodies: &[String]) -> ProcResult<InvocationSummary> {
        let cancelled = AtomicBool::new(false);
        let now = Utc::now();
        let mut total_processed = 0;
        let mut successful = 0;
        let mut failed = 0;
        let mut failed_messages = 0;
        let mut tenant_id = None;
        for body in bodies {
            match self.process_message(body, now, &cancelled) {
                Ok(stats) => {
                    total_processed += stats.processed;
                    successful += stats.successful;
                    failed += stats.failed;
                    tenant_id = Some(stats.tenant_id);
                }
                Err(e) => {
                    log::warn!("message failed before fan-out: {e}");
                    failed_messages += 1;
                }
            }
        }
        log::info!(
            "invocation done: processed={total_processed} successful={successful} \
             failed={failed} failed_messages={failed_messages}"
        );
        if failed > 0 || failed_messages > 0 {
            return Err(ProcessorError::BatchFailed {
                failed,
                total: total_processed,
                failed_messages,
            });
        }
        Ok(InvocationSummary {
            status_code: if total_processed == 0 { 204 } else { 200 },
            total_processed,
            successful,
            failed,
            tenant_id,
        })
    }

    fn process_message(
        &self,
        body: &str,
        now: DateTime<Utc>,
        cancelled: &AtomicBool,
    ) -> ProcResult<MessageStats> {
        let message = GameMessage::parse(body)?;
        let tenant_id = self
            .config
            .resolve_tenant(message.game.entity_id.as_deref())?;
        let roster = &message.players.all_players;
        if roster.is_empty() {
            log::info!("game {}: empty roster, nothing to process", message.game.id);
            return Ok(MessageStats {
                processed: 0,
                successful: 0,
                failed: 0,
                tenant_id,
            });
        }

        let snapshot = fetch_snapshot(self.gateway, &message, &tenant_id);

        // Exactly one task per derived player id: duplicate roster
        // entries collapse onto the first occurrence, otherwise both
        // tasks would apply the Player profile deltas. Players whose
        // result already landed are skipped without I/O; players whose
        // id cannot be derived fail inside their task.
        let mut to_process = Vec::with_capacity(roster.len());
        let mut seen = HashSet::new();
        let mut pre_skipped = 0;
        for player in roster {
            match player_id_of(&player.name) {
                Ok(pid) => {
                    if !seen.insert(pid.clone()) {
                        log::warn!(
                            "game {}: duplicate roster entry for '{}', processing once",
                            message.game.id,
                            player.name
                        );
                        pre_skipped += 1;
                    } else if snapshot
                        .results
                        .contains_key(&result_key(&pid, &message.game.id))
                    {
                        pre_skipped += 1;
                    } else {
                        to_process.push(player);
                    }
                }
                Err(_) => to_process.push(player),
            }
        }
        log::info!(
            "game {}: {} players to process, {} already processed",
            message.game.id,
            to_process.len(),
            pre_skipped
        );

        let ctx = GameContext {
            message: &message,
            tenant_id: &tenant_id,
            now,
        };
        let outcomes = run_players(self.gateway, &ctx, &to_process, &snapshot, cancelled);

        let mut successful = pre_skipped;
        let mut failed = 0;
        for outcome in &outcomes {
            match &outcome.status {
                OutcomeStatus::Committed | OutcomeStatus::Skipped => successful += 1,
                OutcomeStatus::Failed(reason) => {
                    failed += 1;
                    log::warn!(
                        "game {}: player '{}' failed: {reason}",
                        message.game.id,
                        outcome.player_name
                    );
                }
            }
        }
        Ok(MessageStats {
            processed: roster.len(),
            successful,
            failed,
            tenant_id,
        })
    }
}
