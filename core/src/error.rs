//! Error taxonomy for the processor.
//!
//! RULE: No provider error type crosses a module boundary. The store
//! gateway maps every `rusqlite` failure into one of these kinds before
//! returning; downstream logic switches only on this enum.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Malformed message or missing required field. Fails that message
    /// only; no writes are attempted for it.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Missing process-level configuration. Fails the invocation at startup.
    #[error("Missing configuration: {0}")]
    Config(String),

    /// No tenant id on the message and no process default.
    #[error("No tenant id on message and no default tenant configured")]
    TenantUnresolved,

    /// Transport failure from the record store. Fails the current
    /// per-player task; the queue is the retry mechanism.
    #[error("Record store failure: {0}")]
    TransientIo(String),

    /// Conditional-put violation on an idempotency key. Benign for the
    /// Player upsert (lost race); the PlayerResult beacon is checked via
    /// the snapshot fast-path instead.
    #[error("Record already exists: {group}/{key}")]
    AlreadyExists { group: String, key: String },

    /// Atomic bundle aborted by a precondition violation.
    #[error("Atomic bundle aborted: {}", reasons.join("; "))]
    TransactionConflict { reasons: Vec<String> },

    /// Bundle exceeds the store's per-transaction cap. Planner bug.
    #[error("Bundle of {count} items exceeds the per-transaction limit")]
    TooManyItems { count: usize },

    /// One or more player commits or whole messages failed; raised by
    /// the driver so the queue redelivers the invocation's messages.
    /// `failed`/`total` count per-player tasks; messages that failed
    /// before fan-out (parse, tenant) are counted separately.
    #[error("{failed} of {total} player commits failed, {failed_messages} messages failed before fan-out")]
    BatchFailed {
        failed: usize,
        total: usize,
        failed_messages: usize,
    },
}

pub type ProcResult<T> = Result<T, ProcessorError>;
