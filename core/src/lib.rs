//! Player-data batch processor.
//!
//! Given a message describing one completed poker tournament and its
//! roster, materialize for every player a consistent set of derived
//! records — result, lifetime summary, venue membership, transactions
//! and entry — idempotently under at-least-once delivery and safely
//! under concurrent processors.
//!
//! Pipeline: message parse → batched pre-fetch → bounded per-player
//! fan-out → one atomic multi-record commit per player → aggregation.

pub mod commit;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod identity;
pub mod message;
pub mod naming;
pub mod prefetch;
pub mod records;
pub mod store;
pub mod types;

pub use error::{ProcResult, ProcessorError};
