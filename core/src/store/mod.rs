//! SQLite-backed record-store gateway.
//!
//! RULE: Only this module talks to the database. The rest of the
//! pipeline sees exactly six operations — batch_get, query_by_index,
//! conditional_put, update, transactional_write, shutdown — and the
//! error taxonomy in `error.rs`. No `rusqlite` type leaks upward.
//!
//! Each physical group is one table `(k TEXT PRIMARY KEY, doc TEXT)`
//! where `doc` is the record as a JSON object. Counter movement is
//! expressed through SQLite's JSON1 functions so the new value is
//! computed inside the store engine, never read-modify-write here.

use crate::error::{ProcResult, ProcessorError};
use crate::naming::{RecordGroup, TableNamer};
use crate::records::Doc;
use rusqlite::types::ToSqlOutput;
use rusqlite::{Connection, OptionalExtension, ToSql, TransactionBehavior};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Store cap on keys per batch-get call.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Store cap on writes per atomic bundle.
pub const MAX_TRANSACTION_ITEMS: usize = 100;

/// Backoff before retrying the failed remainder of a batch-get.
const BATCH_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Attribute assignment inside an `update`: set `attr` to `value`.
#[derive(Debug, Clone)]
pub struct Assign {
    pub attr: &'static str,
    pub value: Value,
}

impl Assign {
    pub fn new(attr: &'static str, value: impl Into<Value>) -> Self {
        Self {
            attr,
            value: value.into(),
        }
    }
}

/// Atomic delta inside an `update`: add `by` to `attr`, treating a
/// missing attribute as zero (`if-not-exists` fallback for legacy
/// records).
#[derive(Debug, Clone)]
pub struct Increment {
    pub attr: &'static str,
    by: IncrBy,
}

#[derive(Debug, Clone, Copy)]
enum IncrBy {
    Int(i64),
    Float(f64),
}

impl Increment {
    /// Integer delta — keeps integer-valued counters integer-valued.
    pub fn by_int(attr: &'static str, by: i64) -> Self {
        Self {
            attr,
            by: IncrBy::Int(by),
        }
    }

    pub fn by_float(attr: &'static str, by: f64) -> Self {
        Self {
            attr,
            by: IncrBy::Float(by),
        }
    }
}

/// One write inside an atomic bundle.
#[derive(Debug, Clone)]
pub enum WriteItem {
    /// Create-if-absent; a present key aborts the whole bundle.
    PutIfAbsent { group: RecordGroup, doc: Doc },
    /// Unconditional put.
    Put { group: RecordGroup, doc: Doc },
    /// Attribute-level mutation of an existing record.
    Update {
        group: RecordGroup,
        key: String,
        assigns: Vec<Assign>,
        increments: Vec<Increment>,
    },
}

enum SqlArg {
    Text(String),
    Int(i64),
    Real(f64),
}

impl ToSql for SqlArg {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlArg::Text(s) => s.to_sql(),
            SqlArg::Int(i) => i.to_sql(),
            SqlArg::Real(f) => f.to_sql(),
        }
    }
}

pub struct Gateway {
    conn: Mutex<Connection>,
    namer: TableNamer,
}

impl Gateway {
    /// Open (creating missing group tables) a file-backed store.
    pub fn open(path: &str, namer: TableNamer) -> ProcResult<Self> {
        let conn = Connection::open(path).map_err(io_err)?;
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA busy_timeout=5000;")
            .map_err(io_err)?;
        let gw = Self {
            conn: Mutex::new(conn),
            namer,
        };
        gw.create_groups()?;
        Ok(gw)
    }

    /// Open an in-memory store (used in tests).
    pub fn in_memory(namer: TableNamer) -> ProcResult<Self> {
        let conn = Connection::open_in_memory().map_err(io_err)?;
        let gw = Self {
            conn: Mutex::new(conn),
            namer,
        };
        gw.create_groups()?;
        Ok(gw)
    }

    /// Create any missing group tables plus the PlayerVenue visitKey
    /// index. Idempotent; called on open.
    fn create_groups(&self) -> ProcResult<()> {
        let conn = self.lock()?;
        for group in RecordGroup::ALL {
            let table = self.namer.physical_name(group);
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (k TEXT PRIMARY KEY, doc TEXT NOT NULL);"
            ))
            .map_err(io_err)?;
        }
        let venue = self.namer.physical_name(RecordGroup::PlayerVenue);
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"{venue}-visitKey\" \
             ON \"{venue}\" (json_extract(doc, '$.visitKey'));"
        ))
        .map_err(io_err)?;
        Ok(())
    }

    /// Fetch every present record for `keys`, keyed by `key_attr` value.
    /// Splits into chunks of [`MAX_BATCH_GET_KEYS`], retries a failed
    /// chunk once after a short backoff, and returns partial results
    /// rather than failing the whole pre-fetch.
    pub fn batch_get(
        &self,
        group: RecordGroup,
        keys: &[String],
        key_attr: &str,
    ) -> ProcResult<HashMap<String, Doc>> {
        let mut out = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_BATCH_GET_KEYS) {
            match self.fetch_chunk(group, chunk, key_attr, &mut out) {
                Ok(()) => {}
                Err(first) => {
                    log::warn!(
                        "batch_get {}: chunk of {} failed ({first}), retrying once",
                        group.logical_name(),
                        chunk.len()
                    );
                    std::thread::sleep(BATCH_RETRY_BACKOFF);
                    if let Err(second) = self.fetch_chunk(group, chunk, key_attr, &mut out) {
                        log::warn!(
                            "batch_get {}: retry failed ({second}), returning partial results",
                            group.logical_name()
                        );
                    }
                }
            }
        }
        Ok(out)
    }

    fn fetch_chunk(
        &self,
        group: RecordGroup,
        chunk: &[String],
        key_attr: &str,
        out: &mut HashMap<String, Doc>,
    ) -> ProcResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let table = self.namer.physical_name(group);
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("SELECT k, doc FROM \"{table}\" WHERE k IN ({placeholders})");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(io_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(io_err)?;
        for row in rows {
            let (k, raw) = row.map_err(io_err)?;
            let doc = decode_doc(&raw)?;
            let key = doc
                .get(key_attr)
                .and_then(Value::as_str)
                .unwrap_or(&k)
                .to_string();
            out.insert(key, doc);
        }
        Ok(())
    }

    /// Single-partition secondary-index lookup, limit 1.
    pub fn query_by_index(
        &self,
        group: RecordGroup,
        index_attr: &str,
        value: &str,
    ) -> ProcResult<Option<Doc>> {
        let table = self.namer.physical_name(group);
        let sql = format!(
            "SELECT doc FROM \"{table}\" WHERE json_extract(doc, '$.{index_attr}') = ? LIMIT 1"
        );
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(&sql, [value], |row| row.get(0))
            .optional()
            .map_err(io_err)?;
        raw.as_deref().map(decode_doc).transpose()
    }

    /// Write a new record only if no record with its key exists. A
    /// present key surfaces as `AlreadyExists`, which callers treat as
    /// benign idempotency.
    pub fn conditional_put(&self, group: RecordGroup, doc: &Doc, key_attr: &str) -> ProcResult<()> {
        let key = doc_key(doc, key_attr)?;
        let table = self.namer.physical_name(group);
        let body = Value::Object(doc.clone()).to_string();
        let conn = self.lock()?;
        match conn.execute(
            &format!("INSERT INTO \"{table}\" (k, doc) VALUES (?1, ?2)"),
            [&key, &body],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_key_conflict(&e) => Err(ProcessorError::AlreadyExists {
                group: group.logical_name().to_string(),
                key,
            }),
            Err(e) => Err(io_err(e)),
        }
    }

    /// Attribute-level mutation: set-values plus atomic delta-increments,
    /// computed server-side in one statement.
    pub fn update(
        &self,
        group: RecordGroup,
        key: &str,
        assigns: &[Assign],
        increments: &[Increment],
    ) -> ProcResult<()> {
        let conn = self.lock()?;
        let changed = apply_update(&conn, &self.namer, group, key, assigns, increments)?;
        if changed == 0 {
            return Err(ProcessorError::TransientIo(format!(
                "update matched no record: {}/{key}",
                group.logical_name()
            )));
        }
        Ok(())
    }

    /// Atomic commit of up to [`MAX_TRANSACTION_ITEMS`] writes. All
    /// succeed or none do; a precondition violation on any item aborts
    /// the bundle with per-item reasons.
    pub fn transactional_write(&self, bundle: Vec<WriteItem>) -> ProcResult<()> {
        if bundle.len() > MAX_TRANSACTION_ITEMS {
            return Err(ProcessorError::TooManyItems {
                count: bundle.len(),
            });
        }
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(io_err)?;
        let mut reasons = Vec::new();
        for (i, item) in bundle.iter().enumerate() {
            match item {
                WriteItem::PutIfAbsent { group, doc } => {
                    let key = doc_key(doc, group.key_attr())?;
                    let table = self.namer.physical_name(*group);
                    let exists: Option<i64> = tx
                        .query_row(
                            &format!("SELECT 1 FROM \"{table}\" WHERE k = ?1"),
                            [&key],
                            |row| row.get(0),
                        )
                        .optional()
                        .map_err(io_err)?;
                    if exists.is_some() {
                        reasons.push(format!(
                            "item {i}: {}/{key} already exists",
                            group.logical_name()
                        ));
                        continue;
                    }
                    let body = Value::Object(doc.clone()).to_string();
                    tx.execute(
                        &format!("INSERT INTO \"{table}\" (k, doc) VALUES (?1, ?2)"),
                        [&key, &body],
                    )
                    .map_err(io_err)?;
                }
                WriteItem::Put { group, doc } => {
                    let key = doc_key(doc, group.key_attr())?;
                    let table = self.namer.physical_name(*group);
                    let body = Value::Object(doc.clone()).to_string();
                    tx.execute(
                        &format!("INSERT OR REPLACE INTO \"{table}\" (k, doc) VALUES (?1, ?2)"),
                        [&key, &body],
                    )
                    .map_err(io_err)?;
                }
                WriteItem::Update {
                    group,
                    key,
                    assigns,
                    increments,
                } => {
                    let changed = apply_update(&tx, &self.namer, *group, key, assigns, increments)?;
                    if changed == 0 {
                        reasons.push(format!(
                            "item {i}: {}/{key} not found",
                            group.logical_name()
                        ));
                    }
                }
            }
        }
        if !reasons.is_empty() {
            // Dropping the transaction rolls everything back.
            return Err(ProcessorError::TransactionConflict { reasons });
        }
        tx.commit().map_err(io_err)
    }

    pub fn shutdown(self) -> ProcResult<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| ProcessorError::TransientIo("store mutex poisoned".into()))?;
        conn.close()
            .map_err(|(_, e)| io_err(e))
    }

    fn lock(&self) -> ProcResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ProcessorError::TransientIo("store mutex poisoned".into()))
    }
}

/// Build and run one `json_set` update statement. Assigned values pass
/// through SQLite's `json(?)` so they keep their JSON type; increments
/// coalesce a missing attribute to zero before adding.
fn apply_update(
    conn: &Connection,
    namer: &TableNamer,
    group: RecordGroup,
    key: &str,
    assigns: &[Assign],
    increments: &[Increment],
) -> ProcResult<usize> {
    if assigns.is_empty() && increments.is_empty() {
        return Ok(1);
    }
    let table = namer.physical_name(group);
    let mut sql = format!("UPDATE \"{table}\" SET doc = json_set(doc");
    let mut args: Vec<SqlArg> = Vec::with_capacity(assigns.len() + increments.len() + 1);
    for assign in assigns {
        sql.push_str(&format!(", '$.{}', json(?)", assign.attr));
        args.push(SqlArg::Text(assign.value.to_string()));
    }
    for incr in increments {
        sql.push_str(&format!(
            ", '$.{attr}', COALESCE(json_extract(doc, '$.{attr}'), 0) + ?",
            attr = incr.attr
        ));
        match incr.by {
            IncrBy::Int(v) => args.push(SqlArg::Int(v)),
            IncrBy::Float(v) => args.push(SqlArg::Real(v)),
        }
    }
    sql.push_str(") WHERE k = ?");
    args.push(SqlArg::Text(key.to_string()));
    conn.execute(&sql, rusqlite::params_from_iter(args.iter()))
        .map_err(io_err)
}

fn decode_doc(raw: &str) -> ProcResult<Doc> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ProcessorError::TransientIo(
            "stored doc is not a JSON object".into(),
        )),
    }
}

fn doc_key(doc: &Doc, key_attr: &str) -> ProcResult<String> {
    doc.get(key_attr)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProcessorError::Input(format!("record has no '{key_attr}' key attribute")))
}

fn is_key_conflict(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn io_err(e: rusqlite::Error) -> ProcessorError {
    ProcessorError::TransientIo(e.to_string())
}
