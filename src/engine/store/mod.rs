// Paw Ledger — Store
// Persists the ledger in an embedded SQLite file via rusqlite.
//
// Concurrency model:
//   • One writer connection. Every mutation runs inside a short
//     `BEGIN IMMEDIATE` transaction, retried with bounded backoff on
//     SQLITE_BUSY; exhausting retries surfaces `EngineError::Busy`.
//   • One reader connection (file-backed stores only). WAL lets reads run
//     against a snapshot while a writer is active; a read may miss an
//     in-flight write.
//   • In-memory stores share the single connection for both roles.
//
// Module layout:
//   schema     — idempotent migrations
//   blocks     — block rows, keyword/tag/embedding side tables, exports
//   chain      — canonical hashing + verify_chain
//   branches   — branch_meta rows and merge aliases
//   slots      — stm_slots rows
//   embedding  — f32 BLOB codec + vector math
//   retry      — backoff helpers for the write path

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ledger_types::StoreConfig;
use log::{info, warn};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub(crate) mod blocks;
pub(crate) mod branches;
pub(crate) mod chain;
pub(crate) mod embedding;
mod retry;
mod schema;
pub(crate) mod slots;

pub use embedding::f32_vec_to_bytes;

/// Thread-safe database wrapper.
pub struct LedgerStore {
    /// Writer connection. Also serves reads for in-memory stores.
    pub(crate) conn: Mutex<Connection>,
    read_conn: Option<Mutex<Connection>>,
    config: StoreConfig,
}

impl LedgerStore {
    /// Open (or create) a ledger database file and initialize tables.
    pub fn open(path: &Path, config: &StoreConfig) -> EngineResult<Self> {
        info!("[ledger:store] Opening ledger store at {:?}", path);

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("[ledger:store] WAL unavailable, journal_mode={}", mode);
        }
        conn.execute_batch("PRAGMA synchronous=NORMAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;

        let reader = Connection::open(path)?;
        reader.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        reader.execute_batch("PRAGMA query_only=ON;")?;

        Ok(LedgerStore {
            conn: Mutex::new(conn),
            read_conn: Some(Mutex::new(reader)),
            config: config.clone(),
        })
    }

    /// Open a private in-memory ledger (tests, ephemeral agents).
    pub fn open_in_memory(config: &StoreConfig) -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(LedgerStore {
            conn: Mutex::new(conn),
            read_conn: None,
            config: config.clone(),
        })
    }

    /// Run a read-only closure against the reader connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        match self.read_conn {
            Some(ref reader) => {
                let conn = reader.lock();
                f(&conn)
            }
            None => {
                let conn = self.conn.lock();
                f(&conn)
            }
        }
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on success.
    ///
    /// Any error rolls the transaction back (nothing partial persists). Busy /
    /// locked failures are retried with backoff; `f` may therefore run more
    /// than once and must not have side effects outside the transaction.
    pub(crate) fn write<T>(
        &self,
        mut f: impl FnMut(&Transaction<'_>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut attempt: u32 = 0;
        loop {
            let result = {
                let mut conn = self.conn.lock();
                Self::run_tx(&mut conn, &mut f)
            };
            match result {
                Err(e) if e.is_busy() && attempt < self.config.max_write_retries => {
                    let delay = retry::backoff_sleep(attempt, &self.config);
                    warn!(
                        "[ledger:store] Write contended (attempt {}), retried after {:?}",
                        attempt + 1,
                        delay
                    );
                    attempt += 1;
                }
                Err(e) if e.is_busy() => {
                    return Err(EngineError::Busy { attempts: attempt + 1 });
                }
                other => return other,
            }
        }
    }

    fn run_tx<T>(
        conn: &mut Connection,
        f: &mut impl FnMut(&Transaction<'_>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Flush and close both connections.
    pub fn close(self) -> EngineResult<()> {
        if let Some(reader) = self.read_conn {
            reader.into_inner().close().map_err(|(_, e)| EngineError::Storage(e))?;
        }
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, e)| EngineError::Storage(e))?;
        info!("[ledger:store] Ledger store closed");
        Ok(())
    }
}
