// ── Paw Ledger Atoms: Error Types ──────────────────────────────────────────
// Single canonical error enum for the ledger, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (storage, integrity, lookup, input).
//   • The `#[from]` attribute wires rusqlite / serde / io conversions.
//   • `EngineError` → `String` conversion is provided via `Display` so that
//     wrapping services (RPC, HTTP) can surface errors without boilerplate.
//   • Verification problems found while scanning history are reported as
//     data (`ChainReport`), not raised; `Integrity` is for live-path checks.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// SQLite / rusqlite failure (I/O, constraint, transaction).
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Write path gave up after repeated lock contention.
    #[error("Storage error: database busy after {attempts} attempts")]
    Busy { attempts: u32 },

    /// Hash, chain or topology mismatch.
    #[error("Integrity error at block {block_index}: {reason}")]
    Integrity { block_index: u64, reason: String },

    /// Missing block, slot or branch.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed caller input (empty context, importance out of range…).
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON column encode / decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ledger configuration is invalid or unreadable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure (config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an integrity error for a specific block.
    pub fn integrity(block_index: u64, reason: impl Into<String>) -> Self {
        Self::Integrity { block_index, reason: reason.into() }
    }

    /// True for the storage family (`Storage` and `Busy`).
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Busy { .. })
    }

    /// True when the underlying SQLite error is transient lock contention.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Busy { .. } => true,
            Self::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All ledger operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ──────────────────────────────────────

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
