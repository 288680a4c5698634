// Database schema and migrations for the ledger store.
// Called once at open by LedgerStore after WAL is enabled.
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT EXISTS
// or ALTER TABLE … ADD COLUMN (errors are silently swallowed) at the end of
// run_migrations() — never modify existing SQL to keep upgrade paths clean.
//
// Hashes cover only block_index/timestamp/context/importance/prev_hash, so
// everything else (keywords, tags, embeddings, topology, visit bookkeeping)
// may live in separate tables or mutable columns.

use crate::atoms::error::EngineResult;
use log::info;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(LEDGER_SCHEMA)?;

    // ── Migrations: add columns to existing tables ──────────────────
    // SQLite reports an error if the column already exists; ignore it.
    let _ = conn.execute("ALTER TABLE blocks ADD COLUMN metadata TEXT", []);

    info!("[ledger:store] Schema migrations complete");
    Ok(())
}

const LEDGER_SCHEMA: &str = "
    -- ═══════════════════════════════════════════════════════════════
    -- Blocks: the hash-chained ledger.
    -- before_hash / after_hashes carry the per-branch tree.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS blocks (
        block_index INTEGER PRIMARY KEY,
        timestamp TEXT NOT NULL,
        context TEXT NOT NULL,
        importance REAL NOT NULL,
        hash TEXT NOT NULL UNIQUE,
        prev_hash TEXT NOT NULL,
        root TEXT NOT NULL,
        before_hash TEXT NOT NULL DEFAULT '',
        after_hashes TEXT NOT NULL DEFAULT '[]',
        branch_depth INTEGER NOT NULL DEFAULT 0,
        metadata TEXT,
        visit_count INTEGER NOT NULL DEFAULT 0,
        last_seen_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_blocks_root ON blocks(root);
    CREATE INDEX IF NOT EXISTS idx_blocks_importance ON blocks(importance DESC);
    CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks(timestamp);

    CREATE TABLE IF NOT EXISTS block_keywords (
        block_index INTEGER NOT NULL,
        keyword TEXT NOT NULL,
        PRIMARY KEY (block_index, keyword),
        FOREIGN KEY (block_index) REFERENCES blocks(block_index)
    );
    CREATE INDEX IF NOT EXISTS idx_block_keywords_keyword ON block_keywords(keyword);

    CREATE TABLE IF NOT EXISTS block_tags (
        block_index INTEGER NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (block_index, tag),
        FOREIGN KEY (block_index) REFERENCES blocks(block_index)
    );
    CREATE INDEX IF NOT EXISTS idx_block_tags_tag ON block_tags(tag);

    CREATE TABLE IF NOT EXISTS block_embeddings (
        block_index INTEGER PRIMARY KEY,
        embedding BLOB NOT NULL,
        embedding_model TEXT NOT NULL,
        embedding_dim INTEGER NOT NULL,
        FOREIGN KEY (block_index) REFERENCES blocks(block_index)
    );
    CREATE INDEX IF NOT EXISTS idx_block_embeddings_model
        ON block_embeddings(embedding_model, embedding_dim);

    -- ═══════════════════════════════════════════════════════════════
    -- Branches: centroid tracking + merge relabeling.
    -- A merge never rewrites blocks.root; it adds an alias row instead.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS branch_meta (
        root TEXT PRIMARY KEY,
        size INTEGER NOT NULL DEFAULT 0,
        heads TEXT NOT NULL DEFAULT '[]',
        centroid BLOB,
        centroid_model TEXT,
        centroid_dim INTEGER,
        last_merge_eval INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS branch_aliases (
        retired TEXT PRIMARY KEY,
        survivor TEXT NOT NULL,
        merged_at TEXT NOT NULL
    );

    -- ═══════════════════════════════════════════════════════════════
    -- STM slots: named head pointers restored on restart.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS stm_slots (
        slot_id TEXT PRIMARY KEY,
        head_hash TEXT,
        root TEXT,
        updated_at TEXT NOT NULL
    );
";
