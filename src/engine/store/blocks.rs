// ── Ledger Store: Block Rows ─────────────────────────────────────────────────
//
// Low-level CRUD for blocks and their side tables (keywords, tags, embeddings).
// Functions take a `&Connection` so they run equally inside a write
// transaction (`&Transaction` derefs to `&Connection`) or on the reader.
//
// Schema lives in store/schema.rs. Column names here MUST match that schema.

use super::embedding::{embedding_from_parts, f32_vec_to_bytes};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ledger_types::{
    BlockLink, Embedding, MemoryBlock, RangeQuery, SortBy, SortOrder,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};

const BLOCK_COLUMNS: &str = "block_index, timestamp, context, importance, hash, prev_hash, root,
     before_hash, after_hashes, branch_depth, metadata, visit_count, last_seen_at";

/// Topology-only projection used to build the in-memory arena.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TopologyRow {
    pub block_index: u64,
    pub hash: String,
    pub root: String,
    pub before: String,
    pub branch_depth: u32,
    pub timestamp: String,
}

/// Projection used to (re)build the global index.
#[derive(Debug, Clone)]
pub(crate) struct IndexRow {
    pub block_index: u64,
    pub timestamp: String,
    pub context: String,
    pub keywords: Vec<String>,
    pub embedding: Option<Embedding>,
}

/// Row shape consumed by chain verification.
#[derive(Debug, Clone)]
pub(crate) struct ChainRow {
    pub block_index: u64,
    pub timestamp: String,
    pub context: String,
    pub importance: f64,
    pub hash: String,
    pub prev_hash: String,
    pub root: String,
    pub before: String,
    pub after: Vec<String>,
    pub branch_depth: u32,
}

fn json_err(col: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e))
}

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryBlock> {
    let after_json: String = row.get(8)?;
    let after: Vec<String> = serde_json::from_str(&after_json).map_err(|e| json_err(8, e))?;
    let metadata: Option<String> = row.get(10)?;
    let metadata = match metadata {
        Some(text) if !text.is_empty() => {
            serde_json::from_str(&text).map_err(|e| json_err(10, e))?
        }
        _ => serde_json::Value::Null,
    };
    Ok(MemoryBlock {
        block_index: row.get::<_, i64>(0)? as u64,
        timestamp: row.get(1)?,
        context: row.get(2)?,
        importance: row.get(3)?,
        hash: row.get(4)?,
        prev_hash: row.get(5)?,
        root: row.get(6)?,
        before: row.get(7)?,
        after,
        branch_depth: row.get::<_, i64>(9)? as u32,
        keywords: BTreeSet::new(),
        tags: BTreeSet::new(),
        embedding: None,
        metadata,
        visit_count: row.get::<_, i64>(11)? as u64,
        last_seen_at: row.get(12)?,
    })
}

/// Attach keywords, tags and the embedding from their side tables.
fn hydrate(conn: &Connection, block: &mut MemoryBlock) -> EngineResult<()> {
    let idx = block.block_index as i64;

    let mut stmt =
        conn.prepare_cached("SELECT keyword FROM block_keywords WHERE block_index = ?1")?;
    block.keywords = stmt
        .query_map(params![idx], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;

    let mut stmt = conn.prepare_cached("SELECT tag FROM block_tags WHERE block_index = ?1")?;
    block.tags = stmt
        .query_map(params![idx], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT embedding, embedding_model, embedding_dim
         FROM block_embeddings WHERE block_index = ?1",
    )?;
    block.embedding = stmt
        .query_row(params![idx], |r| {
            let bytes: Vec<u8> = r.get(0)?;
            let model: String = r.get(1)?;
            let dim: i64 = r.get(2)?;
            Ok(embedding_from_parts(&bytes, model, dim))
        })
        .optional()?
        .flatten();

    Ok(())
}

fn query_blocks(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> EngineResult<Vec<MemoryBlock>> {
    let mut stmt = conn.prepare(sql)?;
    let mut blocks = stmt
        .query_map(params, block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for block in blocks.iter_mut() {
        hydrate(conn, block)?;
    }
    Ok(blocks)
}

// ═════════════════════════════════════════════════════════════════════════════
// Write side
// ═════════════════════════════════════════════════════════════════════════════

/// `(block_index, hash)` of the chronologically last block.
pub(crate) fn tip(conn: &Connection) -> EngineResult<Option<(u64, String)>> {
    let row = conn
        .query_row(
            "SELECT block_index, hash FROM blocks ORDER BY block_index DESC LIMIT 1",
            [],
            |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, String>(1)?)),
        )
        .optional()?;
    Ok(row)
}

/// Persist a sealed block and its keyword / tag / embedding rows.
pub(crate) fn insert_block(conn: &Connection, block: &MemoryBlock) -> EngineResult<()> {
    let after_json = serde_json::to_string(&block.after)?;
    let metadata = if block.metadata.is_null() {
        None
    } else {
        Some(serde_json::to_string(&block.metadata)?)
    };

    conn.execute(
        "INSERT INTO blocks (
            block_index, timestamp, context, importance, hash, prev_hash, root,
            before_hash, after_hashes, branch_depth, metadata, visit_count, last_seen_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            block.block_index as i64,
            block.timestamp,
            block.context,
            block.importance,
            block.hash,
            block.prev_hash,
            block.root,
            block.before,
            after_json,
            block.branch_depth as i64,
            metadata,
            block.visit_count as i64,
            block.last_seen_at,
        ],
    )?;

    let mut kw = conn.prepare_cached(
        "INSERT OR IGNORE INTO block_keywords (block_index, keyword) VALUES (?1, ?2)",
    )?;
    for keyword in &block.keywords {
        kw.execute(params![block.block_index as i64, keyword])?;
    }

    let mut tag = conn
        .prepare_cached("INSERT OR IGNORE INTO block_tags (block_index, tag) VALUES (?1, ?2)")?;
    for t in &block.tags {
        tag.execute(params![block.block_index as i64, t])?;
    }

    if let Some(ref emb) = block.embedding {
        conn.execute(
            "INSERT INTO block_embeddings (block_index, embedding, embedding_model, embedding_dim)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                block.block_index as i64,
                f32_vec_to_bytes(&emb.vector),
                emb.model_id,
                emb.dimension as i64,
            ],
        )?;
    }

    Ok(())
}

/// Append `child_hash` to the parent's ordered `after` list.
pub(crate) fn append_child(
    conn: &Connection,
    parent_hash: &str,
    child_hash: &str,
) -> EngineResult<()> {
    let after_json: Option<String> = conn
        .query_row(
            "SELECT after_hashes FROM blocks WHERE hash = ?1",
            params![parent_hash],
            |r| r.get(0),
        )
        .optional()?;
    let after_json =
        after_json.ok_or_else(|| EngineError::not_found(format!("parent block {parent_hash}")))?;

    let mut after: Vec<String> = serde_json::from_str(&after_json)?;
    if !after.iter().any(|h| h == child_hash) {
        after.push(child_hash.to_string());
    }
    conn.execute(
        "UPDATE blocks SET after_hashes = ?2 WHERE hash = ?1",
        params![parent_hash, serde_json::to_string(&after)?],
    )?;
    Ok(())
}

/// Search-time bookkeeping. Not covered by the hash.
pub(crate) fn record_visits(conn: &Connection, indices: &[u64], now: &str) -> EngineResult<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE blocks SET visit_count = visit_count + 1, last_seen_at = ?2
         WHERE block_index = ?1",
    )?;
    for idx in indices {
        stmt.execute(params![*idx as i64, now])?;
    }
    Ok(())
}

// ═════════════════════════════════════════════════════════════════════════════
// Read side
// ═════════════════════════════════════════════════════════════════════════════

pub(crate) fn max_index(conn: &Connection) -> EngineResult<Option<u64>> {
    let max: Option<i64> = conn.query_row("SELECT MAX(block_index) FROM blocks", [], |r| r.get(0))?;
    Ok(max.map(|m| m as u64))
}

pub(crate) fn count(conn: &Connection) -> EngineResult<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |r| r.get(0))?;
    Ok(n as u64)
}

pub(crate) fn get(conn: &Connection, index: u64) -> EngineResult<Option<MemoryBlock>> {
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE block_index = ?1");
    Ok(query_blocks(conn, &sql, params![index as i64])?.into_iter().next())
}

pub(crate) fn get_by_hash(conn: &Connection, hash: &str) -> EngineResult<Option<MemoryBlock>> {
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE hash = ?1");
    Ok(query_blocks(conn, &sql, params![hash])?.into_iter().next())
}

/// Fetch several blocks, returned in the order of `indices`. Missing ones are skipped.
pub(crate) fn get_many(conn: &Connection, indices: &[u64]) -> EngineResult<Vec<MemoryBlock>> {
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE block_index = ?1");
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut out = Vec::with_capacity(indices.len());
    for idx in indices {
        if let Some(mut block) = stmt.query_row(params![*idx as i64], block_from_row).optional()? {
            hydrate(conn, &mut block)?;
            out.push(block);
        }
    }
    Ok(out)
}

/// Inclusive index range with paging and ordering.
pub(crate) fn range(conn: &Connection, query: &RangeQuery) -> EngineResult<Vec<MemoryBlock>> {
    let order = query.order.as_sql();
    let column = match query.sort_by {
        SortBy::BlockIndex => "block_index",
        SortBy::Timestamp => "timestamp",
        SortBy::Importance => "importance",
    };
    let sql = format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks
         WHERE block_index >= ?1 AND block_index <= ?2
         ORDER BY {column} {order}, block_index {order}
         LIMIT ?3 OFFSET ?4"
    );
    let start = query.start.unwrap_or(0) as i64;
    let end = query.end.map(|e| e as i64).unwrap_or(i64::MAX);
    query_blocks(
        conn,
        &sql,
        params![start, end, query.limit as i64, query.offset as i64],
    )
}

/// Blocks with `importance >= threshold`, ordered by importance.
pub(crate) fn filter_by_importance(
    conn: &Connection,
    threshold: f64,
    limit: usize,
    order: SortOrder,
) -> EngineResult<Vec<MemoryBlock>> {
    let order = order.as_sql();
    let sql = format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks
         WHERE importance >= ?1
         ORDER BY importance {order}, block_index {order}
         LIMIT ?2"
    );
    query_blocks(conn, &sql, params![threshold, limit as i64])
}

/// Block indices whose stored root is one of `roots`, ascending.
pub(crate) fn indices_by_roots(conn: &Connection, roots: &[String]) -> EngineResult<Vec<u64>> {
    let mut stmt =
        conn.prepare_cached("SELECT block_index FROM blocks WHERE root = ?1 ORDER BY block_index")?;
    let mut out = Vec::new();
    for root in roots {
        let rows = stmt
            .query_map(params![root], |r| r.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.extend(rows.into_iter().map(|i| i as u64));
    }
    out.sort_unstable();
    Ok(out)
}

/// Topology rows with `block_index > after` (all rows when `after` is None).
pub(crate) fn topology_since(
    conn: &Connection,
    after: Option<u64>,
) -> EngineResult<Vec<TopologyRow>> {
    let floor = after.map(|a| a as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT block_index, hash, root, before_hash, branch_depth, timestamp
         FROM blocks WHERE block_index > ?1 ORDER BY block_index ASC",
    )?;
    let rows = stmt
        .query_map(params![floor], |r| {
            Ok(TopologyRow {
                block_index: r.get::<_, i64>(0)? as u64,
                hash: r.get(1)?,
                root: r.get(2)?,
                before: r.get(3)?,
                branch_depth: r.get::<_, i64>(4)? as u32,
                timestamp: r.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Global-index rows with `block_index > after`.
pub(crate) fn index_rows_since(
    conn: &Connection,
    after: Option<u64>,
) -> EngineResult<Vec<IndexRow>> {
    let floor = after.map(|a| a as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT b.block_index, b.timestamp, b.context,
                e.embedding, e.embedding_model, e.embedding_dim
         FROM blocks b
         LEFT JOIN block_embeddings e ON e.block_index = b.block_index
         WHERE b.block_index > ?1
         ORDER BY b.block_index ASC",
    )?;
    let mut rows = stmt
        .query_map(params![floor], |r| {
            let bytes: Option<Vec<u8>> = r.get(3)?;
            let model: Option<String> = r.get(4)?;
            let dim: Option<i64> = r.get(5)?;
            let embedding = match (bytes, model, dim) {
                (Some(b), Some(m), Some(d)) => embedding_from_parts(&b, m, d),
                _ => None,
            };
            Ok(IndexRow {
                block_index: r.get::<_, i64>(0)? as u64,
                timestamp: r.get(1)?,
                context: r.get(2)?,
                keywords: Vec::new(),
                embedding,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut kw = conn.prepare(
        "SELECT block_index, keyword FROM block_keywords
         WHERE block_index > ?1 ORDER BY block_index, keyword",
    )?;
    let mut by_block: HashMap<u64, Vec<String>> = HashMap::new();
    for pair in kw.query_map(params![floor], |r| {
        Ok((r.get::<_, i64>(0)? as u64, r.get::<_, String>(1)?))
    })? {
        let (idx, keyword) = pair?;
        by_block.entry(idx).or_default().push(keyword);
    }
    for row in rows.iter_mut() {
        if let Some(k) = by_block.remove(&row.block_index) {
            row.keywords = k;
        }
    }
    Ok(rows)
}

/// Every block in index order, projected for verification.
pub(crate) fn chain_rows(conn: &Connection) -> EngineResult<Vec<ChainRow>> {
    let mut stmt = conn.prepare(
        "SELECT block_index, timestamp, context, importance, hash, prev_hash, root,
                before_hash, after_hashes, branch_depth
         FROM blocks ORDER BY block_index ASC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let after_json: String = r.get(8)?;
            let after: Vec<String> =
                serde_json::from_str(&after_json).map_err(|e| json_err(8, e))?;
            Ok(ChainRow {
                block_index: r.get::<_, i64>(0)? as u64,
                timestamp: r.get(1)?,
                context: r.get(2)?,
                importance: r.get(3)?,
                hash: r.get(4)?,
                prev_hash: r.get(5)?,
                root: r.get(6)?,
                before: r.get(7)?,
                after,
                branch_depth: r.get::<_, i64>(9)? as u32,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ═════════════════════════════════════════════════════════════════════════════
// Bulk export (read-only, consumed by the external consolidation process)
// ═════════════════════════════════════════════════════════════════════════════

pub(crate) fn all_embeddings(conn: &Connection) -> EngineResult<Vec<(u64, Embedding)>> {
    let mut stmt = conn.prepare(
        "SELECT block_index, embedding, embedding_model, embedding_dim
         FROM block_embeddings ORDER BY block_index ASC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let idx = r.get::<_, i64>(0)? as u64;
            let bytes: Vec<u8> = r.get(1)?;
            let model: String = r.get(2)?;
            let dim: i64 = r.get(3)?;
            Ok(embedding_from_parts(&bytes, model, dim).map(|e| (idx, e)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().flatten().collect())
}

pub(crate) fn existing_links(conn: &Connection) -> EngineResult<Vec<BlockLink>> {
    let mut stmt = conn.prepare(
        "SELECT p.block_index, p.hash, c.block_index, c.hash
         FROM blocks c JOIN blocks p ON p.hash = c.before_hash
         WHERE c.before_hash != ''
         ORDER BY c.block_index ASC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(BlockLink {
                parent_index: r.get::<_, i64>(0)? as u64,
                parent_hash: r.get(1)?,
                child_index: r.get::<_, i64>(2)? as u64,
                child_hash: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
