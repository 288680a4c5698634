// ── Ledger Store: STM Slot Rows ──────────────────────────────────────────────

use crate::atoms::error::EngineResult;
use crate::atoms::ledger_types::StmSlot;
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) fn upsert_slot(conn: &Connection, slot: &StmSlot) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO stm_slots (slot_id, head_hash, root, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(slot_id) DO UPDATE SET
            head_hash = excluded.head_hash,
            root = excluded.root,
            updated_at = excluded.updated_at",
        params![slot.slot_id, slot.head_hash, slot.root, slot.updated_at],
    )?;
    Ok(())
}

/// One slot row as currently committed; `None` before its first write.
pub(crate) fn load_slot(conn: &Connection, slot_id: &str) -> EngineResult<Option<StmSlot>> {
    let row = conn
        .query_row(
            "SELECT slot_id, head_hash, root, updated_at FROM stm_slots WHERE slot_id = ?1",
            params![slot_id],
            slot_from_row,
        )
        .optional()?;
    Ok(row)
}

fn slot_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StmSlot> {
    Ok(StmSlot {
        slot_id: r.get(0)?,
        head_hash: r.get(1)?,
        root: r.get(2)?,
        updated_at: r.get(3)?,
    })
}

pub(crate) fn load_slots(conn: &Connection) -> EngineResult<Vec<StmSlot>> {
    let mut stmt =
        conn.prepare("SELECT slot_id, head_hash, root, updated_at FROM stm_slots ORDER BY slot_id")?;
    let rows = stmt
        .query_map([], slot_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
