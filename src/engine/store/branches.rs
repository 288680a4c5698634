// ── Ledger Store: Branch Rows ────────────────────────────────────────────────
//
// branch_meta (size, heads, centroid, merge bookkeeping) and branch_aliases.
// A merge retires one meta row and records `retired → survivor`; block rows
// keep their original `root` forever.

use super::embedding::{embedding_from_parts, f32_vec_to_bytes};
use crate::atoms::error::EngineResult;
use crate::atoms::ledger_types::BranchMeta;
use rusqlite::{params, Connection};

pub(crate) fn upsert_meta(conn: &Connection, meta: &BranchMeta) -> EngineResult<()> {
    let heads = serde_json::to_string(&meta.heads)?;
    let (blob, model, dim) = match meta.centroid {
        Some(ref c) => (
            Some(f32_vec_to_bytes(&c.vector)),
            Some(c.model_id.clone()),
            Some(c.dimension as i64),
        ),
        None => (None, None, None),
    };
    conn.execute(
        "INSERT INTO branch_meta (root, size, heads, centroid, centroid_model, centroid_dim, last_merge_eval)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(root) DO UPDATE SET
            size = excluded.size,
            heads = excluded.heads,
            centroid = excluded.centroid,
            centroid_model = excluded.centroid_model,
            centroid_dim = excluded.centroid_dim,
            last_merge_eval = excluded.last_merge_eval",
        params![
            meta.root,
            meta.size as i64,
            heads,
            blob,
            model,
            dim,
            meta.last_merge_eval as i64,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_meta(conn: &Connection, root: &str) -> EngineResult<()> {
    conn.execute("DELETE FROM branch_meta WHERE root = ?1", params![root])?;
    Ok(())
}

/// Current row for one branch, read inside the write transaction.
pub(crate) fn load_meta(conn: &Connection, root: &str) -> EngineResult<Option<BranchMeta>> {
    Ok(load_metas_where(conn, Some(root))?.into_iter().next())
}

pub(crate) fn load_metas(conn: &Connection) -> EngineResult<Vec<BranchMeta>> {
    load_metas_where(conn, None)
}

fn load_metas_where(conn: &Connection, root: Option<&str>) -> EngineResult<Vec<BranchMeta>> {
    let mut stmt = conn.prepare(
        "SELECT root, size, heads, centroid, centroid_model, centroid_dim, last_merge_eval
         FROM branch_meta WHERE ?1 IS NULL OR root = ?1 ORDER BY root",
    )?;
    let raw = stmt
        .query_map(params![root], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<Vec<u8>>>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<i64>>(5)?,
                r.get::<_, i64>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut metas = Vec::with_capacity(raw.len());
    for (root, size, heads, blob, model, dim, last_eval) in raw {
        let centroid = match (blob, model, dim) {
            (Some(b), Some(m), Some(d)) => embedding_from_parts(&b, m, d),
            _ => None,
        };
        metas.push(BranchMeta {
            root,
            size: size as u64,
            heads: serde_json::from_str(&heads)?,
            centroid,
            last_merge_eval: last_eval as u64,
        });
    }
    Ok(metas)
}

pub(crate) fn insert_alias(
    conn: &Connection,
    retired: &str,
    survivor: &str,
    merged_at: &str,
) -> EngineResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO branch_aliases (retired, survivor, merged_at) VALUES (?1, ?2, ?3)",
        params![retired, survivor, merged_at],
    )?;
    Ok(())
}

/// `(retired, survivor)` pairs in merge order.
pub(crate) fn load_aliases(conn: &Connection) -> EngineResult<Vec<(String, String)>> {
    let mut stmt =
        conn.prepare("SELECT retired, survivor FROM branch_aliases ORDER BY merged_at, retired")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ledger_types::Embedding;
    use crate::engine::store::schema::run_migrations;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn meta_roundtrip_and_update() {
        let conn = test_conn();
        let mut meta = BranchMeta {
            root: "r1".into(),
            size: 1,
            heads: vec!["r1".into()],
            centroid: Some(Embedding::new("m", vec![0.5, 0.5])),
            last_merge_eval: 0,
        };
        upsert_meta(&conn, &meta).unwrap();
        meta.size = 2;
        meta.heads = vec!["h2".into()];
        upsert_meta(&conn, &meta).unwrap();

        let loaded = load_metas(&conn).unwrap();
        assert_eq!(loaded, vec![meta.clone()]);
        assert_eq!(load_meta(&conn, "r1").unwrap(), Some(meta));
        assert_eq!(load_meta(&conn, "zz").unwrap(), None);

        delete_meta(&conn, "r1").unwrap();
        assert!(load_metas(&conn).unwrap().is_empty());
    }

    #[test]
    fn aliases_persist() {
        let conn = test_conn();
        insert_alias(&conn, "old", "new", "2026-01-01T00:00:00.000Z").unwrap();
        assert_eq!(
            load_aliases(&conn).unwrap(),
            vec![("old".to_string(), "new".to_string())]
        );
    }
}
