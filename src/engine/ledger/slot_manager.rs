// ── Ledger: STM Slot Manager ────────────────────────────────────────────────
//
// A fixed set of named head pointers, one per active working context.
// Heads are weak references (hash lookups only). The persisted stm_slots
// table is the source of truth; this cache is replayed from it at open and
// after cross-process catch-up.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ledger_types::StmSlot;
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) struct SlotManager {
    names: Vec<String>,
    slots: HashMap<String, StmSlot>,
}

impl SlotManager {
    pub fn new(names: &[String]) -> Self {
        Self {
            names: names.to_vec(),
            slots: HashMap::new(),
        }
    }

    pub fn validate(&self, slot_id: &str) -> EngineResult<()> {
        if self.names.iter().any(|n| n == slot_id) {
            Ok(())
        } else {
            Err(EngineError::not_found(format!("slot '{slot_id}'")))
        }
    }

    /// Replace the cache with persisted rows. Rows for unknown slots are skipped.
    pub fn load(&mut self, rows: Vec<StmSlot>) {
        self.slots.clear();
        for row in rows {
            if self.validate(&row.slot_id).is_err() {
                warn!(
                    "[ledger:slots] Ignoring persisted slot '{}' (not configured)",
                    row.slot_id
                );
                continue;
            }
            self.slots.insert(row.slot_id.clone(), row);
        }
    }

    /// Current slot state. Never-written slots come back empty.
    pub fn get_head(&self, slot_id: &str) -> EngineResult<StmSlot> {
        self.validate(slot_id)?;
        Ok(self.slots.get(slot_id).cloned().unwrap_or_else(|| StmSlot {
            slot_id: slot_id.to_string(),
            head_hash: None,
            root: None,
            updated_at: String::new(),
        }))
    }

    /// Row to persist for pointing `slot_id` at `head_hash`.
    pub fn plan_head(
        &self,
        slot_id: &str,
        head: Option<(&str, &str)>,
        now: &str,
    ) -> EngineResult<StmSlot> {
        self.validate(slot_id)?;
        Ok(StmSlot {
            slot_id: slot_id.to_string(),
            head_hash: head.map(|(hash, _)| hash.to_string()),
            root: head.map(|(_, root)| root.to_string()),
            updated_at: now.to_string(),
        })
    }

    /// Install a committed row.
    pub fn apply(&mut self, slot: StmSlot) {
        self.slots.insert(slot.slot_id.clone(), slot);
    }

    /// All configured slots in configuration order.
    pub fn list(&self) -> Vec<StmSlot> {
        self.names
            .iter()
            .filter_map(|n| self.get_head(n).ok())
            .collect()
    }

    pub fn in_use(&self) -> usize {
        self.slots.values().filter(|s| s.head_hash.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SlotManager {
        SlotManager::new(&["A".to_string(), "B".to_string()])
    }

    #[test]
    fn test_unknown_slot_is_not_found() {
        let m = manager();
        assert!(matches!(m.get_head("Z"), Err(EngineError::NotFound(_))));
        assert!(m.plan_head("Z", None, "now").is_err());
    }

    #[test]
    fn test_empty_slot_then_set() {
        let mut m = manager();
        assert_eq!(m.get_head("A").unwrap().head_hash, None);

        let row = m.plan_head("A", Some(("h1", "r1")), "t1").unwrap();
        m.apply(row);
        let a = m.get_head("A").unwrap();
        assert_eq!(a.head_hash.as_deref(), Some("h1"));
        assert_eq!(a.root.as_deref(), Some("r1"));
        assert_eq!(m.in_use(), 1);

        let listed: Vec<String> = m.list().into_iter().map(|s| s.slot_id).collect();
        assert_eq!(listed, vec!["A", "B"]);
    }

    #[test]
    fn test_load_skips_unconfigured_rows() {
        let mut m = manager();
        m.load(vec![
            StmSlot {
                slot_id: "A".into(),
                head_hash: Some("h".into()),
                root: Some("r".into()),
                updated_at: "t".into(),
            },
            StmSlot {
                slot_id: "Q".into(),
                head_hash: Some("h".into()),
                root: None,
                updated_at: "t".into(),
            },
        ]);
        assert_eq!(m.in_use(), 1);
    }
}
