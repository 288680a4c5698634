// End-to-end ledger behaviour against file-backed (WAL) and in-memory stores.

use paw_ledger::{
    BlockInput, ChainReport, Embedding, EmbeddingProvider, EngineError, EngineResult, LedgerConfig,
    MemoryLedger, RangeQuery, SearchRequest, SearchSource, SearchType, SortBy, SortOrder,
    ViolationKind,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

// ── Helpers ────────────────────────────────────────────────────────────────

fn emb(v: &[f32]) -> Embedding {
    Embedding::new("test-model", v.to_vec())
}

fn memory_ledger() -> MemoryLedger {
    MemoryLedger::open_in_memory(LedgerConfig::default()).unwrap()
}

fn file_ledger(dir: &tempfile::TempDir, config: LedgerConfig) -> MemoryLedger {
    MemoryLedger::open(dir.path().join("ledger.db"), config).unwrap()
}

fn raw_conn(dir: &tempfile::TempDir) -> rusqlite::Connection {
    rusqlite::Connection::open(dir.path().join("ledger.db")).unwrap()
}

fn violation(report: &ChainReport) -> (u64, ViolationKind) {
    let v = report.first_violation.clone().expect("expected a violation");
    (v.block_index, v.kind)
}

/// Deterministic bag-of-letters embedding.
struct LetterEmbedder;

impl EmbeddingProvider for LetterEmbedder {
    fn model_id(&self) -> &str {
        "letters-26"
    }

    fn embed(&self, text: &str) -> EngineResult<Embedding> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_ascii_lowercase().bytes() {
            if c.is_ascii_lowercase() {
                v[(c - b'a') as usize] += 1.0;
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            return Err(EngineError::validation("nothing to embed"));
        }
        Ok(Embedding::new("letters-26", v))
    }
}

// ── Hash chain ─────────────────────────────────────────────────────────────

#[test]
fn indices_are_contiguous_from_origin() {
    let config = LedgerConfig {
        index_origin: 100,
        ..LedgerConfig::default()
    };
    let ledger = MemoryLedger::open_in_memory(config).unwrap();
    let slots = ["A", "B", "C"];
    let mut indices = Vec::new();
    for i in 0..12 {
        let mut input = BlockInput::new(format!("note number {i}"));
        if i % 4 != 3 {
            input = input.slot(slots[i % 3]);
        }
        indices.push(ledger.add_block(input).unwrap().block_index);
    }
    assert_eq!(indices, (100..112).collect::<Vec<u64>>());

    let report = ledger.verify_chain().unwrap();
    assert!(report.is_valid());
    assert_eq!(report.blocks_checked, 12);

    let page = ledger
        .range(&RangeQuery {
            start: Some(104),
            end: Some(107),
            ..RangeQuery::default()
        })
        .unwrap();
    let got: Vec<u64> = page.iter().map(|b| b.block_index).collect();
    assert_eq!(got, vec![104, 105, 106, 107]);
}

#[test]
fn failed_writes_leave_no_gap() {
    let ledger = memory_ledger();
    ledger.add_block(BlockInput::new("one")).unwrap();
    assert!(ledger.add_block(BlockInput::new("   ")).is_err());
    assert!(ledger
        .add_block(BlockInput::new("bad").importance(1.5))
        .is_err());
    assert!(ledger.add_block(BlockInput::new("x").slot("Z")).is_err());
    let two = ledger.add_block(BlockInput::new("two")).unwrap();
    assert_eq!(two.block_index, 1);
    assert!(ledger.verify_chain().unwrap().is_valid());
}

#[test]
fn tampered_hash_is_reported_at_its_block() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_ledger(&dir, LedgerConfig::default());
    for i in 0..5 {
        ledger.add_block(BlockInput::new(format!("entry {i}"))).unwrap();
    }
    assert!(ledger.verify_chain().unwrap().is_valid());

    raw_conn(&dir)
        .execute(
            "UPDATE blocks SET hash = ?1 WHERE block_index = 2",
            ["f".repeat(64)],
        )
        .unwrap();

    let (at, kind) = violation(&ledger.verify_chain().unwrap());
    assert_eq!(at, 2);
    assert_eq!(kind, ViolationKind::HashMismatch);
}

#[test]
fn tampered_prev_hash_is_reported_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ledger = file_ledger(&dir, LedgerConfig::default());
        for i in 0..4 {
            ledger
                .add_block(BlockInput::new(format!("entry {i}")).slot("A"))
                .unwrap();
        }
        ledger.close().unwrap();
    }
    raw_conn(&dir)
        .execute(
            "UPDATE blocks SET prev_hash = ?1 WHERE block_index = 3",
            ["0".repeat(64)],
        )
        .unwrap();

    let ledger = file_ledger(&dir, LedgerConfig::default());
    let (at, kind) = violation(&ledger.verify_chain().unwrap());
    assert_eq!(at, 3);
    assert_eq!(kind, ViolationKind::PrevHashMismatch);
}

/// Four slot-A blocks forming one chain 0 → 1 → 2 → 3, then closed.
fn chained_ledger_on_disk() -> (tempfile::TempDir, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_ledger(&dir, LedgerConfig::default());
    let hashes = (0..4)
        .map(|i| {
            ledger
                .add_block(BlockInput::new(format!("step {i}")).slot("A"))
                .unwrap()
                .hash
        })
        .collect();
    assert!(ledger.verify_chain().unwrap().is_valid());
    ledger.close().unwrap();
    (dir, hashes)
}

/// Run raw SQL against the closed ledger, reopen it, and verify.
fn verify_after_tamper(dir: &tempfile::TempDir, sql: &[&str]) -> (u64, ViolationKind) {
    let conn = raw_conn(dir);
    for stmt in sql {
        conn.execute_batch(stmt).unwrap();
    }
    drop(conn);
    let ledger = file_ledger(dir, LedgerConfig::default());
    violation(&ledger.verify_chain().unwrap())
}

#[test]
fn reopen_survives_a_rewritten_parent_hash() {
    let (dir, _) = chained_ledger_on_disk();
    let (at, kind) = verify_after_tamper(
        &dir,
        &["UPDATE blocks SET hash = 'ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff' WHERE block_index = 1"],
    );
    assert_eq!(at, 1);
    assert_eq!(kind, ViolationKind::HashMismatch);

    // The damaged ledger still serves reads.
    let ledger = file_ledger(&dir, LedgerConfig::default());
    assert_eq!(ledger.stats().unwrap().blocks, 4);
    assert_eq!(ledger.get_block(2).unwrap().block_index, 2);
}

#[test]
fn deleted_row_is_reported_as_index_gap() {
    let (dir, _) = chained_ledger_on_disk();
    let (at, kind) = verify_after_tamper(
        &dir,
        &[
            "DELETE FROM block_keywords WHERE block_index = 2",
            "DELETE FROM block_tags WHERE block_index = 2",
            "DELETE FROM block_embeddings WHERE block_index = 2",
            "DELETE FROM blocks WHERE block_index = 2",
        ],
    );
    assert_eq!(at, 3);
    assert_eq!(kind, ViolationKind::IndexGap { expected: 2 });
}

#[test]
fn dangling_before_is_reported_as_missing_parent() {
    let (dir, _) = chained_ledger_on_disk();
    let (at, kind) = verify_after_tamper(
        &dir,
        &["UPDATE blocks SET before_hash = 'nowhere' WHERE block_index = 2"],
    );
    // Block 1 still lists block 2 as a child; the dangling link is reported first.
    assert_eq!(at, 2);
    assert_eq!(kind, ViolationKind::MissingParent);
}

#[test]
fn dropped_child_link_is_reported_at_the_child() {
    let (dir, _) = chained_ledger_on_disk();
    let (at, kind) = verify_after_tamper(
        &dir,
        &["UPDATE blocks SET after_hashes = '[]' WHERE block_index = 1"],
    );
    assert_eq!(at, 2);
    assert_eq!(kind, ViolationKind::ParentLinkMissing);
}

#[test]
fn rewritten_depth_is_reported() {
    let (dir, _) = chained_ledger_on_disk();
    let (at, kind) = verify_after_tamper(
        &dir,
        &["UPDATE blocks SET branch_depth = 7 WHERE block_index = 2"],
    );
    assert_eq!(at, 2);
    assert_eq!(kind, ViolationKind::DepthMismatch);
}

#[test]
fn rewritten_root_is_reported() {
    let (dir, hashes) = chained_ledger_on_disk();
    let stmt = format!(
        "UPDATE blocks SET root = '{}' WHERE block_index = 2",
        hashes[3]
    );
    let (at, kind) = verify_after_tamper(&dir, &[stmt.as_str()]);
    assert_eq!(at, 2);
    assert_eq!(kind, ViolationKind::RootMismatch);
}

#[test]
fn foreign_child_in_after_list_is_reported_at_the_parent() {
    let (dir, hashes) = chained_ledger_on_disk();
    let stmt = format!(
        "UPDATE blocks SET after_hashes = '[\"{}\"]' WHERE block_index = 3",
        hashes[1]
    );
    let (at, kind) = verify_after_tamper(&dir, &[stmt.as_str()]);
    assert_eq!(at, 3);
    assert_eq!(kind, ViolationKind::ChildLinkMismatch);
}

#[test]
fn negative_zero_importance_verifies_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ledger = file_ledger(&dir, LedgerConfig::default());
        let block = ledger
            .add_block(BlockInput::new("neutral note").importance(-0.0))
            .unwrap();
        assert!(block.importance.is_sign_positive());
        ledger.add_block(BlockInput::new("next note")).unwrap();
        assert!(ledger.verify_chain().unwrap().is_valid());
        ledger.close().unwrap();
    }
    let ledger = file_ledger(&dir, LedgerConfig::default());
    assert_eq!(ledger.get_block(0).unwrap().importance, 0.0);
    assert!(ledger.verify_chain().unwrap().is_valid());
}

#[test]
fn hash_ignores_keywords_tags_and_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_ledger(&dir, LedgerConfig::default());
    let block = ledger
        .add_block(
            BlockInput::new("deploy checklist")
                .keywords(["deploy"])
                .tags(["ops"])
                .embedding(emb(&[0.1, 0.2, 0.3])),
        )
        .unwrap();

    let conn = raw_conn(&dir);
    conn.execute("DELETE FROM block_keywords", []).unwrap();
    conn.execute("DELETE FROM block_tags", []).unwrap();
    conn.execute(
        "UPDATE block_embeddings SET embedding_model = 'swapped'",
        [],
    )
    .unwrap();

    let reread = ledger.get_block(block.block_index).unwrap();
    assert_eq!(reread.hash, block.hash);
    assert!(reread.keywords.is_empty());
    assert!(ledger.verify_chain().unwrap().is_valid());
}

// ── Branching ──────────────────────────────────────────────────────────────

#[test]
fn similar_embeddings_share_a_branch_and_orthogonal_starts_one() {
    let ledger = memory_ledger();
    let first = ledger
        .add_block(BlockInput::new("rust ownership").embedding(emb(&[1.0, 0.0, 0.0])))
        .unwrap();
    // cos = 0.95
    let second = ledger
        .add_block(
            BlockInput::new("rust borrowing").embedding(emb(&[0.95, 0.312_25, 0.0])),
        )
        .unwrap();
    let third = ledger
        .add_block(BlockInput::new("sourdough starter").embedding(emb(&[0.0, 0.0, 1.0])))
        .unwrap();

    assert_eq!(second.root, first.hash);
    assert_eq!(second.before, first.hash);
    assert_eq!(second.branch_depth, 1);
    assert_eq!(third.root, third.hash);
    assert_eq!(ledger.list_branches().unwrap().len(), 2);
    assert_eq!(
        ledger.branch_members(&first.hash).unwrap(),
        vec![first.block_index, second.block_index]
    );
    assert!(ledger.verify_chain().unwrap().is_valid());
}

#[test]
fn near_duplicate_branches_merge_without_touching_hashes() {
    let mut config = LedgerConfig::default();
    config.branch.evaluation_window = 2;
    let ledger = MemoryLedger::open_in_memory(config).unwrap();

    let mut written = Vec::new();
    for i in 0..20 {
        let (slot, v) = if i % 2 == 0 {
            ("A", [1.0, 0.01 * i as f32, 0.0])
        } else {
            ("B", [0.99, 0.01 * i as f32, 0.02])
        };
        let block = ledger
            .add_block(BlockInput::new(format!("duplicate thought {i}")).slot(slot).embedding(emb(&v)))
            .unwrap();
        written.push(block);
    }

    let root_a = written[0].hash.clone();
    let root_b = written[1].hash.clone();
    assert_eq!(ledger.list_branches().unwrap().len(), 1);
    let survivor = ledger.resolve_branch(&root_a).unwrap();
    assert_eq!(ledger.resolve_branch(&root_b).unwrap(), survivor);

    let members = ledger.branch_members(&root_b).unwrap();
    assert_eq!(members.len(), 20);
    let meta = ledger.list_branches().unwrap().remove(0);
    assert_eq!(meta.size, 20);

    for block in &written {
        let stored = ledger.get_block(block.block_index).unwrap();
        assert_eq!(stored.hash, block.hash);
        assert_eq!(stored.root, block.root);
    }
    assert!(ledger.verify_chain().unwrap().is_valid());

    // Slot B keeps writing into its literal root; the branch stays merged.
    let more = ledger
        .add_block(BlockInput::new("after merge").slot("B").embedding(emb(&[1.0, 0.0, 0.0])))
        .unwrap();
    assert_eq!(more.root, root_b);
    assert_eq!(ledger.list_branches().unwrap()[0].size, 21);
}

// ── Search ─────────────────────────────────────────────────────────────────

/// Counts words per topic, so texts on one theme share a direction.
struct TopicEmbedder;

const TOPICS: [&[&str]; 4] = [
    &[
        "user", "authentication", "service", "login", "endpoint", "jwt", "password",
        "validation", "session", "token", "refresh", "oauth", "provider", "callback",
    ],
    &["grocery", "list", "apples", "flour", "tomato", "pasta", "recipe", "favourite"],
    &["weekend", "hiking", "trail", "notes", "planting", "schedule"],
    &["guitar", "chord", "progressions"],
];

impl EmbeddingProvider for TopicEmbedder {
    fn model_id(&self) -> &str {
        "topics-4"
    }

    fn embed(&self, text: &str) -> EngineResult<Embedding> {
        let mut v = vec![0.0f32; TOPICS.len()];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            for (dim, vocab) in TOPICS.iter().enumerate() {
                if vocab.contains(&word) {
                    v[dim] += 1.0;
                }
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            return Err(EngineError::validation("no topical words"));
        }
        Ok(Embedding::new("topics-4", v))
    }
}

/// Five coherent blocks in slot A, five unrelated ones in slot B. Nothing
/// beyond the contents is supplied; vectors come from the provider.
fn auth_scenario() -> (MemoryLedger, HashSet<u64>) {
    let ledger = memory_ledger().with_embedding_provider(Arc::new(TopicEmbedder));
    let mut slot_a = HashSet::new();
    for ctx in [
        "user authentication service",
        "login endpoint with JWT",
        "password validation",
        "session token refresh",
        "oauth provider callback",
    ] {
        let block = ledger.add_block(BlockInput::new(ctx).slot("A")).unwrap();
        slot_a.insert(block.block_index);
    }
    for ctx in [
        "grocery list: apples and flour",
        "weekend hiking trail notes",
        "guitar chord progressions",
        "tomato planting schedule",
        "favourite pasta recipe",
    ] {
        ledger.add_block(BlockInput::new(ctx).slot("B")).unwrap();
    }
    (ledger, slot_a)
}

#[test]
fn local_search_stays_inside_the_slot_branch() {
    let (ledger, slot_a) = auth_scenario();
    let resp = ledger
        .search(SearchRequest::new("authentication", "A").depth(3).fallback(true))
        .unwrap();

    assert!(!resp.results.is_empty());
    assert!(!resp.meta.fallback_used);
    assert!(!resp.meta.jumped);
    assert_eq!(resp.meta.search_type, SearchType::Local);
    assert!(resp.meta.hops <= 3);
    for hit in &resp.results {
        assert!(slot_a.contains(&hit.block.block_index));
        assert_eq!(hit.source, SearchSource::Local);
        assert!(hit.hops <= 3);
        assert!(hit.breakdown.content_similarity > 0.99);
    }
    // Only the head's first three ancestors are in reach.
    assert_eq!(resp.results.len(), 4);
    assert!(resp.results.iter().all(|h| h.block.block_index != 0));
}

#[test]
fn search_from_unrelated_slot_jumps_to_global() {
    let (ledger, slot_a) = auth_scenario();
    let resp = ledger
        .search(SearchRequest::new("authentication", "B").depth(3).fallback(true))
        .unwrap();

    assert!(resp.meta.jumped);
    assert!(resp.meta.fallback_used);
    assert_eq!(resp.meta.search_type, SearchType::Global);
    assert_eq!(
        resp.meta.keyword_weight,
        Some(LedgerConfig::default().hybrid.keyword_weight)
    );
    assert_eq!(resp.results.len(), 5);
    for hit in &resp.results {
        assert!(slot_a.contains(&hit.block.block_index));
        assert_eq!(hit.source, SearchSource::Global);
        assert_eq!(hit.hops, 0);
    }

    let metrics = ledger.get_metrics();
    assert_eq!(metrics.total_searches, 1);
    assert_eq!(metrics.jump_count, 1);
    assert_eq!(metrics.useful_jumps, 1);
    assert!(ledger.jump_stats().success_rate > LedgerConfig::default().jump.initial_success_rate);
}

#[test]
fn without_fallback_unrelated_slot_returns_nothing() {
    let (ledger, _) = auth_scenario();
    let resp = ledger
        .search(SearchRequest::new("authentication", "B"))
        .unwrap();
    assert!(resp.results.is_empty());
    assert!(!resp.meta.jumped);
    assert_eq!(ledger.get_metrics().graph_hits, 0);
}

#[test]
fn empty_slot_always_jumps() {
    let (ledger, _) = auth_scenario();
    for _ in 0..5 {
        let resp = ledger
            .search(SearchRequest::new("unmatched words entirely", "C").fallback(true))
            .unwrap();
        assert!(resp.meta.jumped);
        assert!(resp.results.is_empty());
    }
    // Five wasted jumps push the rate down; zero results still jump.
    assert!(ledger.jump_stats().success_rate < 0.5);
}

#[test]
fn local_search_is_deterministic() {
    let ledger = memory_ledger();
    for i in 0..8 {
        ledger
            .add_block(
                BlockInput::new(format!("cache eviction policy note {i}"))
                    .keywords(["cache"])
                    .slot("A"),
            )
            .unwrap();
    }
    let request = SearchRequest::new("cache eviction", "A").depth(4).k(4);
    let order = |r: &paw_ledger::SearchResponse| -> Vec<u64> {
        r.results.iter().map(|h| h.block.block_index).collect()
    };
    let first = ledger.search(request.clone()).unwrap();
    let second = ledger.search(request).unwrap();
    assert_eq!(first.results.len(), 4);
    assert_eq!(order(&first), order(&second));
}

#[test]
fn hybrid_ranking_is_monotonic_in_keyword_weight() {
    let ledger = memory_ledger();
    let lexical = ledger
        .add_block(BlockInput::new("kubernetes pod restarts").embedding(emb(&[0.0, 1.0])))
        .unwrap();
    let semantic = ledger
        .add_block(BlockInput::new("container orchestration crash loop").embedding(emb(&[1.0, 0.0])))
        .unwrap();
    let query = emb(&[1.0, 0.0]);

    let mut last_rank = usize::MAX;
    for w in [0.0, 0.25, 0.5, 0.75, 1.0] {
        let ranked = ledger
            .search_hybrid("kubernetes", Some(&query), 10, Some(w))
            .unwrap();
        let rank = ranked
            .iter()
            .position(|r| r.block_index == lexical.block_index)
            .unwrap_or(usize::MAX);
        assert!(rank <= last_rank, "weight {w} moved lexical match down");
        last_rank = rank;
    }
    let pure_vector = ledger
        .search_hybrid("kubernetes", Some(&query), 10, Some(0.0))
        .unwrap();
    assert_eq!(pure_vector[0].block_index, semantic.block_index);
    let pure_keyword = ledger
        .search_hybrid("kubernetes", Some(&query), 10, Some(1.0))
        .unwrap();
    assert_eq!(pure_keyword[0].block_index, lexical.block_index);

    assert!(matches!(
        ledger.search_hybrid("kubernetes", None, 10, Some(1.5)),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn search_counts_visits() {
    let (ledger, _) = auth_scenario();
    let resp = ledger
        .search(SearchRequest::new("authentication", "A"))
        .unwrap();
    let idx = resp.results[0].block.block_index;
    let block = ledger.get_block(idx).unwrap();
    assert_eq!(block.visit_count, 1);
    assert!(block.last_seen_at.is_some());
}

#[test]
fn unknown_slot_is_not_found() {
    let ledger = memory_ledger();
    assert!(matches!(
        ledger.search(SearchRequest::new("q", "nope")),
        Err(EngineError::NotFound(_))
    ));
}

// ── Persistence & concurrency ──────────────────────────────────────────────

#[test]
fn slots_and_branches_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (head_a, root_b) = {
        let ledger = file_ledger(&dir, LedgerConfig::default());
        ledger.add_block(BlockInput::new("a1").slot("A")).unwrap();
        let a2 = ledger.add_block(BlockInput::new("a2").slot("A")).unwrap();
        let b1 = ledger.add_block(BlockInput::new("b1").slot("B")).unwrap();
        ledger.close().unwrap();
        (a2.hash, b1.root)
    };

    let ledger = file_ledger(&dir, LedgerConfig::default());
    assert_eq!(ledger.get_head("A").unwrap().head_hash, Some(head_a.clone()));
    assert_eq!(ledger.get_head("B").unwrap().root, Some(root_b));
    assert_eq!(ledger.list_branches().unwrap().len(), 2);

    let a3 = ledger.add_block(BlockInput::new("a3").slot("A")).unwrap();
    assert_eq!(a3.block_index, 3);
    assert_eq!(a3.before, head_a);
    assert_eq!(a3.branch_depth, 2);

    let stats = ledger.stats().unwrap();
    assert_eq!(stats.blocks, 4);
    assert_eq!(stats.slots_in_use, 2);
    assert_eq!(stats.last_block_index, Some(3));
    assert!(ledger.verify_chain().unwrap().is_valid());
}

#[test]
fn second_handle_sees_writes_from_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let writer = file_ledger(&dir, LedgerConfig::default());
    let reader = file_ledger(&dir, LedgerConfig::default());

    let first = writer
        .add_block(BlockInput::new("shared memory segment").slot("A"))
        .unwrap();
    assert_eq!(reader.get_head("A").unwrap().head_hash, Some(first.hash.clone()));

    let second = reader
        .add_block(BlockInput::new("continued elsewhere").slot("A"))
        .unwrap();
    assert_eq!(second.block_index, 1);
    assert_eq!(second.before, first.hash);

    let resp = writer
        .search(SearchRequest::new("continued", "A"))
        .unwrap();
    assert_eq!(resp.results[0].block.block_index, 1);
    assert!(writer.verify_chain().unwrap().is_valid());
}

#[test]
fn slot_rewound_by_another_handle_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let ours = file_ledger(&dir, LedgerConfig::default());
    let theirs = file_ledger(&dir, LedgerConfig::default());

    let plan = ours
        .add_block(BlockInput::new("plan the schema migration").slot("A"))
        .unwrap();
    ours.add_block(BlockInput::new("migration step one failed").slot("A"))
        .unwrap();
    // No block is appended, only the slot row moves.
    theirs.set_head("A", &plan.hash).unwrap();

    let retry = ours
        .add_block(BlockInput::new("migration, second attempt").slot("A"))
        .unwrap();
    assert_eq!(retry.before, plan.hash);
    assert_eq!(retry.branch_depth, 1);
    assert_eq!(ours.get_head("A").unwrap().head_hash, Some(retry.hash.clone()));
    assert_eq!(ours.get_block(0).unwrap().after.len(), 2);
    assert!(ours.verify_chain().unwrap().is_valid());
}

#[test]
fn branch_merged_by_another_process_does_not_fail_the_write() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_ledger(&dir, LedgerConfig::default());
    let alpha = ledger.add_block(BlockInput::new("alpha thread").slot("A")).unwrap();
    let beta = ledger.add_block(BlockInput::new("beta thread").slot("B")).unwrap();
    assert_eq!(ledger.list_branches().unwrap().len(), 2);

    // Another process retires A's branch into B's.
    let conn = raw_conn(&dir);
    conn.execute(
        "INSERT INTO branch_aliases (retired, survivor, merged_at) VALUES (?1, ?2, ?3)",
        [alpha.hash.as_str(), beta.hash.as_str(), "2026-01-01T00:00:00.000Z"],
    )
    .unwrap();
    conn.execute("DELETE FROM branch_meta WHERE root = ?1", [alpha.hash.as_str()])
        .unwrap();
    drop(conn);

    let next = ledger
        .add_block(BlockInput::new("alpha continues").slot("A"))
        .unwrap();
    assert_eq!(next.before, alpha.hash);
    assert_eq!(next.root, alpha.hash);
    assert_eq!(ledger.resolve_branch(&alpha.hash).unwrap(), beta.hash);

    let branches = ledger.list_branches().unwrap();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].root, beta.hash);
    assert_eq!(branches[0].size, 2);
    assert!(ledger.verify_chain().unwrap().is_valid());
}

#[test]
fn concurrent_writers_keep_the_chain_intact() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(file_ledger(&dir, LedgerConfig::default()));
    let handles: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(|slot| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for i in 0..10 {
                    ledger
                        .add_block(BlockInput::new(format!("{slot} step {i}")).slot(slot))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let all = ledger
        .range(&RangeQuery {
            limit: 100,
            ..RangeQuery::default()
        })
        .unwrap();
    let indices: Vec<u64> = all.iter().map(|b| b.block_index).collect();
    assert_eq!(indices, (0..40).collect::<Vec<u64>>());
    assert_eq!(ledger.list_branches().unwrap().len(), 4);
    assert!(ledger.verify_chain().unwrap().is_valid());
}

// ── Collaborators & exports ────────────────────────────────────────────────

#[test]
fn embedding_provider_fills_missing_vectors() {
    let ledger = memory_ledger().with_embedding_provider(Arc::new(LetterEmbedder));
    let block = ledger.add_block(BlockInput::new("abc abc").slot("A")).unwrap();
    let vector = block.embedding.expect("provider embedding");
    assert_eq!(vector.model_id, "letters-26");
    assert_eq!(vector.dimension, 26);

    // Digits only: the provider fails and the block is stored without one.
    let bare = ledger.add_block(BlockInput::new("12345").slot("A")).unwrap();
    assert!(bare.embedding.is_none());

    assert_eq!(ledger.get_all_embeddings().unwrap().len(), 1);
    assert_eq!(ledger.stats().unwrap().embedding_groups, 1);

    let links = ledger.get_existing_links().unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].parent_index, 0);
    assert_eq!(links[0].child_index, 1);
}

#[test]
fn importance_filter_and_rebuild() {
    let ledger = memory_ledger();
    for (i, imp) in [0.1, 0.9, 0.5, 0.95].into_iter().enumerate() {
        ledger
            .add_block(BlockInput::new(format!("weighted {i}")).importance(imp))
            .unwrap();
    }
    let top = ledger.filter_by_importance(0.5, 10, SortOrder::Desc).unwrap();
    let got: Vec<u64> = top.iter().map(|b| b.block_index).collect();
    assert_eq!(got, vec![3, 1, 2]);

    let by_importance = ledger
        .range(&RangeQuery {
            sort_by: SortBy::Importance,
            order: SortOrder::Desc,
            limit: 2,
            ..RangeQuery::default()
        })
        .unwrap();
    assert_eq!(by_importance[0].block_index, 3);

    assert_eq!(ledger.rebuild_global_index().unwrap(), 4);
    let hits = ledger.search_keywords(&["weighted".to_string()], 10).unwrap();
    assert_eq!(hits.len(), 4);
}
