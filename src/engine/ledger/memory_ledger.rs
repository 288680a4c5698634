// ── Ledger: MemoryLedger ────────────────────────────────────────────────────
//
// The explicit handle callers hold. Owns the store, the in-memory caches and
// the process-local learning state; constructed once, torn down by close().
//
// Write path (fully serialized by the state write-lock + BEGIN IMMEDIATE):
//   validate → catch up → assign_branch → plan route
//   → tx { recheck tip/slot/meta, hash, insert block, link parent,
//          branch meta, slot head }   (stale plan → catch up, replan)
//   → apply caches → periodic merge round (own transaction)
//
// Read path (shared lock; may miss an in-flight write):
//   catch up → local DFS → maybe jump → global hybrid → merge
//   → visit bookkeeping (best effort) → metrics
//
// Lock order is always state lock, then connection lock.

use super::branch_index::{short, BranchIndex};
use super::global_index::{default_vector_factory, GlobalIndex, VectorIndexFactory};
use super::hybrid_search::resolve_keyword_weight;
use super::jump_optimizer::{estimate_complexity, JumpOptimizer};
use super::local_search::{self, LocalQuery};
use super::metrics::{MetricsCollector, SearchSample};
use super::slot_manager::SlotManager;
use super::tokenizer::{self, SimpleKeywordExtractor};
use super::topology::Topology;
use crate::atoms::constants::GENESIS_PREV_HASH;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ledger_types::{
    BlockInput, BlockLink, BranchAssignment, BranchMeta, ChainReport, Embedding, JumpStats,
    LedgerConfig, LedgerStats, MemoryBlock, RangeQuery, RankedBlock, ScoreBreakdown, SearchHit,
    SearchMeta, SearchMetrics, SearchRequest, SearchResponse, SearchSource, SearchType, SortOrder,
    StmSlot,
};
use crate::atoms::traits::{EmbeddingProvider, KeywordExtractor};
use crate::engine::store::blocks::{self, IndexRow, TopologyRow};
use crate::engine::store::{branches, chain, slots, LedgerStore};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

struct LedgerState {
    topology: Topology,
    branches: BranchIndex,
    slots: SlotManager,
    global: GlobalIndex,
}

/// Where a new block attaches.
enum Route {
    NewBranch,
    Child {
        parent_hash: String,
        parent_depth: u32,
        root: String,
    },
}

/// Branch-aware, hash-chained memory ledger.
pub struct MemoryLedger {
    store: LedgerStore,
    config: LedgerConfig,
    state: RwLock<LedgerState>,
    jump: Mutex<JumpOptimizer>,
    metrics: Mutex<MetricsCollector>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    extractor: Arc<dyn KeywordExtractor>,
}

impl MemoryLedger {
    // ═══════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Open (or create) a file-backed ledger and replay its state.
    pub fn open(path: impl AsRef<Path>, config: LedgerConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = LedgerStore::open(path.as_ref(), &config.store)?;
        Self::from_store(store, config)
    }

    /// Private in-memory ledger (tests, ephemeral agents).
    pub fn open_in_memory(config: LedgerConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = LedgerStore::open_in_memory(&config.store)?;
        Self::from_store(store, config)
    }

    fn from_store(store: LedgerStore, config: LedgerConfig) -> EngineResult<Self> {
        let state = LedgerState {
            topology: Topology::new(config.index_origin),
            branches: BranchIndex::new(config.branch.clone()),
            slots: SlotManager::new(&config.slots),
            global: GlobalIndex::new(default_vector_factory()),
        };
        let ledger = Self {
            store,
            state: RwLock::new(state),
            jump: Mutex::new(JumpOptimizer::new(config.jump.clone())),
            metrics: Mutex::new(MetricsCollector::new()),
            embedder: None,
            extractor: Arc::new(SimpleKeywordExtractor),
            config,
        };
        {
            let mut st = ledger.state.write();
            ledger.catch_up_locked(&mut st, true)?;
            info!(
                "[ledger] Ledger ready: {} blocks, {} branches, {} active slots",
                st.topology.len(),
                st.branches.len(),
                st.slots.in_use()
            );
        }
        Ok(ledger)
    }

    /// Embed block contexts and queries that arrive without a vector.
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    /// Replace the default keyword extractor.
    pub fn with_keyword_extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Swap the vector search strategy and re-index every block with it.
    pub fn with_vector_index(self, factory: VectorIndexFactory) -> EngineResult<Self> {
        {
            let mut st = self.state.write();
            st.global = GlobalIndex::new(factory);
            let rows = self.store.read(|conn| blocks::index_rows_since(conn, None))?;
            st.global.rebuild(rows);
        }
        Ok(self)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Flush and close the underlying store.
    pub fn close(self) -> EngineResult<()> {
        info!("[ledger] Closing ledger");
        self.store.close()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Cache freshness
    // ═══════════════════════════════════════════════════════════════════

    /// Pull rows appended since the caches were last filled (possibly by
    /// another process). `force` reloads metas, aliases and slots regardless.
    fn catch_up_locked(&self, st: &mut LedgerState, force: bool) -> EngineResult<bool> {
        let fresh = self.store.read(|conn| {
            let topo = blocks::topology_since(conn, st.topology.last_index())?;
            if topo.is_empty() && !force {
                return Ok(None);
            }
            let rows = blocks::index_rows_since(conn, st.global.last_index())?;
            let metas = branches::load_metas(conn)?;
            let aliases = branches::load_aliases(conn)?;
            let slot_rows = slots::load_slots(conn)?;
            Ok(Some((topo, rows, metas, aliases, slot_rows)))
        })?;

        let Some((topo, rows, metas, aliases, slot_rows)) = fresh else {
            return Ok(false);
        };
        if !topo.is_empty() {
            debug!("[ledger] Catching up {} blocks from store", topo.len());
        }
        st.topology.extend(topo)?;
        st.global.extend(rows);
        st.branches.load(metas, aliases);
        st.slots.load(slot_rows);
        Ok(true)
    }

    fn refresh(&self) -> EngineResult<()> {
        let behind = {
            let st = self.state.read();
            let cached = st.topology.last_index();
            self.store.read(blocks::max_index)? != cached
        };
        if behind {
            let mut st = self.state.write();
            self.catch_up_locked(&mut st, false)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Collaborators
    // ═══════════════════════════════════════════════════════════════════

    fn embed_text(&self, text: &str) -> Option<Embedding> {
        let provider = self.embedder.as_ref()?;
        match provider.embed(text).and_then(|e| e.validate().map(|_| e)) {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(
                    "[ledger] Embedding via {} failed, continuing without: {}",
                    provider.model_id(),
                    e
                );
                None
            }
        }
    }

    fn query_keywords(&self, text: &str) -> Vec<String> {
        tokenizer::normalize_labels(&self.extractor.extract(text))
            .into_iter()
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Write path
    // ═══════════════════════════════════════════════════════════════════

    /// Append a block. On any failure nothing is persisted. The route is
    /// re-checked inside the write transaction and re-planned from fresh
    /// caches when another process committed in between.
    pub fn add_block(&self, input: BlockInput) -> EngineResult<MemoryBlock> {
        input.validate()?;
        let embedding = match input.embedding {
            Some(ref e) => Some(e.clone()),
            None => self.embed_text(&input.context),
        };
        let keywords = if input.keywords.is_empty() {
            tokenizer::normalize_labels(&self.extractor.extract(&input.context))
        } else {
            tokenizer::normalize_labels(&input.keywords)
        };
        let tags = tokenizer::normalize_labels(&input.tags);
        let importance = chain::canonical_importance(input.importance);

        let mut guard = self.state.write();
        let st = &mut *guard;
        self.catch_up_locked(st, false)?;
        if let Some(ref slot_id) = input.slot {
            st.slots.validate(slot_id)?;
        }

        let mut replans = 0u32;
        let (assignment, block, meta, slot_row) = loop {
            let assignment = embedding.as_ref().map(|e| st.branches.assign_branch(e));
            let route = plan_route(st, input.slot.as_deref(), assignment.as_ref())?;
            let planned_tip = st.topology.last_index();
            let planned_head = match input.slot {
                Some(ref slot_id) => Some(st.slots.get_head(slot_id)?),
                None => None,
            };
            let now = chain::now_timestamp();
            let cache = &*st;

            let written = self.store.write(|tx| {
                // The route was planned from the caches; another process may
                // have committed since. Bail out before writing anything.
                let tip = blocks::tip(tx)?;
                if tip.as_ref().map(|(last, _)| *last) != planned_tip {
                    return Ok(None);
                }
                if let Some(ref planned) = planned_head {
                    let live = slots::load_slot(tx, &planned.slot_id)?;
                    if live.and_then(|row| row.head_hash) != planned.head_hash {
                        return Ok(None);
                    }
                }

                let (block_index, prev_hash) = match tip {
                    Some((last, hash)) => (last + 1, hash),
                    None => (self.config.index_origin, GENESIS_PREV_HASH.to_string()),
                };
                let hash =
                    chain::compute_block_hash(block_index, &now, &input.context, importance, &prev_hash)?;
                let (root, before, branch_depth) = match &route {
                    Route::NewBranch => (hash.clone(), String::new(), 0),
                    Route::Child {
                        parent_hash,
                        parent_depth,
                        root,
                    } => (root.clone(), parent_hash.clone(), parent_depth + 1),
                };

                let meta = if before.is_empty() {
                    BranchIndex::seed_meta(&hash, block_index, embedding.as_ref())
                } else {
                    let live_root = cache.branches.resolve(&root);
                    let Some(current) = branches::load_meta(tx, &live_root)? else {
                        // merged away after our catch-up
                        return Ok(None);
                    };
                    cache
                        .branches
                        .grow_meta(&current, &before, &hash, embedding.as_ref())
                };

                let block = MemoryBlock {
                    block_index,
                    timestamp: now.clone(),
                    context: input.context.clone(),
                    importance,
                    hash: hash.clone(),
                    prev_hash,
                    root: root.clone(),
                    before: before.clone(),
                    after: Vec::new(),
                    branch_depth,
                    keywords: keywords.clone(),
                    tags: tags.clone(),
                    embedding: embedding.clone(),
                    metadata: input.metadata.clone(),
                    visit_count: 0,
                    last_seen_at: None,
                };
                blocks::insert_block(tx, &block)?;
                if !before.is_empty() {
                    blocks::append_child(tx, &before, &hash)?;
                }
                branches::upsert_meta(tx, &meta)?;

                let slot_row = match input.slot {
                    Some(ref slot_id) => {
                        let head = Some((hash.as_str(), root.as_str()));
                        let row = cache.slots.plan_head(slot_id, head, &now)?;
                        slots::upsert_slot(tx, &row)?;
                        Some(row)
                    }
                    None => None,
                };
                Ok(Some((block, meta, slot_row)))
            })?;

            match written {
                Some((block, meta, slot_row)) => break (assignment, block, meta, slot_row),
                None if replans < self.config.store.max_write_retries => {
                    replans += 1;
                    debug!("[ledger] Store moved past the caches, replanning write ({})", replans);
                    self.catch_up_locked(st, true)?;
                }
                None => return Err(EngineError::Busy { attempts: replans + 1 }),
            }
        };

        // ── Committed: bring the caches forward ──────────────────────
        st.topology.push(TopologyRow {
            block_index: block.block_index,
            hash: block.hash.clone(),
            root: block.root.clone(),
            before: block.before.clone(),
            branch_depth: block.branch_depth,
            timestamp: block.timestamp.clone(),
        })?;
        st.global.insert(IndexRow {
            block_index: block.block_index,
            timestamp: block.timestamp.clone(),
            context: block.context.clone(),
            keywords: block.keywords.iter().cloned().collect(),
            embedding: block.embedding.clone(),
        });
        if let Some(row) = slot_row {
            st.slots.apply(row);
        }
        st.branches.observe_commit(meta, assignment.as_ref());

        debug!(
            "[ledger] Added block {} ({}) to branch {} at depth {}",
            block.block_index,
            short(&block.hash),
            short(&block.root),
            block.branch_depth
        );

        if st.branches.merge_due() {
            self.run_merge_round(st, block.block_index);
        }
        Ok(block)
    }

    /// Evaluate merge confidence and persist the round. A failed round is
    /// logged; the block that triggered it is already committed.
    fn run_merge_round(&self, st: &mut LedgerState, at_index: u64) {
        let LedgerState {
            topology,
            branches: index,
            ..
        } = st;
        let eval = index.evaluate_merges(at_index, |root| topology.index_of(root));
        let now = chain::now_timestamp();
        let persisted = self.store.write(|tx| {
            if let Some(ref plan) = eval.merge {
                branches::insert_alias(tx, &plan.retired, &plan.survivor, &now)?;
                branches::delete_meta(tx, &plan.retired)?;
            }
            for meta in &eval.touched {
                branches::upsert_meta(tx, meta)?;
            }
            Ok(())
        });
        match persisted {
            Ok(()) => index.apply_evaluation(eval),
            Err(e) => warn!(
                "[ledger:branch] Merge round at block {} not persisted: {}",
                at_index, e
            ),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Block reads
    // ═══════════════════════════════════════════════════════════════════

    pub fn get_block(&self, block_index: u64) -> EngineResult<MemoryBlock> {
        self.store
            .read(|conn| blocks::get(conn, block_index))?
            .ok_or_else(|| EngineError::not_found(format!("block {block_index}")))
    }

    pub fn get_block_by_hash(&self, hash: &str) -> EngineResult<MemoryBlock> {
        self.store
            .read(|conn| blocks::get_by_hash(conn, hash))?
            .ok_or_else(|| EngineError::not_found(format!("block {hash}")))
    }

    pub fn range(&self, query: &RangeQuery) -> EngineResult<Vec<MemoryBlock>> {
        if let (Some(start), Some(end)) = (query.start, query.end) {
            if start > end {
                return Err(EngineError::validation(format!(
                    "range start {start} is after end {end}"
                )));
            }
        }
        self.store.read(|conn| blocks::range(conn, query))
    }

    pub fn filter_by_importance(
        &self,
        threshold: f64,
        limit: usize,
        order: SortOrder,
    ) -> EngineResult<Vec<MemoryBlock>> {
        if !threshold.is_finite() {
            return Err(EngineError::validation("importance threshold must be finite"));
        }
        self.store
            .read(|conn| blocks::filter_by_importance(conn, threshold, limit, order))
    }

    /// Full scan of the hash chain and branch tree.
    pub fn verify_chain(&self) -> EngineResult<ChainReport> {
        self.store
            .read(|conn| chain::verify_chain(conn, self.config.index_origin))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Search
    // ═══════════════════════════════════════════════════════════════════

    /// Local-first search from a slot, escalating to the global index when
    /// `fallback` is set and the jump policy asks for it.
    pub fn search(&self, request: SearchRequest) -> EngineResult<SearchResponse> {
        let started = Instant::now();
        let k = request.k.unwrap_or(self.config.search.default_k);
        if k == 0 {
            return Err(EngineError::validation("k must be at least 1"));
        }
        let depth = request.depth.unwrap_or(self.config.search.default_depth);
        if let Some(ref e) = request.embedding {
            e.validate()?;
        }
        self.refresh()?;

        let st = self.state.read();
        let slot = st.slots.get_head(&request.slot)?;
        let keywords = self.query_keywords(&request.query);
        let query_embedding = match request.embedding {
            Some(e) => Some(e),
            None => self.embed_text(&request.query),
        };
        let query = LocalQuery {
            keywords: &keywords,
            embedding: query_embedding.as_ref(),
            depth,
            k,
        };
        let now = local_search::recency_anchor(&st.topology);
        let local = self.store.read(|conn| {
            local_search::search(
                conn,
                &st.topology,
                &st.branches,
                &slot,
                &query,
                &self.config.search,
                now,
            )
        })?;

        let complexity = estimate_complexity(&request.query, &keywords);
        let mut meta = SearchMeta {
            search_type: SearchType::Local,
            hops: local.max_hops,
            visited: local.visited,
            fallback_used: false,
            jumped: false,
            query_complexity: complexity,
            keyword_weight: None,
            warning: None,
            latency_ms: 0,
        };
        let mut results = local.hits;

        let jumped = request.fallback && self.jump.lock().should_jump(results.len(), complexity);
        let mut useful_jump = false;
        if jumped {
            meta.jumped = true;
            let requested = resolve_keyword_weight(&request.query, &keywords, &self.config.hybrid);
            let weight =
                st.global
                    .effective_keyword_weight(&keywords, query_embedding.as_ref(), requested);
            let ranked = st.global.search_hybrid(
                &keywords,
                query_embedding.as_ref(),
                k,
                requested,
                self.config.hybrid.candidate_multiplier,
            );
            let ids: Vec<u64> = ranked.iter().map(|r| r.block_index).collect();
            match self.store.read(|conn| blocks::get_many(conn, &ids)) {
                Ok(loaded) => {
                    let added = append_global(&mut results, ranked, loaded, k);
                    useful_jump = added > 0;
                    meta.search_type = SearchType::Global;
                    meta.fallback_used = true;
                    meta.keyword_weight = Some(weight);
                    self.jump.lock().record_jump(useful_jump);
                }
                Err(e) => {
                    warn!(
                        "[ledger:search] Global index unavailable, returning local results: {}",
                        e
                    );
                    meta.warning = Some(format!("global index unavailable: {e}"));
                }
            }
        }
        drop(st);

        let seen: Vec<u64> = results.iter().map(|h| h.block.block_index).collect();
        if !seen.is_empty() {
            let now = chain::now_timestamp();
            if let Err(e) = self.store.write(|tx| blocks::record_visits(tx, &seen, &now)) {
                warn!("[ledger:search] Visit bookkeeping skipped: {}", e);
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        meta.latency_ms = latency_ms;
        self.metrics.lock().record(SearchSample {
            hops: meta.hops,
            jumped,
            useful_jump,
            local_hit: !jumped && !results.is_empty(),
            latency_ms,
        });
        debug!(
            "[ledger:search] slot={} results={} jumped={} useful={} {}ms",
            request.slot,
            results.len(),
            jumped,
            useful_jump,
            latency_ms
        );
        Ok(SearchResponse { results, meta })
    }

    /// TF-IDF ranking over the whole ledger.
    pub fn search_keywords(&self, keywords: &[String], limit: usize) -> EngineResult<Vec<RankedBlock>> {
        self.refresh()?;
        Ok(self.state.read().global.search_keywords(keywords, limit))
    }

    /// Cosine ranking within the embedding's model group.
    pub fn search_vector(&self, embedding: &Embedding, limit: usize) -> EngineResult<Vec<RankedBlock>> {
        embedding.validate()?;
        self.refresh()?;
        Ok(self.state.read().global.search_vector(embedding, limit))
    }

    /// Hybrid ranking over the whole ledger. `keyword_weight` defaults to the
    /// configured (or auto-detected) weight.
    pub fn search_hybrid(
        &self,
        query: &str,
        embedding: Option<&Embedding>,
        limit: usize,
        keyword_weight: Option<f64>,
    ) -> EngineResult<Vec<RankedBlock>> {
        let keywords = self.query_keywords(query);
        let weight = match keyword_weight {
            Some(w) if !(0.0..=1.0).contains(&w) => {
                return Err(EngineError::validation(format!(
                    "keyword_weight must be within [0, 1], got {w}"
                )))
            }
            Some(w) => w,
            None => resolve_keyword_weight(query, &keywords, &self.config.hybrid),
        };
        if let Some(e) = embedding {
            e.validate()?;
        }
        self.refresh()?;
        Ok(self.state.read().global.search_hybrid(
            &keywords,
            embedding,
            limit,
            weight,
            self.config.hybrid.candidate_multiplier,
        ))
    }

    pub fn get_metrics(&self) -> SearchMetrics {
        self.metrics.lock().snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.lock().reset();
    }

    pub fn jump_stats(&self) -> JumpStats {
        self.jump.lock().stats()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Slots
    // ═══════════════════════════════════════════════════════════════════

    pub fn get_head(&self, slot_id: &str) -> EngineResult<StmSlot> {
        self.refresh()?;
        self.state.read().slots.get_head(slot_id)
    }

    /// Point `slot_id` at an existing block.
    pub fn set_head(&self, slot_id: &str, hash: &str) -> EngineResult<StmSlot> {
        let mut guard = self.state.write();
        let st = &mut *guard;
        self.catch_up_locked(st, false)?;
        st.slots.validate(slot_id)?;
        let node = st
            .topology
            .by_hash(hash)
            .ok_or_else(|| EngineError::not_found(format!("block {hash}")))?;
        let row = st.slots.plan_head(
            slot_id,
            Some((node.hash.as_str(), node.root.as_str())),
            &chain::now_timestamp(),
        )?;
        self.store.write(|tx| slots::upsert_slot(tx, &row))?;
        st.slots.apply(row.clone());
        Ok(row)
    }

    /// Empty a slot; its next write starts a fresh branch.
    pub fn clear_slot(&self, slot_id: &str) -> EngineResult<StmSlot> {
        let mut st = self.state.write();
        let row = st.slots.plan_head(slot_id, None, &chain::now_timestamp())?;
        self.store.write(|tx| slots::upsert_slot(tx, &row))?;
        st.slots.apply(row.clone());
        Ok(row)
    }

    pub fn list_slots(&self) -> EngineResult<Vec<StmSlot>> {
        self.refresh()?;
        Ok(self.state.read().slots.list())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Branches
    // ═══════════════════════════════════════════════════════════════════

    pub fn list_branches(&self) -> EngineResult<Vec<BranchMeta>> {
        self.refresh()?;
        Ok(self.state.read().branches.metas().cloned().collect())
    }

    /// Live branch a (possibly retired) root belongs to.
    pub fn resolve_branch(&self, root: &str) -> EngineResult<String> {
        self.refresh()?;
        let st = self.state.read();
        if !st.branches.knows(root) {
            return Err(EngineError::not_found(format!("branch {root}")));
        }
        Ok(st.branches.resolve(root))
    }

    /// Indices of every block in the branch, including merged-in branches.
    pub fn branch_members(&self, root: &str) -> EngineResult<Vec<u64>> {
        self.refresh()?;
        let roots = {
            let st = self.state.read();
            if !st.branches.knows(root) {
                return Err(EngineError::not_found(format!("branch {root}")));
            }
            st.branches.roots_resolving_to(&st.branches.resolve(root))
        };
        self.store.read(|conn| blocks::indices_by_roots(conn, &roots))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Maintenance & export
    // ═══════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> EngineResult<LedgerStats> {
        self.refresh()?;
        let st = self.state.read();
        let blocks = self.store.read(blocks::count)?;
        Ok(LedgerStats {
            blocks,
            branches: st.branches.len() as u64,
            assignment_threshold: st.branches.threshold(),
            slots_in_use: st.slots.in_use(),
            last_block_index: st.topology.last_index(),
            embedding_groups: st.global.group_count(),
            indexed_keywords: st.global.keyword_count(),
        })
    }

    /// Every stored embedding, for the consolidation process.
    pub fn get_all_embeddings(&self) -> EngineResult<Vec<(u64, Embedding)>> {
        self.store.read(blocks::all_embeddings)
    }

    /// Every parent → child edge, for the consolidation process.
    pub fn get_existing_links(&self) -> EngineResult<Vec<BlockLink>> {
        self.store.read(blocks::existing_links)
    }

    /// Re-index the global index from the blocks table. Returns blocks indexed.
    pub fn rebuild_global_index(&self) -> EngineResult<usize> {
        let mut st = self.state.write();
        let rows = self.store.read(|conn| blocks::index_rows_since(conn, None))?;
        let n = rows.len();
        st.global.rebuild(rows);
        Ok(n)
    }
}

/// Slot head wins; otherwise the assigned branch's newest head; otherwise
/// a fresh branch.
fn plan_route(
    st: &LedgerState,
    slot: Option<&str>,
    assignment: Option<&BranchAssignment>,
) -> EngineResult<Route> {
    let child_of = |hash: &str| {
        st.topology.by_hash(hash).map(|node| Route::Child {
            parent_hash: node.hash.clone(),
            parent_depth: node.depth,
            root: node.root.clone(),
        })
    };

    if let Some(slot_id) = slot {
        let current = st.slots.get_head(slot_id)?;
        return Ok(match current.head_hash.as_deref() {
            Some(head) => child_of(head).unwrap_or_else(|| {
                warn!(
                    "[ledger] Slot {} head {} is not a known block, starting a new branch",
                    slot_id,
                    short(head)
                );
                Route::NewBranch
            }),
            None => Route::NewBranch,
        });
    }

    let Some(BranchAssignment::Existing { root, .. }) = assignment else {
        return Ok(Route::NewBranch);
    };
    let newest = st.branches.get(root).and_then(|meta| {
        meta.heads
            .iter()
            .filter_map(|h| st.topology.index_of(h))
            .max()
            .and_then(|i| st.topology.get(i))
    });
    Ok(match newest {
        Some(node) => Route::Child {
            parent_hash: node.hash.clone(),
            parent_depth: node.depth,
            root: node.root.clone(),
        },
        None => Route::NewBranch,
    })
}

/// Append global hits not already present until `k`. Returns how many.
fn append_global(
    results: &mut Vec<SearchHit>,
    ranked: Vec<RankedBlock>,
    loaded: Vec<MemoryBlock>,
    k: usize,
) -> usize {
    let mut by_index: HashMap<u64, MemoryBlock> =
        loaded.into_iter().map(|b| (b.block_index, b)).collect();
    let present: HashSet<u64> = results.iter().map(|h| h.block.block_index).collect();
    let mut added = 0;
    for r in ranked {
        if results.len() >= k {
            break;
        }
        if present.contains(&r.block_index) {
            continue;
        }
        if let Some(block) = by_index.remove(&r.block_index) {
            results.push(SearchHit {
                block,
                score: r.score,
                source: SearchSource::Global,
                hops: 0,
                breakdown: ScoreBreakdown {
                    hybrid_keyword: r.keyword_score,
                    hybrid_vector: r.vector_score,
                    ..ScoreBreakdown::default()
                },
            });
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: &[f32]) -> Embedding {
        Embedding::new("test-model", v.to_vec())
    }

    fn ledger() -> MemoryLedger {
        MemoryLedger::open_in_memory(LedgerConfig::default()).unwrap()
    }

    #[test]
    fn test_add_block_assigns_contiguous_indices_and_chain() {
        let l = ledger();
        let a = l.add_block(BlockInput::new("first")).unwrap();
        let b = l.add_block(BlockInput::new("second")).unwrap();
        assert_eq!((a.block_index, b.block_index), (0, 1));
        assert_eq!(a.prev_hash, GENESIS_PREV_HASH);
        assert_eq!(b.prev_hash, a.hash);
        assert!(l.verify_chain().unwrap().is_valid());
    }

    #[test]
    fn test_slot_writes_extend_the_head() {
        let l = ledger();
        let a = l.add_block(BlockInput::new("one").slot("A")).unwrap();
        let b = l.add_block(BlockInput::new("two").slot("A")).unwrap();
        assert_eq!(b.before, a.hash);
        assert_eq!(b.root, a.hash);
        assert_eq!(b.branch_depth, 1);
        assert_eq!(l.get_block(0).unwrap().after, vec![b.hash.clone()]);
        assert_eq!(l.get_head("A").unwrap().head_hash, Some(b.hash));
    }

    #[test]
    fn test_unslotted_block_follows_assignment() {
        let l = ledger();
        let a = l.add_block(BlockInput::new("alpha").embedding(emb(&[1.0, 0.0]))).unwrap();
        let b = l.add_block(BlockInput::new("alpha again").embedding(emb(&[0.98, 0.1]))).unwrap();
        let c = l.add_block(BlockInput::new("other").embedding(emb(&[0.0, 1.0]))).unwrap();
        assert_eq!(b.root, a.hash);
        assert_eq!(b.before, a.hash);
        assert_eq!(c.root, c.hash);
        assert_eq!(l.list_branches().unwrap().len(), 2);
    }

    #[test]
    fn test_validation_and_not_found() {
        let l = ledger();
        assert!(matches!(
            l.add_block(BlockInput::new("")),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            l.add_block(BlockInput::new("x").slot("nope")),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(l.get_block(42), Err(EngineError::NotFound(_))));
        assert!(matches!(l.set_head("A", "missing"), Err(EngineError::NotFound(_))));
        assert!(matches!(
            l.search(SearchRequest::new("q", "A").k(0)),
            Err(EngineError::Validation(_))
        ));
        // Nothing partial persisted.
        assert_eq!(l.stats().unwrap().blocks, 0);
    }

    #[test]
    fn test_keywords_default_to_extracted_tokens() {
        let l = ledger();
        let b = l
            .add_block(BlockInput::new("Login endpoint with JWT").tags(["Auth", " "]))
            .unwrap();
        let kws: Vec<&str> = b.keywords.iter().map(String::as_str).collect();
        assert_eq!(kws, vec!["endpoint", "jwt", "login"]);
        assert_eq!(b.tags.len(), 1);
        assert!(b.tags.contains("auth"));
    }

    #[test]
    fn test_search_records_visits_and_metrics() {
        let l = ledger();
        l.add_block(BlockInput::new("rust borrow checker").slot("A")).unwrap();
        let resp = l
            .search(SearchRequest::new("borrow checker", "A").fallback(false))
            .unwrap();
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.meta.search_type, SearchType::Local);
        assert_eq!(l.get_block(0).unwrap().visit_count, 1);
        let m = l.get_metrics();
        assert_eq!(m.total_searches, 1);
        assert_eq!(m.graph_hits, 1);
        l.reset_metrics();
        assert_eq!(l.get_metrics().total_searches, 0);
    }

    #[test]
    fn test_set_and_clear_head() {
        let l = ledger();
        let a = l.add_block(BlockInput::new("root").slot("A")).unwrap();
        l.add_block(BlockInput::new("child").slot("A")).unwrap();
        let row = l.set_head("B", &a.hash).unwrap();
        assert_eq!(row.root.as_deref(), Some(a.hash.as_str()));

        // B now forks from the root of A's branch.
        let fork = l.add_block(BlockInput::new("fork").slot("B")).unwrap();
        assert_eq!(fork.before, a.hash);
        let meta = l.list_branches().unwrap().remove(0);
        assert_eq!(meta.size, 3);
        assert_eq!(meta.heads.len(), 2);

        assert_eq!(l.clear_slot("B").unwrap().head_hash, None);
        let fresh = l.add_block(BlockInput::new("fresh").slot("B")).unwrap();
        assert!(fresh.is_branch_root());
        assert!(l.verify_chain().unwrap().is_valid());
    }
}
