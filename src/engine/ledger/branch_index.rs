// ── Ledger: Branch Index ────────────────────────────────────────────────────
//
// Streaming classification of new blocks into topical branches.
//
//   assign_branch   — pure: best centroid by cosine vs. the dynamic threshold
//   grow_meta       — size/heads/centroid of a branch after one more block
//   observe_commit  — installs committed metas, feeds threshold statistics
//   evaluate_merges — every `evaluation_window` commits, EMA merge confidence
//                     per branch pair; proposes at most one merge per round
//
// Nothing here touches SQLite. The write path computes a plan, commits it,
// then calls back in, so a failed transaction leaves this state untouched.
// evaluate_merges only reads; the EMA step and the window reset land in
// apply_evaluation, and an unpersisted round is simply re-run next commit.
//
// Merges are recorded as aliases (retired → survivor). Block rows keep their
// original root; `resolve` maps any historical root to its live branch.

use crate::atoms::constants::MERGE_CONFIDENCE_EPSILON;
use crate::atoms::ledger_types::{BranchAssignment, BranchConfig, BranchMeta, Embedding};
use crate::engine::store::embedding::{embedding_similarity, nudge_towards, weighted_mean};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// A merge chosen by `evaluate_merges`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MergePlan {
    pub survivor: String,
    pub retired: String,
    pub confidence: f64,
}

/// Outcome of one evaluation round, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MergeEvaluation {
    /// Every live meta after the round (survivor already combined).
    pub touched: Vec<BranchMeta>,
    pub merge: Option<MergePlan>,
    /// Pair confidences after this round's EMA step.
    confidence: BTreeMap<(String, String), f64>,
}

#[derive(Debug)]
pub(crate) struct BranchIndex {
    config: BranchConfig,
    metas: BTreeMap<String, BranchMeta>,
    aliases: HashMap<String, String>,
    threshold: f64,
    recent_top1: VecDeque<f64>,
    embedded_commits: u64,
    commits_since_eval: u64,
    /// Pair confidence keyed by (lower root, higher root). Process-local.
    confidence: BTreeMap<(String, String), f64>,
}

impl BranchIndex {
    pub fn new(config: BranchConfig) -> Self {
        let threshold = config
            .initial_threshold
            .clamp(config.min_threshold, config.max_threshold);
        Self {
            config,
            metas: BTreeMap::new(),
            aliases: HashMap::new(),
            threshold,
            recent_top1: VecDeque::new(),
            embedded_commits: 0,
            commits_since_eval: 0,
            confidence: BTreeMap::new(),
        }
    }

    /// Replace persisted state. Threshold statistics and confidence survive.
    pub fn load(&mut self, metas: Vec<BranchMeta>, aliases: Vec<(String, String)>) {
        self.metas = metas.into_iter().map(|m| (m.root.clone(), m)).collect();
        self.aliases = aliases.into_iter().collect();
        let live = &self.metas;
        self.confidence
            .retain(|(a, b), _| live.contains_key(a) && live.contains_key(b));
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn metas(&self) -> impl Iterator<Item = &BranchMeta> {
        self.metas.values()
    }

    pub fn get(&self, root: &str) -> Option<&BranchMeta> {
        self.metas.get(root)
    }

    /// Root or retired alias known to the index.
    pub fn knows(&self, root: &str) -> bool {
        self.metas.contains_key(root) || self.aliases.contains_key(root)
    }

    /// Follow merge aliases to the live branch.
    pub fn resolve(&self, root: &str) -> String {
        let mut current = root;
        // Alias chains are acyclic; the bound only stops a corrupted table.
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.to_string()
    }

    /// Every stored root whose blocks belong to `survivor` today.
    pub fn roots_resolving_to(&self, survivor: &str) -> Vec<String> {
        let mut roots = vec![survivor.to_string()];
        let mut retired: Vec<&String> = self
            .aliases
            .keys()
            .filter(|r| self.resolve(r) == survivor)
            .collect();
        retired.sort();
        roots.extend(retired.into_iter().cloned());
        roots
    }

    #[cfg(test)]
    pub fn confidence(&self, a: &str, b: &str) -> f64 {
        self.confidence
            .get(&pair_key(a, b))
            .copied()
            .unwrap_or(0.0)
    }

    // ── Assignment ──────────────────────────────────────────────────

    /// Compare `embedding` against every comparable centroid.
    pub fn assign_branch(&self, embedding: &Embedding) -> BranchAssignment {
        let mut best: Option<(&str, f64)> = None;
        for meta in self.metas.values() {
            let Some(ref centroid) = meta.centroid else {
                continue;
            };
            let Some(sim) = embedding_similarity(embedding, centroid) else {
                continue;
            };
            if best.map_or(true, |(_, b)| sim > b) {
                best = Some((meta.root.as_str(), sim));
            }
        }
        match best {
            Some((root, similarity)) if similarity >= self.threshold => {
                BranchAssignment::Existing {
                    root: root.to_string(),
                    similarity,
                }
            }
            other => BranchAssignment::NewBranch {
                best_similarity: other.map(|(_, s)| s),
            },
        }
    }

    /// Meta of a branch rooted at a freshly committed block.
    pub fn seed_meta(hash: &str, block_index: u64, embedding: Option<&Embedding>) -> BranchMeta {
        BranchMeta {
            root: hash.to_string(),
            size: 1,
            heads: vec![hash.to_string()],
            centroid: embedding.cloned(),
            last_merge_eval: block_index,
        }
    }

    /// `current` after `child` is appended under `parent`.
    ///
    /// The centroid moves by `alpha = max(1/size, centroid_min_alpha)`, a
    /// running mean for young branches that keeps adapting once they grow.
    pub fn grow_meta(
        &self,
        current: &BranchMeta,
        parent_hash: &str,
        child_hash: &str,
        embedding: Option<&Embedding>,
    ) -> BranchMeta {
        let mut next = current.clone();
        next.size += 1;
        next.heads.retain(|h| h != parent_hash);
        if !next.heads.iter().any(|h| h == child_hash) {
            next.heads.push(child_hash.to_string());
        }
        if let Some(e) = embedding {
            match next.centroid {
                Some(ref mut c) if c.is_comparable(e) => {
                    let alpha = (1.0 / next.size as f64).max(self.config.centroid_min_alpha);
                    nudge_towards(&mut c.vector, &e.vector, alpha);
                }
                Some(_) => {}
                None => next.centroid = Some(e.clone()),
            }
        }
        next
    }

    /// Install a committed meta and feed the assignment statistics.
    pub fn observe_commit(&mut self, meta: BranchMeta, assignment: Option<&BranchAssignment>) {
        self.metas.insert(meta.root.clone(), meta);
        self.commits_since_eval += 1;

        let Some(assignment) = assignment else {
            return;
        };
        self.embedded_commits += 1;
        let top1 = match assignment {
            BranchAssignment::Existing { similarity, .. } => Some(*similarity),
            BranchAssignment::NewBranch { best_similarity } => *best_similarity,
        };
        if let Some(sim) = top1 {
            self.recent_top1.push_back(sim);
            while self.recent_top1.len() > self.config.threshold_window.max(1) {
                self.recent_top1.pop_front();
            }
        }
        if self.embedded_commits % self.config.threshold_recompute_every.max(1) == 0 {
            self.recompute_threshold();
        }
    }

    fn recompute_threshold(&mut self) {
        if self.recent_top1.is_empty() {
            return;
        }
        let mut sorted: Vec<f64> = self.recent_top1.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let q = self.config.threshold_quantile.clamp(0.0, 1.0);
        let pos = ((sorted.len() - 1) as f64 * q).round() as usize;
        let next = sorted[pos].clamp(self.config.min_threshold, self.config.max_threshold);
        debug!(
            "[ledger:branch] Threshold {:.3} -> {:.3} ({} samples)",
            self.threshold,
            next,
            sorted.len()
        );
        self.threshold = next;
    }

    // ── Merging ─────────────────────────────────────────────────────

    pub fn merge_due(&self) -> bool {
        self.config.evaluation_window > 0
            && self.commits_since_eval >= self.config.evaluation_window
    }

    /// One evaluation round over every comparable branch pair.
    ///
    /// `root_index` maps a root hash to its block_index; the survivor of a
    /// merge is the larger branch, then the older root.
    pub fn evaluate_merges(
        &self,
        at_index: u64,
        root_index: impl Fn(&str) -> Option<u64>,
    ) -> MergeEvaluation {
        let mut confidence = self.confidence.clone();
        let alpha = self.config.ema_alpha.clamp(0.0, 1.0);
        let theta_high = self.config.theta_high;

        let live: Vec<&BranchMeta> = self.metas.values().collect();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                let sim = match (&a.centroid, &b.centroid) {
                    (Some(ca), Some(cb)) => embedding_similarity(ca, cb),
                    _ => None,
                };
                let Some(sim) = sim else {
                    continue;
                };
                let c = confidence
                    .entry(pair_key(&a.root, &b.root))
                    .or_insert(0.0);
                if sim > theta_high {
                    *c += alpha * (1.0 - *c);
                } else {
                    *c *= 1.0 - alpha;
                }
            }
        }
        let metas = &self.metas;
        confidence.retain(|(a, b), c| {
            *c >= MERGE_CONFIDENCE_EPSILON && metas.contains_key(a) && metas.contains_key(b)
        });

        let mut chosen: Option<(&(String, String), f64)> = None;
        for (pair, &c) in &confidence {
            if c >= self.config.min_confidence && chosen.map_or(true, |(_, best)| c > best) {
                chosen = Some((pair, c));
            }
        }

        let merge = chosen.and_then(|((a, b), confidence)| {
            let (ma, mb) = (self.metas.get(a)?, self.metas.get(b)?);
            let a_first = (std::cmp::Reverse(ma.size), root_index(a).unwrap_or(u64::MAX), a)
                <= (std::cmp::Reverse(mb.size), root_index(b).unwrap_or(u64::MAX), b);
            let (survivor, retired) = if a_first { (a, b) } else { (b, a) };
            Some(MergePlan {
                survivor: survivor.clone(),
                retired: retired.clone(),
                confidence,
            })
        });

        let mut touched = Vec::with_capacity(self.metas.len());
        for meta in self.metas.values() {
            if let Some(ref plan) = merge {
                if meta.root == plan.retired {
                    continue;
                }
                if meta.root == plan.survivor {
                    if let Some(retired) = self.metas.get(&plan.retired) {
                        let mut merged = combine(meta, retired);
                        merged.last_merge_eval = at_index;
                        touched.push(merged);
                        continue;
                    }
                }
            }
            let mut m = meta.clone();
            m.last_merge_eval = at_index;
            touched.push(m);
        }

        if let Some(ref plan) = merge {
            debug!(
                "[ledger:branch] Merge proposed {} <- {} (confidence {:.3})",
                short(&plan.survivor),
                short(&plan.retired),
                plan.confidence
            );
        }
        MergeEvaluation {
            touched,
            merge,
            confidence,
        }
    }

    /// Install a persisted evaluation round.
    pub fn apply_evaluation(&mut self, eval: MergeEvaluation) {
        self.commits_since_eval = 0;
        self.confidence = eval.confidence;
        if let Some(plan) = eval.merge {
            self.metas.remove(&plan.retired);
            self.confidence
                .retain(|(a, b), _| *a != plan.retired && *b != plan.retired);
            info!(
                "[ledger:branch] Merged branch {} into {} (confidence {:.3})",
                short(&plan.retired),
                short(&plan.survivor),
                plan.confidence
            );
            self.aliases.insert(plan.retired, plan.survivor);
        }
        for meta in eval.touched {
            self.metas.insert(meta.root.clone(), meta);
        }
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Survivor absorbs retired: sizes add, centroids average by size, heads union.
fn combine(survivor: &BranchMeta, retired: &BranchMeta) -> BranchMeta {
    let mut merged = survivor.clone();
    merged.size = survivor.size + retired.size;
    for head in &retired.heads {
        if !merged.heads.contains(head) {
            merged.heads.push(head.clone());
        }
    }
    merged.centroid = match (&survivor.centroid, &retired.centroid) {
        (Some(s), Some(r)) if s.is_comparable(r) => Some(Embedding::new(
            s.model_id.clone(),
            weighted_mean(&s.vector, survivor.size, &r.vector, retired.size),
        )),
        (Some(s), _) => Some(s.clone()),
        (None, r) => r.clone(),
    };
    merged
}

pub(crate) fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
