// ── Ledger: Jump Optimizer ──────────────────────────────────────────────────
//
// Decides when a local search should escalate to the global index.
//
//   floor   = ceil(min_local_results · (0.5 + success_rate))
//   ceiling = complexity_ceiling · (1.5 − success_rate)
//   jump when results == 0, results < floor, or complexity > ceiling
//
// `success_rate` is a capped cumulative moving average of "did the jump add
// anything", so useful jumps make escalation more permissive and wasted
// ones make it stricter. State is process-local and starts fresh on open.

use crate::atoms::constants::QUESTION_OPENERS;
use crate::atoms::ledger_types::{JumpConfig, JumpStats};
use log::debug;

const CONNECTIVES: &[&str] = &[
    "and", "or", "versus", "vs", "compare", "between", "difference", "relationship",
];

/// Rough 0–1 estimate of how much ground a query covers.
pub fn estimate_complexity(query: &str, keywords: &[String]) -> f64 {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let breadth = (keywords.len() as f64 / 10.0).min(0.6);
    let connectives = words.iter().filter(|w| CONNECTIVES.contains(w)).count().min(2);
    let open_ended = words.first().is_some_and(|w| QUESTION_OPENERS.contains(w));

    let mut score = breadth + connectives as f64 * 0.15;
    if open_ended {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub(crate) struct JumpOptimizer {
    config: JumpConfig,
    success_rate: f64,
    samples: u64,
}

impl JumpOptimizer {
    pub fn new(config: JumpConfig) -> Self {
        let success_rate = config
            .initial_success_rate
            .clamp(config.success_rate_floor, config.success_rate_ceiling);
        Self {
            config,
            success_rate,
            samples: 0,
        }
    }

    pub fn effective_min_results(&self) -> usize {
        (self.config.min_local_results as f64 * (0.5 + self.success_rate)).ceil() as usize
    }

    pub fn effective_complexity_ceiling(&self) -> f64 {
        self.config.complexity_ceiling * (1.5 - self.success_rate)
    }

    pub fn should_jump(&self, local_results: usize, complexity: f64) -> bool {
        local_results == 0
            || local_results < self.effective_min_results()
            || complexity > self.effective_complexity_ceiling()
    }

    /// Fold one jump outcome into the success rate. The starting rate counts
    /// as one prior sample; the divisor stops growing at `max_samples`.
    pub fn record_jump(&mut self, was_useful: bool) {
        let outcome = if was_useful { 1.0 } else { 0.0 };
        let n = (self.samples + 2).min(self.config.max_samples.max(1)) as f64;
        self.success_rate = (self.success_rate + (outcome - self.success_rate) / n)
            .clamp(self.config.success_rate_floor, self.config.success_rate_ceiling);
        self.samples = (self.samples + 1).min(self.config.max_samples);
        debug!(
            "[ledger:jump] Jump useful={} -> success_rate {:.3}",
            was_useful, self.success_rate
        );
    }

    pub fn stats(&self) -> JumpStats {
        JumpStats {
            success_rate: self.success_rate,
            samples: self.samples,
            effective_min_results: self.effective_min_results(),
            effective_complexity_ceiling: self.effective_complexity_ceiling(),
        }
    }
}
