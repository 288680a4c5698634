// Paw Ledger — Configuration Loader
//
// Reads `LedgerConfig` from TOML. Every section is `#[serde(default)]`, so a
// file only needs the values it overrides. `validate()` runs on every open.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ledger_types::LedgerConfig;
use log::info;
use std::collections::HashSet;
use std::path::Path;

impl LedgerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: LedgerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("[ledger] Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values the ledger cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        // ── Slots ──────────────────────────────────────────────────────
        if self.slots.is_empty() {
            return Err(config_err("at least one slot name is required"));
        }
        let mut seen = HashSet::new();
        for name in &self.slots {
            if name.trim().is_empty() {
                return Err(config_err("slot names must not be blank"));
            }
            if !seen.insert(name.as_str()) {
                return Err(config_err(format!("duplicate slot name '{name}'")));
            }
        }

        // ── Branching ──────────────────────────────────────────────────
        let b = &self.branch;
        unit("branch.initial_threshold", b.initial_threshold)?;
        unit("branch.min_threshold", b.min_threshold)?;
        unit("branch.max_threshold", b.max_threshold)?;
        unit("branch.threshold_quantile", b.threshold_quantile)?;
        unit("branch.centroid_min_alpha", b.centroid_min_alpha)?;
        unit("branch.theta_high", b.theta_high)?;
        unit("branch.ema_alpha", b.ema_alpha)?;
        unit("branch.min_confidence", b.min_confidence)?;
        if b.min_threshold > b.max_threshold {
            return Err(config_err(format!(
                "branch.min_threshold ({}) exceeds branch.max_threshold ({})",
                b.min_threshold, b.max_threshold
            )));
        }
        if b.threshold_window == 0 || b.threshold_recompute_every == 0 {
            return Err(config_err(
                "branch.threshold_window and branch.threshold_recompute_every must be positive",
            ));
        }

        // ── Local search ───────────────────────────────────────────────
        let s = &self.search;
        for (name, w) in [
            ("search.w_similarity", s.w_similarity),
            ("search.w_recency", s.w_recency),
            ("search.w_locality", s.w_locality),
            ("search.w_keyword", s.w_keyword),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(config_err(format!("{name} must be a non-negative number")));
            }
        }
        if !(s.recency_half_life_hours.is_finite() && s.recency_half_life_hours > 0.0) {
            return Err(config_err("search.recency_half_life_hours must be positive"));
        }
        unit("search.min_similarity_score", s.min_similarity_score)?;
        if s.visit_multiplier == 0 || s.default_k == 0 {
            return Err(config_err(
                "search.visit_multiplier and search.default_k must be positive",
            ));
        }

        // ── Hybrid ─────────────────────────────────────────────────────
        let h = &self.hybrid;
        unit("hybrid.keyword_weight", h.keyword_weight)?;
        unit("hybrid.auto_min", h.auto_min)?;
        unit("hybrid.auto_max", h.auto_max)?;
        if h.auto_min > h.auto_max {
            return Err(config_err("hybrid.auto_min exceeds hybrid.auto_max"));
        }
        if h.candidate_multiplier == 0 {
            return Err(config_err("hybrid.candidate_multiplier must be positive"));
        }

        // ── Jump ───────────────────────────────────────────────────────
        let j = &self.jump;
        unit("jump.initial_success_rate", j.initial_success_rate)?;
        unit("jump.success_rate_floor", j.success_rate_floor)?;
        unit("jump.success_rate_ceiling", j.success_rate_ceiling)?;
        if j.success_rate_floor > j.success_rate_ceiling {
            return Err(config_err(
                "jump.success_rate_floor exceeds jump.success_rate_ceiling",
            ));
        }
        if !(j.complexity_ceiling.is_finite() && j.complexity_ceiling >= 0.0) {
            return Err(config_err("jump.complexity_ceiling must be non-negative"));
        }
        if j.max_samples == 0 {
            return Err(config_err("jump.max_samples must be positive"));
        }

        if self.store.initial_backoff_ms > self.store.max_backoff_ms {
            return Err(config_err("store.initial_backoff_ms exceeds store.max_backoff_ms"));
        }
        Ok(())
    }
}

fn config_err(message: impl Into<String>) -> EngineError {
    EngineError::Config(message.into())
}

fn unit(name: &str, value: f64) -> EngineResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(config_err(format!("{name} must be within [0, 1], got {value}")))
    }
}
