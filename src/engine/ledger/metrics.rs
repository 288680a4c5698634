// ── Ledger: Search Metrics ──────────────────────────────────────────────────
// Counters and timing for search behaviour. Observability only: in memory,
// per process, reset on demand.

use crate::atoms::ledger_types::SearchMetrics;

/// What one finished search contributes to the counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SearchSample {
    pub hops: u32,
    pub jumped: bool,
    pub useful_jump: bool,
    /// Answered from the branch alone with at least one result.
    pub local_hit: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MetricsCollector {
    metrics: SearchMetrics,
    total_latency_ms: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: SearchSample) {
        let m = &mut self.metrics;
        m.total_searches += 1;
        m.total_hops += sample.hops as u64;
        if sample.local_hit {
            m.graph_hits += 1;
        }
        if sample.jumped {
            m.jump_count += 1;
            if sample.useful_jump {
                m.useful_jumps += 1;
            }
        }
        m.jump_success_rate = if m.jump_count == 0 {
            0.0
        } else {
            m.useful_jumps as f64 / m.jump_count as f64
        };
        m.local_hit_rate = m.graph_hits as f64 / m.total_searches as f64;

        self.total_latency_ms += sample.latency_ms;
        m.last_latency_ms = sample.latency_ms;
        m.max_latency_ms = m.max_latency_ms.max(sample.latency_ms);
        m.avg_latency_ms = self.total_latency_ms as f64 / m.total_searches as f64;
    }

    pub fn snapshot(&self) -> SearchMetrics {
        self.metrics.clone()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
