use std::collections::HashMap;

use serde::Serialize;
use valley_wx_core::{Tuning, MAX_LEAD_DAY};

use crate::db::{CorrectionStat, Regime, Source, Target};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BiasLookup {
    /// Mean bias after capping, subtract from the raw forecast
    pub bias: f64,
    pub day_used: i64,
    pub sample_size: i64,
    pub is_fallback: bool,
    pub regime: Regime,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    mean_bias: f64,
    sample_size: i64,
}

/// In-memory snapshot of the bias store, keyed by (source, target, lead day, regime).
#[derive(Debug, Clone, Default)]
pub struct BiasTable {
    entries: HashMap<(Source, Target, i64, Regime), Entry>,
}

impl BiasTable {
    pub fn new(stats: &[CorrectionStat]) -> Self {
        let entries = stats
            .iter()
            .map(|s| {
                (
                    (s.source, s.target, s.lead_day, s.regime),
                    Entry {
                        mean_bias: s.mean_bias,
                        sample_size: s.sample_size,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bias for the exact lead day, else the nearest qualifying lead day,
    /// lower day first on ties. `None` when nothing has enough samples.
    pub fn lookup(
        &self,
        source: Source,
        target: Target,
        lead_day: i64,
        tuning: &Tuning,
    ) -> Option<BiasLookup> {
        self.scan(source, target, lead_day, Regime::All, tuning.min_bias_samples, tuning)
    }

    /// Regime-specific statistics first, held to the stricter sample
    /// threshold, then the all-regime lookup.
    pub fn lookup_in_regime(
        &self,
        source: Source,
        target: Target,
        lead_day: i64,
        regime: Regime,
        tuning: &Tuning,
    ) -> Option<BiasLookup> {
        if regime != Regime::All {
            if let Some(found) =
                self.scan(source, target, lead_day, regime, tuning.min_regime_samples, tuning)
            {
                return Some(found);
            }
        }
        self.lookup(source, target, lead_day, tuning)
    }

    fn scan(
        &self,
        source: Source,
        target: Target,
        lead_day: i64,
        regime: Regime,
        min_samples: i64,
        tuning: &Tuning,
    ) -> Option<BiasLookup> {
        search_order(lead_day).find_map(|day| {
            let entry = self.entries.get(&(source, target, day, regime))?;
            if entry.sample_size < min_samples {
                return None;
            }
            let cap = tuning.max_bias_correction.abs();
            Some(BiasLookup {
                bias: entry.mean_bias.clamp(-cap, cap),
                day_used: day,
                sample_size: entry.sample_size,
                is_fallback: day != lead_day,
                regime,
            })
        })
    }
}

/// d, d-1, d+1, d-2, d+2, ... restricted to the tracked lead days.
fn search_order(lead_day: i64) -> impl Iterator<Item = i64> {
    std::iter::once(lead_day)
        .chain((1..=MAX_LEAD_DAY).flat_map(move |delta| [lead_day - delta, lead_day + delta]))
        .filter(|day| (0..=MAX_LEAD_DAY).contains(day))
}
