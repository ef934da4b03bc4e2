//! Turns the two providers' forecasts for today into the displayed maximum
//! and minimum, recording how each number was produced.
//!
//! Everything here is pure. Callers gather the forecasts, bias table,
//! observations and morning readings first, then persist the explanation and
//! any nowcast correction afterwards.

use log::{debug, info};
use serde::Serialize;
use valley_wx_core::Tuning;

use super::{
    bias::{BiasLookup, BiasTable},
    nowcast::{nowcast, NowcastContext, NowcastCorrection},
};
use crate::db::{Explanation, Forecast, Regime, Source, Target, TempExplanation};

/// Live temperature this far past a provider's forecast disqualifies it (°C)
pub const LIVE_OVERSHOOT_MARGIN: f64 = 3.0;
/// Providers further apart than this are treated as a gross disagreement (°C)
pub const PROVIDER_DISAGREEMENT: f64 = 10.0;
/// Margin for the overcorrection sanity check (°C)
pub const OVERCORRECTION_MARGIN: f64 = 3.0;
/// From this local hour a falling temperature means the peak has passed
pub const AFTERNOON_HOUR: u8 = 15;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverInputs<'a> {
    /// Preferred for the maximum
    pub bom: Option<&'a Forecast>,
    /// Preferred for the minimum
    pub wu: Option<&'a Forecast>,
    pub stats: Option<&'a BiasTable>,
    pub regime: Regime,
    pub current_temp: Option<f64>,
    pub observed_max: Option<f64>,
    pub observed_min: Option<f64>,
    pub local_hour: u8,
    pub temp_falling: bool,
    /// Morning readings from the primary station, when there is one
    pub nowcast: Option<&'a NowcastContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTemps {
    pub max: Option<i64>,
    pub min: Option<i64>,
    /// Lead day of the forecast the maximum (or else minimum) came from
    pub lead_day: i64,
    pub pre_nowcast_max: Option<i64>,
    pub nowcast_applied: bool,
    pub nowcast_adjustment: Option<f64>,
    pub nowcast: Option<NowcastCorrection>,
    pub explanation: Explanation,
}

struct Candidate<'a> {
    forecast: &'a Forecast,
    raw: f64,
}

pub fn resolve(inputs: &ResolverInputs, tuning: &Tuning) -> ResolvedTemps {
    let mut resolved = ResolvedTemps {
        max: None,
        min: None,
        lead_day: 0,
        pre_nowcast_max: None,
        nowcast_applied: false,
        nowcast_adjustment: None,
        nowcast: None,
        explanation: Explanation {
            max: TempExplanation::empty(),
            min: TempExplanation::empty(),
        },
    };

    let min_lead_day = resolve_min(inputs, tuning, &mut resolved);
    let max_lead_day = resolve_max(inputs, tuning, &mut resolved);
    resolved.lead_day = max_lead_day.or(min_lead_day).unwrap_or_default();

    resolved
}

fn round(value: f64) -> i64 {
    value.round() as i64
}

fn lookup_bias(
    inputs: &ResolverInputs,
    source: Source,
    target: Target,
    lead_day: i64,
    tuning: &Tuning,
) -> Option<BiasLookup> {
    inputs
        .stats?
        .lookup_in_regime(source, target, lead_day, inputs.regime, tuning)
}

fn record_bias(explanation: &mut TempExplanation, lookup: Option<&BiasLookup>) {
    if let Some(found) = lookup {
        explanation.bias_applied = Some(found.bias);
        explanation.bias_day_used = found.day_used;
        explanation.bias_samples = found.sample_size;
        explanation.bias_fallback = found.is_fallback;
    }
}

fn max_candidate<'a>(inputs: &ResolverInputs<'a>) -> Option<Candidate<'a>> {
    let secondary = inputs.wu.and_then(|f| {
        f.temp_max.map(|raw| Candidate { forecast: f, raw })
    });

    let Some(primary) = inputs
        .bom
        .and_then(|f| f.temp_max.map(|raw| Candidate { forecast: f, raw }))
    else {
        return secondary;
    };

    if let Some(live) = inputs.current_temp {
        if live > primary.raw + LIVE_OVERSHOOT_MARGIN {
            info!(
                "bom max {} rejected, live temperature {} already beyond it",
                primary.raw, live
            );
            return secondary;
        }
    }
    if let Some(other) = &secondary {
        if (primary.raw - other.raw).abs() > PROVIDER_DISAGREEMENT {
            info!(
                "bom max {} rejected, wu disagrees with {}",
                primary.raw, other.raw
            );
            return secondary;
        }
    }
    Some(primary)
}

fn resolve_max(
    inputs: &ResolverInputs,
    tuning: &Tuning,
    resolved: &mut ResolvedTemps,
) -> Option<i64> {
    let candidate = max_candidate(inputs)?;
    let forecast = candidate.forecast;
    let raw = candidate.raw;
    let explanation = &mut resolved.explanation.max;
    explanation.source = Some(forecast.source);
    explanation.forecast_id = Some(forecast.id);
    explanation.raw = Some(raw);

    let bias = lookup_bias(inputs, forecast.source, Target::Tmax, forecast.lead_day, tuning);
    record_bias(explanation, bias.as_ref());
    let bias_applied = bias.map(|b| b.bias).unwrap_or_default();

    let mut max = raw - bias_applied;
    resolved.pre_nowcast_max = Some(round(max));

    if forecast.lead_day == 0 && forecast.source == Source::Bom {
        if let Some(correction) = inputs
            .nowcast
            .and_then(|ctx| nowcast(ctx, raw, bias_applied, tuning))
        {
            info!(
                "nowcast for {} at {}: morning {:.1} vs implied {:.1}, adjustment {:+.1} (raw {:+.2}), max {:.1} -> {:.1}",
                correction.date,
                correction.station_id,
                correction.observed_morning,
                correction.forecast_morning,
                correction.adjustment,
                correction.raw_adjustment,
                max,
                correction.corrected_max
            );
            max = correction.corrected_max;
            explanation.nowcast_adjustment = Some(correction.adjustment);
            resolved.nowcast_applied = true;
            resolved.nowcast_adjustment = Some(correction.adjustment);
            resolved.nowcast = Some(correction);
        }
    }

    let mut final_max = round(max);

    if let Some(observed) = inputs.observed_max {
        let observed = round(observed);
        if observed > final_max {
            debug!("observed max {} lifts forecast max {}", observed, final_max);
            final_max = observed;
        }
        if inputs.local_hour >= AFTERNOON_HOUR && inputs.temp_falling {
            debug!("temperature falling after peak, holding max at {}", observed);
            final_max = observed;
        }
    }

    if let Some(observed) = inputs.observed_max {
        let ceiling = OVERCORRECTION_MARGIN;
        if final_max as f64 > raw + ceiling && final_max as f64 > observed + ceiling {
            let fallback = round(observed.max(raw));
            info!(
                "rejecting max correction: {} is far above raw {} and observed {}, using {}",
                final_max, raw, observed, fallback
            );
            final_max = fallback;
            explanation.bias_applied = Some(0.0);
            explanation.bias_rejected = true;
        }
    }

    explanation.final_value = Some(final_max);
    resolved.max = Some(final_max);
    Some(forecast.lead_day)
}

fn min_candidate<'a>(inputs: &ResolverInputs<'a>) -> Option<Candidate<'a>> {
    let secondary = inputs.bom.and_then(|f| {
        f.temp_min.map(|raw| Candidate { forecast: f, raw })
    });

    let Some(primary) = inputs
        .wu
        .and_then(|f| f.temp_min.map(|raw| Candidate { forecast: f, raw }))
    else {
        return secondary;
    };

    if let Some(live) = inputs.current_temp {
        if live < primary.raw - LIVE_OVERSHOOT_MARGIN {
            info!(
                "wu min {} rejected, live temperature {} already below it",
                primary.raw, live
            );
            return secondary;
        }
    }
    if let Some(other) = &secondary {
        if (primary.raw - other.raw).abs() > PROVIDER_DISAGREEMENT {
            info!(
                "wu min {} rejected, bom disagrees with {}",
                primary.raw, other.raw
            );
            return secondary;
        }
    }
    Some(primary)
}

fn resolve_min(
    inputs: &ResolverInputs,
    tuning: &Tuning,
    resolved: &mut ResolvedTemps,
) -> Option<i64> {
    let candidate = min_candidate(inputs)?;
    let forecast = candidate.forecast;
    let explanation = &mut resolved.explanation.min;
    explanation.source = Some(forecast.source);
    explanation.forecast_id = Some(forecast.id);
    explanation.raw = Some(candidate.raw);

    let bias = lookup_bias(inputs, forecast.source, Target::Tmin, forecast.lead_day, tuning);
    record_bias(explanation, bias.as_ref());
    let bias_applied = bias.map(|b| b.bias).unwrap_or_default();

    let mut final_min = round(candidate.raw - bias_applied);

    // Observed minimum is a ceiling
    if let Some(observed) = inputs.observed_min {
        let observed = round(observed);
        if observed < final_min {
            debug!("observed min {} lowers forecast min {}", observed, final_min);
            final_min = observed;
        }
    }

    explanation.final_value = Some(final_min);
    resolved.min = Some(final_min);
    Some(forecast.lead_day)
}
