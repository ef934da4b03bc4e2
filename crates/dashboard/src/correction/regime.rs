use crate::db::{DailySummary, Regime};

pub const HEATWAVE_FORECAST_MAX: f64 = 35.0;
pub const HEATWAVE_OBSERVED_MAX: f64 = 32.0;
pub const DRY_PRECIP_MM: f64 = 0.5;
pub const SUNNY_SOLAR_MJ: f64 = 10.0;
pub const CALM_NIGHT_FRACTION: f64 = 0.4;

#[derive(Debug, Clone, Copy, Default)]
pub struct RegimeInputs<'a> {
    pub forecast_max: Option<f64>,
    pub today: Option<&'a DailySummary>,
    /// The day before, then the day before that
    pub prior: [Option<&'a DailySummary>; 2],
}

/// Tags a day with a single regime, first match wins:
/// heatwave, inversion, clear_calm, then all.
pub fn classify(inputs: &RegimeInputs) -> Regime {
    if is_heatwave(inputs) {
        return Regime::Heatwave;
    }
    if inputs.today.is_some_and(|s| s.inversion_detected) {
        return Regime::Inversion;
    }
    if inputs.today.is_some_and(is_clear_calm) {
        return Regime::ClearCalm;
    }
    Regime::All
}

fn is_heatwave(inputs: &RegimeInputs) -> bool {
    if inputs
        .forecast_max
        .is_some_and(|t| t >= HEATWAVE_FORECAST_MAX)
    {
        return true;
    }
    inputs.prior.iter().all(|day| {
        day.and_then(|s| s.temp_max)
            .is_some_and(|t| t >= HEATWAVE_OBSERVED_MAX)
    })
}

fn is_clear_calm(summary: &DailySummary) -> bool {
    let dry = summary.precip_total.is_some_and(|p| p < DRY_PRECIP_MM);
    let sunny = summary.solar_integral_mj.is_some_and(|s| s > SUNNY_SOLAR_MJ);
    let calm = summary
        .calm_night_fraction
        .is_some_and(|f| f > CALM_NIGHT_FRACTION);
    dry && sunny && calm
}
