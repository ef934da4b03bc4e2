//! Tuning knobs for the forecast correction pipeline.

use serde::{Deserialize, Serialize};

/// Minimum verification samples before a lead-day bias is trusted.
pub const MIN_BIAS_SAMPLES: i64 = 7;
/// Minimum samples before a regime-specific bias is trusted.
pub const MIN_REGIME_SAMPLES: i64 = 15;
/// Largest bias magnitude (°C) ever applied to a raw forecast.
pub const MAX_BIAS_CORRECTION: f64 = 6.0;
/// Largest combined bias + nowcast correction (°C).
pub const MAX_TOTAL_CORRECTION: f64 = 10.0;
pub const NOWCAST_ALPHA: f64 = 0.7;
pub const MAX_NOWCAST_ADJUSTMENT: f64 = 4.0;
/// Ratio used to derive a morning temperature from the forecast maximum.
pub const NOWCAST_MORNING_RATIO: f64 = 0.7;
pub const NOWCAST_MIN_READINGS: usize = 6;
pub const INVERSION_STRENGTH_THRESHOLD: f64 = 2.0;
pub const OVERNIGHT_INVERSION_THRESHOLD: f64 = 1.0;
pub const STALE_OBSERVATION_MINUTES: i64 = 60;
/// Highest lead day the bias store tracks.
pub const MAX_LEAD_DAY: i64 = 14;
/// IANA zone the valley keeps its clocks in.
pub const DEFAULT_TIMEZONE: &str = "Australia/Melbourne";

/// Runtime-adjustable copy of the correction constants.
///
/// Every field falls back to its constant when missing from the config file,
/// so a `[tuning]` table only needs the knobs being changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub min_bias_samples: i64,
    pub min_regime_samples: i64,
    pub max_bias_correction: f64,
    pub max_total_correction: f64,
    /// Feature gate for the morning nowcast
    pub nowcast_enabled: bool,
    pub nowcast_alpha: f64,
    pub max_nowcast_adjustment: f64,
    pub nowcast_morning_ratio: f64,
    /// First local hour of the morning window; no nowcast before it
    pub nowcast_window_start_hour: u8,
    /// Local hour (exclusive) closing the morning window
    pub nowcast_window_end_hour: u8,
    pub nowcast_min_readings: usize,
    pub inversion_strength_threshold: f64,
    pub overnight_inversion_threshold: f64,
    pub stale_observation_minutes: i64,
    /// Sliding window the stats computer aggregates over
    pub stats_window_days: i64,
    /// IANA zone name that defines the valley's local day
    pub timezone: String,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            min_bias_samples: MIN_BIAS_SAMPLES,
            min_regime_samples: MIN_REGIME_SAMPLES,
            max_bias_correction: MAX_BIAS_CORRECTION,
            max_total_correction: MAX_TOTAL_CORRECTION,
            nowcast_enabled: true,
            nowcast_alpha: NOWCAST_ALPHA,
            max_nowcast_adjustment: MAX_NOWCAST_ADJUSTMENT,
            nowcast_morning_ratio: NOWCAST_MORNING_RATIO,
            nowcast_window_start_hour: 6,
            nowcast_window_end_hour: 10,
            nowcast_min_readings: NOWCAST_MIN_READINGS,
            inversion_strength_threshold: INVERSION_STRENGTH_THRESHOLD,
            overnight_inversion_threshold: OVERNIGHT_INVERSION_THRESHOLD,
            stale_observation_minutes: STALE_OBSERVATION_MINUTES,
            stats_window_days: 60,
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}
