use crate::config::QualityConfig;
use crate::toolkit::Loudness;

const MEAN_PENALTY_CAP: f64 = 40.0;
const PEAK_PENALTY_CAP: f64 = 30.0;
const SHORT_PENALTY_CAP: f64 = 30.0;

/// Measured properties of one synthesized clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipMetrics {
    pub duration: f64,
    pub loudness: Loudness,
}

/// `100 - mean penalty - peak penalty - short penalty`, clamped to 0..=100.
pub fn score(metrics: &ClipMetrics, cfg: &QualityConfig) -> f64 {
    let mean_penalty =
        ((metrics.loudness.mean_db - cfg.target_mean_db).abs() * cfg.mean_weight).min(MEAN_PENALTY_CAP);
    let peak_penalty =
        ((metrics.loudness.peak_db - cfg.target_peak_db).abs() * cfg.peak_weight).min(PEAK_PENALTY_CAP);
    let short_penalty = if metrics.duration < cfg.short_duration {
        ((cfg.short_duration - metrics.duration) * cfg.short_weight).min(SHORT_PENALTY_CAP)
    } else {
        0.0
    };
    (100.0 - mean_penalty - peak_penalty - short_penalty).clamp(0.0, 100.0)
}

/// Usable at all: non-zero length and not near-silent.
pub fn validate(metrics: &ClipMetrics, cfg: &QualityConfig) -> Result<(), String> {
    if metrics.duration.is_nan() || metrics.duration <= 0.0 {
        return Err(format!("duration {:.3}s is not positive", metrics.duration));
    }
    if metrics.loudness.mean_db.is_nan() || metrics.loudness.mean_db <= cfg.min_mean_db {
        return Err(format!(
            "mean volume {:.1} dB is at or below {:.1} dB",
            metrics.loudness.mean_db, cfg.min_mean_db
        ));
    }
    Ok(())
}
