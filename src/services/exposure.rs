//! Threshold-exposure analysis over a resolved temperature series, and the
//! shelf-life estimate derived from it.
//!
//! The series is integrated trapezoidally between consecutive readings, so
//! irregular sampling intervals weight correctly and a cutoff crossing inside
//! a segment is placed by linear interpolation rather than snapped to a
//! sample. Time above the cutoff counts inclusively (a reading exactly at the
//! cutoff is "above").

use chrono::{DateTime, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

const HOUR_SECONDS: f64 = 3600.0;
/// Bucket width for the hourly trend profile.
const BUCKET_SECONDS: i64 = 3600;

/// Shelf-life model: `days = SLOPE * hours_above + INTERCEPT`, clamped at 0.
const SHELF_LIFE_SLOPE: f64 = -0.3796;
const SHELF_LIFE_INTERCEPT_DAYS: f64 = 7.1597;
/// Baseline the remaining-percentage is measured against.
const SHELF_LIFE_BASELINE_DAYS: f64 = 7.16;
/// A simulated shelf life under this many days counts as product loss.
const LOSS_THRESHOLD_DAYS: f64 = 4.0;
const RISK_SAMPLES: usize = 500;
/// Uniform jitter applied per simulation sample, in days.
const RISK_JITTER_DAYS: f64 = 1.0;
/// Fixed simulation seed so repeated analyses of the same data agree.
const RISK_SEED: u64 = 0x0C01_DB10_0000_5EED;

/// One resolved sample: a timestamp and a temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempPoint {
    pub at: DateTime<Utc>,
    pub temp_c: f64,
}

/// Convert raw logger readings into an analyzable series, keeping only
/// readings that carry both a timestamp and a temperature.
pub fn series_from_measurements(points: &[crate::models::blu::Measurement]) -> Vec<TempPoint> {
    points
        .iter()
        .filter_map(|p| {
            let at = p.timestamp()?;
            let temp_c = p.temperature_c?;
            Some(TempPoint { at, temp_c })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Exposure {
    pub total_hours: f64,
    pub hours_above: f64,
    pub pct_above: f64,
    pub excursions: usize,
    pub longest_streak_hours: f64,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub avg_temp: Option<f64>,
}

/// Integrate a series against a cutoff.
///
/// Input order does not matter; the series is sorted by timestamp first.
/// Non-finite temperatures are dropped, segments with non-increasing
/// timestamps are skipped, and fewer than two usable points yields the empty
/// exposure rather than an error.
pub fn compute(series: &[TempPoint], cutoff_c: f64) -> Exposure {
    let mut pts: Vec<&TempPoint> = series.iter().filter(|p| p.temp_c.is_finite()).collect();
    pts.sort_by_key(|p| p.at);
    if pts.len() < 2 {
        return Exposure::default();
    }

    let min_temp = pts.iter().map(|p| p.temp_c).fold(f64::INFINITY, f64::min);
    let max_temp = pts.iter().map(|p| p.temp_c).fold(f64::NEG_INFINITY, f64::max);

    let mut total_secs = 0.0;
    let mut area = 0.0;
    let mut above_secs = 0.0;
    let mut excursions = 0usize;
    let mut longest_streak_secs = 0.0f64;
    let mut current_streak_secs = 0.0f64;

    for window in pts.windows(2) {
        let (a, b) = (window[0], window[1]);
        let ta = a.at.timestamp() as f64;
        let tb = b.at.timestamp() as f64;
        let dt = tb - ta;
        if dt <= 0.0 {
            continue;
        }
        area += (a.temp_c + b.temp_c) / 2.0 * dt;
        total_secs += dt;

        let above_a = a.temp_c >= cutoff_c;
        let above_b = b.temp_c >= cutoff_c;
        if above_a && above_b {
            above_secs += dt;
            current_streak_secs += dt;
        } else if !above_a && !above_b {
            longest_streak_secs = longest_streak_secs.max(current_streak_secs);
            current_streak_secs = 0.0;
        } else {
            // segment crosses the cutoff; interpolate the crossing time
            let ratio = (cutoff_c - a.temp_c) / (b.temp_c - a.temp_c);
            let t_cross = ta + ratio * dt;
            if !above_a && above_b {
                excursions += 1;
                let dt_above = tb - t_cross;
                above_secs += dt_above;
                current_streak_secs = dt_above;
            } else {
                let dt_above = t_cross - ta;
                above_secs += dt_above;
                current_streak_secs += dt_above;
                longest_streak_secs = longest_streak_secs.max(current_streak_secs);
                current_streak_secs = 0.0;
            }
        }
    }
    longest_streak_secs = longest_streak_secs.max(current_streak_secs);

    let total_hours = total_secs / HOUR_SECONDS;
    let hours_above = above_secs / HOUR_SECONDS;
    Exposure {
        total_hours,
        hours_above,
        pct_above: if total_hours > 0.0 { hours_above / total_hours * 100.0 } else { 0.0 },
        excursions,
        longest_streak_hours: longest_streak_secs / HOUR_SECONDS,
        min_temp: Some(min_temp),
        max_temp: Some(max_temp),
        avg_temp: if total_secs > 0.0 { Some(area / total_secs) } else { None },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShelfLife {
    pub estimated_days: f64,
    pub remaining_pct: f64,
    pub reduction_pct: f64,
    pub risk_of_loss_pct: f64,
}

/// Estimate remaining shelf life from hours above the cutoff, plus a seeded
/// simulation of the loss risk under per-lot variation.
pub fn shelf_life(exposure: &Exposure) -> ShelfLife {
    let estimated_days =
        (SHELF_LIFE_SLOPE * exposure.hours_above + SHELF_LIFE_INTERCEPT_DAYS).max(0.0);
    let remaining_pct = estimated_days / SHELF_LIFE_BASELINE_DAYS * 100.0;

    let mut rng = SmallRng::seed_from_u64(RISK_SEED);
    let mut lost = 0usize;
    for _ in 0..RISK_SAMPLES {
        let sample = estimated_days + rng.random_range(-RISK_JITTER_DAYS..=RISK_JITTER_DAYS);
        if sample < LOSS_THRESHOLD_DAYS {
            lost += 1;
        }
    }

    ShelfLife {
        estimated_days,
        remaining_pct,
        reduction_pct: 100.0 - remaining_pct,
        risk_of_loss_pct: lost as f64 / RISK_SAMPLES as f64 * 100.0,
    }
}

/// Mean temperature per hour-wide bucket from the first sample onwards,
/// keyed by the bucket's midpoint. Feeds the CLI trend report.
pub fn hourly_means(series: &[TempPoint]) -> Vec<(DateTime<Utc>, f64)> {
    let mut sorted: Vec<&TempPoint> = series.iter().filter(|p| p.temp_c.is_finite()).collect();
    sorted.sort_by_key(|p| p.at);
    let Some(first) = sorted.first() else {
        return Vec::new();
    };
    let t0 = first.at.timestamp();

    let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for p in &sorted {
        let idx = (p.at.timestamp() - t0).div_euclid(BUCKET_SECONDS);
        let entry = buckets.entry(idx).or_insert((0.0, 0));
        entry.0 += p.temp_c;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .filter_map(|(idx, (sum, count))| {
            let mid = t0 + idx * BUCKET_SECONDS + BUCKET_SECONDS / 2;
            let at = DateTime::from_timestamp(mid, 0)?;
            Some((at, sum / count as f64))
        })
        .collect()
}
