//! ACT-R memory activation
//!
//! Unified activation model combining recency, frequency and importance:
//!
//! ```text
//! R(i) = offset + (1 − offset) · exp( −λ · Δt / Σ_k ( I · t_k^(−d) ) )
//! ```
//!
//! Δt is days since last access, t_k days since each recorded access
//! (floored at 0.0001), I the importance score, d the decay constant and λ
//! the forgetting rate. The exponent is clamped to ±100 and the result to
//! `[offset, 1.0]`.
//!
//! Reference: Anderson, J. R. (2007), How Can the Human Mind Occur in the
//! Physical Universe?

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use engram_config::ForgettingConfig;
use engram_core::limits::MAX_ACCESS_HISTORY;
use engram_core::{days_between, ActivationUpdate, NodeLabel};

/// One point of the projected forgetting curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub day: u32,
    pub activation: f64,
}

/// Pure activation maths, parameterised per config generation
#[derive(Debug, Clone)]
pub struct ActivationEngine {
    offset: f64,
    forgetting_rate: f64,
    decay_constant: f64,
}

impl ActivationEngine {
    pub fn new(config: &ForgettingConfig) -> Self {
        Self {
            offset: config.offset,
            forgetting_rate: config.lambda_mem,
            decay_constant: config.decay_constant,
        }
    }

    /// Curve projection uses `lambda_time` instead of `lambda_mem`
    pub fn for_curve(config: &ForgettingConfig) -> Self {
        Self {
            forgetting_rate: config.lambda_time,
            ..Self::new(config)
        }
    }

    /// Compute R(i) for a node given its access record
    pub fn activation(
        &self,
        access_history: &[DateTime<Utc>],
        last_accessed_at: DateTime<Utc>,
        importance_score: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        if access_history.is_empty() {
            return self.offset;
        }
        let importance = importance_score.clamp(0.0, 1.0);

        let delta_days = days_between(last_accessed_at, now);
        let bla_sum: f64 = access_history
            .iter()
            .map(|access| {
                let t_k = days_between(*access, now);
                importance * t_k.powf(-self.decay_constant)
            })
            .sum();
        let bla_sum = bla_sum.max(0.0001);

        let exponent = (-self.forgetting_rate * delta_days / bla_sum).clamp(-100.0, 100.0);
        let activation = self.offset + (1.0 - self.offset) * exponent.exp();
        activation.clamp(self.offset, 1.0)
    }

    /// Record an access: append now, trim the history, recompute.
    /// Returns the store write-back.
    pub fn on_access(
        &self,
        node_id: &str,
        label: NodeLabel,
        access_history: &[DateTime<Utc>],
        importance_score: f64,
        now: DateTime<Utc>,
    ) -> ActivationUpdate {
        let mut history = access_history.to_vec();
        history.push(now);
        let history = trim_history(history);
        let activation = self.activation(&history, now, importance_score, now);

        ActivationUpdate {
            node_id: node_id.to_string(),
            label,
            activation_value: activation,
            last_accessed_at: now,
            access_history: history,
        }
    }

    /// Expected activation per day for a single access at day zero
    pub fn forgetting_curve(
        &self,
        initial_time: DateTime<Utc>,
        importance_score: f64,
        days: u32,
    ) -> Vec<CurvePoint> {
        let history = vec![initial_time];
        (0..=days)
            .map(|day| {
                let now = initial_time + Duration::days(i64::from(day));
                CurvePoint {
                    day,
                    activation: self.activation(&history, initial_time, importance_score, now),
                }
            })
            .collect()
    }
}

/// Deterministic trim: keep the most recent half of the budget, sample the
/// remainder evenly from the older records, return most-recent first.
pub fn trim_history(mut history: Vec<DateTime<Utc>>) -> Vec<DateTime<Utc>> {
    history.sort_unstable_by(|a, b| b.cmp(a));
    if history.len() <= MAX_ACCESS_HISTORY {
        return history;
    }

    let keep_recent = MAX_ACCESS_HISTORY / 2;
    let sample_budget = MAX_ACCESS_HISTORY - keep_recent;

    let recent: Vec<DateTime<Utc>> = history[..keep_recent].to_vec();
    let older = &history[keep_recent..];

    let mut sampled: Vec<DateTime<Utc>> = if older.len() <= sample_budget {
        older.to_vec()
    } else {
        let step = older.len() as f64 / sample_budget as f64;
        (0..sample_budget)
            .map(|i| older[(i as f64 * step) as usize])
            .collect()
    };

    let mut trimmed = recent;
    trimmed.append(&mut sampled);
    trimmed.sort_unstable_by(|a, b| b.cmp(a));
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> ActivationEngine {
        ActivationEngine::new(&ForgettingConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_single_access_matches_closed_form() {
        // R = offset + (1−offset)·exp(−λ·max / (I · max^(−d)))
        let engine = engine();
        let days = 30.0f64;
        let importance = 0.5f64;
        let now = t0() + Duration::days(30);

        let expected = 0.1
            + 0.9 * (-0.3 * days / (importance * days.powf(-0.5))).exp();
        let actual = engine.activation(&[t0()], t0(), importance, now);
        assert!(
            (actual - expected).abs() < expected * 0.01,
            "actual {actual} expected {expected}"
        );
    }

    #[test]
    fn test_activation_bounds_hold() {
        let engine = engine();
        // Fresh access: activation near 1.0 but never above.
        let fresh = engine.activation(&[t0()], t0(), 1.0, t0());
        assert!(fresh <= 1.0 && fresh >= 0.1);

        // Centuries of neglect: never below offset.
        let ancient = engine.activation(&[t0()], t0(), 0.01, t0() + Duration::days(36_500));
        assert!((ancient - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_frequent_access_decays_slower() {
        let engine = engine();
        let now = t0() + Duration::days(40);
        let single = engine.activation(&[t0()], t0(), 0.5, now);

        let many: Vec<DateTime<Utc>> =
            (0..10).map(|i| t0() + Duration::days(i * 2)).collect();
        let last = many.iter().copied().max().unwrap();
        let frequent = engine.activation(&many, last, 0.5, now);
        assert!(frequent > single);
    }

    #[test]
    fn test_higher_importance_decays_slower() {
        let engine = engine();
        let now = t0() + Duration::days(20);
        let low = engine.activation(&[t0()], t0(), 0.1, now);
        let high = engine.activation(&[t0()], t0(), 0.9, now);
        assert!(high > low);
    }

    #[test]
    fn test_on_access_appends_and_recomputes() {
        let engine = engine();
        let history = vec![t0()];
        let now = t0() + Duration::days(5);

        let update = engine.on_access("n1", NodeLabel::Statement, &history, 0.5, now);
        assert_eq!(update.access_history.len(), 2);
        assert_eq!(update.access_history[0], now);
        assert_eq!(update.last_accessed_at, now);
        // Just accessed: activation snaps back toward 1.0.
        assert!(update.activation_value > 0.9);
    }

    #[test]
    fn test_trim_keeps_bound_and_recent_half() {
        let history: Vec<DateTime<Utc>> =
            (0..250).map(|i| t0() + Duration::hours(i)).collect();
        let trimmed = trim_history(history.clone());

        assert_eq!(trimmed.len(), MAX_ACCESS_HISTORY);
        // Most-recent first.
        assert_eq!(trimmed[0], t0() + Duration::hours(249));
        for pair in trimmed.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        // The most recent 50 survive verbatim.
        for i in 0..50 {
            assert_eq!(trimmed[i], t0() + Duration::hours(249 - i as i64));
        }
    }

    #[test]
    fn test_trim_noop_under_bound() {
        let history: Vec<DateTime<Utc>> =
            (0..10).map(|i| t0() + Duration::days(i)).collect();
        assert_eq!(trim_history(history).len(), 10);
    }

    #[test]
    fn test_forgetting_curve_is_monotonic_decreasing() {
        let engine = ActivationEngine::for_curve(&ForgettingConfig::default());
        let curve = engine.forgetting_curve(t0(), 0.5, 60);

        assert_eq!(curve.len(), 61);
        assert_eq!(curve[0].day, 0);
        assert!(curve[0].activation > 0.99);
        for pair in curve.windows(2) {
            assert!(pair[0].activation >= pair[1].activation);
        }
        assert!(curve[60].activation >= 0.1);
    }

    #[test]
    fn test_empty_history_floors_at_offset() {
        let engine = engine();
        assert_eq!(engine.activation(&[], t0(), 0.5, t0()), 0.1);
    }
}
