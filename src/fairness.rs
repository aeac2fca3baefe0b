//! Bid fairness scoring.
//!
//! `score = normalized_roi × strategic_weight × time_fairness (+ bonus for internal bids)`

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::FairnessDefaults;
use crate::model::*;

/// Each factor of one score, kept for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub normalized_roi: f64,
    pub strategic_weight: f64,
    pub time_fairness: f64,
    pub bonus: f64,
    pub score: f64,
}

/// Inputs for scoring one bid on one asset.
pub struct ScoreInput<'a> {
    pub lob: &'a str,
    pub class: LobClass,
    pub level: AssetLevel,
    pub roi: Option<&'a RoiMetrics>,
    pub fairness: Option<&'a FairnessConfig>,
    pub bid_cap: Option<&'a BidCap>,
    /// The LOB's last auction win on this asset.
    pub last_win: Option<NaiveDate>,
    pub today: NaiveDate,
}

pub struct FairnessScorer {
    defaults: FairnessDefaults,
}

impl FairnessScorer {
    pub fn new(defaults: FairnessDefaults) -> Self {
        Self { defaults }
    }

    /// `actual / target` for the LOB's ROI metric, capped. Neutral (1.0) when
    /// the LOB has no ROI entry or the metric was never recorded.
    pub fn normalized_roi(&self, lob: &str, metrics: Option<&RoiMetrics>) -> f64 {
        let Some(target) = self.defaults.roi_table.get(lob) else {
            return 1.0;
        };
        let Some(actual) = metrics.and_then(|m| m.get(&target.metric)) else {
            return 1.0;
        };
        if target.target <= 0.0 {
            return 1.0;
        }
        (actual / target.target).clamp(0.0, self.defaults.roi_cap)
    }

    pub fn strategic_weight(
        &self,
        class: LobClass,
        level: AssetLevel,
        fairness: Option<&FairnessConfig>,
        bid_cap: Option<&BidCap>,
    ) -> f64 {
        if let Some(weight) = fairness.and_then(|f| f.strategic_weight_override) {
            return weight;
        }
        match class {
            LobClass::Internal => self.defaults.internal_weight,
            LobClass::External => self.defaults.external_weight,
            LobClass::Monetization => fairness
                .and_then(|f| f.revenue_floor)
                .or_else(|| bid_cap.and_then(|c| c.revenue_floor))
                .unwrap_or_else(|| self.defaults.revenue_floor.get(level)),
        }
    }

    pub fn time_fairness(
        &self,
        last_win: Option<NaiveDate>,
        today: NaiveDate,
        fairness: Option<&FairnessConfig>,
    ) -> f64 {
        let window = self.defaults.window_days.max(1);
        let days_since = match last_win {
            Some(won) => (today - won).num_days().max(0),
            None => window,
        };
        let decay = fairness
            .and_then(|f| f.time_decay_factor)
            .unwrap_or(self.defaults.time_decay_factor);
        (1.0 + decay * days_since as f64 / window as f64).min(self.defaults.time_fairness_cap)
    }

    pub fn score(&self, input: &ScoreInput<'_>) -> ScoreBreakdown {
        let normalized_roi = self.normalized_roi(input.lob, input.roi);
        let strategic_weight =
            self.strategic_weight(input.class, input.level, input.fairness, input.bid_cap);
        let time_fairness = self.time_fairness(input.last_win, input.today, input.fairness);
        let bonus = match input.class {
            LobClass::Internal => input
                .fairness
                .and_then(|f| f.fairness_bonus)
                .unwrap_or(self.defaults.fairness_bonus),
            _ => 0.0,
        };
        let score = (normalized_roi * strategic_weight * time_fairness + bonus).max(0.0);
        ScoreBreakdown {
            normalized_roi,
            strategic_weight,
            time_fairness,
            bonus,
            score,
        }
    }
}
