//! Temporal booking rules.
//!
//! The validator is pure: the caller gathers a [`ValidationContext`] (normally
//! under the asset's write lock) and every enabled rule inspects the candidate
//! against it in a fixed order. Violations accumulate; nothing short-circuits.

mod checks;
mod context;
#[cfg(test)]
mod tests;

use std::fmt;

use serde::Serialize;

use crate::config::{QuotaConfig, RulesConfig};
use crate::model::BookingRequest;

pub use checks::*;
pub use context::ValidationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    MaxLength,
    NoConsecutive,
    RollingWindow,
    LeadTime,
    Cooldown,
    ConcurrentCap,
    Blackout,
    ShareCap,
    PurposeDuplication,
    AssetExclusivity,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::MaxLength => "max_length",
            RuleKind::NoConsecutive => "no_consecutive",
            RuleKind::RollingWindow => "rolling_window",
            RuleKind::LeadTime => "lead_time",
            RuleKind::Cooldown => "cooldown",
            RuleKind::ConcurrentCap => "concurrent_cap",
            RuleKind::Blackout => "blackout",
            RuleKind::ShareCap => "share_cap",
            RuleKind::PurposeDuplication => "purpose_duplication",
            RuleKind::AssetExclusivity => "asset_exclusivity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: RuleKind,
    pub message: String,
}

impl Violation {
    pub fn new(rule: RuleKind, message: impl Into<String>) -> Self {
        Self { rule, message: message.into() }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One independently testable booking rule.
pub trait Rule: Send + Sync {
    fn kind(&self) -> RuleKind;
    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation>;
}

pub struct Validator {
    rules: Vec<Box<dyn Rule>>,
}

impl Validator {
    /// Enabled rules from `config`, in evaluation order.
    pub fn from_config(config: &RulesConfig, quota: &QuotaConfig) -> Self {
        let mut rules: Vec<Box<dyn Rule>> = Vec::with_capacity(10);
        if config.max_length.enabled {
            rules.push(Box::new(MaxLength { max_days: config.max_length.max_days }));
        }
        if config.no_consecutive.enabled {
            rules.push(Box::new(NoConsecutive {
                monetization_lob: quota.monetization_lob.clone(),
            }));
        }
        if config.rolling_window.enabled {
            rules.push(Box::new(RollingWindow {
                window_days: config.rolling_window.window_days,
                max_days: config.rolling_window.max_days,
            }));
        }
        if config.lead_time.enabled {
            rules.push(Box::new(LeadTime { lead_days: config.lead_time.lead_days }));
        }
        if config.cooldown.enabled {
            rules.push(Box::new(Cooldown { cooldown_days: config.cooldown.cooldown_days }));
        }
        if config.concurrent.enabled {
            rules.push(Box::new(ConcurrentCap { max_active: config.concurrent.max_active }));
        }
        if config.blackout.enabled {
            rules.push(Box::new(Blackout { dates: config.blackout.dates.clone() }));
        }
        if config.share_cap.enabled {
            rules.push(Box::new(ShareCap {
                percent: config.share_cap.percent,
                quota: quota.clone(),
            }));
        }
        if config.purpose.enabled {
            rules.push(Box::new(PurposeDuplication { window_days: config.purpose.window_days }));
        }
        if config.exclusivity.enabled {
            rules.push(Box::new(AssetExclusivity {
                allowed: config.exclusivity.allowed.clone(),
            }));
        }
        Self { rules }
    }

    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    pub fn rule_kinds(&self) -> Vec<RuleKind> {
        self.rules.iter().map(|r| r.kind()).collect()
    }

    pub fn validate(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Vec<Violation> {
        self.rules
            .iter()
            .filter_map(|rule| rule.check(candidate, ctx))
            .collect()
    }
}

/// Plain messages, for callers that only surface text.
pub fn messages(violations: &[Violation]) -> Vec<String> {
    violations.iter().map(|v| v.message.clone()).collect()
}
