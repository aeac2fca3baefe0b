use std::collections::HashMap;

use chrono::{Datelike, Days, NaiveDate};

use crate::config::QuotaConfig;
use crate::model::{AssetLevel, BookingRequest, DateRange};

use super::{Rule, RuleKind, ValidationContext, Violation};

/// Slack for comparing day ratios against configured fractions.
const RATIO_EPSILON: f64 = 1e-9;

/// Calendar quarter containing `date`.
pub fn quarter_of(date: NaiveDate) -> DateRange {
    let first_month = (date.month0() / 3) * 3 + 1;
    let start = date
        .with_day(1)
        .and_then(|d| d.with_month(first_month))
        .unwrap_or(date);
    let end = start
        .checked_add_months(chrono::Months::new(3))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date);
    DateRange::new(start, end)
}

fn plus_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

pub struct MaxLength {
    pub max_days: i64,
}

impl Rule for MaxLength {
    fn kind(&self) -> RuleKind {
        RuleKind::MaxLength
    }

    fn check(&self, candidate: &BookingRequest, _ctx: &ValidationContext) -> Option<Violation> {
        (candidate.range.days() > self.max_days).then(|| {
            Violation::new(
                self.kind(),
                format!("Exceeds maximum allowed booking length of {} days", self.max_days),
            )
        })
    }
}

/// Same asset+LOB bookings need at least one free day between them.
/// Primary-asset monetization backfill is exempt.
pub struct NoConsecutive {
    pub monetization_lob: String,
}

impl Rule for NoConsecutive {
    fn kind(&self) -> RuleKind {
        RuleKind::NoConsecutive
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        if ctx.asset.level == AssetLevel::Primary && candidate.lob == self.monetization_lob {
            return None;
        }
        let neighbour = ctx.adjacent.first()?;
        Some(Violation::new(
            self.kind(),
            format!(
                "Consecutive bookings for {} on this asset need at least a one-day gap (adjacent booking {} runs {} to {})",
                candidate.lob, neighbour.id, neighbour.range.start, neighbour.range.end
            ),
        ))
    }
}

pub struct RollingWindow {
    pub window_days: u64,
    pub max_days: i64,
}

impl Rule for RollingWindow {
    fn kind(&self) -> RuleKind {
        RuleKind::RollingWindow
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        let booked: i64 = ctx.lob_window.iter().map(|b| b.range.days()).sum();
        let total = booked + candidate.range.days();
        (total > self.max_days).then(|| {
            Violation::new(
                self.kind(),
                format!(
                    "Rolling window quota exceeded: {total} days for {} within {} days (max {})",
                    candidate.lob, self.window_days, self.max_days
                ),
            )
        })
    }
}

/// Reschedules (candidate id set) skip this rule.
pub struct LeadTime {
    pub lead_days: u64,
}

impl Rule for LeadTime {
    fn kind(&self) -> RuleKind {
        RuleKind::LeadTime
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        if candidate.id.is_some() {
            return None;
        }
        let earliest = plus_days(ctx.today, self.lead_days);
        (candidate.range.start < earliest).then(|| {
            Violation::new(
                self.kind(),
                format!(
                    "Bookings must start at least {} days in advance (earliest start {earliest})",
                    self.lead_days
                ),
            )
        })
    }
}

pub struct Cooldown {
    pub cooldown_days: u64,
}

impl Rule for Cooldown {
    fn kind(&self) -> RuleKind {
        RuleKind::Cooldown
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        let last = ctx.last_booking.as_ref()?;
        let ready = plus_days(last.range.end, self.cooldown_days);
        (candidate.range.start < ready).then(|| {
            Violation::new(
                self.kind(),
                format!(
                    "Cooldown of {} days after the booking ending {} not met (next start {ready})",
                    self.cooldown_days, last.range.end
                ),
            )
        })
    }
}

pub struct ConcurrentCap {
    pub max_active: usize,
}

impl Rule for ConcurrentCap {
    fn kind(&self) -> RuleKind {
        RuleKind::ConcurrentCap
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        let active = ctx.active_for_lob.len();
        (active >= self.max_active).then(|| {
            Violation::new(
                self.kind(),
                format!(
                    "{} already has {active} active bookings on {} (max {})",
                    candidate.lob, candidate.range.start, self.max_active
                ),
            )
        })
    }
}

pub struct Blackout {
    pub dates: Vec<NaiveDate>,
}

impl Rule for Blackout {
    fn kind(&self) -> RuleKind {
        RuleKind::Blackout
    }

    fn check(&self, candidate: &BookingRequest, _ctx: &ValidationContext) -> Option<Violation> {
        let mut hits: Vec<NaiveDate> = self
            .dates
            .iter()
            .copied()
            .filter(|d| candidate.range.contains(*d))
            .collect();
        if hits.is_empty() {
            return None;
        }
        hits.sort();
        hits.dedup();
        let listed = hits.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ");
        Some(Violation::new(
            self.kind(),
            format!("Booking includes blackout date(s): {listed}"),
        ))
    }
}

/// Quarterly share of one asset+LOB, with the tighter monetization cap layered on top.
pub struct ShareCap {
    pub percent: f64,
    pub quota: QuotaConfig,
}

impl ShareCap {
    fn monetization_cap(&self, ctx: &ValidationContext) -> f64 {
        let limit = ctx
            .quota_override
            .unwrap_or_else(|| self.quota.level_defaults(ctx.asset.level))
            .monetization_limit;
        limit.min(self.percent)
    }
}

impl Rule for ShareCap {
    fn kind(&self) -> RuleKind {
        RuleKind::ShareCap
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        let quarter = quarter_of(candidate.range.start);
        let booked: i64 = ctx
            .lob_quarter
            .iter()
            .filter_map(|b| b.range.intersection(&quarter))
            .map(|r| r.days())
            .sum();
        let ratio = (booked + candidate.range.days()) as f64 / quarter.days() as f64;

        if ratio > self.percent + RATIO_EPSILON {
            return Some(Violation::new(
                self.kind(),
                format!(
                    "{} would hold {} of this asset's quarter starting {} (max {})",
                    candidate.lob,
                    percent(ratio),
                    quarter.start,
                    percent(self.percent)
                ),
            ));
        }
        if candidate.lob == self.quota.monetization_lob {
            let cap = self.monetization_cap(ctx);
            if ratio > cap + RATIO_EPSILON {
                return Some(Violation::new(
                    self.kind(),
                    format!(
                        "Monetization quota exceeded: {} of the quarter starting {} (max {})",
                        percent(ratio),
                        quarter.start,
                        percent(cap)
                    ),
                ));
            }
        }
        None
    }
}

pub struct PurposeDuplication {
    pub window_days: u64,
}

impl Rule for PurposeDuplication {
    fn kind(&self) -> RuleKind {
        RuleKind::PurposeDuplication
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        let existing = ctx.purpose_window.first()?;
        Some(Violation::new(
            self.kind(),
            format!(
                "Purpose \"{}\" is already booked on this asset within {} days (booking {})",
                candidate.purpose, self.window_days, existing.id
            ),
        ))
    }
}

pub struct AssetExclusivity {
    /// Asset type → permitted LOBs.
    pub allowed: HashMap<String, Vec<String>>,
}

impl Rule for AssetExclusivity {
    fn kind(&self) -> RuleKind {
        RuleKind::AssetExclusivity
    }

    fn check(&self, candidate: &BookingRequest, ctx: &ValidationContext) -> Option<Violation> {
        let permitted = self.allowed.get(&ctx.asset.asset_type)?;
        if permitted.iter().any(|lob| *lob == candidate.lob) {
            return None;
        }
        Some(Violation::new(
            self.kind(),
            format!(
                "{} may not book {} assets (allowed: {})",
                candidate.lob,
                ctx.asset.asset_type,
                permitted.join(", ")
            ),
        ))
    }
}
