use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use ulid::Ulid;

use super::*;
use crate::config::{Config, RulesConfig};
use crate::engine::EngineError;
use crate::model::*;
use crate::repository::BookingQueries;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn today() -> NaiveDate {
    d("2025-01-01")
}

fn asset(level: AssetLevel) -> Asset {
    Asset {
        id: Ulid::new(),
        name: Some("Lobby screen".into()),
        asset_type: "screen".into(),
        level,
        value_per_day: Decimal::new(500, 0),
        max_slots: 10,
    }
}

fn request(asset: &Asset, lob: &str, start: &str, end: &str) -> BookingRequest {
    BookingRequest {
        id: None,
        asset_id: asset.id,
        lob: lob.into(),
        purpose: "spring campaign".into(),
        range: DateRange::new(d(start), d(end)),
        slots: 1,
    }
}

fn booking(asset: &Asset, lob: &str, start: &str, end: &str) -> Booking {
    Booking {
        id: Ulid::new(),
        asset_id: asset.id,
        lob: lob.into(),
        purpose: "earlier campaign".into(),
        range: DateRange::new(d(start), d(end)),
        slots: 1,
        status: BookingStatus::Approved,
        auction_status: AuctionStatus::None,
        allocated_class: LobClass::Internal,
        winning_bid: None,
        created_at: Utc::now(),
    }
}

fn default_validator() -> Validator {
    let config = Config::default();
    Validator::from_config(&config.rules, &config.quota)
}

fn only(rule: impl Rule + 'static) -> Validator {
    Validator::with_rules(vec![Box::new(rule)])
}

// ── Rule order and configuration ─────────────────────────

#[test]
fn rules_evaluated_in_fixed_order() {
    assert_eq!(
        default_validator().rule_kinds(),
        vec![
            RuleKind::MaxLength,
            RuleKind::NoConsecutive,
            RuleKind::RollingWindow,
            RuleKind::LeadTime,
            RuleKind::Cooldown,
            RuleKind::ConcurrentCap,
            RuleKind::Blackout,
            RuleKind::ShareCap,
            RuleKind::PurposeDuplication,
            RuleKind::AssetExclusivity,
        ]
    );
}

#[test]
fn disabled_rules_are_skipped() {
    let mut rules = RulesConfig::default();
    rules.max_length.enabled = false;
    rules.lead_time.enabled = false;
    let validator = Validator::from_config(&rules, &Config::default().quota);
    let kinds = validator.rule_kinds();
    assert_eq!(kinds.len(), 8);
    assert!(!kinds.contains(&RuleKind::MaxLength));

    let a = asset(AssetLevel::Secondary);
    // 10 days and starting tomorrow: both would fail if enabled
    let c = request(&a, "Marketing", "2025-01-02", "2025-01-11");
    let ctx = ValidationContext::empty(a, today());
    assert!(validator.validate(&c, &ctx).is_empty());
}

#[test]
fn clean_candidate_passes_all_rules() {
    let a = asset(AssetLevel::Secondary);
    let c = request(&a, "Marketing", "2025-03-03", "2025-03-07");
    let ctx = ValidationContext::empty(a, today());
    assert!(default_validator().validate(&c, &ctx).is_empty());
}

#[test]
fn violations_accumulate() {
    let mut rules = RulesConfig::default();
    rules.blackout.dates = vec![d("2025-01-03")];
    let validator = Validator::from_config(&rules, &Config::default().quota);
    let a = asset(AssetLevel::Secondary);
    let c = request(&a, "Marketing", "2025-01-02", "2025-01-12");
    let ctx = ValidationContext::empty(a, today());

    let kinds: Vec<_> = validator.validate(&c, &ctx).iter().map(|v| v.rule).collect();
    assert_eq!(kinds, vec![RuleKind::MaxLength, RuleKind::LeadTime, RuleKind::Blackout]);
}

#[test]
fn validate_is_idempotent() {
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    ctx.lob_window = vec![booking(&a, "Marketing", "2025-02-20", "2025-03-01")];
    ctx.active_for_lob = vec![
        booking(&a, "Marketing", "2025-03-01", "2025-03-10"),
        booking(&a, "Marketing", "2025-03-02", "2025-03-08"),
    ];
    let c = request(&a, "Marketing", "2025-03-05", "2025-03-14");
    let validator = default_validator();

    let first = validator.validate(&c, &ctx);
    let second = validator.validate(&c, &ctx);
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

// ── Rule 1: max length ───────────────────────────────────

#[test]
fn seven_days_pass_eight_fail() {
    let a = asset(AssetLevel::Secondary);
    let ctx = ValidationContext::empty(a.clone(), today());
    let validator = only(MaxLength { max_days: 7 });

    let seven = request(&a, "Marketing", "2025-03-01", "2025-03-07");
    assert!(validator.validate(&seven, &ctx).is_empty());

    let eight = request(&a, "Marketing", "2025-03-01", "2025-03-08");
    let violations = validator.validate(&eight, &ctx);
    assert_eq!(violations.len(), 1);
    assert_eq!(
        violations[0].message,
        "Exceeds maximum allowed booking length of 7 days"
    );
    assert_eq!(violations[0].to_string(), violations[0].message);
}

// ── Rule 2: no consecutive ───────────────────────────────

#[test]
fn adjacent_booking_rejected() {
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    ctx.adjacent = vec![booking(&a, "Marketing", "2025-03-08", "2025-03-10")];
    let c = request(&a, "Marketing", "2025-03-03", "2025-03-07");
    let rule = NoConsecutive { monetization_lob: MONETIZATION_LOB.into() };
    let v = rule.check(&c, &ctx).unwrap();
    assert_eq!(v.rule, RuleKind::NoConsecutive);
}

#[test]
fn primary_monetization_backfill_may_be_consecutive() {
    let rule = NoConsecutive { monetization_lob: MONETIZATION_LOB.into() };

    let primary = asset(AssetLevel::Primary);
    let mut ctx = ValidationContext::empty(primary.clone(), today());
    ctx.adjacent = vec![booking(&primary, MONETIZATION_LOB, "2025-03-08", "2025-03-10")];
    let c = request(&primary, MONETIZATION_LOB, "2025-03-03", "2025-03-07");
    assert!(rule.check(&c, &ctx).is_none());

    // Secondary assets get no exemption.
    let secondary = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(secondary.clone(), today());
    ctx.adjacent = vec![booking(&secondary, MONETIZATION_LOB, "2025-03-08", "2025-03-10")];
    let c = request(&secondary, MONETIZATION_LOB, "2025-03-03", "2025-03-07");
    assert!(rule.check(&c, &ctx).is_some());
}

// ── Rule 3: rolling window ───────────────────────────────

#[test]
fn rolling_window_counts_previous_days() {
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    // 10 booked days in the trailing window
    ctx.lob_window = vec![
        booking(&a, "Marketing", "2025-03-01", "2025-03-05"),
        booking(&a, "Marketing", "2025-03-10", "2025-03-14"),
    ];
    let validator = only(RollingWindow { window_days: 30, max_days: 14 });

    let five = request(&a, "Marketing", "2025-03-20", "2025-03-24");
    let violations = validator.validate(&five, &ctx);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].message.contains("15 days"));

    let four = request(&a, "Marketing", "2025-03-20", "2025-03-23");
    assert!(validator.validate(&four, &ctx).is_empty());
}

// ── Rule 4: lead time ────────────────────────────────────

#[test]
fn lead_time_applies_to_new_bookings_only() {
    let a = asset(AssetLevel::Secondary);
    let ctx = ValidationContext::empty(a.clone(), today());
    let rule = LeadTime { lead_days: 3 };

    let too_soon = request(&a, "Marketing", "2025-01-03", "2025-01-04");
    assert!(rule.check(&too_soon, &ctx).is_some());

    let on_time = request(&a, "Marketing", "2025-01-04", "2025-01-05");
    assert!(rule.check(&on_time, &ctx).is_none());

    let mut reschedule = too_soon.clone();
    reschedule.id = Some(Ulid::new());
    assert!(rule.check(&reschedule, &ctx).is_none());
}

// ── Rule 5: cooldown ─────────────────────────────────────

#[test]
fn cooldown_after_last_booking() {
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    ctx.last_booking = Some(booking(&a, "Marketing", "2025-03-01", "2025-03-10"));
    let rule = Cooldown { cooldown_days: 3 };

    let early = request(&a, "Marketing", "2025-03-12", "2025-03-13");
    assert!(rule.check(&early, &ctx).is_some());

    let ready = request(&a, "Marketing", "2025-03-13", "2025-03-14");
    assert!(rule.check(&ready, &ctx).is_none());
}

// ── Rule 6: concurrent cap ───────────────────────────────

#[test]
fn concurrent_cap_counts_active_bookings() {
    let a = asset(AssetLevel::Secondary);
    let other = asset(AssetLevel::Tertiary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    let rule = ConcurrentCap { max_active: 2 };
    let c = request(&a, "Marketing", "2025-03-05", "2025-03-06");

    ctx.active_for_lob = vec![booking(&other, "Marketing", "2025-03-01", "2025-03-07")];
    assert!(rule.check(&c, &ctx).is_none());

    ctx.active_for_lob.push(booking(&other, "Marketing", "2025-03-04", "2025-03-09"));
    assert!(rule.check(&c, &ctx).is_some());
}

// ── Rule 7: blackout ─────────────────────────────────────

#[test]
fn blackout_rejects_even_when_everything_else_passes() {
    let mut rules = RulesConfig::default();
    rules.blackout.dates = vec![d("2024-12-25")];
    let validator = Validator::from_config(&rules, &Config::default().quota);
    let a = asset(AssetLevel::Secondary);
    let ctx = ValidationContext::empty(a.clone(), d("2024-12-01"));

    let c = request(&a, "Marketing", "2024-12-23", "2024-12-27");
    let violations = validator.validate(&c, &ctx);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, RuleKind::Blackout);
    assert!(violations[0].message.contains("2024-12-25"));

    // Endpoint hits count too.
    let c = request(&a, "Marketing", "2024-12-25", "2024-12-25");
    assert_eq!(validator.validate(&c, &ctx).len(), 1);

    let c = request(&a, "Marketing", "2024-12-26", "2024-12-30");
    assert!(validator.validate(&c, &ctx).is_empty());
}

// ── Rule 8: share cap ────────────────────────────────────

#[test]
fn quarter_boundaries() {
    assert_eq!(
        quarter_of(d("2025-02-14")),
        DateRange::new(d("2025-01-01"), d("2025-03-31"))
    );
    assert_eq!(
        quarter_of(d("2024-12-31")),
        DateRange::new(d("2024-10-01"), d("2024-12-31"))
    );
    assert_eq!(quarter_of(d("2024-05-01")).days(), 91);
}

#[test]
fn share_cap_over_quarter() {
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    // Q2 2025 has 91 days; 0.40 of it is 36.4 days.
    ctx.lob_quarter = vec![
        booking(&a, "Marketing", "2025-04-01", "2025-04-15"),
        booking(&a, "Marketing", "2025-05-01", "2025-05-15"),
    ];
    let rule = ShareCap { percent: 0.40, quota: Config::default().quota };

    let fits = request(&a, "Marketing", "2025-06-01", "2025-06-06");
    assert!(rule.check(&fits, &ctx).is_none()); // 36 days

    let over = request(&a, "Marketing", "2025-06-01", "2025-06-07");
    let v = rule.check(&over, &ctx).unwrap(); // 37 days
    assert!(!v.message.starts_with("Monetization"));
}

#[test]
fn share_cap_clips_bookings_to_quarter() {
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    // Only 5 of these 40 days fall inside Q2.
    ctx.lob_quarter = vec![booking(&a, "Marketing", "2025-02-25", "2025-04-05")];
    let rule = ShareCap { percent: 0.40, quota: Config::default().quota };
    let c = request(&a, "Marketing", "2025-06-01", "2025-06-30");
    assert!(rule.check(&c, &ctx).is_none()); // 35 / 91
}

#[test]
fn monetization_cap_is_tighter() {
    let rule = ShareCap { percent: 0.40, quota: Config::default().quota };
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    // 10 days already in Q2; +5 = 15/91 = 16.5% > 15%
    ctx.lob_quarter = vec![booking(&a, MONETIZATION_LOB, "2025-04-01", "2025-04-10")];
    let c = request(&a, MONETIZATION_LOB, "2025-05-01", "2025-05-05");
    let v = rule.check(&c, &ctx).unwrap();
    assert!(v.message.starts_with("Monetization quota exceeded"));

    // The same load is fine for a non-monetization LOB.
    let mut ctx = ValidationContext::empty(a.clone(), today());
    ctx.lob_quarter = vec![booking(&a, "Marketing", "2025-04-01", "2025-04-10")];
    let c = request(&a, "Marketing", "2025-05-01", "2025-05-05");
    assert!(rule.check(&c, &ctx).is_none());

    // A primary asset allows 20%.
    let p = asset(AssetLevel::Primary);
    let mut ctx = ValidationContext::empty(p.clone(), today());
    ctx.lob_quarter = vec![booking(&p, MONETIZATION_LOB, "2025-04-01", "2025-04-10")];
    let c = request(&p, MONETIZATION_LOB, "2025-05-01", "2025-05-05");
    assert!(rule.check(&c, &ctx).is_none());
}

#[test]
fn monetization_cap_uses_asset_override() {
    let rule = ShareCap { percent: 0.40, quota: Config::default().quota };
    let p = asset(AssetLevel::Primary);
    let mut ctx = ValidationContext::empty(p.clone(), today());
    ctx.quota_override = Some(AssetQuotaConfig {
        internal_guarantee: 0.9,
        external_limit: 0.1,
        monetization_limit: 0.05,
    });
    let c = request(&p, MONETIZATION_LOB, "2025-05-01", "2025-05-05"); // 5/91 = 5.5%
    assert!(rule.check(&c, &ctx).unwrap().message.starts_with("Monetization quota exceeded"));
}

// ── Rule 9: purpose duplication ──────────────────────────

#[test]
fn duplicate_purpose_rejected() {
    let a = asset(AssetLevel::Secondary);
    let mut ctx = ValidationContext::empty(a.clone(), today());
    let rule = PurposeDuplication { window_days: 30 };
    let c = request(&a, "Sales", "2025-03-20", "2025-03-22");
    assert!(rule.check(&c, &ctx).is_none());

    let mut earlier = booking(&a, "Marketing", "2025-03-01", "2025-03-03");
    earlier.purpose = c.purpose.clone();
    ctx.purpose_window = vec![earlier];
    assert!(rule.check(&c, &ctx).is_some());
}

// ── Rule 10: exclusivity ─────────────────────────────────

#[test]
fn asset_type_allow_list() {
    let rule = AssetExclusivity {
        allowed: HashMap::from([("screen".to_string(), vec!["AI Bot".to_string()])]),
    };
    let a = asset(AssetLevel::Secondary);
    let ctx = ValidationContext::empty(a.clone(), today());

    assert!(rule.check(&request(&a, "AI Bot", "2025-03-01", "2025-03-02"), &ctx).is_none());
    assert!(rule.check(&request(&a, "Sales", "2025-03-01", "2025-03-02"), &ctx).is_some());

    let mut open = a.clone();
    open.asset_type = "billboard".into();
    let ctx = ValidationContext::empty(open.clone(), today());
    assert!(rule.check(&request(&open, "Sales", "2025-03-01", "2025-03-02"), &ctx).is_none());
}

// ── Context gathering ────────────────────────────────────

/// Canned query answers; records which exclusions it was asked for.
struct CannedQueries {
    adjacent: Vec<Booking>,
    window: Vec<Booking>,
    last: Option<Booking>,
    excluded: std::sync::Mutex<Vec<Option<Ulid>>>,
}

impl CannedQueries {
    fn note(&self, exclude: Option<Ulid>) {
        self.excluded.lock().unwrap().push(exclude);
    }
}

#[async_trait]
impl BookingQueries for CannedQueries {
    async fn find_conflicts(
        &self,
        _asset_id: Ulid,
        _range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        self.note(exclude);
        Ok(Vec::new())
    }

    async fn find_adjacent_by_asset_and_lob(
        &self,
        _asset_id: Ulid,
        _lob: &str,
        _range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        self.note(exclude);
        Ok(self.adjacent.clone())
    }

    async fn find_by_asset_lob_within_window(
        &self,
        _asset_id: Ulid,
        _lob: &str,
        window: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        self.note(exclude);
        Ok(self
            .window
            .iter()
            .filter(|b| b.range.overlaps(&window))
            .cloned()
            .collect())
    }

    async fn find_by_asset_purpose_within_window(
        &self,
        _asset_id: Ulid,
        _purpose: &str,
        _window: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        self.note(exclude);
        Ok(Vec::new())
    }

    async fn find_active_by_lob(
        &self,
        _lob: &str,
        _on: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        self.note(exclude);
        Ok(Vec::new())
    }

    async fn find_last_booking_by_asset_lob(
        &self,
        _asset_id: Ulid,
        _lob: &str,
        _before: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Option<Booking>, EngineError> {
        self.note(exclude);
        Ok(self.last.clone())
    }

    async fn get_active_bids(&self, _booking_id: Ulid) -> Result<Vec<Bid>, EngineError> {
        Ok(Vec::new())
    }

    async fn get_asset_quota_config(
        &self,
        _asset_id: Ulid,
    ) -> Result<Option<AssetQuotaConfig>, EngineError> {
        Ok(None)
    }

    async fn get_fairness_config(
        &self,
        _asset_id: Ulid,
    ) -> Result<Option<FairnessConfig>, EngineError> {
        Ok(None)
    }

    async fn get_bid_caps(
        &self,
        _lob: &str,
        _level: AssetLevel,
    ) -> Result<Option<BidCap>, EngineError> {
        Ok(None)
    }

    async fn get_roi_metrics(&self, _lob: &str) -> Result<Option<RoiMetrics>, EngineError> {
        Ok(None)
    }
}

#[test]
fn gather_splits_window_and_quarter() {
    let a = asset(AssetLevel::Secondary);
    let february = booking(&a, "Marketing", "2025-02-20", "2025-02-24");
    let april = booking(&a, "Marketing", "2025-04-02", "2025-04-03");
    let queries = CannedQueries {
        adjacent: Vec::new(),
        window: vec![february.clone(), april.clone()],
        last: Some(february.clone()),
        excluded: std::sync::Mutex::new(Vec::new()),
    };
    let c = request(&a, "Marketing", "2025-03-10", "2025-03-12");
    let rules = RulesConfig::default();

    let ctx = tokio_test::block_on(ValidationContext::gather(&queries, &a, &c, &rules, today()))
        .unwrap();
    // rolling window reaches back to 2025-02-08
    assert_eq!(ctx.lob_window, vec![february.clone()]);
    // Q1 2025
    assert_eq!(ctx.lob_quarter, vec![february.clone()]);
    assert_eq!(ctx.last_booking, Some(february));
    assert!(queries.excluded.lock().unwrap().iter().all(|e| e.is_none()));
}

#[test]
fn gather_excludes_rescheduled_booking() {
    let a = asset(AssetLevel::Secondary);
    let queries = CannedQueries {
        adjacent: Vec::new(),
        window: Vec::new(),
        last: None,
        excluded: std::sync::Mutex::new(Vec::new()),
    };
    let id = Ulid::new();
    let mut c = request(&a, "Marketing", "2025-03-10", "2025-03-12");
    c.id = Some(id);

    tokio_test::block_on(ValidationContext::gather(
        &queries,
        &a,
        &c,
        &RulesConfig::default(),
        today(),
    ))
    .unwrap();
    let excluded = queries.excluded.lock().unwrap();
    assert_eq!(excluded.len(), 6);
    assert!(excluded.iter().all(|e| *e == Some(id)));
}

#[test]
fn messages_flattens_violations() {
    let violations = vec![
        Violation::new(RuleKind::MaxLength, "too long"),
        Violation::new(RuleKind::Blackout, "blackout"),
    ];
    assert_eq!(messages(&violations), vec!["too long", "blackout"]);
}
