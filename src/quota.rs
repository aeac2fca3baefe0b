//! Slot quotas per demand class, plus the bid caps that gate auction entries.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::{BusinessHours, QuotaConfig};
use crate::model::*;

const SHARE_EPSILON: f64 = 1e-9;

/// Why a bid was left out of an auction round.
#[derive(Debug, Clone, PartialEq)]
pub enum ExclusionReason {
    /// The class would hold more than `limit` of the asset on `date`.
    QuotaExceeded {
        class: LobClass,
        date: NaiveDate,
        share: f64,
        limit: f64,
    },
    /// External and monetization together would eat into the internal guarantee.
    GuaranteeBreached {
        date: NaiveDate,
        share: f64,
        guarantee: f64,
    },
    /// More slots than the asset has.
    CapacityExceeded { date: NaiveDate },
    MultiplierExceeded { ratio: f64, max: f64 },
    OutsideBusinessHours { at: DateTime<Utc> },
}

impl ExclusionReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ExclusionReason::QuotaExceeded { .. } => "quota",
            ExclusionReason::GuaranteeBreached { .. } => "guarantee",
            ExclusionReason::CapacityExceeded { .. } => "capacity",
            ExclusionReason::MultiplierExceeded { .. } => "multiplier",
            ExclusionReason::OutsideBusinessHours { .. } => "business_hours",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::QuotaExceeded { class, date, share, limit } => write!(
                f,
                "{class:?} share {:.1}% on {date} exceeds {:.1}%",
                share * 100.0,
                limit * 100.0
            ),
            ExclusionReason::GuaranteeBreached { date, share, guarantee } => write!(
                f,
                "non-internal share {:.1}% on {date} breaches the {:.1}% internal guarantee",
                share * 100.0,
                guarantee * 100.0
            ),
            ExclusionReason::CapacityExceeded { date } => {
                write!(f, "no free slots on {date}")
            }
            ExclusionReason::MultiplierExceeded { ratio, max } => {
                write!(f, "bid is {ratio:.2}x the base value (max {max:.2}x)")
            }
            ExclusionReason::OutsideBusinessHours { at } => {
                write!(f, "submitted outside business hours at {at}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admissibility {
    Admissible,
    Excluded(ExclusionReason),
}

impl Admissibility {
    pub fn is_admissible(&self) -> bool {
        matches!(self, Admissibility::Admissible)
    }
}

/// Everything one admissibility decision looks at.
pub struct QuotaCheck<'a> {
    pub bid: &'a Bid,
    pub asset: &'a Asset,
    pub booking: &'a Booking,
    /// Counters for each booked date, with the contested booking's own slots taken out.
    pub allocations: &'a [SlotAllocation],
    /// Per-asset override of the level defaults.
    pub quota: Option<&'a AssetQuotaConfig>,
    /// LOB × level cap, if one was set.
    pub bid_cap: Option<&'a BidCap>,
}

pub struct QuotaManager {
    config: QuotaConfig,
    business_hours: BusinessHours,
}

impl QuotaManager {
    pub fn new(config: QuotaConfig, business_hours: BusinessHours) -> Self {
        Self { config, business_hours }
    }

    pub fn classify(&self, lob: &str) -> LobClass {
        if lob == self.config.monetization_lob {
            LobClass::Monetization
        } else if self.config.external_lobs.iter().any(|l| l == lob) {
            LobClass::External
        } else {
            LobClass::Internal
        }
    }

    pub fn limits_for(
        &self,
        level: AssetLevel,
        override_config: Option<&AssetQuotaConfig>,
    ) -> AssetQuotaConfig {
        override_config
            .copied()
            .unwrap_or_else(|| self.config.level_defaults(level))
    }

    /// The cap a bid is held to: the stored one, or the class defaults.
    pub fn effective_cap(
        &self,
        class: LobClass,
        limits: &AssetQuotaConfig,
        stored: Option<&BidCap>,
    ) -> BidCap {
        if let Some(cap) = stored {
            return *cap;
        }
        let defaults = self.config.bid_caps.for_class(class);
        let slot_limit_percentage = match class {
            LobClass::Internal => 1.0,
            LobClass::External => limits.external_limit,
            LobClass::Monetization => limits.monetization_limit,
        };
        BidCap {
            max_bid_multiplier: defaults.max_bid_multiplier,
            slot_limit_percentage,
            time_restriction: defaults.time_restriction,
            revenue_floor: None,
        }
    }

    /// Quota first, then the bid multiplier, then business hours.
    pub fn check(&self, input: &QuotaCheck<'_>) -> Admissibility {
        let class = self.classify(&input.bid.lob);
        let limits = self.limits_for(input.asset.level, input.quota);
        let cap = self.effective_cap(class, &limits, input.bid_cap);

        for alloc in input.allocations {
            if let Some(reason) = self.check_date(class, &limits, &cap, alloc, input.booking.slots) {
                return Admissibility::Excluded(reason);
            }
        }

        // A base past the Decimal range dwarfs any amount, so there is no ratio to cap.
        let days = Decimal::from(input.booking.range.days());
        let base = input.asset.value_per_day.checked_mul(days);
        if let Some(ratio) = base
            .and_then(|base| input.bid.amount.checked_div(base))
            .and_then(|r| r.to_f64())
            && ratio > cap.max_bid_multiplier + SHARE_EPSILON
        {
            return Admissibility::Excluded(ExclusionReason::MultiplierExceeded {
                ratio,
                max: cap.max_bid_multiplier,
            });
        }

        if cap.time_restriction == TimeRestriction::BusinessHours
            && !self.business_hours.contains(input.bid.created_at)
        {
            return Admissibility::Excluded(ExclusionReason::OutsideBusinessHours {
                at: input.bid.created_at,
            });
        }

        Admissibility::Admissible
    }

    pub fn is_admissible(&self, input: &QuotaCheck<'_>) -> bool {
        self.check(input).is_admissible()
    }

    fn check_date(
        &self,
        class: LobClass,
        limits: &AssetQuotaConfig,
        cap: &BidCap,
        current: &SlotAllocation,
        slots: u32,
    ) -> Option<ExclusionReason> {
        let date = current.date;
        let mut after = *current;
        after.add(class, slots);

        if after.total_allocated() > after.total_slots {
            return Some(ExclusionReason::CapacityExceeded { date });
        }

        let share = after.share(class);
        let class_limit = match class {
            LobClass::Internal => 1.0,
            LobClass::External => limits.external_limit,
            LobClass::Monetization => limits.monetization_limit,
        };
        let limit = class_limit.min(cap.slot_limit_percentage);
        if share > limit + SHARE_EPSILON {
            return Some(ExclusionReason::QuotaExceeded { class, date, share, limit });
        }

        if class != LobClass::Internal {
            let outside = after.share(LobClass::External) + after.share(LobClass::Monetization);
            if outside > 1.0 - limits.internal_guarantee + SHARE_EPSILON {
                return Some(ExclusionReason::GuaranteeBreached {
                    date,
                    share: outside,
                    guarantee: limits.internal_guarantee,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn manager() -> QuotaManager {
        let mut config = QuotaConfig::default();
        config.external_lobs = vec!["Acme".into()];
        QuotaManager::new(config, BusinessHours::default())
    }

    fn asset(level: AssetLevel) -> Asset {
        Asset {
            id: Ulid::new(),
            name: None,
            asset_type: "screen".into(),
            level,
            value_per_day: Decimal::new(100, 0),
            max_slots: 10,
        }
    }

    fn booking(asset: &Asset, slots: u32) -> Booking {
        Booking {
            id: Ulid::new(),
            asset_id: asset.id,
            lob: "Marketing".into(),
            purpose: "launch".into(),
            range: DateRange::new(d("2025-03-03"), d("2025-03-07")),
            slots,
            status: BookingStatus::Approved,
            auction_status: AuctionStatus::Active,
            allocated_class: LobClass::Internal,
            winning_bid: None,
            created_at: Utc::now(),
        }
    }

    /// Tuesday mid-morning.
    fn office_hours() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 25, 10, 30, 0).unwrap()
    }

    fn bid(booking: &Booking, lob: &str, amount: i64) -> Bid {
        Bid {
            id: Ulid::new(),
            booking_id: booking.id,
            user_id: "u1".into(),
            lob: lob.into(),
            amount: Decimal::new(amount, 0),
            max_bid: None,
            reason: None,
            status: BidStatus::Active,
            created_at: office_hours(),
        }
    }

    fn empty_allocations(asset: &Asset, booking: &Booking) -> Vec<SlotAllocation> {
        booking
            .range
            .iter_days()
            .map(|date| SlotAllocation::empty(date, asset.max_slots))
            .collect()
    }

    #[test]
    fn classification() {
        let q = manager();
        assert_eq!(q.classify(MONETIZATION_LOB), LobClass::Monetization);
        assert_eq!(q.classify("Acme"), LobClass::External);
        assert_eq!(q.classify("Marketing"), LobClass::Internal);
    }

    #[test]
    fn override_replaces_level_defaults() {
        let q = manager();
        assert_eq!(q.limits_for(AssetLevel::Tertiary, None).monetization_limit, 0.10);
        let custom = AssetQuotaConfig {
            internal_guarantee: 0.5,
            external_limit: 0.5,
            monetization_limit: 0.3,
        };
        assert_eq!(q.limits_for(AssetLevel::Tertiary, Some(&custom)), custom);
    }

    #[test]
    fn secondary_monetization_twenty_percent_is_excluded() {
        let q = manager();
        let a = asset(AssetLevel::Secondary);
        let b = booking(&a, 2);
        let allocations = empty_allocations(&a, &b);
        let monetization = bid(&b, MONETIZATION_LOB, 500);

        let result = q.check(&QuotaCheck {
            bid: &monetization,
            asset: &a,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: None,
        });
        match result {
            Admissibility::Excluded(ExclusionReason::QuotaExceeded { class, share, limit, .. }) => {
                assert_eq!(class, LobClass::Monetization);
                assert!((share - 0.2).abs() < 1e-9);
                assert!((limit - 0.15).abs() < 1e-9);
            }
            other => panic!("expected quota exclusion, got {other:?}"),
        }

        // The same share fits a primary asset's 20%.
        let p = asset(AssetLevel::Primary);
        let b = booking(&p, 2);
        let allocations = empty_allocations(&p, &b);
        let monetization = bid(&b, MONETIZATION_LOB, 500);
        assert!(q.is_admissible(&QuotaCheck {
            bid: &monetization,
            asset: &p,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: None,
        }));
    }

    #[test]
    fn internal_guarantee_limits_external_plus_monetization() {
        let q = manager();
        let a = asset(AssetLevel::Secondary);
        let b = booking(&a, 2);
        // Monetization already holds 1 of 10 slots, external 1.
        let allocations: Vec<_> = b
            .range
            .iter_days()
            .map(|date| {
                let mut alloc = SlotAllocation::empty(date, 10);
                alloc.add(LobClass::Monetization, 1);
                alloc.add(LobClass::External, 1);
                alloc
            })
            .collect();
        let external = bid(&b, "Acme", 400);
        // External would be 30% (at its limit), but 30% + 10% > 30% reserved.
        let result = q.check(&QuotaCheck {
            bid: &external,
            asset: &a,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: None,
        });
        assert!(matches!(
            result,
            Admissibility::Excluded(ExclusionReason::GuaranteeBreached { .. })
        ));

        // Internal demand may take the rest.
        let internal = bid(&b, "Marketing", 400);
        assert!(q.is_admissible(&QuotaCheck {
            bid: &internal,
            asset: &a,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: None,
        }));
    }

    #[test]
    fn capacity_is_absolute() {
        let q = manager();
        let a = asset(AssetLevel::Secondary);
        let b = booking(&a, 3);
        let allocations: Vec<_> = b
            .range
            .iter_days()
            .map(|date| {
                let mut alloc = SlotAllocation::empty(date, 10);
                alloc.add(LobClass::Internal, 8);
                alloc
            })
            .collect();
        let internal = bid(&b, "Marketing", 400);
        assert_eq!(
            q.check(&QuotaCheck {
                bid: &internal,
                asset: &a,
                booking: &b,
                allocations: &allocations,
                quota: None,
                bid_cap: None,
            }),
            Admissibility::Excluded(ExclusionReason::CapacityExceeded { date: d("2025-03-03") })
        );
    }

    #[test]
    fn multiplier_cap_per_class() {
        let q = manager();
        let a = asset(AssetLevel::Primary);
        let b = booking(&a, 1);
        let allocations = empty_allocations(&a, &b);
        // Base value is 100/day × 5 days = 500.
        let check = |bid: &Bid| {
            q.check(&QuotaCheck {
                bid,
                asset: &a,
                booking: &b,
                allocations: &allocations,
                quota: None,
                bid_cap: None,
            })
        };

        assert!(check(&bid(&b, MONETIZATION_LOB, 600)).is_admissible());
        assert!(matches!(
            check(&bid(&b, MONETIZATION_LOB, 601)),
            Admissibility::Excluded(ExclusionReason::MultiplierExceeded { .. })
        ));
        assert!(check(&bid(&b, "Acme", 750)).is_admissible());
        assert!(!check(&bid(&b, "Acme", 751)).is_admissible());
        assert!(check(&bid(&b, "Marketing", 1000)).is_admissible());
        assert!(!check(&bid(&b, "Marketing", 1001)).is_admissible());
    }

    #[test]
    fn multiplier_check_survives_huge_base_value() {
        let q = manager();
        let mut a = asset(AssetLevel::Primary);
        a.value_per_day = Decimal::MAX;
        let b = booking(&a, 1);
        let allocations = empty_allocations(&a, &b);
        let mut big = bid(&b, MONETIZATION_LOB, 1);
        big.amount = Decimal::MAX;

        let check = q.check(&QuotaCheck {
            bid: &big,
            asset: &a,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: None,
        });
        assert!(check.is_admissible());
    }

    #[test]
    fn stored_cap_overrides_class_defaults() {
        let q = manager();
        let a = asset(AssetLevel::Primary);
        let b = booking(&a, 1);
        let allocations = empty_allocations(&a, &b);
        let cap = BidCap {
            max_bid_multiplier: 3.0,
            slot_limit_percentage: 0.05,
            time_restriction: TimeRestriction::None,
            revenue_floor: None,
        };
        let mut late = bid(&b, MONETIZATION_LOB, 1400);
        late.created_at = Utc.with_ymd_and_hms(2025, 3, 1, 22, 0, 0).unwrap();
        let input = QuotaCheck {
            bid: &late,
            asset: &a,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: Some(&cap),
        };
        // 1 of 10 slots is 10% > 5%
        assert!(matches!(
            q.check(&input),
            Admissibility::Excluded(ExclusionReason::QuotaExceeded { .. })
        ));

        let cap = BidCap { slot_limit_percentage: 0.2, ..cap };
        let input = QuotaCheck { bid_cap: Some(&cap), ..input };
        assert!(q.is_admissible(&input));
    }

    #[test]
    fn monetization_restricted_to_business_hours() {
        let q = manager();
        let a = asset(AssetLevel::Primary);
        let b = booking(&a, 1);
        let allocations = empty_allocations(&a, &b);

        let mut weekend = bid(&b, MONETIZATION_LOB, 500);
        weekend.created_at = Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap();
        let result = q.check(&QuotaCheck {
            bid: &weekend,
            asset: &a,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: None,
        });
        assert!(!result.is_admissible());
        if let Admissibility::Excluded(reason) = result {
            assert_eq!(reason.label(), "business_hours");
        }

        // Internal bids carry no time restriction by default.
        let mut internal = bid(&b, "Marketing", 500);
        internal.created_at = weekend.created_at;
        assert!(q.is_admissible(&QuotaCheck {
            bid: &internal,
            asset: &a,
            booking: &b,
            allocations: &allocations,
            quota: None,
            bid_cap: None,
        }));
    }
}
