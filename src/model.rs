use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// LOB name that always forms its own demand class.
pub const MONETIZATION_LOB: &str = "Monetization";

/// Inclusive calendar range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Number of calendar days covered, counting both endpoints.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        !(other.end < self.start || other.start > self.end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then(|| DateRange::new(start, end))
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.days() as usize)
    }

    /// Range reaching `days` back from `self.start` up to `self.end`.
    pub fn extend_back(&self, days: u64) -> DateRange {
        let start = self
            .start
            .checked_sub_days(Days::new(days))
            .unwrap_or(NaiveDate::MIN);
        DateRange::new(start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetLevel {
    Primary,
    Secondary,
    Tertiary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Ulid,
    pub name: Option<String>,
    /// Catalog type (billboard, banner, ...); keys the LOB allow-list.
    pub asset_type: String,
    pub level: AssetLevel,
    pub value_per_day: Decimal,
    pub max_slots: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    /// Pending and approved bookings hold inventory.
    pub fn is_live(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    None,
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl AuctionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AuctionStatus::Completed | AuctionStatus::Cancelled)
    }
}

/// Demand class a LOB is counted under for slot quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobClass {
    Internal,
    External,
    Monetization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub asset_id: Ulid,
    pub lob: String,
    pub purpose: String,
    pub range: DateRange,
    /// Slots of the asset this booking occupies on each of its dates.
    pub slots: u32,
    pub status: BookingStatus,
    pub auction_status: AuctionStatus,
    /// Class the booking's slots are currently counted under.
    pub allocated_class: LobClass,
    pub winning_bid: Option<Ulid>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

/// A booking candidate. `id` is set when an existing booking is being rescheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Option<Ulid>,
    pub asset_id: Ulid,
    pub lob: String,
    pub purpose: String,
    pub range: DateRange,
    pub slots: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Active,
    Cancelled,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub user_id: String,
    pub lob: String,
    pub amount: Decimal,
    pub max_bid: Option<Decimal>,
    pub reason: Option<String>,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitBid {
    pub booking_id: Ulid,
    pub user_id: String,
    pub lob: String,
    pub amount: Decimal,
    pub max_bid: Option<Decimal>,
    pub reason: Option<String>,
}

/// Slot counters for one asset on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAllocation {
    pub date: NaiveDate,
    pub total_slots: u32,
    pub internal: u32,
    pub external: u32,
    pub monetization: u32,
}

impl SlotAllocation {
    pub fn empty(date: NaiveDate, total_slots: u32) -> Self {
        Self {
            date,
            total_slots,
            internal: 0,
            external: 0,
            monetization: 0,
        }
    }

    pub fn allocated(&self, class: LobClass) -> u32 {
        match class {
            LobClass::Internal => self.internal,
            LobClass::External => self.external,
            LobClass::Monetization => self.monetization,
        }
    }

    pub fn total_allocated(&self) -> u32 {
        self.internal + self.external + self.monetization
    }

    /// Fraction of `total_slots` held by `class`; 0 when the asset has no slots.
    pub fn share(&self, class: LobClass) -> f64 {
        if self.total_slots == 0 {
            return 0.0;
        }
        self.allocated(class) as f64 / self.total_slots as f64
    }

    pub fn add(&mut self, class: LobClass, slots: u32) {
        let counter = self.counter_mut(class);
        *counter = counter.saturating_add(slots);
    }

    pub fn remove(&mut self, class: LobClass, slots: u32) {
        let counter = self.counter_mut(class);
        *counter = counter.saturating_sub(slots);
    }

    pub fn is_empty(&self) -> bool {
        self.total_allocated() == 0
    }

    fn counter_mut(&mut self, class: LobClass) -> &mut u32 {
        match class {
            LobClass::Internal => &mut self.internal,
            LobClass::External => &mut self.external,
            LobClass::Monetization => &mut self.monetization,
        }
    }
}

/// Per-asset override of the level quota defaults. Fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetQuotaConfig {
    pub internal_guarantee: f64,
    pub external_limit: f64,
    pub monetization_limit: f64,
}

impl AssetQuotaConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("internal_guarantee", self.internal_guarantee),
            ("external_limit", self.external_limit),
            ("monetization_limit", self.monetization_limit),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.internal_guarantee + self.external_limit > 1.0 + f64::EPSILON {
            return Err(format!(
                "internal_guarantee + external_limit must not exceed 1, got {}",
                self.internal_guarantee + self.external_limit
            ));
        }
        Ok(())
    }
}

/// Per-asset fairness overrides; unset fields fall back to configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FairnessConfig {
    pub strategic_weight_override: Option<f64>,
    pub time_decay_factor: Option<f64>,
    pub revenue_floor: Option<f64>,
    pub fairness_bonus: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRestriction {
    None,
    BusinessHours,
}

/// Bid limits for one LOB on one asset level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BidCap {
    pub max_bid_multiplier: f64,
    pub slot_limit_percentage: f64,
    pub time_restriction: TimeRestriction,
    pub revenue_floor: Option<f64>,
}

/// Latest performance numbers of a LOB, keyed by metric name.
pub type RoiMetrics = HashMap<String, f64>;

/// Everything one asset owns. Guarded by a single lock in the engine.
#[derive(Debug, Clone)]
pub struct AssetState {
    pub asset: Asset,
    pub quota: Option<AssetQuotaConfig>,
    pub fairness: Option<FairnessConfig>,
    /// Sorted by `range.start`.
    pub bookings: Vec<Booking>,
    /// Booking id → bids in submission order.
    pub bids: HashMap<Ulid, Vec<Bid>>,
    pub allocations: BTreeMap<NaiveDate, SlotAllocation>,
    /// LOB → date of its most recent auction win on this asset.
    pub last_wins: HashMap<String, NaiveDate>,
}

impl AssetState {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            quota: None,
            fairness: None,
            bookings: Vec::new(),
            bids: HashMap::new(),
            allocations: BTreeMap::new(),
            last_wins: HashMap::new(),
        }
    }

    /// Insert booking maintaining sort order by range.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.range.start <= booking.range.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose range overlaps `query`.
    /// Everything at or past the partition point starts after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end >= query.start)
    }

    pub fn bid(&self, booking_id: Ulid, bid_id: Ulid) -> Option<&Bid> {
        self.bids.get(&booking_id)?.iter().find(|b| b.id == bid_id)
    }

    pub fn active_bids(&self, booking_id: Ulid) -> Vec<Bid> {
        self.bids
            .get(&booking_id)
            .map(|bids| {
                bids.iter()
                    .filter(|b| b.status == BidStatus::Active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Counters for `date`, with `total_slots` taken from the current asset record.
    pub fn allocation(&self, date: NaiveDate) -> SlotAllocation {
        let mut alloc = self
            .allocations
            .get(&date)
            .copied()
            .unwrap_or_else(|| SlotAllocation::empty(date, self.asset.max_slots));
        alloc.total_slots = self.asset.max_slots;
        alloc
    }

    pub fn allocate(&mut self, range: &DateRange, class: LobClass, slots: u32) {
        let total = self.asset.max_slots;
        for date in range.iter_days() {
            self.allocations
                .entry(date)
                .or_insert_with(|| SlotAllocation::empty(date, total))
                .add(class, slots);
        }
    }

    pub fn release(&mut self, range: &DateRange, class: LobClass, slots: u32) {
        for date in range.iter_days() {
            if let Some(alloc) = self.allocations.get_mut(&date) {
                alloc.remove(class, slots);
                if alloc.is_empty() {
                    self.allocations.remove(&date);
                }
            }
        }
    }
}

/// Every state change, as written to the WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AssetRegistered {
        asset: Asset,
    },
    AssetUpdated {
        asset: Asset,
    },
    QuotaConfigured {
        asset_id: Ulid,
        config: AssetQuotaConfig,
    },
    FairnessConfigured {
        asset_id: Ulid,
        config: FairnessConfig,
    },
    BidCapSet {
        lob: String,
        level: AssetLevel,
        cap: BidCap,
    },
    RoiRecorded {
        lob: String,
        metrics: RoiMetrics,
    },
    BookingAdmitted {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        asset_id: Ulid,
        range: DateRange,
    },
    BookingStatusChanged {
        id: Ulid,
        asset_id: Ulid,
        status: BookingStatus,
    },
    AuctionStarted {
        booking_id: Ulid,
        asset_id: Ulid,
    },
    /// New or updated bid, plus the auto-bid raises it triggered.
    BidPlaced {
        asset_id: Ulid,
        bid: Bid,
        auto_raised: Vec<(Ulid, Decimal)>,
    },
    BidCancelled {
        id: Ulid,
        booking_id: Ulid,
        asset_id: Ulid,
    },
    /// `winner == None` cancels the auction.
    AuctionEnded {
        booking_id: Ulid,
        asset_id: Ulid,
        winner: Option<AuctionWin>,
        lost: Vec<Ulid>,
    },
    /// Full asset snapshot, written by WAL compaction.
    AssetRestored {
        asset: Asset,
        quota: Option<AssetQuotaConfig>,
        fairness: Option<FairnessConfig>,
        bookings: Vec<Booking>,
        bids: Vec<Bid>,
        last_wins: Vec<(String, NaiveDate)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionWin {
    pub bid_id: Ulid,
    pub lob: String,
    pub class: LobClass,
    pub on: NaiveDate,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionOutcome {
    pub booking_id: Ulid,
    pub status: AuctionStatus,
    pub winner: Option<Bid>,
    pub total_bids: usize,
    pub excluded_count: usize,
}
