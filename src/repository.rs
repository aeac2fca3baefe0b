use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// Read side the allocation core depends on. Every method is a pure read.
///
/// `exclude` names a booking to leave out of the result; it is set when an
/// existing booking is being rescheduled so it never collides with itself.
/// Booking queries only return pending or approved bookings unless noted.
#[async_trait]
pub trait BookingQueries: Send + Sync {
    /// Bookings on `asset_id` overlapping `range` (both endpoints inclusive).
    async fn find_conflicts(
        &self,
        asset_id: Ulid,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError>;

    /// Same asset+LOB bookings starting the day after `range.end` or ending the day before `range.start`.
    async fn find_adjacent_by_asset_and_lob(
        &self,
        asset_id: Ulid,
        lob: &str,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError>;

    /// Same asset+LOB bookings intersecting `window`.
    async fn find_by_asset_lob_within_window(
        &self,
        asset_id: Ulid,
        lob: &str,
        window: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError>;

    /// Same asset bookings with an identical purpose intersecting `window`.
    async fn find_by_asset_purpose_within_window(
        &self,
        asset_id: Ulid,
        purpose: &str,
        window: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError>;

    /// Bookings of `lob` on any asset that are running on `on`.
    async fn find_active_by_lob(
        &self,
        lob: &str,
        on: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError>;

    /// Latest same asset+LOB booking that ended before `before`.
    async fn find_last_booking_by_asset_lob(
        &self,
        asset_id: Ulid,
        lob: &str,
        before: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Option<Booking>, EngineError>;

    async fn get_active_bids(&self, booking_id: Ulid) -> Result<Vec<Bid>, EngineError>;

    async fn get_asset_quota_config(
        &self,
        asset_id: Ulid,
    ) -> Result<Option<AssetQuotaConfig>, EngineError>;

    async fn get_fairness_config(&self, asset_id: Ulid)
    -> Result<Option<FairnessConfig>, EngineError>;

    async fn get_bid_caps(
        &self,
        lob: &str,
        level: AssetLevel,
    ) -> Result<Option<BidCap>, EngineError>;

    async fn get_roi_metrics(&self, lob: &str) -> Result<Option<RoiMetrics>, EngineError>;
}
