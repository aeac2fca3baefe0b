use chrono::NaiveDate;

use crate::config::RulesConfig;
use crate::engine::EngineError;
use crate::model::*;
use crate::repository::BookingQueries;

use super::checks::quarter_of;

/// Everything the rules read, fetched up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    pub today: NaiveDate,
    pub asset: Asset,
    pub quota_override: Option<AssetQuotaConfig>,
    /// Same asset+LOB bookings touching the candidate's first or last day.
    pub adjacent: Vec<Booking>,
    /// Same asset+LOB bookings in the rolling window.
    pub lob_window: Vec<Booking>,
    /// Same asset+LOB bookings in the candidate's start quarter.
    pub lob_quarter: Vec<Booking>,
    /// Same asset+purpose bookings in the purpose window.
    pub purpose_window: Vec<Booking>,
    /// Bookings of the LOB on any asset running on the candidate's start date.
    pub active_for_lob: Vec<Booking>,
    pub last_booking: Option<Booking>,
}

impl ValidationContext {
    /// Context with no surrounding bookings.
    pub fn empty(asset: Asset, today: NaiveDate) -> Self {
        Self {
            today,
            asset,
            quota_override: None,
            adjacent: Vec::new(),
            lob_window: Vec::new(),
            lob_quarter: Vec::new(),
            purpose_window: Vec::new(),
            active_for_lob: Vec::new(),
            last_booking: None,
        }
    }

    pub async fn gather<Q>(
        queries: &Q,
        asset: &Asset,
        candidate: &BookingRequest,
        rules: &RulesConfig,
        today: NaiveDate,
    ) -> Result<Self, EngineError>
    where
        Q: BookingQueries + ?Sized,
    {
        let exclude = candidate.id;
        let lob = candidate.lob.as_str();
        let range = candidate.range;

        let adjacent = queries
            .find_adjacent_by_asset_and_lob(asset.id, lob, range, exclude)
            .await?;
        let lob_window = queries
            .find_by_asset_lob_within_window(
                asset.id,
                lob,
                range.extend_back(rules.rolling_window.window_days),
                exclude,
            )
            .await?;
        let lob_quarter = queries
            .find_by_asset_lob_within_window(asset.id, lob, quarter_of(range.start), exclude)
            .await?;
        let purpose_window = queries
            .find_by_asset_purpose_within_window(
                asset.id,
                &candidate.purpose,
                range.extend_back(rules.purpose.window_days),
                exclude,
            )
            .await?;
        let active_for_lob = queries.find_active_by_lob(lob, range.start, exclude).await?;
        let last_booking = queries
            .find_last_booking_by_asset_lob(asset.id, lob, range.start, exclude)
            .await?;
        let quota_override = queries.get_asset_quota_config(asset.id).await?;

        Ok(Self {
            today,
            asset: asset.clone(),
            quota_override,
            adjacent,
            lob_window,
            lob_quarter,
            purpose_window,
            active_for_lob,
            last_booking,
        })
    }
}
