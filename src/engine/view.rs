use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::repository::BookingQueries;

use super::conflict::find_conflicts;
use super::{Engine, EngineError};

/// Read view over one locked asset plus the engine-wide indexes.
///
/// Asset-scoped queries only answer for the locked asset; asking about another
/// one is an input error rather than a second lock acquisition.
pub struct AssetView<'a> {
    pub(super) engine: &'a Engine,
    pub(super) state: &'a AssetState,
}

impl<'a> AssetView<'a> {
    pub fn new(engine: &'a Engine, state: &'a AssetState) -> Self {
        Self { engine, state }
    }

    fn scoped(&self, asset_id: Ulid) -> Result<&'a AssetState, EngineError> {
        if asset_id == self.state.asset.id {
            Ok(self.state)
        } else {
            Err(EngineError::InvalidInput(format!(
                "view is scoped to asset {}, not {asset_id}",
                self.state.asset.id
            )))
        }
    }

    fn live_for_lob<'s>(
        state: &'s AssetState,
        lob: &'s str,
        window: &DateRange,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'s Booking> {
        state
            .overlapping(window)
            .filter(move |b| b.is_live() && b.lob == lob && Some(b.id) != exclude)
    }
}

#[async_trait]
impl BookingQueries for AssetView<'_> {
    async fn find_conflicts(
        &self,
        asset_id: Ulid,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let state = self.scoped(asset_id)?;
        Ok(find_conflicts(state, &range, exclude))
    }

    async fn find_adjacent_by_asset_and_lob(
        &self,
        asset_id: Ulid,
        lob: &str,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let state = self.scoped(asset_id)?;
        let before = range.start.pred_opt();
        let after = range.end.succ_opt();
        let around = DateRange::new(before.unwrap_or(range.start), after.unwrap_or(range.end));
        Ok(Self::live_for_lob(state, lob, &around, exclude)
            .filter(|b| Some(b.range.end) == before || Some(b.range.start) == after)
            .cloned()
            .collect())
    }

    async fn find_by_asset_lob_within_window(
        &self,
        asset_id: Ulid,
        lob: &str,
        window: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let state = self.scoped(asset_id)?;
        Ok(Self::live_for_lob(state, lob, &window, exclude).cloned().collect())
    }

    async fn find_by_asset_purpose_within_window(
        &self,
        asset_id: Ulid,
        purpose: &str,
        window: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let state = self.scoped(asset_id)?;
        Ok(state
            .overlapping(&window)
            .filter(|b| b.is_live() && b.purpose == purpose && Some(b.id) != exclude)
            .cloned()
            .collect())
    }

    async fn find_active_by_lob(
        &self,
        lob: &str,
        on: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        Ok(self
            .engine
            .indexes
            .lob_bookings
            .get(lob)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|b| b.range.contains(on) && Some(b.id) != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_last_booking_by_asset_lob(
        &self,
        asset_id: Ulid,
        lob: &str,
        before: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Option<Booking>, EngineError> {
        let state = self.scoped(asset_id)?;
        Ok(state
            .bookings
            .iter()
            .filter(|b| b.is_live() && b.lob == lob && Some(b.id) != exclude)
            .filter(|b| b.range.end < before)
            .max_by_key(|b| b.range.end)
            .cloned())
    }

    async fn get_active_bids(&self, booking_id: Ulid) -> Result<Vec<Bid>, EngineError> {
        if self.state.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(self.state.active_bids(booking_id))
    }

    async fn get_asset_quota_config(
        &self,
        asset_id: Ulid,
    ) -> Result<Option<AssetQuotaConfig>, EngineError> {
        Ok(self.scoped(asset_id)?.quota)
    }

    async fn get_fairness_config(
        &self,
        asset_id: Ulid,
    ) -> Result<Option<FairnessConfig>, EngineError> {
        Ok(self.scoped(asset_id)?.fairness)
    }

    async fn get_bid_caps(
        &self,
        lob: &str,
        level: AssetLevel,
    ) -> Result<Option<BidCap>, EngineError> {
        Ok(self
            .engine
            .bid_caps
            .get(&(lob.to_string(), level))
            .map(|cap| *cap))
    }

    async fn get_roi_metrics(&self, lob: &str) -> Result<Option<RoiMetrics>, EngineError> {
        Ok(self.engine.roi.get(lob).map(|m| m.clone()))
    }
}
