use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::rules::{ValidationContext, Violation};

use super::conflict::{find_conflicts, validate_range, validate_request};
use super::{AssetView, Engine, EngineError};

impl Engine {
    /// Dry run of the booking rules. Empty means the candidate passes.
    /// Date overlaps are reported by `admit_booking`, not here.
    pub async fn validate(&self, request: &BookingRequest) -> Result<Vec<Violation>, EngineError> {
        validate_request(request)?;
        let state = self
            .get_asset(&request.asset_id)
            .ok_or(EngineError::NotFound(request.asset_id))?;
        let guard = state.read().await;
        let view = AssetView::new(self, &guard);
        let ctx = ValidationContext::gather(
            &view,
            &guard.asset,
            request,
            &self.config.rules,
            self.clock.today(),
        )
        .await?;
        Ok(self.validator.validate(request, &ctx))
    }

    /// Live bookings on `asset_id` overlapping `range`.
    pub async fn find_conflicts(
        &self,
        asset_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_range(&range)?;
        let state = self
            .get_asset(&asset_id)
            .ok_or(EngineError::NotFound(asset_id))?;
        let guard = state.read().await;
        Ok(find_conflicts(&guard, &range, None))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every booking on the asset, any status, ordered by start date.
    pub async fn list_bookings(&self, asset_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let state = self
            .get_asset(&asset_id)
            .ok_or(EngineError::NotFound(asset_id))?;
        let guard = state.read().await;
        Ok(guard.bookings.clone())
    }

    /// All bids on a booking in submission order, any status.
    pub async fn list_bids(&self, booking_id: Ulid) -> Result<Vec<Bid>, EngineError> {
        let guard = self.resolve_entity_read(&booking_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(guard.bids.get(&booking_id).cloned().unwrap_or_default())
    }

    pub async fn get_slot_allocation(
        &self,
        asset_id: Ulid,
        date: NaiveDate,
    ) -> Result<SlotAllocation, EngineError> {
        let state = self
            .get_asset(&asset_id)
            .ok_or(EngineError::NotFound(asset_id))?;
        let guard = state.read().await;
        Ok(guard.allocation(date))
    }

    pub async fn list_assets(&self) -> Vec<Asset> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut assets = Vec::with_capacity(shared.len());
        for state in shared {
            assets.push(state.read().await.asset.clone());
        }
        assets
    }

    pub fn get_roi_metrics(&self, lob: &str) -> Option<RoiMetrics> {
        self.roi.get(lob).map(|m| m.clone())
    }

    pub fn get_bid_cap(&self, lob: &str, level: AssetLevel) -> Option<BidCap> {
        self.bid_caps.get(&(lob.to_string(), level)).map(|c| *c)
    }
}
