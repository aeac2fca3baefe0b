use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::rules::ValidationContext;

use super::conflict::{
    check_no_conflict, validate_asset, validate_fraction, validate_request, validate_weight,
};
use super::{AssetView, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_asset(&self, asset: Asset) -> Result<(), EngineError> {
        if self.state.len() >= MAX_ASSETS {
            return Err(EngineError::LimitExceeded("too many assets"));
        }
        validate_asset(&asset)?;
        if self.state.contains_key(&asset.id) {
            return Err(EngineError::AlreadyExists(asset.id));
        }

        let id = asset.id;
        let event = Event::AssetRegistered { asset: asset.clone() };
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&event).await?;
        self.state.insert(id, Arc::new(RwLock::new(AssetState::new(asset))));
        metrics::gauge!(crate::observability::ASSETS_ACTIVE).set(self.state.len() as f64);
        info!(asset = %id, "asset registered");
        Ok(())
    }

    /// Replace an asset's attributes. Capacity may not drop below what is already allocated.
    pub async fn update_asset(&self, asset: Asset) -> Result<(), EngineError> {
        validate_asset(&asset)?;
        let state = self
            .get_asset(&asset.id)
            .ok_or(EngineError::NotFound(asset.id))?;
        let mut guard = state.write().await;

        let peak = guard
            .allocations
            .values()
            .map(SlotAllocation::total_allocated)
            .max()
            .unwrap_or(0);
        if asset.max_slots < peak {
            return Err(EngineError::InvalidInput(format!(
                "max_slots {} is below the {peak} slots already allocated",
                asset.max_slots
            )));
        }

        let event = Event::AssetUpdated { asset };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_asset_quota_config(
        &self,
        asset_id: Ulid,
        config: AssetQuotaConfig,
    ) -> Result<(), EngineError> {
        config.validate().map_err(EngineError::InvalidInput)?;
        let state = self
            .get_asset(&asset_id)
            .ok_or(EngineError::NotFound(asset_id))?;
        let mut guard = state.write().await;
        let event = Event::QuotaConfigured { asset_id, config };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_fairness_config(
        &self,
        asset_id: Ulid,
        config: FairnessConfig,
    ) -> Result<(), EngineError> {
        validate_weight("strategic_weight_override", config.strategic_weight_override)?;
        validate_weight("time_decay_factor", config.time_decay_factor)?;
        validate_weight("revenue_floor", config.revenue_floor)?;
        validate_weight("fairness_bonus", config.fairness_bonus)?;
        let state = self
            .get_asset(&asset_id)
            .ok_or(EngineError::NotFound(asset_id))?;
        let mut guard = state.write().await;
        let event = Event::FairnessConfigured { asset_id, config };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_bid_cap(
        &self,
        lob: String,
        level: AssetLevel,
        cap: BidCap,
    ) -> Result<(), EngineError> {
        if lob.len() > MAX_LOB_LEN {
            return Err(EngineError::LimitExceeded("lob too long"));
        }
        if !cap.max_bid_multiplier.is_finite() || cap.max_bid_multiplier <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "max_bid_multiplier must be positive, got {}",
                cap.max_bid_multiplier
            )));
        }
        validate_fraction("slot_limit_percentage", cap.slot_limit_percentage)?;
        validate_weight("revenue_floor", cap.revenue_floor)?;

        let event = Event::BidCapSet { lob: lob.clone(), level, cap };
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&event).await?;
        self.bid_caps.insert((lob, level), cap);
        Ok(())
    }

    /// Merge the latest numbers for `lob` into its recorded metrics.
    pub async fn record_roi_metrics(
        &self,
        lob: String,
        metrics: RoiMetrics,
    ) -> Result<(), EngineError> {
        if lob.len() > MAX_LOB_LEN {
            return Err(EngineError::LimitExceeded("lob too long"));
        }
        if metrics.len() > MAX_ROI_METRICS {
            return Err(EngineError::LimitExceeded("too many ROI metrics"));
        }
        if let Some((name, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "ROI metric {name} is not a finite number: {value}"
            )));
        }

        let event = Event::RoiRecorded { lob: lob.clone(), metrics: metrics.clone() };
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&event).await?;
        self.merge_roi(&lob, &metrics);
        Ok(())
    }

    /// Conflict check, then the booking rules, then persist.
    ///
    /// A request with `id` set moves that existing booking to the requested dates.
    pub async fn admit_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        validate_request(&request)?;

        let lob_lock = self.lob_lock(&request.lob);
        let _lob_guard = lob_lock.lock().await;

        let state = self
            .get_asset(&request.asset_id)
            .ok_or(EngineError::NotFound(request.asset_id))?;
        let mut guard = state.write().await;

        if request.slots > guard.asset.max_slots {
            return Err(EngineError::InvalidInput(format!(
                "{} slots requested, asset has {}",
                request.slots, guard.asset.max_slots
            )));
        }
        let existing = match request.id {
            Some(id) => Some(self.reschedulable(&guard, &request, id)?),
            None => {
                if guard.bookings.len() >= MAX_BOOKINGS_PER_ASSET {
                    return Err(EngineError::LimitExceeded("too many bookings on asset"));
                }
                None
            }
        };

        if let Err(e) = check_no_conflict(&guard, &request.range, request.id) {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "reason" => "conflict")
                .increment(1);
            warn!(asset = %request.asset_id, lob = %request.lob, "booking rejected: {e}");
            return Err(e);
        }

        let today = self.clock.today();
        let asset = guard.asset.clone();
        let violations = {
            let view = AssetView::new(self, &guard);
            let ctx =
                ValidationContext::gather(&view, &asset, &request, &self.config.rules, today).await?;
            self.validator.validate(&request, &ctx)
        };
        if !violations.is_empty() {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "reason" => "validation")
                .increment(1);
            let rules: Vec<_> = violations.iter().map(|v| v.rule.as_str()).collect();
            warn!(asset = %request.asset_id, lob = %request.lob, ?rules, "booking rejected by rules");
            return Err(EngineError::Validation(violations));
        }

        if let Some(mut booking) = existing {
            let event = Event::BookingRescheduled {
                id: booking.id,
                asset_id: booking.asset_id,
                range: request.range,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            booking.range = request.range;
            info!(booking = %booking.id, "booking rescheduled to {}..{}", request.range.start, request.range.end);
            return Ok(booking);
        }

        let booking = Booking {
            id: Ulid::new(),
            asset_id: request.asset_id,
            allocated_class: self.quota.classify(&request.lob),
            lob: request.lob,
            purpose: request.purpose,
            range: request.range,
            slots: request.slots,
            status: BookingStatus::Pending,
            auction_status: AuctionStatus::Pending,
            winning_bid: None,
            created_at: self.clock.now(),
        };
        let event = Event::BookingAdmitted { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_ADMITTED_TOTAL).increment(1);
        info!(booking = %booking.id, asset = %booking.asset_id, lob = %booking.lob, "booking admitted");
        Ok(booking)
    }

    /// The booking a reschedule request refers to, if it may be moved.
    fn reschedulable(
        &self,
        state: &AssetState,
        request: &BookingRequest,
        id: Ulid,
    ) -> Result<Booking, EngineError> {
        match self.get_asset_for_entity(&id) {
            None => return Err(EngineError::NotFound(id)),
            Some(owner) if owner != request.asset_id => {
                return Err(EngineError::InvalidInput(format!(
                    "booking {id} belongs to asset {owner}; bookings cannot move between assets"
                )));
            }
            Some(_) => {}
        }
        // The index also maps bids, so a bid id resolves to an asset yet names no booking.
        let booking = state.booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.is_live() {
            return Err(EngineError::State(format!("booking {id} is {:?}", booking.status)));
        }
        if booking.auction_status == AuctionStatus::Active {
            return Err(EngineError::State(format!(
                "booking {id} has an active auction and cannot be moved"
            )));
        }
        if booking.lob != request.lob || booking.slots != request.slots {
            return Err(EngineError::InvalidInput(
                "a reschedule may only change the booking's dates".into(),
            ));
        }
        Ok(booking.clone())
    }

    /// Approval workflow hook. Rejection is final and frees the booking's slots.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;

        if booking.status == status {
            return Ok(booking);
        }
        match (booking.status, status) {
            (BookingStatus::Pending, BookingStatus::Approved) => {}
            (BookingStatus::Pending | BookingStatus::Approved, BookingStatus::Rejected) => {
                if booking.auction_status == AuctionStatus::Active {
                    return Err(EngineError::State(format!(
                        "booking {id} has an active auction; end it before rejecting"
                    )));
                }
            }
            (from, to) => {
                return Err(EngineError::State(format!(
                    "booking {id} cannot go from {from:?} to {to:?}"
                )));
            }
        }

        let event = Event::BookingStatusChanged { id, asset_id: booking.asset_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, ?status, "booking status changed");
        Ok(Booking { status, ..booking })
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// The compaction gate and every asset's read lock are held for the
    /// duration, so no write lands between the snapshot and the file swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(state) = self.get_asset(id) {
                guards.push(state.read_owned().await);
            }
        }

        let mut events = Vec::with_capacity(guards.len() + self.bid_caps.len() + self.roi.len());
        for guard in &guards {
            events.push(Event::AssetRestored {
                asset: guard.asset.clone(),
                quota: guard.quota,
                fairness: guard.fairness,
                bookings: guard.bookings.clone(),
                bids: guard.bids.values().flatten().cloned().collect(),
                last_wins: guard
                    .last_wins
                    .iter()
                    .map(|(lob, on)| (lob.clone(), *on))
                    .collect(),
            });
        }
        for entry in self.bid_caps.iter() {
            let (lob, level) = entry.key();
            events.push(Event::BidCapSet { lob: lob.clone(), level: *level, cap: *entry.value() });
        }
        for entry in self.roi.iter() {
            events.push(Event::RoiRecorded {
                lob: entry.key().clone(),
                metrics: entry.value().clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
