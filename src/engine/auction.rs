use std::collections::HashMap;

use tracing::{debug, info};
use ulid::Ulid;

use crate::fairness::ScoreInput;
use crate::limits::*;
use crate::model::*;
use crate::quota::{Admissibility, QuotaCheck};
use crate::repository::BookingQueries;
use crate::resolver::{auto_bid_raises, pick_winner, ScoredBid};

use super::conflict::validate_bid;
use super::{AssetView, Engine, EngineError};

impl Engine {
    /// `pending | none → active`. The booking must be approved.
    pub async fn start_auction(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;

        if booking.status != BookingStatus::Approved {
            return Err(EngineError::State(format!(
                "booking {booking_id} is {:?}; auctions need an approved booking",
                booking.status
            )));
        }
        if !matches!(booking.auction_status, AuctionStatus::None | AuctionStatus::Pending) {
            return Err(EngineError::State(format!(
                "auction for {booking_id} is already {:?}",
                booking.auction_status
            )));
        }

        let event = Event::AuctionStarted { booking_id, asset_id: booking.asset_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %booking_id, "auction started");
        Ok(Booking { auction_status: AuctionStatus::Active, ..booking })
    }

    /// Place a bid, or update the user's active bid on this booking in place.
    /// A new high bid raises other bidders' auto-bids in the same event.
    pub async fn submit_bid(&self, submit: SubmitBid) -> Result<Bid, EngineError> {
        validate_bid(&submit)?;
        let mut guard = self.resolve_entity_write(&submit.booking_id).await?;
        let booking = guard
            .booking(submit.booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(submit.booking_id))?;
        if booking.auction_status != AuctionStatus::Active {
            return Err(EngineError::State(format!(
                "auction for {} is {:?}, not active",
                booking.id, booking.auction_status
            )));
        }

        let mut active = guard.active_bids(booking.id);
        let previous_highest = active.iter().map(|b| b.amount).max();
        let existing = active.iter().position(|b| b.user_id == submit.user_id);

        let bid = match existing {
            Some(pos) => {
                let current = &active[pos];
                Bid {
                    lob: submit.lob,
                    amount: submit.amount,
                    max_bid: submit.max_bid,
                    reason: submit.reason,
                    ..current.clone()
                }
            }
            None => {
                let total = guard.bids.get(&booking.id).map_or(0, Vec::len);
                if total >= MAX_BIDS_PER_BOOKING {
                    return Err(EngineError::LimitExceeded("too many bids on booking"));
                }
                Bid {
                    id: Ulid::new(),
                    booking_id: booking.id,
                    user_id: submit.user_id,
                    lob: submit.lob,
                    amount: submit.amount,
                    max_bid: submit.max_bid,
                    reason: submit.reason,
                    status: BidStatus::Active,
                    created_at: self.clock.now(),
                }
            }
        };
        match existing {
            Some(pos) => active[pos] = bid.clone(),
            None => active.push(bid.clone()),
        }

        let auto_raised = auto_bid_raises(
            &active,
            &bid,
            previous_highest,
            self.config.auction.auto_bid_increment_percent,
        );
        for (id, amount) in &auto_raised {
            debug!(booking = %booking.id, bid = %id, %amount, "auto-bid raised");
        }

        let raised = auto_raised.len() as u64;
        let event = Event::BidPlaced {
            asset_id: booking.asset_id,
            bid: bid.clone(),
            auto_raised,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::AUTO_BIDS_TOTAL).increment(raised);
        metrics::counter!(crate::observability::BIDS_SUBMITTED_TOTAL).increment(1);
        info!(booking = %booking.id, bid = %bid.id, user = %bid.user_id, amount = %bid.amount, "bid placed");
        Ok(bid)
    }

    /// Cancel the caller's own active bid.
    pub async fn cancel_bid(&self, bid_id: Ulid, user_id: &str) -> Result<Bid, EngineError> {
        let mut guard = self.resolve_entity_write(&bid_id).await?;
        let bid = guard
            .bids
            .values()
            .flatten()
            .find(|b| b.id == bid_id)
            .cloned()
            .ok_or(EngineError::NotFound(bid_id))?;

        if bid.user_id != user_id {
            return Err(EngineError::Unauthorized { bid_id, user_id: user_id.to_string() });
        }
        if bid.status != BidStatus::Active {
            return Err(EngineError::State(format!("bid {bid_id} is {:?}", bid.status)));
        }

        let event = Event::BidCancelled {
            id: bid_id,
            booking_id: bid.booking_id,
            asset_id: guard.asset.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(bid = %bid_id, booking = %bid.booking_id, "bid cancelled");
        Ok(Bid { status: BidStatus::Cancelled, ..bid })
    }

    /// Close an active auction: drop inadmissible bids, score the rest, pick the winner.
    pub async fn end_auction(&self, booking_id: Ulid) -> Result<AuctionOutcome, EngineError> {
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.auction_status != AuctionStatus::Active {
            return Err(EngineError::State(format!(
                "auction for {booking_id} is {:?}, not active",
                booking.auction_status
            )));
        }

        let today = self.clock.today();
        let (active, candidates) = {
            let view = AssetView::new(self, &guard);
            let active = view.get_active_bids(booking_id).await?;
            let candidates = self.score_admissible(&view, &booking, &active, today).await?;
            (active, candidates)
        };
        let total_bids = active.len();
        let excluded_count = total_bids - candidates.len();

        let winner = pick_winner(&candidates).cloned();
        let lost: Vec<Ulid> = match &winner {
            Some(w) => candidates
                .iter()
                .map(|c| c.bid.id)
                .filter(|id| *id != w.bid.id)
                .collect(),
            None => Vec::new(),
        };
        let win = winner.as_ref().map(|w| AuctionWin {
            bid_id: w.bid.id,
            lob: w.bid.lob.clone(),
            class: self.quota.classify(&w.bid.lob),
            on: today,
        });

        let event = Event::AuctionEnded {
            booking_id,
            asset_id: booking.asset_id,
            winner: win,
            lost,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let status = if winner.is_some() {
            AuctionStatus::Completed
        } else {
            AuctionStatus::Cancelled
        };
        let outcome_label = if winner.is_some() { "completed" } else { "cancelled" };
        metrics::counter!(crate::observability::AUCTIONS_ENDED_TOTAL, "outcome" => outcome_label)
            .increment(1);
        match &winner {
            Some(w) => info!(
                booking = %booking_id,
                winner = %w.bid.id,
                lob = %w.bid.lob,
                score = w.breakdown.score,
                total_bids,
                excluded_count,
                "auction completed"
            ),
            None => info!(booking = %booking_id, total_bids, excluded_count, "auction cancelled"),
        }

        Ok(AuctionOutcome {
            booking_id,
            status,
            winner: winner.map(|w| w.bid),
            total_bids,
            excluded_count,
        })
    }

    /// Quota-admissible bids with their fairness scores.
    async fn score_admissible(
        &self,
        view: &AssetView<'_>,
        booking: &Booking,
        active: &[Bid],
        today: chrono::NaiveDate,
    ) -> Result<Vec<ScoredBid>, EngineError> {
        let asset = &view.state.asset;
        let quota = view.get_asset_quota_config(asset.id).await?;
        let fairness = view.get_fairness_config(asset.id).await?;

        // The contested booking's own slots are what this auction decides.
        let allocations: Vec<SlotAllocation> = booking
            .range
            .iter_days()
            .map(|date| {
                let mut alloc = view.state.allocation(date);
                if booking.is_live() {
                    alloc.remove(booking.allocated_class, booking.slots);
                }
                alloc
            })
            .collect();

        let mut caps: HashMap<&str, Option<BidCap>> = HashMap::new();
        let mut roi: HashMap<&str, Option<RoiMetrics>> = HashMap::new();
        for bid in active {
            if !caps.contains_key(bid.lob.as_str()) {
                caps.insert(&bid.lob, view.get_bid_caps(&bid.lob, asset.level).await?);
                roi.insert(&bid.lob, view.get_roi_metrics(&bid.lob).await?);
            }
        }

        let mut candidates = Vec::with_capacity(active.len());
        for bid in active {
            let bid_cap = caps.get(bid.lob.as_str()).copied().flatten();
            let admissibility = self.quota.check(&QuotaCheck {
                bid,
                asset,
                booking,
                allocations: &allocations,
                quota: quota.as_ref(),
                bid_cap: bid_cap.as_ref(),
            });
            if let Admissibility::Excluded(reason) = admissibility {
                metrics::counter!(crate::observability::BIDS_EXCLUDED_TOTAL, "reason" => reason.label())
                    .increment(1);
                debug!(booking = %booking.id, bid = %bid.id, lob = %bid.lob, "bid excluded: {reason}");
                continue;
            }

            let breakdown = self.scorer.score(&ScoreInput {
                lob: &bid.lob,
                class: self.quota.classify(&bid.lob),
                level: asset.level,
                roi: roi.get(bid.lob.as_str()).and_then(Option::as_ref),
                fairness: fairness.as_ref(),
                bid_cap: bid_cap.as_ref(),
                last_win: view.state.last_wins.get(&bid.lob).copied(),
                today,
            });
            debug!(bid = %bid.id, lob = %bid.lob, ?breakdown, "bid scored");
            candidates.push(ScoredBid { bid: bid.clone(), breakdown });
        }
        Ok(candidates)
    }
}
