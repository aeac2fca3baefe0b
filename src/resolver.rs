//! Pure auction decisions: winner selection and auto-bid increments.
//! The engine applies the results under the asset lock.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use ulid::Ulid;

use crate::fairness::ScoreBreakdown;
use crate::model::Bid;

#[derive(Debug, Clone)]
pub struct ScoredBid {
    pub bid: Bid,
    pub breakdown: ScoreBreakdown,
}

/// Best first: score, then amount, then the earlier bid.
pub fn rank(a: &ScoredBid, b: &ScoredBid) -> Ordering {
    b.breakdown
        .score
        .total_cmp(&a.breakdown.score)
        .then_with(|| b.bid.amount.cmp(&a.bid.amount))
        .then_with(|| a.bid.created_at.cmp(&b.bid.created_at))
        .then_with(|| a.bid.id.cmp(&b.bid.id))
}

pub fn pick_winner(candidates: &[ScoredBid]) -> Option<&ScoredBid> {
    candidates.iter().min_by(|a, b| rank(a, b))
}

/// Raises owed to other bidders after `placed` lands.
///
/// Applies only when `placed` beats `previous_highest`. Every other user's
/// active bid with a ceiling and an amount below the new high moves to
/// `ceil(new × (1 + increment%))`, clamped to its ceiling, if that is a raise.
/// One pass: raised bids do not trigger further rounds.
pub fn auto_bid_raises(
    active: &[Bid],
    placed: &Bid,
    previous_highest: Option<Decimal>,
    increment_percent: u32,
) -> Vec<(Ulid, Decimal)> {
    if previous_highest.is_some_and(|high| placed.amount <= high) {
        return Vec::new();
    }
    let factor = Decimal::ONE + Decimal::from(increment_percent) / Decimal::ONE_HUNDRED;
    // Past the Decimal range the target is unbounded and each ceiling wins.
    let target = placed.amount.checked_mul(factor).map(|t| t.ceil());

    active
        .iter()
        .filter(|b| b.id != placed.id && b.user_id != placed.user_id)
        .filter(|b| b.amount < placed.amount)
        .filter_map(|b| {
            let ceiling = b.max_bid?;
            let raised = target.map_or(ceiling, |t| t.min(ceiling));
            (raised > b.amount).then_some((b.id, raised))
        })
        .collect()
}
