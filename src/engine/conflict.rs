use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Live bookings on this asset overlapping `range`, both endpoints inclusive.
pub(crate) fn find_conflicts(
    state: &AssetState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Vec<Booking> {
    state
        .overlapping(range)
        .filter(|b| b.is_live() && Some(b.id) != exclude)
        .cloned()
        .collect()
}

pub(crate) fn check_no_conflict(
    state: &AssetState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflicts = find_conflicts(state, range, exclude);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict(conflicts))
    }
}

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.end < range.start {
        return Err(EngineError::InvalidInput(format!(
            "range ends ({}) before it starts ({})",
            range.end, range.start
        )));
    }
    if range.days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("range too wide"));
    }
    Ok(())
}

/// Shape checks on a booking request that need no state.
pub(crate) fn validate_request(request: &BookingRequest) -> Result<(), EngineError> {
    validate_range(&request.range)?;
    if request.lob.trim().is_empty() {
        return Err(EngineError::InvalidInput("lob must not be empty".into()));
    }
    if request.lob.len() > MAX_LOB_LEN {
        return Err(EngineError::LimitExceeded("lob too long"));
    }
    if request.purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    if request.slots == 0 {
        return Err(EngineError::InvalidInput("a booking needs at least one slot".into()));
    }
    Ok(())
}

pub(crate) fn validate_asset(asset: &Asset) -> Result<(), EngineError> {
    if let Some(ref n) = asset.name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("asset name too long"));
    }
    if asset.asset_type.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("asset type too long"));
    }
    if asset.max_slots == 0 {
        return Err(EngineError::InvalidInput("max_slots must be at least 1".into()));
    }
    if asset.value_per_day.is_sign_negative() {
        return Err(EngineError::InvalidInput("value_per_day must not be negative".into()));
    }
    if asset.value_per_day > MAX_AMOUNT {
        return Err(EngineError::LimitExceeded("value_per_day too large"));
    }
    Ok(())
}

pub(crate) fn validate_bid(bid: &SubmitBid) -> Result<(), EngineError> {
    if bid.user_id.is_empty() {
        return Err(EngineError::InvalidInput("user_id must not be empty".into()));
    }
    if bid.user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user_id too long"));
    }
    if bid.lob.len() > MAX_LOB_LEN {
        return Err(EngineError::LimitExceeded("lob too long"));
    }
    if let Some(ref r) = bid.reason
        && r.len() > MAX_REASON_LEN
    {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    if bid.amount <= rust_decimal::Decimal::ZERO {
        return Err(EngineError::InvalidInput("bid amount must be positive".into()));
    }
    if bid.amount > MAX_AMOUNT || bid.max_bid.is_some_and(|max| max > MAX_AMOUNT) {
        return Err(EngineError::LimitExceeded("bid amount too large"));
    }
    if let Some(max) = bid.max_bid
        && max < bid.amount
    {
        return Err(EngineError::InvalidInput(format!(
            "max_bid {max} is below the bid amount {}",
            bid.amount
        )));
    }
    Ok(())
}

/// Fractions in `[0, 1]` and finite, non-negative weights.
pub(crate) fn validate_fraction(name: &str, value: f64) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::InvalidInput(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_weight(name: &str, value: Option<f64>) -> Result<(), EngineError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(EngineError::InvalidInput(format!(
            "{name} must be a non-negative number, got {v}"
        ))),
        _ => Ok(()),
    }
}
