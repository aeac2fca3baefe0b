//! Hard bounds on engine inputs, independent of the configurable booking rules.

use rust_decimal::Decimal;

pub const MAX_ASSETS: usize = 100_000;
pub const MAX_BOOKINGS_PER_ASSET: usize = 50_000;
pub const MAX_BIDS_PER_BOOKING: usize = 1_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LOB_LEN: usize = 128;
pub const MAX_PURPOSE_LEN: usize = 1_024;
pub const MAX_USER_ID_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 2_048;
/// Widest range any request may name, whatever the max-length rule allows.
pub const MAX_RANGE_DAYS: i64 = 3_660;
pub const MAX_ROI_METRICS: usize = 64;
/// Ceiling on any money value: bid amounts, bid ceilings and per-day asset value.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA764_0000, 0x0DE0_B6B3, 0, false, 0); // 1_000_000_000_000_000
