use serde::{Deserialize, Serialize};

/// Platform-wide running totals, mutated only in lock-step with a
/// transaction's completion. Stored as a singleton row.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct AdminTotals {
    pub total_deposit_micros: i64,
    pub total_withdraw_micros: i64,
}
