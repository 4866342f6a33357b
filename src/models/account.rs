use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Raw account fields as reported by `GET /api/v1/account/info`, before
/// `margin_level` is filled in locally.
#[derive(Debug, Clone, Deserialize)]
pub struct WireAccountSnapshot {
    pub account_number: String,
    pub broker: String,
    pub currency: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub profit: Decimal,
}

/// Account-level snapshot reported by `GET /api/v1/account/info`.
///
/// Cached under `mt4_account:<user_id>` with a 5-minute TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_number: String,
    pub broker: String,
    pub currency: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub margin_level: Decimal,
    pub profit: Decimal,
}

impl AccountSnapshot {
    /// `margin_level = equity / margin * 100`, or zero when there is no
    /// margin in use -- avoids a division by zero on a flat account.
    pub fn compute_margin_level(equity: Decimal, margin: Decimal) -> Decimal {
        if margin > Decimal::ZERO {
            equity / margin * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_level_zero_margin() {
        assert_eq!(
            AccountSnapshot::compute_margin_level(Decimal::new(1000, 0), Decimal::ZERO),
            Decimal::ZERO
        );
    }

    #[test]
    fn margin_level_normal() {
        assert_eq!(
            AccountSnapshot::compute_margin_level(Decimal::new(2000, 0), Decimal::new(1000, 0)),
            Decimal::new(200, 0)
        );
    }
}
