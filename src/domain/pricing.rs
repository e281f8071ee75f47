//! Fee and discount arithmetic.
//!
//! Pricing is a pure function of its inputs. Discount eligibility (minimum
//! amount, validity window, restrictions, reuse state) is checked by the caller
//! before `price_deal` runs.

use super::money::{Amount, FeeRate, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a discount reduces the payable amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "discountType", content = "discountValue", rename_all = "camelCase")]
pub enum DiscountValue {
    /// Flat amount, never more than the fee charged.
    Amount(Money),
    /// Percentage of the fee.
    FeePercent(Decimal),
}

/// Result of pricing a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub fee_amount: Money,
    pub total_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
}

/// Prices a principal at the given fee rate with an optional discount.
///
/// `fee = floor(principal * rate / 100)`, `total = principal + fee` and
/// `final = total - discount`, where the discount is clamped to the fee.
pub fn price_deal(principal: Amount, fee_rate: FeeRate, discount: Option<&DiscountValue>) -> Quote {
    let principal = principal.money();
    let fee_amount =
        Money::new(principal.value() * fee_rate.percent() / Decimal::ONE_HUNDRED).floor();
    let total_amount = principal + fee_amount;
    let discount_amount = discount
        .map(|d| discount_amount(fee_amount, d))
        .unwrap_or(Money::ZERO);

    Quote {
        fee_amount,
        total_amount,
        discount_amount,
        final_amount: total_amount - discount_amount,
    }
}

fn discount_amount(fee_amount: Money, discount: &DiscountValue) -> Money {
    let raw = match discount {
        DiscountValue::Amount(value) => *value,
        DiscountValue::FeePercent(percent) => {
            Money::new(fee_amount.value() * *percent / Decimal::ONE_HUNDRED).floor()
        }
    };
    raw.max(Money::ZERO).min(fee_amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(v: Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    fn rate(v: Decimal) -> FeeRate {
        FeeRate::new(v).unwrap()
    }

    #[test]
    fn test_price_without_discount() {
        let quote = price_deal(amount(dec!(1_000_000)), rate(dec!(5.5)), None);
        assert_eq!(quote.fee_amount, Money::new(dec!(55_000)));
        assert_eq!(quote.total_amount, Money::new(dec!(1_055_000)));
        assert_eq!(quote.discount_amount, Money::ZERO);
        assert_eq!(quote.final_amount, Money::new(dec!(1_055_000)));
    }

    #[test]
    fn test_fee_percent_discount() {
        let discount = DiscountValue::FeePercent(dec!(10));
        let quote = price_deal(amount(dec!(1_000_000)), rate(dec!(5.5)), Some(&discount));
        assert_eq!(quote.discount_amount, Money::new(dec!(5_500)));
        assert_eq!(quote.final_amount, Money::new(dec!(1_049_500)));
    }

    #[test]
    fn test_fee_is_floored() {
        let quote = price_deal(amount(dec!(999)), rate(dec!(3.5)), None);
        // 999 * 3.5 / 100 = 34.965
        assert_eq!(quote.fee_amount, Money::new(dec!(34)));
        assert_eq!(quote.total_amount, Money::new(dec!(1033)));
    }

    #[test]
    fn test_flat_discount_is_clamped_to_fee() {
        let discount = DiscountValue::Amount(Money::new(dec!(10_000)));
        let quote = price_deal(amount(dec!(1_000)), rate(dec!(4)), Some(&discount));
        assert_eq!(quote.fee_amount, Money::new(dec!(40)));
        assert_eq!(quote.discount_amount, Money::new(dec!(40)));
        assert_eq!(quote.final_amount, Money::new(dec!(1_000)));
    }

    #[test]
    fn test_discount_value_wire_format() {
        let json = r#"{"discountType":"feePercent","discountValue":"10"}"#;
        let parsed: DiscountValue = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, DiscountValue::FeePercent(dec!(10)));

        let unknown = r#"{"discountType":"percentOfTotal","discountValue":"10"}"#;
        assert!(serde_json::from_str::<DiscountValue>(unknown).is_err());
    }
}
