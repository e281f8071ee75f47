use dealwire::domain::money::{Amount, FeeRate, Money};
use dealwire::domain::pricing::{DiscountValue, price_deal};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;

const CASES: usize = 2_000;

fn random_inputs(rng: &mut StdRng) -> (Amount, FeeRate) {
    let principal = Amount::new(Decimal::from(rng.gen_range(1u64..=1_000_000_000))).unwrap();
    // Rates with one decimal place, 0.0 to 100.0.
    let rate = FeeRate::new(Decimal::new(rng.gen_range(0i64..=1_000), 1)).unwrap();
    (principal, rate)
}

#[test]
fn test_fee_is_floor_of_rate_and_total_adds_up() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..CASES {
        let (principal, rate) = random_inputs(&mut rng);
        let quote = price_deal(principal, rate, None);

        let exact = principal.value() * rate.percent() / Decimal::ONE_HUNDRED;
        assert_eq!(quote.fee_amount, Money::new(exact.floor()));
        assert!(quote.fee_amount.value().fract().is_zero());
        assert_eq!(quote.total_amount - quote.fee_amount, principal.money());
        assert_eq!(quote.final_amount, quote.total_amount);
    }
}

#[test]
fn test_discount_never_cuts_into_principal() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..CASES {
        let (principal, rate) = random_inputs(&mut rng);
        let discount = if rng.gen_bool(0.5) {
            DiscountValue::Amount(Money::new(Decimal::from(rng.gen_range(0u64..=200_000_000))))
        } else {
            DiscountValue::FeePercent(Decimal::from(rng.gen_range(0u32..=150)))
        };
        let quote = price_deal(principal, rate, Some(&discount));

        assert!(quote.discount_amount >= Money::ZERO);
        assert!(quote.discount_amount <= quote.fee_amount);
        assert!(quote.final_amount >= principal.money());
        assert_eq!(
            quote.final_amount,
            quote.total_amount - quote.discount_amount
        );
    }
}
