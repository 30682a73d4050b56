use std::{cmp::Reverse, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    db_types::{CategoryId, Cents, Order, OrderId, SellerId, SellerShare},
    traits::SettlementError,
};

/// Who receives the minor units left over after every seller's share has been rounded down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// The whole remainder goes to the seller with the largest contribution (lowest seller id on a tie).
    #[default]
    LargestContribution,
    /// One unit each to the sellers with the largest discarded fractions.
    LargestFraction,
}

impl Display for RemainderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LargestContribution => write!(f, "largest_contribution"),
            Self::LargestFraction => write!(f, "largest_fraction"),
        }
    }
}

impl FromStr for RemainderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "largest_contribution" => Ok(Self::LargestContribution),
            "largest_fraction" | "largest_remainder" => Ok(Self::LargestFraction),
            other => Err(format!("Unknown remainder policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitLine {
    pub seller_id: SellerId,
    pub category_id: Option<CategoryId>,
    pub contribution: Cents,
    pub amount: Cents,
}

fn mismatch<S: Into<String>>(order_id: &OrderId, reason: S) -> SettlementError {
    SettlementError::AllocationMismatch { order_id: order_id.clone(), reason: reason.into() }
}

/// Confirms that the seller shares account for the order subtotal, and that the captured amount matches the order
/// total, each to within `tolerance`.
pub fn check_capture(
    order: &Order,
    shares: &[SellerShare],
    captured: Cents,
    tolerance: Cents,
) -> Result<(), SettlementError> {
    let contributions: Cents = shares.iter().map(|s| s.contribution).sum();
    if contributions.abs_diff(order.subtotal) > tolerance {
        return Err(mismatch(
            &order.order_id,
            format!("Seller shares add up to {contributions}, but the order subtotal is {}", order.subtotal),
        ));
    }
    if captured.abs_diff(order.total) > tolerance {
        return Err(mismatch(
            &order.order_id,
            format!("The captured amount is {captured}, but the order total is {}", order.total),
        ));
    }
    Ok(())
}

/// Apportions `captured` across sellers in proportion to their contributions.
///
/// Each seller first receives `floor(captured * contribution / total_contribution)`. The units lost to flooring are
/// then handed out according to `policy`. The amounts always add up to exactly `captured`, and identical inputs always
/// produce identical splits. Lines come back in ascending seller id order.
pub fn split_capture(
    order_id: &OrderId,
    captured: Cents,
    shares: &[SellerShare],
    policy: RemainderPolicy,
) -> Result<Vec<SplitLine>, SettlementError> {
    if shares.is_empty() {
        return Err(mismatch(order_id, "The order has no seller shares to allocate to"));
    }
    if !captured.is_positive() {
        return Err(mismatch(order_id, format!("The captured amount must be positive, but was {captured}")));
    }
    if let Some(share) = shares.iter().find(|s| s.contribution.is_negative()) {
        return Err(mismatch(order_id, format!("Seller {} has a negative contribution", share.seller_id)));
    }
    let mut shares = shares.to_vec();
    shares.sort_by(|a, b| a.seller_id.cmp(&b.seller_id));
    if let Some(pair) = shares.windows(2).find(|w| w[0].seller_id == w[1].seller_id) {
        return Err(mismatch(order_id, format!("Seller {} appears more than once", pair[0].seller_id)));
    }
    let total: i128 = shares.iter().map(|s| i128::from(s.contribution.value())).sum();
    if total == 0 {
        return Err(mismatch(order_id, "Seller contributions add up to zero"));
    }
    let captured_units = i128::from(captured.value());
    let mut amounts = Vec::with_capacity(shares.len());
    let mut fractions = Vec::with_capacity(shares.len());
    for share in &shares {
        let scaled = captured_units * i128::from(share.contribution.value());
        amounts.push(scaled.div_euclid(total));
        fractions.push(scaled.rem_euclid(total));
    }
    let remainder = captured_units - amounts.iter().sum::<i128>();
    match policy {
        RemainderPolicy::LargestContribution => {
            // ties go to the lowest seller id
            let winner = (0..shares.len())
                .max_by_key(|&i| (shares[i].contribution, Reverse(&shares[i].seller_id)))
                .unwrap_or_default();
            amounts[winner] += remainder;
        },
        RemainderPolicy::LargestFraction => {
            let mut order = (0..shares.len()).collect::<Vec<_>>();
            order.sort_by_key(|&i| (Reverse(fractions[i]), Reverse(shares[i].contribution), i));
            for &i in order.iter().take(usize::try_from(remainder).unwrap_or_default()) {
                amounts[i] += 1;
            }
        },
    }
    shares
        .into_iter()
        .zip(amounts)
        .map(|(share, amount)| {
            let amount = Cents::try_from(amount).map_err(|e| mismatch(order_id, e.to_string()))?;
            Ok(SplitLine {
                seller_id: share.seller_id,
                category_id: share.category_id,
                contribution: share.contribution,
                amount,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::db_types::OrderStatusType;

    fn oid() -> OrderId {
        OrderId::from("order-1")
    }

    fn amounts(lines: &[SplitLine]) -> Vec<(String, i64)> {
        lines.iter().map(|l| (l.seller_id.as_str().to_string(), l.amount.value())).collect()
    }

    #[test]
    fn two_seller_split() {
        let shares = vec![SellerShare::new("A", Cents::from(10_000)), SellerShare::new("B", Cents::from(5_000))];
        let lines = split_capture(&oid(), Cents::from(17_200), &shares, RemainderPolicy::default()).unwrap();
        assert_eq!(amounts(&lines), vec![("A".into(), 11_467), ("B".into(), 5_733)]);
        let lines = split_capture(&oid(), Cents::from(17_200), &shares, RemainderPolicy::LargestFraction).unwrap();
        assert_eq!(amounts(&lines), vec![("A".into(), 11_467), ("B".into(), 5_733)]);
    }

    #[test]
    fn equal_shares_remainder_goes_to_lowest_seller() {
        let shares = vec![
            SellerShare::new("s3", Cents::from(100)),
            SellerShare::new("s1", Cents::from(100)),
            SellerShare::new("s2", Cents::from(100)),
        ];
        for policy in [RemainderPolicy::LargestContribution, RemainderPolicy::LargestFraction] {
            let lines = split_capture(&oid(), Cents::from(10_000), &shares, policy).unwrap();
            assert_eq!(amounts(&lines), vec![("s1".into(), 3_334), ("s2".into(), 3_333), ("s3".into(), 3_333)]);
        }
    }

    #[test]
    fn largest_fraction_spreads_the_remainder() {
        // exact shares are 3.5, 3.3 and 3.2 of 10 units
        let shares = vec![
            SellerShare::new("a", Cents::from(35)),
            SellerShare::new("b", Cents::from(33)),
            SellerShare::new("c", Cents::from(32)),
        ];
        let lines = split_capture(&oid(), Cents::from(10), &shares, RemainderPolicy::LargestFraction).unwrap();
        assert_eq!(amounts(&lines), vec![("a".into(), 4), ("b".into(), 3), ("c".into(), 3)]);
        let lines = split_capture(&oid(), Cents::from(11), &shares, RemainderPolicy::LargestFraction).unwrap();
        // 3.85, 3.63, 3.52
        assert_eq!(amounts(&lines), vec![("a".into(), 4), ("b".into(), 4), ("c".into(), 3)]);
    }

    #[test]
    fn single_seller_gets_everything() {
        let shares = vec![SellerShare::new("solo", Cents::from(4_999))];
        let lines = split_capture(&oid(), Cents::from(6_123), &shares, RemainderPolicy::default()).unwrap();
        assert_eq!(amounts(&lines), vec![("solo".into(), 6_123)]);
    }

    #[test]
    fn invalid_inputs() {
        let shares = vec![SellerShare::new("a", Cents::from(0)), SellerShare::new("b", Cents::from(0))];
        let err = split_capture(&oid(), Cents::from(100), &shares, RemainderPolicy::default()).unwrap_err();
        assert!(matches!(err, SettlementError::AllocationMismatch { .. }));
        assert!(split_capture(&oid(), Cents::from(100), &[], RemainderPolicy::default()).is_err());
        let shares = vec![SellerShare::new("a", Cents::from(10))];
        assert!(split_capture(&oid(), Cents::from(0), &shares, RemainderPolicy::default()).is_err());
        let dupes = vec![SellerShare::new("a", Cents::from(10)), SellerShare::new("a", Cents::from(10))];
        assert!(split_capture(&oid(), Cents::from(10), &dupes, RemainderPolicy::default()).is_err());
    }

    #[test]
    fn splits_always_conserve_the_capture() {
        let mut rng = StdRng::seed_from_u64(0x5e77_1e);
        for _ in 0..500 {
            let n = rng.gen_range(1..=8);
            let shares = (0..n)
                .map(|i| SellerShare::new(format!("seller-{i}").as_str(), Cents::from(rng.gen_range(1..1_000_000))))
                .collect::<Vec<_>>();
            let total: i64 = shares.iter().map(|s| s.contribution.value()).sum();
            let captured = Cents::from(rng.gen_range(1..10_000_000));
            for policy in [RemainderPolicy::LargestContribution, RemainderPolicy::LargestFraction] {
                let lines = split_capture(&oid(), captured, &shares, policy).unwrap();
                let sum: Cents = lines.iter().map(|l| l.amount).sum();
                assert_eq!(sum, captured);
                for line in &lines {
                    assert!(!line.amount.is_negative());
                    let exact = captured.value() as f64 * line.contribution.value() as f64 / total as f64;
                    let slack = if policy == RemainderPolicy::LargestFraction { 1.0 } else { n as f64 };
                    assert!((line.amount.value() as f64 - exact).abs() <= slack);
                }
                let again = split_capture(&oid(), captured, &shares, policy).unwrap();
                assert_eq!(lines, again);
            }
        }
    }

    #[test]
    fn capture_must_match_the_order() {
        let now = Utc::now();
        let order = Order {
            id: 1,
            order_id: oid(),
            customer_id: "c1".into(),
            subtotal: Cents::from(15_000),
            shipping: Cents::from(1_000),
            tax: Cents::from(1_200),
            discount: Cents::from(0),
            total: Cents::from(17_200),
            currency: "USD".into(),
            status: OrderStatusType::New,
            created_at: now,
            updated_at: now,
        };
        let shares = vec![SellerShare::new("A", Cents::from(10_000)), SellerShare::new("B", Cents::from(5_000))];
        let one_cent = Cents::from(1);
        assert!(check_capture(&order, &shares, Cents::from(17_200), one_cent).is_ok());
        assert!(check_capture(&order, &shares, Cents::from(17_201), one_cent).is_ok());
        assert!(check_capture(&order, &shares, Cents::from(17_202), one_cent).is_err());
        let short = vec![SellerShare::new("A", Cents::from(10_000))];
        assert!(check_capture(&order, &short, Cents::from(17_200), one_cent).is_err());
    }
}
