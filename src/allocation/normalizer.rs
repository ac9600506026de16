//! Weight normalization shared by every allocation path.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

/// Rescale weights so they sum to one.
///
/// The result is proportional to the input. When the input sums to zero every
/// key receives `1/n`. Negative inputs count as zero. Inputs whose sum does not
/// fit a `Decimal` are scaled down by `n` first, which keeps the proportions.
pub fn normalize<K: Ord + Clone>(weights: &BTreeMap<K, Decimal>) -> BTreeMap<K, Decimal> {
    if weights.is_empty() {
        return BTreeMap::new();
    }

    let mut clamped: BTreeMap<K, Decimal> = weights
        .iter()
        .map(|(k, w)| (k.clone(), (*w).max(Decimal::ZERO)))
        .collect();

    let total = match checked_weight_sum(&clamped) {
        Some(total) => total,
        None => {
            let n = Decimal::from(clamped.len());
            for w in clamped.values_mut() {
                *w /= n;
            }
            // Each term is at most MAX / n now
            clamped.values().fold(Decimal::ZERO, |acc, w| acc.saturating_add(*w))
        }
    };
    if total.is_zero() {
        return uniform(clamped.into_keys());
    }

    clamped.into_iter().map(|(k, w)| (k, w / total)).collect()
}

/// Equal weight for every key.
pub fn uniform<K: Ord>(keys: impl IntoIterator<Item = K>) -> BTreeMap<K, Decimal> {
    let keys: Vec<K> = keys.into_iter().collect();
    if keys.is_empty() {
        return BTreeMap::new();
    }
    let share = Decimal::ONE / Decimal::from(keys.len());
    keys.into_iter().map(|k| (k, share)).collect()
}

/// Sum of all weights, `None` when it overflows.
pub fn checked_weight_sum<K>(weights: &BTreeMap<K, Decimal>) -> Option<Decimal> {
    weights
        .values()
        .try_fold(Decimal::ZERO, |acc, w| acc.checked_add(*w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn weights(pairs: &[(&str, Decimal)]) -> BTreeMap<String, Decimal> {
        pairs.iter().map(|(k, w)| (k.to_string(), *w)).collect()
    }

    fn close(a: Decimal, b: Decimal) -> bool {
        (a - b).abs() <= dec!(0.000000001)
    }

    #[test]
    fn test_proportional_rescale() {
        let out = normalize(&weights(&[("BTCUSDT", dec!(70)), ("ETHUSDT", dec!(30))]));
        assert_eq!(out["BTCUSDT"], dec!(0.7));
        assert_eq!(out["ETHUSDT"], dec!(0.3));
    }

    #[test]
    fn test_totals_to_one() {
        let out = normalize(&weights(&[
            ("grid", dec!(3)),
            ("dca", dec!(7)),
            ("trend", dec!(11)),
        ]));
        assert!(close(checked_weight_sum(&out).unwrap(), Decimal::ONE));
    }

    #[test]
    fn test_idempotent() {
        let once = normalize(&weights(&[("a", dec!(1)), ("b", dec!(2)), ("c", dec!(4))]));
        let twice = normalize(&once);
        for (k, w) in &once {
            assert!(close(*w, twice[k]), "{} drifted: {} vs {}", k, w, twice[k]);
        }
    }

    #[test]
    fn test_zero_sum_falls_back_to_uniform() {
        let out = normalize(&weights(&[("a", dec!(0)), ("b", dec!(0)), ("c", dec!(0))]));
        let third = Decimal::ONE / dec!(3);
        assert_eq!(out.len(), 3);
        assert!(out.values().all(|w| *w == third));
    }

    #[test]
    fn test_negative_inputs_count_as_zero() {
        let out = normalize(&weights(&[("a", dec!(-5)), ("b", dec!(5))]));
        assert_eq!(out["a"], Decimal::ZERO);
        assert_eq!(out["b"], Decimal::ONE);

        let all_negative = normalize(&weights(&[("a", dec!(-1)), ("b", dec!(-2))]));
        assert_eq!(all_negative["a"], dec!(0.5));
    }

    #[test]
    fn test_huge_weights_do_not_overflow() {
        let out = normalize(&weights(&[("a", Decimal::MAX), ("b", Decimal::MAX)]));
        assert!(close(out["a"], dec!(0.5)));
        assert!(close(out["b"], dec!(0.5)));

        let out = normalize(&weights(&[("a", Decimal::MAX), ("b", Decimal::MAX), ("c", Decimal::ZERO)]));
        assert_eq!(out["c"], Decimal::ZERO);
        assert!(close(out["a"], dec!(0.5)));
        assert!(checked_weight_sum(&weights(&[("a", Decimal::MAX), ("b", Decimal::ONE)])).is_none());
    }

    #[test]
    fn test_empty_input() {
        let out = normalize(&BTreeMap::<String, Decimal>::new());
        assert!(out.is_empty());
        assert!(uniform(Vec::<String>::new()).is_empty());
    }
}
