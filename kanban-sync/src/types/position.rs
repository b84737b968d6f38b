//! Fractional order keys for task ordering within a column.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Compute the order key for a task dropped between `prev` and `next`.
///
/// - neither neighbour: `1.0`
/// - only `next`: `next / 2`
/// - only `prev`: `prev + 1`
/// - both: the midpoint
///
/// Only the moved task gets a new key; siblings are never renumbered. Repeated
/// insertion into the same gap halves it every time, so precision runs out after
/// roughly fifty insertions at one spot. No rebalancing is performed.
pub fn order_key(prev: Option<f64>, next: Option<f64>) -> f64 {
    match (prev, next) {
        (None, None) => 1.0,
        (None, Some(n)) => n / 2.0,
        (Some(p), None) => p + 1.0,
        (Some(p), Some(n)) => (p + n) / 2.0,
    }
}

/// Position of a task inside its column.
///
/// Keys sort numerically; the authority may correct a key after a move, so the
/// value is always adopted from the canonical record once it arrives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(f64);

impl OrderKey {
    /// Key of the first task in an empty column
    pub fn first() -> Self {
        Self(order_key(None, None))
    }

    /// Key after all existing keys
    pub fn after(last: OrderKey) -> Self {
        Self(order_key(Some(last.0), None))
    }

    /// Key before all existing keys
    pub fn before(first: OrderKey) -> Self {
        Self(order_key(None, Some(first.0)))
    }

    /// Key between two optional neighbours
    pub fn between(prev: Option<OrderKey>, next: Option<OrderKey>) -> Self {
        Self(order_key(prev.map(|k| k.0), next.map(|k| k.0)))
    }

    /// Raw floating point value
    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for OrderKey {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Default for OrderKey {
    fn default() -> Self {
        Self::first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_order_key_cases() {
        assert_eq!(order_key(None, None), 1.0);
        assert_eq!(order_key(None, Some(4.0)), 2.0);
        assert_eq!(order_key(Some(3.0), None), 4.0);
        assert_eq!(order_key(Some(2.0), Some(4.0)), 3.0);
    }

    #[test]
    fn test_ordinal_after() {
        let first = OrderKey::first();
        let second = OrderKey::after(first);
        assert!(second > first);

        let third = OrderKey::after(second);
        assert!(third > second);
        assert!(third > first);
    }

    #[test]
    fn test_before_first() {
        let first = OrderKey::from(1.0);
        let zeroth = OrderKey::before(first);
        assert!(zeroth < first);
        assert!(zeroth.value() > 0.0);
    }

    #[test]
    fn test_repeated_insertion_converges_without_rebalancing() {
        let low = OrderKey::from(1.0);
        let mut high = OrderKey::from(2.0);
        for _ in 0..20 {
            let mid = OrderKey::between(Some(low), Some(high));
            assert!(low < mid && mid < high);
            high = mid;
        }
        assert!(high.value() - low.value() < 1e-5);
    }

    proptest! {
        #[test]
        fn prop_between_is_strictly_inside(p in -1.0e12f64..1.0e12, gap in 1.0e-3f64..1.0e6) {
            let n = p + gap;
            let key = order_key(Some(p), Some(n));
            prop_assert!(p < key && key < n, "{} !< {} !< {}", p, key, n);
        }

        #[test]
        fn prop_before_first_positive_key(n in 1.0e-6f64..1.0e12) {
            let key = order_key(None, Some(n));
            prop_assert!(key < n);
        }

        #[test]
        fn prop_after_last(p in -1.0e12f64..1.0e12) {
            prop_assert!(order_key(Some(p), None) > p);
        }
    }
}
