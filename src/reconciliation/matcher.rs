//! Multiset matching of two key sequences

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::*;

/// Compare two result sequences occurrence by occurrence
///
/// A key seen `a` times in `first` and `b` times in `second` lands
/// `max(a - b, 0)` times in `missing_in_second` and `max(b - a, 0)` times in
/// `missing_in_first`. Matching consumes the earliest occurrences on both
/// sides, so the leftovers are reported in their original order.
///
/// Neither input is modified; the function runs in O(n + m).
pub fn reconcile(first: &[AccountKey], second: &[AccountKey]) -> ReconciliationResult {
    let mut available: HashMap<&AccountKey, usize> = HashMap::with_capacity(second.len());
    for key in second {
        *available.entry(key).or_default() += 1;
    }

    let mut matched: HashMap<&AccountKey, usize> = HashMap::new();
    let mut missing_in_second = Vec::new();
    for key in first {
        match available.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                *matched.entry(key).or_default() += 1;
            }
            _ => missing_in_second.push(key.clone()),
        }
    }

    let missing_in_first = second
        .iter()
        .filter(|key| match matched.get_mut(*key) {
            Some(partners) if *partners > 0 => {
                *partners -= 1;
                false
            }
            _ => true,
        })
        .cloned()
        .collect();

    ReconciliationResult {
        missing_in_second,
        missing_in_first,
    }
}

/// Per-key view of unmatched occurrences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTally {
    /// Occurrences missing from the second source
    pub missing_in_second: usize,
    /// Occurrences missing from the first source
    pub missing_in_first: usize,
}

/// Collapse a result into counts per key, sorted by key
pub fn tally(result: &ReconciliationResult) -> BTreeMap<AccountKey, KeyTally> {
    let mut counts: BTreeMap<AccountKey, KeyTally> = BTreeMap::new();
    for key in &result.missing_in_second {
        counts.entry(key.clone()).or_default().missing_in_second += 1;
    }
    for key in &result.missing_in_first {
        counts.entry(key.clone()).or_default().missing_in_first += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<AccountKey> {
        values.iter().map(|v| AccountKey::from(*v)).collect()
    }

    #[test]
    fn test_duplicate_counts_survive() {
        let first = keys(&["acc1", "acc2", "acc2"]);
        let second = keys(&["acc2", "acc3"]);

        let result = reconcile(&first, &second);

        assert_eq!(result.missing_in_second, keys(&["acc1", "acc2"]));
        assert_eq!(result.missing_in_first, keys(&["acc3"]));
    }

    #[test]
    fn test_both_empty() {
        let result = reconcile(&[], &[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_one_side_empty() {
        let first = keys(&["a", "b", "a"]);

        let result = reconcile(&first, &[]);
        assert_eq!(result.missing_in_second, first);
        assert!(result.missing_in_first.is_empty());

        let result = reconcile(&[], &first);
        assert!(result.missing_in_second.is_empty());
        assert_eq!(result.missing_in_first, first);
    }

    #[test]
    fn test_identical_inputs_reconcile() {
        let first = keys(&["x", "y", "x", "z"]);
        assert!(reconcile(&first, &first).is_empty());
    }

    #[test]
    fn test_order_independent_match() {
        let first = keys(&["c", "b", "a"]);
        let second = keys(&["a", "b", "c"]);
        assert!(reconcile(&first, &second).is_empty());
    }

    #[test]
    fn test_leftovers_keep_source_order() {
        let first = keys(&["k", "m"]);
        let second = keys(&["z", "k", "k", "a", "k"]);

        let result = reconcile(&first, &second);

        assert_eq!(result.missing_in_second, keys(&["m"]));
        assert_eq!(result.missing_in_first, keys(&["z", "k", "a", "k"]));
    }

    #[test]
    fn test_no_normalization() {
        let first = keys(&["ACC1", "acc2"]);
        let second = keys(&["ACC1   ", "ACC2"]);

        let result = reconcile(&first, &second);

        assert_eq!(result.missing_in_second, first);
        assert_eq!(result.missing_in_first, second);
    }

    #[test]
    fn test_inputs_untouched_and_repeatable() {
        let first = keys(&["a", "a", "b"]);
        let second = keys(&["a", "c"]);
        let first_before = first.clone();
        let second_before = second.clone();

        let once = reconcile(&first, &second);
        let twice = reconcile(&first, &second);

        assert_eq!(once, twice);
        assert_eq!(first, first_before);
        assert_eq!(second, second_before);
    }

    #[test]
    fn test_tally_counts_per_key() {
        let first = keys(&["a", "a", "a", "b"]);
        let second = keys(&["a", "c", "c"]);

        let counts = tally(&reconcile(&first, &second));

        assert_eq!(
            counts[&AccountKey::from("a")],
            KeyTally {
                missing_in_second: 2,
                missing_in_first: 0
            }
        );
        assert_eq!(counts[&AccountKey::from("b")].missing_in_second, 1);
        assert_eq!(counts[&AccountKey::from("c")].missing_in_first, 2);
        assert_eq!(counts.len(), 3);
    }
}
