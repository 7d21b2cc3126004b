//! Numeric-array helpers shared across the toolkit.
//!
//! Small, pure building blocks: summation, prefix/suffix sums (used to turn
//! per-source condition counts into the cumulative layout), and in-place
//! compaction of sorted slices. Only the `*_in_place` style operations mutate
//! their input.

/// Sum a slice of counts without overflowing the element type.
#[inline]
pub fn sum(values: &[u32]) -> u64 {
    values.iter().map(|&v| v as u64).sum()
}

/// Forward prefix sum: `out[i] == values[0] + .. + values[i]`.
pub fn cumsum(values: &[usize]) -> Vec<usize> {
    let mut acc = 0usize;
    values
        .iter()
        .map(|&v| {
            acc += v;
            acc
        })
        .collect()
}

/// Suffix sum: `out[i] == values[i] + .. + values[n-1]`.
pub fn cumsum_rev(values: &[usize]) -> Vec<usize> {
    let mut out = vec![0usize; values.len()];
    let mut acc = 0usize;
    for (i, &v) in values.iter().enumerate().rev() {
        acc += v;
        out[i] = acc;
    }
    out
}

/// Remove consecutive duplicate runs from a sorted vector, in place.
///
/// The input must already be sorted; on unsorted input only adjacent
/// duplicates collapse.
pub fn dedup_sorted<T: PartialEq>(values: &mut Vec<T>) {
    values.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn prefix_sum() {
        assert_eq!(cumsum(&[1, 2, 3]), vec![1, 3, 6]);
        assert_eq!(cumsum(&[]), Vec::<usize>::new());
    }

    #[test]
    fn suffix_sum() {
        assert_eq!(cumsum_rev(&[1, 2, 3]), vec![6, 5, 3]);
    }

    #[test]
    fn sorted_compaction() {
        let mut v = vec![1, 1, 2, 2, 2, 5];
        dedup_sorted(&mut v);
        assert_eq!(v, vec![1, 2, 5]);
    }

    proptest! {
        #[test]
        fn cumsum_last_equals_total(values in prop::collection::vec(0usize..1000, 1..50)) {
            let total: usize = values.iter().sum();
            let c = cumsum(&values);
            prop_assert_eq!(*c.last().unwrap(), total);
            let r = cumsum_rev(&values);
            prop_assert_eq!(r[0], total);
        }
    }
}
