//! Stratified train/val/test splitting.

use crate::types::{DatasetError, DatasetResult, EcgClass};
use rand::{seq::SliceRandom, SeedableRng};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    pub fn total(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }
}

fn check_ratio(name: &str, ratio: f32) -> DatasetResult<()> {
    if !ratio.is_finite() || !(0.0..1.0).contains(&ratio) {
        return Err(DatasetError::Other(format!(
            "{name} ratio {ratio} must be in [0, 1)"
        )));
    }
    Ok(())
}

/// Split sample positions per class so every split keeps the class proportions.
///
/// Each class is shuffled with `seed`, then `round(n * test_ratio)` samples go to test and
/// `round(n * val_ratio)` to val; the rest train. Output lists are sorted.
pub fn split_indices(
    labels: &[EcgClass],
    val_ratio: f32,
    test_ratio: f32,
    seed: u64,
) -> DatasetResult<SplitIndices> {
    check_ratio("val", val_ratio)?;
    check_ratio("test", test_ratio)?;
    if val_ratio + test_ratio >= 1.0 {
        return Err(DatasetError::Other(format!(
            "val ratio {val_ratio} + test ratio {test_ratio} leaves no training data"
        )));
    }

    let mut by_class: BTreeMap<EcgClass, Vec<usize>> = BTreeMap::new();
    for (i, class) in labels.iter().enumerate() {
        by_class.entry(*class).or_default().push(i);
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut split = SplitIndices::default();
    for (_class, mut members) in by_class {
        members.shuffle(&mut rng);
        let n = members.len();
        let n_test = ((n as f32 * test_ratio).round() as usize).min(n);
        let n_val = ((n as f32 * val_ratio).round() as usize).min(n - n_test);
        split.test.extend_from_slice(&members[..n_test]);
        split.val.extend_from_slice(&members[n_test..n_test + n_val]);
        split.train.extend_from_slice(&members[n_test + n_val..]);
    }
    split.train.sort_unstable();
    split.val.sort_unstable();
    split.test.sort_unstable();
    Ok(split)
}

/// Number of samples per class, in label order.
pub fn class_counts(labels: &[EcgClass]) -> [usize; EcgClass::COUNT] {
    let mut counts = [0usize; EcgClass::COUNT];
    for class in labels {
        counts[class.label()] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<EcgClass> {
        let mut out = Vec::new();
        for class in EcgClass::ALL {
            out.extend(std::iter::repeat(class).take(10));
        }
        out
    }

    #[test]
    fn split_is_stratified_and_disjoint() {
        let labels = labels();
        let split = split_indices(&labels, 0.2, 0.1, 42).unwrap();
        assert_eq!(split.total(), labels.len());
        assert_eq!(split.val.len(), 8);
        assert_eq!(split.test.len(), 4);
        for class in EcgClass::ALL {
            let in_val = split.val.iter().filter(|i| labels[**i] == class).count();
            assert_eq!(in_val, 2);
        }
        let mut all: Vec<_> = split
            .train
            .iter()
            .chain(&split.val)
            .chain(&split.test)
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), labels.len());
    }

    #[test]
    fn split_is_reproducible() {
        let labels = labels();
        let a = split_indices(&labels, 0.25, 0.25, 9).unwrap();
        let b = split_indices(&labels, 0.25, 0.25, 9).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ratios_must_leave_training_data() {
        assert!(split_indices(&labels(), 0.5, 0.5, 0).is_err());
        assert!(split_indices(&labels(), -0.1, 0.0, 0).is_err());
    }

    #[test]
    fn counts_follow_label_order() {
        let counts = class_counts(&[EcgClass::Normal, EcgClass::Mi, EcgClass::Normal]);
        assert_eq!(counts, [1, 0, 0, 2]);
    }
}
