//! Deterministic train/validation split

use crate::TrainingError;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Row indices of the two partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Shuffle `0..n_rows` with a seeded RNG and hold out
/// `ceil(n_rows * validation_fraction)` rows for validation.
///
/// Requires at least two training rows and one validation row.
pub fn train_validation_split(
    n_rows: usize,
    validation_fraction: f64,
    seed: u64,
) -> Result<Split, TrainingError> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(TrainingError::InvalidValidationFraction(validation_fraction));
    }

    let n_validation = (n_rows as f64 * validation_fraction).ceil() as usize;
    let n_train = n_rows.saturating_sub(n_validation);
    if n_validation < 1 || n_train < 2 {
        return Err(TrainingError::InsufficientSamples {
            required: 3,
            actual: n_rows,
        });
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_validation);
    Ok(Split {
        train,
        validation: indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_sizes() {
        let split = train_validation_split(100, 0.2, 42).unwrap();
        assert_eq!(split.validation.len(), 20);
        assert_eq!(split.train.len(), 80);

        let mut all: Vec<usize> = split.train.iter().chain(&split.validation).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = train_validation_split(50, 0.2, 42).unwrap();
        let b = train_validation_split(50, 0.2, 42).unwrap();
        let c = train_validation_split(50, 0.2, 7).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_too_few_rows() {
        assert!(matches!(
            train_validation_split(2, 0.2, 42),
            Err(TrainingError::InsufficientSamples { .. })
        ));
        assert!(train_validation_split(3, 0.2, 42).is_ok());
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(train_validation_split(10, 0.0, 42).is_err());
        assert!(train_validation_split(10, 1.0, 42).is_err());
    }

    proptest! {
        #[test]
        fn prop_split_is_a_partition(n_rows in 10usize..500, fraction in 0.05f64..0.5, seed in any::<u64>()) {
            let split = train_validation_split(n_rows, fraction, seed).unwrap();
            prop_assert_eq!(split.train.len() + split.validation.len(), n_rows);
            prop_assert!(!split.validation.is_empty());

            let mut seen = vec![false; n_rows];
            for &i in split.train.iter().chain(&split.validation) {
                prop_assert!(!seen[i]);
                seen[i] = true;
            }
        }
    }
}
