use anyhow::{bail, Result};
use rand::seq::SliceRandom;
use rand::Rng;

use wrangler_core::Batch;

/// Paired input and target sources sharing one sample axis.
#[derive(Debug)]
pub struct DatasetManager<I: Batch, T: Batch> {
    inputs: Vec<I>,
    targets: Vec<T>,
    num_samples: usize,
}

impl<I: Batch, T: Batch> DatasetManager<I, T> {
    pub fn new(inputs: Vec<I>, targets: Vec<T>) -> Result<Self> {
        let Some(first) = inputs.first() else {
            bail!("Dataset needs at least one input source");
        };
        let num_samples = first.batch_len();
        if num_samples == 0 {
            bail!("Dataset has no samples");
        }

        for (idx, source) in inputs.iter().enumerate() {
            if source.batch_len() != num_samples {
                bail!(
                    "Input source {} has {} samples, expected {}",
                    idx,
                    source.batch_len(),
                    num_samples
                );
            }
        }
        for (idx, source) in targets.iter().enumerate() {
            if source.batch_len() != num_samples {
                bail!(
                    "Target source {} has {} samples, expected {}",
                    idx,
                    source.batch_len(),
                    num_samples
                );
            }
        }

        Ok(Self {
            inputs,
            targets,
            num_samples,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn inputs(&self) -> &[I] {
        &self.inputs
    }

    pub fn targets(&self) -> &[T] {
        &self.targets
    }

    fn subset(&self, indices: &[i64]) -> (Vec<I>, Vec<T>) {
        (
            self.inputs.iter().map(|s| s.take_samples(indices)).collect(),
            self.targets.iter().map(|s| s.take_samples(indices)).collect(),
        )
    }

    /// Shuffled mini-batches covering every sample exactly once. The last
    /// batch may be smaller.
    pub fn batches<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Batches<'_, I, T> {
        let mut order: Vec<i64> = (0..self.num_samples as i64).collect();
        order.shuffle(rng);

        let chunks: Vec<Vec<i64>> = order
            .chunks(batch_size.max(1))
            .map(<[i64]>::to_vec)
            .collect();
        Batches {
            data: self,
            chunks: chunks.into_iter(),
        }
    }

    /// Randomly moves `holdout_fraction` of the samples into a second set.
    /// Both halves keep at least one sample.
    pub fn split<R: Rng>(&self, holdout_fraction: f64, rng: &mut R) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&holdout_fraction) || holdout_fraction == 0.0 {
            bail!("Holdout fraction must be in (0, 1), got {}", holdout_fraction);
        }
        if self.num_samples < 2 {
            bail!("Cannot split a dataset with {} sample", self.num_samples);
        }

        let mut order: Vec<i64> = (0..self.num_samples as i64).collect();
        order.shuffle(rng);

        let n_holdout = ((self.num_samples as f64 * holdout_fraction).round() as usize)
            .clamp(1, self.num_samples - 1);
        let (holdout_idx, train_idx) = order.split_at(n_holdout);

        let (train_in, train_out) = self.subset(train_idx);
        let (hold_in, hold_out) = self.subset(holdout_idx);
        Ok((Self::new(train_in, train_out)?, Self::new(hold_in, hold_out)?))
    }
}

pub struct Batches<'a, I: Batch, T: Batch> {
    data: &'a DatasetManager<I, T>,
    chunks: std::vec::IntoIter<Vec<i64>>,
}

impl<I: Batch, T: Batch> Iterator for Batches<'_, I, T> {
    type Item = (Vec<I>, Vec<T>);

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(|indices| self.data.subset(&indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn text_data(n: usize) -> DatasetManager<Vec<String>, Vec<String>> {
        let xs: Vec<String> = (0..n).map(|i| format!("x{}", i)).collect();
        let ys: Vec<String> = (0..n).map(|i| format!("y{}", i)).collect();
        DatasetManager::new(vec![xs], vec![ys]).unwrap()
    }

    #[test]
    fn batches_cover_every_sample_once() {
        let data = text_data(10);
        let mut rng = StdRng::seed_from_u64(7);
        let batches: Vec<_> = data.batches(4, &mut rng).collect();
        assert_eq!(batches.iter().map(|(x, _)| x[0].len()).collect::<Vec<_>>(), vec![4, 4, 2]);

        let seen: BTreeSet<String> = batches.iter().flat_map(|(x, _)| x[0].clone()).collect();
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn batches_keep_inputs_and_targets_aligned() {
        let data = text_data(6);
        let mut rng = StdRng::seed_from_u64(1);
        for (x, y) in data.batches(4, &mut rng) {
            for (a, b) in x[0].iter().zip(&y[0]) {
                assert_eq!(a[1..], b[1..]);
            }
        }
    }

    #[test]
    fn mismatched_sources_are_rejected() {
        let xs = vec!["a".to_string(), "b".to_string()];
        let ys = vec!["a".to_string()];
        assert!(DatasetManager::new(vec![xs], vec![ys]).is_err());
        assert!(DatasetManager::<Vec<String>, Vec<String>>::new(vec![], vec![]).is_err());
        assert!(DatasetManager::<Vec<String>, Vec<String>>::new(vec![vec![]], vec![]).is_err());
    }

    #[test]
    fn split_partitions_the_samples() {
        let data = text_data(20);
        let mut rng = StdRng::seed_from_u64(3);
        let (train, holdout) = data.split(0.25, &mut rng).unwrap();
        assert_eq!(train.num_samples(), 15);
        assert_eq!(holdout.num_samples(), 5);

        let mut all: Vec<String> = train.inputs()[0].clone();
        all.extend(holdout.inputs()[0].iter().cloned());
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);

        assert!(data.split(1.5, &mut rng).is_err());
    }
}
