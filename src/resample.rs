use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TuneError};

/// Anything that can be split by row index.
pub trait Observations {
    fn n_obs(&self) -> usize;
}

impl<T> Observations for [T] {
    fn n_obs(&self) -> usize {
        self.len()
    }
}

impl<T> Observations for Vec<T> {
    fn n_obs(&self) -> usize {
        self.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FoldId {
    pub repeat: usize,
    pub fold: usize,
}

impl fmt::Display for FoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Repeat{}/Fold{:02}", self.repeat + 1, self.fold + 1)
    }
}

/// One train/validation split. Both index lists are sorted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fold {
    pub id: FoldId,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Repeated k-fold cross-validation with an explicit seed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resampler {
    pub folds: usize,
    #[serde(default = "default_repeats")]
    pub repeats: usize,
    #[serde(default)]
    pub seed: u64,
}

fn default_repeats() -> usize {
    1
}

impl Resampler {
    pub fn new(folds: usize, repeats: usize, seed: u64) -> Self {
        Self {
            folds,
            repeats,
            seed,
        }
    }

    pub fn n_splits(&self) -> usize {
        self.folds * self.repeats
    }

    fn validate(&self, n: usize) -> Result<()> {
        if self.folds < 2 {
            return Err(TuneError::config(format!(
                "need at least 2 folds, got {}",
                self.folds
            )));
        }
        if self.repeats == 0 {
            return Err(TuneError::config("need at least one repeat"));
        }
        if n < self.folds {
            return Err(TuneError::config(format!(
                "cannot split {n} observations into {} folds",
                self.folds
            )));
        }
        Ok(())
    }

    pub fn split<D: Observations + ?Sized>(&self, data: &D) -> Result<Vec<Fold>> {
        self.split_n(data.n_obs())
    }

    /// `folds * repeats` folds over `0..n`, repeat by repeat.
    pub fn split_n(&self, n: usize) -> Result<Vec<Fold>> {
        self.validate(n)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out = Vec::with_capacity(self.n_splits());
        for repeat in 0..self.repeats {
            let mut order = (0..n).collect::<Vec<_>>();
            order.shuffle(&mut rng);
            out.extend(self.deal(repeat, n, &order));
        }
        Ok(out)
    }

    /// Like [`Resampler::split_n`], but every stratum is spread evenly over the folds.
    pub fn split_stratified<L: Hash + Eq>(&self, labels: &[L]) -> Result<Vec<Fold>> {
        let n = labels.len();
        self.validate(n)?;

        let mut strata: Vec<Vec<usize>> = Vec::new();
        let mut index: HashMap<&L, usize> = HashMap::new();
        for (row, label) in labels.iter().enumerate() {
            let slot = *index.entry(label).or_insert_with(|| {
                strata.push(Vec::new());
                strata.len() - 1
            });
            strata[slot].push(row);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out = Vec::with_capacity(self.n_splits());
        for repeat in 0..self.repeats {
            let mut order = Vec::with_capacity(n);
            for stratum in &strata {
                let mut rows = stratum.clone();
                rows.shuffle(&mut rng);
                order.extend(rows);
            }
            out.extend(self.deal(repeat, n, &order));
        }
        Ok(out)
    }

    // Position i in `order` goes to fold i % k.
    fn deal(&self, repeat: usize, n: usize, order: &[usize]) -> Vec<Fold> {
        let mut assignment = vec![0; n];
        for (position, row) in order.iter().enumerate() {
            assignment[*row] = position % self.folds;
        }
        (0..self.folds)
            .map(|fold| {
                let (validation, train): (Vec<usize>, Vec<usize>) =
                    (0..n).partition(|row| assignment[*row] == fold);
                Fold {
                    id: FoldId { repeat, fold },
                    train,
                    validation,
                }
            })
            .collect()
    }
}
