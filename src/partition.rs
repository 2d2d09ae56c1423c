//! # Partition Manager
//!
//! Maintains the two disjoint, row-aligned cohort partitions that drive the
//! sampling loop: the *observed* set (individuals whose RNA has been
//! sequenced, used for model fitting) and the *pool* (individuals still
//! available for selection). Across rounds the observed set only grows and
//! the pool only shrinks; an individual is in exactly one partition at any
//! time.
//!
//! Every split and merge rebuilds both [`Dataset`]s in one step, so the five
//! co-indexed matrices move together and row alignment cannot be partially
//! updated.

use crate::data::{Dataset, DataError, read_matrix, write_matrix};
use ndarray::{Axis, concatenate};
use rand::Rng;
use rand::seq::index::sample;
use std::path::Path;

const MATRIX_NAMES: [&str; 5] = ["Ysum", "Ym", "Yp", "Xm", "Xp"];

/// The observed/pool split of a cohort.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Individuals with RNA-seq data, the model-fitting set.
    pub observed: Dataset,
    /// Individuals still available for selection.
    pub pool: Dataset,
}

impl Partition {
    /// Splits a full cohort into observed/pool by drawing
    /// `floor(N * proportion)` rows uniformly without replacement.
    ///
    /// Row order within each partition follows the original cohort order.
    pub fn initialize<R: Rng + ?Sized>(full: &Dataset, proportion: f64, rng: &mut R) -> Self {
        assert!(
            (0.0..=1.0).contains(&proportion),
            "initial sampling proportion must lie in [0, 1], got {proportion}"
        );
        let n = full.n_individuals();
        let n_observed = (n as f64 * proportion) as usize;

        let mut mask = vec![false; n];
        for idx in sample(rng, n, n_observed).into_vec() {
            mask[idx] = true;
        }
        let observed_rows: Vec<usize> = (0..n).filter(|&i| mask[i]).collect();
        let pool_rows: Vec<usize> = (0..n).filter(|&i| !mask[i]).collect();

        Partition {
            observed: full.select_rows(&observed_rows),
            pool: full.select_rows(&pool_rows),
        }
    }

    /// Moves the given pool rows into the observed set.
    ///
    /// `selected` indexes rows of the *current pool*; duplicates and
    /// out-of-range indices are contract violations. All five matrices in
    /// both partitions are rebuilt together, so either the whole move happens
    /// or none of it does. An empty selection leaves both partitions intact.
    pub fn update(&mut self, selected: &[usize]) {
        let pool_n = self.pool.n_individuals();
        let mut chosen = vec![false; pool_n];
        for &row in selected {
            assert!(row < pool_n, "selected pool row {row} out of range ({pool_n} rows)");
            assert!(!chosen[row], "pool row {row} selected twice");
            chosen[row] = true;
        }
        if selected.is_empty() {
            return;
        }

        let picked_rows: Vec<usize> = (0..pool_n).filter(|&i| chosen[i]).collect();
        let kept_rows: Vec<usize> = (0..pool_n).filter(|&i| !chosen[i]).collect();
        let picked = self.pool.select_rows(&picked_rows);

        let stack = |obs: &ndarray::Array2<f64>, new: &ndarray::Array2<f64>| {
            concatenate(Axis(0), &[obs.view(), new.view()])
                .expect("observed and pool matrices share column counts")
        };
        self.observed = Dataset {
            ysum: stack(&self.observed.ysum, &picked.ysum),
            ym: stack(&self.observed.ym, &picked.ym),
            yp: stack(&self.observed.yp, &picked.yp),
            xm: stack(&self.observed.xm, &picked.xm),
            xp: stack(&self.observed.xp, &picked.xp),
        };
        self.pool = self.pool.select_rows(&kept_rows);
    }

    /// Total individuals across both partitions.
    pub fn total_individuals(&self) -> usize {
        self.observed.n_individuals() + self.pool.n_individuals()
    }

    /// Persists the partition as ten matrix files under `dir`:
    /// `{prefix}{Ysum,Ym,Yp,Xm,Xp}_{obs,pool}.txt`.
    pub fn save(&self, dir: &Path, prefix: &str) -> Result<(), DataError> {
        let obs = [
            &self.observed.ysum,
            &self.observed.ym,
            &self.observed.yp,
            &self.observed.xm,
            &self.observed.xp,
        ];
        let pool = [
            &self.pool.ysum,
            &self.pool.ym,
            &self.pool.yp,
            &self.pool.xm,
            &self.pool.xp,
        ];
        for (name, matrix) in MATRIX_NAMES.iter().zip(obs) {
            write_matrix(&dir.join(format!("{prefix}{name}_obs.txt")), matrix.view())?;
        }
        for (name, matrix) in MATRIX_NAMES.iter().zip(pool) {
            write_matrix(&dir.join(format!("{prefix}{name}_pool.txt")), matrix.view())?;
        }
        Ok(())
    }

    /// Loads a partition previously written by [`Partition::save`].
    pub fn load(dir: &Path, prefix: &str) -> Result<Self, DataError> {
        let read_side = |suffix: &str| -> Result<Dataset, DataError> {
            let mut matrices = Vec::with_capacity(5);
            for name in MATRIX_NAMES {
                matrices.push(read_matrix(&dir.join(format!("{prefix}{name}_{suffix}.txt")))?);
            }
            let mut it = matrices.into_iter();
            Dataset::new(
                it.next().unwrap(),
                it.next().unwrap(),
                it.next().unwrap(),
                it.next().unwrap(),
                it.next().unwrap(),
            )
        };
        Ok(Partition {
            observed: read_side("obs")?,
            pool: read_side("pool")?,
        })
    }
}
