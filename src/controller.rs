//! # Active-Learning Controller
//!
//! Orchestrates the round loop as an explicit state machine:
//!
//! ```text
//! Init -> FitModel -> EvaluateNeed -> SelectCandidates -> RunSetCover
//!            ^                |                                |
//!            |                | (no needed genes)              v
//!            |                v                        UpdatePartition
//!            |            FinalFit <--- (round limit) ---------+
//!            +-- (next round) --------------------------------/
//! ```
//!
//! Each round fits the model on the observed partition with the fixed
//! per-round weights, determines which genes still lack ASE observations,
//! builds a set-cover instance over the pool, and moves the selected
//! individuals into the observed set. The loop ends either because no gene
//! is needed (coverage reached) or because the round limit is hit (resource
//! exhaustion; coverage is then not guaranteed). Both exits pass through a
//! distinct final-fit transition on the latest observed partition, labeled
//! `"Final"`.
//!
//! Rounds are strictly sequential: each round's observed partition is an
//! input to the next round's fit. Every partition state is persisted under
//! the output directory keyed by its round number, so completed rounds
//! survive a later failure.

use crate::config::RunConfig;
use crate::cover::{CoverageMap, SetCover, to_set_cover};
use crate::data::DataError;
use crate::fitter::{Fitter, FitterError, ModelParams};
use crate::need::{derive_effects, determine_needed_genes};
use crate::partition::Partition;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Fitter(#[from] FitterError),
    #[error("Failed to persist partition state: {0}")]
    Persist(#[from] DataError),
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every gene with a predicted effect has enough ASE observations.
    CoverageReached,
    /// The configured round limit was reached; coverage is not guaranteed.
    RoundLimit,
}

/// What one completed sampling round did.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub round: usize,
    pub needed_genes: Vec<usize>,
    /// Pool rows moved into the observed set this round.
    pub selected: Vec<usize>,
}

/// The result of a full run.
#[derive(Debug)]
pub struct RunSummary {
    pub rounds: Vec<RoundOutcome>,
    pub stop: StopReason,
    /// Parameters of the final fit on the last observed partition.
    pub final_params: ModelParams,
    /// Total fitter invocations, the final fit included.
    pub fits: usize,
    /// Observed-set size at the end of the run.
    pub observed_individuals: usize,
}

enum State {
    FitModel {
        round: usize,
    },
    EvaluateNeed {
        round: usize,
        params: ModelParams,
    },
    SelectCandidates {
        round: usize,
        needed: Vec<usize>,
    },
    RunSetCover {
        round: usize,
        needed: Vec<usize>,
        coverage: CoverageMap,
    },
    UpdatePartition {
        round: usize,
        needed: Vec<usize>,
        selected: Vec<usize>,
    },
    FinalFit {
        stop: StopReason,
    },
}

/// Drives the sampling loop over a partition, a fitter and a set-cover
/// collaborator.
pub struct ActiveLearner<'a, F: Fitter + ?Sized, S: SetCover + ?Sized> {
    config: &'a RunConfig,
    fitter: &'a F,
    solver: &'a S,
    partition: Partition,
}

impl<'a, F: Fitter + ?Sized, S: SetCover + ?Sized> ActiveLearner<'a, F, S> {
    pub fn new(config: &'a RunConfig, fitter: &'a F, solver: &'a S, partition: Partition) -> Self {
        ActiveLearner {
            config,
            fitter,
            solver,
            partition,
        }
    }

    /// Runs the loop to completion and returns the summary.
    pub fn run(mut self) -> Result<RunSummary, ControlError> {
        let outdir = &self.config.output_dir;
        std::fs::create_dir_all(outdir).map_err(|e| {
            ControlError::Persist(DataError::Io {
                path: outdir.clone(),
                source: e,
            })
        })?;
        self.partition.save(outdir, "0")?;
        log::info!(
            "Starting active learning: {} observed, {} in pool, up to {} rounds",
            self.partition.observed.n_individuals(),
            self.partition.pool.n_individuals(),
            self.config.max_rounds
        );

        let mut rounds: Vec<RoundOutcome> = Vec::new();
        let mut fits = 0usize;
        let mut state = if self.config.max_rounds == 0 {
            State::FinalFit {
                stop: StopReason::RoundLimit,
            }
        } else {
            State::FitModel { round: 0 }
        };

        loop {
            state = match state {
                State::FitModel { round } => {
                    log::info!("Round {round}: fitting model on observed partition");
                    let params = self.fitter.fit(
                        &self.partition.observed,
                        &self.config.fit_weights,
                        &round.to_string(),
                    )?;
                    fits += 1;
                    State::EvaluateNeed { round, params }
                }

                State::EvaluateNeed { round, params } => {
                    let effects = derive_effects(&params);
                    let needed = determine_needed_genes(
                        self.partition.observed.ym.view(),
                        self.partition.observed.yp.view(),
                        &effects.xi,
                        &effects.pi,
                        self.config.ase_threshold,
                    );
                    log::info!("Round {round}: {} genes still need ASE data", needed.len());
                    if needed.is_empty() {
                        log::info!("All genes have sufficient ASE coverage");
                        State::FinalFit {
                            stop: StopReason::CoverageReached,
                        }
                    } else {
                        State::SelectCandidates { round, needed }
                    }
                }

                State::SelectCandidates { round, needed } => {
                    let coverage = to_set_cover(self.partition.pool.ym.view(), &needed);
                    if coverage.is_empty() {
                        log::warn!(
                            "Round {round}: no pool individual covers any needed gene"
                        );
                    }
                    State::RunSetCover {
                        round,
                        needed,
                        coverage,
                    }
                }

                State::RunSetCover {
                    round,
                    needed,
                    coverage,
                } => {
                    let chosen_sets = self.solver.solve(&needed, &coverage.covered);
                    let mut selected: Vec<usize> = chosen_sets
                        .iter()
                        .map(|&i| coverage.individuals[i])
                        .collect();
                    selected.sort_unstable();
                    log::info!(
                        "Round {round}: set cover selected {} of {} candidate individuals",
                        selected.len(),
                        coverage.individuals.len()
                    );
                    State::UpdatePartition {
                        round,
                        needed,
                        selected,
                    }
                }

                State::UpdatePartition {
                    round,
                    needed,
                    selected,
                } => {
                    self.partition.update(&selected);
                    self.partition.save(outdir, &(round + 1).to_string())?;
                    rounds.push(RoundOutcome {
                        round,
                        needed_genes: needed,
                        selected,
                    });
                    if round + 1 < self.config.max_rounds {
                        State::FitModel { round: round + 1 }
                    } else {
                        State::FinalFit {
                            stop: StopReason::RoundLimit,
                        }
                    }
                }

                State::FinalFit { stop } => {
                    log::info!("Final fit on {} observed individuals",
                        self.partition.observed.n_individuals());
                    let final_params = self.fitter.fit(
                        &self.partition.observed,
                        &self.config.fit_weights,
                        "Final",
                    )?;
                    fits += 1;
                    return Ok(RunSummary {
                        rounds,
                        stop,
                        final_params,
                        fits,
                        observed_individuals: self.partition.observed.n_individuals(),
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cover::GreedySetCover;
    use crate::data::Dataset;
    use crate::fitter::RegWeights;
    use ndarray::Array2;
    use std::sync::Mutex;

    /// In-process fitter that predicts an ASE effect for every gene and
    /// records the labels it was invoked with.
    struct RecordingFitter {
        labels: Mutex<Vec<String>>,
    }

    impl RecordingFitter {
        fn new() -> Self {
            RecordingFitter {
                labels: Mutex::new(Vec::new()),
            }
        }
        fn labels(&self) -> Vec<String> {
            self.labels.lock().unwrap().clone()
        }
    }

    impl Fitter for RecordingFitter {
        fn fit(
            &self,
            observed: &Dataset,
            _weights: &RegWeights,
            label: &str,
        ) -> Result<ModelParams, FitterError> {
            self.labels.lock().unwrap().push(label.to_string());
            let q = observed.n_genes();
            let p = observed.n_markers();
            ModelParams::new(
                Array2::zeros((p, q)),
                Array2::eye(q),
                Array2::eye(q) * 0.5,
                Array2::ones((p, q)),
            )
        }
    }

    /// Cohort where gene ASE availability varies by individual: individual i
    /// has finite ASE for gene j iff j <= i.
    fn staircase_cohort(n: usize, q: usize) -> Dataset {
        let expr = Array2::from_shape_fn((n, q), |(i, j)| {
            if j <= i { 1.0 } else { f64::NAN }
        });
        Dataset::new(
            Array2::ones((n, q)),
            expr.clone(),
            expr,
            Array2::ones((n, 2)),
            Array2::zeros((n, 2)),
        )
        .unwrap()
    }

    fn config(outdir: &std::path::Path, max_rounds: usize, threshold: usize) -> RunConfig {
        RunConfig {
            max_rounds,
            ase_threshold: threshold,
            output_dir: outdir.to_path_buf(),
            ..RunConfig::default()
        }
    }

    #[test]
    fn zero_rounds_performs_exactly_the_final_fit() {
        let dir = tempfile::tempdir().unwrap();
        let cohort = staircase_cohort(6, 3);
        let partition = Partition {
            observed: cohort.select_rows(&[0, 1]),
            pool: cohort.select_rows(&[2, 3, 4, 5]),
        };
        let fitter = RecordingFitter::new();
        let config = config(dir.path(), 0, 2);

        let summary = ActiveLearner::new(&config, &fitter, &GreedySetCover, partition)
            .run()
            .unwrap();

        assert_eq!(summary.fits, 1);
        assert_eq!(fitter.labels(), vec!["Final"]);
        assert!(summary.rounds.is_empty());
        assert_eq!(summary.stop, StopReason::RoundLimit);
    }

    #[test]
    fn coverage_reached_stops_before_the_round_limit() {
        let dir = tempfile::tempdir().unwrap();
        // Observed individuals 2 and 3 already give every gene >= 1 finite
        // ASE observation at threshold 1.
        let cohort = staircase_cohort(6, 3);
        let partition = Partition {
            observed: cohort.select_rows(&[2, 3]),
            pool: cohort.select_rows(&[0, 1, 4, 5]),
        };
        let fitter = RecordingFitter::new();
        let config = config(dir.path(), 5, 1);

        let summary = ActiveLearner::new(&config, &fitter, &GreedySetCover, partition)
            .run()
            .unwrap();

        assert_eq!(summary.stop, StopReason::CoverageReached);
        assert_eq!(fitter.labels(), vec!["0", "Final"]);
        assert!(summary.rounds.is_empty());
    }

    #[test]
    fn rounds_move_selected_individuals_and_persist_partitions() {
        let dir = tempfile::tempdir().unwrap();
        // Observed individual 0 only covers gene 0; genes 1 and 2 are needed
        // and only pool individuals with higher indices can cover them.
        let cohort = staircase_cohort(6, 3);
        let partition = Partition {
            observed: cohort.select_rows(&[0]),
            pool: cohort.select_rows(&[1, 2, 3, 4, 5]),
        };
        let fitter = RecordingFitter::new();
        let config = config(dir.path(), 1, 1);

        let summary = ActiveLearner::new(&config, &fitter, &GreedySetCover, partition)
            .run()
            .unwrap();

        assert_eq!(summary.stop, StopReason::RoundLimit);
        assert_eq!(summary.rounds.len(), 1);
        assert_eq!(summary.rounds[0].needed_genes, vec![1, 2]);
        assert!(!summary.rounds[0].selected.is_empty());
        assert_eq!(
            summary.observed_individuals,
            1 + summary.rounds[0].selected.len()
        );
        assert_eq!(fitter.labels(), vec!["0", "Final"]);

        // Round 0 and round 1 partitions are both on disk.
        for prefix in ["0", "1"] {
            let reloaded = Partition::load(dir.path(), prefix).unwrap();
            assert_eq!(reloaded.total_individuals(), 6);
        }
    }
}
