//! # aselect
//!
//! Active-learning sample selection for allele-specific expression (ASE)
//! model estimation. Round by round, the controller fits a conditional
//! Gaussian model on the observed individuals (through an external fitter),
//! finds the genes that still lack ASE observations, and picks the cheapest
//! set of pool individuals to sequence next via set cover. A BIC grid search
//! selects the model's regularization weights.
//!
//! ## Modules
//! - `config`: run configuration (TOML + defaults)
//! - `data`: plain-text matrix I/O and the five-matrix `Dataset`
//! - `partition`: observed/pool partition manager
//! - `fitter`: external estimator interface and subprocess implementation
//! - `likelihood`: negative log-likelihood and BIC evaluation
//! - `need`: effect derivation and needed-gene determination
//! - `cover`: coverage building and the set-cover collaborator
//! - `selection`: BIC grid-search driver
//! - `controller`: the active-learning state machine

pub mod config;
pub mod controller;
pub mod cover;
pub mod data;
pub mod fitter;
pub mod likelihood;
pub mod need;
pub mod partition;
pub mod selection;

pub use config::RunConfig;
pub use controller::{ActiveLearner, RunSummary, StopReason};
pub use cover::{CoverageMap, GreedySetCover, SetCover, to_set_cover};
pub use data::Dataset;
pub use fitter::{Fitter, ModelParams, ProcessFitter, RegWeights};
pub use likelihood::FitScore;
pub use partition::Partition;
pub use selection::{GridMode, GridSpec};
