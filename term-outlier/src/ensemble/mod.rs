//! Ensemble combination of detection strategies.
//!
//! An ensemble runs several strategies over the same rows and flags a row
//! when enough of them agree. Each strategy run is a *voter*:
//!
//! | Strategy shape | Voters | Label |
//! |----------------|--------|-------|
//! | Univariate (z-score, IQR, modified z-score, rolling, seasonal) | one per column | `{column}_{method}` |
//! | Multivariate (LOF, isolation forest) | one over all columns | `{method}` |
//!
//! A row is flagged when the summed weight of the voters flagging it reaches
//! `min_agreement`. With the default weight of 1.0 this is the number of
//! voters that agree.
//!
//! [`EnsembleRunner`] is the usual entry point. [`EnsembleCombiner`] is
//! exposed for callers that run detectors themselves.

mod combiner;
mod config;
mod result;
mod runner;

pub use combiner::{voter_label, EnsembleCombiner};
pub use config::EnsembleConfig;
pub use result::{
    EnsembleResult, EnsembleRow, EnsembleSummary, RunMetadata, SkippedStrategy, Vote, VoterInfo,
    VoterWarning,
};
pub use runner::{EnsembleRunner, EnsembleRunnerBuilder};
