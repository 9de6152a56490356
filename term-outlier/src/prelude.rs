//! Prelude for commonly used types and traits in term-outlier.

pub use crate::column::{NumericColumn, RowId};
pub use crate::dataset::Dataset;
pub use crate::detectors::{
    CancellationToken, DetectorVerdict, IqrDetector, IsolationForestDetector, LofDetector,
    ModifiedZScoreDetector, NullPolicy, OutlierDetector, RollingDetector, SeasonalDetector,
    Strategy, StrategyKind, ZScoreDetector,
};
pub use crate::ensemble::{EnsembleConfig, EnsembleResult, EnsembleRunner, EnsembleSummary};
pub use crate::error::{ErrorContext, OutlierError, Result};
pub use crate::logging::LogConfig;
pub use crate::sources::{DatasetSource, TableSource};
