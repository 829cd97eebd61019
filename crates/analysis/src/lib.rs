//! Statistics and regression used by the derived-state engine.
//!
//! - `window` - bounded per-lap history with outlier-aware statistics
//! - `running` - lap-scoped running mean/variance per wheel
//! - `ridge` - closed-form ridge regression

pub mod ridge;
pub mod running;
pub mod window;

pub use ridge::{ridge_weights, RegressionError, RidgeRegressor, DEFAULT_REGULARIZATION};
pub use running::{RunningStats, RunningWheelStats};
pub use window::{BoundedStatsWindow, FiveNumberSummary, OutlierPolicy, WindowStats};
