use crate::common::*;

/// The penalty on box regression errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxLossKind {
    /// `e^2 / 2`
    SquaredError,
    /// `e^2 / 2` when `|e| < 1`, otherwise `|e| - 1/2`
    SmoothL1,
}

impl BoxLossKind {
    /// Returns the loss of a regression error and its derivative.
    pub fn forward(&self, error: f64) -> (f64, f64) {
        match self {
            Self::SquaredError => (error * error / 2.0, error),
            Self::SmoothL1 => {
                if error.abs() < 1.0 {
                    (error * error / 2.0, error)
                } else {
                    (error.abs() - 0.5, error.signum())
                }
            }
        }
    }
}

impl Default for BoxLossKind {
    fn default() -> Self {
        Self::SquaredError
    }
}

/// What happens to a truth box whose best anchor overlaps it less than the
/// match threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedTruthPolicy {
    /// The box is discarded.
    Drop,
    /// The box gives no positive supervision, but the cell of its best
    /// anchor is excluded from the background loss.
    IgnoreBestCell,
}

impl Default for UnmatchedTruthPolicy {
    fn default() -> Self {
        Self::Drop
    }
}
