use crate::common::*;

/// Scalar types usable as box coordinates in overlap computations.
pub trait Element: Float {}

impl<T> Element for T where T: Float {}
