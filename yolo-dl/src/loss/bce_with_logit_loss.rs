use crate::{
    common::*,
    utils::{sigmoid, softplus},
};

/// Binary cross-entropy of a single logit against a target probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BceWithLogits {
    pub loss: f64,
    /// Derivative of `loss` with respect to the logit.
    pub grad: f64,
}

impl BceWithLogits {
    pub fn forward(logit: f64, target: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&target));
        Self {
            loss: softplus(logit) - target * logit,
            grad: sigmoid(logit) - target,
        }
    }

    pub fn positive(logit: f64) -> Self {
        Self {
            loss: softplus(-logit),
            grad: sigmoid(logit) - 1.0,
        }
    }

    pub fn negative(logit: f64) -> Self {
        Self {
            loss: softplus(logit),
            grad: sigmoid(logit),
        }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self {
            loss: self.loss * factor,
            grad: self.grad * factor,
        }
    }
}
