//! Numerically stable scalar activations.

/// Clamp bound for probabilities passed to [logit].
pub const PROB_EPSILON: f64 = 1e-7;

/// Added to union areas when computing IoU.
pub const IOU_EPSILON: f64 = 1e-9;

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Derivative of [sigmoid] expressed by its output.
pub fn sigmoid_grad_from_output(y: f64) -> f64 {
    y * (1.0 - y)
}

/// The inverse of [sigmoid], with the input clamped into `(ε, 1 - ε)`.
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
    (p / (1.0 - p)).ln()
}

/// `ln(1 + exp(x))` without overflow.
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}
