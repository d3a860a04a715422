//! Loss function building blocks.

mod bce_with_logit_loss;
mod inference;
mod loss;
mod misc;
mod nms;
mod pred_target_matching;

pub use bce_with_logit_loss::*;
pub use inference::*;
pub use loss::*;
pub use misc::*;
pub use nms::*;
pub use pred_target_matching::*;
