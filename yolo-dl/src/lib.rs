//! The detection head of YOLO family models.
//!
//! The crate turns the per-scale feature maps of a detector into boxes,
//! and computes the training loss with its exact gradient. The network
//! itself is not part of this crate. It is represented by its output arrays
//! and the gradient buffers it consumes.

mod common;
pub mod anchors;
pub mod config;
pub mod decode;
pub mod grid;
pub mod loss;
pub mod pipeline;
pub mod utils;
pub mod weights;
