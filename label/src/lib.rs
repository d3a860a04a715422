//! Ground truth labels and the class vocabulary.

mod label;
mod vocabulary;

pub use label::*;
pub use vocabulary::*;
