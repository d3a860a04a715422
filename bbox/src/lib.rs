//! Axis-aligned bounding box types, overlap metrics and frame transforms.

mod common;

pub use cxcywh::*;
pub mod cxcywh;

pub use ltrb::*;
pub mod ltrb;

pub use rect::*;
pub mod rect;

pub use wh::*;
pub mod wh;

pub use element::*;
pub mod element;

pub use transform::*;
mod transform;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}
