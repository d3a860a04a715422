use crate::{common::*, Element};

/// A non-negative width and height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WH<T> {
    pub(crate) w: T,
    pub(crate) h: T,
}

impl<T> WH<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_wh(wh: [T; 2]) -> Result<Self> {
        let [w, h] = wh;
        let zero = T::zero();
        ensure!(
            w >= zero && h >= zero,
            "width and height parameters must be non-negative"
        );
        Ok(Self { w, h })
    }

    pub fn from_wh(wh: [T; 2]) -> Self {
        Self::try_from_wh(wh).unwrap()
    }

    pub fn area(&self) -> T {
        self.w * self.h
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn h(&self) -> T {
        self.h
    }
}

impl<T> WH<T>
where
    T: Element,
{
    /// IoU of two boxes sharing the same center, so only the shapes matter.
    pub fn shape_iou_with(&self, other: &Self, epsilon: T) -> T {
        let inter_area = self.w.min(other.w) * self.h.min(other.h);
        let union_area = self.area() + other.area() - inter_area + epsilon;
        inter_area / union_area
    }
}
