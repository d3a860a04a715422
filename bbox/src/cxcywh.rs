use super::{Rect, LTRB};
use crate::common::*;

/// Bounding box in center-size format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CxCyWH<T> {
    pub(crate) cx: T,
    pub(crate) cy: T,
    pub(crate) w: T,
    pub(crate) h: T,
}

impl<T> Rect for CxCyWH<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn l(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx - self.w / two
    }

    fn t(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy - self.h / two
    }

    fn r(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx + self.w / two
    }

    fn b(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy + self.h / two
    }

    fn cx(&self) -> Self::Type {
        self.cx
    }

    fn cy(&self) -> Self::Type {
        self.cy
    }

    fn w(&self) -> Self::Type {
        self.w
    }

    fn h(&self) -> Self::Type {
        self.h
    }

    fn try_from_ltrb(ltrb: [T; 4]) -> Result<Self> {
        let [l, t, r, b] = ltrb;
        let zero = T::zero();
        let two = T::one() + T::one();
        let w = r - l;
        let h = b - t;
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self {
            cx: l + w / two,
            cy: t + h / two,
            w,
            h,
        })
    }

    fn try_from_ltwh(ltwh: [T; 4]) -> Result<Self> {
        let [l, t, w, h] = ltwh;
        let zero = T::zero();
        let two = T::one() + T::one();
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self {
            cx: l + w / two,
            cy: t + h / two,
            w,
            h,
        })
    }

    fn try_from_cxcywh(cxcywh: [T; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self { cx, cy, w, h })
    }
}

impl<T> From<LTRB<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: LTRB<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&LTRB<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: &LTRB<T>) -> Self {
        let two = T::one() + T::one();
        let LTRB { l, t, r, b } = *from;
        let w = r - l;
        let h = b - t;
        Self {
            cx: l + w / two,
            cy: t + h / two,
            w,
            h,
        }
    }
}
