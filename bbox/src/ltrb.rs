use super::{CxCyWH, Rect};
use crate::common::*;

/// Bounding box in left-top-right-bottom format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LTRB<T> {
    pub(crate) l: T,
    pub(crate) t: T,
    pub(crate) r: T,
    pub(crate) b: T,
}

impl<T> Rect for LTRB<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn l(&self) -> Self::Type {
        self.l
    }

    fn t(&self) -> Self::Type {
        self.t
    }

    fn r(&self) -> Self::Type {
        self.r
    }

    fn b(&self) -> Self::Type {
        self.b
    }

    fn cx(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.l + self.w() / two
    }

    fn cy(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.t + self.h() / two
    }

    fn w(&self) -> Self::Type {
        self.r - self.l
    }

    fn h(&self) -> Self::Type {
        self.b - self.t
    }

    fn try_from_cxcywh(cxcywh: [Self::Type; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(w >= zero && h >= zero, "w and h must be non-negative");

        let two = T::one() + T::one();
        Ok(Self {
            l: cx - w / two,
            t: cy - h / two,
            r: cx + w / two,
            b: cy + h / two,
        })
    }

    fn try_from_ltrb(ltrb: [Self::Type; 4]) -> Result<Self> {
        let [l, t, r, b] = ltrb;
        ensure!(r >= l && b >= t, "r >= l and b >= t must hold");
        Ok(Self { l, t, r, b })
    }

    fn try_from_ltwh(ltwh: [Self::Type; 4]) -> Result<Self> {
        let [l, t, w, h] = ltwh;
        Self::try_from_ltrb([l, t, l + w, t + h])
    }
}

impl<T> From<CxCyWH<T>> for LTRB<T>
where
    T: Copy + Num,
{
    fn from(from: CxCyWH<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&CxCyWH<T>> for LTRB<T>
where
    T: Copy + Num,
{
    fn from(from: &CxCyWH<T>) -> Self {
        let two = T::one() + T::one();
        let CxCyWH { cx, cy, w, h } = *from;
        Self {
            l: cx - w / two,
            t: cy - h / two,
            r: cx + w / two,
            b: cy + h / two,
        }
    }
}
