use super::{CxCyWH, LTRB, WH};
use crate::{common::*, Element};

/// The generic axis-aligned rectangle.
///
/// The `x` axis grows to the right and the `y` axis grows downwards, so
/// `l <= r` and `t <= b` for every valid rectangle.
pub trait Rect {
    type Type;

    fn l(&self) -> Self::Type;
    fn t(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn w(&self) -> Self::Type;
    fn h(&self) -> Self::Type;

    fn try_from_ltrb(ltrb: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_ltwh(ltwh: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_cxcywh(cxcywh: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn from_ltrb(ltrb: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_ltrb(ltrb).unwrap()
    }

    fn from_ltwh(ltwh: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_ltwh(ltwh).unwrap()
    }

    fn from_cxcywh(cxcywh: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_cxcywh(cxcywh).unwrap()
    }

    fn cxcywh(&self) -> [Self::Type; 4] {
        [self.cx(), self.cy(), self.w(), self.h()]
    }

    fn ltrb(&self) -> [Self::Type; 4] {
        [self.l(), self.t(), self.r(), self.b()]
    }

    fn ltwh(&self) -> [Self::Type; 4] {
        [self.l(), self.t(), self.w(), self.h()]
    }

    fn wh(&self) -> WH<Self::Type> {
        WH {
            w: self.w(),
            h: self.h(),
        }
    }

    fn to_cxcywh(&self) -> CxCyWH<Self::Type> {
        CxCyWH {
            cx: self.cx(),
            cy: self.cy(),
            w: self.w(),
            h: self.h(),
        }
    }

    fn to_ltrb(&self) -> LTRB<Self::Type> {
        LTRB {
            l: self.l(),
            t: self.t(),
            r: self.r(),
            b: self.b(),
        }
    }

    fn area(&self) -> <Self::Type as Mul<Self::Type>>::Output
    where
        Self::Type: Mul<Self::Type>,
    {
        self.w() * self.h()
    }

}

pub trait RectFloat: RectNum
where
    Self::Type: Element,
{
    fn intersect_with<R>(&self, other: &R) -> Option<LTRB<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let l = self.l().max(other.l());
        let t = self.t().max(other.t());
        let r = self.r().min(other.r());
        let b = self.b().min(other.b());
        (r > l && b > t).then(|| LTRB { l, t, r, b })
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union.
    ///
    /// The `epsilon` is added to the union area so that a pair of degenerate
    /// boxes yields zero instead of NaN.
    fn iou_with<R>(&self, other: &R, epsilon: Self::Type) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.area() - inter_area + epsilon;
        inter_area / union_area
    }

}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Element,
{
}
