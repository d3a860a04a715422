use bbox::{CxCyWH, Rect, Transform};
use num_traits::Num;
use std::ops::Mul;

/// An annotated box with its class.
///
/// Boxes marked `ignore` never receive positive supervision. Predictions
/// overlapping them are excluded from the background loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
    pub ignore: bool,
}

impl<R, C> Label<R, C>
where
    R: Rect,
{
    pub fn new(rect: R, class: C) -> Self {
        Self {
            rect,
            class,
            ignore: false,
        }
    }

    pub fn ignored(rect: R, class: C) -> Self {
        Self {
            rect,
            class,
            ignore: true,
        }
    }
}

impl<'a, T, C> Mul<&'a Label<CxCyWH<T>, C>> for &'a Transform<T>
where
    T: Copy + Num + PartialOrd,
    C: Copy,
{
    type Output = Label<CxCyWH<T>, C>;

    fn mul(self, rhs: &'a Label<CxCyWH<T>, C>) -> Self::Output {
        Label {
            rect: self * &rhs.rect,
            class: rhs.class,
            ignore: rhs.ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbox::{RectNum, WH};

    #[test]
    fn transform_keeps_class_and_ignore_flag() {
        let label = Label::ignored(CxCyWH::from_cxcywh([10.0, 10.0, 4.0, 2.0]), 3usize);
        let transform =
            Transform::from_sizes_letterbox(WH::from_wh([20.0, 20.0]), WH::from_wh([40.0, 40.0]));
        let scaled = &transform * &label;

        assert_eq!(scaled.class, 3);
        assert!(scaled.ignore);
        assert_eq!(scaled.rect.cxcywh(), [20.0, 20.0, 8.0, 4.0]);
    }
}
