use crate::{common::*, CxCyWH, WH};

/// Per-axis scale followed by a translation, mapping one image frame
/// onto another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sx: T,
    pub sy: T,
    pub tx: T,
    pub ty: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    /// Resize `src` into `tgt` keeping the aspect ratio. The short side
    /// is padded evenly on both ends.
    pub fn from_sizes_letterbox(src: WH<T>, tgt: WH<T>) -> Self {
        let scale = {
            let scale_x = tgt.w() / src.w();
            let scale_y = tgt.h() / src.h();
            if scale_x <= scale_y {
                scale_x
            } else {
                scale_y
            }
        };

        let two = T::one() + T::one();
        Self {
            sx: scale,
            sy: scale,
            tx: (tgt.w() - src.w() * scale) / two,
            ty: (tgt.h() - src.h() * scale) / two,
        }
    }
}

impl<T> Transform<T>
where
    T: Copy + Num + Neg<Output = T>,
{
    pub fn inverse(&self) -> Self {
        Self {
            sx: T::one() / self.sx,
            sy: T::one() / self.sy,
            tx: -self.tx / self.sx,
            ty: -self.ty / self.sy,
        }
    }
}

impl<T> Mul<&CxCyWH<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = CxCyWH<T>;

    fn mul(self, rhs: &CxCyWH<T>) -> Self::Output {
        CxCyWH {
            cx: rhs.cx * self.sx + self.tx,
            cy: rhs.cy * self.sy + self.ty,
            w: rhs.w * self.sx,
            h: rhs.h * self.sy,
        }
    }
}
