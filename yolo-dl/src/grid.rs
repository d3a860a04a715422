//! Logical addressing into per-scale detection feature maps.
//!
//! A detection head emits a `(channels, rows, cols)` tensor per sample where
//! `channels = num_anchors * (5 + num_classes)`. The attributes of one anchor
//! are stored contiguously along the channel axis in the order
//! `[tx, ty, tw, th, to, tc_0, .., tc_{C-1}]`.

use crate::{
    anchors::{AnchorTable, ScaleAnchors},
    common::*,
};
use getset::CopyGetters;

/// Number of non-class attributes per anchor.
pub const NUM_BOX_ATTRIBUTES: usize = 5;

/// The spatial size of the network input in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputSize {
    pub h: usize,
    pub w: usize,
}

impl InputSize {
    pub fn square(size: usize) -> Self {
        Self { h: size, w: size }
    }

    pub fn wh(&self) -> WH<f64> {
        WH::from_wh([self.w as f64, self.h as f64])
    }
}

/// One attribute slot of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Tx,
    Ty,
    Tw,
    Th,
    Objectness,
    Class(usize),
}

impl Attribute {
    pub fn offset(&self) -> usize {
        match *self {
            Self::Tx => 0,
            Self::Ty => 1,
            Self::Tw => 2,
            Self::Th => 3,
            Self::Objectness => 4,
            Self::Class(class) => NUM_BOX_ATTRIBUTES + class,
        }
    }
}

/// Identifies one anchor of one grid cell across all scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceIndex {
    pub scale_index: usize,
    pub anchor_index: usize,
    pub row: usize,
    pub col: usize,
}

/// Computes the stride of a `rows`x`cols` feature map.
///
/// The input size must be an exact multiple of the feature size and the
/// stride must be the same along both axes.
pub fn infer_stride(input_size: InputSize, rows: usize, cols: usize) -> Result<usize> {
    let InputSize {
        h: input_h,
        w: input_w,
    } = input_size;
    ensure!(
        rows > 0 && cols > 0,
        "the feature map must not be empty, but get {}x{}",
        rows,
        cols
    );
    ensure!(
        input_h % rows == 0 && input_w % cols == 0,
        "input size {}x{} is not a multiple of feature size {}x{}",
        input_h,
        input_w,
        rows,
        cols
    );
    let stride_y = input_h / rows;
    let stride_x = input_w / cols;
    ensure!(
        stride_y == stride_x,
        "vertical stride {} and horizontal stride {} differ",
        stride_y,
        stride_x
    );
    Ok(stride_y)
}

/// Shape of the feature map of one scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct GridLayout {
    num_anchors: usize,
    num_classes: usize,
    rows: usize,
    cols: usize,
    stride: usize,
}

impl GridLayout {
    pub fn new(
        shape: [usize; 3],
        input_size: InputSize,
        num_anchors: usize,
        num_classes: usize,
    ) -> Result<Self> {
        let [channels, rows, cols] = shape;
        ensure!(num_anchors > 0, "the number of anchors must be positive");
        ensure!(
            channels == num_anchors * (NUM_BOX_ATTRIBUTES + num_classes),
            "expect {} channels for {} anchors and {} classes, but get {}",
            num_anchors * (NUM_BOX_ATTRIBUTES + num_classes),
            num_anchors,
            num_classes,
            channels
        );

        let stride = infer_stride(input_size, rows, cols)?;

        Ok(Self {
            num_anchors,
            num_classes,
            rows,
            cols,
            stride,
        })
    }

    pub fn num_attributes(&self) -> usize {
        NUM_BOX_ATTRIBUTES + self.num_classes
    }

    pub fn num_cells(&self) -> usize {
        self.rows * self.cols
    }

    pub fn shape(&self) -> [usize; 3] {
        [
            self.num_anchors * self.num_attributes(),
            self.rows,
            self.cols,
        ]
    }

    /// The channel index of an anchor attribute.
    pub fn channel(&self, anchor: usize, attribute: Attribute) -> usize {
        debug_assert!(anchor < self.num_anchors);
        debug_assert!(attribute.offset() < self.num_attributes());
        anchor * self.num_attributes() + attribute.offset()
    }

    /// Iterates over `(anchor, row, col)` triples.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, usize)> {
        iproduct!(0..self.num_anchors, 0..self.rows, 0..self.cols)
    }

    /// Locates the `(row, col)` of the cell containing a pixel position.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let stride = self.stride as f64;
        let row = (y / stride).floor();
        let col = (x / stride).floor();

        (row >= 0.0 && col >= 0.0 && row < self.rows as f64 && col < self.cols as f64)
            .then(|| (row as usize, col as usize))
    }
}

/// Read-only view of the feature map of one scale of one sample.
#[derive(Debug, Clone)]
pub struct GridView<'a> {
    layout: GridLayout,
    tensor: ArrayView3<'a, f32>,
}

impl<'a> GridView<'a> {
    pub fn new(
        tensor: ArrayView3<'a, f32>,
        input_size: InputSize,
        num_anchors: usize,
        num_classes: usize,
    ) -> Result<Self> {
        let (channels, rows, cols) = tensor.dim();
        let layout = GridLayout::new([channels, rows, cols], input_size, num_anchors, num_classes)?;
        Ok(Self { layout, tensor })
    }

    /// Builds the view and looks up the anchors configured for its stride.
    pub fn with_anchors<'t>(
        tensor: ArrayView3<'a, f32>,
        input_size: InputSize,
        anchors: &'t AnchorTable,
        num_classes: usize,
    ) -> Result<(Self, &'t ScaleAnchors)> {
        let (_, rows, cols) = tensor.dim();
        let stride = infer_stride(input_size, rows, cols)?;
        let scale = anchors.get(stride)?;
        let view = Self::new(tensor, input_size, scale.num_anchors(), num_classes)?;
        Ok((view, scale))
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn value(&self, anchor: usize, attribute: Attribute, row: usize, col: usize) -> f32 {
        self.tensor[[self.layout.channel(anchor, attribute), row, col]]
    }

    pub fn class_logits(
        &self,
        anchor: usize,
        row: usize,
        col: usize,
    ) -> impl Iterator<Item = f32> + '_ {
        let layout = self.layout;
        let tensor = self.tensor.view();
        (0..layout.num_classes)
            .map(move |class| tensor[[layout.channel(anchor, Attribute::Class(class)), row, col]])
    }
}

/// Additive view of a gradient buffer shaped like a feature map.
#[derive(Debug)]
pub struct GridViewMut<'a> {
    layout: GridLayout,
    tensor: ArrayViewMut3<'a, f32>,
}

impl<'a> GridViewMut<'a> {
    pub fn new(tensor: ArrayViewMut3<'a, f32>, layout: GridLayout) -> Result<Self> {
        let (channels, rows, cols) = tensor.dim();
        ensure!(
            [channels, rows, cols] == layout.shape(),
            "gradient buffer shape {:?} does not match feature shape {:?}",
            [channels, rows, cols],
            layout.shape()
        );
        Ok(Self { layout, tensor })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn get(&self, anchor: usize, attribute: Attribute, row: usize, col: usize) -> f32 {
        self.tensor[[self.layout.channel(anchor, attribute), row, col]]
    }

    pub fn add(&mut self, anchor: usize, attribute: Attribute, row: usize, col: usize, value: f32) {
        let channel = self.layout.channel(anchor, attribute);
        self.tensor[[channel, row, col]] += value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_anchor_attributes_channel_major() -> Result<()> {
        let num_anchors = 3;
        let num_classes = 2;
        let tensor = Array3::from_shape_fn([21, 4, 5], |(c, r, col)| (c * 100 + r * 10 + col) as f32);
        let view = GridView::new(
            tensor.view(),
            InputSize { h: 32, w: 40 },
            num_anchors,
            num_classes,
        )?;

        assert_eq!(view.layout().stride(), 8);
        assert_eq!(view.layout().num_attributes(), 7);
        assert_eq!(view.value(0, Attribute::Tx, 1, 2), 12.0);
        assert_eq!(view.value(1, Attribute::Objectness, 0, 0), 1100.0);
        assert_eq!(view.value(2, Attribute::Class(1), 3, 4), 2034.0);

        let logits: Vec<_> = view.class_logits(1, 2, 3).collect();
        assert_eq!(logits, [1223.0, 1323.0]);
        Ok(())
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        let tensor = Array3::<f32>::zeros([20, 4, 4]);
        assert!(GridView::new(tensor.view(), InputSize::square(32), 3, 2).is_err());
    }

    #[test]
    fn non_square_stride_is_rejected() {
        let tensor = Array3::<f32>::zeros([21, 4, 4]);
        assert!(GridView::new(tensor.view(), InputSize { h: 32, w: 64 }, 3, 2).is_err());
        assert!(GridView::new(tensor.view(), InputSize::square(30), 3, 2).is_err());
    }

    #[test]
    fn locates_cell_of_point() -> Result<()> {
        let layout = GridLayout::new([7, 13, 13], InputSize::square(416), 1, 2)?;
        assert_eq!(layout.stride(), 32);
        assert_eq!(layout.cell_at(0.0, 0.0), Some((0, 0)));
        assert_eq!(layout.cell_at(70.0, 33.0), Some((1, 2)));
        assert_eq!(layout.cell_at(415.9, 415.9), Some((12, 12)));
        assert_eq!(layout.cell_at(416.0, 10.0), None);
        assert_eq!(layout.cell_at(-0.5, 10.0), None);
        Ok(())
    }

    #[test]
    fn looks_up_anchors_by_stride() -> Result<()> {
        let anchors = AnchorTable::yolov3();
        let tensor = Array3::<f32>::zeros([3 * 7, 26, 26]);
        let (view, scale) = GridView::with_anchors(tensor.view(), InputSize::square(416), &anchors, 2)?;
        assert_eq!(view.layout().stride(), 16);
        assert_eq!(scale.stride, 16);

        let tensor = Array3::<f32>::zeros([3 * 7, 4, 4]);
        assert!(GridView::with_anchors(tensor.view(), InputSize::square(416), &anchors, 2).is_err());
        Ok(())
    }

    #[test]
    fn gradient_view_accumulates() -> Result<()> {
        let layout = GridLayout::new([7, 2, 2], InputSize::square(16), 1, 2)?;
        let mut buffer = Array3::<f32>::zeros(layout.shape());
        {
            let mut grad = GridViewMut::new(buffer.view_mut(), layout)?;
            grad.add(0, Attribute::Class(1), 1, 0, 0.5);
            grad.add(0, Attribute::Class(1), 1, 0, 0.25);
            assert_eq!(grad.get(0, Attribute::Class(1), 1, 0), 0.75);
        }
        assert_eq!(buffer[[6, 1, 0]], 0.75);
        assert_eq!(buffer.sum(), 0.75);
        Ok(())
    }
}
