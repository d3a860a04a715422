//! Conversion of raw feature maps into calibrated detections.

use crate::{
    anchors::{AnchorSpec, AnchorTable},
    common::*,
    grid::{Attribute, GridView, InputSize, NUM_BOX_ATTRIBUTES},
    utils::{logit, sigmoid},
};

/// Guards the logarithm of box-to-anchor size ratios.
pub const SIZE_EPSILON: f64 = 1e-9;

/// Maps the size logit of a box to a multiple of the anchor size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizeTransform {
    /// `size = exp(t) * anchor`
    Exponential,
    /// `size = (gain * sigmoid(t))^2 * anchor`
    Bounded { gain: R64 },
}

impl SizeTransform {
    pub const DEFAULT_BOUNDED_GAIN: f64 = 2.0;

    pub fn bounded() -> Self {
        Self::Bounded {
            gain: r64(Self::DEFAULT_BOUNDED_GAIN),
        }
    }

    pub fn decode(&self, t: f64, anchor: f64) -> f64 {
        match *self {
            Self::Exponential => t.exp() * anchor,
            Self::Bounded { gain } => {
                let ratio = gain.raw() * sigmoid(t);
                ratio * ratio * anchor
            }
        }
    }

    /// The logit that decodes to `size`.
    pub fn encode(&self, size: f64, anchor: f64) -> f64 {
        let ratio = size.max(SIZE_EPSILON) / anchor.max(SIZE_EPSILON);
        match *self {
            Self::Exponential => ratio.ln(),
            Self::Bounded { gain } => logit(ratio.sqrt() / gain.raw()),
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        if let Self::Bounded { gain } = *self {
            ensure!(gain > 0.0, "the gain of bounded size transform must be positive");
        }
        Ok(())
    }
}

impl Default for SizeTransform {
    fn default() -> Self {
        Self::Exponential
    }
}

/// The bidirectional mapping between box geometry and the raw box logits
/// `(tx, ty, tw, th)` of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxCoder {
    pub size_transform: SizeTransform,
    pub center_scale: R64,
}

impl Default for BoxCoder {
    fn default() -> Self {
        Self {
            size_transform: SizeTransform::Exponential,
            center_scale: r64(1.0),
        }
    }
}

impl BoxCoder {
    pub fn new(size_transform: SizeTransform, center_scale: R64) -> Result<Self> {
        size_transform.check()?;
        ensure!(
            center_scale >= 1.0,
            "center scale must be at least 1.0, but get {}",
            center_scale
        );
        Ok(Self {
            size_transform,
            center_scale,
        })
    }

    /// The center coordinate along one axis in input pixels.
    pub fn decode_center(&self, t: f64, cell: usize, stride: usize) -> f64 {
        let scale = self.center_scale.raw();
        (sigmoid(t) * scale - (scale - 1.0) / 2.0 + cell as f64) * stride as f64
    }

    /// The sigmoid-space target whose decoded center is `pos`.
    pub fn center_target(&self, pos: f64, cell: usize, stride: usize) -> f64 {
        let scale = self.center_scale.raw();
        (pos / stride as f64 - cell as f64 + (scale - 1.0) / 2.0) / scale
    }

    pub fn decode_rect(
        &self,
        view: &GridView<'_>,
        anchor: &AnchorSpec,
        anchor_index: usize,
        row: usize,
        col: usize,
    ) -> Option<CxCyWH<f64>> {
        let stride = view.layout().stride();
        let value = |attribute| view.value(anchor_index, attribute, row, col) as f64;

        let cx = self.decode_center(value(Attribute::Tx), col, stride);
        let cy = self.decode_center(value(Attribute::Ty), row, stride);
        let w = self
            .size_transform
            .decode(value(Attribute::Tw), anchor.width.raw());
        let h = self
            .size_transform
            .decode(value(Attribute::Th), anchor.height.raw());

        [cx, cy, w, h]
            .iter()
            .all(|value| value.is_finite())
            .then(|| CxCyWH::try_from_cxcywh([cx, cy, w, h]).ok())
            .flatten()
    }

    /// Computes the raw logits `[tx, ty, tw, th]` that decode to `rect` at the
    /// given cell.
    pub fn encode_rect(
        &self,
        rect: &CxCyWH<f64>,
        anchor: &AnchorSpec,
        row: usize,
        col: usize,
        stride: usize,
    ) -> [f64; 4] {
        [
            logit(self.center_target(rect.cx(), col, stride)),
            logit(self.center_target(rect.cy(), row, stride)),
            self.size_transform.encode(rect.w(), anchor.width.raw()),
            self.size_transform.encode(rect.h(), anchor.height.raw()),
        ]
    }
}

/// A calibrated box produced from one anchor of one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub rect: CxCyWH<f64>,
    pub objectness: f64,
    pub class: usize,
    pub class_confidence: f64,
    /// `objectness * class_confidence`
    pub score: f64,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecoderInit {
    pub anchors: AnchorTable,
    pub input_size: InputSize,
    pub num_classes: usize,
    pub confidence_threshold: Option<R64>,
    pub box_coder: Option<BoxCoder>,
    pub vocabulary: Option<Vocabulary>,
}

impl DecoderInit {
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.25;

    pub fn build(self) -> Result<Decoder> {
        let Self {
            anchors,
            input_size,
            num_classes,
            confidence_threshold,
            box_coder,
            vocabulary,
        } = self;

        let confidence_threshold =
            confidence_threshold.unwrap_or_else(|| r64(Self::DEFAULT_CONFIDENCE_THRESHOLD));
        ensure!(
            (0.0..=1.0).contains(&confidence_threshold.raw()),
            "confidence_threshold must be in range [0, 1]"
        );
        ensure!(num_classes > 0, "the number of classes must be positive");
        ensure!(
            input_size.h > 0 && input_size.w > 0,
            "input size must be non-empty, but get {}x{}",
            input_size.h,
            input_size.w
        );
        if let Some(vocabulary) = &vocabulary {
            ensure!(
                vocabulary.len() == num_classes,
                "the vocabulary has {} labels but {} classes are expected",
                vocabulary.len(),
                num_classes
            );
        }
        for scale in anchors.scales() {
            infer_rows_cols(input_size, scale.stride)?;
        }

        Ok(Decoder {
            anchors,
            input_size,
            num_classes,
            confidence_threshold,
            box_coder: box_coder.unwrap_or_default(),
            vocabulary,
        })
    }
}

/// Checks that the input size is divisible by the stride.
fn infer_rows_cols(input_size: InputSize, stride: usize) -> Result<(usize, usize)> {
    ensure!(
        input_size.h % stride == 0 && input_size.w % stride == 0,
        "input size {}x{} is not divisible by stride {}",
        input_size.h,
        input_size.w,
        stride
    );
    Ok((input_size.h / stride, input_size.w / stride))
}

/// Turns the feature maps of all scales of one sample into detections.
#[derive(Debug, Clone)]
pub struct Decoder {
    anchors: AnchorTable,
    input_size: InputSize,
    num_classes: usize,
    confidence_threshold: R64,
    box_coder: BoxCoder,
    vocabulary: Option<Vocabulary>,
}

impl Decoder {
    pub fn anchors(&self) -> &AnchorTable {
        &self.anchors
    }

    pub fn input_size(&self) -> InputSize {
        self.input_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn confidence_threshold(&self) -> R64 {
        self.confidence_threshold
    }

    pub fn vocabulary(&self) -> Option<&Vocabulary> {
        self.vocabulary.as_ref()
    }

    pub fn box_coder(&self) -> &BoxCoder {
        &self.box_coder
    }

    /// The expected `(channels, rows, cols)` shape of each scale.
    pub fn feature_shapes(&self) -> Result<Vec<[usize; 3]>> {
        self.anchors
            .scales()
            .iter()
            .map(|scale| {
                let (rows, cols) = infer_rows_cols(self.input_size, scale.stride)?;
                let channels = scale.num_anchors() * (NUM_BOX_ATTRIBUTES + self.num_classes);
                Ok([channels, rows, cols])
            })
            .collect()
    }

    /// Builds views over the feature maps of one sample, one per scale.
    pub fn views<'a, 'f>(
        &'a self,
        features: &'f [ArrayView3<'_, f32>],
    ) -> Result<Vec<(GridView<'f>, &'a [AnchorSpec])>> {
        ensure!(
            features.len() == self.anchors.num_scales(),
            "expect {} feature maps, but get {}",
            self.anchors.num_scales(),
            features.len()
        );

        let views = features
            .iter()
            .map(|feature| {
                let (view, scale) = GridView::with_anchors(
                    feature.view(),
                    self.input_size,
                    &self.anchors,
                    self.num_classes,
                )?;
                Ok((view, scale.anchors.as_slice()))
            })
            .collect::<Result<Vec<_>>>()?;

        let num_strides = views
            .iter()
            .map(|(view, _)| view.layout().stride())
            .collect::<HashSet<_>>()
            .len();
        ensure!(
            num_strides == views.len(),
            "more than one feature map is given for the same stride"
        );

        Ok(views)
    }

    /// Decodes all scales of one sample and merges the detections.
    pub fn decode(&self, features: &[ArrayView3<'_, f32>]) -> Result<Vec<Detection>> {
        let views = self.views(features)?;
        let mut detections = vec![];

        for (view, anchors) in &views {
            self.decode_scale(view, anchors, &mut detections)?;
        }

        Ok(detections)
    }

    fn decode_scale(
        &self,
        view: &GridView<'_>,
        anchors: &[AnchorSpec],
        detections: &mut Vec<Detection>,
    ) -> Result<()> {
        let confidence_threshold = self.confidence_threshold.raw();

        for (anchor_index, row, col) in view.layout().cells() {
            let objectness = sigmoid(view.value(anchor_index, Attribute::Objectness, row, col) as f64);
            if !(objectness > confidence_threshold) {
                continue;
            }

            let (class, class_confidence) = match view
                .class_logits(anchor_index, row, col)
                .map(|logit| sigmoid(logit as f64))
                .enumerate()
                .min_by(|(_, lhs), (_, rhs)| rhs.total_cmp(lhs))
            {
                Some(best) => best,
                None => continue,
            };

            let score = objectness * class_confidence;
            if !(score > confidence_threshold) {
                continue;
            }

            let rect = match self
                .box_coder
                .decode_rect(view, &anchors[anchor_index], anchor_index, row, col)
            {
                Some(rect) => rect,
                None => {
                    debug!(
                        "drop non-finite box at stride {}, anchor {}, cell ({}, {})",
                        view.layout().stride(),
                        anchor_index,
                        row,
                        col
                    );
                    continue;
                }
            };

            let label = self
                .vocabulary
                .as_ref()
                .map(|vocabulary| vocabulary.get(class).map(ToString::to_string))
                .transpose()?;

            detections.push(Detection {
                rect,
                objectness,
                class,
                class_confidence,
                score,
                label,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn size_transforms_invert() {
        for transform in [SizeTransform::Exponential, SizeTransform::bounded()] {
            for size in [3.0, 10.0, 35.0] {
                let t = transform.encode(size, 10.0);
                assert_abs_diff_eq!(transform.decode(t, 10.0), size, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn bounded_size_saturates() {
        let transform = SizeTransform::bounded();
        assert_abs_diff_eq!(transform.decode(100.0, 10.0), 40.0, epsilon = 1e-9);
        assert!(transform.decode(-100.0, 10.0) >= 0.0);
    }

    #[test]
    fn degenerate_sizes_are_guarded() {
        for transform in [SizeTransform::Exponential, SizeTransform::bounded()] {
            assert!(transform.encode(0.0, 10.0).is_finite());
            assert!(transform.encode(10.0, 0.0).is_finite());
        }
    }

    #[test]
    fn scaled_center_spans_beyond_cell() -> Result<()> {
        let coder = BoxCoder::new(SizeTransform::Exponential, r64(2.0))?;
        assert_abs_diff_eq!(coder.decode_center(100.0, 3, 8), 4.5 * 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(coder.decode_center(-100.0, 3, 8), 2.5 * 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(coder.decode_center(0.0, 3, 8), 3.5 * 8.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn invalid_coders_are_rejected() {
        assert!(BoxCoder::new(SizeTransform::Exponential, r64(0.5)).is_err());
        assert!(BoxCoder::new(SizeTransform::Bounded { gain: r64(0.0) }, r64(1.0)).is_err());
    }

    #[test]
    fn feature_count_must_match_scales() -> Result<()> {
        let decoder = DecoderInit {
            anchors: AnchorTable::yolov3(),
            input_size: InputSize::square(64),
            num_classes: 1,
            confidence_threshold: None,
            box_coder: None,
            vocabulary: None,
        }
        .build()?;

        let shapes = decoder.feature_shapes()?;
        assert_eq!(shapes, [[18, 8, 8], [18, 4, 4], [18, 2, 2]]);

        let feature = Array3::<f32>::zeros(shapes[0]);
        assert!(decoder.decode(&[feature.view()]).is_err());

        let features = [feature.view(), feature.view(), feature.view()];
        assert!(decoder.decode(&features).is_err());
        Ok(())
    }

    #[test]
    fn vocabulary_size_must_match_classes() -> Result<()> {
        let result = DecoderInit {
            anchors: AnchorTable::yolov3(),
            input_size: InputSize::square(416),
            num_classes: 3,
            confidence_threshold: None,
            box_coder: None,
            vocabulary: Some(Vocabulary::new(["cat", "dog"])?),
        }
        .build();
        assert!(result.is_err());
        Ok(())
    }
}
