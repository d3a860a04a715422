//! Prior box sizes grouped by detection scale.

use crate::common::*;

/// A prior box size in input image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorSpec {
    pub width: R64,
    pub height: R64,
}

impl AnchorSpec {
    pub fn new(width: f64, height: f64) -> Result<Self> {
        let anchor = Self {
            width: R64::try_new(width).ok_or_else(|| format_err!("invalid anchor width"))?,
            height: R64::try_new(height).ok_or_else(|| format_err!("invalid anchor height"))?,
        };
        anchor.check()?;
        Ok(anchor)
    }

    pub fn wh(&self) -> WH<f64> {
        WH::from_wh([self.width.raw(), self.height.raw()])
    }

    fn check(&self) -> Result<()> {
        ensure!(
            self.width > 0.0 && self.height > 0.0,
            "anchor size must be positive, but get {}x{}",
            self.width,
            self.height
        );
        Ok(())
    }
}

/// The anchors attached to the feature map of one stride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScaleAnchors {
    pub stride: usize,
    pub anchors: Vec<AnchorSpec>,
}

impl ScaleAnchors {
    pub fn num_anchors(&self) -> usize {
        self.anchors.len()
    }
}

/// Per-scale anchor lists ordered by increasing stride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ScaleAnchors>", into = "Vec<ScaleAnchors>")]
pub struct AnchorTable(Vec<ScaleAnchors>);

impl AnchorTable {
    pub fn new(mut scales: Vec<ScaleAnchors>) -> Result<Self> {
        ensure!(!scales.is_empty(), "the anchor table must not be empty");

        scales.sort_by_key(|scale| scale.stride);

        for scale in &scales {
            ensure!(scale.stride > 0, "stride must be positive");
            ensure!(
                !scale.anchors.is_empty(),
                "no anchors are given for stride {}",
                scale.stride
            );
            scale.anchors.iter().try_for_each(AnchorSpec::check)?;
        }

        let duplicated = scales
            .iter()
            .tuple_windows()
            .find(|(lhs, rhs)| lhs.stride == rhs.stride);
        if let Some((scale, _)) = duplicated {
            bail!("stride {} is specified more than once", scale.stride);
        }

        Ok(Self(scales))
    }

    /// The anchors of YOLOv3 for strides 8, 16 and 32.
    pub fn yolov3() -> Self {
        let scale = |stride: usize, sizes: [(f64, f64); 3]| ScaleAnchors {
            stride,
            anchors: sizes
                .into_iter()
                .map(|(w, h)| AnchorSpec {
                    width: r64(w),
                    height: r64(h),
                })
                .collect(),
        };

        Self(vec![
            scale(8, [(10.0, 13.0), (16.0, 30.0), (33.0, 23.0)]),
            scale(16, [(30.0, 61.0), (62.0, 45.0), (59.0, 119.0)]),
            scale(32, [(116.0, 90.0), (156.0, 198.0), (373.0, 326.0)]),
        ])
    }

    pub fn scales(&self) -> &[ScaleAnchors] {
        &self.0
    }

    pub fn num_scales(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, stride: usize) -> Result<&ScaleAnchors> {
        self.0
            .iter()
            .find(|scale| scale.stride == stride)
            .ok_or_else(|| format_err!("no anchors are configured for stride {}", stride))
    }

    /// Iterates over `(scale_index, anchor_index, anchor)` over all scales.
    pub fn iter_anchors(&self) -> impl Iterator<Item = (usize, usize, &AnchorSpec)> {
        self.0
            .iter()
            .enumerate()
            .flat_map(|(scale_index, scale)| {
                scale
                    .anchors
                    .iter()
                    .enumerate()
                    .map(move |(anchor_index, anchor)| (scale_index, anchor_index, anchor))
            })
    }
}

impl TryFrom<Vec<ScaleAnchors>> for AnchorTable {
    type Error = Error;

    fn try_from(from: Vec<ScaleAnchors>) -> Result<Self, Self::Error> {
        Self::new(from)
    }
}

impl From<AnchorTable> for Vec<ScaleAnchors> {
    fn from(from: AnchorTable) -> Self {
        from.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_are_sorted_by_stride() -> Result<()> {
        let mut scales = AnchorTable::yolov3().0;
        scales.reverse();
        let table = AnchorTable::new(scales)?;
        let strides: Vec<_> = table.scales().iter().map(|scale| scale.stride).collect();
        assert_eq!(strides, [8, 16, 32]);
        Ok(())
    }

    #[test]
    fn missing_stride_is_an_error() {
        let table = AnchorTable::yolov3();
        assert!(table.get(16).is_ok());
        assert!(table.get(64).is_err());
    }

    #[test]
    fn invalid_tables_are_rejected() -> Result<()> {
        let anchor = AnchorSpec::new(10.0, 10.0)?;

        assert!(AnchorTable::new(vec![]).is_err());
        assert!(AnchorTable::new(vec![ScaleAnchors {
            stride: 8,
            anchors: vec![],
        }])
        .is_err());
        assert!(AnchorTable::new(vec![
            ScaleAnchors {
                stride: 8,
                anchors: vec![anchor],
            },
            ScaleAnchors {
                stride: 8,
                anchors: vec![anchor],
            },
        ])
        .is_err());
        assert!(AnchorSpec::new(0.0, 10.0).is_err());
        assert!(AnchorSpec::new(f64::NAN, 10.0).is_err());
        Ok(())
    }

    #[test]
    fn iterates_all_anchors_in_order() {
        let table = AnchorTable::yolov3();
        let indexes: Vec<_> = table
            .iter_anchors()
            .map(|(scale_index, anchor_index, _)| (scale_index, anchor_index))
            .collect();
        assert_eq!(indexes.len(), 9);
        assert_eq!(indexes[0], (0, 0));
        assert_eq!(indexes[4], (1, 1));
        assert_eq!(indexes[8], (2, 2));
    }
}
