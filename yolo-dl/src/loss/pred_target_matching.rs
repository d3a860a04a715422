use super::misc::UnmatchedTruthPolicy;
use crate::{
    anchors::AnchorSpec,
    common::*,
    decode::BoxCoder,
    grid::{GridView, InstanceIndex},
    utils::IOU_EPSILON,
};

/// An annotated box in input pixels with its class id.
pub type GroundTruth = Label<CxCyWH<f64>, usize>;

#[derive(Debug, Clone)]
pub struct AnchorMatcherInit {
    pub truth_match_iou_threshold: Option<R64>,
    pub ignore_iou_threshold: Option<R64>,
    pub unmatched_truth: Option<UnmatchedTruthPolicy>,
}

impl Default for AnchorMatcherInit {
    fn default() -> Self {
        Self {
            truth_match_iou_threshold: None,
            ignore_iou_threshold: None,
            unmatched_truth: None,
        }
    }
}

impl AnchorMatcherInit {
    pub const DEFAULT_TRUTH_MATCH_IOU_THRESHOLD: f64 = 0.0;
    pub const DEFAULT_IGNORE_IOU_THRESHOLD: f64 = 0.7;

    pub fn build(self) -> Result<AnchorMatcher> {
        let Self {
            truth_match_iou_threshold,
            ignore_iou_threshold,
            unmatched_truth,
        } = self;

        let truth_match_iou_threshold = truth_match_iou_threshold
            .unwrap_or_else(|| r64(Self::DEFAULT_TRUTH_MATCH_IOU_THRESHOLD));
        let ignore_iou_threshold =
            ignore_iou_threshold.unwrap_or_else(|| r64(Self::DEFAULT_IGNORE_IOU_THRESHOLD));

        ensure!(
            (0.0..=1.0).contains(&truth_match_iou_threshold.raw()),
            "truth_match_iou_threshold must be in range [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&ignore_iou_threshold.raw()),
            "ignore_iou_threshold must be in range [0, 1]"
        );

        Ok(AnchorMatcher {
            truth_match_iou_threshold,
            ignore_iou_threshold,
            unmatched_truth: unmatched_truth.unwrap_or_default(),
        })
    }
}

/// The truth box responsible for a positive anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub truth_index: usize,
    /// Shape IoU between the truth box and the anchor.
    pub anchor_iou: f64,
}

#[derive(Debug, Clone)]
pub struct MatchOutput {
    /// Positive anchors in the order of the truth boxes that claimed them.
    pub positives: IndexMap<InstanceIndex, Assignment>,
    /// Per-scale `(anchor, row, col)` masks of cells excluded from the
    /// background loss. Positive cells are never set.
    pub ignore_masks: Vec<Array3<bool>>,
}

impl MatchOutput {
    pub fn num_positives(&self) -> usize {
        self.positives.len()
    }

    pub fn num_ignored(&self) -> usize {
        self.ignore_masks
            .iter()
            .map(|mask| mask.iter().filter(|&&ignored| ignored).count())
            .sum()
    }

    pub fn is_ignored(&self, index: &InstanceIndex) -> bool {
        self.ignore_masks[index.scale_index][[index.anchor_index, index.row, index.col]]
    }
}

/// Selects the responsible anchor of each truth box and the ignore band.
#[derive(Debug, Clone)]
pub struct AnchorMatcher {
    truth_match_iou_threshold: R64,
    ignore_iou_threshold: R64,
    unmatched_truth: UnmatchedTruthPolicy,
}

impl AnchorMatcher {
    pub fn unmatched_truth(&self) -> UnmatchedTruthPolicy {
        self.unmatched_truth
    }

    /// Checks the class ids of truth boxes that take part in supervision.
    pub fn check_truths(&self, truths: &[GroundTruth], num_classes: usize) -> Result<()> {
        for (index, truth) in truths.iter().enumerate() {
            if truth.ignore {
                continue;
            }
            ensure!(
                truth.class < num_classes,
                "class id {} of truth box {} is out of range, there are {} classes",
                truth.class,
                index,
                num_classes
            );
        }
        Ok(())
    }

    /// Matches the truth boxes of one sample against the anchors of all
    /// scales.
    pub fn match_targets(
        &self,
        box_coder: &BoxCoder,
        views: &[(GridView<'_>, &[AnchorSpec])],
        truths: &[GroundTruth],
    ) -> MatchOutput {
        let mut positives: IndexMap<InstanceIndex, Assignment> = IndexMap::new();
        let mut unmatched_cells = vec![];

        for (truth_index, truth) in truths.iter().enumerate() {
            if truth.ignore {
                continue;
            }

            let rect = &truth.rect;
            if !rect.cxcywh().iter().all(|value| value.is_finite()) {
                warn!("skip truth box {} with non-finite geometry {:?}", truth_index, rect);
                continue;
            }
            if abs_diff_eq!(rect.w(), 0.0) || abs_diff_eq!(rect.h(), 0.0) {
                warn!(
                    "the truth box {:?} is too small. It may cause division by zero error.",
                    rect
                );
            }

            // pick the anchor of best shape IoU over all scales, first wins on ties
            let truth_wh = rect.wh();
            let best = views
                .iter()
                .enumerate()
                .flat_map(|(scale_index, (_, anchors))| {
                    anchors
                        .iter()
                        .enumerate()
                        .map(move |(anchor_index, anchor)| (scale_index, anchor_index, anchor))
                })
                .map(|(scale_index, anchor_index, anchor)| {
                    let iou = truth_wh.shape_iou_with(&anchor.wh(), IOU_EPSILON);
                    (scale_index, anchor_index, iou)
                })
                .fold(None, |best: Option<(usize, usize, f64)>, curr| match best {
                    Some(prev) if prev.2 >= curr.2 => Some(prev),
                    _ => Some(curr),
                });
            let (scale_index, anchor_index, anchor_iou) = match best {
                Some(best) => best,
                None => continue,
            };

            let layout = views[scale_index].0.layout();
            let (row, col) = match layout.cell_at(rect.cx(), rect.cy()) {
                Some(cell) => cell,
                None => {
                    warn!(
                        "the center of truth box {:?} lies outside the {}x{} grid of stride {}",
                        rect,
                        layout.rows(),
                        layout.cols(),
                        layout.stride()
                    );
                    continue;
                }
            };
            let instance = InstanceIndex {
                scale_index,
                anchor_index,
                row,
                col,
            };

            if anchor_iou < self.truth_match_iou_threshold.raw() {
                debug!(
                    "truth box {} matches no anchor, best IoU {:.3} is below {}",
                    truth_index, anchor_iou, self.truth_match_iou_threshold
                );
                if self.unmatched_truth == UnmatchedTruthPolicy::IgnoreBestCell {
                    unmatched_cells.push(instance);
                }
                continue;
            }

            if let Some(prev) = positives.get(&instance) {
                debug!(
                    "truth box {} collides with truth box {} at {:?}, keep the former",
                    truth_index, prev.truth_index, instance
                );
                continue;
            }

            positives.insert(
                instance,
                Assignment {
                    truth_index,
                    anchor_iou,
                },
            );
        }

        let ignore_iou_threshold = self.ignore_iou_threshold.raw();
        let mut ignore_masks: Vec<_> = views
            .iter()
            .enumerate()
            .map(|(scale_index, (view, anchors))| {
                let layout = view.layout();
                let mut mask = Array3::from_elem(
                    [layout.num_anchors(), layout.rows(), layout.cols()],
                    false,
                );

                if truths.is_empty() {
                    return mask;
                }

                for (anchor_index, row, col) in layout.cells() {
                    let instance = InstanceIndex {
                        scale_index,
                        anchor_index,
                        row,
                        col,
                    };
                    if positives.contains_key(&instance) {
                        continue;
                    }

                    let pred = match box_coder.decode_rect(
                        view,
                        &anchors[anchor_index],
                        anchor_index,
                        row,
                        col,
                    ) {
                        Some(pred) => pred,
                        None => continue,
                    };
                    let overlapped = truths
                        .iter()
                        .any(|truth| pred.iou_with(&truth.rect, IOU_EPSILON) >= ignore_iou_threshold);
                    mask[[anchor_index, row, col]] = overlapped;
                }

                mask
            })
            .collect();

        for instance in unmatched_cells {
            if !positives.contains_key(&instance) {
                ignore_masks[instance.scale_index]
                    [[instance.anchor_index, instance.row, instance.col]] = true;
            }
        }

        MatchOutput {
            positives,
            ignore_masks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anchors::AnchorTable, grid::InputSize};

    fn features(input: usize, table: &AnchorTable, num_classes: usize) -> Vec<Array3<f32>> {
        table
            .scales()
            .iter()
            .map(|scale| {
                let size = input / scale.stride;
                // very negative logits decode to tiny boxes
                Array3::from_elem([scale.num_anchors() * (5 + num_classes), size, size], -10.0)
            })
            .collect()
    }

    fn views<'a>(
        features: &'a [Array3<f32>],
        table: &'a AnchorTable,
        input: usize,
        num_classes: usize,
    ) -> Result<Vec<(GridView<'a>, &'a [AnchorSpec])>> {
        features
            .iter()
            .map(|feature| {
                let (view, scale) = GridView::with_anchors(
                    feature.view(),
                    InputSize::square(input),
                    table,
                    num_classes,
                )?;
                Ok((view, scale.anchors.as_slice()))
            })
            .collect()
    }

    #[test]
    fn anchor_sized_truth_matches_its_anchor() -> Result<()> {
        let table = AnchorTable::yolov3();
        let features = features(416, &table, 2);
        let views = views(&features, &table, 416, 2)?;
        let matcher = AnchorMatcherInit::default().build()?;

        // anchor (62, 45) of stride 16
        let truth = GroundTruth::new(CxCyWH::from_cxcywh([100.0, 200.0, 62.0, 45.0]), 1);
        let output = matcher.match_targets(&BoxCoder::default(), &views, &[truth]);

        assert_eq!(output.num_positives(), 1);
        let (instance, assignment) = output.positives.get_index(0).unwrap();
        assert_eq!(
            *instance,
            InstanceIndex {
                scale_index: 1,
                anchor_index: 1,
                row: 12,
                col: 6,
            }
        );
        assert_abs_diff_eq!(assignment.anchor_iou, 1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn first_truth_wins_a_collision() -> Result<()> {
        let table = AnchorTable::yolov3();
        let features = features(416, &table, 2);
        let views = views(&features, &table, 416, 2)?;
        let matcher = AnchorMatcherInit::default().build()?;

        let truths = [
            GroundTruth::new(CxCyWH::from_cxcywh([100.0, 100.0, 10.0, 13.0]), 0),
            GroundTruth::new(CxCyWH::from_cxcywh([101.0, 101.0, 10.0, 13.0]), 1),
        ];
        let output = matcher.match_targets(&BoxCoder::default(), &views, &truths);

        assert_eq!(output.num_positives(), 1);
        assert_eq!(output.positives[0].truth_index, 0);
        Ok(())
    }

    #[test]
    fn ignored_and_outside_truths_give_no_positive() -> Result<()> {
        let table = AnchorTable::yolov3();
        let features = features(416, &table, 2);
        let views = views(&features, &table, 416, 2)?;
        let matcher = AnchorMatcherInit::default().build()?;

        let truths = [
            GroundTruth::ignored(CxCyWH::from_cxcywh([100.0, 100.0, 30.0, 30.0]), 0),
            GroundTruth::new(CxCyWH::from_cxcywh([500.0, 100.0, 30.0, 30.0]), 0),
        ];
        let output = matcher.match_targets(&BoxCoder::default(), &views, &truths);
        assert_eq!(output.num_positives(), 0);
        Ok(())
    }

    #[test]
    fn unmatched_truth_follows_policy() -> Result<()> {
        let table = AnchorTable::yolov3();
        let features = features(416, &table, 2);
        let views = views(&features, &table, 416, 2)?;

        // a thin box overlaps every anchor poorly
        let truth = GroundTruth::new(CxCyWH::from_cxcywh([208.0, 208.0, 400.0, 4.0]), 0);

        let drop = AnchorMatcherInit {
            truth_match_iou_threshold: Some(r64(0.5)),
            unmatched_truth: Some(UnmatchedTruthPolicy::Drop),
            ..Default::default()
        }
        .build()?
        .match_targets(&BoxCoder::default(), &views, &[truth.clone()]);
        assert_eq!(drop.num_positives(), 0);
        assert_eq!(drop.num_ignored(), 0);

        let ignore = AnchorMatcherInit {
            truth_match_iou_threshold: Some(r64(0.5)),
            unmatched_truth: Some(UnmatchedTruthPolicy::IgnoreBestCell),
            ..Default::default()
        }
        .build()?
        .match_targets(&BoxCoder::default(), &views, &[truth]);
        assert_eq!(ignore.num_positives(), 0);
        assert_eq!(ignore.num_ignored(), 1);
        Ok(())
    }

    #[test]
    fn predictions_overlapping_truths_are_ignored() -> Result<()> {
        let table = AnchorTable::yolov3();
        let mut features = features(416, &table, 2);

        // make anchor 2 of stride 32 at cell (3, 3) predict a box at
        // (112, 112) of size (373, 326) which overlaps the ignored truth
        let channel_base = 2 * 7;
        let scale = &mut features[2];
        scale[[channel_base, 3, 3]] = 0.0;
        scale[[channel_base + 1, 3, 3]] = 0.0;
        scale[[channel_base + 2, 3, 3]] = 0.0;
        scale[[channel_base + 3, 3, 3]] = 0.0;

        let views = views(&features, &table, 416, 2)?;
        let matcher = AnchorMatcherInit::default().build()?;
        let truth = GroundTruth::ignored(CxCyWH::from_cxcywh([112.0, 112.0, 373.0, 326.0]), 0);
        let output = matcher.match_targets(&BoxCoder::default(), &views, &[truth]);

        assert_eq!(output.num_positives(), 0);
        assert_eq!(output.num_ignored(), 1);
        assert!(output.is_ignored(&InstanceIndex {
            scale_index: 2,
            anchor_index: 2,
            row: 3,
            col: 3,
        }));
        Ok(())
    }

    #[test]
    fn out_of_range_class_is_an_error() -> Result<()> {
        let matcher = AnchorMatcherInit::default().build()?;
        let truths = [
            GroundTruth::new(CxCyWH::from_cxcywh([10.0, 10.0, 5.0, 5.0]), 1),
            GroundTruth::ignored(CxCyWH::from_cxcywh([10.0, 10.0, 5.0, 5.0]), 9),
        ];
        assert!(matcher.check_truths(&truths, 2).is_ok());
        assert!(matcher.check_truths(&truths, 1).is_err());
        Ok(())
    }
}
