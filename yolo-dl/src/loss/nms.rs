use crate::{common::*, decode::Detection, utils::IOU_EPSILON};

#[derive(Debug, Clone)]
pub struct NonMaxSuppressionInit {
    pub iou_threshold: R64,
    pub confidence_threshold: R64,
    /// Only suppress overlapping boxes of the same class.
    pub class_aware: bool,
}

impl Default for NonMaxSuppressionInit {
    fn default() -> Self {
        Self {
            iou_threshold: r64(0.45),
            confidence_threshold: r64(0.25),
            class_aware: false,
        }
    }
}

impl NonMaxSuppressionInit {
    pub fn build(self) -> Result<NonMaxSuppression> {
        let Self {
            iou_threshold,
            confidence_threshold,
            class_aware,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&iou_threshold.raw()),
            "iou_threshold must be in range [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&confidence_threshold.raw()),
            "confidence_threshold must be in range [0, 1]"
        );

        Ok(NonMaxSuppression {
            iou_threshold,
            confidence_threshold,
            class_aware,
        })
    }
}

/// Greedy overlap-based pruning of detections.
#[derive(Debug, Clone)]
pub struct NonMaxSuppression {
    iou_threshold: R64,
    confidence_threshold: R64,
    class_aware: bool,
}

impl NonMaxSuppression {
    pub fn iou_threshold(&self) -> R64 {
        self.iou_threshold
    }

    pub fn confidence_threshold(&self) -> R64 {
        self.confidence_threshold
    }

    pub fn class_aware(&self) -> bool {
        self.class_aware
    }

    /// Returns the surviving detections in descending score order.
    ///
    /// Detections with equal scores are ordered by their geometry and class,
    /// then by input position, so the output does not depend on the order of
    /// distinguishable inputs.
    pub fn forward(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let confidence_threshold = self.confidence_threshold.raw();
        let iou_threshold = self.iou_threshold.raw();

        let mut candidates: Vec<_> = detections
            .into_iter()
            .enumerate()
            .filter(|(_, det)| {
                det.score.is_finite()
                    && det.score >= confidence_threshold
                    && det.rect.cxcywh().iter().all(|value| value.is_finite())
            })
            .collect();

        candidates.sort_by(|(lidx, lhs), (ridx, rhs)| {
            rhs.score
                .total_cmp(&lhs.score)
                .then_with(|| lhs.rect.cx().total_cmp(&rhs.rect.cx()))
                .then_with(|| lhs.rect.cy().total_cmp(&rhs.rect.cy()))
                .then_with(|| lhs.rect.w().total_cmp(&rhs.rect.w()))
                .then_with(|| lhs.rect.h().total_cmp(&rhs.rect.h()))
                .then_with(|| lhs.class.cmp(&rhs.class))
                .then_with(|| lidx.cmp(ridx))
        });

        let mut kept: Vec<Detection> = vec![];

        for (_, det) in candidates {
            let suppressed = kept.iter().any(|prev| {
                (!self.class_aware || prev.class == det.class)
                    && prev.rect.iou_with(&det.rect, IOU_EPSILON) > iou_threshold
            });

            if !suppressed {
                kept.push(det);
            }
        }

        kept
    }
}
