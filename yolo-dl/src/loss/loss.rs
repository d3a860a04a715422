//! Defines loss for training.

use super::{
    bce_with_logit_loss::BceWithLogits,
    misc::BoxLossKind,
    pred_target_matching::{AnchorMatcher, AnchorMatcherInit, GroundTruth, MatchOutput},
};
use crate::{
    anchors::{AnchorSpec, AnchorTable},
    common::*,
    decode::{BoxCoder, Decoder, DecoderInit},
    grid::{Attribute, GridView, GridViewMut, InputSize, InstanceIndex},
    utils::{sigmoid, sigmoid_grad_from_output},
};

pub use loss_weights::*;
pub use yolo_loss::*;
pub use yolo_loss_output::*;

mod loss_weights {
    use super::*;

    /// Multipliers of the loss terms.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct LossWeights {
        pub objectness: R64,
        pub no_objectness: R64,
        pub bbox: R64,
        pub classification: R64,
    }

    impl Default for LossWeights {
        fn default() -> Self {
            Self {
                objectness: r64(1.0),
                no_objectness: r64(1.0),
                bbox: r64(1.0),
                classification: r64(1.0),
            }
        }
    }

    impl LossWeights {
        pub(crate) fn check(&self) -> Result<()> {
            let Self {
                objectness,
                no_objectness,
                bbox,
                classification,
            } = *self;
            ensure!(objectness >= 0.0, "objectness weight must be non-negative");
            ensure!(
                no_objectness >= 0.0,
                "no_objectness weight must be non-negative"
            );
            ensure!(bbox >= 0.0, "bbox weight must be non-negative");
            ensure!(
                classification >= 0.0,
                "classification weight must be non-negative"
            );
            Ok(())
        }
    }
}

mod yolo_loss {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct YoloLossInit {
        pub anchors: AnchorTable,
        pub input_size: InputSize,
        pub num_classes: usize,
        pub box_coder: Option<BoxCoder>,
        pub weights: Option<LossWeights>,
        pub box_loss: Option<BoxLossKind>,
        pub box_gradient_clip: Option<R64>,
        pub normalize_by_batch: Option<bool>,
        pub matcher: AnchorMatcherInit,
    }

    impl YoloLossInit {
        pub const DEFAULT_BOX_GRADIENT_CLIP: f64 = 1.0;

        pub fn new(anchors: AnchorTable, input_size: InputSize, num_classes: usize) -> Self {
            Self {
                anchors,
                input_size,
                num_classes,
                box_coder: None,
                weights: None,
                box_loss: None,
                box_gradient_clip: None,
                normalize_by_batch: None,
                matcher: AnchorMatcherInit::default(),
            }
        }

        pub fn build(self) -> Result<YoloLoss> {
            let Self {
                anchors,
                input_size,
                num_classes,
                box_coder,
                weights,
                box_loss,
                box_gradient_clip,
                normalize_by_batch,
                matcher,
            } = self;

            let weights = weights.unwrap_or_default();
            weights.check()?;
            let box_gradient_clip =
                box_gradient_clip.unwrap_or_else(|| r64(Self::DEFAULT_BOX_GRADIENT_CLIP));
            ensure!(
                box_gradient_clip > 0.0,
                "box_gradient_clip must be positive"
            );

            let decoder = DecoderInit {
                anchors,
                input_size,
                num_classes,
                confidence_threshold: None,
                box_coder,
                vocabulary: None,
            }
            .build()?;
            let matcher = matcher.build()?;

            Ok(YoloLoss {
                decoder,
                matcher,
                weights,
                box_loss: box_loss.unwrap_or_default(),
                box_gradient_clip,
                normalize_by_batch: normalize_by_batch.unwrap_or(true),
            })
        }
    }

    /// Computes the detection loss and writes its exact gradient with respect
    /// to the raw feature maps.
    #[derive(Debug, Clone)]
    pub struct YoloLoss {
        decoder: Decoder,
        matcher: AnchorMatcher,
        weights: LossWeights,
        box_loss: BoxLossKind,
        box_gradient_clip: R64,
        normalize_by_batch: bool,
    }

    impl YoloLoss {
        pub fn weights(&self) -> &LossWeights {
            &self.weights
        }

        pub fn box_loss(&self) -> BoxLossKind {
            self.box_loss
        }

        /// Computes the loss of a batch.
        ///
        /// `features` and `grads` hold one `(batch, channels, rows, cols)`
        /// array per scale and `truths` one list per sample. The gradient is
        /// added to `grads`, which is left untouched if any error occurs.
        pub fn forward(
            &self,
            features: &[ArrayView4<'_, f32>],
            truths: &[Vec<GroundTruth>],
            grads: &mut [ArrayViewMut4<'_, f32>],
        ) -> Result<YoloLossOutput> {
            ensure!(
                features.len() == grads.len(),
                "expect {} gradient buffers, but get {}",
                features.len(),
                grads.len()
            );
            for (feature, grad) in features.iter().zip(grads.iter()) {
                ensure!(
                    feature.shape() == grad.shape(),
                    "gradient buffer shape {:?} does not match feature shape {:?}",
                    grad.shape(),
                    feature.shape()
                );
            }

            let batch_size = truths.len();
            for feature in features {
                ensure!(
                    feature.len_of(Axis(0)) == batch_size,
                    "expect batch size {}, but get a feature map of shape {:?}",
                    batch_size,
                    feature.shape()
                );
            }
            if batch_size == 0 {
                return Ok(YoloLossOutput::default());
            }

            let norm = if self.normalize_by_batch {
                1.0 / batch_size as f64
            } else {
                1.0
            };

            let samples: Vec<_> = (0..batch_size)
                .into_par_iter()
                .map(|batch_index| {
                    let sample_features: Vec<_> = features
                        .iter()
                        .map(|feature| feature.index_axis(Axis(0), batch_index))
                        .collect();
                    self.forward_sample_impl(&sample_features, &truths[batch_index], norm)
                        .with_context(|| format!("failed to compute loss of sample {}", batch_index))
                })
                .collect::<Result<_>>()?;

            let mut output = YoloLossOutput::default();
            for (batch_index, (sample_output, sample_grads)) in samples.into_iter().enumerate() {
                output += sample_output;
                for (grad, sample_grad) in grads.iter_mut().zip(sample_grads) {
                    let mut grad = grad.index_axis_mut(Axis(0), batch_index);
                    grad += &sample_grad;
                }
            }

            Ok(output)
        }

        /// Computes the loss of one sample, given one `(channels, rows, cols)`
        /// array per scale.
        pub fn forward_sample(
            &self,
            features: &[ArrayView3<'_, f32>],
            truths: &[GroundTruth],
            grads: &mut [ArrayViewMut3<'_, f32>],
        ) -> Result<YoloLossOutput> {
            ensure!(
                features.len() == grads.len(),
                "expect {} gradient buffers, but get {}",
                features.len(),
                grads.len()
            );
            for (feature, grad) in features.iter().zip(grads.iter()) {
                ensure!(
                    feature.shape() == grad.shape(),
                    "gradient buffer shape {:?} does not match feature shape {:?}",
                    grad.shape(),
                    feature.shape()
                );
            }

            let (output, sample_grads) = self.forward_sample_impl(features, truths, 1.0)?;
            for (grad, sample_grad) in grads.iter_mut().zip(sample_grads) {
                *grad += &sample_grad;
            }
            Ok(output)
        }

        fn forward_sample_impl(
            &self,
            features: &[ArrayView3<'_, f32>],
            truths: &[GroundTruth],
            norm: f64,
        ) -> Result<(YoloLossOutput, Vec<Array3<f32>>)> {
            let views = self.decoder.views(features)?;
            self.matcher
                .check_truths(truths, self.decoder.num_classes())?;

            let matching = self
                .matcher
                .match_targets(self.decoder.box_coder(), &views, truths);

            let mut grads: Vec<_> = views
                .iter()
                .map(|(view, _)| Array3::<f32>::zeros(view.layout().shape()))
                .collect();
            let mut output = YoloLossOutput {
                num_positives: matching.num_positives(),
                num_ignored: matching.num_ignored(),
                ..Default::default()
            };

            // background objectness
            for (scale_index, ((view, _), grad)) in views.iter().zip(grads.iter_mut()).enumerate() {
                let layout = *view.layout();
                let factor = norm / layout.num_cells() as f64 * self.weights.no_objectness.raw();
                let mut grad = GridViewMut::new(grad.view_mut(), layout)?;

                for (anchor_index, row, col) in layout.cells() {
                    let instance = InstanceIndex {
                        scale_index,
                        anchor_index,
                        row,
                        col,
                    };
                    if matching.positives.contains_key(&instance) || matching.is_ignored(&instance)
                    {
                        continue;
                    }

                    let logit = view.value(anchor_index, Attribute::Objectness, row, col) as f64;
                    let bce = BceWithLogits::negative(logit).scale(factor);
                    output.no_objectness += bce.loss;
                    grad.add(anchor_index, Attribute::Objectness, row, col, bce.grad as f32);
                }
            }

            // positives
            self.forward_positives(&views, &matching, truths, norm, &mut grads, &mut output)?;

            Ok((output, grads))
        }

        fn forward_positives(
            &self,
            views: &[(GridView<'_>, &[AnchorSpec])],
            matching: &MatchOutput,
            truths: &[GroundTruth],
            norm: f64,
            grads: &mut [Array3<f32>],
            output: &mut YoloLossOutput,
        ) -> Result<()> {
            let box_coder = self.decoder.box_coder();
            let clip = self.box_gradient_clip.raw();
            let LossWeights {
                objectness: objectness_weight,
                bbox: bbox_weight,
                classification: classification_weight,
                ..
            } = self.weights;

            for (instance, assignment) in &matching.positives {
                let InstanceIndex {
                    scale_index,
                    anchor_index,
                    row,
                    col,
                } = *instance;
                let (view, anchors) = &views[scale_index];
                let layout = *view.layout();
                let stride = layout.stride();
                let anchor = &anchors[anchor_index];
                let truth = &truths[assignment.truth_index];
                let factor = norm / layout.num_cells() as f64;
                let value = |attribute| view.value(anchor_index, attribute, row, col) as f64;
                let mut grad = GridViewMut::new(grads[scale_index].view_mut(), layout)?;

                // objectness
                {
                    let bce = BceWithLogits::positive(value(Attribute::Objectness))
                        .scale(factor * objectness_weight.raw());
                    output.objectness += bce.loss;
                    grad.add(anchor_index, Attribute::Objectness, row, col, bce.grad as f32);
                }

                // box regression, centers in sigmoid space and sizes in logit space
                {
                    let factor = factor * bbox_weight.raw();
                    let rect = &truth.rect;

                    let center_terms = [
                        (Attribute::Tx, box_coder.center_target(rect.cx(), col, stride)),
                        (Attribute::Ty, box_coder.center_target(rect.cy(), row, stride)),
                    ];
                    for (attribute, target) in center_terms {
                        let prob = sigmoid(value(attribute));
                        let (loss, dloss) = self.box_loss.forward(prob - target);
                        let dlogit = (dloss * sigmoid_grad_from_output(prob)).clamp(-clip, clip);
                        output.bbox += loss * factor;
                        grad.add(anchor_index, attribute, row, col, (dlogit * factor) as f32);
                    }

                    let size_terms = [
                        (
                            Attribute::Tw,
                            box_coder
                                .size_transform
                                .encode(rect.w(), anchor.width.raw()),
                        ),
                        (
                            Attribute::Th,
                            box_coder
                                .size_transform
                                .encode(rect.h(), anchor.height.raw()),
                        ),
                    ];
                    for (attribute, target) in size_terms {
                        let (loss, dloss) = self.box_loss.forward(value(attribute) - target);
                        let dlogit = dloss.clamp(-clip, clip);
                        output.bbox += loss * factor;
                        grad.add(anchor_index, attribute, row, col, (dlogit * factor) as f32);
                    }
                }

                // independent per-class cross-entropy
                {
                    let factor = factor * classification_weight.raw();
                    for class in 0..layout.num_classes() {
                        let target = if class == truth.class { 1.0 } else { 0.0 };
                        let attribute = Attribute::Class(class);
                        let bce = BceWithLogits::forward(value(attribute), target).scale(factor);
                        output.classification += bce.loss;
                        grad.add(anchor_index, attribute, row, col, bce.grad as f32);
                    }
                }
            }

            Ok(())
        }
    }
}

mod yolo_loss_output {
    use super::*;
    use std::ops::AddAssign;

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct YoloLossOutput {
        /// Objectness loss of positive anchors.
        pub objectness: f64,
        /// Objectness loss of background anchors.
        pub no_objectness: f64,
        pub bbox: f64,
        pub classification: f64,
        pub num_positives: usize,
        pub num_ignored: usize,
    }

    impl YoloLossOutput {
        pub fn total(&self) -> f64 {
            self.objectness + self.no_objectness + self.bbox + self.classification
        }
    }

    impl AddAssign for YoloLossOutput {
        fn add_assign(&mut self, rhs: Self) {
            self.objectness += rhs.objectness;
            self.no_objectness += rhs.no_objectness;
            self.bbox += rhs.bbox;
            self.classification += rhs.classification;
            self.num_positives += rhs.num_positives;
            self.num_ignored += rhs.num_ignored;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_scale_loss(weights: LossWeights) -> Result<YoloLoss> {
        let anchors = AnchorTable::new(vec![crate::anchors::ScaleAnchors {
            stride: 8,
            anchors: vec![AnchorSpec::new(16.0, 16.0)?],
        }])?;
        YoloLossInit {
            weights: Some(weights),
            ..YoloLossInit::new(anchors, InputSize::square(32), 2)
        }
        .build()
    }

    #[test]
    fn empty_truths_give_pure_background_loss() -> Result<()> {
        let loss_fn = single_scale_loss(LossWeights::default())?;
        let feature = Array3::<f32>::zeros([7, 4, 4]);
        let mut grad = Array3::<f32>::zeros([7, 4, 4]);

        let output = loss_fn.forward_sample(&[feature.view()], &[], &mut [grad.view_mut()])?;

        assert_abs_diff_eq!(output.no_objectness, 2f64.ln(), epsilon = 1e-9);
        assert_eq!(output.objectness, 0.0);
        assert_eq!(output.bbox, 0.0);
        assert_eq!(output.classification, 0.0);
        assert_eq!(output.num_positives, 0);

        // only the objectness channel receives gradient
        let objectness_grad = grad.index_axis(Axis(0), 4);
        assert!(objectness_grad
            .iter()
            .all(|&value| abs_diff_eq!(value, 0.5 / 16.0, epsilon = 1e-7)));
        assert_abs_diff_eq!(grad.sum(), 0.5, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn zero_weights_silence_terms() -> Result<()> {
        let loss_fn = single_scale_loss(LossWeights {
            no_objectness: r64(0.0),
            ..Default::default()
        })?;
        let feature = Array3::<f32>::zeros([7, 4, 4]);
        let mut grad = Array3::<f32>::zeros([7, 4, 4]);
        let output = loss_fn.forward_sample(&[feature.view()], &[], &mut [grad.view_mut()])?;
        assert_eq!(output.total(), 0.0);
        assert_eq!(grad.sum(), 0.0);
        Ok(())
    }

    #[test]
    fn positive_cell_receives_all_terms() -> Result<()> {
        let loss_fn = single_scale_loss(LossWeights::default())?;
        let feature = Array3::<f32>::zeros([7, 4, 4]);
        let mut grad = Array3::<f32>::zeros([7, 4, 4]);
        let truth = GroundTruth::new(CxCyWH::from_cxcywh([12.0, 20.0, 16.0, 16.0]), 1);

        let output =
            loss_fn.forward_sample(&[feature.view()], &[truth], &mut [grad.view_mut()])?;

        assert_eq!(output.num_positives, 1);
        assert!(output.objectness > 0.0);
        assert!(output.classification > 0.0);

        // zero logits decode exactly to the truth box
        assert_abs_diff_eq!(output.bbox, 0.0, epsilon = 1e-12);

        // positive objectness pulls the logit up, background pushes it down
        assert!(grad[[4, 2, 1]] < 0.0);
        assert!(grad[[4, 0, 0]] > 0.0);
        // true class is pulled up, the other class pushed down
        assert!(grad[[6, 2, 1]] < 0.0);
        assert!(grad[[5, 2, 1]] > 0.0);
        Ok(())
    }

    #[test]
    fn invalid_weights_are_rejected() -> Result<()> {
        assert!(single_scale_loss(LossWeights {
            bbox: r64(-1.0),
            ..Default::default()
        })
        .is_err());
        Ok(())
    }
}
