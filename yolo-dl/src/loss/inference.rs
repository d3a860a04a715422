use super::nms::{NonMaxSuppression, NonMaxSuppressionInit};
use crate::{
    common::*,
    decode::{Decoder, DecoderInit, Detection},
};

#[derive(Debug, Clone)]
pub struct YoloInferenceInit {
    pub decoder: DecoderInit,
    pub nms_iou_threshold: Option<R64>,
    pub class_aware_nms: Option<bool>,
}

impl YoloInferenceInit {
    pub fn build(self) -> Result<YoloInference> {
        let Self {
            decoder,
            nms_iou_threshold,
            class_aware_nms,
        } = self;

        let decoder = decoder.build()?;

        let nms = {
            let mut init = NonMaxSuppressionInit {
                confidence_threshold: decoder.confidence_threshold(),
                ..Default::default()
            };
            if let Some(iou_threshold) = nms_iou_threshold {
                init.iou_threshold = iou_threshold;
            }
            if let Some(class_aware) = class_aware_nms {
                init.class_aware = class_aware;
            }
            init.build()?
        };

        Ok(YoloInference { decoder, nms })
    }
}

/// Decodes feature maps and suppresses duplicated detections.
#[derive(Debug, Clone)]
pub struct YoloInference {
    decoder: Decoder,
    nms: NonMaxSuppression,
}

impl YoloInference {
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn nms(&self) -> &NonMaxSuppression {
        &self.nms
    }

    /// Runs inference on one sample.
    ///
    /// The `transform` maps boxes from the network input frame to the frame
    /// of the source image, usually the inverse of the letterbox transform.
    pub fn forward(
        &self,
        features: &[ArrayView3<'_, f32>],
        transform: Option<&Transform<f64>>,
    ) -> Result<Vec<Detection>> {
        let candidates = self.decoder.decode(features)?;
        let num_candidates = candidates.len();
        let mut detections = self.nms.forward(candidates);
        debug!(
            "keep {} out of {} candidate detections",
            detections.len(),
            num_candidates
        );

        if let Some(transform) = transform {
            detections
                .iter_mut()
                .for_each(|det| det.rect = transform * &det.rect);
        }

        Ok(detections)
    }

    /// Runs inference on a batch, one `(batch, channels, rows, cols)` array per
    /// scale. Samples are processed in parallel.
    pub fn forward_batch(
        &self,
        features: &[ArrayView4<'_, f32>],
        transforms: Option<&[Transform<f64>]>,
    ) -> Result<Vec<Vec<Detection>>> {
        let batch_size = match features.first() {
            Some(feature) => feature.len_of(Axis(0)),
            None => bail!("no feature maps are given"),
        };
        for feature in features {
            ensure!(
                feature.len_of(Axis(0)) == batch_size,
                "feature maps have inconsistent batch sizes"
            );
        }
        if let Some(transforms) = transforms {
            ensure!(
                transforms.len() == batch_size,
                "expect {} transforms, but get {}",
                batch_size,
                transforms.len()
            );
        }

        (0..batch_size)
            .into_par_iter()
            .map(|batch_index| {
                let sample_features: Vec<_> = features
                    .iter()
                    .map(|feature| feature.index_axis(Axis(0), batch_index))
                    .collect();
                let transform = transforms.map(|transforms| &transforms[batch_index]);
                self.forward(&sample_features, transform)
                    .with_context(|| format!("inference failed on sample {}", batch_index))
            })
            .collect()
    }
}
