//! The persisted detector options.

use crate::{
    anchors::AnchorTable,
    common::*,
    decode::{BoxCoder, DecoderInit, SizeTransform},
    grid::InputSize,
    loss::{
        AnchorMatcherInit, BoxLossKind, LossWeights, UnmatchedTruthPolicy, YoloInference,
        YoloInferenceInit, YoloLoss, YoloLossInit,
    },
};

/// Options shared by inference and training, read-only during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// The network input size in pixels.
    pub input_size: InputSize,
    /// Prior box sizes per stride.
    pub anchors: AnchorTable,
    /// Class names. The position of a name is its class id.
    pub vocabulary: Vocabulary,
    pub confidence_threshold: R64,
    pub nms_iou_threshold: R64,
    /// Predictions overlapping any truth box by this IoU are excluded from
    /// the background loss.
    pub ignore_iou_threshold: R64,
    /// The minimum shape IoU for a truth box to claim its best anchor.
    pub truth_match_iou_threshold: R64,
    pub loss_weights: LossWeights,
    pub size_transform: SizeTransform,
    /// Stretch factor of the predicted center offset within a cell.
    pub center_scale: R64,
    pub box_loss: BoxLossKind,
    pub box_gradient_clip: R64,
    pub unmatched_truth: UnmatchedTruthPolicy,
    pub class_aware_nms: bool,
    pub normalize_by_batch: bool,
}

/// The on-disk layout of [Options], tagged by version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "version")]
enum OptionsRecord {
    #[serde(rename = "1")]
    V1(Options),
}

impl Options {
    pub fn from_json5_str(text: &str) -> Result<Self> {
        let record: OptionsRecord = json5::from_str(text)?;
        let options = match record {
            OptionsRecord::V1(options) => options,
        };
        options.check()?;
        Ok(options)
    }

    pub fn load<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read options file '{}'", path.display()))?;
        Self::from_json5_str(&text)
            .with_context(|| format!("invalid options file '{}'", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        let text = serde_json::to_string_pretty(&OptionsRecord::V1(self.clone()))?;
        Ok(text)
    }

    pub fn save<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        fs::write(path, self.to_json_string()?)
            .with_context(|| format!("failed to write options file '{}'", path.display()))?;
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.vocabulary.len()
    }

    /// Validates all values by building the inference and loss pipelines.
    pub fn check(&self) -> Result<()> {
        ensure!(
            !self.vocabulary.is_empty(),
            "the vocabulary must not be empty"
        );
        self.yolo_inference()?;
        self.yolo_loss()?;
        Ok(())
    }

    pub fn box_coder(&self) -> Result<BoxCoder> {
        BoxCoder::new(self.size_transform, self.center_scale)
    }

    pub fn decoder_init(&self) -> Result<DecoderInit> {
        Ok(DecoderInit {
            anchors: self.anchors.clone(),
            input_size: self.input_size,
            num_classes: self.num_classes(),
            confidence_threshold: Some(self.confidence_threshold),
            box_coder: Some(self.box_coder()?),
            vocabulary: Some(self.vocabulary.clone()),
        })
    }

    pub fn yolo_inference(&self) -> Result<YoloInference> {
        YoloInferenceInit {
            decoder: self.decoder_init()?,
            nms_iou_threshold: Some(self.nms_iou_threshold),
            class_aware_nms: Some(self.class_aware_nms),
        }
        .build()
    }

    pub fn yolo_loss(&self) -> Result<YoloLoss> {
        YoloLossInit {
            box_coder: Some(self.box_coder()?),
            weights: Some(self.loss_weights),
            box_loss: Some(self.box_loss),
            box_gradient_clip: Some(self.box_gradient_clip),
            normalize_by_batch: Some(self.normalize_by_batch),
            matcher: AnchorMatcherInit {
                truth_match_iou_threshold: Some(self.truth_match_iou_threshold),
                ignore_iou_threshold: Some(self.ignore_iou_threshold),
                unmatched_truth: Some(self.unmatched_truth),
            },
            ..YoloLossInit::new(self.anchors.clone(), self.input_size, self.num_classes())
        }
        .build()
    }
}

/// Builds [Options], filling unset fields with YOLOv3 defaults.
#[derive(Debug, Clone)]
pub struct OptionsInit {
    pub vocabulary: Vocabulary,
    pub input_size: Option<InputSize>,
    pub anchors: Option<AnchorTable>,
    pub confidence_threshold: Option<R64>,
    pub nms_iou_threshold: Option<R64>,
    pub ignore_iou_threshold: Option<R64>,
    pub truth_match_iou_threshold: Option<R64>,
    pub loss_weights: Option<LossWeights>,
    pub size_transform: Option<SizeTransform>,
    pub center_scale: Option<R64>,
    pub box_loss: Option<BoxLossKind>,
    pub box_gradient_clip: Option<R64>,
    pub unmatched_truth: Option<UnmatchedTruthPolicy>,
    pub class_aware_nms: Option<bool>,
    pub normalize_by_batch: Option<bool>,
}

impl OptionsInit {
    pub const DEFAULT_INPUT_SIZE: usize = 416;
    pub const DEFAULT_NMS_IOU_THRESHOLD: f64 = 0.45;

    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            vocabulary,
            input_size: None,
            anchors: None,
            confidence_threshold: None,
            nms_iou_threshold: None,
            ignore_iou_threshold: None,
            truth_match_iou_threshold: None,
            loss_weights: None,
            size_transform: None,
            center_scale: None,
            box_loss: None,
            box_gradient_clip: None,
            unmatched_truth: None,
            class_aware_nms: None,
            normalize_by_batch: None,
        }
    }

    pub fn build(self) -> Result<Options> {
        let Self {
            vocabulary,
            input_size,
            anchors,
            confidence_threshold,
            nms_iou_threshold,
            ignore_iou_threshold,
            truth_match_iou_threshold,
            loss_weights,
            size_transform,
            center_scale,
            box_loss,
            box_gradient_clip,
            unmatched_truth,
            class_aware_nms,
            normalize_by_batch,
        } = self;

        let options = Options {
            input_size: input_size.unwrap_or_else(|| InputSize::square(Self::DEFAULT_INPUT_SIZE)),
            anchors: anchors.unwrap_or_else(AnchorTable::yolov3),
            vocabulary,
            confidence_threshold: confidence_threshold
                .unwrap_or_else(|| r64(DecoderInit::DEFAULT_CONFIDENCE_THRESHOLD)),
            nms_iou_threshold: nms_iou_threshold
                .unwrap_or_else(|| r64(Self::DEFAULT_NMS_IOU_THRESHOLD)),
            ignore_iou_threshold: ignore_iou_threshold
                .unwrap_or_else(|| r64(AnchorMatcherInit::DEFAULT_IGNORE_IOU_THRESHOLD)),
            truth_match_iou_threshold: truth_match_iou_threshold
                .unwrap_or_else(|| r64(AnchorMatcherInit::DEFAULT_TRUTH_MATCH_IOU_THRESHOLD)),
            loss_weights: loss_weights.unwrap_or_default(),
            size_transform: size_transform.unwrap_or_default(),
            center_scale: center_scale.unwrap_or_else(|| r64(1.0)),
            box_loss: box_loss.unwrap_or_default(),
            box_gradient_clip: box_gradient_clip
                .unwrap_or_else(|| r64(YoloLossInit::DEFAULT_BOX_GRADIENT_CLIP)),
            unmatched_truth: unmatched_truth.unwrap_or_default(),
            class_aware_nms: class_aware_nms.unwrap_or(false),
            normalize_by_batch: normalize_by_batch.unwrap_or(true),
        };
        options.check()?;

        Ok(options)
    }
}
