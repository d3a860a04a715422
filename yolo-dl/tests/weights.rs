use anyhow::Result;
use std::io::Write as _;
use tempfile::NamedTempFile;
use yolo_dl::weights::{BatchNormWeights, DarknetLayers, LayerWeightsMut, WeightsReader};

/// A batch-normalized convolution followed by a biased output convolution.
#[derive(Debug, Clone, PartialEq)]
struct TinyNet {
    bn: BatchNormWeights,
    conv_weights: Vec<f32>,
    head_bias: Vec<f32>,
    head_weights: Vec<f32>,
}

impl TinyNet {
    const NUM_PARAMS: usize = 2 * 4 + 6 + 3 + 12;

    fn new() -> Self {
        Self {
            bn: BatchNormWeights::zeros(2),
            conv_weights: vec![0.0; 6],
            head_bias: vec![0.0; 3],
            head_weights: vec![0.0; 12],
        }
    }
}

impl DarknetLayers for TinyNet {
    fn layer_weights_mut(&mut self) -> Vec<LayerWeightsMut<'_>> {
        vec![
            LayerWeightsMut::BatchNormConv {
                bn: &mut self.bn,
                conv_weights: &mut self.conv_weights,
            },
            LayerWeightsMut::Conv {
                bias: &mut self.head_bias,
                weights: &mut self.head_weights,
            },
        ]
    }
}

fn write_weights(num_floats: usize, extra_bytes: usize) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    for value in [0i32, 2, 0] {
        file.write_all(&value.to_le_bytes())?;
    }
    file.write_all(&12345u64.to_le_bytes())?;
    for index in 0..num_floats {
        file.write_all(&(index as f32).to_le_bytes())?;
    }
    file.write_all(&vec![0u8; extra_bytes])?;
    file.flush()?;
    Ok(file)
}

#[test]
fn load_fills_layers_in_file_order() -> Result<()> {
    let file = write_weights(TinyNet::NUM_PARAMS, 0)?;
    let mut net = TinyNet::new();

    let header = WeightsReader::open(file.path())?.load_into(&mut net)?;
    assert_eq!(header.seen, 12345);
    assert!(header.version.has_wide_seen());

    assert_eq!(net.bn.biases, [0.0, 1.0]);
    assert_eq!(net.bn.scales, [2.0, 3.0]);
    assert_eq!(net.bn.rolling_mean, [4.0, 5.0]);
    assert_eq!(net.bn.rolling_variance, [6.0, 7.0]);
    assert_eq!(net.conv_weights, [8.0, 9.0, 10.0, 11.0, 12.0, 13.0]);
    assert_eq!(net.head_bias, [14.0, 15.0, 16.0]);
    assert_eq!(net.head_weights[0], 17.0);
    assert_eq!(net.head_weights[11], 28.0);
    Ok(())
}

#[test]
fn truncated_file_leaves_model_untouched() -> Result<()> {
    let file = write_weights(TinyNet::NUM_PARAMS - 1, 0)?;
    let mut net = TinyNet::new();

    let err = WeightsReader::open(file.path())?
        .load_into(&mut net)
        .unwrap_err();
    assert!(format!("{:#}", err).contains("truncated"));
    assert_eq!(net, TinyNet::new());
    Ok(())
}

#[test]
fn trailing_values_are_rejected() -> Result<()> {
    let file = write_weights(TinyNet::NUM_PARAMS + 1, 0)?;
    let mut net = TinyNet::new();

    let err = WeightsReader::open(file.path())?
        .load_into(&mut net)
        .unwrap_err();
    assert!(format!("{:#}", err).contains("not totally consumed"));
    assert_eq!(net, TinyNet::new());
    Ok(())
}

#[test]
fn partial_float_is_rejected() -> Result<()> {
    let file = write_weights(TinyNet::NUM_PARAMS, 2)?;
    let mut net = TinyNet::new();

    assert!(WeightsReader::open(file.path())?
        .load_into(&mut net)
        .is_err());
    assert_eq!(net, TinyNet::new());
    assert!(WeightsReader::open(file.path())?.num_floats().is_err());
    Ok(())
}

#[test]
fn missing_header_is_rejected() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(&[0u8; 10])?;
    file.flush()?;
    assert!(WeightsReader::open(file.path()).is_err());
    Ok(())
}
