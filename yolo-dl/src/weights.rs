//! Import of darknet binary weight files.
//!
//! The file starts with a header of three little-endian `i32` version
//! numbers and the number of images seen during training, followed by the
//! parameters of every layer as a flat stream of little-endian `f32`.

use crate::common::*;
use binread::{BinRead, BinReaderExt as _};
use byteorder::{LittleEndian, ReadBytesExt as _};
use std::{fs::File, io::Cursor};

pub use header::*;
pub use layer::*;
pub use reader::*;

mod header {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BinRead)]
    pub struct Version {
        pub major: i32,
        pub minor: i32,
        pub revision: i32,
    }

    impl Version {
        /// Files since version 0.2 store the seen counter in 64 bits.
        pub fn has_wide_seen(&self) -> bool {
            self.major * 10 + self.minor >= 2
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WeightsHeader {
        pub version: Version,
        pub seen: u64,
    }

    impl WeightsHeader {
        pub(super) fn read<R>(reader: &mut R) -> Result<Self>
        where
            R: Read + Seek,
        {
            let header = move || -> Result<_, binread::Error> {
                let version: Version = reader.read_le()?;
                let seen: u64 = if version.has_wide_seen() {
                    reader.read_le()?
                } else {
                    let seen: u32 = reader.read_le()?;
                    seen as u64
                };
                Ok(Self { version, seen })
            }()
            .map_err(|err| format_err!("failed to parse weights header: {:?}", err))?;
            Ok(header)
        }
    }
}

mod layer {
    use super::*;

    /// Batch normalization parameters in file order.
    #[derive(Debug, Clone, PartialEq)]
    pub struct BatchNormWeights {
        pub biases: Vec<f32>,
        pub scales: Vec<f32>,
        pub rolling_mean: Vec<f32>,
        pub rolling_variance: Vec<f32>,
    }

    impl BatchNormWeights {
        pub fn zeros(num_channels: usize) -> Self {
            Self {
                biases: vec![0.0; num_channels],
                scales: vec![0.0; num_channels],
                rolling_mean: vec![0.0; num_channels],
                rolling_variance: vec![0.0; num_channels],
            }
        }

        pub fn num_channels(&self) -> usize {
            self.biases.len()
        }

        /// Folds the normalization into a per-channel `(scale, shift)` so that
        /// `bn(x) = scale * x + shift`.
        pub fn fold(&self, eps: f32) -> Vec<(f32, f32)> {
            izip!(
                &self.biases,
                &self.scales,
                &self.rolling_mean,
                &self.rolling_variance
            )
            .map(|(&bias, &scale, &mean, &variance)| {
                let scale = scale / (variance + eps).sqrt();
                (scale, bias - mean * scale)
            })
            .collect()
        }

        fn check(&self) -> Result<()> {
            let num_channels = self.num_channels();
            ensure!(
                self.scales.len() == num_channels
                    && self.rolling_mean.len() == num_channels
                    && self.rolling_variance.len() == num_channels,
                "batch norm parameters have inconsistent channel counts"
            );
            Ok(())
        }
    }

    /// Mutable access to the parameters of one layer.
    #[derive(Debug)]
    pub enum LayerWeightsMut<'a> {
        /// A convolution without bias followed by batch normalization.
        BatchNormConv {
            bn: &'a mut BatchNormWeights,
            conv_weights: &'a mut [f32],
        },
        /// A convolution with bias.
        Conv {
            bias: &'a mut [f32],
            weights: &'a mut [f32],
        },
    }

    impl LayerWeightsMut<'_> {
        pub fn num_params(&self) -> usize {
            match self {
                Self::BatchNormConv { bn, conv_weights } => bn.num_channels() * 4 + conv_weights.len(),
                Self::Conv { bias, weights } => bias.len() + weights.len(),
            }
        }

        pub(super) fn check(&self) -> Result<()> {
            if let Self::BatchNormConv { bn, .. } = self {
                bn.check()?;
            }
            Ok(())
        }

        /// Fills the parameters in file order.
        pub(super) fn fill<R>(self, reader: &mut R) -> io::Result<()>
        where
            R: Read,
        {
            match self {
                Self::BatchNormConv { bn, conv_weights } => {
                    reader.read_f32_into::<LittleEndian>(&mut bn.biases)?;
                    reader.read_f32_into::<LittleEndian>(&mut bn.scales)?;
                    reader.read_f32_into::<LittleEndian>(&mut bn.rolling_mean)?;
                    reader.read_f32_into::<LittleEndian>(&mut bn.rolling_variance)?;
                    reader.read_f32_into::<LittleEndian>(conv_weights)?;
                }
                Self::Conv { bias, weights } => {
                    reader.read_f32_into::<LittleEndian>(bias)?;
                    reader.read_f32_into::<LittleEndian>(weights)?;
                }
            }
            Ok(())
        }
    }

    /// A network exposing its parameters in the traversal order of the
    /// weights file.
    pub trait DarknetLayers {
        fn layer_weights_mut(&mut self) -> Vec<LayerWeightsMut<'_>>;
    }
}

mod reader {
    use super::*;

    /// Reads a darknet weights file into a network.
    #[derive(Debug)]
    pub struct WeightsReader<R> {
        reader: R,
        header: WeightsHeader,
    }

    impl WeightsReader<BufReader<File>> {
        pub fn open<P>(path: P) -> Result<Self>
        where
            P: AsRef<Path>,
        {
            let path = path.as_ref();
            let file = File::open(path)
                .with_context(|| format!("failed to open weights file '{}'", path.display()))?;
            Self::new(BufReader::new(file))
        }
    }

    impl<R> WeightsReader<R>
    where
        R: Read + Seek,
    {
        pub fn new(mut reader: R) -> Result<Self> {
            let header = WeightsHeader::read(&mut reader)?;
            debug!(
                "weights version {}.{}.{}, seen {}",
                header.version.major, header.version.minor, header.version.revision, header.seen
            );
            Ok(Self { reader, header })
        }

        pub fn header(&self) -> &WeightsHeader {
            &self.header
        }

        /// Counts the `f32` values after the header.
        pub fn num_floats(self) -> Result<usize> {
            let payload = self.into_payload()?;
            Ok(payload.len() / 4)
        }

        /// Loads all parameters into the network.
        ///
        /// The payload size must match the parameter count of the network
        /// exactly. The network is left untouched on error.
        pub fn load_into<M>(self, model: &mut M) -> Result<WeightsHeader>
        where
            M: DarknetLayers + ?Sized,
        {
            let header = self.header;
            let payload = self.into_payload()?;
            let layers = model.layer_weights_mut();

            for (index, layer) in layers.iter().enumerate() {
                layer
                    .check()
                    .with_context(|| format!("invalid parameters of layer {}", index))?;
            }

            let num_expected: usize = layers.iter().map(|layer| layer.num_params()).sum();
            let num_found = payload.len() / 4;
            ensure!(
                num_found >= num_expected,
                "the weights file is truncated, expect {} values but found {}",
                num_expected,
                num_found
            );
            ensure!(
                num_found == num_expected,
                "the weights file is not totally consumed, {} values remain",
                num_found - num_expected
            );

            let mut cursor = Cursor::new(payload);
            for layer in layers {
                layer.fill(&mut cursor)?;
            }
            info!(
                "loaded {} parameters, seen {} images",
                num_expected, header.seen
            );

            Ok(header)
        }

        fn into_payload(mut self) -> Result<Vec<u8>> {
            let mut payload = vec![];
            self.reader.read_to_end(&mut payload)?;
            ensure!(
                payload.len() % 4 == 0,
                "the weights payload of {} bytes is not a whole number of f32 values",
                payload.len()
            );
            Ok(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_header_has_narrow_seen() -> Result<()> {
        let mut bytes = vec![];
        for value in [0i32, 1, 0] {
            bytes.extend(value.to_le_bytes());
        }
        bytes.extend(7u32.to_le_bytes());
        bytes.extend(1.5f32.to_le_bytes());

        let reader = WeightsReader::new(Cursor::new(bytes))?;
        assert_eq!(reader.header().seen, 7);
        assert!(!reader.header().version.has_wide_seen());
        assert_eq!(reader.num_floats()?, 1);
        Ok(())
    }

    #[test]
    fn fold_batch_norm() {
        let bn = BatchNormWeights {
            biases: vec![1.0],
            scales: vec![2.0],
            rolling_mean: vec![3.0],
            rolling_variance: vec![4.0],
        };
        let folded = bn.fold(0.0);
        assert_eq!(folded, [(1.0, -2.0)]);
    }
}
