//! Compression of the distilled regressor into an int8 binary.
//!
//! Layout (little-endian):
//!   magic "IMPQ" | version u16 | layer count u16
//!   per layer: inputs u32 | outputs u32 | activation u8 | weight scale f32
//!              | weights i8[outputs * inputs] (row-major) | biases f32[outputs]
//!
//! Weights are quantised symmetrically per layer; biases stay f32.

use super::distill::{Activation, MlpRegressor};
use crate::error::{PipelineError, PipelineResult};

pub const MAGIC: &[u8; 4] = b"IMPQ";
pub const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedLayer {
    pub inputs: usize,
    pub outputs: usize,
    pub activation: Activation,
    pub scale: f32,
    pub weights: Vec<i8>,
    pub biases: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedModel {
    pub layers: Vec<QuantizedLayer>,
}

impl QuantizedModel {
    pub fn from_mlp(model: &MlpRegressor) -> Self {
        let layers = model
            .layers
            .iter()
            .map(|layer| {
                let max_abs = layer.weights.iter().fold(0.0f64, |m, w| m.max(w.abs()));
                let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
                QuantizedLayer {
                    inputs: layer.inputs(),
                    outputs: layer.outputs(),
                    activation: layer.activation,
                    scale: scale as f32,
                    weights: layer
                        .weights
                        .iter()
                        .map(|w| (w / scale).round().clamp(-127.0, 127.0) as i8)
                        .collect(),
                    biases: layer.biases.iter().map(|b| *b as f32).collect(),
                }
            })
            .collect();
        Self { layers }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs)
    }

    /// Evaluate on an already-normalised feature vector.
    pub fn predict(&self, features: &[f32]) -> PipelineResult<f32> {
        if features.len() != self.input_dim() {
            return Err(PipelineError::ModelFormat(format!(
                "model expects {} inputs, got {}",
                self.input_dim(),
                features.len()
            )));
        }
        let mut activations = features.to_vec();
        for layer in &self.layers {
            let mut next = Vec::with_capacity(layer.outputs);
            for o in 0..layer.outputs {
                let row = &layer.weights[o * layer.inputs..(o + 1) * layer.inputs];
                let acc: f32 = row
                    .iter()
                    .zip(&activations)
                    .map(|(w, a)| f32::from(*w) * a)
                    .sum();
                let z = acc * layer.scale + layer.biases[o];
                next.push(match layer.activation {
                    Activation::Relu => z.max(0.0),
                    Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
                });
            }
            activations = next;
        }
        activations
            .first()
            .copied()
            .ok_or_else(|| PipelineError::ModelFormat("model has no output unit".into()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.layers.len() as u16).to_le_bytes());
        for layer in &self.layers {
            out.extend_from_slice(&(layer.inputs as u32).to_le_bytes());
            out.extend_from_slice(&(layer.outputs as u32).to_le_bytes());
            out.push(match layer.activation {
                Activation::Relu => 0,
                Activation::Sigmoid => 1,
            });
            out.extend_from_slice(&layer.scale.to_le_bytes());
            out.extend(layer.weights.iter().map(|w| *w as u8));
            for b in &layer.biases {
                out.extend_from_slice(&b.to_le_bytes());
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> PipelineResult<Self> {
        let mut r = ByteReader { bytes, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err(PipelineError::ModelFormat("bad magic".into()));
        }
        let version = r.u16()?;
        if version != FORMAT_VERSION {
            return Err(PipelineError::ModelFormat(format!("unsupported version {version}")));
        }
        let n_layers = r.u16()? as usize;
        let mut layers = Vec::with_capacity(n_layers);
        for _ in 0..n_layers {
            let inputs = r.u32()? as usize;
            let outputs = r.u32()? as usize;
            let activation = match r.take(1)?[0] {
                0 => Activation::Relu,
                1 => Activation::Sigmoid,
                other => {
                    return Err(PipelineError::ModelFormat(format!("unknown activation tag {other}")))
                }
            };
            let scale = r.f32()?;
            let weights = r.take(inputs * outputs)?.iter().map(|b| *b as i8).collect();
            let biases = (0..outputs).map(|_| r.f32()).collect::<PipelineResult<Vec<_>>>()?;
            layers.push(QuantizedLayer {
                inputs,
                outputs,
                activation,
                scale,
                weights,
                biases,
            });
        }
        if r.pos != bytes.len() {
            return Err(PipelineError::ModelFormat(format!(
                "{} trailing bytes",
                bytes.len() - r.pos
            )));
        }
        Ok(Self { layers })
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> PipelineResult<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| PipelineError::ModelFormat(format!("truncated at byte {}", self.pos)))?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> PipelineResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> PipelineResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> PipelineResult<f32> {
        Ok(f32::from_bits(self.u32()?))
    }
}
