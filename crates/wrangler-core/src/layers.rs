use tch::nn::{self, Module, ModuleT, RNN};
use tch::{Kind, Tensor};

use crate::config::{Activation, DenseParams, RecurrentParams};
use crate::error::{Result, WranglerError};

pub fn activate(xs: &Tensor, activation: Option<Activation>) -> Tensor {
    match activation {
        None | Some(Activation::Linear) => xs.shallow_clone(),
        Some(Activation::Relu) => xs.relu(),
        Some(Activation::Sigmoid) => xs.sigmoid(),
        Some(Activation::Tanh) => xs.tanh(),
        Some(Activation::Softmax) => xs.softmax(-1, Kind::Float),
        Some(Activation::Elu) => xs.elu(),
    }
}

/// Fully connected layer over the last dim. Applied to a `[batch, steps,
/// features]` tensor it acts independently on every step.
#[derive(Debug)]
pub struct Dense {
    linear: nn::Linear,
    activation: Option<Activation>,
    out_dim: i64,
}

impl Dense {
    pub fn out_dim(&self) -> i64 {
        self.out_dim
    }
}

impl Module for Dense {
    fn forward(&self, xs: &Tensor) -> Tensor {
        activate(&xs.apply(&self.linear), self.activation)
    }
}

pub fn append_dense(vs: &nn::Path, in_dim: i64, params: &DenseParams) -> Dense {
    let config = nn::LinearConfig {
        bias: params.bias,
        ..Default::default()
    };
    Dense {
        linear: nn::linear(vs, in_dim, params.num_units, config),
        activation: params.activation,
        out_dim: params.num_units,
    }
}

#[derive(Debug)]
struct LstmLayer {
    lstm: nn::LSTM,
    dropout: f64,
}

/// Per-source layer stack: time-distributed dense layers followed by LSTM
/// layers, flattened to `[batch, out_dim]`.
///
/// Every LSTM layer but the last feeds its full output sequence forward;
/// the last one keeps only its final step.
#[derive(Debug)]
pub struct SourceStack {
    dense: Vec<Dense>,
    lstms: Vec<LstmLayer>,
    out_dim: i64,
}

impl SourceStack {
    /// `steps` and `features` describe one sample: `[steps, features]`.
    pub fn new(
        vs: &nn::Path,
        steps: i64,
        features: i64,
        dense_params: &[DenseParams],
        recurr_params: &[RecurrentParams],
    ) -> Self {
        let mut width = features;
        let mut dense = Vec::with_capacity(dense_params.len());
        for (idx, params) in dense_params.iter().enumerate() {
            let layer = append_dense(&(vs / format!("dense_{}", idx)), width, params);
            width = layer.out_dim();
            dense.push(layer);
        }

        let mut lstms = Vec::with_capacity(recurr_params.len());
        for (idx, params) in recurr_params.iter().enumerate() {
            let lstm = nn::lstm(
                &(vs / format!("lstms_{}", idx)),
                width,
                params.units,
                Default::default(),
            );
            width = params.units;
            lstms.push(LstmLayer {
                lstm,
                dropout: params.dropout,
            });
        }

        let out_dim = if lstms.is_empty() { steps * width } else { width };
        Self {
            dense,
            lstms,
            out_dim,
        }
    }

    pub fn out_dim(&self) -> i64 {
        self.out_dim
    }
}

impl ModuleT for SourceStack {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut xs = xs.shallow_clone();
        for layer in &self.dense {
            xs = xs.apply(layer);
        }

        let last = self.lstms.len().saturating_sub(1);
        for (idx, layer) in self.lstms.iter().enumerate() {
            let input = xs.dropout(layer.dropout, train);
            let (seq, _) = layer.lstm.seq(&input);
            xs = if idx == last { seq.select(1, -1) } else { seq };
        }

        xs.flatten(1, -1)
    }
}

/// Runs every source through its own stack and concatenates the flattened
/// results along the feature axis.
pub fn concat_stacks(stacks: &[SourceStack], inputs: &[Tensor], train: bool) -> Tensor {
    let flat: Vec<Tensor> = stacks
        .iter()
        .zip(inputs)
        .map(|(stack, xs)| xs.apply_t(stack, train))
        .collect();
    Tensor::cat(&flat, -1)
}

pub fn onehot_encode(codes: &Tensor, depth: i64) -> Tensor {
    codes.one_hot(depth).to_kind(Kind::Float)
}

pub fn onehot_decode(xs: &Tensor) -> Tensor {
    xs.argmax(-1, false)
}

/// Learned code embeddings. With `max_norm` set, every looked-up row whose
/// L2 norm exceeds it is rescaled in place before the lookup.
#[derive(Debug)]
pub struct EmbeddingLookup {
    embedding: nn::Embedding,
    max_norm: Option<f64>,
}

impl EmbeddingLookup {
    pub fn new(vs: &nn::Path, num_codes: i64, dim: i64, max_norm: Option<f64>) -> Self {
        Self {
            embedding: nn::embedding(vs, num_codes, dim, Default::default()),
            max_norm,
        }
    }

    pub fn weight(&self) -> &Tensor {
        &self.embedding.ws
    }
}

impl Module for EmbeddingLookup {
    fn forward(&self, codes: &Tensor) -> Tensor {
        if let Some(max_norm) = self.max_norm {
            let mut ws = self.embedding.ws.shallow_clone();
            let flat = codes.flatten(0, -1);
            tch::no_grad(|| {
                let _ = ws.embedding_renorm_(&flat, max_norm, 2.0);
            });
        }
        codes.apply(&self.embedding)
    }
}

/// Checks that a sample shape is `[steps, features]`.
pub fn sequence_dims(dims: &[i64], source: usize) -> Result<(i64, i64)> {
    match dims {
        [steps, features] => Ok((*steps, *features)),
        _ => Err(WranglerError::InvalidParam {
            key: "graph.in_sizes",
            reason: format!(
                "source {} must be [steps, features], got {:?}",
                source, dims
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn dense_acts_on_every_step() {
        let vs = nn::VarStore::new(Device::Cpu);
        let dense = append_dense(&(vs.root() / "d"), 3, &DenseParams::units(5));
        let xs = Tensor::ones([2, 7, 3], (Kind::Float, Device::Cpu));
        assert_eq!(xs.apply(&dense).size(), vec![2, 7, 5]);
    }

    #[test]
    fn stack_without_lstm_flattens_all_steps() {
        let vs = nn::VarStore::new(Device::Cpu);
        let stack = SourceStack::new(&vs.root(), 4, 2, &[DenseParams::units(3)], &[]);
        assert_eq!(stack.out_dim(), 12);
        let xs = Tensor::ones([5, 4, 2], (Kind::Float, Device::Cpu));
        assert_eq!(xs.apply_t(&stack, false).size(), vec![5, 12]);
    }

    #[test]
    fn stack_keeps_only_last_lstm_step() {
        let vs = nn::VarStore::new(Device::Cpu);
        let recurr = [
            RecurrentParams { units: 6, dropout: 0.0 },
            RecurrentParams { units: 4, dropout: 0.0 },
        ];
        let stack = SourceStack::new(&vs.root(), 9, 2, &[], &recurr);
        assert_eq!(stack.out_dim(), 4);
        let xs = Tensor::randn([3, 9, 2], (Kind::Float, Device::Cpu));
        assert_eq!(xs.apply_t(&stack, true).size(), vec![3, 4]);
    }

    #[test]
    fn lstm_dropout_only_applies_in_training() {
        let vs = nn::VarStore::new(Device::Cpu);
        let recurr = [RecurrentParams { units: 4, dropout: 0.5 }];
        let stack = SourceStack::new(&vs.root(), 9, 2, &[], &recurr);
        let xs = Tensor::randn([3, 9, 2], (Kind::Float, Device::Cpu));

        let eval_a = xs.apply_t(&stack, false);
        let eval_b = xs.apply_t(&stack, false);
        assert!(eval_a.equal(&eval_b));

        let train_a = xs.apply_t(&stack, true);
        let train_b = xs.apply_t(&stack, true);
        assert!(!train_a.equal(&train_b));
    }

    #[test]
    fn onehot_roundtrip_recovers_codes() {
        let codes = Tensor::from_slice(&[3i64, 0, 2]);
        let onehot = onehot_encode(&codes, 4);
        assert_eq!(onehot.size(), vec![3, 4]);
        assert_eq!(Vec::<i64>::try_from(&onehot_decode(&onehot)).unwrap(), vec![3, 0, 2]);
    }

    #[test]
    fn embedding_rows_are_clipped_to_max_norm() {
        let vs = nn::VarStore::new(Device::Cpu);
        let lookup = EmbeddingLookup::new(&vs.root(), 10, 4, Some(0.5));
        tch::no_grad(|| {
            let _ = lookup.weight().shallow_clone().fill_(3.0);
        });
        let codes = Tensor::from_slice(&[1i64, 2]).view([1, 2]);
        let embedded = codes.apply(&lookup);
        let norms = embedded.norm_scalaropt_dim(2, [-1], false);
        let norms = Vec::<f32>::try_from(&norms.view([-1])).unwrap();
        assert!(norms.iter().all(|&n| n <= 0.5 + 1e-4));
    }

    #[test]
    fn sequence_dims_requires_two_dims() {
        assert_eq!(sequence_dims(&[10, 3], 0).unwrap(), (10, 3));
        assert!(sequence_dims(&[10], 1).is_err());
    }
}
