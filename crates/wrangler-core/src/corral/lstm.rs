use tch::nn::{self, Module, OptimizerConfig};
use tch::{Device, Tensor};

use super::to_float;
use crate::architecture::{check_sample_shape, require_sources, Architecture, Forward};
use crate::config::{DenseParams, GraphParams, TrainingParams};
use crate::error::Result;
use crate::layers::{append_dense, concat_stacks, sequence_dims, Dense, SourceStack};
use crate::losses::{loss_mse, sum_losses};

/// Sequence regressor. Each `[steps, features]` input source runs through
/// its own dense and LSTM stack; the flattened stacks are concatenated and
/// fed to one linear head per output.
#[derive(Debug)]
pub struct LstmModel {
    in_dims: Vec<[i64; 2]>,
    out_sizes: Vec<i64>,
    stacks: Vec<SourceStack>,
    heads: Vec<Dense>,
    device: Device,
}

impl Architecture for LstmModel {
    type Input = Tensor;
    type Target = Tensor;
    type Prediction = Tensor;

    const KIND: &'static str = "lstm";

    fn setup_layers(vs: &nn::Path, params: &GraphParams, device: Device) -> Result<Self> {
        require_sources(params)?;

        let mut in_dims = Vec::with_capacity(params.in_sizes.len());
        let mut stacks = Vec::with_capacity(params.in_sizes.len());
        for (idx, in_size) in params.in_sizes.iter().enumerate() {
            let (steps, features) = sequence_dims(in_size.dims(), idx)?;
            in_dims.push([steps, features]);
            stacks.push(SourceStack::new(
                &(vs / format!("source_{}", idx)),
                steps,
                features,
                &params.dense_params,
                &params.recurr_params,
            ));
        }

        let embed_dim: i64 = stacks.iter().map(SourceStack::out_dim).sum();
        let heads = params
            .out_sizes
            .iter()
            .enumerate()
            .map(|(idx, &out_size)| {
                append_dense(
                    &(vs / format!("preact_{}", idx)),
                    embed_dim,
                    &DenseParams::units(out_size),
                )
            })
            .collect();

        Ok(Self {
            in_dims,
            out_sizes: params.out_sizes.clone(),
            stacks,
            heads,
            device,
        })
    }

    fn forward_t(&self, inputs: &[Tensor], train: bool) -> Result<Forward> {
        for (idx, (xs, dims)) in inputs.iter().zip(&self.in_dims).enumerate() {
            check_sample_shape("input", idx, xs, dims)?;
        }
        let inputs: Vec<Tensor> = inputs.iter().map(|xs| to_float(xs, self.device)).collect();
        let embeds = concat_stacks(&self.stacks, &inputs, train);
        let preacts = self
            .heads
            .iter()
            .map(|head| head.forward(&embeds).unsqueeze(1))
            .collect();

        Ok(Forward {
            preacts,
            embeds: Some(embeds),
        })
    }

    fn outputs(&self, forward: &Forward) -> Result<Vec<Tensor>> {
        Ok(forward.preacts.iter().map(Tensor::shallow_clone).collect())
    }

    fn loss(&self, forward: &Forward, targets: &[Tensor]) -> Result<Tensor> {
        for (idx, (ys, &out_size)) in targets.iter().zip(&self.out_sizes).enumerate() {
            check_sample_shape("target", idx, ys, &[out_size])?;
        }
        let targets: Vec<Tensor> = targets
            .iter()
            .map(|ys| to_float(ys, self.device).unsqueeze(1))
            .collect();
        sum_losses(&forward.preacts, &targets, loss_mse)
    }

    fn setup_training_step(
        &self,
        vs: &nn::VarStore,
        params: &TrainingParams,
    ) -> Result<nn::Optimizer> {
        Ok(nn::RmsProp::default().build(vs, params.learning_rate)?)
    }
}
