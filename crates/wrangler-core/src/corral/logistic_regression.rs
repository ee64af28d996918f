use tch::{nn, Device, Tensor};

use super::regression::RegressionParams;
use crate::architecture::{Architecture, Forward};
use crate::config::GraphParams;
use crate::error::Result;
use crate::losses::{loss_sigmoid_ce, sum_losses};

/// Logistic regression: `sigmoid(x_i @ coeff_i + intercept_i)` per source,
/// trained with sigmoid cross-entropy.
#[derive(Debug)]
pub struct LogisticRegressionModel {
    params: RegressionParams,
}

impl Architecture for LogisticRegressionModel {
    type Input = Tensor;
    type Target = Tensor;
    type Prediction = Tensor;

    const KIND: &'static str = "logistic_regression";

    fn setup_layers(vs: &nn::Path, params: &GraphParams, device: Device) -> Result<Self> {
        Ok(Self {
            params: RegressionParams::new(vs, params, device)?,
        })
    }

    fn forward_t(&self, inputs: &[Tensor], _train: bool) -> Result<Forward> {
        Ok(Forward {
            preacts: self.params.preacts(inputs)?,
            embeds: None,
        })
    }

    fn outputs(&self, forward: &Forward) -> Result<Vec<Tensor>> {
        Ok(forward.preacts.iter().map(Tensor::sigmoid).collect())
    }

    fn loss(&self, forward: &Forward, targets: &[Tensor]) -> Result<Tensor> {
        sum_losses(&forward.preacts, &self.params.targets(targets)?, loss_sigmoid_ce)
    }
}
