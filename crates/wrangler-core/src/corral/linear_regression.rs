use tch::{nn, Device, Tensor};

use super::regression::RegressionParams;
use crate::architecture::{Architecture, Forward};
use crate::config::GraphParams;
use crate::error::Result;
use crate::losses::{loss_mse, sum_losses};

/// Ordinary least squares fit by gradient descent.
#[derive(Debug)]
pub struct LinearRegressionModel {
    params: RegressionParams,
}

impl Architecture for LinearRegressionModel {
    type Input = Tensor;
    type Target = Tensor;
    type Prediction = Tensor;

    const KIND: &'static str = "linear_regression";

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
        Ok(forward.preacts.iter().map(Tensor::shallow_clone).collect())
    }

    fn loss(&self, forward: &Forward, targets: &[Tensor]) -> Result<Tensor> {
        sum_losses(&forward.preacts, &self.params.targets(targets)?, loss_mse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Shape;
    use crate::error::WranglerError;

    fn model(vs: &nn::VarStore) -> LinearRegressionModel {
        let params = GraphParams {
            in_sizes: vec![Shape::from(2)],
            out_sizes: vec![1],
            ..Default::default()
        };
        LinearRegressionModel::setup_layers(&vs.root(), &params, Device::Cpu).unwrap()
    }

    #[test]
    fn output_is_the_affine_map() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = model(&vs);
        let xs = Tensor::from_slice(&[1f32, 2., 3., 4.]).view([2, 2]);
        let forward = model.forward_t(&[xs], false).unwrap();
        let out = model.outputs(&forward).unwrap();
        assert_eq!(Vec::<f32>::try_from(&out[0].view([-1])).unwrap(), vec![3., 7.]);

        let ys = Tensor::from_slice(&[3f32, 7.]).view([2, 1]);
        assert_eq!(model.loss(&forward, &[ys]).unwrap().double_value(&[]), 0.0);
    }

    #[test]
    fn flat_targets_do_not_broadcast() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = model(&vs);
        let xs = Tensor::from_slice(&[1f32, 2., 3., 4., 5., 6.]).view([3, 2]);
        let forward = model.forward_t(&[xs], false).unwrap();

        let ys = Tensor::from_slice(&[3f32, 7., 11.]);
        assert!(matches!(
            model.loss(&forward, &[ys]),
            Err(WranglerError::ShapeMismatch { what: "target", index: 0, .. })
        ));
    }

    #[test]
    fn wrong_feature_width_is_an_error() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = model(&vs);
        let xs = Tensor::ones([3, 5], (tch::Kind::Float, Device::Cpu));
        match model.forward_t(&[xs], false) {
            Err(WranglerError::ShapeMismatch { expected, actual, .. }) => {
                assert_eq!(expected, vec![2]);
                assert_eq!(actual, vec![5]);
            }
            other => panic!("expected a shape mismatch, got {:?}", other.map(|_| ())),
        }
    }
}
