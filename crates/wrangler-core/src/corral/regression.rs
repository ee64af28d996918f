use tch::{nn, Device, Tensor};

use super::to_float;
use crate::architecture::{check_count, check_sample_shape, require_sources};
use crate::config::GraphParams;
use crate::error::{Result, WranglerError};

/// Coefficients and intercepts shared by the linear model families: input
/// source `i` feeds output `i` through `x_i @ coeff_i + intercept_i`.
#[derive(Debug)]
pub(crate) struct RegressionParams {
    coeffs: Vec<Tensor>,
    intercepts: Vec<Tensor>,
    device: Device,
}

impl RegressionParams {
    pub(crate) fn new(vs: &nn::Path, params: &GraphParams, device: Device) -> Result<Self> {
        require_sources(params)?;
        check_count("outputs", params.in_sizes.len(), params.out_sizes.len())?;

        let vs = vs / "params";
        let mut coeffs = Vec::with_capacity(params.in_sizes.len());
        let mut intercepts = Vec::with_capacity(params.in_sizes.len());
        for (idx, (in_size, &out_size)) in params.in_sizes.iter().zip(&params.out_sizes).enumerate() {
            let in_dim = match in_size.dims() {
                [n] => *n,
                dims => {
                    return Err(WranglerError::InvalidParam {
                        key: "graph.in_sizes",
                        reason: format!("source {} must be a single feature count, got {:?}", idx, dims),
                    })
                }
            };
            coeffs.push(vs.var(&format!("coeff_{}", idx), &[in_dim, out_size], nn::Init::Const(1.0)));
            intercepts.push(vs.var(&format!("intercept_{}", idx), &[out_size], nn::Init::Const(0.0)));
        }

        Ok(Self {
            coeffs,
            intercepts,
            device,
        })
    }

    pub(crate) fn preacts(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        inputs
            .iter()
            .zip(self.coeffs.iter().zip(&self.intercepts))
            .enumerate()
            .map(|(idx, (xs, (coeff, intercept)))| {
                check_sample_shape("input", idx, xs, &coeff.size()[..1])?;
                Ok(to_float(xs, self.device).matmul(coeff) + intercept)
            })
            .collect()
    }

    /// Targets must be `[batch, out_size]`, never a bare `[batch]` vector.
    pub(crate) fn targets(&self, targets: &[Tensor]) -> Result<Vec<Tensor>> {
        targets
            .iter()
            .zip(&self.intercepts)
            .enumerate()
            .map(|(idx, (ys, intercept))| {
                check_sample_shape("target", idx, ys, &intercept.size())?;
                Ok(to_float(ys, self.device))
            })
            .collect()
    }
}
