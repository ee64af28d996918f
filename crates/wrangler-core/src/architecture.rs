use tch::nn::{self, OptimizerConfig};
use tch::{Device, Tensor};

use crate::batch::Batch;
use crate::config::{GraphParams, TrainingParams};
use crate::error::{Result, WranglerError};

/// Result of one forward pass.
#[derive(Debug)]
pub struct Forward {
    /// One pre-activation tensor per output head.
    pub preacts: Vec<Tensor>,
    /// Concatenated per-source representation, when the architecture has one.
    pub embeds: Option<Tensor>,
}

/// Contract every model family implements.
///
/// `setup_layers` creates all variables once, under the var-store path it
/// is handed. Everything after that is a pure function of the inputs and
/// the current variable values.
pub trait Architecture: Sized {
    /// One batch of a single input source.
    type Input: Batch;
    /// One batch of a single target source.
    type Target: Batch;
    /// Activated output of a single head for one batch.
    type Prediction;

    /// Short name used in logs.
    const KIND: &'static str;

    fn setup_layers(vs: &nn::Path, params: &GraphParams, device: Device) -> Result<Self>;

    fn forward_t(&self, inputs: &[Self::Input], train: bool) -> Result<Forward>;

    fn outputs(&self, forward: &Forward) -> Result<Vec<Self::Prediction>>;

    /// Summed loss over every (output, target) pair.
    fn loss(&self, forward: &Forward, targets: &[Self::Target]) -> Result<Tensor>;

    fn setup_training_step(
        &self,
        vs: &nn::VarStore,
        params: &TrainingParams,
    ) -> Result<nn::Optimizer> {
        Ok(nn::Sgd::default().build(vs, params.learning_rate)?)
    }
}

pub(crate) fn check_count(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(WranglerError::CountMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Checks that `xs` is a batch of samples shaped `expected`, i.e. that
/// every dim after the first matches.
pub(crate) fn check_sample_shape(
    what: &'static str,
    index: usize,
    xs: &Tensor,
    expected: &[i64],
) -> Result<()> {
    let size = xs.size();
    let actual = size.get(1..).unwrap_or_default();
    if size.is_empty() || actual != expected {
        return Err(WranglerError::ShapeMismatch {
            what,
            index,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Every architecture needs at least one input and one output source.
pub(crate) fn require_sources(params: &GraphParams) -> Result<()> {
    if params.in_sizes.is_empty() {
        return Err(WranglerError::InvalidParam {
            key: "graph.in_sizes",
            reason: "at least one input source is required".to_string(),
        });
    }
    if params.out_sizes.is_empty() {
        return Err(WranglerError::InvalidParam {
            key: "graph.out_sizes",
            reason: "at least one output is required".to_string(),
        });
    }
    Ok(())
}
