use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tch::{nn, Device, Tensor};

use crate::architecture::{check_count, Architecture};
use crate::config::ModelParams;
use crate::error::{Result, WranglerError};
use crate::saver::Saver;
use crate::summary::SummaryWriter;

pub const TRAINING_LOSS: &str = "training_loss";

/// A built architecture together with its variables, optimizer, checkpoint
/// saver and scalar summaries.
///
/// The layer structure is fixed at construction; only variable values change
/// afterwards, through training steps or checkpoint restores.
pub struct Model<A: Architecture> {
    params: ModelParams,
    vs: nn::VarStore,
    arch: A,
    optimizer: nn::Optimizer,
    summary: SummaryWriter,
    saver: Saver,
    global_step: i64,
}

impl<A: Architecture> Model<A> {
    pub fn new(params: ModelParams) -> Result<Self> {
        params.validate()?;
        if let Some(seed) = params.training.seed {
            tch::manual_seed(seed);
        }

        let saver = Saver::new(&params.path, &params.name, params.training.max_to_keep)?;
        log::debug!("Checkpoint base name: {:?}", saver.meta_filename());

        let vs = nn::VarStore::new(params.device.device());
        let arch = A::setup_layers(&vs.root(), &params.graph, vs.device())?;
        let optimizer = arch.setup_training_step(&vs, &params.training)?;
        let summary = Self::setup_tensorboard_tracking(&params)?;

        log::info!(
            "Built {} model `{}` on {:?} with {} variables",
            A::KIND,
            params.name,
            vs.device(),
            vs.variables().len()
        );

        Ok(Self {
            params,
            vs,
            arch,
            optimizer,
            summary,
            saver,
            global_step: 0,
        })
    }

    fn setup_tensorboard_tracking(params: &ModelParams) -> Result<SummaryWriter> {
        let mut summary = SummaryWriter::new(&params.path, &params.name)?;
        summary.register_scalar(TRAINING_LOSS);
        Ok(summary)
    }

    fn check_inputs(&self, inputs: &[A::Input]) -> Result<()> {
        check_count("inputs", self.params.graph.in_sizes.len(), inputs.len())
    }

    fn check_targets(&self, targets: &[A::Target]) -> Result<()> {
        check_count("targets", self.params.graph.out_sizes.len(), targets.len())
    }

    /// Runs one optimizer step and returns the loss before the update.
    pub fn train_step(&mut self, inputs: &[A::Input], targets: &[A::Target]) -> Result<f64> {
        self.check_inputs(inputs)?;
        self.check_targets(targets)?;

        let forward = self.arch.forward_t(inputs, true)?;
        let loss = self.arch.loss(&forward, targets)?;
        self.optimizer.backward_step(&loss);
        self.global_step += 1;

        Ok(loss.double_value(&[]))
    }

    /// Loss on the given data, without gradient tracking.
    pub fn score(&self, inputs: &[A::Input], targets: &[A::Target]) -> Result<f64> {
        self.check_inputs(inputs)?;
        self.check_targets(targets)?;

        let _guard = tch::no_grad_guard();
        let forward = self.arch.forward_t(inputs, false)?;
        let loss = self.arch.loss(&forward, targets)?;
        Ok(loss.double_value(&[]))
    }

    pub fn predict(&self, inputs: &[A::Input]) -> Result<Vec<A::Prediction>> {
        self.check_inputs(inputs)?;

        let _guard = tch::no_grad_guard();
        let forward = self.arch.forward_t(inputs, false)?;
        self.arch.outputs(&forward)
    }

    pub fn embed(&self, inputs: &[A::Input]) -> Result<Option<Tensor>> {
        self.check_inputs(inputs)?;

        let _guard = tch::no_grad_guard();
        let forward = self.arch.forward_t(inputs, false)?;
        Ok(forward.embeds)
    }

    /// Looks up a variable by scoped name, e.g. `params/coeff_0`.
    pub fn variable(&self, name: &str) -> Result<Tensor> {
        let key = name.replace('/', ".");
        self.vs
            .variables()
            .remove(&key)
            .ok_or_else(|| WranglerError::VariableNotFound(name.to_string()))
    }

    pub fn variables(&self) -> HashMap<String, Tensor> {
        self.vs.variables()
    }

    pub fn trainable_variables(&self) -> Vec<Tensor> {
        self.vs.trainable_variables()
    }

    pub fn register_scalar(&mut self, tag: &str) {
        self.summary.register_scalar(tag);
    }

    pub fn record_scalar(&mut self, tag: &str, value: f64) -> Result<()> {
        self.summary.add_scalar(tag, self.global_step, value)
    }

    pub fn flush_summaries(&mut self) -> Result<()> {
        self.summary.flush()
    }

    pub fn save(&self, step: i64) -> Result<PathBuf> {
        self.saver.save(&self.vs, step, &self.params)
    }

    pub fn restore<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.saver.restore(&mut self.vs, path)
    }

    pub fn restore_latest(&mut self) -> Result<PathBuf> {
        self.saver.restore_latest(&mut self.vs)
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn architecture(&self) -> &A {
        &self.arch
    }

    pub fn saver(&self) -> &Saver {
        &self.saver
    }

    pub fn summary_path(&self) -> &Path {
        self.summary.path()
    }

    pub fn global_step(&self) -> i64 {
        self.global_step
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }
}
