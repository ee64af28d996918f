use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tch::Tensor;

use wrangler_core::model::TRAINING_LOSS;
use wrangler_core::{Architecture, Model, ModelParams};

use crate::dataset::DatasetManager;

pub const HOLDOUT_LOSS: &str = "holdout_loss";

type Data<A> = DatasetManager<<A as Architecture>::Input, <A as Architecture>::Target>;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub steps: i64,
    pub final_training_loss: f64,
    pub final_holdout_loss: Option<f64>,
}

/// Drives one model: owns it, holds its training and holdout data, and runs
/// the epoch loop with periodic reporting and per-epoch checkpoints.
pub struct ModelWrangler<A: Architecture> {
    model: Model<A>,
    training_data: Option<Data<A>>,
    holdout_data: Option<Data<A>>,
    rng: StdRng,
}

impl<A: Architecture> ModelWrangler<A> {
    pub fn new(params: ModelParams) -> Result<Self> {
        let rng = match params.training.seed {
            Some(seed) => StdRng::seed_from_u64(seed as u64),
            None => StdRng::from_entropy(),
        };
        let name = params.name.clone();
        let mut model = Model::<A>::new(params)
            .with_context(|| format!("Failed to build model `{}`", name))?;
        model.register_scalar(HOLDOUT_LOSS);

        Ok(Self {
            model,
            training_data: None,
            holdout_data: None,
            rng,
        })
    }

    pub fn add_data(&mut self, training: Data<A>, holdout: Data<A>) {
        log::info!(
            "Added {} training and {} holdout samples",
            training.num_samples(),
            holdout.num_samples()
        );
        self.training_data = Some(training);
        self.holdout_data = Some(holdout);
    }

    pub fn train(&mut self) -> Result<TrainReport> {
        let training = self
            .training_data
            .as_ref()
            .context("No training data, call add_data first")?;
        let params = self.model.params().training.clone();

        log::info!("Starting training with configuration: {:?}", params);

        let mut last_loss = f64::NAN;
        let mut last_holdout = None;
        for epoch in 0..params.num_epochs {
            let mut epoch_loss = 0.0;
            let mut num_batches = 0usize;

            for (inputs, targets) in training.batches(params.batch_size, &mut self.rng) {
                let step = self.model.global_step();
                if step % params.interval as i64 == 0 {
                    let train_loss = self.model.score(&inputs, &targets)?;
                    self.model.record_scalar(TRAINING_LOSS, train_loss)?;

                    last_holdout = match &self.holdout_data {
                        Some(holdout) => {
                            let loss = self.model.score(holdout.inputs(), holdout.targets())?;
                            self.model.record_scalar(HOLDOUT_LOSS, loss)?;
                            Some(loss)
                        }
                        None => None,
                    };
                    log::info!(
                        "Epoch {} | Step {} | Training loss: {:.4} | Holdout loss: {:?}",
                        epoch,
                        step,
                        train_loss,
                        last_holdout
                    );
                }

                last_loss = self.model.train_step(&inputs, &targets)?;
                epoch_loss += last_loss;
                num_batches += 1;
            }

            log::info!(
                "Epoch {} average loss: {:.4}",
                epoch,
                epoch_loss / num_batches.max(1) as f64
            );
            self.model
                .save(epoch as i64)
                .with_context(|| format!("Failed to save checkpoint for epoch {}", epoch))?;
        }

        if let Some(holdout) = &self.holdout_data {
            last_holdout = Some(self.model.score(holdout.inputs(), holdout.targets())?);
        }
        self.model.flush_summaries()?;

        Ok(TrainReport {
            steps: self.model.global_step(),
            final_training_loss: last_loss,
            final_holdout_loss: last_holdout,
        })
    }

    pub fn train_step(&mut self, inputs: &[A::Input], targets: &[A::Target]) -> Result<f64> {
        Ok(self.model.train_step(inputs, targets)?)
    }

    pub fn score(&self, inputs: &[A::Input], targets: &[A::Target]) -> Result<f64> {
        Ok(self.model.score(inputs, targets)?)
    }

    pub fn predict(&self, inputs: &[A::Input]) -> Result<Vec<A::Prediction>> {
        Ok(self.model.predict(inputs)?)
    }

    pub fn embed(&self, inputs: &[A::Input]) -> Result<Option<Tensor>> {
        Ok(self.model.embed(inputs)?)
    }

    /// Current value of a trained variable, e.g. `params/coeff_0`.
    pub fn get_from_model(&self, name: &str) -> Result<Tensor> {
        let var = self.model.variable(name)?;
        Ok(var.detach().copy())
    }

    pub fn save(&self, step: i64) -> Result<PathBuf> {
        Ok(self.model.save(step)?)
    }

    pub fn restore<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.model
            .restore(path)
            .with_context(|| format!("Failed to restore checkpoint {:?}", path))
    }

    pub fn restore_latest(&mut self) -> Result<PathBuf> {
        Ok(self.model.restore_latest()?)
    }

    pub fn model(&self) -> &Model<A> {
        &self.model
    }
}
