use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use tch::Tensor;

use wrangler_core::Architecture;

use crate::wrangler::ModelWrangler;

const OVERFIT_STEPS: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct TestReport {
    pub results: Vec<CheckResult>,
}

impl TestReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.results {
            let status = if r.passed { "ok" } else { "FAILED" };
            writeln!(f, "{:<32} {:<6} {}", r.name, status, r.detail)?;
        }
        Ok(())
    }
}

/// Sanity checks run against a live wrangler and a small data sample.
///
/// The checks train and restore the wrapped model, so its variables are
/// not preserved across a run.
pub struct ModelTester<'a, A: Architecture> {
    wrangler: &'a mut ModelWrangler<A>,
}

impl<'a, A: Architecture> ModelTester<'a, A> {
    pub fn new(wrangler: &'a mut ModelWrangler<A>) -> Self {
        Self { wrangler }
    }

    pub fn run(&mut self, inputs: &[A::Input], targets: &[A::Target]) -> Result<TestReport> {
        let mut report = TestReport::default();
        report.results.push(self.check_score_is_finite(inputs, targets)?);
        report.results.push(self.check_prediction_heads(inputs)?);
        report.results.push(self.check_training_updates_variables(inputs, targets)?);
        report.results.push(self.check_loss_decreases(inputs, targets)?);
        report.results.push(self.check_save_restore()?);

        for r in &report.results {
            if r.passed {
                log::info!("check {} passed: {}", r.name, r.detail);
            } else {
                log::warn!("check {} failed: {}", r.name, r.detail);
            }
        }
        Ok(report)
    }

    fn check_score_is_finite(&self, inputs: &[A::Input], targets: &[A::Target]) -> Result<CheckResult> {
        let score = self.wrangler.score(inputs, targets)?;
        Ok(CheckResult {
            name: "score_is_finite",
            passed: score.is_finite(),
            detail: format!("score = {:.6}", score),
        })
    }

    fn check_prediction_heads(&self, inputs: &[A::Input]) -> Result<CheckResult> {
        let expected = self.wrangler.model().params().graph.out_sizes.len();
        let actual = self.wrangler.predict(inputs)?.len();
        Ok(CheckResult {
            name: "one_prediction_per_output",
            passed: expected == actual,
            detail: format!("{} outputs, {} predictions", expected, actual),
        })
    }

    fn check_training_updates_variables(
        &mut self,
        inputs: &[A::Input],
        targets: &[A::Target],
    ) -> Result<CheckResult> {
        let before = snapshot(self.wrangler.model().variables());
        self.wrangler.train_step(inputs, targets)?;
        let after = snapshot(self.wrangler.model().variables());

        let changed = before
            .iter()
            .filter(|(name, value)| after.get(*name).map_or(false, |v| !v.equal(*value)))
            .count();
        Ok(CheckResult {
            name: "training_updates_variables",
            passed: changed > 0,
            detail: format!("{} of {} variables changed", changed, before.len()),
        })
    }

    fn check_loss_decreases(&mut self, inputs: &[A::Input], targets: &[A::Target]) -> Result<CheckResult> {
        let start = self.wrangler.score(inputs, targets)?;
        for _ in 0..OVERFIT_STEPS {
            self.wrangler.train_step(inputs, targets)?;
        }
        let end = self.wrangler.score(inputs, targets)?;
        Ok(CheckResult {
            name: "loss_decreases_on_fixed_batch",
            passed: end < start,
            detail: format!("{:.6} -> {:.6} after {} steps", start, end, OVERFIT_STEPS),
        })
    }

    fn check_save_restore(&mut self) -> Result<CheckResult> {
        let step = self.wrangler.model().global_step();
        let path = self.wrangler.save(step)?;
        let saved = snapshot(self.wrangler.model().variables());

        tch::no_grad(|| {
            for mut var in self.wrangler.model().trainable_variables() {
                let shifted = &var + 1.0;
                var.copy_(&shifted);
            }
        });
        self.wrangler.restore(&path)?;
        let restored = snapshot(self.wrangler.model().variables());

        let mismatched: Vec<&String> = saved
            .iter()
            .filter(|(name, value)| restored.get(*name).map_or(true, |v| !v.equal(*value)))
            .map(|(name, _)| name)
            .collect();
        Ok(CheckResult {
            name: "save_restore_roundtrip",
            passed: mismatched.is_empty(),
            detail: if mismatched.is_empty() {
                format!("{} variables restored from {:?}", saved.len(), path)
            } else {
                format!("mismatched after restore: {:?}", mismatched)
            },
        })
    }
}

fn snapshot(vars: HashMap<String, Tensor>) -> HashMap<String, Tensor> {
    vars.into_iter()
        .map(|(name, var)| (name, var.detach().copy()))
        .collect()
}
