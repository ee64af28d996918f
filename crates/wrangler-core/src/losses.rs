use tch::{Kind, Reduction, Tensor};

use crate::error::{Result, WranglerError};

/// Sigmoid cross-entropy between logits and 0/1 targets, averaged.
pub fn loss_sigmoid_ce(preact: &Tensor, target: &Tensor) -> Tensor {
    preact.binary_cross_entropy_with_logits::<Tensor>(target, None, None, Reduction::Mean)
}

/// Softmax cross-entropy between logits and one-hot targets over the last
/// dim, averaged over the remaining dims.
pub fn loss_softmax_ce(preact: &Tensor, onehot: &Tensor) -> Tensor {
    let log_probs = preact.log_softmax(-1, Kind::Float);
    (onehot * log_probs)
        .sum_dim_intlist(Some(&[-1][..]), false, Kind::Float)
        .mean(Kind::Float)
        .neg()
}

pub fn loss_mse(preact: &Tensor, target: &Tensor) -> Tensor {
    preact.mse_loss(target, Reduction::Mean)
}

/// Sums the loss of every (output, target) pair into one scalar.
pub fn sum_losses<F>(preacts: &[Tensor], targets: &[Tensor], loss_fn: F) -> Result<Tensor>
where
    F: Fn(&Tensor, &Tensor) -> Tensor,
{
    if preacts.len() != targets.len() {
        return Err(WranglerError::CountMismatch {
            what: "targets",
            expected: preacts.len(),
            actual: targets.len(),
        });
    }
    if preacts.is_empty() {
        return Err(WranglerError::CountMismatch {
            what: "outputs",
            expected: 1,
            actual: 0,
        });
    }

    let losses: Vec<Tensor> = preacts
        .iter()
        .zip(targets)
        .map(|(preact, target)| loss_fn(preact, target))
        .collect();
    Ok(Tensor::stack(&losses, 0).sum(Kind::Float))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(t: &Tensor, expected: f64) -> bool {
        (t.double_value(&[]) - expected).abs() < 1e-5
    }

    #[test]
    fn sigmoid_ce_at_zero_logit_is_ln2() {
        let preact = Tensor::zeros([4, 1], (Kind::Float, tch::Device::Cpu));
        let target = Tensor::ones([4, 1], (Kind::Float, tch::Device::Cpu));
        assert!(close(&loss_sigmoid_ce(&preact, &target), std::f64::consts::LN_2));
    }

    #[test]
    fn softmax_ce_of_uniform_logits_is_ln_classes() {
        let preact = Tensor::zeros([3, 5], (Kind::Float, tch::Device::Cpu));
        let onehot = Tensor::from_slice(&[0i64, 2, 4]).one_hot(5).to_kind(Kind::Float);
        assert!(close(&loss_softmax_ce(&preact, &onehot), 5f64.ln()));
    }

    #[test]
    fn mse_matches_hand_computation() {
        let preact = Tensor::from_slice(&[1f32, 2., 3.]);
        let target = Tensor::from_slice(&[1f32, 0., 0.]);
        assert!(close(&loss_mse(&preact, &target), 13.0 / 3.0));
    }

    #[test]
    fn sum_losses_adds_each_head() {
        let a = Tensor::from_slice(&[2f32]);
        let b = Tensor::from_slice(&[0f32]);
        let total = sum_losses(&[a.shallow_clone(), a], &[b.shallow_clone(), b], loss_mse).unwrap();
        assert!(close(&total, 8.0));
    }

    #[test]
    fn sum_losses_rejects_mismatched_pairs() {
        let a = Tensor::from_slice(&[2f32]);
        assert!(matches!(
            sum_losses(&[a], &[], loss_mse),
            Err(WranglerError::CountMismatch { what: "targets", .. })
        ));
        assert!(sum_losses(&[], &[], loss_mse).is_err());
    }
}
