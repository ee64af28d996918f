use tch::Tensor;

/// Data for one input or target source that can be sliced into batches
/// along its sample axis.
pub trait Batch: Sized {
    fn batch_len(&self) -> usize;

    /// Gathers the samples at `indices`, in order.
    fn take_samples(&self, indices: &[i64]) -> Self;
}

impl Batch for Tensor {
    fn batch_len(&self) -> usize {
        self.size().first().copied().unwrap_or(0) as usize
    }

    fn take_samples(&self, indices: &[i64]) -> Self {
        let idx = Tensor::from_slice(indices).to_device(self.device());
        self.index_select(0, &idx)
    }
}

impl Batch for Vec<String> {
    fn batch_len(&self) -> usize {
        self.len()
    }

    fn take_samples(&self, indices: &[i64]) -> Self {
        indices.iter().map(|&i| self[i as usize].clone()).collect()
    }
}
