use crate::Tensor;
use gradflow_core::{be::ops::reduction, error::Result, layout::Layout};

impl Tensor {
    /// Sums broadcast dimensions away so the result has `shape`.
    /// Returns `self` unchanged when the shapes already agree.
    pub fn sum_to_shape(&self, shape: &[usize]) -> Result<Tensor> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        if self.is_sparse() {
            return self.to_dense()?.sum_to_shape(shape);
        }
        let strided = self.strided()?;
        let out = reduction::sum_to_shape(&*strided.storage.read()?, &strided.layout, shape)?;
        Ok(Tensor::from_buffer(out, Layout::from_shape(shape), self.device()))
    }

    /// Sum of all elements as a 0-d tensor.
    pub fn sum(&self) -> Result<Tensor> {
        self.sum_to_shape(&[])
    }
}
