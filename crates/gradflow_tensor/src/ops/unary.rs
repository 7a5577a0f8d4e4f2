use crate::Tensor;
use gradflow_core::{be::ops::unary, buffer::Buffer, error::Result, layout::Layout};

impl Tensor {
    fn map_values(&self, kernel: impl Fn(&Buffer, &Layout) -> Result<Buffer>) -> Result<Tensor> {
        if self.is_sparse() {
            let values = self.values()?.map_values(kernel)?;
            return Tensor::sparse_coo(self.indices()?, values, self.shape());
        }
        let strided = self.strided()?;
        let out = kernel(&*strided.storage.read()?, &strided.layout)?;
        Ok(Tensor::from_buffer(out, Layout::from_shape(self.shape()), self.device()))
    }

    pub fn neg(&self) -> Result<Tensor> {
        self.map_values(unary::neg)
    }

    pub fn mul_scalar(&self, scalar: f64) -> Result<Tensor> {
        self.map_values(|buf, layout| unary::mul_scalar(buf, layout, scalar))
    }
}
