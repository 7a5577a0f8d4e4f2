use crate::Tensor;
use gradflow_core::{
    be::ops::copy::copy_strided,
    buffer::{Buffer, WithDType},
    error::{Error, Result},
    layout::Layout,
};

impl Tensor {
    /// Logical elements in row-major order, cast to `T`.
    pub fn to_flatten_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        if self.is_sparse() {
            return self.to_dense()?.to_flatten_vec();
        }

        let strided = self.strided()?;
        let src = strided.storage.read()?;
        let mut out = Buffer::zeros(strided.layout.size(), T::DTYPE);
        copy_strided(&mut out, &Layout::from_shape(strided.layout.shape()), &src, &strided.layout)?;

        Ok(out.as_slice::<T>()?.to_vec())
    }

    /// Value of a single-element tensor.
    pub fn item(&self) -> Result<f64> {
        if self.size() != 1 {
            return Err(Error::InvalidArgument(format!(
                "item() requires exactly one element, tensor has shape {:?}",
                self.shape()
            )));
        }
        Ok(self.to_flatten_vec::<f64>()?[0])
    }
}
