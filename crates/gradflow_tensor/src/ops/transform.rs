use crate::{MemoryFormat, Tensor};
use gradflow_core::{
    be::ops::copy::copy_strided,
    device::Device,
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};

impl Tensor {
    /// View sharing storage with `self` under a new layout.
    fn view_with(&self, layout: Layout) -> Result<Tensor> {
        Ok(Tensor::from_storage(
            self.storage()?.clone(),
            layout,
            self.device(),
            self.dtype(),
        ))
    }

    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Tensor> {
        let mut layout = self.layout()?.clone();
        layout.transpose(dim0, dim1)?;
        self.view_with(layout)
    }

    pub fn permute(&self, dims: &[usize]) -> Result<Tensor> {
        let mut layout = self.layout()?.clone();
        layout.permute(dims)?;
        self.view_with(layout)
    }

    /// Broadcast view; expanded dimensions get stride 0.
    pub fn expand(&self, shape: &[usize]) -> Result<Tensor> {
        let layout = self.layout()?.broadcast_to(shape)?;
        self.view_with(layout)
    }

    pub fn contiguous(&self) -> Result<Tensor> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        self.clone_with(MemoryFormat::Contiguous)
    }

    /// Deep copy into fresh storage.
    pub fn clone_with(&self, memory_format: MemoryFormat) -> Result<Tensor> {
        if self.is_sparse() {
            return Tensor::sparse_coo(
                self.indices()?.clone_with(MemoryFormat::Contiguous)?,
                self.values()?.clone_with(MemoryFormat::Contiguous)?,
                self.shape(),
            );
        }
        let out = Tensor::empty_like(self, memory_format)?;
        out.copy_(self)?;
        Ok(out)
    }

    /// Copies `src` into `self`, broadcasting and casting as needed.
    pub fn copy_(&self, src: &Tensor) -> Result<()> {
        if self.is_sparse() {
            return Err(Error::InvalidArgument("copy_ into a sparse tensor".into()));
        }
        let src = src.to_dense()?;
        if src.shares_storage(self) {
            return self.copy_(&src.clone_with(MemoryFormat::Contiguous)?);
        }
        let dst = self.strided()?;
        let src_layout = src.layout()?.broadcast_to(self.shape())?;
        let mut dst_buf = dst.storage.write()?;
        let src_buf = src.storage()?.read()?;
        copy_strided(&mut dst_buf, &dst.layout, &src_buf, &src_layout)
    }

    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        if self.is_sparse() {
            return Tensor::sparse_coo(self.indices()?, self.values()?.to_dtype(dtype)?, self.shape());
        }
        let strides = self.layout()?.dense_strides_like();
        let out = Tensor::empty_strided(self.shape(), &strides, self.device(), dtype)?;
        out.copy_(self)?;
        Ok(out)
    }

    /// Copy tagged with `device`. Returns `self` when already there.
    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        if self.device() == device {
            return Ok(self.clone());
        }
        if self.is_sparse() {
            return Tensor::sparse_coo(
                self.indices()?.to_device(device)?,
                self.values()?.to_device(device)?,
                self.shape(),
            );
        }
        let strides = self.layout()?.dense_strides_like();
        let out = Tensor::empty_strided(self.shape(), &strides, device, self.dtype())?;
        let src = self.strided()?;
        let mut dst_buf = out.storage()?.write()?;
        copy_strided(&mut dst_buf, out.layout()?, &*src.storage.read()?, &src.layout)?;
        drop(dst_buf);
        Ok(out)
    }
}
