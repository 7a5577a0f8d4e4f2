use crate::{MemoryFormat, Tensor};
use gradflow_core::{
    be::ops::copy::copy_strided,
    buffer::{Buffer, WithDType},
    device::{get_default_device, Device},
    dtype::{get_default_dtype, DType},
    error::{Error, Result},
    layout::Layout,
};

impl Tensor {
    /// One-dimensional tensor on the default device with the default dtype.
    pub fn new<T: WithDType>(data: Vec<T>) -> Result<Self> {
        let len = data.len();
        Self::from_flatten_vec(data, &[len])
    }

    pub fn from_flatten_vec<T: WithDType>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        Self::from_flatten_vec_with_spec(data, shape, get_default_device(), get_default_dtype())
    }

    pub fn from_flatten_vec_with_spec<T: WithDType>(
        data: Vec<T>,
        shape: &[usize],
        device: Device,
        dtype: DType,
    ) -> Result<Self> {
        let layout = Layout::from_shape(shape);
        if layout.size() != data.len() {
            return Err(Error::InvalidShape {
                message: format!("{} elements cannot fill shape {:?}", data.len(), shape),
            });
        }

        let src = Buffer::from_vec(data);
        let buffer = if src.dtype() == dtype {
            src
        } else {
            let mut converted = Buffer::zeros(layout.size(), dtype);
            copy_strided(&mut converted, &layout, &src, &layout)?;
            converted
        };

        Ok(Self::from_buffer(buffer, layout, device))
    }

    pub fn scalar(value: f64) -> Result<Self> {
        Self::full_with_spec(&[], value, get_default_device(), get_default_dtype())
    }

    /// Uninitialised (zero filled) tensor with explicit strides.
    pub fn empty_strided(shape: &[usize], strides: &[usize], device: Device, dtype: DType) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(Error::InvalidArgument(format!(
                "shape {:?} and strides {:?} differ in rank",
                shape, strides
            )));
        }
        let layout = Layout::new(shape, strides, 0);
        Ok(Self::from_buffer(Buffer::zeros(layout.storage_span(), dtype), layout, device))
    }

    pub fn empty_like(src: &Tensor, memory_format: MemoryFormat) -> Result<Self> {
        let strides = match (memory_format, src.layout()) {
            (MemoryFormat::Preserve, Ok(layout)) => layout.dense_strides_like(),
            _ => Layout::compute_strides(src.shape()),
        };
        Self::empty_strided(src.shape(), &strides, src.device(), src.dtype())
    }

    pub fn full_with_spec(shape: &[usize], value: f64, device: Device, dtype: DType) -> Result<Self> {
        let layout = Layout::from_shape(shape);
        Ok(Self::from_buffer(Buffer::full(layout.size(), dtype, value), layout, device))
    }

    pub fn zeros(shape: &[usize]) -> Result<Self> {
        Self::zeros_with_spec(shape, get_default_device(), get_default_dtype())
    }

    pub fn zeros_with_spec(shape: &[usize], device: Device, dtype: DType) -> Result<Self> {
        Self::full_with_spec(shape, 0.0, device, dtype)
    }

    pub fn zeros_like(src: &Tensor) -> Result<Self> {
        Self::zeros_with_spec(src.shape(), src.device(), src.dtype())
    }

    pub fn ones(shape: &[usize]) -> Result<Self> {
        Self::ones_with_spec(shape, get_default_device(), get_default_dtype())
    }

    pub fn ones_with_spec(shape: &[usize], device: Device, dtype: DType) -> Result<Self> {
        Self::full_with_spec(shape, 1.0, device, dtype)
    }

    pub fn ones_like(src: &Tensor) -> Result<Self> {
        Self::ones_with_spec(src.shape(), src.device(), src.dtype())
    }
}
