use crate::{sparse, Tensor};
use gradflow_core::{
    be::ops::binary,
    buffer::Buffer,
    device::Device,
    dtype::promote_types,
    error::{Error, Result},
    layout::{compute_broadcast_shape, Layout},
};

type BinaryKernel = fn(&mut Buffer, &Layout, &Buffer, &Layout, &Buffer, &Layout) -> Result<()>;

pub(crate) fn check_same_device(lhs: &Tensor, rhs: &Tensor) -> Result<Device> {
    if lhs.device() != rhs.device() {
        return Err(Error::DeviceMismatch {
            expected: lhs.device(),
            got: rhs.device(),
        });
    }
    Ok(lhs.device())
}

/// Output strides for an elementwise result: the first operand that already
/// has the output shape and a dense layout donates its strides.
fn output_strides(lhs: &Tensor, rhs: &Tensor, shape: &[usize]) -> Vec<usize> {
    [lhs, rhs]
        .into_iter()
        .find(|t| t.shape() == shape && t.is_non_overlapping_and_dense())
        .map(|t| t.strides().to_vec())
        .unwrap_or_else(|| Layout::compute_strides(shape))
}

fn strided_binary(lhs: &Tensor, rhs: &Tensor, kernel: BinaryKernel) -> Result<Tensor> {
    let device = check_same_device(lhs, rhs)?;
    let dtype = promote_types(lhs.dtype(), rhs.dtype());
    let lhs = lhs.to_dtype(dtype)?;
    let rhs = rhs.to_dtype(dtype)?;

    let shape = compute_broadcast_shape(lhs.shape(), rhs.shape())?;
    let strides = output_strides(&lhs, &rhs, &shape);
    let out = Tensor::empty_strided(&shape, &strides, device, dtype)?;

    let lhs_layout = lhs.layout()?.broadcast_to(&shape)?;
    let rhs_layout = rhs.layout()?.broadcast_to(&shape)?;
    let out_layout = out.layout()?.clone();

    let mut out_buf = out.storage()?.write()?;
    if lhs.shares_storage(&rhs) {
        let buf = lhs.storage()?.read()?;
        kernel(&mut out_buf, &out_layout, &buf, &lhs_layout, &buf, &rhs_layout)?;
    } else {
        let lhs_buf = lhs.storage()?.read()?;
        let rhs_buf = rhs.storage()?.read()?;
        kernel(&mut out_buf, &out_layout, &lhs_buf, &lhs_layout, &rhs_buf, &rhs_layout)?;
    }
    drop(out_buf);

    Ok(out)
}

impl Tensor {
    /// Broadcasting, type promoting elementwise sum.
    ///
    /// Dense results take the strides of the first operand whose shape already
    /// matches the result. Mixing sparse and dense yields a dense tensor;
    /// sparse plus sparse stays sparse.
    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        match (self.is_sparse(), rhs.is_sparse()) {
            (false, false) => strided_binary(self, rhs, binary::add),
            (false, true) => dense_plus_sparse(self, rhs),
            (true, false) => dense_plus_sparse(rhs, self),
            (true, true) => sparse::add_sparse(self, rhs),
        }
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        match (self.is_sparse(), rhs.is_sparse()) {
            (false, false) => strided_binary(self, rhs, binary::sub),
            _ => self.add(&rhs.neg()?),
        }
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        if self.is_sparse() || rhs.is_sparse() {
            return Err(Error::InvalidArgument("mul is not implemented for sparse tensors".into()));
        }
        strided_binary(self, rhs, binary::mul)
    }

    /// In-place `self += other`, keeping `self`'s layout and dtype.
    pub fn add_(&self, other: &Tensor) -> Result<()> {
        check_same_device(self, other)?;
        match (self.is_sparse(), other.is_sparse()) {
            (false, false) => {
                let dst = self.strided()?;
                let overlapping = dst
                    .layout
                    .shape()
                    .iter()
                    .zip(dst.layout.strides())
                    .any(|(&size, &stride)| size > 1 && stride == 0);
                if overlapping {
                    return Err(Error::InvalidArgument(
                        "in-place add into a tensor whose elements share memory".into(),
                    ));
                }

                let src = other.to_dtype(self.dtype())?;
                if src.shares_storage(self) {
                    let copy = src.clone_with(crate::MemoryFormat::Contiguous)?;
                    return self.add_(&copy);
                }
                let src_layout = src.layout()?.broadcast_to(self.shape())?;

                let mut dst_buf = dst.storage.write()?;
                let src_buf = src.storage()?.read()?;
                binary::add_assign(&mut dst_buf, &dst.layout, &src_buf, &src_layout)
            }
            (false, true) => sparse::scatter_add_into(self, other),
            (true, true) => sparse::add_sparse_(self, other),
            (true, false) => Err(Error::InvalidArgument(
                "cannot add a dense tensor into a sparse tensor in place".into(),
            )),
        }
    }
}

fn dense_plus_sparse(dense: &Tensor, sparse_rhs: &Tensor) -> Result<Tensor> {
    check_same_device(dense, sparse_rhs)?;
    if dense.shape() != sparse_rhs.shape() {
        return Err(Error::IncompatibleShape(format!(
            "dense {:?} and sparse {:?} operands must have equal shapes",
            dense.shape(),
            sparse_rhs.shape()
        )));
    }
    let dtype = promote_types(dense.dtype(), sparse_rhs.dtype());
    let out = dense.to_dtype(dtype)?.clone_with(crate::MemoryFormat::Preserve)?;
    sparse::scatter_add_into(&out, sparse_rhs)?;
    Ok(out)
}
