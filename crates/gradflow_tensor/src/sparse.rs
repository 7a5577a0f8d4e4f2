use crate::{ops::check_same_device, Tensor, TensorImpl, TensorKind};
use gradflow_core::{
    buffer::WithDType,
    dispatch_buffer,
    dtype::{promote_types, DType},
    error::{Error, Result},
    layout::Layout,
};
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Coordinate-format sparse tensor.
///
/// `indices` is an `[ndim, nnz]` I64 tensor and `values` a 1-D tensor of
/// `nnz` elements. Duplicate coordinates are allowed and sum on densify.
pub(crate) struct SparseCoo {
    shape: Vec<usize>,
    parts: RwLock<SparseParts>,
}

#[derive(Clone)]
pub(crate) struct SparseParts {
    pub(crate) indices: Tensor,
    pub(crate) values: Tensor,
}

impl SparseCoo {
    pub(crate) fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub(crate) fn parts(&self) -> Result<RwLockReadGuard<'_, SparseParts>> {
        self.parts.read().map_err(|_| Error::Lock)
    }
}

fn validate_parts(indices: &Tensor, values: &Tensor, shape: &[usize]) -> Result<()> {
    if indices.is_sparse() || values.is_sparse() {
        return Err(Error::InvalidArgument("sparse parts must be strided tensors".into()));
    }
    if indices.dtype() != DType::I64 {
        return Err(Error::DTypeMismatch {
            expected: DType::I64,
            got: indices.dtype(),
        });
    }
    if shape.is_empty() {
        return Err(Error::InvalidShape {
            message: "sparse tensors need at least one dimension".into(),
        });
    }
    if values.ndim() != 1 {
        return Err(Error::InvalidShape {
            message: format!("sparse values must be 1-D, got shape {:?}", values.shape()),
        });
    }
    let nnz = values.size();
    if indices.shape() != [shape.len(), nnz] {
        return Err(Error::InvalidShape {
            message: format!(
                "sparse indices must have shape [{}, {}], got {:?}",
                shape.len(),
                nnz,
                indices.shape()
            ),
        });
    }
    Ok(())
}

impl Tensor {
    /// Builds a COO tensor. Parts are taken by handle, not copied.
    pub fn sparse_coo(indices: Tensor, values: Tensor, shape: &[usize]) -> Result<Tensor> {
        validate_parts(&indices, &values, shape)?;
        check_same_device(&values, &indices)?;

        let coords = indices.to_flatten_vec::<i64>()?;
        let nnz = values.size();
        for (d, &size) in shape.iter().enumerate() {
            if let Some(&bad) = coords[d * nnz..(d + 1) * nnz]
                .iter()
                .find(|&&c| c < 0 || c as usize >= size)
            {
                return Err(Error::InvalidArgument(format!(
                    "sparse index {} out of range for dimension {} of size {}",
                    bad, d, size
                )));
            }
        }

        Ok(Self::from_sparse_parts(shape.to_vec(), SparseParts { indices, values }))
    }

    fn from_sparse_parts(shape: Vec<usize>, parts: SparseParts) -> Tensor {
        Tensor {
            inner: Arc::new(TensorImpl {
                device: parts.values.device(),
                dtype: parts.values.dtype(),
                kind: TensorKind::Sparse(SparseCoo {
                    shape,
                    parts: RwLock::new(parts),
                }),
            }),
        }
    }

    pub fn indices(&self) -> Result<Tensor> {
        Ok(self.sparse()?.parts()?.indices.clone())
    }

    pub fn values(&self) -> Result<Tensor> {
        Ok(self.sparse()?.parts()?.values.clone())
    }

    pub fn nnz(&self) -> Result<usize> {
        Ok(self.sparse()?.parts()?.values.size())
    }

    /// Use counts of the `(indices, values)` handles, not counting the
    /// temporaries this call creates.
    pub fn sparse_part_use_counts(&self) -> Result<(usize, usize)> {
        let parts = self.sparse()?.parts()?;
        Ok((parts.indices.use_count(), parts.values.use_count()))
    }

    /// True when both sparse parts are row-major.
    pub fn sparse_parts_contiguous(&self) -> Result<bool> {
        let parts = self.sparse()?.parts()?;
        Ok(parts.indices.is_contiguous() && parts.values.is_contiguous())
    }

    /// New sparse tensor sharing this one's index and value handles.
    pub fn shallow_copy_sparse(&self) -> Result<Tensor> {
        let parts = self.sparse()?.parts()?.clone();
        Ok(Self::from_sparse_parts(self.shape().to_vec(), parts))
    }

    /// Dense equivalent. Strided tensors return themselves.
    pub fn to_dense(&self) -> Result<Tensor> {
        if !self.is_sparse() {
            return Ok(self.clone());
        }
        let out = Tensor::zeros_with_spec(self.shape(), self.device(), self.dtype())?;
        scatter_add_into(&out, self)?;
        Ok(out)
    }
}

fn add_at<T: WithDType>(data: &mut [T], offset: usize, value: f64) {
    data[offset] = data[offset] + T::from_f64(value);
}

/// `dense += sparse`, summing duplicate coordinates.
pub(crate) fn scatter_add_into(dense: &Tensor, sparse: &Tensor) -> Result<()> {
    if dense.shape() != sparse.shape() {
        return Err(Error::IncompatibleShape(format!(
            "cannot add sparse {:?} into dense {:?}",
            sparse.shape(),
            dense.shape()
        )));
    }
    let parts = sparse.sparse()?.parts()?.clone();
    let coords = parts.indices.to_flatten_vec::<i64>()?;
    let values = parts.values.to_flatten_vec::<f64>()?;
    let nnz = values.len();

    let dst = dense.strided()?;
    let row_major = Layout::compute_strides(dense.shape());
    let mut buf = dst.storage.write()?;
    for (k, &value) in values.iter().enumerate() {
        let flat: usize = row_major
            .iter()
            .enumerate()
            .map(|(d, &stride)| coords[d * nnz + k] as usize * stride)
            .sum();
        let offset = dst.layout.storage_index(flat);
        dispatch_buffer!(&mut *buf, data => add_at(data, offset, value));
    }
    Ok(())
}

fn concat_parts(lhs: &SparseParts, rhs: &SparseParts, ndim: usize, dtype: DType) -> Result<SparseParts> {
    let lhs_idx = lhs.indices.to_flatten_vec::<i64>()?;
    let rhs_idx = rhs.indices.to_flatten_vec::<i64>()?;
    let (ln, rn) = (lhs.values.size(), rhs.values.size());

    let mut indices = Vec::with_capacity(ndim * (ln + rn));
    for d in 0..ndim {
        indices.extend_from_slice(&lhs_idx[d * ln..(d + 1) * ln]);
        indices.extend_from_slice(&rhs_idx[d * rn..(d + 1) * rn]);
    }

    let mut values = lhs.values.to_flatten_vec::<f64>()?;
    values.extend(rhs.values.to_flatten_vec::<f64>()?);

    let device = lhs.values.device();
    Ok(SparseParts {
        indices: Tensor::from_flatten_vec_with_spec(indices, &[ndim, ln + rn], device, DType::I64)?,
        values: Tensor::from_flatten_vec_with_spec(values, &[ln + rn], device, dtype)?,
    })
}

fn check_sparse_pair(lhs: &Tensor, rhs: &Tensor) -> Result<()> {
    check_same_device(lhs, rhs)?;
    if lhs.shape() != rhs.shape() {
        return Err(Error::IncompatibleShape(format!(
            "sparse operands {:?} and {:?} differ in shape",
            lhs.shape(),
            rhs.shape()
        )));
    }
    Ok(())
}

/// Sparse sum by concatenating entries; duplicates are not coalesced.
pub(crate) fn add_sparse(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    check_sparse_pair(lhs, rhs)?;
    let dtype = promote_types(lhs.dtype(), rhs.dtype());
    let lhs_parts = lhs.sparse()?.parts()?.clone();
    let rhs_parts = rhs.sparse()?.parts()?.clone();
    let parts = concat_parts(&lhs_parts, &rhs_parts, lhs.ndim(), dtype)?;
    Ok(Tensor::from_sparse_parts(lhs.shape().to_vec(), parts))
}

/// In-place sparse sum. The result keeps `lhs`'s dtype.
pub(crate) fn add_sparse_(lhs: &Tensor, rhs: &Tensor) -> Result<()> {
    check_sparse_pair(lhs, rhs)?;
    let rhs_parts = rhs.sparse()?.parts()?.clone();
    let coo = lhs.sparse()?;
    let mut parts = coo.parts.write().map_err(|_| Error::Lock)?;
    *parts = concat_parts(&parts, &rhs_parts, lhs.ndim(), lhs.dtype())?;
    Ok(())
}
