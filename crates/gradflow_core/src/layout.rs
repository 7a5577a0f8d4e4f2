use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Layout {
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

impl Layout {
    pub fn new(shape: &[usize], strides: &[usize], offset: usize) -> Self {
        Self {
            shape: shape.to_vec(),
            strides: strides.to_vec(),
            offset,
        }
    }

    pub fn from_shape(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            strides: Self::compute_strides(shape),
            offset: 0,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
    pub fn dim_size(&self, dim: usize) -> Option<usize> {
        self.shape.get(dim).copied()
    }
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of storage elements a buffer must hold to back this layout.
    pub fn storage_span(&self) -> usize {
        if self.size() == 0 {
            return self.offset;
        }
        self.offset
            + self
                .shape
                .iter()
                .zip(&self.strides)
                .map(|(&size, &stride)| (size - 1) * stride)
                .sum::<usize>()
            + 1
    }

    pub fn is_contiguous(&self) -> bool {
        if self.size() == 0 {
            return true;
        }
        let mut expected = 1;
        for (&size, &stride) in self.shape.iter().zip(&self.strides).rev() {
            if size == 1 {
                continue;
            }
            if stride != expected {
                return false;
            }
            expected *= size;
        }
        true
    }

    /// True when the elements cover a dense block of memory without aliasing,
    /// in any dimension order.
    pub fn is_non_overlapping_and_dense(&self) -> bool {
        if self.size() == 0 {
            return true;
        }
        if self.ndim() == 1 {
            return self.shape[0] < 2 || self.strides[0] == 1;
        }

        let mut perm: Vec<usize> = (0..self.ndim()).collect();
        perm.sort_by(|&a, &b| {
            let a_small = self.shape[a] < 2;
            let b_small = self.shape[b] < 2;
            a_small.cmp(&b_small).then(self.strides[a].cmp(&self.strides[b]))
        });

        let mut required = 1;
        for &d in &perm {
            let size = self.shape[d];
            if size < 2 {
                return true;
            }
            if self.strides[d] != required {
                return false;
            }
            required *= size;
        }
        true
    }

    pub fn transpose(&mut self, dim0: usize, dim1: usize) -> Result<()> {
        let ndim = self.ndim();
        for dim in [dim0, dim1] {
            if dim >= ndim {
                return Err(Error::DimensionOutOfBounds { dim, ndim });
            }
        }

        self.shape.swap(dim0, dim1);
        self.strides.swap(dim0, dim1);

        Ok(())
    }

    pub fn permute(&mut self, dims: &[usize]) -> Result<()> {
        let ndim = self.ndim();
        if dims.len() != ndim {
            return Err(Error::InvalidArgument(format!(
                "permute expects {} dimensions, got {}",
                ndim,
                dims.len()
            )));
        }
        let mut seen = vec![false; ndim];
        for &d in dims {
            if d >= ndim {
                return Err(Error::DimensionOutOfBounds { dim: d, ndim });
            }
            if seen[d] {
                return Err(Error::InvalidArgument(format!("repeated dimension {} in permute", d)));
            }
            seen[d] = true;
        }

        self.shape = dims.iter().map(|&d| self.shape[d]).collect();
        self.strides = dims.iter().map(|&d| self.strides[d]).collect();

        Ok(())
    }

    /// Broadcasts to `target` by inserting leading dims and zeroing strides of
    /// expanded size-1 dims.
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Layout> {
        if target.len() < self.ndim() {
            return Err(Error::IncompatibleShape(format!(
                "cannot broadcast {:?} to {:?}",
                self.shape, target
            )));
        }

        let rank_diff = target.len() - self.ndim();
        let mut strides = vec![0; target.len()];
        for (i, &t) in target.iter().enumerate() {
            if i < rank_diff {
                continue;
            }
            let size = self.shape[i - rank_diff];
            let stride = self.strides[i - rank_diff];
            if size == t {
                strides[i] = stride;
            } else if size == 1 {
                strides[i] = 0;
            } else {
                return Err(Error::IncompatibleShape(format!(
                    "cannot broadcast {:?} to {:?}",
                    self.shape, target
                )));
            }
        }

        Ok(Layout::new(target, &strides, self.offset))
    }

    /// Strides for a fresh dense buffer that keeps this layout's dimension order.
    pub fn dense_strides_like(&self) -> Vec<usize> {
        if self.is_non_overlapping_and_dense() {
            return self.strides.clone();
        }
        Self::compute_strides(&self.shape)
    }

    // helper

    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        if shape.is_empty() {
            return vec![];
        }

        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len() - 1).rev() {
            strides[i] = strides[i + 1] * shape[i + 1].max(1);
        }
        strides
    }

    pub fn compute_size(shape: &[usize]) -> usize {
        shape.iter().product()
    }

    /// Maps a flat row-major logical index to a storage offset.
    #[inline]
    pub fn storage_index(&self, mut idx: usize) -> usize {
        let mut offset = self.offset;
        for (&size, &stride) in self.shape.iter().zip(&self.strides).rev() {
            offset += (idx % size) * stride;
            idx /= size;
        }
        offset
    }
}

pub fn compute_broadcast_shape(lhs_shape: &[usize], rhs_shape: &[usize]) -> Result<Vec<usize>> {
    let max_rank = lhs_shape.len().max(rhs_shape.len());
    let padded_lhs = pad_shape(lhs_shape, max_rank);
    let padded_rhs = pad_shape(rhs_shape, max_rank);

    let mut broadcasted_shape = Vec::with_capacity(max_rank);
    for (i, (&dim1, &dim2)) in padded_lhs.iter().zip(padded_rhs.iter()).enumerate() {
        if dim1 != 1 && dim2 != 1 && dim1 != dim2 {
            return Err(Error::InvalidShape {
                message: format!("Cannot broadcast shapes {:?} and {:?} at dimension {}", lhs_shape, rhs_shape, i),
            });
        }
        broadcasted_shape.push(if dim1 == 1 { dim2 } else { dim1 });
    }

    Ok(broadcasted_shape)
}

pub fn pad_shape(shape: &[usize], target_rank: usize) -> Vec<usize> {
    let mut padded = vec![1; target_rank - shape.len()];
    padded.extend(shape);
    padded
}

/// True when a tensor of `shape` can be summed down to `target`.
pub fn is_expandable_to(target: &[usize], shape: &[usize]) -> bool {
    if target.len() > shape.len() {
        return false;
    }
    let rank_diff = shape.len() - target.len();
    target
        .iter()
        .zip(&shape[rank_diff..])
        .all(|(&t, &s)| t == s || t == 1)
}
