mod creation;
mod display;
mod ops;
mod sparse;
mod vec;

use gradflow_core::{
    buffer::Buffer,
    device::Device,
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

// ────────────────────────────────────────────────────────────────────────────
//  Storage
// ────────────────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageId(usize);
static STORAGE_COUNTER: AtomicUsize = AtomicUsize::new(1);
#[inline]
pub(crate) fn next_storage_id() -> StorageId {
    StorageId(STORAGE_COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub struct Storage {
    id: StorageId,
    buffer: RwLock<Buffer>,
}

impl Storage {
    pub fn new(buffer: Buffer) -> Self {
        Self {
            id: next_storage_id(),
            buffer: RwLock::new(buffer),
        }
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Buffer>> {
        self.buffer.read().map_err(|_| Error::Lock)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Buffer>> {
        self.buffer.write().map_err(|_| Error::Lock)
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Tensor
// ────────────────────────────────────────────────────────────────────────────

/// Memory format requested when cloning.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryFormat {
    /// Keep the source's strides when it is non-overlapping and dense,
    /// otherwise fall back to row-major.
    Preserve,
    /// Row-major.
    Contiguous,
}

pub(crate) struct Strided {
    storage: Arc<Storage>,
    layout: Layout,
}

pub(crate) enum TensorKind {
    Strided(Strided),
    Sparse(sparse::SparseCoo),
}

pub(crate) struct TensorImpl {
    device: Device,
    dtype: DType,
    kind: TensorKind,
}

/// Reference counted handle to a dense strided or sparse COO tensor.
///
/// Cloning a `Tensor` is shallow: clones share the same implementation and
/// bump [`use_count`](Tensor::use_count).
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<TensorImpl>,
}

impl Tensor {
    pub(crate) fn from_storage(storage: Arc<Storage>, layout: Layout, device: Device, dtype: DType) -> Self {
        Self {
            inner: Arc::new(TensorImpl {
                device,
                dtype,
                kind: TensorKind::Strided(Strided { storage, layout }),
            }),
        }
    }

    pub(crate) fn from_buffer(buffer: Buffer, layout: Layout, device: Device) -> Self {
        let dtype = buffer.dtype();
        Self::from_storage(Arc::new(Storage::new(buffer)), layout, device, dtype)
    }

    pub(crate) fn strided(&self) -> Result<&Strided> {
        match &self.inner.kind {
            TensorKind::Strided(s) => Ok(s),
            TensorKind::Sparse(_) => Err(Error::InvalidArgument("operation requires a strided tensor".into())),
        }
    }

    pub(crate) fn sparse(&self) -> Result<&sparse::SparseCoo> {
        match &self.inner.kind {
            TensorKind::Sparse(s) => Ok(s),
            TensorKind::Strided(_) => Err(Error::InvalidArgument("operation requires a sparse tensor".into())),
        }
    }

    pub fn device(&self) -> Device {
        self.inner.device
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.inner.kind, TensorKind::Sparse(_))
    }

    pub fn shape(&self) -> &[usize] {
        match &self.inner.kind {
            TensorKind::Strided(s) => s.layout.shape(),
            TensorKind::Sparse(s) => s.shape(),
        }
    }

    /// Element strides. Sparse tensors have no strides and return an empty slice.
    pub fn strides(&self) -> &[usize] {
        match &self.inner.kind {
            TensorKind::Strided(s) => s.layout.strides(),
            TensorKind::Sparse(_) => &[],
        }
    }

    pub fn layout(&self) -> Result<&Layout> {
        Ok(&self.strided()?.layout)
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn size(&self) -> usize {
        Layout::compute_size(self.shape())
    }

    pub fn dim_size(&self, dim: usize) -> Option<usize> {
        self.shape().get(dim).copied()
    }

    pub fn is_contiguous(&self) -> bool {
        match &self.inner.kind {
            TensorKind::Strided(s) => s.layout.is_contiguous(),
            TensorKind::Sparse(_) => false,
        }
    }

    pub fn is_non_overlapping_and_dense(&self) -> bool {
        match &self.inner.kind {
            TensorKind::Strided(s) => s.layout.is_non_overlapping_and_dense(),
            TensorKind::Sparse(_) => false,
        }
    }

    /// Number of live handles to this tensor.
    ///
    /// A snapshot only: other threads may clone or drop handles concurrently.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True when both handles refer to the same tensor.
    pub fn is_same(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn storage_id(&self) -> Option<StorageId> {
        match &self.inner.kind {
            TensorKind::Strided(s) => Some(s.storage.id()),
            TensorKind::Sparse(_) => None,
        }
    }

    pub fn shares_storage(&self, other: &Tensor) -> bool {
        match (self.storage_id(), other.storage_id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn storage(&self) -> Result<&Arc<Storage>> {
        Ok(&self.strided()?.storage)
    }
}
