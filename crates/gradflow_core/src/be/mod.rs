//! Host kernels backing every device. Kernels take buffers plus the layouts
//! describing how logical elements map onto them.

pub mod ops;

/// Below this many elements kernels stay on the calling thread.
pub(crate) const PAR_THRESHOLD: usize = 1 << 14;
