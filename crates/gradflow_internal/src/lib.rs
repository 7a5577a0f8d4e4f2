pub mod prelude;

pub use gradflow_autograd as autograd;
pub use gradflow_core as core;
pub use gradflow_tensor as tensor;

pub use gradflow_core::dtype::{bfloat16, float16, float32, float64, half, int32, int64};
