pub mod accumulate_grad;
pub mod basic;
pub mod ops;

pub use accumulate_grad::AccumulateGrad;
pub use basic::GraphRoot;
