mod binary;
mod reduction;
mod transform;
mod unary;

pub(crate) use binary::check_same_device;
