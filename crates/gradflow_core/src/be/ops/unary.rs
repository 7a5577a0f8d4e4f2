use crate::{
    buffer::{Buffer, WithDType},
    dispatch_buffer,
    error::Result,
    layout::Layout,
};

fn map_typed<T: WithDType, F: Fn(f64) -> f64>(src: &[T], layout: &Layout, op: F) -> Buffer {
    let out: Vec<T> = (0..layout.size())
        .map(|i| T::from_f64(op(src[layout.storage_index(i)].to_f64())))
        .collect();
    T::to_buffer(out)
}

/// Applies `op` to every logical element, producing a contiguous buffer of the same dtype.
pub fn map(src: &Buffer, layout: &Layout, op: impl Fn(f64) -> f64) -> Result<Buffer> {
    Ok(dispatch_buffer!(src, data => map_typed(data, layout, &op)))
}

pub fn neg(src: &Buffer, layout: &Layout) -> Result<Buffer> {
    map(src, layout, |v| -v)
}

pub fn mul_scalar(src: &Buffer, layout: &Layout, scalar: f64) -> Result<Buffer> {
    map(src, layout, |v| v * scalar)
}
