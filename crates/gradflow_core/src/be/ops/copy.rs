use crate::{
    be::PAR_THRESHOLD,
    buffer::{Buffer, WithDType},
    dispatch_buffer,
    error::{Error, Result},
    layout::Layout,
};
use rayon::prelude::*;
use std::any::Any;

/// Copies the logical elements of `src` into `dst`, casting when dtypes differ.
///
/// Both layouts must describe the same shape.
pub fn copy_strided(dst: &mut Buffer, dst_layout: &Layout, src: &Buffer, src_layout: &Layout) -> Result<()> {
    if dst_layout.shape() != src_layout.shape() {
        return Err(Error::IncompatibleShape(format!(
            "copy from {:?} into {:?}",
            src_layout.shape(),
            dst_layout.shape()
        )));
    }
    if dst_layout.storage_span() > dst.len() || src_layout.storage_span() > src.len() {
        return Err(Error::InvalidArgument("layout exceeds buffer length".into()));
    }

    dispatch_buffer!(dst, out => {
        dispatch_buffer!(src, input => {
            copy_typed(out, dst_layout, input, src_layout);
        })
    });
    Ok(())
}

fn copy_typed<D: WithDType, S: WithDType>(dst: &mut [D], dst_layout: &Layout, src: &[S], src_layout: &Layout) {
    let numel = dst_layout.size();
    let convert = |v: S| -> D {
        match (&v as &dyn Any).downcast_ref::<D>() {
            Some(&same) => same,
            None => D::from_f64(v.to_f64()),
        }
    };

    if dst_layout.is_contiguous() && src_layout.is_contiguous() {
        let (d, s) = (dst_layout.offset(), src_layout.offset());
        let dst = &mut dst[d..d + numel];
        let src = &src[s..s + numel];
        if numel >= PAR_THRESHOLD {
            dst.par_iter_mut().zip(src.par_iter()).for_each(|(o, &v)| *o = convert(v));
        } else {
            dst.iter_mut().zip(src.iter()).for_each(|(o, &v)| *o = convert(v));
        }
    } else {
        for i in 0..numel {
            dst[dst_layout.storage_index(i)] = convert(src[src_layout.storage_index(i)]);
        }
    }
}

/// Materialises the logical elements of `src` as a fresh contiguous buffer.
pub fn contiguous(src: &Buffer, src_layout: &Layout) -> Result<Buffer> {
    let mut out = Buffer::zeros(src_layout.size(), src.dtype());
    copy_strided(&mut out, &Layout::from_shape(src_layout.shape()), src, src_layout)?;
    Ok(out)
}
