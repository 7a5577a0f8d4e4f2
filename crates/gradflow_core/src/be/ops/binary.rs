use crate::{
    be::PAR_THRESHOLD,
    buffer::{Buffer, WithDType},
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};
use half::{bf16, f16};
use rayon::prelude::*;

/// `out[i] = op(lhs[i], rhs[i])` over the logical elements of `out_layout`.
///
/// `lhs_layout` and `rhs_layout` must already be broadcast to the output shape.
fn binary_map<T, F>(
    lhs: &[T],
    lhs_layout: &Layout,
    rhs: &[T],
    rhs_layout: &Layout,
    out: &mut [T],
    out_layout: &Layout,
    op: F,
) where
    T: WithDType,
    F: Fn(T, T) -> T + Sync,
{
    let numel = out_layout.size();
    let lhs_cont = lhs_layout.is_contiguous();
    let rhs_cont = rhs_layout.is_contiguous();

    let element = |i: usize| -> T {
        let l = if lhs_cont { lhs_layout.offset() + i } else { lhs_layout.storage_index(i) };
        let r = if rhs_cont { rhs_layout.offset() + i } else { rhs_layout.storage_index(i) };
        op(lhs[l], rhs[r])
    };

    if out_layout.is_contiguous() {
        let start = out_layout.offset();
        let out = &mut out[start..start + numel];
        if numel >= PAR_THRESHOLD {
            out.par_iter_mut().enumerate().for_each(|(i, o)| *o = element(i));
        } else {
            out.iter_mut().enumerate().for_each(|(i, o)| *o = element(i));
        }
    } else {
        for i in 0..numel {
            out[out_layout.storage_index(i)] = element(i);
        }
    }
}

fn check_operands(lhs: &Buffer, rhs: &Buffer, out: &Buffer, name: &str) -> Result<DType> {
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::DTypeMismatch {
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    if out.dtype() != lhs.dtype() {
        return Err(Error::InvalidArgument(format!(
            "{}: output dtype {:?} differs from input dtype {:?}",
            name,
            out.dtype(),
            lhs.dtype()
        )));
    }
    Ok(lhs.dtype())
}

macro_rules! declare_binary_op {
    ($name:ident, $op:expr) => {
        paste::paste! {
            /// Elementwise kernel; all operands share one dtype and one logical shape.
            pub fn $name(
                out: &mut Buffer,
                out_layout: &Layout,
                lhs: &Buffer,
                lhs_layout: &Layout,
                rhs: &Buffer,
                rhs_layout: &Layout,
            ) -> Result<()> {
                let dtype = check_operands(lhs, rhs, out, stringify!($name))?;
                match dtype {
                    DType::BF16 => [<$name _typed>]::<bf16>(out, out_layout, lhs, lhs_layout, rhs, rhs_layout),
                    DType::F16 => [<$name _typed>]::<f16>(out, out_layout, lhs, lhs_layout, rhs, rhs_layout),
                    DType::F32 => [<$name _typed>]::<f32>(out, out_layout, lhs, lhs_layout, rhs, rhs_layout),
                    DType::F64 => [<$name _typed>]::<f64>(out, out_layout, lhs, lhs_layout, rhs, rhs_layout),
                    DType::I32 => [<$name _typed>]::<i32>(out, out_layout, lhs, lhs_layout, rhs, rhs_layout),
                    DType::I64 => [<$name _typed>]::<i64>(out, out_layout, lhs, lhs_layout, rhs, rhs_layout),
                }
            }

            fn [<$name _typed>]<T: WithDType>(
                out: &mut Buffer,
                out_layout: &Layout,
                lhs: &Buffer,
                lhs_layout: &Layout,
                rhs: &Buffer,
                rhs_layout: &Layout,
            ) -> Result<()> {
                let lhs = lhs.as_slice::<T>()?;
                let rhs = rhs.as_slice::<T>()?;
                let out = out.as_mut_slice::<T>()?;
                binary_map(lhs, lhs_layout, rhs, rhs_layout, out, out_layout, $op);
                Ok(())
            }
        }
    };
}

declare_binary_op!(add, |a: T, b: T| a + b);
declare_binary_op!(sub, |a: T, b: T| a - b);
declare_binary_op!(mul, |a: T, b: T| a * b);

/// `dst[i] += src[i]` in place. `dst_layout` must not alias itself.
pub fn add_assign(dst: &mut Buffer, dst_layout: &Layout, src: &Buffer, src_layout: &Layout) -> Result<()> {
    if dst.dtype() != src.dtype() {
        return Err(Error::DTypeMismatch {
            expected: dst.dtype(),
            got: src.dtype(),
        });
    }

    fn typed<T: WithDType>(dst: &mut Buffer, dst_layout: &Layout, src: &Buffer, src_layout: &Layout) -> Result<()> {
        let src = src.as_slice::<T>()?;
        let dst = dst.as_mut_slice::<T>()?;
        let numel = dst_layout.size();

        if dst_layout.is_contiguous() && src_layout.is_contiguous() && numel >= PAR_THRESHOLD {
            let (d, s) = (dst_layout.offset(), src_layout.offset());
            dst[d..d + numel]
                .par_iter_mut()
                .zip(src[s..s + numel].par_iter())
                .for_each(|(o, &v)| *o = *o + v);
        } else {
            for i in 0..numel {
                let o = dst_layout.storage_index(i);
                dst[o] = dst[o] + src[src_layout.storage_index(i)];
            }
        }
        Ok(())
    }

    match dst.dtype() {
        DType::BF16 => typed::<bf16>(dst, dst_layout, src, src_layout),
        DType::F16 => typed::<f16>(dst, dst_layout, src, src_layout),
        DType::F32 => typed::<f32>(dst, dst_layout, src, src_layout),
        DType::F64 => typed::<f64>(dst, dst_layout, src, src_layout),
        DType::I32 => typed::<i32>(dst, dst_layout, src, src_layout),
        DType::I64 => typed::<i64>(dst, dst_layout, src, src_layout),
    }
}
