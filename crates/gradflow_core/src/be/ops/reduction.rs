use crate::{
    buffer::{Buffer, WithDType},
    dispatch_buffer,
    error::{Error, Result},
    layout::{is_expandable_to, Layout},
};

/// Sums `src` down to `target`, the inverse of broadcasting `target` to the
/// source shape. The result is contiguous.
pub fn sum_to_shape(src: &Buffer, layout: &Layout, target: &[usize]) -> Result<Buffer> {
    if !is_expandable_to(target, layout.shape()) {
        return Err(Error::IncompatibleShape(format!(
            "cannot sum {:?} to {:?}",
            layout.shape(),
            target
        )));
    }

    fn typed<T: WithDType>(src: &[T], layout: &Layout, target: &[usize]) -> Buffer {
        let shape = layout.shape();
        let rank_diff = shape.len() - target.len();
        let target_strides = Layout::compute_strides(target);
        let mut acc = vec![0f64; Layout::compute_size(target)];

        for i in 0..layout.size() {
            let mut rem = i;
            let mut t = 0;
            for d in (0..shape.len()).rev() {
                let idx = rem % shape[d];
                rem /= shape[d];
                if d >= rank_diff && target[d - rank_diff] != 1 {
                    t += idx * target_strides[d - rank_diff];
                }
            }
            acc[t] += src[layout.storage_index(i)].to_f64();
        }

        T::to_buffer(acc.into_iter().map(T::from_f64).collect())
    }

    Ok(dispatch_buffer!(src, data => typed(data, layout, target)))
}

