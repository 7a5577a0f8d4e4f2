use crate::Tensor;
use std::fmt;

fn write_nested(f: &mut fmt::Formatter<'_>, data: &[f64], shape: &[usize], is_int: bool) -> fmt::Result {
    let write_value = |f: &mut fmt::Formatter<'_>, v: f64| {
        if is_int {
            write!(f, "{}", v as i64)
        } else {
            write!(f, "{:.4}", v)
        }
    };

    match shape.len() {
        0 => write_value(f, data[0]),
        1 => {
            write!(f, "[")?;
            for (i, &v) in data.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_value(f, v)?;
            }
            write!(f, "]")
        }
        _ => {
            let chunk = data.len() / shape[0].max(1);
            write!(f, "[")?;
            for i in 0..shape[0] {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_nested(f, &data[i * chunk..(i + 1) * chunk], &shape[1..], is_int)?;
            }
            write!(f, "]")
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_flatten_vec::<f64>() {
            Ok(data) if data.is_empty() => write!(f, "[]"),
            Ok(data) => write_nested(f, &data, self.shape(), self.dtype().is_int()),
            Err(_) => write!(f, "<unreadable>"),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={:?}, device={}, dtype={}",
            self.shape(),
            self.device().name(),
            self.dtype().as_str()
        )?;
        if self.is_sparse() {
            write!(f, ", layout=sparse_coo")?;
            if let Ok(nnz) = self.nnz() {
                write!(f, ", nnz={}", nnz)?;
            }
        }
        write!(f, ", data={})", self)
    }
}
