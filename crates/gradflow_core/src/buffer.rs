use crate::{
    dtype::DType,
    error::{Error, Result},
};
use half::{bf16, f16};

/// Element types a [`Buffer`] can hold.
pub trait WithDType:
    Copy
    + Send
    + Sync
    + PartialEq
    + Default
    + std::fmt::Debug
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + 'static
{
    const DTYPE: DType;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;

    fn to_buffer(data: Vec<Self>) -> Buffer;
    fn buffer_slice(buffer: &Buffer) -> Option<&[Self]>;
    fn buffer_slice_mut(buffer: &mut Buffer) -> Option<&mut [Self]>;
}

macro_rules! with_dtype {
    ($ty:ty, $variant:ident, $from_f64:expr, $to_f64:expr) => {
        impl WithDType for $ty {
            const DTYPE: DType = DType::$variant;

            #[inline]
            fn from_f64(v: f64) -> Self {
                $from_f64(v)
            }

            #[inline]
            fn to_f64(self) -> f64 {
                $to_f64(self)
            }

            fn to_buffer(data: Vec<Self>) -> Buffer {
                Buffer::$variant(data)
            }

            fn buffer_slice(buffer: &Buffer) -> Option<&[Self]> {
                match buffer {
                    Buffer::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn buffer_slice_mut(buffer: &mut Buffer) -> Option<&mut [Self]> {
                match buffer {
                    Buffer::$variant(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

with_dtype!(bf16, BF16, bf16::from_f64, bf16::to_f64);
with_dtype!(f16, F16, f16::from_f64, f16::to_f64);
with_dtype!(f32, F32, |v: f64| v as f32, |v: f32| v as f64);
with_dtype!(f64, F64, |v: f64| v, |v: f64| v);
with_dtype!(i32, I32, |v: f64| v as i32, |v: i32| v as f64);
with_dtype!(i64, I64, |v: f64| v as i64, |v: i64| v as f64);

/// Host resident, dtype tagged element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    BF16(Vec<bf16>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

/// Runs `$body` with `$data` bound to the typed vector inside `$buffer`.
#[macro_export]
macro_rules! dispatch_buffer {
    ($buffer:expr, $data:ident => $body:expr) => {
        match $buffer {
            $crate::buffer::Buffer::BF16($data) => $body,
            $crate::buffer::Buffer::F16($data) => $body,
            $crate::buffer::Buffer::F32($data) => $body,
            $crate::buffer::Buffer::F64($data) => $body,
            $crate::buffer::Buffer::I32($data) => $body,
            $crate::buffer::Buffer::I64($data) => $body,
        }
    };
}

impl Buffer {
    pub fn zeros(len: usize, dtype: DType) -> Self {
        Self::full(len, dtype, 0.0)
    }

    pub fn full(len: usize, dtype: DType, value: f64) -> Self {
        match dtype {
            DType::BF16 => Self::BF16(vec![bf16::from_f64(value); len]),
            DType::F16 => Self::F16(vec![f16::from_f64(value); len]),
            DType::F32 => Self::F32(vec![value as f32; len]),
            DType::F64 => Self::F64(vec![value; len]),
            DType::I32 => Self::I32(vec![value as i32; len]),
            DType::I64 => Self::I64(vec![value as i64; len]),
        }
    }

    pub fn from_vec<T: WithDType>(data: Vec<T>) -> Self {
        T::to_buffer(data)
    }

    pub fn len(&self) -> usize {
        dispatch_buffer!(self, data => data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::BF16(_) => DType::BF16,
            Self::F16(_) => DType::F16,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
        }
    }

    pub fn as_slice<T: WithDType>(&self) -> Result<&[T]> {
        T::buffer_slice(self).ok_or(Error::DTypeMismatch {
            expected: T::DTYPE,
            got: self.dtype(),
        })
    }

    pub fn as_mut_slice<T: WithDType>(&mut self) -> Result<&mut [T]> {
        let got = self.dtype();
        T::buffer_slice_mut(self).ok_or(Error::DTypeMismatch { expected: T::DTYPE, got })
    }
}
