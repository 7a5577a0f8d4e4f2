#![allow(dead_code)]

use gradflow_core::{
    device::{set_default_device, Device},
    dtype::DType,
    error::Result,
};
use gradflow_tensor::Tensor;

pub fn setup_device() {
    set_default_device(Device::CPU);
}

pub fn setup_tensor_with_shape(data: Vec<f32>, dtype: DType, shape: &[usize]) -> Result<Tensor> {
    setup_device();
    Tensor::from_flatten_vec_with_spec(data, shape, Device::CPU, dtype)
}

pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tol, "expected {}, got {}", e, a);
    }
}

pub fn tolerance(dtype: DType) -> f32 {
    match dtype {
        DType::BF16 | DType::F16 => 0.1,
        _ => 1e-5,
    }
}

#[macro_export]
macro_rules! test_ops {
    ([$($op:ident),*]) => {
        $(
            mod $op {
                use super::*;
                use paste::paste;

                paste! {
                    #[test]
                    fn bf16() -> Result<()> {
                        test_functions::[<$op _test>](DType::BF16)
                    }

                    #[test]
                    fn f16() -> Result<()> {
                        test_functions::[<$op _test>](DType::F16)
                    }

                    #[test]
                    fn f32() -> Result<()> {
                        test_functions::[<$op _test>](DType::F32)
                    }

                    #[test]
                    fn f64() -> Result<()> {
                        test_functions::[<$op _test>](DType::F64)
                    }

                    #[test]
                    fn i32() -> Result<()> {
                        test_functions::[<$op _test>](DType::I32)
                    }

                    #[test]
                    fn i64() -> Result<()> {
                        test_functions::[<$op _test>](DType::I64)
                    }
                }
            }
        )*
    };
}
