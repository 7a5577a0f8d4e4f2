mod utils;

use gradflow_core::{dtype::DType, error::Result};
use utils::{assert_close, setup_tensor_with_shape, tolerance};

mod test_functions {
    use super::*;

    pub fn add_test(dtype: DType) -> Result<()> {
        let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0, 4.0], dtype, &[2, 2])?;
        let y = setup_tensor_with_shape(vec![10.0, 20.0], dtype, &[2])?;
        let z = x.add(&y)?;

        assert_eq!(z.shape(), &[2, 2]);
        assert_eq!(z.dtype(), dtype);
        assert_close(&z.to_flatten_vec::<f32>()?, &[11.0, 22.0, 13.0, 24.0], tolerance(dtype));
        Ok(())
    }

    pub fn sub_test(dtype: DType) -> Result<()> {
        let x = setup_tensor_with_shape(vec![5.0, 6.0, 7.0], dtype, &[3])?;
        let y = setup_tensor_with_shape(vec![1.0], dtype, &[1])?;
        let z = x.sub(&y)?;

        assert_close(&z.to_flatten_vec::<f32>()?, &[4.0, 5.0, 6.0], tolerance(dtype));
        Ok(())
    }

    pub fn mul_test(dtype: DType) -> Result<()> {
        let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], dtype, &[2, 3])?;
        let y = setup_tensor_with_shape(vec![2.0, 3.0], dtype, &[2, 1])?;
        let z = x.mul(&y)?;

        assert_close(&z.to_flatten_vec::<f32>()?, &[2.0, 4.0, 6.0, 12.0, 15.0, 18.0], tolerance(dtype));
        Ok(())
    }

    pub fn add_inplace_test(dtype: DType) -> Result<()> {
        let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0, 4.0], dtype, &[2, 2])?;
        let y = setup_tensor_with_shape(vec![1.0, 1.0], dtype, &[2])?;
        let id = x.storage_id();
        x.add_(&y)?;

        assert_eq!(x.storage_id(), id);
        assert_close(&x.to_flatten_vec::<f32>()?, &[2.0, 3.0, 4.0, 5.0], tolerance(dtype));
        Ok(())
    }
}

test_ops!([add, sub, mul, add_inplace]);

#[test]
fn add_promotes_dtype() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0], DType::I32, &[2])?;
    let y = setup_tensor_with_shape(vec![0.5, 0.5], DType::F32, &[2])?;
    let z = x.add(&y)?;

    assert_eq!(z.dtype(), DType::F32);
    assert_eq!(z.to_flatten_vec::<f32>()?, vec![1.5, 2.5]);
    Ok(())
}

#[test]
fn add_follows_lhs_strides() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], DType::F32, &[2, 3])?.transpose(0, 1)?;
    let y = setup_tensor_with_shape(vec![1.0; 6], DType::F32, &[3, 2])?;
    let z = x.add(&y)?;

    assert_eq!(z.shape(), &[3, 2]);
    assert_eq!(z.strides(), x.strides());
    assert_eq!(z.to_flatten_vec::<f32>()?, vec![2.0, 5.0, 3.0, 6.0, 4.0, 7.0]);
    Ok(())
}

#[test]
fn add_inplace_with_self() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0], DType::F32, &[3])?;
    x.add_(&x)?;

    assert_eq!(x.to_flatten_vec::<f32>()?, vec![2.0, 4.0, 6.0]);
    Ok(())
}

#[test]
fn add_inplace_rejects_expanded_destination() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0], DType::F32, &[1])?.expand(&[3])?;
    let y = setup_tensor_with_shape(vec![1.0, 2.0, 3.0], DType::F32, &[3])?;

    assert!(x.add_(&y).is_err());
    Ok(())
}

#[test]
fn add_rejects_bad_broadcast() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0], DType::F32, &[3])?;
    let y = setup_tensor_with_shape(vec![1.0, 2.0], DType::F32, &[2])?;

    assert!(x.add(&y).is_err());
    Ok(())
}
