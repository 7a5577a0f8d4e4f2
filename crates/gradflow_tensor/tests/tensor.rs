mod utils;

use gradflow_core::{device::Device, dtype::DType, error::Result};
use gradflow_tensor::{MemoryFormat, Tensor};
use utils::setup_tensor_with_shape;

#[test]
fn clone_is_shallow() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0], DType::F32, &[2])?;
    assert_eq!(x.use_count(), 1);

    let y = x.clone();
    assert_eq!(x.use_count(), 2);
    assert!(x.is_same(&y));

    drop(y);
    assert_eq!(x.use_count(), 1);
    Ok(())
}

#[test]
fn transpose_shares_storage() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], DType::F32, &[2, 3])?;
    let t = x.transpose(0, 1)?;

    assert!(t.shares_storage(&x));
    assert!(!t.is_contiguous());
    assert!(t.is_non_overlapping_and_dense());
    assert_eq!(t.shape(), &[3, 2]);
    assert_eq!(t.to_flatten_vec::<f32>()?, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    Ok(())
}

#[test]
fn clone_with_preserve_keeps_dense_strides() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], DType::F32, &[2, 3])?.transpose(0, 1)?;

    let preserved = x.clone_with(MemoryFormat::Preserve)?;
    assert_eq!(preserved.strides(), x.strides());
    assert!(!preserved.shares_storage(&x));

    let contiguous = x.clone_with(MemoryFormat::Contiguous)?;
    assert!(contiguous.is_contiguous());
    assert_eq!(contiguous.to_flatten_vec::<f32>()?, x.to_flatten_vec::<f32>()?);
    Ok(())
}

#[test]
fn clone_with_preserve_falls_back_for_expanded() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0], DType::F32, &[2])?.expand(&[3, 2])?;
    assert!(!x.is_non_overlapping_and_dense());

    let c = x.clone_with(MemoryFormat::Preserve)?;
    assert!(c.is_contiguous());
    assert_eq!(c.to_flatten_vec::<f32>()?, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    Ok(())
}

#[test]
fn sum_to_shape_reduces_broadcast_dims() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], DType::F32, &[2, 3])?;

    assert_eq!(x.sum_to_shape(&[3])?.to_flatten_vec::<f32>()?, vec![5.0, 7.0, 9.0]);
    assert_eq!(x.sum_to_shape(&[2, 1])?.to_flatten_vec::<f32>()?, vec![6.0, 15.0]);
    assert_eq!(x.sum()?.item()?, 21.0);
    Ok(())
}

#[test]
fn to_dtype_and_device() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.5, 2.5], DType::F32, &[2])?;

    let same = x.to_dtype(DType::F32)?;
    assert!(same.is_same(&x));

    let d = x.to_dtype(DType::F64)?;
    assert_eq!(d.dtype(), DType::F64);
    assert_eq!(d.to_flatten_vec::<f64>()?, vec![1.5, 2.5]);

    let moved = x.to_device(Device::Accel(1))?;
    assert_eq!(moved.device(), Device::Accel(1));
    assert!(!moved.shares_storage(&x));
    assert_eq!(moved.to_flatten_vec::<f32>()?, vec![1.5, 2.5]);
    Ok(())
}

#[test]
fn device_mismatch_is_rejected() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0], DType::F32, &[1])?;
    let y = x.to_device(Device::Accel(0))?;

    assert!(x.add(&y).is_err());
    Ok(())
}

#[test]
fn neg_and_mul_scalar() -> Result<()> {
    let x = setup_tensor_with_shape(vec![1.0, -2.0], DType::F32, &[2])?;

    assert_eq!(x.neg()?.to_flatten_vec::<f32>()?, vec![-1.0, 2.0]);
    assert_eq!(x.mul_scalar(3.0)?.to_flatten_vec::<f32>()?, vec![3.0, -6.0]);
    Ok(())
}

#[test]
fn scalar_and_item() -> Result<()> {
    let s = Tensor::scalar(4.0)?;
    assert_eq!(s.ndim(), 0);
    assert_eq!(s.item()?, 4.0);

    let v = Tensor::new(vec![1.0f32, 2.0])?;
    assert!(v.item().is_err());
    Ok(())
}

#[test]
fn creation_follows_thread_defaults() -> Result<()> {
    gradflow_core::dtype::set_default_dtype(DType::F64);
    let z = Tensor::zeros(&[2, 2])?;
    gradflow_core::dtype::set_default_dtype(DType::F32);

    assert_eq!(z.dtype(), DType::F64);
    let like = Tensor::zeros_like(&Tensor::ones(&[3])?)?;
    assert_eq!(like.dtype(), DType::F32);
    assert_eq!(like.to_flatten_vec::<f32>()?, vec![0.0; 3]);
    Ok(())
}
