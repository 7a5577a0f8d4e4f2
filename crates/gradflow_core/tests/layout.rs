use gradflow_core::{
    device::Device,
    dtype::{promote_types, DType},
    error::{Error, Result},
    layout::{compute_broadcast_shape, is_expandable_to, Layout},
};

#[test]
fn contiguous_strides() {
    let layout = Layout::from_shape(&[2, 3, 4]);
    assert_eq!(layout.strides(), &[12, 4, 1]);
    assert!(layout.is_contiguous());
    assert!(layout.is_non_overlapping_and_dense());
    assert_eq!(layout.storage_span(), 24);
}

#[test]
fn transposed_layout_is_dense_but_not_contiguous() -> Result<()> {
    let mut layout = Layout::from_shape(&[2, 3]);
    layout.transpose(0, 1)?;

    assert_eq!(layout.shape(), &[3, 2]);
    assert_eq!(layout.strides(), &[1, 3]);
    assert!(!layout.is_contiguous());
    assert!(layout.is_non_overlapping_and_dense());
    assert_eq!(layout.dense_strides_like(), vec![1, 3]);
    Ok(())
}

#[test]
fn expanded_layout_overlaps() -> Result<()> {
    let layout = Layout::from_shape(&[3]).broadcast_to(&[2, 3])?;

    assert_eq!(layout.strides(), &[0, 1]);
    assert!(!layout.is_non_overlapping_and_dense());
    assert_eq!(layout.dense_strides_like(), vec![3, 1]);
    assert_eq!(layout.storage_span(), 3);
    assert_eq!(layout.storage_index(4), 1);
    Ok(())
}

#[test]
fn size_one_dims_are_ignored_for_density() {
    let layout = Layout::new(&[1, 4], &[17, 1], 0);
    assert!(layout.is_contiguous());
    assert!(layout.is_non_overlapping_and_dense());
}

#[test]
fn permute_checks_dims() -> Result<()> {
    let mut layout = Layout::from_shape(&[2, 3, 4]);
    layout.permute(&[2, 0, 1])?;
    assert_eq!(layout.shape(), &[4, 2, 3]);
    assert_eq!(layout.strides(), &[1, 12, 4]);

    assert!(matches!(layout.permute(&[0, 0, 1]), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        layout.permute(&[0, 1, 5]),
        Err(Error::DimensionOutOfBounds { dim: 5, ndim: 3 })
    ));
    Ok(())
}

#[test]
fn broadcast_rules() -> Result<()> {
    assert_eq!(compute_broadcast_shape(&[2, 1, 3], &[4, 1])?, vec![2, 4, 3]);
    assert_eq!(compute_broadcast_shape(&[], &[5])?, vec![5]);
    assert!(compute_broadcast_shape(&[2, 3], &[4]).is_err());

    assert!(Layout::from_shape(&[2]).broadcast_to(&[3]).is_err());
    assert!(Layout::from_shape(&[2, 3]).broadcast_to(&[3]).is_err());
    Ok(())
}

#[test]
fn expandability() {
    assert!(is_expandable_to(&[3], &[2, 3]));
    assert!(is_expandable_to(&[1, 3], &[4, 3]));
    assert!(is_expandable_to(&[], &[4, 3]));
    assert!(!is_expandable_to(&[2], &[2, 3]));
    assert!(!is_expandable_to(&[2, 2, 3], &[2, 3]));
}

#[test]
fn dtype_promotion() {
    assert_eq!(promote_types(DType::F32, DType::F64), DType::F64);
    assert_eq!(promote_types(DType::BF16, DType::F16), DType::F32);
    assert_eq!(promote_types(DType::I32, DType::F16), DType::F16);
    assert_eq!(promote_types(DType::I32, DType::I64), DType::I64);

    assert!(DType::BF16.is_float());
    assert!(!DType::I64.is_float());
    assert_eq!(DType::F16.size_in_bytes(), 2);
}

#[test]
fn device_display() {
    assert_eq!(Device::CPU.to_string(), "cpu");
    assert_eq!(Device::Accel(2).to_string(), "accel:2");
    assert!(Device::CPU.is_cpu());
    assert!(!Device::Accel(0).is_cpu());
}

#[test]
fn root_cause_unwraps_compute() {
    let err = Error::Compute {
        node: "Outer".into(),
        source: Box::new(Error::Compute {
            node: "Inner".into(),
            source: Box::new(Error::IncompatibleShape("x".into())),
        }),
    };
    assert!(matches!(err.root_cause(), Error::IncompatibleShape(_)));
}
