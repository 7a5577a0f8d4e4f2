mod utils;

use gradflow_autograd::{
    functions::accumulate_grad::{obeys_layout_contract, AccumulateGrad},
    no_grad, AutoGradMode, Edge, Engine, ExecuteOptions, Variable,
};
use gradflow_core::{device::Device, dtype::DType, error::Result};
use gradflow_tensor::Tensor;
use utils::{constant, grad_of, leaf, seed, tensor, Emit};

fn sparse_grad() -> Result<Variable> {
    let indices = Tensor::from_flatten_vec_with_spec(vec![0i64, 1, 2, 0], &[2, 2], Device::CPU, DType::I64)?;
    let values = Tensor::from_flatten_vec_with_spec(vec![1.0f32, 2.0], &[2], Device::CPU, DType::F32)?;
    Ok(Variable::new(Tensor::sparse_coo(indices, values, &[2, 3])?, false))
}

#[test]
fn unshared_gradient_with_matching_strides_is_stolen() -> Result<()> {
    let _guard = no_grad();
    let var = leaf(vec![0.0; 6], &[2, 3])?;
    let grad = constant(vec![1.0; 6], &[2, 3])?;
    let id = grad.data().storage_id();

    AccumulateGrad::accumulate(&var, grad, 1)?;

    let stored = var.grad()?.map(|g| g.data().storage_id());
    assert_eq!(stored, Some(id));
    Ok(())
}

#[test]
fn shared_gradient_is_copied() -> Result<()> {
    let _guard = no_grad();
    let var = leaf(vec![0.0; 6], &[2, 3])?;
    let grad = constant(vec![1.0; 6], &[2, 3])?;

    AccumulateGrad::accumulate(&var, grad.clone(), 1)?;

    let stored = var.grad()?.map(|g| g.data().storage_id());
    assert_ne!(stored, Some(grad.data().storage_id()));
    assert_eq!(grad_of(&var)?, vec![1.0; 6]);
    Ok(())
}

#[test]
fn mismatched_strides_are_normalised_to_the_variable() -> Result<()> {
    let _guard = no_grad();
    let var = leaf(vec![0.0; 6], &[2, 3])?;
    let grad = Variable::new(tensor(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2])?.transpose(0, 1)?, false);
    assert_eq!(grad.strides(), &[1, 2]);

    AccumulateGrad::accumulate(&var, grad, 1)?;

    let stored = var.grad()?.map(|g| g.strides().to_vec());
    assert_eq!(stored, Some(vec![3, 1]));
    assert_eq!(grad_of(&var)?, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    Ok(())
}

#[test]
fn gradient_follows_a_transposed_variable() -> Result<()> {
    let _guard = no_grad();
    let var = Variable::new(tensor(vec![0.0; 6], &[3, 2])?.transpose(0, 1)?, true);
    let grad = constant(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;

    AccumulateGrad::accumulate(&var, grad, 1)?;

    let stored = var.grad()?.map(|g| g.strides().to_vec());
    assert_eq!(stored, Some(var.strides().to_vec()));
    assert_eq!(grad_of(&var)?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    Ok(())
}

#[test]
fn non_dense_variable_gets_row_major_gradient() -> Result<()> {
    let _guard = no_grad();
    let var = Variable::new(tensor(vec![0.0, 0.0], &[2])?.expand(&[3, 2])?, true);
    let grad = Variable::new(tensor(vec![1.0; 6], &[2, 3])?.transpose(0, 1)?, false);

    assert!(!obeys_layout_contract(grad.data(), var.data()));
    AccumulateGrad::accumulate(&var, grad, 1)?;

    let stored = var.grad()?.map(|g| g.data().is_contiguous());
    assert_eq!(stored, Some(true));
    Ok(())
}

#[test]
fn later_gradients_are_added_in_place() -> Result<()> {
    let _guard = no_grad();
    let var = leaf(vec![0.0; 3], &[3])?;
    AccumulateGrad::accumulate(&var, constant(vec![1.0, 2.0, 3.0], &[3])?, 1)?;
    let id = var.grad()?.map(|g| g.data().storage_id());

    AccumulateGrad::accumulate(&var, constant(vec![1.0, 1.0, 1.0], &[3])?, 1)?;

    assert_eq!(var.grad()?.map(|g| g.data().storage_id()), id);
    assert_eq!(grad_of(&var)?, vec![2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn unshared_sparse_gradient_is_shallow_copied() -> Result<()> {
    let _guard = no_grad();
    let var = leaf(vec![0.0; 6], &[2, 3])?;
    let grad = sparse_grad()?;
    let values_id = grad.data().values()?.storage_id();

    AccumulateGrad::accumulate(&var, grad, 1)?;

    let stored = var.grad()?.expect("gradient stored");
    assert!(stored.is_sparse());
    assert_eq!(stored.data().values()?.storage_id(), values_id);
    assert_eq!(stored.to_flatten_vec::<f32>()?, vec![0.0, 0.0, 1.0, 2.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn shared_sparse_gradient_is_deep_copied() -> Result<()> {
    let _guard = no_grad();
    let var = leaf(vec![0.0; 6], &[2, 3])?;
    let grad = sparse_grad()?;
    let values = grad.data().values()?;

    AccumulateGrad::accumulate(&var, grad, 1)?;

    let stored = var.grad()?.expect("gradient stored");
    assert!(stored.is_sparse());
    assert_ne!(stored.data().values()?.storage_id(), values.storage_id());
    Ok(())
}

#[test]
fn dense_into_sparse_slot_becomes_dense() -> Result<()> {
    let _guard = no_grad();
    let var = leaf(vec![0.0; 6], &[2, 3])?;
    AccumulateGrad::accumulate(&var, sparse_grad()?, 1)?;

    AccumulateGrad::accumulate(&var, constant(vec![1.0; 6], &[2, 3])?, 1)?;

    let stored = var.grad()?.expect("gradient stored");
    assert!(!stored.is_sparse());
    assert_eq!(stored.to_flatten_vec::<f32>()?, vec![1.0, 1.0, 2.0, 3.0, 1.0, 1.0]);
    Ok(())
}

#[test]
fn grad_mode_accumulates_out_of_place() -> Result<()> {
    let _guard = AutoGradMode::new(true);
    let var = leaf(vec![0.0; 3], &[3])?;
    AccumulateGrad::accumulate(&var, constant(vec![1.0, 1.0, 1.0], &[3])?, 1)?;
    let first = var.grad()?.expect("gradient stored");

    AccumulateGrad::accumulate(&var, constant(vec![2.0, 2.0, 2.0], &[3])?, 1)?;

    let second = var.grad()?.expect("gradient stored");
    assert!(!second.is_same(&first));
    assert_eq!(first.to_flatten_vec::<f32>()?, vec![1.0; 3]);
    assert_eq!(second.to_flatten_vec::<f32>()?, vec![3.0; 3]);
    Ok(())
}

#[test]
fn engine_steals_fresh_gradient() -> Result<()> {
    let var = leaf(vec![0.0; 4], &[2, 2])?;
    let accumulator = var.gradient_edge()?;
    let fresh = tensor(vec![1.0, 2.0, 3.0, 4.0], &[2, 2])?;
    let id = fresh.storage_id();
    let emit = Emit::node(accumulator, fresh);

    Engine::get_default_engine().execute(
        &[Edge::new(emit, 0)],
        vec![seed(1.0, &[1])?],
        false,
        false,
        &ExecuteOptions::default(),
    )?;

    assert_eq!(var.grad()?.map(|g| g.data().storage_id()), Some(id));
    assert_eq!(grad_of(&var)?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn each_backward_starts_from_an_empty_slot() -> Result<()> {
    let var = leaf(vec![1.0], &[])?;
    let y = var.mul_scalar(2.0)?;
    y.backward(None, true, false)?;
    let first = grad_of(&var)?;
    y.backward(None, true, false)?;

    assert_eq!(first, vec![2.0]);
    assert_eq!(grad_of(&var)?, first);
    Ok(())
}

#[test]
fn retained_gradients_accumulate_across_calls() -> Result<()> {
    let var = leaf(vec![1.0], &[])?;
    let y = var.mul_scalar(2.0)?;
    let retain = ExecuteOptions::new().with_retain_grad(true);
    let engine = Engine::get_default_engine();

    engine.execute(&[y.gradient_edge()?], vec![seed(1.0, &[])?], true, false, &retain)?;
    engine.execute(&[y.gradient_edge()?], vec![seed(1.0, &[])?], true, false, &retain)?;
    assert_eq!(grad_of(&var)?, vec![4.0]);

    var.zero_grad()?;
    assert!(var.grad()?.is_none());
    engine.execute(&[y.gradient_edge()?], vec![seed(1.0, &[])?], false, false, &retain)?;
    assert_eq!(grad_of(&var)?, vec![2.0]);
    Ok(())
}

#[test]
fn leaves_outside_the_pass_keep_their_gradient() -> Result<()> {
    let a = leaf(vec![1.0], &[])?;
    let b = leaf(vec![1.0], &[])?;
    a.mul_scalar(3.0)?.backward(None, false, false)?;
    b.mul_scalar(5.0)?.backward(None, false, false)?;

    assert_eq!(grad_of(&a)?, vec![3.0]);
    assert_eq!(grad_of(&b)?, vec![5.0]);
    Ok(())
}
