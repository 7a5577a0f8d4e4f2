#![allow(dead_code)]

use gradflow_autograd::{Edge, Function, FunctionBase, Variable, VariableList};
use gradflow_core::{
    device::{set_default_device, Device},
    dtype::DType,
    error::{Error, Result},
};
use gradflow_tensor::Tensor;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

pub fn setup_device() {
    set_default_device(Device::CPU);
}

pub fn tensor(data: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
    tensor_on(data, shape, Device::CPU)
}

pub fn tensor_on(data: Vec<f32>, shape: &[usize], device: Device) -> Result<Tensor> {
    setup_device();
    Tensor::from_flatten_vec_with_spec(data, shape, device, DType::F32)
}

pub fn leaf(data: Vec<f32>, shape: &[usize]) -> Result<Variable> {
    Ok(Variable::new(tensor(data, shape)?, true))
}

pub fn leaf_on(data: Vec<f32>, shape: &[usize], device: Device) -> Result<Variable> {
    Ok(Variable::new(tensor_on(data, shape, device)?, true))
}

pub fn constant(data: Vec<f32>, shape: &[usize]) -> Result<Variable> {
    Ok(Variable::new(tensor(data, shape)?, false))
}

pub fn grad_of(v: &Variable) -> Result<Vec<f32>> {
    v.grad()?
        .ok_or_else(|| Error::InvalidState("missing gradient".into()))?
        .to_flatten_vec::<f32>()
}

/// Multiplies its single incoming gradient by `factor` and sends it along
/// every next edge. Counts how often it ran.
pub struct Scale {
    base: FunctionBase,
    factor: f64,
    pub calls: Arc<AtomicUsize>,
}

impl Scale {
    pub fn node(next_edges: Vec<Edge>, factor: f64) -> (Arc<dyn Function>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let node: Arc<dyn Function> = Arc::new(Scale {
            base: FunctionBase::with_num_inputs(next_edges, 1),
            factor,
            calls: calls.clone(),
        });
        (node, calls)
    }
}

impl Function for Scale {
    fn name(&self) -> &str {
        "Scale"
    }

    fn base(&self) -> &FunctionBase {
        &self.base
    }

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let grad = grads.into_iter().next().flatten();
        let scaled = grad.map(|g| g.mul_scalar(self.factor)).transpose()?;
        Ok(vec![scaled; self.base.num_outputs()])
    }
}

/// Always fails in backward.
pub struct Failing {
    base: FunctionBase,
}

impl Failing {
    pub fn node(next_edges: Vec<Edge>) -> Arc<dyn Function> {
        Arc::new(Failing {
            base: FunctionBase::with_num_inputs(next_edges, 1),
        })
    }
}

impl Function for Failing {
    fn name(&self) -> &str {
        "Failing"
    }

    fn base(&self) -> &FunctionBase {
        &self.base
    }

    fn apply(&self, _grads: VariableList) -> Result<VariableList> {
        Err(Error::IncompatibleShape("shape mismatch found in backward".into()))
    }
}

/// Returns a fixed tensor along its only edge regardless of the incoming
/// gradient; each returned handle is freshly wrapped.
pub struct Emit {
    base: FunctionBase,
    grad: std::sync::Mutex<Option<Tensor>>,
}

impl Emit {
    pub fn node(next: Edge, grad: Tensor) -> Arc<dyn Function> {
        Arc::new(Emit {
            base: FunctionBase::with_num_inputs(vec![next], 1),
            grad: std::sync::Mutex::new(Some(grad)),
        })
    }
}

impl Function for Emit {
    fn name(&self) -> &str {
        "Emit"
    }

    fn base(&self) -> &FunctionBase {
        &self.base
    }

    fn apply(&self, _grads: VariableList) -> Result<VariableList> {
        let grad = self.grad.lock().map_err(|_| Error::Lock)?.take();
        Ok(vec![grad.map(|t| Variable::new(t, false))])
    }
}

pub fn seed(value: f32, shape: &[usize]) -> Result<Variable> {
    let size = shape.iter().product();
    constant(vec![value; size], shape)
}
