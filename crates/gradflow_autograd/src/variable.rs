use crate::{
    engine,
    function::{Edge, Function},
    functions::accumulate_grad::AccumulateGrad,
};
use gradflow_core::{
    buffer::WithDType,
    device::Device,
    dtype::DType,
    error::{Error, Result},
};
use gradflow_tensor::Tensor;
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

/// Hook run on a gradient before it reaches the variable. Returning
/// `Some` replaces the gradient.
pub type VariableHook = Arc<dyn Fn(&Variable) -> Result<Option<Variable>> + Send + Sync>;

struct VariableImpl {
    data: Tensor,
    requires_grad: bool,
    grad_fn: Option<Arc<dyn Function>>,
    output_nr: usize,
    grad: Mutex<Option<Variable>>,
    // weak so the accumulator, which owns the variable, does not form a cycle
    grad_accumulator: Mutex<Weak<AccumulateGrad>>,
    hooks: Mutex<Vec<VariableHook>>,
}

/// A tensor plus its autograd metadata.
///
/// Leaves carry a gradient slot filled by their [`AccumulateGrad`]; non-leaf
/// variables point at the function that produced them.
#[derive(Clone)]
pub struct Variable {
    inner: Arc<VariableImpl>,
}

impl Variable {
    pub fn new(data: Tensor, requires_grad: bool) -> Self {
        Self::build(data, requires_grad, None, 0)
    }

    /// Output `output_nr` of `grad_fn`.
    pub fn from_function(data: Tensor, grad_fn: Arc<dyn Function>, output_nr: usize) -> Self {
        Self::build(data, true, Some(grad_fn), output_nr)
    }

    fn build(data: Tensor, requires_grad: bool, grad_fn: Option<Arc<dyn Function>>, output_nr: usize) -> Self {
        Self {
            inner: Arc::new(VariableImpl {
                data,
                requires_grad,
                grad_fn,
                output_nr,
                grad: Mutex::new(None),
                grad_accumulator: Mutex::new(Weak::new()),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn data(&self) -> &Tensor {
        &self.inner.data
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad
    }

    pub fn is_leaf(&self) -> bool {
        self.inner.grad_fn.is_none()
    }

    pub fn grad_fn(&self) -> Option<&Arc<dyn Function>> {
        self.inner.grad_fn.as_ref()
    }

    pub fn output_nr(&self) -> usize {
        self.inner.output_nr
    }

    pub fn shape(&self) -> &[usize] {
        self.inner.data.shape()
    }

    pub fn strides(&self) -> &[usize] {
        self.inner.data.strides()
    }

    pub fn dtype(&self) -> DType {
        self.inner.data.dtype()
    }

    pub fn device(&self) -> Device {
        self.inner.data.device()
    }

    pub fn is_sparse(&self) -> bool {
        self.inner.data.is_sparse()
    }

    /// Live handles to this variable or its tensor. A snapshot only.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner) + self.inner.data.use_count() - 1
    }

    pub fn is_same(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// New leaf sharing this variable's tensor, outside any graph.
    pub fn detach(&self) -> Variable {
        Variable::new(self.inner.data.clone(), false)
    }

    pub fn to_flatten_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        self.inner.data.to_flatten_vec()
    }

    pub fn item(&self) -> Result<f64> {
        self.inner.data.item()
    }

    // grad

    pub fn grad(&self) -> Result<Option<Variable>> {
        Ok(self.grad_slot()?.clone())
    }

    pub fn set_grad(&self, grad: Option<Variable>) -> Result<()> {
        *self.grad_slot()? = grad;
        Ok(())
    }

    pub fn zero_grad(&self) -> Result<()> {
        self.set_grad(None)
    }

    pub(crate) fn grad_slot(&self) -> Result<MutexGuard<'_, Option<Variable>>> {
        self.inner.grad.lock().map_err(|_| Error::Lock)
    }

    /// The accumulator of a leaf that requires grad. Repeated calls return the
    /// same node while some graph keeps it alive.
    pub fn grad_accumulator(&self) -> Result<Option<Arc<AccumulateGrad>>> {
        if !self.is_leaf() || !self.requires_grad() {
            return Ok(None);
        }
        let mut slot = self.inner.grad_accumulator.lock().map_err(|_| Error::Lock)?;
        if let Some(existing) = slot.upgrade() {
            return Ok(Some(existing));
        }
        let accumulator = Arc::new(AccumulateGrad::new(self.clone()));
        *slot = Arc::downgrade(&accumulator);
        Ok(Some(accumulator))
    }

    /// Where a gradient for this variable has to be sent.
    pub fn gradient_edge(&self) -> Result<Edge> {
        if let Some(grad_fn) = &self.inner.grad_fn {
            return Ok(Edge::new(grad_fn.clone(), self.inner.output_nr));
        }
        Ok(match self.grad_accumulator()? {
            Some(accumulator) => Edge::new(accumulator, 0),
            None => Edge::null(),
        })
    }

    // hooks

    /// Registers a hook on the gradient flowing into this variable.
    ///
    /// Leaf hooks run inside the accumulator; for non-leaf variables the hook
    /// becomes a pre hook of the producing function.
    pub fn register_hook<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&Variable) -> Result<Option<Variable>> + Send + Sync + 'static,
    {
        if !self.requires_grad() {
            return Err(Error::InvalidArgument(
                "cannot register a hook on a variable that does not require grad".into(),
            ));
        }
        match &self.inner.grad_fn {
            None => {
                self.inner.hooks.lock().map_err(|_| Error::Lock)?.push(Arc::new(hook));
                Ok(())
            }
            Some(grad_fn) => {
                let output_nr = self.inner.output_nr;
                grad_fn.base().add_pre_hook(Box::new(move |mut grads| {
                    if let Some(Some(grad)) = grads.get(output_nr) {
                        if let Some(replacement) = hook(grad)? {
                            grads[output_nr] = Some(replacement);
                        }
                    }
                    Ok(grads)
                }))
            }
        }
    }

    pub(crate) fn hooks(&self) -> Result<Vec<VariableHook>> {
        Ok(self.inner.hooks.lock().map_err(|_| Error::Lock)?.clone())
    }

    // backward

    /// Runs backward from this variable on the default engine.
    ///
    /// `grad` may be omitted for single-element variables, in which case a
    /// gradient of ones is used.
    pub fn backward(&self, grad: Option<Variable>, keep_graph: bool, create_graph: bool) -> Result<()> {
        engine::backward(std::slice::from_ref(self), grad.map(|g| vec![g]), keep_graph, create_graph)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variable(data={}, requires_grad={}", self.inner.data, self.requires_grad())?;
        if let Some(grad_fn) = &self.inner.grad_fn {
            write!(f, ", grad_fn={}", grad_fn.name())?;
        }
        write!(f, ")")
    }
}
