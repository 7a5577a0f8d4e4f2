use crate::variable::Variable;
use gradflow_core::{
    device::Device,
    dtype::DType,
    error::{Error, Result},
};
use gradflow_tensor::Tensor;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

/// Gradients flowing into or out of a node. `None` is an undefined gradient.
pub type VariableList = Vec<Option<Variable>>;

pub type FunctionPreHook = Box<dyn Fn(VariableList) -> Result<VariableList> + Send + Sync>;
pub type FunctionPostHook = Box<dyn Fn(VariableList, &[Option<Variable>]) -> Result<VariableList> + Send + Sync>;

// ────────────────────────────────────────────────────────────────────────────
//  Identity
// ────────────────────────────────────────────────────────────────────────────

/// Identity of a node: the address of its shared allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn of(function: &Arc<dyn Function>) -> Self {
        NodeId(Arc::as_ptr(function) as *const () as usize)
    }
}

static SEQUENCE_NR: AtomicU64 = AtomicU64::new(0);

// ────────────────────────────────────────────────────────────────────────────
//  Edge
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct InputMetadata {
    shape: Vec<usize>,
    dtype: DType,
    device: Device,
}

impl InputMetadata {
    pub fn new(shape: &[usize], dtype: DType, device: Device) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            device,
        }
    }

    pub fn of(tensor: &Tensor) -> Self {
        Self::new(tensor.shape(), tensor.dtype(), tensor.device())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

/// Points at input slot `input_nr` of `function`. An edge without a function
/// discards whatever gradient is routed along it.
#[derive(Clone)]
pub struct Edge {
    pub function: Option<Arc<dyn Function>>,
    pub input_nr: usize,
}

impl Edge {
    pub fn new(function: Arc<dyn Function>, input_nr: usize) -> Self {
        Self {
            function: Some(function),
            input_nr,
        }
    }

    pub fn null() -> Self {
        Self {
            function: None,
            input_nr: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.function.is_some()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.function.as_ref().map(NodeId::of)
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(func) => write!(f, "Edge({}, input_nr={})", func.name(), self.input_nr),
            None => write!(f, "Edge(null)"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Function
// ────────────────────────────────────────────────────────────────────────────

/// State shared by every node: outgoing edges, input metadata, hooks and the
/// released flag set once saved state is freed.
pub struct FunctionBase {
    next_edges: Vec<Edge>,
    input_metadata: Vec<Option<InputMetadata>>,
    sequence_nr: u64,
    pre_hooks: Mutex<Vec<FunctionPreHook>>,
    post_hooks: Mutex<Vec<FunctionPostHook>>,
    released: AtomicBool,
}

impl FunctionBase {
    pub fn new(next_edges: Vec<Edge>, input_metadata: Vec<Option<InputMetadata>>) -> Self {
        Self {
            next_edges,
            input_metadata,
            sequence_nr: SEQUENCE_NR.fetch_add(1, Ordering::Relaxed),
            pre_hooks: Mutex::new(Vec::new()),
            post_hooks: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    /// Base without metadata; incoming gradients are not validated.
    pub fn with_num_inputs(next_edges: Vec<Edge>, num_inputs: usize) -> Self {
        Self::new(next_edges, vec![None; num_inputs])
    }

    pub fn next_edges(&self) -> &[Edge] {
        &self.next_edges
    }

    pub fn next_edge(&self, index: usize) -> Option<&Edge> {
        self.next_edges.get(index)
    }

    pub fn num_outputs(&self) -> usize {
        self.next_edges.len()
    }

    pub fn num_inputs(&self) -> usize {
        self.input_metadata.len()
    }

    pub fn input_metadata(&self, input_nr: usize) -> Option<&InputMetadata> {
        self.input_metadata.get(input_nr).and_then(|m| m.as_ref())
    }

    pub fn sequence_nr(&self) -> u64 {
        self.sequence_nr
    }

    /// False when the gradient for output `index` would be discarded.
    pub fn should_compute_output(&self, index: usize) -> bool {
        self.next_edges.get(index).is_some_and(Edge::is_valid)
    }

    pub fn add_pre_hook(&self, hook: FunctionPreHook) -> Result<()> {
        self.pre_hooks.lock().map_err(|_| Error::Lock)?.push(hook);
        Ok(())
    }

    pub fn add_post_hook(&self, hook: FunctionPostHook) -> Result<()> {
        self.post_hooks.lock().map_err(|_| Error::Lock)?.push(hook);
        Ok(())
    }

    pub fn has_post_hooks(&self) -> Result<bool> {
        Ok(!self.post_hooks.lock().map_err(|_| Error::Lock)?.is_empty())
    }

    pub(crate) fn run_pre_hooks(&self, mut inputs: VariableList) -> Result<VariableList> {
        let hooks = self.pre_hooks.lock().map_err(|_| Error::Lock)?;
        for hook in hooks.iter() {
            inputs = hook(inputs)?;
        }
        Ok(inputs)
    }

    pub(crate) fn run_post_hooks(&self, mut outputs: VariableList, inputs: &[Option<Variable>]) -> Result<VariableList> {
        let hooks = self.post_hooks.lock().map_err(|_| Error::Lock)?;
        for hook in hooks.iter() {
            outputs = hook(outputs, inputs)?;
        }
        Ok(outputs)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn mark_released(&self) {
        self.released.store(true, Ordering::Release);
    }
}

/// A backward computation unit.
///
/// `apply` receives one gradient per forward output and returns one gradient
/// per entry of `next_edges`.
pub trait Function: Send + Sync {
    fn name(&self) -> &str;

    fn base(&self) -> &FunctionBase;

    fn apply(&self, grads: VariableList) -> Result<VariableList>;

    /// Frees saved state after a backward pass that does not keep the graph.
    fn release_variables(&self) {}

    /// Leaf accumulators outlive individual graphs and are never released.
    fn is_accumulator(&self) -> bool {
        false
    }

    /// Drops what a previous backward pass left behind before a new pass
    /// that reaches this node starts.
    fn reset_accumulated(&self) -> Result<()> {
        Ok(())
    }

    fn next_edges(&self) -> &[Edge] {
        self.base().next_edges()
    }

    fn num_inputs(&self) -> usize {
        self.base().num_inputs()
    }

    fn sequence_nr(&self) -> u64 {
        self.base().sequence_nr()
    }
}
