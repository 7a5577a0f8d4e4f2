use crate::{
    function::{Edge, Function, NodeId, VariableList},
    functions::basic::GraphRoot,
    grad_mode::AutoGradMode,
    graph_task::{with_current_graph_task, CurrentGraphTaskGuard, GraphTask},
    input_buffer::InputBuffer,
    profiler::RecordFunction,
    ready_queue::{NodeTask, QueueItem, ReadyQueue},
    variable::Variable,
};
use dashmap::{mapref::entry::Entry, DashMap};
use gradflow_core::{
    device::Device,
    error::{Error, Result},
    layout::is_expandable_to,
};
use gradflow_tensor::Tensor;
use log::{debug, trace, warn};
use std::{
    any::Any,
    cell::Cell,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, LazyLock, Mutex,
    },
    thread::{self, JoinHandle},
};

/// Runs before a node's `apply` with its merged input gradients, which it
/// may rewrite. Returning `false` skips the node and everything it feeds.
pub type PreCallback = Arc<dyn Fn(&dyn Function, &mut VariableList) -> bool + Send + Sync>;

/// Runs after a node's `apply` with its inputs and outputs. Returning `false`
/// stops the outputs from being routed.
pub type PostCallback = Arc<dyn Fn(&dyn Function, &[Option<Variable>], &mut VariableList) -> bool + Send + Sync>;

static ENGINE_COUNTER: AtomicUsize = AtomicUsize::new(1);

static DEFAULT_ENGINE: LazyLock<Engine> = LazyLock::new(|| Engine::new(EngineConfig::from_env()));

thread_local! {
    /// `(engine id, device)` of the worker running on this thread.
    static WORKER: Cell<Option<(usize, Device)>> = const { Cell::new(None) };
}

// ────────────────────────────────────────────────────────────────────────────
//  Config
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub thread_name_prefix: String,
    /// Worker stack size in bytes; the platform default when `None`.
    pub worker_stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "gradflow-worker".to_string(),
            worker_stack_size: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `GRADFLOW_THREAD_NAME_PREFIX` and
    /// `GRADFLOW_WORKER_STACK_SIZE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(prefix) = std::env::var("GRADFLOW_THREAD_NAME_PREFIX") {
            if !prefix.is_empty() {
                config.thread_name_prefix = prefix;
            }
        }
        if let Ok(size) = std::env::var("GRADFLOW_WORKER_STACK_SIZE") {
            match size.parse::<usize>() {
                Ok(size) if size > 0 => config.worker_stack_size = Some(size),
                _ => warn!("ignoring invalid GRADFLOW_WORKER_STACK_SIZE={:?}", size),
            }
        }
        config
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Options
// ────────────────────────────────────────────────────────────────────────────

/// Per-call options of [`Engine::execute`].
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub(crate) pre_callbacks: HashMap<NodeId, Vec<PreCallback>>,
    pub(crate) post_callbacks: HashMap<NodeId, Vec<PostCallback>>,
    pub(crate) inputs: Option<Vec<Edge>>,
    pub(crate) retain_grad: bool,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre_callback<F>(mut self, node: &Arc<dyn Function>, callback: F) -> Self
    where
        F: Fn(&dyn Function, &mut VariableList) -> bool + Send + Sync + 'static,
    {
        self.pre_callbacks
            .entry(NodeId::of(node))
            .or_default()
            .push(Arc::new(callback));
        self
    }

    pub fn with_post_callback<F>(mut self, node: &Arc<dyn Function>, callback: F) -> Self
    where
        F: Fn(&dyn Function, &[Option<Variable>], &mut VariableList) -> bool + Send + Sync + 'static,
    {
        self.post_callbacks
            .entry(NodeId::of(node))
            .or_default()
            .push(Arc::new(callback));
        self
    }

    /// Keeps leaf gradients from earlier passes and adds to them. By default
    /// every leaf this pass reaches starts from an empty gradient.
    pub fn with_retain_grad(mut self, retain_grad: bool) -> Self {
        self.retain_grad = retain_grad;
        self
    }

    /// Only runs the part of the graph leading to these edges. Leaf
    /// accumulators outside the set receive nothing.
    pub fn with_inputs(mut self, inputs: Vec<Edge>) -> Self {
        self.inputs = Some(inputs);
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Engine
// ────────────────────────────────────────────────────────────────────────────

struct EngineShared {
    id: usize,
    config: EngineConfig,
    queues: DashMap<Device, Arc<ReadyQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Executes backward passes on one lazily started worker thread per device.
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                id: ENGINE_COUNTER.fetch_add(1, Ordering::Relaxed),
                config,
                queues: DashMap::new(),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Process-wide engine used by [`backward`] and [`Variable::backward`].
    pub fn get_default_engine() -> &'static Engine {
        &DEFAULT_ENGINE
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Devices whose worker has been started.
    pub fn started_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.shared.queues.iter().map(|e| *e.key()).collect();
        devices.sort();
        devices
    }

    /// Runs backward from `roots`, seeding root `i` with `grads[i]`, and
    /// blocks until every reachable node has run.
    ///
    /// Called from inside a backward function running on one of this
    /// engine's workers, the worker drives the nested pass itself.
    /// Gradients accumulated into leaves before an error are kept.
    pub fn execute(
        &self,
        roots: &[Edge],
        grads: Vec<Variable>,
        keep_graph: bool,
        create_graph: bool,
        options: &ExecuteOptions,
    ) -> Result<()> {
        validate_roots(roots, &grads)?;

        let owner = self.shared.current_worker_device();
        let root_device = owner.unwrap_or_else(|| grads.first().map(Variable::device).unwrap_or(Device::CPU));
        let root: Arc<dyn Function> = Arc::new(GraphRoot::new(roots.to_vec(), grads));

        let mut graph_task = GraphTask::new(keep_graph, create_graph, owner, options);
        let accumulators = graph_task.compute_dependencies(&root)?;
        if let Some(inputs) = &options.inputs {
            graph_task.init_exec_info(&root, inputs);
        }
        if !options.retain_grad {
            for accumulator in accumulators.iter().filter(|f| graph_task.is_needed(NodeId::of(f))) {
                accumulator.reset_accumulated()?;
            }
        }
        let graph_task = Arc::new(graph_task);

        debug!(
            "backward over {} root(s): keep_graph={}, create_graph={}, reentrant={}",
            roots.len(),
            keep_graph,
            create_graph,
            owner.is_some()
        );

        let queue = self.shared.ready_queue(root_device)?;
        queue.push(QueueItem::Node(NodeTask {
            graph_task: graph_task.clone(),
            function: root,
            inputs: InputBuffer::new(0),
        }))?;

        match owner {
            None => graph_task.wait()?,
            Some(device) => self.shared.thread_main(device, &queue, Some(&graph_task))?,
        }

        match graph_task.take_error()? {
            Some(error) => {
                debug!("backward failed: {}", error);
                Err(error)
            }
            None => {
                debug!("backward finished");
                Ok(())
            }
        }
    }

    /// Schedules `callback` to run once the current backward pass completes.
    ///
    /// Only valid while a backward pass is running on this thread, i.e. from
    /// inside a function, hook or another final callback.
    pub fn queue_callback<F>(callback: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        with_current_graph_task(|task| match task {
            Some(task) => task.queue_callback(Box::new(callback)),
            None => Err(Error::InvalidState(
                "queue_callback can only be called during the backward pass".into(),
            )),
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for entry in self.shared.queues.iter() {
            if let Err(e) = entry.value().push(QueueItem::Shutdown) {
                warn!("failed to stop worker for {}: {}", entry.key(), e);
            }
        }
        if self.shared.current_worker_device().is_some() {
            return;
        }
        let handles = match self.shared.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("autograd worker panicked during shutdown");
            }
        }
    }
}

fn validate_roots(roots: &[Edge], grads: &[Variable]) -> Result<()> {
    if roots.len() != grads.len() {
        return Err(Error::GraphStructure(format!(
            "got {} roots but {} seed gradients",
            roots.len(),
            grads.len()
        )));
    }
    for (i, (edge, grad)) in roots.iter().zip(grads).enumerate() {
        let Some(function) = &edge.function else {
            continue;
        };
        if let Some(meta) = function.base().input_metadata(edge.input_nr) {
            if meta.shape() != grad.shape() {
                return Err(Error::GraphStructure(format!(
                    "seed gradient {} has shape {:?} but its root expects {:?}",
                    i,
                    grad.shape(),
                    meta.shape()
                )));
            }
        }
    }
    Ok(())
}

impl EngineShared {
    fn current_worker_device(&self) -> Option<Device> {
        match WORKER.with(Cell::get) {
            Some((id, device)) if id == self.id => Some(device),
            _ => None,
        }
    }

    /// The queue for `device`, starting its worker on first use.
    fn ready_queue(self: &Arc<Self>, device: Device) -> Result<Arc<ReadyQueue>> {
        if let Some(queue) = self.queues.get(&device) {
            return Ok(queue.clone());
        }
        match self.queues.entry(device) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let queue = Arc::new(ReadyQueue::new(device));

                let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.thread_name_prefix, device));
                if let Some(size) = self.config.worker_stack_size {
                    builder = builder.stack_size(size);
                }
                let shared = self.clone();
                let worker_queue = queue.clone();
                let handle = builder
                    .spawn(move || shared.worker_main(worker_queue))
                    .map_err(|e| Error::External {
                        message: format!("failed to start autograd worker for {}: {}", device, e),
                    })?;

                self.workers.lock().map_err(|_| Error::Lock)?.push(handle);
                entry.insert(queue.clone());
                Ok(queue)
            }
        }
    }

    fn worker_main(self: Arc<Self>, queue: Arc<ReadyQueue>) {
        let device = queue.device();
        WORKER.with(|w| w.set(Some((self.id, device))));
        debug!("autograd worker for {} started", device);

        if let Err(e) = self.thread_main(device, &queue, None) {
            warn!("autograd worker for {} stopped: {}", device, e);
            return;
        }
        debug!("autograd worker for {} stopped", device);
    }

    /// Services `queue` until shutdown or, when driving a nested pass, until
    /// `until` completes.
    fn thread_main(self: &Arc<Self>, device: Device, queue: &ReadyQueue, until: Option<&Arc<GraphTask>>) -> Result<()> {
        loop {
            if until.is_some_and(|task| task.is_completed()) {
                return Ok(());
            }
            match queue.pop()? {
                QueueItem::Shutdown if until.is_some() => {
                    queue.push(QueueItem::Shutdown)?;
                    return Err(Error::Reentrancy(format!(
                        "queue for {} shut down while a nested backward was running",
                        device
                    )));
                }
                QueueItem::Shutdown => return Ok(()),
                QueueItem::WakeUp => continue,
                QueueItem::Node(task) => self.run_task(task),
            }
        }
    }

    fn run_task(self: &Arc<Self>, task: NodeTask) {
        let NodeTask {
            graph_task,
            function,
            inputs,
        } = task;

        if graph_task.has_error() {
            trace!("draining {} of a failed backward", function.name());
        } else {
            let name = function.name().to_string();
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate_function(&graph_task, function, inputs)));
            let result = result.unwrap_or_else(|payload| {
                Err(Error::Compute {
                    node: name,
                    source: Box::new(Error::Internal {
                        message: panic_message(payload.as_ref()),
                    }),
                })
            });
            if let Err(e) = result {
                graph_task.set_error(e);
            }
        }

        if graph_task.finish_task() {
            self.complete(&graph_task);
        }
    }

    fn complete(self: &Arc<Self>, graph_task: &Arc<GraphTask>) {
        graph_task.run_final_callbacks();
        graph_task.mark_completed();

        let Some(owner) = graph_task.owner() else {
            return;
        };
        if self.current_worker_device() == Some(owner) {
            return;
        }
        let woken = self.ready_queue(owner).and_then(|queue| queue.push(QueueItem::WakeUp));
        if let Err(e) = woken {
            warn!("failed to wake the worker for {}: {}", owner, e);
        }
    }

    fn evaluate_function(
        self: &Arc<Self>,
        graph_task: &Arc<GraphTask>,
        function: Arc<dyn Function>,
        inputs: InputBuffer,
    ) -> Result<()> {
        let id = NodeId::of(&function);
        if !graph_task.is_needed(id) {
            trace!("skipping {}: not needed for the requested inputs", function.name());
            return Ok(());
        }

        let _grad_mode = AutoGradMode::new(graph_task.grad_mode());
        let _current = CurrentGraphTaskGuard::enter(graph_task.clone());

        let mut inputs = inputs.into_variables();
        for callback in graph_task.pre_callbacks(id) {
            if !callback(function.as_ref(), &mut inputs) {
                trace!("{} vetoed by a pre callback", function.name());
                return Ok(());
            }
        }

        let post_callbacks = graph_task.post_callbacks(id);
        let keep_inputs = !post_callbacks.is_empty() || function.base().has_post_hooks()?;

        trace!("evaluating {} (sequence_nr={})", function.name(), function.sequence_nr());
        let (mut outputs, inputs) = {
            let _range = RecordFunction::new(function.name());
            call_function(&function, inputs, keep_inputs)?
        };

        if !graph_task.keep_graph() && !function.is_accumulator() {
            function.release_variables();
            function.base().mark_released();
        }

        for callback in post_callbacks {
            if !callback(function.as_ref(), &inputs, &mut outputs) {
                trace!("{} vetoed by a post callback", function.name());
                return Ok(());
            }
        }

        let num_edges = function.next_edges().len();
        if outputs.len() != num_edges {
            return Err(Error::GraphStructure(format!(
                "{} returned {} gradients but has {} next edges",
                function.name(),
                outputs.len(),
                num_edges
            )));
        }

        for (edge, grad) in function.next_edges().iter().zip(outputs) {
            let Some(next) = &edge.function else {
                continue;
            };
            let grad = grad
                .map(|g| validate_gradient(function.as_ref(), next.as_ref(), edge.input_nr, g))
                .transpose()?;

            if let Some((ready, buffer)) = graph_task.route(next, edge.input_nr, grad)? {
                let device = buffer.device();
                self.ready_queue(device)?.push(QueueItem::Node(NodeTask {
                    graph_task: graph_task.clone(),
                    function: ready,
                    inputs: buffer,
                }))?;
            }
        }
        Ok(())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs pre hooks, `apply` and post hooks. Inputs are handed back only when
/// `keep_inputs` is set, so an unshared gradient stays unshared inside `apply`.
fn call_function(
    function: &Arc<dyn Function>,
    inputs: VariableList,
    keep_inputs: bool,
) -> Result<(VariableList, VariableList)> {
    let wrap = |e: Error| Error::Compute {
        node: function.name().to_string(),
        source: Box::new(e),
    };
    let base = function.base();

    let inputs = base.run_pre_hooks(inputs).map_err(wrap)?;
    let kept = if keep_inputs { inputs.clone() } else { Vec::new() };
    let outputs = function.apply(inputs).map_err(wrap)?;
    let outputs = base.run_post_hooks(outputs, &kept).map_err(wrap)?;
    Ok((outputs, kept))
}

/// Brings `grad` in line with what input `input_nr` of `next` expects.
fn validate_gradient(producer: &dyn Function, next: &dyn Function, input_nr: usize, grad: Variable) -> Result<Variable> {
    let Some(meta) = next.base().input_metadata(input_nr) else {
        return Ok(grad);
    };

    let mut grad = grad;
    if grad.shape() != meta.shape() {
        if !is_expandable_to(meta.shape(), grad.shape()) {
            return Err(Error::GraphStructure(format!(
                "{} produced a gradient of shape {:?} for {}, which expects {:?}",
                producer.name(),
                grad.shape(),
                next.name(),
                meta.shape()
            )));
        }
        grad = grad.sum_to_shape(meta.shape())?;
    }
    if grad.dtype() != meta.dtype() {
        warn!(
            "casting gradient of {} from {} to {} for {}",
            producer.name(),
            grad.dtype().as_str(),
            meta.dtype().as_str(),
            next.name()
        );
        grad = grad.to_dtype(meta.dtype())?;
    }
    if grad.device() != meta.device() {
        grad = grad.to_device(meta.device())?;
    }
    Ok(grad)
}

/// Runs backward from `variables` on the default engine.
///
/// `grads` may be omitted when every variable holds a single element; each is
/// then seeded with ones.
pub fn backward(variables: &[Variable], grads: Option<Vec<Variable>>, keep_graph: bool, create_graph: bool) -> Result<()> {
    let grads = match grads {
        Some(grads) => grads,
        None => variables
            .iter()
            .map(|v| {
                if v.data().size() != 1 {
                    return Err(Error::InvalidArgument(format!(
                        "a seed gradient can only be implied for single-element outputs, got shape {:?}",
                        v.shape()
                    )));
                }
                Ok(Variable::new(Tensor::ones_like(v.data())?, false))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    let roots = variables
        .iter()
        .map(|v| {
            let edge = v.gradient_edge()?;
            if !edge.is_valid() {
                return Err(Error::InvalidArgument(
                    "variable does not require grad and has no grad_fn".into(),
                ));
            }
            Ok(edge)
        })
        .collect::<Result<Vec<_>>>()?;

    Engine::get_default_engine().execute(&roots, grads, keep_graph, create_graph, &ExecuteOptions::default())
}
