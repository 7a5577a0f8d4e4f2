use crate::{
    engine::{panic_message, ExecuteOptions, PostCallback, PreCallback},
    function::{Edge, Function, NodeId},
    input_buffer::InputBuffer,
    variable::Variable,
};
use gradflow_core::{
    device::Device,
    error::{Error, Result},
};
use log::trace;
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
};

pub(crate) type FinalCallback = Box<dyn FnOnce() -> Result<()> + Send>;

thread_local! {
    static CURRENT_GRAPH_TASK: RefCell<Option<Arc<GraphTask>>> = const { RefCell::new(None) };
}

/// Makes `task` the target of `queue_callback` on this thread until dropped.
pub(crate) struct CurrentGraphTaskGuard {
    prev: Option<Arc<GraphTask>>,
}

impl CurrentGraphTaskGuard {
    pub(crate) fn enter(task: Arc<GraphTask>) -> Self {
        let prev = CURRENT_GRAPH_TASK.with(|c| c.borrow_mut().replace(task));
        Self { prev }
    }
}

impl Drop for CurrentGraphTaskGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_GRAPH_TASK.with(|c| *c.borrow_mut() = prev);
    }
}

pub(crate) fn with_current_graph_task<R>(f: impl FnOnce(Option<&Arc<GraphTask>>) -> R) -> R {
    CURRENT_GRAPH_TASK.with(|c| f(c.borrow().as_ref()))
}

struct GraphTaskState {
    dependencies: HashMap<NodeId, usize>,
    not_ready: HashMap<NodeId, InputBuffer>,
    error: Option<Error>,
    completed: bool,
}

/// Scheduling state of a single `execute()` call.
pub(crate) struct GraphTask {
    keep_graph: bool,
    grad_mode: bool,
    /// Worker device driving this task when it was started from inside a
    /// backward pass.
    owner: Option<Device>,
    outstanding_tasks: AtomicUsize,
    has_error: AtomicBool,
    completed: AtomicBool,
    state: Mutex<GraphTaskState>,
    completion: Condvar,
    /// Nodes that lead to the requested inputs. `None` runs everything.
    exec_info: Option<HashMap<NodeId, bool>>,
    pre_callbacks: HashMap<NodeId, Vec<PreCallback>>,
    post_callbacks: HashMap<NodeId, Vec<PostCallback>>,
    final_callbacks: Mutex<VecDeque<FinalCallback>>,
}

impl GraphTask {
    pub(crate) fn new(keep_graph: bool, grad_mode: bool, owner: Option<Device>, options: &ExecuteOptions) -> Self {
        Self {
            keep_graph,
            grad_mode,
            owner,
            outstanding_tasks: AtomicUsize::new(0),
            has_error: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            state: Mutex::new(GraphTaskState {
                dependencies: HashMap::new(),
                not_ready: HashMap::new(),
                error: None,
                completed: false,
            }),
            completion: Condvar::new(),
            exec_info: None,
            pre_callbacks: options.pre_callbacks.clone(),
            post_callbacks: options.post_callbacks.clone(),
            final_callbacks: Mutex::new(VecDeque::new()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, GraphTaskState>> {
        self.state.lock().map_err(|_| Error::Lock)
    }

    /// Counts, for every node reachable from `root`, the edges pointing at it,
    /// and returns the reachable leaf accumulators.
    ///
    /// Fails with `DoubleExecution` if any reachable node already released its
    /// saved state.
    pub(crate) fn compute_dependencies(&self, root: &Arc<dyn Function>) -> Result<Vec<Arc<dyn Function>>> {
        let mut state = self.state()?;
        let mut seen = HashSet::from([NodeId::of(root)]);
        let mut stack = vec![root.clone()];
        let mut accumulators = Vec::new();

        while let Some(function) = stack.pop() {
            if function.base().is_released() {
                return Err(Error::DoubleExecution {
                    node: function.name().to_string(),
                });
            }
            for edge in function.next_edges() {
                let Some(next) = &edge.function else {
                    continue;
                };
                if edge.input_nr >= next.num_inputs() {
                    return Err(Error::GraphStructure(format!(
                        "{} has an edge into input {} of {}, which has {} inputs",
                        function.name(),
                        edge.input_nr,
                        next.name(),
                        next.num_inputs()
                    )));
                }
                let id = NodeId::of(next);
                *state.dependencies.entry(id).or_insert(0) += 1;
                if seen.insert(id) {
                    if next.is_accumulator() {
                        accumulators.push(next.clone());
                    }
                    stack.push(next.clone());
                }
            }
        }

        trace!(
            "graph task has {} dependent nodes, {} of them leaves",
            state.dependencies.len(),
            accumulators.len()
        );
        Ok(accumulators)
    }

    /// Restricts execution to nodes on a path from `root` to one of `inputs`.
    pub(crate) fn init_exec_info(&mut self, root: &Arc<dyn Function>, inputs: &[Edge]) {
        let targets: HashSet<NodeId> = inputs.iter().filter_map(Edge::node_id).collect();
        let root_id = NodeId::of(root);

        let mut needed = HashMap::from([(root_id, targets.contains(&root_id))]);
        let mut stack: Vec<(Arc<dyn Function>, usize)> = vec![(root.clone(), 0)];

        loop {
            let Some((function, child)) = stack.last_mut() else {
                break;
            };
            match function.next_edges().get(*child).cloned() {
                Some(edge) => {
                    *child += 1;
                    if let Some(next) = edge.function {
                        let id = NodeId::of(&next);
                        if !needed.contains_key(&id) {
                            needed.insert(id, targets.contains(&id));
                            stack.push((next, 0));
                        }
                    }
                }
                None => {
                    let id = NodeId::of(function);
                    let leads_to_target = function
                        .next_edges()
                        .iter()
                        .filter_map(Edge::node_id)
                        .any(|child| needed.get(&child).copied().unwrap_or(false));
                    if leads_to_target {
                        needed.insert(id, true);
                    }
                    stack.pop();
                }
            }
        }

        self.exec_info = Some(needed);
    }

    pub(crate) fn is_needed(&self, id: NodeId) -> bool {
        match &self.exec_info {
            Some(info) => info.get(&id).copied().unwrap_or(false),
            None => true,
        }
    }

    pub(crate) fn keep_graph(&self) -> bool {
        self.keep_graph
    }

    pub(crate) fn grad_mode(&self) -> bool {
        self.grad_mode
    }

    pub(crate) fn owner(&self) -> Option<Device> {
        self.owner
    }

    pub(crate) fn pre_callbacks(&self, id: NodeId) -> &[PreCallback] {
        self.pre_callbacks.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn post_callbacks(&self, id: NodeId) -> &[PostCallback] {
        self.post_callbacks.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Feeds `grad` into input `input_nr` of `next`. Returns the node and its
    /// merged inputs once every incoming edge has delivered.
    pub(crate) fn route(
        &self,
        next: &Arc<dyn Function>,
        input_nr: usize,
        grad: Option<Variable>,
    ) -> Result<Option<(Arc<dyn Function>, InputBuffer)>> {
        let id = NodeId::of(next);
        let mut state = self.state()?;

        let ready = {
            let count = state.dependencies.get_mut(&id).ok_or_else(|| {
                Error::GraphStructure(format!("{} is not part of the graph being executed", next.name()))
            })?;
            if *count == 0 {
                return Err(Error::GraphStructure(format!(
                    "{} received more gradients than it has incoming edges",
                    next.name()
                )));
            }
            *count -= 1;
            *count == 0
        };

        state
            .not_ready
            .entry(id)
            .or_insert_with(|| InputBuffer::new(next.num_inputs()))
            .add(input_nr, grad)?;

        if !ready {
            return Ok(None);
        }
        let buffer = state
            .not_ready
            .remove(&id)
            .unwrap_or_else(|| InputBuffer::new(next.num_inputs()));
        Ok(Some((next.clone(), buffer)))
    }

    pub(crate) fn increment_outstanding(&self) {
        self.outstanding_tasks.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks one node task done. True when it was the last outstanding one.
    pub(crate) fn finish_task(&self) -> bool {
        self.outstanding_tasks.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    /// Keeps the first error; later ones are dropped.
    pub(crate) fn set_error(&self, error: Error) {
        if let Ok(mut state) = self.state() {
            if state.error.is_none() {
                state.error = Some(error);
            }
        }
        self.has_error.store(true, Ordering::Release);
    }

    pub(crate) fn take_error(&self) -> Result<Option<Error>> {
        Ok(self.state()?.error.take())
    }

    pub(crate) fn queue_callback(&self, callback: FinalCallback) -> Result<()> {
        self.final_callbacks.lock().map_err(|_| Error::Lock)?.push_back(callback);
        Ok(())
    }

    /// Runs queued final callbacks in order. Callbacks may queue more.
    pub(crate) fn run_final_callbacks(self: &Arc<Self>) {
        let _current = CurrentGraphTaskGuard::enter(self.clone());
        loop {
            if self.has_error() {
                return;
            }
            let next = match self.final_callbacks.lock() {
                Ok(mut callbacks) => callbacks.pop_front(),
                Err(_) => {
                    self.set_error(Error::Lock);
                    return;
                }
            };
            let Some(callback) = next else {
                return;
            };
            let result = panic::catch_unwind(AssertUnwindSafe(callback)).unwrap_or_else(|payload| {
                Err(Error::Internal {
                    message: format!("final callback panicked: {}", panic_message(payload.as_ref())),
                })
            });
            if let Err(e) = result {
                self.set_error(e);
            }
        }
    }

    pub(crate) fn mark_completed(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.completed = true;
        drop(state);
        self.completed.store(true, Ordering::Release);
        self.completion.notify_all();
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Blocks until the last outstanding node task finished.
    pub(crate) fn wait(&self) -> Result<()> {
        let mut state = self.state()?;
        while !state.completed {
            state = self.completion.wait(state).map_err(|_| Error::Lock)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn dependency_count(&self, id: NodeId) -> Option<usize> {
        self.state().ok()?.dependencies.get(&id).copied()
    }
}
