use crate::{function::Function, graph_task::GraphTask, input_buffer::InputBuffer};
use gradflow_core::{
    device::Device,
    error::{Error, Result},
};
use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
};

pub(crate) struct NodeTask {
    pub(crate) graph_task: Arc<GraphTask>,
    pub(crate) function: Arc<dyn Function>,
    pub(crate) inputs: InputBuffer,
}

pub(crate) enum QueueItem {
    Node(NodeTask),
    /// Makes a worker driving a nested task re-check whether it finished.
    WakeUp,
    Shutdown,
}

/// FIFO of ready work for one device, serviced by that device's worker.
pub(crate) struct ReadyQueue {
    device: Device,
    queue: Mutex<VecDeque<QueueItem>>,
    not_empty: Condvar,
}

impl ReadyQueue {
    pub(crate) fn new(device: Device) -> Self {
        Self {
            device,
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    pub(crate) fn device(&self) -> Device {
        self.device
    }

    /// Node tasks count towards their graph task's outstanding work from the
    /// moment they are pushed.
    pub(crate) fn push(&self, item: QueueItem) -> Result<()> {
        if let QueueItem::Node(task) = &item {
            task.graph_task.increment_outstanding();
        }
        self.queue.lock().map_err(|_| Error::Lock)?.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    pub(crate) fn pop(&self) -> Result<QueueItem> {
        let mut queue = self.queue.lock().map_err(|_| Error::Lock)?;
        loop {
            if let Some(item) = queue.pop_front() {
                return Ok(item);
            }
            queue = self.not_empty.wait(queue).map_err(|_| Error::Lock)?;
        }
    }
}
