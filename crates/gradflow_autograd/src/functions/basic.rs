use crate::{
    function::{Edge, Function, FunctionBase, VariableList},
    variable::Variable,
};
use gradflow_core::error::{Error, Result};
use std::sync::Mutex;

/// Synthetic root of a backward pass. Emits the seed gradients along the
/// root edges.
pub struct GraphRoot {
    base: FunctionBase,
    outputs: Mutex<VariableList>,
}

impl GraphRoot {
    pub fn new(roots: Vec<Edge>, grads: Vec<Variable>) -> Self {
        Self {
            base: FunctionBase::with_num_inputs(roots, 0),
            outputs: Mutex::new(grads.into_iter().map(Some).collect()),
        }
    }
}

impl Function for GraphRoot {
    fn name(&self) -> &str {
        "GraphRoot"
    }

    fn base(&self) -> &FunctionBase {
        &self.base
    }

    /// Hands the seeds over; a root runs once per backward pass.
    fn apply(&self, _grads: VariableList) -> Result<VariableList> {
        let mut outputs = self.outputs.lock().map_err(|_| Error::Lock)?;
        Ok(std::mem::take(&mut *outputs))
    }
}
