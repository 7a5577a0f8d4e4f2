use crate::{function::VariableList, variable::Variable};
use gradflow_core::{
    device::Device,
    error::{Error, Result},
};

/// Staging area for the gradients a node receives before it runs.
///
/// Gradients routed to the same slot are summed with the broadcasting,
/// type-promoting tensor add.
pub struct InputBuffer {
    buffer: VariableList,
}

impl InputBuffer {
    pub fn new(size: usize) -> Self {
        Self { buffer: vec![None; size] }
    }

    pub fn add(&mut self, pos: usize, var: Option<Variable>) -> Result<()> {
        let Some(var) = var else {
            return Ok(());
        };
        let len = self.buffer.len();
        let slot = self.buffer.get_mut(pos).ok_or_else(|| {
            Error::GraphStructure(format!("gradient routed to input {} of a node with {} inputs", pos, len))
        })?;

        *slot = Some(match slot.take() {
            None => var,
            Some(old) => old.add(&var)?,
        });
        Ok(())
    }

    /// Device of the first populated slot, CPU when every slot is empty.
    pub fn device(&self) -> Device {
        self.buffer
            .iter()
            .flatten()
            .map(Variable::device)
            .next()
            .unwrap_or(Device::CPU)
    }

    pub fn get(&self, pos: usize) -> Option<&Variable> {
        self.buffer.get(pos).and_then(|v| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_variables(self) -> VariableList {
        self.buffer
    }
}
