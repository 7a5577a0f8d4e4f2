use crate::variable::Variable;
use gradflow_core::error::{Error, Result};
use std::sync::Mutex;

/// A forward value kept alive for the backward pass and dropped when the
/// graph is released.
pub struct SavedVariable {
    data: Mutex<Option<Variable>>,
}

impl SavedVariable {
    pub fn new(variable: &Variable) -> Self {
        Self {
            data: Mutex::new(Some(variable.clone())),
        }
    }

    pub fn unpack(&self, owner: &str) -> Result<Variable> {
        self.data.lock().map_err(|_| Error::Lock)?.clone().ok_or_else(|| {
            Error::InvalidState(format!(
                "saved values of {} were already freed; pass keep_graph=true to backward through the graph twice",
                owner
            ))
        })
    }

    pub fn reset(&self) {
        if let Ok(mut data) = self.data.lock() {
            data.take();
        }
    }

    pub fn is_released(&self) -> bool {
        self.data.lock().map(|d| d.is_none()).unwrap_or(true)
    }
}
