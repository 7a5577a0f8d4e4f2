use crate::{
    function::{Function, FunctionBase, InputMetadata, VariableList},
    grad_mode::GradMode,
    variable::Variable,
};
use gradflow_core::error::{Error, Result};
use gradflow_tensor::{MemoryFormat, Tensor};
use log::trace;

/// Terminal node that adds incoming gradients into a leaf's `grad`.
pub struct AccumulateGrad {
    base: FunctionBase,
    variable: Variable,
}

impl AccumulateGrad {
    pub fn new(variable: Variable) -> Self {
        let metadata = InputMetadata::of(variable.data());
        Self {
            base: FunctionBase::new(Vec::new(), vec![Some(metadata)]),
            variable,
        }
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    /// Adds `new_grad` into `variable`'s gradient slot.
    ///
    /// A fresh gradient is stored without copying when nothing else refers to
    /// it and its strides already follow the variable's layout; otherwise it
    /// is copied into that layout. Later gradients are added in place, or out
    /// of place while grad mode is on so the sum itself is differentiable.
    /// `num_expected_refs` is how many handles to `new_grad` the caller
    /// accounts for.
    pub fn accumulate(variable: &Variable, new_grad: Variable, num_expected_refs: usize) -> Result<()> {
        let grad_mode = GradMode::is_enabled();
        let mut slot = variable.grad_slot()?;

        let updated = match slot.as_ref() {
            None => Some(first_grad(variable, new_grad, num_expected_refs, grad_mode)?),
            Some(current) if !grad_mode => {
                if current.is_sparse() && !new_grad.is_sparse() {
                    Some(new_grad.add(current)?)
                } else {
                    current.data().add_(new_grad.data())?;
                    None
                }
            }
            Some(current) => {
                let prefer_new = (current.is_sparse() && !new_grad.is_sparse())
                    || obeys_layout_contract(new_grad.data(), variable.data());
                Some(if prefer_new {
                    new_grad.add(current)?
                } else {
                    current.add(&new_grad)?
                })
            }
        };

        if let Some(grad) = updated {
            *slot = Some(grad);
        }
        Ok(())
    }
}

fn first_grad(variable: &Variable, new_grad: Variable, num_expected_refs: usize, grad_mode: bool) -> Result<Variable> {
    let unshared = new_grad.use_count() <= num_expected_refs;

    if !grad_mode && unshared && !new_grad.is_sparse() && obeys_layout_contract(new_grad.data(), variable.data()) {
        trace!("stealing gradient for leaf of shape {:?}", variable.shape());
        return Ok(if new_grad.is_leaf() && !new_grad.requires_grad() {
            new_grad
        } else {
            new_grad.detach()
        });
    }

    if !grad_mode && unshared && new_grad.is_sparse() {
        let data = new_grad.data();
        if data.sparse_parts_contiguous()? && data.sparse_part_use_counts()? == (1, 1) {
            return Ok(Variable::new(data.shallow_copy_sparse()?, false));
        }
    }

    if new_grad.is_sparse() {
        return new_grad.clone_with(MemoryFormat::Contiguous);
    }
    let target = variable.data();
    if target.is_non_overlapping_and_dense() {
        if strides_match(new_grad.data(), target) {
            new_grad.clone_with(MemoryFormat::Preserve)
        } else {
            new_grad.clone_strided(target.strides())
        }
    } else {
        new_grad.clone_with(MemoryFormat::Contiguous)
    }
}

/// Strides agree on every dimension of size greater than one.
fn strides_match(grad: &Tensor, variable: &Tensor) -> bool {
    grad.shape() == variable.shape()
        && grad
            .shape()
            .iter()
            .zip(grad.strides().iter().zip(variable.strides()))
            .all(|(&size, (a, b))| size < 2 || a == b)
}

/// True when `grad` is laid out the way gradients of `variable` should be:
/// strided like the variable when it is dense, row-major otherwise.
pub fn obeys_layout_contract(grad: &Tensor, variable: &Tensor) -> bool {
    if grad.is_sparse() || variable.is_sparse() {
        return false;
    }
    if variable.is_non_overlapping_and_dense() {
        strides_match(grad, variable)
    } else {
        grad.is_contiguous()
    }
}

impl Function for AccumulateGrad {
    fn name(&self) -> &str {
        "AccumulateGrad"
    }

    fn base(&self) -> &FunctionBase {
        &self.base
    }

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        if grads.len() != 1 {
            return Err(Error::GraphStructure(format!(
                "AccumulateGrad expects one gradient, got {}",
                grads.len()
            )));
        }
        let Some(mut grad) = grads.into_iter().next().flatten() else {
            return Ok(Vec::new());
        };

        for hook in self.variable.hooks()? {
            if let Some(replacement) = hook(&grad)? {
                grad = replacement;
            }
        }

        Self::accumulate(&self.variable, grad, 1)?;
        Ok(Vec::new())
    }

    fn is_accumulator(&self) -> bool {
        true
    }

    fn reset_accumulated(&self) -> Result<()> {
        self.variable.set_grad(None)
    }
}
