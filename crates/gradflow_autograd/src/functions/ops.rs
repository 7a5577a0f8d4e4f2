//! Differentiable operations on [`Variable`] and their backward functions.

use crate::{
    function::{Function, FunctionBase, InputMetadata, VariableList},
    grad_mode::GradMode,
    saved_variable::SavedVariable,
    variable::Variable,
};
use gradflow_core::{
    device::Device,
    dtype::DType,
    error::{Error, Result},
};
use gradflow_tensor::{MemoryFormat, Tensor};
use std::sync::Arc;

macro_rules! function_boilerplate {
    ($name:literal) => {
        fn name(&self) -> &str {
            $name
        }

        fn base(&self) -> &FunctionBase {
            &self.base
        }
    };
}

/// Wraps `output` in a variable, attaching a backward function built by
/// `make` when grad mode is on and some input requires grad.
fn record<F, M>(inputs: &[&Variable], output: Tensor, make: M) -> Result<Variable>
where
    F: Function + 'static,
    M: FnOnce(FunctionBase) -> F,
{
    if !GradMode::is_enabled() || !inputs.iter().any(|v| v.requires_grad()) {
        return Ok(Variable::new(output, false));
    }
    let next_edges = inputs.iter().map(|v| v.gradient_edge()).collect::<Result<Vec<_>>>()?;
    let base = FunctionBase::new(next_edges, vec![Some(InputMetadata::of(&output))]);
    let node: Arc<dyn Function> = Arc::new(make(base));
    Ok(Variable::from_function(output, node, 0))
}

/// The single incoming gradient of a one-output function.
fn single_grad(name: &str, grads: VariableList) -> Result<Option<Variable>> {
    if grads.len() != 1 {
        return Err(Error::GraphStructure(format!(
            "{} expects one gradient, got {}",
            name,
            grads.len()
        )));
    }
    Ok(grads.into_iter().next().flatten())
}

/// Computes output `index` only when its edge is live.
fn output_if(base: &FunctionBase, index: usize, f: impl FnOnce() -> Result<Variable>) -> Result<Option<Variable>> {
    if base.should_compute_output(index) {
        f().map(Some)
    } else {
        Ok(None)
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Binary
// ────────────────────────────────────────────────────────────────────────────

pub struct AddBackward {
    base: FunctionBase,
    lhs_shape: Vec<usize>,
    rhs_shape: Vec<usize>,
}

impl Function for AddBackward {
    function_boilerplate!("AddBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        let Some(grad) = single_grad(self.name(), grads)? else {
            return Ok(vec![None, None]);
        };
        Ok(vec![
            output_if(&self.base, 0, || grad.sum_to_shape(&self.lhs_shape))?,
            output_if(&self.base, 1, || grad.sum_to_shape(&self.rhs_shape))?,
        ])
    }
}

pub struct SubBackward {
    base: FunctionBase,
    lhs_shape: Vec<usize>,
    rhs_shape: Vec<usize>,
}

impl Function for SubBackward {
    function_boilerplate!("SubBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        let Some(grad) = single_grad(self.name(), grads)? else {
            return Ok(vec![None, None]);
        };
        Ok(vec![
            output_if(&self.base, 0, || grad.sum_to_shape(&self.lhs_shape))?,
            output_if(&self.base, 1, || grad.neg()?.sum_to_shape(&self.rhs_shape))?,
        ])
    }
}

pub struct MulBackward {
    base: FunctionBase,
    lhs: SavedVariable,
    rhs: SavedVariable,
}

impl Function for MulBackward {
    function_boilerplate!("MulBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        let Some(grad) = single_grad(self.name(), grads)? else {
            return Ok(vec![None, None]);
        };
        let lhs = self.lhs.unpack(self.name())?;
        let rhs = self.rhs.unpack(self.name())?;
        Ok(vec![
            output_if(&self.base, 0, || grad.mul(&rhs)?.sum_to_shape(lhs.shape()))?,
            output_if(&self.base, 1, || grad.mul(&lhs)?.sum_to_shape(rhs.shape()))?,
        ])
    }

    fn release_variables(&self) {
        self.lhs.reset();
        self.rhs.reset();
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Unary
// ────────────────────────────────────────────────────────────────────────────

pub struct NegBackward {
    base: FunctionBase,
}

impl Function for NegBackward {
    function_boilerplate!("NegBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?.map(|g| g.neg()).transpose()?])
    }
}

pub struct MulScalarBackward {
    base: FunctionBase,
    scalar: f64,
}

impl Function for MulScalarBackward {
    function_boilerplate!("MulScalarBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?
            .map(|g| g.mul_scalar(self.scalar))
            .transpose()?])
    }
}

/// Gradient passes through unchanged.
pub struct CloneBackward {
    base: FunctionBase,
}

impl Function for CloneBackward {
    function_boilerplate!("CloneBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?])
    }
}

pub struct ToCopyBackward {
    base: FunctionBase,
    dtype: DType,
    device: Device,
}

impl Function for ToCopyBackward {
    function_boilerplate!("ToCopyBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?
            .map(|g| g.to_dtype(self.dtype)?.to_device(self.device))
            .transpose()?])
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Reduction / shape
// ────────────────────────────────────────────────────────────────────────────

/// Backward of `sum` and `sum_to_shape`: broadcast the gradient back out.
pub struct SumBackward {
    base: FunctionBase,
    input_shape: Vec<usize>,
}

impl Function for SumBackward {
    function_boilerplate!("SumBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?
            .map(|g| g.expand(&self.input_shape))
            .transpose()?])
    }
}

pub struct ExpandBackward {
    base: FunctionBase,
    input_shape: Vec<usize>,
}

impl Function for ExpandBackward {
    function_boilerplate!("ExpandBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?
            .map(|g| g.sum_to_shape(&self.input_shape))
            .transpose()?])
    }
}

pub struct TransposeBackward {
    base: FunctionBase,
    dim0: usize,
    dim1: usize,
}

impl Function for TransposeBackward {
    function_boilerplate!("TransposeBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?
            .map(|g| g.transpose(self.dim0, self.dim1))
            .transpose()?])
    }
}

pub struct PermuteBackward {
    base: FunctionBase,
    inverse: Vec<usize>,
}

impl Function for PermuteBackward {
    function_boilerplate!("PermuteBackward");

    fn apply(&self, grads: VariableList) -> Result<VariableList> {
        Ok(vec![single_grad(self.name(), grads)?
            .map(|g| g.permute(&self.inverse))
            .transpose()?])
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Variable ops
// ────────────────────────────────────────────────────────────────────────────

impl Variable {
    pub fn add(&self, rhs: &Variable) -> Result<Variable> {
        let out = self.data().add(rhs.data())?;
        record(&[self, rhs], out, |base| AddBackward {
            base,
            lhs_shape: self.shape().to_vec(),
            rhs_shape: rhs.shape().to_vec(),
        })
    }

    pub fn sub(&self, rhs: &Variable) -> Result<Variable> {
        let out = self.data().sub(rhs.data())?;
        record(&[self, rhs], out, |base| SubBackward {
            base,
            lhs_shape: self.shape().to_vec(),
            rhs_shape: rhs.shape().to_vec(),
        })
    }

    pub fn mul(&self, rhs: &Variable) -> Result<Variable> {
        let out = self.data().mul(rhs.data())?;
        record(&[self, rhs], out, |base| MulBackward {
            base,
            lhs: SavedVariable::new(self),
            rhs: SavedVariable::new(rhs),
        })
    }

    pub fn neg(&self) -> Result<Variable> {
        let out = self.data().neg()?;
        record(&[self], out, |base| NegBackward { base })
    }

    pub fn mul_scalar(&self, scalar: f64) -> Result<Variable> {
        let out = self.data().mul_scalar(scalar)?;
        record(&[self], out, |base| MulScalarBackward { base, scalar })
    }

    pub fn sum(&self) -> Result<Variable> {
        self.sum_to_shape(&[])
    }

    /// Sums broadcast dimensions away. Returns `self` when the shape already
    /// matches.
    pub fn sum_to_shape(&self, shape: &[usize]) -> Result<Variable> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        let out = self.data().sum_to_shape(shape)?;
        record(&[self], out, |base| SumBackward {
            base,
            input_shape: self.shape().to_vec(),
        })
    }

    pub fn expand(&self, shape: &[usize]) -> Result<Variable> {
        let out = self.data().expand(shape)?;
        record(&[self], out, |base| ExpandBackward {
            base,
            input_shape: self.shape().to_vec(),
        })
    }

    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Variable> {
        let out = self.data().transpose(dim0, dim1)?;
        record(&[self], out, |base| TransposeBackward { base, dim0, dim1 })
    }

    pub fn permute(&self, dims: &[usize]) -> Result<Variable> {
        let out = self.data().permute(dims)?;
        let mut inverse = vec![0; dims.len()];
        for (i, &d) in dims.iter().enumerate() {
            inverse[d] = i;
        }
        record(&[self], out, |base| PermuteBackward { base, inverse })
    }

    pub fn clone_with(&self, memory_format: MemoryFormat) -> Result<Variable> {
        let out = self.data().clone_with(memory_format)?;
        record(&[self], out, |base| CloneBackward { base })
    }

    /// Copy into a fresh dense buffer with the given strides.
    pub fn clone_strided(&self, strides: &[usize]) -> Result<Variable> {
        let out = Tensor::empty_strided(self.shape(), strides, self.device(), self.dtype())?;
        out.copy_(self.data())?;
        record(&[self], out, |base| CloneBackward { base })
    }

    pub fn to_dtype(&self, dtype: DType) -> Result<Variable> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let out = self.data().to_dtype(dtype)?;
        record(&[self], out, |base| ToCopyBackward {
            base,
            dtype: self.dtype(),
            device: self.device(),
        })
    }

    pub fn to_device(&self, device: Device) -> Result<Variable> {
        if self.device() == device {
            return Ok(self.clone());
        }
        let out = self.data().to_device(device)?;
        record(&[self], out, |base| ToCopyBackward {
            base,
            dtype: self.dtype(),
            device: self.device(),
        })
    }
}
