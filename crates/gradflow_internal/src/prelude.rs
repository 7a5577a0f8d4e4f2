pub use crate::autograd::{
    backward, no_grad, AutoGradMode, Edge, Engine, EngineConfig, ExecuteOptions, Function, FunctionBase, GradMode,
    Variable, VariableList,
};
pub use crate::core::{
    device::{get_default_device, set_default_device, Device},
    dtype::*,
    error::{Error, Result},
};
pub use crate::tensor::{MemoryFormat, Tensor};
