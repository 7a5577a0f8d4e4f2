pub mod engine;
pub mod function;
pub mod functions;
pub mod grad_mode;
mod graph_task;
pub mod input_buffer;
pub mod profiler;
mod ready_queue;
pub mod saved_variable;
pub mod variable;

pub use engine::{backward, Engine, EngineConfig, ExecuteOptions};
pub use function::{Edge, Function, FunctionBase, InputMetadata, NodeId, VariableList};
pub use grad_mode::{no_grad, AutoGradMode, GradMode};
pub use variable::Variable;
