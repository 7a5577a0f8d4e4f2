pub use gradflow_internal::*;
