use crate::{device::Device, dtype::DType};
use std::fmt;

#[derive(Debug)]
pub enum Error {
    DTypeMismatch {
        expected: DType,
        got: DType,
    },
    DeviceMismatch {
        expected: Device,
        got: Device,
    },
    InvalidArgument(String),
    IncompatibleShape(String),
    InvalidShape {
        message: String,
    },
    DimensionOutOfBounds {
        dim: usize,
        ndim: usize,
    },
    Lock,
    InvalidState(String),
    // autograd
    GraphStructure(String),
    Compute {
        node: String,
        source: Box<Error>,
    },
    DoubleExecution {
        node: String,
    },
    Reentrancy(String),
    // serde
    #[cfg(feature = "serde")]
    SerializationError(String),
    //
    Internal {
        message: String,
    },
    External {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DTypeMismatch { expected, got } => {
                write!(f, "DType mismatch: expected {:?}, got {:?}", expected, got)
            }
            Self::DeviceMismatch { expected, got } => {
                write!(f, "Device mismatch: expected {}, got {}", expected.name(), got.name())
            }
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::IncompatibleShape(msg) => write!(f, "Incompatible shape: {}", msg),
            Self::InvalidShape { message } => {
                write!(f, "Invalid shape: {}", message)
            }
            Self::DimensionOutOfBounds { dim, ndim } => {
                write!(
                    f,
                    "Dimension out of bounds: dimension {} is not valid for tensor with {} dimensions",
                    dim, ndim
                )
            }
            Self::Lock => write!(f, "Lock poisoned"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),

            Self::GraphStructure(msg) => write!(f, "Graph structure error: {}", msg),
            Self::Compute { node, source } => {
                write!(f, "Error in backward of {}: {}", node, source)
            }
            Self::DoubleExecution { node } => {
                write!(
                    f,
                    "Trying to backward through the graph a second time ({} has already been released); \
                     specify keep_graph=true on the first backward call",
                    node
                )
            }
            Self::Reentrancy(msg) => write!(f, "Reentrant backward error: {}", msg),
            #[cfg(feature = "serde")]
            Self::SerializationError(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
            Self::External { message } => {
                write!(f, "External error: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compute { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl Error {
    /// Strips `Compute` wrappers and returns the error raised by the failing node.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Compute { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
